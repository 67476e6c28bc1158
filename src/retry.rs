//! Per-path retry accounting and the fallback decision.
//!
//! The tracker owns a plain map from source path to consecutive-failure
//! count. It lives for the worker's lifetime only — a restart resets all
//! in-flight counts to zero, which is acceptable because the affected files
//! are still in the input tree and simply get a fresh retry budget.
//!
//! State machine per path:
//!
//! ```text
//! Fresh(0) ──failure──▶ Attempted(n) ──failure (n < max)──▶ RetryLater
//!                            │
//!                            ├─ success ──────────────────▶ entry removed
//!                            └─ failure (n == max) ────────▶ Fallback, entry removed
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// What to do with an item after a failed conversion attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Leave the source in place; it will be rediscovered and retried.
    RetryLater {
        /// Consecutive failures so far, including this one.
        attempts: u32,
    },
    /// Budget exhausted: substitute the fallback image and archive anyway.
    Fallback,
}

/// Consecutive-failure counter per source path.
#[derive(Debug)]
pub struct RetryTracker {
    counts: HashMap<PathBuf, u32>,
    max_attempts: u32,
}

impl RetryTracker {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            counts: HashMap::new(),
            max_attempts: max_attempts.max(1),
        }
    }

    /// Record a successful conversion: the path's entry is removed entirely.
    pub fn record_success(&mut self, path: &Path) {
        self.counts.remove(path);
    }

    /// Record a failed attempt and decide the item's disposition.
    ///
    /// The counter strictly increases by one per failure. Reaching the
    /// budget removes the entry — the item is terminal (fallback + archive),
    /// and if the same path were ever reintroduced it starts fresh at zero.
    pub fn record_failure(&mut self, path: &Path) -> FailureDisposition {
        let count = self.counts.entry(path.to_path_buf()).or_insert(0);
        *count += 1;

        if *count >= self.max_attempts {
            self.counts.remove(path);
            FailureDisposition::Fallback
        } else {
            FailureDisposition::RetryLater { attempts: *count }
        }
    }

    /// Consecutive failures recorded for a path (0 if none).
    pub fn attempts(&self, path: &Path) -> u32 {
        self.counts.get(path).copied().unwrap_or(0)
    }

    /// Number of paths currently carrying a failure count.
    pub fn tracked(&self) -> usize {
        self.counts.len()
    }
}
