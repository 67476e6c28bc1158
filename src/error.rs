//! Error types for the ptifd library.
//!
//! The worker distinguishes three failure tiers, and only the middle one is
//! represented here as an error:
//!
//! * **Stage-local degradations** (MIME sniff failure, ICC extraction or
//!   merge failure) are not errors at all — the affected stage logs and
//!   proceeds without the enhancement. They never appear as a
//!   [`WorkerError`].
//!
//! * [`WorkerError`] — **fatal for the attempt**: an external command failed,
//!   timed out, or the filesystem misbehaved. The retry tracker decides
//!   whether the item is retried later or replaced by the fallback image.
//!
//! * Nothing is fatal for the process. The outer loop logs every error and
//!   keeps running; there is deliberately no variant that terminates the
//!   worker.

use std::path::PathBuf;
use thiserror::Error;

/// All errors that can fail a single conversion attempt.
#[derive(Debug, Error)]
pub enum WorkerError {
    // ── External command errors ───────────────────────────────────────────
    /// A collaborator program is not installed or not on PATH.
    #[error("collaborator '{program}' not found on PATH\nInstall it or point the toolchain config at an absolute path.")]
    ToolMissing { program: String },

    /// A collaborator could not be spawned at all.
    #[error("failed to spawn '{program}': {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// A collaborator exited with a non-zero status.
    #[error("'{program}' exited with status {code:?}: {stderr}")]
    CommandFailed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    /// A collaborator exceeded the global command timeout and was killed.
    #[error("'{program}' timed out after {secs}s and was killed")]
    CommandTimeout { program: String, secs: u64 },

    /// A collaborator succeeded but did not produce the expected output file.
    #[error("'{program}' completed but produced no output at '{path}'")]
    MissingOutput { program: String, path: PathBuf },

    // ── Filesystem errors ─────────────────────────────────────────────────
    /// An I/O operation on a specific path failed.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl WorkerError {
    /// Attach a path to a raw I/O error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
