//! The polling loop: scan, process one item to completion, repeat.
//!
//! Strictly sequential by design — one item in flight at a time, all
//! external commands awaited to completion before the next scan. The only
//! suspension points are command waits (bounded by the global timeout), the
//! idle sleep between empty scans, and the ICC poll-wait inside the profile
//! stage.
//!
//! Nothing that happens while processing an item may kill the loop. Scan
//! and setup errors are logged and the loop continues; per-item conversion
//! errors go through the retry tracker, which decides between retry-later
//! and fallback.

use std::path::Path;
use tokio::sync::watch;
use tracing::{error, info, warn, Instrument};

use crate::command;
use crate::config::WorkerConfig;
use crate::error::WorkerError;
use crate::pipeline::{convert, layout::OutputLayout, profile};
use crate::retry::{FailureDisposition, RetryTracker};
use crate::scan::{self, WorkItem};

/// Terminal state of one processed item, for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Conversion succeeded; source archived.
    Success,
    /// Already-tiled TIFF copied verbatim; source archived.
    TiledShortcut,
    /// Attempt failed, retry budget not exhausted; source left in place.
    RetryLater,
    /// Retry budget exhausted; fallback image substituted, source archived.
    Fallback,
}

/// The ingestion worker: owns the retry state and the lazily-seeded output
/// layout for its whole lifetime.
pub struct Worker {
    config: WorkerConfig,
    retries: RetryTracker,
    layout: OutputLayout,
}

impl Worker {
    pub fn new(config: WorkerConfig) -> Self {
        let retries = RetryTracker::new(config.max_attempts);
        let layout = OutputLayout::new(&config);
        Self {
            config,
            retries,
            layout,
        }
    }

    /// Consecutive failures currently recorded for a source path.
    pub fn attempts(&self, path: &Path) -> u32 {
        self.retries.attempts(path)
    }

    /// Run until `shutdown` flips to true. The in-flight item always
    /// completes; shutdown is only observed between ticks.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        let missing = command::preflight(self.config.tools.programs());
        if !missing.is_empty() {
            warn!(
                "{} collaborator(s) missing: {} — affected conversions will fail",
                missing.len(),
                missing.join(", ")
            );
        }
        for warning in self.config.missing_file_warnings() {
            warn!("{}", warning);
        }
        info!(
            "watching {} -> {} (archive {})",
            self.config.input_dir.display(),
            self.config.output_dir.display(),
            self.config.processed_dir.display()
        );

        loop {
            if *shutdown.borrow() {
                info!("shutdown requested, stopping");
                return;
            }

            let processed = self.tick().await.is_some();

            if !processed {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                    _ = shutdown.changed() => {}
                }
            }
        }
    }

    /// Scan and process at most one item. Returns the item's outcome, or
    /// `None` when the input tree held nothing eligible (callers idle then).
    pub async fn tick(&mut self) -> Option<Outcome> {
        let item = scan::next_work_item(&self.config).await?;

        let span = tracing::info_span!("item", path = %item.path.display());
        let outcome = async {
            let outcome = match self.process(&item).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    // Setup errors (layout, metadata) count against the retry
                    // budget like any other failure: the file stays put and
                    // will be reattempted.
                    error!("attempt failed: {}", e);
                    self.handle_failure(&item).await
                }
            };
            info!("finished with {:?}", outcome);
            outcome
        }
        .instrument(span)
        .await;

        Some(outcome)
    }

    /// Run one full attempt for an item through the pipeline stages.
    async fn process(&mut self, item: &WorkItem) -> Result<Outcome, WorkerError> {
        // Placeholders must exist before anything real lands in the
        // directory — a viewer may already be reading the output tree.
        self.layout.ensure(&item.relative_dir).await?;
        let destination = self.layout.destination(item);

        // Already-tiled TIFFs bypass the whole pipeline: re-encoding them
        // wastes work and risks quality loss.
        if item.is_tiff() && convert::is_tiled_tiff(&self.config, &item.path).await {
            tokio::fs::copy(&item.path, &destination)
                .await
                .map_err(|e| WorkerError::io(&destination, e))?;
            self.retries.record_success(&item.path);
            self.layout.archive(item).await?;
            return Ok(Outcome::TiledShortcut);
        }

        // Per-attempt scratch: the merged working copy and any intermediate
        // TIFF live here and are gone when the attempt ends.
        let scratch = tempfile::tempdir().map_err(|e| WorkerError::io("scratch", e))?;

        let working = profile::apply(&self.config, scratch.path(), item).await;
        let result = convert::convert_item(
            &self.config,
            scratch.path(),
            &item.extension,
            &item.mime_type,
            &working.path,
            &destination,
        )
        .await;

        match result {
            Ok(()) => {
                self.retries.record_success(&item.path);
                self.layout.archive(item).await?;
                Ok(Outcome::Success)
            }
            Err(e) => Err(e),
        }
    }

    /// Apply the retry/fallback policy after a failed attempt.
    async fn handle_failure(&mut self, item: &WorkItem) -> Outcome {
        match self.retries.record_failure(&item.path) {
            FailureDisposition::RetryLater { attempts } => {
                info!(
                    "attempt {}/{} failed, leaving {} for retry",
                    attempts,
                    self.config.max_attempts,
                    item.name
                );
                Outcome::RetryLater
            }
            FailureDisposition::Fallback => {
                warn!(
                    "retry budget exhausted for {}, substituting fallback image",
                    item.name
                );
                self.place_fallback(item).await;
                // Archived regardless of whether the fallback copy happened:
                // the item is terminal either way.
                if let Err(e) = self.layout.archive(item).await {
                    error!("failed to archive {}: {}", item.name, e);
                }
                Outcome::Fallback
            }
        }
    }

    /// Copy the configured fallback image to the item's destination, if the
    /// fallback exists. A missing fallback is a configuration warning only.
    async fn place_fallback(&self, item: &WorkItem) {
        let fallback = &self.config.fallback_image;
        if !fallback.exists() {
            warn!(
                "fallback image {} does not exist — destination left unwritten",
                fallback.display()
            );
            return;
        }
        let destination = self.layout.destination(item);
        if let Err(e) = tokio::fs::copy(fallback, &destination).await {
            error!(
                "failed to copy fallback to {}: {}",
                destination.display(),
                e
            );
        }
    }
}
