//! # ptifd
//!
//! A long-running worker that watches a directory for uploaded images of
//! heterogeneous formats — raster, camera raw, PDF, JPEG2000, TIFF — and
//! converts each into a pyramidal, tiled TIFF suitable for a tile-serving
//! image viewer.
//!
//! ## Why external collaborators?
//!
//! No single in-process codec stack covers camera raw, JPEG2000, PDF and
//! deep-bit-depth TIFF well. The battle-tested command-line tools do, so the
//! worker orchestrates them instead of reimplementing them: every conversion
//! step shells out with a hard timeout, and a non-zero exit or a hang simply
//! fails that attempt.
//!
//! ## Pipeline Overview
//!
//! ```text
//! input tree
//!  │
//!  ├─ 1. Scan      post-order walk, skip mid-transfer files
//!  ├─ 2. Classify  extension + sniffed MIME → eligibility, strategy
//!  ├─ 3. Shortcut  already-tiled TIFF → verbatim copy, archive
//!  ├─ 4. Profile   optional ICC extract + merge (degrades, never fails)
//!  ├─ 5. Convert   strategy dispatch → pyramidal tiled TIFF (quality 90/100)
//!  ├─ 6. Retry     3 strikes → fallback image, else leave for re-scan
//!  └─ 7. Archive   move source to the processed tree (terminal outcomes only)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ptifd::{Worker, WorkerConfig};
//! use tokio::sync::watch;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = WorkerConfig::builder()
//!         .input_dir("/srv/uploads")
//!         .output_dir("/srv/tiles")
//!         .processed_dir("/srv/archive")
//!         .build()?;
//!
//!     let (_shutdown_tx, shutdown_rx) = watch::channel(false);
//!     Worker::new(config).run(shutdown_rx).await;
//!     Ok(())
//! }
//! ```
//!
//! ## Failure model
//!
//! Stage-local problems (MIME sniff, ICC extraction, profile merge) degrade
//! and never abort an item. Conversion failures count against a per-path
//! retry budget of three; the third strike substitutes a configured fallback
//! image so the output tree never keeps a stale placeholder. Nothing is
//! fatal to the process — the loop logs and keeps running until killed.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod command;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod retry;
pub mod scan;
pub mod worker;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use command::{ToolCommand, ToolOutput};
pub use config::{Toolchain, WorkerConfig, WorkerConfigBuilder};
pub use error::WorkerError;
pub use pipeline::convert::{select_strategy, Strategy};
pub use retry::{FailureDisposition, RetryTracker};
pub use scan::WorkItem;
pub use worker::{Outcome, Worker};
