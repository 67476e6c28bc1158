//! Configuration for the ingestion worker.
//!
//! All worker behaviour is controlled through [`WorkerConfig`], built via its
//! [`WorkerConfigBuilder`]. Keeping every knob in one struct makes it trivial
//! to construct alternate configurations in tests (stub collaborator
//! programs, short timeouts) and to log the effective configuration at boot.
//!
//! There is no dynamic reconfiguration: the worker reads its config once at
//! startup and runs with it until killed.

use crate::error::WorkerError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Filename suffix marking a file whose transfer has not finished.
///
/// The uploader renames the file to its final name only once the transfer is
/// complete, so anything still carrying this suffix must not be picked up.
pub const UPLOAD_SUFFIX: &str = ".uploading";

/// Tile edge length for the pyramid encoder and the generic converter.
pub const TILE_SIZE: u32 = 512;

/// Placeholder seeded into every fresh output directory: "nothing here yet".
pub const PLACEHOLDER_NO_CONTENT: &str = "no_content.jpg";

/// Placeholder seeded into every fresh output directory: "conversion underway".
pub const PLACEHOLDER_IN_PROGRESS: &str = "in_progress.jpg";

/// Names of the external command-line collaborators.
///
/// Every conversion step is delegated to an opaque external program. The
/// defaults assume the standard tools are on `PATH`; tests substitute stub
/// scripts by absolute path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Toolchain {
    /// Content-type sniffer: `<sniffer> --brief --mime-type <path>` → MIME string.
    pub sniffer: String,
    /// Tiled-ness probe: `<probe> -f tile-width <path>`; exit 0 means the
    /// TIFF is internally tiled (the field is absent otherwise).
    pub tiled_probe: String,
    /// Generic image converter (profile extraction/merge, PPM/PDF/bit-depth
    /// conversion to tiled TIFF).
    pub converter: String,
    /// Image identifier used to infer bit depth from its descriptive output.
    pub identifier: String,
    /// Pyramid encoder producing the tiled, pyramidal, JPEG-compressed TIFF.
    pub pyramid_encoder: String,
    /// JPEG2000 decoder (first layer → intermediate TIFF).
    pub jp2_decoder: String,
    /// RAW developer (camera raw → intermediate TIFF, fixed profile).
    pub raw_developer: String,
}

impl Default for Toolchain {
    fn default() -> Self {
        Self {
            sniffer: "file".into(),
            tiled_probe: "vipsheader".into(),
            converter: "convert".into(),
            identifier: "identify".into(),
            pyramid_encoder: "vips".into(),
            jp2_decoder: "opj_decompress".into(),
            raw_developer: "ufraw-batch".into(),
        }
    }
}

impl Toolchain {
    /// All collaborator program names, for the startup preflight check.
    pub fn programs(&self) -> [&str; 7] {
        [
            &self.sniffer,
            &self.tiled_probe,
            &self.converter,
            &self.identifier,
            &self.pyramid_encoder,
            &self.jp2_decoder,
            &self.raw_developer,
        ]
    }
}

/// Configuration for the ingestion worker.
///
/// Built via [`WorkerConfig::builder()`] or [`WorkerConfig::default()`].
///
/// # Example
/// ```rust
/// use ptifd::WorkerConfig;
/// use std::time::Duration;
///
/// let config = WorkerConfig::builder()
///     .input_dir("/srv/uploads")
///     .output_dir("/srv/tiles")
///     .processed_dir("/srv/archive")
///     .poll_interval(Duration::from_secs(5))
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Directory watched for uploads. Scanned from scratch on every tick.
    pub input_dir: PathBuf,

    /// Root of the output tree. Mirrors the input tree's relative structure;
    /// every subdirectory is seeded with placeholders before first real write.
    pub output_dir: PathBuf,

    /// Root of the archive tree for processed sources. Mirrors the input tree.
    pub processed_dir: PathBuf,

    /// Idle sleep between scans when no eligible file exists. Default: 10 s.
    pub poll_interval: Duration,

    /// Hard timeout applied to every external command. Default: 300 s.
    ///
    /// Image tooling can hang on pathological inputs (truncated JPEG2000
    /// codestreams are notorious). Exceeding the timeout kills the process
    /// and counts as a conversion failure for the attempt, so one bad file
    /// can never wedge the worker.
    pub command_timeout: Duration,

    /// Maximum wait for the extracted ICC profile file to appear. Default: 5 s.
    ///
    /// The extraction tool may exit before the profile file is fully flushed,
    /// so the profile stage polls for the file rather than trusting the exit.
    pub icc_wait: Duration,

    /// Poll interval used while waiting for the extracted ICC file. Default: 100 ms.
    pub icc_poll: Duration,

    /// Optional additional ICC profile merged into every source before
    /// conversion. The whole colour-profile stage is a no-op when this file
    /// does not exist.
    pub extra_profile: PathBuf,

    /// Image copied to the destination after repeated conversion failures,
    /// so the output tree never keeps a stale "in progress" entry. Missing
    /// file is a configuration warning, not an error.
    pub fallback_image: PathBuf,

    /// Directory holding the two placeholder images seeded into fresh output
    /// directories ([`PLACEHOLDER_NO_CONTENT`], [`PLACEHOLDER_IN_PROGRESS`]).
    pub placeholder_dir: PathBuf,

    /// Working files larger than this use [`Self::quality_large`]. Default: 2 MiB.
    pub large_file_bytes: u64,

    /// JPEG quality for large sources. Default: 90.
    pub quality_large: u8,

    /// JPEG quality for everything else. Default: 100.
    pub quality_small: u8,

    /// Consecutive failures before the fallback image replaces the output.
    /// Default: 3.
    pub max_attempts: u32,

    /// External collaborator program names.
    pub tools: Toolchain,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("/var/lib/ptifd/incoming"),
            output_dir: PathBuf::from("/var/lib/ptifd/output"),
            processed_dir: PathBuf::from("/var/lib/ptifd/processed"),
            poll_interval: Duration::from_secs(10),
            command_timeout: Duration::from_secs(300),
            icc_wait: Duration::from_secs(5),
            icc_poll: Duration::from_millis(100),
            extra_profile: PathBuf::from("/etc/ptifd/extra.icc"),
            fallback_image: PathBuf::from("/etc/ptifd/fallback.tif"),
            placeholder_dir: PathBuf::from("/etc/ptifd/placeholders"),
            large_file_bytes: 2 * 1024 * 1024,
            quality_large: 90,
            quality_small: 100,
            max_attempts: 3,
            tools: Toolchain::default(),
        }
    }
}

impl WorkerConfig {
    /// Create a new builder for `WorkerConfig`.
    pub fn builder() -> WorkerConfigBuilder {
        WorkerConfigBuilder {
            config: Self::default(),
        }
    }

    /// JPEG quality for the pyramid encode, selected by working-file size.
    ///
    /// Strictly-greater comparison: a file of exactly the threshold size
    /// still gets full quality.
    pub fn quality_for(&self, len: u64) -> u8 {
        if len > self.large_file_bytes {
            self.quality_large
        } else {
            self.quality_small
        }
    }

    /// Configured auxiliary files that do not exist right now.
    ///
    /// None of these is required — a missing fallback, placeholder or extra
    /// profile only degrades behaviour later — but the operator should hear
    /// about it once at boot rather than on the first affected item.
    pub fn missing_file_warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if !self.fallback_image.exists() {
            warnings.push(format!(
                "fallback image {} does not exist — exhausted retries will leave no output",
                self.fallback_image.display()
            ));
        }
        for name in [PLACEHOLDER_NO_CONTENT, PLACEHOLDER_IN_PROGRESS] {
            let placeholder = self.placeholder_dir.join(name);
            if !placeholder.exists() {
                warnings.push(format!(
                    "placeholder {} does not exist — fresh output directories will not receive it",
                    placeholder.display()
                ));
            }
        }
        if !self.extra_profile.exists() {
            warnings.push(format!(
                "extra ICC profile {} does not exist — the colour-profile stage is disabled",
                self.extra_profile.display()
            ));
        }
        warnings
    }
}

/// Builder for [`WorkerConfig`].
#[derive(Debug)]
pub struct WorkerConfigBuilder {
    config: WorkerConfig,
}

impl WorkerConfigBuilder {
    pub fn input_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.input_dir = dir.into();
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    pub fn processed_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.processed_dir = dir.into();
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.config.command_timeout = timeout;
        self
    }

    pub fn icc_wait(mut self, wait: Duration) -> Self {
        self.config.icc_wait = wait;
        self
    }

    pub fn icc_poll(mut self, poll: Duration) -> Self {
        self.config.icc_poll = poll;
        self
    }

    pub fn extra_profile(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.extra_profile = path.into();
        self
    }

    pub fn fallback_image(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.fallback_image = path.into();
        self
    }

    pub fn placeholder_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.placeholder_dir = path.into();
        self
    }

    pub fn large_file_bytes(mut self, bytes: u64) -> Self {
        self.config.large_file_bytes = bytes;
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.max_attempts = n.max(1);
        self
    }

    pub fn tools(mut self, tools: Toolchain) -> Self {
        self.config.tools = tools;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<WorkerConfig, WorkerError> {
        let c = &self.config;
        if c.poll_interval.is_zero() {
            return Err(WorkerError::InvalidConfig(
                "poll interval must be non-zero".into(),
            ));
        }
        if c.command_timeout.is_zero() {
            return Err(WorkerError::InvalidConfig(
                "command timeout must be non-zero".into(),
            ));
        }
        if c.quality_large > 100 || c.quality_small > 100 {
            return Err(WorkerError::InvalidConfig(format!(
                "JPEG quality must be ≤ 100, got {}/{}",
                c.quality_large, c.quality_small
            )));
        }
        Ok(self.config)
    }
}
