//! Colour-profile stage: merge an extra ICC profile into the source.
//!
//! Active only when the configured extra profile file exists on disk;
//! otherwise the stage is a no-op and the original file flows downstream
//! unmodified.
//!
//! Nothing in this stage can fail the attempt. Profile extraction and the
//! merge itself both degrade: a failure is logged and the pipeline continues
//! with whatever it had before that step. The extracted ICC temp file is
//! deleted before the stage returns, success or failure.

use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

use crate::command::ToolCommand;
use crate::config::WorkerConfig;
use crate::scan::WorkItem;

/// The file the conversion stage should operate on.
#[derive(Debug)]
pub struct WorkingCopy {
    /// Either the original source or a merged-profile temp copy in the
    /// attempt's scratch directory.
    pub path: PathBuf,
    /// True when the merge produced a new working file.
    pub merged: bool,
}

/// Run the colour-profile stage for one item.
///
/// `scratch` is the attempt's temp directory; everything written here is
/// removed when the attempt ends.
pub async fn apply(config: &WorkerConfig, scratch: &Path, item: &WorkItem) -> WorkingCopy {
    let original = WorkingCopy {
        path: item.path.clone(),
        merged: false,
    };

    if !config.extra_profile.exists() {
        return original;
    }

    let icc_temp = scratch.join("embedded.icc");
    let embedded = extract_embedded_profile(config, &item.path, &icc_temp).await;

    let result = merge_profiles(
        config,
        item,
        embedded.then_some(icc_temp.as_path()),
        scratch,
    )
    .await;

    // The extracted profile must not outlive the stage.
    let _ = fs::remove_file(&icc_temp).await;

    match result {
        Some(path) => WorkingCopy { path, merged: true },
        None => original,
    }
}

/// Extract the embedded ICC profile of the first image layer to `icc_temp`.
///
/// The extraction tool may exit before the file is fully flushed, so after a
/// successful exit we poll for the file up to the configured wait. Returns
/// whether a profile is available at `icc_temp`.
async fn extract_embedded_profile(config: &WorkerConfig, source: &Path, icc_temp: &Path) -> bool {
    let first_layer = format!("{}[0]", source.display());
    let result = ToolCommand::new(&config.tools.converter)
        .arg(first_layer)
        .arg_path(icc_temp)
        .run(config.command_timeout)
        .await;

    if let Err(e) = result {
        debug!(
            "no embedded profile extracted from {}: {}",
            source.display(),
            e
        );
        return false;
    }

    let deadline = tokio::time::Instant::now() + config.icc_wait;
    while tokio::time::Instant::now() < deadline {
        if icc_temp.exists() {
            return true;
        }
        tokio::time::sleep(config.icc_poll).await;
    }

    debug!(
        "extracted profile never appeared at {}",
        icc_temp.display()
    );
    false
}

/// Produce a working copy with existing profiles replaced by the embedded
/// profile (when extracted) plus the configured extra profile.
///
/// Returns the working copy path, or `None` when the merge failed and the
/// original file should be used instead.
async fn merge_profiles(
    config: &WorkerConfig,
    item: &WorkItem,
    embedded: Option<&Path>,
    scratch: &Path,
) -> Option<PathBuf> {
    let ext = if item.extension.is_empty() {
        "tif"
    } else {
        &item.extension
    };
    let working = scratch.join(format!("merged.{ext}"));

    let mut cmd = ToolCommand::new(&config.tools.converter)
        .arg_path(&item.path)
        // strip whatever profiles the source carries before re-applying
        .arg("+profile")
        .arg("*");
    if let Some(icc) = embedded {
        cmd = cmd.arg("-profile").arg_path(icc);
    }
    let cmd = cmd
        .arg("-profile")
        .arg_path(&config.extra_profile)
        .arg_path(&working);

    match cmd.run(config.command_timeout).await {
        Ok(_) if working.exists() => Some(working),
        Ok(_) => {
            warn!(
                "profile merge for {} produced no output, using original",
                item.path.display()
            );
            None
        }
        Err(e) => {
            warn!(
                "profile merge failed for {}, using original: {}",
                item.path.display(),
                e
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn test_item(dir: &TempDir) -> WorkItem {
        let path = dir.path().join("photo.jpg");
        std::fs::write(&path, b"jpeg").unwrap();
        WorkItem {
            path,
            relative_dir: PathBuf::new(),
            name: "photo.jpg".into(),
            extension: "jpg".into(),
            mime_type: "image/jpeg".into(),
        }
    }

    #[tokio::test]
    async fn noop_without_extra_profile() {
        let dir = TempDir::new().unwrap();
        let item = test_item(&dir);
        let cfg = WorkerConfig::builder()
            .extra_profile(dir.path().join("missing.icc"))
            .build()
            .unwrap();

        let working = apply(&cfg, dir.path(), &item).await;
        assert!(!working.merged);
        assert_eq!(working.path, item.path);
    }

    #[tokio::test]
    async fn merge_produces_working_copy_and_removes_icc_temp() {
        let dir = TempDir::new().unwrap();
        let scratch = TempDir::new().unwrap();
        let item = test_item(&dir);
        let extra = dir.path().join("extra.icc");
        std::fs::write(&extra, b"profile").unwrap();

        // Stub converter: touch the last argument (works for both the
        // extract call and the merge call).
        let converter = write_script(dir.path(), "convert", r#"eval "out=\${$#}"; : > "$out""#);

        let mut tools = crate::config::Toolchain::default();
        tools.converter = converter.to_string_lossy().into_owned();
        let cfg = WorkerConfig::builder()
            .extra_profile(&extra)
            .tools(tools)
            .build()
            .unwrap();

        let working = apply(&cfg, scratch.path(), &item).await;
        assert!(working.merged);
        assert_eq!(working.path, scratch.path().join("merged.jpg"));
        assert!(working.path.exists());
        assert!(
            !scratch.path().join("embedded.icc").exists(),
            "extracted ICC temp must be deleted"
        );
    }

    #[tokio::test]
    async fn merge_failure_degrades_to_original() {
        let dir = TempDir::new().unwrap();
        let scratch = TempDir::new().unwrap();
        let item = test_item(&dir);
        let extra = dir.path().join("extra.icc");
        std::fs::write(&extra, b"profile").unwrap();

        let converter = write_script(dir.path(), "convert", "exit 1");

        let mut tools = crate::config::Toolchain::default();
        tools.converter = converter.to_string_lossy().into_owned();
        let cfg = WorkerConfig::builder()
            .extra_profile(&extra)
            .tools(tools)
            .build()
            .unwrap();

        let working = apply(&cfg, scratch.path(), &item).await;
        assert!(!working.merged);
        assert_eq!(working.path, item.path);
    }
}
