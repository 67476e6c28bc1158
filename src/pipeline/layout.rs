//! Output/archive tree layout and the archiver.
//!
//! The output tree mirrors the input tree's relative directory structure.
//! A viewer may read the output tree concurrently, so a directory must be
//! fully seeded with its two placeholder images before the first real tile
//! file appears in it. Seeding happens lazily, once per relative path, the
//! first time the scanner yields an item from it.
//!
//! The archive tree may live on a different mount than the input tree, so
//! the archiver moves files with an EXDEV-aware rename: fast rename first,
//! copy-then-delete fallback when crossing filesystems.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::config::{WorkerConfig, PLACEHOLDER_IN_PROGRESS, PLACEHOLDER_NO_CONTENT};
use crate::error::WorkerError;
use crate::scan::WorkItem;

/// Lazily-initialised mirror of the input tree in the output and archive
/// roots, with per-directory placeholder seeding.
#[derive(Debug)]
pub struct OutputLayout {
    output_root: PathBuf,
    archive_root: PathBuf,
    placeholder_dir: PathBuf,
    seeded: HashSet<PathBuf>,
}

impl OutputLayout {
    pub fn new(config: &WorkerConfig) -> Self {
        Self {
            output_root: config.output_dir.clone(),
            archive_root: config.processed_dir.clone(),
            placeholder_dir: config.placeholder_dir.clone(),
            seeded: HashSet::new(),
        }
    }

    /// Destination for an item's converted output: `<output>/<rel>/<stem>.tif`.
    pub fn destination(&self, item: &WorkItem) -> PathBuf {
        self.output_root
            .join(&item.relative_dir)
            .join(format!("{}.tif", item.stem()))
    }

    /// Archive location for an item's source: `<archive>/<rel>/<name>`.
    pub fn archive_path(&self, item: &WorkItem) -> PathBuf {
        self.archive_root.join(&item.relative_dir).join(&item.name)
    }

    /// Create the output and archive directories for a relative path and
    /// seed the output side with placeholders. Runs once per relative path
    /// per worker lifetime; must complete before any real output is written.
    pub async fn ensure(&mut self, relative_dir: &Path) -> Result<(), WorkerError> {
        if self.seeded.contains(relative_dir) {
            return Ok(());
        }

        let out_dir = self.output_root.join(relative_dir);
        let archive_dir = self.archive_root.join(relative_dir);
        fs::create_dir_all(&out_dir)
            .await
            .map_err(|e| WorkerError::io(&out_dir, e))?;
        fs::create_dir_all(&archive_dir)
            .await
            .map_err(|e| WorkerError::io(&archive_dir, e))?;

        for name in [PLACEHOLDER_NO_CONTENT, PLACEHOLDER_IN_PROGRESS] {
            let source = self.placeholder_dir.join(name);
            let target = out_dir.join(name);
            if target.exists() {
                continue;
            }
            if source.exists() {
                fs::copy(&source, &target)
                    .await
                    .map_err(|e| WorkerError::io(&target, e))?;
                debug!("seeded placeholder {}", target.display());
            } else {
                warn!(
                    "placeholder source {} missing, {} not seeded",
                    source.display(),
                    target.display()
                );
            }
        }

        self.seeded.insert(relative_dir.to_path_buf());
        Ok(())
    }

    /// Move the item's source into the archive tree.
    pub async fn archive(&self, item: &WorkItem) -> Result<(), WorkerError> {
        let target = self.archive_path(item);
        move_file(&item.path, &target).await?;
        info!("archived {} -> {}", item.path.display(), target.display());
        Ok(())
    }
}

/// Move a file, falling back to copy-and-delete for cross-device moves.
///
/// The copy goes to a temp name next to the destination first, then renames,
/// so readers of the destination tree never observe a half-written file.
pub async fn move_file(src: &Path, dst: &Path) -> Result<(), WorkerError> {
    if let Some(parent) = dst.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| WorkerError::io(parent, e))?;
        }
    }

    match fs::rename(src, dst).await {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device_error(&e) => {
            debug!(
                "cross-device rename, copying instead: {} -> {}",
                src.display(),
                dst.display()
            );
            copy_and_delete(src, dst).await
        }
        Err(e) => Err(WorkerError::io(src, e)),
    }
}

/// EXDEV is error code 18 on Linux and macOS.
fn is_cross_device_error(e: &std::io::Error) -> bool {
    e.raw_os_error() == Some(18)
}

async fn copy_and_delete(src: &Path, dst: &Path) -> Result<(), WorkerError> {
    let tmp_dst = dst.with_extension("tmp");

    fs::copy(src, &tmp_dst)
        .await
        .map_err(|e| WorkerError::io(&tmp_dst, e))?;

    if let Err(e) = fs::rename(&tmp_dst, dst).await {
        let _ = std::fs::remove_file(&tmp_dst);
        return Err(WorkerError::io(dst, e));
    }

    // Source removal is best effort; the move already succeeded.
    if let Err(e) = fs::remove_file(src).await {
        warn!(
            "failed to remove source after cross-device move {}: {}",
            src.display(),
            e
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config_in(dir: &TempDir) -> WorkerConfig {
        WorkerConfig::builder()
            .input_dir(dir.path().join("in"))
            .output_dir(dir.path().join("out"))
            .processed_dir(dir.path().join("done"))
            .placeholder_dir(dir.path().join("placeholders"))
            .build()
            .unwrap()
    }

    fn item_in(dir: &TempDir, rel: &str, name: &str) -> WorkItem {
        WorkItem {
            path: dir.path().join("in").join(rel).join(name),
            relative_dir: PathBuf::from(rel),
            name: name.to_string(),
            extension: crate::scan::extension_of(name),
            mime_type: "image/jpeg".to_string(),
        }
    }

    #[tokio::test]
    async fn ensure_seeds_placeholders_once() {
        let dir = TempDir::new().unwrap();
        let cfg = config_in(&dir);
        std::fs::create_dir_all(&cfg.placeholder_dir).unwrap();
        std::fs::write(cfg.placeholder_dir.join(PLACEHOLDER_NO_CONTENT), b"nc").unwrap();
        std::fs::write(cfg.placeholder_dir.join(PLACEHOLDER_IN_PROGRESS), b"ip").unwrap();

        let mut layout = OutputLayout::new(&cfg);
        layout.ensure(Path::new("batch1")).await.unwrap();

        let out_dir = cfg.output_dir.join("batch1");
        assert!(out_dir.join(PLACEHOLDER_NO_CONTENT).exists());
        assert!(out_dir.join(PLACEHOLDER_IN_PROGRESS).exists());
        assert!(cfg.processed_dir.join("batch1").is_dir());

        // Second call is a no-op even if a placeholder was deleted meanwhile.
        std::fs::remove_file(out_dir.join(PLACEHOLDER_NO_CONTENT)).unwrap();
        layout.ensure(Path::new("batch1")).await.unwrap();
        assert!(!out_dir.join(PLACEHOLDER_NO_CONTENT).exists());
    }

    #[tokio::test]
    async fn ensure_tolerates_missing_placeholder_sources() {
        let dir = TempDir::new().unwrap();
        let cfg = config_in(&dir);
        // placeholder_dir does not exist at all

        let mut layout = OutputLayout::new(&cfg);
        layout.ensure(Path::new("")).await.unwrap();
        assert!(cfg.output_dir.is_dir());
    }

    #[tokio::test]
    async fn destination_and_archive_mirror_relative_path() {
        let dir = TempDir::new().unwrap();
        let cfg = config_in(&dir);
        let layout = OutputLayout::new(&cfg);
        let item = item_in(&dir, "coll/sub", "photo.jpg");

        assert_eq!(
            layout.destination(&item),
            cfg.output_dir.join("coll/sub/photo.tif")
        );
        assert_eq!(
            layout.archive_path(&item),
            cfg.processed_dir.join("coll/sub/photo.jpg")
        );
    }

    #[tokio::test]
    async fn archive_moves_source() {
        let dir = TempDir::new().unwrap();
        let cfg = config_in(&dir);
        let item = item_in(&dir, "c", "photo.jpg");
        std::fs::create_dir_all(item.path.parent().unwrap()).unwrap();
        std::fs::write(&item.path, b"jpeg bytes").unwrap();

        let layout = OutputLayout::new(&cfg);
        layout.archive(&item).await.unwrap();

        assert!(!item.path.exists(), "source should be gone");
        let archived = cfg.processed_dir.join("c/photo.jpg");
        assert_eq!(std::fs::read(&archived).unwrap(), b"jpeg bytes");
    }

    #[tokio::test]
    async fn move_file_creates_parents_and_overwrites() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("a.bin");
        let dst = dir.path().join("deep/nested/b.bin");
        std::fs::write(&src, b"data").unwrap();

        move_file(&src, &dst).await.unwrap();
        assert!(!src.exists());
        assert_eq!(std::fs::read(&dst).unwrap(), b"data");
    }

    #[test]
    fn cross_device_error_detection() {
        assert!(is_cross_device_error(&std::io::Error::from_raw_os_error(18)));
        assert!(!is_cross_device_error(&std::io::Error::from_raw_os_error(2)));
    }
}
