//! Work-item discovery and type classification.
//!
//! The scanner walks the input tree on every tick — there is no cached
//! cursor, so a restart or a failed attempt simply rediscovers whatever is
//! still there. Traversal is post-order depth-first (deepest directories
//! first, files in listing order within a directory); only the
//! "one eligible file per tick" property is relied on for correctness.
//!
//! Classification combines the lower-cased extension with a MIME type from
//! the external content sniffer. A sniff failure never aborts the scan: the
//! item just gets an empty MIME type and may still qualify through the
//! raw-extension allow-list.

use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::command::ToolCommand;
use crate::config::WorkerConfig;

/// MIME types the worker accepts.
///
/// `application/octet-stream` is included deliberately: camera raw files
/// frequently sniff as generic binary, and the raw-develop strategy handles
/// them.
pub const ALLOWED_MIME: &[&str] = &[
    "image/bmp",
    "image/x-ms-bmp",
    "image/png",
    "image/jpeg",
    "image/gif",
    "image/tiff",
    "image/x-portable-pixmap",
    "application/pdf",
    "image/jp2",
    "image/jpx",
    "image/jpeg2000",
    "application/octet-stream",
];

/// Camera-raw extensions accepted regardless of sniffed MIME type.
pub const RAW_EXTENSIONS: &[&str] = &[
    "nef", "cr2", "crw", "arw", "dng", "orf", "raf", "rw2", "pef", "srw", "mrw", "3fr", "erf",
    "kdc", "nrw", "sr2", "x3f",
];

/// One discovered upload, consumed within a single loop iteration.
///
/// Identity is the absolute source path; everything else is derived once at
/// discovery and immutable afterwards.
#[derive(Debug, Clone)]
pub struct WorkItem {
    /// Absolute path of the source file.
    pub path: PathBuf,
    /// Directory of the source relative to the input root (`""` for files
    /// directly under the root). Mirrored in the output and archive trees.
    pub relative_dir: PathBuf,
    /// File name including extension.
    pub name: String,
    /// Lower-cased extension, empty if the name has none.
    pub extension: String,
    /// Sniffed MIME type, empty if sniffing failed.
    pub mime_type: String,
}

impl WorkItem {
    /// Whether the sniffed type is a TIFF variant (tiled-shortcut candidate).
    pub fn is_tiff(&self) -> bool {
        self.mime_type.contains("tiff")
    }

    /// File name without its extension.
    pub fn stem(&self) -> &str {
        Path::new(&self.name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(&self.name)
    }
}

/// Lower-cased extension after the last dot, empty if none.
pub fn extension_of(name: &str) -> String {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default()
}

/// Whether a file name carries the mid-transfer marker.
pub fn is_uploading(name: &str) -> bool {
    name.ends_with(crate::config::UPLOAD_SUFFIX)
}

/// Whether the (mime, extension) pair qualifies for processing.
pub fn is_eligible(mime_type: &str, extension: &str) -> bool {
    ALLOWED_MIME.contains(&mime_type) || RAW_EXTENSIONS.contains(&extension)
}

/// Ask the external sniffer for the file's MIME type.
///
/// Sniffing failure degrades to an empty string — the scan must never die
/// because one file confused the sniffer.
pub async fn sniff_mime(config: &WorkerConfig, path: &Path) -> String {
    let result = ToolCommand::new(&config.tools.sniffer)
        .arg("--brief")
        .arg("--mime-type")
        .arg_path(path)
        .run(config.command_timeout)
        .await;

    match result {
        Ok(out) => out.stdout,
        Err(e) => {
            debug!("MIME sniff failed for {}: {}", path.display(), e);
            String::new()
        }
    }
}

/// Walk `dir` post-order: deeper directories before their parents' files,
/// listing order within a directory. Unreadable directories are logged and
/// skipped — scanning must not terminate the worker.
///
/// The recursion decision uses [`std::fs::DirEntry::file_type`], which does
/// not follow symlinks: a symlink to a directory (including one pointing back
/// up the tree) is treated as a plain file, so a link cycle in the upload
/// area cannot recurse forever. Blocking `read_dir` is fine here; the worker
/// processes one item at a time and nothing else runs on the loop.
fn walk_post_order(dir: &Path, files: &mut Vec<PathBuf>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("cannot read directory {}: {}", dir.display(), e);
            return;
        }
    };

    let mut local_files = Vec::new();
    for entry in entries.flatten() {
        let is_dir = entry
            .file_type()
            .map(|t| t.is_dir())
            .unwrap_or(false);
        if is_dir {
            walk_post_order(&entry.path(), files);
        } else {
            local_files.push(entry.path());
        }
    }
    files.extend(local_files);
}

/// Scan the input tree and return the first eligible file, if any.
///
/// A file is eligible when it is not mid-transfer and its sniffed MIME type
/// or raw-camera extension is allow-listed.
pub async fn next_work_item(config: &WorkerConfig) -> Option<WorkItem> {
    let mut candidates = Vec::new();
    walk_post_order(&config.input_dir, &mut candidates);

    for path in candidates {
        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(n) => n.to_string(),
            None => continue,
        };
        if is_uploading(&name) {
            debug!("skipping mid-transfer file {}", path.display());
            continue;
        }

        let extension = extension_of(&name);
        let mime_type = sniff_mime(config, &path).await;
        if !is_eligible(&mime_type, &extension) {
            debug!(
                "skipping unsupported file {} (mime '{}', ext '{}')",
                path.display(),
                mime_type,
                extension
            );
            continue;
        }

        let relative_dir = path
            .parent()
            .and_then(|p| p.strip_prefix(&config.input_dir).ok())
            .map(Path::to_path_buf)
            .unwrap_or_default();

        return Some(WorkItem {
            path,
            relative_dir,
            name,
            extension,
            mime_type,
        });
    }

    None
}
