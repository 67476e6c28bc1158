//! End-to-end tests for the ingestion worker.
//!
//! These drive full `Worker::tick` iterations against a temp directory tree,
//! with every external collaborator replaced by a small stub shell script.
//! That keeps the tests hermetic (no ImageMagick/vips install needed) while
//! still exercising the real scan → profile → convert → retry → archive
//! control flow, including process spawning and timeouts.

#![cfg(unix)]

use ptifd::config::{PLACEHOLDER_IN_PROGRESS, PLACEHOLDER_NO_CONTENT};
use ptifd::{Outcome, Toolchain, Worker, WorkerConfig};
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use tempfile::TempDir;

// ── Test fixture ─────────────────────────────────────────────────────────────

struct TestEnv {
    _root: TempDir,
    input: PathBuf,
    output: PathBuf,
    processed: PathBuf,
    bin: PathBuf,
}

impl TestEnv {
    fn new() -> Self {
        let root = TempDir::new().unwrap();
        let input = root.path().join("incoming");
        let output = root.path().join("output");
        let processed = root.path().join("processed");
        let bin = root.path().join("bin");
        for d in [&input, &output, &processed, &bin] {
            std::fs::create_dir_all(d).unwrap();
        }
        Self {
            _root: root,
            input,
            output,
            processed,
            bin,
        }
    }

    /// Install an executable stub script and return its absolute path.
    fn script(&self, name: &str, body: &str) -> String {
        let path = self.bin.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    /// Extension-based sniffer stub (the path is argument three, after
    /// `--brief --mime-type`).
    fn default_sniffer(&self) -> String {
        self.script(
            "file",
            r#"case "$3" in
  *.jpg|*.jpeg) echo image/jpeg;;
  *.pdf) echo application/pdf;;
  *.tif|*.tiff) echo image/tiff;;
  *.png) echo image/png;;
  *) echo application/octet-stream;;
esac"#,
        )
    }

    /// Pyramid-encoder stub: copies source to destination and records the
    /// requested quality next to the destination.
    fn copying_encoder(&self) -> String {
        self.script(
            "vips",
            r#"dst="$3"
cp "$2" "$dst"
while [ $# -gt 1 ]; do
  if [ "$1" = "--Q" ]; then echo "$2" > "$(dirname "$dst")/quality"; fi
  shift
done"#,
        )
    }

    fn config(&self, tools: Toolchain) -> WorkerConfig {
        WorkerConfig::builder()
            .input_dir(&self.input)
            .output_dir(&self.output)
            .processed_dir(&self.processed)
            .placeholder_dir(self.bin.join("no-placeholders"))
            .extra_profile(self.bin.join("no-extra.icc"))
            .fallback_image(self.bin.join("no-fallback.tif"))
            .tools(tools)
            .build()
            .unwrap()
    }

    fn baseline_tools(&self) -> Toolchain {
        let mut tools = Toolchain::default();
        tools.sniffer = self.default_sniffer();
        tools.pyramid_encoder = self.copying_encoder();
        // Probe says "not tiled" unless a test overrides it.
        tools.tiled_probe = self.script("vipsheader", "exit 1");
        tools
    }
}

// ── Success path ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn jpeg_upload_is_converted_archived_and_quality_100() {
    let env = TestEnv::new();
    let cfg = env.config(env.baseline_tools());

    let src = env.input.join("photo.jpg");
    std::fs::write(&src, vec![0xAB; 500 * 1024]).unwrap();

    let mut worker = Worker::new(cfg);
    assert_eq!(worker.tick().await, Some(Outcome::Success));

    let dest = env.output.join("photo.tif");
    assert_eq!(std::fs::read(&dest).unwrap(), vec![0xAB; 500 * 1024]);
    assert_eq!(
        std::fs::read_to_string(env.output.join("quality"))
            .unwrap()
            .trim(),
        "100"
    );
    assert!(!src.exists(), "source must be archived away");
    assert!(env.processed.join("photo.jpg").exists());

    // Nothing eligible left.
    assert_eq!(worker.tick().await, None);
}

#[tokio::test]
async fn nested_upload_mirrors_relative_path_and_seeds_placeholders() {
    let env = TestEnv::new();
    let mut cfg = env.config(env.baseline_tools());

    let placeholders = env.bin.join("placeholders");
    std::fs::create_dir_all(&placeholders).unwrap();
    std::fs::write(placeholders.join(PLACEHOLDER_NO_CONTENT), b"nc").unwrap();
    std::fs::write(placeholders.join(PLACEHOLDER_IN_PROGRESS), b"ip").unwrap();
    cfg.placeholder_dir = placeholders;

    let sub = env.input.join("coll/2024");
    std::fs::create_dir_all(&sub).unwrap();
    std::fs::write(sub.join("page.jpg"), b"jpeg").unwrap();

    let mut worker = Worker::new(cfg);
    assert_eq!(worker.tick().await, Some(Outcome::Success));

    let out_dir = env.output.join("coll/2024");
    assert!(out_dir.join("page.tif").exists());
    assert!(out_dir.join(PLACEHOLDER_NO_CONTENT).exists());
    assert!(out_dir.join(PLACEHOLDER_IN_PROGRESS).exists());
    assert!(env.processed.join("coll/2024/page.jpg").exists());
}

#[tokio::test]
async fn large_pdf_goes_through_generic_converter_first_page_only() {
    let env = TestEnv::new();
    let mut tools = env.baseline_tools();
    // Generic converter stub: records its arguments, then copies the input
    // (minus the [0] layer suffix) to the output (minus the ptif: prefix).
    tools.converter = env.script(
        "convert",
        r#"echo "$@" > "$(dirname "$0")/convert-args"
in="${1%??}"; in="${in%?}"
eval "out=\${$#}"
out="${out#ptif:}"
cp "$in" "$out""#,
    );
    let cfg = env.config(tools);

    let src = env.input.join("scan.pdf");
    std::fs::write(&src, vec![0u8; 3 * 1024 * 1024]).unwrap();

    let mut worker = Worker::new(cfg);
    assert_eq!(worker.tick().await, Some(Outcome::Success));

    assert!(env.output.join("scan.tif").exists());
    assert!(env.processed.join("scan.pdf").exists());

    let args = std::fs::read_to_string(env.bin.join("convert-args")).unwrap();
    assert!(args.contains("[0]"), "PDF must be restricted to page one");
    assert!(args.contains("tiff:tile-geometry=512x512"));
    assert!(args.contains("LZW"));
    assert!(args.contains("-quality 90"), "3 MB source exceeds 2 MiB");
    assert!(args.contains("ptif:"));
}

// ── Tiled-TIFF shortcut ──────────────────────────────────────────────────────

#[tokio::test]
async fn tiled_tiff_is_copied_verbatim_without_conversion() {
    let env = TestEnv::new();
    let mut tools = env.baseline_tools();
    tools.tiled_probe = env.script("vipsheader", "exit 0");
    // Encoder would leave a marker if it were (wrongly) invoked.
    tools.pyramid_encoder = env.script("vips", r#"touch "$(dirname "$0")/encoder-ran"; exit 1"#);
    let cfg = env.config(tools);

    let src = env.input.join("map.tif");
    std::fs::write(&src, b"tiled tiff bytes").unwrap();

    let mut worker = Worker::new(cfg);
    assert_eq!(worker.tick().await, Some(Outcome::TiledShortcut));

    assert_eq!(
        std::fs::read(env.output.join("map.tif")).unwrap(),
        b"tiled tiff bytes"
    );
    assert!(env.processed.join("map.tif").exists());
    assert!(
        !env.bin.join("encoder-ran").exists(),
        "conversion stages must be bypassed"
    );
}

// ── Retry and fallback ───────────────────────────────────────────────────────

#[tokio::test]
async fn three_failures_substitute_fallback_and_archive() {
    let env = TestEnv::new();
    let mut tools = env.baseline_tools();
    tools.pyramid_encoder = env.script("vips", "exit 1");
    let mut cfg = env.config(tools);
    let fallback = env.bin.join("fallback.tif");
    std::fs::write(&fallback, b"fallback pixels").unwrap();
    cfg.fallback_image = fallback;

    let src = env.input.join("broken.jpg");
    std::fs::write(&src, b"not really a jpeg").unwrap();

    let mut worker = Worker::new(cfg);

    // Attempts 1 and 2: retry later — nothing archived, counter grows.
    assert_eq!(worker.tick().await, Some(Outcome::RetryLater));
    assert!(src.exists());
    assert_eq!(worker.attempts(&src), 1);
    assert!(!env.output.join("broken.tif").exists());

    assert_eq!(worker.tick().await, Some(Outcome::RetryLater));
    assert!(src.exists());
    assert_eq!(worker.attempts(&src), 2);

    // Attempt 3: fallback replaces the output, source is archived,
    // counter entry removed.
    assert_eq!(worker.tick().await, Some(Outcome::Fallback));
    assert_eq!(
        std::fs::read(env.output.join("broken.tif")).unwrap(),
        b"fallback pixels"
    );
    assert!(!src.exists());
    assert!(env.processed.join("broken.jpg").exists());
    assert_eq!(worker.attempts(&src), 0);

    assert_eq!(worker.tick().await, None, "input tree should now be empty");
}

#[tokio::test]
async fn missing_fallback_image_still_archives_the_source() {
    let env = TestEnv::new();
    let mut tools = env.baseline_tools();
    tools.pyramid_encoder = env.script("vips", "exit 1");
    // config() points fallback_image at a non-existent file
    let cfg = env.config(tools);

    let src = env.input.join("broken.jpg");
    std::fs::write(&src, b"bytes").unwrap();

    let mut worker = Worker::new(cfg);
    assert_eq!(worker.tick().await, Some(Outcome::RetryLater));
    assert_eq!(worker.tick().await, Some(Outcome::RetryLater));
    assert_eq!(worker.tick().await, Some(Outcome::Fallback));

    assert!(!env.output.join("broken.tif").exists());
    assert!(!src.exists(), "archived despite missing fallback");
    assert!(env.processed.join("broken.jpg").exists());
}

#[tokio::test]
async fn failed_attempts_leave_no_temp_artifacts_behind() {
    let env = TestEnv::new();
    let mut tools = env.baseline_tools();
    tools.pyramid_encoder = env.script("vips", "exit 1");
    let cfg = env.config(tools);

    let src = env.input.join("photo.jpg");
    std::fs::write(&src, b"bytes").unwrap();

    let mut worker = Worker::new(cfg);
    assert_eq!(worker.tick().await, Some(Outcome::RetryLater));

    let input_entries: Vec<_> = std::fs::read_dir(&env.input)
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(input_entries, vec!["photo.jpg"]);

    let output_entries: Vec<_> = std::fs::read_dir(&env.output)
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert!(
        output_entries.is_empty(),
        "no partial output expected, got {output_entries:?}"
    );
}

// ── Scanner behaviour ────────────────────────────────────────────────────────

#[tokio::test]
async fn mid_transfer_and_unsupported_files_are_ignored() {
    let env = TestEnv::new();
    let cfg = env.config(env.baseline_tools());

    std::fs::write(env.input.join("photo.jpg.uploading"), b"partial").unwrap();
    // .txt sniffs as octet-stream in the stub, which IS eligible — use a
    // sniffer that reports text for this one.
    let mut tools = env.baseline_tools();
    // Distinct stub name so this does not overwrite the default sniffer
    // script that `cfg` above still points at.
    tools.sniffer = env.script("file-text", "echo text/plain");
    let cfg2 = env.config(tools);
    std::fs::write(env.input.join("notes.txt"), b"hello").unwrap();

    let mut worker = Worker::new(cfg2);
    assert_eq!(worker.tick().await, None, "nothing eligible yet");

    // Finishing the upload makes the file visible on the next scan.
    drop(worker);
    std::fs::remove_file(env.input.join("notes.txt")).unwrap();
    std::fs::rename(
        env.input.join("photo.jpg.uploading"),
        env.input.join("photo.jpg"),
    )
    .unwrap();

    let mut worker = Worker::new(cfg);
    assert_eq!(worker.tick().await, Some(Outcome::Success));
    assert!(env.output.join("photo.tif").exists());
}

#[tokio::test]
async fn raw_extension_is_eligible_even_as_octet_stream() {
    let env = TestEnv::new();
    let mut tools = env.baseline_tools();
    // RAW developer stub produces the intermediate TIFF.
    tools.raw_developer = env.script(
        "ufraw-batch",
        r#"for a in "$@"; do
  case "$a" in --output=*) : > "${a#--output=}";; esac
done"#,
    );
    let cfg = env.config(tools);

    let src = env.input.join("IMG_0042.NEF");
    std::fs::write(&src, vec![0u8; 1024]).unwrap();

    let mut worker = Worker::new(cfg);
    assert_eq!(worker.tick().await, Some(Outcome::Success));

    assert!(env.output.join("IMG_0042.tif").exists());
    assert!(env.processed.join("IMG_0042.NEF").exists());
}
