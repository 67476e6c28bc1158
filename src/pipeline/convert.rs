//! Conversion strategies: working file → pyramidal tiled TIFF.
//!
//! Dispatch key is the (extension, MIME type) pair, evaluated in a fixed
//! precedence. Three shapes exist:
//!
//! * direct pyramid encode of the working file;
//! * intermediate-TIFF first (PDF and PPM via the generic converter,
//!   JPEG2000 via its decoder, camera raw via the RAW developer,
//!   deep-bit-depth sources via a bounded-memory normalisation), then
//!   pyramid encode of the intermediate;
//! * and the tiled-TIFF shortcut handled by the worker before this module
//!   is reached at all.
//!
//! Intermediates live in the attempt's scratch directory and are explicitly
//! deleted after the encode, success or failure. Any non-zero exit or
//! timeout of a collaborator fails the whole attempt — the retry tracker
//! takes it from there.

use serde::Serialize;
use std::path::Path;
use tracing::debug;

use crate::command::ToolCommand;
use crate::config::{WorkerConfig, TILE_SIZE};
use crate::error::WorkerError;

/// Common raster types that the pyramid encoder ingests directly.
const DIRECT_RASTER_EXT: &[&str] = &["bmp", "png", "jpg", "jpeg", "gif"];
const DIRECT_RASTER_MIME: &[&str] = &[
    "image/bmp",
    "image/x-ms-bmp",
    "image/png",
    "image/jpeg",
    "image/gif",
];

const JPEG2000_EXT: &[&str] = &["jp2", "jpx", "j2k", "jpf"];
const JPEG2000_MIME: &[&str] = &["image/jp2", "image/jpx", "image/jpeg2000"];

/// How a working file becomes a pyramidal tiled TIFF.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Strategy {
    /// Common raster: hand the file straight to the pyramid encoder.
    DirectRaster,
    /// PPM: generic conversion with fixed tiling, LZW, 8-bit.
    GenericPpm,
    /// PDF: generic conversion restricted to the first page.
    PdfFirstPage,
    /// JPEG2000: decode the first layer to an intermediate TIFF, then encode.
    Jpeg2000,
    /// Camera raw (by extension) or generic binary: RAW-develop to an
    /// intermediate TIFF, then encode.
    RawDevelop,
    /// Everything else: probe bit depth and normalise 8/16-bit sources
    /// through an intermediate before encoding.
    Probe,
}

/// Pick the conversion strategy for an (extension, MIME type) pair.
///
/// Precedence is fixed; the first matching rule wins.
pub fn select_strategy(extension: &str, mime_type: &str) -> Strategy {
    if DIRECT_RASTER_EXT.contains(&extension) || DIRECT_RASTER_MIME.contains(&mime_type) {
        Strategy::DirectRaster
    } else if extension == "ppm" {
        Strategy::GenericPpm
    } else if extension == "pdf" || mime_type == "application/pdf" {
        Strategy::PdfFirstPage
    } else if JPEG2000_EXT.contains(&extension) || JPEG2000_MIME.contains(&mime_type) {
        Strategy::Jpeg2000
    } else if crate::scan::RAW_EXTENSIONS.contains(&extension)
        || mime_type == "application/octet-stream"
    {
        Strategy::RawDevelop
    } else {
        Strategy::Probe
    }
}

/// Convert `working` into a pyramidal tiled TIFF at `destination`.
///
/// `scratch` is the attempt's temp directory for intermediates. Quality is
/// selected from the working file's size before any conversion starts.
pub async fn convert_item(
    config: &WorkerConfig,
    scratch: &Path,
    extension: &str,
    mime_type: &str,
    working: &Path,
    destination: &Path,
) -> Result<(), WorkerError> {
    let len = tokio::fs::metadata(working)
        .await
        .map_err(|e| WorkerError::io(working, e))?
        .len();
    let quality = config.quality_for(len);
    let strategy = select_strategy(extension, mime_type);
    debug!(
        "converting {} via {:?} at quality {} ({} bytes)",
        working.display(),
        strategy,
        quality,
        len
    );

    match strategy {
        Strategy::DirectRaster => pyramid_encode(config, working, destination, quality).await,
        Strategy::GenericPpm => {
            generic_tiled_tiff(config, working, destination, false, quality).await
        }
        Strategy::PdfFirstPage => {
            generic_tiled_tiff(config, working, destination, true, quality).await
        }
        Strategy::Jpeg2000 => {
            let intermediate = scratch.join("decoded.tif");
            let result = decode_jpeg2000(config, working, &intermediate).await;
            let result = match result {
                Ok(()) => pyramid_encode(config, &intermediate, destination, quality).await,
                Err(e) => Err(e),
            };
            let _ = tokio::fs::remove_file(&intermediate).await;
            result
        }
        Strategy::RawDevelop => {
            let intermediate = scratch.join("developed.tif");
            let result = develop_raw(config, working, &intermediate).await;
            let result = match result {
                Ok(()) => pyramid_encode(config, &intermediate, destination, quality).await,
                Err(e) => Err(e),
            };
            let _ = tokio::fs::remove_file(&intermediate).await;
            result
        }
        Strategy::Probe => {
            if probe_needs_depth_normalisation(config, working).await? {
                let intermediate = scratch.join("normalised.tif");
                let result = normalise_depth(config, working, &intermediate).await;
                let result = match result {
                    Ok(()) => pyramid_encode(config, &intermediate, destination, quality).await,
                    Err(e) => Err(e),
                };
                let _ = tokio::fs::remove_file(&intermediate).await;
                result
            } else {
                pyramid_encode(config, working, destination, quality).await
            }
        }
    }
}

/// Ask the tiled-ness probe whether a TIFF is already internally tiled.
///
/// Exit code is the answer: the probe fails when the tile-width field is
/// absent. Probe errors (including timeout) are treated as "not tiled" so
/// the file just goes through the normal pipeline.
pub async fn is_tiled_tiff(config: &WorkerConfig, path: &Path) -> bool {
    ToolCommand::new(&config.tools.tiled_probe)
        .arg("-f")
        .arg("tile-width")
        .arg_path(path)
        .run(config.command_timeout)
        .await
        .is_ok()
}

/// Encode to a tiled, pyramidal, JPEG-compressed TIFF at the given quality.
async fn pyramid_encode(
    config: &WorkerConfig,
    source: &Path,
    destination: &Path,
    quality: u8,
) -> Result<(), WorkerError> {
    ToolCommand::new(&config.tools.pyramid_encoder)
        .arg("tiffsave")
        .arg_path(source)
        .arg_path(destination)
        .arg("--tile")
        .arg("--tile-width")
        .arg(TILE_SIZE.to_string())
        .arg("--tile-height")
        .arg(TILE_SIZE.to_string())
        .arg("--pyramid")
        .arg("--compression")
        .arg("jpeg")
        .arg("--Q")
        .arg(quality.to_string())
        .run(config.command_timeout)
        .await?;
    Ok(())
}

/// Generic conversion to a tiled TIFF: fixed tile geometry, LZW, 8-bit.
/// `first_page_only` restricts multi-page sources (PDF) to page zero.
async fn generic_tiled_tiff(
    config: &WorkerConfig,
    source: &Path,
    destination: &Path,
    first_page_only: bool,
    quality: u8,
) -> Result<(), WorkerError> {
    let input = if first_page_only {
        format!("{}[0]", source.display())
    } else {
        source.display().to_string()
    };
    ToolCommand::new(&config.tools.converter)
        .arg(input)
        .arg("-define")
        .arg(format!("tiff:tile-geometry={TILE_SIZE}x{TILE_SIZE}"))
        .arg("-compress")
        .arg("LZW")
        .arg("-depth")
        .arg("8")
        .arg("-quality")
        .arg(quality.to_string())
        .arg(format!("ptif:{}", destination.display()))
        .run(config.command_timeout)
        .await?;
    Ok(())
}

/// Decode the first JPEG2000 layer to an intermediate TIFF.
async fn decode_jpeg2000(
    config: &WorkerConfig,
    source: &Path,
    intermediate: &Path,
) -> Result<(), WorkerError> {
    ToolCommand::new(&config.tools.jp2_decoder)
        .arg("-i")
        .arg_path(source)
        .arg("-o")
        .arg_path(intermediate)
        .run(config.command_timeout)
        .await?;
    if !intermediate.exists() {
        return Err(WorkerError::MissingOutput {
            program: config.tools.jp2_decoder.clone(),
            path: intermediate.to_path_buf(),
        });
    }
    Ok(())
}

/// Develop a camera-raw file to an 8-bit intermediate TIFF with the fixed
/// processing profile (camera white balance, AHD demosaic).
async fn develop_raw(
    config: &WorkerConfig,
    source: &Path,
    intermediate: &Path,
) -> Result<(), WorkerError> {
    ToolCommand::new(&config.tools.raw_developer)
        .arg("--out-type=tif")
        .arg("--out-depth=8")
        .arg("--wb=camera")
        .arg("--interpolation=ahd")
        .arg("--overwrite")
        .arg("--silent")
        .arg(format!("--output={}", intermediate.display()))
        .arg_path(source)
        .run(config.command_timeout)
        .await?;
    if !intermediate.exists() {
        return Err(WorkerError::MissingOutput {
            program: config.tools.raw_developer.clone(),
            path: intermediate.to_path_buf(),
        });
    }
    Ok(())
}

/// Probe the identifier's description of the file for an 8- or 16-bit depth
/// marker. Such sources go through the normalisation intermediate; anything
/// else is handed to the pyramid encoder as-is.
async fn probe_needs_depth_normalisation(
    config: &WorkerConfig,
    source: &Path,
) -> Result<bool, WorkerError> {
    let out = ToolCommand::new(&config.tools.identifier)
        .arg_path(source)
        .run(config.command_timeout)
        .await?;
    Ok(out.stdout.contains("8-bit") || out.stdout.contains("16-bit"))
}

/// Bounded-memory conversion to an 8-bit intermediate with an explicit
/// quantum format, so oversized sources cannot exhaust the worker host.
async fn normalise_depth(
    config: &WorkerConfig,
    source: &Path,
    intermediate: &Path,
) -> Result<(), WorkerError> {
    ToolCommand::new(&config.tools.converter)
        .arg("-limit")
        .arg("memory")
        .arg("256MiB")
        .arg("-limit")
        .arg("map")
        .arg("512MiB")
        .arg_path(source)
        .arg("-depth")
        .arg("8")
        .arg("-define")
        .arg("quantum:format=unsigned")
        .arg_path(intermediate)
        .run(config.command_timeout)
        .await?;
    Ok(())
}
