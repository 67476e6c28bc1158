//! CLI binary for ptifd.
//!
//! A thin shim over the library crate that maps the three positional
//! directory arguments to a `WorkerConfig` and runs the worker until killed.

use anyhow::Result;
use clap::Parser;
use ptifd::{Worker, WorkerConfig};
use std::path::PathBuf;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Convert uploaded images into pyramidal tiled TIFFs, forever.
#[derive(Parser, Debug)]
#[command(name = "ptifd", version, about)]
struct Cli {
    /// Directory watched for uploads.
    #[arg(default_value = "/var/lib/ptifd/incoming")]
    input_dir: PathBuf,

    /// Directory receiving the converted tiled TIFFs.
    #[arg(default_value = "/var/lib/ptifd/output")]
    output_dir: PathBuf,

    /// Directory receiving processed source files.
    #[arg(default_value = "/var/lib/ptifd/processed")]
    processed_dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ptifd=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = WorkerConfig::builder()
        .input_dir(cli.input_dir)
        .output_dir(cli.output_dir)
        .processed_dir(cli.processed_dir)
        .build()?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received Ctrl-C, finishing current item");
            let _ = shutdown_tx.send(true);
        }
    });

    Worker::new(config).run(shutdown_rx).await;
    Ok(())
}
