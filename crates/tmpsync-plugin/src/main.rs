//! tmpsync volume plugin daemon

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tmpsync_core::{RsyncSynchronizer, TmpfsMounter, VolumeController};
use tmpsync_plugin::cli::Cli;
use tmpsync_plugin::{PluginApi, PluginConfig};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = cli.resolve()?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    tracing::info!("tmpsync volume plugin starting...");
    if !cli.config.exists() {
        tracing::warn!(
            "Config file not found, using defaults: {}",
            cli.config.display()
        );
    }
    tracing::info!(
        root = %config.root.display(),
        rsync = %config.rsync_path.display(),
        sync_timeout_secs = ?config.sync_timeout_secs,
        "configuration loaded"
    );

    std::fs::create_dir_all(&config.root)
        .with_context(|| format!("creating volume root {}", config.root.display()))?;
    // resolve symlinks so mountpoints match /proc/self/mountinfo
    config.root = std::fs::canonicalize(&config.root)
        .with_context(|| format!("resolving volume root {}", config.root.display()))?;

    if let Some(spec_file) = &config.spec_file {
        write_spec_file(&config, spec_file)?;
    }

    let synchronizer =
        RsyncSynchronizer::new(config.rsync_path.clone()).with_timeout(config.sync_timeout());
    let controller = Arc::new(VolumeController::new(
        config.root.clone(),
        Arc::new(TmpfsMounter::new()),
        Arc::new(synchronizer),
    ));

    PluginApi::new(controller).serve(config.bind_addr).await
}

fn write_spec_file(config: &PluginConfig, spec_file: &std::path::Path) -> Result<()> {
    if let Some(parent) = spec_file.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(spec_file, format!("tcp://{}\n", config.bind_addr))
        .with_context(|| format!("writing plugin spec {}", spec_file.display()))?;
    tracing::info!("Wrote plugin spec to {}", spec_file.display());
    Ok(())
}
