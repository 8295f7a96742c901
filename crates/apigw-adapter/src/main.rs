//! apigw-adapter: the adapter control plane daemon.
//!
//! Loads the configuration, submits every definition found in the
//! definitions directory, keeps discovery-bound clusters in line with the
//! service registry, and runs until SIGINT/SIGTERM. SIGHUP re-reads the
//! registry TLS files and rotates the client onto them.
//!
//! # Usage
//!
//! ```text
//! apigw-adapter --config /etc/apigw/adapter.toml --definitions /etc/apigw/apis
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use apigw_adapter::definitions::load_directory;
use apigw_adapter::version::version_string;
use apigw_sync::shutdown::wait_for_signal;
use apigw_sync::{AdapterConfig, Orchestrator};
use clap::Parser;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "apigw-adapter", about = "API gateway adapter control plane", version)]
struct Cli {
    /// TOML configuration file; defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory of JSON API definitions submitted at startup.
    #[arg(long)]
    definitions: Option<PathBuf>,

    /// Seconds to wait for in-flight submissions on shutdown.
    #[arg(long, default_value = "30")]
    grace_period: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    info!("{} starting", version_string());

    let config = match &cli.config {
        Some(path) => AdapterConfig::from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => AdapterConfig::default(),
    };

    let orchestrator = Orchestrator::from_config(&config).context("building orchestrator")?;
    info!(
        discovery = orchestrator.is_discovery_enabled(),
        mesh_service = config.discovery.mesh_service().unwrap_or("-"),
        listener = %format!("{}:{}", config.listener.address, config.listener.port),
        "orchestrator ready"
    );

    if let Some(dir) = &cli.definitions {
        let summary = load_directory(&orchestrator, dir)
            .with_context(|| format!("loading definitions from {}", dir.display()))?;
        if !summary.failed.is_empty() {
            warn!(failed = summary.failed.len(), "some definitions were skipped");
        }
    }

    info!(
        apis = orchestrator.api_count(),
        labels = orchestrator.labels().len(),
        watches = orchestrator.watched_clusters().len(),
        "serving snapshots"
    );

    tokio::select! {
        result = wait_for_signal() => result.context("installing signal handlers")?,
        result = reload_on_hangup(&orchestrator, &config) => result?,
    }

    let drained = orchestrator
        .shutdown(Duration::from_secs(cli.grace_period))
        .await;
    if !drained {
        warn!("shutdown grace period elapsed");
    }
    info!("apigw-adapter stopped");
    Ok(())
}

/// Rotate the registry credentials from the configured files on every SIGHUP.
/// Only returns on error.
#[cfg(unix)]
async fn reload_on_hangup(orchestrator: &Orchestrator, config: &AdapterConfig) -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup()).context("installing SIGHUP handler")?;
    while hangup.recv().await.is_some() {
        let material = match config.discovery.tls_material() {
            Ok(Some(material)) => material,
            Ok(None) => {
                info!("SIGHUP: no registry TLS files configured");
                continue;
            }
            Err(err) => {
                warn!(error = %err, "SIGHUP: cannot read registry TLS files");
                continue;
            }
        };
        match orchestrator.rotate_credentials(material) {
            Ok(()) => info!("SIGHUP: registry credentials reloaded"),
            Err(err) => warn!(error = %err, "SIGHUP: keeping current registry credentials"),
        }
    }
    std::future::pending().await
}

#[cfg(not(unix))]
async fn reload_on_hangup(_orchestrator: &Orchestrator, _config: &AdapterConfig) -> anyhow::Result<()> {
    std::future::pending().await
}
