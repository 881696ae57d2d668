//! Stevedore node agent.
//!
//! Runs on each cluster worker: merges pod manifests from the configured
//! sources and converges the local container runtime to match them.

use std::sync::Arc;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use stevedore::agent::NodeAgent;
use stevedore::config::Config;
use stevedore::health::HttpProbeChecker;
use stevedore::hooks::{FakeCommandRunner, HttpClient};
use stevedore::runtime::{FakePuller, FakeRuntime};
use stevedore::sources::{FileSource, SourceMux};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting stevedore node agent");

    let config = Config::from_env()?;
    info!(
        root_dir = %config.root_dir.display(),
        manifest_path = %config.manifest_path.display(),
        "Configuration loaded"
    );

    let (updates_tx, snapshots_rx, mux) = SourceMux::new(config.source_priority.clone(), 64);
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let file_source = FileSource::new(
        "file",
        config.manifest_path.clone(),
        config.sync_interval(),
        updates_tx,
    );
    tokio::spawn(file_source.run(shutdown_rx.clone()));
    tokio::spawn(mux.run());

    // TODO: replace the development fakes with the real container runtime
    // client and image puller once they land.
    let http = Arc::new(HttpClient::new());
    let agent = NodeAgent::new(
        Arc::new(FakeRuntime::new()),
        Arc::new(FakePuller::new()),
        http.clone(),
        Arc::new(FakeCommandRunner::new()),
        Arc::new(HttpProbeChecker::new(http)),
        None,
        &config,
    );

    let agent_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move { agent.run(snapshots_rx, shutdown_rx).await }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    shutdown_tx.send(true)?;
    agent_handle.await?;

    Ok(())
}
