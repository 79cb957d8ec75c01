//! Headless live-wall monitor
//!
//! Polls the backend camera registry, runs one probing session per camera in
//! a grid view and logs every status change.
//!
//! # Usage
//!
//! ```bash
//! # Defaults (camwall.toml if present, backend on localhost:8000)
//! cargo run -p camwall-monitor
//!
//! # Point at another backend
//! CAMWALL_BACKEND_URL="http://nvr.local:8000" cargo run -p camwall-monitor
//!
//! # With logging
//! RUST_LOG=camwall_core=debug,info cargo run -p camwall-monitor
//! ```
//!
//! # Environment Variables
//!
//! - `CAMWALL_CONFIG`: Path of the TOML config (default: `camwall.toml`; a missing file means defaults)
//! - `CAMWALL_BACKEND_URL`: Overrides `backend.base_url`
//! - `RUST_LOG`: Logging level (default: `info`)

mod playlist;
mod probe;

use std::sync::Arc;

use anyhow::Context;
use camwall_core::{
    SessionEvent, SessionRegistry, SessionSupervisor, StreamResolver, TokioClock, ViewContext,
    ViewKind, WallConfig,
};
use camwall_http::{BackendClient, CameraPoller};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::probe::ProbeEngineFactory;

const DEFAULT_CONFIG_PATH: &str = "camwall.toml";

fn load_config() -> anyhow::Result<WallConfig> {
    let path = std::env::var("CAMWALL_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let mut config = WallConfig::load_or_default(&path)
        .with_context(|| format!("Failed to load config from {}", path))?;

    if let Ok(base_url) = std::env::var("CAMWALL_BACKEND_URL") {
        config.backend.base_url = base_url;
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn log_event(event: &SessionEvent) {
    match event {
        SessionEvent::Created {
            camera_id,
            session_id,
            quality,
        } => info!(camera_id = %camera_id, session_id = %session_id, quality = %quality, "Session created"),
        SessionEvent::StatusChanged {
            camera_id,
            session_id,
            status,
        } => info!(camera_id = %camera_id, session_id = %session_id, status = %status, "Status changed"),
        SessionEvent::LiveEdgeSeek {
            camera_id,
            session_id,
            lag,
            to,
        } => debug!(camera_id = %camera_id, session_id = %session_id, lag, to, "Jumped to live edge"),
        SessionEvent::Destroyed {
            camera_id,
            session_id,
        } => info!(camera_id = %camera_id, session_id = %session_id, "Session destroyed"),
    }
}

async fn run(config: WallConfig) -> anyhow::Result<()> {
    let resolver = StreamResolver::from_base(&config.backend.base_url)
        .context("Invalid backend base URL")?
        .with_fallback_template(config.backend.fallback_path_template.clone());

    let http = reqwest::Client::builder()
        .build()
        .context("Failed to build HTTP client")?;
    let factory = ProbeEngineFactory::new(http, tokio::runtime::Handle::current());

    let registry = SessionRegistry::new(
        ViewContext::from_config(ViewKind::Grid, &config),
        resolver,
        Box::new(factory),
        Arc::new(TokioClock),
    );
    let (supervisor, handle) = SessionSupervisor::new(registry);
    let mut events = handle.subscribe();
    let supervisor_task = supervisor.spawn();

    let event_task = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => log_event(&event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Status log fell behind");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let client = Arc::new(BackendClient::new(&config.backend).context("Failed to create backend client")?);
    let poller = CameraPoller::new(client, handle.clone(), config.backend.poll_interval()).with_auto_sinks();
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let mut poller_task = tokio::spawn(poller.run(shutdown_rx));

    info!("Wall monitor ready");

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for shutdown signal")?;
            info!("Shutdown requested");
            let _ = shutdown_tx.send(());
            match (&mut poller_task).await {
                Ok(Err(e)) => warn!(error = %e, "Camera poller stopped with error"),
                Err(e) => warn!(error = %e, "Camera poller task failed"),
                Ok(Ok(())) => {}
            }
        }
        result = &mut poller_task => {
            match result {
                Ok(Ok(())) => info!("Camera poller exited"),
                Ok(Err(e)) => error!(error = %e, "Camera poller stopped with error"),
                Err(e) => error!(error = %e, "Camera poller task failed"),
            }
        }
    }

    if let Err(e) = handle.shutdown().await {
        warn!(error = %e, "Supervisor already stopped");
    }
    supervisor_task.await.context("Supervisor task failed")?;
    drop(handle);
    let _ = event_task.await;

    info!("Wall monitor stopped");
    Ok(())
}

fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = load_config()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        backend = %config.backend.base_url,
        poll_interval_secs = config.backend.poll_interval_secs,
        "Wall monitor starting"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .thread_name("camwall-monitor")
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    runtime.block_on(run(config))
}
