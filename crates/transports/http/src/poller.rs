//! Periodic camera-list polling feeding the session supervisor

use std::sync::Arc;
use std::time::Duration;

use camwall_core::{CameraRecord, ReconcileReport, SinkId, SupervisorHandle};
use tokio::sync::{broadcast, Notify};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::client::CameraBackend;
use crate::error::Result;

/// Requests an out-of-band camera-list refresh
#[derive(Debug, Clone, Default)]
pub struct RefreshTrigger {
    notify: Arc<Notify>,
}

impl RefreshTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refresh as soon as the poller is idle
    pub fn request(&self) {
        self.notify.notify_one();
    }

    /// Refresh once `delay` has passed
    pub fn request_after(&self, delay: Duration) {
        let notify = self.notify.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            notify.notify_one();
        });
    }

    async fn requested(&self) {
        self.notify.notified().await;
    }
}

/// Polls the backend camera list and reconciles the session registry
///
/// A failed poll keeps the last known list; sessions are left untouched.
pub struct CameraPoller {
    backend: Arc<dyn CameraBackend>,
    supervisor: SupervisorHandle,
    poll_interval: Duration,
    auto_attach_sinks: bool,
    trigger: RefreshTrigger,
    last_known: Vec<CameraRecord>,
}

impl CameraPoller {
    pub fn new(backend: Arc<dyn CameraBackend>, supervisor: SupervisorHandle, poll_interval: Duration) -> Self {
        Self {
            backend,
            supervisor,
            poll_interval,
            auto_attach_sinks: false,
            trigger: RefreshTrigger::new(),
            last_known: Vec::new(),
        }
    }

    /// Attach a dedicated sink to every camera seen in the list
    ///
    /// Used by headless consumers that have no view creating sinks.
    pub fn with_auto_sinks(mut self) -> Self {
        self.auto_attach_sinks = true;
        self
    }

    pub fn with_trigger(mut self, trigger: RefreshTrigger) -> Self {
        self.trigger = trigger;
        self
    }

    pub fn trigger(&self) -> RefreshTrigger {
        self.trigger.clone()
    }

    /// Last successfully fetched camera list
    pub fn last_known(&self) -> &[CameraRecord] {
        &self.last_known
    }

    /// Fetch once and reconcile
    ///
    /// Returns `Ok(None)` when the fetch failed and the last known list was kept.
    pub async fn poll_once(&mut self) -> Result<Option<ReconcileReport>> {
        let cameras = match self.backend.list_cameras().await {
            Ok(cameras) => cameras,
            Err(e) => {
                warn!(error = %e, known = self.last_known.len(), "Camera poll failed; keeping last known list");
                return Ok(None);
            }
        };

        if self.auto_attach_sinks {
            for camera in &cameras {
                self.supervisor
                    .attach_sink(camera.id, SinkId(camera.id.0 as u64))
                    .await?;
            }
        }

        let report = self.supervisor.reconcile(cameras.clone()).await?;
        self.last_known = cameras;

        if report.is_noop() {
            debug!(cameras = self.last_known.len(), "Camera list unchanged");
        } else {
            info!(
                created = report.created.len(),
                destroyed = report.destroyed.len(),
                pending = report.pending.len(),
                "Reconciled camera list"
            );
        }
        Ok(Some(report))
    }

    /// Poll until shutdown is signalled
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let trigger = self.trigger.clone();

        info!(interval_ms = self.poll_interval.as_millis() as u64, "Camera poller started");

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Camera poller stopping");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    self.poll_once().await?;
                }
                _ = trigger.requested() => {
                    debug!("Refresh requested");
                    self.poll_once().await?;
                }
            }
        }
    }
}
