//! User-facing controls combining backend actions with session control

use std::sync::Arc;
use std::time::Duration;

use camwall_core::{BackendConfig, CameraId, Quality, SupervisorHandle};
use tracing::{info, warn};

use crate::client::{ActionResponse, CameraBackend};
use crate::error::Result;
use crate::poller::RefreshTrigger;

/// Facade over the backend and the session supervisor
///
/// Stream actions go to the backend first; the camera list is refreshed once
/// the backend has had time to settle.
#[derive(Clone)]
pub struct WallController {
    backend: Arc<dyn CameraBackend>,
    supervisor: SupervisorHandle,
    refresh: RefreshTrigger,
    start_settle: Duration,
    restart_settle: Duration,
}

impl WallController {
    pub fn new(
        backend: Arc<dyn CameraBackend>,
        supervisor: SupervisorHandle,
        refresh: RefreshTrigger,
        config: &BackendConfig,
    ) -> Self {
        Self {
            backend,
            supervisor,
            refresh,
            start_settle: config.start_settle(),
            restart_settle: config.restart_settle(),
        }
    }

    /// Ask the backend to start a stream, then re-initialize the session
    pub async fn start_stream(&self, camera_id: CameraId) -> Result<ActionResponse> {
        let response = self.backend.start_stream(camera_id).await?;
        let restarted = self.supervisor.start_stream(camera_id).await?;
        info!(camera_id = %camera_id, restarted, "Stream start requested");
        self.refresh.request_after(self.start_settle);
        Ok(response)
    }

    pub async fn restart_stream(&self, camera_id: CameraId) -> Result<ActionResponse> {
        let response = self.backend.restart_stream(camera_id).await?;
        info!(camera_id = %camera_id, "Stream restart requested");
        self.refresh.request_after(self.restart_settle);
        Ok(response)
    }

    pub async fn stop_stream(&self, camera_id: CameraId) -> Result<ActionResponse> {
        let response = self.backend.stop_stream(camera_id).await?;
        info!(camera_id = %camera_id, "Stream stop requested");
        self.refresh.request();
        Ok(response)
    }

    /// Manual retry of an offline session
    pub async fn retry(&self, camera_id: CameraId) -> Result<bool> {
        let accepted = self.supervisor.retry(camera_id).await?;
        if !accepted {
            warn!(camera_id = %camera_id, "Retry ignored; session is not offline");
        }
        Ok(accepted)
    }

    pub async fn change_quality(&self, camera_id: CameraId, quality: Quality) -> Result<bool> {
        Ok(self.supervisor.change_quality(camera_id, quality).await?)
    }

    pub async fn toggle_audio(&self, camera_id: CameraId) -> Result<bool> {
        Ok(self.supervisor.toggle_audio(camera_id).await?)
    }

    pub async fn toggle_recognition(&self, camera_id: CameraId) -> Result<ActionResponse> {
        let response = self.backend.toggle_recognition(camera_id).await?;
        self.refresh.request();
        Ok(response)
    }

    pub async fn toggle_anpr(&self, camera_id: CameraId) -> Result<ActionResponse> {
        let response = self.backend.toggle_anpr(camera_id).await?;
        self.refresh.request();
        Ok(response)
    }

    pub async fn set_recognition(&self, camera_id: CameraId, enable: bool) -> Result<ActionResponse> {
        let response = self.backend.set_recognition(camera_id, enable).await?;
        self.refresh.request();
        Ok(response)
    }

    pub async fn set_anpr(&self, camera_id: CameraId, enable: bool) -> Result<ActionResponse> {
        let response = self.backend.set_anpr(camera_id, enable).await?;
        self.refresh.request();
        Ok(response)
    }
}
