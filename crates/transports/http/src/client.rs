//! REST client for the backend camera registry
//!
//! ```text
//! GET  {base}/api/cameras
//! POST {base}/api/cameras/{id}/start-stream
//! POST {base}/api/cameras/{id}/stop-stream
//! POST {base}/api/cameras/{id}/restart-stream
//! POST {base}/api/cameras/{id}/toggle-recognition
//! POST {base}/api/cameras/{id}/toggle-anpr
//! POST {base}/api/cameras/{id}/set-recognition?enable=
//! POST {base}/api/cameras/{id}/set-anpr?enable=
//! ```
//!
//! Error bodies carry a `detail` field.

use async_trait::async_trait;
use camwall_core::{BackendConfig, CameraId, CameraRecord};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::error::{Error, Result};

/// Body returned by control actions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionResponse {
    #[serde(default)]
    pub message: Option<String>,

    #[serde(default)]
    pub status: Option<String>,

    /// Any other fields the backend includes
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Per-camera control actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraAction {
    StartStream,
    StopStream,
    RestartStream,
    ToggleRecognition,
    ToggleAnpr,
    SetRecognition(bool),
    SetAnpr(bool),
}

impl CameraAction {
    fn path(&self) -> &'static str {
        match self {
            CameraAction::StartStream => "start-stream",
            CameraAction::StopStream => "stop-stream",
            CameraAction::RestartStream => "restart-stream",
            CameraAction::ToggleRecognition => "toggle-recognition",
            CameraAction::ToggleAnpr => "toggle-anpr",
            CameraAction::SetRecognition(_) => "set-recognition",
            CameraAction::SetAnpr(_) => "set-anpr",
        }
    }

    fn enable(&self) -> Option<bool> {
        match self {
            CameraAction::SetRecognition(enable) | CameraAction::SetAnpr(enable) => Some(*enable),
            _ => None,
        }
    }
}

/// The backend as seen by the poller and controller
#[async_trait]
pub trait CameraBackend: Send + Sync {
    /// Current camera list
    async fn list_cameras(&self) -> Result<Vec<CameraRecord>>;

    /// Run a control action for one camera
    async fn camera_action(&self, camera_id: CameraId, action: CameraAction) -> Result<ActionResponse>;

    async fn start_stream(&self, camera_id: CameraId) -> Result<ActionResponse> {
        self.camera_action(camera_id, CameraAction::StartStream).await
    }

    async fn stop_stream(&self, camera_id: CameraId) -> Result<ActionResponse> {
        self.camera_action(camera_id, CameraAction::StopStream).await
    }

    async fn restart_stream(&self, camera_id: CameraId) -> Result<ActionResponse> {
        self.camera_action(camera_id, CameraAction::RestartStream).await
    }

    async fn toggle_recognition(&self, camera_id: CameraId) -> Result<ActionResponse> {
        self.camera_action(camera_id, CameraAction::ToggleRecognition).await
    }

    async fn toggle_anpr(&self, camera_id: CameraId) -> Result<ActionResponse> {
        self.camera_action(camera_id, CameraAction::ToggleAnpr).await
    }

    async fn set_recognition(&self, camera_id: CameraId, enable: bool) -> Result<ActionResponse> {
        self.camera_action(camera_id, CameraAction::SetRecognition(enable)).await
    }

    async fn set_anpr(&self, camera_id: CameraId, enable: bool) -> Result<ActionResponse> {
        self.camera_action(camera_id, CameraAction::SetAnpr(enable)).await
    }
}

/// reqwest-backed [`CameraBackend`]
#[derive(Debug, Clone)]
pub struct BackendClient {
    http: reqwest::Client,
    base_url: Url,
    api_prefix: String,
    auth_token: Option<String>,
}

impl BackendClient {
    /// Create a client from backend configuration
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| Error::InvalidUrl(format!("{}: {}", config.base_url, e)))?;
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            http,
            base_url,
            api_prefix: config.api_prefix.trim_end_matches('/').to_string(),
            auth_token: config.auth_token.clone(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        let full = format!("{}/{}", self.api_prefix, path.trim_start_matches('/'));
        self.base_url
            .join(&full)
            .map_err(|e| Error::InvalidUrl(format!("{}: {}", full, e)))
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.http.request(method, url);
        match &self.auth_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T> {
        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<T>().await?);
        }

        let body = response.text().await.unwrap_or_default();
        Err(Error::Backend {
            status: status.as_u16(),
            detail: error_detail(status, &body),
        })
    }
}

/// Pull the `detail` message out of an error body
fn error_detail(status: StatusCode, body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        match value.get("detail") {
            Some(serde_json::Value::String(detail)) => return detail.clone(),
            Some(other) => return other.to_string(),
            None => {}
        }
    }
    status
        .canonical_reason()
        .map(str::to_string)
        .unwrap_or_else(|| format!("HTTP {}", status.as_u16()))
}

#[async_trait]
impl CameraBackend for BackendClient {
    async fn list_cameras(&self) -> Result<Vec<CameraRecord>> {
        let url = self.endpoint("cameras")?;
        let cameras: Vec<CameraRecord> = self.send(self.request(Method::GET, url)).await?;
        debug!(count = cameras.len(), "Fetched camera list");
        Ok(cameras)
    }

    async fn camera_action(&self, camera_id: CameraId, action: CameraAction) -> Result<ActionResponse> {
        let url = self.endpoint(&format!("cameras/{}/{}", camera_id, action.path()))?;
        let mut builder = self.request(Method::POST, url);
        if let Some(enable) = action.enable() {
            builder = builder.query(&[("enable", enable)]);
        }
        debug!(camera_id = %camera_id, action = action.path(), "Camera action");
        self.send(builder).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_joins_prefix() {
        let client = BackendClient::new(&BackendConfig::default().with_base_url("http://nvr.local:8000")).unwrap();
        assert_eq!(
            client.endpoint("cameras/3/start-stream").unwrap().as_str(),
            "http://nvr.local:8000/api/cameras/3/start-stream"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        let err = BackendClient::new(&BackendConfig::default().with_base_url("not a url")).unwrap_err();
        assert!(matches!(err, Error::InvalidUrl(_)));
    }

    #[test]
    fn test_error_detail_extraction() {
        assert_eq!(
            error_detail(StatusCode::NOT_FOUND, r#"{"detail":"Camera not found"}"#),
            "Camera not found"
        );
        assert_eq!(
            error_detail(StatusCode::INTERNAL_SERVER_ERROR, "oops"),
            "Internal Server Error"
        );
    }
}
