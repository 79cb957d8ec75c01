//! Mock NVR backend for exercising the REST client
//!
//! Serves the camera list and records every control action. Runs on a
//! random available port.
//!
//! ```ignore
//! let backend = MockBackend::start(vec![camera(1)]).await?;
//! let config = BackendConfig::default().with_base_url(backend.base_url());
//! ```

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use camwall_core::CameraRecord;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::oneshot;

/// One recorded control action
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedAction {
    pub camera_id: i64,
    pub action: String,
    pub enable: Option<bool>,
}

#[derive(Default)]
struct BackendState {
    cameras: Mutex<Vec<CameraRecord>>,
    actions: Mutex<Vec<RecordedAction>>,
    auth_headers: Mutex<Vec<String>>,
    list_calls: AtomicUsize,
    fail_list: AtomicBool,
}

/// Mock backend server
pub struct MockBackend {
    base_url: String,
    state: Arc<BackendState>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    server_handle: Option<tokio::task::JoinHandle<()>>,
}

impl MockBackend {
    /// Start the mock server on a random available port
    pub async fn start(cameras: Vec<CameraRecord>) -> anyhow::Result<Self> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let state = Arc::new(BackendState::default());
        *state.cameras.lock() = cameras;

        let app = Router::new()
            .route("/api/cameras", get(list_cameras))
            .route("/api/cameras/:id/:action", post(camera_action))
            .with_state(state.clone());

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let server_handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await;
        });

        Ok(Self {
            base_url: format!("http://{}", addr),
            state,
            shutdown_tx: Some(shutdown_tx),
            server_handle: Some(server_handle),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn set_cameras(&self, cameras: Vec<CameraRecord>) {
        *self.state.cameras.lock() = cameras;
    }

    /// Make `GET /api/cameras` answer 503 until cleared
    pub fn fail_list(&self, fail: bool) {
        self.state.fail_list.store(fail, Ordering::SeqCst);
    }

    pub fn list_calls(&self) -> usize {
        self.state.list_calls.load(Ordering::SeqCst)
    }

    pub fn actions(&self) -> Vec<RecordedAction> {
        self.state.actions.lock().clone()
    }

    pub fn auth_headers(&self) -> Vec<String> {
        self.state.auth_headers.lock().clone()
    }

    /// Shutdown the server
    pub async fn shutdown(mut self) -> anyhow::Result<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.server_handle.take() {
            handle.await?;
        }
        Ok(())
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

fn record_auth(state: &BackendState, headers: &HeaderMap) {
    if let Some(value) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
        state.auth_headers.lock().push(value.to_string());
    }
}

async fn list_cameras(State(state): State<Arc<BackendState>>, headers: HeaderMap) -> Response {
    record_auth(&state, &headers);
    state.list_calls.fetch_add(1, Ordering::SeqCst);
    if state.fail_list.load(Ordering::SeqCst) {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "detail": "Registry unavailable" })),
        )
            .into_response();
    }
    Json(state.cameras.lock().clone()).into_response()
}

async fn camera_action(
    State(state): State<Arc<BackendState>>,
    Path((id, action)): Path<(i64, String)>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    record_auth(&state, &headers);
    let known = state.cameras.lock().iter().any(|c| c.id.0 == id);
    if !known {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "detail": "Camera not found" })),
        )
            .into_response();
    }

    let enable = query.get("enable").map(|v| v == "true");
    state.actions.lock().push(RecordedAction {
        camera_id: id,
        action: action.clone(),
        enable,
    });

    Json(json!({
        "message": format!("{} accepted", action),
        "camera_id": id,
    }))
    .into_response()
}
