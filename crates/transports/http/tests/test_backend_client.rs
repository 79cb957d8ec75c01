//! REST client tests against a mock backend

mod fixtures;

use camwall_core::{BackendConfig, CameraId, CameraRecord, Quality};
use camwall_http::{BackendClient, CameraBackend, Error};
use fixtures::mock_backend::{MockBackend, RecordedAction};

fn camera(id: i64) -> CameraRecord {
    CameraRecord::new(id, format!("Camera {}", id))
        .with_stream(Quality::Low, format!("/hls/cam/{}/low/index.m3u8", id))
        .with_online(true)
}

async fn client_for(backend: &MockBackend) -> BackendClient {
    BackendClient::new(&BackendConfig::default().with_base_url(backend.base_url())).unwrap()
}

#[tokio::test]
async fn test_list_cameras() {
    let backend = MockBackend::start(vec![camera(1), camera(2)]).await.unwrap();
    let client = client_for(&backend).await;

    let cameras = client.list_cameras().await.unwrap();
    assert_eq!(cameras.len(), 2);
    assert_eq!(cameras[0].id, CameraId(1));
    assert_eq!(cameras[1], camera(2));
    assert_eq!(backend.list_calls(), 1);

    backend.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_control_actions_hit_expected_routes() {
    let backend = MockBackend::start(vec![camera(7)]).await.unwrap();
    let client = client_for(&backend).await;

    let response = client.start_stream(CameraId(7)).await.unwrap();
    assert_eq!(response.message.as_deref(), Some("start-stream accepted"));
    assert_eq!(response.extra.get("camera_id"), Some(&serde_json::json!(7)));

    client.stop_stream(CameraId(7)).await.unwrap();
    client.restart_stream(CameraId(7)).await.unwrap();
    client.toggle_recognition(CameraId(7)).await.unwrap();
    client.toggle_anpr(CameraId(7)).await.unwrap();
    client.set_recognition(CameraId(7), true).await.unwrap();
    client.set_anpr(CameraId(7), false).await.unwrap();

    let actions: Vec<(String, Option<bool>)> = backend
        .actions()
        .into_iter()
        .map(|RecordedAction { action, enable, .. }| (action, enable))
        .collect();
    assert_eq!(
        actions,
        vec![
            ("start-stream".to_string(), None),
            ("stop-stream".to_string(), None),
            ("restart-stream".to_string(), None),
            ("toggle-recognition".to_string(), None),
            ("toggle-anpr".to_string(), None),
            ("set-recognition".to_string(), Some(true)),
            ("set-anpr".to_string(), Some(false)),
        ]
    );

    backend.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_error_detail_is_surfaced() {
    let backend = MockBackend::start(vec![camera(1)]).await.unwrap();
    let client = client_for(&backend).await;

    let err = client.start_stream(CameraId(99)).await.unwrap_err();
    match err {
        Error::Backend { status, detail } => {
            assert_eq!(status, 404);
            assert_eq!(detail, "Camera not found");
        }
        other => panic!("unexpected error {:?}", other),
    }

    backend.fail_list(true);
    let err = client.list_cameras().await.unwrap_err();
    assert!(err.is_backend_rejection());
    assert!(err.to_string().contains("Registry unavailable"));

    backend.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_bearer_token_is_sent() {
    let backend = MockBackend::start(vec![camera(1)]).await.unwrap();
    let config = BackendConfig::default()
        .with_base_url(backend.base_url())
        .with_auth_token("s3cret");
    let client = BackendClient::new(&config).unwrap();

    tokio_test::assert_ok!(client.list_cameras().await);
    tokio_test::assert_ok!(client.toggle_anpr(CameraId(1)).await);
    assert_eq!(
        backend.auth_headers(),
        vec!["Bearer s3cret".to_string(), "Bearer s3cret".to_string()]
    );

    backend.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unreachable_backend_is_transport_error() {
    let backend = MockBackend::start(vec![]).await.unwrap();
    let url = backend.base_url().to_string();
    backend.shutdown().await.unwrap();

    let client = BackendClient::new(&BackendConfig::default().with_base_url(url)).unwrap();
    let err = client.list_cameras().await.unwrap_err();
    assert!(matches!(err, Error::Http(_)));
    assert!(!err.is_backend_rejection());
}
