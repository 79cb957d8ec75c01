//! Integration tests for the async session supervisor

use std::sync::Arc;
use std::time::Duration;

use camwall_core::testing::MockEngineFactory;
use camwall_core::{
    CameraId, CameraRecord, EngineEvent, EngineFault, Error, FaultKind, Quality, SessionEvent,
    SessionRegistry, SessionState, SessionSupervisor, SinkId, StreamResolver, SupervisorHandle,
    TokioClock, ViewContext,
};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::timeout;

fn camera(id: i64) -> CameraRecord {
    CameraRecord::new(id, format!("Camera {}", id))
        .with_stream(Quality::Low, format!("/hls/cam/{}/low/index.m3u8", id))
}

fn start(factory: &MockEngineFactory) -> (SupervisorHandle, broadcast::Receiver<SessionEvent>, JoinHandle<()>) {
    let registry = SessionRegistry::new(
        ViewContext::grid(),
        StreamResolver::from_base("http://nvr.local:8000").unwrap(),
        Box::new(factory.clone()),
        Arc::new(TokioClock),
    );
    let (supervisor, handle) = SessionSupervisor::new(registry);
    let events = handle.subscribe();
    let task = supervisor.spawn();
    (handle, events, task)
}

async fn wait_for_status(
    events: &mut broadcast::Receiver<SessionEvent>,
    camera_id: CameraId,
    prefix: &str,
) -> String {
    let deadline = Duration::from_secs(120);
    timeout(deadline, async {
        loop {
            if let SessionEvent::StatusChanged {
                camera_id: id,
                status,
                ..
            } = events.recv().await.expect("event channel closed")
            {
                let status = status.to_string();
                if id == camera_id && status.starts_with(prefix) {
                    return status;
                }
            }
        }
    })
    .await
    .expect("timed out waiting for status")
}

#[tokio::test(start_paused = true)]
async fn test_session_reaches_playing() {
    let factory = MockEngineFactory::new();
    let (handle, mut events, task) = start(&factory);

    assert!(handle.attach_sink(CameraId(1), SinkId(1)).await.unwrap());
    let report = handle.reconcile(vec![camera(1)]).await.unwrap();
    assert_eq!(report.created, vec![CameraId(1)]);

    wait_for_status(&mut events, CameraId(1), "initializing").await;
    wait_for_status(&mut events, CameraId(1), "connecting").await;

    assert!(factory.emit(CameraId(1), EngineEvent::Playing));
    wait_for_status(&mut events, CameraId(1), "playing").await;

    let snapshots = handle.snapshot().await.unwrap();
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].state, SessionState::Playing);

    tokio_test::assert_ok!(handle.shutdown().await);
    task.await.unwrap();
    assert_eq!(factory.total_live(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_connect_patience_escalates_and_rebinds() {
    let factory = MockEngineFactory::new();
    let (handle, mut events, task) = start(&factory);

    handle.attach_sink(CameraId(2), SinkId(2)).await.unwrap();
    handle.reconcile(vec![camera(2)]).await.unwrap();
    wait_for_status(&mut events, CameraId(2), "connecting").await;

    let status = wait_for_status(&mut events, CameraId(2), "error:").await;
    assert_eq!(status, "error:Stream did not start (retry 1/30)");

    // Retry delay, then a fresh binding
    wait_for_status(&mut events, CameraId(2), "connecting").await;
    assert_eq!(factory.created(CameraId(2)), 2);
    assert_eq!(factory.peak_live(CameraId(2)), 1);

    handle.shutdown().await.unwrap();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_fault_through_channel_escalates() {
    let factory = MockEngineFactory::new();
    let (handle, mut events, task) = start(&factory);

    handle.attach_sink(CameraId(3), SinkId(3)).await.unwrap();
    handle.reconcile(vec![camera(3)]).await.unwrap();
    wait_for_status(&mut events, CameraId(3), "connecting").await;

    factory.emit(
        CameraId(3),
        EngineEvent::Fault(EngineFault::fatal(FaultKind::KeySystem, "keySystemNoKeys")),
    );
    let status = wait_for_status(&mut events, CameraId(3), "error:").await;
    assert!(status.contains("retry 1/30"));

    handle.shutdown().await.unwrap();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_removal_emits_destroyed() {
    let factory = MockEngineFactory::new();
    let (handle, mut events, task) = start(&factory);

    handle.attach_sink(CameraId(4), SinkId(4)).await.unwrap();
    handle.reconcile(vec![camera(4)]).await.unwrap();
    wait_for_status(&mut events, CameraId(4), "connecting").await;

    let report = handle.reconcile(vec![]).await.unwrap();
    assert_eq!(report.destroyed, vec![CameraId(4)]);

    let destroyed = timeout(Duration::from_secs(1), async {
        loop {
            if let Ok(SessionEvent::Destroyed { camera_id, .. }) = events.recv().await {
                return camera_id;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(destroyed, CameraId(4));
    assert_eq!(factory.live_count(CameraId(4)), 0);

    handle.shutdown().await.unwrap();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_handle_after_shutdown_reports_closed() {
    let factory = MockEngineFactory::new();
    let (handle, _events, task) = start(&factory);

    handle.shutdown().await.unwrap();
    task.await.unwrap();

    assert!(matches!(handle.snapshot().await, Err(Error::SupervisorClosed)));
    assert!(matches!(
        handle.retry(CameraId(1)).await,
        Err(Error::SupervisorClosed)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_controls_are_noops_when_not_applicable() {
    let factory = MockEngineFactory::new();
    let (handle, mut events, task) = start(&factory);

    handle.attach_sink(CameraId(5), SinkId(5)).await.unwrap();
    handle.reconcile(vec![camera(5)]).await.unwrap();
    wait_for_status(&mut events, CameraId(5), "connecting").await;

    assert!(!handle.retry(CameraId(5)).await.unwrap());
    assert!(!handle.start_stream(CameraId(5)).await.unwrap());
    assert!(!handle.toggle_audio(CameraId(5)).await.unwrap());
    assert!(!handle.change_quality(CameraId(5), Quality::Low).await.unwrap());
    assert_eq!(factory.created(CameraId(5)), 1);

    handle.shutdown().await.unwrap();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_tears_down_before_replying() {
    let factory = MockEngineFactory::new();
    let (handle, mut events, task) = start(&factory);

    handle.attach_sink(CameraId(6), SinkId(6)).await.unwrap();
    handle.reconcile(vec![camera(6)]).await.unwrap();
    wait_for_status(&mut events, CameraId(6), "connecting").await;
    assert_eq!(factory.live_count(CameraId(6)), 1);

    handle.shutdown().await.unwrap();
    assert_eq!(factory.total_live(), 0);

    let destroyed = timeout(Duration::from_secs(1), async {
        loop {
            match events.recv().await {
                Ok(SessionEvent::Destroyed { camera_id, .. }) => return Some(camera_id),
                Ok(_) => continue,
                Err(_) => return None,
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(destroyed, Some(CameraId(6)));
    task.await.unwrap();
}
