mod common;

use std::sync::Arc;
use std::time::Duration;

use nexus_executor::FixedExecutor;
use nexus_models::{CameraEvent, CameraId, CameraState};
use nexus_queue::{AdmissionError, QueueConfig};
use nexus_scheduler::{CameraConfig, SchedulerError};
use nexus_stream::StreamConfig;
use nexus_worker::WorkerConfig;

use common::{build, camera_in, config, job, ScriptedExecutor};

fn stream_config() -> StreamConfig {
    StreamConfig::default()
        .with_backoff(Duration::from_secs(1), Duration::from_secs(30), 0.0)
        .with_stable_window(Duration::from_secs(30))
        .with_frame_timeout(Duration::from_secs(1))
}

fn stub_camera(id: &str, query: &str) -> CameraConfig {
    CameraConfig::new(id, format!("stub://{}?{}", id, query), "yolov8n").with_max_fps(None)
}

#[tokio::test(start_paused = true)]
async fn test_camera_frames_become_results() {
    let executor = Arc::new(FixedExecutor::single_object());
    let (scheduler, sink) = build(config(2, 64).with_stream(stream_config()), executor);
    let id = CameraId::from("lobby");

    scheduler.register_camera(stub_camera("lobby", "fps=10")).unwrap();
    scheduler.start_camera(&id).unwrap();
    camera_in(&scheduler, "lobby", CameraState::Streaming).await;
    tokio::time::sleep(Duration::from_secs(2)).await;

    let status = scheduler.camera_status(&id).unwrap();
    assert!(status.frames_submitted > 0);
    assert!(sink.result_count() > 0);
    assert!(scheduler.latest_frame(&id).is_some());

    let detections = sink
        .events_for(&id)
        .into_iter()
        .filter(|event| matches!(event, CameraEvent::Detections { .. }))
        .count();
    assert!(detections > 0);

    scheduler.stop_camera(&id).await.unwrap();
    assert_eq!(
        scheduler.camera_status(&id).unwrap().state,
        CameraState::Disconnected
    );
    scheduler.stop_camera(&id).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_full_queue_drops_frames_and_keeps_streaming() {
    let executor = Arc::new(ScriptedExecutor::new(Duration::from_secs(3600)));
    let config = config(1, 1)
        .with_queue(
            QueueConfig::default()
                .with_capacity(1)
                .with_max_inflight_per_camera(0),
        )
        .with_stream(stream_config());
    let (scheduler, _sink) = build(config, executor);
    let id = CameraId::from("dock");

    scheduler.register_camera(stub_camera("dock", "fps=10")).unwrap();
    scheduler.start_camera(&id).unwrap();
    camera_in(&scheduler, "dock", CameraState::Streaming).await;
    tokio::time::sleep(Duration::from_secs(3)).await;

    let status = scheduler.camera_status(&id).unwrap();
    assert_eq!(status.state, CameraState::Streaming);
    assert!(status.frames_received >= 25, "received {}", status.frames_received);
    // one frame running, one queued, everything else dropped
    assert_eq!(status.frames_submitted, 2);
    assert_eq!(status.frames_dropped, status.frames_received - 2);
    assert!(scheduler.stats().queue.depth <= 1);

    assert!(matches!(
        scheduler.submit_async(job("api", 5)),
        Err(SchedulerError::Admission(AdmissionError::QueueFull { .. }))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_noisy_camera_throttled_while_api_admitted() {
    let executor = Arc::new(ScriptedExecutor::new(Duration::from_secs(3600)));
    let config = config(1, 64)
        .with_queue(
            QueueConfig::default()
                .with_capacity(64)
                .with_max_inflight_per_camera(2),
        )
        .with_stream(stream_config());
    let (scheduler, _sink) = build(config, executor);
    let id = CameraId::from("noisy");

    scheduler.register_camera(stub_camera("noisy", "fps=10")).unwrap();
    scheduler.start_camera(&id).unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(scheduler.queue().camera_inflight(&id), 2);
    let status = scheduler.camera_status(&id).unwrap();
    assert_eq!(status.frames_submitted, 2);
    assert!(status.frames_dropped > 0);

    scheduler.submit_async(job("api", 5)).unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_camera_retries_then_resets_after_stable_window() {
    let executor = Arc::new(FixedExecutor::single_object());
    let (scheduler, sink) = build(config(1, 64).with_stream(stream_config()), executor);
    let id = CameraId::from("gate");

    scheduler
        .register_camera(stub_camera("gate", "fail_connects=3&fps=2"))
        .unwrap();
    scheduler.start_camera(&id).unwrap();

    let snapshot = camera_in(&scheduler, "gate", CameraState::Streaming).await;
    assert_eq!(snapshot.retry_count, 3);

    let transitions: Vec<(CameraState, CameraState)> = sink
        .events_for(&id)
        .into_iter()
        .filter_map(|event| match event {
            CameraEvent::StateChanged { from, to, .. } => Some((from, to)),
            _ => None,
        })
        .collect();
    use CameraState::*;
    assert_eq!(
        transitions,
        vec![
            (Disconnected, Connecting),
            (Connecting, Backoff),
            (Backoff, Connecting),
            (Connecting, Backoff),
            (Backoff, Connecting),
            (Connecting, Backoff),
            (Backoff, Connecting),
            (Connecting, Streaming),
        ]
    );

    tokio::time::sleep(Duration::from_secs(31)).await;
    let snapshot = scheduler.camera_status(&id).unwrap();
    assert_eq!(snapshot.state, Streaming);
    assert_eq!(snapshot.retry_count, 0);
}

#[tokio::test(start_paused = true)]
async fn test_camera_registry_passthrough_and_shutdown() {
    let executor = Arc::new(FixedExecutor::single_object());
    let config = config(1, 64)
        .with_stream(stream_config().with_max_cameras(2))
        .with_worker(WorkerConfig::default().with_pool_size(1));
    let (scheduler, _sink) = build(config, executor);

    scheduler.register_camera(stub_camera("a", "fps=5")).unwrap();
    scheduler.register_camera(stub_camera("b", "fps=5")).unwrap();
    assert!(matches!(
        scheduler.register_camera(stub_camera("c", "fps=5")),
        Err(SchedulerError::Stream(_))
    ));
    assert_eq!(scheduler.list_cameras().len(), 2);
    assert!(scheduler.camera_status(&CameraId::from("c")).is_err());

    assert_eq!(scheduler.start_enabled_cameras(), 2);
    camera_in(&scheduler, "a", CameraState::Streaming).await;
    assert_eq!(scheduler.stats().cameras.len(), 2);

    scheduler.remove_camera(&CameraId::from("b")).await.unwrap();
    assert_eq!(scheduler.list_cameras().len(), 1);

    scheduler.shutdown().await.unwrap();
    assert_eq!(
        scheduler.camera_status(&CameraId::from("a")).unwrap().state,
        CameraState::Disconnected
    );
}
