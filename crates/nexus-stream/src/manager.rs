//! Stream manager: owns the camera registry and one session per started camera.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::join_all;
use nexus_models::{CameraId, CameraSession, CameraState};
use nexus_sink::ResultSink;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::{CameraConfig, StreamConfig};
use crate::error::StreamResult;
use crate::frame::Frame;
use crate::registry::CameraRegistry;
use crate::session::{FrameSubmitter, SessionHandle};
use crate::source::FrameSourceFactory;

/// Per-camera line in scheduler stats.
#[derive(Debug, Clone, Serialize)]
pub struct CameraStats {
    pub camera_id: CameraId,
    pub model_id: String,
    pub running: bool,
    pub state: CameraState,
    pub retry_count: u32,
    pub frames_received: u64,
    pub frames_submitted: u64,
    pub frames_dropped: u64,
    pub frames_skipped: u64,
    pub reconnects: u64,
    pub last_error: Option<String>,
}

impl CameraStats {
    fn new(camera: &CameraConfig, running: bool, session: CameraSession) -> Self {
        Self {
            camera_id: camera.id.clone(),
            model_id: camera.model_id.clone(),
            running,
            state: session.state,
            retry_count: session.retry_count,
            frames_received: session.frames_received,
            frames_submitted: session.frames_submitted,
            frames_dropped: session.frames_dropped,
            frames_skipped: session.frames_skipped,
            reconnects: session.reconnects,
            last_error: session.last_error,
        }
    }
}

/// Starts, stops and reports on camera sessions.
///
/// Sessions only touch the rest of the engine through the [`FrameSubmitter`]
/// and the [`ResultSink`].
pub struct StreamManager {
    config: StreamConfig,
    registry: CameraRegistry,
    factory: Arc<dyn FrameSourceFactory>,
    submitter: Arc<dyn FrameSubmitter>,
    sink: Arc<dyn ResultSink>,
    sessions: Mutex<HashMap<CameraId, SessionHandle>>,
}

impl StreamManager {
    pub fn new(
        config: StreamConfig,
        factory: Arc<dyn FrameSourceFactory>,
        submitter: Arc<dyn FrameSubmitter>,
        sink: Arc<dyn ResultSink>,
    ) -> Self {
        Self {
            registry: CameraRegistry::new(config.max_cameras),
            config,
            factory,
            submitter,
            sink,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn registry(&self) -> &CameraRegistry {
        &self.registry
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<CameraId, SessionHandle>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register_camera(&self, camera: CameraConfig) -> StreamResult<()> {
        let camera_id = camera.id.clone();
        self.registry.register(camera)?;
        info!(camera_id = %camera_id, "Camera registered");
        Ok(())
    }

    /// Stop the camera's session, then forget the camera.
    pub async fn remove_camera(&self, camera_id: &CameraId) -> StreamResult<CameraConfig> {
        self.stop_camera(camera_id).await?;
        let camera = self.registry.remove(camera_id)?;
        info!(camera_id = %camera_id, "Camera removed");
        Ok(camera)
    }

    /// Start a session for a registered camera. Starting a running camera is a no-op.
    pub fn start_camera(&self, camera_id: &CameraId) -> StreamResult<()> {
        let camera = self.registry.get(camera_id)?;
        let mut sessions = self.sessions();
        if sessions
            .get(camera_id)
            .is_some_and(|handle| !handle.is_finished())
        {
            return Ok(());
        }

        let source = self.factory.create(&camera)?;
        let handle = SessionHandle::spawn(
            camera,
            &self.config,
            source,
            Arc::clone(&self.submitter),
            Arc::clone(&self.sink),
        );
        sessions.insert(camera_id.clone(), handle);
        Ok(())
    }

    /// Stop a camera's session and wait for its source to close.
    ///
    /// Idempotent, and safe while a connect or backoff is in progress.
    pub async fn stop_camera(&self, camera_id: &CameraId) -> StreamResult<()> {
        self.registry.get(camera_id)?;
        let handle = self.sessions().remove(camera_id);
        if let Some(handle) = handle {
            self.stop_session(camera_id, handle).await;
        }
        Ok(())
    }

    async fn stop_session(&self, camera_id: &CameraId, handle: SessionHandle) {
        if !handle.stop(self.config.stop_timeout).await {
            warn!(
                camera_id = %camera_id,
                timeout_ms = self.config.stop_timeout.as_millis() as u64,
                "Camera session did not stop in time, aborted without closing its source"
            );
        }
    }

    /// Start every registered camera marked `enabled`. Returns how many started.
    pub fn start_enabled(&self) -> usize {
        let mut started = 0;
        for camera in self.registry.list().into_iter().filter(|c| c.enabled) {
            match self.start_camera(&camera.id) {
                Ok(()) => started += 1,
                Err(e) => warn!(camera_id = %camera.id, "Failed to start camera: {}", e),
            }
        }
        started
    }

    /// Current session snapshot. A registered camera without a session is
    /// reported `Disconnected`.
    pub fn status(&self, camera_id: &CameraId) -> StreamResult<CameraSession> {
        let camera = self.registry.get(camera_id)?;
        Ok(self
            .sessions()
            .get(camera_id)
            .map(|handle| handle.shared.snapshot())
            .unwrap_or_else(|| CameraSession::disconnected(camera.id, camera.url)))
    }

    /// Most recent frame pulled by the camera's session.
    pub fn latest_frame(&self, camera_id: &CameraId) -> Option<Frame> {
        self.sessions()
            .get(camera_id)
            .and_then(|handle| handle.shared.latest_frame())
    }

    pub fn is_running(&self, camera_id: &CameraId) -> bool {
        self.sessions()
            .get(camera_id)
            .is_some_and(|handle| !handle.is_finished())
    }

    pub fn list(&self) -> Vec<CameraConfig> {
        self.registry.list()
    }

    pub fn stats(&self) -> Vec<CameraStats> {
        let sessions = self.sessions();
        self.registry
            .list()
            .into_iter()
            .map(|camera| match sessions.get(&camera.id) {
                Some(handle) => {
                    CameraStats::new(&camera, !handle.is_finished(), handle.shared.snapshot())
                }
                None => {
                    let idle = CameraSession::disconnected(camera.id.clone(), camera.url.clone());
                    CameraStats::new(&camera, false, idle)
                }
            })
            .collect()
    }

    /// Stop every session concurrently.
    pub async fn stop_all(&self) {
        let handles: Vec<(CameraId, SessionHandle)> = self.sessions().drain().collect();
        if handles.is_empty() {
            return;
        }
        info!(count = handles.len(), "Stopping camera sessions");
        join_all(
            handles
                .into_iter()
                .map(|(camera_id, handle)| async move {
                    self.stop_session(&camera_id, handle).await;
                }),
        )
        .await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::time::Duration;

    use nexus_models::{CameraEvent, InferenceRequest, JobId, Priority, RequestSource};
    use nexus_queue::{AdmissionError, AdmissionResult};
    use nexus_sink::MemorySink;
    use tokio::time::Instant;

    use super::*;
    use crate::config::MotionConfig;
    use crate::error::StreamError;
    use crate::synthetic::{SyntheticCounters, SyntheticSource};

    /// Transport faults a `stub://` URL cannot script.
    #[derive(Debug, Clone, Copy, Default)]
    enum Fault {
        #[default]
        None,
        /// `next_frame` never resolves, ignoring its timeout
        FramesNeverArrive,
        /// `close` never resolves
        CloseHangs,
    }

    struct FaultySource {
        inner: SyntheticSource,
        fault: Fault,
    }

    #[async_trait::async_trait]
    impl crate::FrameSource for FaultySource {
        async fn connect(&mut self, target: &str) -> StreamResult<()> {
            self.inner.connect(target).await
        }

        async fn next_frame(&mut self, timeout: Duration) -> StreamResult<Frame> {
            match self.fault {
                Fault::FramesNeverArrive => std::future::pending().await,
                _ => self.inner.next_frame(timeout).await,
            }
        }

        async fn close(&mut self) {
            match self.fault {
                Fault::CloseHangs => std::future::pending().await,
                _ => self.inner.close().await,
            }
        }

        fn is_connected(&self) -> bool {
            self.inner.is_connected()
        }
    }

    #[derive(Default)]
    struct CountingFactory {
        counters: std::sync::Mutex<HashMap<CameraId, SyntheticCounters>>,
        fault: Fault,
    }

    impl CountingFactory {
        fn counters(&self, camera_id: &str) -> SyntheticCounters {
            self.counters.lock().unwrap()[&CameraId::from(camera_id)].clone()
        }
    }

    impl FrameSourceFactory for CountingFactory {
        fn create(&self, camera: &CameraConfig) -> StreamResult<Box<dyn crate::FrameSource>> {
            crate::SourceKind::for_url(&camera.url)?;
            let source = SyntheticSource::from_url(&camera.url)?;
            self.counters
                .lock()
                .unwrap()
                .insert(camera.id.clone(), source.counters());
            Ok(Box::new(FaultySource {
                inner: source,
                fault: self.fault,
            }))
        }
    }

    #[derive(Default)]
    struct RecordingSubmitter {
        accepted: AtomicU64,
        reject: AtomicBool,
        requests: std::sync::Mutex<Vec<InferenceRequest>>,
    }

    impl FrameSubmitter for RecordingSubmitter {
        fn submit_frame(&self, request: InferenceRequest) -> AdmissionResult<JobId> {
            if self.reject.load(Ordering::SeqCst) {
                return Err(AdmissionError::QueueFull { capacity: 0 });
            }
            self.accepted.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().unwrap().push(request);
            Ok(JobId::new())
        }
    }

    struct Harness {
        manager: StreamManager,
        factory: Arc<CountingFactory>,
        submitter: Arc<RecordingSubmitter>,
        sink: Arc<MemorySink>,
    }

    fn harness(config: StreamConfig) -> Harness {
        harness_with_fault(config, Fault::None)
    }

    fn harness_with_fault(config: StreamConfig, fault: Fault) -> Harness {
        let factory = Arc::new(CountingFactory {
            fault,
            ..CountingFactory::default()
        });
        let submitter = Arc::new(RecordingSubmitter::default());
        let sink = Arc::new(MemorySink::default());
        let manager = StreamManager::new(
            config,
            factory.clone(),
            submitter.clone(),
            sink.clone(),
        );
        Harness {
            manager,
            factory,
            submitter,
            sink,
        }
    }

    fn test_config() -> StreamConfig {
        StreamConfig::default()
            .with_backoff(Duration::from_secs(1), Duration::from_secs(30), 0.0)
            .with_stable_window(Duration::from_secs(30))
            .with_frame_timeout(Duration::from_secs(1))
    }

    fn camera(id: &str, url: &str) -> CameraConfig {
        CameraConfig::new(id, url, "yolov8n").with_max_fps(None)
    }

    async fn wait_for_state(manager: &StreamManager, id: &CameraId, state: CameraState) -> CameraSession {
        for _ in 0..10_000 {
            let snapshot = manager.status(id).unwrap();
            if snapshot.state == state {
                return snapshot;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("camera {} never reached {:?}", id, state);
    }

    fn transitions(sink: &MemorySink, id: &CameraId) -> Vec<(CameraState, CameraState)> {
        sink.events_for(id)
            .into_iter()
            .filter_map(|event| match event {
                CameraEvent::StateChanged { from, to, .. } => Some((from, to)),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_count_resets_after_stable_window() {
        let h = harness(test_config());
        let id = CameraId::from("lobby");
        h.manager
            .register_camera(camera("lobby", "stub://lobby?fail_connects=3"))
            .unwrap();

        let started = Instant::now();
        h.manager.start_camera(&id).unwrap();
        let snapshot = wait_for_state(&h.manager, &id, CameraState::Streaming).await;
        assert_eq!(snapshot.retry_count, 3);
        assert!(snapshot.last_error.is_some());

        // 1s + 2s + 4s of backoff with jitter disabled
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(7), "elapsed {:?}", elapsed);
        assert!(elapsed < Duration::from_secs(8), "elapsed {:?}", elapsed);

        use CameraState::*;
        assert_eq!(
            transitions(&h.sink, &id),
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

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(h.manager.status(&id).unwrap().retry_count, 3);

        tokio::time::sleep(Duration::from_secs(21)).await;
        let snapshot = h.manager.status(&id).unwrap();
        assert_eq!(snapshot.state, Streaming);
        assert_eq!(snapshot.retry_count, 0);

        h.manager.stop_camera(&id).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_backoff_closes_source() {
        let config = test_config().with_backoff(Duration::from_secs(60), Duration::from_secs(60), 0.0);
        let h = harness(config);
        let id = CameraId::from("dock");
        h.manager
            .register_camera(camera("dock", "stub://dock?fail_connects=100"))
            .unwrap();
        h.manager.start_camera(&id).unwrap();
        wait_for_state(&h.manager, &id, CameraState::Backoff).await;

        h.manager.stop_camera(&id).await.unwrap();
        let snapshot = h.manager.status(&id).unwrap();
        assert_eq!(snapshot.state, CameraState::Disconnected);
        assert!(!h.manager.is_running(&id));
        assert_eq!(h.factory.counters("dock").open(), 0);

        // idempotent
        h.manager.stop_camera(&id).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_connect_leaks_nothing() {
        let h = harness(test_config());
        let id = CameraId::from("gate");
        h.manager
            .register_camera(camera("gate", "stub://gate?connect_delay_ms=5000"))
            .unwrap();
        h.manager.start_camera(&id).unwrap();
        wait_for_state(&h.manager, &id, CameraState::Connecting).await;

        h.manager.stop_camera(&id).await.unwrap();
        let counters = h.factory.counters("gate");
        assert_eq!(counters.connects(), 0);
        assert_eq!(counters.open(), 0);

        let last = transitions(&h.sink, &id).pop().unwrap();
        assert_eq!(last, (CameraState::Connecting, CameraState::Disconnected));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_stream_backs_off_and_reconnects() {
        let h = harness(test_config());
        let id = CameraId::from("yard");
        h.manager
            .register_camera(camera("yard", "stub://yard?stall_after=2"))
            .unwrap();
        h.manager.start_camera(&id).unwrap();

        let snapshot = wait_for_state(&h.manager, &id, CameraState::Backoff).await;
        assert_eq!(snapshot.retry_count, 1);
        assert!(snapshot.last_error.unwrap().contains("No frame"));
        assert_eq!(snapshot.frames_received, 2);

        let snapshot = wait_for_state(&h.manager, &id, CameraState::Streaming).await;
        assert_eq!(snapshot.reconnects, 1);

        h.manager.stop_camera(&id).await.unwrap();
        assert_eq!(h.factory.counters("yard").open(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_source_ignoring_frame_timeout_still_backs_off() {
        let h = harness_with_fault(test_config(), Fault::FramesNeverArrive);
        let id = CameraId::from("pier");
        h.manager.register_camera(camera("pier", "stub://pier")).unwrap();

        let started = Instant::now();
        h.manager.start_camera(&id).unwrap();
        let snapshot = wait_for_state(&h.manager, &id, CameraState::Backoff).await;
        assert!(started.elapsed() < Duration::from_secs(2), "elapsed {:?}", started.elapsed());
        assert_eq!(snapshot.retry_count, 1);
        assert_eq!(snapshot.frames_received, 0);
        assert!(snapshot.last_error.unwrap().contains("No frame"));

        // backoff 1s, then another 1s idle deadline
        tokio::time::sleep(Duration::from_secs(3)).await;
        let snapshot = h.manager.status(&id).unwrap();
        assert!(snapshot.retry_count >= 2, "retry {}", snapshot.retry_count);
        assert_eq!(h.factory.counters("pier").connects(), 2);

        h.manager.stop_camera(&id).await.unwrap();
        assert_eq!(h.factory.counters("pier").open(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_timeout_drops_source_without_close() {
        let config = StreamConfig {
            stop_timeout: Duration::from_secs(2),
            ..test_config()
        };
        let h = harness_with_fault(config, Fault::CloseHangs);
        let id = CameraId::from("roof");
        h.manager.register_camera(camera("roof", "stub://roof")).unwrap();
        h.manager.start_camera(&id).unwrap();
        wait_for_state(&h.manager, &id, CameraState::Streaming).await;

        let started = Instant::now();
        h.manager.stop_camera(&id).await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(2));
        assert!(!h.manager.is_running(&id));

        let counters = h.factory.counters("roof");
        assert_eq!(counters.open(), 0);
        assert_eq!(counters.closes(), 0);
        assert_eq!(h.manager.status(&id).unwrap().state, CameraState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_queue_drops_frames_without_stalling() {
        let h = harness(test_config());
        h.submitter.reject.store(true, Ordering::SeqCst);
        let id = CameraId::from("lobby");
        h.manager
            .register_camera(camera("lobby", "stub://lobby?fps=10"))
            .unwrap();
        h.manager.start_camera(&id).unwrap();
        wait_for_state(&h.manager, &id, CameraState::Streaming).await;

        tokio::time::sleep(Duration::from_secs(2)).await;
        let snapshot = h.manager.status(&id).unwrap();
        assert_eq!(snapshot.state, CameraState::Streaming);
        assert!(snapshot.frames_received >= 15, "received {}", snapshot.frames_received);
        assert_eq!(snapshot.frames_dropped, snapshot.frames_received);
        assert_eq!(snapshot.frames_submitted, 0);

        h.submitter.reject.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(h.manager.status(&id).unwrap().frames_submitted > 0);

        let requests = h.submitter.requests.lock().unwrap();
        let request = &requests[0];
        assert_eq!(request.source, RequestSource::Camera);
        assert_eq!(request.camera_id, Some(id.clone()));
        assert_eq!(request.priority, Priority::LOW);
        drop(requests);

        h.manager.stop_camera(&id).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limiter_skips_frames() {
        let h = harness(test_config());
        let id = CameraId::from("lobby");
        h.manager
            .register_camera(CameraConfig::new("lobby", "stub://lobby?fps=20", "yolov8n").with_max_fps(Some(1.0)))
            .unwrap();
        h.manager.start_camera(&id).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        let snapshot = h.manager.status(&id).unwrap();
        assert!(snapshot.frames_submitted >= 1);
        assert!(snapshot.frames_skipped >= 1);
        assert_eq!(
            snapshot.frames_submitted + snapshot.frames_skipped,
            snapshot.frames_received
        );
        assert_eq!(
            h.submitter.accepted.load(Ordering::SeqCst),
            snapshot.frames_submitted
        );

        h.manager.stop_camera(&id).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_motion_events_emitted() {
        let h = harness(test_config());
        let id = CameraId::from("door");
        let motion = MotionConfig {
            pixel_threshold: 30,
            min_changed_pixels: 100,
        };
        h.manager
            .register_camera(camera("door", "stub://door?motion_every=3").with_motion(motion))
            .unwrap();
        h.manager.start_camera(&id).unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        h.manager.stop_camera(&id).await.unwrap();

        let motions = h
            .sink
            .events_for(&id)
            .into_iter()
            .filter(|event| matches!(event, CameraEvent::Motion { .. }))
            .count();
        assert!(motions >= 2, "motion events: {}", motions);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lifecycle_errors_and_stats() {
        let h = harness(test_config());
        let unknown = CameraId::from("nope");
        assert!(matches!(
            h.manager.start_camera(&unknown),
            Err(StreamError::CameraNotFound(_))
        ));
        assert!(h.manager.stop_camera(&unknown).await.is_err());

        h.manager
            .register_camera(camera("ftp", "ftp://10.0.0.9/stream"))
            .unwrap();
        assert!(matches!(
            h.manager.start_camera(&CameraId::from("ftp")),
            Err(StreamError::UnsupportedScheme(_))
        ));

        let id = CameraId::from("lobby");
        h.manager.register_camera(camera("lobby", "stub://lobby")).unwrap();
        assert_eq!(h.manager.status(&id).unwrap().state, CameraState::Disconnected);

        h.manager.start_camera(&id).unwrap();
        h.manager.start_camera(&id).unwrap();
        wait_for_state(&h.manager, &id, CameraState::Streaming).await;
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(h.manager.latest_frame(&id).is_some());
        assert_eq!(h.factory.counters("lobby").connects(), 1);

        let stats = h.manager.stats();
        assert_eq!(stats.len(), 2);
        let lobby = stats.iter().find(|s| s.camera_id == id).unwrap();
        assert!(lobby.running);
        assert!(lobby.frames_received > 0);

        h.manager.remove_camera(&id).await.unwrap();
        assert_eq!(h.factory.counters("lobby").open(), 0);
        assert!(h.manager.status(&id).is_err());
        assert_eq!(h.manager.list().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_all() {
        let h = harness(test_config());
        for name in ["a", "b", "c"] {
            h.manager
                .register_camera(camera(name, &format!("stub://{}", name)))
                .unwrap();
        }
        h.manager
            .register_camera(CameraConfig {
                enabled: false,
                ..camera("off", "stub://off")
            })
            .unwrap();
        assert_eq!(h.manager.start_enabled(), 3);
        wait_for_state(&h.manager, &CameraId::from("c"), CameraState::Streaming).await;

        h.manager.stop_all().await;
        for name in ["a", "b", "c"] {
            assert_eq!(h.factory.counters(name).open(), 0);
            assert!(!h.manager.is_running(&CameraId::from(name)));
        }
    }
}
