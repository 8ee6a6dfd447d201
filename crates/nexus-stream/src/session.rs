//! Per-camera session task.
//!
//! Each session owns one frame source and runs the connection state machine:
//!
//! ```text
//! Disconnected -> Connecting -> Streaming -> Backoff -> Connecting -> ...
//! ```
//!
//! Connect failures, stream drops and idle timeouts all lead to `Backoff`.
//! Stopping moves any state to `Disconnected` and closes the source.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use nexus_models::{
    CameraEvent, CameraSession, CameraState, InferenceRequest, JobId,
};
use nexus_queue::{AdmissionResult, PriorityQueue};
use nexus_sink::ResultSink;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::backoff::BackoffPolicy;
use crate::config::{CameraConfig, StreamConfig};
use crate::error::{StreamError, StreamResult};
use crate::frame::{Frame, FrameFormat};
use crate::limiter::FrameLimiter;
use crate::metrics;
use crate::motion::MotionDetector;
use crate::source::FrameSource;

/// Where camera frames go. Submission never blocks; a refusal drops the frame.
pub trait FrameSubmitter: Send + Sync {
    fn submit_frame(&self, request: InferenceRequest) -> AdmissionResult<JobId>;
}

impl FrameSubmitter for PriorityQueue {
    fn submit_frame(&self, request: InferenceRequest) -> AdmissionResult<JobId> {
        self.submit(request)
    }
}

/// State visible outside the session task.
pub(crate) struct SessionShared {
    snapshot: Mutex<CameraSession>,
    latest: Mutex<Option<Frame>>,
}

impl SessionShared {
    fn new(camera: &CameraConfig) -> Self {
        Self {
            snapshot: Mutex::new(CameraSession::disconnected(
                camera.id.clone(),
                camera.url.clone(),
            )),
            latest: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CameraSession> {
        self.snapshot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update<R>(&self, f: impl FnOnce(&mut CameraSession) -> R) -> R {
        f(&mut self.lock())
    }

    pub(crate) fn snapshot(&self) -> CameraSession {
        self.lock().clone()
    }

    pub(crate) fn latest_frame(&self) -> Option<Frame> {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_latest(&self, frame: Frame) {
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner) = Some(frame);
    }
}

/// Handle to a running session, held by the stream manager.
pub(crate) struct SessionHandle {
    pub(crate) shared: Arc<SessionShared>,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    pub(crate) fn spawn(
        camera: CameraConfig,
        config: &StreamConfig,
        source: Box<dyn FrameSource>,
        submitter: Arc<dyn FrameSubmitter>,
        sink: Arc<dyn ResultSink>,
    ) -> Self {
        let shared = Arc::new(SessionShared::new(&camera));
        let (stop, stop_rx) = watch::channel(false);

        let session = Session {
            backoff: BackoffPolicy::from(config),
            limiter: camera.max_fps.and_then(FrameLimiter::new),
            motion: camera.motion.map(MotionDetector::new),
            camera,
            config: config.clone(),
            source,
            submitter,
            sink,
            shared: Arc::clone(&shared),
            stop: stop_rx,
            ever_connected: false,
        };
        let task = tokio::spawn(session.run());

        Self { shared, stop, task }
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Signal the session and wait for it to close its source.
    ///
    /// Returns `false` if the task had to be aborted after `timeout`. The
    /// source is then dropped without `close`, so sources release their
    /// connection on drop as well.
    pub(crate) async fn stop(mut self, timeout: Duration) -> bool {
        self.stop.send_replace(true);
        if tokio::time::timeout(timeout, &mut self.task).await.is_ok() {
            return true;
        }

        self.task.abort();
        if (&mut self.task).await.is_ok() {
            // finished on its own before the abort landed
            return true;
        }
        let from = self.shared.update(|s| {
            s.last_error = Some("stopped (source close skipped)".to_string());
            std::mem::replace(&mut s.state, CameraState::Disconnected)
        });
        metrics::record_transition(from, CameraState::Disconnected);
        metrics::record_session(CameraState::Disconnected, -1.0);
        false
    }
}

/// Resolves once stop is requested or the handle is gone.
async fn stop_requested(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|stopped| *stopped).await;
}

enum StreamEnd {
    Stopped,
    Failed(String),
}

enum StreamEvent {
    Stop,
    Stable,
    Frame(StreamResult<Frame>),
}

struct Session {
    camera: CameraConfig,
    config: StreamConfig,
    backoff: BackoffPolicy,
    source: Box<dyn FrameSource>,
    submitter: Arc<dyn FrameSubmitter>,
    sink: Arc<dyn ResultSink>,
    shared: Arc<SessionShared>,
    stop: watch::Receiver<bool>,
    limiter: Option<FrameLimiter>,
    motion: Option<MotionDetector>,
    ever_connected: bool,
}

impl Session {
    async fn run(mut self) {
        metrics::record_session(CameraState::Disconnected, 1.0);
        info!(camera_id = %self.camera.id, url = %self.camera.url, "Camera session started");

        self.run_until_stopped().await;

        self.source.close().await;
        self.transition(CameraState::Disconnected, Some("stopped".to_string()))
            .await;
        metrics::record_session(CameraState::Disconnected, -1.0);
        info!(camera_id = %self.camera.id, "Camera session stopped");
    }

    async fn run_until_stopped(&mut self) {
        loop {
            self.transition(CameraState::Connecting, None).await;

            let connect_timeout = self.config.connect_timeout;
            let target = self.camera.url.clone();
            let attempt = tokio::select! {
                biased;
                _ = stop_requested(&mut self.stop) => None,
                result = tokio::time::timeout(connect_timeout, self.source.connect(&target)) => Some(result),
            };

            let error = match attempt {
                None => return,
                Some(Ok(Ok(()))) => match self.stream().await {
                    StreamEnd::Stopped => return,
                    StreamEnd::Failed(reason) => reason,
                },
                Some(Ok(Err(e))) => e.to_string(),
                Some(Err(_)) => format!("connect timed out after {:?}", connect_timeout),
            };

            self.source.close().await;
            let retry = self.record_failure(&error);
            let delay = self.backoff.delay(retry);
            debug!(
                camera_id = %self.camera.id,
                retry,
                delay_ms = delay.as_millis() as u64,
                "Backing off before reconnect"
            );
            self.transition(CameraState::Backoff, Some(error)).await;

            let stopped = tokio::select! {
                biased;
                _ = stop_requested(&mut self.stop) => true,
                _ = tokio::time::sleep(delay) => false,
            };
            if stopped {
                return;
            }
        }
    }

    /// Pull frames until the stream fails or stop is requested.
    async fn stream(&mut self) -> StreamEnd {
        self.shared.update(|s| {
            s.connected_at = Some(Utc::now());
            if self.ever_connected {
                s.reconnects += 1;
            }
        });
        self.ever_connected = true;
        if let Some(detector) = &mut self.motion {
            detector.reset();
        }
        self.transition(CameraState::Streaming, None).await;

        let stable = tokio::time::sleep(self.config.stable_window);
        tokio::pin!(stable);
        let mut stable_reached = false;
        let frame_timeout = self.config.frame_timeout;

        loop {
            let event = tokio::select! {
                biased;
                _ = stop_requested(&mut self.stop) => StreamEvent::Stop,
                _ = &mut stable, if !stable_reached => StreamEvent::Stable,
                result = tokio::time::timeout(frame_timeout, self.source.next_frame(frame_timeout)) => {
                    StreamEvent::Frame(
                        result.unwrap_or_else(|_| Err(StreamError::FrameTimeout(frame_timeout))),
                    )
                }
            };

            match event {
                StreamEvent::Stop => return StreamEnd::Stopped,
                StreamEvent::Stable => {
                    stable_reached = true;
                    self.reset_retries();
                }
                StreamEvent::Frame(Ok(frame)) => self.handle_frame(frame).await,
                StreamEvent::Frame(Err(e)) => return StreamEnd::Failed(e.to_string()),
            }
        }
    }

    async fn handle_frame(&mut self, frame: Frame) {
        let camera_id = self.camera.id.clone();
        metrics::record_frame_received(&camera_id);
        self.shared.update(|s| {
            s.frames_received += 1;
            s.last_frame_at = Some(frame.captured_at);
        });
        self.shared.set_latest(frame.clone());

        if let Some(changed_pixels) = self.detect_motion(&frame).await {
            debug!(camera_id = %camera_id, changed_pixels, "Motion detected");
            self.emit(CameraEvent::Motion {
                changed_pixels,
                at: frame.captured_at,
            })
            .await;
        }

        if let Some(limiter) = &self.limiter {
            if !limiter.allow() {
                metrics::record_frame_skipped(&camera_id);
                self.shared.update(|s| s.frames_skipped += 1);
                return;
            }
        }

        let payload = match frame.to_payload() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(camera_id = %camera_id, "Dropping undecodable frame: {}", e);
                return;
            }
        };
        let request = InferenceRequest::camera(camera_id.clone(), &self.camera.model_id, payload)
            .with_priority(self.camera.priority)
            .with_task(self.camera.task);

        match self.submitter.submit_frame(request) {
            Ok(job_id) => {
                metrics::record_frame_submitted(&camera_id);
                self.shared.update(|s| s.frames_submitted += 1);
                trace!(camera_id = %camera_id, job_id = %job_id, "Frame submitted");
            }
            Err(e) => {
                metrics::record_frame_dropped(&camera_id, e.reason());
                self.shared.update(|s| s.frames_dropped += 1);
                debug!(camera_id = %camera_id, reason = e.reason(), "Frame dropped");
            }
        }
    }

    /// Changed pixel count when the frame shows motion. JPEG frames are
    /// decoded off the async runtime.
    async fn detect_motion(&mut self, frame: &Frame) -> Option<u64> {
        let result = if frame.format == FrameFormat::Jpeg {
            let mut detector = self.motion.take()?;
            let frame = frame.clone();
            match tokio::task::spawn_blocking(move || {
                let result = detector.observe(&frame);
                (detector, result)
            })
            .await
            {
                Ok((detector, result)) => {
                    self.motion = Some(detector);
                    result
                }
                Err(e) => {
                    warn!(camera_id = %self.camera.id, "Motion detection task failed: {}", e);
                    self.motion = self.camera.motion.map(MotionDetector::new);
                    return None;
                }
            }
        } else {
            self.motion.as_mut()?.observe(frame)
        };

        match result {
            Ok(changed) => changed,
            Err(e) => {
                debug!(camera_id = %self.camera.id, "Motion detection skipped frame: {}", e);
                None
            }
        }
    }

    fn record_failure(&self, error: &str) -> u32 {
        metrics::record_connection_failure(&self.camera.id);
        let retry = self.shared.update(|s| {
            s.retry_count += 1;
            s.last_error = Some(error.to_string());
            s.retry_count
        });
        warn!(
            camera_id = %self.camera.id,
            retry,
            "Camera connection failed: {}", error
        );
        retry
    }

    fn reset_retries(&self) {
        let previous = self.shared.update(|s| std::mem::take(&mut s.retry_count));
        if previous > 0 {
            info!(
                camera_id = %self.camera.id,
                previous,
                "Camera stream stable, retry count reset"
            );
        }
    }

    async fn transition(&self, to: CameraState, reason: Option<String>) {
        let from = self.shared.update(|s| std::mem::replace(&mut s.state, to));
        if from == to {
            return;
        }
        metrics::record_transition(from, to);
        info!(
            camera_id = %self.camera.id,
            from = from.as_str(),
            to = to.as_str(),
            reason = reason.as_deref(),
            "Camera state changed"
        );
        self.emit(CameraEvent::state_changed(from, to, reason)).await;
    }

    async fn emit(&self, event: CameraEvent) {
        let kind = event.kind();
        match tokio::time::timeout(self.config.event_timeout, self.sink.emit(&self.camera.id, event))
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(camera_id = %self.camera.id, event = kind, "Failed to emit camera event: {}", e),
            Err(_) => warn!(camera_id = %self.camera.id, event = kind, "Emitting camera event timed out"),
        }
    }
}
