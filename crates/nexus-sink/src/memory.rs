//! In-memory sink.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use nexus_models::{CameraEvent, CameraId, InferenceResult, JobId};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::error::SinkResult;
use crate::sink::ResultSink;

/// An event as published on the feed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredEvent {
    pub camera_id: CameraId,
    #[serde(flatten)]
    pub event: CameraEvent,
}

#[derive(Default)]
struct Store {
    results: HashMap<JobId, InferenceResult>,
    order: VecDeque<JobId>,
    events: VecDeque<StoredEvent>,
}

/// Bounded in-memory sink.
///
/// Keeps the most recent `capacity` results and events and republishes
/// every event on a broadcast channel for live subscribers.
pub struct MemorySink {
    store: Mutex<Store>,
    feed: broadcast::Sender<StoredEvent>,
    capacity: usize,
}

impl MemorySink {
    pub fn new(capacity: usize) -> Self {
        let (feed, _) = broadcast::channel(capacity.clamp(1, 4096));
        Self {
            store: Mutex::new(Store::default()),
            feed,
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Live event feed. Slow subscribers skip events rather than block the sink.
    pub fn subscribe(&self) -> broadcast::Receiver<StoredEvent> {
        self.feed.subscribe()
    }

    pub fn result(&self, job_id: &JobId) -> Option<InferenceResult> {
        self.lock().results.get(job_id).cloned()
    }

    pub fn result_count(&self) -> usize {
        self.lock().results.len()
    }

    /// Retained events for one camera, oldest first.
    pub fn events_for(&self, camera_id: &CameraId) -> Vec<CameraEvent> {
        self.lock()
            .events
            .iter()
            .filter(|e| &e.camera_id == camera_id)
            .map(|e| e.event.clone())
            .collect()
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl ResultSink for MemorySink {
    async fn store(&self, job_id: &JobId, result: &InferenceResult) -> SinkResult<()> {
        let mut store = self.lock();
        if store.results.insert(job_id.clone(), result.clone()).is_none() {
            store.order.push_back(job_id.clone());
        }
        while store.order.len() > self.capacity {
            if let Some(evicted) = store.order.pop_front() {
                store.results.remove(&evicted);
            }
        }
        Ok(())
    }

    async fn emit(&self, camera_id: &CameraId, event: CameraEvent) -> SinkResult<()> {
        let stored = StoredEvent {
            camera_id: camera_id.clone(),
            event,
        };
        {
            let mut store = self.lock();
            store.events.push_back(stored.clone());
            while store.events.len() > self.capacity {
                store.events.pop_front();
            }
        }
        // No subscribers is fine.
        let _ = self.feed.send(stored);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use chrono::Utc;
    use nexus_models::CameraState;

    fn result(job_id: &JobId) -> InferenceResult {
        InferenceResult {
            job_id: job_id.clone(),
            model_id: "yolov8n".into(),
            camera_id: None,
            detections: Vec::new(),
            error: None,
            processing_duration: Duration::from_millis(3),
        }
    }

    #[tokio::test]
    async fn test_results_are_bounded() {
        let sink = MemorySink::new(2);
        let ids: Vec<JobId> = (0..3).map(|_| JobId::new()).collect();
        for id in &ids {
            sink.store(id, &result(id)).await.unwrap();
        }
        assert_eq!(sink.result_count(), 2);
        assert!(sink.result(&ids[0]).is_none());
        assert!(sink.result(&ids[2]).is_some());
    }

    #[tokio::test]
    async fn test_events_published_to_subscribers() {
        let sink = MemorySink::default();
        let mut feed = sink.subscribe();
        let camera = CameraId::from("cam-1");

        let event = CameraEvent::state_changed(
            CameraState::Connecting,
            CameraState::Streaming,
            None,
        );
        sink.emit(&camera, event.clone()).await.unwrap();

        let received = feed.recv().await.unwrap();
        assert_eq!(received.camera_id, camera);
        assert_eq!(received.event, event);
        assert_eq!(sink.events_for(&camera), vec![event]);
        assert!(sink.events_for(&CameraId::from("other")).is_empty());
    }

    #[test]
    fn test_stored_event_serializes_flat() {
        let stored = StoredEvent {
            camera_id: CameraId::from("cam-1"),
            event: CameraEvent::Motion {
                changed_pixels: 9000,
                at: Utc::now(),
            },
        };
        let value = serde_json::to_value(&stored).unwrap();
        assert_eq!(value["camera_id"], "cam-1");
        assert_eq!(value["type"], "motion");
    }
}
