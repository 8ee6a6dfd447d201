//! Inference request definitions.

use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::camera::CameraId;
use crate::job::JobId;

/// Scheduling priority. Higher values are served first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(transparent)]
pub struct Priority(pub i32);

impl Priority {
    /// Default for camera frames.
    pub const LOW: Priority = Priority(0);
    /// Default for API requests.
    pub const NORMAL: Priority = Priority(5);
    /// Interactive requests.
    pub const HIGH: Priority = Priority(10);

    pub fn value(&self) -> i32 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::NORMAL
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a request came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum RequestSource {
    #[default]
    Api,
    Camera,
}

impl RequestSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestSource::Api => "api",
            RequestSource::Camera => "camera",
        }
    }
}

/// Kind of vision task to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum InferenceTask {
    #[default]
    Detect,
    Segment,
    Track,
}

impl InferenceTask {
    pub fn as_str(&self) -> &'static str {
        match self {
            InferenceTask::Detect => "detect",
            InferenceTask::Segment => "segment",
            InferenceTask::Track => "track",
        }
    }
}

impl fmt::Display for InferenceTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Image to run inference on.
#[derive(Clone, PartialEq, Eq)]
pub enum ImagePayload {
    /// Encoded image bytes (JPEG/PNG) held in memory.
    Inline(Bytes),
    /// Object-store reference resolved by the executor.
    Reference(String),
}

impl ImagePayload {
    pub fn inline(bytes: impl Into<Bytes>) -> Self {
        Self::Inline(bytes.into())
    }

    pub fn reference(key: impl Into<String>) -> Self {
        Self::Reference(key.into())
    }

    /// Size of the inline payload in bytes (0 for references).
    pub fn len(&self) -> usize {
        match self {
            ImagePayload::Inline(bytes) => bytes.len(),
            ImagePayload::Reference(_) => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            ImagePayload::Inline(bytes) => bytes.is_empty(),
            ImagePayload::Reference(key) => key.is_empty(),
        }
    }
}

// Never print image bytes.
impl fmt::Debug for ImagePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImagePayload::Inline(bytes) => write!(f, "Inline({} bytes)", bytes.len()),
            ImagePayload::Reference(key) => f.debug_tuple("Reference").field(key).finish(),
        }
    }
}

/// A request for one model run on one image.
///
/// `id` and `submitted_at` are stamped by the queue at admission; after that
/// the request is shared immutably.
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    pub id: JobId,
    pub image: ImagePayload,
    pub model_id: String,
    pub task: InferenceTask,
    pub priority: Priority,
    pub submitted_at: DateTime<Utc>,
    /// Advisory completion deadline, used by the worker to bound execution.
    pub deadline: Option<DateTime<Utc>>,
    pub source: RequestSource,
    pub camera_id: Option<CameraId>,
}

impl InferenceRequest {
    /// Create an API request with normal priority.
    pub fn api(model_id: impl Into<String>, image: ImagePayload) -> Self {
        Self {
            id: JobId::new(),
            image,
            model_id: model_id.into(),
            task: InferenceTask::default(),
            priority: Priority::NORMAL,
            submitted_at: Utc::now(),
            deadline: None,
            source: RequestSource::Api,
            camera_id: None,
        }
    }

    /// Create a camera-frame request with low priority.
    pub fn camera(camera_id: CameraId, model_id: impl Into<String>, image: ImagePayload) -> Self {
        Self {
            source: RequestSource::Camera,
            camera_id: Some(camera_id),
            priority: Priority::LOW,
            ..Self::api(model_id, image)
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_task(mut self, task: InferenceTask) -> Self {
        self.task = task;
        self
    }
}
