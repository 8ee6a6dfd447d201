//! Job identifiers, lifecycle states and job snapshots.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::camera::CameraId;
use crate::detection::InferenceResult;
use crate::request::{InferenceTask, Priority, RequestSource};

/// Unique identifier for an inference job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Job lifecycle state.
///
/// `Queued → Running → {Completed | Failed | TimedOut | Cancelled}`.
/// Terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting in the priority queue
    #[default]
    Queued,
    /// Held by exactly one worker
    Running,
    /// Executor returned detections
    Completed,
    /// Executor returned an error or panicked
    Failed,
    /// Executor exceeded the job deadline
    TimedOut,
    /// Cancelled before it ran, or its result was discarded
    Cancelled,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::TimedOut => "timed_out",
            JobState::Cancelled => "cancelled",
        }
    }

    /// Check if this is a terminal state (no more updates expected).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::TimedOut | JobState::Cancelled
        )
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    ///
    /// A running job may only become `Cancelled` post-hoc, when its result is
    /// discarded after a cooperative cancel.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        match (self, next) {
            (JobState::Queued, JobState::Running) => true,
            (JobState::Queued, JobState::Cancelled) => true,
            (JobState::Queued | JobState::Running, JobState::Failed | JobState::TimedOut) => true,
            (JobState::Running, JobState::Completed | JobState::Cancelled) => true,
            _ => false,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Point-in-time view of a job, as returned by status queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct InferenceJob {
    pub id: JobId,
    pub model_id: String,
    pub task: InferenceTask,
    pub priority: Priority,
    pub source: RequestSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub camera_id: Option<CameraId>,
    pub state: JobState,
    /// Number of times a worker picked the job up (0 or 1, jobs are not retried)
    pub attempts: u32,
    pub submitted_at: DateTime<Utc>,
    pub enqueued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub deadline: Option<DateTime<Utc>>,
    pub error: Option<String>,
    /// Number of detections, once completed
    pub detection_count: Option<usize>,
}

impl InferenceJob {
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Time spent waiting in the queue, if the job has started.
    pub fn queue_wait(&self) -> Option<chrono::Duration> {
        self.started_at.map(|started| started - self.enqueued_at)
    }
}

/// How a worker finished a job.
#[derive(Debug, Clone)]
pub enum JobOutcome {
    Completed(InferenceResult),
    Failed(String),
    TimedOut(Duration),
    /// The run was interrupted by a cooperative cancel.
    Cancelled,
}

impl JobOutcome {
    /// State this outcome settles the job into.
    pub fn state(&self) -> JobState {
        match self {
            JobOutcome::Completed(_) => JobState::Completed,
            JobOutcome::Failed(_) => JobState::Failed,
            JobOutcome::TimedOut(_) => JobState::TimedOut,
            JobOutcome::Cancelled => JobState::Cancelled,
        }
    }
}

/// Terminal failure of a job, as seen by a caller awaiting its result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    #[error("Execution failed: {0}")]
    Execution(String),

    #[error("Execution timed out after {0:?}")]
    TimedOut(Duration),

    #[error("Job was cancelled")]
    Cancelled,
}

impl JobError {
    pub fn execution(msg: impl Into<String>) -> Self {
        Self::Execution(msg.into())
    }
}
