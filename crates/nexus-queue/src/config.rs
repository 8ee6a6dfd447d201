//! Queue configuration.

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum number of queued (not yet running) jobs
    pub capacity: usize,
    /// Maximum queued + running jobs per camera (0 disables the limit)
    pub max_inflight_per_camera: usize,
    /// Terminal job records kept for status queries
    pub max_retained_jobs: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 256,
            max_inflight_per_camera: 4,
            max_retained_jobs: 10_000,
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            capacity: std::env::var("QUEUE_CAPACITY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.capacity),
            max_inflight_per_camera: std::env::var("QUEUE_MAX_INFLIGHT_PER_CAMERA")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_inflight_per_camera),
            max_retained_jobs: std::env::var("QUEUE_MAX_RETAINED_JOBS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_retained_jobs),
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_max_inflight_per_camera(mut self, limit: usize) -> Self {
        self.max_inflight_per_camera = limit;
        self
    }

    pub fn with_max_retained_jobs(mut self, limit: usize) -> Self {
        self.max_retained_jobs = limit;
        self
    }
}
