//! Per-camera frame rate limiter.

use std::num::NonZeroU32;
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};

/// Rate limiter type alias.
type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Admits at most `max_fps` frames per second, with no burst.
///
/// Frames over the limit are skipped, never delayed.
pub struct FrameLimiter {
    limiter: DirectRateLimiter,
    max_fps: f64,
}

impl FrameLimiter {
    /// Returns `None` for a non-positive or non-finite rate.
    pub fn new(max_fps: f64) -> Option<Self> {
        if !(max_fps.is_finite() && max_fps > 0.0) {
            return None;
        }
        let period = Duration::from_secs_f64(1.0 / max_fps);
        let quota = Quota::with_period(period)?.allow_burst(NonZeroU32::MIN);
        Some(Self {
            limiter: RateLimiter::direct(quota),
            max_fps,
        })
    }

    /// Whether the current frame may be submitted.
    pub fn allow(&self) -> bool {
        self.limiter.check().is_ok()
    }

    pub fn max_fps(&self) -> f64 {
        self.max_fps
    }
}

impl std::fmt::Debug for FrameLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameLimiter")
            .field("max_fps", &self.max_fps)
            .finish()
    }
}
