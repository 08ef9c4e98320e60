//! Shared monotonic origin for presentation timestamps
//!
//! The coordinator captures one instant when a recording enters preparation
//! and hands read-only clones to every stream, so audio and video derive
//! their timestamps from the same zero.

use std::sync::Arc;
use std::time::{Duration, Instant};

/// Monotonic recording clock
///
/// All timestamps derive from this single origin
/// to keep the two streams on one timeline.
#[derive(Debug, Clone)]
pub struct RecordingClock {
    origin: Arc<Instant>,
}

impl RecordingClock {
    /// Create a clock with the current instant as time zero
    pub fn new() -> Self {
        Self::from_instant(Instant::now())
    }

    /// Create a clock from an existing origin
    pub fn from_instant(origin: Instant) -> Self {
        Self {
            origin: Arc::new(origin),
        }
    }

    /// Time zero of the recording
    pub fn origin(&self) -> Instant {
        *self.origin
    }

    /// Elapsed time at `now`, saturating to zero for instants before the origin
    #[inline]
    pub fn elapsed_at(&self, now: Instant) -> Duration {
        now.saturating_duration_since(*self.origin)
    }

    /// Elapsed microseconds at `now`
    #[inline]
    pub fn elapsed_us_at(&self, now: Instant) -> i64 {
        self.elapsed_at(now).as_micros() as i64
    }

    /// Elapsed microseconds since the origin
    #[inline]
    pub fn elapsed_us(&self) -> i64 {
        self.elapsed_us_at(Instant::now())
    }
}

impl Default for RecordingClock {
    fn default() -> Self {
        Self::new()
    }
}
