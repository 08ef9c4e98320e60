//! Pause bookkeeping and per-track timestamp normalization

use std::time::{Duration, Instant};

use super::config::PtsMode;
use crate::assert_invariant;
use crate::timing::RecordingClock;

/// Minimum step applied when a track's timestamp would go backwards
pub const MONOTONIC_STEP_US: i64 = 1_000;

/// Accumulates the time spent paused
#[derive(Debug, Clone, Default)]
pub struct PauseClock {
    paused_at: Option<Instant>,
    paused_total: Duration,
}

impl PauseClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if already paused
    pub fn pause(&mut self, at: Instant) -> bool {
        if self.paused_at.is_some() {
            return false;
        }
        self.paused_at = Some(at);
        true
    }

    /// Close the current pause interval and return its length
    pub fn resume(&mut self, at: Instant) -> Option<Duration> {
        let started = self.paused_at.take()?;
        let interval = at.saturating_duration_since(started);
        self.paused_total += interval;
        Some(interval)
    }

    pub fn is_paused(&self) -> bool {
        self.paused_at.is_some()
    }

    pub fn paused_total(&self) -> Duration {
        self.paused_total
    }

    pub fn paused_total_us(&self) -> i64 {
        self.paused_total.as_micros().min(i64::MAX as u128) as i64
    }
}

/// Output timeline of one track
#[derive(Debug, Clone, Default)]
pub struct TrackTimeline {
    last_pts_us: Option<i64>,
    offset_us: Option<i64>,
}

impl TrackTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map an encoder timestamp onto the shared output timeline
    pub fn normalize(
        &mut self,
        mode: PtsMode,
        clock: &RecordingClock,
        pause: &PauseClock,
        raw_pts_us: i64,
        now: Instant,
    ) -> i64 {
        let pts = match mode {
            PtsMode::WallClock => clock.elapsed_us_at(now) - pause.paused_total_us(),
            PtsMode::EncoderRelative => {
                let offset = *self.offset_us.get_or_insert(raw_pts_us);
                raw_pts_us - offset - pause.paused_total_us()
            }
        }
        .max(0);

        let pts = match self.last_pts_us {
            Some(last) if pts < last => {
                log::debug!("Timestamp {}us regressed below {}us, clamping", pts, last);
                last + MONOTONIC_STEP_US
            }
            _ => pts,
        };

        assert_invariant!(
            self.last_pts_us.map_or(true, |last| pts >= last),
            "Track timestamps never decrease",
            "recording::timeline"
        );
        self.last_pts_us = Some(pts);
        pts
    }

    pub fn last_pts_us(&self) -> Option<i64> {
        self.last_pts_us
    }
}
