//! Audio presentation timestamps

use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::timing::RecordingClock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioPtsMode {
    /// Elapsed wall-clock time since the shared origin
    WallClock,
    /// Accumulated sample duration, re-anchored when it drifts
    SampleCount,
}

/// Computes the timestamp of each frame fed to the audio encoder
#[derive(Debug, Clone)]
pub struct AudioPtsPolicy {
    mode: AudioPtsMode,
    clock: RecordingClock,
    sample_rate: u32,
    channels: u16,
    last_pts_us: Option<i64>,
}

impl AudioPtsPolicy {
    pub fn new(mode: AudioPtsMode, clock: RecordingClock, sample_rate: u32, channels: u16) -> Self {
        Self {
            mode,
            clock,
            sample_rate,
            channels,
            last_pts_us: None,
        }
    }

    pub fn mode(&self) -> AudioPtsMode {
        self.mode
    }

    /// Duration of `samples` interleaved samples in microseconds
    pub fn frame_duration_us(&self, samples: usize) -> i64 {
        let per_second = self.sample_rate as i64 * self.channels.max(1) as i64;
        if per_second == 0 {
            return 0;
        }
        samples as i64 * 1_000_000 / per_second
    }

    /// Timestamp for a frame of `samples` interleaved samples acquired at `now`
    pub fn next_pts(&mut self, now: Instant, samples: usize) -> i64 {
        match self.mode {
            AudioPtsMode::WallClock => self.clock.elapsed_us_at(now),
            AudioPtsMode::SampleCount => {
                let frame_us = self.frame_duration_us(samples);
                let observed = (self.clock.elapsed_us_at(now) - frame_us).max(0);
                let mut current = self.last_pts_us.unwrap_or(observed);
                if observed - current > 2 * frame_us {
                    log::debug!(
                        "Audio timeline drifted {}us behind capture, re-anchoring",
                        observed - current
                    );
                    current = observed;
                }
                self.last_pts_us = Some(current + frame_us);
                current
            }
        }
    }
}
