//! Silence detection and fill
//!
//! [`SilenceMonitor`] tracks runs of silent frames and raises a one-shot
//! warning. [`SilentFiller`] rewrites silent frames according to the
//! configured [`SilentFillMode`] before they reach the encoder.

use std::time::{Duration, Instant};

use super::mixer::to_le_bytes;
use super::types::{SilentFillConfig, SilentFillMode};

/// Frames whose peak magnitude is below this are silent
pub const SILENCE_THRESHOLD: i32 = 50;

/// Consecutive silent frames before the warning fires
pub const SILENCE_WARNING_FRAMES: u32 = 10;

pub fn is_silent(max_magnitude: i32) -> bool {
    max_magnitude < SILENCE_THRESHOLD
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SilenceObservation {
    pub silent: bool,
    /// True exactly once per silent run, when it reaches the warning threshold
    pub warn: bool,
    pub consecutive: u32,
}

/// Consecutive-silence counter for one audio path
#[derive(Debug, Default)]
pub struct SilenceMonitor {
    consecutive: u32,
    warned: bool,
}

impl SilenceMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, max_magnitude: i32) -> SilenceObservation {
        if !is_silent(max_magnitude) {
            if self.warned {
                log::info!(
                    "Audio signal recovered after {} silent frames (peak {})",
                    self.consecutive,
                    max_magnitude
                );
            }
            self.consecutive = 0;
            self.warned = false;
            return SilenceObservation {
                silent: false,
                warn: false,
                consecutive: 0,
            };
        }

        self.consecutive = self.consecutive.saturating_add(1);
        let warn = !self.warned && self.consecutive >= SILENCE_WARNING_FRAMES;
        if warn {
            self.warned = true;
            log::warn!(
                "{} consecutive silent audio frames, capture may be producing no signal",
                self.consecutive
            );
        }

        SilenceObservation {
            silent: true,
            warn,
            consecutive: self.consecutive,
        }
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }
}

/// Rewrites silent frames before encoding
pub struct SilentFiller {
    config: SilentFillConfig,
    skip_counter: u32,
    started_at: Instant,
    rng: fastrand::Rng,
}

impl SilentFiller {
    pub fn new(config: SilentFillConfig, started_at: Instant) -> Self {
        Self {
            config,
            skip_counter: 0,
            started_at,
            rng: fastrand::Rng::new(),
        }
    }

    /// Deterministic noise for reproducible output
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = fastrand::Rng::with_seed(seed);
        self
    }

    pub fn config(&self) -> &SilentFillConfig {
        &self.config
    }

    /// Bytes to feed the encoder for a silent frame, or `None` to drop it
    pub fn apply(&mut self, samples: &[i16], now: Instant) -> Option<Vec<u8>> {
        match self.config.mode {
            SilentFillMode::LowAmplitudeNoise => Some(self.noise(samples.len())),
            SilentFillMode::FixedLowValue => Some(fixed_low_value(samples.len())),
            SilentFillMode::ReducedSampleRate => {
                self.skip_counter += 1;
                if self.skip_counter >= self.config.skip_interval.max(1) {
                    self.skip_counter = 0;
                    Some(fixed_low_value(samples.len()))
                } else {
                    None
                }
            }
            SilentFillMode::ZeroWithPtsCompensation => Some(vec![0u8; samples.len() * 2]),
            SilentFillMode::Hybrid => {
                let initial = Duration::from_millis(self.config.initial_period_ms.max(0) as u64);
                if now.saturating_duration_since(self.started_at) < initial {
                    Some(to_le_bytes(samples))
                } else {
                    Some(self.noise(samples.len()))
                }
            }
        }
    }

    fn noise(&mut self, len: usize) -> Vec<u8> {
        let amplitude = self.config.noise_amplitude.abs().min(i16::MAX as i32);
        let mut out = Vec::with_capacity(len * 2);
        for _ in 0..len {
            let value = self.rng.i32(-amplitude..=amplitude) as i16;
            out.extend_from_slice(&value.to_le_bytes());
        }
        out
    }
}

/// Alternating +1 / -1 pattern, little-endian
pub fn fixed_low_value(len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len * 2);
    for i in 0..len {
        let value: i16 = if i % 2 == 0 { 1 } else { -1 };
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_low_value_pattern() {
        let mut filler = SilentFiller::new(
            SilentFillConfig::default().with_mode(SilentFillMode::FixedLowValue),
            Instant::now(),
        );
        let out = filler.apply(&[0i16; 100], Instant::now()).unwrap();
        assert_eq!(out.len(), 200);
        for chunk in out.chunks(4) {
            assert_eq!(chunk, [0x01, 0x00, 0xFF, 0xFF]);
        }
    }

    #[test]
    fn test_reduced_sample_rate_forwards_one_in_interval() {
        let mut filler = SilentFiller::new(
            SilentFillConfig::default()
                .with_mode(SilentFillMode::ReducedSampleRate)
                .with_skip_interval(5),
            Instant::now(),
        );
        let now = Instant::now();
        let forwarded: Vec<Vec<u8>> = (0..20)
            .filter_map(|_| filler.apply(&[0i16; 64], now))
            .collect();
        assert_eq!(forwarded.len(), 4);
        assert!(forwarded.iter().all(|f| *f == fixed_low_value(64)));
    }

    #[test]
    fn test_noise_stays_within_amplitude() {
        let mut filler = SilentFiller::new(
            SilentFillConfig::default().with_noise_amplitude(3),
            Instant::now(),
        )
        .with_seed(7);
        let out = filler.apply(&[0i16; 512], Instant::now()).unwrap();
        assert_eq!(out.len(), 1024);
        for pair in out.chunks(2) {
            let v = i16::from_le_bytes([pair[0], pair[1]]);
            assert!((-3..=3).contains(&v));
        }
    }

    #[test]
    fn test_zero_fill_preserves_length() {
        let mut filler = SilentFiller::new(
            SilentFillConfig::default().with_mode(SilentFillMode::ZeroWithPtsCompensation),
            Instant::now(),
        );
        let out = filler.apply(&[3i16; 10], Instant::now()).unwrap();
        assert_eq!(out, vec![0u8; 20]);
    }

    #[test]
    fn test_hybrid_switches_after_initial_period() {
        let start = Instant::now();
        let mut filler = SilentFiller::new(
            SilentFillConfig::default()
                .with_mode(SilentFillMode::Hybrid)
                .with_initial_period_ms(1000)
                .with_noise_amplitude(0),
            start,
        );
        let raw = [7i16, -7];
        assert_eq!(filler.apply(&raw, start).unwrap(), to_le_bytes(&raw));
        assert_eq!(
            filler.apply(&raw, start + Duration::from_millis(1500)).unwrap(),
            vec![0u8; 4]
        );
    }

    #[test]
    fn test_monitor_warns_once_per_run() {
        let mut monitor = SilenceMonitor::new();
        let warnings: usize = (0..25).filter(|_| monitor.observe(0).warn).count();
        assert_eq!(warnings, 1);
        assert_eq!(monitor.consecutive(), 25);

        assert!(!monitor.observe(1000).silent);
        assert_eq!(monitor.consecutive(), 0);

        let rearmed = (0..SILENCE_WARNING_FRAMES).filter(|_| monitor.observe(10).warn).count();
        assert_eq!(rearmed, 1);
    }

    #[test]
    fn test_threshold_boundary() {
        assert!(is_silent(49));
        assert!(!is_silent(50));
    }
}
