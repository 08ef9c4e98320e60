//! Source verification and candidate selection
//!
//! Each candidate for a [`SourceKind`] is opened and probed in priority
//! order; the first one carrying a real signal wins. When none does, a
//! fallback pass takes the first candidate that merely starts.

use std::thread;
use std::time::Duration;

use super::source::{AudioBackend, AudioSource, SourceCandidate, SourceState};
use super::types::{CaptureSourceConfig, SourceKind};
use crate::errors::SourceError;

/// Peak magnitude that accepts a source outright
pub const ACCEPT_MAX_MAGNITUDE: i32 = 200;
/// Share of non-zero samples required by the secondary rule
pub const ACCEPT_NON_ZERO_PERCENT: u32 = 30;
/// Mean non-zero magnitude required by the secondary rule
pub const ACCEPT_MEAN_MAGNITUDE: i32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeSettings {
    pub buffers: usize,
    pub samples: usize,
    pub spacing: Duration,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            buffers: 5,
            samples: 1024,
            spacing: Duration::from_millis(30),
        }
    }
}

/// Signal statistics gathered while probing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProbeReport {
    pub max_magnitude: i32,
    pub non_zero: usize,
    pub total: usize,
    pub magnitude_sum: u64,
}

impl ProbeReport {
    pub fn accumulate(&mut self, samples: &[i16]) {
        for sample in samples {
            let magnitude = (*sample as i32).abs();
            self.max_magnitude = self.max_magnitude.max(magnitude);
            if magnitude > 0 {
                self.non_zero += 1;
                self.magnitude_sum += magnitude as u64;
            }
        }
        self.total += samples.len();
    }

    pub fn non_zero_percent(&self) -> u32 {
        if self.total == 0 {
            return 0;
        }
        (self.non_zero * 100 / self.total) as u32
    }

    /// Mean magnitude of the non-zero samples
    pub fn mean_magnitude(&self) -> i32 {
        if self.non_zero == 0 {
            return 0;
        }
        (self.magnitude_sum / self.non_zero as u64) as i32
    }

    pub fn passes(&self) -> bool {
        self.max_magnitude >= ACCEPT_MAX_MAGNITUDE
            || (self.non_zero_percent() >= ACCEPT_NON_ZERO_PERCENT
                && self.mean_magnitude() >= ACCEPT_MEAN_MAGNITUDE)
    }
}

/// Start `source` and sample its signal
pub fn probe(
    source: &mut dyn AudioSource,
    settings: &ProbeSettings,
) -> Result<ProbeReport, SourceError> {
    source.start()?;
    if source.state() != SourceState::Recording {
        return Err(SourceError::Start("source not recording after start".to_string()));
    }

    let mut report = ProbeReport::default();
    let mut buf = vec![0i16; settings.samples];
    for i in 0..settings.buffers {
        if i > 0 && !settings.spacing.is_zero() {
            thread::sleep(settings.spacing);
        }
        let read = source.read(&mut buf)?;
        report.accumulate(&buf[..read.min(buf.len())]);
    }

    Ok(report)
}

/// A started source chosen for capture
pub struct SelectedSource {
    pub kind: SourceKind,
    pub candidate: SourceCandidate,
    pub source: Box<dyn AudioSource>,
    pub verified: bool,
}

impl std::fmt::Debug for SelectedSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelectedSource")
            .field("kind", &self.kind)
            .field("candidate", &self.candidate)
            .field("verified", &self.verified)
            .finish()
    }
}

/// First candidate of `kind` whose probe passes
pub fn select_verified(
    backend: &mut dyn AudioBackend,
    kind: SourceKind,
    config: &CaptureSourceConfig,
    settings: &ProbeSettings,
) -> Option<SelectedSource> {
    for &candidate in kind.candidates() {
        let mut source = match backend.open(candidate, config) {
            Ok(source) => source,
            Err(e) => {
                log::debug!("{} candidate {} failed to open: {}", kind, candidate, e);
                continue;
            }
        };

        match probe(source.as_mut(), settings) {
            Ok(report) if report.passes() => {
                log::info!(
                    "Verified {} source {} (peak {}, {}% non-zero, mean {})",
                    kind,
                    candidate,
                    report.max_magnitude,
                    report.non_zero_percent(),
                    report.mean_magnitude()
                );
                return Some(SelectedSource {
                    kind,
                    candidate,
                    source,
                    verified: true,
                });
            }
            Ok(report) => {
                log::info!(
                    "{} source {} rejected (peak {}, {}% non-zero, mean {})",
                    kind,
                    candidate,
                    report.max_magnitude,
                    report.non_zero_percent(),
                    report.mean_magnitude()
                );
            }
            Err(e) => log::info!("{} source {} probe failed: {}", kind, candidate, e),
        }
        source.stop();
        source.release();
    }
    None
}

/// First candidate of `kind` that starts, regardless of signal
pub fn select_unverified(
    backend: &mut dyn AudioBackend,
    kind: SourceKind,
    config: &CaptureSourceConfig,
) -> Option<SelectedSource> {
    for &candidate in kind.candidates() {
        let mut source = match backend.open(candidate, config) {
            Ok(source) => source,
            Err(e) => {
                log::debug!("{} candidate {} failed to open: {}", kind, candidate, e);
                continue;
            }
        };

        match source.start() {
            Ok(()) if source.state() == SourceState::Recording => {
                log::warn!(
                    "Using unverified {} source {}, signal may be weak",
                    kind,
                    candidate
                );
                return Some(SelectedSource {
                    kind,
                    candidate,
                    source,
                    verified: false,
                });
            }
            Ok(()) => log::debug!("{} source {} did not enter recording state", kind, candidate),
            Err(e) => log::debug!("{} source {} failed to start: {}", kind, candidate, e),
        }
        source.stop();
        source.release();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report_for(samples: &[i16]) -> ProbeReport {
        let mut report = ProbeReport::default();
        report.accumulate(samples);
        report
    }

    #[test]
    fn test_peak_rule() {
        let mut samples = vec![0i16; 1024];
        samples[10] = -200;
        assert!(report_for(&samples).passes());
        samples[10] = 199;
        assert!(!report_for(&samples).passes());
    }

    #[test]
    fn test_density_rule() {
        // 40% non-zero at magnitude 60, peak below 200
        let samples: Vec<i16> = (0..1000).map(|i| if i % 5 < 2 { 60 } else { 0 }).collect();
        let report = report_for(&samples);
        assert_eq!(report.non_zero_percent(), 40);
        assert_eq!(report.mean_magnitude(), 60);
        assert!(report.passes());
    }

    #[test]
    fn test_sparse_quiet_signal_rejected() {
        let samples: Vec<i16> = (0..1000).map(|i| if i % 10 == 0 { 100 } else { 0 }).collect();
        assert!(!report_for(&samples).passes());
        assert!(!report_for(&[0i16; 1024]).passes());
    }
}
