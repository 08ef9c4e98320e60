//! Audio capture configuration types

use std::fmt;

use serde::{Deserialize, Serialize};

/// Which sources feed the audio track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioType {
    Mic,
    Internal,
    MicAndInternal,
}

impl AudioType {
    pub fn wants(self, kind: SourceKind) -> bool {
        match self {
            AudioType::Mic => kind == SourceKind::Microphone,
            AudioType::Internal => kind == SourceKind::Internal,
            AudioType::MicAndInternal => true,
        }
    }
}

/// Physical kind of an audio source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Microphone,
    Internal,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Microphone => write!(f, "microphone"),
            SourceKind::Internal => write!(f, "internal"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleFormat {
    /// Signed 16-bit little-endian PCM
    Pcm16,
}

impl SampleFormat {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::Pcm16 => 2,
        }
    }
}

/// Capture parameters, fixed for one recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureSourceConfig {
    pub audio_type: AudioType,
    pub sample_rate: u32,
    pub channel_count: u16,
    pub sample_format: SampleFormat,
}

impl Default for CaptureSourceConfig {
    fn default() -> Self {
        Self {
            audio_type: AudioType::Mic,
            sample_rate: 48000,
            channel_count: 2,
            sample_format: SampleFormat::Pcm16,
        }
    }
}

impl CaptureSourceConfig {
    pub fn new(audio_type: AudioType, sample_rate: u32, channel_count: u16) -> Self {
        Self {
            audio_type,
            sample_rate,
            channel_count,
            sample_format: SampleFormat::Pcm16,
        }
    }

    /// Bytes per interleaved frame
    pub fn frame_bytes(&self) -> usize {
        self.channel_count as usize * self.sample_format.bytes_per_sample()
    }
}

/// What replaces detected silence before it reaches the encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SilentFillMode {
    LowAmplitudeNoise,
    FixedLowValue,
    ReducedSampleRate,
    ZeroWithPtsCompensation,
    Hybrid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SilentFillConfig {
    pub enabled: bool,
    pub mode: SilentFillMode,
    pub noise_amplitude: i32,
    pub skip_interval: u32,
    pub initial_period_ms: i64,
}

impl Default for SilentFillConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: SilentFillMode::LowAmplitudeNoise,
            noise_amplitude: 3,
            skip_interval: 5,
            initial_period_ms: 10_000,
        }
    }
}

impl SilentFillConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn with_mode(mut self, mode: SilentFillMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_noise_amplitude(mut self, amplitude: i32) -> Self {
        self.noise_amplitude = amplitude;
        self
    }

    pub fn with_skip_interval(mut self, interval: u32) -> Self {
        self.skip_interval = interval;
        self
    }

    pub fn with_initial_period_ms(mut self, period_ms: i64) -> Self {
        self.initial_period_ms = period_ms;
        self
    }
}
