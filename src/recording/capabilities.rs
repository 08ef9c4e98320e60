//! Encoder capability cache
//!
//! Capabilities of the bundled codecs, computed once per process and used
//! to reject configurations before a pipeline is started.

use lazy_static::lazy_static;

use super::config::VideoEncodeConfig;
use crate::audio::CaptureSourceConfig;

#[derive(Debug, Clone, PartialEq)]
pub struct VideoCapabilities {
    pub codec: &'static str,
    pub max_width: u32,
    pub max_height: u32,
    /// Dimensions must be multiples of this
    pub alignment: u32,
    pub max_fps: f64,
    pub bitrate_range: (u32, u32),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AudioCapabilities {
    pub codec: &'static str,
    pub sample_rates: Vec<u32>,
    pub max_channels: u16,
    pub bitrate_range: (u32, u32),
}

#[derive(Debug, Clone, PartialEq)]
pub struct EncoderCapabilities {
    pub video: VideoCapabilities,
    pub audio: AudioCapabilities,
}

lazy_static! {
    static ref CAPABILITIES: EncoderCapabilities = EncoderCapabilities {
        video: VideoCapabilities {
            codec: "video/avc",
            max_width: 4096,
            max_height: 2304,
            alignment: 2,
            max_fps: 120.0,
            bitrate_range: (100_000, 50_000_000),
        },
        audio: AudioCapabilities {
            codec: "audio/opus",
            sample_rates: vec![48000],
            max_channels: 2,
            bitrate_range: (6_000, 510_000),
        },
    };
}

/// Process-wide capability table
pub fn capabilities() -> &'static EncoderCapabilities {
    &CAPABILITIES
}

impl EncoderCapabilities {
    pub fn check_video(&self, config: &VideoEncodeConfig) -> Result<(), String> {
        let caps = &self.video;
        if config.width == 0 || config.height == 0 {
            return Err("video dimensions must be positive".to_string());
        }
        if config.width > caps.max_width || config.height > caps.max_height {
            return Err(format!(
                "{}x{} exceeds encoder maximum {}x{}",
                config.width, config.height, caps.max_width, caps.max_height
            ));
        }
        if config.width % caps.alignment != 0 || config.height % caps.alignment != 0 {
            return Err(format!(
                "video dimensions must be multiples of {}",
                caps.alignment
            ));
        }
        if !(config.fps > 0.0 && config.fps <= caps.max_fps) {
            return Err(format!("fps must be in (0, {}]", caps.max_fps));
        }
        let (min, max) = caps.bitrate_range;
        if !(min..=max).contains(&config.bitrate) {
            return Err(format!("video bitrate must be within {}..={}", min, max));
        }
        Ok(())
    }

    pub fn check_audio(&self, source: &CaptureSourceConfig, bitrate: u32) -> Result<(), String> {
        let caps = &self.audio;
        if !caps.sample_rates.contains(&source.sample_rate) {
            return Err(format!(
                "{} supports sample rates {:?}, got {}",
                caps.codec, caps.sample_rates, source.sample_rate
            ));
        }
        if source.channel_count == 0 || source.channel_count > caps.max_channels {
            return Err(format!(
                "{} supports 1..={} channels, got {}",
                caps.codec, caps.max_channels, source.channel_count
            ));
        }
        let (min, max) = caps.bitrate_range;
        if !(min..=max).contains(&bitrate) {
            return Err(format!("audio bitrate must be within {}..={}", min, max));
        }
        Ok(())
    }
}
