//! Configuration management for crabcast
//!
//! Loads and saves the TOML configuration describing the screen track, the
//! audio sources, the silence fill policy and recorder behaviour, and turns
//! it into the runtime configuration of each component.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::audio::{
    AudioEngineConfig, AudioPtsMode, AudioType, CaptureSourceConfig, SilentFillConfig,
};
use crate::errors::RecorderError;
use crate::recording::{
    capabilities, PtsMode, RecorderConfig, RecordingQuality, VideoEncodeConfig,
};

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrabcastConfig {
    pub video: VideoSection,
    pub audio: AudioSection,
    pub silent_fill: SilentFillConfig,
    pub recorder: RecorderSection,
}

/// Screen track settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoSection {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    /// Bits per second
    pub bitrate: u32,
    pub quality: RecordingQuality,
    /// Frames between forced keyframes
    pub keyframe_interval: u32,
}

/// Audio capture settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioSection {
    pub enabled: bool,
    pub audio_type: AudioType,
    pub sample_rate: u32,
    pub channels: u16,
    /// Bits per second
    pub bitrate: u32,
}

/// Recorder behaviour and output naming
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecorderSection {
    /// Wall-clock timestamps; `false` selects encoder-relative timestamps
    /// and sample-count audio PTS
    pub wall_clock_pts: bool,
    /// Fail the recording instead of falling back to video-only
    pub audio_required: bool,
    pub fast_start: bool,
    pub title: Option<String>,
    pub output_directory: String,
    pub file_prefix: String,
}

impl Default for CrabcastConfig {
    fn default() -> Self {
        let quality = RecordingQuality::High;
        let (width, height) = quality.resolution();
        Self {
            video: VideoSection {
                width,
                height,
                fps: 30.0,
                bitrate: quality.bitrate(),
                quality,
                keyframe_interval: 30,
            },
            audio: AudioSection {
                enabled: true,
                audio_type: AudioType::Mic,
                sample_rate: 48000,
                channels: 2,
                bitrate: 128_000,
            },
            silent_fill: SilentFillConfig::default(),
            recorder: RecorderSection {
                wall_clock_pts: true,
                audio_required: false,
                fast_start: true,
                title: None,
                output_directory: "./recordings".to_string(),
                file_prefix: "screen".to_string(),
            },
        }
    }
}

impl CrabcastConfig {
    /// Load configuration from TOML file; a missing file yields defaults
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, RecorderError> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .map_err(|e| RecorderError::Config(format!("Failed to read config file: {}", e)))?;

        let config: CrabcastConfig = toml::from_str(&contents)
            .map_err(|e| RecorderError::Config(format!("Failed to parse config file: {}", e)))?;

        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), RecorderError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    RecorderError::Config(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        let toml_string = self.to_toml()?;
        fs::write(path, toml_string)
            .map_err(|e| RecorderError::Config(format!("Failed to write config file: {}", e)))?;

        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String, RecorderError> {
        toml::to_string_pretty(self)
            .map_err(|e| RecorderError::Config(format!("Failed to serialize config: {}", e)))
    }

    pub fn default_path() -> PathBuf {
        PathBuf::from("crabcast.toml")
    }

    /// Load from default location or fall back to defaults
    pub fn load_or_default() -> Self {
        Self::load_from_file(Self::default_path()).unwrap_or_else(|e| {
            log::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Validate configuration values against the encoder capabilities
    pub fn validate(&self) -> Result<(), String> {
        let caps = capabilities();
        caps.check_video(&self.video_config())?;
        if self.video.keyframe_interval == 0 {
            return Err("Keyframe interval must be at least 1".to_string());
        }

        if self.audio.enabled {
            caps.check_audio(&self.capture_source(), self.audio.bitrate)?;
        }

        let fill = &self.silent_fill;
        if !(0..=i16::MAX as i32).contains(&fill.noise_amplitude) {
            return Err("Noise amplitude must be between 0 and 32767".to_string());
        }
        if fill.skip_interval == 0 {
            return Err("Skip interval must be at least 1".to_string());
        }
        if fill.initial_period_ms < 0 {
            return Err("Initial period must not be negative".to_string());
        }

        if self.recorder.file_prefix.trim().is_empty() {
            return Err("File prefix must not be empty".to_string());
        }
        if self.recorder.audio_required && !self.audio.enabled {
            return Err("Audio cannot be required while disabled".to_string());
        }

        Ok(())
    }

    pub fn video_config(&self) -> VideoEncodeConfig {
        VideoEncodeConfig {
            width: self.video.width,
            height: self.video.height,
            fps: self.video.fps,
            bitrate: self.video.bitrate,
            quality: self.video.quality,
            keyframe_interval: self.video.keyframe_interval.max(1),
        }
    }

    pub fn capture_source(&self) -> CaptureSourceConfig {
        CaptureSourceConfig::new(self.audio.audio_type, self.audio.sample_rate, self.audio.channels)
    }

    /// `None` when audio is disabled
    pub fn audio_engine_config(&self) -> Option<AudioEngineConfig> {
        if !self.audio.enabled {
            return None;
        }
        let pts_mode = if self.recorder.wall_clock_pts {
            AudioPtsMode::WallClock
        } else {
            AudioPtsMode::SampleCount
        };
        Some(
            AudioEngineConfig::new(self.capture_source())
                .with_bitrate(self.audio.bitrate)
                .with_silent_fill(self.silent_fill.clone())
                .with_pts_mode(pts_mode),
        )
    }

    pub fn recorder_config(&self) -> RecorderConfig {
        let pts_mode = if self.recorder.wall_clock_pts {
            PtsMode::WallClock
        } else {
            PtsMode::EncoderRelative
        };
        RecorderConfig {
            pts_mode,
            audio_required: self.recorder.audio_required,
            fast_start: self.recorder.fast_start,
            title: self.recorder.title.clone(),
        }
    }

    /// `<output_directory>/<file_prefix>_YYYYmmdd_HHMMSS.mp4`
    pub fn output_path_for(&self, now: DateTime<Local>) -> PathBuf {
        let name = format!(
            "{}_{}.mp4",
            self.recorder.file_prefix,
            now.format("%Y%m%d_%H%M%S")
        );
        Path::new(&self.recorder.output_directory).join(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::SilentFillMode;
    use chrono::TimeZone;

    #[test]
    fn test_default_config() {
        let config = CrabcastConfig::default();
        assert_eq!((config.video.width, config.video.height), (1920, 1080));
        assert!(config.audio.enabled);
        assert!(config.silent_fill.enabled);
        assert_eq!(config.silent_fill.mode, SilentFillMode::LowAmplitudeNoise);
        assert!(config.recorder.wall_clock_pts);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut bad = CrabcastConfig::default();
        bad.video.width = 0;
        assert!(bad.validate().is_err());

        let mut bad = CrabcastConfig::default();
        bad.audio.sample_rate = 44100;
        assert!(bad.validate().is_err());

        // Audio checks only apply when audio is on
        bad.audio.enabled = false;
        assert!(bad.validate().is_ok());

        let mut bad = CrabcastConfig::default();
        bad.silent_fill.skip_interval = 0;
        assert!(bad.validate().is_err());

        let mut bad = CrabcastConfig::default();
        bad.audio.enabled = false;
        bad.recorder.audio_required = true;
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_config_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("crabcast.toml");

        let mut config = CrabcastConfig::default();
        config.audio.audio_type = AudioType::MicAndInternal;
        config.silent_fill.mode = SilentFillMode::Hybrid;
        config.recorder.title = Some("Demo".to_string());
        config.save_to_file(&path).unwrap();

        let loaded = CrabcastConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_config_toml_format() {
        let toml_string = CrabcastConfig::default().to_toml().unwrap();
        assert!(toml_string.contains("[video]"));
        assert!(toml_string.contains("[audio]"));
        assert!(toml_string.contains("[silent_fill]"));
        assert!(toml_string.contains("[recorder]"));
        assert!(toml_string.contains("wall_clock_pts"));
    }

    #[test]
    fn test_load_nonexistent_file() {
        let config = CrabcastConfig::load_from_file("nonexistent_crabcast.toml").unwrap();
        assert_eq!(config, CrabcastConfig::default());
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "[video\nwidth = ").unwrap();
        assert!(matches!(
            CrabcastConfig::load_from_file(&path),
            Err(RecorderError::Config(_))
        ));
    }

    #[test]
    fn test_legacy_timestamps_switch_both_streams() {
        let mut config = CrabcastConfig::default();
        config.recorder.wall_clock_pts = false;
        assert_eq!(config.recorder_config().pts_mode, PtsMode::EncoderRelative);
        assert_eq!(
            config.audio_engine_config().unwrap().pts_mode,
            AudioPtsMode::SampleCount
        );

        config.audio.enabled = false;
        assert!(config.audio_engine_config().is_none());
    }

    #[test]
    fn test_output_path_naming() {
        let config = CrabcastConfig::default();
        let now = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        let path = config.output_path_for(now);
        assert_eq!(path, Path::new("./recordings").join("screen_20240309_140507.mp4"));
    }
}
