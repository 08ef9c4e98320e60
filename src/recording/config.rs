//! Recording configuration types

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Quality presets for the screen track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum RecordingQuality {
    /// 720p, lower bitrate
    Low,
    /// 1080p, standard bitrate
    Medium,
    /// 1080p, high bitrate
    #[default]
    High,
    Custom,
}

impl RecordingQuality {
    /// Recommended bitrate in bits per second
    pub fn bitrate(&self) -> u32 {
        match self {
            RecordingQuality::Low => 2_500_000,
            RecordingQuality::Medium => 5_000_000,
            RecordingQuality::High => 10_000_000,
            RecordingQuality::Custom => 5_000_000,
        }
    }

    pub fn resolution(&self) -> (u32, u32) {
        match self {
            RecordingQuality::Low => (1280, 720),
            _ => (1920, 1080),
        }
    }
}

/// Screen track encoding parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoEncodeConfig {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    /// Target bitrate in bits per second
    pub bitrate: u32,
    pub quality: RecordingQuality,
    /// Frames between forced keyframes
    pub keyframe_interval: u32,
}

impl VideoEncodeConfig {
    pub fn new(width: u32, height: u32, fps: f64) -> Self {
        Self {
            width,
            height,
            fps,
            bitrate: RecordingQuality::Custom.bitrate(),
            quality: RecordingQuality::Custom,
            keyframe_interval: (fps.round() as u32).max(1),
        }
    }

    pub fn from_quality(quality: RecordingQuality) -> Self {
        let (width, height) = quality.resolution();
        Self {
            bitrate: quality.bitrate(),
            quality,
            ..Self::new(width, height, 30.0)
        }
    }

    pub fn with_bitrate(mut self, bitrate: u32) -> Self {
        self.bitrate = bitrate;
        self
    }

    pub fn with_keyframe_interval(mut self, frames: u32) -> Self {
        self.keyframe_interval = frames.max(1);
        self
    }

    /// Size of one RGB24 frame
    pub fn frame_bytes(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }
}

impl Default for VideoEncodeConfig {
    fn default() -> Self {
        Self::from_quality(RecordingQuality::High)
    }
}

/// How written timestamps are derived
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PtsMode {
    /// Elapsed time since the shared origin minus paused time
    WallClock,
    /// Encoder timestamps rebased on the first one seen per track
    EncoderRelative,
}

/// Coordinator policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecorderConfig {
    pub pts_mode: PtsMode,
    /// Treat any audio failure as fatal instead of falling back to video-only
    pub audio_required: bool,
    /// Write the index ahead of the sample data
    pub fast_start: bool,
    pub title: Option<String>,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            pts_mode: PtsMode::WallClock,
            audio_required: false,
            fast_start: true,
            title: None,
        }
    }
}

impl RecorderConfig {
    pub fn with_pts_mode(mut self, pts_mode: PtsMode) -> Self {
        self.pts_mode = pts_mode;
        self
    }

    pub fn with_audio_required(mut self, required: bool) -> Self {
        self.audio_required = required;
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

/// Counters describing what reached the container
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordingStats {
    pub video_samples: u64,
    pub audio_samples: u64,
    pub video_bytes: u64,
    pub audio_bytes: u64,
    /// Buffers discarded while paused
    pub paused_discards: u64,
    /// Last written timestamp per track, microseconds
    pub last_video_pts_us: Option<i64>,
    pub last_audio_pts_us: Option<i64>,
    pub output_path: Option<PathBuf>,
}

impl RecordingStats {
    /// Span covered by the written samples
    pub fn duration_secs(&self) -> f64 {
        let last = self
            .last_video_pts_us
            .unwrap_or(0)
            .max(self.last_audio_pts_us.unwrap_or(0));
        last as f64 / 1_000_000.0
    }
}
