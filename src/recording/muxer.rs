//! MP4 sink backed by muxide

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use muxide::api::{AudioCodec, Metadata, Muxer, MuxerBuilder, VideoCodec};

use super::config::RecorderConfig;
use super::sink::{ContainerSink, SinkFactory};
use crate::encoder::{AudioCodecKind, BufferInfo, MediaFormat, VideoCodecKind};
use crate::errors::SinkError;

pub const VIDEO_TRACK: usize = 0;
pub const AUDIO_TRACK: usize = 1;

#[derive(Debug, Clone, Copy)]
struct VideoTrack {
    width: u32,
    height: u32,
    fps: f64,
}

#[derive(Debug, Clone, Copy)]
struct AudioTrack {
    sample_rate: u32,
    channels: u16,
}

/// Final numbers reported by the muxer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MuxSummary {
    pub video_frames: u64,
    pub audio_frames: u64,
    pub duration_secs: f64,
    pub bytes_written: u64,
}

/// MP4 writer with one H.264 track and an optional Opus track
///
/// The muxer is only built at `start`, once every track is known.
pub struct MuxideSink {
    path: PathBuf,
    fast_start: bool,
    title: Option<String>,
    video: Option<VideoTrack>,
    audio: Option<AudioTrack>,
    muxer: Option<Muxer<BufWriter<File>>>,
    started: bool,
    last_pts_us: [Option<i64>; 2],
    summary: Option<MuxSummary>,
}

impl MuxideSink {
    pub fn new<P: AsRef<Path>>(path: P, config: &RecorderConfig) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            fast_start: config.fast_start,
            title: config.title.clone(),
            video: None,
            audio: None,
            muxer: None,
            started: false,
            last_pts_us: [None, None],
            summary: None,
        }
    }

    /// Factory suitable for `ScreenRecorder::new`
    pub fn factory(config: &RecorderConfig) -> SinkFactory {
        let config = config.clone();
        Box::new(move |path: &Path| {
            let sink: Box<dyn ContainerSink> = Box::new(MuxideSink::new(path, &config));
            Ok(sink)
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Available once the sink has been stopped
    pub fn summary(&self) -> Option<&MuxSummary> {
        self.summary.as_ref()
    }

    /// The MP4 writer rejects repeated timestamps within a track
    fn strictly_increasing(&mut self, track: usize, pts_us: i64) -> i64 {
        let pts = match self.last_pts_us[track] {
            Some(last) if pts_us <= last => last + 1,
            _ => pts_us,
        };
        self.last_pts_us[track] = Some(pts);
        pts
    }
}

impl ContainerSink for MuxideSink {
    fn add_track(&mut self, format: &MediaFormat) -> Result<usize, SinkError> {
        if self.started {
            return Err(SinkError::InvalidState("tracks cannot be added after start".to_string()));
        }

        match *format {
            MediaFormat::Video {
                codec: VideoCodecKind::H264,
                width,
                height,
                fps,
            } => {
                if self.video.is_some() {
                    return Err(SinkError::InvalidState("video track already added".to_string()));
                }
                self.video = Some(VideoTrack { width, height, fps });
                Ok(VIDEO_TRACK)
            }
            MediaFormat::Audio {
                codec: AudioCodecKind::Opus,
                sample_rate: 48000,
                channels,
            } => {
                if self.audio.is_some() {
                    return Err(SinkError::InvalidState("audio track already added".to_string()));
                }
                self.audio = Some(AudioTrack {
                    sample_rate: 48000,
                    channels,
                });
                Ok(AUDIO_TRACK)
            }
            ref other => Err(SinkError::UnsupportedFormat(other.mime().to_string())),
        }
    }

    fn start(&mut self) -> Result<(), SinkError> {
        if self.started {
            return Err(SinkError::InvalidState("sink already started".to_string()));
        }
        let video = self
            .video
            .ok_or_else(|| SinkError::InvalidState("MP4 output needs a video track".to_string()))?;

        let file = File::create(&self.path)?;
        let writer = BufWriter::new(file);

        let mut builder = MuxerBuilder::new(writer)
            .video(VideoCodec::H264, video.width, video.height, video.fps)
            .with_fast_start(self.fast_start);
        if let Some(audio) = self.audio {
            builder = builder.audio(AudioCodec::Opus, audio.sample_rate, audio.channels);
        }

        let metadata = match self.title {
            Some(ref title) => Metadata::new().with_title(title).with_current_time(),
            None => Metadata::new().with_current_time(),
        };
        let muxer = builder
            .with_metadata(metadata)
            .build()
            .map_err(|e| SinkError::Muxer(format!("Failed to create muxer: {}", e)))?;

        self.muxer = Some(muxer);
        self.started = true;
        log::info!(
            "MP4 sink started at {} (audio track: {})",
            self.path.display(),
            self.audio.is_some()
        );
        Ok(())
    }

    fn write_sample(&mut self, track: usize, data: &[u8], info: &BufferInfo) -> Result<(), SinkError> {
        if data.is_empty() {
            // End-of-stream markers carry no payload; the MP4 trailer closes tracks
            return Ok(());
        }
        if self.muxer.is_none() {
            return Err(SinkError::InvalidState("sink is not started".to_string()));
        }
        if track > AUDIO_TRACK || (track == AUDIO_TRACK && self.audio.is_none()) {
            return Err(SinkError::InvalidState(format!("unknown track {}", track)));
        }

        let pts_us = self.strictly_increasing(track, info.presentation_time_us);
        let pts_secs = pts_us as f64 / 1_000_000.0;

        let muxer = self
            .muxer
            .as_mut()
            .ok_or_else(|| SinkError::InvalidState("sink is not started".to_string()))?;
        if track == VIDEO_TRACK {
            muxer
                .write_video(pts_secs, data, info.is_key_frame())
                .map_err(|e| SinkError::Muxer(format!("Failed to write video sample: {}", e)))
        } else {
            muxer
                .write_audio(pts_secs, data)
                .map_err(|e| SinkError::Muxer(format!("Failed to write audio sample: {}", e)))
        }
    }

    fn stop(&mut self) -> Result<(), SinkError> {
        let muxer = self
            .muxer
            .take()
            .ok_or_else(|| SinkError::InvalidState("sink is not started".to_string()))?;
        let stats = muxer
            .finish_with_stats()
            .map_err(|e| SinkError::Muxer(format!("Failed to finalize recording: {}", e)))?;

        let summary = MuxSummary {
            video_frames: stats.video_frames,
            audio_frames: stats.audio_frames,
            duration_secs: stats.duration_secs,
            bytes_written: stats.bytes_written,
        };
        log::info!(
            "MP4 finalized: {} video / {} audio frames, {:.2}s, {} bytes",
            summary.video_frames,
            summary.audio_frames,
            summary.duration_secs,
            summary.bytes_written
        );
        self.summary = Some(summary);
        Ok(())
    }

    fn release(&mut self) {
        if self.muxer.is_some() {
            log::warn!("MP4 sink released without being stopped, finalizing now");
            if let Err(e) = self.stop() {
                log::error!("{}", e);
            }
        }
        self.started = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::BufferFlags;

    fn video_format() -> MediaFormat {
        MediaFormat::Video {
            codec: VideoCodecKind::H264,
            width: 320,
            height: 240,
            fps: 30.0,
        }
    }

    #[test]
    fn test_track_indices() {
        let mut sink = MuxideSink::new("unused.mp4", &RecorderConfig::default());
        assert_eq!(sink.add_track(&video_format()).unwrap(), VIDEO_TRACK);
        let opus = MediaFormat::Audio {
            codec: AudioCodecKind::Opus,
            sample_rate: 48000,
            channels: 2,
        };
        assert_eq!(sink.add_track(&opus).unwrap(), AUDIO_TRACK);
        assert!(matches!(sink.add_track(&opus), Err(SinkError::InvalidState(_))));
    }

    #[test]
    fn test_unsupported_audio_is_recoverable() {
        let mut sink = MuxideSink::new("unused.mp4", &RecorderConfig::default());
        let aac = MediaFormat::Audio {
            codec: AudioCodecKind::Aac,
            sample_rate: 44100,
            channels: 2,
        };
        let err = sink.add_track(&aac).unwrap_err();
        assert!(err.is_recoverable_track_error());
    }

    #[test]
    fn test_start_requires_video() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = MuxideSink::new(dir.path().join("a.mp4"), &RecorderConfig::default());
        assert!(matches!(sink.start(), Err(SinkError::InvalidState(_))));
    }

    #[test]
    fn test_write_before_start_fails() {
        let mut sink = MuxideSink::new("unused.mp4", &RecorderConfig::default());
        sink.add_track(&video_format()).unwrap();
        let info = BufferInfo::new(3, 0, BufferFlags::KEY_FRAME);
        assert!(sink.write_sample(VIDEO_TRACK, &[0, 0, 1], &info).is_err());
    }

    #[test]
    fn test_repeated_timestamps_are_nudged() {
        let mut sink = MuxideSink::new("unused.mp4", &RecorderConfig::default());
        assert_eq!(sink.strictly_increasing(VIDEO_TRACK, 1000), 1000);
        assert_eq!(sink.strictly_increasing(VIDEO_TRACK, 1000), 1001);
        assert_eq!(sink.strictly_increasing(AUDIO_TRACK, 1000), 1000);
    }
}
