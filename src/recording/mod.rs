//! Screen track, container sink and stream synchronization
//!
//! - `video`: surface-fed video encoder and the screen capture binding
//! - `sync`: the coordinator state machine and the [`ScreenRecorder`] handle
//! - `timeline`: pause accounting and per-track timestamp normalization
//! - `sink`: container sink abstraction
//!
//! With the `recording` feature, openh264 provides [`H264Codec`] and muxide
//! provides [`MuxideSink`].
//!
//! # Example
//! ```rust,ignore
//! use crabcast::recording::{assemble, ScreenRecorder};
//!
//! let (parts, recorder_config) = assemble(&config, capture)?;
//! let mut recorder = ScreenRecorder::new(path, recorder_config, parts, callback);
//! recorder.start()?;
//! // ...
//! recorder.stop();
//! recorder.wait(Duration::from_secs(5));
//! ```

mod capabilities;
mod config;
#[cfg(feature = "recording")]
mod encoder;
#[cfg(feature = "recording")]
mod muxer;
#[cfg(all(feature = "recording", feature = "audio"))]
mod pipeline;
mod sink;
mod sync;
mod timeline;
mod video;

pub use capabilities::{capabilities, AudioCapabilities, EncoderCapabilities, VideoCapabilities};
pub use config::{PtsMode, RecorderConfig, RecordingQuality, RecordingStats, VideoEncodeConfig};
#[cfg(feature = "recording")]
pub use encoder::H264Codec;
#[cfg(feature = "recording")]
pub use muxer::{MuxSummary, MuxideSink, AUDIO_TRACK, VIDEO_TRACK};
#[cfg(all(feature = "recording", feature = "audio"))]
pub use pipeline::assemble;
pub use sink::{ContainerSink, SinkFactory};
pub use sync::{MuxCoordinator, RecorderCallback, RecorderParts, RecorderState, ScreenRecorder};
pub use timeline::{PauseClock, TrackTimeline, MONOTONIC_STEP_US};
pub use video::{
    EncodedUnit, InputSurface, ScreenCapture, ScreenFrame, VideoCodec, VideoEncoder, VideoEncoding,
};
