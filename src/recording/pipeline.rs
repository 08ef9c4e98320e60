//! Assembly of the production stack from a [`CrabcastConfig`]

use super::config::RecorderConfig;
use super::encoder::H264Codec;
use super::muxer::MuxideSink;
use super::sync::RecorderParts;
use super::video::{ScreenCapture, VideoEncoder, VideoEncoding};
use crate::audio::{AudioCaptureEngine, CpalBackend, OpusCodec};
use crate::config::CrabcastConfig;
use crate::encoder::Encoder;
use crate::errors::RecorderError;

/// Build openh264 video, cpal + Opus audio and the MP4 sink
///
/// The configuration is validated first; nothing is opened until the
/// recorder starts.
pub fn assemble(
    config: &CrabcastConfig,
    capture: Box<dyn ScreenCapture>,
) -> Result<(RecorderParts, RecorderConfig), RecorderError> {
    config.validate().map_err(RecorderError::Config)?;

    let video_config = config.video_config();
    let codec = H264Codec::new(&video_config).map_err(|e| RecorderError::Encoding(e.to_string()))?;
    let video: Box<dyn VideoEncoding> = Box::new(VideoEncoder::new(video_config, Box::new(codec)));

    let audio = config.audio_engine_config().map(|engine_config| {
        let engine = AudioCaptureEngine::new(
            engine_config,
            Box::new(CpalBackend::new()),
            Box::new(OpusCodec::new()),
        );
        Box::new(engine) as Box<dyn Encoder>
    });

    let recorder_config = config.recorder_config();
    let parts = RecorderParts {
        video,
        audio,
        capture,
        sink_factory: MuxideSink::factory(&recorder_config),
    };

    log::info!(
        "Assembled pipeline: {}x{} @ {} fps, audio {}",
        config.video.width,
        config.video.height,
        config.video.fps,
        if config.audio.enabled { "on" } else { "off" }
    );
    Ok((parts, recorder_config))
}
