//! Error types for the capture, encode and mux pipeline
//!
//! Stream workers never panic across thread boundaries. Failures travel to
//! the coordinator as [`EncoderError`] events and are classified there;
//! the caller only ever sees a [`RecorderError`] through `on_stop`.

use thiserror::Error;

use crate::encoder::StreamKind;

/// Terminal error reported once per recording attempt
#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("Preparation error: {0}")]
    Preparation(#[from] PreparationError),
    #[error("Encoding error: {0}")]
    Encoding(String),
    #[error("Muxing error: {0}")]
    Muxing(#[from] SinkError),
    #[error("Audio error: {0}")]
    Audio(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid recorder state: {0}")]
    State(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<EncoderError> for RecorderError {
    fn from(err: EncoderError) -> Self {
        match err.stream {
            StreamKind::Video => RecorderError::Encoding(err.message),
            StreamKind::Audio => RecorderError::Audio(err.message),
        }
    }
}

/// Raised by `Encoder::prepare` when the device or codec cannot be configured
#[derive(Debug, Error)]
#[error("{stream} encoder preparation failed: {message}")]
pub struct PreparationError {
    pub stream: StreamKind,
    pub message: String,
}

impl PreparationError {
    pub fn new(stream: StreamKind, message: impl Into<String>) -> Self {
        Self {
            stream,
            message: message.into(),
        }
    }
}

/// Asynchronous failure posted by a stream worker
#[derive(Debug, Clone, Error)]
#[error("{stream} stream error: {message}")]
pub struct EncoderError {
    pub stream: StreamKind,
    pub message: String,
}

impl EncoderError {
    pub fn new(stream: StreamKind, message: impl Into<String>) -> Self {
        Self {
            stream,
            message: message.into(),
        }
    }
}

/// Container sink failures
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("unsupported track format: {0}")]
    UnsupportedFormat(String),
    #[error("invalid sink state: {0}")]
    InvalidState(String),
    #[error("sink IO failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("muxer failure: {0}")]
    Muxer(String),
}

impl SinkError {
    /// Track-add failures of this kind downgrade the recording instead of ending it
    pub fn is_recoverable_track_error(&self) -> bool {
        matches!(self, SinkError::UnsupportedFormat(_) | SinkError::InvalidState(_))
    }
}

/// Audio capture device failures
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("audio source unavailable: {0}")]
    Unavailable(String),
    #[error("audio source failed to start: {0}")]
    Start(String),
    #[error("audio source read failed: {0}")]
    Read(String),
    #[error("audio source stopped")]
    Stopped,
}

/// Hardware-encoder style codec failures
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("codec configuration failed: {0}")]
    Configure(String),
    #[error("invalid codec input: {0}")]
    InvalidInput(String),
    #[error("codec encode failed: {0}")]
    Encode(String),
    #[error("codec is not running")]
    NotRunning,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoder_error_maps_by_stream() {
        let video: RecorderError = EncoderError::new(StreamKind::Video, "boom").into();
        assert!(matches!(video, RecorderError::Encoding(ref m) if m == "boom"));

        let audio: RecorderError = EncoderError::new(StreamKind::Audio, "gone").into();
        assert!(matches!(audio, RecorderError::Audio(ref m) if m == "gone"));
    }

    #[test]
    fn test_recoverable_track_errors() {
        assert!(SinkError::UnsupportedFormat("aac".into()).is_recoverable_track_error());
        assert!(SinkError::InvalidState("started".into()).is_recoverable_track_error());
        assert!(!SinkError::Muxer("disk full".into()).is_recoverable_track_error());
    }

    #[test]
    fn test_error_display() {
        let err = PreparationError::new(StreamKind::Video, "no encoder");
        assert_eq!(err.to_string(), "video encoder preparation failed: no encoder");

        let err = RecorderError::from(err);
        assert!(err.to_string().starts_with("Preparation error:"));
    }
}
