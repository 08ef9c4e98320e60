//! Encoder abstraction shared by the video and audio streams
//!
//! Every stream implements [`Encoder`]: `prepare` allocates the device and
//! codec, `stop` is idempotent, `release` is always safe. Output reaches the
//! coordinator through one ordered callback channel ([`EncoderEvents`]):
//! a format report, then sample buffers, then at most one error.

use std::fmt;
use std::ops::BitOr;
use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::{Receiver, SendTimeoutError, Sender};

use crate::audio::SourceKind;
use crate::errors::{EncoderError, PreparationError};
use crate::timing::RecordingClock;

/// Capacity of the cross-thread event channel feeding the coordinator
pub const EVENT_QUEUE_CAPACITY: usize = 1024;

/// Logical stream within the recording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Video,
    Audio,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Video => write!(f, "video"),
            StreamKind::Audio => write!(f, "audio"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodecKind {
    H264,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioCodecKind {
    Opus,
    Aac,
}

/// Output format reported once per encoder, used to add the container track
#[derive(Debug, Clone, PartialEq)]
pub enum MediaFormat {
    Video {
        codec: VideoCodecKind,
        width: u32,
        height: u32,
        fps: f64,
    },
    Audio {
        codec: AudioCodecKind,
        sample_rate: u32,
        channels: u16,
    },
}

impl MediaFormat {
    pub fn stream(&self) -> StreamKind {
        match self {
            MediaFormat::Video { .. } => StreamKind::Video,
            MediaFormat::Audio { .. } => StreamKind::Audio,
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            MediaFormat::Video {
                codec: VideoCodecKind::H264,
                ..
            } => "video/avc",
            MediaFormat::Audio {
                codec: AudioCodecKind::Opus,
                ..
            } => "audio/opus",
            MediaFormat::Audio {
                codec: AudioCodecKind::Aac,
                ..
            } => "audio/mp4a-latm",
        }
    }
}

/// Sample buffer flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferFlags(u32);

impl BufferFlags {
    pub const NONE: BufferFlags = BufferFlags(0);
    pub const KEY_FRAME: BufferFlags = BufferFlags(1);
    pub const CODEC_CONFIG: BufferFlags = BufferFlags(1 << 1);
    pub const END_OF_STREAM: BufferFlags = BufferFlags(1 << 2);

    pub fn contains(self, other: BufferFlags) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    pub fn bits(self) -> u32 {
        self.0
    }
}

impl BitOr for BufferFlags {
    type Output = BufferFlags;

    fn bitor(self, rhs: BufferFlags) -> BufferFlags {
        BufferFlags(self.0 | rhs.0)
    }
}

/// Metadata describing one encoded sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BufferInfo {
    pub size: usize,
    pub presentation_time_us: i64,
    pub flags: BufferFlags,
}

impl BufferInfo {
    pub fn new(size: usize, presentation_time_us: i64, flags: BufferFlags) -> Self {
        Self {
            size,
            presentation_time_us,
            flags,
        }
    }

    /// Zero-length end-of-stream marker
    pub fn end_of_stream(presentation_time_us: i64) -> Self {
        Self::new(0, presentation_time_us, BufferFlags::END_OF_STREAM)
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.flags.contains(BufferFlags::END_OF_STREAM)
    }

    pub fn is_key_frame(&self) -> bool {
        self.flags.contains(BufferFlags::KEY_FRAME)
    }

    pub fn is_codec_config(&self) -> bool {
        self.flags.contains(BufferFlags::CODEC_CONFIG)
    }
}

/// Runs once when an output buffer has been consumed
pub struct ReleaseGuard(Option<Box<dyn FnOnce() + Send>>);

impl ReleaseGuard {
    pub fn new(f: impl FnOnce() + Send + 'static) -> Self {
        Self(Some(Box::new(f)))
    }
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        if let Some(release) = self.0.take() {
            release();
        }
    }
}

impl fmt::Debug for ReleaseGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ReleaseGuard").field(&self.0.is_some()).finish()
    }
}

/// Encoded output handed to the coordinator
///
/// Dropping the buffer hands its output slot back to the producing
/// encoder, wherever the drop happens.
#[derive(Debug)]
pub struct EncodedBuffer {
    pub index: usize,
    pub data: Bytes,
    pub info: BufferInfo,
    release: Option<ReleaseGuard>,
}

impl EncodedBuffer {
    pub fn new(index: usize, data: Bytes, info: BufferInfo) -> Self {
        Self {
            index,
            data,
            info,
            release: None,
        }
    }

    pub fn end_of_stream(index: usize, presentation_time_us: i64) -> Self {
        Self::new(index, Bytes::new(), BufferInfo::end_of_stream(presentation_time_us))
    }

    pub fn with_release(mut self, guard: ReleaseGuard) -> Self {
        self.release = Some(guard);
        self
    }

    /// Payload limited to `info.size`
    pub fn payload(&self) -> &[u8] {
        let len = self.info.size.min(self.data.len());
        &self.data[..len]
    }
}

/// Notification posted by a stream worker
#[derive(Debug)]
pub enum EncoderEvent {
    FormatChanged(MediaFormat),
    BufferAvailable(EncodedBuffer),
    Error(EncoderError),
    InternalAudioNotAvailable(SourceKind),
    WeakSignal(SourceKind),
    SilenceDetected { consecutive_frames: u32 },
}

#[derive(Debug)]
pub struct StreamEvent {
    pub stream: StreamKind,
    pub event: EncoderEvent,
}

/// Sending half of a stream's callback channel
#[derive(Debug, Clone)]
pub struct EncoderEvents {
    stream: StreamKind,
    tx: Sender<StreamEvent>,
}

impl EncoderEvents {
    pub fn new(stream: StreamKind, tx: Sender<StreamEvent>) -> Self {
        Self { stream, tx }
    }

    /// Standalone channel, mostly useful for driving one encoder in isolation
    pub fn channel(stream: StreamKind) -> (Self, Receiver<StreamEvent>) {
        let (tx, rx) = crossbeam_channel::bounded(EVENT_QUEUE_CAPACITY);
        (Self::new(stream, tx), rx)
    }

    pub fn stream(&self) -> StreamKind {
        self.stream
    }

    fn post(&self, event: EncoderEvent) {
        let message = StreamEvent {
            stream: self.stream,
            event,
        };
        if self.tx.send(message).is_err() {
            log::debug!("{} event dropped, coordinator is gone", self.stream);
        }
    }

    /// Post a buffer, giving up after `timeout` if the queue stays full.
    /// Returns `false` when the buffer was not delivered.
    pub fn buffer_available_within(&self, buffer: EncodedBuffer, timeout: Duration) -> bool {
        let message = StreamEvent {
            stream: self.stream,
            event: EncoderEvent::BufferAvailable(buffer),
        };
        match self.tx.send_timeout(message, timeout) {
            Ok(()) => true,
            Err(SendTimeoutError::Timeout(_)) => {
                log::warn!("{} event queue full for {:?}, buffer dropped", self.stream, timeout);
                false
            }
            Err(SendTimeoutError::Disconnected(_)) => {
                log::debug!("{} event dropped, coordinator is gone", self.stream);
                false
            }
        }
    }

    pub fn format_changed(&self, format: MediaFormat) {
        self.post(EncoderEvent::FormatChanged(format));
    }

    pub fn buffer_available(&self, buffer: EncodedBuffer) {
        self.post(EncoderEvent::BufferAvailable(buffer));
    }

    pub fn error(&self, message: impl Into<String>) {
        self.post(EncoderEvent::Error(EncoderError::new(self.stream, message)));
    }

    pub fn internal_audio_not_available(&self, kind: SourceKind) {
        self.post(EncoderEvent::InternalAudioNotAvailable(kind));
    }

    pub fn weak_signal(&self, kind: SourceKind) {
        self.post(EncoderEvent::WeakSignal(kind));
    }

    pub fn silence_detected(&self, consecutive_frames: u32) {
        self.post(EncoderEvent::SilenceDetected { consecutive_frames });
    }
}

/// Everything an encoder receives at preparation time
#[derive(Debug, Clone)]
pub struct EncoderContext {
    pub clock: RecordingClock,
    pub events: EncoderEvents,
}

/// Common lifecycle of a stream encoder
pub trait Encoder: Send {
    /// Allocate devices and codecs, then begin producing events
    fn prepare(&mut self, ctx: EncoderContext) -> Result<(), PreparationError>;

    /// Stop producing output. Idempotent.
    fn stop(&mut self);

    /// Free every resource. Safe without a successful `prepare`.
    fn release(&mut self);
}
