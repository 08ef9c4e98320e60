//! Screen track encoder
//!
//! The screen capture binding pushes frames straight into the encoder's
//! [`InputSurface`]; the encoder worker turns them into sample buffers for
//! the coordinator. Nothing on this path touches the audio stream.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};

use super::config::VideoEncodeConfig;
use crate::encoder::{
    BufferFlags, BufferInfo, EncodedBuffer, Encoder, EncoderContext, MediaFormat, StreamKind,
};
use crate::errors::{CodecError, PreparationError};

/// Frames the surface holds before the compositor's pushes are dropped
const SURFACE_QUEUE_FRAMES: usize = 4;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// How long the worker waits for room in the event queue for its end-of-stream buffer
const EOS_SEND_TIMEOUT: Duration = Duration::from_millis(500);

/// How long `release` waits for the worker to exit before detaching it
const VIDEO_RELEASE_TIMEOUT: Duration = Duration::from_secs(2);

/// One composited RGB24 screen frame
#[derive(Debug, Clone)]
pub struct ScreenFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub captured_at: Instant,
}

impl ScreenFrame {
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            data,
            width,
            height,
            captured_at: Instant::now(),
        }
    }
}

/// Producer handle onto the video encoder's input
#[derive(Debug, Clone)]
pub struct InputSurface {
    tx: Sender<ScreenFrame>,
    width: u32,
    height: u32,
    dropped: Arc<AtomicU64>,
}

impl InputSurface {
    /// Surface plus the receiving end an encoder reads frames from
    pub fn channel(width: u32, height: u32, capacity: usize) -> (Self, Receiver<ScreenFrame>) {
        let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
        let surface = Self {
            tx,
            width,
            height,
            dropped: Arc::new(AtomicU64::new(0)),
        };
        (surface, rx)
    }

    /// Hand a frame to the encoder without blocking. Returns `false` if the
    /// frame was dropped.
    pub fn push(&self, frame: ScreenFrame) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Binding between the screen-capture authorization and an encoder surface
///
/// Acquiring the authorization itself is the caller's business; the
/// recorder only binds and unbinds the surface it renders into.
pub trait ScreenCapture: Send {
    fn bind(&mut self, surface: InputSurface) -> Result<(), PreparationError>;

    fn unbind(&mut self);
}

/// Compressed output of one frame
#[derive(Debug, Clone)]
pub struct EncodedUnit {
    pub data: Vec<u8>,
    pub key_frame: bool,
}

/// Frame-at-a-time video compressor
pub trait VideoCodec: Send {
    fn output_format(&self) -> MediaFormat;

    /// `None` when the codec produced nothing for this frame
    fn encode(&mut self, frame: &ScreenFrame) -> Result<Option<EncodedUnit>, CodecError>;

    fn force_key_frame(&mut self);
}

/// An [`Encoder`] that exposes a surface for the screen capture to render into
pub trait VideoEncoding: Encoder {
    fn input_surface(&self) -> Option<InputSurface>;
}

/// Surface-fed video encoder running on its own worker
pub struct VideoEncoder {
    config: VideoEncodeConfig,
    codec: Option<Box<dyn VideoCodec>>,
    surface: Option<InputSurface>,
    force_stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    /// Disconnects when the worker exits
    exited: Option<Receiver<()>>,
}

impl VideoEncoder {
    pub fn new(config: VideoEncodeConfig, codec: Box<dyn VideoCodec>) -> Self {
        Self {
            config,
            codec: Some(codec),
            surface: None,
            force_stop: Arc::new(AtomicBool::new(false)),
            worker: None,
            exited: None,
        }
    }

    pub fn config(&self) -> &VideoEncodeConfig {
        &self.config
    }
}

impl Encoder for VideoEncoder {
    fn prepare(&mut self, ctx: EncoderContext) -> Result<(), PreparationError> {
        let codec = self.codec.take().ok_or_else(|| {
            PreparationError::new(StreamKind::Video, "video encoder already prepared")
        })?;
        if self.config.width == 0 || self.config.height == 0 {
            return Err(PreparationError::new(
                StreamKind::Video,
                format!("invalid frame size {}x{}", self.config.width, self.config.height),
            ));
        }

        let (surface, rx) =
            InputSurface::channel(self.config.width, self.config.height, SURFACE_QUEUE_FRAMES);

        let (exit_tx, exit_rx) = crossbeam_channel::bounded(1);
        let worker = VideoWorker {
            codec,
            _exit: exit_tx,
            rx,
            ctx,
            force_stop: self.force_stop.clone(),
            keyframe_interval: self.config.keyframe_interval.max(1) as u64,
            expected_len: self.config.frame_bytes(),
        };
        let handle = thread::Builder::new()
            .name("crabcast-video".to_string())
            .spawn(move || worker.run())
            .map_err(|e| {
                PreparationError::new(StreamKind::Video, format!("failed to spawn video worker: {}", e))
            })?;

        self.surface = Some(surface);
        self.worker = Some(handle);
        self.exited = Some(exit_rx);
        log::info!(
            "Video encoder prepared ({}x{} @ {} fps, {} bps)",
            self.config.width,
            self.config.height,
            self.config.fps,
            self.config.bitrate
        );
        Ok(())
    }

    fn stop(&mut self) {
        if !self.force_stop.swap(true, Ordering::SeqCst) {
            log::debug!("Video encoder stop requested");
        }
    }

    fn release(&mut self) {
        self.force_stop.store(true, Ordering::SeqCst);
        if let Some(surface) = self.surface.take() {
            let dropped = surface.dropped_frames();
            if dropped > 0 {
                log::info!("Video surface dropped {} frames", dropped);
            }
        }
        if let Some(worker) = self.worker.take() {
            let exited = match self.exited.take() {
                Some(rx) => !matches!(
                    rx.recv_timeout(VIDEO_RELEASE_TIMEOUT),
                    Err(RecvTimeoutError::Timeout)
                ),
                None => true,
            };
            if exited {
                if worker.join().is_err() {
                    log::error!("Video worker panicked");
                }
            } else {
                log::warn!(
                    "Video worker did not exit within {:?}, detaching",
                    VIDEO_RELEASE_TIMEOUT
                );
            }
        }
        self.codec = None;
    }
}

impl VideoEncoding for VideoEncoder {
    fn input_surface(&self) -> Option<InputSurface> {
        self.surface.clone()
    }
}

impl Drop for VideoEncoder {
    fn drop(&mut self) {
        self.release();
    }
}

struct VideoWorker {
    codec: Box<dyn VideoCodec>,
    _exit: Sender<()>,
    rx: Receiver<ScreenFrame>,
    ctx: EncoderContext,
    force_stop: Arc<AtomicBool>,
    keyframe_interval: u64,
    expected_len: usize,
}

impl VideoWorker {
    fn run(mut self) {
        let events = self.ctx.events.clone();
        let mut format_sent = false;
        let mut frames: u64 = 0;
        let mut last_pts = 0i64;

        loop {
            if self.force_stop.load(Ordering::SeqCst) {
                // End of input: the encoder signals end of stream on its own track
                events.buffer_available_within(
                    EncodedBuffer::end_of_stream(frames as usize, last_pts),
                    EOS_SEND_TIMEOUT,
                );
                break;
            }

            let frame = match self.rx.recv_timeout(POLL_INTERVAL) {
                Ok(frame) => frame,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    events.buffer_available_within(
                        EncodedBuffer::end_of_stream(frames as usize, last_pts),
                        EOS_SEND_TIMEOUT,
                    );
                    break;
                }
            };

            if frame.data.len() != self.expected_len {
                events.error(format!(
                    "frame of {} bytes does not match configured size ({} bytes)",
                    frame.data.len(),
                    self.expected_len
                ));
                break;
            }

            if frames % self.keyframe_interval == 0 {
                self.codec.force_key_frame();
            }

            let unit = match self.codec.encode(&frame) {
                Ok(Some(unit)) if !unit.data.is_empty() => unit,
                Ok(_) => continue,
                Err(e) => {
                    events.error(format!("video encode failed: {}", e));
                    break;
                }
            };

            if !format_sent {
                events.format_changed(self.codec.output_format());
                format_sent = true;
            }

            let pts = self.ctx.clock.elapsed_us_at(frame.captured_at).max(last_pts);
            let flags = if unit.key_frame {
                BufferFlags::KEY_FRAME
            } else {
                BufferFlags::NONE
            };
            let info = BufferInfo::new(unit.data.len(), pts, flags);
            events.buffer_available(EncodedBuffer::new(frames as usize, Bytes::from(unit.data), info));

            frames += 1;
            last_pts = pts;
        }

        log::debug!("Video worker exiting after {} frames", frames);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::{EncoderEvent, EncoderEvents};
    use crate::testing::FakeVideoCodec;
    use crate::timing::RecordingClock;

    #[test]
    fn test_surface_frames_become_buffers() {
        let config = VideoEncodeConfig::new(4, 4, 30.0).with_keyframe_interval(2);
        let mut encoder = VideoEncoder::new(config.clone(), Box::new(FakeVideoCodec::new(&config)));
        let (events, rx) = EncoderEvents::channel(StreamKind::Video);
        encoder
            .prepare(EncoderContext {
                clock: RecordingClock::new(),
                events,
            })
            .unwrap();

        let surface = encoder.input_surface().unwrap();
        for _ in 0..3 {
            assert!(surface.push(ScreenFrame::new(vec![0u8; config.frame_bytes()], 4, 4)));
        }

        let first = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(matches!(first.event, EncoderEvent::FormatChanged(_)));

        let mut keys = Vec::new();
        while keys.len() < 3 {
            if let EncoderEvent::BufferAvailable(buffer) =
                rx.recv_timeout(Duration::from_secs(2)).unwrap().event
            {
                keys.push(buffer.info.is_key_frame());
            }
        }
        assert_eq!(keys, vec![true, false, true]);

        encoder.stop();
        let eos = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(matches!(eos.event, EncoderEvent::BufferAvailable(ref b) if b.info.is_end_of_stream()));
        encoder.release();
    }

    #[test]
    fn test_release_without_prepare() {
        let config = VideoEncodeConfig::new(4, 4, 30.0);
        let mut encoder = VideoEncoder::new(config.clone(), Box::new(FakeVideoCodec::new(&config)));
        encoder.stop();
        encoder.release();
        assert!(encoder.input_surface().is_none());
    }

    #[test]
    fn test_release_returns_with_full_event_queue() {
        let config = VideoEncodeConfig::new(4, 4, 30.0);
        let mut encoder = VideoEncoder::new(config.clone(), Box::new(FakeVideoCodec::new(&config)));
        let (events, rx) = EncoderEvents::channel(StreamKind::Video);
        for _ in 0..crate::encoder::EVENT_QUEUE_CAPACITY {
            events.format_changed(FakeVideoCodec::new(&config).output_format());
        }
        encoder
            .prepare(EncoderContext {
                clock: RecordingClock::new(),
                events,
            })
            .unwrap();

        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        thread::spawn(move || {
            encoder.stop();
            encoder.release();
            let _ = done_tx.send(());
        });

        assert!(
            done_rx.recv_timeout(Duration::from_secs(3)).is_ok(),
            "release blocked behind a full event queue"
        );
        // Nothing was drained while releasing
        assert_eq!(rx.len(), crate::encoder::EVENT_QUEUE_CAPACITY);
    }

    #[test]
    fn test_wrong_frame_size_is_reported() {
        let config = VideoEncodeConfig::new(4, 4, 30.0);
        let mut encoder = VideoEncoder::new(config.clone(), Box::new(FakeVideoCodec::new(&config)));
        let (events, rx) = EncoderEvents::channel(StreamKind::Video);
        encoder
            .prepare(EncoderContext {
                clock: RecordingClock::new(),
                events,
            })
            .unwrap();
        encoder.input_surface().unwrap().push(ScreenFrame::new(vec![0u8; 5], 4, 4));

        let event = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(matches!(event.event, EncoderEvent::Error(_)));
        encoder.release();
    }
}
