//! In-memory stand-ins for the video codec, screen capture, sink and callback

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;

use super::synthetic_data::synthetic_screen_frame;
use crate::audio::SourceKind;
use crate::encoder::{BufferInfo, Encoder, EncoderContext, MediaFormat, StreamKind, VideoCodecKind};
use crate::errors::{CodecError, PreparationError, RecorderError, SinkError};
use crate::recording::{
    ContainerSink, EncodedUnit, InputSurface, RecorderCallback, ScreenCapture, ScreenFrame,
    SinkFactory, VideoCodec, VideoEncodeConfig, VideoEncoding,
};

/// Video codec emitting a tiny Annex B-looking unit per frame
pub struct FakeVideoCodec {
    width: u32,
    height: u32,
    fps: f64,
    frames: u64,
    force_key: bool,
    fail_after: Option<u64>,
}

impl FakeVideoCodec {
    pub fn new(config: &VideoEncodeConfig) -> Self {
        Self {
            width: config.width,
            height: config.height,
            fps: config.fps,
            frames: 0,
            force_key: true,
            fail_after: None,
        }
    }

    /// Fail every encode after `frames` successful ones
    pub fn failing_after(mut self, frames: u64) -> Self {
        self.fail_after = Some(frames);
        self
    }
}

impl VideoCodec for FakeVideoCodec {
    fn output_format(&self) -> MediaFormat {
        MediaFormat::Video {
            codec: VideoCodecKind::H264,
            width: self.width,
            height: self.height,
            fps: self.fps,
        }
    }

    fn encode(&mut self, _frame: &ScreenFrame) -> Result<Option<EncodedUnit>, CodecError> {
        if let Some(limit) = self.fail_after {
            if self.frames >= limit {
                return Err(CodecError::Encode("scripted encode failure".to_string()));
            }
        }
        let key_frame = std::mem::replace(&mut self.force_key, false);
        let mut data = vec![0x00, 0x00, 0x00, 0x01, if key_frame { 0x65 } else { 0x41 }];
        data.extend_from_slice(&self.frames.to_be_bytes());
        self.frames += 1;
        Ok(Some(EncodedUnit { data, key_frame }))
    }

    fn force_key_frame(&mut self) {
        self.force_key = true;
    }
}

/// Lifecycle calls observed on a [`StubEncoder`]
#[derive(Debug, Default)]
pub struct EncoderCalls {
    pub prepared: AtomicUsize,
    pub stopped: AtomicUsize,
    pub released: AtomicUsize,
}

impl EncoderCalls {
    pub fn prepared(&self) -> usize {
        self.prepared.load(Ordering::SeqCst)
    }

    pub fn stopped(&self) -> usize {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

/// Encoder that produces nothing on its own
///
/// Tests drive the coordinator with hand-made events and use this only to
/// observe lifecycle calls.
pub struct StubEncoder {
    stream: StreamKind,
    fail_prepare: bool,
    calls: Arc<EncoderCalls>,
    surface: Option<(InputSurface, Receiver<ScreenFrame>)>,
}

impl StubEncoder {
    pub fn video() -> Self {
        Self::new(StreamKind::Video)
    }

    pub fn audio() -> Self {
        Self::new(StreamKind::Audio)
    }

    fn new(stream: StreamKind) -> Self {
        Self {
            stream,
            fail_prepare: false,
            calls: Arc::new(EncoderCalls::default()),
            surface: None,
        }
    }

    pub fn failing_prepare(mut self) -> Self {
        self.fail_prepare = true;
        self
    }

    pub fn calls(&self) -> Arc<EncoderCalls> {
        self.calls.clone()
    }
}

impl Encoder for StubEncoder {
    fn prepare(&mut self, _ctx: EncoderContext) -> Result<(), PreparationError> {
        self.calls.prepared.fetch_add(1, Ordering::SeqCst);
        if self.fail_prepare {
            return Err(PreparationError::new(self.stream, "scripted preparation failure"));
        }
        if self.stream == StreamKind::Video {
            self.surface = Some(InputSurface::channel(16, 16, 4));
        }
        Ok(())
    }

    fn stop(&mut self) {
        self.calls.stopped.fetch_add(1, Ordering::SeqCst);
    }

    fn release(&mut self) {
        self.calls.released.fetch_add(1, Ordering::SeqCst);
        self.surface = None;
    }
}

impl VideoEncoding for StubEncoder {
    fn input_surface(&self) -> Option<InputSurface> {
        self.surface.as_ref().map(|(surface, _)| surface.clone())
    }
}

/// Screen capture binding that renders synthetic frames at a fixed rate
pub struct SyntheticScreen {
    fps: f64,
    running: Arc<AtomicBool>,
    frames_pushed: Arc<AtomicU64>,
    bind_count: Arc<AtomicUsize>,
    worker: Option<JoinHandle<()>>,
}

impl SyntheticScreen {
    pub fn new(fps: f64) -> Self {
        Self {
            fps: if fps > 0.0 { fps } else { 30.0 },
            running: Arc::new(AtomicBool::new(false)),
            frames_pushed: Arc::new(AtomicU64::new(0)),
            bind_count: Arc::new(AtomicUsize::new(0)),
            worker: None,
        }
    }

    pub fn frames_pushed(&self) -> Arc<AtomicU64> {
        self.frames_pushed.clone()
    }

    pub fn is_bound(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    pub fn bind_count(&self) -> Arc<AtomicUsize> {
        self.bind_count.clone()
    }
}

impl ScreenCapture for SyntheticScreen {
    fn bind(&mut self, surface: InputSurface) -> Result<(), PreparationError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(PreparationError::new(StreamKind::Video, "screen already bound"));
        }
        self.bind_count.fetch_add(1, Ordering::SeqCst);

        let running = self.running.clone();
        let pushed = self.frames_pushed.clone();
        let interval = Duration::from_secs_f64(1.0 / self.fps);
        let worker = thread::Builder::new()
            .name("crabcast-synthetic-screen".to_string())
            .spawn(move || {
                let mut frame_number = 0u64;
                let mut next = Instant::now();
                while running.load(Ordering::SeqCst) {
                    let frame = synthetic_screen_frame(frame_number, surface.width(), surface.height());
                    if surface.push(frame) {
                        pushed.fetch_add(1, Ordering::SeqCst);
                    }
                    frame_number += 1;
                    next += interval;
                    thread::sleep(next.saturating_duration_since(Instant::now()));
                }
            })
            .map_err(|e| PreparationError::new(StreamKind::Video, e.to_string()))?;
        self.worker = Some(worker);
        Ok(())
    }

    fn unbind(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for SyntheticScreen {
    fn drop(&mut self) {
        self.unbind();
    }
}

/// Screen capture binding that never renders anything
#[derive(Debug, Default)]
pub struct NullScreen {
    pub fail_bind: bool,
}

impl ScreenCapture for NullScreen {
    fn bind(&mut self, _surface: InputSurface) -> Result<(), PreparationError> {
        if self.fail_bind {
            return Err(PreparationError::new(StreamKind::Video, "screen capture revoked"));
        }
        Ok(())
    }

    fn unbind(&mut self) {}
}

/// One `write_sample` call seen by a [`MemorySink`]
#[derive(Debug, Clone, PartialEq)]
pub struct WrittenSample {
    pub track: usize,
    pub presentation_time_us: i64,
    pub size: usize,
    pub key_frame: bool,
    pub end_of_stream: bool,
}

/// Everything a [`MemorySink`] recorded
#[derive(Debug, Default, Clone)]
pub struct SinkRecord {
    pub path: Option<PathBuf>,
    pub tracks: Vec<MediaFormat>,
    pub samples: Vec<WrittenSample>,
    pub started: bool,
    pub stopped: bool,
    pub released: bool,
}

impl SinkRecord {
    pub fn track_of(&self, stream: StreamKind) -> Option<usize> {
        self.tracks.iter().position(|format| format.stream() == stream)
    }

    /// Timestamps of the non-empty samples written to `track`
    pub fn pts_for(&self, track: usize) -> Vec<i64> {
        self.samples
            .iter()
            .filter(|s| s.track == track && !s.end_of_stream)
            .map(|s| s.presentation_time_us)
            .collect()
    }

    pub fn end_of_stream_tracks(&self) -> Vec<usize> {
        self.samples
            .iter()
            .filter(|s| s.end_of_stream)
            .map(|s| s.track)
            .collect()
    }
}

/// Which track additions a [`MemorySink`] refuses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackRejection {
    None,
    AudioUnsupported,
    VideoFatal,
}

/// [`ContainerSink`] that records calls instead of writing a file
pub struct MemorySink {
    record: Arc<Mutex<SinkRecord>>,
    rejection: TrackRejection,
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySink {
    pub fn new() -> Self {
        Self {
            record: Arc::new(Mutex::new(SinkRecord::default())),
            rejection: TrackRejection::None,
        }
    }

    pub fn rejecting(mut self, rejection: TrackRejection) -> Self {
        self.rejection = rejection;
        self
    }

    pub fn record(&self) -> Arc<Mutex<SinkRecord>> {
        self.record.clone()
    }

    pub fn into_factory(self) -> SinkFactory {
        Box::new(move |path: &Path| {
            self.lock().path = Some(path.to_path_buf());
            let sink: Box<dyn ContainerSink> = Box::new(self);
            Ok(sink)
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SinkRecord> {
        self.record.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ContainerSink for MemorySink {
    fn add_track(&mut self, format: &MediaFormat) -> Result<usize, SinkError> {
        match (self.rejection, format.stream()) {
            (TrackRejection::AudioUnsupported, StreamKind::Audio) => {
                return Err(SinkError::UnsupportedFormat(format.mime().to_string()))
            }
            (TrackRejection::VideoFatal, StreamKind::Video) => {
                return Err(SinkError::Muxer("video track rejected".to_string()))
            }
            _ => {}
        }
        let mut record = self.lock();
        if record.started {
            return Err(SinkError::InvalidState("sink already started".to_string()));
        }
        record.tracks.push(format.clone());
        Ok(record.tracks.len() - 1)
    }

    fn start(&mut self) -> Result<(), SinkError> {
        let mut record = self.lock();
        if record.started {
            return Err(SinkError::InvalidState("sink already started".to_string()));
        }
        record.started = true;
        Ok(())
    }

    fn write_sample(&mut self, track: usize, data: &[u8], info: &BufferInfo) -> Result<(), SinkError> {
        let mut record = self.lock();
        if !record.started || record.stopped {
            return Err(SinkError::InvalidState("sink is not accepting samples".to_string()));
        }
        if track >= record.tracks.len() {
            return Err(SinkError::InvalidState(format!("unknown track {}", track)));
        }
        record.samples.push(WrittenSample {
            track,
            presentation_time_us: info.presentation_time_us,
            size: data.len(),
            key_frame: info.is_key_frame(),
            end_of_stream: info.is_end_of_stream(),
        });
        Ok(())
    }

    fn stop(&mut self) -> Result<(), SinkError> {
        let mut record = self.lock();
        if !record.started {
            return Err(SinkError::InvalidState("sink was never started".to_string()));
        }
        record.stopped = true;
        Ok(())
    }

    fn release(&mut self) {
        self.lock().released = true;
    }
}

/// Callback notifications, in arrival order
#[derive(Debug, Clone, PartialEq)]
pub enum CallbackEvent {
    Started,
    /// Destination path, or the error rendered as text
    Stopped(Result<PathBuf, String>),
    Recording(i64),
    InternalAudioNotAvailable(SourceKind),
    WeakSignal(SourceKind),
    SilenceDetected(u32),
}

/// [`RecorderCallback`] that keeps everything it is told
#[derive(Debug, Default)]
pub struct CollectingCallback {
    events: Mutex<Vec<CallbackEvent>>,
}

impl CollectingCallback {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn push(&self, event: CallbackEvent) {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).push(event);
    }

    pub fn events(&self) -> Vec<CallbackEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn start_count(&self) -> usize {
        self.events().iter().filter(|e| **e == CallbackEvent::Started).count()
    }

    pub fn stop_results(&self) -> Vec<Result<PathBuf, String>> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                CallbackEvent::Stopped(result) => Some(result),
                _ => None,
            })
            .collect()
    }

    pub fn recorded_pts(&self) -> Vec<i64> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                CallbackEvent::Recording(pts) => Some(pts),
                _ => None,
            })
            .collect()
    }

    pub fn unavailable_kinds(&self) -> Vec<SourceKind> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                CallbackEvent::InternalAudioNotAvailable(kind) => Some(kind),
                _ => None,
            })
            .collect()
    }

    /// Poll until `on_stop` has fired or `timeout` passes
    pub fn wait_for_stop(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if !self.stop_results().is_empty() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(5));
        }
    }
}

impl RecorderCallback for CollectingCallback {
    fn on_start(&self) {
        self.push(CallbackEvent::Started);
    }

    fn on_stop(&self, result: Result<PathBuf, RecorderError>) {
        self.push(CallbackEvent::Stopped(result.map_err(|e| e.to_string())));
    }

    fn on_recording(&self, presentation_time_us: i64) {
        self.push(CallbackEvent::Recording(presentation_time_us));
    }

    fn on_internal_audio_not_available(&self, kind: SourceKind) {
        self.push(CallbackEvent::InternalAudioNotAvailable(kind));
    }

    fn on_weak_audio_signal(&self, kind: SourceKind) {
        self.push(CallbackEvent::WeakSignal(kind));
    }

    fn on_silence_detected(&self, consecutive_frames: u32) {
        self.push(CallbackEvent::SilenceDetected(consecutive_frames));
    }
}
