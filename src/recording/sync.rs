//! Stream synchronizer
//!
//! [`MuxCoordinator`] owns the container sink, the shared clock origin and
//! pause accounting. It is a plain state machine driven by stream events,
//! so it can be exercised without threads; [`ScreenRecorder`] runs it on
//! the `crabcast-muxer` worker.
//!
//! Audio is best-effort throughout: every audio failure short of
//! `audio_required` downgrades the session to video-only. Video failures
//! are always fatal.

use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{select, Receiver, Sender, TryRecvError};

use super::config::{RecorderConfig, RecordingStats};
use super::sink::{ContainerSink, SinkFactory};
use super::timeline::{PauseClock, TrackTimeline};
use super::video::{ScreenCapture, VideoEncoding};
use crate::audio::SourceKind;
use crate::encoder::{
    BufferInfo, EncodedBuffer, Encoder, EncoderContext, EncoderEvent, EncoderEvents,
    MediaFormat, StreamEvent, StreamKind, EVENT_QUEUE_CAPACITY,
};
use crate::errors::{EncoderError, RecorderError, SinkError};
use crate::timing::RecordingClock;

const STATS_INTERVAL: Duration = Duration::from_secs(5);
const IDLE_TICK: Duration = Duration::from_millis(250);

/// Lifecycle of one recording attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    Idle,
    Preparing,
    Recording,
    Paused,
    Stopping,
    Released,
    Error,
}

impl fmt::Display for RecorderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RecorderState::Idle => "idle",
            RecorderState::Preparing => "preparing",
            RecorderState::Recording => "recording",
            RecorderState::Paused => "paused",
            RecorderState::Stopping => "stopping",
            RecorderState::Released => "released",
            RecorderState::Error => "error",
        };
        f.write_str(name)
    }
}

/// Notifications delivered to the embedding application
///
/// Called from the muxer worker. `on_stop` fires exactly once per started
/// recording, with the destination path or the terminal error.
pub trait RecorderCallback: Send + Sync {
    fn on_start(&self);

    fn on_stop(&self, result: Result<PathBuf, RecorderError>);

    /// A sample was written to the container
    fn on_recording(&self, _presentation_time_us: i64) {}

    fn on_internal_audio_not_available(&self, _kind: SourceKind) {}

    /// A source was accepted without passing signal verification
    fn on_weak_audio_signal(&self, _kind: SourceKind) {}

    fn on_silence_detected(&self, _consecutive_frames: u32) {}
}

/// Components one recording is assembled from
pub struct RecorderParts {
    pub video: Box<dyn VideoEncoding>,
    pub audio: Option<Box<dyn Encoder>>,
    pub capture: Box<dyn ScreenCapture>,
    pub sink_factory: SinkFactory,
}

#[derive(Debug, Default)]
struct TrackState {
    format: Option<MediaFormat>,
    index: Option<usize>,
    ended: bool,
    timeline: TrackTimeline,
}

/// Reconciles both encoder outputs into one container timeline
pub struct MuxCoordinator {
    dst: PathBuf,
    config: RecorderConfig,
    callback: Arc<dyn RecorderCallback>,
    events_tx: Sender<StreamEvent>,

    state: Arc<Mutex<RecorderState>>,
    stats: Arc<Mutex<RecordingStats>>,

    video: Box<dyn VideoEncoding>,
    audio: Option<Box<dyn Encoder>>,
    retired_audio: Option<Box<dyn Encoder>>,
    capture: Box<dyn ScreenCapture>,
    sink_factory: Option<SinkFactory>,
    sink: Option<Box<dyn ContainerSink>>,
    sink_started: bool,

    clock: Option<RecordingClock>,
    pause: PauseClock,
    video_track: TrackState,
    audio_track: TrackState,
    pending_video: VecDeque<EncodedBuffer>,
    pending_audio: VecDeque<EncodedBuffer>,

    finished: bool,
    last_stats_log: Option<Instant>,
}

impl MuxCoordinator {
    pub fn new(
        dst: impl Into<PathBuf>,
        config: RecorderConfig,
        parts: RecorderParts,
        callback: Arc<dyn RecorderCallback>,
        events_tx: Sender<StreamEvent>,
    ) -> Self {
        Self {
            dst: dst.into(),
            config,
            callback,
            events_tx,
            state: Arc::new(Mutex::new(RecorderState::Idle)),
            stats: Arc::new(Mutex::new(RecordingStats::default())),
            video: parts.video,
            audio: parts.audio,
            retired_audio: None,
            capture: parts.capture,
            sink_factory: Some(parts.sink_factory),
            sink: None,
            sink_started: false,
            clock: None,
            pause: PauseClock::new(),
            video_track: TrackState::default(),
            audio_track: TrackState::default(),
            pending_video: VecDeque::new(),
            pending_audio: VecDeque::new(),
            finished: false,
            last_stats_log: None,
        }
    }

    pub fn state(&self) -> RecorderState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn stats(&self) -> RecordingStats {
        self.stats.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn is_sink_started(&self) -> bool {
        self.sink_started
    }

    /// Whether the audio stream still takes part in the recording
    pub fn audio_active(&self) -> bool {
        self.audio.is_some()
    }

    pub fn pending_len(&self, stream: StreamKind) -> usize {
        match stream {
            StreamKind::Video => self.pending_video.len(),
            StreamKind::Audio => self.pending_audio.len(),
        }
    }

    pub fn clock(&self) -> Option<&RecordingClock> {
        self.clock.as_ref()
    }

    pub(crate) fn shared_state(&self) -> Arc<Mutex<RecorderState>> {
        self.state.clone()
    }

    pub(crate) fn shared_stats(&self) -> Arc<Mutex<RecordingStats>> {
        self.stats.clone()
    }

    fn set_state(&self, next: RecorderState) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *state != next {
            log::debug!("Recorder state {} -> {}", *state, next);
            *state = next;
        }
    }

    fn track_mut(&mut self, stream: StreamKind) -> &mut TrackState {
        match stream {
            StreamKind::Video => &mut self.video_track,
            StreamKind::Audio => &mut self.audio_track,
        }
    }

    fn context(&self, clock: &RecordingClock, stream: StreamKind) -> EncoderContext {
        EncoderContext {
            clock: clock.clone(),
            events: EncoderEvents::new(stream, self.events_tx.clone()),
        }
    }

    /// Capture the clock origin, open the sink and prepare both encoders.
    /// Returns `false` if the recording failed to start; `on_stop` has
    /// already been called in that case.
    pub fn start(&mut self, now: Instant) -> bool {
        if self.state() != RecorderState::Idle {
            log::warn!("start() ignored in state {}", self.state());
            return false;
        }
        self.set_state(RecorderState::Preparing);

        let clock = RecordingClock::from_instant(now);
        self.clock = Some(clock.clone());

        let factory = match self.sink_factory.take() {
            Some(factory) => factory,
            None => {
                self.fail(RecorderError::State("sink factory already consumed".to_string()));
                return false;
            }
        };
        match factory(&self.dst) {
            Ok(sink) => self.sink = Some(sink),
            Err(e) => {
                self.fail(RecorderError::Muxing(e));
                return false;
            }
        }

        let video_ctx = self.context(&clock, StreamKind::Video);
        if let Err(e) = self.video.prepare(video_ctx) {
            self.fail(e.into());
            return false;
        }

        let surface = match self.video.input_surface() {
            Some(surface) => surface,
            None => {
                self.fail(RecorderError::State("video encoder exposes no input surface".to_string()));
                return false;
            }
        };
        if let Err(e) = self.capture.bind(surface) {
            self.fail(e.into());
            return false;
        }

        let audio_ctx = self.context(&clock, StreamKind::Audio);
        if let Some(mut audio) = self.audio.take() {
            match audio.prepare(audio_ctx) {
                Ok(()) => self.audio = Some(audio),
                Err(e) if self.config.audio_required => {
                    audio.release();
                    self.fail(e.into());
                    return false;
                }
                Err(e) => {
                    log::warn!("{}; recording video only", e);
                    audio.release();
                }
            }
        }

        self.set_state(RecorderState::Recording);
        self.last_stats_log = Some(now);
        log::info!(
            "Recording started to {} (audio: {})",
            self.dst.display(),
            self.audio_active()
        );
        self.callback.on_start();
        true
    }

    /// Dispatch one stream notification
    pub fn handle_event(&mut self, event: StreamEvent, now: Instant) {
        if self.finished {
            return;
        }
        let stream = event.stream;
        match event.event {
            EncoderEvent::FormatChanged(format) => self.on_format(stream, format),
            EncoderEvent::BufferAvailable(buffer) => self.on_buffer(stream, buffer, now),
            EncoderEvent::Error(err) => self.on_stream_error(err),
            EncoderEvent::InternalAudioNotAvailable(kind) => {
                self.callback.on_internal_audio_not_available(kind)
            }
            EncoderEvent::WeakSignal(kind) => self.callback.on_weak_audio_signal(kind),
            EncoderEvent::SilenceDetected { consecutive_frames } => {
                self.callback.on_silence_detected(consecutive_frames)
            }
        }
        self.tick(now);
    }

    pub fn pause(&mut self, at: Instant) {
        if self.state() != RecorderState::Recording {
            return;
        }
        if self.pause.pause(at) {
            self.set_state(RecorderState::Paused);
            log::info!("Recording paused");
        }
    }

    pub fn resume(&mut self, at: Instant) {
        if self.state() != RecorderState::Paused {
            return;
        }
        if let Some(interval) = self.pause.resume(at) {
            self.set_state(RecorderState::Recording);
            log::info!(
                "Recording resumed after {:.3}s (paused total {:.3}s)",
                interval.as_secs_f64(),
                self.pause.paused_total().as_secs_f64()
            );
        }
    }

    /// Caller-requested stop
    pub fn stop(&mut self) {
        if self.finished {
            return;
        }
        if self.state() == RecorderState::Idle {
            self.discard();
            return;
        }
        log::info!("Stop requested");
        self.teardown(None);
    }

    /// Free the components of a recording that never started
    pub fn discard(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.video.release();
        if let Some(mut audio) = self.audio.take() {
            audio.release();
        }
        self.sink_factory = None;
        self.set_state(RecorderState::Released);
    }

    /// Periodic housekeeping
    pub fn tick(&mut self, now: Instant) {
        let due = match self.last_stats_log {
            Some(last) => now.saturating_duration_since(last) >= STATS_INTERVAL,
            None => false,
        };
        if !due || self.finished {
            return;
        }
        self.last_stats_log = Some(now);
        let stats = self.stats();
        log::info!(
            "Recording stats: {} video / {} audio samples, {:.1}s written, {} discarded while paused",
            stats.video_samples,
            stats.audio_samples,
            stats.duration_secs(),
            stats.paused_discards
        );
    }

    fn on_format(&mut self, stream: StreamKind, format: MediaFormat) {
        if stream == StreamKind::Audio && !self.audio_active() {
            return;
        }
        if format.stream() != stream {
            self.on_stream_error(EncoderError::new(
                stream,
                format!("{} stream reported a {} format", stream, format.stream()),
            ));
            return;
        }
        let track = self.track_mut(stream);
        if track.format.is_some() {
            log::warn!("Ignoring repeated {} format report", stream);
            return;
        }
        log::info!("{} format known: {}", stream, format.mime());
        track.format = Some(format);
        self.start_sink_if_ready();
    }

    fn start_sink_if_ready(&mut self) {
        if self.sink_started || self.finished {
            return;
        }
        let video_format = match self.video_track.format.clone() {
            Some(format) => format,
            None => return,
        };
        let audio_format = if self.audio_active() {
            match self.audio_track.format.clone() {
                Some(format) => Some(format),
                None => return,
            }
        } else {
            None
        };

        let added = match self.sink.as_mut() {
            Some(sink) => sink.add_track(&video_format),
            None => Err(SinkError::InvalidState("no container sink".to_string())),
        };
        match added {
            Ok(index) => self.video_track.index = Some(index),
            Err(e) => {
                self.fail(RecorderError::Muxing(e));
                return;
            }
        }

        if let Some(format) = audio_format {
            let added = match self.sink.as_mut() {
                Some(sink) => sink.add_track(&format),
                None => Err(SinkError::InvalidState("no container sink".to_string())),
            };
            match added {
                Ok(index) => self.audio_track.index = Some(index),
                Err(e) if e.is_recoverable_track_error() && !self.config.audio_required => {
                    log::warn!("Audio track rejected ({}), continuing video only", e);
                    self.drop_audio();
                }
                Err(e) => {
                    self.fail(RecorderError::Muxing(e));
                    return;
                }
            }
        }

        let started = match self.sink.as_mut() {
            Some(sink) => sink.start(),
            None => Err(SinkError::InvalidState("no container sink".to_string())),
        };
        if let Err(e) = started {
            self.fail(RecorderError::Muxing(e));
            return;
        }
        self.sink_started = true;
        log::info!(
            "Container sink started, flushing {} video and {} audio buffers",
            self.pending_video.len(),
            self.pending_audio.len()
        );

        let now = Instant::now();
        while let Some(buffer) = self.pending_video.pop_front() {
            self.write_buffer(StreamKind::Video, buffer, now);
            if self.finished {
                return;
            }
        }
        while let Some(buffer) = self.pending_audio.pop_front() {
            if !self.audio_active() {
                break;
            }
            self.write_buffer(StreamKind::Audio, buffer, now);
            if self.finished {
                return;
            }
        }
        self.pending_audio.clear();
    }

    fn on_buffer(&mut self, stream: StreamKind, buffer: EncodedBuffer, now: Instant) {
        if stream == StreamKind::Audio && !self.audio_active() {
            return;
        }
        if self.track_mut(stream).ended {
            return;
        }
        if !self.sink_started {
            match stream {
                StreamKind::Video => self.pending_video.push_back(buffer),
                StreamKind::Audio => self.pending_audio.push_back(buffer),
            }
            return;
        }
        self.write_buffer(stream, buffer, now);
    }

    fn write_buffer(&mut self, stream: StreamKind, buffer: EncodedBuffer, now: Instant) {
        let info = buffer.info;
        let eos = info.is_end_of_stream();

        if self.pause.is_paused() && !eos {
            self.stats.lock().unwrap_or_else(|e| e.into_inner()).paused_discards += 1;
            return;
        }

        // Codec config travels in the track format, not as a sample
        let payload: &[u8] = if info.is_codec_config() {
            &[]
        } else {
            buffer.payload()
        };

        if !payload.is_empty() {
            let clock = match self.clock.clone() {
                Some(clock) => clock,
                None => return,
            };
            let mode = self.config.pts_mode;
            let pause = self.pause.clone();
            let track = self.track_mut(stream);
            let index = match track.index {
                Some(index) => index,
                None => return,
            };
            let pts = track
                .timeline
                .normalize(mode, &clock, &pause, info.presentation_time_us, now);
            let out = BufferInfo::new(payload.len(), pts, info.flags);

            let written = match self.sink.as_mut() {
                Some(sink) => sink.write_sample(index, payload, &out),
                None => Err(SinkError::InvalidState("no container sink".to_string())),
            };
            if let Err(e) = written {
                match stream {
                    StreamKind::Video => self.fail(RecorderError::Muxing(e)),
                    StreamKind::Audio if self.config.audio_required => {
                        self.fail(RecorderError::Muxing(e))
                    }
                    StreamKind::Audio => {
                        log::warn!("Audio sample write failed ({}), continuing video only", e);
                        self.drop_audio();
                    }
                }
                return;
            }

            {
                let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
                match stream {
                    StreamKind::Video => {
                        stats.video_samples += 1;
                        stats.video_bytes += payload.len() as u64;
                        stats.last_video_pts_us = Some(pts);
                    }
                    StreamKind::Audio => {
                        stats.audio_samples += 1;
                        stats.audio_bytes += payload.len() as u64;
                        stats.last_audio_pts_us = Some(pts);
                    }
                }
            }
            self.callback.on_recording(pts);
        }

        if eos {
            self.end_track(stream);
        }
    }

    /// Write the end-of-stream marker and retire the track index
    fn end_track(&mut self, stream: StreamKind) {
        let (index, last_pts) = {
            let track = self.track_mut(stream);
            if track.ended {
                return;
            }
            track.ended = true;
            (track.index.take(), track.timeline.last_pts_us().unwrap_or(0))
        };
        if let Some(index) = index {
            if let Some(sink) = self.sink.as_mut() {
                if let Err(e) = sink.write_sample(index, &[], &BufferInfo::end_of_stream(last_pts)) {
                    log::warn!("Failed to write {} end-of-stream marker: {}", stream, e);
                }
            }
        }
        log::info!("{} track reached end of stream", stream);

        let audio_done = !self.audio_active() || self.audio_track.ended;
        if self.video_track.ended && audio_done {
            self.teardown(None);
        }
    }

    fn on_stream_error(&mut self, err: EncoderError) {
        match err.stream {
            StreamKind::Video => {
                log::error!("{}", err);
                self.fail(err.into());
            }
            StreamKind::Audio if !self.audio_active() => {}
            StreamKind::Audio if self.config.audio_required => {
                log::error!("{}", err);
                self.fail(err.into());
            }
            StreamKind::Audio => {
                log::warn!("{}; continuing video only", err);
                self.drop_audio();
                if self.video_track.ended {
                    self.teardown(None);
                } else {
                    self.start_sink_if_ready();
                }
            }
        }
    }

    /// Stop and discard the audio stream for the rest of the session
    fn drop_audio(&mut self) {
        if let Some(mut audio) = self.audio.take() {
            audio.stop();
            self.retired_audio = Some(audio);
        }
        self.pending_audio.clear();
        if self.sink_started && !self.audio_track.ended && self.audio_track.index.is_some() {
            self.end_track(StreamKind::Audio);
        }
    }

    fn fail(&mut self, err: RecorderError) {
        log::error!("Recording failed: {}", err);
        self.set_state(RecorderState::Error);
        self.teardown(Some(err));
    }

    /// Runs once per recording, on success and failure alike
    fn teardown(&mut self, error: Option<RecorderError>) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.set_state(RecorderState::Stopping);

        guarded("stop video encoder", || self.video.stop());
        if let Some(audio) = self.audio.as_mut() {
            guarded("stop audio encoder", || audio.stop());
        }

        self.pending_video.clear();
        self.pending_audio.clear();

        if self.sink_started {
            for stream in [StreamKind::Video, StreamKind::Audio] {
                let (index, last_pts) = {
                    let track = self.track_mut(stream);
                    if track.ended {
                        continue;
                    }
                    track.ended = true;
                    (track.index.take(), track.timeline.last_pts_us().unwrap_or(0))
                };
                if let (Some(index), Some(sink)) = (index, self.sink.as_mut()) {
                    if let Err(e) = sink.write_sample(index, &[], &BufferInfo::end_of_stream(last_pts)) {
                        log::warn!("Failed to write {} end-of-stream marker: {}", stream, e);
                    }
                }
            }
        }

        let mut error = error;
        if self.sink_started {
            if let Some(sink) = self.sink.as_mut() {
                if let Err(e) = sink.stop() {
                    log::error!("Failed to finalize container: {}", e);
                    if error.is_none() {
                        error = Some(RecorderError::Muxing(e));
                    }
                }
            }
        }

        self.stats.lock().unwrap_or_else(|e| e.into_inner()).output_path = Some(self.dst.clone());
        let result = match error {
            Some(e) => Err(e),
            None => Ok(self.dst.clone()),
        };
        match result {
            Ok(ref path) => log::info!("Recording saved to {}", path.display()),
            Err(ref e) => log::error!("Recording stopped with error: {}", e),
        }
        let callback = self.callback.clone();
        guarded("stop callback", move || callback.on_stop(result));

        guarded("release video encoder", || self.video.release());
        if let Some(mut audio) = self.audio.take() {
            guarded("release audio encoder", move || audio.release());
        }
        if let Some(mut audio) = self.retired_audio.take() {
            guarded("release retired audio encoder", move || audio.release());
        }
        guarded("unbind screen capture", || self.capture.unbind());
        if let Some(mut sink) = self.sink.take() {
            guarded("release sink", move || sink.release());
        }

        self.set_state(RecorderState::Released);
    }
}

/// Run one cleanup step, logging instead of propagating a panic
fn guarded(step: &str, f: impl FnOnce()) {
    if panic::catch_unwind(AssertUnwindSafe(f)).is_err() {
        log::error!("Cleanup step '{}' panicked", step);
    }
}

enum Control {
    Pause(Instant),
    Resume(Instant),
    Stop,
}

/// Handle to a recording running on its own muxer worker
pub struct ScreenRecorder {
    dst: PathBuf,
    control_tx: Sender<Control>,
    state: Arc<Mutex<RecorderState>>,
    stats: Arc<Mutex<RecordingStats>>,
    idle: Option<(MuxCoordinator, Receiver<Control>, Receiver<StreamEvent>)>,
    worker: Option<JoinHandle<()>>,
}

impl ScreenRecorder {
    pub fn new(
        dst: impl Into<PathBuf>,
        config: RecorderConfig,
        parts: RecorderParts,
        callback: Arc<dyn RecorderCallback>,
    ) -> Self {
        let dst = dst.into();
        let (events_tx, events_rx) = crossbeam_channel::bounded(EVENT_QUEUE_CAPACITY);
        let (control_tx, control_rx) = crossbeam_channel::unbounded();
        let coordinator = MuxCoordinator::new(dst.clone(), config, parts, callback, events_tx);

        Self {
            dst,
            control_tx,
            state: coordinator.shared_state(),
            stats: coordinator.shared_stats(),
            idle: Some((coordinator, control_rx, events_rx)),
            worker: None,
        }
    }

    /// Spawn the muxer worker and begin recording
    pub fn start(&mut self) -> Result<(), RecorderError> {
        let (coordinator, control_rx, events_rx) = self
            .idle
            .take()
            .ok_or_else(|| RecorderError::State("recorder already started".to_string()))?;

        let handle = thread::Builder::new()
            .name("crabcast-muxer".to_string())
            .spawn(move || run_muxer(coordinator, control_rx, events_rx))?;
        self.worker = Some(handle);
        Ok(())
    }

    pub fn pause(&self) {
        let _ = self.control_tx.send(Control::Pause(Instant::now()));
    }

    pub fn resume(&self) {
        let _ = self.control_tx.send(Control::Resume(Instant::now()));
    }

    /// Request teardown; use [`wait`](Self::wait) to block until the file is final
    pub fn stop(&mut self) {
        if let Some((mut coordinator, _, _)) = self.idle.take() {
            coordinator.discard();
            return;
        }
        let _ = self.control_tx.send(Control::Stop);
    }

    pub fn state(&self) -> RecorderState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn stats(&self) -> RecordingStats {
        self.stats.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn output_path(&self) -> &Path {
        &self.dst
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state(), RecorderState::Released)
    }

    /// Wait for the muxer worker to finish. Returns `false` on timeout.
    pub fn wait(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.worker.as_ref().map_or(true, |w| w.is_finished()) {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(10));
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("Muxer worker panicked");
            }
        }
        true
    }
}

impl Drop for ScreenRecorder {
    fn drop(&mut self) {
        self.stop();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn run_muxer(
    mut coordinator: MuxCoordinator,
    control_rx: Receiver<Control>,
    events_rx: Receiver<StreamEvent>,
) {
    if !coordinator.start(Instant::now()) {
        return;
    }

    let handle_control = |coordinator: &mut MuxCoordinator, control: Control| match control {
        Control::Pause(at) => coordinator.pause(at),
        Control::Resume(at) => coordinator.resume(at),
        Control::Stop => coordinator.stop(),
    };

    while !coordinator.is_finished() {
        // Control messages take priority over queued stream events
        match control_rx.try_recv() {
            Ok(control) => {
                handle_control(&mut coordinator, control);
                continue;
            }
            Err(TryRecvError::Disconnected) => {
                coordinator.stop();
                break;
            }
            Err(TryRecvError::Empty) => {}
        }

        select! {
            recv(control_rx) -> msg => match msg {
                Ok(control) => handle_control(&mut coordinator, control),
                Err(_) => coordinator.stop(),
            },
            recv(events_rx) -> msg => {
                if let Ok(event) = msg {
                    coordinator.handle_event(event, Instant::now());
                }
            },
            default(IDLE_TICK) => coordinator.tick(Instant::now()),
        }
    }

    log::debug!("Muxer worker exiting");
}
