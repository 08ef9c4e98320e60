//! Audio capture engine
//!
//! Owns the capture sources and the audio codec on a dedicated worker
//! thread. Each cycle requests an encoder input slot, drains the pending
//! queue into it, captures and mixes new PCM, applies the silence policy,
//! then drains encoder output to the coordinator. Output slots come back
//! through [`AudioMsg::ReleaseOutput`] when the coordinator drops a buffer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use super::codec::{AudioCodec, OutputPoll};
use super::mixer::{max_magnitude, mix_to_bytes, scale_in_place, to_le_bytes, MIC_GAIN};
use super::pending::{DrainOutcome, PendingAudioFrame, PendingFrameQueue, PendingQueueStats};
use super::pts::{AudioPtsMode, AudioPtsPolicy};
use super::silence::{is_silent, SilenceMonitor, SilentFiller};
use super::source::{AudioBackend, SourceState};
use super::types::{AudioType, CaptureSourceConfig, SilentFillConfig, SourceKind};
use super::verify::{select_unverified, select_verified, ProbeSettings, SelectedSource};
use crate::encoder::{
    BufferFlags, EncodedBuffer, Encoder, EncoderContext, EncoderEvents, ReleaseGuard,
};
use crate::encoder::StreamKind;
use crate::errors::{CodecError, PreparationError, SourceError};

/// How long `release` waits for the worker to confirm device teardown
pub const RELEASE_TIMEOUT: Duration = Duration::from_secs(2);

/// Wait for a second input slot when one capture cycle spills over
const INPUT_SPILL_TIMEOUT: Duration = Duration::from_millis(50);

const STATS_INTERVAL: Duration = Duration::from_secs(5);

/// Interleaved samples read per capture cycle
const DEFAULT_READ_SAMPLES: usize = 2048;

/// Everything the engine needs for one recording
#[derive(Debug, Clone, PartialEq)]
pub struct AudioEngineConfig {
    pub source: CaptureSourceConfig,
    pub bitrate: u32,
    pub silent_fill: SilentFillConfig,
    pub pts_mode: AudioPtsMode,
    pub probe: ProbeSettings,
    pub read_samples: usize,
}

impl Default for AudioEngineConfig {
    fn default() -> Self {
        Self {
            source: CaptureSourceConfig::default(),
            bitrate: 128_000,
            silent_fill: SilentFillConfig::default(),
            pts_mode: AudioPtsMode::WallClock,
            probe: ProbeSettings::default(),
            read_samples: DEFAULT_READ_SAMPLES,
        }
    }
}

impl AudioEngineConfig {
    pub fn new(source: CaptureSourceConfig) -> Self {
        Self {
            source,
            ..Self::default()
        }
    }

    pub fn with_bitrate(mut self, bitrate: u32) -> Self {
        self.bitrate = bitrate;
        self
    }

    pub fn with_silent_fill(mut self, silent_fill: SilentFillConfig) -> Self {
        self.silent_fill = silent_fill;
        self
    }

    pub fn with_pts_mode(mut self, pts_mode: AudioPtsMode) -> Self {
        self.pts_mode = pts_mode;
        self
    }

    pub fn with_probe(mut self, probe: ProbeSettings) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_read_samples(mut self, read_samples: usize) -> Self {
        self.read_samples = read_samples;
        self
    }

    /// Delay before retrying when the encoder offers no input slot
    pub fn feed_retry_delay(&self) -> Duration {
        let rate = self.source.sample_rate.max(1) as u64;
        Duration::from_millis((2_048_000 / rate).max(1))
    }

    fn validate(&self) -> Result<(), PreparationError> {
        let fail = |msg: &str| Err(PreparationError::new(StreamKind::Audio, msg));
        if self.source.sample_rate == 0 {
            return fail("sample rate must be positive");
        }
        if self.source.channel_count == 0 {
            return fail("channel count must be positive");
        }
        if self.read_samples == 0 || self.read_samples % self.source.channel_count as usize != 0 {
            return fail("read size must be a positive multiple of the channel count");
        }
        Ok(())
    }
}

/// Messages handled by the audio worker, in order
#[derive(Debug)]
pub enum AudioMsg {
    /// Open sources and configure the codec, then start feeding
    Prepare,
    Feed,
    Drain,
    ReleaseOutput(usize),
    Stop,
    /// Tear down devices, acknowledge, and exit
    Release(Sender<()>),
}

/// Audio [`Encoder`] backed by capture sources and an [`AudioCodec`]
pub struct AudioCaptureEngine {
    config: AudioEngineConfig,
    backend: Option<Box<dyn AudioBackend>>,
    codec: Option<Box<dyn AudioCodec>>,
    pending: Arc<PendingFrameQueue>,
    force_stop: Arc<AtomicBool>,
    tx: Option<Sender<AudioMsg>>,
    worker: Option<JoinHandle<()>>,
    released: bool,
}

impl AudioCaptureEngine {
    pub fn new(
        config: AudioEngineConfig,
        backend: Box<dyn AudioBackend>,
        codec: Box<dyn AudioCodec>,
    ) -> Self {
        Self {
            config,
            backend: Some(backend),
            codec: Some(codec),
            pending: Arc::new(PendingFrameQueue::new()),
            force_stop: Arc::new(AtomicBool::new(false)),
            tx: None,
            worker: None,
            released: false,
        }
    }

    pub fn config(&self) -> &AudioEngineConfig {
        &self.config
    }

    /// Snapshot of the backpressure queue counters
    pub fn pending_stats(&self) -> PendingQueueStats {
        self.pending.stats()
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some() && !self.force_stop.load(Ordering::SeqCst)
    }
}

impl Encoder for AudioCaptureEngine {
    fn prepare(&mut self, ctx: EncoderContext) -> Result<(), PreparationError> {
        if self.released || self.worker.is_some() {
            return Err(PreparationError::new(
                StreamKind::Audio,
                "audio engine already prepared",
            ));
        }
        self.config.validate()?;

        let backend = self.backend.take();
        let codec = self.codec.take();
        let (backend, codec) = match (backend, codec) {
            (Some(backend), Some(codec)) => (backend, codec),
            _ => {
                return Err(PreparationError::new(
                    StreamKind::Audio,
                    "audio engine resources already consumed",
                ))
            }
        };

        let (tx, rx) = crossbeam_channel::unbounded();
        let parts = WorkerParts {
            config: self.config.clone(),
            backend,
            codec,
            ctx,
            pending: self.pending.clone(),
            force_stop: self.force_stop.clone(),
            tx: tx.clone(),
            rx,
        };

        let worker = thread::Builder::new()
            .name("crabcast-audio".to_string())
            .spawn(move || AudioWorker::new(parts).run())
            .map_err(|e| {
                PreparationError::new(StreamKind::Audio, format!("failed to spawn audio worker: {}", e))
            })?;

        // Cannot fail: the worker holds the receiver until it exits
        let _ = tx.send(AudioMsg::Prepare);
        self.tx = Some(tx);
        self.worker = Some(worker);
        log::info!(
            "Audio engine preparing ({:?}, {} Hz, {} ch)",
            self.config.source.audio_type,
            self.config.source.sample_rate,
            self.config.source.channel_count
        );
        Ok(())
    }

    fn stop(&mut self) {
        if self.force_stop.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(ref tx) = self.tx {
            let _ = tx.send(AudioMsg::Stop);
        }
        log::debug!("Audio engine stop requested");
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.force_stop.store(true, Ordering::SeqCst);

        if let Some(tx) = self.tx.take() {
            let (ack_tx, ack_rx) = crossbeam_channel::bounded(1);
            if tx.send(AudioMsg::Release(ack_tx)).is_ok() {
                match ack_rx.recv_timeout(RELEASE_TIMEOUT) {
                    Ok(()) => {
                        if let Some(worker) = self.worker.take() {
                            if worker.join().is_err() {
                                log::error!("Audio worker panicked during release");
                            }
                        }
                    }
                    Err(_) => {
                        log::warn!(
                            "Audio worker did not confirm release within {:?}, detaching",
                            RELEASE_TIMEOUT
                        );
                        self.worker = None;
                    }
                }
            } else if let Some(worker) = self.worker.take() {
                // Worker already exited on its own
                let _ = worker.join();
            }
        }

        if let Some(mut codec) = self.codec.take() {
            codec.release();
        }
        self.backend = None;
        self.pending.clear();
    }
}

impl Drop for AudioCaptureEngine {
    fn drop(&mut self) {
        self.release();
    }
}

/// Send-able pieces moved onto the worker thread
struct WorkerParts {
    config: AudioEngineConfig,
    backend: Box<dyn AudioBackend>,
    codec: Box<dyn AudioCodec>,
    ctx: EncoderContext,
    pending: Arc<PendingFrameQueue>,
    force_stop: Arc<AtomicBool>,
    tx: Sender<AudioMsg>,
    rx: Receiver<AudioMsg>,
}

enum Capture {
    None,
    Single(SelectedSource),
    Mixed {
        internal: SelectedSource,
        mic: SelectedSource,
    },
}

impl Capture {
    fn for_each(&mut self, mut f: impl FnMut(&mut SelectedSource)) {
        match self {
            Capture::None => {}
            Capture::Single(source) => f(source),
            Capture::Mixed { internal, mic } => {
                f(internal);
                f(mic);
            }
        }
    }
}

/// Result of one capture step
enum Captured {
    Data(Vec<u8>),
    EndOfStream,
    /// Frame consumed without producing input (skipped by the fill policy, empty read)
    Nothing,
    /// Source read failed; try again after the retry delay
    Retry,
}

#[derive(Debug)]
struct EngineStats {
    chunks_queued: u64,
    bytes_queued: u64,
    filled_frames: u64,
    skipped_frames: u64,
    last_log: Instant,
}

struct AudioWorker {
    config: AudioEngineConfig,
    backend: Box<dyn AudioBackend>,
    codec: Box<dyn AudioCodec>,
    events: EncoderEvents,
    pending: Arc<PendingFrameQueue>,
    force_stop: Arc<AtomicBool>,
    tx: Sender<AudioMsg>,
    rx: Receiver<AudioMsg>,
    capture: Capture,
    pts: AudioPtsPolicy,
    monitor: SilenceMonitor,
    filler: SilentFiller,
    in_flight: Vec<usize>,
    /// Input slot dequeued but not filled, reused by the next cycle
    held_input: Option<usize>,
    feed_at: Option<Instant>,
    eos_queued: bool,
    failed: bool,
    primary_buf: Vec<i16>,
    mic_buf: Vec<i16>,
    stats: EngineStats,
}

impl AudioWorker {
    fn new(parts: WorkerParts) -> Self {
        let WorkerParts {
            config,
            backend,
            codec,
            ctx,
            pending,
            force_stop,
            tx,
            rx,
        } = parts;

        let pts = AudioPtsPolicy::new(
            config.pts_mode,
            ctx.clock.clone(),
            config.source.sample_rate,
            config.source.channel_count,
        );
        let filler = SilentFiller::new(config.silent_fill.clone(), Instant::now());
        let read_samples = config.read_samples;

        Self {
            config,
            backend,
            codec,
            events: ctx.events,
            pending,
            force_stop,
            tx,
            rx,
            capture: Capture::None,
            pts,
            monitor: SilenceMonitor::new(),
            filler,
            in_flight: Vec::new(),
            held_input: None,
            feed_at: None,
            eos_queued: false,
            failed: false,
            primary_buf: vec![0; read_samples],
            mic_buf: vec![0; read_samples],
            stats: EngineStats {
                chunks_queued: 0,
                bytes_queued: 0,
                filled_frames: 0,
                skipped_frames: 0,
                last_log: Instant::now(),
            },
        }
    }

    fn stopping(&self) -> bool {
        self.force_stop.load(Ordering::SeqCst)
    }

    fn run(mut self) {
        loop {
            let msg = match self.feed_at {
                Some(at) => {
                    let wait = at.saturating_duration_since(Instant::now());
                    match self.rx.recv_timeout(wait) {
                        Ok(msg) => msg,
                        Err(RecvTimeoutError::Timeout) => AudioMsg::Feed,
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                None => match self.rx.recv() {
                    Ok(msg) => msg,
                    Err(_) => break,
                },
            };

            match msg {
                AudioMsg::Prepare => {
                    if let Err(message) = self.prepare() {
                        self.fail(message);
                    } else {
                        self.feed();
                    }
                }
                AudioMsg::Feed => self.feed(),
                AudioMsg::Drain => self.drain(),
                AudioMsg::ReleaseOutput(index) => {
                    self.codec.release_output(index);
                    if let Some(pos) = self.in_flight.iter().position(|i| *i == index) {
                        self.in_flight.remove(pos);
                    }
                    self.poll_input_if_needed();
                }
                AudioMsg::Stop => self.stop_capture(),
                AudioMsg::Release(ack) => {
                    self.teardown();
                    let _ = ack.send(());
                    break;
                }
            }
        }
        log::debug!("Audio worker exiting");
    }

    fn prepare(&mut self) -> Result<(), String> {
        self.capture = self.open_sources()?;
        if let Err(e) = self.codec.configure(&self.config.source, self.config.bitrate) {
            self.capture.for_each(|s| {
                s.source.stop();
                s.source.release();
            });
            self.capture = Capture::None;
            return Err(format!("audio codec configuration failed: {}", e));
        }
        self.filler = SilentFiller::new(self.config.silent_fill.clone(), Instant::now());
        log::info!("Audio capture started ({})", self.describe_capture());
        Ok(())
    }

    fn describe_capture(&self) -> String {
        match &self.capture {
            Capture::None => "no sources".to_string(),
            Capture::Single(s) => format!("{} via {}", s.kind, s.candidate),
            Capture::Mixed { internal, mic } => format!(
                "mixed: internal via {}, microphone via {}",
                internal.candidate, mic.candidate
            ),
        }
    }

    /// Pick sources for the configured audio type, degrading where possible
    fn open_sources(&mut self) -> Result<Capture, String> {
        let source = self.config.source.clone();
        let probe = self.config.probe;

        let single = |worker: &mut Self, kind: SourceKind| -> Result<Capture, String> {
            if let Some(selected) = select_verified(worker.backend.as_mut(), kind, &source, &probe) {
                return Ok(Capture::Single(selected));
            }
            if let Some(selected) = select_unverified(worker.backend.as_mut(), kind, &source) {
                worker.events.weak_signal(kind);
                return Ok(Capture::Single(selected));
            }
            worker.events.internal_audio_not_available(kind);
            Err(format!("no usable {} audio source", kind))
        };

        match source.audio_type {
            AudioType::Mic => single(self, SourceKind::Microphone),
            AudioType::Internal => single(self, SourceKind::Internal),
            AudioType::MicAndInternal => {
                let mut mic =
                    select_verified(self.backend.as_mut(), SourceKind::Microphone, &source, &probe);
                let mut internal =
                    select_verified(self.backend.as_mut(), SourceKind::Internal, &source, &probe);

                if mic.is_none() && internal.is_none() {
                    mic = select_unverified(self.backend.as_mut(), SourceKind::Microphone, &source);
                    if mic.is_some() {
                        self.events.weak_signal(SourceKind::Microphone);
                    }
                    internal = select_unverified(self.backend.as_mut(), SourceKind::Internal, &source);
                    if internal.is_some() {
                        self.events.weak_signal(SourceKind::Internal);
                    }
                }

                match (mic, internal) {
                    (Some(mic), Some(internal)) => Ok(Capture::Mixed { internal, mic }),
                    (Some(mic), None) => {
                        log::warn!("Internal audio unavailable, recording microphone only");
                        self.events.internal_audio_not_available(SourceKind::Internal);
                        Ok(Capture::Single(mic))
                    }
                    (None, Some(internal)) => {
                        log::warn!("Microphone unavailable, recording internal audio only");
                        self.events.internal_audio_not_available(SourceKind::Microphone);
                        Ok(Capture::Single(internal))
                    }
                    (None, None) => {
                        self.events.internal_audio_not_available(SourceKind::Microphone);
                        self.events.internal_audio_not_available(SourceKind::Internal);
                        Err("no usable audio source".to_string())
                    }
                }
            }
        }
    }

    fn fail(&mut self, message: String) {
        log::error!("Audio engine failed: {}", message);
        self.failed = true;
        self.feed_at = None;
        self.events.error(message);
    }

    /// An outstanding deadline is never moved earlier
    fn schedule_feed(&mut self, at: Instant) {
        if self.feed_at.is_none() {
            self.feed_at = Some(at);
        }
    }

    fn retry_feed_later(&mut self) {
        self.schedule_feed(Instant::now() + self.config.feed_retry_delay());
        self.post_drain();
    }

    fn next_input(&mut self, timeout: Duration) -> Option<usize> {
        self.held_input
            .take()
            .or_else(|| self.codec.dequeue_input(timeout))
    }

    fn feed(&mut self) {
        self.feed_at = None;
        if self.stopping() || self.failed || self.eos_queued {
            return;
        }

        let mut slot = self.next_input(Duration::ZERO);
        if slot.is_none() {
            self.pending.note_buffer_unavailable();
            self.retry_feed_later();
            return;
        }

        // Backlog first, so capture order is preserved
        if !self.pending.is_empty() {
            let sample_bytes = self.config.source.sample_format.bytes_per_sample();
            let codec = &mut self.codec;
            let pts = &mut self.pts;
            let stats = &mut self.stats;
            let outcome = self.pending.drain(|bytes, captured_at| -> Result<usize, CodecError> {
                let index = match slot.take() {
                    Some(index) => index,
                    None => match codec.dequeue_input(Duration::ZERO) {
                        Some(index) => index,
                        None => return Ok(0),
                    },
                };
                let n = bytes.len().min(codec.input_capacity(index));
                if n == 0 {
                    slot = Some(index);
                    return Ok(0);
                }
                let presentation_time_us = pts.next_pts(captured_at, n / sample_bytes);
                codec.queue_input(index, &bytes[..n], presentation_time_us, BufferFlags::KEY_FRAME)?;
                stats.chunks_queued += 1;
                stats.bytes_queued += n as u64;
                Ok(n)
            });

            match outcome {
                Ok(DrainOutcome::Drained) => {}
                Ok(DrainOutcome::Stalled) => {
                    self.held_input = slot;
                    self.retry_feed_later();
                    return;
                }
                Err(e) => {
                    self.fail(format!("audio codec rejected queued input: {}", e));
                    return;
                }
            }

            if slot.is_none() {
                slot = self.codec.dequeue_input(Duration::ZERO);
            }
        }

        let Some(index) = slot else {
            self.pending.note_buffer_unavailable();
            self.retry_feed_later();
            return;
        };

        if self.stopping() {
            self.held_input = Some(index);
            return;
        }
        let now = Instant::now();
        match self.capture_frame(now) {
            Captured::Data(bytes) => self.encode(index, bytes, now),
            Captured::EndOfStream => self.queue_end_of_stream(index, now),
            Captured::Nothing => self.held_input = Some(index),
            Captured::Retry => {
                self.held_input = Some(index);
                self.log_stats_if_needed();
                self.retry_feed_later();
                return;
            }
        }

        self.log_stats_if_needed();
        self.post_drain();
    }

    /// Read, mix and silence-process one frame
    fn capture_frame(&mut self, now: Instant) -> Captured {
        let fill_enabled = self.config.silent_fill.enabled;

        match &mut self.capture {
            Capture::None => Captured::Nothing,
            Capture::Single(selected) => {
                if selected.source.state() == SourceState::Stopped {
                    return Captured::EndOfStream;
                }
                let read = match selected.source.read(&mut self.primary_buf) {
                    Ok(n) => n.min(self.primary_buf.len()),
                    Err(SourceError::Stopped) => return Captured::EndOfStream,
                    Err(e) => {
                        log::warn!("{} read failed: {}", selected.kind, e);
                        return Captured::Retry;
                    }
                };
                if read == 0 {
                    return Captured::Nothing;
                }

                let samples = &self.primary_buf[..read];
                let observation = self.monitor.observe(max_magnitude(samples));
                if observation.warn {
                    self.events.silence_detected(observation.consecutive);
                }

                if fill_enabled && observation.silent {
                    self.stats.filled_frames += 1;
                    match self.filler.apply(samples, now) {
                        Some(bytes) => Captured::Data(bytes),
                        None => {
                            self.stats.skipped_frames += 1;
                            Captured::Nothing
                        }
                    }
                } else {
                    Captured::Data(to_le_bytes(samples))
                }
            }
            Capture::Mixed { internal, mic } => {
                if internal.source.state() == SourceState::Stopped
                    && mic.source.state() == SourceState::Stopped
                {
                    return Captured::EndOfStream;
                }

                let internal_read = internal.source.read(&mut self.primary_buf);
                let mic_read = mic.source.read(&mut self.mic_buf);
                let (internal_n, mic_n) = match (internal_read, mic_read) {
                    (Ok(a), Ok(b)) => (a, b),
                    (Ok(a), Err(e)) => {
                        log::debug!("Microphone read failed, treating as silence: {}", e);
                        let a = a.min(self.mic_buf.len());
                        self.mic_buf[..a].fill(0);
                        (a, a)
                    }
                    (Err(e), Ok(b)) => {
                        log::debug!("Internal audio read failed, treating as silence: {}", e);
                        let b = b.min(self.primary_buf.len());
                        self.primary_buf[..b].fill(0);
                        (b, b)
                    }
                    (Err(a), Err(b)) => {
                        log::warn!("Both audio reads failed ({}; {}), ending stream", a, b);
                        return Captured::EndOfStream;
                    }
                };

                let n = internal_n.min(mic_n).min(self.primary_buf.len()).min(self.mic_buf.len());
                if n == 0 {
                    return Captured::Nothing;
                }

                let internal_max = max_magnitude(&self.primary_buf[..n]);
                let mic_max = max_magnitude(&self.mic_buf[..n]);
                let both_silent = is_silent(internal_max) && is_silent(mic_max);

                let observation = self.monitor.observe(internal_max.max(mic_max));
                if observation.warn {
                    self.events.silence_detected(observation.consecutive);
                }

                if fill_enabled && both_silent {
                    self.stats.filled_frames += 1;
                    match self.filler.apply(&self.primary_buf[..n], now) {
                        Some(bytes) => Captured::Data(bytes),
                        None => {
                            self.stats.skipped_frames += 1;
                            Captured::Nothing
                        }
                    }
                } else {
                    scale_in_place(&mut self.mic_buf[..n], MIC_GAIN);
                    Captured::Data(mix_to_bytes(&self.primary_buf[..n], &self.mic_buf[..n]))
                }
            }
        }
    }

    /// Split `data` across input slots, spilling what does not fit to the pending queue
    fn encode(&mut self, first_index: usize, data: Vec<u8>, captured_at: Instant) {
        let sample_bytes = self.config.source.sample_format.bytes_per_sample();
        let mut index = first_index;
        let mut offset = 0;

        while offset < data.len() {
            if self.stopping() {
                self.held_input = Some(index);
                return;
            }
            let n = (data.len() - offset).min(self.codec.input_capacity(index));
            if n == 0 {
                self.held_input = Some(index);
                break;
            }

            let presentation_time_us = self.pts.next_pts(captured_at, n / sample_bytes);
            if let Err(e) = self.codec.queue_input(
                index,
                &data[offset..offset + n],
                presentation_time_us,
                BufferFlags::KEY_FRAME,
            ) {
                self.fail(format!("audio codec rejected input: {}", e));
                return;
            }
            self.stats.chunks_queued += 1;
            self.stats.bytes_queued += n as u64;
            offset += n;

            if offset < data.len() {
                match self.next_input(INPUT_SPILL_TIMEOUT) {
                    Some(next) => index = next,
                    None => break,
                }
            }
        }

        if offset < data.len() {
            self.pending.note_buffer_unavailable();
            self.pending
                .push_back(PendingAudioFrame::new(data[offset..].to_vec(), captured_at));
        }
    }

    fn queue_end_of_stream(&mut self, index: usize, now: Instant) {
        let presentation_time_us = self.pts.next_pts(now, 0);
        match self
            .codec
            .queue_input(index, &[], presentation_time_us, BufferFlags::END_OF_STREAM)
        {
            Ok(()) => {
                log::info!("Audio source ended, end of stream queued");
                self.eos_queued = true;
            }
            Err(e) => self.fail(format!("failed to queue audio end of stream: {}", e)),
        }
    }

    fn post_drain(&self) {
        let _ = self.tx.send(AudioMsg::Drain);
    }

    fn drain(&mut self) {
        if self.stopping() {
            return;
        }

        loop {
            match self.codec.dequeue_output() {
                Ok(OutputPoll::FormatChanged(format)) => {
                    log::info!("Audio output format: {}", format.mime());
                    self.events.format_changed(format);
                }
                Ok(OutputPoll::Buffer { index, data, info }) => {
                    self.in_flight.push(index);
                    let tx = self.tx.clone();
                    let buffer = EncodedBuffer::new(index, data, info).with_release(ReleaseGuard::new(
                        move || {
                            let _ = tx.send(AudioMsg::ReleaseOutput(index));
                        },
                    ));
                    self.events.buffer_available(buffer);
                }
                Ok(OutputPoll::TryAgain) => break,
                Err(e) => {
                    self.fail(format!("audio codec output failed: {}", e));
                    return;
                }
            }
            if self.stopping() {
                return;
            }
        }

        self.poll_input_if_needed();
    }

    fn poll_input_if_needed(&mut self) {
        if self.in_flight.len() <= 1 && !self.stopping() && !self.failed && !self.eos_queued {
            self.schedule_feed(Instant::now());
        }
    }

    fn stop_capture(&mut self) {
        self.feed_at = None;
        self.held_input = None;
        self.capture.for_each(|s| s.source.stop());
        self.codec.stop();
        log::info!("Audio capture stopped");
    }

    fn teardown(&mut self) {
        self.feed_at = None;
        self.held_input = None;
        self.capture.for_each(|s| {
            s.source.stop();
            s.source.release();
        });
        self.capture = Capture::None;
        self.codec.release();
        self.pending.clear();
        self.in_flight.clear();
        log::debug!("Audio devices released");
    }

    fn log_stats_if_needed(&mut self) {
        if self.stats.last_log.elapsed() < STATS_INTERVAL {
            return;
        }
        self.stats.last_log = Instant::now();
        let queue = self.pending.stats();
        log::info!(
            "Audio: {} chunks / {} bytes encoded, {} silent frames filled ({} skipped), pending {} (max {}), dropped {} ({} bytes), input unavailable {}",
            self.stats.chunks_queued,
            self.stats.bytes_queued,
            self.stats.filled_frames,
            self.stats.skipped_frames,
            queue.depth,
            queue.max_depth,
            queue.dropped_frames,
            queue.dropped_bytes,
            queue.buffer_unavailable
        );
    }
}
