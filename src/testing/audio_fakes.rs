//! Scripted audio sources and an in-process codec

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use bytes::Bytes;

use super::synthetic_data::sine_samples;
use crate::audio::{
    AudioBackend, AudioCodec, AudioSource, CaptureSourceConfig, OutputPoll, SourceCandidate,
    SourceState,
};
use crate::encoder::{AudioCodecKind, BufferFlags, BufferInfo, MediaFormat};
use crate::errors::{CodecError, SourceError};

/// What a scripted source produces
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Signal {
    Silence,
    /// Every sample holds this value
    Constant(i16),
    /// 440Hz tone
    Tone { amplitude: i16 },
}

/// Behaviour of one scripted capture device
#[derive(Debug, Clone)]
pub struct SourceScript {
    pub signal: Signal,
    pub fail_open: bool,
    pub fail_start: bool,
    /// Reads (probe reads included) after which every read fails with a transient error
    pub fail_reads_after: Option<usize>,
    /// Reads (probe reads included) after which the source reports stopped
    pub stop_after_reads: Option<usize>,
    /// Pacing of each read, standing in for device cadence
    pub read_delay: Duration,
}

impl SourceScript {
    pub fn new(signal: Signal) -> Self {
        Self {
            signal,
            fail_open: false,
            fail_start: false,
            fail_reads_after: None,
            stop_after_reads: None,
            read_delay: Duration::from_millis(2),
        }
    }

    pub fn tone(amplitude: i16) -> Self {
        Self::new(Signal::Tone { amplitude })
    }

    pub fn silence() -> Self {
        Self::new(Signal::Silence)
    }

    pub fn unavailable() -> Self {
        Self {
            fail_open: true,
            ..Self::silence()
        }
    }

    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    pub fn failing_reads(self) -> Self {
        self.failing_reads_after(0)
    }

    /// Pass `reads` reads (enough to clear the probe), then fail every one after
    pub fn failing_reads_after(mut self, reads: usize) -> Self {
        self.fail_reads_after = Some(reads);
        self
    }

    pub fn stop_after(mut self, reads: usize) -> Self {
        self.stop_after_reads = Some(reads);
        self
    }

    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = delay;
        self
    }
}

/// Counters shared between a [`ScriptedBackend`] and the test
#[derive(Debug, Default)]
pub struct BackendLog {
    opened: Mutex<Vec<SourceCandidate>>,
    released: AtomicUsize,
    live: AtomicUsize,
}

impl BackendLog {
    pub fn opened(&self) -> Vec<SourceCandidate> {
        self.opened.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// Sources opened and not yet released
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

/// Sources that play back a [`Signal`]
pub struct ScriptedSource {
    script: SourceScript,
    state: SourceState,
    reads: usize,
    position: u64,
    channels: u16,
    sample_rate: u32,
    log: Arc<BackendLog>,
    released: bool,
}

impl AudioSource for ScriptedSource {
    fn start(&mut self) -> Result<(), SourceError> {
        if self.script.fail_start {
            return Err(SourceError::Start("scripted start failure".to_string()));
        }
        self.state = SourceState::Recording;
        Ok(())
    }

    fn read(&mut self, buf: &mut [i16]) -> Result<usize, SourceError> {
        if self.state == SourceState::Stopped {
            return Err(SourceError::Stopped);
        }
        if let Some(limit) = self.script.stop_after_reads {
            if self.reads >= limit {
                self.state = SourceState::Stopped;
                return Err(SourceError::Stopped);
            }
        }
        self.reads += 1;
        if !self.script.read_delay.is_zero() {
            thread::sleep(self.script.read_delay);
        }
        if self.script.fail_reads_after.is_some_and(|limit| self.reads > limit) {
            return Err(SourceError::Read("scripted read failure".to_string()));
        }

        match self.script.signal {
            Signal::Silence => buf.fill(0),
            Signal::Constant(value) => buf.fill(value),
            Signal::Tone { amplitude } => {
                let channels = self.channels.max(1);
                let frames = buf.len() / channels as usize;
                let tone = sine_samples(self.position, frames, channels, self.sample_rate, amplitude);
                buf[..tone.len()].copy_from_slice(&tone);
                buf[tone.len()..].fill(0);
            }
        }
        self.position += 1;
        Ok(buf.len())
    }

    fn state(&self) -> SourceState {
        self.state
    }

    fn stop(&mut self) {
        self.state = SourceState::Stopped;
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.state = SourceState::Stopped;
            self.log.released.fetch_add(1, Ordering::SeqCst);
            self.log.live.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// [`AudioBackend`] mapping each candidate onto a [`SourceScript`]
///
/// Candidates without a script fail to open.
#[derive(Default)]
pub struct ScriptedBackend {
    scripts: HashMap<SourceCandidate, SourceScript>,
    log: Arc<BackendLog>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, candidate: SourceCandidate, script: SourceScript) -> Self {
        self.scripts.insert(candidate, script);
        self
    }

    pub fn log(&self) -> Arc<BackendLog> {
        self.log.clone()
    }
}

impl AudioBackend for ScriptedBackend {
    fn open(
        &mut self,
        candidate: SourceCandidate,
        config: &CaptureSourceConfig,
    ) -> Result<Box<dyn AudioSource>, SourceError> {
        self.log
            .opened
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(candidate);

        let script = match self.scripts.get(&candidate) {
            Some(script) if !script.fail_open => script.clone(),
            _ => {
                return Err(SourceError::Unavailable(format!(
                    "no scripted device for {}",
                    candidate
                )))
            }
        };

        self.log.live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedSource {
            script,
            state: SourceState::Stopped,
            reads: 0,
            position: 0,
            channels: config.channel_count,
            sample_rate: config.sample_rate,
            log: self.log.clone(),
            released: false,
        }))
    }
}

/// What a [`LoopbackCodec`] saw
#[derive(Debug, Default, Clone)]
pub struct LoopbackStats {
    pub configured: bool,
    pub inputs_queued: usize,
    pub bytes_in: usize,
    pub input_pts: Vec<i64>,
    pub outputs_released: usize,
    pub end_of_stream: bool,
    pub released: bool,
}

/// Codec that hands each input chunk straight back as one output buffer
///
/// Input slots are withheld while too many outputs are outstanding, the
/// way hardware encoders behave.
pub struct LoopbackCodec {
    codec: AudioCodecKind,
    input_slots: usize,
    slot_capacity: usize,
    max_outstanding: usize,
    free_inputs: VecDeque<usize>,
    ready: VecDeque<(usize, Bytes, BufferInfo)>,
    held: HashSet<usize>,
    next_output: usize,
    format: Option<MediaFormat>,
    format_reported: bool,
    running: bool,
    fail_configure: bool,
    stall: Arc<AtomicBool>,
    stats: Arc<Mutex<LoopbackStats>>,
}

impl Default for LoopbackCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackCodec {
    pub fn new() -> Self {
        Self {
            codec: AudioCodecKind::Opus,
            input_slots: 2,
            slot_capacity: 4096,
            max_outstanding: 8,
            free_inputs: VecDeque::new(),
            ready: VecDeque::new(),
            held: HashSet::new(),
            next_output: 0,
            format: None,
            format_reported: false,
            running: false,
            fail_configure: false,
            stall: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(Mutex::new(LoopbackStats::default())),
        }
    }

    /// Report a different output codec, e.g. one the sink cannot take
    pub fn with_codec(mut self, codec: AudioCodecKind) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_slot_capacity(mut self, bytes: usize) -> Self {
        self.slot_capacity = bytes.max(1);
        self
    }

    pub fn failing_configure(mut self) -> Self {
        self.fail_configure = true;
        self
    }

    /// While set, no input slot is offered
    pub fn stall_handle(&self) -> Arc<AtomicBool> {
        self.stall.clone()
    }

    pub fn stats_handle(&self) -> Arc<Mutex<LoopbackStats>> {
        self.stats.clone()
    }

    fn stats(&self) -> std::sync::MutexGuard<'_, LoopbackStats> {
        self.stats.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl AudioCodec for LoopbackCodec {
    fn configure(&mut self, source: &CaptureSourceConfig, _bitrate: u32) -> Result<(), CodecError> {
        if self.fail_configure {
            return Err(CodecError::Configure("scripted configure failure".to_string()));
        }
        self.format = Some(MediaFormat::Audio {
            codec: self.codec,
            sample_rate: source.sample_rate,
            channels: source.channel_count,
        });
        self.free_inputs = (0..self.input_slots).collect();
        self.running = true;
        self.stats().configured = true;
        Ok(())
    }

    fn dequeue_input(&mut self, _timeout: Duration) -> Option<usize> {
        if !self.running || self.stall.load(Ordering::SeqCst) {
            return None;
        }
        if self.ready.len() + self.held.len() >= self.max_outstanding {
            return None;
        }
        self.free_inputs.pop_front()
    }

    fn input_capacity(&self, _index: usize) -> usize {
        self.slot_capacity
    }

    fn queue_input(
        &mut self,
        index: usize,
        data: &[u8],
        presentation_time_us: i64,
        flags: BufferFlags,
    ) -> Result<(), CodecError> {
        if !self.running {
            return Err(CodecError::NotRunning);
        }
        if data.len() > self.slot_capacity {
            return Err(CodecError::InvalidInput(format!(
                "{} bytes exceed slot capacity {}",
                data.len(),
                self.slot_capacity
            )));
        }
        self.free_inputs.push_back(index);

        let eos = flags.contains(BufferFlags::END_OF_STREAM);
        {
            let mut stats = self.stats();
            stats.inputs_queued += 1;
            stats.bytes_in += data.len();
            stats.input_pts.push(presentation_time_us);
            stats.end_of_stream |= eos;
        }

        let output = self.next_output;
        self.next_output += 1;
        let info = if eos {
            BufferInfo::new(data.len(), presentation_time_us, BufferFlags::END_OF_STREAM)
        } else {
            BufferInfo::new(data.len(), presentation_time_us, BufferFlags::KEY_FRAME)
        };
        self.ready
            .push_back((output, Bytes::copy_from_slice(data), info));
        Ok(())
    }

    fn dequeue_output(&mut self) -> Result<OutputPoll, CodecError> {
        if self.ready.is_empty() {
            return Ok(OutputPoll::TryAgain);
        }
        if !self.format_reported {
            if let Some(format) = self.format.clone() {
                self.format_reported = true;
                return Ok(OutputPoll::FormatChanged(format));
            }
        }
        match self.ready.pop_front() {
            Some((index, data, info)) => {
                self.held.insert(index);
                Ok(OutputPoll::Buffer { index, data, info })
            }
            None => Ok(OutputPoll::TryAgain),
        }
    }

    fn release_output(&mut self, index: usize) {
        if self.held.remove(&index) {
            self.stats().outputs_released += 1;
        }
    }

    fn stop(&mut self) {
        self.running = false;
    }

    fn release(&mut self) {
        self.running = false;
        self.ready.clear();
        self.held.clear();
        self.stats().released = true;
    }
}
