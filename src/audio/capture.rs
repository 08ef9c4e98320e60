//! cpal-backed capture source
//!
//! # Spell: AudioCapturePCM16
//! ^ Intent: expose a cpal input stream as a blocking 16-bit PCM reader with bounded memory
//!
//! @CpalSource
//!   : (cpal::Device, CaptureSourceConfig) -> CpalSource
//!   ! produces_interleaved_i16_pcm
//!   ! bounded_buffer
//!   ! start_is_idempotent
//!   ! stop_is_idempotent
//!   ! read_times_out
//!   - unbounded_memory_growth
//!   - blocking_callback

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{SampleFormat, Stream, StreamConfig};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use super::source::{AudioSource, SourceState};
use super::types::CaptureSourceConfig;
use crate::errors::SourceError;

/// Callback chunks buffered before the newest are dropped
const MAX_BUFFER_CHUNKS: usize = 256;

/// Longest a single read waits for the device
const READ_TIMEOUT: Duration = Duration::from_millis(200);

/// Audio input stream read as 16-bit PCM
pub struct CpalSource {
    name: String,
    stream: Option<Stream>,
    receiver: Receiver<Vec<i16>>,
    leftover: VecDeque<i16>,
    is_running: Arc<AtomicBool>,
    failed: Arc<AtomicBool>,
}

impl CpalSource {
    /// Build a paused input stream on `device`
    pub fn open(device: &cpal::Device, config: &CaptureSourceConfig) -> Result<Self, SourceError> {
        let name = device.name().unwrap_or_else(|_| "unknown".to_string());
        let supported = device
            .default_input_config()
            .map_err(|e| SourceError::Unavailable(format!("{}: no input config: {}", name, e)))?;

        let stream_config = StreamConfig {
            channels: config.channel_count,
            sample_rate: cpal::SampleRate(config.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let (sender, receiver) = crossbeam_channel::bounded(MAX_BUFFER_CHUNKS);
        let is_running = Arc::new(AtomicBool::new(false));
        let failed = Arc::new(AtomicBool::new(false));

        let stream = match supported.sample_format() {
            SampleFormat::I16 => build_stream::<i16, _>(
                device,
                &stream_config,
                sender,
                is_running.clone(),
                failed.clone(),
                |s| s,
            ),
            SampleFormat::F32 => build_stream::<f32, _>(
                device,
                &stream_config,
                sender,
                is_running.clone(),
                failed.clone(),
                |s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16,
            ),
            SampleFormat::U16 => build_stream::<u16, _>(
                device,
                &stream_config,
                sender,
                is_running.clone(),
                failed.clone(),
                |s| (s as i32 - 32768) as i16,
            ),
            other => {
                return Err(SourceError::Unavailable(format!(
                    "{}: unsupported sample format {:?}",
                    name, other
                )))
            }
        }
        .map_err(|e| SourceError::Unavailable(format!("{}: failed to build stream: {}", name, e)))?;

        Ok(Self {
            name,
            stream: Some(stream),
            receiver,
            leftover: VecDeque::new(),
            is_running,
            failed,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

fn build_stream<T, F>(
    device: &cpal::Device,
    config: &StreamConfig,
    sender: Sender<Vec<i16>>,
    is_running: Arc<AtomicBool>,
    failed: Arc<AtomicBool>,
    convert: F,
) -> Result<Stream, cpal::BuildStreamError>
where
    T: cpal::SizedSample + Copy,
    F: Fn(T) -> i16 + Send + 'static,
{
    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            if !is_running.load(Ordering::Relaxed) {
                return;
            }
            let chunk: Vec<i16> = data.iter().map(|s| convert(*s)).collect();
            // Never block the device callback
            let _ = sender.try_send(chunk);
        },
        move |err| {
            log::error!("Audio capture error: {}", err);
            failed.store(true, Ordering::Relaxed);
        },
        None,
    )
}

impl AudioSource for CpalSource {
    fn start(&mut self) -> Result<(), SourceError> {
        if self.is_running.load(Ordering::Relaxed) {
            return Ok(());
        }

        let stream = self.stream.as_ref().ok_or(SourceError::Stopped)?;
        stream
            .play()
            .map_err(|e| SourceError::Start(format!("{}: {}", self.name, e)))?;
        self.is_running.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn read(&mut self, buf: &mut [i16]) -> Result<usize, SourceError> {
        let deadline = Instant::now() + READ_TIMEOUT;
        let mut filled = 0;

        loop {
            while filled < buf.len() {
                match self.leftover.pop_front() {
                    Some(sample) => {
                        buf[filled] = sample;
                        filled += 1;
                    }
                    None => break,
                }
            }
            if filled == buf.len() {
                break;
            }
            if self.state() == SourceState::Stopped {
                if filled == 0 {
                    return Err(SourceError::Stopped);
                }
                break;
            }

            match self.receiver.recv_deadline(deadline) {
                Ok(chunk) => self.leftover.extend(chunk),
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(SourceError::Read(format!("{}: stream closed", self.name)))
                }
            }
        }

        Ok(filled)
    }

    fn state(&self) -> SourceState {
        if self.is_running.load(Ordering::Relaxed) && !self.failed.load(Ordering::Relaxed) {
            SourceState::Recording
        } else {
            SourceState::Stopped
        }
    }

    fn stop(&mut self) {
        if !self.is_running.swap(false, Ordering::Relaxed) {
            return;
        }
        if let Some(ref stream) = self.stream {
            if let Err(e) = stream.pause() {
                log::warn!("Failed to pause {}: {}", self.name, e);
            }
        }
    }

    fn release(&mut self) {
        self.stop();
        // Dropping the stream joins cpal's internal threads
        self.stream = None;
        self.leftover.clear();
    }
}

impl Drop for CpalSource {
    fn drop(&mut self) {
        self.release();
    }
}
