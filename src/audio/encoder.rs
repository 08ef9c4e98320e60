//! Opus audio codec
//!
//! # Spell: AudioEncodeOpus
//! ^ Intent: encode 16-bit PCM into Opus packets through the indexed buffer protocol
//!
//! @OpusCodec
//!
//! - pcm16_slot -> opus_packet
//! - operates_at_48khz
//! - one_packet_per_20ms
//! - input_gated_by_unreleased_outputs
//! - end_of_stream_flushes_padded_frame
//! - no hidden_resampling

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use bytes::Bytes;

use super::codec::{pcm16_from_le_bytes, AudioCodec, OutputPoll};
use super::types::CaptureSourceConfig;
use crate::encoder::{AudioCodecKind, BufferFlags, BufferInfo, MediaFormat};
use crate::errors::CodecError;

/// 20ms at 48kHz, per channel
const OPUS_FRAME_SAMPLES: usize = 960;

/// OPUS_APPLICATION_AUDIO from opus.h
const OPUS_APPLICATION_AUDIO: i32 = 2049;

/// Largest packet libopus will produce
const MAX_PACKET_BYTES: usize = 4000;

/// Outputs allowed to be queued or held by the consumer before input is refused
const MAX_OUTSTANDING_OUTPUTS: usize = 8;

/// Input slot size in Opus frames
const FRAMES_PER_INPUT_SLOT: usize = 2;

/// Opus encoder speaking the indexed buffer protocol
///
/// # Thread Safety
/// `Send` so the codec can move onto the audio worker. libopus is not safe
/// for concurrent access, so this type is neither `Clone` nor `Sync`.
pub struct OpusCodec {
    encoder: *mut libopus_sys::OpusEncoder,
    channels: u16,
    sample_rate: u32,
    sample_buffer: Vec<f32>,
    /// Timestamp of the first sample in `sample_buffer`
    buffer_start_pts: Option<i64>,
    last_pts: i64,
    outputs: VecDeque<(usize, Bytes, BufferInfo)>,
    outstanding: HashSet<usize>,
    next_output_index: usize,
    format_pending: bool,
    running: bool,
}

// SAFETY: the libopus encoder is only ever touched through `&mut self`,
// and the type is not `Sync`, so at most one thread uses it at a time.
unsafe impl Send for OpusCodec {}

impl Default for OpusCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl OpusCodec {
    pub fn new() -> Self {
        Self {
            encoder: std::ptr::null_mut(),
            channels: 0,
            sample_rate: 0,
            sample_buffer: Vec::new(),
            buffer_start_pts: None,
            last_pts: 0,
            outputs: VecDeque::new(),
            outstanding: HashSet::new(),
            next_output_index: 0,
            format_pending: false,
            running: false,
        }
    }

    fn samples_per_frame(&self) -> usize {
        OPUS_FRAME_SAMPLES * self.channels as usize
    }

    fn frame_duration_us(&self) -> i64 {
        OPUS_FRAME_SAMPLES as i64 * 1_000_000 / self.sample_rate as i64
    }

    fn encode_buffered_frames(&mut self) -> Result<(), CodecError> {
        let samples_per_frame = self.samples_per_frame();
        while self.sample_buffer.len() >= samples_per_frame {
            let frame: Vec<f32> = self.sample_buffer.drain(..samples_per_frame).collect();
            let pts = self.buffer_start_pts.unwrap_or(self.last_pts);

            let mut packet = vec![0u8; MAX_PACKET_BYTES];
            let len = unsafe {
                libopus_sys::opus_encode_float(
                    self.encoder,
                    frame.as_ptr(),
                    OPUS_FRAME_SAMPLES as i32,
                    packet.as_mut_ptr(),
                    packet.len() as i32,
                )
            };
            if len < 0 {
                return Err(CodecError::Encode(format!("opus error code {}", len)));
            }
            packet.truncate(len as usize);

            self.push_output(Bytes::from(packet), pts, BufferFlags::NONE);
            self.last_pts = pts;
            self.buffer_start_pts = Some(pts + self.frame_duration_us());
        }

        if self.sample_buffer.is_empty() {
            self.buffer_start_pts = None;
        }
        Ok(())
    }

    fn push_output(&mut self, data: Bytes, pts: i64, flags: BufferFlags) {
        let index = self.next_output_index;
        self.next_output_index = self.next_output_index.wrapping_add(1);
        let info = BufferInfo::new(data.len(), pts, flags);
        self.outputs.push_back((index, data, info));
    }

    fn destroy(&mut self) {
        if !self.encoder.is_null() {
            unsafe { libopus_sys::opus_encoder_destroy(self.encoder) };
            self.encoder = std::ptr::null_mut();
        }
    }
}

impl AudioCodec for OpusCodec {
    fn configure(&mut self, source: &CaptureSourceConfig, bitrate: u32) -> Result<(), CodecError> {
        if source.sample_rate != 48000 {
            return Err(CodecError::Configure(
                "Opus requires 48000 Hz sample rate".to_string(),
            ));
        }
        if source.channel_count != 1 && source.channel_count != 2 {
            return Err(CodecError::Configure(
                "Opus supports only mono (1) or stereo (2) channels".to_string(),
            ));
        }

        self.destroy();

        let mut error: i32 = 0;
        let encoder = unsafe {
            libopus_sys::opus_encoder_create(
                source.sample_rate as i32,
                source.channel_count as i32,
                OPUS_APPLICATION_AUDIO,
                &mut error,
            )
        };
        if encoder.is_null() || error != 0 {
            return Err(CodecError::Configure(format!(
                "failed to create Opus encoder: error code {}",
                error
            )));
        }

        let result = unsafe {
            libopus_sys::opus_encoder_ctl(
                encoder,
                libopus_sys::OPUS_SET_BITRATE_REQUEST as i32,
                bitrate as i32,
            )
        };
        if result != 0 {
            unsafe { libopus_sys::opus_encoder_destroy(encoder) };
            return Err(CodecError::Configure(format!(
                "failed to set bitrate: error code {}",
                result
            )));
        }

        self.encoder = encoder;
        self.channels = source.channel_count;
        self.sample_rate = source.sample_rate;
        self.sample_buffer = Vec::with_capacity(OPUS_FRAME_SAMPLES * source.channel_count as usize * 2);
        self.format_pending = true;
        self.running = true;
        Ok(())
    }

    fn dequeue_input(&mut self, _timeout: Duration) -> Option<usize> {
        // Encoding happens inline in queue_input, so waiting cannot free a slot
        if !self.running || self.outputs.len() + self.outstanding.len() >= MAX_OUTSTANDING_OUTPUTS {
            return None;
        }
        Some(0)
    }

    fn input_capacity(&self, _index: usize) -> usize {
        self.samples_per_frame() * FRAMES_PER_INPUT_SLOT * 2
    }

    fn queue_input(
        &mut self,
        _index: usize,
        data: &[u8],
        presentation_time_us: i64,
        flags: BufferFlags,
    ) -> Result<(), CodecError> {
        if !self.running {
            return Err(CodecError::NotRunning);
        }
        if data.len() % 2 != 0 {
            return Err(CodecError::InvalidInput(format!(
                "odd PCM16 byte length {}",
                data.len()
            )));
        }

        if !data.is_empty() {
            if self.buffer_start_pts.is_none() {
                self.buffer_start_pts = Some(presentation_time_us.max(self.last_pts));
            }
            self.sample_buffer
                .extend(pcm16_from_le_bytes(data).map(|s| s as f32 / 32768.0));
            self.encode_buffered_frames()?;
        }

        if flags.contains(BufferFlags::END_OF_STREAM) {
            let samples_per_frame = self.samples_per_frame();
            let remainder = self.sample_buffer.len() % samples_per_frame;
            if remainder != 0 {
                self.sample_buffer
                    .extend(std::iter::repeat(0.0f32).take(samples_per_frame - remainder));
                self.encode_buffered_frames()?;
            }
            let eos_pts = self.last_pts.max(presentation_time_us);
            self.push_output(Bytes::new(), eos_pts, BufferFlags::END_OF_STREAM);
            self.running = false;
        }
        Ok(())
    }

    fn dequeue_output(&mut self) -> Result<OutputPoll, CodecError> {
        if self.format_pending {
            self.format_pending = false;
            return Ok(OutputPoll::FormatChanged(MediaFormat::Audio {
                codec: AudioCodecKind::Opus,
                sample_rate: self.sample_rate,
                channels: self.channels,
            }));
        }

        match self.outputs.pop_front() {
            Some((index, data, info)) => {
                self.outstanding.insert(index);
                Ok(OutputPoll::Buffer { index, data, info })
            }
            None => Ok(OutputPoll::TryAgain),
        }
    }

    fn release_output(&mut self, index: usize) {
        self.outstanding.remove(&index);
    }

    fn stop(&mut self) {
        self.running = false;
    }

    fn release(&mut self) {
        self.running = false;
        self.outputs.clear();
        self.outstanding.clear();
        self.sample_buffer.clear();
        self.destroy();
    }
}

impl Drop for OpusCodec {
    fn drop(&mut self) {
        self.destroy();
    }
}
