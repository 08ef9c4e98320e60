//! Indexed input/output buffer protocol of an audio encoder
//!
//! Mirrors how hardware encoders are driven: ask for an input slot, fill it,
//! then poll outputs and hand each one back once it has been consumed.
//! Input availability may depend on outstanding outputs, so callers must
//! drain and release outputs before expecting fresh input.

use std::time::Duration;

use bytes::Bytes;

use super::types::CaptureSourceConfig;
use crate::encoder::{BufferFlags, BufferInfo, MediaFormat};
use crate::errors::CodecError;

/// Result of polling the encoder for output
#[derive(Debug)]
pub enum OutputPoll {
    /// Output format is known; reported once before the first buffer
    FormatChanged(MediaFormat),
    Buffer {
        index: usize,
        data: Bytes,
        info: BufferInfo,
    },
    /// Nothing ready yet
    TryAgain,
}

pub trait AudioCodec: Send {
    /// Configure for PCM described by `source` and start accepting input
    fn configure(&mut self, source: &CaptureSourceConfig, bitrate: u32) -> Result<(), CodecError>;

    /// An input slot index, or `None` if none frees up within `timeout`
    fn dequeue_input(&mut self, timeout: Duration) -> Option<usize>;

    /// Bytes the slot at `index` accepts
    fn input_capacity(&self, index: usize) -> usize;

    /// Submit PCM bytes for the slot at `index`
    fn queue_input(
        &mut self,
        index: usize,
        data: &[u8],
        presentation_time_us: i64,
        flags: BufferFlags,
    ) -> Result<(), CodecError>;

    fn dequeue_output(&mut self) -> Result<OutputPoll, CodecError>;

    /// Return a consumed output slot
    fn release_output(&mut self, index: usize);

    fn stop(&mut self);

    fn release(&mut self);
}

/// Decode little-endian 16-bit PCM
pub fn pcm16_from_le_bytes(data: &[u8]) -> impl Iterator<Item = i16> + '_ {
    data.chunks_exact(2).map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcm16_decode_ignores_trailing_byte() {
        let samples: Vec<i16> = pcm16_from_le_bytes(&[0x01, 0x00, 0xFF, 0xFF, 0x7F]).collect();
        assert_eq!(samples, vec![1, -1]);
    }
}
