//! Container sink abstraction
//!
//! A sink accepts tracks until it is started, then interleaved samples
//! until it is stopped. Stopping finalizes the file; releasing frees
//! whatever is left, finalized or not.

use std::path::Path;

use crate::encoder::{BufferInfo, MediaFormat};
use crate::errors::SinkError;

/// Destination of the synchronized sample stream
pub trait ContainerSink: Send {
    /// Register a track and return its index. Only valid before `start`.
    fn add_track(&mut self, format: &MediaFormat) -> Result<usize, SinkError>;

    fn start(&mut self) -> Result<(), SinkError>;

    /// Write one sample. An empty end-of-stream sample closes the track.
    fn write_sample(&mut self, track: usize, data: &[u8], info: &BufferInfo) -> Result<(), SinkError>;

    /// Finalize the container
    fn stop(&mut self) -> Result<(), SinkError>;

    fn release(&mut self);
}

/// Opens the sink for a destination path once the recording starts
pub type SinkFactory =
    Box<dyn FnOnce(&Path) -> Result<Box<dyn ContainerSink>, SinkError> + Send>;
