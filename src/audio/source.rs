//! Capture device seam
//!
//! The engine never talks to a platform API directly. It asks an
//! [`AudioBackend`] to open a [`SourceCandidate`] and reads interleaved
//! 16-bit samples from the returned [`AudioSource`].

use std::fmt;

use super::types::{CaptureSourceConfig, SourceKind};
use crate::errors::SourceError;

/// A concrete device choice, tried in priority order per [`SourceKind`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceCandidate {
    /// Dedicated microphone input
    Microphone,
    /// Generic default input
    Default,
    /// Input co-located with the camera
    Camcorder,
    /// System playback capture (loopback / monitor)
    SystemPlayback,
}

const MICROPHONE_CANDIDATES: [SourceCandidate; 3] = [
    SourceCandidate::Microphone,
    SourceCandidate::Default,
    SourceCandidate::Camcorder,
];

const INTERNAL_CANDIDATES: [SourceCandidate; 1] = [SourceCandidate::SystemPlayback];

impl SourceKind {
    /// Candidates in priority order
    pub fn candidates(self) -> &'static [SourceCandidate] {
        match self {
            SourceKind::Microphone => &MICROPHONE_CANDIDATES,
            SourceKind::Internal => &INTERNAL_CANDIDATES,
        }
    }
}

impl fmt::Display for SourceCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SourceCandidate::Microphone => "mic",
            SourceCandidate::Default => "default",
            SourceCandidate::Camcorder => "camcorder",
            SourceCandidate::SystemPlayback => "system-playback",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    Stopped,
    Recording,
}

/// An opened capture device
///
/// Not `Send`: platform streams are pinned to the thread that opened them,
/// so backends are asked to open sources on the audio worker itself.
pub trait AudioSource {
    /// Begin capturing. Idempotent.
    fn start(&mut self) -> Result<(), SourceError>;

    /// Fill `buf` with interleaved samples, returning how many were written
    fn read(&mut self, buf: &mut [i16]) -> Result<usize, SourceError>;

    fn state(&self) -> SourceState;

    fn stop(&mut self);

    fn release(&mut self);
}

/// Opens capture devices on demand
pub trait AudioBackend: Send {
    fn open(
        &mut self,
        candidate: SourceCandidate,
        config: &CaptureSourceConfig,
    ) -> Result<Box<dyn AudioSource>, SourceError>;
}
