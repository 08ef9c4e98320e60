//! Audio capture engine
//!
//! Source selection and signal verification, two-source mixing, silence
//! detection and fill, the encoder backpressure queue and audio PTS policy.
//! The device and codec backends need the `audio` feature:
//! - `device`: cpal device enumeration and the capture backend
//! - `capture`: cpal-backed [`AudioSource`]
//! - `encoder`: Opus [`AudioCodec`]

#[cfg(feature = "audio")]
mod capture;
mod codec;
#[cfg(feature = "audio")]
mod device;
#[cfg(feature = "audio")]
mod encoder;
mod engine;
mod mixer;
mod pending;
mod pts;
mod silence;
mod source;
mod types;
mod verify;

#[cfg(feature = "audio")]
pub use capture::CpalSource;
pub use codec::{pcm16_from_le_bytes, AudioCodec, OutputPoll};
#[cfg(feature = "audio")]
pub use device::{find_candidate_device, list_audio_devices, AudioDevice, CpalBackend};
#[cfg(feature = "audio")]
pub use encoder::OpusCodec;
pub use engine::{AudioCaptureEngine, AudioEngineConfig, AudioMsg, RELEASE_TIMEOUT};
pub use mixer::{max_magnitude, mix_to_bytes, scale_in_place, to_le_bytes, MIC_GAIN};
pub use pending::{
    DrainOutcome, PendingAudioFrame, PendingFrameQueue, PendingQueueStats, MAX_PENDING_FRAMES,
};
pub use pts::{AudioPtsMode, AudioPtsPolicy};
pub use silence::{
    fixed_low_value, is_silent, SilenceMonitor, SilenceObservation, SilentFiller,
    SILENCE_THRESHOLD, SILENCE_WARNING_FRAMES,
};
pub use source::{AudioBackend, AudioSource, SourceCandidate, SourceState};
pub use types::{
    AudioType, CaptureSourceConfig, SampleFormat, SilentFillConfig, SilentFillMode, SourceKind,
};
pub use verify::{
    probe, select_unverified, select_verified, ProbeReport, ProbeSettings, SelectedSource,
    ACCEPT_MAX_MAGNITUDE, ACCEPT_MEAN_MAGNITUDE, ACCEPT_NON_ZERO_PERCENT,
};
