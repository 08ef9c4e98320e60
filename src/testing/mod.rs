//! Testing utilities for crabcast
//!
//! Synthetic content plus in-memory fakes for every seam of the pipeline,
//! so the coordinator and the audio engine can be exercised without
//! capture hardware, codecs or files.

pub mod audio_fakes;
pub mod pipeline_fakes;
pub mod synthetic_data;

pub use audio_fakes::{
    BackendLog, LoopbackCodec, LoopbackStats, ScriptedBackend, ScriptedSource, Signal, SourceScript,
};
pub use pipeline_fakes::{
    CallbackEvent, CollectingCallback, EncoderCalls, FakeVideoCodec, MemorySink, NullScreen,
    SinkRecord, StubEncoder, SyntheticScreen, TrackRejection, WrittenSample,
};
pub use synthetic_data::{sine_samples, synthetic_screen_frame, TONE_FREQUENCY_HZ};
