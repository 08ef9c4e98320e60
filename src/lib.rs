//! crabcast: live screen and audio capture into one synchronized MP4
//!
//! The pipeline runs capture → encode → synchronize → mux while the
//! recording is live:
//! - the audio engine selects and verifies capture sources, mixes them,
//!   handles silence and keeps the encoder fed under backpressure
//! - the video encoder is fed directly by the screen capture binding
//! - the coordinator reconciles both encoder outputs into one monotonic,
//!   pause-aware timeline and writes them to the container sink
//!
//! # Usage
//! Add this to your `Cargo.toml`:
//! ```toml
//! [dependencies]
//! crabcast = { version = "0.1", features = ["full-recording"] }
//! ```
//!
//! Then:
//! ```rust,ignore
//! let config = crabcast::CrabcastConfig::load_or_default();
//! let (parts, recorder_config) = crabcast::recording::assemble(&config, screen)?;
//! let path = config.output_path_for(chrono::Local::now());
//! let mut recorder = crabcast::ScreenRecorder::new(path, recorder_config, parts, callback);
//! recorder.start()?;
//! ```
pub mod audio;
pub mod config;
pub mod encoder;
pub mod errors;
pub mod invariant_ppt;
pub mod recording;
pub mod timing;

// Testing utilities - fakes and synthetic data for offline testing
pub mod testing;

pub use config::CrabcastConfig;
pub use encoder::{Encoder, EncoderContext, EncoderEvent, EncoderEvents, MediaFormat, StreamKind};
pub use errors::{PreparationError, RecorderError, SinkError};
pub use recording::{
    MuxCoordinator, RecorderCallback, RecorderConfig, RecorderParts, RecorderState,
    RecordingStats, ScreenRecorder,
};
pub use timing::RecordingClock;

/// Initialize logging for the recorder
pub fn init_logging() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "crabcast=info");
    }
    let _ = env_logger::try_init();
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Get crate information
pub fn get_info() -> CrateInfo {
    let mut features = Vec::new();
    if cfg!(feature = "recording") {
        features.push("recording".to_string());
    }
    if cfg!(feature = "audio") {
        features.push("audio".to_string());
    }
    CrateInfo {
        name: NAME.to_string(),
        version: VERSION.to_string(),
        description: DESCRIPTION.to_string(),
        platform: std::env::consts::OS.to_string(),
        features,
    }
}

/// Crate information structure
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CrateInfo {
    pub name: String,
    pub version: String,
    pub description: String,
    pub platform: String,
    /// Enabled codec and device backends
    pub features: Vec<String>,
}
