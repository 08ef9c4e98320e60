//! Audio device enumeration and the cpal backend
//!
//! # Spell: AudioDeviceEnumerate
//!
//! Intent: enumerate input devices and map capture candidates onto them
//!
//! ## Features
//!
//! - `system_inputs -> Vec<AudioDevice>`
//! - includes(id, name, sample_rate, channels, is_default)
//! - deterministic_ordering
//! - candidate -> device by name hints, default input last resort for Default only
//! - no starting_audio_capture during enumeration

use cpal::traits::{DeviceTrait, HostTrait};
use serde::{Deserialize, Serialize};

use super::capture::CpalSource;
use super::source::{AudioBackend, AudioSource, SourceCandidate};
use super::types::CaptureSourceConfig;
use crate::errors::SourceError;

/// Audio input device information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioDevice {
    /// Stable-ish identifier, `audio_{index}_{name hash}`
    pub id: String,
    pub name: String,
    /// Default sample rate in Hz
    pub sample_rate: u32,
    pub channels: u16,
    pub is_default: bool,
}

fn device_id(index: usize, name: &str) -> String {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    name.hash(&mut hasher);
    format!("audio_{}_{:08x}", index, hasher.finish() & 0xFFFF_FFFF)
}

/// List audio input devices, default first then alphabetical
pub fn list_audio_devices() -> Result<Vec<AudioDevice>, SourceError> {
    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    let mut devices: Vec<AudioDevice> = host
        .input_devices()
        .map_err(|e| SourceError::Unavailable(format!("Failed to enumerate audio devices: {}", e)))?
        .enumerate()
        .filter_map(|(index, device)| {
            let name = device.name().ok()?;
            let config = device.default_input_config().ok()?;
            Some(AudioDevice {
                id: device_id(index, &name),
                sample_rate: config.sample_rate().0,
                channels: config.channels(),
                is_default: default_name.as_ref() == Some(&name),
                name,
            })
        })
        .collect();

    devices.sort_by(|a, b| match (a.is_default, b.is_default) {
        (true, false) => std::cmp::Ordering::Less,
        (false, true) => std::cmp::Ordering::Greater,
        _ => a.name.cmp(&b.name),
    });

    Ok(devices)
}

/// Name fragments identifying each candidate among input devices
fn name_hints(candidate: SourceCandidate) -> &'static [&'static str] {
    match candidate {
        SourceCandidate::Microphone => &["mic"],
        SourceCandidate::Default => &[],
        SourceCandidate::Camcorder => &["cam"],
        SourceCandidate::SystemPlayback => &["monitor", "loopback", "stereo mix", "what u hear"],
    }
}

fn find_input_by_hint(host: &cpal::Host, hints: &[&str]) -> Option<cpal::Device> {
    host.input_devices().ok()?.find(|device| {
        device
            .name()
            .map(|name| {
                let name = name.to_lowercase();
                hints.iter().any(|hint| name.contains(hint))
            })
            .unwrap_or(false)
    })
}

/// Resolve a capture candidate to a cpal device
pub fn find_candidate_device(candidate: SourceCandidate) -> Result<cpal::Device, SourceError> {
    let host = cpal::default_host();

    let device = match candidate {
        SourceCandidate::Default => host.default_input_device(),
        SourceCandidate::SystemPlayback => {
            let monitor = find_input_by_hint(&host, name_hints(candidate));
            // WASAPI captures the output device in loopback mode
            #[cfg(target_os = "windows")]
            let monitor = monitor.or_else(|| host.default_output_device());
            monitor
        }
        _ => find_input_by_hint(&host, name_hints(candidate)),
    };

    device.ok_or_else(|| SourceError::Unavailable(format!("no device for {} candidate", candidate)))
}

/// Opens capture candidates on the default cpal host
#[derive(Debug, Default)]
pub struct CpalBackend;

impl CpalBackend {
    pub fn new() -> Self {
        Self
    }
}

impl AudioBackend for CpalBackend {
    fn open(
        &mut self,
        candidate: SourceCandidate,
        config: &CaptureSourceConfig,
    ) -> Result<Box<dyn AudioSource>, SourceError> {
        let device = find_candidate_device(candidate)?;
        let source = CpalSource::open(&device, config)?;
        log::debug!("Opened {} candidate on '{}'", candidate, source.name());
        Ok(Box::new(source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_audio_devices_no_panic() {
        let _ = list_audio_devices();
    }

    #[test]
    fn test_default_device_is_first() {
        if let Ok(devices) = list_audio_devices() {
            if devices.iter().any(|d| d.is_default) {
                assert!(devices[0].is_default);
            }
        }
    }

    #[test]
    fn test_device_id_is_stable() {
        assert_eq!(device_id(2, "USB Mic"), device_id(2, "USB Mic"));
        assert!(device_id(0, "x").starts_with("audio_0_"));
    }

    #[test]
    fn test_system_playback_hints() {
        assert!(name_hints(SourceCandidate::SystemPlayback).contains(&"monitor"));
        assert!(name_hints(SourceCandidate::Default).is_empty());
    }
}
