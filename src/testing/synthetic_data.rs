//! Synthetic screen and audio content
//!
//! Deterministic frames and PCM for offline testing: a moving RGB gradient
//! standing in for a composited desktop and a 440Hz tone standing in for a
//! microphone.

use std::f64::consts::PI;

use crate::recording::ScreenFrame;

pub const TONE_FREQUENCY_HZ: f64 = 440.0;

/// RGB24 gradient that shifts every frame, so consecutive frames differ
pub fn synthetic_screen_frame(frame_number: u64, width: u32, height: u32) -> ScreenFrame {
    let mut data = vec![0u8; width as usize * height as usize * 3];

    let base = (frame_number % 256) as u8;
    for y in 0..height {
        for x in 0..width {
            let idx = ((y * width + x) * 3) as usize;
            data[idx] = base.wrapping_add((x % 256) as u8);
            data[idx + 1] = base.wrapping_add((y % 256) as u8);
            data[idx + 2] = base.wrapping_add(((x + y) % 256) as u8);
        }
    }

    ScreenFrame::new(data, width, height)
}

/// Interleaved 16-bit sine tone continuing across frames
///
/// `frames` is per channel; every channel carries the same signal.
pub fn sine_samples(
    frame_number: u64,
    frames: usize,
    channels: u16,
    sample_rate: u32,
    amplitude: i16,
) -> Vec<i16> {
    let channels = channels.max(1) as usize;
    let mut samples = vec![0i16; frames * channels];

    for i in 0..frames {
        let t = (frame_number as f64 * frames as f64 + i as f64) / sample_rate as f64;
        let value = ((2.0 * PI * TONE_FREQUENCY_HZ * t).sin() * amplitude as f64).round() as i16;
        for c in 0..channels {
            samples[i * channels + c] = value;
        }
    }

    samples
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_screen_frame_correct_size() {
        let frame = synthetic_screen_frame(0, 1920, 1080);
        assert_eq!(frame.width, 1920);
        assert_eq!(frame.height, 1080);
        assert_eq!(frame.data.len(), 1920 * 1080 * 3);
    }

    #[test]
    fn test_synthetic_screen_frames_differ() {
        let frame0 = synthetic_screen_frame(0, 320, 240);
        let frame1 = synthetic_screen_frame(1, 320, 240);
        assert_ne!(frame0.data[0], frame1.data[0]);
    }

    #[test]
    fn test_sine_has_signal_without_clipping() {
        let samples = sine_samples(0, 960, 2, 48000, 8000);
        assert_eq!(samples.len(), 1920);
        let peak = samples.iter().map(|s| (*s as i32).abs()).max().unwrap();
        assert!(peak > 7000, "tone should reach its amplitude, got {}", peak);
        assert!(peak <= 8000);
    }

    #[test]
    fn test_sine_channels_match() {
        let samples = sine_samples(3, 64, 2, 48000, 1000);
        for pair in samples.chunks_exact(2) {
            assert_eq!(pair[0], pair[1]);
        }
    }
}
