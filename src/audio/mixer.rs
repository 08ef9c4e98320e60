//! Sample mixing and packing

/// Fixed gain applied to the microphone path before summation
pub const MIC_GAIN: f32 = 1.4;

/// Scale samples in place, saturating at the 16-bit range
pub fn scale_in_place(samples: &mut [i16], gain: f32) {
    for sample in samples.iter_mut() {
        let scaled = (*sample as f32 * gain).round();
        *sample = scaled.clamp(i16::MIN as f32, i16::MAX as f32) as i16;
    }
}

/// Sum two buffers sample by sample with saturation, packed little-endian
///
/// The output covers the shorter of the two inputs.
pub fn mix_to_bytes(internal: &[i16], mic: &[i16]) -> Vec<u8> {
    let len = internal.len().min(mic.len());
    let mut out = Vec::with_capacity(len * 2);
    for (a, b) in internal[..len].iter().zip(&mic[..len]) {
        out.extend_from_slice(&a.saturating_add(*b).to_le_bytes());
    }
    out
}

/// Pack samples as little-endian bytes
pub fn to_le_bytes(samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        out.extend_from_slice(&sample.to_le_bytes());
    }
    out
}

/// Largest absolute sample magnitude
pub fn max_magnitude(samples: &[i16]) -> i32 {
    samples
        .iter()
        .map(|s| (*s as i32).abs())
        .max()
        .unwrap_or(0)
}
