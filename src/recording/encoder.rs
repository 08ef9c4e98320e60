//! H.264 codec backed by openh264

use openh264::encoder::{Encoder, FrameType};
use openh264::formats::YUVBuffer;

use super::config::VideoEncodeConfig;
use super::video::{EncodedUnit, ScreenFrame, VideoCodec};
use crate::encoder::{MediaFormat, VideoCodecKind};
use crate::errors::CodecError;

/// H.264 codec producing Annex B access units
pub struct H264Codec {
    encoder: Encoder,
    width: u32,
    height: u32,
    fps: f64,
    frame_count: u64,
}

impl H264Codec {
    /// Dimensions are taken from the YUV source at encode time; fps and
    /// bitrate only feed the container format.
    pub fn new(config: &VideoEncodeConfig) -> Result<Self, CodecError> {
        if config.width % 2 != 0 || config.height % 2 != 0 {
            return Err(CodecError::Configure(format!(
                "H.264 needs even dimensions, got {}x{}",
                config.width, config.height
            )));
        }
        let encoder = Encoder::new()
            .map_err(|e| CodecError::Configure(format!("Failed to create encoder: {}", e)))?;

        Ok(Self {
            encoder,
            width: config.width,
            height: config.height,
            fps: config.fps,
            frame_count: 0,
        })
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }
}

impl VideoCodec for H264Codec {
    fn output_format(&self) -> MediaFormat {
        MediaFormat::Video {
            codec: VideoCodecKind::H264,
            width: self.width,
            height: self.height,
            fps: self.fps,
        }
    }

    fn encode(&mut self, frame: &ScreenFrame) -> Result<Option<EncodedUnit>, CodecError> {
        let expected = self.width as usize * self.height as usize * 3;
        if frame.data.len() != expected || frame.width != self.width || frame.height != self.height {
            return Err(CodecError::InvalidInput(format!(
                "Invalid frame: expected {}x{} ({} bytes), got {}x{} ({} bytes)",
                self.width,
                self.height,
                expected,
                frame.width,
                frame.height,
                frame.data.len()
            )));
        }

        let yuv = rgb_to_yuv420(&frame.data, self.width, self.height);
        let yuv_buffer = YUVBuffer::from_vec(yuv, self.width as usize, self.height as usize);

        let bitstream = self
            .encoder
            .encode(&yuv_buffer)
            .map_err(|e| CodecError::Encode(format!("Encoding failed: {}", e)))?;

        self.frame_count += 1;

        let key_frame = matches!(bitstream.frame_type(), FrameType::IDR | FrameType::I);
        let data = bitstream.to_vec();
        if data.is_empty() {
            // Rate control skipped the frame
            return Ok(None);
        }

        Ok(Some(EncodedUnit { data, key_frame }))
    }

    fn force_key_frame(&mut self) {
        self.encoder.force_intra_frame();
    }
}

/// Convert RGB24 to planar YUV420 (BT.601)
pub(crate) fn rgb_to_yuv420(rgb: &[u8], width: u32, height: u32) -> Vec<u8> {
    let w = width as usize;
    let h = height as usize;

    let y_size = w * h;
    let uv_size = (w / 2) * (h / 2);
    let mut yuv = vec![0u8; y_size + uv_size * 2];

    let (y_plane, uv_planes) = yuv.split_at_mut(y_size);
    let (u_plane, v_plane) = uv_planes.split_at_mut(uv_size);

    for row in 0..h {
        for col in 0..w {
            let idx = (row * w + col) * 3;
            let r = rgb[idx] as i32;
            let g = rgb[idx + 1] as i32;
            let b = rgb[idx + 2] as i32;

            let luma = ((66 * r + 129 * g + 25 * b + 128) >> 8) + 16;
            y_plane[row * w + col] = luma.clamp(0, 255) as u8;

            // Chroma from the top-left pixel of each 2x2 block
            if row % 2 == 0 && col % 2 == 0 {
                let uv_idx = (row / 2) * (w / 2) + (col / 2);
                let u = ((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128;
                let v = ((112 * r - 94 * g - 18 * b + 128) >> 8) + 128;
                u_plane[uv_idx] = u.clamp(0, 255) as u8;
                v_plane[uv_idx] = v.clamp(0, 255) as u8;
            }
        }
    }

    yuv
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rgb_to_yuv420_size() {
        let rgb = vec![128u8; 640 * 480 * 3];
        let yuv = rgb_to_yuv420(&rgb, 640, 480);
        assert_eq!(yuv.len(), 640 * 480 * 3 / 2);
    }

    #[test]
    fn test_black_maps_to_video_range() {
        let yuv = rgb_to_yuv420(&[0u8; 2 * 2 * 3], 2, 2);
        assert_eq!(&yuv[..4], &[16, 16, 16, 16]);
        assert_eq!(&yuv[4..], &[128, 128]);
    }

    #[test]
    fn test_odd_dimensions_rejected() {
        let config = VideoEncodeConfig::new(641, 480, 30.0);
        assert!(matches!(H264Codec::new(&config), Err(CodecError::Configure(_))));
    }

    #[test]
    fn test_first_frame_is_annex_b_keyframe() {
        let config = VideoEncodeConfig::new(640, 480, 30.0);
        let mut codec = H264Codec::new(&config).expect("Encoder creation failed");
        let frame = ScreenFrame::new(vec![128u8; config.frame_bytes()], 640, 480);

        let unit = codec.encode(&frame).unwrap().expect("first frame produces output");
        assert!(
            unit.data.starts_with(&[0x00, 0x00, 0x00, 0x01]) || unit.data.starts_with(&[0x00, 0x00, 0x01]),
            "Should start with Annex B start code"
        );
        assert!(unit.key_frame, "First frame should be a keyframe");
        assert_eq!(codec.frame_count(), 1);
    }

    #[test]
    fn test_mismatched_frame_rejected() {
        let config = VideoEncodeConfig::new(64, 64, 30.0);
        let mut codec = H264Codec::new(&config).unwrap();
        let frame = ScreenFrame::new(vec![0u8; 10], 64, 64);
        assert!(matches!(codec.encode(&frame), Err(CodecError::InvalidInput(_))));
    }
}
