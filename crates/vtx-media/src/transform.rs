//! Page encoding: downscale and JPEG re-encode.

use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{ColorType, ImageBuffer, Rgb};
use rayon::prelude::*;

use crate::error::{MediaError, MediaResult};
use crate::frames::RawFrame;

/// Output page geometry and quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransformConfig {
    /// Frames taller than this are scaled down, aspect preserved
    pub max_height: u32,
    /// JPEG quality, 1-100
    pub jpeg_quality: u8,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            max_height: 720,
            jpeg_quality: 75,
        }
    }
}

impl TransformConfig {
    /// Output size for a `width`×`height` frame. Never upscales.
    pub fn target_size(&self, width: u32, height: u32) -> (u32, u32) {
        if height <= self.max_height || height == 0 {
            return (width, height);
        }
        let scaled = (u64::from(width) * u64::from(self.max_height) + u64::from(height) / 2)
            / u64::from(height);
        (scaled.max(1) as u32, self.max_height)
    }
}

/// A frame encoded as a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame {
    pub index: u64,
    pub width: u32,
    pub height: u32,
    pub jpeg: Vec<u8>,
}

impl EncodedFrame {
    pub fn byte_len(&self) -> usize {
        self.jpeg.len()
    }
}

/// Downscale and encode one frame. Consumes the raw pixels.
pub fn transform_frame(frame: RawFrame, config: &TransformConfig) -> MediaResult<EncodedFrame> {
    let RawFrame {
        index,
        width,
        height,
        rgb,
    } = frame;

    let image: ImageBuffer<Rgb<u8>, Vec<u8>> = ImageBuffer::from_raw(width, height, rgb)
        .ok_or_else(|| {
            MediaError::encode_failed(format!(
                "frame {} buffer does not match {}x{}",
                index, width, height
            ))
        })?;

    let (out_w, out_h) = config.target_size(width, height);
    let image = if (out_w, out_h) == (width, height) {
        image
    } else {
        imageops::resize(&image, out_w, out_h, FilterType::Triangle)
    };

    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, config.jpeg_quality.clamp(1, 100))
        .encode(image.as_raw(), out_w, out_h, ColorType::Rgb8)
        .map_err(|e| MediaError::encode_failed(format!("frame {}: {}", index, e)))?;

    Ok(EncodedFrame {
        index,
        width: out_w,
        height: out_h,
        jpeg,
    })
}

/// Transform a batch on the rayon pool, keeping frame order. Fails as a
/// whole if any frame fails.
pub fn transform_batch(
    frames: Vec<RawFrame>,
    config: &TransformConfig,
) -> MediaResult<Vec<EncodedFrame>> {
    frames
        .into_par_iter()
        .map(|frame| transform_frame(frame, config))
        .collect()
}
