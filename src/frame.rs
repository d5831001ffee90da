//! Decoded video frames.
//!
//! `Frame` owns tightly packed RGB8 pixels plus capture metadata. Frames are produced
//! by a `VideoSource`, consumed by detector backends and the annotator, and shared
//! read-only through `SharedInference`.

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use std::time::SystemTime;

pub type Rgb = [u8; 3];

#[derive(Clone)]
pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Wall-clock time the source produced this frame.
    pub captured_at: SystemTime,
    /// Per-source frame counter, starting at 1.
    pub index: u64,
}

impl Frame {
    /// Wrap RGB8 pixels. Fails when `data` does not hold exactly `width * height` pixels.
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let expected = rgb_len(width, height)?;
        if data.len() != expected {
            return Err(anyhow!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected,
                width,
                height,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            captured_at: SystemTime::now(),
            index: 0,
        })
    }

    /// Uniformly coloured frame.
    pub fn filled(width: u32, height: u32, color: Rgb) -> Result<Self> {
        let len = rgb_len(width, height)?;
        let data = color.iter().copied().cycle().take(len).collect();
        Self::new(data, width, height)
    }

    pub fn with_index(mut self, index: u64) -> Self {
        self.index = index;
        self
    }

    pub fn with_captured_at(mut self, captured_at: SystemTime) -> Self {
        self.captured_at = captured_at;
        self
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgb> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = self.offset(x, y);
        Some([self.data[idx], self.data[idx + 1], self.data[idx + 2]])
    }

    /// Overwrite one pixel; out-of-bounds writes are ignored.
    pub fn put_pixel(&mut self, x: u32, y: u32, color: Rgb) {
        if x >= self.width || y >= self.height {
            return;
        }
        let idx = self.offset(x, y);
        self.data[idx..idx + 3].copy_from_slice(&color);
    }

    /// Alpha-blend `color` over one pixel.
    pub fn blend_pixel(&mut self, x: u32, y: u32, color: Rgb, alpha: f32) {
        if x >= self.width || y >= self.height {
            return;
        }
        let alpha = alpha.clamp(0.0, 1.0);
        let idx = self.offset(x, y);
        for (channel, value) in color.iter().enumerate() {
            let base = f32::from(self.data[idx + channel]);
            let mixed = base * (1.0 - alpha) + f32::from(*value) * alpha;
            self.data[idx + channel] = mixed.round().clamp(0.0, 255.0) as u8;
        }
    }

    /// Encode as baseline JPEG.
    pub fn to_jpeg(&self, quality: u8) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.data.len() / 8);
        JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100))
            .encode(&self.data, self.width, self.height, ExtendedColorType::Rgb8)
            .context("encode jpeg")?;
        Ok(out)
    }

    /// Decode a JPEG (or any format the `image` build supports) into an RGB frame.
    pub fn from_jpeg(bytes: &[u8]) -> Result<Self> {
        let image = image::load_from_memory(bytes).context("decode jpeg")?;
        let rgb = image.into_rgb8();
        let (width, height) = rgb.dimensions();
        Self::new(rgb.into_raw(), width, height)
    }

    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * 3
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("index", &self.index)
            .finish()
    }
}

fn rgb_len(width: u32, height: u32) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(3))
        .ok_or_else(|| anyhow!("frame dimensions overflow"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_wrong_buffer_length() {
        assert!(Frame::new(vec![0; 11], 2, 2).is_err());
        assert!(Frame::new(vec![0; 12], 2, 2).is_ok());
    }

    #[test]
    fn put_and_blend_pixels() {
        let mut frame = Frame::filled(4, 4, [0, 0, 0]).unwrap();
        frame.put_pixel(1, 2, [10, 20, 30]);
        assert_eq!(frame.pixel(1, 2), Some([10, 20, 30]));
        frame.blend_pixel(0, 0, [200, 100, 0], 0.5);
        assert_eq!(frame.pixel(0, 0), Some([100, 50, 0]));
        frame.put_pixel(9, 9, [1, 1, 1]);
        assert_eq!(frame.pixel(9, 9), None);
    }

    #[test]
    fn jpeg_round_trip_keeps_dimensions() {
        let frame = Frame::filled(32, 16, [200, 40, 40]).unwrap();
        let jpeg = frame.to_jpeg(80).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        let decoded = Frame::from_jpeg(&jpeg).unwrap();
        assert_eq!(decoded.dimensions(), (32, 16));
    }
}
