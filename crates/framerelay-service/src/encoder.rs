//! Raw capture → JPEG, the frame encoder in front of the relay.
//!
//! The relay only sees encoded bytes. [`FrameEncoder`] is the seam for a
//! platform codec; [`JpegEncoder`] is the portable implementation built on
//! the `image` crate.

use std::io::Cursor;

use bytes::Bytes;
use image::codecs::jpeg;
use image::{ImageBuffer, RgbImage};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("Invalid frame dimensions {width}x{height} (stride {stride}, {len} bytes)")]
    InvalidDimensions { width: u32, height: u32, stride: usize, len: usize },

    #[error("JPEG encode failed: {0}")]
    Codec(#[from] image::ImageError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Rgba,
    Bgra,
    Rgb,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Rgba | Self::Bgra => 4,
            Self::Rgb => 3,
        }
    }

    fn rgb_at(self, px: &[u8]) -> [u8; 3] {
        match self {
            Self::Rgba | Self::Rgb => [px[0], px[1], px[2]],
            Self::Bgra => [px[2], px[1], px[0]],
        }
    }
}

/// One uncompressed capture, owned by the capture source until encoded.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
    /// Bytes per row, including any padding.
    pub stride: usize,
    pub format: PixelFormat,
}

impl RawFrame {
    /// Tightly packed frame (`stride == width × bytes_per_pixel`).
    pub fn packed(data: impl Into<Bytes>, width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            data: data.into(),
            width,
            height,
            stride: width as usize * format.bytes_per_pixel(),
            format,
        }
    }

    fn validate(&self) -> Result<(), EncodeError> {
        let row = self.width as usize * self.format.bytes_per_pixel();
        let needed = self.stride.saturating_mul(self.height.saturating_sub(1) as usize) + row;
        if self.width == 0 || self.height == 0 || self.stride < row || self.data.len() < needed {
            return Err(EncodeError::InvalidDimensions {
                width: self.width,
                height: self.height,
                stride: self.stride,
                len: self.data.len(),
            });
        }
        Ok(())
    }
}

/// Turns a raw capture into wire-ready bytes.
pub trait FrameEncoder: Send {
    /// MIME type of the output, used as the envelope `Content-Type`.
    fn content_type(&self) -> &str;

    fn encode(&mut self, frame: &RawFrame) -> Result<Bytes, EncodeError>;
}

/// Downscale (nearest neighbour) and JPEG-compress.
#[derive(Debug, Clone)]
pub struct JpegEncoder {
    quality: u8,
    scale: f32,
}

impl JpegEncoder {
    /// `quality` is clamped to 1–100, `scale` to (0, 1].
    pub fn new(quality: u8, scale: f32) -> Self {
        let scale = if scale.is_finite() && scale > 0.0 { scale.min(1.0) } else { 1.0 };
        Self { quality: quality.clamp(1, 100), scale }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    /// Output size for a `width × height` input.
    pub fn output_size(&self, width: u32, height: u32) -> (u32, u32) {
        let w = ((width as f32 * self.scale).round() as u32).max(1);
        let h = ((height as f32 * self.scale).round() as u32).max(1);
        (w, h)
    }

    fn to_rgb_scaled(&self, frame: &RawFrame) -> RgbImage {
        let (dst_w, dst_h) = self.output_size(frame.width, frame.height);
        let bpp = frame.format.bytes_per_pixel();
        ImageBuffer::from_fn(dst_w, dst_h, |x, y| {
            let src_x = (x as u64 * frame.width as u64 / dst_w as u64) as usize;
            let src_y = (y as u64 * frame.height as u64 / dst_h as u64) as usize;
            let offset = src_y * frame.stride + src_x * bpp;
            image::Rgb(frame.format.rgb_at(&frame.data[offset..offset + bpp]))
        })
    }
}

impl Default for JpegEncoder {
    fn default() -> Self {
        Self::new(70, 1.0)
    }
}

impl FrameEncoder for JpegEncoder {
    fn content_type(&self) -> &str {
        "image/jpeg"
    }

    fn encode(&mut self, frame: &RawFrame) -> Result<Bytes, EncodeError> {
        frame.validate()?;
        let rgb = self.to_rgb_scaled(frame);

        let mut buf = Cursor::new(Vec::new());
        let encoder = jpeg::JpegEncoder::new_with_quality(&mut buf, self.quality);
        rgb.write_with_encoder(encoder)?;
        Ok(Bytes::from(buf.into_inner()))
    }
}
