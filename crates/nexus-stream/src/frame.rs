//! Captured frames.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, DynamicImage, GrayImage, RgbImage};
use nexus_models::ImagePayload;

use crate::error::{StreamError, StreamResult};

const JPEG_QUALITY: u8 = 85;

/// Pixel layout of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFormat {
    /// 8-bit luma, row-major
    Gray8,
    /// 8-bit interleaved RGB, row-major
    Rgb8,
    /// Encoded JPEG; width/height may be 0 until decoded
    Jpeg,
}

/// One frame pulled from a camera.
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
    pub format: FrameFormat,
    pub captured_at: DateTime<Utc>,
    /// Per-source sequence number, starting at 1
    pub sequence: u64,
}

impl Frame {
    pub fn new(data: impl Into<Bytes>, width: u32, height: u32, format: FrameFormat, sequence: u64) -> Self {
        Self {
            data: data.into(),
            width,
            height,
            format,
            captured_at: Utc::now(),
            sequence,
        }
    }

    /// Encoded image for the model executor. Raw frames are JPEG-encoded.
    pub fn to_payload(&self) -> StreamResult<ImagePayload> {
        let color = match self.format {
            FrameFormat::Jpeg => return Ok(ImagePayload::Inline(self.data.clone())),
            FrameFormat::Gray8 => ColorType::L8,
            FrameFormat::Rgb8 => ColorType::Rgb8,
        };
        self.check_len()?;

        let mut encoded = Vec::with_capacity(self.data.len() / 4);
        JpegEncoder::new_with_quality(&mut encoded, JPEG_QUALITY).encode(
            &self.data,
            self.width,
            self.height,
            color,
        )?;
        Ok(ImagePayload::inline(encoded))
    }

    /// Luma plane, decoding JPEG if needed.
    pub fn to_luma(&self) -> StreamResult<GrayImage> {
        match self.format {
            FrameFormat::Gray8 => {
                self.check_len()?;
                GrayImage::from_raw(self.width, self.height, self.data.to_vec())
                    .ok_or_else(|| StreamError::decode("gray buffer does not match dimensions"))
            }
            FrameFormat::Rgb8 => {
                self.check_len()?;
                let rgb = RgbImage::from_raw(self.width, self.height, self.data.to_vec())
                    .ok_or_else(|| StreamError::decode("rgb buffer does not match dimensions"))?;
                Ok(DynamicImage::ImageRgb8(rgb).to_luma8())
            }
            FrameFormat::Jpeg => Ok(image::load_from_memory(&self.data)?.to_luma8()),
        }
    }

    fn check_len(&self) -> StreamResult<()> {
        let channels = match self.format {
            FrameFormat::Gray8 => 1,
            FrameFormat::Rgb8 => 3,
            FrameFormat::Jpeg => return Ok(()),
        };
        let expected = self.width as usize * self.height as usize * channels;
        if self.width == 0 || self.height == 0 || self.data.len() != expected {
            return Err(StreamError::decode(format!(
                "{}x{} {:?} frame needs {} bytes, got {}",
                self.width,
                self.height,
                self.format,
                expected,
                self.data.len()
            )));
        }
        Ok(())
    }
}
