//! Motion detection by frame differencing.

use image::GrayImage;

use crate::config::MotionConfig;
use crate::error::StreamResult;
use crate::frame::Frame;

/// Compares each frame's luma plane to the previous one.
#[derive(Debug)]
pub struct MotionDetector {
    config: MotionConfig,
    previous: Option<GrayImage>,
}

impl MotionDetector {
    pub fn new(config: MotionConfig) -> Self {
        Self {
            config,
            previous: None,
        }
    }

    /// Feed the next frame. Returns the changed pixel count when it is above
    /// the motion threshold.
    ///
    /// The first frame, and the first frame after a resolution change, only
    /// sets the reference.
    pub fn observe(&mut self, frame: &Frame) -> StreamResult<Option<u64>> {
        let luma = frame.to_luma()?;
        Ok(self.observe_luma(luma))
    }

    pub fn observe_luma(&mut self, luma: GrayImage) -> Option<u64> {
        let changed = match &self.previous {
            Some(previous) if previous.dimensions() == luma.dimensions() => {
                Some(changed_pixels(previous, &luma, self.config.pixel_threshold))
            }
            _ => None,
        };
        self.previous = Some(luma);
        changed.filter(|&count| count > self.config.min_changed_pixels)
    }

    /// Drop the reference frame, e.g. after a reconnect.
    pub fn reset(&mut self) {
        self.previous = None;
    }
}

fn changed_pixels(a: &GrayImage, b: &GrayImage, threshold: u8) -> u64 {
    a.as_raw()
        .iter()
        .zip(b.as_raw())
        .filter(|(x, y)| x.abs_diff(**y) > threshold)
        .count() as u64
}
