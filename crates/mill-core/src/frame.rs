//! 16-bit monochrome frames as delivered by detectors.

use crate::error::{CoreError, CoreResult};
use crate::limits::frame_pixels;
use chrono::{DateTime, Utc};

/// A single detector frame, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    width: u32,
    height: u32,
    data: Vec<u16>,
    acquired_at: DateTime<Utc>,
}

impl Frame {
    /// Wrap a pixel buffer, checking it against the declared dimensions.
    pub fn new(width: u32, height: u32, data: Vec<u16>) -> CoreResult<Self> {
        let pixels = frame_pixels(width, height)?;
        if data.len() != pixels {
            return Err(CoreError::FrameDataMismatch {
                expected: pixels,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            data,
            acquired_at: Utc::now(),
        })
    }

    /// A black frame.
    pub fn zeros(width: u32, height: u32) -> CoreResult<Self> {
        let pixels = frame_pixels(width, height)?;
        Self::new(width, height, vec![0; pixels])
    }

    /// Width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Row-major pixel values.
    pub fn data(&self) -> &[u16] {
        &self.data
    }

    /// Acquisition timestamp.
    pub fn acquired_at(&self) -> DateTime<Utc> {
        self.acquired_at
    }

    /// Pixel at `(x, y)`, `None` outside the frame.
    pub fn pixel(&self, x: u32, y: u32) -> Option<u16> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.data
            .get(y as usize * self.width as usize + x as usize)
            .copied()
    }
}
