//! Upper bounds on what the crate will read or allocate.
//!
//! Detector frames are always 16-bit, so frame sizing works in pixels and
//! derives the byte count from [`BYTES_PER_PIXEL`].

use crate::error::{CoreError, CoreResult};

/// Bytes per pixel of every detector frame.
pub const BYTES_PER_PIXEL: usize = std::mem::size_of::<u16>();
/// Longest frame side accepted from any detector.
pub const MAX_FRAME_SIDE: u32 = 16_384;
/// Largest pixel payload held for one frame (256 MiB).
pub const MAX_FRAME_BYTES: usize = 256 << 20;
/// `features.json` files above this size are refused unread (16 MiB).
pub const MAX_FEATURE_FILE_BYTES: u64 = 16 << 20;

/// Number of pixels in a `width` x `height` frame, once the frame is known
/// to fit the limits above.
pub fn frame_pixels(width: u32, height: u32) -> CoreResult<usize> {
    if width == 0 || height == 0 {
        return Err(CoreError::EmptyFrame { width, height });
    }
    if width.max(height) > MAX_FRAME_SIDE {
        return Err(CoreError::FrameDimensionsTooLarge {
            width,
            height,
            max_dimension: MAX_FRAME_SIDE,
        });
    }

    let overflow = || CoreError::SizeOverflow {
        context: "frame payload",
    };
    let pixels = usize::try_from(u64::from(width) * u64::from(height)).map_err(|_| overflow())?;
    let bytes = pixels.checked_mul(BYTES_PER_PIXEL).ok_or_else(overflow)?;
    if bytes > MAX_FRAME_BYTES {
        return Err(CoreError::FrameTooLarge {
            bytes,
            max_bytes: MAX_FRAME_BYTES,
        });
    }
    Ok(pixels)
}
