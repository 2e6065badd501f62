//! Validation of images returned by the avatar service.
//!
//! The service always serves avatars as 600×600 PNGs. Anything else is a regression on the
//! service side and is reported as a failed transaction.

use std::fmt;

/// The width every downloaded avatar must have.
pub const EXPECTED_WIDTH: u32 = 600;
/// The height every downloaded avatar must have.
pub const EXPECTED_HEIGHT: u32 = 600;

/// Upper bound for the decoded pixel buffer.
const MAX_DECODED_BYTES: usize = 64 * 1024 * 1024;

/// Pixel dimensions of a decoded image.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Errors returned by [`validate`].
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    /// The buffer is not a well-formed PNG.
    #[error("failed to decode PNG: {0}")]
    Decode(#[from] png::DecodingError),
    /// The image decoded fine, but its dimensions are wrong.
    #[error("invalid PNG size: ({width},{height})")]
    SizeMismatch {
        /// The actual width of the image.
        width: u32,
        /// The actual height of the image.
        height: u32,
    },
}

/// Decodes `buffer` as a PNG and checks that it is exactly 600×600 pixels.
///
/// The whole image is decoded, so truncated or corrupt pixel data is rejected as well.
pub fn validate(buffer: &[u8]) -> Result<Dimensions, ValidationError> {
    let mut limits = png::Limits::default();
    limits.bytes = MAX_DECODED_BYTES;

    let decoder = png::Decoder::new_with_limits(buffer, limits);
    let mut reader = decoder.read_info()?;
    let mut pixels = vec![0; reader.output_buffer_size()];
    let frame = reader.next_frame(&mut pixels)?;

    if frame.width != EXPECTED_WIDTH || frame.height != EXPECTED_HEIGHT {
        return Err(ValidationError::SizeMismatch {
            width: frame.width,
            height: frame.height,
        });
    }

    Ok(Dimensions {
        width: frame.width,
        height: frame.height,
    })
}
