//! Label map codec.
//!
//! A raw label map is one byte per pixel. The GPU upload path only accepts
//! RGBA8 images, so each label is widened into a texel of the form
//! `[label, 0, 0, 255]`. The fragment stage recovers the label from the red
//! channel; this only stays exact because label textures are always sampled
//! with nearest filtering.

use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Bytes per texel for both the image and the encoded label buffer.
pub const CHANNELS: usize = 4;

const LABEL_GREEN: u8 = 0;
const LABEL_BLUE: u8 = 0;
const LABEL_ALPHA: u8 = 255;

/// Validation failures for label and image buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelCodecError {
    DimensionsOverflow,
    ZeroDimensions { width: u32, height: u32 },
    BufferSizeMismatch { expected: usize, actual: usize },
}

impl Display for LabelCodecError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DimensionsOverflow => write!(f, "label grid dimensions overflowed usize"),
            Self::ZeroDimensions { width, height } => {
                write!(f, "label grid must be at least 1x1, got {width}x{height}")
            }
            Self::BufferSizeMismatch { expected, actual } => write!(
                f,
                "buffer size mismatch: expected {expected} bytes, got {actual} bytes"
            ),
        }
    }
}

impl Error for LabelCodecError {}

/// Label map widened to RGBA8 so it can go through the texture upload path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedLabels {
    width: u32,
    height: u32,
    texels: Vec<u8>,
}

impl EncodedLabels {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.texels
    }

    pub fn pixel_count(&self) -> usize {
        self.texels.len() / CHANNELS
    }

    /// Label stored at pixel `index`, read at full precision.
    pub fn label_at(&self, index: usize) -> Option<u8> {
        self.texels.get(index * CHANNELS).copied()
    }
}

/// Number of pixels in a `width`x`height` grid, rejecting empty grids.
pub fn pixel_count(width: u32, height: u32) -> Result<usize, LabelCodecError> {
    if width == 0 || height == 0 {
        return Err(LabelCodecError::ZeroDimensions { width, height });
    }
    usize::try_from(width)
        .ok()
        .zip(usize::try_from(height).ok())
        .and_then(|(w, h)| w.checked_mul(h))
        .ok_or(LabelCodecError::DimensionsOverflow)
}

/// Widen a one-byte-per-pixel label map into an opaque RGBA8 buffer.
///
/// `raw_labels.len()` must be exactly `width * height`; there is no
/// truncation or padding.
pub fn encode_labels(
    raw_labels: &[u8],
    width: u32,
    height: u32,
) -> Result<EncodedLabels, LabelCodecError> {
    let expected = pixel_count(width, height)?;
    if raw_labels.len() != expected {
        return Err(LabelCodecError::BufferSizeMismatch {
            expected,
            actual: raw_labels.len(),
        });
    }

    let byte_len = expected
        .checked_mul(CHANNELS)
        .ok_or(LabelCodecError::DimensionsOverflow)?;
    let mut texels = Vec::with_capacity(byte_len);
    for &label in raw_labels {
        texels.extend_from_slice(&[label, LABEL_GREEN, LABEL_BLUE, LABEL_ALPHA]);
    }

    Ok(EncodedLabels {
        width,
        height,
        texels,
    })
}

/// Recover the raw label map from channel 0 of every encoded texel.
pub fn decode_labels(encoded: &EncodedLabels) -> Vec<u8> {
    encoded
        .texels
        .chunks_exact(CHANNELS)
        .map(|texel| texel[0])
        .collect()
}

/// Label value as the fragment stage reconstructs it: the normalized red
/// channel scaled back up by 255.
pub fn decode_texel_label(texel_red: f32) -> f32 {
    texel_red * 255.0
}

/// Check that an RGBA image buffer covers exactly `width`x`height` pixels.
pub fn validate_image_buffer(image: &[u8], width: u32, height: u32) -> Result<(), LabelCodecError> {
    let expected = pixel_count(width, height)?
        .checked_mul(CHANNELS)
        .ok_or(LabelCodecError::DimensionsOverflow)?;
    if image.len() != expected {
        return Err(LabelCodecError::BufferSizeMismatch {
            expected,
            actual: image.len(),
        });
    }
    Ok(())
}

/// Distinct labels and their pixel counts, ordered by label id.
pub fn label_histogram(raw_labels: &[u8]) -> BTreeMap<u8, usize> {
    let mut counts = [0_usize; 256];
    for &label in raw_labels {
        counts[usize::from(label)] += 1;
    }
    counts
        .iter()
        .enumerate()
        .filter(|(_, count)| **count > 0)
        .map(|(label, count)| (label as u8, *count))
        .collect()
}
