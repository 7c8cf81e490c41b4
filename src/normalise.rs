//! Canvas normalisation.
//!
//! Turns an arbitrary decoded raster into the 1×28×28 stroke-positive tensor the
//! classifier was trained on. Every step mirrors the preprocessing of the
//! training corpus:
//!
//! 1. grayscale conversion;
//! 2. crop to the bounding box of every non-white pixel (skipped on a blank
//!    canvas);
//! 3. bilinear resize to 28×28;
//! 4. inverse binarisation at [`BINARY_THRESHOLD`];
//! 5. rescale to `[0, 1]`.
//!
//! [`normalise`] is total: any decoded image produces a tensor.

use candle_core::{Device, Tensor};
use image::{DynamicImage, GrayImage, imageops::FilterType};
use thiserror::Error;

/// Side length of the square canvas the classifier consumes.
pub const CANVAS_SIDE: usize = 28;

/// Number of values in a [`NormalisedTensor`].
pub const CANVAS_LEN: usize = CANVAS_SIDE * CANVAS_SIDE;

/// Pixels strictly brighter than this become background after binarisation.
pub const BINARY_THRESHOLD: u8 = 200;

/// Decoded input image of any size and channel layout.
pub type RawImage = DynamicImage;

/// Raised when the uploaded bytes are not a decodable raster.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("image payload is empty")]
    Empty,
    #[error("failed to decode image: {0}")]
    Image(#[from] image::ImageError),
}

/// Decodes a container format (PNG, JPEG, BMP) into a [`RawImage`].
///
/// # Errors
///
/// Returns [`DecodeError::Empty`] for a zero-length payload and
/// [`DecodeError::Image`] when the format is unknown or corrupt.
pub fn decode_image(bytes: &[u8]) -> Result<RawImage, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }
    Ok(image::load_from_memory(bytes)?)
}

/// Canonical classifier input: 28×28 single-channel values in `[0, 1]`.
///
/// Only [`normalise`] can build one, so every instance honours the shape and
/// range contract.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalisedTensor {
    pixels: Box<[f32]>,
}

impl NormalisedTensor {
    /// Row-major pixel values.
    #[must_use]
    pub fn as_slice(&self) -> &[f32] {
        &self.pixels
    }

    /// Number of foreground (stroke) pixels.
    #[must_use]
    pub fn foreground_count(&self) -> usize {
        self.pixels.iter().filter(|value| **value > 0.5).count()
    }

    /// Wraps the pixels with the batch and channel dimensions, yielding a
    /// `(1, 1, 28, 28)` tensor.
    ///
    /// # Errors
    ///
    /// Returns the tensor backend error if allocation on `device` fails.
    pub fn to_tensor(&self, device: &Device) -> candle_core::Result<Tensor> {
        Tensor::from_slice(&self.pixels, (1, 1, CANVAS_SIDE, CANVAS_SIDE), device)
    }

    fn blank() -> Self {
        Self {
            pixels: vec![0.0; CANVAS_LEN].into_boxed_slice(),
        }
    }
}

/// Normalises a decoded image into the classifier's input form.
///
/// # Examples
///
/// ```
/// use image::{DynamicImage, GrayImage, Luma};
/// use sketch_iq::normalise::{normalise, CANVAS_LEN};
///
/// let blank = DynamicImage::ImageLuma8(GrayImage::from_pixel(64, 48, Luma([255])));
/// let tensor = normalise(&blank);
/// assert_eq!(tensor.as_slice().len(), CANVAS_LEN);
/// assert_eq!(tensor.foreground_count(), 0);
/// ```
#[must_use]
pub fn normalise(image: &RawImage) -> NormalisedTensor {
    let gray = image.to_luma8();
    if gray.width() == 0 || gray.height() == 0 {
        return NormalisedTensor::blank();
    }
    let cropped = crop_to_strokes(gray);
    #[expect(
        clippy::cast_possible_truncation,
        reason = "canvas side is a small constant"
    )]
    let side = CANVAS_SIDE as u32;
    let resized = image::imageops::resize(&cropped, side, side, FilterType::Triangle);
    let pixels = resized
        .pixels()
        .map(|pixel| binarise(pixel.0[0]))
        .collect::<Vec<_>>()
        .into_boxed_slice();
    NormalisedTensor { pixels }
}

/// Crops to the tight box around every pixel darker than pure white. A canvas
/// without marks is returned untouched.
fn crop_to_strokes(gray: GrayImage) -> GrayImage {
    let Some((x0, y0, x1, y1)) = stroke_bounds(&gray) else {
        return gray;
    };
    image::imageops::crop_imm(&gray, x0, y0, x1 - x0 + 1, y1 - y0 + 1).to_image()
}

fn stroke_bounds(gray: &GrayImage) -> Option<(u32, u32, u32, u32)> {
    gray.enumerate_pixels()
        .filter(|(_, _, pixel)| pixel.0[0] < u8::MAX)
        .fold(None, |bounds, (x, y, _)| match bounds {
            None => Some((x, y, x, y)),
            Some((x0, y0, x1, y1)) => Some((x0.min(x), y0.min(y), x1.max(x), y1.max(y))),
        })
}

#[expect(clippy::float_arithmetic, reason = "rescaling to the unit interval")]
fn binarise(intensity: u8) -> f32 {
    let inverted = if intensity > BINARY_THRESHOLD {
        0
    } else {
        u8::MAX
    };
    f32::from(inverted) / f32::from(u8::MAX)
}
