//! Tile decoding and color space conversions.
//!
//! Accepts raw image bytes (PNG, JPEG, BMP, WebP, TIFF) and produces an
//! RGB raster. Also provides the 8-bit Lab encoding used by background
//! detection and photometric normalization: `L` scaled to `0..=255`,
//! `a`/`b` offset by 128, D65 white point.

use image::{GrayImage, Rgb, RgbImage};
use palette::{FromColor, IntoColor, Lab, LinSrgb, Srgb};

use crate::types::StitchError;

/// Decode raw tile bytes into an RGB image.
///
/// # Errors
///
/// Returns [`StitchError::EmptyInput`] if `bytes` is empty.
/// Returns [`StitchError::ImageDecode`] if the image format is
/// unrecognized or the data is corrupt.
pub fn decode_tile(bytes: &[u8]) -> Result<RgbImage, StitchError> {
    if bytes.is_empty() {
        return Err(StitchError::EmptyInput);
    }

    let img = image::load_from_memory(bytes)?;
    Ok(img.to_rgb8())
}

/// Convert an RGB image to grayscale with the standard luminance weights.
#[must_use = "returns the grayscale image"]
pub fn to_gray(image: &RgbImage) -> GrayImage {
    image::imageops::grayscale(image)
}

/// Convert one sRGB pixel to 8-bit-scaled Lab `[L, a, b]`.
#[must_use]
pub fn rgb_to_lab(pixel: Rgb<u8>) -> [f32; 3] {
    let [r, g, b] = pixel.0.map(|c| f32::from(c) / 255.0);
    let linear: LinSrgb<f32> = Srgb::new(r, g, b).into_linear();
    let lab: Lab = Lab::from_color(linear);
    [lab.l * 255.0 / 100.0, lab.a + 128.0, lab.b + 128.0]
}

/// Convert an 8-bit-scaled Lab triple back to sRGB, saturating out-of-gamut values.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn lab_to_rgb(lab: [f32; 3]) -> Rgb<u8> {
    let lab = Lab::new(lab[0] * 100.0 / 255.0, lab[1] - 128.0, lab[2] - 128.0);
    let linear: LinSrgb<f32> = lab.into_color();
    let srgb: Srgb<f32> = Srgb::from_linear(linear);
    Rgb([srgb.red, srgb.green, srgb.blue].map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8))
}

/// Chroma magnitude of an 8-bit-scaled Lab triple.
#[must_use]
pub fn chroma(lab: [f32; 3]) -> f32 {
    (lab[1] - 128.0).hypot(lab[2] - 128.0)
}
