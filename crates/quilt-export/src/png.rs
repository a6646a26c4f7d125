//! PNG serializer for previews and debug artifacts.

use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder, RgbImage};

use crate::ExportError;

/// Encode an RGB image as PNG.
///
/// # Errors
///
/// Returns [`ExportError::Image`] if the encoder rejects the buffer.
pub fn to_png(image: &RgbImage) -> Result<Vec<u8>, ExportError> {
    let mut buf = Vec::new();
    let encoder = PngEncoder::new(&mut buf);
    encoder.write_image(image.as_raw(), image.width(), image.height(), ExtendedColorType::Rgb8)?;
    Ok(buf)
}
