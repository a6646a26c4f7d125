//! Line-work protection for seam filling.

use image::{GrayImage, RgbImage};
use imageproc::distance_transform::Norm;

use crate::color::to_gray;

/// Lower hysteresis threshold of the line detector.
pub const CANNY_LOW: f32 = 50.0;

/// Upper hysteresis threshold of the line detector.
pub const CANNY_HIGH: f32 = 150.0;

/// Mask of detected line work: 255 on and around edges, 0 elsewhere.
///
/// Canny edges, grown by one pixel (3x3 square), then closed with the same
/// element so broken strokes join up.
#[must_use = "returns the protect mask"]
pub fn protect_lines_mask(image: &RgbImage) -> GrayImage {
    let edges = imageproc::edges::canny(&to_gray(image), CANNY_LOW, CANNY_HIGH);
    let dilated = imageproc::morphology::dilate(&edges, Norm::LInf, 1);
    imageproc::morphology::close(&dilated, Norm::LInf, 1)
}
