//! Seam matching between adjacent tiles.
//!
//! Edge strips of both tiles are reduced to Sobel gradient magnitude, which
//! keeps line work and ignores uneven paper tone, then phase-correlated.
//! Offsets larger than the allowed overlap are clamped: they indicate a bad
//! match, not a real displacement.

use image::RgbImage;
use imageproc::gradients::{horizontal_sobel, vertical_sobel};

use crate::color::to_gray;
use crate::phase::PhaseCorrelator;
use crate::types::{TileData, TileTransform};

/// Outcome of matching one seam.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchResult {
    /// Horizontal displacement for the second tile, clamped to `±overlap`.
    pub dx: f64,
    /// Vertical displacement for the second tile, clamped to `±overlap`.
    pub dy: f64,
    /// `1 - response`. Lower is better.
    pub error: f64,
    /// Correlation response in `[0, 1]`.
    pub confidence: f64,
    /// Horizontal scale estimate (always 1; translation-only matcher).
    pub scale_x: f64,
    /// Vertical scale estimate (always 1; translation-only matcher).
    pub scale_y: f64,
}

impl MatchResult {
    /// Result for a seam with nothing to compare.
    pub const NO_MATCH: Self = Self {
        dx: 0.0,
        dy: 0.0,
        error: 1.0,
        confidence: 0.0,
        scale_x: 1.0,
        scale_y: 1.0,
    };
}

/// Sobel gradient magnitude of a strip as a row-major float buffer.
#[must_use = "returns the gradient magnitude"]
pub fn gradient_magnitude(strip: &RgbImage) -> Vec<f32> {
    let gray = to_gray(strip);
    let gx = horizontal_sobel(&gray);
    let gy = vertical_sobel(&gray);
    gx.pixels()
        .zip(gy.pixels())
        .map(|(x, y)| f32::from(x.0[0]).hypot(f32::from(y.0[0])))
        .collect()
}

fn correlate_strips(a: &RgbImage, b: &RgbImage, overlap: u32) -> MatchResult {
    let (w, h) = a.dimensions();
    if w == 0 || h == 0 {
        return MatchResult::NO_MATCH;
    }
    let correlator = PhaseCorrelator::new(w as usize, h as usize);
    let Some(c) = correlator.correlate(&gradient_magnitude(a), &gradient_magnitude(b)) else {
        return MatchResult::NO_MATCH;
    };
    let limit = f64::from(overlap);
    MatchResult {
        dx: c.dx.clamp(-limit, limit),
        dy: c.dy.clamp(-limit, limit),
        error: 1.0 - c.response,
        confidence: c.response,
        scale_x: 1.0,
        scale_y: 1.0,
    }
}

/// Match the right edge of `left` against the left edge of `right`.
///
/// Strips are `band` pixels wide (capped by both tile widths) and as tall
/// as the shorter tile.
#[must_use = "returns the seam match"]
pub fn match_seam(left: &TileData, right: &TileData, overlap: u32, band: u32) -> MatchResult {
    let (lw, lh) = left.image.dimensions();
    let (rw, rh) = right.image.dimensions();
    let band = band.min(lw).min(rw);
    let h = lh.min(rh);
    if band == 0 || h == 0 {
        return MatchResult::NO_MATCH;
    }
    let a = image::imageops::crop_imm(&left.image, lw - band, 0, band, h).to_image();
    let b = image::imageops::crop_imm(&right.image, 0, 0, band, h).to_image();
    correlate_strips(&a, &b, overlap)
}

/// Match the bottom edge of `top` against the top edge of `bottom`.
#[must_use = "returns the seam match"]
pub fn match_seam_vertical(top: &TileData, bottom: &TileData, overlap: u32, band: u32) -> MatchResult {
    let (tw, th) = top.image.dimensions();
    let (bw, bh) = bottom.image.dimensions();
    let band = band.min(th).min(bh);
    let w = tw.min(bw);
    if band == 0 || w == 0 {
        return MatchResult::NO_MATCH;
    }
    let a = image::imageops::crop_imm(&top.image, 0, th - band, w, band).to_image();
    let b = image::imageops::crop_imm(&bottom.image, 0, 0, w, band).to_image();
    correlate_strips(&a, &b, overlap)
}

/// Clamp a scale factor to `1 ± max_percent / 100`.
#[must_use]
pub fn clamp_scale(scale: f64, max_percent: f64) -> f64 {
    let delta = max_percent.abs() / 100.0;
    scale.clamp(1.0 - delta, 1.0 + delta)
}

/// Copy of `transform` with clamped scale factors.
#[must_use]
pub fn scale_transform(transform: TileTransform, scale_x: f64, scale_y: f64, max_percent: f64) -> TileTransform {
    transform.with_scale(scale_x, scale_y, max_percent)
}
