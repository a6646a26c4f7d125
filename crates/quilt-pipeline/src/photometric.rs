//! Exposure matching between neighboring tiles.
//!
//! Tiles are visited in row-major order and matched against their left
//! neighbor, or their top neighbor when there is no left one. Because the
//! reference was itself normalized earlier in the same pass, exposure
//! propagates outward from the `(1, 1)` tile.

use image::{GrayImage, Rgb, RgbImage};

use crate::color::{lab_to_rgb, rgb_to_lab};
use crate::settings::ColorMatchMode;
use crate::types::{GridCoord, INCLUDED, TileMap};

/// Blend factor of the mild luminance transfer.
pub const MILD_STRENGTH: f32 = 0.5;

/// Added to every deviation to avoid dividing by zero on flat tiles.
const STD_EPSILON: f32 = 1e-6;

/// Mean and standard deviation of Lab lightness over content pixels, or
/// over all pixels when the mask has no content.
fn lightness_stats(lightness: &[f32], mask: &GrayImage) -> (f32, f32) {
    let content: Vec<f32> = lightness
        .iter()
        .zip(mask.pixels())
        .filter(|(_, m)| m.0[0] == INCLUDED)
        .map(|(&l, _)| l)
        .collect();
    let values = if content.is_empty() { lightness } else { &content[..] };
    if values.is_empty() {
        return (0.0, STD_EPSILON);
    }

    #[allow(clippy::cast_precision_loss)]
    let n = values.len() as f32;
    let mean = values.iter().sum::<f32>() / n;
    let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / n;
    (mean, var.sqrt() + STD_EPSILON)
}

/// Pull the lightness distribution of `image` toward that of `reference`.
///
/// `L' = (1 - s) L + s ((L - mean) * ref_std / std + ref_mean)`. Chroma is
/// untouched.
#[must_use = "returns the adjusted image"]
pub fn match_luminance(
    image: &RgbImage,
    mask: &GrayImage,
    reference: &RgbImage,
    reference_mask: &GrayImage,
    strength: f32,
) -> RgbImage {
    let lab: Vec<[f32; 3]> = image.pixels().map(|p| rgb_to_lab(*p)).collect();
    let lightness: Vec<f32> = lab.iter().map(|p| p[0]).collect();
    let ref_lightness: Vec<f32> = reference.pixels().map(|p| rgb_to_lab(*p)[0]).collect();

    let (mean, std) = lightness_stats(&lightness, mask);
    let (ref_mean, ref_std) = lightness_stats(&ref_lightness, reference_mask);
    let gain = ref_std / std;

    let mut out = RgbImage::new(image.width(), image.height());
    for (dst, [l, a, b]) in out.pixels_mut().zip(lab) {
        let target = (l - mean).mul_add(gain, ref_mean);
        let adjusted = (1.0 - strength).mul_add(l, strength * target).clamp(0.0, 255.0);
        *dst = lab_to_rgb([adjusted, a, b]);
    }
    out
}

/// Cumulative distribution of one channel as `(value, quantile)` pairs
/// for every value that occurs.
#[allow(clippy::cast_precision_loss)]
fn channel_quantiles(image: &RgbImage, channel: usize) -> Vec<(f64, f64)> {
    let mut histogram = [0u64; 256];
    for p in image.pixels() {
        histogram[usize::from(p.0[channel])] += 1;
    }
    let total = histogram.iter().sum::<u64>() as f64;
    let mut cumulative = 0u64;
    histogram
        .iter()
        .enumerate()
        .filter(|(_, count)| **count > 0)
        .map(|(value, count)| {
            cumulative += count;
            (value as f64, cumulative as f64 / total)
        })
        .collect()
}

/// Piecewise-linear interpolation of `x` over points sorted by quantile,
/// clamped at both ends.
fn interpolate(points: &[(f64, f64)], q: f64) -> f64 {
    let Some(&(first_value, first_q)) = points.first() else {
        return 0.0;
    };
    if q <= first_q {
        return first_value;
    }
    for pair in points.windows(2) {
        let (v0, q0) = pair[0];
        let (v1, q1) = pair[1];
        if q <= q1 {
            let t = if q1 > q0 { (q - q0) / (q1 - q0) } else { 0.0 };
            return t.mul_add(v1 - v0, v0);
        }
    }
    points.last().map_or(first_value, |&(v, _)| v)
}

/// Per-channel histogram matching of `image` to `reference`.
#[must_use = "returns the adjusted image"]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn match_histograms(image: &RgbImage, reference: &RgbImage) -> RgbImage {
    if reference.width() == 0 || reference.height() == 0 {
        return image.clone();
    }
    let mut lookup = [[0u8; 256]; 3];
    for (channel, table) in lookup.iter_mut().enumerate() {
        let reference_points = channel_quantiles(reference, channel);
        for (value, q) in channel_quantiles(image, channel) {
            let mapped = interpolate(&reference_points, q).round().clamp(0.0, 255.0);
            table[value as usize] = mapped as u8;
        }
    }
    let mut out = image.clone();
    for p in out.pixels_mut() {
        *p = Rgb([lookup[0][usize::from(p.0[0])], lookup[1][usize::from(p.0[1])], lookup[2][usize::from(p.0[2])]]);
    }
    out
}

/// Adjust one tile against its reference according to `mode`.
#[must_use = "returns the adjusted image"]
pub fn apply_color_match(
    image: &RgbImage,
    mask: &GrayImage,
    reference: &RgbImage,
    reference_mask: &GrayImage,
    mode: ColorMatchMode,
) -> RgbImage {
    match mode {
        ColorMatchMode::Off => image.clone(),
        ColorMatchMode::Mild => match_luminance(image, mask, reference, reference_mask, MILD_STRENGTH),
        ColorMatchMode::Strong => match_histograms(image, reference),
    }
}

/// Reference cell for photometric matching: left neighbor, else top.
#[must_use]
pub fn reference_cell(tiles: &TileMap, coord: GridCoord) -> Option<GridCoord> {
    coord
        .left()
        .filter(|c| tiles.contains_key(c))
        .or_else(|| coord.top().filter(|c| tiles.contains_key(c)))
}

/// Normalize the tile at `coord` in place. Returns whether it had a reference.
pub fn normalize_tile(tiles: &mut TileMap, coord: GridCoord, mode: ColorMatchMode) -> bool {
    if mode == ColorMatchMode::Off || coord == GridCoord::new(1, 1) {
        return false;
    }
    let Some(reference_coord) = reference_cell(tiles, coord) else {
        return false;
    };
    let (Some(reference), Some(tile)) = (tiles.get(&reference_coord), tiles.get(&coord)) else {
        return false;
    };
    let adjusted = apply_color_match(&tile.image, &tile.mask, &reference.image, &reference.mask, mode);
    if let Some(tile) = tiles.get_mut(&coord) {
        tile.image = adjusted;
    }
    true
}
