//! Feathered blending across shared tile edges.
//!
//! The blended strip is written back into *both* tiles, so neighbors carry
//! identical pixels where their canvas placements overlap.

use image::{ImageBuffer, Luma, Rgb, RgbImage};

use crate::types::{GridCoord, TileMap};

/// Linear blend weights from 0 to 1 across `overlap` pixels, softened by a
/// Gaussian of kernel size `2 * feather + 1` when `feather > 0`. Borders
/// clamp to the edge value.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn feather_ramp(overlap: u32, feather: u32) -> Vec<f32> {
    let n = overlap as usize;
    let ramp: Vec<f32> = match n {
        0 => return Vec::new(),
        1 => vec![0.0],
        _ => (0..n).map(|i| i as f32 / (n - 1) as f32).collect(),
    };
    if feather == 0 {
        return ramp;
    }
    let row: ImageBuffer<Luma<f32>, Vec<f32>> = ImageBuffer::from_fn(overlap, 1, |x, _| Luma([ramp[x as usize]]));
    imageproc::filter::horizontal_filter(&row, &gaussian_kernel(2 * feather as usize + 1)).into_raw()
}

/// Normalized Gaussian weights for a kernel of `size` taps.
///
/// Sigma follows the usual derivation from kernel size:
/// `0.3 * ((k - 1) / 2 - 1) + 0.8`.
#[allow(clippy::cast_precision_loss, clippy::cast_possible_wrap)]
fn gaussian_kernel(size: usize) -> Vec<f32> {
    let sigma = 0.3f32.mul_add((size as f32 - 1.0).mul_add(0.5, -1.0), 0.8);
    let half = (size / 2) as isize;
    let weights: Vec<f32> = (-half..=half)
        .map(|i| (-((i * i) as f32) / (2.0 * sigma * sigma)).exp())
        .collect();
    let norm: f32 = weights.iter().sum();
    weights.into_iter().map(|w| w / norm).collect()
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn mix(a: Rgb<u8>, b: Rgb<u8>, alpha: f32) -> Rgb<u8> {
    let mut out = [0u8; 3];
    for (c, o) in out.iter_mut().enumerate() {
        let v = f32::from(a.0[c]).mul_add(1.0 - alpha, f32::from(b.0[c]) * alpha);
        *o = v.round().clamp(0.0, 255.0) as u8;
    }
    Rgb(out)
}

/// Blend the right edge of `left` with the left edge of `right` in place.
///
/// The strip is `overlap` pixels wide (capped by both widths) and as tall as
/// the shorter tile. `overlap == 0` leaves both untouched.
pub fn feather_blend(left: &mut RgbImage, right: &mut RgbImage, overlap: u32, feather: u32) {
    let overlap = overlap.min(left.width()).min(right.width());
    if overlap == 0 {
        return;
    }
    let h = left.height().min(right.height());
    let ramp = feather_ramp(overlap, feather);
    let x0 = left.width() - overlap;
    for y in 0..h {
        for (i, &alpha) in (0..overlap).zip(&ramp) {
            let blended = mix(*left.get_pixel(x0 + i, y), *right.get_pixel(i, y), alpha);
            left.put_pixel(x0 + i, y, blended);
            right.put_pixel(i, y, blended);
        }
    }
}

/// Blend the bottom edge of `top` with the top edge of `bottom` in place.
pub fn feather_blend_vertical(top: &mut RgbImage, bottom: &mut RgbImage, overlap: u32, feather: u32) {
    let overlap = overlap.min(top.height()).min(bottom.height());
    if overlap == 0 {
        return;
    }
    let w = top.width().min(bottom.width());
    let ramp = feather_ramp(overlap, feather);
    let y0 = top.height() - overlap;
    for (i, &alpha) in (0..overlap).zip(&ramp) {
        for x in 0..w {
            let blended = mix(*top.get_pixel(x, y0 + i), *bottom.get_pixel(x, i), alpha);
            top.put_pixel(x, y0 + i, blended);
            bottom.put_pixel(x, i, blended);
        }
    }
}

/// Blend the seam between `first` (left or top) and `second` in the map.
fn blend_pair(tiles: &mut TileMap, first: GridCoord, second: GridCoord, overlap: u32, feather: u32, vertical: bool) -> bool {
    let Some(mut a) = tiles.remove(&first) else {
        return false;
    };
    let blended = tiles.get_mut(&second).is_some_and(|b| {
        if vertical {
            feather_blend_vertical(&mut a.image, &mut b.image, overlap, feather);
        } else {
            feather_blend(&mut a.image, &mut b.image, overlap, feather);
        }
        true
    });
    tiles.insert(first, a);
    blended
}

/// Blend every tile with its left and then its top neighbor, row-major.
///
/// Returns the number of seams blended.
pub fn blend_neighbors(tiles: &mut TileMap, overlap: u32, feather: u32) -> usize {
    if overlap == 0 {
        return 0;
    }
    let coords: Vec<GridCoord> = tiles.keys().copied().collect();
    let mut seams = 0;
    for coord in coords {
        if let Some(left) = coord.left() {
            seams += usize::from(blend_pair(tiles, left, coord, overlap, feather, false));
        }
        if let Some(top) = coord.top() {
            seams += usize::from(blend_pair(tiles, top, coord, overlap, feather, true));
        }
    }
    seams
}
