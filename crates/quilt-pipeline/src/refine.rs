//! Grid refinement.
//!
//! Each pass visits every placed tile in row-major order, matches it against
//! its left and top neighbors, and adopts the translation of whichever match
//! has the lowest error. A tile without neighbors keeps its transform.
//! Passes run a fixed number of times; there is no convergence check.

use crate::matcher::{MatchResult, match_seam, match_seam_vertical};
use crate::types::{GridCoord, LayoutResult, TileMap, TileTransform, TransformMap};

/// Geometry inputs shared by every seam match of a refinement run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefineParams {
    /// Largest accepted offset in pixels.
    pub overlap: u32,
    /// Width of the sampled edge band in pixels.
    pub band: u32,
}

/// Best available neighbor match for the tile at `coord`, if it has any
/// neighbors. Ties keep the left match.
fn best_match(tiles: &TileMap, coord: GridCoord, params: RefineParams) -> Option<MatchResult> {
    let tile = tiles.get(&coord)?;
    let left = coord
        .left()
        .and_then(|c| tiles.get(&c))
        .map(|l| match_seam(l, tile, params.overlap, params.band));
    let top = coord
        .top()
        .and_then(|c| tiles.get(&c))
        .map(|t| match_seam_vertical(t, tile, params.overlap, params.band));

    match (left, top) {
        (Some(l), Some(t)) => Some(if t.error < l.error { t } else { l }),
        (l, t) => l.or(t),
    }
}

/// Run one refinement pass, rewriting transforms in place.
///
/// Returns how many tiles received a new transform.
pub fn refine_pass(tiles: &TileMap, layout: &mut LayoutResult, params: RefineParams) -> usize {
    let mut updated = 0;
    for (&coord, placement) in &mut layout.placements {
        let Some(tile) = tiles.get(&coord) else {
            continue;
        };
        let Some(best) = best_match(tiles, coord, params) else {
            continue;
        };
        log::debug!(
            "tile {coord}: dx={:.2} dy={:.2} error={:.3}",
            best.dx,
            best.dy,
            best.error
        );
        placement.transform = TileTransform {
            dx: best.dx,
            dy: best.dy,
            scale_x: 1.0,
            scale_y: 1.0,
            angle_deg: tile.angle_deg,
            confidence: best.confidence,
        };
        updated += 1;
    }
    updated
}

/// Run `iterations` refinement passes.
#[must_use = "returns the refined layout"]
pub fn refine_layout(tiles: &TileMap, mut layout: LayoutResult, params: RefineParams, iterations: u32) -> LayoutResult {
    for _ in 0..iterations {
        refine_pass(tiles, &mut layout, params);
    }
    layout
}

/// Replace transforms with manual overrides. Manual input always wins.
///
/// Scale factors are clamped to `1 ± max_scale_percent / 100`. Overrides for
/// cells without a tile are ignored. Returns how many overrides were applied.
pub fn apply_manual_overrides(layout: &mut LayoutResult, overrides: &TransformMap, max_scale_percent: f64) -> usize {
    let mut applied = 0;
    for (coord, transform) in overrides {
        let Some(placement) = layout.placements.get_mut(coord) else {
            log::debug!("ignoring manual transform for empty cell {coord}");
            continue;
        };
        placement.transform = transform.with_scale(transform.scale_x, transform.scale_y, max_scale_percent);
        applied += 1;
    }
    applied
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::path::PathBuf;

    use image::{GrayImage, Rgb, RgbImage};

    use super::*;
    use crate::layout::initial_layout;
    use crate::types::{CropBox, TileData, TileInfo};

    fn noise(w: u32, h: u32) -> RgbImage {
        RgbImage::from_fn(w, h, |x, y| {
            let mut v = x.wrapping_mul(2_246_822_519) ^ y.wrapping_mul(3_266_489_917);
            v ^= v >> 15;
            v = v.wrapping_mul(668_265_263);
            v ^= v >> 13;
            let g = (v % 220) as u8;
            Rgb([g, g, g])
        })
    }

    fn tile(image: RgbImage, row: u32, col: u32, angle_deg: f64) -> (GridCoord, TileData) {
        let (w, h) = image.dimensions();
        let coord = GridCoord::new(row, col);
        (
            coord,
            TileData {
                info: TileInfo {
                    path: PathBuf::from(format!("{coord}.png")),
                    coord,
                    suffix: String::new(),
                },
                image,
                mask: GrayImage::new(w, h),
                angle_deg,
                bbox: CropBox {
                    x: 0,
                    y: 0,
                    width: w,
                    height: h,
                },
                mask_fell_back: false,
            },
        )
    }

    const PARAMS: RefineParams = RefineParams {
        overlap: 15,
        band: 20,
    };

    #[test]
    fn refinement_recovers_three_pixel_offset() {
        let source = noise(220, 120);
        let tiles: TileMap = [
            tile(image::imageops::crop_imm(&source, 0, 10, 100, 100).to_image(), 1, 1, 0.0),
            tile(image::imageops::crop_imm(&source, 83, 10, 100, 100).to_image(), 1, 2, 1.5),
        ]
        .into_iter()
        .collect();

        let layout = refine_layout(&tiles, initial_layout(&tiles), PARAMS, 3);
        let first = layout.placements[&GridCoord::new(1, 1)].transform;
        assert_eq!(first, TileTransform::IDENTITY);

        let second = layout.placements[&GridCoord::new(1, 2)].transform;
        assert!((second.dx - 3.0).abs() < 1.0, "{second:?}");
        assert!(second.dy.abs() < 1.0, "{second:?}");
        assert!((second.angle_deg - 1.5).abs() < f64::EPSILON);
        assert!(second.confidence > 0.0);
        assert!(!second.is_scaled());
    }

    #[test]
    fn zero_iterations_keep_identity() {
        let tiles: TileMap = [tile(noise(40, 40), 1, 1, 0.0), tile(noise(40, 40), 1, 2, 0.0)]
            .into_iter()
            .collect();
        let layout = initial_layout(&tiles);
        assert_eq!(refine_layout(&tiles, layout.clone(), PARAMS, 0), layout);
    }

    #[test]
    fn isolated_tile_is_unchanged() {
        let tiles: TileMap = [tile(noise(40, 40), 1, 1, 0.0), tile(noise(40, 40), 2, 2, 0.0)]
            .into_iter()
            .collect();
        let mut layout = initial_layout(&tiles);
        assert_eq!(refine_pass(&tiles, &mut layout, PARAMS), 0);
        assert_eq!(layout.placements[&GridCoord::new(2, 2)].transform, TileTransform::IDENTITY);
    }

    #[test]
    fn canvas_size_never_changes() {
        let tiles: TileMap = [
            tile(noise(50, 40), 1, 1, 0.0),
            tile(noise(50, 40), 1, 2, 0.0),
            tile(noise(50, 40), 2, 1, 0.0),
        ]
        .into_iter()
        .collect();
        let layout = initial_layout(&tiles);
        let size = layout.canvas_size;
        let refined = refine_layout(&tiles, layout, PARAMS, 2);
        assert_eq!(refined.canvas_size, size);
    }

    #[test]
    fn manual_overrides_win_and_clamp_scale() {
        let tiles: TileMap = [tile(noise(40, 40), 1, 1, 0.0), tile(noise(40, 40), 1, 2, 0.0)]
            .into_iter()
            .collect();
        let mut layout = refine_layout(&tiles, initial_layout(&tiles), PARAMS, 1);
        let overrides: TransformMap = [
            (
                GridCoord::new(1, 2),
                TileTransform {
                    dx: -7.0,
                    dy: 2.0,
                    scale_x: 1.2,
                    scale_y: 1.0,
                    angle_deg: 0.0,
                    confidence: 1.0,
                },
            ),
            (GridCoord::new(5, 5), TileTransform::IDENTITY),
        ]
        .into_iter()
        .collect();

        assert_eq!(apply_manual_overrides(&mut layout, &overrides, 0.5), 1);
        let t = layout.placements[&GridCoord::new(1, 2)].transform;
        assert!((t.dx + 7.0).abs() < f64::EPSILON);
        assert!((t.dy - 2.0).abs() < f64::EPSILON);
        assert!((t.scale_x - 1.005).abs() < 1e-12);
        assert!(!layout.placements.contains_key(&GridCoord::new(5, 5)));
    }
}
