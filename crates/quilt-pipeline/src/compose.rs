//! Canvas composition and gap tracking.

use image::imageops::FilterType;
use image::{GrayImage, Luma, Rgb, RgbImage};

use crate::types::{EXCLUDED, INCLUDED, LayoutResult, TileMap, TileTransform};

/// Occupancy value for a canvas pixel written by some tile (or repaired).
pub const FILLED: u8 = 1;

/// Occupancy value for a canvas pixel nobody wrote.
pub const UNFILLED: u8 = 0;

/// The composed canvas plus which pixels received tile content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Composition {
    /// Output raster, white where nothing was drawn.
    pub canvas: RgbImage,
    /// [`FILLED`] or [`UNFILLED`] per canvas pixel.
    pub occupancy: GrayImage,
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
fn scaled(image: &RgbImage, transform: &TileTransform) -> Option<RgbImage> {
    if !transform.is_scaled() {
        return None;
    }
    let w = (f64::from(image.width()) * transform.scale_x).round().max(1.0) as u32;
    let h = (f64::from(image.height()) * transform.scale_y).round().max(1.0) as u32;
    Some(image::imageops::resize(image, w, h, FilterType::Triangle))
}

/// Draw every placed tile onto a white canvas of the layout's size.
///
/// Each tile lands at its cell origin plus its rounded translation, after
/// scaling when the transform asks for it. Destination rectangles are
/// clipped to the canvas; tiles entirely outside contribute nothing.
/// Later tiles (row-major) overwrite earlier ones where they overlap.
#[must_use = "returns the composed canvas"]
#[allow(clippy::cast_possible_truncation)]
pub fn compose_canvas(tiles: &TileMap, layout: &LayoutResult) -> Composition {
    let size = layout.canvas_size;
    let mut canvas = RgbImage::from_pixel(size.width, size.height, Rgb([255, 255, 255]));
    let mut occupancy = GrayImage::from_pixel(size.width, size.height, Luma([UNFILLED]));

    for (coord, tile) in tiles {
        let Some(placement) = layout.placements.get(coord) else {
            continue;
        };
        let resized = scaled(&tile.image, &placement.transform);
        let image = resized.as_ref().unwrap_or(&tile.image);

        let (x0, y0) = placement.canvas_origin(size);
        let x1 = x0.saturating_add(i64::from(image.width())).min(i64::from(size.width));
        let y1 = y0.saturating_add(i64::from(image.height())).min(i64::from(size.height));
        let (cx0, cy0) = (x0.max(0), y0.max(0));
        if cx0 >= x1 || cy0 >= y1 {
            log::debug!("tile {coord} falls outside the canvas");
            continue;
        }

        for cy in cy0..y1 {
            for cx in cx0..x1 {
                // In range by construction: both offsets are within the tile.
                let (sx, sy) = ((cx - x0) as u32, (cy - y0) as u32);
                let (dx, dy) = (cx as u32, cy as u32);
                canvas.put_pixel(dx, dy, *image.get_pixel(sx, sy));
                occupancy.put_pixel(dx, dy, Luma([FILLED]));
            }
        }
    }

    Composition { canvas, occupancy }
}

/// Gap mask: [`EXCLUDED`] where occupancy is unfilled, [`INCLUDED`] elsewhere.
#[must_use = "returns the gap mask"]
pub fn gap_mask(occupancy: &GrayImage) -> GrayImage {
    GrayImage::from_fn(occupancy.width(), occupancy.height(), |x, y| {
        if occupancy.get_pixel(x, y).0[0] == UNFILLED {
            Luma([EXCLUDED])
        } else {
            Luma([INCLUDED])
        }
    })
}

/// Number of nonzero pixels in a mask.
#[must_use]
pub fn count_nonzero(mask: &GrayImage) -> u64 {
    mask.pixels().filter(|p| p.0[0] != 0).count() as u64
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::layout::initial_layout;
    use crate::types::{CropBox, GridCoord, TileData, TileInfo};

    fn tile(row: u32, col: u32, w: u32, h: u32, v: u8) -> (GridCoord, TileData) {
        let coord = GridCoord::new(row, col);
        (
            coord,
            TileData {
                info: TileInfo {
                    path: PathBuf::from(format!("{coord}.png")),
                    coord,
                    suffix: String::new(),
                },
                image: RgbImage::from_pixel(w, h, Rgb([v, v, v])),
                mask: GrayImage::new(w, h),
                angle_deg: 0.0,
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

    #[test]
    fn full_grid_has_no_gaps() {
        let tiles: TileMap = [tile(1, 1, 10, 8, 10), tile(1, 2, 10, 8, 20), tile(2, 1, 10, 8, 30), tile(2, 2, 10, 8, 40)]
            .into_iter()
            .collect();
        let composition = compose_canvas(&tiles, &initial_layout(&tiles));
        assert_eq!(composition.canvas.dimensions(), (20, 16));
        assert_eq!(count_nonzero(&gap_mask(&composition.occupancy)), 0);
        assert_eq!(composition.canvas.get_pixel(15, 12).0[0], 40);
    }

    #[test]
    fn missing_cell_stays_white_and_is_a_gap() {
        let tiles: TileMap = [tile(1, 1, 10, 10, 0), tile(2, 2, 10, 10, 0)].into_iter().collect();
        let composition = compose_canvas(&tiles, &initial_layout(&tiles));
        let gaps = gap_mask(&composition.occupancy);
        assert_eq!(count_nonzero(&gaps), 200);
        assert_eq!(composition.canvas.get_pixel(15, 5).0, [255, 255, 255]);
        assert_eq!(gaps.get_pixel(15, 5).0[0], EXCLUDED);
        assert_eq!(gaps.get_pixel(5, 5).0[0], INCLUDED);
    }

    #[test]
    fn gap_mask_is_exactly_unwritten_pixels() {
        let tiles: TileMap = [tile(1, 1, 10, 10, 0), tile(1, 2, 6, 10, 0)].into_iter().collect();
        let composition = compose_canvas(&tiles, &initial_layout(&tiles));
        let gaps = gap_mask(&composition.occupancy);
        for (x, y, p) in gaps.enumerate_pixels() {
            let filled = composition.occupancy.get_pixel(x, y).0[0] == FILLED;
            assert_eq!(p.0[0] == EXCLUDED, !filled);
            assert_eq!(filled, x < 16, "({x}, {y})");
        }
    }

    #[test]
    fn translation_is_rounded_and_clipped() {
        let tiles: TileMap = [tile(1, 1, 10, 10, 0)].into_iter().collect();
        let mut layout = initial_layout(&tiles);
        let placement = layout.placements.get_mut(&GridCoord::new(1, 1)).unwrap();
        placement.transform.dx = 2.6;
        placement.transform.dy = -1.4;
        let composition = compose_canvas(&tiles, &layout);
        // Shifted right by 3 and up by 1: left columns and bottom row are gaps.
        assert_eq!(composition.occupancy.get_pixel(2, 5).0[0], UNFILLED);
        assert_eq!(composition.occupancy.get_pixel(3, 5).0[0], FILLED);
        assert_eq!(composition.occupancy.get_pixel(5, 8).0[0], FILLED);
        assert_eq!(composition.occupancy.get_pixel(5, 9).0[0], UNFILLED);
    }

    #[test]
    fn tile_outside_canvas_contributes_nothing() {
        let tiles: TileMap = [tile(1, 1, 10, 10, 0)].into_iter().collect();
        let mut layout = initial_layout(&tiles);
        layout.placements.get_mut(&GridCoord::new(1, 1)).unwrap().transform.dx = 40.0;
        let composition = compose_canvas(&tiles, &layout);
        assert_eq!(count_nonzero(&composition.occupancy), 0);
    }

    #[test]
    fn huge_translation_is_off_canvas_not_overflow() {
        let tiles: TileMap = [tile(1, 1, 20, 20, 0), tile(1, 2, 20, 20, 0)].into_iter().collect();
        let mut layout = initial_layout(&tiles);
        layout.placements.get_mut(&GridCoord::new(1, 2)).unwrap().transform.dx = 1e300;
        layout.placements.get_mut(&GridCoord::new(1, 1)).unwrap().transform.dy = -1e300;
        let composition = compose_canvas(&tiles, &layout);
        assert_eq!(count_nonzero(&composition.occupancy), 0);
    }

    #[test]
    fn canvas_origin_clamps_but_keeps_small_shifts() {
        let tiles: TileMap = [tile(1, 1, 10, 10, 0), tile(1, 2, 10, 10, 0)].into_iter().collect();
        let layout = initial_layout(&tiles);
        let mut placement = layout.placements[&GridCoord::new(1, 2)];
        placement.transform.dx = -3.4;
        assert_eq!(placement.canvas_origin(layout.canvas_size), (7, 0));
        placement.transform.dx = f64::INFINITY;
        placement.transform.dy = f64::NAN;
        assert_eq!(placement.canvas_origin(layout.canvas_size), (10 + 2 * (20 + 10), 0));
    }

    #[test]
    fn scaled_tile_is_resampled() {
        let tiles: TileMap = [tile(1, 1, 100, 10, 7), tile(1, 2, 100, 10, 9)].into_iter().collect();
        let mut layout = initial_layout(&tiles);
        let t = &mut layout.placements.get_mut(&GridCoord::new(1, 1)).unwrap().transform;
        t.scale_x = 0.95;
        let composition = compose_canvas(&tiles, &layout);
        // Column 95..100 of the first cell is no longer covered.
        assert_eq!(composition.occupancy.get_pixel(94, 0).0[0], FILLED);
        assert_eq!(composition.occupancy.get_pixel(96, 0).0[0], UNFILLED);
        assert_eq!(composition.canvas.get_pixel(50, 5).0[0], 7);
    }
}
