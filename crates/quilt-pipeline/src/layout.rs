//! Initial grid placement.
//!
//! Every cell is as large as the largest tile, so no tile overflows its
//! cell before correction. Column maps to the canvas X axis, row to Y.

use std::collections::{BTreeMap, BTreeSet};

use crate::types::{Dimensions, GridCoord, LayoutResult, TileLayout, TileMap, TileTransform};

/// Largest row and column present, or `(0, 0)` for an empty set.
#[must_use]
pub fn grid_extent<'a>(coords: impl IntoIterator<Item = &'a GridCoord>) -> (u32, u32) {
    coords
        .into_iter()
        .fold((0, 0), |(rows, cols), c| (rows.max(c.row), cols.max(c.col)))
}

/// Every cell of the `1..=max_row x 1..=max_col` rectangle that has no
/// tile, in row-major order.
#[must_use]
pub fn missing_cells<'a>(coords: impl IntoIterator<Item = &'a GridCoord>) -> Vec<GridCoord> {
    let present: BTreeSet<GridCoord> = coords.into_iter().copied().collect();
    let (max_row, max_col) = grid_extent(&present);
    (1..=max_row)
        .flat_map(|row| (1..=max_col).map(move |col| GridCoord::new(row, col)))
        .filter(|c| !present.contains(c))
        .collect()
}

/// Place every tile in its grid cell with an identity transform.
///
/// The canvas is `max_col * cell_w` by `max_row * cell_h`, where the cell
/// size is the maximum tile width and height. It never changes afterwards.
#[must_use = "returns the layout"]
pub fn initial_layout(tiles: &TileMap) -> LayoutResult {
    let (max_row, max_col) = grid_extent(tiles.keys());
    let cell_w = tiles.values().map(|t| t.image.width()).max().unwrap_or(0);
    let cell_h = tiles.values().map(|t| t.image.height()).max().unwrap_or(0);

    let placements: BTreeMap<GridCoord, TileLayout> = tiles
        .keys()
        .map(|&coord| {
            (
                coord,
                TileLayout {
                    origin_x: i64::from(coord.col.saturating_sub(1)) * i64::from(cell_w),
                    origin_y: i64::from(coord.row.saturating_sub(1)) * i64::from(cell_h),
                    tile_w: cell_w,
                    tile_h: cell_h,
                    transform: TileTransform::IDENTITY,
                },
            )
        })
        .collect();

    LayoutResult {
        placements,
        canvas_size: Dimensions {
            width: max_col * cell_w,
            height: max_row * cell_h,
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::path::PathBuf;

    use image::{GrayImage, RgbImage};

    use super::*;
    use crate::types::{CropBox, TileData, TileInfo};

    fn tile(row: u32, col: u32, w: u32, h: u32) -> (GridCoord, TileData) {
        let coord = GridCoord::new(row, col);
        (
            coord,
            TileData {
                info: TileInfo {
                    path: PathBuf::from(format!("{coord}.png")),
                    coord,
                    suffix: String::new(),
                },
                image: RgbImage::new(w, h),
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
    fn canvas_is_grid_extent_times_max_cell() {
        let tiles: TileMap = [
            tile(1, 1, 100, 90),
            tile(1, 2, 96, 100),
            tile(2, 1, 104, 80),
            tile(2, 3, 90, 95),
        ]
        .into_iter()
        .collect();
        let layout = initial_layout(&tiles);
        assert_eq!(
            layout.canvas_size,
            Dimensions {
                width: 3 * 104,
                height: 2 * 100,
            }
        );
        let p = layout.placements[&GridCoord::new(2, 3)];
        assert_eq!((p.origin_x, p.origin_y), (2 * 104, 100));
        assert_eq!((p.tile_w, p.tile_h), (104, 100));
        assert_eq!(p.transform, TileTransform::IDENTITY);
    }

    #[test]
    fn origin_of_first_cell_is_zero() {
        let tiles: TileMap = [tile(1, 1, 10, 10)].into_iter().collect();
        let layout = initial_layout(&tiles);
        let p = layout.placements[&GridCoord::new(1, 1)];
        assert_eq!((p.origin_x, p.origin_y), (0, 0));
        assert_eq!(layout.canvas_size.area(), 100);
    }

    #[test]
    fn empty_tile_set_has_empty_canvas() {
        let layout = initial_layout(&TileMap::new());
        assert!(layout.placements.is_empty());
        assert_eq!(layout.canvas_size.area(), 0);
    }

    #[test]
    fn zero_coordinates_do_not_underflow() {
        let tiles: TileMap = [tile(0, 0, 10, 10), tile(1, 2, 10, 10)].into_iter().collect();
        let layout = initial_layout(&tiles);
        let first = layout.placements[&GridCoord::new(0, 0)];
        assert_eq!((first.origin_x, first.origin_y), (0, 0));
        assert_eq!(layout.canvas_size.width, 20);
    }

    #[test]
    fn missing_cells_reports_holes_row_major() {
        let coords = [
            GridCoord::new(1, 1),
            GridCoord::new(1, 3),
            GridCoord::new(3, 1),
            GridCoord::new(3, 3),
            GridCoord::new(2, 1),
        ];
        assert_eq!(
            missing_cells(&coords),
            vec![
                GridCoord::new(1, 2),
                GridCoord::new(2, 2),
                GridCoord::new(2, 3),
                GridCoord::new(3, 2),
            ]
        );
    }

    #[test]
    fn full_grid_has_no_missing_cells() {
        let coords: Vec<GridCoord> = (1..=2)
            .flat_map(|r| (1..=4).map(move |c| GridCoord::new(r, c)))
            .collect();
        assert!(missing_cells(&coords).is_empty());
        assert_eq!(grid_extent(&coords), (2, 4));
    }
}
