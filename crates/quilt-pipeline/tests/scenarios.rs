//! End-to-end stitch runs on synthetic in-memory tiles.

#![allow(clippy::unwrap_used)]

use std::cell::Cell;
use std::collections::BTreeMap;
use std::path::PathBuf;

use image::Rgb;
use quilt_pipeline::{
    CancelToken, ColorMatchMode, GridCoord, NoProgress, ProgressEvent, RgbImage, SeamFillOutcome, Stage,
    StitchError, StitchOptions, StitchOutput, StitchSettings, TileInfo, TileSource, TileTransform, TransformMap,
    stitch, transforms_from_json, transforms_to_json,
};

/// A large "map" every tile is cut from: deterministic hash noise, all of it
/// dark enough to count as content.
fn map(w: u32, h: u32) -> RgbImage {
    RgbImage::from_fn(w, h, |x, y| {
        let mut v = x.wrapping_mul(2_654_435_761) ^ y.wrapping_mul(40_503);
        v ^= v >> 16;
        v = v.wrapping_mul(0x45d9_f3b);
        v ^= v >> 16;
        let g = (v % 200) as u8 + 10;
        Rgb([g, g, g])
    })
}

fn info(row: u32, col: u32) -> TileInfo {
    TileInfo::from_path(PathBuf::from(format!("{row},{col}.png"))).unwrap()
}

fn run(
    tiles: BTreeMap<GridCoord, RgbImage>,
    settings: StitchSettings,
    overrides: TransformMap,
) -> StitchOutput {
    let infos = tiles.keys().map(|c| info(c.row, c.col)).collect();
    let options = StitchOptions {
        settings,
        mode: None,
        overrides,
    };
    stitch(infos, &tiles, &options, &mut NoProgress, &CancelToken::new())
        .unwrap()
        .unwrap()
}

/// Cut a `rows x cols` grid of `size`-pixel tiles from one map.
fn cut_grid(rows: u32, cols: u32, size: u32, skip: &[(u32, u32)]) -> BTreeMap<GridCoord, RgbImage> {
    let source = map(cols * size, rows * size);
    let mut tiles = BTreeMap::new();
    for row in 1..=rows {
        for col in 1..=cols {
            if skip.contains(&(row, col)) {
                continue;
            }
            let tile = image::imageops::crop_imm(&source, (col - 1) * size, (row - 1) * size, size, size);
            tiles.insert(GridCoord::new(row, col), tile.to_image());
        }
    }
    tiles
}

#[test]
fn missing_center_cell_leaves_a_gap_that_gets_repaired() {
    let tiles = cut_grid(3, 3, 100, &[(2, 2)]);
    let settings = StitchSettings {
        refine_iterations: 0,
        ..StitchSettings::default()
    };
    let output = run(tiles, settings, TransformMap::new());

    assert_eq!(output.report.missing, vec![GridCoord::new(2, 2)]);
    assert_eq!(output.report.tile_count, 8);
    assert_eq!(output.canvas.dimensions(), (300, 300));

    // The whole missing cell was a gap right after composition.
    assert_eq!(output.report.gap_px_before, 100 * 100);
    assert_eq!(output.gap_mask_before.get_pixel(150, 150).0[0], 255);
    assert_eq!(output.gap_mask_before.get_pixel(50, 50).0[0], 0);

    // Universal repair always runs and fills every gap.
    assert_eq!(output.report.gap_px_after, 0);
    assert!(output.gap_mask_after.pixels().all(|p| p.0[0] == 0));
    assert_eq!(output.report.seam_fill, SeamFillOutcome::Disabled);
}

#[test]
fn canvas_is_grid_extent_times_largest_tile() {
    let mut tiles = cut_grid(2, 3, 60, &[]);
    tiles.insert(GridCoord::new(1, 2), map(72, 50));
    let output = run(
        tiles,
        StitchSettings {
            refine_iterations: 0,
            ..StitchSettings::default()
        },
        TransformMap::new(),
    );
    assert_eq!(output.canvas.dimensions(), (3 * 72, 2 * 60));
    assert_eq!(output.layout.canvas_size.width, 216);
}

#[test]
fn refinement_recovers_a_three_pixel_offset() {
    let source = map(260, 140);
    let tiles: BTreeMap<GridCoord, RgbImage> = [
        (GridCoord::new(1, 1), image::imageops::crop_imm(&source, 0, 20, 100, 100).to_image()),
        (GridCoord::new(1, 2), image::imageops::crop_imm(&source, 83, 20, 100, 100).to_image()),
    ]
    .into_iter()
    .collect();

    // 20 px of overlap sampled on each side; the right tile starts 3 px
    // further right than a clean 20 px overlap would put it.
    let settings = StitchSettings {
        refine_iterations: 3,
        seam_band_px: 20,
        color_match: ColorMatchMode::Off,
        ..StitchSettings::default()
    };
    let output = run(tiles, settings, TransformMap::new());

    let first = output.layout.placements[&GridCoord::new(1, 1)].transform;
    let second = output.layout.placements[&GridCoord::new(1, 2)].transform;
    assert_eq!(first, TileTransform::IDENTITY);
    assert!((second.dx - 3.0).abs() < 1.0, "{second:?}");
    assert!(second.dy.abs() < 1.0, "{second:?}");
    assert!(second.confidence > 0.0);
    assert_eq!(output.report.refine_passes, 3);
}

#[test]
fn manual_overrides_replace_refined_transforms() {
    let tiles = cut_grid(1, 2, 100, &[]);
    let overrides: TransformMap = [(
        GridCoord::new(1, 2),
        TileTransform {
            dx: -7.0,
            ..TileTransform::IDENTITY
        },
    )]
    .into_iter()
    .collect();
    let output = run(tiles, StitchSettings::default(), overrides);

    assert_eq!(output.report.overrides_applied, 1);
    let t = output.layout.placements[&GridCoord::new(1, 2)].transform;
    assert!((t.dx + 7.0).abs() < f64::EPSILON);
    // The right tile now ends 7 columns short of the canvas edge.
    assert_eq!(output.report.gap_px_before, 7 * 100);
    assert_eq!(output.gap_mask_before.get_pixel(195, 50).0[0], 255);
    assert_eq!(output.gap_mask_before.get_pixel(190, 50).0[0], 0);
}

#[test]
fn seam_fill_is_skipped_for_large_defects() {
    let tiles = cut_grid(2, 2, 50, &[(2, 2)]);
    let settings = StitchSettings {
        refine_iterations: 0,
        seam_fill_enabled: true,
        seam_fill_max_px: 0,
        ..StitchSettings::default()
    };
    let output = run(tiles, settings, TransformMap::new());
    // A quarter of the canvas is far above the 0.5% limit.
    assert!(
        matches!(output.report.seam_fill, SeamFillOutcome::SkippedTooLarge { .. }),
        "{:?}",
        output.report.seam_fill
    );
    assert_eq!(output.report.gap_px_after, 0);
}

#[test]
fn final_transforms_round_trip_through_json() {
    let tiles = cut_grid(2, 2, 60, &[]);
    let output = run(tiles, StitchSettings::default(), TransformMap::new());
    let transforms = output.layout.transforms();
    assert_eq!(transforms.len(), 4);
    let json = transforms_to_json(&transforms).unwrap();
    assert_eq!(transforms_from_json(&json).unwrap(), transforms);
}

#[test]
fn progress_follows_the_stage_order() {
    let tiles = cut_grid(1, 2, 40, &[]);
    let infos = tiles.keys().map(|c| info(c.row, c.col)).collect();
    let options = StitchOptions {
        settings: StitchSettings {
            seam_fill_enabled: true,
            ..StitchSettings::default()
        },
        ..StitchOptions::default()
    };
    let mut events = Vec::new();
    stitch(infos, &tiles, &options, &mut events, &CancelToken::new())
        .unwrap()
        .unwrap();

    let stages: Vec<Stage> = events
        .iter()
        .filter_map(|e| match e {
            ProgressEvent::Stage(s) => Some(*s),
            ProgressEvent::Progress(_) => None,
        })
        .collect();
    let mut sorted = stages.clone();
    sorted.sort();
    assert_eq!(stages, sorted);
    assert_eq!(stages.len(), 11);
    assert_eq!(events.last(), Some(&ProgressEvent::Progress(100)));
}

/// Source that requests cancellation while serving one particular tile.
struct CancellingSource {
    tiles: BTreeMap<GridCoord, RgbImage>,
    cancel_at: GridCoord,
    token: CancelToken,
    loads: Cell<usize>,
}

impl TileSource for CancellingSource {
    fn load(&self, info: &TileInfo) -> Result<RgbImage, StitchError> {
        self.loads.set(self.loads.get() + 1);
        if info.coord == self.cancel_at {
            self.token.cancel();
        }
        self.tiles.load(info)
    }
}

#[test]
fn cancellation_finishes_the_current_tile_then_stops() {
    let tiles = cut_grid(2, 2, 30, &[]);
    let infos = tiles.keys().map(|c| info(c.row, c.col)).collect();
    let token = CancelToken::new();
    let source = CancellingSource {
        tiles,
        cancel_at: GridCoord::new(1, 2),
        token: token.clone(),
        loads: Cell::new(0),
    };
    let mut events = Vec::new();
    let result = stitch(infos, &source, &StitchOptions::default(), &mut events, &token).unwrap();

    assert!(result.is_none());
    assert_eq!(source.loads.get(), 2);
    assert!(!events.contains(&ProgressEvent::Stage(Stage::Done)));
}

#[test]
fn no_tiles_is_the_only_fatal_input() {
    let tiles: BTreeMap<GridCoord, RgbImage> = BTreeMap::new();
    let result = stitch(Vec::new(), &tiles, &StitchOptions::default(), &mut NoProgress, &CancelToken::new());
    assert!(matches!(result, Err(StitchError::NoTiles)));
}

#[test]
fn absurd_manual_shift_drops_the_tile_instead_of_failing() {
    let tiles = cut_grid(1, 2, 20, &[]);
    let overrides = transforms_from_json(r#"{"1,2": {"dx": 1e300}}"#).unwrap();
    let output = run(tiles, StitchSettings::default(), overrides);

    assert_eq!(output.canvas.dimensions(), (40, 20));
    // The right cell was never drawn, so it was a gap before repair.
    assert_eq!(output.report.gap_px_before, 20 * 20);
    assert_eq!(output.gap_mask_before.get_pixel(30, 10).0[0], 255);
    assert_eq!(output.report.gap_px_after, 0);
}
