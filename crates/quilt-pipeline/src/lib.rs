//! quilt-pipeline: Pure tile alignment and compositing pipeline (sans-IO).
//!
//! Assembles a grid of overlapping scanned tiles into one raster through:
//! background detection + deskew -> photometric normalization ->
//! grid layout -> phase-correlation refinement -> feathered edge blending ->
//! canvas composition -> gap repair.
//!
//! This crate has **no I/O dependencies** -- tile pixels arrive through a
//! [`TileSource`], time through a [`Clock`](diagnostics::Clock), and
//! persisted files are plain strings in and out. All filesystem
//! interaction lives in the `quilt` binary; raster encoding lives in
//! `quilt-export`.
//!
//! ```
//! use std::collections::BTreeMap;
//!
//! use quilt_pipeline::{
//!     CancelToken, GridCoord, NoProgress, RgbImage, StitchOptions, TileInfo, stitch,
//! };
//!
//! let tiles = vec![TileInfo::from_path("1,1.png").unwrap(), TileInfo::from_path("1,2.png").unwrap()];
//! let source: BTreeMap<GridCoord, RgbImage> = tiles
//!     .iter()
//!     .map(|t| (t.coord, RgbImage::from_pixel(40, 30, image::Rgb([90, 80, 70]))))
//!     .collect();
//!
//! let output = stitch(tiles, &source, &StitchOptions::default(), &mut NoProgress, &CancelToken::new())
//!     .unwrap()
//!     .expect("not cancelled");
//! assert_eq!(output.canvas.dimensions(), (80, 30));
//! assert_eq!(output.report.gap_px_after, 0);
//! ```

pub mod background;
pub mod blend;
pub mod color;
pub mod compose;
pub mod debug;
pub mod diagnostics;
pub mod inpaint;
pub mod layout;
pub mod matcher;
pub mod persist;
pub mod phase;
pub mod photometric;
pub mod pipeline;
pub mod preprocess;
pub mod protect;
pub mod refine;
pub mod seamfill;
pub mod settings;
pub mod tile_name;
pub mod types;

pub use debug::DebugArtifacts;
pub use persist::{ProjectFile, transforms_from_json, transforms_to_json};
pub use pipeline::{
    CancelToken, NoProgress, Pipeline, ProgressEvent, ProgressSink, Stage, StitchOptions, StitchOutput,
    StitchReport, TileSource, stitch,
};
pub use seamfill::SeamFillOutcome;
pub use settings::{
    BackgroundMode, ColorMatchMode, Compression, EncodeRequest, InpaintMethod, StitchMode, StitchSettings,
};
pub use tile_name::{TILE_EXTENSIONS, discover_tiles, parse_tile_name};
pub use types::{
    Dimensions, GrayImage, GridCoord, LayoutResult, RgbImage, StitchError, TileData, TileInfo, TileLayout,
    TileMap, TileTransform, TransformMap,
};
