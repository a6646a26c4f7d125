//! Shared types for the quilt tile stitching pipeline.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Re-export `GrayImage` so downstream crates can reference masks
/// without depending on `image` directly.
pub use image::GrayImage;

/// Re-export `RgbImage` so downstream crates can reference tile and
/// canvas rasters without depending on `image` directly.
pub use image::RgbImage;

/// Mask value marking a pixel as excluded (background, gap, protected).
pub const EXCLUDED: u8 = 255;

/// Mask value marking a pixel as content / not excluded.
pub const INCLUDED: u8 = 0;

/// Position of a tile in the source grid.
///
/// Both indices are 1-based. `row` maps to the canvas Y axis and `col`
/// to the canvas X axis. Ordering is row-major, which is also the order
/// every stage visits tiles in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GridCoord {
    /// 1-based row index (the `x` of a `"x,y"` tile name).
    pub row: u32,
    /// 1-based column index (the `y` of a `"x,y"` tile name).
    pub col: u32,
}

impl GridCoord {
    /// Create a new grid coordinate.
    #[must_use]
    pub const fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }

    /// The cell immediately to the left, if the grid has one.
    #[must_use]
    pub const fn left(self) -> Option<Self> {
        if self.col > 1 {
            Some(Self::new(self.row, self.col - 1))
        } else {
            None
        }
    }

    /// The cell immediately above, if the grid has one.
    #[must_use]
    pub const fn top(self) -> Option<Self> {
        if self.row > 1 {
            Some(Self::new(self.row - 1, self.col))
        } else {
            None
        }
    }
}

impl fmt::Display for GridCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.row, self.col)
    }
}

/// Error returned when a `"row,col"` key cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid grid coordinate {0:?}, expected \"row,col\"")]
pub struct ParseGridCoordError(pub String);

impl FromStr for GridCoord {
    type Err = ParseGridCoordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseGridCoordError(s.to_owned());
        let (row, col) = s.split_once(',').ok_or_else(err)?;
        let row: u32 = row.trim().parse().map_err(|_| err())?;
        let col: u32 = col.trim().parse().map_err(|_| err())?;
        if row == 0 || col == 0 {
            return Err(err());
        }
        Ok(Self::new(row, col))
    }
}

/// Immutable identity of one tile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileInfo {
    /// Where the tile was discovered. Opaque to the core.
    pub path: PathBuf,
    /// Grid position parsed from the file name.
    pub coord: GridCoord,
    /// Anything between the coordinates and the extension (may be empty).
    pub suffix: String,
}

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// Total pixel count.
    #[must_use]
    pub const fn area(self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// Crop rectangle, relative to the decoded source image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropBox {
    /// Left edge.
    pub x: u32,
    /// Top edge.
    pub y: u32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

/// A preprocessed tile.
///
/// The pixel buffer is edited in place by the edge blender; everything
/// else is fixed once preprocessing returns.
#[derive(Debug, Clone)]
pub struct TileData {
    /// Identity of the tile.
    pub info: TileInfo,
    /// Background-removed, deskewed, cropped pixels.
    pub image: RgbImage,
    /// Content mask: [`INCLUDED`] for content, [`EXCLUDED`] for background.
    pub mask: GrayImage,
    /// Deskew angle that was applied, in degrees.
    pub angle_deg: f64,
    /// Crop rectangle relative to the original decode.
    pub bbox: CropBox,
    /// Whether the mask came from the grayscale fallback.
    pub mask_fell_back: bool,
}

impl TileData {
    /// Dimensions of the tile's pixel buffer.
    #[must_use]
    pub fn dimensions(&self) -> Dimensions {
        Dimensions {
            width: self.image.width(),
            height: self.image.height(),
        }
    }
}

/// Tiles keyed by grid coordinate, iterated in row-major order.
pub type TileMap = BTreeMap<GridCoord, TileData>;

/// Small affine correction for one tile.
///
/// Missing fields deserialize to their identity values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TileTransform {
    /// Horizontal translation in pixels.
    pub dx: f64,
    /// Vertical translation in pixels.
    pub dy: f64,
    /// Horizontal scale factor.
    pub scale_x: f64,
    /// Vertical scale factor.
    pub scale_y: f64,
    /// Rotation in degrees (informational; deskew is already applied).
    pub angle_deg: f64,
    /// Matcher confidence in `[0, 1]`.
    pub confidence: f64,
}

impl TileTransform {
    /// The identity transform.
    pub const IDENTITY: Self = Self {
        dx: 0.0,
        dy: 0.0,
        scale_x: 1.0,
        scale_y: 1.0,
        angle_deg: 0.0,
        confidence: 0.0,
    };

    /// Whether the scale differs from 1.0 on either axis.
    #[must_use]
    #[allow(clippy::float_cmp)]
    pub fn is_scaled(&self) -> bool {
        self.scale_x != 1.0 || self.scale_y != 1.0
    }

    /// Copy of this transform with both scale factors clamped to
    /// `1 ± max_percent / 100`.
    #[must_use]
    pub fn with_scale(self, scale_x: f64, scale_y: f64, max_percent: f64) -> Self {
        Self {
            scale_x: crate::matcher::clamp_scale(scale_x, max_percent),
            scale_y: crate::matcher::clamp_scale(scale_y, max_percent),
            ..self
        }
    }
}

impl Default for TileTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Manual or persisted transforms keyed by grid coordinate.
pub type TransformMap = BTreeMap<GridCoord, TileTransform>;

/// Placement of one tile in canvas space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileLayout {
    /// Left edge of the tile's cell on the canvas.
    pub origin_x: i64,
    /// Top edge of the tile's cell on the canvas.
    pub origin_y: i64,
    /// Nominal cell width.
    pub tile_w: u32,
    /// Nominal cell height.
    pub tile_h: u32,
    /// Current correction.
    pub transform: TileTransform,
}

impl TileLayout {
    /// Top-left canvas position: cell origin plus rounded translation.
    ///
    /// The translation is clamped to twice the canvas-plus-cell extent on
    /// each axis, so an arbitrarily large shift still lands the tile fully
    /// outside the canvas instead of overflowing.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn canvas_origin(&self, canvas: Dimensions) -> (i64, i64) {
        let shift = |t: f64, extent: u32, cell: u32| {
            let bound = 2.0 * (f64::from(extent) + f64::from(cell));
            if t.is_nan() { 0 } else { t.clamp(-bound, bound).round() as i64 }
        };
        (
            self.origin_x.saturating_add(shift(self.transform.dx, canvas.width, self.tile_w)),
            self.origin_y.saturating_add(shift(self.transform.dy, canvas.height, self.tile_h)),
        )
    }
}

/// Placement of every tile plus the fixed canvas size.
#[derive(Debug, Clone, PartialEq)]
pub struct LayoutResult {
    /// Placement per grid coordinate.
    pub placements: BTreeMap<GridCoord, TileLayout>,
    /// Canvas size. Fixed at initial layout and never changed afterwards.
    pub canvas_size: Dimensions,
}

impl LayoutResult {
    /// The current transform of every placed tile.
    #[must_use]
    pub fn transforms(&self) -> TransformMap {
        self.placements
            .iter()
            .map(|(&coord, placement)| (coord, placement.transform))
            .collect()
    }
}

/// Errors that can occur while stitching.
#[derive(Debug, thiserror::Error)]
pub enum StitchError {
    /// No tile matched the naming pattern, so there is nothing to stitch.
    #[error("no valid tiles found, expected file names like 1,1.jpg")]
    NoTiles,

    /// Tile bytes were empty.
    #[error("input image data is empty")]
    EmptyInput,

    /// Failed to decode tile bytes.
    #[error("failed to decode image: {0}")]
    ImageDecode(#[from] image::ImageError),

    /// The tile source could not provide pixels for a tile.
    #[error("failed to load tile {coord}: {message}")]
    TileLoad {
        /// Which tile failed.
        coord: GridCoord,
        /// Human-readable cause.
        message: String,
    },

    /// A transform file could not be parsed.
    #[error("invalid transform file: {0}")]
    InvalidTransformFile(String),

    /// A project file could not be parsed.
    #[error("invalid project file: {0}")]
    InvalidProjectFile(String),

    /// A file explicitly named as a tile does not follow the `row,col` pattern.
    #[error("not a tile name: {0}")]
    InvalidTileName(String),
}
