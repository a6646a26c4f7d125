//! Tile file naming: `"<row>,<col><suffix>.<ext>"`.
//!
//! Names that do not follow the pattern are not tiles and are skipped
//! during discovery.

use std::path::{Path, PathBuf};

use crate::types::{GridCoord, StitchError, TileInfo};

/// Extensions accepted as tile images (compared case-insensitively).
pub const TILE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "tif", "tiff"];

/// Split a leading run of ASCII digits off `s`.
fn leading_number(s: &str) -> Option<(u32, &str)> {
    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    if end == 0 {
        return None;
    }
    let value = s[..end].parse().ok()?;
    Some((value, &s[end..]))
}

/// Parse a tile file name into its grid coordinate and suffix.
///
/// ```
/// use quilt_pipeline::{GridCoord, parse_tile_name};
///
/// let (coord, suffix) = parse_tile_name("3,12_scan.JPG").unwrap();
/// assert_eq!(coord, GridCoord::new(3, 12));
/// assert_eq!(suffix, "_scan");
/// assert!(parse_tile_name("notes.txt").is_none());
/// ```
#[must_use]
pub fn parse_tile_name(file_name: &str) -> Option<(GridCoord, String)> {
    let (stem, ext) = file_name.rsplit_once('.')?;
    if !TILE_EXTENSIONS.iter().any(|e| e.eq_ignore_ascii_case(ext)) {
        return None;
    }
    let (row, rest) = leading_number(stem)?;
    let rest = rest.strip_prefix(',')?;
    let (col, suffix) = leading_number(rest)?;
    if row == 0 || col == 0 {
        return None;
    }
    Some((GridCoord::new(row, col), suffix.to_owned()))
}

impl TileInfo {
    /// Build tile identity from a path whose file name follows the tile pattern.
    ///
    /// # Errors
    ///
    /// Returns [`StitchError::InvalidTileName`] if the file name does not
    /// encode a grid coordinate.
    pub fn from_path(path: impl Into<PathBuf>) -> Result<Self, StitchError> {
        let path = path.into();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        let (coord, suffix) =
            parse_tile_name(name).ok_or_else(|| StitchError::InvalidTileName(path.display().to_string()))?;
        Ok(Self {
            path,
            coord,
            suffix,
        })
    }
}

/// Keep the paths that are tiles, sorted by `(row, col)`.
///
/// When two files name the same cell the first one in input order wins.
#[must_use]
pub fn discover_tiles<P: AsRef<Path>>(paths: impl IntoIterator<Item = P>) -> Vec<TileInfo> {
    let mut tiles: Vec<TileInfo> = paths
        .into_iter()
        .filter_map(|p| TileInfo::from_path(p.as_ref()).ok())
        .collect();
    tiles.sort_by_key(|t| t.coord);
    tiles.dedup_by_key(|t| t.coord);
    tiles
}
