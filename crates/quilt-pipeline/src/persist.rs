//! Transform and project file codecs.
//!
//! Pure string in, typed data out: reading and writing the files is the
//! caller's business. Grid coordinates become `"row,col"` strings only here.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::settings::StitchSettings;
use crate::tile_name::discover_tiles;
use crate::types::{StitchError, TileInfo, TransformMap};

/// Serde adapter for [`TransformMap`] keyed by `"row,col"` strings.
///
/// Keys are written in row-major order.
pub mod coord_keys {
    use std::collections::BTreeMap;

    use serde::de::Error as _;
    use serde::ser::SerializeMap;
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::types::{GridCoord, TileTransform, TransformMap};

    /// Serialize with `"row,col"` keys.
    ///
    /// # Errors
    ///
    /// Propagates serializer errors.
    pub fn serialize<S: Serializer>(map: &TransformMap, serializer: S) -> Result<S::Ok, S::Error> {
        let mut out = serializer.serialize_map(Some(map.len()))?;
        for (coord, transform) in map {
            out.serialize_entry(&coord.to_string(), transform)?;
        }
        out.end()
    }

    /// Deserialize from `"row,col"` keys.
    ///
    /// # Errors
    ///
    /// Fails on a key that is not a valid grid coordinate.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<TransformMap, D::Error> {
        let raw = BTreeMap::<String, TileTransform>::deserialize(deserializer)?;
        raw.into_iter()
            .map(|(key, transform)| {
                key.parse::<GridCoord>()
                    .map(|coord| (coord, transform))
                    .map_err(D::Error::custom)
            })
            .collect()
    }
}

#[derive(Serialize, Deserialize)]
#[serde(transparent)]
struct TransformFile(#[serde(with = "coord_keys")] TransformMap);

/// Encode transforms as a pretty-printed JSON object keyed by `"row,col"`.
///
/// # Errors
///
/// Returns [`StitchError::InvalidTransformFile`] if a value cannot be
/// represented in JSON (a non-finite float).
pub fn transforms_to_json(transforms: &TransformMap) -> Result<String, StitchError> {
    serde_json::to_string_pretty(&TransformFile(transforms.clone()))
        .map_err(|e| StitchError::InvalidTransformFile(e.to_string()))
}

/// Decode a transform file.
///
/// ```
/// use quilt_pipeline::{GridCoord, transforms_from_json};
///
/// let map = transforms_from_json(r#"{"2,3": {"dx": 1.5, "dy": -2.0}}"#).unwrap();
/// let t = map[&GridCoord::new(2, 3)];
/// assert_eq!(t.dx, 1.5);
/// assert_eq!(t.scale_x, 1.0);
/// ```
///
/// # Errors
///
/// Returns [`StitchError::InvalidTransformFile`] for malformed JSON or keys.
pub fn transforms_from_json(json: &str) -> Result<TransformMap, StitchError> {
    serde_json::from_str::<TransformFile>(json)
        .map(|file| file.0)
        .map_err(|e| StitchError::InvalidTransformFile(e.to_string()))
}

/// Saved project: which tiles, with which settings and manual transforms.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectFile {
    /// Tile file names, relative to the project's tile root.
    #[serde(default)]
    pub tiles: Vec<String>,
    /// Settings snapshot.
    #[serde(default)]
    pub settings: StitchSettings,
    /// Manual transforms keyed by `"row,col"`.
    #[serde(default, with = "coord_keys")]
    pub transforms: TransformMap,
    /// Where the stitched raster was written, if anywhere.
    #[serde(default)]
    pub output_path: Option<String>,
}

impl ProjectFile {
    /// Encode as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns [`StitchError::InvalidProjectFile`] if a value cannot be
    /// represented in JSON.
    pub fn to_json(&self) -> Result<String, StitchError> {
        serde_json::to_string_pretty(self).map_err(|e| StitchError::InvalidProjectFile(e.to_string()))
    }

    /// Decode from JSON. Missing sections take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`StitchError::InvalidProjectFile`] for malformed JSON.
    pub fn from_json(json: &str) -> Result<Self, StitchError> {
        serde_json::from_str(json).map_err(|e| StitchError::InvalidProjectFile(e.to_string()))
    }

    /// Resolve the listed tile names against `root`, keeping only names
    /// that follow the tile pattern.
    #[must_use]
    pub fn tile_infos(&self, root: &Path) -> Vec<TileInfo> {
        discover_tiles(self.tiles.iter().map(|name| root.join(name)))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::settings::ColorMatchMode;
    use crate::types::{GridCoord, TileTransform};

    fn sample() -> TransformMap {
        [
            (
                GridCoord::new(1, 2),
                TileTransform {
                    dx: 0.1 + 0.2,
                    dy: -3.141_592_653_589_793,
                    scale_x: 1.004_999_999_999_999_9,
                    scale_y: 0.995,
                    angle_deg: 1e-17,
                    confidence: 0.731_234_567_891_234_5,
                },
            ),
            (GridCoord::new(1, 10), TileTransform::IDENTITY),
            (
                GridCoord::new(3, 1),
                TileTransform {
                    dx: 12.0,
                    ..TileTransform::IDENTITY
                },
            ),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn transforms_roundtrip_exactly() {
        let map = sample();
        let json = transforms_to_json(&map).unwrap();
        let back = transforms_from_json(&json).unwrap();
        assert_eq!(back, map);
        assert_eq!(transforms_to_json(&back).unwrap(), json);
    }

    #[test]
    fn keys_are_written_row_major() {
        let json = transforms_to_json(&sample()).unwrap();
        let first = json.find("\"1,2\"").unwrap();
        let second = json.find("\"1,10\"").unwrap();
        let third = json.find("\"3,1\"").unwrap();
        assert!(first < second && second < third, "{json}");
    }

    #[test]
    fn bad_keys_are_rejected() {
        let err = transforms_from_json(r#"{"x": {}}"#).unwrap_err();
        assert!(matches!(err, StitchError::InvalidTransformFile(_)));
        assert!(transforms_from_json("[1, 2]").is_err());
    }

    #[test]
    fn empty_transform_file() {
        assert!(transforms_from_json("{}").unwrap().is_empty());
    }

    #[test]
    fn project_roundtrip() {
        let project = ProjectFile {
            tiles: vec!["1,1.jpg".into(), "1,2.jpg".into()],
            settings: StitchSettings {
                color_match: ColorMatchMode::Strong,
                ..StitchSettings::default()
            },
            transforms: sample(),
            output_path: Some("out/map.tif".into()),
        };
        let back = ProjectFile::from_json(&project.to_json().unwrap()).unwrap();
        assert_eq!(back, project);
    }

    #[test]
    fn project_sections_default() {
        let project = ProjectFile::from_json(r#"{"tiles": ["2,1.png", "readme.txt"]}"#).unwrap();
        assert_eq!(project.settings, StitchSettings::default());
        assert!(project.transforms.is_empty());
        assert_eq!(project.output_path, None);

        let infos = project.tile_infos(Path::new("/scans"));
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].coord, GridCoord::new(2, 1));
        assert_eq!(infos[0].path, Path::new("/scans/2,1.png"));
    }

    #[test]
    fn malformed_project_is_an_error() {
        assert!(matches!(
            ProjectFile::from_json("{"),
            Err(StitchError::InvalidProjectFile(_))
        ));
    }
}
