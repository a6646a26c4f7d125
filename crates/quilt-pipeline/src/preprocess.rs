//! Tile preprocessing: isolate content, deskew, crop.
//!
//! 1. Background mask (see [`crate::background`])
//! 2. Crop to the padded bounding box of content pixels
//! 3. Estimate skew from the minimum-area rectangle around the largest
//!    outer content contour, clamped to `±max_angle`
//! 4. If the skew is noticeable, rotate image and mask back and crop again
//!
//! A tile without any content is returned uncropped with an all-excluded
//! mask; that is not an error.

use image::{GrayImage, Luma, Rgb, RgbImage};
use imageproc::contours::{BorderType, Contour};
use imageproc::geometric_transformations::{Interpolation, rotate_about_center};
use imageproc::point::Point;

use crate::background::compute_mask;
use crate::settings::StitchSettings;
use crate::types::{CropBox, EXCLUDED, INCLUDED, TileData, TileInfo};

/// Skew angles at or below this magnitude (degrees) are not corrected.
pub const DESKEW_TOLERANCE_DEG: f64 = 0.01;

/// Fill color for pixels rotated in from outside the tile.
const PAPER_WHITE: Rgb<u8> = Rgb([255, 255, 255]);

/// Image and mask cropped to their content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cropped {
    /// Cropped pixels.
    pub image: RgbImage,
    /// Cropped mask.
    pub mask: GrayImage,
    /// Crop rectangle in the input's coordinates.
    pub bbox: CropBox,
}

/// Crop image and mask to the bounding box of content pixels, grown by
/// `padding` and clamped to the image.
///
/// When the mask has no content pixels the input is returned unchanged
/// with a full-image box.
#[must_use = "returns the cropped image and mask"]
pub fn crop_to_content(image: &RgbImage, mask: &GrayImage, padding: u32) -> Cropped {
    let (w, h) = (image.width(), image.height());
    let bounds = mask
        .enumerate_pixels()
        .filter(|(_, _, p)| p.0[0] == INCLUDED)
        .fold(None, |acc: Option<(u32, u32, u32, u32)>, (x, y, _)| {
            Some(acc.map_or((x, y, x, y), |(x0, y0, x1, y1)| {
                (x0.min(x), y0.min(y), x1.max(x), y1.max(y))
            }))
        });

    let Some((min_x, min_y, max_x, max_y)) = bounds else {
        return Cropped {
            image: image.clone(),
            mask: mask.clone(),
            bbox: CropBox {
                x: 0,
                y: 0,
                width: w,
                height: h,
            },
        };
    };

    let x0 = min_x.saturating_sub(padding);
    let y0 = min_y.saturating_sub(padding);
    let x1 = max_x.saturating_add(padding).min(w - 1);
    let y1 = max_y.saturating_add(padding).min(h - 1);
    let bbox = CropBox {
        x: x0,
        y: y0,
        width: x1 - x0 + 1,
        height: y1 - y0 + 1,
    };

    Cropped {
        image: image::imageops::crop_imm(image, bbox.x, bbox.y, bbox.width, bbox.height)
            .to_image(),
        mask: image::imageops::crop_imm(mask, bbox.x, bbox.y, bbox.width, bbox.height)
            .to_image(),
        bbox,
    }
}

/// Signed area enclosed by a contour (shoelace formula), in pixels.
fn contour_area(contour: &Contour<i32>) -> f64 {
    let points = &contour.points;
    if points.len() < 3 {
        return 0.0;
    }
    let twice: f64 = points
        .iter()
        .zip(points.iter().cycle().skip(1))
        .map(|(a, b)| f64::from(a.x).mul_add(f64::from(b.y), -(f64::from(b.x) * f64::from(a.y))))
        .sum();
    (twice / 2.0).abs()
}

/// Fold an angle in degrees into `(-45, 45]`.
#[must_use]
pub fn fold_angle(angle_deg: f64) -> f64 {
    let folded = angle_deg.rem_euclid(90.0);
    if folded > 45.0 { folded - 90.0 } else { folded }
}

/// Estimate the skew of the content region in degrees.
///
/// Positive angles mean the content is rotated clockwise on screen. The
/// result always satisfies `|angle| <= max_angle`. Masks without content
/// report 0.
#[must_use]
pub fn estimate_angle(mask: &GrayImage, max_angle: f64) -> f64 {
    let mut content = mask.clone();
    image::imageops::invert(&mut content);

    let contours: Vec<Contour<i32>> = imageproc::contours::find_contours(&content);
    let largest = contours
        .iter()
        .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
        .max_by(|a, b| contour_area(a).total_cmp(&contour_area(b)));

    let Some(largest) = largest else {
        return 0.0;
    };
    if largest.points.is_empty() {
        return 0.0;
    }

    let corners: [Point<i32>; 4] = imageproc::geometry::min_area_rect(&largest.points);
    let edge = |a: Point<i32>, b: Point<i32>| (f64::from(b.x - a.x), f64::from(b.y - a.y));
    let (dx, dy) = {
        let first = edge(corners[0], corners[1]);
        if first.0.abs() + first.1.abs() > 0.0 {
            first
        } else {
            edge(corners[1], corners[2])
        }
    };
    if dx.abs() + dy.abs() == 0.0 {
        return 0.0;
    }

    let max_angle = max_angle.abs();
    fold_angle(dy.atan2(dx).to_degrees()).clamp(-max_angle, max_angle)
}

/// Rotate image and mask counter-clockwise by `angle_deg` about the center,
/// undoing a skew measured by [`estimate_angle`].
///
/// Content is interpolated bilinearly; the mask uses nearest-neighbor
/// sampling and everything rotated in from outside is [`EXCLUDED`].
#[must_use = "returns the rotated image and mask"]
#[allow(clippy::cast_possible_truncation)]
pub fn rotate_tile(image: &RgbImage, mask: &GrayImage, angle_deg: f64) -> (RgbImage, GrayImage) {
    let theta = (-angle_deg.to_radians()) as f32;
    let rotated_image = rotate_about_center(image, theta, Interpolation::Bilinear, PAPER_WHITE);
    let rotated_mask = rotate_about_center(mask, theta, Interpolation::Nearest, Luma([EXCLUDED]));
    (rotated_image, rotated_mask)
}

/// Run background detection, crop and deskew on one decoded tile.
#[must_use = "returns the preprocessed tile"]
pub fn preprocess_tile(info: TileInfo, image: &RgbImage, settings: &StitchSettings) -> TileData {
    let background = compute_mask(image, settings);
    if background.fell_back {
        log::warn!(
            "tile {}: background mask degenerate, fell back to grayscale threshold",
            info.coord
        );
    }

    let cropped = crop_to_content(image, &background.mask, settings.crop_padding_px);
    let angle = estimate_angle(&cropped.mask, settings.max_angle);

    let cropped = if angle.abs() > DESKEW_TOLERANCE_DEG {
        log::debug!("tile {}: deskewing by {angle:.2} degrees", info.coord);
        let (rotated, rotated_mask) = rotate_tile(&cropped.image, &cropped.mask, angle);
        let recropped = crop_to_content(&rotated, &rotated_mask, settings.crop_padding_px);
        Cropped {
            bbox: CropBox {
                x: cropped.bbox.x + recropped.bbox.x,
                y: cropped.bbox.y + recropped.bbox.y,
                ..recropped.bbox
            },
            ..recropped
        }
    } else {
        cropped
    };

    TileData {
        info,
        image: cropped.image,
        mask: cropped.mask,
        angle_deg: angle,
        bbox: cropped.bbox,
        mask_fell_back: background.fell_back,
    }
}
