//! Paper background detection.
//!
//! Produces a binary mask per tile: [`INCLUDED`] (0) for map content and
//! [`EXCLUDED`] (255) for paper or scanner background. Two policies are
//! available (see [`BackgroundMode`]); the Lab policy falls back to the
//! grayscale one when it finds almost no content, which happens on blank
//! captures and badly exposed scans.
//!
//! The mask is closed morphologically afterwards so isolated specks of
//! content inside the background disappear.

use image::{GrayImage, Luma, RgbImage};
use imageproc::distance_transform::Norm;

use crate::color::{chroma, rgb_to_lab, to_gray};
use crate::settings::{BackgroundMode, StitchSettings};
use crate::types::{EXCLUDED, INCLUDED};

/// Chroma below which a light pixel still counts as paper.
pub const PAPER_CHROMA_LIMIT: f32 = 12.0;

/// Below this fraction of content pixels the Lab mask is considered degenerate.
pub const MIN_CONTENT_FRACTION: f64 = 0.001;

/// Radius of the structuring element used to close the mask.
const CLOSE_RADIUS: u8 = 2;

/// A background mask plus how it was obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackgroundMask {
    /// [`INCLUDED`] for content, [`EXCLUDED`] for background.
    pub mask: GrayImage,
    /// Whether the Lab policy was degenerate and the grayscale policy was used.
    pub fell_back: bool,
}

/// Background is light (`L >= threshold`) and nearly achromatic.
#[must_use = "returns the background mask"]
pub fn lab_paper_mask(image: &RgbImage, threshold: u8) -> GrayImage {
    let threshold = f32::from(threshold);
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        let lab = rgb_to_lab(*image.get_pixel(x, y));
        if lab[0] >= threshold && chroma(lab) < PAPER_CHROMA_LIMIT {
            Luma([EXCLUDED])
        } else {
            Luma([INCLUDED])
        }
    })
}

/// Background is any pixel whose gray level is at or above `threshold`.
#[must_use = "returns the background mask"]
pub fn gray_threshold_mask(image: &RgbImage, threshold: u8) -> GrayImage {
    let gray = to_gray(image);
    GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        if gray.get_pixel(x, y).0[0] >= threshold {
            Luma([EXCLUDED])
        } else {
            Luma([INCLUDED])
        }
    })
}

/// Morphological closing of the background region.
///
/// Closing is idempotent: closing an already closed mask returns it unchanged.
#[must_use = "returns the closed mask"]
pub fn close_mask(mask: &GrayImage) -> GrayImage {
    imageproc::morphology::close(mask, Norm::L1, CLOSE_RADIUS)
}

/// Fraction of pixels marked as content.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn content_fraction(mask: &GrayImage) -> f64 {
    let total = u64::from(mask.width()) * u64::from(mask.height());
    if total == 0 {
        return 0.0;
    }
    let content = mask.pixels().filter(|p| p.0[0] == INCLUDED).count();
    content as f64 / total as f64
}

/// Compute the closed background mask for a tile.
#[must_use = "returns the background mask"]
pub fn compute_mask(image: &RgbImage, settings: &StitchSettings) -> BackgroundMask {
    let (raw, fell_back) = match settings.bg_mode {
        BackgroundMode::LabPaper => {
            let lab = lab_paper_mask(image, settings.bg_threshold);
            if content_fraction(&lab) < MIN_CONTENT_FRACTION {
                (gray_threshold_mask(image, settings.bg_threshold), true)
            } else {
                (lab, false)
            }
        }
        BackgroundMode::Gray => (gray_threshold_mask(image, settings.bg_threshold), false),
    };
    BackgroundMask {
        mask: close_mask(&raw),
        fell_back,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use image::Rgb;

    use super::*;

    /// White paper with a dark square and a saturated light-red square.
    fn paper_with_marks() -> RgbImage {
        RgbImage::from_fn(40, 40, |x, y| {
            if (5..15).contains(&x) && (5..15).contains(&y) {
                Rgb([20, 20, 20])
            } else if (25..35).contains(&x) && (25..35).contains(&y) {
                Rgb([255, 200, 200])
            } else {
                Rgb([252, 252, 250])
            }
        })
    }

    #[test]
    fn lab_mask_keeps_dark_and_chromatic_content() {
        let mask = lab_paper_mask(&paper_with_marks(), 245);
        assert_eq!(mask.get_pixel(10, 10).0[0], INCLUDED);
        // Colored mark.
        assert_eq!(mask.get_pixel(30, 30).0[0], INCLUDED);
        assert_eq!(mask.get_pixel(20, 2).0[0], EXCLUDED);
    }

    #[test]
    fn gray_mask_ignores_chroma() {
        // Warm, light paper: gray level ~250.
        let img = RgbImage::from_fn(4, 4, |_, _| Rgb([255, 250, 240]));
        let gray = gray_threshold_mask(&img, 245);
        assert!(gray.pixels().all(|p| p.0[0] == EXCLUDED));
    }

    #[test]
    fn blank_tile_falls_back_and_is_all_background() {
        let img = RgbImage::from_fn(30, 20, |_, _| Rgb([255, 255, 255]));
        let result = compute_mask(&img, &StitchSettings::default());
        assert!(result.fell_back);
        assert!(result.mask.pixels().all(|p| p.0[0] == EXCLUDED));
    }

    /// White 100x100 paper with `dots` dark pixels along the top row.
    fn paper_with_dots(dots: u32) -> RgbImage {
        RgbImage::from_fn(100, 100, |x, y| {
            if y == 0 && x < dots {
                Rgb([10, 10, 10])
            } else {
                Rgb([255, 255, 255])
            }
        })
    }

    #[test]
    fn fallback_threshold_is_one_tenth_of_a_percent() {
        let settings = StitchSettings::default();
        // 9 / 10_000 content pixels is degenerate.
        assert!(compute_mask(&paper_with_dots(9), &settings).fell_back);
        // Exactly 0.1% and above is not.
        assert!(!compute_mask(&paper_with_dots(10), &settings).fell_back);
        assert!(!compute_mask(&paper_with_dots(11), &settings).fell_back);
    }

    #[test]
    fn normal_tile_does_not_fall_back() {
        let result = compute_mask(&paper_with_marks(), &StitchSettings::default());
        assert!(!result.fell_back);
        assert!(content_fraction(&result.mask) > 0.05);
    }

    #[test]
    fn gray_mode_never_reports_fallback() {
        let img = RgbImage::from_fn(10, 10, |_, _| Rgb([255, 255, 255]));
        let settings = StitchSettings {
            bg_mode: BackgroundMode::Gray,
            ..StitchSettings::default()
        };
        assert!(!compute_mask(&img, &settings).fell_back);
    }

    #[test]
    fn closing_removes_single_pixel_speck() {
        let mut mask = GrayImage::from_pixel(20, 20, Luma([EXCLUDED]));
        mask.put_pixel(10, 10, Luma([INCLUDED]));
        let closed = close_mask(&mask);
        assert_eq!(closed.get_pixel(10, 10).0[0], EXCLUDED);
    }

    #[test]
    fn closing_is_idempotent() {
        let mut mask = GrayImage::from_pixel(40, 40, Luma([EXCLUDED]));
        for y in 8..30 {
            for x in 6..26 {
                mask.put_pixel(x, y, Luma([INCLUDED]));
            }
        }
        // Specks and a notch.
        mask.put_pixel(2, 2, Luma([INCLUDED]));
        mask.put_pixel(35, 5, Luma([INCLUDED]));
        mask.put_pixel(15, 15, Luma([EXCLUDED]));
        for y in 12..14 {
            mask.put_pixel(6, y, Luma([EXCLUDED]));
        }
        let once = close_mask(&mask);
        let twice = close_mask(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn content_fraction_counts_included_pixels() {
        let mut mask = GrayImage::from_pixel(10, 10, Luma([EXCLUDED]));
        for x in 0..10 {
            mask.put_pixel(x, 0, Luma([INCLUDED]));
        }
        assert!((content_fraction(&mask) - 0.1).abs() < 1e-12);
        assert!(content_fraction(&GrayImage::new(0, 0)).abs() < f64::EPSILON);
    }
}
