//! Gap repair after composition.
//!
//! 1. **Universal repair**: any gap is inpainted (Telea, radius 1) and its
//!    pixels are marked filled. Always runs when gaps exist.
//! 2. **Seam fill** (opt-in): gap pixels within `seam_fill_max_px` of real
//!    content, minus protected line work, are inpainted again with the
//!    configured method, but only when that area is below 0.5% of the
//!    canvas. Larger defects are real missing data and are left alone.
//! 3. **Final check**: residual gaps are reported, never fatal.

use image::{GrayImage, Luma, RgbImage};
use imageproc::distance_transform::Norm;
use serde::{Deserialize, Serialize};

use crate::compose::{FILLED, UNFILLED, count_nonzero};
use crate::inpaint::{inpaint_navier_stokes, inpaint_telea};
use crate::protect::protect_lines_mask;
use crate::settings::{InpaintMethod, StitchSettings};
use crate::types::{EXCLUDED, INCLUDED};

/// Seam fill only runs when its area is strictly below this share of the canvas.
pub const SEAM_FILL_MAX_AREA_FRACTION: f64 = 0.005;

/// Radius used by the universal repair and by edge extension.
pub const UNIVERSAL_RADIUS: u32 = 1;

/// What the seam fill step did.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SeamFillOutcome {
    /// Seam fill is turned off in the settings.
    Disabled,
    /// Nothing was left to fill after limiting and protection.
    Empty,
    /// The candidate area was too large to fill safely.
    SkippedTooLarge {
        /// Candidate pixels.
        area: u64,
        /// Candidate pixels as a share of the canvas.
        fraction: f64,
    },
    /// Pixels were inpainted.
    Filled {
        /// Pixels in the fill mask.
        pixels: u64,
    },
}

/// Result of [`seam_fill`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeamFillResult {
    /// Repaired image.
    pub filled: RgbImage,
    /// Pixels in the fill mask.
    pub filled_px: u64,
}

/// Whether a fill of `area` pixels is small enough for a canvas of
/// `canvas_area` pixels.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn seam_fill_allowed(area: u64, canvas_area: u64) -> bool {
    canvas_area > 0 && (area as f64 / canvas_area as f64) < SEAM_FILL_MAX_AREA_FRACTION
}

/// Restrict a gap mask to pixels whose Euclidean distance to the nearest
/// non-gap pixel is at most `max_px`. `max_px == 0` disables the limit.
#[must_use = "returns the limited mask"]
pub fn limit_seam_mask(gap_mask: &GrayImage, max_px: u32) -> GrayImage {
    if max_px == 0 {
        return gap_mask.clone();
    }
    let mut content = gap_mask.clone();
    image::imageops::invert(&mut content);
    let distance = imageproc::distance_transform::euclidean_squared_distance_transform(&content);
    let limit = f64::from(max_px) * f64::from(max_px);

    GrayImage::from_fn(gap_mask.width(), gap_mask.height(), |x, y| {
        if gap_mask.get_pixel(x, y).0[0] != 0 && distance.get_pixel(x, y).0[0] <= limit {
            Luma([EXCLUDED])
        } else {
            Luma([INCLUDED])
        }
    })
}

/// Dilate the mask by one pixel, then fast-march with radius 1.
#[must_use = "returns the inpainted image"]
pub fn edge_extend(image: &RgbImage, mask: &GrayImage) -> RgbImage {
    let expanded = imageproc::morphology::dilate(mask, Norm::LInf, 1);
    inpaint_telea(image, &expanded, UNIVERSAL_RADIUS)
}

/// Inpaint the nonzero pixels of `mask` with the chosen method.
#[must_use = "returns the repaired image"]
pub fn seam_fill(image: &RgbImage, mask: &GrayImage, method: InpaintMethod, radius: u32) -> SeamFillResult {
    let filled = match method {
        InpaintMethod::Telea => inpaint_telea(image, mask, radius),
        InpaintMethod::NavierStokes => inpaint_navier_stokes(image, mask, radius),
        InpaintMethod::EdgeExtend => edge_extend(image, mask),
    };
    SeamFillResult {
        filled,
        filled_px: count_nonzero(mask),
    }
}

/// Inpaint every gap and mark it filled. Returns the number of repaired pixels.
pub fn repair_universal(canvas: &mut RgbImage, occupancy: &mut GrayImage, gap_mask: &GrayImage) -> u64 {
    let gap_px = count_nonzero(gap_mask);
    if gap_px == 0 {
        return 0;
    }
    log::info!("Gap detected ({gap_px}px), applying edge fill");
    *canvas = inpaint_telea(canvas, gap_mask, UNIVERSAL_RADIUS);
    for (o, g) in occupancy.pixels_mut().zip(gap_mask.pixels()) {
        if g.0[0] != 0 {
            *o = Luma([FILLED]);
        }
    }
    gap_px
}

/// Bounded seam fill over the original gap mask.
///
/// Runs on the canvas produced by [`repair_universal`]. Line work detected
/// on that canvas is protected when `protect_lines` is set.
pub fn apply_seam_fill(canvas: &mut RgbImage, gap_mask: &GrayImage, settings: &StitchSettings) -> SeamFillOutcome {
    if !settings.seam_fill_enabled {
        return SeamFillOutcome::Disabled;
    }

    let mut fill_mask = limit_seam_mask(gap_mask, settings.seam_fill_max_px);
    if settings.protect_lines {
        let protect = protect_lines_mask(canvas);
        for (m, p) in fill_mask.pixels_mut().zip(protect.pixels()) {
            if p.0[0] != 0 {
                *m = Luma([INCLUDED]);
            }
        }
    }

    let area = count_nonzero(&fill_mask);
    if area == 0 {
        return SeamFillOutcome::Empty;
    }
    let canvas_area = u64::from(canvas.width()) * u64::from(canvas.height());
    if !seam_fill_allowed(area, canvas_area) {
        #[allow(clippy::cast_precision_loss)]
        let fraction = area as f64 / canvas_area as f64;
        log::warn!(
            "Seam fill skipped: {area}px is {:.2}% of the canvas (limit {:.1}%)",
            fraction * 100.0,
            SEAM_FILL_MAX_AREA_FRACTION * 100.0
        );
        return SeamFillOutcome::SkippedTooLarge { area, fraction };
    }

    let result = seam_fill(canvas, &fill_mask, settings.inpaint_method, settings.inpaint_radius);
    *canvas = result.filled;
    SeamFillOutcome::Filled {
        pixels: result.filled_px,
    }
}

/// Count residual gaps in an occupancy buffer and warn about them.
#[must_use]
pub fn final_gap_check(occupancy: &GrayImage) -> u64 {
    let residual = occupancy.pixels().filter(|p| p.0[0] == UNFILLED).count() as u64;
    if residual > 0 {
        log::warn!("Residual gaps detected after fill: {residual}px");
    }
    residual
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use image::Rgb;

    use super::*;
    use crate::compose::gap_mask;

    fn gaps_in_columns(w: u32, h: u32, x0: u32, x1: u32) -> GrayImage {
        GrayImage::from_fn(w, h, |x, _| if (x0..x1).contains(&x) { Luma([EXCLUDED]) } else { Luma([INCLUDED]) })
    }

    #[test]
    fn area_rule_is_strict() {
        assert!(seam_fill_allowed(49, 10_000));
        assert!(!seam_fill_allowed(50, 10_000));
        assert!(!seam_fill_allowed(5_000, 10_000));
        assert!(!seam_fill_allowed(0, 0));
    }

    #[test]
    fn limit_keeps_only_near_pixels() {
        let gaps = gaps_in_columns(40, 5, 10, 30);
        let limited = limit_seam_mask(&gaps, 3);
        // Within 3 px of either edge of the band.
        assert_eq!(limited.get_pixel(10, 2).0[0], EXCLUDED);
        assert_eq!(limited.get_pixel(12, 2).0[0], EXCLUDED);
        assert_eq!(limited.get_pixel(27, 2).0[0], EXCLUDED);
        assert_eq!(limited.get_pixel(20, 2).0[0], INCLUDED);
        // Never adds pixels outside the gap.
        assert_eq!(limited.get_pixel(5, 2).0[0], INCLUDED);
    }

    #[test]
    fn zero_limit_disables_limiting() {
        let gaps = gaps_in_columns(40, 5, 10, 30);
        assert_eq!(limit_seam_mask(&gaps, 0), gaps);
    }

    #[test]
    fn universal_repair_fills_and_marks_occupancy() {
        let mut canvas = RgbImage::from_pixel(20, 10, Rgb([90, 90, 90]));
        let mut occupancy = GrayImage::from_pixel(20, 10, Luma([FILLED]));
        for y in 0..10 {
            canvas.put_pixel(8, y, Rgb([255, 255, 255]));
            occupancy.put_pixel(8, y, Luma([UNFILLED]));
        }
        let gaps = gap_mask(&occupancy);
        assert_eq!(repair_universal(&mut canvas, &mut occupancy, &gaps), 10);
        assert_eq!(canvas.get_pixel(8, 4).0, [90, 90, 90]);
        assert_eq!(final_gap_check(&occupancy), 0);
    }

    #[test]
    fn seam_fill_never_runs_on_large_defects() {
        let settings = StitchSettings {
            seam_fill_enabled: true,
            protect_lines: false,
            seam_fill_max_px: 0,
            ..StitchSettings::default()
        };
        let mut canvas = RgbImage::from_pixel(40, 40, Rgb([255, 255, 255]));
        let before = canvas.clone();
        // 1 column of 40 px = 2.5% of the canvas.
        let gaps = gaps_in_columns(40, 40, 20, 21);
        let outcome = apply_seam_fill(&mut canvas, &gaps, &settings);
        assert!(matches!(outcome, SeamFillOutcome::SkippedTooLarge { area: 40, .. }), "{outcome:?}");
        assert_eq!(canvas, before);
    }

    #[test]
    fn seam_fill_runs_on_small_defects() {
        let settings = StitchSettings {
            seam_fill_enabled: true,
            protect_lines: false,
            ..StitchSettings::default()
        };
        let mut canvas = RgbImage::from_pixel(100, 100, Rgb([60, 70, 80]));
        let mut gaps = GrayImage::new(100, 100);
        for y in 50..54 {
            canvas.put_pixel(50, y, Rgb([255, 255, 255]));
            gaps.put_pixel(50, y, Luma([EXCLUDED]));
        }
        let outcome = apply_seam_fill(&mut canvas, &gaps, &settings);
        assert_eq!(outcome, SeamFillOutcome::Filled { pixels: 4 });
        assert_eq!(canvas.get_pixel(50, 51).0, [60, 70, 80]);
    }

    #[test]
    fn disabled_and_empty_outcomes() {
        let mut canvas = RgbImage::new(10, 10);
        let gaps = GrayImage::new(10, 10);
        assert_eq!(
            apply_seam_fill(&mut canvas, &gaps, &StitchSettings::default()),
            SeamFillOutcome::Disabled
        );
        let enabled = StitchSettings {
            seam_fill_enabled: true,
            ..StitchSettings::default()
        };
        assert_eq!(apply_seam_fill(&mut canvas, &gaps, &enabled), SeamFillOutcome::Empty);
    }

    #[test]
    fn every_method_fills_a_flat_hole() {
        let image = RgbImage::from_pixel(30, 30, Rgb([10, 200, 30]));
        let mut mask = GrayImage::new(30, 30);
        mask.put_pixel(15, 15, Luma([255]));
        for method in [InpaintMethod::Telea, InpaintMethod::NavierStokes, InpaintMethod::EdgeExtend] {
            let result = seam_fill(&image, &mask, method, 3);
            assert_eq!(result.filled_px, 1);
            assert_eq!(result.filled, image, "{method:?}");
        }
    }
}
