//! Stitching configuration.
//!
//! [`StitchSettings`] is an immutable snapshot consumed by every stage.
//! String-valued modes of the settings bag are closed enums so each
//! consuming component dispatches with an exhaustive `match`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// How the preprocessor separates map content from paper background.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackgroundMode {
    /// Lightness plus low chroma in Lab space, with a grayscale fallback
    /// when the result is degenerate.
    #[default]
    LabPaper,
    /// Plain grayscale threshold.
    Gray,
}

/// Exposure matching applied between neighboring tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorMatchMode {
    /// No photometric normalization.
    Off,
    /// Half-strength Lab luminance mean/deviation transfer.
    #[default]
    Mild,
    /// Full per-channel histogram matching.
    Strong,
}

/// Inpainting algorithm used by the seam filler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InpaintMethod {
    /// Fast marching (Telea).
    #[default]
    Telea,
    /// Navier-Stokes style isophote transport.
    #[serde(alias = "ns")]
    NavierStokes,
    /// Dilate the mask by one pixel, then fast-march with radius 1.
    EdgeExtend,
}

/// Compression requested from the raster encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Compression {
    /// Raw samples.
    None,
    /// Lempel-Ziv-Welch.
    Lzw,
    /// zlib/deflate.
    #[default]
    Deflate,
    /// Apple PackBits run-length encoding.
    Packbits,
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("none"),
            Self::Lzw => f.write_str("lzw"),
            Self::Deflate => f.write_str("deflate"),
            Self::Packbits => f.write_str("packbits"),
        }
    }
}

/// Named preset applied on top of the user's settings for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StitchMode {
    /// At most one refinement pass; strong color matching downgraded to mild.
    Fast,
    /// Settings used as given.
    #[default]
    Restoration,
}

/// What the encoder collaborator receives alongside the canvas.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodeRequest {
    /// Compression scheme.
    pub compression: Compression,
    /// Produce a tiled layout.
    pub tiled: bool,
    /// Produce a reduced-resolution pyramid.
    pub pyramid: bool,
}

/// Configuration for a stitching run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StitchSettings {
    /// Lightness (0-255 scale) at or above which paper counts as background.
    pub bg_threshold: u8,
    /// Background detection policy.
    pub bg_mode: BackgroundMode,
    /// Padding added around the content bounding box when cropping.
    pub crop_padding_px: u32,
    /// Largest deskew correction in degrees.
    pub max_angle: f64,
    /// Largest accepted seam offset in pixels, also caps the blend strip.
    pub overlap_max: u32,
    /// Width of the edge band sampled by the seam matcher.
    pub seam_band_px: u32,
    /// Number of grid refinement passes.
    pub refine_iterations: u32,
    /// Largest scale correction in percent.
    pub max_scale_percent: f64,
    /// Feather width in pixels.
    pub feather_px: u32,
    /// Encoder compression.
    pub compression: Compression,
    /// Photometric normalization mode.
    pub color_match: ColorMatchMode,
    /// Keep detected line work out of the seam fill mask.
    pub protect_lines: bool,
    /// Run the bounded seam fill after universal gap repair.
    pub seam_fill_enabled: bool,
    /// Seam fill only reaches this far into a gap from surrounding content.
    pub seam_fill_max_px: u32,
    /// Neighborhood radius for seam fill inpainting.
    pub inpaint_radius: u32,
    /// Seam fill inpainting algorithm.
    pub inpaint_method: InpaintMethod,
    /// Ask the encoder for a tiled, pyramided file.
    pub optimize_tiff: bool,
    /// Emit debug artifacts.
    pub debug_stitch: bool,
}

impl StitchSettings {
    /// Default [`bg_threshold`](Self::bg_threshold).
    pub const DEFAULT_BG_THRESHOLD: u8 = 245;
    /// Default [`crop_padding_px`](Self::crop_padding_px).
    pub const DEFAULT_CROP_PADDING_PX: u32 = 4;
    /// Default [`max_angle`](Self::max_angle).
    pub const DEFAULT_MAX_ANGLE: f64 = 7.0;
    /// Default [`overlap_max`](Self::overlap_max).
    pub const DEFAULT_OVERLAP_MAX: u32 = 15;
    /// Default [`seam_band_px`](Self::seam_band_px).
    pub const DEFAULT_SEAM_BAND_PX: u32 = 30;
    /// Default [`refine_iterations`](Self::refine_iterations).
    pub const DEFAULT_REFINE_ITERATIONS: u32 = 3;
    /// Default [`max_scale_percent`](Self::max_scale_percent).
    pub const DEFAULT_MAX_SCALE_PERCENT: f64 = 0.5;
    /// Default [`feather_px`](Self::feather_px).
    pub const DEFAULT_FEATHER_PX: u32 = 10;
    /// Default [`seam_fill_max_px`](Self::seam_fill_max_px).
    pub const DEFAULT_SEAM_FILL_MAX_PX: u32 = 15;
    /// Default [`inpaint_radius`](Self::inpaint_radius).
    pub const DEFAULT_INPAINT_RADIUS: u32 = 3;

    /// Copy of these settings with a run mode applied.
    #[must_use]
    pub fn with_mode(&self, mode: StitchMode) -> Self {
        let mut settings = self.clone();
        match mode {
            StitchMode::Fast => {
                settings.refine_iterations = settings.refine_iterations.min(1);
                if settings.color_match == ColorMatchMode::Strong {
                    settings.color_match = ColorMatchMode::Mild;
                }
            }
            StitchMode::Restoration => {}
        }
        settings
    }

    /// Width of the blend strip between neighbors.
    #[must_use]
    pub fn blend_overlap(&self) -> u32 {
        self.overlap_max.min(self.feather_px)
    }

    /// Parameters handed to the raster encoder with the finished canvas.
    #[must_use]
    pub const fn encode_request(&self) -> EncodeRequest {
        EncodeRequest {
            compression: self.compression,
            tiled: self.optimize_tiff,
            pyramid: self.optimize_tiff,
        }
    }
}

impl Default for StitchSettings {
    fn default() -> Self {
        Self {
            bg_threshold: Self::DEFAULT_BG_THRESHOLD,
            bg_mode: BackgroundMode::default(),
            crop_padding_px: Self::DEFAULT_CROP_PADDING_PX,
            max_angle: Self::DEFAULT_MAX_ANGLE,
            overlap_max: Self::DEFAULT_OVERLAP_MAX,
            seam_band_px: Self::DEFAULT_SEAM_BAND_PX,
            refine_iterations: Self::DEFAULT_REFINE_ITERATIONS,
            max_scale_percent: Self::DEFAULT_MAX_SCALE_PERCENT,
            feather_px: Self::DEFAULT_FEATHER_PX,
            compression: Compression::default(),
            color_match: ColorMatchMode::default(),
            protect_lines: true,
            seam_fill_enabled: false,
            seam_fill_max_px: Self::DEFAULT_SEAM_FILL_MAX_PX,
            inpaint_radius: Self::DEFAULT_INPAINT_RADIUS,
            inpaint_method: InpaintMethod::default(),
            optimize_tiff: true,
            debug_stitch: false,
        }
    }
}
