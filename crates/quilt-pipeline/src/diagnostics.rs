//! Run diagnostics: timing, counts, and other metrics for each stage.
//!
//! These diagnostics are permanent instrumentation intended for parameter
//! tuning. [`stitch_with_diagnostics`] drives the same typestate stages as
//! [`stitch`](crate::stitch) and records, per stage, how long it took and
//! what it did.
//!
//! Duration measurements use [`std::time::Duration`]. Timestamps come from
//! an injected [`Clock`] so the core never reads the system time itself.
//!
//! Durations are serialized as fractional seconds (`f64`) for JSON
//! compatibility, since `std::time::Duration` does not implement serde
//! traits.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::pipeline::{CancelToken, Pipeline, ProgressSink, Stage, StitchOptions, StitchOutput, TileSource, enter};
use crate::seamfill::SeamFillOutcome;
use crate::settings::ColorMatchMode;
use crate::types::{StitchError, TileInfo};

/// Source of timestamps for stage timing.
pub trait Clock {
    /// Opaque timestamp.
    type Instant;

    /// The current time.
    fn now(&self) -> Self::Instant;

    /// Time elapsed since `since`.
    fn elapsed(&self, since: &Self::Instant) -> Duration;
}

/// Serde support for `std::time::Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a `Duration` as fractional seconds (`f64`).
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    /// Deserialize a `Duration` from fractional seconds (`f64`).
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// Diagnostics collected from a single stitch run.
///
/// The seam fill stage is only entered when enabled, so its field is
/// `None` otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StitchDiagnostics {
    /// Fetching pixels from the tile source.
    pub loading: StageDiagnostics,
    /// Background detection, crop and deskew.
    pub preprocessing: StageDiagnostics,
    /// Exposure matching.
    pub photometric: StageDiagnostics,
    /// Grid placement.
    pub layout_initial: StageDiagnostics,
    /// Refinement passes and manual overrides.
    pub layout_refine: StageDiagnostics,
    /// Seam feathering.
    pub edge_blend: StageDiagnostics,
    /// Canvas composition.
    pub compose: StageDiagnostics,
    /// Universal gap repair.
    pub gap_repair: StageDiagnostics,
    /// Bounded seam fill (only when enabled).
    pub seam_fill: Option<StageDiagnostics>,
    /// Residual gap check.
    pub final_check: StageDiagnostics,
    /// Total wall-clock duration of the run (seconds).
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
    /// Summary counts across all stages.
    pub summary: StitchSummary,
}

/// Diagnostics for a single stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDiagnostics {
    /// Wall-clock duration of this stage (seconds).
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// Stage-specific metrics.
    pub metrics: StageMetrics,
}

/// Stage-specific metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StageMetrics {
    /// Tile loading.
    Loading {
        /// Tiles loaded.
        tile_count: usize,
        /// Decoded pixels across all tiles.
        pixel_count: u64,
        /// Grid cells without a tile.
        missing_count: usize,
    },
    /// Preprocessing.
    Preprocessing {
        /// Tiles preprocessed.
        tile_count: usize,
        /// Tiles whose mask used the grayscale fallback.
        mask_fallbacks: usize,
    },
    /// Photometric normalization.
    Photometric {
        /// Color-match mode in effect.
        mode: ColorMatchMode,
        /// Tiles adjusted.
        normalized: usize,
    },
    /// Initial layout.
    LayoutInitial {
        /// Canvas width in pixels.
        canvas_width: u32,
        /// Canvas height in pixels.
        canvas_height: u32,
        /// Cell width in pixels.
        cell_width: u32,
        /// Cell height in pixels.
        cell_height: u32,
    },
    /// Refinement.
    LayoutRefine {
        /// Passes that ran.
        passes: u32,
        /// Manual transforms applied afterwards.
        overrides_applied: usize,
        /// Mean confidence over all placements.
        mean_confidence: f64,
    },
    /// Edge blending.
    EdgeBlend {
        /// Strip width in pixels.
        overlap: u32,
        /// Seams feathered.
        seams: usize,
    },
    /// Composition.
    Compose {
        /// Canvas pixel count.
        canvas_px: u64,
        /// Pixels no tile wrote.
        gap_px: u64,
    },
    /// Universal repair.
    GapRepair {
        /// Pixels inpainted.
        repaired_px: u64,
    },
    /// Seam fill.
    SeamFill {
        /// What the step did.
        outcome: SeamFillOutcome,
    },
    /// Final gap check.
    FinalCheck {
        /// Gap pixels left.
        residual_px: u64,
    },
}

/// High-level summary counts for the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StitchSummary {
    /// Tiles stitched.
    pub tile_count: usize,
    /// Missing grid cells as `"row,col"`.
    pub missing: Vec<String>,
    /// Canvas width in pixels.
    pub canvas_width: u32,
    /// Canvas height in pixels.
    pub canvas_height: u32,
    /// Gap pixels right after composition.
    pub gap_px_before: u64,
    /// Gap pixels after every repair.
    pub gap_px_after: u64,
}

impl StitchDiagnostics {
    /// Format diagnostics as a human-readable report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Stitch Diagnostics Report\n{}", "=".repeat(60)));
        lines.push(format!(
            "Tiles: {}  |  Canvas: {}x{}",
            self.summary.tile_count, self.summary.canvas_width, self.summary.canvas_height,
        ));
        if !self.summary.missing.is_empty() {
            lines.push(format!("Missing: {}", self.summary.missing.join(" ")));
        }
        lines.push(format!(
            "Total duration: {:.3}ms",
            duration_ms(self.total_duration),
        ));
        lines.push(String::new());

        lines.push(format!(
            "{:<24} {:>10} {:>10}  {}",
            "Stage", "Duration", "% Total", "Details"
        ));
        lines.push("-".repeat(80));

        let total_ms = duration_ms(self.total_duration);

        for (name, diag) in self.stages() {
            let ms = duration_ms(diag.duration);
            let pct = if total_ms > 0.0 {
                ms / total_ms * 100.0
            } else {
                0.0
            };
            let details = format_metrics(&diag.metrics);
            lines.push(format!("{name:<24} {ms:>8.3}ms {pct:>9.1}%  {details}"));
        }

        lines.push(String::new());
        lines.push(format!(
            "Gap pixels: {} before repair  |  {} after",
            self.summary.gap_px_before, self.summary.gap_px_after,
        ));

        lines.join("\n")
    }

    /// Every stage that ran, in run order, with its display name.
    #[must_use]
    pub fn stages(&self) -> Vec<(&'static str, &StageDiagnostics)> {
        let mut stages = vec![
            ("Loading", &self.loading),
            ("Preprocessing", &self.preprocessing),
            ("Photometric", &self.photometric),
            ("Layout", &self.layout_initial),
            ("Refine", &self.layout_refine),
            ("Edge Blend", &self.edge_blend),
            ("Compose", &self.compose),
            ("Gap Repair", &self.gap_repair),
        ];
        if let Some(ref fill) = self.seam_fill {
            stages.push(("Seam Fill", fill));
        }
        stages.push(("Final Check", &self.final_check));
        stages
    }
}

/// Convert a `Duration` to milliseconds as `f64`.
fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Format stage metrics into a compact detail string.
fn format_metrics(metrics: &StageMetrics) -> String {
    match metrics {
        StageMetrics::Loading {
            tile_count,
            pixel_count,
            missing_count,
        } => format!("{tile_count} tiles, {pixel_count} px, {missing_count} missing"),
        StageMetrics::Preprocessing {
            tile_count,
            mask_fallbacks,
        } => format!("{tile_count} tiles, {mask_fallbacks} mask fallbacks"),
        StageMetrics::Photometric { mode, normalized } => {
            format!("{mode:?}: {normalized} tiles adjusted")
        }
        StageMetrics::LayoutInitial {
            canvas_width,
            canvas_height,
            cell_width,
            cell_height,
        } => format!("canvas {canvas_width}x{canvas_height}, cell {cell_width}x{cell_height}"),
        StageMetrics::LayoutRefine {
            passes,
            overrides_applied,
            mean_confidence,
        } => format!("{passes} passes, {overrides_applied} overrides, confidence={mean_confidence:.3}"),
        StageMetrics::EdgeBlend { overlap, seams } => format!("{seams} seams over {overlap}px"),
        StageMetrics::Compose { canvas_px, gap_px } => {
            #[allow(clippy::cast_precision_loss)]
            let share = if *canvas_px > 0 {
                *gap_px as f64 / *canvas_px as f64 * 100.0
            } else {
                0.0
            };
            format!("{gap_px} gap px ({share:.2}%)")
        }
        StageMetrics::GapRepair { repaired_px } => format!("{repaired_px} px repaired"),
        StageMetrics::SeamFill { outcome } => match outcome {
            SeamFillOutcome::Disabled => "disabled".to_owned(),
            SeamFillOutcome::Empty => "nothing to fill".to_owned(),
            SeamFillOutcome::SkippedTooLarge { area, fraction } => {
                format!("skipped: {area} px ({:.2}%)", fraction * 100.0)
            }
            SeamFillOutcome::Filled { pixels } => format!("{pixels} px filled"),
        },
        StageMetrics::FinalCheck { residual_px } => format!("{residual_px} px residual"),
    }
}

/// Time one stage.
fn timed<C: Clock, T>(clock: &C, run: impl FnOnce() -> T) -> (T, Duration) {
    let start = clock.now();
    let value = run();
    (value, clock.elapsed(&start))
}

/// Run every stage like [`stitch`](crate::stitch), collecting diagnostics.
///
/// Returns `Ok(None)` if `cancel` was triggered.
///
/// # Errors
///
/// Same as [`stitch`](crate::stitch).
#[allow(clippy::too_many_lines)]
pub fn stitch_with_diagnostics<S: TileSource + ?Sized, C: Clock>(
    tiles: Vec<TileInfo>,
    source: &S,
    options: &StitchOptions,
    clock: &C,
    progress: &mut dyn ProgressSink,
    cancel: &CancelToken,
) -> Result<Option<(StitchOutput, StitchDiagnostics)>, StitchError> {
    let settings = options.effective_settings();
    let run_start = clock.now();

    enter(progress, Stage::Loading);
    let (loaded, duration) = timed(clock, || {
        Pipeline::new(tiles, options.clone()).load(source, &mut *progress, cancel)
    });
    let Some(loaded) = loaded? else {
        return Ok(None);
    };
    let loading = StageDiagnostics {
        duration,
        metrics: StageMetrics::Loading {
            tile_count: loaded.tile_count(),
            pixel_count: loaded.pixel_count(),
            missing_count: loaded.missing().len(),
        },
    };

    enter(progress, Stage::Preprocessing);
    let (preprocessed, duration) = timed(clock, || loaded.preprocess(&mut *progress, cancel));
    let Some(preprocessed) = preprocessed else {
        return Ok(None);
    };
    let preprocessing = StageDiagnostics {
        duration,
        metrics: StageMetrics::Preprocessing {
            tile_count: preprocessed.tiles().len(),
            mask_fallbacks: preprocessed.mask_fallbacks(),
        },
    };

    enter(progress, Stage::PhotometricNormalize);
    let (normalized, duration) = timed(clock, || preprocessed.normalize(cancel));
    let Some(normalized) = normalized else {
        return Ok(None);
    };
    let photometric = StageDiagnostics {
        duration,
        metrics: StageMetrics::Photometric {
            mode: settings.color_match,
            normalized: normalized.normalized(),
        },
    };

    enter(progress, Stage::LayoutInitial);
    let (laid_out, duration) = timed(clock, || normalized.lay_out());
    let layout = laid_out.layout();
    let (cell_width, cell_height) = layout
        .placements
        .values()
        .next()
        .map_or((0, 0), |p| (p.tile_w, p.tile_h));
    let layout_initial = StageDiagnostics {
        duration,
        metrics: StageMetrics::LayoutInitial {
            canvas_width: layout.canvas_size.width,
            canvas_height: layout.canvas_size.height,
            cell_width,
            cell_height,
        },
    };

    enter(progress, Stage::LayoutRefine);
    let (refined, duration) = timed(clock, || laid_out.refine(cancel));
    let Some(refined) = refined else {
        return Ok(None);
    };
    let placements = &refined.layout().placements;
    #[allow(clippy::cast_precision_loss)]
    let mean_confidence = if placements.is_empty() {
        0.0
    } else {
        placements.values().map(|p| p.transform.confidence).sum::<f64>() / placements.len() as f64
    };
    let layout_refine = StageDiagnostics {
        duration,
        metrics: StageMetrics::LayoutRefine {
            passes: refined.passes(),
            overrides_applied: refined.overrides_applied(),
            mean_confidence,
        },
    };

    enter(progress, Stage::EdgeBlend);
    let (blended, duration) = timed(clock, || refined.blend());
    let edge_blend = StageDiagnostics {
        duration,
        metrics: StageMetrics::EdgeBlend {
            overlap: settings.blend_overlap(),
            seams: blended.seams(),
        },
    };

    enter(progress, Stage::Compose);
    let (composed, duration) = timed(clock, || blended.compose());
    let (width, height) = composed.canvas().dimensions();
    let compose = StageDiagnostics {
        duration,
        metrics: StageMetrics::Compose {
            canvas_px: u64::from(width) * u64::from(height),
            gap_px: composed.gap_px(),
        },
    };

    enter(progress, Stage::GapRepairUniversal);
    let (repaired, duration) = timed(clock, || composed.repair());
    let gap_repair = StageDiagnostics {
        duration,
        metrics: StageMetrics::GapRepair {
            repaired_px: repaired.repaired_px(),
        },
    };

    let fill_enabled = repaired.seam_fill_enabled();
    if fill_enabled {
        enter(progress, Stage::GapRepairSeamFill);
    }
    let (filled, duration) = timed(clock, || repaired.seam_fill());
    let seam_fill = fill_enabled.then(|| StageDiagnostics {
        duration,
        metrics: StageMetrics::SeamFill {
            outcome: filled.outcome(),
        },
    });

    enter(progress, Stage::FinalCheck);
    let (output, duration) = timed(clock, || filled.finish());
    let final_check = StageDiagnostics {
        duration,
        metrics: StageMetrics::FinalCheck {
            residual_px: output.report.gap_px_after,
        },
    };
    let total_duration = clock.elapsed(&run_start);
    enter(progress, Stage::Done);

    let report = &output.report;
    let diagnostics = StitchDiagnostics {
        loading,
        preprocessing,
        photometric,
        layout_initial,
        layout_refine,
        edge_blend,
        compose,
        gap_repair,
        seam_fill,
        final_check,
        total_duration,
        summary: StitchSummary {
            tile_count: report.tile_count,
            missing: report.missing.iter().map(ToString::to_string).collect(),
            canvas_width: output.canvas.width(),
            canvas_height: output.canvas.height(),
            gap_px_before: report.gap_px_before,
            gap_px_after: report.gap_px_after,
        },
    };
    Ok(Some((output, diagnostics)))
}
