//! Typestate stitch run with inspectable stages.
//!
//! Each stage is a distinct type that owns the tile collection and every
//! intermediate produced so far. Advancing consumes the current stage and
//! returns the next one, so the compiler enforces the stage order and no
//! stage can observe a collection another stage is still mutating.
//!
//! ```text
//! Pending ─load()─▸ Loaded ─preprocess()─▸ Preprocessed ─normalize()─▸ Normalized
//!   ─lay_out()─▸ LaidOut ─refine()─▸ Refined ─blend()─▸ Blended ─compose()─▸ Composed
//!   ─repair()─▸ Repaired ─seam_fill()─▸ SeamFilled ─finish()─▸ StitchOutput
//! ```
//!
//! Stages that poll the [`CancelToken`] return `Option`; `None` means the
//! run was cancelled. Cancellation is only observed between tiles (and
//! between refinement passes), so a tile that is being worked on always
//! completes first.
//!
//! [`stitch`] drives every stage in order and reports [`Stage`] transitions
//! to a [`ProgressSink`].
//!
//! # Memory
//!
//! Stages keep only what later stages or the final [`StitchOutput`] need:
//! decoded source pixels are dropped once preprocessing is done, and the
//! composition buffers are repaired in place.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use image::{GrayImage, RgbImage};

use crate::blend::blend_neighbors;
use crate::compose::{compose_canvas, count_nonzero, gap_mask};
use crate::layout::{initial_layout, missing_cells};
use crate::photometric::normalize_tile;
use crate::preprocess::preprocess_tile;
use crate::refine::{RefineParams, apply_manual_overrides, refine_pass};
use crate::seamfill::{SeamFillOutcome, apply_seam_fill, final_gap_check, repair_universal};
use crate::settings::{EncodeRequest, StitchMode, StitchSettings};
use crate::types::{GridCoord, LayoutResult, StitchError, TileInfo, TileMap, TransformMap};

// ───────────────────── Run surface: progress, cancel, source ─────────────

/// Named points of a stitch run, in the order they are entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    /// Pixels are being fetched from the tile source.
    Loading,
    /// Background detection, crop and deskew.
    Preprocessing,
    /// Exposure matching against neighbors.
    PhotometricNormalize,
    /// Grid placement.
    LayoutInitial,
    /// Seam-matching refinement passes.
    LayoutRefine,
    /// Feathering of shared overlap strips.
    EdgeBlend,
    /// Drawing tiles onto the canvas.
    Compose,
    /// Inpainting of every gap.
    GapRepairUniversal,
    /// Bounded seam fill; only entered when enabled.
    GapRepairSeamFill,
    /// Residual gap count.
    FinalCheck,
    /// The output is ready.
    Done,
}

impl Stage {
    /// Human-readable stage name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Loading => "loading",
            Self::Preprocessing => "preprocessing",
            Self::PhotometricNormalize => "photometric normalize",
            Self::LayoutInitial => "initial layout",
            Self::LayoutRefine => "layout refine",
            Self::EdgeBlend => "edge blend",
            Self::Compose => "compose",
            Self::GapRepairUniversal => "gap repair",
            Self::GapRepairSeamFill => "seam fill",
            Self::FinalCheck => "final check",
            Self::Done => "done",
        }
    }

    /// Progress percentage reached when this stage is entered.
    ///
    /// Loading and preprocessing additionally report per-tile progress
    /// between their own checkpoint and the next one.
    #[must_use]
    pub const fn checkpoint(self) -> u8 {
        match self {
            Self::Loading => 0,
            Self::Preprocessing => 10,
            Self::PhotometricNormalize => 20,
            Self::LayoutInitial => 30,
            Self::LayoutRefine => 40,
            Self::EdgeBlend => 60,
            Self::Compose => 70,
            Self::GapRepairUniversal => 80,
            Self::GapRepairSeamFill => 85,
            Self::FinalCheck => 90,
            Self::Done => 100,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One event reported to a [`ProgressSink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressEvent {
    /// A stage was entered.
    Stage(Stage),
    /// Overall completion in percent.
    Progress(u8),
}

/// Receiver for run progress, injected by the caller.
pub trait ProgressSink {
    /// A stage is about to start.
    fn stage(&mut self, stage: Stage);

    /// Overall completion changed. Values never decrease within a run.
    fn progress(&mut self, percent: u8);
}

/// Records every event in order.
impl ProgressSink for Vec<ProgressEvent> {
    fn stage(&mut self, stage: Stage) {
        self.push(ProgressEvent::Stage(stage));
    }

    fn progress(&mut self, percent: u8) {
        self.push(ProgressEvent::Progress(percent));
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn stage(&mut self, _stage: Stage) {}

    fn progress(&mut self, _percent: u8) {}
}

/// Cooperative cancellation flag shared between a run and its controller.
///
/// Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// A token that has not been cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Takes effect at the next polling point.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Provides decoded pixels for a tile.
///
/// The pipeline never reads files itself; the caller decides where pixels
/// come from.
pub trait TileSource {
    /// Decode the tile described by `info`.
    ///
    /// # Errors
    ///
    /// Any error aborts the run.
    fn load(&self, info: &TileInfo) -> Result<RgbImage, StitchError>;
}

/// In-memory source keyed by grid coordinate.
impl TileSource for BTreeMap<GridCoord, RgbImage> {
    fn load(&self, info: &TileInfo) -> Result<RgbImage, StitchError> {
        self.get(&info.coord).cloned().ok_or_else(|| StitchError::TileLoad {
            coord: info.coord,
            message: "no pixels for this cell".to_owned(),
        })
    }
}

/// Per-run inputs besides the tiles themselves.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StitchOptions {
    /// Settings snapshot.
    pub settings: StitchSettings,
    /// Preset applied on top of `settings`, if any.
    pub mode: Option<StitchMode>,
    /// Manual transforms that replace refined ones.
    pub overrides: TransformMap,
}

impl StitchOptions {
    /// The settings the run actually uses, with the mode applied.
    #[must_use]
    pub fn effective_settings(&self) -> StitchSettings {
        self.mode
            .map_or_else(|| self.settings.clone(), |mode| self.settings.with_mode(mode))
    }
}

/// Summary of what a run found and did.
#[derive(Debug, Clone, PartialEq)]
pub struct StitchReport {
    /// Number of tiles stitched.
    pub tile_count: usize,
    /// Grid cells without a tile, row-major.
    pub missing: Vec<GridCoord>,
    /// Tiles whose background mask used the grayscale fallback.
    pub mask_fallbacks: usize,
    /// Tiles adjusted by photometric normalization.
    pub normalized: usize,
    /// Refinement passes that ran.
    pub refine_passes: u32,
    /// Manual transforms applied after refinement.
    pub overrides_applied: usize,
    /// Seams feathered by the edge blender.
    pub seams_blended: usize,
    /// Gap pixels right after composition.
    pub gap_px_before: u64,
    /// Gap pixels left after every repair.
    pub gap_px_after: u64,
    /// What the seam fill step did.
    pub seam_fill: SeamFillOutcome,
}

/// Finished canvas plus everything needed to inspect or persist the run.
#[derive(Debug, Clone)]
pub struct StitchOutput {
    /// Repaired canvas, ready for the encoder.
    pub canvas: RgbImage,
    /// Occupancy after repair.
    pub occupancy: GrayImage,
    /// Gap mask right after composition.
    pub gap_mask_before: GrayImage,
    /// Gap mask after every repair.
    pub gap_mask_after: GrayImage,
    /// Final placements, including manual overrides.
    pub layout: LayoutResult,
    /// Preprocessed and blended tiles.
    pub tiles: TileMap,
    /// Counts and outcomes.
    pub report: StitchReport,
    /// What the encoder should produce.
    pub encode: EncodeRequest,
}

fn format_missing(missing: &[GridCoord]) -> String {
    let cells: Vec<String> = missing
        .iter()
        .map(|c| format!("({},{})", c.row, c.col))
        .collect();
    format!("[{}]", cells.join(", "))
}

/// Per-tile progress between two checkpoints.
#[allow(clippy::cast_possible_truncation)]
fn tile_progress(from: Stage, to: Stage, done: usize, total: usize) -> u8 {
    let span = usize::from(to.checkpoint() - from.checkpoint());
    let step = if total == 0 { span } else { done * span / total };
    from.checkpoint() + step.min(span) as u8
}

/// State carried unchanged through every stage.
#[derive(Debug, Clone)]
struct RunContext {
    settings: StitchSettings,
    overrides: TransformMap,
    missing: Vec<GridCoord>,
}

// ───────────────────────── Stage 0: Pending ──────────────────────────

/// A run that has not touched any pixels yet.
///
/// Call [`load`](Self::load) to advance.
#[must_use = "pipeline stages are consumed by advancing; call .load() to continue"]
pub struct Pending {
    infos: Vec<TileInfo>,
    options: StitchOptions,
}

impl Pending {
    /// The tiles this run will stitch, row-major.
    #[must_use]
    pub fn tiles(&self) -> &[TileInfo] {
        &self.infos
    }

    /// Fetch pixels for every tile.
    ///
    /// Reports per-tile progress and polls `cancel` before each tile.
    ///
    /// # Errors
    ///
    /// Returns [`StitchError::NoTiles`] when there is nothing to stitch, or
    /// the first error from `source`.
    pub fn load<S: TileSource + ?Sized>(
        self,
        source: &S,
        progress: &mut dyn ProgressSink,
        cancel: &CancelToken,
    ) -> Result<Option<Loaded>, StitchError> {
        if self.infos.is_empty() {
            return Err(StitchError::NoTiles);
        }
        if let Some(info) = self.infos.iter().find(|i| i.coord.row == 0 || i.coord.col == 0) {
            return Err(StitchError::InvalidTileName(format!(
                "{}: grid coordinates start at 1",
                info.path.display()
            )));
        }

        let missing = missing_cells(self.infos.iter().map(|info| &info.coord));
        if !missing.is_empty() {
            log::warn!("Missing tiles: {}", format_missing(&missing));
        }

        let total = self.infos.len();
        let mut raw = Vec::with_capacity(total);
        for (idx, info) in self.infos.into_iter().enumerate() {
            if cancel.is_cancelled() {
                log::info!("cancelled while loading tiles");
                return Ok(None);
            }
            let image = source.load(&info)?;
            log::debug!("loaded tile {} ({}x{})", info.coord, image.width(), image.height());
            raw.push((info, image));
            progress.progress(tile_progress(Stage::Loading, Stage::Preprocessing, idx + 1, total));
        }

        Ok(Some(Loaded {
            ctx: RunContext {
                settings: self.options.effective_settings(),
                overrides: self.options.overrides,
                missing,
            },
            raw,
        }))
    }
}

// ───────────────────────── Stage 1: Loaded ───────────────────────────

/// Decoded source pixels for every tile.
///
/// Call [`preprocess`](Self::preprocess) to advance.
#[must_use = "pipeline stages are consumed by advancing; call .preprocess() to continue"]
pub struct Loaded {
    ctx: RunContext,
    raw: Vec<(TileInfo, RgbImage)>,
}

impl Loaded {
    /// Number of loaded tiles.
    #[must_use]
    pub fn tile_count(&self) -> usize {
        self.raw.len()
    }

    /// Total decoded pixels across all tiles.
    #[must_use]
    pub fn pixel_count(&self) -> u64 {
        self.raw
            .iter()
            .map(|(_, image)| u64::from(image.width()) * u64::from(image.height()))
            .sum()
    }

    /// Grid cells without a tile.
    #[must_use]
    pub fn missing(&self) -> &[GridCoord] {
        &self.ctx.missing
    }

    /// Isolate content, deskew and crop every tile.
    ///
    /// Polls `cancel` before each tile.
    pub fn preprocess(self, progress: &mut dyn ProgressSink, cancel: &CancelToken) -> Option<Preprocessed> {
        let total = self.raw.len();
        let mut tiles = TileMap::new();
        for (idx, (info, image)) in self.raw.into_iter().enumerate() {
            if cancel.is_cancelled() {
                log::info!("cancelled during preprocessing");
                return None;
            }
            let coord = info.coord;
            tiles.insert(coord, preprocess_tile(info, &image, &self.ctx.settings));
            progress.progress(tile_progress(
                Stage::Preprocessing,
                Stage::PhotometricNormalize,
                idx + 1,
                total,
            ));
        }
        Some(Preprocessed { ctx: self.ctx, tiles })
    }
}

// ───────────────────────── Stage 2: Preprocessed ─────────────────────

/// Tiles with background removed, deskewed and cropped.
///
/// Call [`normalize`](Self::normalize) to advance.
#[must_use = "pipeline stages are consumed by advancing; call .normalize() to continue"]
pub struct Preprocessed {
    ctx: RunContext,
    tiles: TileMap,
}

impl Preprocessed {
    /// The preprocessed tiles.
    #[must_use]
    pub const fn tiles(&self) -> &TileMap {
        &self.tiles
    }

    /// Tiles whose background mask used the grayscale fallback.
    #[must_use]
    pub fn mask_fallbacks(&self) -> usize {
        self.tiles.values().filter(|t| t.mask_fell_back).count()
    }

    /// Match each tile's exposure to its left (else top) neighbor, row-major.
    ///
    /// Polls `cancel` before each tile.
    pub fn normalize(mut self, cancel: &CancelToken) -> Option<Normalized> {
        let mode = self.ctx.settings.color_match;
        let coords: Vec<GridCoord> = self.tiles.keys().copied().collect();
        let mut normalized = 0;
        for coord in coords {
            if cancel.is_cancelled() {
                log::info!("cancelled during photometric normalization");
                return None;
            }
            normalized += usize::from(normalize_tile(&mut self.tiles, coord, mode));
        }
        log::debug!("normalized {normalized} tiles ({mode:?})");
        Some(Normalized {
            ctx: self.ctx,
            tiles: self.tiles,
            normalized,
        })
    }
}

// ───────────────────────── Stage 3: Normalized ───────────────────────

/// Tiles after photometric normalization.
///
/// Call [`lay_out`](Self::lay_out) to advance.
#[must_use = "pipeline stages are consumed by advancing; call .lay_out() to continue"]
pub struct Normalized {
    ctx: RunContext,
    tiles: TileMap,
    normalized: usize,
}

impl Normalized {
    /// How many tiles were adjusted.
    #[must_use]
    pub const fn normalized(&self) -> usize {
        self.normalized
    }

    /// Place every tile in its grid cell.
    pub fn lay_out(self) -> LaidOut {
        let layout = initial_layout(&self.tiles);
        log::info!(
            "initial layout: {} tiles on a {}x{} canvas",
            layout.placements.len(),
            layout.canvas_size.width,
            layout.canvas_size.height
        );
        LaidOut {
            ctx: self.ctx,
            tiles: self.tiles,
            normalized: self.normalized,
            layout,
        }
    }
}

// ───────────────────────── Stage 4: LaidOut ──────────────────────────

/// Tiles at their nominal grid positions.
///
/// Call [`refine`](Self::refine) to advance.
#[must_use = "pipeline stages are consumed by advancing; call .refine() to continue"]
pub struct LaidOut {
    ctx: RunContext,
    tiles: TileMap,
    normalized: usize,
    layout: LayoutResult,
}

impl LaidOut {
    /// The initial layout.
    #[must_use]
    pub const fn layout(&self) -> &LayoutResult {
        &self.layout
    }

    /// Run the configured number of refinement passes, then apply manual
    /// overrides.
    ///
    /// Polls `cancel` before each pass.
    pub fn refine(mut self, cancel: &CancelToken) -> Option<Refined> {
        let params = RefineParams {
            overlap: self.ctx.settings.overlap_max,
            band: self.ctx.settings.seam_band_px,
        };
        let mut passes = 0;
        for _ in 0..self.ctx.settings.refine_iterations {
            if cancel.is_cancelled() {
                log::info!("cancelled during layout refinement");
                return None;
            }
            let updated = refine_pass(&self.tiles, &mut self.layout, params);
            passes += 1;
            log::debug!("refinement pass {passes}: {updated} tiles updated");
        }

        let overrides_applied = apply_manual_overrides(
            &mut self.layout,
            &self.ctx.overrides,
            self.ctx.settings.max_scale_percent,
        );
        if overrides_applied > 0 {
            log::info!("applied {overrides_applied} manual transforms");
        }

        Some(Refined {
            ctx: self.ctx,
            tiles: self.tiles,
            normalized: self.normalized,
            layout: self.layout,
            passes,
            overrides_applied,
        })
    }
}

// ───────────────────────── Stage 5: Refined ──────────────────────────

/// Final placements, manual overrides included.
///
/// Call [`blend`](Self::blend) to advance.
#[must_use = "pipeline stages are consumed by advancing; call .blend() to continue"]
pub struct Refined {
    ctx: RunContext,
    tiles: TileMap,
    normalized: usize,
    layout: LayoutResult,
    passes: u32,
    overrides_applied: usize,
}

impl Refined {
    /// The refined layout.
    #[must_use]
    pub const fn layout(&self) -> &LayoutResult {
        &self.layout
    }

    /// Refinement passes that ran.
    #[must_use]
    pub const fn passes(&self) -> u32 {
        self.passes
    }

    /// Manual transforms that replaced refined ones.
    #[must_use]
    pub const fn overrides_applied(&self) -> usize {
        self.overrides_applied
    }

    /// Feather every left and top seam in place.
    pub fn blend(mut self) -> Blended {
        let overlap = self.ctx.settings.blend_overlap();
        let seams = blend_neighbors(&mut self.tiles, overlap, self.ctx.settings.feather_px);
        log::debug!("blended {seams} seams over {overlap}px");
        Blended {
            ctx: self.ctx,
            tiles: self.tiles,
            normalized: self.normalized,
            layout: self.layout,
            passes: self.passes,
            overrides_applied: self.overrides_applied,
            seams,
        }
    }
}

// ───────────────────────── Stage 6: Blended ──────────────────────────

/// Tiles whose shared strips carry identical feathered content.
///
/// Call [`compose`](Self::compose) to advance.
#[must_use = "pipeline stages are consumed by advancing; call .compose() to continue"]
pub struct Blended {
    ctx: RunContext,
    tiles: TileMap,
    normalized: usize,
    layout: LayoutResult,
    passes: u32,
    overrides_applied: usize,
    seams: usize,
}

impl Blended {
    /// The blended tiles.
    #[must_use]
    pub const fn tiles(&self) -> &TileMap {
        &self.tiles
    }

    /// Seams that were feathered.
    #[must_use]
    pub const fn seams(&self) -> usize {
        self.seams
    }

    /// Draw every tile onto the canvas and record the gaps.
    pub fn compose(self) -> Composed {
        let composition = compose_canvas(&self.tiles, &self.layout);
        let gap_before = gap_mask(&composition.occupancy);
        let gap_px_before = count_nonzero(&gap_before);
        Composed {
            report: StitchReport {
                tile_count: self.tiles.len(),
                missing: self.ctx.missing.clone(),
                mask_fallbacks: self.tiles.values().filter(|t| t.mask_fell_back).count(),
                normalized: self.normalized,
                refine_passes: self.passes,
                overrides_applied: self.overrides_applied,
                seams_blended: self.seams,
                gap_px_before,
                gap_px_after: gap_px_before,
                seam_fill: SeamFillOutcome::Disabled,
            },
            ctx: self.ctx,
            tiles: self.tiles,
            layout: self.layout,
            canvas: composition.canvas,
            occupancy: composition.occupancy,
            gap_before,
        }
    }
}

// ───────────────────────── Stage 7: Composed ─────────────────────────

/// The raw canvas with its occupancy and gap mask.
///
/// Call [`repair`](Self::repair) to advance.
#[must_use = "pipeline stages are consumed by advancing; call .repair() to continue"]
pub struct Composed {
    ctx: RunContext,
    tiles: TileMap,
    layout: LayoutResult,
    canvas: RgbImage,
    occupancy: GrayImage,
    gap_before: GrayImage,
    report: StitchReport,
}

impl Composed {
    /// The unrepaired canvas.
    #[must_use]
    pub const fn canvas(&self) -> &RgbImage {
        &self.canvas
    }

    /// Pixels no tile wrote, as a mask.
    #[must_use]
    pub const fn gap_mask(&self) -> &GrayImage {
        &self.gap_before
    }

    /// Gap pixel count.
    #[must_use]
    pub const fn gap_px(&self) -> u64 {
        self.report.gap_px_before
    }

    /// Inpaint every gap and mark it filled.
    pub fn repair(mut self) -> Repaired {
        let repaired = repair_universal(&mut self.canvas, &mut self.occupancy, &self.gap_before);
        Repaired { inner: self, repaired }
    }
}

// ───────────────────────── Stage 8: Repaired ─────────────────────────

/// Canvas after the universal repair.
///
/// Call [`seam_fill`](Self::seam_fill) to advance.
#[must_use = "pipeline stages are consumed by advancing; call .seam_fill() to continue"]
pub struct Repaired {
    inner: Composed,
    repaired: u64,
}

impl Repaired {
    /// Pixels inpainted by the universal repair.
    #[must_use]
    pub const fn repaired_px(&self) -> u64 {
        self.repaired
    }

    /// Whether [`seam_fill`](Self::seam_fill) will do anything besides
    /// report [`SeamFillOutcome::Disabled`].
    #[must_use]
    pub const fn seam_fill_enabled(&self) -> bool {
        self.inner.ctx.settings.seam_fill_enabled
    }

    /// Run the bounded seam fill over the original gap mask.
    pub fn seam_fill(mut self) -> SeamFilled {
        let composed = &mut self.inner;
        let outcome = apply_seam_fill(&mut composed.canvas, &composed.gap_before, &composed.ctx.settings);
        log::debug!("seam fill: {outcome:?}");
        composed.report.seam_fill = outcome;
        SeamFilled { inner: self.inner }
    }
}

// ───────────────────────── Stage 9: SeamFilled ───────────────────────

/// Canvas after every repair attempt.
///
/// Call [`finish`](Self::finish) to run the final gap check.
#[must_use = "pipeline stages are consumed by advancing; call .finish() to continue"]
pub struct SeamFilled {
    inner: Composed,
}

impl SeamFilled {
    /// What the seam fill step did.
    #[must_use]
    pub const fn outcome(&self) -> SeamFillOutcome {
        self.inner.report.seam_fill
    }

    /// Count residual gaps and hand over the output.
    pub fn finish(self) -> StitchOutput {
        let Composed {
            ctx,
            tiles,
            layout,
            canvas,
            occupancy,
            gap_before,
            mut report,
        } = self.inner;
        report.gap_px_after = final_gap_check(&occupancy);
        StitchOutput {
            gap_mask_after: gap_mask(&occupancy),
            canvas,
            occupancy,
            gap_mask_before: gap_before,
            layout,
            tiles,
            report,
            encode: ctx.settings.encode_request(),
        }
    }
}

// ───────────────────── Pipeline entry point ──────────────────────────

pub(crate) fn enter(progress: &mut dyn ProgressSink, stage: Stage) {
    log::info!("stage: {stage}");
    progress.stage(stage);
    progress.progress(stage.checkpoint());
}

/// Entry point for the typestate stitch run.
pub struct Pipeline;

impl Pipeline {
    /// Start a run over `tiles`.
    ///
    /// Tiles are visited in row-major order regardless of input order.
    pub fn new(mut tiles: Vec<TileInfo>, options: StitchOptions) -> Pending {
        tiles.sort_by_key(|info| info.coord);
        tiles.dedup_by_key(|info| info.coord);
        Pending { infos: tiles, options }
    }
}

/// Run every stage in order, reporting each transition to `progress`.
///
/// Returns `Ok(None)` if `cancel` was triggered.
///
/// # Errors
///
/// Returns [`StitchError::NoTiles`] for an empty tile list and propagates
/// the first tile source error. Everything else is recoverable and shows up
/// in the [`StitchReport`].
pub fn stitch<S: TileSource + ?Sized>(
    tiles: Vec<TileInfo>,
    source: &S,
    options: &StitchOptions,
    progress: &mut dyn ProgressSink,
    cancel: &CancelToken,
) -> Result<Option<StitchOutput>, StitchError> {
    enter(progress, Stage::Loading);
    let Some(loaded) = Pipeline::new(tiles, options.clone()).load(source, progress, cancel)? else {
        return Ok(None);
    };
    enter(progress, Stage::Preprocessing);
    let Some(preprocessed) = loaded.preprocess(progress, cancel) else {
        return Ok(None);
    };
    enter(progress, Stage::PhotometricNormalize);
    let Some(normalized) = preprocessed.normalize(cancel) else {
        return Ok(None);
    };
    enter(progress, Stage::LayoutInitial);
    let laid_out = normalized.lay_out();
    enter(progress, Stage::LayoutRefine);
    let Some(refined) = laid_out.refine(cancel) else {
        return Ok(None);
    };
    enter(progress, Stage::EdgeBlend);
    let blended = refined.blend();
    enter(progress, Stage::Compose);
    let composed = blended.compose();
    enter(progress, Stage::GapRepairUniversal);
    let repaired = composed.repair();
    if repaired.seam_fill_enabled() {
        enter(progress, Stage::GapRepairSeamFill);
    }
    let filled = repaired.seam_fill();
    enter(progress, Stage::FinalCheck);
    let output = filled.finish();
    enter(progress, Stage::Done);
    Ok(Some(output))
}
