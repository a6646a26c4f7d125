//! quilt: stitch a grid of scanned map tiles into one raster.
//!
//! Tiles are named `<row>,<col>[suffix].<ext>` (1-based). Inputs may be
//! tile files or directories of tiles; a project file can stand in for
//! both the inputs and the settings.
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin quilt -- [OPTIONS] <INPUTS>... --output map.tif
//! ```
//!
//! Progress and warnings go to stderr through `env_logger` (`RUST_LOG`
//! overrides the default `info` filter). The diagnostics report goes to
//! stdout, as JSON with `--json`.

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::{Parser, ValueEnum};
use quilt_pipeline::diagnostics::{Clock, StitchDiagnostics, stitch_with_diagnostics};
use quilt_pipeline::{
    CancelToken, DebugArtifacts, ProgressSink, ProjectFile, RgbImage, Stage, StitchError, StitchOptions, StitchOutput,
    StitchSettings, TileInfo, TileSource, TransformMap, discover_tiles, transforms_from_json, transforms_to_json,
};

/// Stitch overlapping `row,col` map tiles into one seamless raster.
#[derive(Parser)]
#[command(name = "quilt", version)]
struct Cli {
    /// Tile files or directories containing tiles.
    inputs: Vec<PathBuf>,

    /// Output raster. `.tif`/`.tiff` writes a TIFF, `.png` a PNG.
    #[arg(short, long, default_value = "stitched.tif")]
    output: PathBuf,

    /// Load tiles, settings and manual transforms from a project file.
    ///
    /// Tile names in the project resolve against the project file's directory.
    #[arg(long)]
    project: Option<PathBuf>,

    /// Save the tiles, settings and manual transforms of this run as a project file.
    #[arg(long)]
    save_project: Option<PathBuf>,

    /// Manual transforms (JSON) that replace the refined ones.
    #[arg(long)]
    transforms: Option<PathBuf>,

    /// Save the final per-tile transforms as JSON.
    #[arg(long)]
    save_transforms: Option<PathBuf>,

    /// Preset applied on top of the settings.
    #[arg(long, value_enum)]
    mode: Option<Mode>,

    /// Lightness (0-255) at or above which paper counts as background.
    #[arg(long, default_value_t = StitchSettings::DEFAULT_BG_THRESHOLD)]
    bg_threshold: u8,

    /// Background detection policy.
    #[arg(long, value_enum, default_value_t = Background::LabPaper)]
    bg_mode: Background,

    /// Padding around the content bounding box when cropping.
    #[arg(long, default_value_t = StitchSettings::DEFAULT_CROP_PADDING_PX)]
    crop_padding_px: u32,

    /// Largest deskew correction in degrees.
    #[arg(long, default_value_t = StitchSettings::DEFAULT_MAX_ANGLE)]
    max_angle: f64,

    /// Largest accepted seam offset in pixels.
    #[arg(long, default_value_t = StitchSettings::DEFAULT_OVERLAP_MAX)]
    overlap_max: u32,

    /// Width of the edge band sampled by the seam matcher.
    #[arg(long, default_value_t = StitchSettings::DEFAULT_SEAM_BAND_PX)]
    seam_band_px: u32,

    /// Number of grid refinement passes.
    #[arg(long, default_value_t = StitchSettings::DEFAULT_REFINE_ITERATIONS)]
    refine_iterations: u32,

    /// Largest scale correction in percent.
    #[arg(long, default_value_t = StitchSettings::DEFAULT_MAX_SCALE_PERCENT)]
    max_scale_percent: f64,

    /// Feather width in pixels.
    #[arg(long, default_value_t = StitchSettings::DEFAULT_FEATHER_PX)]
    feather_px: u32,

    /// TIFF compression.
    #[arg(long, value_enum, default_value_t = Codec::Deflate)]
    compression: Codec,

    /// Exposure matching between neighboring tiles.
    #[arg(long, value_enum, default_value_t = ColorMatch::Mild)]
    color_match: ColorMatch,

    /// Let seam fill paint over detected line work.
    #[arg(long)]
    no_protect_lines: bool,

    /// Run the bounded seam fill after gap repair.
    #[arg(long)]
    seam_fill: bool,

    /// How far seam fill reaches into a gap, in pixels (0 = unlimited).
    #[arg(long, default_value_t = StitchSettings::DEFAULT_SEAM_FILL_MAX_PX)]
    seam_fill_max_px: u32,

    /// Neighborhood radius for seam fill inpainting.
    #[arg(long, default_value_t = StitchSettings::DEFAULT_INPAINT_RADIUS)]
    inpaint_radius: u32,

    /// Seam fill inpainting algorithm.
    #[arg(long, value_enum, default_value_t = Inpaint::Telea)]
    inpaint_method: Inpaint,

    /// Write a plain single-page TIFF without the reduced-resolution pyramid.
    #[arg(long)]
    no_optimize_tiff: bool,

    /// Write debug images next to the output, under `debug/`.
    #[arg(long)]
    debug: bool,

    /// Output diagnostics as JSON instead of human-readable report.
    #[arg(long)]
    json: bool,

    /// Full settings as a JSON string.
    ///
    /// When provided, all other setting flags are ignored.
    /// The JSON must be a valid `StitchSettings` serialization; missing
    /// fields take their defaults.
    #[arg(long)]
    settings_json: Option<String>,
}

/// Run preset selection.
#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    /// One refinement pass, no strong color matching.
    Fast,
    /// Settings used as given.
    Restoration,
}

/// Background detection selection.
#[derive(Clone, Copy, ValueEnum)]
enum Background {
    /// Lab lightness plus low chroma.
    LabPaper,
    /// Plain grayscale threshold.
    Gray,
}

/// TIFF compression selection.
#[derive(Clone, Copy, ValueEnum)]
enum Codec {
    /// Raw samples.
    None,
    /// Lempel-Ziv-Welch.
    Lzw,
    /// zlib/deflate.
    Deflate,
    /// PackBits run-length encoding.
    Packbits,
}

/// Photometric normalization selection.
#[derive(Clone, Copy, ValueEnum)]
enum ColorMatch {
    /// Leave exposure alone.
    Off,
    /// Half-strength luminance transfer.
    Mild,
    /// Per-channel histogram matching.
    Strong,
}

/// Inpainting algorithm selection.
#[derive(Clone, Copy, ValueEnum)]
enum Inpaint {
    /// Fast marching.
    Telea,
    /// Isophote transport.
    Ns,
    /// One-pixel dilation then radius-1 fast marching.
    EdgeExtend,
}

/// Build [`StitchSettings`] from CLI arguments.
///
/// `--settings-json` wins over everything, then the project's settings,
/// then the individual flags. `--debug` is honored in every case.
fn settings_from_cli(cli: &Cli, project: Option<&ProjectFile>) -> Result<StitchSettings, String> {
    let mut settings = if let Some(ref json) = cli.settings_json {
        serde_json::from_str(json).map_err(|e| format!("Error parsing --settings-json: {e}"))?
    } else if let Some(project) = project {
        project.settings.clone()
    } else {
        StitchSettings {
            bg_threshold: cli.bg_threshold,
            bg_mode: match cli.bg_mode {
                Background::LabPaper => quilt_pipeline::BackgroundMode::LabPaper,
                Background::Gray => quilt_pipeline::BackgroundMode::Gray,
            },
            crop_padding_px: cli.crop_padding_px,
            max_angle: cli.max_angle,
            overlap_max: cli.overlap_max,
            seam_band_px: cli.seam_band_px,
            refine_iterations: cli.refine_iterations,
            max_scale_percent: cli.max_scale_percent,
            feather_px: cli.feather_px,
            compression: match cli.compression {
                Codec::None => quilt_pipeline::Compression::None,
                Codec::Lzw => quilt_pipeline::Compression::Lzw,
                Codec::Deflate => quilt_pipeline::Compression::Deflate,
                Codec::Packbits => quilt_pipeline::Compression::Packbits,
            },
            color_match: match cli.color_match {
                ColorMatch::Off => quilt_pipeline::ColorMatchMode::Off,
                ColorMatch::Mild => quilt_pipeline::ColorMatchMode::Mild,
                ColorMatch::Strong => quilt_pipeline::ColorMatchMode::Strong,
            },
            protect_lines: !cli.no_protect_lines,
            seam_fill_enabled: cli.seam_fill,
            seam_fill_max_px: cli.seam_fill_max_px,
            inpaint_radius: cli.inpaint_radius,
            inpaint_method: match cli.inpaint_method {
                Inpaint::Telea => quilt_pipeline::InpaintMethod::Telea,
                Inpaint::Ns => quilt_pipeline::InpaintMethod::NavierStokes,
                Inpaint::EdgeExtend => quilt_pipeline::InpaintMethod::EdgeExtend,
            },
            optimize_tiff: !cli.no_optimize_tiff,
            ..StitchSettings::default()
        }
    };
    settings.debug_stitch |= cli.debug;
    Ok(settings)
}

const fn mode_from_cli(mode: Mode) -> quilt_pipeline::StitchMode {
    match mode {
        Mode::Fast => quilt_pipeline::StitchMode::Fast,
        Mode::Restoration => quilt_pipeline::StitchMode::Restoration,
    }
}

/// How the output file is encoded, chosen by its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Tiff,
    Png,
}

fn output_format(path: &Path) -> Result<OutputFormat, String> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "tif" | "tiff" => Ok(OutputFormat::Tiff),
        "png" => Ok(OutputFormat::Png),
        _ => Err(format!(
            "Unsupported output extension for {}, expected .tif, .tiff or .png",
            path.display()
        )),
    }
}

/// Expand directories into their files and keep the paths that are tiles.
///
/// Files named explicitly that do not follow the tile pattern are
/// reported and skipped; files inside directories are skipped silently.
fn collect_tiles(inputs: &[PathBuf]) -> Result<Vec<TileInfo>, String> {
    let mut paths = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let entries =
                std::fs::read_dir(input).map_err(|e| format!("Error reading directory {}: {e}", input.display()))?;
            let mut files: Vec<PathBuf> = entries
                .filter_map(Result::ok)
                .map(|entry| entry.path())
                .filter(|path| path.is_file())
                .collect();
            files.sort();
            paths.extend(files);
        } else {
            if let Err(e) = TileInfo::from_path(input.as_path()) {
                log::warn!("skipping {}: {e}", input.display());
                continue;
            }
            paths.push(input.clone());
        }
    }
    Ok(discover_tiles(paths))
}

/// Reads tile files from disk.
struct DiskSource;

impl TileSource for DiskSource {
    fn load(&self, info: &TileInfo) -> Result<RgbImage, StitchError> {
        let bytes = std::fs::read(&info.path).map_err(|e| StitchError::TileLoad {
            coord: info.coord,
            message: format!("{}: {e}", info.path.display()),
        })?;
        quilt_pipeline::color::decode_tile(&bytes).map_err(|e| StitchError::TileLoad {
            coord: info.coord,
            message: format!("{}: {e}", info.path.display()),
        })
    }
}

/// Logs progress in ten-percent steps.
#[derive(Default)]
struct LogProgress {
    last_logged: Option<u8>,
}

impl ProgressSink for LogProgress {
    fn stage(&mut self, stage: Stage) {
        log::debug!("entering {stage}");
    }

    fn progress(&mut self, percent: u8) {
        let step = percent / 10;
        if self.last_logged.is_none_or(|last| step > last) {
            self.last_logged = Some(step);
            log::info!("{percent}%");
        }
    }
}

/// [`Clock`] implementation backed by [`std::time::Instant`].
struct StdClock;

impl Clock for StdClock {
    type Instant = Instant;

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn elapsed(&self, since: &Instant) -> Duration {
        since.elapsed()
    }
}

fn read_text(path: &Path) -> Result<String, String> {
    std::fs::read_to_string(path).map_err(|e| format!("Error reading {}: {e}", path.display()))
}

fn write_bytes(path: &Path, bytes: &[u8]) -> Result<(), String> {
    std::fs::write(path, bytes).map_err(|e| format!("Error writing {}: {e}", path.display()))
}

fn encode_output(output: &StitchOutput, settings: &StitchSettings, format: OutputFormat) -> Result<Vec<u8>, String> {
    let encoded = match format {
        OutputFormat::Tiff => quilt_export::to_tiff(&output.canvas, &settings.encode_request()),
        OutputFormat::Png => quilt_export::to_png(&output.canvas),
    };
    encoded.map_err(|e| format!("Error encoding output: {e}"))
}

fn write_debug_artifacts(output: &StitchOutput, dir: &Path) -> Result<(), String> {
    std::fs::create_dir_all(dir).map_err(|e| format!("Error creating {}: {e}", dir.display()))?;
    let artifacts = DebugArtifacts::render(output);
    for (name, image) in artifacts.files() {
        let png = quilt_export::to_png(image).map_err(|e| format!("Error encoding {name}: {e}"))?;
        write_bytes(&dir.join(name), &png)?;
    }
    eprintln!("Debug images written to {}", dir.display());
    Ok(())
}

/// Tile names as stored in a project: relative to `root` when possible.
fn project_tile_names(tiles: &[TileInfo], root: &Path) -> Vec<String> {
    tiles
        .iter()
        .map(|t| {
            t.path
                .strip_prefix(root)
                .map_or_else(|_| t.path.display().to_string(), |p| p.display().to_string())
        })
        .collect()
}

fn print_diagnostics(diagnostics: &StitchDiagnostics, json: bool) -> Result<(), String> {
    if json {
        let json =
            serde_json::to_string_pretty(diagnostics).map_err(|e| format!("Error serializing diagnostics: {e}"))?;
        println!("{json}");
    } else {
        println!("{}", diagnostics.report());
    }
    Ok(())
}

fn run(cli: &Cli) -> Result<(), String> {
    let format = output_format(&cli.output)?;

    let project = match cli.project {
        Some(ref path) => Some(ProjectFile::from_json(&read_text(path)?).map_err(|e| e.to_string())?),
        None => None,
    };
    let settings = settings_from_cli(cli, project.as_ref())?;

    let mut tiles = collect_tiles(&cli.inputs)?;
    if let (Some(project), Some(path)) = (&project, &cli.project) {
        let root = path.parent().unwrap_or_else(|| Path::new(""));
        tiles.extend(project.tile_infos(root));
    }

    let overrides: TransformMap = match (&cli.transforms, &project) {
        (Some(path), _) => transforms_from_json(&read_text(path)?).map_err(|e| e.to_string())?,
        (None, Some(project)) => project.transforms.clone(),
        (None, None) => TransformMap::new(),
    };

    let options = StitchOptions {
        settings: settings.clone(),
        mode: cli.mode.map(mode_from_cli),
        overrides,
    };

    if let Some(ref path) = cli.save_project {
        let root = path.parent().unwrap_or_else(|| Path::new(""));
        let file = ProjectFile {
            tiles: project_tile_names(&discover_tiles(tiles.iter().map(|t| t.path.clone())), root),
            settings: settings.clone(),
            transforms: options.overrides.clone(),
            output_path: Some(cli.output.display().to_string()),
        };
        write_bytes(path, file.to_json().map_err(|e| e.to_string())?.as_bytes())?;
        eprintln!("Project written to {}", path.display());
    }

    log::info!("Stitching {} tiles into {}", tiles.len(), cli.output.display());
    let mut progress = LogProgress::default();
    let cancel = CancelToken::new();
    let Some((output, diagnostics)) =
        stitch_with_diagnostics(tiles, &DiskSource, &options, &StdClock, &mut progress, &cancel)
            .map_err(|e| format!("Stitch error: {e}"))?
    else {
        return Ok(());
    };

    print_diagnostics(&diagnostics, cli.json)?;

    let bytes = encode_output(&output, &options.effective_settings(), format)?;
    write_bytes(&cli.output, &bytes)?;
    eprintln!("Output written to {} ({} bytes)", cli.output.display(), bytes.len());

    if let Some(ref path) = cli.save_transforms {
        let json = transforms_to_json(&output.layout.transforms()).map_err(|e| e.to_string())?;
        write_bytes(path, json.as_bytes())?;
        eprintln!("Transforms written to {}", path.display());
    }

    if options.effective_settings().debug_stitch {
        let dir = cli.output.parent().unwrap_or_else(|| Path::new("")).join("debug");
        write_debug_artifacts(&output, &dir)?;
    }

    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(msg) => {
            eprintln!("{msg}");
            ExitCode::FAILURE
        }
    }
}
