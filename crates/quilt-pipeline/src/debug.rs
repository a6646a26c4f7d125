//! Debug artifacts: derived, read-only views of a run.

use image::imageops::FilterType;
use image::{GrayImage, Rgb, RgbImage};
use ab_glyph::{FontRef, PxScale};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;

use crate::pipeline::StitchOutput;
use crate::types::{LayoutResult, TileMap};

/// Longest side of downscaled previews.
pub const PREVIEW_MAX_SIDE: u32 = 1200;

const BORDER_GREEN: Rgb<u8> = Rgb([0, 255, 0]);
const LABEL_BLUE: Rgb<u8> = Rgb([0, 0, 255]);
const LABEL_SCALE: f32 = 20.0;
const LABEL_INSET: i32 = 5;

static LABEL_FONT: &[u8] = include_bytes!("../assets/DejaVuSansMono.ttf");

/// Tiles drawn at their placements on white, each outlined in green and
/// labelled with its `row,col` coordinate in the top-left corner.
#[must_use = "returns the preview image"]
#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
pub fn layout_preview(layout: &LayoutResult, tiles: &TileMap) -> RgbImage {
    let size = layout.canvas_size;
    let mut preview = RgbImage::from_pixel(size.width, size.height, Rgb([255, 255, 255]));
    let font = FontRef::try_from_slice(LABEL_FONT)
        .inspect_err(|e| log::warn!("label font unusable, drawing borders only: {e}"))
        .ok();

    for (coord, tile) in tiles {
        let Some(placement) = layout.placements.get(coord) else {
            continue;
        };
        let (x0, y0) = placement.canvas_origin(size);
        image::imageops::replace(&mut preview, &tile.image, x0, y0);

        let (w, h) = tile.image.dimensions();
        if w == 0 || h == 0 {
            continue;
        }
        let (x, y) = (x0 as i32, y0 as i32);
        draw_hollow_rect_mut(&mut preview, Rect::at(x, y).of_size(w, h), BORDER_GREEN);
        if w > 2 && h > 2 {
            draw_hollow_rect_mut(&mut preview, Rect::at(x + 1, y + 1).of_size(w - 2, h - 2), BORDER_GREEN);
        }
        if let Some(ref font) = font {
            draw_text_mut(
                &mut preview,
                LABEL_BLUE,
                x + LABEL_INSET,
                y + LABEL_INSET,
                PxScale::from(LABEL_SCALE),
                font,
                &coord.to_string(),
            );
        }
    }
    preview
}

/// Jet colormap: 0 is dark blue, 255 is dark red.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn jet(value: u8) -> Rgb<u8> {
    let t = f32::from(value) / 255.0;
    let channel = |center: f32| {
        let v = (1.5 - 4.0f32.mul_add(t, -center).abs()).clamp(0.0, 1.0);
        (v * 255.0).round() as u8
    };
    Rgb([channel(3.0), channel(2.0), channel(1.0)])
}

/// Jet-colormap rendering of a mask (gaps show up red on blue).
#[must_use = "returns the heatmap"]
pub fn gap_heatmap(mask: &GrayImage) -> RgbImage {
    RgbImage::from_fn(mask.width(), mask.height(), |x, y| jet(mask.get_pixel(x, y).0[0]))
}

/// Size after fitting `(w, h)` within `max_side`, never upscaling.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn preview_size(width: u32, height: u32, max_side: u32) -> (u32, u32) {
    let longest = width.max(height);
    if longest <= max_side || longest == 0 {
        return (width, height);
    }
    let scale = f64::from(max_side) / f64::from(longest);
    (
        ((f64::from(width) * scale) as u32).max(1),
        ((f64::from(height) * scale) as u32).max(1),
    )
}

/// Aspect-preserving downscale with area-style (triangle) filtering.
#[must_use = "returns the preview image"]
pub fn downscale_preview(image: &RgbImage, max_side: u32) -> RgbImage {
    let (w, h) = preview_size(image.width(), image.height(), max_side);
    if (w, h) == image.dimensions() {
        return image.clone();
    }
    image::imageops::resize(image, w, h, FilterType::Triangle)
}

/// Heatmap of a mask downscaled with nearest-neighbor sampling, so isolated
/// gap pixels stay visible as hard spots.
#[must_use = "returns the heatmap"]
pub fn downscale_heatmap(mask: &GrayImage, max_side: u32) -> RgbImage {
    let (w, h) = preview_size(mask.width(), mask.height(), max_side);
    if (w, h) == mask.dimensions() {
        return gap_heatmap(mask);
    }
    gap_heatmap(&image::imageops::resize(mask, w, h, FilterType::Nearest))
}

/// Expand a single-channel mask to RGB for saving.
#[must_use]
pub fn mask_to_rgb(mask: &GrayImage) -> RgbImage {
    RgbImage::from_fn(mask.width(), mask.height(), |x, y| {
        let v = mask.get_pixel(x, y).0[0];
        Rgb([v, v, v])
    })
}

/// Every debug view of a finished run, keyed by the file name it is
/// conventionally written under.
#[derive(Debug, Clone)]
pub struct DebugArtifacts {
    /// Tiles at their final placements with borders.
    pub preview_layout: RgbImage,
    /// Heatmap of the gaps left after repair.
    pub seam_heatmap: RgbImage,
    /// Gap mask right after composition.
    pub gap_mask_before: RgbImage,
    /// Gap mask after every repair.
    pub gap_mask_after: RgbImage,
    /// Downscaled canvas.
    pub small_preview: RgbImage,
}

impl DebugArtifacts {
    /// Render every artifact from a finished run.
    #[must_use]
    pub fn render(output: &StitchOutput) -> Self {
        Self {
            preview_layout: downscale_preview(&layout_preview(&output.layout, &output.tiles), PREVIEW_MAX_SIDE),
            seam_heatmap: downscale_heatmap(&output.gap_mask_after, PREVIEW_MAX_SIDE),
            gap_mask_before: mask_to_rgb(&output.gap_mask_before),
            gap_mask_after: mask_to_rgb(&output.gap_mask_after),
            small_preview: downscale_preview(&output.canvas, PREVIEW_MAX_SIDE),
        }
    }

    /// `(file name, image)` pairs in a stable order.
    #[must_use]
    pub fn files(&self) -> [(&'static str, &RgbImage); 5] {
        [
            ("preview_layout.png", &self.preview_layout),
            ("seam_heatmap.png", &self.seam_heatmap),
            ("gap_mask_before.png", &self.gap_mask_before),
            ("gap_mask_after.png", &self.gap_mask_after),
            ("small_preview.png", &self.small_preview),
        ]
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::layout::initial_layout;
    use crate::types::{CropBox, GridCoord, TileData, TileInfo};

    #[test]
    fn jet_endpoints() {
        let low = jet(0);
        let high = jet(255);
        assert!(low.0[2] > 100 && low.0[0] == 0, "{low:?}");
        assert!(high.0[0] > 100 && high.0[2] == 0, "{high:?}");
        let mid = jet(128);
        assert!(mid.0[1] > 200, "{mid:?}");
    }

    #[test]
    fn preview_size_preserves_aspect() {
        assert_eq!(preview_size(2400, 1200, 1200), (1200, 600));
        assert_eq!(preview_size(300, 4800, 1200), (75, 1200));
        assert_eq!(preview_size(800, 600, 1200), (800, 600));
        assert_eq!(preview_size(5000, 1, 1200), (1200, 1));
    }

    #[test]
    fn small_images_are_not_rescaled() {
        let image = RgbImage::from_pixel(30, 20, Rgb([1, 2, 3]));
        assert_eq!(downscale_preview(&image, 1200), image);
    }

    #[test]
    fn heatmap_marks_gaps_red() {
        let mut mask = GrayImage::new(4, 4);
        mask.put_pixel(1, 1, image::Luma([255]));
        let heat = downscale_heatmap(&mask, 1200);
        assert_eq!(heat.get_pixel(1, 1), &jet(255));
        assert_eq!(heat.get_pixel(0, 0), &jet(0));
    }

    #[test]
    fn layout_preview_outlines_tiles() {
        let coord = GridCoord::new(1, 2);
        let tile = TileData {
            info: TileInfo {
                path: PathBuf::from("1,2.png"),
                coord,
                suffix: String::new(),
            },
            image: RgbImage::from_pixel(10, 10, Rgb([0, 0, 255])),
            mask: GrayImage::new(10, 10),
            angle_deg: 0.0,
            bbox: CropBox {
                x: 0,
                y: 0,
                width: 10,
                height: 10,
            },
            mask_fell_back: false,
        };
        let tiles: TileMap = [(coord, tile)].into_iter().collect();
        let preview = layout_preview(&initial_layout(&tiles), &tiles);
        assert_eq!(preview.dimensions(), (20, 10));
        assert_eq!(preview.get_pixel(10, 5), &BORDER_GREEN);
        assert_eq!(preview.get_pixel(11, 5), &BORDER_GREEN);
        assert_eq!(preview.get_pixel(15, 5).0, [0, 0, 255]);
        assert_eq!(preview.get_pixel(5, 5).0, [255, 255, 255]);
    }

    #[test]
    fn layout_preview_labels_each_tile() {
        let coord = GridCoord::new(1, 1);
        let tile = TileData {
            info: TileInfo {
                path: PathBuf::from("1,1.png"),
                coord,
                suffix: String::new(),
            },
            image: RgbImage::from_pixel(80, 40, Rgb([255, 255, 255])),
            mask: GrayImage::new(80, 40),
            angle_deg: 0.0,
            bbox: CropBox {
                x: 0,
                y: 0,
                width: 80,
                height: 40,
            },
            mask_fell_back: false,
        };
        let tiles: TileMap = [(coord, tile)].into_iter().collect();
        let preview = layout_preview(&initial_layout(&tiles), &tiles);

        let inked = |x0: u32, x1: u32, y0: u32, y1: u32| {
            (y0..y1)
                .flat_map(|y| (x0..x1).map(move |x| (x, y)))
                .filter(|&(x, y)| {
                    let p = preview.get_pixel(x, y).0;
                    p[2] > 200 && p[0] < 128
                })
                .count()
        };
        // Text sits at (5, 5) and is blue on the white tile.
        assert!(inked(5, 45, 5, 30) > 20);
        // Nothing is written in the bottom-right of the tile.
        assert_eq!(inked(50, 78, 30, 38), 0);
    }

    #[test]
    fn artifacts_cover_a_finished_run() {
        use std::collections::BTreeMap;

        use crate::pipeline::{CancelToken, NoProgress, StitchOptions, stitch};

        let infos: Vec<TileInfo> = [(1, 1), (2, 2)]
            .into_iter()
            .map(|(r, c)| TileInfo {
                path: PathBuf::from(format!("{r},{c}.png")),
                coord: GridCoord::new(r, c),
                suffix: String::new(),
            })
            .collect();
        let source: BTreeMap<GridCoord, RgbImage> = infos
            .iter()
            .map(|i| (i.coord, RgbImage::from_pixel(16, 16, Rgb([50, 60, 70]))))
            .collect();
        let output = stitch(infos, &source, &StitchOptions::default(), &mut NoProgress, &CancelToken::new())
            .unwrap()
            .unwrap();
        let artifacts = DebugArtifacts::render(&output);

        for (name, image) in artifacts.files() {
            assert_eq!(image.dimensions(), (32, 32), "{name}");
        }
        // Off-diagonal cells were gaps before repair and are filled after.
        assert_eq!(artifacts.gap_mask_before.get_pixel(20, 4).0, [255, 255, 255]);
        assert_eq!(artifacts.gap_mask_after.get_pixel(20, 4).0, [0, 0, 0]);
        assert_eq!(artifacts.seam_heatmap.get_pixel(20, 4), &jet(0));
    }
}
