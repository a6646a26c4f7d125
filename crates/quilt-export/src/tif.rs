//! Multi-page TIFF serializer.
//!
//! Page 0 is the canvas at full resolution, stored pixel for pixel. When a
//! pyramid is requested, each further page is the previous one decimated
//! by two in both axes and is tagged as a reduced-resolution image
//! (`NewSubfileType = 1`), so viewers can pick a level that fits.
//!
//! Pages are written in strips. The encoder has no tiled layout, so a
//! request for one is logged and ignored.

use std::io::{Cursor, Seek, Write};

use image::RgbImage;
use quilt_pipeline::{Compression, EncodeRequest};
use tiff::encoder::compression::{Compression as Codec, Deflate, Lzw, Packbits, Uncompressed};
use tiff::encoder::{TiffEncoder, colortype};
use tiff::tags::Tag;

use crate::ExportError;

/// At most this many reduced pages are produced.
pub const MAX_OVERVIEW_LEVELS: usize = 4;

/// A level is only decimated further while its shorter side is at least this long.
pub const MIN_OVERVIEW_SIDE: u32 = 512;

/// Largest total page size a classic (32-bit offset) TIFF can hold.
pub const CLASSIC_TIFF_LIMIT: u64 = u32::MAX as u64;

/// `NewSubfileType` value for a reduced-resolution copy.
const REDUCED_RESOLUTION: u32 = 1;

/// Keep every second pixel in both axes.
fn decimate(image: &RgbImage) -> RgbImage {
    let (w, h) = image.dimensions();
    RgbImage::from_fn(w.div_ceil(2), h.div_ceil(2), |x, y| *image.get_pixel(x * 2, y * 2))
}

/// Reduced-resolution levels for `image`, largest first.
///
/// Each level halves the previous one (stride-2 decimation) while the
/// previous level's shorter side is at least [`MIN_OVERVIEW_SIDE`], up to
/// [`MAX_OVERVIEW_LEVELS`] levels.
#[must_use = "returns the overview levels"]
pub fn build_overviews(image: &RgbImage) -> Vec<RgbImage> {
    let mut levels: Vec<RgbImage> = Vec::new();
    for _ in 0..MAX_OVERVIEW_LEVELS {
        let current = levels.last().unwrap_or(image);
        if current.width().min(current.height()) < MIN_OVERVIEW_SIDE {
            break;
        }
        let next = decimate(current);
        levels.push(next);
    }
    levels
}

fn raw_len(image: &RgbImage) -> u64 {
    u64::from(image.width()) * u64::from(image.height()) * 3
}

fn write_page_with<W: Write + Seek, D: Codec>(
    encoder: &mut TiffEncoder<W>,
    page: &RgbImage,
    codec: D,
    reduced: bool,
) -> Result<(), ExportError> {
    let mut image = encoder.new_image_with_compression::<colortype::RGB8, D>(page.width(), page.height(), codec)?;
    if reduced {
        image.encoder().write_tag(Tag::NewSubfileType, REDUCED_RESOLUTION)?;
    }
    image.write_data(page.as_raw())?;
    Ok(())
}

fn write_page<W: Write + Seek>(
    encoder: &mut TiffEncoder<W>,
    page: &RgbImage,
    compression: Compression,
    reduced: bool,
) -> Result<(), ExportError> {
    match compression {
        Compression::None => write_page_with(encoder, page, Uncompressed, reduced),
        Compression::Lzw => write_page_with(encoder, page, Lzw, reduced),
        Compression::Deflate => write_page_with(encoder, page, Deflate::default(), reduced),
        Compression::Packbits => write_page_with(encoder, page, Packbits, reduced),
    }
}

/// Encode a canvas as an RGB8 TIFF.
///
/// # Errors
///
/// Returns [`ExportError::TooLarge`] when the pages would not fit a classic
/// TIFF, and [`ExportError::Tiff`] when encoding fails.
pub fn to_tiff(canvas: &RgbImage, request: &EncodeRequest) -> Result<Vec<u8>, ExportError> {
    let overviews = if request.pyramid {
        build_overviews(canvas)
    } else {
        Vec::new()
    };

    let bytes: u64 = std::iter::once(canvas).chain(&overviews).map(raw_len).sum();
    if bytes > CLASSIC_TIFF_LIMIT {
        return Err(ExportError::TooLarge { bytes });
    }
    if request.tiled {
        log::warn!("tiled TIFF layout is not supported by the writer, writing strips");
    }

    let mut buf = Cursor::new(Vec::new());
    {
        let mut encoder = TiffEncoder::new(&mut buf)?;
        write_page(&mut encoder, canvas, request.compression, false)?;
        for level in &overviews {
            write_page(&mut encoder, level, request.compression, true)?;
        }
    }
    log::debug!(
        "encoded {}x{} TIFF ({}, {} overview levels)",
        canvas.width(),
        canvas.height(),
        request.compression,
        overviews.len()
    );
    Ok(buf.into_inner())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use image::Rgb;

    use super::*;

    #[test]
    fn decimation_keeps_even_pixels() {
        let image = RgbImage::from_fn(5, 3, |x, y| Rgb([x as u8, y as u8, 0]));
        let half = decimate(&image);
        assert_eq!(half.dimensions(), (3, 2));
        assert_eq!(half.get_pixel(2, 1).0, [4, 2, 0]);
    }

    #[test]
    fn small_images_have_no_overviews() {
        assert!(build_overviews(&RgbImage::new(511, 4000)).is_empty());
    }

    #[test]
    fn overviews_halve_until_too_small() {
        let levels = build_overviews(&RgbImage::new(2048, 1100));
        let sizes: Vec<(u32, u32)> = levels.iter().map(RgbImage::dimensions).collect();
        assert_eq!(sizes, vec![(1024, 550), (512, 275)]);
    }

    #[test]
    fn raw_len_counts_three_bytes_per_pixel() {
        assert_eq!(raw_len(&RgbImage::new(10, 7)), 210);
    }
}
