//! quilt-export: Pure raster serializers (sans-IO)
//!
//! Encodes a finished canvas for the outside world: multi-page TIFF for the
//! stitched map, PNG for previews and debug artifacts. Every function
//! returns bytes; writing them anywhere is the caller's job.

pub mod png;
pub mod tif;

pub use png::to_png;
pub use tif::{build_overviews, to_tiff};

/// Errors that can occur while encoding.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// The TIFF encoder failed.
    #[error("TIFF encoding failed: {0}")]
    Tiff(#[from] tiff::TiffError),

    /// The PNG encoder failed.
    #[error("image encoding failed: {0}")]
    Image(#[from] image::ImageError),

    /// The pages need more bytes than 32-bit TIFF offsets can address.
    #[error("raster needs {bytes} bytes, more than a classic TIFF can hold")]
    TooLarge {
        /// Uncompressed size of every page together.
        bytes: u64,
    },
}
