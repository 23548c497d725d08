//! Image decoding for the chest X-ray pipeline.
//!
//! Turns a file path plus a format tag into a [`DecodedImage`]: the pixel
//! array the preprocessing stage consumes and an RGB image ready for
//! display. Two readers cover the closed format set:
//!
//! - **DICOM** (`dcm`, `dicom`): pixel data read straight from the dataset,
//!   16-bit intensities rescaled into 8-bit range.
//! - **Raster** (`jpg`, `jpeg`, `png`): decoded via the `image` crate.
//!
//! Pixels are RGB (or single-channel grayscale) everywhere past this
//! boundary; no other channel order exists in the workspace.

mod dicom;
mod raster;

use std::path::Path;

use xray_common::{RawImage, Result, XrayError};

pub use dicom::DicomReader;
pub use raster::RasterReader;

/// Supported image formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Dicom,
    Jpeg,
    Png,
}

impl ImageFormat {
    /// Resolve a format tag (file extension without the dot, case
    /// insensitive).
    pub fn from_tag(tag: &str) -> Result<Self> {
        match tag.to_ascii_lowercase().as_str() {
            "dcm" | "dicom" => Ok(ImageFormat::Dicom),
            "jpg" | "jpeg" => Ok(ImageFormat::Jpeg),
            "png" => Ok(ImageFormat::Png),
            other => Err(XrayError::UnsupportedFormat(other.to_string())),
        }
    }

    /// Resolve the format from a file path's extension.
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .ok_or_else(|| XrayError::UnsupportedFormat(path.display().to_string()))?;
        Self::from_tag(ext)
    }
}

/// Decoded image pair: the raw pixel array for the pipeline and an RGB
/// rendition for display.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub raw: RawImage,
    pub display: image::RgbImage,
}

/// Reader contract over the closed format set.
pub trait ImageReader {
    /// Read and decode the image at `path`.
    fn read(&self, path: &Path) -> Result<DecodedImage>;
}

/// Return the reader for a format.
pub fn reader_for(format: ImageFormat) -> Box<dyn ImageReader> {
    match format {
        ImageFormat::Dicom => Box::new(DicomReader),
        ImageFormat::Jpeg | ImageFormat::Png => Box::new(RasterReader),
    }
}

/// Decode the image at `path` according to an explicit format tag.
pub fn decode_image(path: &Path, tag: &str) -> Result<DecodedImage> {
    let format = ImageFormat::from_tag(tag)?;
    reader_for(format).read(path)
}
