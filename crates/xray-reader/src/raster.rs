//! Raster reader for JPEG and PNG files.

use std::path::Path;

use tracing::debug;
use xray_common::{RawImage, Result, XrayError};

use crate::{DecodedImage, ImageReader};

/// Reader for JPEG/PNG files.
///
/// Output is always 3-channel RGB; this is the single place where the
/// source channel order gets fixed, so downstream stages never see anything
/// else.
pub struct RasterReader;

impl ImageReader for RasterReader {
    fn read(&self, path: &Path) -> Result<DecodedImage> {
        if !path.exists() {
            return Err(XrayError::NotFound(path.to_path_buf()));
        }

        let img = image::ImageReader::open(path)?
            .decode()
            .map_err(|e| XrayError::Decode(e.to_string()))?;

        let rgb = img.to_rgb8();
        debug!(
            width = rgb.width(),
            height = rgb.height(),
            "decoded raster image"
        );

        if rgb.width() == 0 || rgb.height() == 0 {
            return Err(XrayError::InvalidImage(
                "image has zero spatial extent".to_string(),
            ));
        }

        Ok(DecodedImage {
            raw: RawImage::Rgb(rgb.clone()),
            display: rgb,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn test_png_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("xray.png");

        let img = RgbImage::from_fn(64, 48, |x, y| Rgb([x as u8, y as u8, 7]));
        img.save(&path).unwrap();

        let decoded = RasterReader.read(&path).unwrap();
        assert_eq!(decoded.raw.dimensions(), (64, 48));
        assert_eq!(decoded.raw.channels(), 3);
        assert_eq!(decoded.display.dimensions(), (64, 48));
        assert_eq!(*decoded.display.get_pixel(10, 20), Rgb([10, 20, 7]));
    }

    #[test]
    fn test_corrupt_file_is_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"not a png at all").unwrap();

        assert!(matches!(
            RasterReader.read(&path),
            Err(XrayError::Decode(_))
        ));
    }
}
