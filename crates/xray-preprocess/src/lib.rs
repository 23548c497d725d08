//! Deterministic preprocessing from a decoded X-ray image to the tensor the
//! classifier expects.
//!
//! Fixed transform order, matching the training-time pipeline of the
//! shipped checkpoints:
//!
//! 1. resize to the target spatial size (Triangle filter),
//! 2. luminance grayscale conversion for multi-channel inputs,
//! 3. CLAHE local contrast enhancement (4x4 tiles, clip limit 2.0),
//! 4. normalization from `[0, 255]` to `[0, 1]`,
//! 5. expansion to a `(1, S, S, 1)` batch tensor.
//!
//! The only configurable knobs are the target size and the CLAHE
//! parameters; everything else is invariant so that the same input always
//! produces the same bytes.

pub mod clahe;

use image::GrayImage;
use ndarray::Array4;
use serde::{Deserialize, Serialize};
use tracing::debug;
use xray_common::{RawImage, Result, XrayError};

/// Preprocessing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreprocessConfig {
    /// Target spatial size; the output tensor is (1, size, size, 1).
    pub target_size: u32,
    /// CLAHE clip limit, relative to the mean tile bin height.
    pub clip_limit: f32,
    /// CLAHE tile grid (columns, rows).
    pub tile_grid: (u32, u32),
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            target_size: 512,
            clip_limit: 2.0,
            tile_grid: (4, 4),
        }
    }
}

impl PreprocessConfig {
    /// Override the target spatial size.
    #[must_use]
    pub fn with_target_size(mut self, target_size: u32) -> Self {
        self.target_size = target_size;
        self
    }
}

/// X-ray preprocessor: one `RawImage` in, one `(1, S, S, 1)` tensor out.
#[derive(Debug, Clone, Default)]
pub struct XRayPreprocessor {
    config: PreprocessConfig,
}

impl XRayPreprocessor {
    pub fn new(config: PreprocessConfig) -> Self {
        Self { config }
    }

    pub fn target_size(&self) -> u32 {
        self.config.target_size
    }

    /// Run the full preprocessing chain.
    pub fn preprocess(&self, image: &RawImage) -> Result<Array4<f32>> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(XrayError::InvalidImage(
                "cannot preprocess an empty image".to_string(),
            ));
        }

        let size = self.config.target_size;

        // Resize first, then collapse to grayscale
        let gray: GrayImage = match image {
            RawImage::Gray(img) => {
                image::imageops::resize(img, size, size, image::imageops::FilterType::Triangle)
            }
            RawImage::Rgb(img) => {
                let resized =
                    image::imageops::resize(img, size, size, image::imageops::FilterType::Triangle);
                image::imageops::grayscale(&resized)
            }
        };

        let (tiles_x, tiles_y) = self.config.tile_grid;
        let enhanced = clahe::apply(&gray, tiles_x, tiles_y, self.config.clip_limit);

        debug!(
            input_width = width,
            input_height = height,
            target = size,
            "preprocessed X-ray image"
        );

        let size = size as usize;
        let mut tensor = Array4::<f32>::zeros((1, size, size, 1));
        for (y, row) in enhanced.rows().enumerate() {
            for (x, pixel) in row.enumerate() {
                tensor[[0, y, x, 0]] = pixel[0] as f32 / 255.0;
            }
        }

        Ok(tensor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb, RgbImage};

    fn random_rgb(width: u32, height: u32) -> RawImage {
        // Deterministic pseudo-random pattern, no RNG dependency needed
        let img = RgbImage::from_fn(width, height, |x, y| {
            let v = x.wrapping_mul(31).wrapping_add(y.wrapping_mul(17));
            Rgb([(v % 256) as u8, ((v / 3) % 256) as u8, ((v * 7) % 256) as u8])
        });
        RawImage::Rgb(img)
    }

    #[test]
    fn test_output_shape_and_range_default_size() {
        let pre = XRayPreprocessor::default();
        let tensor = pre.preprocess(&random_rgb(100, 100)).unwrap();

        assert_eq!(tensor.shape(), &[1, 512, 512, 1]);
        let min = tensor.iter().copied().fold(f32::INFINITY, f32::min);
        let max = tensor.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        assert!(min >= 0.0);
        assert!(max <= 1.0);
    }

    #[test]
    fn test_output_shape_invariant_to_input_geometry() {
        let pre = XRayPreprocessor::new(PreprocessConfig::default().with_target_size(64));

        for image in [
            random_rgb(37, 91),
            RawImage::Gray(GrayImage::from_fn(300, 40, |x, _| Luma([(x % 256) as u8]))),
        ] {
            let tensor = pre.preprocess(&image).unwrap();
            assert_eq!(tensor.shape(), &[1, 64, 64, 1]);
        }
    }

    #[test]
    fn test_deterministic() {
        let pre = XRayPreprocessor::new(PreprocessConfig::default().with_target_size(64));
        let image = random_rgb(80, 60);

        let a = pre.preprocess(&image).unwrap();
        let b = pre.preprocess(&image).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_empty_image_rejected() {
        let pre = XRayPreprocessor::default();
        let empty = RawImage::Gray(GrayImage::new(0, 0));
        assert!(matches!(
            pre.preprocess(&empty),
            Err(XrayError::InvalidImage(_))
        ));
    }

    #[test]
    fn test_config_defaults() {
        let config = PreprocessConfig::default();
        assert_eq!(config.target_size, 512);
        assert_eq!(config.clip_limit, 2.0);
        assert_eq!(config.tile_grid, (4, 4));
    }
}
