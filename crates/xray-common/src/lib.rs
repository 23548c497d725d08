//! Common types and error taxonomy for the chest X-ray detection pipeline.

use std::path::PathBuf;

use image::{GrayImage, Luma, Rgb, RgbImage};
use ndarray::ArrayD;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by the detection core.
///
/// Every failure crosses the facade boundary as one of these variants; the
/// caller (GUI, CLI) decides how to present it. The core performs no retries.
#[derive(Debug, Error)]
pub enum XrayError {
    #[error("File not found: {0}")]
    NotFound(PathBuf),

    #[error("Unsupported image format: {0}")]
    UnsupportedFormat(String),

    #[error("Failed to decode image: {0}")]
    Decode(String),

    #[error("Invalid image: {0}")]
    InvalidImage(String),

    #[error("Tensor shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: [usize; 4],
        actual: Vec<usize>,
    },

    #[error("Layer '{requested}' not found on model, available layers: {}", available.join(", "))]
    LayerNotFound {
        requested: String,
        available: Vec<String>,
    },

    #[error("Model weights not found at: {0}")]
    ModelNotFound(PathBuf),

    #[error("Failed to load model checkpoint: {0}")]
    Checkpoint(String),

    #[error("Inference backend error: {0}")]
    Inference(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for detection operations.
pub type Result<T> = std::result::Result<T, XrayError>;

/// Number of classification categories (bacterial, normal, viral).
pub const NUM_CLASSES: usize = 3;

/// Predicted pneumonia category, index mapping fixed by the trained model:
/// 0 = bacterial, 1 = normal, 2 = viral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PneumoniaClass {
    #[serde(rename = "bacteriana")]
    Bacterial,
    #[serde(rename = "normal")]
    Normal,
    #[serde(rename = "viral")]
    Viral,
}

impl PneumoniaClass {
    /// Map a softmax output index to its category.
    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(PneumoniaClass::Bacterial),
            1 => Some(PneumoniaClass::Normal),
            2 => Some(PneumoniaClass::Viral),
            _ => None,
        }
    }
}

impl std::fmt::Display for PneumoniaClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PneumoniaClass::Bacterial => write!(f, "bacteriana"),
            PneumoniaClass::Normal => write!(f, "normal"),
            PneumoniaClass::Viral => write!(f, "viral"),
        }
    }
}

/// Decoded image in the form the pipeline works with.
///
/// Channel order is RGB everywhere past the decoder boundary; grayscale
/// sources stay single-channel until a consumer asks for RGB.
#[derive(Debug, Clone)]
pub enum RawImage {
    Gray(GrayImage),
    Rgb(RgbImage),
}

impl RawImage {
    /// Spatial dimensions as (width, height).
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            RawImage::Gray(img) => img.dimensions(),
            RawImage::Rgb(img) => img.dimensions(),
        }
    }

    /// Number of channels (1 or 3).
    pub fn channels(&self) -> u32 {
        match self {
            RawImage::Gray(_) => 1,
            RawImage::Rgb(_) => 3,
        }
    }

    /// Expand to a 3-channel RGB image (grayscale is replicated per channel).
    pub fn to_rgb8(&self) -> RgbImage {
        match self {
            RawImage::Gray(img) => {
                let (w, h) = img.dimensions();
                RgbImage::from_fn(w, h, |x, y| {
                    let v = img.get_pixel(x, y)[0];
                    Rgb([v, v, v])
                })
            }
            RawImage::Rgb(img) => img.clone(),
        }
    }

    /// Build a `RawImage` from a dynamic-rank array of 8-bit samples.
    ///
    /// Accepts `(H, W)`, `(H, W, 1)` and `(H, W, 3)` layouts; anything else
    /// is rejected. The last axis of a 3-channel array is taken as RGB.
    pub fn from_array(array: &ArrayD<u8>) -> Result<Self> {
        let shape = array.shape();
        match shape.len() {
            2 => {
                let (h, w) = (shape[0], shape[1]);
                if h == 0 || w == 0 {
                    return Err(XrayError::InvalidImage("empty image array".to_string()));
                }
                let mut img = GrayImage::new(w as u32, h as u32);
                for ((y, x), &v) in array
                    .view()
                    .into_dimensionality::<ndarray::Ix2>()
                    .map_err(|e| XrayError::InvalidImage(e.to_string()))?
                    .indexed_iter()
                {
                    img.put_pixel(x as u32, y as u32, Luma([v]));
                }
                Ok(RawImage::Gray(img))
            }
            3 => {
                let (h, w, c) = (shape[0], shape[1], shape[2]);
                if h == 0 || w == 0 {
                    return Err(XrayError::InvalidImage("empty image array".to_string()));
                }
                let view = array
                    .view()
                    .into_dimensionality::<ndarray::Ix3>()
                    .map_err(|e| XrayError::InvalidImage(e.to_string()))?;
                match c {
                    1 => {
                        let mut img = GrayImage::new(w as u32, h as u32);
                        for y in 0..h {
                            for x in 0..w {
                                img.put_pixel(x as u32, y as u32, Luma([view[[y, x, 0]]]));
                            }
                        }
                        Ok(RawImage::Gray(img))
                    }
                    3 => {
                        let mut img = RgbImage::new(w as u32, h as u32);
                        for y in 0..h {
                            for x in 0..w {
                                img.put_pixel(
                                    x as u32,
                                    y as u32,
                                    Rgb([view[[y, x, 0]], view[[y, x, 1]], view[[y, x, 2]]]),
                                );
                            }
                        }
                        Ok(RawImage::Rgb(img))
                    }
                    other => Err(XrayError::InvalidImage(format!(
                        "expected 1 or 3 channels, got {other}"
                    ))),
                }
            }
            rank => Err(XrayError::InvalidImage(format!(
                "expected a 2- or 3-dimensional array, got rank {rank}"
            ))),
        }
    }
}

impl From<GrayImage> for RawImage {
    fn from(img: GrayImage) -> Self {
        RawImage::Gray(img)
    }
}

impl From<RgbImage> for RawImage {
    fn from(img: RgbImage) -> Self {
        RawImage::Rgb(img)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, Array3};

    #[test]
    fn test_class_display() {
        assert_eq!(PneumoniaClass::Bacterial.to_string(), "bacteriana");
        assert_eq!(PneumoniaClass::Normal.to_string(), "normal");
        assert_eq!(PneumoniaClass::Viral.to_string(), "viral");
    }

    #[test]
    fn test_class_from_index() {
        assert_eq!(PneumoniaClass::from_index(0), Some(PneumoniaClass::Bacterial));
        assert_eq!(PneumoniaClass::from_index(1), Some(PneumoniaClass::Normal));
        assert_eq!(PneumoniaClass::from_index(2), Some(PneumoniaClass::Viral));
        assert_eq!(PneumoniaClass::from_index(3), None);
    }

    #[test]
    fn test_raw_image_from_gray_array() {
        let array = Array2::<u8>::from_elem((20, 30), 128).into_dyn();
        let raw = RawImage::from_array(&array).unwrap();
        assert_eq!(raw.dimensions(), (30, 20));
        assert_eq!(raw.channels(), 1);
    }

    #[test]
    fn test_raw_image_from_rgb_array() {
        let array = Array3::<u8>::from_elem((10, 15, 3), 42).into_dyn();
        let raw = RawImage::from_array(&array).unwrap();
        assert_eq!(raw.dimensions(), (15, 10));
        assert_eq!(raw.channels(), 3);
    }

    #[test]
    fn test_raw_image_rejects_empty() {
        let array = Array2::<u8>::zeros((0, 10)).into_dyn();
        assert!(matches!(
            RawImage::from_array(&array),
            Err(XrayError::InvalidImage(_))
        ));
    }

    #[test]
    fn test_raw_image_rejects_bad_rank() {
        let array = ndarray::Array1::<u8>::zeros(10).into_dyn();
        assert!(matches!(
            RawImage::from_array(&array),
            Err(XrayError::InvalidImage(_))
        ));
    }

    #[test]
    fn test_raw_image_rejects_bad_channel_count() {
        let array = Array3::<u8>::zeros((4, 4, 2)).into_dyn();
        assert!(matches!(
            RawImage::from_array(&array),
            Err(XrayError::InvalidImage(_))
        ));
    }

    #[test]
    fn test_gray_to_rgb_expansion() {
        let gray = GrayImage::from_fn(4, 4, |x, _| Luma([(x * 10) as u8]));
        let rgb = RawImage::Gray(gray).to_rgb8();
        assert_eq!(rgb.dimensions(), (4, 4));
        let p = rgb.get_pixel(2, 0);
        assert_eq!(p[0], 20);
        assert_eq!(p[1], 20);
        assert_eq!(p[2], 20);
    }
}
