//! DICOM reader: native pixel data straight from the dataset.

use std::path::Path;

use dicom_dictionary_std::tags;
use dicom_object::{open_file, DefaultDicomObject};
use image::{GrayImage, Rgb, RgbImage};
use tracing::debug;
use xray_common::{RawImage, Result, XrayError};

use crate::{DecodedImage, ImageReader};

/// Reader for DICOM files (`.dcm`).
///
/// Supports native (non-encapsulated) pixel data: 8- or 16-bit grayscale and
/// 8-bit interleaved RGB. 16-bit intensities are linearly rescaled from
/// `[min, max]` to `[0, 255]`; a flat image (min == max) is passed through
/// unscaled with values clamped into 8-bit range.
pub struct DicomReader;

impl ImageReader for DicomReader {
    fn read(&self, path: &Path) -> Result<DecodedImage> {
        if !path.exists() {
            return Err(XrayError::NotFound(path.to_path_buf()));
        }

        let obj = open_file(path).map_err(|e| XrayError::Decode(e.to_string()))?;

        let rows = get_u16(&obj, tags::ROWS)
            .ok_or_else(|| XrayError::Decode("missing Rows (0028,0010)".to_string()))?;
        let columns = get_u16(&obj, tags::COLUMNS)
            .ok_or_else(|| XrayError::Decode("missing Columns (0028,0011)".to_string()))?;
        let bits_allocated = get_u16(&obj, tags::BITS_ALLOCATED).unwrap_or(8);
        let samples_per_pixel = get_u16(&obj, tags::SAMPLES_PER_PIXEL).unwrap_or(1);

        if rows == 0 || columns == 0 {
            return Err(XrayError::InvalidImage(
                "DICOM image has zero spatial extent".to_string(),
            ));
        }

        debug!(
            rows,
            columns, bits_allocated, samples_per_pixel, "reading DICOM pixel data"
        );

        let pixel_bytes = obj
            .element(tags::PIXEL_DATA)
            .map_err(|e| XrayError::Decode(format!("missing PixelData (7FE0,0010): {e}")))?
            .to_bytes()
            .map_err(|e| XrayError::Decode(format!("unreadable PixelData: {e}")))?;

        let (width, height) = (columns as u32, rows as u32);
        let n_pixels = rows as usize * columns as usize;

        let raw = match (bits_allocated, samples_per_pixel) {
            (8, 1) => {
                let data = checked_slice(&pixel_bytes, n_pixels)?;
                let img = GrayImage::from_raw(width, height, data.to_vec())
                    .ok_or_else(|| XrayError::Decode("truncated pixel data".to_string()))?;
                RawImage::Gray(img)
            }
            (16, 1) => {
                let data = checked_slice(&pixel_bytes, n_pixels * 2)?;
                let samples: Vec<u16> = data
                    .chunks_exact(2)
                    .map(|c| u16::from_le_bytes([c[0], c[1]]))
                    .collect();
                let rescaled = rescale_to_u8(&samples);
                let img = GrayImage::from_raw(width, height, rescaled)
                    .ok_or_else(|| XrayError::Decode("truncated pixel data".to_string()))?;
                RawImage::Gray(img)
            }
            (8, 3) => {
                let data = checked_slice(&pixel_bytes, n_pixels * 3)?;
                let mut img = RgbImage::new(width, height);
                for (i, chunk) in data.chunks_exact(3).enumerate() {
                    let x = (i % columns as usize) as u32;
                    let y = (i / columns as usize) as u32;
                    img.put_pixel(x, y, Rgb([chunk[0], chunk[1], chunk[2]]));
                }
                RawImage::Rgb(img)
            }
            (bits, samples) => {
                return Err(XrayError::Decode(format!(
                    "unsupported DICOM pixel layout: {bits} bits, {samples} samples per pixel"
                )))
            }
        };

        let display = raw.to_rgb8();
        Ok(DecodedImage { raw, display })
    }
}

fn get_u16(obj: &DefaultDicomObject, tag: dicom_object::Tag) -> Option<u16> {
    obj.element(tag)
        .ok()
        .and_then(|elem| elem.to_int::<i32>().ok())
        .and_then(|val| u16::try_from(val).ok())
}

fn checked_slice(bytes: &[u8], expected: usize) -> Result<&[u8]> {
    if bytes.len() < expected {
        return Err(XrayError::Decode(format!(
            "pixel data too short: {} bytes, expected {expected}",
            bytes.len()
        )));
    }
    Ok(&bytes[..expected])
}

/// Linearly rescale 16-bit samples from `[min, max]` into `[0, 255]`.
///
/// A flat image (min == max) is left unscaled; values are clamped into
/// 8-bit range so the constant survives instead of dividing by zero.
fn rescale_to_u8(samples: &[u16]) -> Vec<u8> {
    let min = samples.iter().copied().min().unwrap_or(0);
    let max = samples.iter().copied().max().unwrap_or(0);

    if min == max {
        return samples.iter().map(|&v| v.min(255) as u8).collect();
    }

    let range = (max - min) as f32;
    samples
        .iter()
        .map(|&v| (((v - min) as f32) * 255.0 / range).round() as u8)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rescale_full_range() {
        let rescaled = rescale_to_u8(&[0, 2048, 4096]);
        assert_eq!(rescaled, vec![0, 128, 255]);
    }

    #[test]
    fn test_rescale_flat_image_skips_division() {
        // min == max must not divide by zero; constant comes back constant
        let rescaled = rescale_to_u8(&[700, 700, 700, 700]);
        assert!(rescaled.iter().all(|&v| v == rescaled[0]));
        assert_eq!(rescaled[0], 255);
    }

    #[test]
    fn test_rescale_flat_low_value_unscaled() {
        let rescaled = rescale_to_u8(&[42, 42]);
        assert_eq!(rescaled, vec![42, 42]);
    }

    #[test]
    fn test_rescale_empty() {
        assert!(rescale_to_u8(&[]).is_empty());
    }

    #[test]
    fn test_checked_slice_too_short() {
        assert!(checked_slice(&[1, 2, 3], 4).is_err());
        assert_eq!(checked_slice(&[1, 2, 3], 2).unwrap(), &[1, 2]);
    }
}
