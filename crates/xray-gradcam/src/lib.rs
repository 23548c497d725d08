//! Grad-CAM explanation engine for the chest X-ray classifier.
//!
//! Computes the gradient of the predicted class's logit with respect to a
//! named internal convolutional activation, pools the gradients into
//! per-channel importance weights, builds a ReLU-clamped saliency map, and
//! composites it as a jet-colored overlay onto the original image.
//!
//! Activation and gradients come out of a single forward/backward pass
//! through the classifier's tapped forward, so the two are always
//! consistent.

pub mod colormap;

use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use image::{imageops, ImageBuffer, Luma, Rgb, RgbImage};
use ndarray::Array4;
use serde::{Deserialize, Serialize};
use tracing::debug;
use xray_common::{RawImage, Result, XrayError};
use xray_model::{XrayClassifier, LAST_CONV_LAYER};

/// Grad-CAM configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradCamConfig {
    /// Name of the convolutional layer to explain.
    pub layer_name: String,
    /// Blend factor for the overlay: `original * (1 - alpha) + heatmap * alpha`.
    pub alpha: f32,
}

impl Default for GradCamConfig {
    fn default() -> Self {
        Self {
            layer_name: LAST_CONV_LAYER.to_string(),
            alpha: 0.5,
        }
    }
}

/// Grad-CAM engine bound to one target layer.
///
/// The layer name is validated against the classifier's registry at
/// construction time; [`generate`](GradCam::generate) expects the same
/// classifier it was constructed against.
#[derive(Debug, Clone)]
pub struct GradCam {
    layer_name: String,
    alpha: f32,
}

impl GradCam {
    /// Create an engine for `config.layer_name` on the given classifier.
    ///
    /// Fails with [`XrayError::LayerNotFound`] (listing the real layer
    /// names) when the layer does not exist on the model.
    pub fn new<B: Backend>(classifier: &XrayClassifier<B>, config: GradCamConfig) -> Result<Self> {
        let available = classifier.layer_names();
        if !available.iter().any(|n| n == &config.layer_name) {
            return Err(XrayError::LayerNotFound {
                requested: config.layer_name,
                available,
            });
        }
        Ok(Self {
            layer_name: config.layer_name,
            alpha: config.alpha,
        })
    }

    pub fn layer_name(&self) -> &str {
        &self.layer_name
    }

    /// Generate the heatmap overlay for one request.
    ///
    /// `processed` is the preprocessed batch tensor, `original` the decoded
    /// image the overlay is sized and blended against. The returned image
    /// is RGB with the original's spatial dimensions.
    pub fn generate<B: AutodiffBackend>(
        &self,
        classifier: &XrayClassifier<B>,
        processed: &Array4<f32>,
        original: &RawImage,
    ) -> Result<RgbImage> {
        let input = classifier.to_tensor(processed)?;

        // One pass: tapped activation leaf plus the logits downstream of it
        let (leaf, logits) = classifier
            .model()
            .forward_with_tap(input, &self.layer_name)
            .ok_or_else(|| XrayError::LayerNotFound {
                requested: self.layer_name.clone(),
                available: classifier.layer_names(),
            })?;

        // Scalar class score: the predicted class's logit
        let class_idx: usize = logits.clone().argmax(1).into_scalar().elem::<i64>() as usize;
        let score = logits.slice([0..1, class_idx..class_idx + 1]);

        let grads = score.backward();
        let gradient = leaf
            .grad(&grads)
            .ok_or_else(|| XrayError::Inference("no gradient for tapped activation".to_string()))?;
        let activation = leaf.inner();

        // Per-channel weights: spatial mean of the gradient
        let weights = gradient.mean_dim(3).mean_dim(2);
        let cam = (activation * weights).sum_dim(1);
        let [_, _, height, width] = cam.dims();

        let mut saliency = cam
            .reshape([height, width])
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| XrayError::Inference(format!("{e:?}")))?;
        relu_normalize(&mut saliency);

        debug!(
            class_idx,
            layer = %self.layer_name,
            map_height = height,
            map_width = width,
            "generated saliency map"
        );

        Ok(self.overlay(&saliency, width as u32, height as u32, original))
    }

    /// Upscale the saliency map to the original size, colorize it and blend.
    fn overlay(
        &self,
        saliency: &[f32],
        map_width: u32,
        map_height: u32,
        original: &RawImage,
    ) -> RgbImage {
        let (orig_w, orig_h) = original.dimensions();

        let map: ImageBuffer<Luma<f32>, Vec<f32>> =
            ImageBuffer::from_raw(map_width, map_height, saliency.to_vec())
                .unwrap_or_else(|| ImageBuffer::new(map_width, map_height));
        let upscaled = imageops::resize(&map, orig_w, orig_h, imageops::FilterType::Triangle);

        let base = original.to_rgb8();
        let alpha = self.alpha;
        RgbImage::from_fn(orig_w, orig_h, |x, y| {
            let heat = colormap::jet(upscaled.get_pixel(x, y)[0]);
            let orig = base.get_pixel(x, y);
            Rgb([
                blend(orig[0], heat[0], alpha),
                blend(orig[1], heat[1], alpha),
                blend(orig[2], heat[2], alpha),
            ])
        })
    }
}

/// Clamp negative saliency to zero and normalize by the peak.
///
/// A degenerate all-zero map stays all-zero; the division is skipped rather
/// than failing.
fn relu_normalize(values: &mut [f32]) {
    let mut max = 0.0f32;
    for v in values.iter_mut() {
        if *v < 0.0 {
            *v = 0.0;
        } else if *v > max {
            max = *v;
        }
    }
    if max > 0.0 {
        for v in values.iter_mut() {
            *v /= max;
        }
    }
}

fn blend(original: u8, heat: u8, alpha: f32) -> u8 {
    (original as f32 * (1.0 - alpha) + heat as f32 * alpha)
        .round()
        .clamp(0.0, 255.0) as u8
}
