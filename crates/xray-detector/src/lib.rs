//! Facade over the chest X-ray detection pipeline.
//!
//! `PneumoniaDetector` composes decoder, preprocessor, classifier and
//! Grad-CAM engine behind a single synchronous call: one image in, one
//! `(label, probability, heatmap)` out. The classifier is loaded once at
//! construction and reused for every request; absence of the weights file
//! is a startup failure, not a per-request one.
//!
//! Single-threaded, request-per-call. Callers that want concurrent
//! requests wrap the detector in their own mutual exclusion; gradient
//! state inside a request is not shared.

use std::path::{Path, PathBuf};

use image::RgbImage;
use ndarray::ArrayD;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use xray_common::{PneumoniaClass, RawImage, Result};
use xray_gradcam::{GradCam, GradCamConfig};
use xray_model::backend::Autodiff;
use xray_model::{XrayClassifier, XrayCnnConfig, DEFAULT_MODEL_FILE};
use xray_preprocess::{PreprocessConfig, XRayPreprocessor};
use xray_reader::{reader_for, ImageFormat};

pub use xray_common::XrayError;

/// Detector configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Directory the model checkpoint is discovered in.
    pub models_dir: PathBuf,
    /// Checkpoint filename inside `models_dir`.
    pub model_file: String,
    /// Network architecture parameters.
    pub model: XrayCnnConfig,
    /// Preprocessing parameters. The target size always follows the
    /// model's input size.
    pub preprocess: PreprocessConfig,
    /// Grad-CAM parameters.
    pub grad_cam: GradCamConfig,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            models_dir: PathBuf::from("models"),
            model_file: DEFAULT_MODEL_FILE.to_string(),
            model: XrayCnnConfig::default(),
            preprocess: PreprocessConfig::default(),
            grad_cam: GradCamConfig::default(),
        }
    }
}

/// Result of one detection request.
#[derive(Debug, Clone)]
pub struct Detection {
    /// Predicted category.
    pub label: PneumoniaClass,
    /// Confidence of the predicted category, percent in [0, 100].
    pub probability: f32,
    /// Jet-colored Grad-CAM overlay, RGB, same size as the input image.
    pub heatmap: RgbImage,
}

/// The pneumonia detection service.
pub struct PneumoniaDetector {
    classifier: XrayClassifier<Autodiff>,
    preprocessor: XRayPreprocessor,
    grad_cam: GradCam,
}

impl PneumoniaDetector {
    /// Build a detector with default configuration, loading the checkpoint
    /// from `models_dir`.
    pub fn new(models_dir: impl AsRef<Path>) -> Result<Self> {
        let config = DetectorConfig {
            models_dir: models_dir.as_ref().to_path_buf(),
            ..Default::default()
        };
        Self::with_config(config)
    }

    /// Build a detector from an explicit configuration.
    pub fn with_config(config: DetectorConfig) -> Result<Self> {
        let classifier = XrayClassifier::load(
            &config.models_dir,
            &config.model_file,
            config.model.clone(),
            Default::default(),
        )?;
        Self::from_classifier(classifier, config)
    }

    /// Build a detector around an already constructed classifier.
    ///
    /// Used by tests and callers that manage checkpoints themselves. The
    /// Grad-CAM target layer is validated here, at startup.
    pub fn from_classifier(
        classifier: XrayClassifier<Autodiff>,
        config: DetectorConfig,
    ) -> Result<Self> {
        let preprocess = config
            .preprocess
            .with_target_size(classifier.config().input_size as u32);
        let preprocessor = XRayPreprocessor::new(preprocess);
        let grad_cam = GradCam::new(&classifier, config.grad_cam)?;

        info!(
            layer = grad_cam.layer_name(),
            input_size = classifier.config().input_size,
            "pneumonia detector ready"
        );

        Ok(Self {
            classifier,
            preprocessor,
            grad_cam,
        })
    }

    /// Process an image file, inferring the format from its extension.
    pub fn process_path(&self, path: impl AsRef<Path>) -> Result<Detection> {
        let path = path.as_ref();
        let format = ImageFormat::from_path(path)?;
        let decoded = reader_for(format).read(path)?;
        debug!(path = %path.display(), ?format, "decoded image for detection");
        self.process_image(&decoded.raw)
    }

    /// Process an already decoded pixel array.
    pub fn process_array(&self, array: &ArrayD<u8>) -> Result<Detection> {
        let image = RawImage::from_array(array)?;
        self.process_image(&image)
    }

    /// Process a decoded image: preprocess, classify, explain.
    pub fn process_image(&self, image: &RawImage) -> Result<Detection> {
        let processed = self.preprocessor.preprocess(image)?;

        let probabilities = self.classifier.classify(&processed)?;
        let (label, probability) = probabilities.prediction();

        let heatmap = self
            .grad_cam
            .generate(&self.classifier, &processed, image)?;

        info!(%label, probability, "classified X-ray image");
        Ok(Detection {
            label,
            probability,
            heatmap,
        })
    }

    pub fn classifier(&self) -> &XrayClassifier<Autodiff> {
        &self.classifier
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DetectorConfig::default();
        assert_eq!(config.models_dir, PathBuf::from("models"));
        assert_eq!(config.model_file, DEFAULT_MODEL_FILE);
        assert_eq!(config.grad_cam.layer_name, "conv10");
        assert_eq!(config.grad_cam.alpha, 0.5);
    }

    #[test]
    fn test_missing_weights_is_startup_failure() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            PneumoniaDetector::new(dir.path()),
            Err(XrayError::ModelNotFound(_))
        ));
    }
}
