//! Load-once classifier service around the X-ray CNN.

use std::path::Path;

use burn::prelude::*;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder, Recorder};
use ndarray::Array4;
use tracing::{debug, info};
use xray_common::{PneumoniaClass, Result, XrayError, NUM_CLASSES};

use crate::cnn::{XrayCnn, XrayCnnConfig, XrayCnnRecord};

/// Default checkpoint filename inside the models directory.
pub const DEFAULT_MODEL_FILE: &str = "conv_mlp_84.mpk";

/// Softmax output of one classification request.
///
/// Index mapping is fixed: 0 = bacterial, 1 = normal, 2 = viral.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassProbabilities {
    values: [f32; NUM_CLASSES],
}

impl ClassProbabilities {
    pub fn new(values: [f32; NUM_CLASSES]) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[f32; NUM_CLASSES] {
        &self.values
    }

    /// The predicted class and its probability as a percentage in [0, 100].
    pub fn prediction(&self) -> (PneumoniaClass, f32) {
        let mut best = 0;
        for i in 1..NUM_CLASSES {
            if self.values[i] > self.values[best] {
                best = i;
            }
        }
        let label = match best {
            0 => PneumoniaClass::Bacterial,
            1 => PneumoniaClass::Normal,
            _ => PneumoniaClass::Viral,
        };
        (label, self.values[best] * 100.0)
    }

    /// Index of the predicted class.
    pub fn argmax(&self) -> usize {
        let mut best = 0;
        for i in 1..NUM_CLASSES {
            if self.values[i] > self.values[best] {
                best = i;
            }
        }
        best
    }
}

/// Owns one loaded model for its lifetime (load-once, reuse-many).
///
/// Constructed explicitly and passed to consumers; there is no hidden
/// process-wide instance, which keeps initialization order and test
/// isolation clear.
pub struct XrayClassifier<B: Backend> {
    model: XrayCnn<B>,
    config: XrayCnnConfig,
    device: B::Device,
}

impl<B: Backend> XrayClassifier<B> {
    /// Build a classifier with freshly initialized weights. Intended for
    /// tests and for training pipelines that persist a checkpoint later.
    pub fn from_config(config: XrayCnnConfig, device: B::Device) -> Self {
        let model = config.init::<B>(&device);
        Self {
            model,
            config,
            device,
        }
    }

    /// Load the classifier from `<models_dir>/<model_file>`.
    ///
    /// Fails with [`XrayError::ModelNotFound`] when the checkpoint file is
    /// absent; this is meant to be a startup-time failure, not a
    /// per-request one.
    pub fn load(
        models_dir: &Path,
        model_file: &str,
        config: XrayCnnConfig,
        device: B::Device,
    ) -> Result<Self> {
        let path = models_dir.join(model_file);
        if !path.exists() {
            return Err(XrayError::ModelNotFound(path));
        }

        info!("Loading X-ray classifier from {}", path.display());
        let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
        let record: XrayCnnRecord<B> = recorder
            .load(path, &device)
            .map_err(|e| XrayError::Checkpoint(e.to_string()))?;
        let model = config.init::<B>(&device).load_record(record);
        info!("X-ray classifier loaded (input size: {})", config.input_size);

        Ok(Self {
            model,
            config,
            device,
        })
    }

    /// Persist the model weights as a named-MessagePack checkpoint.
    pub fn save(&self, path: &Path) -> Result<()> {
        let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
        recorder
            .record(self.model.clone().into_record(), path.to_path_buf())
            .map_err(|e| XrayError::Checkpoint(e.to_string()))?;
        Ok(())
    }

    /// Classify a preprocessed tensor of shape (1, S, S, 1).
    pub fn classify(&self, tensor: &Array4<f32>) -> Result<ClassProbabilities> {
        let input = self.to_tensor(tensor)?;
        let probs = self.model.forward_probs(input);
        let values = probs
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| XrayError::Inference(format!("{e:?}")))?;

        debug!(?values, "classified X-ray tensor");
        let mut out = [0.0f32; NUM_CLASSES];
        out.copy_from_slice(&values[..NUM_CLASSES]);
        Ok(ClassProbabilities::new(out))
    }

    /// Convert a preprocessed array into a backend tensor, validating the
    /// shape against the model's expected input.
    pub fn to_tensor(&self, tensor: &Array4<f32>) -> Result<Tensor<B, 4>> {
        let expected = [1, self.config.input_size, self.config.input_size, 1];
        if tensor.shape() != expected {
            return Err(XrayError::ShapeMismatch {
                expected,
                actual: tensor.shape().to_vec(),
            });
        }

        let data: Vec<f32> = tensor.iter().copied().collect();
        Ok(Tensor::from_data(
            TensorData::new(data, expected),
            &self.device,
        ))
    }

    pub fn model(&self) -> &XrayCnn<B> {
        &self.model
    }

    pub fn config(&self) -> &XrayCnnConfig {
        &self.config
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    pub fn layer_names(&self) -> Vec<String> {
        self.model.layer_names()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use ndarray::Array4;

    type TestBackend = NdArray;

    fn small_classifier() -> XrayClassifier<TestBackend> {
        let config = XrayCnnConfig::default().with_input_size(64);
        XrayClassifier::from_config(config, Default::default())
    }

    #[test]
    fn test_probabilities_sum_to_one() {
        let classifier = small_classifier();
        let tensor = Array4::<f32>::from_elem((1, 64, 64, 1), 0.5);

        let probs = classifier.classify(&tensor).unwrap();
        let sum: f32 = probs.values().iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_prediction_is_a_known_label() {
        let classifier = small_classifier();
        let tensor = Array4::<f32>::from_elem((1, 64, 64, 1), 0.25);

        let (label, probability) = classifier.classify(&tensor).unwrap().prediction();
        assert!(matches!(
            label,
            PneumoniaClass::Bacterial | PneumoniaClass::Normal | PneumoniaClass::Viral
        ));
        assert!((0.0..=100.0).contains(&probability));
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let classifier = small_classifier();
        let tensor = Array4::<f32>::zeros((1, 32, 32, 1));

        assert!(matches!(
            classifier.classify(&tensor),
            Err(XrayError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_missing_checkpoint_is_model_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let result = XrayClassifier::<TestBackend>::load(
            dir.path(),
            DEFAULT_MODEL_FILE,
            XrayCnnConfig::default(),
            Default::default(),
        );
        assert!(matches!(result, Err(XrayError::ModelNotFound(_))));
    }

    #[test]
    fn test_save_and_reload_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weights.mpk");

        let classifier = small_classifier();
        classifier.save(&path).unwrap();

        let reloaded = XrayClassifier::<TestBackend>::load(
            dir.path(),
            "weights.mpk",
            XrayCnnConfig::default().with_input_size(64),
            Default::default(),
        )
        .unwrap();

        let tensor = Array4::<f32>::from_elem((1, 64, 64, 1), 0.5);
        let a = classifier.classify(&tensor).unwrap();
        let b = reloaded.classify(&tensor).unwrap();
        assert_eq!(a.values(), b.values());
    }

    #[test]
    fn test_class_probabilities_prediction() {
        let probs = ClassProbabilities::new([0.1, 0.7, 0.2]);
        let (label, pct) = probs.prediction();
        assert_eq!(label, PneumoniaClass::Normal);
        assert!((pct - 70.0).abs() < 1e-4);
        assert_eq!(probs.argmax(), 1);
    }
}
