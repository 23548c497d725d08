//! Inference wrapper for the pre-trained chest X-ray classifier.
//!
//! Holds one loaded model per [`XrayClassifier`] instance (load-once,
//! reuse-many), exposes class probabilities for a preprocessed tensor, and
//! gives the explanation engine a named-layer tap into the forward pass.
//!
//! Backend is burn's NdArray CPU backend; the [`backend::Autodiff`] alias
//! wraps it for the gradient passes Grad-CAM needs.

mod classifier;
mod cnn;

pub use classifier::{ClassProbabilities, XrayClassifier, DEFAULT_MODEL_FILE};
pub use cnn::{ConvBlock, XrayCnn, XrayCnnConfig, XrayCnnRecord, LAST_CONV_LAYER, LAYER_NAMES};

/// Concrete backends used by the workspace.
pub mod backend {
    /// Plain CPU inference backend.
    pub type NdArray = burn::backend::NdArray;
    /// Autodiff-wrapped CPU backend for gradient computation.
    pub type Autodiff = burn::backend::Autodiff<NdArray>;
}
