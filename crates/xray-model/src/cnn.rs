//! Convolutional classifier for chest X-ray images.
//!
//! Ten 3x3 convolutional layers (`conv1` .. `conv10`) with ReLU and a max
//! pool after every second layer, followed by global average pooling and a
//! small MLP head producing three logits. This is the "conv-MLP"
//! architecture family the shipped checkpoints were trained as.
//!
//! The layer names form a closed registry; the Grad-CAM engine taps one of
//! them by name during the forward pass.

use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{
    AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig,
};
use burn::nn::{Linear, LinearConfig, PaddingConfig2d, Relu};
use burn::prelude::*;
use burn::tensor::activation::softmax;
use serde::{Deserialize, Serialize};

use xray_common::NUM_CLASSES;

/// Named convolutional layers, in forward order.
pub const LAYER_NAMES: [&str; 10] = [
    "conv1", "conv2", "conv3", "conv4", "conv5", "conv6", "conv7", "conv8", "conv9", "conv10",
];

/// Default Grad-CAM target: the last convolutional layer before the head.
pub const LAST_CONV_LAYER: &str = "conv10";

/// Configuration for the X-ray CNN.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XrayCnnConfig {
    /// Input spatial size; the model expects (1, size, size, 1) tensors.
    pub input_size: usize,
    /// Number of output classes.
    pub n_classes: usize,
    /// Channel widths, one per two-conv stage.
    pub stage_widths: [usize; 5],
    /// Hidden width of the MLP head.
    pub hidden_size: usize,
}

impl Default for XrayCnnConfig {
    fn default() -> Self {
        Self {
            input_size: 512,
            n_classes: NUM_CLASSES,
            stage_widths: [32, 48, 64, 80, 96],
            hidden_size: 64,
        }
    }
}

impl XrayCnnConfig {
    /// Override the input spatial size. The head is globally pooled, so a
    /// smaller size keeps the same parameter shapes.
    #[must_use]
    pub fn with_input_size(mut self, input_size: usize) -> Self {
        self.input_size = input_size;
        self
    }

    /// Initialize the model with random weights.
    pub fn init<B: Backend>(&self, device: &B::Device) -> XrayCnn<B> {
        XrayCnn::new(self.clone(), device)
    }
}

/// A single convolutional layer: Conv2d(3x3, same padding) -> ReLU.
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    conv: Conv2d<B>,
}

impl<B: Backend> ConvBlock<B> {
    fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        let conv = Conv2dConfig::new([in_channels, out_channels], [3, 3])
            .with_padding(PaddingConfig2d::Same)
            .init(device);
        Self { conv }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        Relu::new().forward(self.conv.forward(x))
    }
}

/// The X-ray classification network.
#[derive(Module, Debug)]
pub struct XrayCnn<B: Backend> {
    blocks: Vec<ConvBlock<B>>,
    pool: MaxPool2d,
    gap: AdaptiveAvgPool2d,
    fc1: Linear<B>,
    fc2: Linear<B>,
}

impl<B: Backend> XrayCnn<B> {
    /// Create a new model with random weights.
    pub fn new(config: XrayCnnConfig, device: &B::Device) -> Self {
        let mut blocks = Vec::with_capacity(LAYER_NAMES.len());
        let mut in_channels = 1;
        for &width in &config.stage_widths {
            blocks.push(ConvBlock::new(in_channels, width, device));
            blocks.push(ConvBlock::new(width, width, device));
            in_channels = width;
        }

        let pool = MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init();
        let gap = AdaptiveAvgPool2dConfig::new([1, 1]).init();
        let fc1 = LinearConfig::new(in_channels, config.hidden_size).init(device);
        let fc2 = LinearConfig::new(config.hidden_size, config.n_classes).init(device);

        Self {
            blocks,
            pool,
            gap,
            fc1,
            fc2,
        }
    }

    /// The closed, ordered set of named convolutional layers.
    pub fn layer_names(&self) -> Vec<String> {
        LAYER_NAMES.iter().map(|s| s.to_string()).collect()
    }

    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// * `x` - Input tensor of shape (batch, height, width, channels=1)
    ///
    /// # Returns
    ///
    /// Logits of shape (batch, n_classes).
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        // NHWC at the boundary, NCHW internally
        let mut x = x.permute([0, 3, 1, 2]);
        for (i, block) in self.blocks.iter().enumerate() {
            x = block.forward(x);
            if i % 2 == 1 {
                x = self.pool.forward(x);
            }
        }
        self.head(x)
    }

    /// Forward pass returning class probabilities.
    pub fn forward_probs(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.forward(x), 1)
    }

    /// Forward pass that taps the named layer's activation.
    ///
    /// The tapped activation is re-registered as an autodiff leaf and fed
    /// onward, so on an autodiff backend a later `backward()` on the logits
    /// yields the gradient of the class score with respect to exactly this
    /// activation, from this same pass.
    ///
    /// Returns `None` when the layer name is not in the registry.
    pub fn forward_with_tap(
        &self,
        x: Tensor<B, 4>,
        layer: &str,
    ) -> Option<(Tensor<B, 4>, Tensor<B, 2>)> {
        let mut x = x.permute([0, 3, 1, 2]);
        let mut tapped = None;
        for (i, block) in self.blocks.iter().enumerate() {
            x = block.forward(x);
            if LAYER_NAMES[i] == layer {
                let leaf = x.detach().require_grad();
                x = leaf.clone();
                tapped = Some(leaf);
            }
            if i % 2 == 1 {
                x = self.pool.forward(x);
            }
        }
        let tapped = tapped?;
        let logits = self.head(x);
        Some((tapped, logits))
    }

    fn head(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.gap.forward(x);
        let [batch, channels, _, _] = x.dims();
        let x = x.reshape([batch, channels]);
        let x = Relu::new().forward(self.fc1.forward(x));
        self.fc2.forward(x)
    }
}
