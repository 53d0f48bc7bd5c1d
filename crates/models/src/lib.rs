//! Burn modules for image-pair change classification.
//!
//! `SiameseClassifier` runs one shared convolutional tower over both images of a pair,
//! concatenates the two embeddings, and scores the pair with a dense head. The output is a
//! single logit per pair; `forward_probability` applies the sigmoid.
//!
//! These are pure Burn Modules with no knowledge of datasets or training loops. The
//! `training` crate wraps them behind its trainer interface.

use burn::module::Module;
use burn::nn;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig};
use burn::nn::PaddingConfig2d;
use burn::tensor::activation::{relu, sigmoid};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

#[derive(Debug, Clone)]
pub struct SiameseClassifierConfig {
    /// Output channels of each convolutional block; each block halves the resolution.
    pub channels: Vec<usize>,
    /// Width of the two hidden dense layers.
    pub hidden: usize,
}

impl Default for SiameseClassifierConfig {
    fn default() -> Self {
        Self {
            channels: vec![16, 32, 64],
            hidden: 128,
        }
    }
}

impl SiameseClassifierConfig {
    pub fn embedding_dim(&self) -> usize {
        self.channels.last().copied().unwrap_or(3)
    }

    /// Smallest input side that survives every pooling stage.
    pub fn min_side(&self) -> u32 {
        1u32 << self.channels.len()
    }
}

/// Two 3x3 convolutions followed by 2x2 max pooling.
#[derive(Debug, Module)]
pub struct ConvBlock<B: Backend> {
    conv_a: Conv2d<B>,
    conv_b: Conv2d<B>,
    pool: MaxPool2d,
}

impl<B: Backend> ConvBlock<B> {
    pub fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        let conv_a = Conv2dConfig::new([in_channels, out_channels], [3, 3])
            .with_padding(PaddingConfig2d::Same)
            .init(device);
        let conv_b = Conv2dConfig::new([out_channels, out_channels], [3, 3])
            .with_padding(PaddingConfig2d::Same)
            .init(device);
        let pool = MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init();
        Self {
            conv_a,
            conv_b,
            pool,
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = relu(self.conv_a.forward(input));
        let x = relu(self.conv_b.forward(x));
        self.pool.forward(x)
    }
}

#[derive(Debug, Module)]
pub struct SiameseClassifier<B: Backend> {
    tower: Vec<ConvBlock<B>>,
    pool: AdaptiveAvgPool2d,
    fc1: nn::Linear<B>,
    fc2: nn::Linear<B>,
    head: nn::Linear<B>,
}

impl<B: Backend> SiameseClassifier<B> {
    pub fn new(cfg: SiameseClassifierConfig, device: &B::Device) -> Self {
        let mut tower = Vec::with_capacity(cfg.channels.len());
        let mut in_channels = 3;
        for &out_channels in &cfg.channels {
            tower.push(ConvBlock::new(in_channels, out_channels, device));
            in_channels = out_channels;
        }
        let pool = AdaptiveAvgPool2dConfig::new([1, 1]).init();
        let fc1 = nn::LinearConfig::new(2 * cfg.embedding_dim(), cfg.hidden).init(device);
        let fc2 = nn::LinearConfig::new(cfg.hidden, cfg.hidden).init(device);
        let head = nn::LinearConfig::new(cfg.hidden, 1).init(device);
        Self {
            tower,
            pool,
            fc1,
            fc2,
            head,
        }
    }

    /// Shared tower: `[B, 3, H, W]` images to `[B, C]` embeddings.
    pub fn embed(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = images;
        for block in &self.tower {
            x = block.forward(x);
        }
        let x = self.pool.forward(x);
        let [batch, channels, _, _] = x.dims();
        x.reshape([batch, channels])
    }

    /// Pair logits with shape `[B, 1]`.
    pub fn forward(&self, first: Tensor<B, 4>, second: Tensor<B, 4>) -> Tensor<B, 2> {
        let a = self.embed(first);
        let b = self.embed(second);
        let x = Tensor::cat(vec![a, b], 1);
        let x = relu(self.fc1.forward(x));
        let x = relu(self.fc2.forward(x));
        self.head.forward(x)
    }

    /// Probability that the pair shows a change, shape `[B, 1]`.
    pub fn forward_probability(&self, first: Tensor<B, 4>, second: Tensor<B, 4>) -> Tensor<B, 2> {
        sigmoid(self.forward(first, second))
    }
}

pub mod prelude {
    pub use super::{ConvBlock, SiameseClassifier, SiameseClassifierConfig};
}
