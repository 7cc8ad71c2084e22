//! Convolutional building blocks of the reference scorer.
//!
//! All blocks work on (B, C, H, W) tensors and are generic over the burn
//! backend, so the same definitions run for inference and under autodiff.

use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, Linear, LinearConfig, PaddingConfig2d};
use burn::tensor::activation::relu;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

/// Negative slope of the policy head's leaky ReLU.
pub const LEAKY_SLOPE: f64 = 0.01;

/// Kernel edge of every spatial convolution.
pub const KERNEL: usize = 3;

/// 3×3 convolution that keeps the spatial size.
pub fn same_conv<B: Backend>(channels: [usize; 2], device: &B::Device) -> Conv2d<B> {
    Conv2dConfig::new(channels, [KERNEL, KERNEL])
        .with_padding(PaddingConfig2d::Same)
        .init(device)
}

/// Unpadded 3×3 convolution; shrinks each spatial edge by two.
pub fn valid_conv<B: Backend>(channels: [usize; 2], device: &B::Device) -> Conv2d<B> {
    Conv2dConfig::new(channels, [KERNEL, KERNEL]).init(device)
}

/// Dense layers for the given widths, one per adjacent pair.
pub fn dense_stack<B: Backend>(widths: &[usize], device: &B::Device) -> Vec<Linear<B>> {
    widths
        .windows(2)
        .map(|w| LinearConfig::new(w[0], w[1]).init(device))
        .collect()
}

/// `[in, out]` channels of a convolution.
pub fn conv_channels<B: Backend>(conv: &Conv2d<B>) -> [usize; 2] {
    let [out, inputs, _, _] = conv.weight.dims();
    [inputs, out]
}

/// `[in, out]` features of a dense layer.
pub fn linear_features<B: Backend>(linear: &Linear<B>) -> [usize; 2] {
    linear.weight.dims()
}

/// Same-padded convolution followed by batch normalisation.
#[derive(Module, Debug)]
pub struct ConvNorm<B: Backend> {
    conv: Conv2d<B>,
    norm: BatchNorm<B, 2>,
}

impl<B: Backend> ConvNorm<B> {
    pub fn new(channels: [usize; 2], device: &B::Device) -> Self {
        ConvNorm {
            conv: same_conv(channels, device),
            norm: BatchNormConfig::new(channels[1]).init(device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.norm.forward(self.conv.forward(x))
    }

    /// `[in, out]` channels, or `None` when the norm width disagrees with
    /// the convolution.
    pub fn channels(&self) -> Option<[usize; 2]> {
        let [inputs, out] = conv_channels(&self.conv);
        let [features] = self.norm.gamma.dims();
        (features == out).then_some([inputs, out])
    }
}

/// Two conv-norm-ReLU stages with an identity skip connection.
#[derive(Module, Debug)]
pub struct ResidualBlock<B: Backend> {
    first: ConvNorm<B>,
    second: ConvNorm<B>,
}

impl<B: Backend> ResidualBlock<B> {
    pub fn new(channels: usize, device: &B::Device) -> Self {
        ResidualBlock {
            first: ConvNorm::new([channels, channels], device),
            second: ConvNorm::new([channels, channels], device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let y = relu(self.first.forward(x.clone()));
        let y = relu(self.second.forward(y));
        y + x
    }

    /// Width of the block, or `None` if its stages are not all square at
    /// the same width.
    pub fn channels(&self) -> Option<usize> {
        match (self.first.channels()?, self.second.channels()?) {
            ([a, b], [c, d]) if a == b && b == c && c == d => Some(a),
            _ => None,
        }
    }
}
