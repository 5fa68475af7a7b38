use burn::module::Module;
use burn::nn;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig};
use burn::tensor::activation::relu;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

/// conv3x3 → relu → maxpool2x2, halving spatial size.
#[derive(Debug, Module)]
pub struct ConvBlock<B: Backend> {
    conv: Conv2d<B>,
    pool: MaxPool2d,
}

impl<B: Backend> ConvBlock<B> {
    pub fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        let conv = Conv2dConfig::new([in_channels, out_channels], [3, 3])
            .with_padding(nn::PaddingConfig2d::Explicit(1, 1))
            .init(device);
        let pool = MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init();
        Self { conv, pool }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.pool.forward(relu(self.conv.forward(x)))
    }
}

/// Feature extractor shared by every predictor head; maps [N, 3, H, W] to [N, hidden].
#[derive(Debug, Module)]
pub struct Backbone<B: Backend> {
    blocks: Vec<ConvBlock<B>>,
    pool: AdaptiveAvgPool2d,
    neck: nn::Linear<B>,
    out_channels: usize,
    pool_size: usize,
}

impl<B: Backend> Backbone<B> {
    pub fn new(channels: &[usize], pool_size: usize, hidden: usize, device: &B::Device) -> Self {
        let pool_size = pool_size.max(1);
        let mut blocks = Vec::with_capacity(channels.len());
        let mut in_channels = 3;
        for &out in channels {
            blocks.push(ConvBlock::new(in_channels, out, device));
            in_channels = out;
        }
        let pool = AdaptiveAvgPool2dConfig::new([pool_size, pool_size]).init();
        let neck =
            nn::LinearConfig::new(in_channels * pool_size * pool_size, hidden).init(device);
        Self {
            blocks,
            pool,
            neck,
            out_channels: in_channels,
            pool_size,
        }
    }

    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = images;
        for block in &self.blocks {
            x = block.forward(x);
        }
        let batch = x.dims()[0];
        let pooled = self.pool.forward(x).reshape([
            batch,
            self.out_channels * self.pool_size * self.pool_size,
        ]);
        relu(self.neck.forward(pooled))
    }
}
