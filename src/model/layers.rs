use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig},
        BatchNorm, BatchNormConfig, Initializer, PaddingConfig2d,
    },
    prelude::*,
};

/// Standard deviation of the small-normal weight init used when the
/// generator is asked for near-zero starting weights.
const ZERO_INIT_STD: f64 = 0.001;

#[derive(Config, Debug)]
pub struct ConvBlockConfig {
    pub channels: [usize; 2],
    #[config(default = 4)]
    pub kernel_size: usize,
    #[config(default = 2)]
    pub stride: usize,
    #[config(default = 1)]
    pub padding: usize,
    #[config(default = true)]
    pub batch_norm: bool,
    #[config(default = false)]
    pub init_zero_weights: bool,
}
impl ConvBlockConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> ConvBlock<B> {
        let mut conv = Conv2dConfig::new(self.channels, [self.kernel_size, self.kernel_size])
            .with_stride([self.stride, self.stride])
            .with_padding(PaddingConfig2d::Explicit(self.padding, self.padding))
            .with_bias(false);
        if self.init_zero_weights {
            conv = conv.with_initializer(Initializer::Normal {
                mean: 0.0,
                std: ZERO_INIT_STD,
            });
        }
        let bn = self
            .batch_norm
            .then(|| BatchNormConfig::new(self.channels[1]).init::<B, 2>(device));

        ConvBlock {
            conv: conv.init(device),
            bn,
        }
    }
}

/// Strided convolution, optionally followed by batch norm.
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    conv: Conv2d<B>,
    bn: Option<BatchNorm<B, 2>>,
}
impl<B: Backend> ConvBlock<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let output = self.conv.forward(input);
        match &self.bn {
            Some(bn) => bn.forward(output),
            None => output,
        }
    }
}

#[derive(Config, Debug)]
pub struct DeconvBlockConfig {
    pub channels: [usize; 2],
    #[config(default = 4)]
    pub kernel_size: usize,
    #[config(default = 2)]
    pub stride: usize,
    #[config(default = 1)]
    pub padding: usize,
    #[config(default = true)]
    pub batch_norm: bool,
}
impl DeconvBlockConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> DeconvBlock<B> {
        let deconv =
            ConvTranspose2dConfig::new(self.channels, [self.kernel_size, self.kernel_size])
                .with_stride([self.stride, self.stride])
                .with_padding([self.padding, self.padding])
                .with_bias(false)
                .init(device);
        let bn = self
            .batch_norm
            .then(|| BatchNormConfig::new(self.channels[1]).init::<B, 2>(device));

        DeconvBlock { deconv, bn }
    }
}

/// Transposed convolution (upsampling), optionally followed by batch norm.
#[derive(Module, Debug)]
pub struct DeconvBlock<B: Backend> {
    deconv: ConvTranspose2d<B>,
    bn: Option<BatchNorm<B, 2>>,
}
impl<B: Backend> DeconvBlock<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let output = self.deconv.forward(input);
        match &self.bn {
            Some(bn) => bn.forward(output),
            None => output,
        }
    }
}

/// `x + conv(x)` with a shape-preserving 3x3 convolution.
#[derive(Module, Debug)]
pub struct ResnetBlock<B: Backend> {
    conv: ConvBlock<B>,
}
impl<B: Backend> ResnetBlock<B> {
    pub fn new(channels: usize, device: &B::Device) -> Self {
        let conv = ConvBlockConfig::new([channels, channels])
            .with_kernel_size(3)
            .with_stride(1)
            .with_padding(1)
            .init(device);

        Self { conv }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let output = self.conv.forward(input.clone());

        input.add(output)
    }
}
