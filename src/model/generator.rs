use burn::{
    module::Module,
    prelude::*,
    tensor::activation::{relu, tanh},
};

use crate::model::layers::{
    ConvBlock, ConvBlockConfig, DeconvBlock, DeconvBlockConfig, ResnetBlock,
};

/// Encoder / residual transform / decoder generator mapping one image
/// domain onto the other. Output is in `[-1, 1]`.
#[derive(Module, Debug)]
pub struct CycleGenerator<B: Backend> {
    conv1: ConvBlock<B>,
    conv2: ConvBlock<B>,
    resnet_block: ResnetBlock<B>,
    deconv1: DeconvBlock<B>,
    deconv2: DeconvBlock<B>,
}
impl<B: Backend> CycleGenerator<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        // encode: [N, 3, S, S] -> [N, 2c, S/4, S/4]
        let output = relu(self.conv1.forward(input));
        let output = relu(self.conv2.forward(output));

        let output = relu(self.resnet_block.forward(output));

        // decode back to [N, 3, S, S]
        let output = relu(self.deconv1.forward(output));
        tanh(self.deconv2.forward(output))
    }
}

#[derive(Config, Debug)]
pub struct CycleGeneratorConfig {
    #[config(default = 64)]
    pub conv_dim: usize,
    #[config(default = false)]
    pub init_zero_weights: bool,
}
impl CycleGeneratorConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> CycleGenerator<B> {
        let conv_dim = self.conv_dim;

        let conv1 = ConvBlockConfig::new([3, conv_dim])
            .with_init_zero_weights(self.init_zero_weights)
            .init(device);
        let conv2 = ConvBlockConfig::new([conv_dim, conv_dim * 2])
            .with_init_zero_weights(self.init_zero_weights)
            .init(device);

        let resnet_block = ResnetBlock::new(conv_dim * 2, device);

        let deconv1 = DeconvBlockConfig::new([conv_dim * 2, conv_dim]).init(device);
        let deconv2 = DeconvBlockConfig::new([conv_dim, 3])
            .with_batch_norm(false)
            .init(device);

        CycleGenerator {
            conv1,
            conv2,
            resnet_block,
            deconv1,
            deconv2,
        }
    }
}
