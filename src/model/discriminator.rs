use burn::{
    module::Module,
    prelude::*,
    tensor::activation::{relu, sigmoid},
};

use crate::model::layers::{ConvBlock, ConvBlockConfig};

/// DCGAN-style discriminator scoring how real an image looks, one
/// probability per batch item.
#[derive(Module, Debug)]
pub struct DcDiscriminator<B: Backend> {
    conv1: ConvBlock<B>,
    conv2: ConvBlock<B>,
    conv3: ConvBlock<B>,
    conv4: ConvBlock<B>,
}
impl<B: Backend> DcDiscriminator<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 1> {
        let output = relu(self.conv1.forward(input));
        let output = relu(self.conv2.forward(output));
        let output = relu(self.conv3.forward(output));

        // [N, 1, k, k]; k is 1 for 32x32 inputs
        let output = self.conv4.forward(output);
        let [batch_size, _, _, _] = output.dims();
        let output = output.flatten::<2>(1, 3).mean_dim(1).reshape([batch_size]);

        sigmoid(output)
    }
}

#[derive(Config, Debug)]
pub struct DcDiscriminatorConfig {
    #[config(default = 64)]
    pub conv_dim: usize,
}
impl DcDiscriminatorConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> DcDiscriminator<B> {
        let conv_dim = self.conv_dim;

        let conv1 = ConvBlockConfig::new([3, conv_dim]).init(device);
        let conv2 = ConvBlockConfig::new([conv_dim, conv_dim * 2]).init(device);
        let conv3 = ConvBlockConfig::new([conv_dim * 2, conv_dim * 4]).init(device);
        let conv4 = ConvBlockConfig::new([conv_dim * 4, 1])
            .with_stride(1)
            .with_padding(0)
            .with_batch_norm(false)
            .init(device);

        DcDiscriminator {
            conv1,
            conv2,
            conv3,
            conv4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::{backend::NdArray, tensor::Distribution};

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_discriminator_scores_each_item() {
        let device = Default::default();
        let discriminator = DcDiscriminatorConfig::new()
            .with_conv_dim(8)
            .init::<TestBackend>(&device);

        let input = Tensor::<TestBackend, 4>::random(
            [5, 3, 32, 32],
            Distribution::Uniform(-1.0, 1.0),
            &device,
        );
        let scores = discriminator.forward(input);
        assert_eq!(scores.dims(), [5]);

        let scores = scores.into_data().to_vec::<f32>().unwrap();
        assert!(scores.iter().all(|s| (0.0..=1.0).contains(s)));
    }

    #[test]
    fn test_discriminator_averages_larger_maps() {
        let device = Default::default();
        let discriminator = DcDiscriminatorConfig::new()
            .with_conv_dim(4)
            .init::<TestBackend>(&device);

        // 64x64 leaves a 5x5 map before averaging
        let input = Tensor::<TestBackend, 4>::zeros([2, 3, 64, 64], &device);
        assert_eq!(discriminator.forward(input).dims(), [2]);
    }
}
