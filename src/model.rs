pub mod discriminator;
pub mod generator;
mod layers;

use burn::{module::Module, prelude::*};

use crate::model::{
    discriminator::{DcDiscriminator, DcDiscriminatorConfig},
    generator::{CycleGenerator, CycleGeneratorConfig},
};

/// Both translation directions and a discriminator per domain.
#[derive(Module, Debug)]
pub struct CycleGan<B: Backend> {
    pub g_x_to_y: CycleGenerator<B>,
    pub g_y_to_x: CycleGenerator<B>,
    pub d_x: DcDiscriminator<B>,
    pub d_y: DcDiscriminator<B>,
}

#[derive(Config, Debug)]
pub struct CycleGanConfig {
    #[config(default = 64)]
    pub g_conv_dim: usize,
    #[config(default = 64)]
    pub d_conv_dim: usize,
    #[config(default = false)]
    pub init_zero_weights: bool,
}
impl CycleGanConfig {
    pub fn generator_config(&self) -> CycleGeneratorConfig {
        CycleGeneratorConfig::new()
            .with_conv_dim(self.g_conv_dim)
            .with_init_zero_weights(self.init_zero_weights)
    }

    pub fn discriminator_config(&self) -> DcDiscriminatorConfig {
        DcDiscriminatorConfig::new().with_conv_dim(self.d_conv_dim)
    }
}

/// Builds the generators and discriminators.
pub fn create_model<B: Backend>(config: &CycleGanConfig, device: &B::Device) -> CycleGan<B> {
    let generator_config = config.generator_config();
    let discriminator_config = config.discriminator_config();

    let model = CycleGan {
        g_x_to_y: generator_config.init(device),
        g_y_to_x: generator_config.init(device),
        d_x: discriminator_config.init(device),
        d_y: discriminator_config.init(device),
    };

    tracing::info!(
        "Built CycleGAN: generators {} params each, discriminators {} params each",
        model.g_x_to_y.num_params(),
        model.d_x.num_params()
    );

    model
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_create_model_uses_configured_widths() {
        let device = Default::default();
        let small = CycleGanConfig::new().with_g_conv_dim(4).with_d_conv_dim(4);
        let wide = CycleGanConfig::new().with_g_conv_dim(8).with_d_conv_dim(4);

        let small = create_model::<TestBackend>(&small, &device);
        let wide = create_model::<TestBackend>(&wide, &device);

        assert_eq!(small.g_x_to_y.num_params(), small.g_y_to_x.num_params());
        assert_eq!(small.d_x.num_params(), small.d_y.num_params());
        assert!(wide.g_x_to_y.num_params() > small.g_x_to_y.num_params());
        assert_eq!(wide.d_x.num_params(), small.d_x.num_params());
    }

    #[test]
    fn test_config_round_trips_through_json() {
        let config = CycleGanConfig::new()
            .with_g_conv_dim(32)
            .with_init_zero_weights(true);

        let json = serde_json::to_string(&config).unwrap();
        let loaded: CycleGanConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(loaded.g_conv_dim, 32);
        assert_eq!(loaded.d_conv_dim, 64);
        assert!(loaded.init_zero_weights);
    }
}
