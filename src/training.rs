use anyhow::{ensure, Context, Result};
use burn::{
    config::Config,
    data::{
        dataloader::{batcher::Batcher, DataLoader, DataLoaderBuilder, DataLoaderIterator},
        dataset::Dataset,
    },
    optim::{AdamConfig, GradientsParams, Optimizer},
    tensor::{
        backend::{AutodiffBackend, Backend},
        cast::ToElement,
        Tensor,
    },
};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::{
    checkpoint::{checkpoint, latest_checkpoint, load_checkpoint},
    data::{DomainBatch, DomainBatcher, DomainDataset},
    model::{
        create_model, discriminator::DcDiscriminator, generator::CycleGenerator, CycleGan,
        CycleGanConfig,
    },
    utils::{create_dir, save_samples},
    SEED,
};

// ////////////////////////////////////////////////////////////////////////////
// Losses
/// Least-squares loss pushing scores towards 1 ("real").
fn real_loss<B: Backend>(scores: Tensor<B, 1>) -> Tensor<B, 1> {
    scores.sub_scalar(1.0).powf_scalar(2.0).mean()
}

/// Least-squares loss pushing scores towards 0 ("fake").
fn fake_loss<B: Backend>(scores: Tensor<B, 1>) -> Tensor<B, 1> {
    scores.powf_scalar(2.0).mean()
}

fn cycle_loss<B: Backend>(original: Tensor<B, 4>, reconstructed: Tensor<B, 4>) -> Tensor<B, 1> {
    original.sub(reconstructed).abs().mean()
}

#[derive(Clone, Debug)]
pub struct DiscOutput<B: Backend> {
    pub real_loss: Tensor<B, 1>,
    pub fake_loss: Tensor<B, 1>,
    pub loss: Tensor<B, 1>,
}

#[derive(Clone, Debug)]
pub struct GenOutput<B: Backend> {
    pub loss: Tensor<B, 1>,
}

fn calc_disc_loss<B: Backend>(
    model: &CycleGan<B>,
    images_x: Tensor<B, 4>,
    images_y: Tensor<B, 4>,
) -> DiscOutput<B> {
    let real = real_loss(model.d_x.forward(images_x.clone()))
        + real_loss(model.d_y.forward(images_y.clone()));

    // generators are not trained by this loss
    let fake_x = model.g_y_to_x.forward(images_y).detach();
    let fake_y = model.g_x_to_y.forward(images_x).detach();
    let fake = fake_loss(model.d_x.forward(fake_x)) + fake_loss(model.d_y.forward(fake_y));

    DiscOutput {
        loss: real.clone() + fake.clone(),
        real_loss: real,
        fake_loss: fake,
    }
}

fn calc_gen_loss<B: Backend>(
    model: &CycleGan<B>,
    images_x: Tensor<B, 4>,
    images_y: Tensor<B, 4>,
    lambda_cycle: Option<f32>,
) -> GenOutput<B> {
    // Y -> X -> Y
    let fake_x = model.g_y_to_x.forward(images_y.clone());
    let mut loss = real_loss(model.d_x.forward(fake_x.clone()));
    if let Some(lambda) = lambda_cycle {
        let reconstructed_y = model.g_x_to_y.forward(fake_x);
        loss = loss + cycle_loss(images_y, reconstructed_y) * lambda;
    }

    // X -> Y -> X
    let fake_y = model.g_x_to_y.forward(images_x.clone());
    loss = loss + real_loss(model.d_y.forward(fake_y.clone()));
    if let Some(lambda) = lambda_cycle {
        let reconstructed_x = model.g_y_to_x.forward(fake_y);
        loss = loss + cycle_loss(images_x, reconstructed_x) * lambda;
    }

    GenOutput { loss }
}

// ////////////////////////////////////////////////////////////////////////////
// Training
#[derive(Config)]
pub struct TrainingConfig {
    pub model: CycleGanConfig,
    pub optimizer: AdamConfig,
    /// Image directory of domain X.
    pub x_dir: String,
    /// Image directory of domain Y.
    pub y_dir: String,
    pub checkpoint_dir: String,
    pub sample_dir: String,

    #[config(default = 32)]
    pub image_size: usize,
    #[config(default = 16)]
    pub batch_size: usize,
    #[config(default = 2)]
    pub num_workers: usize,
    #[config(default = 600)]
    pub train_iters: usize,
    #[config(default = 3e-4)]
    pub lr: f64,
    #[config(default = 10.0)]
    pub lambda_cycle: f32,
    #[config(default = true)]
    pub use_cycle_consistency_loss: bool,
    #[config(default = 10)]
    pub log_step: usize,
    #[config(default = 100)]
    pub sample_every: usize,
    #[config(default = 800)]
    pub checkpoint_every: usize,
    #[config(default = "SEED")]
    pub seed: u64,
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(self.batch_size > 0, "batch_size must be at least 1");
        ensure!(
            self.image_size >= 32 && self.image_size % 8 == 0,
            "image_size must be a multiple of 8 no smaller than 32, got {}",
            self.image_size
        );
        ensure!(
            self.log_step > 0 && self.sample_every > 0 && self.checkpoint_every > 0,
            "log_step, sample_every and checkpoint_every must be at least 1"
        );
        Ok(())
    }
}

/// Adam with the momentum terms commonly used for GANs.
pub fn default_optimizer() -> AdamConfig {
    AdamConfig::new().with_beta_1(0.5).with_beta_2(0.999)
}

type DomainLoader<B> = Arc<dyn DataLoader<B, DomainBatch<B>>>;

fn domain_loader<B: Backend>(
    root: &str,
    config: &TrainingConfig,
    device: &B::Device,
) -> Result<DomainLoader<B>> {
    let dataset = DomainDataset::new(root, config.image_size)?;

    let mut builder = DataLoaderBuilder::new(DomainBatcher::new())
        .batch_size(config.batch_size)
        .shuffle(config.seed)
        .set_device(device.clone());
    if config.num_workers > 0 {
        builder = builder.num_workers(config.num_workers);
    }

    Ok(builder.build(dataset))
}

// Restarts the loader once an epoch is exhausted.
fn next_images<'a, B: Backend>(
    loader: &'a DomainLoader<B>,
    iter: &mut Box<dyn DataLoaderIterator<DomainBatch<B>> + 'a>,
) -> Result<Tensor<B, 4>> {
    if let Some(batch) = iter.next() {
        return Ok(batch.images);
    }
    *iter = loader.iter();
    let batch = iter.next().context("data loader produced no batches")?;
    Ok(batch.images)
}

pub fn train<B: AutodiffBackend>(
    config: TrainingConfig,
    device: &B::Device,
    resume: bool,
) -> Result<CycleGan<B>> {
    config.validate()?;

    let checkpoint_dir = PathBuf::from(&config.checkpoint_dir);
    let sample_dir = PathBuf::from(&config.sample_dir);
    create_dir(&checkpoint_dir)?;
    create_dir(&sample_dir)?;

    let config_path = checkpoint_dir.join("config.json");
    config
        .save(&config_path)
        .with_context(|| format!("failed to write {}", config_path.display()))?;

    B::seed(config.seed);

    let mut model = create_model::<B>(&config.model, device);
    let mut start_iter = 1;
    if resume {
        match latest_checkpoint(&checkpoint_dir) {
            Some((path, _)) => {
                let (restored, iteration) = load_checkpoint(model, &path, device)?;
                model = restored;
                start_iter = iteration + 1;
                tracing::info!("Continuing from iteration {}", iteration);
            }
            None => {
                tracing::warn!(
                    "No checkpoint found in {}. Starting new session...",
                    checkpoint_dir.display()
                );
            }
        }
    }

    let loader_x = domain_loader::<B>(&config.x_dir, &config, device)?;
    let loader_y = domain_loader::<B>(&config.y_dir, &config, device)?;

    // fixed inputs so samples are comparable across iterations
    let fixed_x = loader_x.iter().next().context("domain X has no images")?.images;
    let fixed_y = loader_y.iter().next().context("domain Y has no images")?.images;

    let mut optim_g_x_to_y = config.optimizer.init::<B, CycleGenerator<B>>();
    let mut optim_g_y_to_x = config.optimizer.init::<B, CycleGenerator<B>>();
    let mut optim_d_x = config.optimizer.init::<B, DcDiscriminator<B>>();
    let mut optim_d_y = config.optimizer.init::<B, DcDiscriminator<B>>();

    let lambda_cycle = config
        .use_cycle_consistency_loss
        .then_some(config.lambda_cycle);

    let mut iter_x = loader_x.iter();
    let mut iter_y = loader_y.iter();
    let mut last_checkpoint = None;

    for iteration in start_iter..=config.train_iters {
        let images_x = next_images(&loader_x, &mut iter_x)?;
        let images_y = next_images(&loader_y, &mut iter_y)?;

        // train discriminators
        let disc_out = calc_disc_loss(&model, images_x.clone(), images_y.clone());
        let d_real_loss = disc_out.real_loss.into_scalar().to_f32();
        let d_fake_loss = disc_out.fake_loss.into_scalar().to_f32();

        let mut grads = disc_out.loss.backward();
        let grads_d_x = GradientsParams::from_module(&mut grads, &model.d_x);
        let grads_d_y = GradientsParams::from_module(&mut grads, &model.d_y);
        model.d_x = optim_d_x.step(config.lr, model.d_x, grads_d_x);
        model.d_y = optim_d_y.step(config.lr, model.d_y, grads_d_y);

        // train generators
        let gen_out = calc_gen_loss(&model, images_x, images_y, lambda_cycle);
        let g_loss = gen_out.loss.clone().into_scalar().to_f32();

        let mut grads = gen_out.loss.backward();
        let grads_g_x_to_y = GradientsParams::from_module(&mut grads, &model.g_x_to_y);
        let grads_g_y_to_x = GradientsParams::from_module(&mut grads, &model.g_y_to_x);
        model.g_x_to_y = optim_g_x_to_y.step(config.lr, model.g_x_to_y, grads_g_x_to_y);
        model.g_y_to_x = optim_g_y_to_x.step(config.lr, model.g_y_to_x, grads_g_y_to_x);

        if iteration % config.log_step == 0 {
            tracing::info!(
                "Iteration [{:5}/{:5}] | d_real_loss: {:6.4} | d_fake_loss: {:6.4} | g_loss: {:6.4}",
                iteration,
                config.train_iters,
                d_real_loss,
                d_fake_loss,
                g_loss
            );
        }

        if iteration % config.sample_every == 0 {
            save_samples(
                iteration,
                fixed_y.clone(),
                fixed_x.clone(),
                &model.g_y_to_x,
                &model.g_x_to_y,
                config.batch_size,
                &sample_dir,
            )?;
        }

        if iteration % config.checkpoint_every == 0 {
            checkpoint(iteration, &model, &checkpoint_dir)?;
            last_checkpoint = Some(iteration);
        }
    }

    if start_iter <= config.train_iters && last_checkpoint != Some(config.train_iters) {
        checkpoint(config.train_iters, &model, &checkpoint_dir)?;
    }

    tracing::info!("Training complete!");
    Ok(model)
}

/// Loads the first `batch_size` images of a domain as one batch.
pub fn fixed_batch<B: Backend>(
    root: &str,
    image_size: usize,
    batch_size: usize,
    device: &B::Device,
) -> Result<Tensor<B, 4>> {
    let dataset = DomainDataset::new(root, image_size)?;
    let items = (0..dataset.len().min(batch_size))
        .filter_map(|index| dataset.get(index))
        .collect::<Vec<_>>();

    let batch: DomainBatch<B> = DomainBatcher::new().batch(items, device);
    Ok(batch.images)
}

/// Writes the X->Y and Y->X sample grids produced by a saved checkpoint.
pub fn sample_checkpoint<B: Backend>(
    config: &TrainingConfig,
    checkpoint_path: &Path,
    out_dir: &Path,
    device: &B::Device,
) -> Result<(PathBuf, PathBuf)> {
    config.validate()?;
    create_dir(out_dir)?;

    let model = create_model::<B>(&config.model, device);
    let (model, iteration) = load_checkpoint(model, checkpoint_path, device)?;

    let fixed_x = fixed_batch::<B>(&config.x_dir, config.image_size, config.batch_size, device)?;
    let fixed_y = fixed_batch::<B>(&config.y_dir, config.image_size, config.batch_size, device)?;

    save_samples(
        iteration,
        fixed_y,
        fixed_x,
        &model.g_y_to_x,
        &model.g_x_to_y,
        config.batch_size,
        out_dir,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{checkpoint::checkpoint_path, utils::sample_path};
    use burn::backend::{Autodiff, NdArray};
    use image::{Rgb, RgbImage};

    type TestBackend = NdArray<f32>;
    type TestAutodiffBackend = Autodiff<TestBackend>;

    fn write_domain(root: &Path, color: [u8; 3], count: usize) {
        std::fs::create_dir_all(root).unwrap();
        for i in 0..count {
            let shade = (i * 40) as u8;
            RgbImage::from_pixel(32, 32, Rgb([color[0], color[1], shade.max(color[2])]))
                .save(root.join(format!("{i}.png")))
                .unwrap();
        }
    }

    fn tiny_config(root: &Path) -> TrainingConfig {
        write_domain(&root.join("x"), [200, 20, 0], 4);
        write_domain(&root.join("y"), [20, 200, 0], 4);

        TrainingConfig::new(
            CycleGanConfig::new().with_g_conv_dim(2).with_d_conv_dim(2),
            default_optimizer(),
            root.join("x").display().to_string(),
            root.join("y").display().to_string(),
            root.join("checkpoints").display().to_string(),
            root.join("samples").display().to_string(),
        )
        .with_batch_size(4)
        .with_num_workers(0)
        .with_train_iters(2)
        .with_log_step(1)
        .with_sample_every(1)
        .with_checkpoint_every(2)
    }

    #[test]
    fn test_least_squares_losses() {
        let device = Default::default();
        let ones = Tensor::<TestBackend, 1>::ones([4], &device);
        let zeros = Tensor::<TestBackend, 1>::zeros([4], &device);

        assert_eq!(real_loss(ones.clone()).into_scalar(), 0.0);
        assert_eq!(real_loss(zeros.clone()).into_scalar(), 1.0);
        assert_eq!(fake_loss(ones).into_scalar(), 1.0);
        assert_eq!(fake_loss(zeros).into_scalar(), 0.0);
    }

    #[test]
    fn test_cycle_loss_is_mean_absolute_error() {
        let device = Default::default();
        let original = Tensor::<TestBackend, 4>::ones([2, 3, 2, 2], &device);
        let reconstructed = Tensor::<TestBackend, 4>::full([2, 3, 2, 2], 0.5, &device);

        let loss = cycle_loss(original, reconstructed).into_scalar();
        assert!((loss - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_cycle_term_increases_generator_loss() {
        let device = Default::default();
        let model = create_model::<TestBackend>(
            &CycleGanConfig::new().with_g_conv_dim(2).with_d_conv_dim(2),
            &device,
        );
        let images_x = Tensor::<TestBackend, 4>::ones([2, 3, 32, 32], &device);
        let images_y = images_x.clone().neg();

        let without = calc_gen_loss(&model, images_x.clone(), images_y.clone(), None)
            .loss
            .into_scalar();
        let with = calc_gen_loss(&model, images_x, images_y, Some(10.0))
            .loss
            .into_scalar();

        assert!(with > without);
    }

    #[test]
    fn test_domain_loader_batches_on_requested_device() {
        let tmp = tempfile::tempdir().unwrap();
        let config = tiny_config(tmp.path());
        let device = burn::backend::ndarray::NdArrayDevice::Cpu;

        let loader = domain_loader::<TestBackend>(&config.x_dir, &config, &device).unwrap();
        let images = loader.iter().next().unwrap().images;

        assert_eq!(images.device(), device);
        assert_eq!(images.dims(), [4, 3, 32, 32]);
    }

    #[test]
    fn test_validate_rejects_bad_sizes() {
        let tmp = tempfile::tempdir().unwrap();
        let config = tiny_config(tmp.path());
        assert!(config.validate().is_ok());

        assert!(config.clone().with_batch_size(0).validate().is_err());
        assert!(config.clone().with_image_size(20).validate().is_err());
        assert!(config.with_image_size(24).validate().is_err());
    }

    #[test]
    fn test_train_writes_samples_and_checkpoints() {
        let tmp = tempfile::tempdir().unwrap();
        let config = tiny_config(tmp.path());
        let device = Default::default();

        train::<TestAutodiffBackend>(config.clone(), &device, false).unwrap();

        let samples = Path::new(&config.sample_dir);
        assert!(sample_path(samples, 1, "X-Y").exists());
        assert!(sample_path(samples, 2, "Y-X").exists());

        let checkpoints = Path::new(&config.checkpoint_dir);
        assert!(checkpoints.join("config.json").exists());
        assert!(checkpoint_path(checkpoints, 2).with_extension("mpk").exists());
    }

    #[test]
    fn test_train_resumes_from_latest_checkpoint() {
        let tmp = tempfile::tempdir().unwrap();
        let config = tiny_config(tmp.path());
        let device = Default::default();

        train::<TestAutodiffBackend>(config.clone(), &device, false).unwrap();
        let resumed = config.clone().with_train_iters(3).with_sample_every(100);
        train::<TestAutodiffBackend>(resumed, &device, true).unwrap();

        let checkpoints = Path::new(&config.checkpoint_dir);
        let (_, iteration) = latest_checkpoint(checkpoints).unwrap();
        assert_eq!(iteration, 3);
        // the resumed run starts at iteration 3, so no new early samples
        assert!(!sample_path(&config.sample_dir, 3, "X-Y").exists());
    }

    #[test]
    fn test_sample_checkpoint_uses_saved_iteration() {
        let tmp = tempfile::tempdir().unwrap();
        let config = tiny_config(tmp.path());
        let device = Default::default();

        let model = create_model::<TestBackend>(&config.model, &device);
        create_dir(tmp.path().join("ckpts")).unwrap();
        let path = checkpoint(7, &model, &tmp.path().join("ckpts")).unwrap();

        let out = tmp.path().join("out");
        let (x_to_y, y_to_x) =
            sample_checkpoint::<TestBackend>(&config, &path, &out, &device).unwrap();

        assert!(x_to_y.ends_with("sample-000007-X-Y.png"));
        assert!(y_to_x.exists());
    }
}
