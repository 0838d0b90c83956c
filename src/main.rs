#![recursion_limit = "256"]

use anyhow::{Context, Result};
use burn::{backend::Autodiff, config::Config};
use clap::{Args, Parser, Subcommand};
use cyclegan::{
    checkpoint::latest_checkpoint,
    model::CycleGanConfig,
    training::{default_optimizer, sample_checkpoint, train, TrainingConfig},
};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[cfg(not(feature = "ndarray"))]
type MyBackend = burn::backend::Wgpu<f32>;
#[cfg(feature = "ndarray")]
type MyBackend = burn::backend::NdArray<f32>;

type MyAutodiffBackend = Autodiff<MyBackend>;

#[derive(Parser, Debug)]
#[command(
    name = "cyclegan",
    version,
    about = "Train a CycleGAN between two unpaired image domains"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Train both generators and discriminators
    Train(TrainArgs),

    /// Write sample grids from a saved checkpoint
    Sample(SampleArgs),
}

#[derive(Args, Debug)]
struct TrainArgs {
    /// Load the training config from JSON; the config flags below cannot be combined with it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Images of domain X
    #[arg(long, default_value = "data/X", conflicts_with = "config")]
    x_dir: String,

    /// Images of domain Y
    #[arg(long, default_value = "data/Y", conflicts_with = "config")]
    y_dir: String,

    #[arg(long, default_value = "checkpoints_cyclegan", conflicts_with = "config")]
    checkpoint_dir: String,

    #[arg(long, default_value = "samples_cyclegan", conflicts_with = "config")]
    sample_dir: String,

    /// Side length images are resized to
    #[arg(long, default_value_t = 32, conflicts_with = "config")]
    image_size: usize,

    #[arg(long, default_value_t = 16, conflicts_with = "config")]
    batch_size: usize,

    #[arg(long, default_value_t = 600, conflicts_with = "config")]
    train_iters: usize,

    #[arg(long, default_value_t = 3e-4, conflicts_with = "config")]
    lr: f64,

    #[arg(long, default_value_t = 64, conflicts_with = "config")]
    g_conv_dim: usize,

    #[arg(long, default_value_t = 64, conflicts_with = "config")]
    d_conv_dim: usize,

    /// Start the generator encoders from near-zero weights
    #[arg(long, conflicts_with = "config")]
    init_zero_weights: bool,

    /// Weight of the cycle-consistency term
    #[arg(long, default_value_t = 10.0, conflicts_with = "config")]
    lambda_cycle: f32,

    /// Train with adversarial losses only
    #[arg(long, conflicts_with = "config")]
    no_cycle_consistency_loss: bool,

    /// Data loader worker threads; 0 loads batches on the training thread
    #[arg(long, default_value_t = 2, conflicts_with = "config")]
    num_workers: usize,

    /// Log losses every this many iterations
    #[arg(long, default_value_t = 10, conflicts_with = "config")]
    log_step: usize,

    #[arg(long, default_value_t = 100, conflicts_with = "config")]
    sample_every: usize,

    #[arg(long, default_value_t = 800, conflicts_with = "config")]
    checkpoint_every: usize,

    /// Continue from the latest checkpoint in the checkpoint directory
    #[arg(long)]
    resume: bool,
}

impl TrainArgs {
    fn into_config(self) -> Result<TrainingConfig> {
        if let Some(path) = &self.config {
            return TrainingConfig::load(path)
                .with_context(|| format!("failed to load config {}", path.display()));
        }

        let model = CycleGanConfig::new()
            .with_g_conv_dim(self.g_conv_dim)
            .with_d_conv_dim(self.d_conv_dim)
            .with_init_zero_weights(self.init_zero_weights);

        Ok(TrainingConfig::new(
            model,
            default_optimizer(),
            self.x_dir,
            self.y_dir,
            self.checkpoint_dir,
            self.sample_dir,
        )
        .with_image_size(self.image_size)
        .with_batch_size(self.batch_size)
        .with_train_iters(self.train_iters)
        .with_lr(self.lr)
        .with_num_workers(self.num_workers)
        .with_log_step(self.log_step)
        .with_lambda_cycle(self.lambda_cycle)
        .with_use_cycle_consistency_loss(!self.no_cycle_consistency_loss)
        .with_sample_every(self.sample_every)
        .with_checkpoint_every(self.checkpoint_every))
    }
}

#[derive(Args, Debug)]
struct SampleArgs {
    /// Config written by `train` into the checkpoint directory
    #[arg(long, default_value = "checkpoints_cyclegan/config.json")]
    config: PathBuf,

    /// Checkpoint file; defaults to the latest one in the config's checkpoint dir
    #[arg(long)]
    checkpoint: Option<PathBuf>,

    /// Override the config's domain X directory
    #[arg(long)]
    x_dir: Option<String>,

    /// Override the config's domain Y directory
    #[arg(long)]
    y_dir: Option<String>,

    #[arg(long, default_value = "samples_cyclegan")]
    out_dir: PathBuf,
}

fn run_train(args: TrainArgs) -> Result<()> {
    let resume = args.resume;
    let config = args.into_config()?;
    let device = Default::default();

    train::<MyAutodiffBackend>(config, &device, resume)?;
    Ok(())
}

fn run_sample(args: SampleArgs) -> Result<()> {
    let mut config = TrainingConfig::load(&args.config)
        .with_context(|| format!("failed to load config {}", args.config.display()))?;
    if let Some(x_dir) = args.x_dir {
        config.x_dir = x_dir;
    }
    if let Some(y_dir) = args.y_dir {
        config.y_dir = y_dir;
    }

    let checkpoint = match args.checkpoint {
        Some(path) => path,
        None => {
            latest_checkpoint(&config.checkpoint_dir)
                .with_context(|| format!("no checkpoint found in {}", config.checkpoint_dir))?
                .0
        }
    };

    let device = Default::default();
    sample_checkpoint::<MyBackend>(&config, &checkpoint, &args.out_dir, &device)?;
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("cyclegan=info".parse()?))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Train(args) => run_train(args),
        Commands::Sample(args) => run_sample(args),
    }
}
