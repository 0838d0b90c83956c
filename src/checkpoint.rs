use anyhow::{Context, Result};
use burn::{
    module::Module,
    prelude::*,
    record::{FullPrecisionSettings, NamedMpkFileRecorder, Record, Recorder},
};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::model::{
    discriminator::DcDiscriminatorRecord, generator::CycleGeneratorRecord, CycleGan,
};

const CHECKPOINT_PREFIX: &str = "ckpt_";
const CHECKPOINT_EXTENSION: &str = "mpk";

/// Parameters of all four networks plus the iteration they were saved at.
#[derive(Record)]
pub struct CheckpointRecord<B: Backend> {
    pub g_x_to_y: CycleGeneratorRecord<B>,
    pub g_y_to_x: CycleGeneratorRecord<B>,
    pub d_x: DcDiscriminatorRecord<B>,
    pub d_y: DcDiscriminatorRecord<B>,
    pub iteration: usize,
}

fn recorder() -> NamedMpkFileRecorder<FullPrecisionSettings> {
    NamedMpkFileRecorder::<FullPrecisionSettings>::new()
}

/// Checkpoint path for `iteration`, without the extension the recorder appends.
pub fn checkpoint_path<P: AsRef<Path>>(checkpoint_dir: P, iteration: usize) -> PathBuf {
    checkpoint_dir
        .as_ref()
        .join(format!("{CHECKPOINT_PREFIX}{iteration:06}"))
}

/// Saves the parameters of both generators and both discriminators.
pub fn checkpoint<B: Backend>(
    iteration: usize,
    model: &CycleGan<B>,
    checkpoint_dir: &Path,
) -> Result<PathBuf> {
    let path = checkpoint_path(checkpoint_dir, iteration);
    let model = model.clone();
    let record = CheckpointRecord {
        g_x_to_y: model.g_x_to_y.into_record(),
        g_y_to_x: model.g_y_to_x.into_record(),
        d_x: model.d_x.into_record(),
        d_y: model.d_y.into_record(),
        iteration,
    };

    recorder()
        .record(record, path.clone())
        .with_context(|| format!("failed to save checkpoint {}", path.display()))?;

    let path = path.with_extension(CHECKPOINT_EXTENSION);
    tracing::info!("Saved checkpoint {}", path.display());
    Ok(path)
}

/// Restores parameters saved by [`checkpoint`] into `model`, returning it with
/// the iteration it was saved at.
pub fn load_checkpoint<B: Backend>(
    model: CycleGan<B>,
    path: &Path,
    device: &B::Device,
) -> Result<(CycleGan<B>, usize)> {
    let record: CheckpointRecord<B> = recorder()
        .load(path.to_path_buf(), device)
        .with_context(|| format!("failed to load checkpoint {}", path.display()))?;

    let model = CycleGan {
        g_x_to_y: model.g_x_to_y.load_record(record.g_x_to_y),
        g_y_to_x: model.g_y_to_x.load_record(record.g_y_to_x),
        d_x: model.d_x.load_record(record.d_x),
        d_y: model.d_y.load_record(record.d_y),
    };

    tracing::info!(
        "Loaded checkpoint {} (iteration {})",
        path.display(),
        record.iteration
    );
    Ok((model, record.iteration))
}

fn checkpoint_iteration(path: &Path) -> Option<usize> {
    if path.extension()?.to_str()? != CHECKPOINT_EXTENSION {
        return None;
    }
    path.file_stem()?
        .to_str()?
        .strip_prefix(CHECKPOINT_PREFIX)?
        .parse()
        .ok()
}

/// Finds the highest-iteration checkpoint directly inside `checkpoint_dir`.
pub fn latest_checkpoint<P: AsRef<Path>>(checkpoint_dir: P) -> Option<(PathBuf, usize)> {
    WalkDir::new(checkpoint_dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter_map(|entry| {
            let iteration = checkpoint_iteration(entry.path())?;
            Some((entry.into_path(), iteration))
        })
        .max_by_key(|(_, iteration)| *iteration)
}
