use anyhow::{ensure, Context, Result};
use burn::prelude::*;
use image::{imageops::FilterType, Rgb, RgbImage};
use std::path::{Path, PathBuf};

use crate::model::generator::CycleGenerator;

/// Creates a directory (and any missing parents) if it does not already exist.
pub fn create_dir<P: AsRef<Path>>(directory: P) -> Result<()> {
    let directory = directory.as_ref();
    if !directory.exists() {
        std::fs::create_dir_all(directory)
            .with_context(|| format!("failed to create directory {}", directory.display()))?;
        tracing::debug!("Created directory {}", directory.display());
    }
    Ok(())
}

/// Loads an image as a `[3, size, size]` channel-major buffer scaled to `[-1, 1]`.
pub fn load_image<P: AsRef<Path>>(path: P, size: u32) -> Result<Vec<f32>> {
    let path = path.as_ref();
    let image = image::open(path)
        .with_context(|| format!("failed to read image {}", path.display()))?
        .resize_exact(size, size, FilterType::Triangle)
        .to_rgb8();

    let plane = (size * size) as usize;
    let mut pixels = vec![0.0; 3 * plane];
    for (x, y, pixel) in image.enumerate_pixels() {
        let offset = (y * size + x) as usize;
        for channel in 0..3 {
            pixels[channel * plane + offset] = pixel[channel] as f32 / 127.5 - 1.0;
        }
    }

    Ok(pixels)
}

/// Maps a `[-1, 1]` activation onto an 8-bit intensity.
fn to_pixel(value: f32) -> u8 {
    ((value + 1.0) * 127.5).round().clamp(0.0, 255.0) as u8
}

fn tensor_values<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<Vec<f32>> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|err| anyhow::anyhow!("failed to read tensor data: {err:?}"))
}

// Copies one channel-major image into `grid` with its top-left corner at (left, top).
fn paste(grid: &mut RgbImage, image: &[f32], height: usize, width: usize, left: usize, top: usize) {
    let plane = height * width;
    for y in 0..height {
        for x in 0..width {
            let offset = y * width + x;
            let pixel = Rgb([
                to_pixel(image[offset]),
                to_pixel(image[plane + offset]),
                to_pixel(image[2 * plane + offset]),
            ]);
            grid.put_pixel((left + x) as u32, (top + y) as u32, pixel);
        }
    }
}

/// Creates a grid consisting of pairs of columns, where the first column in
/// each pair holds source images and the second holds the images generated
/// from them.
///
/// The grid is `floor(sqrt(batch_size))` pairs wide and tall. Pairs that do
/// not fit are dropped and unused cells stay black.
pub fn merge_images<B: Backend>(
    sources: Tensor<B, 4>,
    targets: Tensor<B, 4>,
    batch_size: usize,
) -> Result<RgbImage> {
    let [count, channels, height, width] = sources.dims();
    ensure!(
        sources.dims() == targets.dims(),
        "source and target batches differ in shape: {:?} vs {:?}",
        sources.dims(),
        targets.dims()
    );
    ensure!(channels == 3, "expected RGB images, got {channels} channels");

    let row = (batch_size as f64).sqrt().floor() as usize;
    ensure!(row > 0, "batch size must be at least 1");

    let sources = tensor_values(sources)?;
    let targets = tensor_values(targets)?;
    let image_len = channels * height * width;

    let mut merged = RgbImage::new((row * width * 2) as u32, (row * height) as u32);
    for idx in 0..count.min(row * row) {
        let i = idx / row;
        let j = idx % row;
        let range = idx * image_len..(idx + 1) * image_len;

        paste(&mut merged, &sources[range.clone()], height, width, j * 2 * width, i * height);
        paste(&mut merged, &targets[range], height, width, (j * 2 + 1) * width, i * height);
    }

    Ok(merged)
}

/// Path of the sample grid for `iteration`; `direction` is `"X-Y"` or `"Y-X"`.
pub fn sample_path<P: AsRef<Path>>(sample_dir: P, iteration: usize, direction: &str) -> PathBuf {
    sample_dir
        .as_ref()
        .join(format!("sample-{iteration:06}-{direction}.png"))
}

/// Saves samples from both generators X->Y and Y->X, returning the paths written.
pub fn save_samples<B: Backend>(
    iteration: usize,
    fixed_y: Tensor<B, 4>,
    fixed_x: Tensor<B, 4>,
    g_y_to_x: &CycleGenerator<B>,
    g_x_to_y: &CycleGenerator<B>,
    batch_size: usize,
    sample_dir: &Path,
) -> Result<(PathBuf, PathBuf)> {
    let fake_x = g_y_to_x.forward(fixed_y.clone()).detach();
    let fake_y = g_x_to_y.forward(fixed_x.clone()).detach();

    let merged = merge_images(fixed_x, fake_y, batch_size)?;
    let x_to_y = sample_path(sample_dir, iteration, "X-Y");
    merged
        .save(&x_to_y)
        .with_context(|| format!("failed to write {}", x_to_y.display()))?;
    tracing::info!("Saved {}", x_to_y.display());

    let merged = merge_images(fixed_y, fake_x, batch_size)?;
    let y_to_x = sample_path(sample_dir, iteration, "Y-X");
    merged
        .save(&y_to_x)
        .with_context(|| format!("failed to write {}", y_to_x.display()))?;
    tracing::info!("Saved {}", y_to_x.display());

    Ok((x_to_y, y_to_x))
}
