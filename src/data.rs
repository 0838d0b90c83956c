use anyhow::{ensure, Result};
use burn::{
    data::{dataloader::batcher::Batcher, dataset::Dataset},
    prelude::*,
    tensor::TensorData,
};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::utils::load_image;

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| matches!(ext.to_ascii_lowercase().as_str(), "jpg" | "jpeg" | "png"))
        .unwrap_or(false)
}

/// Recursively lists the image files under `root`, sorted by path.
pub fn image_files<P: AsRef<Path>>(root: P) -> Vec<PathBuf> {
    let mut files = WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .map(|entry| entry.into_path())
        .filter(|path| path.is_file() && is_image(path))
        .collect::<Vec<_>>();
    files.sort();
    files
}

// ////////////////////////////////////////////////////////////////////////////
// Dataset
/// Every image of one domain, decoded and resized up front.
#[derive(Debug, Clone)]
pub struct DomainDataset {
    pub image_size: usize,
    pub images: Vec<Vec<f32>>,
}

impl DomainDataset {
    pub fn new<P: AsRef<Path>>(root: P, image_size: usize) -> Result<Self> {
        let root = root.as_ref();

        let images = image_files(root)
            .iter()
            .map(|path| load_image(path, image_size as u32))
            .collect::<Result<Vec<_>>>()?;
        ensure!(!images.is_empty(), "no images found under {}", root.display());

        tracing::info!("Loaded {} images from {}", images.len(), root.display());
        Ok(Self { image_size, images })
    }
}

#[derive(Debug, Clone)]
pub struct DomainItem {
    /// `[3, size, size]` channel-major values in `[-1, 1]`.
    pub pixels: Vec<f32>,
    pub image_size: usize,
}

impl Dataset<DomainItem> for DomainDataset {
    fn get(&self, index: usize) -> Option<DomainItem> {
        let pixels = self.images.get(index)?;

        Some(DomainItem {
            pixels: pixels.clone(),
            image_size: self.image_size,
        })
    }

    fn len(&self) -> usize {
        self.images.len()
    }
}

// ////////////////////////////////////////////////////////////////////////////
// Batcher
#[derive(Debug, Clone)]
pub struct DomainBatch<B: Backend> {
    pub images: Tensor<B, 4>,
}

#[derive(Debug, Clone, Default)]
pub struct DomainBatcher {}
impl DomainBatcher {
    pub fn new() -> Self {
        Self {}
    }
}
impl<B: Backend> Batcher<B, DomainItem, DomainBatch<B>> for DomainBatcher {
    fn batch(&self, items: Vec<DomainItem>, device: &B::Device) -> DomainBatch<B> {
        let images = items
            .into_iter()
            .map(|item| {
                let shape = [3, item.image_size, item.image_size];
                Tensor::<B, 3>::from_data(TensorData::new(item.pixels, shape), device)
                    .unsqueeze_dim::<4>(0)
            })
            .collect::<Vec<_>>();

        DomainBatch {
            images: Tensor::cat(images, 0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use image::{Rgb, RgbImage};

    type TestBackend = NdArray<f32>;

    fn write_image(path: &Path, color: [u8; 3]) {
        RgbImage::from_pixel(12, 12, Rgb(color)).save(path).unwrap();
    }

    #[test]
    fn test_image_files_filters_and_recurses() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir(tmp.path().join("nested")).unwrap();
        write_image(&tmp.path().join("b.png"), [0, 0, 0]);
        write_image(&tmp.path().join("nested").join("a.PNG"), [0, 0, 0]);
        std::fs::write(tmp.path().join("notes.txt"), "not an image").unwrap();

        let files = image_files(tmp.path());

        assert_eq!(files.len(), 2);
        assert!(files.iter().all(|f| is_image(f)));
    }

    #[test]
    fn test_dataset_requires_images() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(DomainDataset::new(tmp.path(), 8).is_err());
    }

    #[test]
    fn test_batcher_stacks_items() {
        let tmp = tempfile::tempdir().unwrap();
        write_image(&tmp.path().join("black.png"), [0, 0, 0]);
        write_image(&tmp.path().join("white.png"), [255, 255, 255]);

        let dataset = DomainDataset::new(tmp.path(), 8).unwrap();
        assert_eq!(dataset.len(), 2);

        let items = (0..dataset.len())
            .filter_map(|i| dataset.get(i))
            .collect::<Vec<_>>();
        let batch: DomainBatch<TestBackend> =
            DomainBatcher::new().batch(items, &Default::default());

        assert_eq!(batch.images.dims(), [2, 3, 8, 8]);
        let values = batch.images.into_data().to_vec::<f32>().unwrap();
        // sorted by name: black first, then white
        assert!((values[0] + 1.0).abs() < 1e-6);
        assert!((values[values.len() - 1] - 1.0).abs() < 1e-6);
    }
}
