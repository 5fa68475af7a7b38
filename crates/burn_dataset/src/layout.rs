//! Indexing and loading of `<root>/<images>` + `<root>/<masks>` datasets.

use crate::masks::{crop_mask, decode_instances};
use crate::types::{
    BurnDatasetError, DatasetLayout, DatasetResult, DatasetSample, DatasetSummary, LoaderConfig,
    SampleIndex,
};
use data_contracts::InstanceTarget;
use image::imageops::FilterType;
use std::fs;
use std::path::{Path, PathBuf};

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

fn list_images(dir: &Path) -> DatasetResult<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(|e| BurnDatasetError::Io {
        path: dir.to_path_buf(),
        source: e,
    })?;
    let mut paths: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|p| {
            p.extension()
                .and_then(|s| s.to_str())
                .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                .unwrap_or(false)
        })
        .collect();
    paths.sort();
    Ok(paths)
}

/// Pair sorted images with sorted masks by position.
pub fn index_dataset(layout: &DatasetLayout) -> DatasetResult<Vec<SampleIndex>> {
    let images = list_images(&layout.images_dir())?;
    let masks = list_images(&layout.masks_dir())?;
    if images.len() != masks.len() {
        return Err(BurnDatasetError::PairMismatch {
            images: images.len(),
            masks: masks.len(),
        });
    }
    Ok(images
        .into_iter()
        .zip(masks)
        .enumerate()
        .map(|(i, (image_path, mask_path))| SampleIndex {
            image_id: i as u64,
            image_path,
            mask_path,
        })
        .collect())
}

fn open_rgb(path: &Path) -> DatasetResult<image::RgbImage> {
    Ok(image::open(path)
        .map_err(|e| BurnDatasetError::Image {
            path: path.to_path_buf(),
            source: e,
        })?
        .to_rgb8())
}

/// Planar CHW floats in [0, 1].
pub fn rgb_to_chw(img: &image::RgbImage) -> Vec<f32> {
    let plane = (img.width() * img.height()) as usize;
    let mut chw = vec![0.0f32; plane * 3];
    for (i, p) in img.pixels().enumerate() {
        for c in 0..3 {
            chw[c * plane + i] = p[c] as f32 / 255.0;
        }
    }
    chw
}

/// Decode an image/mask pair into a training sample.
pub fn load_sample(idx: &SampleIndex, cfg: &LoaderConfig) -> DatasetResult<DatasetSample> {
    let mut img = open_rgb(&idx.image_path)?;
    if !idx.mask_path.exists() {
        return Err(BurnDatasetError::Io {
            path: idx.mask_path.clone(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "mask file missing"),
        });
    }
    let mut mask = image::open(&idx.mask_path).map_err(|e| BurnDatasetError::Image {
        path: idx.mask_path.clone(),
        source: e,
    })?;
    if img.dimensions() != (mask.width(), mask.height()) {
        return Err(BurnDatasetError::SizeMismatch {
            image: idx.image_path.clone(),
            mask: idx.mask_path.clone(),
            image_w: img.width(),
            image_h: img.height(),
            mask_w: mask.width(),
            mask_h: mask.height(),
        });
    }
    if let Some((w, h)) = cfg.target_size {
        if img.dimensions() != (w, h) {
            img = image::imageops::resize(&img, w, h, FilterType::Triangle);
            mask = mask.resize_exact(w, h, FilterType::Nearest);
        }
    }
    let (width, height) = img.dimensions();

    let mut instances = decode_instances(&mask);
    instances.truncate(cfg.max_boxes.max(1));

    let mut boxes_px = Vec::with_capacity(instances.len());
    let mut mask_crops = Vec::with_capacity(instances.len());
    for inst in &instances {
        let [x0, y0, x1, y1] = inst.bbox_px;
        boxes_px.push([x0 as f32, y0 as f32, x1 as f32, y1 as f32]);
        mask_crops.push(crop_mask(inst, width, cfg.mask_size));
    }
    let target = InstanceTarget {
        image_id: idx.image_id,
        labels: instances.iter().map(|i| cfg.label_for(i.key)).collect(),
        areas: instances.iter().map(|i| i.area as f32).collect(),
        iscrowd: vec![false; boxes_px.len()],
        boxes_px,
        width,
        height,
    };
    target
        .validate()
        .map_err(|source| BurnDatasetError::Validation {
            path: idx.mask_path.clone(),
            source,
        })?;

    Ok(DatasetSample {
        image_id: idx.image_id,
        image_chw: rgb_to_chw(&img),
        width,
        height,
        boxes: target.normalized_boxes(),
        labels: target.labels.clone(),
        mask_crops,
        target,
    })
}

/// Eagerly load every indexed sample. Prefer `BatchIter` beyond toy sizes.
pub fn load_dataset(indices: &[SampleIndex], cfg: &LoaderConfig) -> DatasetResult<Vec<DatasetSample>> {
    indices.iter().map(|idx| load_sample(idx, cfg)).collect()
}

/// Count usable, empty, missing, and undecodable pairs without building tensors.
pub fn summarize_dataset(indices: &[SampleIndex]) -> DatasetSummary {
    let mut summary = DatasetSummary::default();
    for idx in indices {
        if !idx.mask_path.exists() || !idx.image_path.exists() {
            summary.missing_mask += 1;
            continue;
        }
        let decoded = image::open(&idx.mask_path)
            .ok()
            .map(|m| decode_instances(&m));
        match decoded {
            None => summary.invalid += 1,
            Some(instances) => {
                summary.total += 1;
                summary.instances += instances.len();
                if instances.is_empty() {
                    summary.empty += 1;
                } else {
                    summary.non_empty += 1;
                }
            }
        }
    }
    summary
}
