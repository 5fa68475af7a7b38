//! Batch iteration for training and evaluation.

use crate::layout::load_sample;
use crate::types::{BurnDatasetError, DatasetResult, DatasetSample, LoaderConfig, SampleIndex};
use burn::tensor::{backend::Backend, Tensor, TensorData};
use rand::{seq::SliceRandom, SeedableRng};
use rayon::prelude::*;
use std::time::{Duration, Instant};

/// Padded instance batch. `K` is `max_boxes`, `M` is `mask_size`.
#[derive(Debug, Clone)]
pub struct DetectionBatch<B: Backend> {
    /// [N, 3, H, W] in 0..1.
    pub images: Tensor<B, 4>,
    /// [N, K, 4] normalized xyxy.
    pub boxes: Tensor<B, 3>,
    /// [N, K]; 1.0 where a box slot is populated.
    pub box_mask: Tensor<B, 2>,
    /// [N, K]; class id as float, 0 for padding.
    pub labels: Tensor<B, 2>,
    /// [N, K, M, M] binary mask crops.
    pub masks: Tensor<B, 4>,
    /// [N]
    pub image_ids: Tensor<B, 1>,
}

impl<B: Backend> DetectionBatch<B> {
    pub fn len(&self) -> usize {
        self.images.dims()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Assemble already-loaded samples into one padded batch.
pub fn collate<B: Backend>(
    samples: &[DatasetSample],
    max_boxes: usize,
    mask_size: usize,
    device: &B::Device,
) -> DatasetResult<DetectionBatch<B>> {
    let Some(first) = samples.first() else {
        return Err(BurnDatasetError::Other("cannot collate empty batch".to_string()));
    };
    let (width, height) = (first.width, first.height);
    let max_boxes = max_boxes.max(1);
    let mask_size = mask_size.max(1);
    let mask_elems = mask_size * mask_size;
    let n = samples.len();

    let mut images = Vec::with_capacity(n * 3 * (width * height) as usize);
    let mut boxes = vec![0.0f32; n * max_boxes * 4];
    let mut box_mask = vec![0.0f32; n * max_boxes];
    let mut labels = vec![0.0f32; n * max_boxes];
    let mut masks = vec![0.0f32; n * max_boxes * mask_elems];
    let mut image_ids = Vec::with_capacity(n);

    for (b, sample) in samples.iter().enumerate() {
        if (sample.width, sample.height) != (width, height) {
            return Err(BurnDatasetError::Other(
                "batch contains varying image sizes; set a target_size to force consistency"
                    .to_string(),
            ));
        }
        images.extend_from_slice(&sample.image_chw);
        image_ids.push(sample.image_id as f32);
        let instances = sample
            .boxes
            .iter()
            .zip(&sample.labels)
            .zip(&sample.mask_crops)
            .take(max_boxes);
        for (i, ((bbox, label), crop)) in instances.enumerate() {
            let slot = b * max_boxes + i;
            boxes[slot * 4..slot * 4 + 4].copy_from_slice(bbox);
            box_mask[slot] = 1.0;
            labels[slot] = *label as f32;
            if crop.len() == mask_elems {
                masks[slot * mask_elems..(slot + 1) * mask_elems].copy_from_slice(crop);
            }
        }
    }

    let (h, w) = (height as usize, width as usize);
    Ok(DetectionBatch {
        images: Tensor::from_data(TensorData::new(images, [n, 3, h, w]), device),
        boxes: Tensor::from_data(TensorData::new(boxes, [n, max_boxes, 4]), device),
        box_mask: Tensor::from_data(TensorData::new(box_mask, [n, max_boxes]), device),
        labels: Tensor::from_data(TensorData::new(labels, [n, max_boxes]), device),
        masks: Tensor::from_data(
            TensorData::new(masks, [n, max_boxes, mask_size, mask_size]),
            device,
        ),
        image_ids: Tensor::from_data(TensorData::new(image_ids, [n]), device),
    })
}

pub struct BatchIter {
    indices: Vec<SampleIndex>,
    cursor: usize,
    cfg: LoaderConfig,
    processed_samples: usize,
    processed_batches: usize,
    skipped_empty: usize,
    skipped_errors: usize,
    started: Instant,
    total_load_time: Duration,
    last_logged_samples: usize,
}

impl BatchIter {
    pub fn from_indices(mut indices: Vec<SampleIndex>, cfg: LoaderConfig) -> Self {
        if cfg.shuffle {
            let mut rng = match cfg.seed {
                Some(seed) => rand::rngs::StdRng::seed_from_u64(seed),
                None => rand::rngs::StdRng::from_rng(&mut rand::rng()),
            };
            indices.shuffle(&mut rng);
        }
        Self {
            indices,
            cursor: 0,
            cfg,
            processed_samples: 0,
            processed_batches: 0,
            skipped_empty: 0,
            skipped_errors: 0,
            started: Instant::now(),
            total_load_time: Duration::ZERO,
            last_logged_samples: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Upper bound on batches this iterator yields (skips can only lower it).
    pub fn num_batches(&self, batch_size: usize) -> usize {
        self.indices.len().div_ceil(batch_size.max(1))
    }

    pub fn skipped(&self) -> (usize, usize) {
        (self.skipped_empty, self.skipped_errors)
    }

    pub fn next_batch<B: Backend>(
        &mut self,
        batch_size: usize,
        device: &B::Device,
    ) -> DatasetResult<Option<DetectionBatch<B>>> {
        let batch_size = batch_size.max(1);
        loop {
            if self.cursor >= self.indices.len() {
                return Ok(None);
            }
            let end = (self.cursor + batch_size).min(self.indices.len());
            let slice = &self.indices[self.cursor..end];
            self.cursor = end;

            let t_load = Instant::now();
            let cfg = &self.cfg;
            let loaded: Vec<_> = slice
                .par_iter()
                .map(|idx| (idx, load_sample(idx, cfg)))
                .collect();
            self.total_load_time += t_load.elapsed();

            let mut samples = Vec::with_capacity(loaded.len());
            for (idx, res) in loaded {
                match res {
                    Ok(sample) if self.cfg.skip_empty && sample.boxes.is_empty() => {
                        tracing::warn!(
                            mask = %idx.mask_path.display(),
                            "no instances in mask (skipping sample)"
                        );
                        self.skipped_empty += 1;
                    }
                    Ok(sample) => samples.push(sample),
                    Err(e) if self.cfg.permissive_errors => {
                        tracing::warn!(image = %idx.image_path.display(), "skipping sample: {e}");
                        self.skipped_errors += 1;
                    }
                    Err(e) => return Err(e),
                }
            }
            if samples.is_empty() {
                continue;
            }

            let batch = collate::<B>(&samples, self.cfg.max_boxes, self.cfg.mask_size, device)?;
            self.processed_samples += samples.len();
            self.processed_batches += 1;
            self.maybe_log_progress();
            return Ok(Some(batch));
        }
    }

    fn maybe_log_progress(&mut self) {
        let Some(threshold) = self.cfg.log_every_samples else {
            return;
        };
        if self.processed_samples - self.last_logged_samples < threshold {
            return;
        }
        let secs = self.started.elapsed().as_secs_f32().max(0.001);
        let avg_load_ms =
            (self.total_load_time.as_secs_f64() * 1000.0) / self.processed_batches.max(1) as f64;
        tracing::info!(
            batches = self.processed_batches,
            samples = self.processed_samples,
            skipped_empty = self.skipped_empty,
            skipped_errors = self.skipped_errors,
            rate = %format!("{:.1} img/s", self.processed_samples as f32 / secs),
            avg_load_ms = %format!("{avg_load_ms:.2}"),
            "[dataset] progress"
        );
        self.last_logged_samples = self.processed_samples;
    }
}
