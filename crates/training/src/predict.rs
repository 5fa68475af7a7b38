//! Single-image inference and overlay rendering.

use crate::checkpoint::ensure_parent;
use crate::error::{TrainError, TrainResult};
use burn::tensor::activation::sigmoid;
use burn::tensor::{backend::Backend, Tensor, TensorData};
use burn_dataset::rgb_to_chw;
use image::{imageops::FilterType, RgbImage, RgbaImage};
use models::{Detector, DetectorOutput};
use serde::Serialize;
use std::path::Path;
use vision_core::overlay::{blend_mask, draw_rect, normalize_box, palette_color};

pub const MASK_THRESHOLD: f32 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    /// Normalized xyxy in 0..1.
    pub bbox: [f32; 4],
    pub score: f32,
    /// Foreground class with the highest logit (never background).
    pub label: usize,
    /// Row-major `mask_size * mask_size` probabilities inside `bbox`.
    #[serde(skip)]
    pub mask: Option<Vec<f32>>,
    #[serde(skip)]
    pub mask_size: usize,
}

/// Decode detections of image `index` whose objectness is `>= score_thresh`,
/// ordered by descending score.
pub fn decode_detections<B: Backend>(
    out: &DetectorOutput<B>,
    index: usize,
    score_thresh: f32,
) -> Vec<Detection> {
    let [_, d, c] = out.class_logits.dims();
    let boxes = rows(out.boxes.clone().into_data(), index, d * 4);
    let scores = rows(out.objectness.clone().into_data(), index, d);
    let logits = rows(out.class_logits.clone().into_data(), index, d * c);
    let (masks, side) = match &out.mask_logits {
        Some(m) => {
            let side = m.dims()[2];
            (
                Some(rows(sigmoid(m.clone()).into_data(), index, d * side * side)),
                side,
            )
        }
        None => (None, 0),
    };

    let mut detections: Vec<_> = (0..d)
        .filter(|p| scores.get(*p).is_some_and(|s| *s >= score_thresh))
        .map(|p| {
            let class_row = &logits[p * c..(p + 1) * c];
            let label = class_row
                .iter()
                .enumerate()
                .skip(1)
                .max_by(|a, b| a.1.total_cmp(b.1))
                .map(|(i, _)| i)
                .unwrap_or(0);
            Detection {
                bbox: [boxes[p * 4], boxes[p * 4 + 1], boxes[p * 4 + 2], boxes[p * 4 + 3]],
                score: scores[p],
                label,
                mask: masks
                    .as_ref()
                    .map(|m| m[p * side * side..(p + 1) * side * side].to_vec()),
                mask_size: side,
            }
        })
        .collect();
    detections.sort_by(|a, b| b.score.total_cmp(&a.score));
    detections
}

fn rows(data: TensorData, index: usize, stride: usize) -> Vec<f32> {
    let all = data.to_vec::<f32>().unwrap_or_default();
    all.get(index * stride..(index + 1) * stride)
        .map(<[f32]>::to_vec)
        .unwrap_or_default()
}

/// Draw boxes and blend masks of `detections` over `image`.
pub fn render_overlay(image: &RgbImage, detections: &[Detection]) -> RgbaImage {
    let mut canvas = image::DynamicImage::ImageRgb8(image.clone()).to_rgba8();
    let dims = canvas.dimensions();
    for (i, det) in detections.iter().enumerate() {
        let Some(bbox_px) = normalize_box(det.bbox, dims) else {
            continue;
        };
        let color = palette_color(i);
        if let Some(mask) = &det.mask {
            blend_mask(&mut canvas, bbox_px, mask, det.mask_size, MASK_THRESHOLD, color, 0.5);
        }
        draw_rect(&mut canvas, bbox_px, color, 2);
    }
    canvas
}

/// Load `path` as the `[1, 3, H, W]` tensor the detector expects, optionally resized.
pub fn load_image_tensor<B: Backend>(
    path: &Path,
    target_size: Option<(u32, u32)>,
    device: &B::Device,
) -> TrainResult<(RgbImage, Tensor<B, 4>)> {
    let img = image::open(path)
        .map_err(|source| TrainError::Image {
            path: path.to_path_buf(),
            source,
        })?
        .to_rgb8();
    let img = match target_size {
        Some((w, h)) if img.dimensions() != (w, h) => {
            image::imageops::resize(&img, w, h, FilterType::Triangle)
        }
        _ => img,
    };
    let (w, h) = img.dimensions();
    let tensor = Tensor::from_data(
        TensorData::new(rgb_to_chw(&img), [1, 3, h as usize, w as usize]),
        device,
    );
    Ok((img, tensor))
}

/// Run one image through `model` and write the overlay PNG.
pub fn predict_to_png<B: Backend>(
    model: &Detector<B>,
    input: &Path,
    output: &Path,
    target_size: Option<(u32, u32)>,
    score_thresh: f32,
    device: &B::Device,
) -> TrainResult<Vec<Detection>> {
    let (img, tensor) = load_image_tensor::<B>(input, target_size, device)?;
    let out = model.forward(tensor);
    let detections = decode_detections(&out, 0, score_thresh);
    let overlay = render_overlay(&img, &detections);
    ensure_parent(output)?;
    overlay
        .save(output)
        .map_err(|source| TrainError::Image {
            path: output.to_path_buf(),
            source,
        })?;
    tracing::info!(
        input = %input.display(),
        output = %output.display(),
        detections = detections.len(),
        "wrote prediction overlay"
    );
    Ok(detections)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::NdArray;

    type B = NdArray<f32>;

    fn output(with_mask: bool) -> DetectorOutput<B> {
        let device = Default::default();
        let boxes = TensorData::new(
            vec![0.0, 0.0, 0.5, 0.5, 0.5, 0.5, 1.0, 1.0, 0.1, 0.1, 0.2, 0.2],
            [1, 3, 4],
        );
        let scores = TensorData::new(vec![0.6, 0.9, 0.1], [1, 3]);
        // Background logit is largest for slot 0 but background is never chosen.
        let logits = TensorData::new(vec![5.0, 1.0, 2.0, 0.0, 1.0, 3.0, 0.0, 0.0, 0.0], [1, 3, 3]);
        DetectorOutput {
            boxes: Tensor::from_data(boxes, &device),
            objectness: Tensor::from_data(scores, &device),
            class_logits: Tensor::from_data(logits, &device),
            mask_logits: with_mask.then(|| Tensor::zeros([1, 3, 2, 2], &device)),
        }
    }

    #[test]
    fn detections_are_filtered_and_sorted_by_score() {
        let dets = decode_detections(&output(false), 0, 0.5);
        assert_eq!(dets.len(), 2);
        assert_eq!(dets[0].score, 0.9);
        assert_eq!(dets[0].label, 2);
        assert_eq!(dets[1].label, 2);
        assert_eq!(dets[1].bbox, [0.0, 0.0, 0.5, 0.5]);
        assert!(dets[0].mask.is_none());
    }

    #[test]
    fn mask_probabilities_follow_their_slot() {
        let dets = decode_detections(&output(true), 0, 0.5);
        let mask = dets[0].mask.as_ref().unwrap();
        assert_eq!(dets[0].mask_size, 2);
        assert!(mask.iter().all(|p| (*p - 0.5).abs() < 1e-6));
    }

    #[test]
    fn overlay_draws_box_border() {
        let img = RgbImage::new(8, 8);
        let det = Detection {
            bbox: [0.0, 0.0, 0.5, 0.5],
            score: 1.0,
            label: 1,
            mask: Some(vec![1.0; 4]),
            mask_size: 2,
        };
        let out = render_overlay(&img, &[det]);
        assert_eq!(out.get_pixel(0, 0), &palette_color(0));
        // Inside the box the mask blend tints the pixel.
        assert_ne!(out.get_pixel(2, 2).0[..3], [0, 0, 0]);
        // Outside stays black.
        assert_eq!(out.get_pixel(7, 7).0[..3], [0, 0, 0]);
    }
}
