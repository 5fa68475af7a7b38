//! Held-out precision/recall by greedy IoU matching.

use crate::error::TrainResult;
use crate::targets::iou_xyxy;
use burn::tensor::backend::Backend;
use burn_dataset::BatchIter;
use models::Detector;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvalConfig {
    pub score_thresh: f32,
    pub iou_thresh: f32,
    pub batch_size: usize,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            score_thresh: 0.5,
            iou_thresh: 0.5,
            batch_size: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvalSummary {
    pub images: usize,
    pub tp: usize,
    pub fp: usize,
    #[serde(rename = "fn")]
    pub fn_: usize,
}

impl EvalSummary {
    pub fn precision(&self) -> f64 {
        ratio(self.tp, self.tp + self.fp)
    }

    pub fn recall(&self) -> f64 {
        ratio(self.tp, self.tp + self.fn_)
    }

    fn absorb(&mut self, (tp, fp, fn_): (usize, usize, usize)) {
        self.images += 1;
        self.tp += tp;
        self.fp += fp;
        self.fn_ += fn_;
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

/// Count `(tp, fp, fn)` for one image.
///
/// Predictions above `score_thresh` are visited by descending score and each one
/// claims the best still-unmatched ground truth with IoU `>= iou_thresh`.
pub fn match_detections(
    preds: &[([f32; 4], f32)],
    gts: &[[f32; 4]],
    score_thresh: f32,
    iou_thresh: f32,
) -> (usize, usize, usize) {
    let mut kept: Vec<_> = preds.iter().filter(|(_, s)| *s >= score_thresh).collect();
    kept.sort_by(|a, b| b.1.total_cmp(&a.1));

    let mut taken = vec![false; gts.len()];
    let (mut tp, mut fp) = (0, 0);
    for (bbox, _) in kept {
        let best = gts
            .iter()
            .enumerate()
            .filter(|(i, _)| !taken[*i])
            .map(|(i, gt)| (i, iou_xyxy(*bbox, *gt)))
            .filter(|(_, iou)| *iou >= iou_thresh)
            .max_by(|a, b| a.1.total_cmp(&b.1));
        match best {
            Some((i, _)) => {
                taken[i] = true;
                tp += 1;
            }
            None => fp += 1,
        }
    }
    let fn_ = taken.iter().filter(|t| !**t).count();
    (tp, fp, fn_)
}

fn quads(v: &[f32]) -> impl Iterator<Item = [f32; 4]> + '_ {
    v.chunks_exact(4).map(|c| [c[0], c[1], c[2], c[3]])
}

/// Run the detector over every batch of `iter` and accumulate matches.
pub fn evaluate<B: Backend>(
    model: &Detector<B>,
    iter: &mut BatchIter,
    cfg: &EvalConfig,
    device: &B::Device,
) -> TrainResult<EvalSummary> {
    let mut summary = EvalSummary::default();
    while let Some(batch) = iter.next_batch::<B>(cfg.batch_size, device)? {
        let out = model.forward(batch.images.clone());
        let [n, d] = out.objectness.dims();
        let k = batch.box_mask.dims()[1];

        let pred_boxes: Vec<[f32; 4]> = quads(&to_vec(out.boxes)).collect();
        let scores = to_vec(out.objectness);
        let gt_boxes: Vec<[f32; 4]> = quads(&to_vec(batch.boxes)).collect();
        let gt_mask = to_vec(batch.box_mask);

        for b in 0..n {
            let preds: Vec<_> = (0..d)
                .map(|p| (pred_boxes[b * d + p], scores[b * d + p]))
                .collect();
            let gts: Vec<_> = (0..k)
                .filter(|g| gt_mask[b * k + g] > 0.5)
                .map(|g| gt_boxes[b * k + g])
                .collect();
            summary.absorb(match_detections(&preds, &gts, cfg.score_thresh, cfg.iou_thresh));
        }
    }
    tracing::info!(
        images = summary.images,
        tp = summary.tp,
        fp = summary.fp,
        fn_ = summary.fn_,
        precision = %format!("{:.3}", summary.precision()),
        recall = %format!("{:.3}", summary.recall()),
        "eval complete"
    );
    Ok(summary)
}

fn to_vec<B: Backend, const D: usize>(t: burn::tensor::Tensor<B, D>) -> Vec<f32> {
    t.into_data().to_vec::<f32>().unwrap_or_default()
}
