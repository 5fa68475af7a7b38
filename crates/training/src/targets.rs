//! Greedy IoU assignment of ground-truth instances to detection slots.

use burn::tensor::{backend::Backend, Tensor, TensorData};

/// Dense per-slot targets built from one batch.
#[derive(Debug, Clone)]
pub struct MatchedTargets<B: Backend> {
    /// [N, D]; 1.0 for slots that own a ground-truth instance.
    pub objectness: Tensor<B, 2>,
    /// [N, D, 4]
    pub boxes: Tensor<B, 3>,
    /// [N, D, 4]; 1.0 on matched slots.
    pub box_weights: Tensor<B, 3>,
    /// [N, D, C] one-hot class of the matched instance, zeros elsewhere.
    pub classes: Tensor<B, 3>,
    /// [N, D, M, M]; present when ground-truth masks were supplied.
    pub masks: Option<Tensor<B, 4>>,
    /// [N, D, M, M]; 1.0 over matched slots.
    pub mask_weights: Option<Tensor<B, 4>>,
    pub matched: usize,
}

pub fn iou_xyxy(a: [f32; 4], b: [f32; 4]) -> f32 {
    let ax0 = a[0].min(a[2]);
    let ay0 = a[1].min(a[3]);
    let ax1 = a[0].max(a[2]);
    let ay1 = a[1].max(a[3]);
    let bx0 = b[0].min(b[2]);
    let by0 = b[1].min(b[3]);
    let bx1 = b[0].max(b[2]);
    let by1 = b[1].max(b[3]);

    let inter_w = (ax1.min(bx1) - ax0.max(bx0)).max(0.0);
    let inter_h = (ay1.min(by1) - ay0.max(by0)).max(0.0);
    let inter_area = inter_w * inter_h;

    let area_a = (ax1 - ax0).max(0.0) * (ay1 - ay0).max(0.0);
    let area_b = (bx1 - bx0).max(0.0) * (by1 - by0).max(0.0);
    let denom = area_a + area_b - inter_area;
    if denom <= 0.0 {
        0.0
    } else {
        inter_area / denom
    }
}

fn to_vec<B: Backend, const D: usize>(t: &Tensor<B, D>) -> Vec<f32> {
    t.clone().into_data().to_vec::<f32>().unwrap_or_default()
}

fn quad(v: &[f32], i: usize) -> [f32; 4] {
    [v[i * 4], v[i * 4 + 1], v[i * 4 + 2], v[i * 4 + 3]]
}

/// For each ground-truth instance, claim the unclaimed slot with the best IoU.
///
/// When every slot is already claimed the instance is dropped for this step.
pub fn build_greedy_targets<B: Backend>(
    pred_boxes: Tensor<B, 3>,
    gt_boxes: Tensor<B, 3>,
    gt_mask: Tensor<B, 2>,
    gt_labels: Tensor<B, 2>,
    gt_masks: Option<Tensor<B, 4>>,
    num_classes: usize,
) -> MatchedTargets<B> {
    let device = pred_boxes.device();
    let [batch, max_pred, _] = pred_boxes.dims();
    let max_gt = gt_boxes.dims()[1];
    let num_classes = num_classes.max(1);

    let pred_vec = to_vec(&pred_boxes);
    let gt_vec = to_vec(&gt_boxes);
    let gt_mask_vec = to_vec(&gt_mask);
    let gt_label_vec = to_vec(&gt_labels);
    let mask_side = gt_masks.as_ref().map(|m| m.dims()[2]).unwrap_or(0);
    let mask_elems = mask_side * mask_side;
    let gt_masks_vec = gt_masks.as_ref().map(to_vec);

    let mut obj = vec![0.0f32; batch * max_pred];
    let mut boxes = vec![0.0f32; batch * max_pred * 4];
    let mut weights = vec![0.0f32; batch * max_pred * 4];
    let mut classes = vec![0.0f32; batch * max_pred * num_classes];
    let mut masks = vec![0.0f32; batch * max_pred * mask_elems];
    let mut mask_weights = vec![0.0f32; batch * max_pred * mask_elems];
    let mut matched = 0usize;

    for b in 0..batch {
        let mut claimed = vec![false; max_pred];
        for g in 0..max_gt {
            let gt_idx = b * max_gt + g;
            if gt_mask_vec.get(gt_idx).copied().unwrap_or(0.0) < 0.5 {
                continue;
            }
            let gb = quad(&gt_vec, gt_idx);
            let best = (0..max_pred)
                .filter(|p| !claimed[*p])
                .map(|p| (p, iou_xyxy(quad(&pred_vec, b * max_pred + p), gb)))
                .fold(None, |acc: Option<(usize, f32)>, (p, iou)| match acc {
                    Some((_, best_iou)) if best_iou >= iou => acc,
                    _ => Some((p, iou)),
                });
            let Some((p, _)) = best else { continue };
            claimed[p] = true;
            matched += 1;

            let slot = b * max_pred + p;
            obj[slot] = 1.0;
            boxes[slot * 4..slot * 4 + 4].copy_from_slice(&gb);
            weights[slot * 4..slot * 4 + 4].copy_from_slice(&[1.0; 4]);
            let class = (gt_label_vec.get(gt_idx).copied().unwrap_or(1.0).round() as usize)
                .min(num_classes - 1);
            classes[slot * num_classes + class] = 1.0;
            if let Some(src) = &gt_masks_vec {
                let from = gt_idx * mask_elems;
                masks[slot * mask_elems..(slot + 1) * mask_elems]
                    .copy_from_slice(&src[from..from + mask_elems]);
                mask_weights[slot * mask_elems..(slot + 1) * mask_elems].fill(1.0);
            }
        }
    }

    let (masks, mask_weights) = if gt_masks.is_some() {
        let shape = [batch, max_pred, mask_side, mask_side];
        (
            Some(Tensor::from_data(TensorData::new(masks, shape), &device)),
            Some(Tensor::from_data(TensorData::new(mask_weights, shape), &device)),
        )
    } else {
        (None, None)
    };

    MatchedTargets {
        objectness: Tensor::from_data(TensorData::new(obj, [batch, max_pred]), &device),
        boxes: Tensor::from_data(TensorData::new(boxes, [batch, max_pred, 4]), &device),
        box_weights: Tensor::from_data(TensorData::new(weights, [batch, max_pred, 4]), &device),
        classes: Tensor::from_data(
            TensorData::new(classes, [batch, max_pred, num_classes]),
            &device,
        ),
        masks,
        mask_weights,
        matched,
    }
}
