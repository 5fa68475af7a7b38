//! Detection losses: objectness BCE, box L1, class cross-entropy, and mask BCE.

use crate::error::{TrainError, TrainResult};
use crate::targets::build_greedy_targets;
use burn::tensor::activation::{log_softmax, sigmoid};
use burn::tensor::{backend::Backend, Tensor};
use burn_dataset::DetectionBatch;
use models::DetectorOutput;
use serde::{Deserialize, Serialize};
use std::fmt;

const EPS: f32 = 1e-6;

/// Relative weight of each loss term in the total.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LossWeights {
    pub objectness: f32,
    pub box_reg: f32,
    pub classifier: f32,
    pub mask: f32,
}

impl Default for LossWeights {
    fn default() -> Self {
        Self {
            objectness: 1.0,
            box_reg: 1.0,
            classifier: 1.0,
            mask: 1.0,
        }
    }
}

/// Detached scalar value of every loss term, keyed like a loss dictionary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LossBreakdown {
    pub loss_objectness: f32,
    pub loss_box_reg: f32,
    pub loss_classifier: f32,
    pub loss_mask: Option<f32>,
}

impl LossBreakdown {
    pub fn entries(&self) -> Vec<(&'static str, f32)> {
        let mut out = vec![
            ("loss_objectness", self.loss_objectness),
            ("loss_box_reg", self.loss_box_reg),
            ("loss_classifier", self.loss_classifier),
        ];
        if let Some(mask) = self.loss_mask {
            out.push(("loss_mask", mask));
        }
        out
    }

    pub fn is_finite(&self) -> bool {
        self.entries().iter().all(|(_, v)| v.is_finite())
    }
}

impl fmt::Display for LossBreakdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (name, value)) in self.entries().into_iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "'{name}': {value:.4}")?;
        }
        write!(f, "}}")
    }
}

pub struct LossOutput<B: Backend> {
    /// Weighted sum of all terms; rank-1 with one element.
    pub total: Tensor<B, 1>,
    pub breakdown: LossBreakdown,
}

impl<B: Backend> LossOutput<B> {
    pub fn value(&self) -> f32 {
        scalar(self.total.clone())
    }
}

pub(crate) fn scalar<B: Backend>(t: Tensor<B, 1>) -> f32 {
    t.detach()
        .into_data()
        .to_vec::<f32>()
        .unwrap_or_default()
        .first()
        .copied()
        .unwrap_or(f32::NAN)
}

fn binary_cross_entropy<B: Backend, const D: usize>(
    probs: Tensor<B, D>,
    targets: Tensor<B, D>,
) -> Tensor<B, D> {
    let probs = probs.clamp(EPS, 1.0 - EPS);
    let pos = targets.clone() * probs.clone().log();
    let neg = (targets.ones_like() - targets) * (probs.ones_like() - probs).log();
    -(pos + neg)
}

/// Reduce the batch into a weighted loss against greedily matched targets.
pub fn compute_losses<B: Backend>(
    out: &DetectorOutput<B>,
    batch: &DetectionBatch<B>,
    weights: &LossWeights,
) -> LossOutput<B> {
    let num_classes = out.class_logits.dims()[2];
    let gt_masks = out.mask_logits.as_ref().map(|_| batch.masks.clone());
    let targets = build_greedy_targets(
        out.boxes.clone(),
        batch.boxes.clone(),
        batch.box_mask.clone(),
        batch.labels.clone(),
        gt_masks,
        num_classes,
    );
    let matched = targets.matched.max(1) as f32;
    let [n, d] = out.objectness.dims();

    let loss_objectness = binary_cross_entropy(out.objectness.clone(), targets.objectness)
        .sum()
        .div_scalar((n * d).max(1) as f32);

    let loss_box_reg = ((out.boxes.clone() - targets.boxes).abs() * targets.box_weights)
        .sum()
        .div_scalar(matched);

    let log_probs = log_softmax(out.class_logits.clone(), 2);
    let loss_classifier = -(targets.classes * log_probs).sum().div_scalar(matched);

    let loss_mask = match (&out.mask_logits, targets.masks, targets.mask_weights) {
        (Some(logits), Some(mask_targets), Some(mask_weights)) => {
            let side = logits.dims()[2];
            let per_pixel = binary_cross_entropy(sigmoid(logits.clone()), mask_targets);
            Some(
                (per_pixel * mask_weights)
                    .sum()
                    .div_scalar(matched * (side * side) as f32),
            )
        }
        _ => None,
    };

    let breakdown = LossBreakdown {
        loss_objectness: scalar(loss_objectness.clone()),
        loss_box_reg: scalar(loss_box_reg.clone()),
        loss_classifier: scalar(loss_classifier.clone()),
        loss_mask: loss_mask.clone().map(scalar),
    };

    let mut total = loss_objectness.mul_scalar(weights.objectness)
        + loss_box_reg.mul_scalar(weights.box_reg)
        + loss_classifier.mul_scalar(weights.classifier);
    if let Some(mask) = loss_mask {
        total = total + mask.mul_scalar(weights.mask);
    }

    LossOutput { total, breakdown }
}

/// Fail with the full loss dictionary when the reduced loss is NaN or infinite.
pub fn ensure_finite(value: f32, breakdown: &LossBreakdown) -> TrainResult<()> {
    if value.is_finite() {
        return Ok(());
    }
    tracing::error!("Loss is {value}, stopping training");
    tracing::error!("{breakdown}");
    Err(TrainError::NonFiniteLoss {
        value,
        breakdown: breakdown.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn breakdown_prints_like_a_loss_dict() {
        let b = LossBreakdown {
            loss_objectness: 0.5,
            loss_box_reg: 0.25,
            loss_classifier: 1.0,
            loss_mask: Some(0.125),
        };
        assert_eq!(
            b.to_string(),
            "{'loss_objectness': 0.5000, 'loss_box_reg': 0.2500, 'loss_classifier': 1.0000, 'loss_mask': 0.1250}"
        );
    }

    #[test]
    fn non_finite_total_is_rejected() {
        let b = LossBreakdown {
            loss_box_reg: f32::NAN,
            ..Default::default()
        };
        assert!(ensure_finite(1.0, &b).is_ok());
        let err = ensure_finite(f32::NAN, &b).unwrap_err();
        assert!(matches!(err, TrainError::NonFiniteLoss { .. }));
        assert!(err.to_string().contains("loss_box_reg"));
        assert!(ensure_finite(f32::INFINITY, &b).is_err());
    }
}
