//! Burn detection models for instance finetuning.
//!
//! `Detector` is a conv backbone feeding a `BoxPredictor` (boxes, objectness, class
//! logits per detection slot) and, for the mask variant, a `MaskPredictor`. The
//! box-only variant plays the Faster R-CNN role, the masked one the Mask R-CNN role.
//!
//! Finetuning follows the usual recipe: load a pretrained checkpoint, swap the
//! predictors for the target class count with [`Detector::replace_heads`], and
//! optionally freeze the backbone.

pub mod backbone;
pub mod heads;

use burn::module::Module;
use burn::record::{BinFileRecorder, FullPrecisionSettings, RecorderError};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

pub use backbone::{Backbone, ConvBlock};
pub use heads::{BoxPredictor, MaskPredictor};

/// Detector variant: box-only (Faster R-CNN role) or box + mask (Mask R-CNN role).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DetectorKind {
    FasterRcnn,
    #[default]
    MaskRcnn,
}

impl DetectorKind {
    pub fn with_masks(self) -> bool {
        matches!(self, DetectorKind::MaskRcnn)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DetectorKind::FasterRcnn => "faster-rcnn",
            DetectorKind::MaskRcnn => "mask-rcnn",
        }
    }
}

impl fmt::Display for DetectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DetectorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "faster-rcnn" | "faster" | "box" => Ok(DetectorKind::FasterRcnn),
            "mask-rcnn" | "mask" => Ok(DetectorKind::MaskRcnn),
            other => Err(format!(
                "unknown detector kind '{other}' (expected faster-rcnn or mask-rcnn)"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Number of classes including background (label 0).
    pub num_classes: usize,
    pub max_detections: usize,
    pub hidden: usize,
    pub backbone_channels: Vec<usize>,
    pub pool_size: usize,
    pub mask_size: usize,
    pub with_masks: bool,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            num_classes: 2,
            max_detections: 16,
            hidden: 128,
            backbone_channels: vec![16, 32, 64],
            pool_size: 4,
            mask_size: 14,
            with_masks: true,
        }
    }
}

impl DetectorConfig {
    pub fn kind(&self) -> DetectorKind {
        if self.with_masks {
            DetectorKind::MaskRcnn
        } else {
            DetectorKind::FasterRcnn
        }
    }

    /// True when both configs build the same backbone, so weights transfer.
    pub fn backbone_matches(&self, other: &DetectorConfig) -> bool {
        self.hidden == other.hidden
            && self.backbone_channels == other.backbone_channels
            && self.pool_size == other.pool_size
    }

    /// Stable fingerprint of every shape-affecting field.
    pub fn digest(&self) -> String {
        let channels = self
            .backbone_channels
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join("-");
        format!(
            "c{}_d{}_h{}_b{}_p{}_m{}_{}",
            self.num_classes,
            self.max_detections,
            self.hidden,
            channels,
            self.pool_size,
            self.mask_size,
            if self.with_masks { "mask" } else { "box" }
        )
    }
}

#[derive(Debug, Clone)]
pub struct DetectorOutput<B: Backend> {
    /// [N, D, 4] ordered xyxy in 0..1.
    pub boxes: Tensor<B, 3>,
    /// [N, D] in 0..1.
    pub objectness: Tensor<B, 2>,
    /// [N, D, C] unnormalized.
    pub class_logits: Tensor<B, 3>,
    /// [N, D, M, M] unnormalized; present for the mask variant.
    pub mask_logits: Option<Tensor<B, 4>>,
}

#[derive(Debug, Module)]
pub struct Detector<B: Backend> {
    backbone: Backbone<B>,
    box_predictor: BoxPredictor<B>,
    mask_predictor: Option<MaskPredictor<B>>,
    hidden: usize,
    max_detections: usize,
    mask_size: usize,
}

impl<B: Backend> Detector<B> {
    pub fn new(cfg: &DetectorConfig, device: &B::Device) -> Self {
        let backbone = Backbone::new(&cfg.backbone_channels, cfg.pool_size, cfg.hidden, device);
        let box_predictor =
            BoxPredictor::new(cfg.hidden, cfg.max_detections, cfg.num_classes, device);
        let mask_predictor = cfg
            .with_masks
            .then(|| MaskPredictor::new(cfg.hidden, cfg.max_detections, cfg.mask_size, device));
        Self {
            backbone,
            box_predictor,
            mask_predictor,
            hidden: cfg.hidden,
            max_detections: cfg.max_detections.max(1),
            mask_size: cfg.mask_size.max(1),
        }
    }

    pub fn forward(&self, images: Tensor<B, 4>) -> DetectorOutput<B> {
        let features = self.backbone.forward(images);
        let mask_logits = self
            .mask_predictor
            .as_ref()
            .map(|head| head.forward(features.clone()));
        let (boxes, objectness, class_logits) = self.box_predictor.forward(features);
        DetectorOutput {
            boxes,
            objectness,
            class_logits,
            mask_logits,
        }
    }

    pub fn num_classes(&self) -> usize {
        self.box_predictor.num_classes()
    }

    pub fn has_masks(&self) -> bool {
        self.mask_predictor.is_some()
    }

    /// Keep the backbone and build fresh predictors shaped by `target`.
    ///
    /// `target` must share this detector's backbone shape (see
    /// [`DetectorConfig::backbone_matches`]); head fields come from `target`.
    pub fn replace_heads(self, target: &DetectorConfig, device: &B::Device) -> Self {
        let box_predictor = BoxPredictor::new(
            self.hidden,
            target.max_detections,
            target.num_classes,
            device,
        );
        let mask_predictor = target.with_masks.then(|| {
            MaskPredictor::new(self.hidden, target.max_detections, target.mask_size, device)
        });
        Self {
            box_predictor,
            mask_predictor,
            max_detections: target.max_detections.max(1),
            mask_size: target.mask_size.max(1),
            ..self
        }
    }

    /// Stop gradients into the backbone; only the predictors keep training.
    pub fn freeze_backbone(self) -> Self {
        Self {
            backbone: self.backbone.no_grad(),
            ..self
        }
    }
}

/// Load a detector recorded with `BinFileRecorder<FullPrecisionSettings>`.
pub fn load_detector<B: Backend, P: AsRef<Path>>(
    path: P,
    cfg: &DetectorConfig,
    device: &B::Device,
) -> Result<Detector<B>, RecorderError> {
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    Detector::<B>::new(cfg, device).load_file(path.as_ref().to_path_buf(), &recorder, device)
}

/// Load a pretrained checkpoint and adapt it to the target task's class count.
pub fn load_pretrained<B: Backend, P: AsRef<Path>>(
    path: P,
    pretrained_cfg: &DetectorConfig,
    target_cfg: &DetectorConfig,
    device: &B::Device,
) -> Result<Detector<B>, RecorderError> {
    if !pretrained_cfg.backbone_matches(target_cfg) {
        return Err(RecorderError::Unknown(format!(
            "pretrained backbone {} does not match target {}",
            pretrained_cfg.digest(),
            target_cfg.digest()
        )));
    }
    let base = load_detector::<B, _>(path, pretrained_cfg, device)?;
    Ok(base.replace_heads(target_cfg, device))
}

pub mod prelude {
    pub use super::{
        load_detector, load_pretrained, Detector, DetectorConfig, DetectorKind, DetectorOutput,
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::NdArray;

    type B = NdArray<f32>;

    fn small_cfg(with_masks: bool) -> DetectorConfig {
        DetectorConfig {
            num_classes: 3,
            max_detections: 4,
            hidden: 16,
            backbone_channels: vec![4, 8],
            pool_size: 2,
            mask_size: 6,
            with_masks,
        }
    }

    #[test]
    fn forward_shapes_with_masks() {
        let device = Default::default();
        let model = Detector::<B>::new(&small_cfg(true), &device);
        let out = model.forward(Tensor::zeros([2, 3, 16, 16], &device));
        assert_eq!(out.boxes.dims(), [2, 4, 4]);
        assert_eq!(out.objectness.dims(), [2, 4]);
        assert_eq!(out.class_logits.dims(), [2, 4, 3]);
        assert_eq!(out.mask_logits.map(|m| m.dims()), Some([2, 4, 6, 6]));
    }

    #[test]
    fn boxes_are_ordered_and_normalized() {
        let device = Default::default();
        let model = Detector::<B>::new(&small_cfg(false), &device);
        let out = model.forward(Tensor::ones([1, 3, 16, 16], &device));
        assert!(out.mask_logits.is_none());
        let boxes = out.boxes.into_data().to_vec::<f32>().unwrap();
        for b in boxes.chunks_exact(4) {
            assert!(b.iter().all(|v| (0.0..=1.0).contains(v)));
            assert!(b[0] <= b[2] && b[1] <= b[3]);
        }
    }

    #[test]
    fn replace_heads_uses_target_head_shapes() {
        let device = Default::default();
        let model = Detector::<B>::new(&small_cfg(false), &device);
        let backbone_params = model.backbone.num_params();
        let target = DetectorConfig {
            num_classes: 2,
            max_detections: 5,
            mask_size: 3,
            with_masks: true,
            ..small_cfg(false)
        };
        let model = model.replace_heads(&target, &device);
        assert_eq!(model.num_classes(), 2);
        assert!(model.has_masks());
        let out = model.forward(Tensor::zeros([1, 3, 16, 16], &device));
        assert_eq!(out.mask_logits.map(|m| m.dims()), Some([1, 5, 3, 3]));
        assert_eq!(model.backbone.num_params(), backbone_params);
    }

    #[test]
    fn detector_kind_parses_and_maps_to_masks() {
        assert_eq!("faster-rcnn".parse::<DetectorKind>(), Ok(DetectorKind::FasterRcnn));
        assert_eq!("Mask_RCNN".parse::<DetectorKind>(), Ok(DetectorKind::MaskRcnn));
        assert!("yolo".parse::<DetectorKind>().is_err());
        assert!(DetectorKind::MaskRcnn.with_masks());
        assert_eq!(small_cfg(false).kind(), DetectorKind::FasterRcnn);
    }

    #[test]
    fn digest_tracks_shape_fields() {
        let a = small_cfg(true);
        let mut b = a.clone();
        assert_eq!(a.digest(), b.digest());
        b.num_classes = 5;
        assert_ne!(a.digest(), b.digest());
    }
}
