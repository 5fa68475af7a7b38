//! Training configuration: clap flags over an optional TOML file over defaults.

use crate::error::{TrainError, TrainResult};
use crate::eval::EvalConfig;
use crate::loss::LossWeights;
use crate::schedule::LrSchedule;
use burn_dataset::{DatasetLayout, LoaderConfig};
use clap::{Parser, ValueEnum};
use models::{DetectorConfig, DetectorKind};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    #[value(name = "ndarray")]
    NdArray,
    Wgpu,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerKind {
    #[default]
    Sgd,
    Adam,
}

#[derive(Parser, Debug, Default)]
#[command(
    name = "train",
    about = "Finetune a box or box+mask detector on an instance-mask dataset"
)]
pub struct TrainArgs {
    /// TOML file with any of the settings below; flags override it.
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Dataset root containing the image and mask directories.
    #[arg(long)]
    pub dataset_root: Option<PathBuf>,
    #[arg(long)]
    pub images_subdir: Option<String>,
    #[arg(long)]
    pub masks_subdir: Option<String>,
    /// Detector variant (faster-rcnn or mask-rcnn).
    #[arg(long)]
    pub detector: Option<DetectorKind>,
    /// Backend to use (ndarray or wgpu if enabled).
    #[arg(long, value_enum)]
    pub backend: Option<BackendKind>,
    #[arg(long, value_enum)]
    pub optimizer: Option<OptimizerKind>,
    /// Number of classes including background.
    #[arg(long)]
    pub num_classes: Option<usize>,
    /// Mask instance id to class label, e.g. "1=1,2=2"; unlisted ids get label 1.
    #[arg(long)]
    pub class_map: Option<String>,
    #[arg(long)]
    pub epochs: Option<usize>,
    #[arg(long)]
    pub batch_size: Option<usize>,
    #[arg(long)]
    pub lr: Option<f64>,
    #[arg(long)]
    pub momentum: Option<f64>,
    #[arg(long)]
    pub weight_decay: Option<f64>,
    /// Epochs between learning-rate decays.
    #[arg(long)]
    pub lr_step_size: Option<usize>,
    #[arg(long)]
    pub lr_gamma: Option<f64>,
    #[arg(long)]
    pub warmup_factor: Option<f64>,
    #[arg(long)]
    pub warmup_iters: Option<usize>,
    /// Samples held out for evaluation.
    #[arg(long)]
    pub holdout: Option<usize>,
    #[arg(long)]
    pub seed: Option<u64>,
    /// Force-resize images to WIDTHxHEIGHT (e.g. 128x128), or "none".
    #[arg(long)]
    pub image_size: Option<String>,
    #[arg(long)]
    pub max_boxes: Option<usize>,
    #[arg(long)]
    pub mask_size: Option<usize>,
    #[arg(long)]
    pub hidden: Option<usize>,
    /// Checkpoint to start from; its predictors are replaced for `num_classes`.
    #[arg(long)]
    pub pretrained: Option<PathBuf>,
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    pub freeze_backbone: Option<bool>,
    /// Checkpoint output path; sidecars are written next to it.
    #[arg(long)]
    pub checkpoint: Option<PathBuf>,
    #[arg(long)]
    pub checkpoint_every: Option<usize>,
    /// Continue from `--checkpoint` when it exists.
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    pub resume: Option<bool>,
    /// PDF report path.
    #[arg(long)]
    pub report: Option<PathBuf>,
    #[arg(long)]
    pub metrics_path: Option<PathBuf>,
    /// Directory for daily-rolling log files.
    #[arg(long)]
    pub log_dir: Option<PathBuf>,
    #[arg(long)]
    pub print_freq: Option<usize>,
    /// Evaluate on the held-out split after every epoch.
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    pub eval: Option<bool>,
    #[arg(long)]
    pub score_thresh: Option<f32>,
    #[arg(long)]
    pub iou_thresh: Option<f32>,
    #[arg(long)]
    pub lambda_obj: Option<f32>,
    #[arg(long)]
    pub lambda_box: Option<f32>,
    #[arg(long)]
    pub lambda_cls: Option<f32>,
    #[arg(long)]
    pub lambda_mask: Option<f32>,
}

/// On-disk TOML form; every field optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrainConfigFile {
    pub dataset_root: Option<String>,
    pub images_subdir: Option<String>,
    pub masks_subdir: Option<String>,
    pub detector: Option<DetectorKind>,
    pub backend: Option<BackendKind>,
    pub optimizer: Option<OptimizerKind>,
    pub num_classes: Option<usize>,
    /// `[class_map]` table; TOML keys are strings, so ids are parsed on merge.
    pub class_map: Option<BTreeMap<String, u32>>,
    pub epochs: Option<usize>,
    pub batch_size: Option<usize>,
    pub lr: Option<f64>,
    pub momentum: Option<f64>,
    pub weight_decay: Option<f64>,
    pub lr_step_size: Option<usize>,
    pub lr_gamma: Option<f64>,
    pub warmup_factor: Option<f64>,
    pub warmup_iters: Option<usize>,
    pub holdout: Option<usize>,
    pub seed: Option<u64>,
    pub image_size: Option<String>,
    pub max_boxes: Option<usize>,
    pub mask_size: Option<usize>,
    pub hidden: Option<usize>,
    pub pretrained: Option<String>,
    pub freeze_backbone: Option<bool>,
    pub checkpoint: Option<String>,
    pub checkpoint_every: Option<usize>,
    pub resume: Option<bool>,
    pub report: Option<String>,
    pub metrics_path: Option<String>,
    pub log_dir: Option<String>,
    pub print_freq: Option<usize>,
    pub eval: Option<bool>,
    pub score_thresh: Option<f32>,
    pub iou_thresh: Option<f32>,
    pub lambda_obj: Option<f32>,
    pub lambda_box: Option<f32>,
    pub lambda_cls: Option<f32>,
    pub lambda_mask: Option<f32>,
}

impl TrainConfigFile {
    pub fn from_path(path: &Path) -> TrainResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| TrainError::io(path, e))?;
        toml::from_str(&raw)
            .map_err(|e| TrainError::Config(format!("{}: {e}", path.display())))
    }
}

/// Fully resolved settings for one training run.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainConfig {
    pub dataset: DatasetLayout,
    pub detector: DetectorKind,
    pub backend: BackendKind,
    pub optimizer: OptimizerKind,
    pub num_classes: usize,
    /// Mask instance id to class label; empty means every instance is class 1.
    pub class_map: BTreeMap<u32, u32>,
    pub epochs: usize,
    pub batch_size: usize,
    pub lr: f64,
    pub momentum: f64,
    pub weight_decay: f64,
    pub lr_step_size: usize,
    pub lr_gamma: f64,
    pub warmup_factor: f64,
    pub warmup_iters: usize,
    pub holdout: usize,
    pub seed: u64,
    pub image_size: Option<(u32, u32)>,
    pub max_boxes: usize,
    pub mask_size: usize,
    pub hidden: usize,
    pub pretrained: Option<PathBuf>,
    pub freeze_backbone: bool,
    pub checkpoint: PathBuf,
    pub checkpoint_every: usize,
    pub resume: bool,
    pub report: PathBuf,
    pub metrics_path: PathBuf,
    pub log_dir: Option<PathBuf>,
    pub print_freq: usize,
    pub eval: bool,
    pub score_thresh: f32,
    pub iou_thresh: f32,
    pub loss_weights: LossWeights,
}

impl Default for TrainConfig {
    fn default() -> Self {
        let schedule = LrSchedule::default();
        Self {
            dataset: DatasetLayout::default(),
            detector: DetectorKind::MaskRcnn,
            backend: BackendKind::NdArray,
            optimizer: OptimizerKind::Sgd,
            num_classes: 2,
            class_map: BTreeMap::new(),
            epochs: 10,
            batch_size: 2,
            lr: schedule.base_lr,
            momentum: 0.9,
            weight_decay: 0.0005,
            lr_step_size: schedule.step_size,
            lr_gamma: schedule.gamma,
            warmup_factor: schedule.warmup_factor,
            warmup_iters: schedule.warmup_iters_max,
            holdout: 50,
            seed: 42,
            image_size: Some((128, 128)),
            max_boxes: 16,
            mask_size: 14,
            hidden: 128,
            pretrained: None,
            freeze_backbone: false,
            checkpoint: PathBuf::from("checkpoints/detector.bin"),
            checkpoint_every: 1,
            resume: false,
            report: PathBuf::from("reports/metrics.pdf"),
            metrics_path: PathBuf::from("logs/metrics.jsonl"),
            log_dir: None,
            print_freq: 10,
            eval: true,
            score_thresh: 0.5,
            iou_thresh: 0.5,
            loss_weights: LossWeights::default(),
        }
    }
}

impl TrainConfig {
    /// Load `--config` when given and merge it under the CLI flags.
    pub fn resolve(args: &TrainArgs) -> TrainResult<Self> {
        let file = match &args.config {
            Some(path) => TrainConfigFile::from_path(&expand_path(&path.to_string_lossy()))?,
            None => TrainConfigFile::default(),
        };
        Self::merge(args, file)
    }

    pub fn merge(args: &TrainArgs, file: TrainConfigFile) -> TrainResult<Self> {
        let d = Self::default();
        let path = |cli: &Option<PathBuf>, file: Option<String>| -> Option<PathBuf> {
            cli.clone().or_else(|| file.map(|v| expand_path(&v)))
        };
        let image_size = match args.image_size.clone().or(file.image_size) {
            Some(raw) => parse_image_size(&raw)?,
            None => d.image_size,
        };
        let defaults_w = d.loss_weights;
        let class_map = match (&args.class_map, file.class_map) {
            (Some(raw), _) => parse_class_map(raw)?,
            (None, Some(table)) => table
                .into_iter()
                .map(|(id, label)| -> TrainResult<(u32, u32)> {
                    Ok((parse_mask_id(&id)?, label))
                })
                .collect::<TrainResult<_>>()?,
            (None, None) => d.class_map,
        };

        let cfg = Self {
            dataset: DatasetLayout {
                root: path(&args.dataset_root, file.dataset_root).unwrap_or(d.dataset.root),
                images_subdir: args
                    .images_subdir
                    .clone()
                    .or(file.images_subdir)
                    .unwrap_or(d.dataset.images_subdir),
                masks_subdir: args
                    .masks_subdir
                    .clone()
                    .or(file.masks_subdir)
                    .unwrap_or(d.dataset.masks_subdir),
            },
            detector: args.detector.or(file.detector).unwrap_or(d.detector),
            backend: args.backend.or(file.backend).unwrap_or(d.backend),
            optimizer: args.optimizer.or(file.optimizer).unwrap_or(d.optimizer),
            num_classes: args.num_classes.or(file.num_classes).unwrap_or(d.num_classes),
            class_map,
            epochs: args.epochs.or(file.epochs).unwrap_or(d.epochs),
            batch_size: args.batch_size.or(file.batch_size).unwrap_or(d.batch_size),
            lr: args.lr.or(file.lr).unwrap_or(d.lr),
            momentum: args.momentum.or(file.momentum).unwrap_or(d.momentum),
            weight_decay: args.weight_decay.or(file.weight_decay).unwrap_or(d.weight_decay),
            lr_step_size: args.lr_step_size.or(file.lr_step_size).unwrap_or(d.lr_step_size),
            lr_gamma: args.lr_gamma.or(file.lr_gamma).unwrap_or(d.lr_gamma),
            warmup_factor: args.warmup_factor.or(file.warmup_factor).unwrap_or(d.warmup_factor),
            warmup_iters: args.warmup_iters.or(file.warmup_iters).unwrap_or(d.warmup_iters),
            holdout: args.holdout.or(file.holdout).unwrap_or(d.holdout),
            seed: args.seed.or(file.seed).unwrap_or(d.seed),
            image_size,
            max_boxes: args.max_boxes.or(file.max_boxes).unwrap_or(d.max_boxes),
            mask_size: args.mask_size.or(file.mask_size).unwrap_or(d.mask_size),
            hidden: args.hidden.or(file.hidden).unwrap_or(d.hidden),
            pretrained: path(&args.pretrained, file.pretrained),
            freeze_backbone: args
                .freeze_backbone
                .or(file.freeze_backbone)
                .unwrap_or(d.freeze_backbone),
            checkpoint: path(&args.checkpoint, file.checkpoint).unwrap_or(d.checkpoint),
            checkpoint_every: args
                .checkpoint_every
                .or(file.checkpoint_every)
                .unwrap_or(d.checkpoint_every),
            resume: args.resume.or(file.resume).unwrap_or(d.resume),
            report: path(&args.report, file.report).unwrap_or(d.report),
            metrics_path: path(&args.metrics_path, file.metrics_path).unwrap_or(d.metrics_path),
            log_dir: path(&args.log_dir, file.log_dir),
            print_freq: args.print_freq.or(file.print_freq).unwrap_or(d.print_freq),
            eval: args.eval.or(file.eval).unwrap_or(d.eval),
            score_thresh: args.score_thresh.or(file.score_thresh).unwrap_or(d.score_thresh),
            iou_thresh: args.iou_thresh.or(file.iou_thresh).unwrap_or(d.iou_thresh),
            loss_weights: LossWeights {
                objectness: args.lambda_obj.or(file.lambda_obj).unwrap_or(defaults_w.objectness),
                box_reg: args.lambda_box.or(file.lambda_box).unwrap_or(defaults_w.box_reg),
                classifier: args.lambda_cls.or(file.lambda_cls).unwrap_or(defaults_w.classifier),
                mask: args.lambda_mask.or(file.lambda_mask).unwrap_or(defaults_w.mask),
            },
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> TrainResult<()> {
        let fail = |msg: &str| Err(TrainError::Config(msg.to_string()));
        if self.num_classes < 2 {
            return fail("num_classes must count background plus at least one class");
        }
        if self.class_map.is_empty() && self.num_classes > 2 {
            return fail("num_classes above 2 needs a class_map assigning mask ids to classes");
        }
        if let Some((id, label)) = self
            .class_map
            .iter()
            .find(|(_, label)| **label == 0 || **label as usize >= self.num_classes)
        {
            return Err(TrainError::Config(format!(
                "class_map sends mask id {id} to label {label}, outside 1..{}",
                self.num_classes
            )));
        }
        if self.epochs == 0 {
            return fail("epochs must be at least 1");
        }
        if self.batch_size == 0 {
            return fail("batch_size must be at least 1");
        }
        if !self.lr.is_finite() || self.lr <= 0.0 {
            return fail("lr must be finite and positive");
        }
        if self.checkpoint_every == 0 {
            return fail("checkpoint_every must be at least 1");
        }
        if self.mask_size == 0 || self.max_boxes == 0 {
            return fail("mask_size and max_boxes must be at least 1");
        }
        Ok(())
    }

    pub fn schedule(&self) -> LrSchedule {
        LrSchedule {
            base_lr: self.lr,
            warmup_factor: self.warmup_factor,
            warmup_iters_max: self.warmup_iters,
            step_size: self.lr_step_size,
            gamma: self.lr_gamma,
        }
    }

    pub fn detector_config(&self) -> DetectorConfig {
        DetectorConfig {
            num_classes: self.num_classes,
            max_detections: self.max_boxes,
            hidden: self.hidden,
            mask_size: self.mask_size,
            with_masks: self.detector.with_masks(),
            ..DetectorConfig::default()
        }
    }

    pub fn loader_config(&self) -> LoaderConfig {
        LoaderConfig {
            target_size: self.image_size,
            mask_size: self.mask_size,
            max_boxes: self.max_boxes,
            seed: Some(self.seed),
            class_map: self.class_map.clone(),
            ..LoaderConfig::default()
        }
    }

    pub fn eval_config(&self) -> EvalConfig {
        EvalConfig {
            score_thresh: self.score_thresh,
            iou_thresh: self.iou_thresh,
            batch_size: self.batch_size,
        }
    }
}

/// Parse `WxH` (or `none`) into a force-resize target.
pub fn parse_image_size(raw: &str) -> TrainResult<Option<(u32, u32)>> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("none") {
        return Ok(None);
    }
    let parsed = raw
        .split_once(['x', 'X'])
        .and_then(|(w, h)| Some((w.trim().parse().ok()?, h.trim().parse().ok()?)));
    match parsed {
        Some((w, h)) if w > 0 && h > 0 => Ok(Some((w, h))),
        _ => Err(TrainError::Config(format!(
            "image_size must look like 128x128 or none, got '{raw}'"
        ))),
    }
}

fn parse_mask_id(raw: &str) -> TrainResult<u32> {
    raw.trim()
        .parse()
        .map_err(|_| TrainError::Config(format!("class_map id '{raw}' is not an integer")))
}

/// Parse `id=label` pairs separated by commas, e.g. `1=1,2=2`.
pub fn parse_class_map(raw: &str) -> TrainResult<BTreeMap<u32, u32>> {
    raw.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| -> TrainResult<(u32, u32)> {
            let (id, label) = pair.split_once('=').ok_or_else(|| {
                TrainError::Config(format!("class_map entry '{pair}' must look like id=label"))
            })?;
            let label: u32 = label.trim().parse().map_err(|_| {
                TrainError::Config(format!("class_map label '{label}' is not an integer"))
            })?;
            Ok((parse_mask_id(id)?, label))
        })
        .collect()
}

/// Expand a leading `~` and `${VAR}` references.
pub fn expand_path(raw: &str) -> PathBuf {
    let mut out = raw.to_string();
    if let Some(stripped) = out.strip_prefix('~') {
        if let Ok(home) = std::env::var("HOME") {
            out = format!("{home}{stripped}");
        }
    }
    PathBuf::from(expand_env(&out))
}

fn expand_env(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let key = &after[..end];
                match std::env::var(key) {
                    Ok(val) => out.push_str(&val),
                    Err(_) => out.push_str(&format!("${{{key}}}")),
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}
