//! Core types, error definitions, and data structures for burn_dataset.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

pub type DatasetResult<T> = Result<T, BurnDatasetError>;

#[derive(Debug, Error)]
pub enum BurnDatasetError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("image decode error at {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("image/mask count mismatch: {images} images vs {masks} masks")]
    PairMismatch { images: usize, masks: usize },
    #[error("mask {mask} is {mask_w}x{mask_h} but image {image} is {image_w}x{image_h}")]
    SizeMismatch {
        image: PathBuf,
        mask: PathBuf,
        image_w: u32,
        image_h: u32,
        mask_w: u32,
        mask_h: u32,
    },
    #[error("target validation failed for {path}: {source}")]
    Validation {
        path: PathBuf,
        #[source]
        source: data_contracts::ValidationError,
    },
    #[error("{0}")]
    Other(String),
}

/// Directory layout of an instance-mask dataset (`<root>/<images>/`, `<root>/<masks>/`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DatasetLayout {
    pub root: PathBuf,
    pub images_subdir: String,
    pub masks_subdir: String,
}

impl DatasetLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Default::default()
        }
    }

    pub fn images_dir(&self) -> PathBuf {
        self.root.join(&self.images_subdir)
    }

    pub fn masks_dir(&self) -> PathBuf {
        self.root.join(&self.masks_subdir)
    }
}

impl Default for DatasetLayout {
    fn default() -> Self {
        Self {
            root: PathBuf::from("data/PennFudanPed"),
            images_subdir: "PNGImages".to_string(),
            masks_subdir: "PedMasks".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleIndex {
    /// Position in the sorted listing; stable across runs for the same directory.
    pub image_id: u64,
    pub image_path: PathBuf,
    pub mask_path: PathBuf,
}

/// One object instance recovered from a mask image.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceMask {
    /// Instance id for grey masks, packed RGB for colour masks.
    pub key: u32,
    /// Tight pixel box [x_min, y_min, x_max, y_max] (max is inclusive).
    pub bbox_px: [u32; 4],
    pub area: u32,
    /// Row-major binary mask over the full image.
    pub bitmap: Vec<bool>,
}

#[derive(Debug, Clone)]
pub struct DatasetSample {
    pub image_id: u64,
    /// Image in CHW layout, normalized to [0, 1].
    pub image_chw: Vec<f32>,
    pub width: u32,
    pub height: u32,
    /// Normalized bounding boxes: [x_min, y_min, x_max, y_max] in 0..1.
    pub boxes: Vec<[f32; 4]>,
    pub labels: Vec<u32>,
    /// Per-instance mask crop inside its box, `mask_size * mask_size` values in {0, 1}.
    pub mask_crops: Vec<Vec<f32>>,
    pub target: data_contracts::InstanceTarget,
}

#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Force-resize images (and masks, nearest) to this (width, height).
    pub target_size: Option<(u32, u32)>,
    /// Side of the square mask crop produced per instance.
    pub mask_size: usize,
    /// Cap on instances per image; extras are dropped, padding uses zeros with mask.
    pub max_boxes: usize,
    /// Label for instances missing from `class_map`.
    pub foreground_label: u32,
    /// Mask key (instance id) to class label; empty means one foreground class.
    pub class_map: BTreeMap<u32, u32>,
    /// Shuffle samples before iteration.
    pub shuffle: bool,
    /// Seed for reproducible shuffling.
    pub seed: Option<u64>,
    /// Skip images whose mask has no instances.
    pub skip_empty: bool,
    /// Skip unreadable samples with a warning instead of failing the batch.
    pub permissive_errors: bool,
    /// Log loader throughput every N samples (None disables).
    pub log_every_samples: Option<usize>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            target_size: Some((128, 128)),
            mask_size: 14,
            max_boxes: 16,
            foreground_label: 1,
            class_map: BTreeMap::new(),
            shuffle: true,
            seed: None,
            skip_empty: true,
            permissive_errors: true,
            log_every_samples: Some(1000),
        }
    }
}

impl LoaderConfig {
    pub fn label_for(&self, key: u32) -> u32 {
        self.class_map
            .get(&key)
            .copied()
            .unwrap_or(self.foreground_label)
    }

    /// Same settings without shuffling; used for held-out evaluation.
    pub fn for_eval(&self) -> Self {
        Self {
            shuffle: false,
            skip_empty: false,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DatasetSummary {
    pub total: usize,
    pub non_empty: usize,
    pub empty: usize,
    pub instances: usize,
    pub missing_mask: usize,
    pub invalid: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationOutcome {
    Pass,
    Warn,
    Fail,
}

impl ValidationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationOutcome::Pass => "pass",
            ValidationOutcome::Warn => "warn",
            ValidationOutcome::Fail => "fail",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationThresholds {
    pub max_invalid: Option<usize>,
    pub max_missing: Option<usize>,
    pub max_empty: Option<usize>,
    pub max_invalid_ratio: Option<f32>,
    pub max_missing_ratio: Option<f32>,
    pub max_empty_ratio: Option<f32>,
}

impl ValidationThresholds {
    pub fn from_env() -> Self {
        fn parse_usize(key: &str) -> Option<usize> {
            std::env::var(key).ok()?.parse().ok()
        }
        fn parse_ratio(key: &str) -> Option<f32> {
            std::env::var(key).ok()?.parse().ok()
        }
        ValidationThresholds {
            max_invalid: parse_usize("BURN_DATASET_MAX_INVALID"),
            max_missing: parse_usize("BURN_DATASET_MAX_MISSING"),
            max_empty: parse_usize("BURN_DATASET_MAX_EMPTY"),
            max_invalid_ratio: parse_ratio("BURN_DATASET_MAX_INVALID_RATIO"),
            max_missing_ratio: parse_ratio("BURN_DATASET_MAX_MISSING_RATIO"),
            max_empty_ratio: parse_ratio("BURN_DATASET_MAX_EMPTY_RATIO"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub outcome: ValidationOutcome,
    pub reasons: Vec<String>,
    pub summary: DatasetSummary,
}
