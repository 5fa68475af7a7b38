use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RunManifestSchemaVersion {
    V1,
}

/// Snapshot of the resolved configuration a checkpoint was trained with.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunManifest {
    pub schema_version: RunManifestSchemaVersion,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub dataset_root: PathBuf,
    pub images_subdir: String,
    pub masks_subdir: String,
    pub checkpoint_path: PathBuf,
    pub report_path: PathBuf,
    pub detector_kind: String,
    pub num_classes: usize,
    /// Mask instance id to class label; empty means a single foreground class.
    #[serde(default)]
    pub class_map: BTreeMap<u32, u32>,
    pub epochs: usize,
    pub batch_size: usize,
    pub base_lr: f64,
    pub seed: u64,
    /// Force-resize target used by the loader, as [width, height].
    pub image_size: Option<[u32; 2]>,
    pub max_boxes: usize,
    pub mask_size: usize,
    pub train_samples: usize,
    pub test_samples: usize,
}

impl RunManifest {
    pub fn validate(&self) -> Result<(), String> {
        if self.num_classes < 2 {
            return Err("num_classes must include background plus at least one class".into());
        }
        if self.images_subdir.is_empty() || self.masks_subdir.is_empty() {
            return Err("images_subdir and masks_subdir must be set".into());
        }
        if self.batch_size == 0 {
            return Err("batch_size cannot be zero".into());
        }
        if !self.base_lr.is_finite() || self.base_lr <= 0.0 {
            return Err("base_lr must be finite and positive".into());
        }
        Ok(())
    }
}
