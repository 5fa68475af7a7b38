//! Training-state sidecar persisted next to every checkpoint.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Aggregated metrics for one finished epoch.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EpochRecord {
    pub epoch: usize,
    pub lr: f64,
    /// Global average of every logged loss term over the epoch (e.g. `loss`, `loss_box_reg`).
    pub losses: BTreeMap<String, f64>,
    pub precision: Option<f64>,
    pub recall: Option<f64>,
    pub duration_secs: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TrainingState {
    /// Last completed epoch (0-based).
    pub epoch: usize,
    pub global_step: u64,
    pub lr: f64,
    pub history: Vec<EpochRecord>,
    /// Fingerprint of the detector config; resume refuses a mismatching model.
    pub model_config_digest: String,
}

impl TrainingState {
    pub fn next_epoch(&self) -> usize {
        if self.history.is_empty() {
            0
        } else {
            self.epoch + 1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_epoch_follows_history() {
        let mut state = TrainingState::default();
        assert_eq!(state.next_epoch(), 0);
        state.history.push(EpochRecord::default());
        state.epoch = 0;
        assert_eq!(state.next_epoch(), 1);
    }

    #[test]
    fn json_keeps_loss_names() {
        let mut losses = BTreeMap::new();
        losses.insert("loss_mask".to_string(), 0.25);
        let state = TrainingState {
            epoch: 2,
            global_step: 30,
            lr: 0.0005,
            history: vec![EpochRecord {
                epoch: 2,
                lr: 0.0005,
                losses,
                precision: Some(0.5),
                recall: None,
                duration_secs: 1.5,
            }],
            model_config_digest: "abc".into(),
        };
        let raw = serde_json::to_string(&state).unwrap();
        assert!(raw.contains("loss_mask"));
        let back: TrainingState = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, state);
    }
}
