//! Checkpoint layout and atomic save/load.
//!
//! A checkpoint at `checkpoints/detector.bin` owns these siblings:
//! `detector.optim.bin`, `detector.state.json`, `detector.model.json`,
//! and `detector.manifest.json`.

use crate::error::{TrainError, TrainResult};
use burn::module::Module;
use burn::optim::Optimizer;
use burn::record::{BinFileRecorder, FullPrecisionSettings, Recorder};
use burn::tensor::backend::{AutodiffBackend, Backend};
use data_contracts::{RunManifest, TrainingState};
use models::{Detector, DetectorConfig};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

type CheckpointRecorder = BinFileRecorder<FullPrecisionSettings>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointPaths {
    pub model: PathBuf,
    pub optimizer: PathBuf,
    pub state: PathBuf,
    pub model_config: PathBuf,
    pub manifest: PathBuf,
}

impl CheckpointPaths {
    pub fn new(model_path: impl AsRef<Path>) -> Self {
        let model = model_path.as_ref().with_extension("bin");
        let sibling = |suffix: &str| model.with_extension(suffix);
        Self {
            optimizer: sibling("optim.bin"),
            state: sibling("state.json"),
            model_config: sibling("model.json"),
            manifest: sibling("manifest.json"),
            model,
        }
    }

    /// A resumable checkpoint needs weights, optimizer state, and the state sidecar.
    pub fn exists(&self) -> bool {
        self.model.exists() && self.optimizer.exists() && self.state.exists()
    }
}

/// `detector.bin` → `detector.tmp.bin`; recorders keep the `.bin` extension as-is.
fn staging_path(path: &Path) -> PathBuf {
    path.with_extension("tmp.bin")
}

pub(crate) fn commit(staged: &Path, target: &Path) -> TrainResult<()> {
    fs::rename(staged, target).map_err(|e| TrainError::io(target, e))
}

pub(crate) fn ensure_parent(path: &Path) -> TrainResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| TrainError::io(parent, e))?;
    }
    Ok(())
}

pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> TrainResult<()> {
    ensure_parent(path)?;
    let raw = serde_json::to_vec_pretty(value).map_err(|source| TrainError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    let staged = path.with_extension("json.tmp");
    fs::write(&staged, raw).map_err(|e| TrainError::io(&staged, e))?;
    commit(&staged, path)
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> TrainResult<T> {
    let raw = fs::read(path).map_err(|e| TrainError::io(path, e))?;
    serde_json::from_slice(&raw).map_err(|source| TrainError::Json {
        path: path.to_path_buf(),
        source,
    })
}

pub fn save_model<B: Backend>(path: &Path, model: &Detector<B>) -> TrainResult<()> {
    ensure_parent(path)?;
    let staged = staging_path(path);
    model
        .clone()
        .save_file(staged.clone(), &CheckpointRecorder::new())
        .map_err(|e| TrainError::recorder(path, e))?;
    commit(&staged, path)
}

/// Write every artifact of a resumable checkpoint.
pub fn save_checkpoint<B, O>(
    paths: &CheckpointPaths,
    model: &Detector<B>,
    optim: &O,
    model_cfg: &DetectorConfig,
    state: &TrainingState,
    manifest: Option<&RunManifest>,
) -> TrainResult<()>
where
    B: AutodiffBackend,
    O: Optimizer<Detector<B>, B>,
{
    save_model(&paths.model, model)?;

    let staged = staging_path(&paths.optimizer);
    Recorder::<B>::record(&CheckpointRecorder::new(), optim.to_record(), staged.clone())
        .map_err(|e| TrainError::recorder(&paths.optimizer, e))?;
    commit(&staged, &paths.optimizer)?;

    write_json_atomic(&paths.model_config, model_cfg)?;
    if let Some(manifest) = manifest {
        write_json_atomic(&paths.manifest, manifest)?;
    }
    // State goes last: its presence marks the checkpoint as complete.
    write_json_atomic(&paths.state, state)?;
    tracing::info!(
        path = %paths.model.display(),
        epoch = state.epoch,
        step = state.global_step,
        "saved checkpoint"
    );
    Ok(())
}

/// Restore weights, optimizer state, and the state sidecar for resuming.
pub fn load_checkpoint<B, O>(
    paths: &CheckpointPaths,
    model: Detector<B>,
    optim: O,
    model_cfg: &DetectorConfig,
    device: &B::Device,
) -> TrainResult<(Detector<B>, O, TrainingState)>
where
    B: AutodiffBackend,
    O: Optimizer<Detector<B>, B>,
{
    let state: TrainingState = read_json(&paths.state)?;
    let expected = model_cfg.digest();
    if state.model_config_digest != expected {
        return Err(TrainError::ConfigMismatch {
            path: paths.model.clone(),
            found: state.model_config_digest,
            expected,
        });
    }
    let recorder = CheckpointRecorder::new();
    let model = model
        .load_file(paths.model.clone(), &recorder, device)
        .map_err(|e| TrainError::recorder(&paths.model, e))?;
    let record = Recorder::<B>::load(&recorder, paths.optimizer.clone(), device)
        .map_err(|e| TrainError::recorder(&paths.optimizer, e))?;
    let optim = optim.load_record(record);
    Ok((model, optim, state))
}

/// Rebuild a trained detector from its checkpoint and `model.json` sidecar.
pub fn load_trained<B: Backend>(
    model_path: impl AsRef<Path>,
    device: &B::Device,
) -> TrainResult<(Detector<B>, DetectorConfig)> {
    let paths = CheckpointPaths::new(model_path);
    let cfg: DetectorConfig = read_json(&paths.model_config)?;
    let model = models::load_detector::<B, _>(&paths.model, &cfg, device)
        .map_err(|e| TrainError::recorder(&paths.model, e))?;
    Ok((model, cfg))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sidecars_share_the_checkpoint_stem() {
        let paths = CheckpointPaths::new("checkpoints/detector.bin");
        assert_eq!(paths.model, PathBuf::from("checkpoints/detector.bin"));
        assert_eq!(paths.optimizer, PathBuf::from("checkpoints/detector.optim.bin"));
        assert_eq!(paths.state, PathBuf::from("checkpoints/detector.state.json"));
        assert_eq!(paths.model_config, PathBuf::from("checkpoints/detector.model.json"));
        assert_eq!(paths.manifest, PathBuf::from("checkpoints/detector.manifest.json"));
    }

    #[test]
    fn missing_extension_gets_bin() {
        let paths = CheckpointPaths::new("out/run1");
        assert_eq!(paths.model, PathBuf::from("out/run1.bin"));
        assert!(!paths.exists());
    }

    #[test]
    fn json_writes_are_atomic_replacements() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested/state.json");
        let mut state = TrainingState::default();
        write_json_atomic(&path, &state).unwrap();
        state.epoch = 4;
        write_json_atomic(&path, &state).unwrap();
        let back: TrainingState = read_json(&path).unwrap();
        assert_eq!(back.epoch, 4);
        assert!(!path.with_extension("json.tmp").exists());
    }
}
