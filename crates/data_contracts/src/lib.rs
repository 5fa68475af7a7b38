//! Shared data contracts for instance targets, run manifests, and training state.

pub mod manifest;
pub mod state;
pub mod target;

pub use manifest::{RunManifest, RunManifestSchemaVersion};
pub use state::{EpochRecord, TrainingState};
pub use target::{InstanceTarget, ValidationError, BACKGROUND_LABEL};
