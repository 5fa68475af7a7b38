#![recursion_limit = "256"]

//! Finetuning manager for Burn detectors.
//!
//! `TrainingManager::fit` runs the epoch loop: scheduled learning rate, weighted
//! detection losses, an abort on non-finite loss, optional held-out evaluation,
//! resumable checkpoints, and a PDF plot of the per-epoch history.

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod eval;
pub mod logging;
pub mod loss;
pub mod manager;
pub mod metrics;
pub mod predict;
pub mod report;
pub mod schedule;
pub mod targets;
pub mod util;

pub use checkpoint::{load_trained, CheckpointPaths};
pub use config::{BackendKind, OptimizerKind, TrainArgs, TrainConfig, TrainConfigFile};
pub use error::{TrainError, TrainResult};
pub use eval::{evaluate, match_detections, EvalConfig, EvalSummary};
pub use loss::{compute_losses, LossBreakdown, LossOutput, LossWeights};
pub use manager::{FitSummary, ManagerConfig, TrainingManager};
pub use metrics::{MetricLogger, MetricsHistory, SmoothedValue};
pub use predict::{decode_detections, render_overlay, Detection};
pub use report::write_pdf_report;
pub use schedule::LrSchedule;
pub use util::run_train;

/// Backend alias for training/eval (NdArray by default; WGPU if enabled).
#[cfg(feature = "backend-wgpu")]
pub type TrainBackend = burn_wgpu::Wgpu<f32>;
#[cfg(not(feature = "backend-wgpu"))]
pub type TrainBackend = burn_ndarray::NdArray<f32>;
