use crate::loss::LossBreakdown;
use burn_dataset::BurnDatasetError;
use std::path::PathBuf;
use thiserror::Error;

pub type TrainResult<T> = Result<T, TrainError>;

#[derive(Debug, Error)]
pub enum TrainError {
    #[error("loss is {value}, stopping training: {breakdown}")]
    NonFiniteLoss {
        value: f32,
        breakdown: LossBreakdown,
    },
    #[error(transparent)]
    Dataset(#[from] BurnDatasetError),
    #[error("checkpoint record error at {path}: {msg}")]
    Recorder { path: PathBuf, msg: String },
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("image error at {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("json error at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("checkpoint {path} was trained with model config {found}, current config is {expected}")]
    ConfigMismatch {
        path: PathBuf,
        found: String,
        expected: String,
    },
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl TrainError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        TrainError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn recorder(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        TrainError::Recorder {
            path: path.into(),
            msg: err.to_string(),
        }
    }
}
