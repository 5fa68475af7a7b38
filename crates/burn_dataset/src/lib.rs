//! Dataset loading, splitting, and Burn-compatible batching for instance-mask datasets.
//!
//! This crate provides utilities for:
//! - Indexing `<root>/<images>` + `<root>/<masks>` layouts
//! - Decoding color-coded instance masks into boxes and mask crops
//! - Seeded train/test splitting
//! - Dataset summaries with pass/warn/fail thresholds
//! - Burn-compatible batch iteration

pub mod layout;
pub mod masks;
pub mod splits;
pub mod types;
pub mod validation;

#[cfg(feature = "burn-runtime")]
pub mod batch;

pub use layout::{index_dataset, load_dataset, load_sample, rgb_to_chw, summarize_dataset};
pub use masks::{crop_mask, decode_instances, InstanceKeys};
pub use splits::split_train_test;
pub use types::*;
pub use validation::{summarize_layout_with_thresholds, summarize_with_thresholds, validate_summary};

#[cfg(feature = "burn-runtime")]
pub use batch::{collate, BatchIter, DetectionBatch};
