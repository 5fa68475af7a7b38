use clap::Parser;
use std::path::PathBuf;
use training::checkpoint::{load_trained, read_json, CheckpointPaths};
use training::config::{parse_image_size, BackendKind};
use training::eval::{evaluate, EvalConfig};
use training::logging::init_tracing;
use training::util::{eval_layout, validate_backend_choice};
use training::TrainBackend;

use burn_dataset::{index_dataset, split_train_test, BatchIter, LoaderConfig};
use data_contracts::RunManifest;

#[derive(Parser, Debug)]
#[command(
    name = "eval",
    about = "Evaluate a detector checkpoint on the held-out split (precision/recall by IoU)"
)]
struct Args {
    /// Checkpoint to load; its model and manifest sidecars are read from next to it.
    #[arg(long, default_value = "checkpoints/detector.bin")]
    checkpoint: PathBuf,
    /// Backend to use (ndarray or wgpu if enabled).
    #[arg(long, value_enum, default_value_t = BackendKind::NdArray)]
    backend: BackendKind,
    /// Dataset root; defaults to the one recorded in the run manifest.
    #[arg(long)]
    dataset_root: Option<PathBuf>,
    /// Defaults to the manifest's, then `PNGImages`.
    #[arg(long)]
    images_subdir: Option<String>,
    /// Defaults to the manifest's, then `PedMasks`.
    #[arg(long)]
    masks_subdir: Option<String>,
    /// Held-out count; defaults to the manifest's test split.
    #[arg(long)]
    holdout: Option<usize>,
    #[arg(long)]
    seed: Option<u64>,
    /// Evaluate every sample instead of the held-out split.
    #[arg(long)]
    all: bool,
    /// Force-resize target (e.g. 128x128 or none); defaults to the manifest's.
    #[arg(long)]
    image_size: Option<String>,
    #[arg(long, default_value_t = 0.5)]
    score_thresh: f32,
    /// IoU threshold for true positive.
    #[arg(long, default_value_t = 0.5)]
    iou_thresh: f32,
    #[arg(long, default_value_t = 2)]
    batch_size: usize,
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _guard = init_tracing(args.log_dir.as_deref(), "eval")?;
    validate_backend_choice(args.backend)?;

    let paths = CheckpointPaths::new(&args.checkpoint);
    let manifest: Option<RunManifest> = if paths.manifest.exists() {
        Some(read_json(&paths.manifest)?)
    } else {
        tracing::warn!(path = %paths.manifest.display(), "no run manifest; using defaults");
        None
    };

    let layout = eval_layout(
        args.dataset_root.clone(),
        args.images_subdir.clone(),
        args.masks_subdir.clone(),
        manifest.as_ref(),
    );
    let indices = index_dataset(&layout)?;
    let samples = if args.all {
        indices
    } else {
        let holdout = args
            .holdout
            .or_else(|| manifest.as_ref().map(|m| m.test_samples))
            .unwrap_or(50);
        let seed = args
            .seed
            .or_else(|| manifest.as_ref().map(|m| m.seed))
            .unwrap_or(42);
        split_train_test(indices, holdout, seed).1
    };
    if samples.is_empty() {
        println!("No samples to evaluate under {}", layout.root.display());
        return Ok(());
    }

    let target_size = match &args.image_size {
        Some(raw) => parse_image_size(raw)?,
        None => manifest
            .as_ref()
            .map(|m| m.image_size.map(|[w, h]| (w, h)))
            .unwrap_or(Some((128, 128))),
    };

    let device = <TrainBackend as burn::tensor::backend::Backend>::Device::default();
    let (model, model_cfg) = load_trained::<TrainBackend>(&paths.model, &device)?;
    let loader = LoaderConfig {
        target_size,
        mask_size: model_cfg.mask_size,
        max_boxes: model_cfg.max_detections,
        class_map: manifest
            .as_ref()
            .map(|m| m.class_map.clone())
            .unwrap_or_default(),
        ..LoaderConfig::default()
    }
    .for_eval();
    let mut iter = BatchIter::from_indices(samples, loader);
    let cfg = EvalConfig {
        score_thresh: args.score_thresh,
        iou_thresh: args.iou_thresh,
        batch_size: args.batch_size,
    };
    let summary = evaluate::<TrainBackend>(&model, &mut iter, &cfg, &device)?;

    println!(
        "Eval complete: precision={:.3}, recall={:.3} (tp={}, fp={}, fn={}, iou_thresh={})",
        summary.precision(),
        summary.recall(),
        summary.tp,
        summary.fp,
        summary.fn_,
        args.iou_thresh
    );
    Ok(())
}
