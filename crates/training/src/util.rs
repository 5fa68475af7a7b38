use crate::checkpoint::{read_json, CheckpointPaths};
use crate::config::{BackendKind, OptimizerKind, TrainConfig};
use crate::manager::{FitSummary, ManagerConfig, TrainingManager};
use crate::TrainBackend;
use anyhow::Context;
use burn::backend::Autodiff;
use burn::optim::decay::WeightDecayConfig;
use burn::optim::momentum::MomentumConfig;
use burn::optim::{AdamConfig, Optimizer, SgdConfig};
use burn::tensor::backend::Backend;
use burn_dataset::{
    index_dataset, split_train_test, summarize_with_thresholds, DatasetLayout, SampleIndex,
    ValidationOutcome, ValidationThresholds,
};
use data_contracts::{RunManifest, RunManifestSchemaVersion};
use models::{load_pretrained, Detector, DetectorConfig};
use std::path::PathBuf;

pub type ADBackend = Autodiff<TrainBackend>;

pub fn validate_backend_choice(kind: BackendKind) -> anyhow::Result<()> {
    let built_wgpu = cfg!(feature = "backend-wgpu");
    match (kind, built_wgpu) {
        (BackendKind::Wgpu, false) => {
            anyhow::bail!("backend-wgpu feature not enabled; rebuild with --features backend-wgpu or choose ndarray backend")
        }
        (BackendKind::NdArray, true) => {
            tracing::warn!("built with backend-wgpu; training will still use the WGPU backend despite --backend ndarray");
        }
        _ => {}
    }
    Ok(())
}

/// Fresh detector, or a pretrained backbone with predictors shaped by `cfg`.
///
/// Fails when the pretrained backbone shape differs from the one `cfg` builds.
pub fn build_model<B: Backend>(
    cfg: &TrainConfig,
    device: &B::Device,
) -> anyhow::Result<Detector<B>> {
    let target = cfg.detector_config();
    let model = match &cfg.pretrained {
        Some(path) => {
            let paths = CheckpointPaths::new(path);
            let pretrained_cfg: DetectorConfig = read_json(&paths.model_config)
                .with_context(|| format!("pretrained config sidecar for {}", path.display()))?;
            if !pretrained_cfg.backbone_matches(&target) {
                anyhow::bail!(
                    "pretrained {} has backbone hidden={} channels={:?} pool={}, \
                     but this run needs hidden={} channels={:?} pool={}",
                    path.display(),
                    pretrained_cfg.hidden,
                    pretrained_cfg.backbone_channels,
                    pretrained_cfg.pool_size,
                    target.hidden,
                    target.backbone_channels,
                    target.pool_size
                );
            }
            let model = load_pretrained::<B, _>(&paths.model, &pretrained_cfg, &target, device)
                .map_err(|e| anyhow::anyhow!("failed to load pretrained {}: {e}", path.display()))?;
            tracing::info!(
                path = %paths.model.display(),
                from_classes = pretrained_cfg.num_classes,
                to_classes = target.num_classes,
                "loaded pretrained detector and replaced predictors"
            );
            model
        }
        None => {
            tracing::warn!("no pretrained checkpoint given; training from a fresh initialization");
            Detector::new(&target, device)
        }
    };
    Ok(if cfg.freeze_backbone {
        model.freeze_backbone()
    } else {
        model
    })
}

pub fn build_manifest(
    cfg: &TrainConfig,
    train: &[SampleIndex],
    test: &[SampleIndex],
) -> RunManifest {
    RunManifest {
        schema_version: RunManifestSchemaVersion::V1,
        created_at: chrono::Utc::now(),
        dataset_root: cfg.dataset.root.clone(),
        images_subdir: cfg.dataset.images_subdir.clone(),
        masks_subdir: cfg.dataset.masks_subdir.clone(),
        checkpoint_path: cfg.checkpoint.clone(),
        report_path: cfg.report.clone(),
        detector_kind: cfg.detector.to_string(),
        num_classes: cfg.num_classes,
        class_map: cfg.class_map.clone(),
        epochs: cfg.epochs,
        batch_size: cfg.batch_size,
        base_lr: cfg.lr,
        seed: cfg.seed,
        image_size: cfg.image_size.map(|(w, h)| [w, h]),
        max_boxes: cfg.max_boxes,
        mask_size: cfg.mask_size,
        train_samples: train.len(),
        test_samples: test.len(),
    }
}

/// Dataset layout for evaluation: explicit flags, then the run manifest, then defaults.
pub fn eval_layout(
    root: Option<PathBuf>,
    images_subdir: Option<String>,
    masks_subdir: Option<String>,
    manifest: Option<&RunManifest>,
) -> DatasetLayout {
    let defaults = DatasetLayout::default();
    DatasetLayout {
        root: root
            .or_else(|| manifest.map(|m| m.dataset_root.clone()))
            .unwrap_or(defaults.root),
        images_subdir: images_subdir
            .or_else(|| manifest.map(|m| m.images_subdir.clone()))
            .unwrap_or(defaults.images_subdir),
        masks_subdir: masks_subdir
            .or_else(|| manifest.map(|m| m.masks_subdir.clone()))
            .unwrap_or(defaults.masks_subdir),
    }
}

pub fn manager_config(cfg: &TrainConfig) -> ManagerConfig {
    ManagerConfig {
        epochs: cfg.epochs,
        batch_size: cfg.batch_size,
        schedule: cfg.schedule(),
        loss_weights: cfg.loss_weights,
        loader: cfg.loader_config(),
        checkpoint: cfg.checkpoint.clone(),
        checkpoint_every: cfg.checkpoint_every,
        resume: cfg.resume,
        report: Some(cfg.report.clone()),
        metrics_path: Some(cfg.metrics_path.clone()),
        print_freq: cfg.print_freq,
        eval: cfg.eval.then(|| cfg.eval_config()),
    }
}

/// Index, check, and split the dataset described by `cfg`.
pub fn prepare_splits(cfg: &TrainConfig) -> anyhow::Result<(Vec<SampleIndex>, Vec<SampleIndex>)> {
    let indices = index_dataset(&cfg.dataset)
        .with_context(|| format!("indexing dataset at {}", cfg.dataset.root.display()))?;
    let report = summarize_with_thresholds(&indices, &ValidationThresholds::from_env());
    match report.outcome {
        ValidationOutcome::Fail => anyhow::bail!(
            "dataset at {} failed validation: {}",
            cfg.dataset.root.display(),
            report.reasons.join("; ")
        ),
        ValidationOutcome::Warn => {
            tracing::warn!(reasons = %report.reasons.join("; "), "dataset validation warnings")
        }
        ValidationOutcome::Pass => {}
    }
    tracing::info!(
        total = report.summary.total,
        instances = report.summary.instances,
        empty = report.summary.empty,
        "dataset indexed"
    );
    let (train, test) = split_train_test(indices, cfg.holdout, cfg.seed);
    tracing::info!(train = train.len(), test = test.len(), "split dataset");
    Ok((train, test))
}

pub fn run_train(cfg: &TrainConfig) -> anyhow::Result<FitSummary> {
    validate_backend_choice(cfg.backend)?;
    let (train, test) = prepare_splits(cfg)?;

    let device = <ADBackend as Backend>::Device::default();
    let model = build_model::<ADBackend>(cfg, &device)?;
    let manifest = build_manifest(cfg, &train, &test);
    manifest.validate().map_err(anyhow::Error::msg)?;
    let manager = TrainingManager::<ADBackend>::new(
        manager_config(cfg),
        cfg.detector_config(),
        device,
    )
    .with_manifest(manifest);

    let summary = match cfg.optimizer {
        OptimizerKind::Sgd => {
            let optim = SgdConfig::new()
                .with_momentum(Some(
                    MomentumConfig::new()
                        .with_momentum(cfg.momentum)
                        .with_dampening(0.0),
                ))
                .with_weight_decay(weight_decay(cfg))
                .init();
            fit_with(&manager, model, optim, &train, &test)?
        }
        OptimizerKind::Adam => {
            let optim = AdamConfig::new()
                .with_weight_decay(weight_decay(cfg))
                .init();
            fit_with(&manager, model, optim, &train, &test)?
        }
    };
    tracing::info!(
        checkpoint = %summary.checkpoint.display(),
        report = %cfg.report.display(),
        epochs_run = summary.epochs_run,
        "training finished"
    );
    Ok(summary)
}

fn weight_decay(cfg: &TrainConfig) -> Option<WeightDecayConfig> {
    (cfg.weight_decay > 0.0).then(|| WeightDecayConfig::new(cfg.weight_decay as f32))
}

fn fit_with<O>(
    manager: &TrainingManager<ADBackend>,
    model: Detector<ADBackend>,
    optim: O,
    train: &[SampleIndex],
    test: &[SampleIndex],
) -> anyhow::Result<FitSummary>
where
    O: Optimizer<Detector<ADBackend>, ADBackend>,
{
    let (_, summary) = manager.fit(model, optim, train, test)?;
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eval_layout_prefers_flags_then_manifest() {
        let cfg = TrainConfig {
            dataset: DatasetLayout {
                root: PathBuf::from("data/shapes"),
                images_subdir: "frames".into(),
                masks_subdir: "instances".into(),
            },
            ..TrainConfig::default()
        };
        let manifest = build_manifest(&cfg, &[], &[]);

        let layout = eval_layout(None, None, Some("labels".into()), Some(&manifest));
        assert_eq!(layout.root, PathBuf::from("data/shapes"));
        assert_eq!(layout.images_subdir, "frames");
        assert_eq!(layout.masks_subdir, "labels");

        let bare = eval_layout(None, None, None, None);
        assert_eq!(bare, DatasetLayout::default());
    }
}
