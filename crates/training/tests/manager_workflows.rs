//! Training-manager runs over a tiny synthetic dataset on the NdArray backend.

use burn::backend::{Autodiff, NdArray};
use burn::optim::{AdamConfig, SgdConfig};
use burn_dataset::{index_dataset, split_train_test, DatasetLayout, LoaderConfig, SampleIndex};
use data_contracts::{EpochRecord, TrainingState};
use image::{Rgb, RgbImage};
use models::{Detector, DetectorConfig};
use std::fs;
use std::path::Path;
use training::checkpoint::{load_trained, read_json, save_model, write_json_atomic, CheckpointPaths};
use training::config::TrainConfig;
use training::metrics::{append_jsonl, read_jsonl};
use training::util::build_model;
use training::{EvalConfig, LossWeights, ManagerConfig, TrainError, TrainingManager};

type B = Autodiff<NdArray<f32>>;

/// Six 16x16 frames with one or two solid-color pedestrians each.
fn create_dataset(root: &Path) -> anyhow::Result<Vec<SampleIndex>> {
    let layout = DatasetLayout::new(root);
    fs::create_dir_all(layout.images_dir())?;
    fs::create_dir_all(layout.masks_dir())?;
    for i in 0..6u32 {
        let img = RgbImage::from_pixel(16, 16, Rgb([(i * 30) as u8, 90, 160]));
        img.save(layout.images_dir().join(format!("FudanPed{i:05}.png")))?;
        let mut mask = RgbImage::new(16, 16);
        for inst in 0..(1 + i % 2) {
            let x0 = 1 + inst * 8;
            for y in 3..13 {
                for x in x0..x0 + 5 {
                    let v = inst as u8 + 1;
                    mask.put_pixel(x, y, Rgb([v, v, v]));
                }
            }
        }
        mask.save(layout.masks_dir().join(format!("FudanPed{i:05}_mask.png")))?;
    }
    Ok(index_dataset(&layout)?)
}

fn model_cfg() -> DetectorConfig {
    DetectorConfig {
        num_classes: 2,
        max_detections: 3,
        hidden: 8,
        backbone_channels: vec![4],
        pool_size: 2,
        mask_size: 4,
        with_masks: true,
    }
}

fn manager_cfg(out: &Path, epochs: usize) -> ManagerConfig {
    ManagerConfig {
        epochs,
        batch_size: 2,
        loader: LoaderConfig {
            target_size: Some((16, 16)),
            mask_size: 4,
            max_boxes: 3,
            seed: Some(7),
            log_every_samples: None,
            ..LoaderConfig::default()
        },
        checkpoint: out.join("checkpoints/detector.bin"),
        report: Some(out.join("reports/metrics.pdf")),
        metrics_path: Some(out.join("logs/metrics.jsonl")),
        print_freq: 1,
        eval: Some(EvalConfig {
            batch_size: 2,
            ..EvalConfig::default()
        }),
        ..ManagerConfig::default()
    }
}

fn splits(indices: Vec<SampleIndex>) -> (Vec<SampleIndex>, Vec<SampleIndex>) {
    split_train_test(indices, 2, 3)
}

#[test]
fn fit_writes_checkpoint_history_and_report() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let (train, test) = splits(create_dataset(&tmp.path().join("data"))?);
    let device = Default::default();
    let cfg = manager_cfg(tmp.path(), 2);
    let manager = TrainingManager::<B>::new(cfg.clone(), model_cfg(), device);

    let model = Detector::<B>::new(&model_cfg(), &Default::default());
    let optim = SgdConfig::new().init();
    let (_, summary) = manager.fit(model, optim, &train, &test)?;

    assert_eq!(summary.start_epoch, 0);
    assert_eq!(summary.epochs_run, 2);
    assert_eq!(summary.history.len(), 2);
    // Four training frames at batch size two.
    assert_eq!(summary.global_step, 4);
    let first = &summary.history[0];
    for key in ["loss", "loss_objectness", "loss_box_reg", "loss_classifier", "loss_mask"] {
        assert!(first.losses.get(key).is_some_and(|v| v.is_finite()), "{key}");
    }
    assert!(first.precision.is_some() && first.recall.is_some());
    assert!(summary.last_eval.is_some());

    let paths = CheckpointPaths::new(&cfg.checkpoint);
    assert!(paths.exists());
    assert!(paths.model_config.exists());
    let state: TrainingState = read_json(&paths.state)?;
    assert_eq!(state.epoch, 1);
    assert_eq!(state.history.len(), 2);
    assert_eq!(state.model_config_digest, model_cfg().digest());

    let jsonl = fs::read_to_string(tmp.path().join("logs/metrics.jsonl"))?;
    let lines: Vec<EpochRecord> = jsonl
        .lines()
        .map(serde_json::from_str)
        .collect::<Result<_, _>>()?;
    assert_eq!(lines.iter().map(|r| r.epoch).collect::<Vec<_>>(), vec![0, 1]);

    let pdf = fs::read(tmp.path().join("reports/metrics.pdf"))?;
    assert!(pdf.starts_with(b"%PDF-1.4"));

    let (reloaded, reloaded_cfg) =
        load_trained::<NdArray<f32>>(&paths.model, &Default::default())?;
    assert_eq!(reloaded_cfg, model_cfg());
    assert!(reloaded.has_masks());
    Ok(())
}

#[test]
fn non_finite_loss_aborts_before_any_checkpoint() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let (train, test) = splits(create_dataset(&tmp.path().join("data"))?);
    let mut cfg = manager_cfg(tmp.path(), 1);
    cfg.loss_weights = LossWeights {
        objectness: f32::NAN,
        ..LossWeights::default()
    };
    let manager = TrainingManager::<B>::new(cfg.clone(), model_cfg(), Default::default());
    let model = Detector::<B>::new(&model_cfg(), &Default::default());

    let err = manager
        .fit(model, AdamConfig::new().init(), &train, &test)
        .err()
        .expect("NaN loss must stop training");
    match err {
        TrainError::NonFiniteLoss { value, breakdown } => {
            assert!(value.is_nan());
            assert!(breakdown.loss_mask.is_some());
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!CheckpointPaths::new(&cfg.checkpoint).exists());
    assert!(!tmp.path().join("reports/metrics.pdf").exists());
    Ok(())
}

#[test]
fn resume_continues_after_last_completed_epoch() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let (train, test) = splits(create_dataset(&tmp.path().join("data"))?);

    let first = TrainingManager::<B>::new(manager_cfg(tmp.path(), 1), model_cfg(), Default::default());
    let model = Detector::<B>::new(&model_cfg(), &Default::default());
    let (_, summary) = first.fit(model, SgdConfig::new().init(), &train, &test)?;
    assert_eq!(summary.history.len(), 1);

    let mut cfg = manager_cfg(tmp.path(), 2);
    cfg.resume = true;
    let second = TrainingManager::<B>::new(cfg, model_cfg(), Default::default());
    let model = Detector::<B>::new(&model_cfg(), &Default::default());
    let (_, summary) = second.fit(model, SgdConfig::new().init(), &train, &test)?;

    assert_eq!(summary.start_epoch, 1);
    assert_eq!(summary.epochs_run, 1);
    assert_eq!(summary.history.len(), 2);
    assert_eq!(summary.history[0].epoch, 0);
    assert_eq!(summary.history[1].epoch, 1);
    assert_eq!(summary.global_step, 4);
    Ok(())
}

fn jsonl_epochs(out: &Path) -> anyhow::Result<Vec<usize>> {
    let records = read_jsonl(&out.join("logs/metrics.jsonl"))?;
    Ok(records.iter().map(|r| r.epoch).collect())
}

#[test]
fn fresh_fit_replaces_metrics_of_an_earlier_run() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let (train, test) = splits(create_dataset(&tmp.path().join("data"))?);
    for _ in 0..2 {
        let manager =
            TrainingManager::<B>::new(manager_cfg(tmp.path(), 2), model_cfg(), Default::default());
        let model = Detector::<B>::new(&model_cfg(), &Default::default());
        manager.fit(model, SgdConfig::new().init(), &train, &test)?;
    }
    assert_eq!(jsonl_epochs(tmp.path())?, vec![0, 1]);
    Ok(())
}

#[test]
fn resume_drops_metrics_logged_after_the_checkpoint() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let (train, test) = splits(create_dataset(&tmp.path().join("data"))?);
    let first = TrainingManager::<B>::new(manager_cfg(tmp.path(), 1), model_cfg(), Default::default());
    let model = Detector::<B>::new(&model_cfg(), &Default::default());
    first.fit(model, SgdConfig::new().init(), &train, &test)?;

    // A run that logged epoch 1 and died before checkpointing it.
    let lost = EpochRecord {
        epoch: 1,
        lr: 1.0,
        ..EpochRecord::default()
    };
    append_jsonl(&tmp.path().join("logs/metrics.jsonl"), &lost)?;
    assert_eq!(jsonl_epochs(tmp.path())?, vec![0, 1]);

    let mut cfg = manager_cfg(tmp.path(), 3);
    cfg.resume = true;
    let second = TrainingManager::<B>::new(cfg, model_cfg(), Default::default());
    let model = Detector::<B>::new(&model_cfg(), &Default::default());
    let (_, summary) = second.fit(model, SgdConfig::new().init(), &train, &test)?;

    let logged = read_jsonl(&tmp.path().join("logs/metrics.jsonl"))?;
    assert_eq!(logged.iter().map(|r| r.epoch).collect::<Vec<_>>(), vec![0, 1, 2]);
    assert_eq!(logged.len(), summary.history.len());
    for (line, kept) in logged.iter().zip(&summary.history) {
        assert_eq!(line.epoch, kept.epoch);
        assert_eq!(line.losses.get("loss"), kept.losses.get("loss"));
    }
    assert!(logged.iter().all(|r| r.lr != 1.0));
    Ok(())
}

#[test]
fn resume_rejects_checkpoint_of_a_different_model() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let (train, test) = splits(create_dataset(&tmp.path().join("data"))?);
    let first = TrainingManager::<B>::new(manager_cfg(tmp.path(), 1), model_cfg(), Default::default());
    let model = Detector::<B>::new(&model_cfg(), &Default::default());
    first.fit(model, SgdConfig::new().init(), &train, &test)?;

    let other_cfg = DetectorConfig {
        num_classes: 3,
        ..model_cfg()
    };
    let mut cfg = manager_cfg(tmp.path(), 2);
    cfg.resume = true;
    let second = TrainingManager::<B>::new(cfg, other_cfg.clone(), Default::default());
    let model = Detector::<B>::new(&other_cfg, &Default::default());
    let err = second
        .fit(model, SgdConfig::new().init(), &train, &test)
        .err()
        .expect("mismatched model config must fail");
    assert!(matches!(err, TrainError::ConfigMismatch { .. }));
    Ok(())
}

fn pretrained_on_disk(dir: &Path, cfg: &DetectorConfig) -> anyhow::Result<std::path::PathBuf> {
    let paths = CheckpointPaths::new(dir.join("pretrained/detector.bin"));
    save_model(&paths.model, &Detector::<NdArray<f32>>::new(cfg, &Default::default()))?;
    write_json_atomic(&paths.model_config, cfg)?;
    Ok(paths.model)
}

#[test]
fn pretrained_start_trains_with_target_head_shapes() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let (train, test) = splits(create_dataset(&tmp.path().join("data"))?);
    let base = TrainConfig {
        hidden: 8,
        max_boxes: 3,
        mask_size: 6,
        ..TrainConfig::default()
    };
    let pretrained = pretrained_on_disk(tmp.path(), &base.detector_config())?;

    let run = TrainConfig {
        mask_size: 4,
        pretrained: Some(pretrained),
        ..base
    };
    let target = run.detector_config();
    let model = build_model::<B>(&run, &Default::default())?;
    let manager = TrainingManager::<B>::new(
        manager_cfg(tmp.path(), 1),
        target.clone(),
        Default::default(),
    );
    let (model, summary) = manager.fit(model, SgdConfig::new().init(), &train, &test)?;
    assert_eq!(summary.history.len(), 1);
    assert_eq!(
        model.forward(burn::tensor::Tensor::zeros([1, 3, 16, 16], &Default::default()))
            .mask_logits
            .map(|m| m.dims()),
        Some([1, 3, 4, 4])
    );

    let (_, saved_cfg) = load_trained::<NdArray<f32>>(&summary.checkpoint, &Default::default())?;
    assert_eq!(saved_cfg, target);
    Ok(())
}

#[test]
fn pretrained_with_another_backbone_is_refused() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let base = TrainConfig {
        hidden: 8,
        ..TrainConfig::default()
    };
    let pretrained = pretrained_on_disk(tmp.path(), &base.detector_config())?;
    let run = TrainConfig {
        hidden: 16,
        pretrained: Some(pretrained),
        ..base
    };
    let err = build_model::<B>(&run, &Default::default())
        .err()
        .expect("backbone shapes differ");
    assert!(err.to_string().contains("backbone"));
    Ok(())
}
