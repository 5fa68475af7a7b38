//! Epoch loop with checkpoint resume, smoothed metrics, and the non-finite loss guard.

use crate::checkpoint::{load_checkpoint, save_checkpoint, CheckpointPaths};
use crate::error::TrainResult;
use crate::eval::{evaluate, EvalConfig, EvalSummary};
use crate::loss::{compute_losses, ensure_finite, LossWeights};
use crate::metrics::{append_jsonl, write_jsonl, MetricLogger};
use crate::report::write_pdf_report;
use crate::schedule::LrSchedule;
use burn::module::AutodiffModule;
use burn::optim::{GradientsParams, Optimizer};
use burn::tensor::backend::AutodiffBackend;
use burn_dataset::{BatchIter, LoaderConfig, SampleIndex};
use data_contracts::{EpochRecord, RunManifest, TrainingState};
use models::{Detector, DetectorConfig};
use std::path::PathBuf;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub epochs: usize,
    pub batch_size: usize,
    pub schedule: LrSchedule,
    pub loss_weights: LossWeights,
    /// Base loader settings; the shuffle seed is offset by the epoch index.
    pub loader: LoaderConfig,
    pub checkpoint: PathBuf,
    pub checkpoint_every: usize,
    pub resume: bool,
    pub report: Option<PathBuf>,
    pub metrics_path: Option<PathBuf>,
    pub print_freq: usize,
    /// Held-out evaluation after each epoch; `None` skips it.
    pub eval: Option<EvalConfig>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            epochs: 10,
            batch_size: 2,
            schedule: LrSchedule::default(),
            loss_weights: LossWeights::default(),
            loader: LoaderConfig::default(),
            checkpoint: PathBuf::from("checkpoints/detector.bin"),
            checkpoint_every: 1,
            resume: false,
            report: Some(PathBuf::from("reports/metrics.pdf")),
            metrics_path: Some(PathBuf::from("logs/metrics.jsonl")),
            print_freq: 10,
            eval: Some(EvalConfig::default()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FitSummary {
    /// First epoch run by this call (non-zero after a resume).
    pub start_epoch: usize,
    pub epochs_run: usize,
    pub global_step: u64,
    pub history: Vec<EpochRecord>,
    pub last_eval: Option<EvalSummary>,
    pub checkpoint: PathBuf,
}

pub struct TrainingManager<B: AutodiffBackend> {
    cfg: ManagerConfig,
    model_cfg: DetectorConfig,
    manifest: Option<RunManifest>,
    device: B::Device,
}

impl<B: AutodiffBackend> TrainingManager<B> {
    pub fn new(cfg: ManagerConfig, model_cfg: DetectorConfig, device: B::Device) -> Self {
        Self {
            cfg,
            model_cfg,
            manifest: None,
            device,
        }
    }

    /// Manifest written next to every checkpoint.
    pub fn with_manifest(mut self, manifest: RunManifest) -> Self {
        self.manifest = Some(manifest);
        self
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.cfg
    }

    pub fn fit<O>(
        &self,
        model: Detector<B>,
        optim: O,
        train: &[SampleIndex],
        test: &[SampleIndex],
    ) -> TrainResult<(Detector<B>, FitSummary)>
    where
        O: Optimizer<Detector<B>, B>,
    {
        let paths = CheckpointPaths::new(&self.cfg.checkpoint);
        let (mut model, mut optim, mut state) = if self.cfg.resume && paths.exists() {
            let (model, optim, state) =
                load_checkpoint(&paths, model, optim, &self.model_cfg, &self.device)?;
            tracing::info!(
                path = %paths.model.display(),
                epoch = state.epoch,
                step = state.global_step,
                "resumed from checkpoint"
            );
            (model, optim, state)
        } else {
            if self.cfg.resume {
                tracing::warn!(
                    path = %paths.model.display(),
                    "resume requested but no complete checkpoint found; starting fresh"
                );
            }
            let state = TrainingState {
                model_config_digest: self.model_cfg.digest(),
                ..TrainingState::default()
            };
            (model, optim, state)
        };

        // The log starts as exactly the checkpointed epochs.
        if let Some(path) = &self.cfg.metrics_path {
            write_jsonl(path, &state.history)?;
        }

        let start_epoch = state.next_epoch();
        if start_epoch >= self.cfg.epochs {
            tracing::info!(
                completed = start_epoch,
                requested = self.cfg.epochs,
                "nothing left to train"
            );
        }

        let mut last_eval = None;
        for epoch in start_epoch..self.cfg.epochs {
            let started = Instant::now();
            let (next, mut record) =
                self.train_one_epoch(model, &mut optim, &mut state, epoch, train)?;
            model = next;

            if let Some(eval_cfg) = &self.cfg.eval {
                if !test.is_empty() {
                    let summary = self.evaluate_split(&model, eval_cfg, test)?;
                    record.precision = Some(summary.precision());
                    record.recall = Some(summary.recall());
                    last_eval = Some(summary);
                }
            }
            record.duration_secs = started.elapsed().as_secs_f64();

            state.epoch = epoch;
            state.lr = record.lr;
            state.history.push(record.clone());
            if let Some(path) = &self.cfg.metrics_path {
                append_jsonl(path, &record)?;
            }

            let every = self.cfg.checkpoint_every.max(1);
            if epoch % every == 0 || epoch + 1 == self.cfg.epochs {
                save_checkpoint(
                    &paths,
                    &model,
                    &optim,
                    &self.model_cfg,
                    &state,
                    self.manifest.as_ref(),
                )?;
            }
            tracing::info!(
                epoch,
                lr = record.lr,
                loss = record.losses.get("loss").copied().unwrap_or(f64::NAN),
                secs = %format!("{:.1}", record.duration_secs),
                "epoch complete"
            );
        }

        if let Some(path) = &self.cfg.report {
            write_pdf_report(path, &state.history)?;
        }

        let summary = FitSummary {
            start_epoch,
            epochs_run: self.cfg.epochs.saturating_sub(start_epoch),
            global_step: state.global_step,
            history: state.history,
            last_eval,
            checkpoint: paths.model,
        };
        Ok((model, summary))
    }

    fn train_one_epoch<O>(
        &self,
        mut model: Detector<B>,
        optim: &mut O,
        state: &mut TrainingState,
        epoch: usize,
        train: &[SampleIndex],
    ) -> TrainResult<(Detector<B>, EpochRecord)>
    where
        O: Optimizer<Detector<B>, B>,
    {
        let loader = LoaderConfig {
            seed: self.cfg.loader.seed.map(|s| s.wrapping_add(epoch as u64)),
            ..self.cfg.loader.clone()
        };
        let mut iter = BatchIter::from_indices(train.to_vec(), loader);
        let iters = iter.num_batches(self.cfg.batch_size);
        let mut logger = MetricLogger::new(self.cfg.print_freq);
        let header = format!("Epoch: [{epoch}]");
        let started = Instant::now();
        let mut lr = self.cfg.schedule.epoch_lr(epoch);
        let mut step = 0usize;

        while let Some(batch) = iter.next_batch::<B>(self.cfg.batch_size, &self.device)? {
            lr = self.cfg.schedule.lr_at(epoch, step, iters);
            let out = model.forward(batch.images.clone());
            let loss = compute_losses(&out, &batch, &self.cfg.loss_weights);
            let value = loss.value();
            ensure_finite(value, &loss.breakdown)?;

            let grads = GradientsParams::from_grads(loss.total.backward(), &model);
            model = optim.step(lr, model, grads);
            state.global_step += 1;

            logger.update("loss", value as f64);
            for (name, v) in loss.breakdown.entries() {
                logger.update(name, v as f64);
            }
            logger.log_iteration(&header, step, iters, started.elapsed(), lr);
            step += 1;
        }

        if step == 0 {
            tracing::warn!(epoch, "epoch produced no batches");
        }
        let (skipped_empty, skipped_errors) = iter.skipped();
        if skipped_empty + skipped_errors > 0 {
            tracing::debug!(epoch, skipped_empty, skipped_errors, "samples skipped");
        }

        let record = EpochRecord {
            epoch,
            lr,
            losses: logger.global_averages(),
            ..EpochRecord::default()
        };
        Ok((model, record))
    }

    fn evaluate_split(
        &self,
        model: &Detector<B>,
        eval_cfg: &EvalConfig,
        test: &[SampleIndex],
    ) -> TrainResult<EvalSummary> {
        let valid = model.valid();
        let mut iter = BatchIter::from_indices(test.to_vec(), self.cfg.loader.for_eval());
        evaluate::<B::InnerBackend>(&valid, &mut iter, eval_cfg, &self.device)
    }
}
