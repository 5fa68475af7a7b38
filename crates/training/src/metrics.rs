//! Smoothed training metrics and per-epoch history.

use crate::checkpoint::{commit, ensure_parent};
use crate::error::{TrainError, TrainResult};
use data_contracts::EpochRecord;
use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_WINDOW: usize = 20;

/// Per-epoch records in training order, as restored from the state sidecar.
pub type MetricsHistory = Vec<EpochRecord>;

/// Windowed view of a series plus its global average.
#[derive(Debug, Clone)]
pub struct SmoothedValue {
    window: VecDeque<f64>,
    window_size: usize,
    total: f64,
    count: u64,
}

impl Default for SmoothedValue {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl SmoothedValue {
    pub fn new(window_size: usize) -> Self {
        let window_size = window_size.max(1);
        Self {
            window: VecDeque::with_capacity(window_size),
            window_size,
            total: 0.0,
            count: 0,
        }
    }

    pub fn update(&mut self, value: f64) {
        if self.window.len() == self.window_size {
            self.window.pop_front();
        }
        self.window.push_back(value);
        self.total += value;
        self.count += 1;
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn median(&self) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        let mut sorted: Vec<f64> = self.window.iter().copied().collect();
        sorted.sort_by(|a, b| a.total_cmp(b));
        // Lower median for even windows.
        sorted[(sorted.len() - 1) / 2]
    }

    pub fn avg(&self) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        self.window.iter().sum::<f64>() / self.window.len() as f64
    }

    pub fn global_avg(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total / self.count as f64
        }
    }

    pub fn max(&self) -> f64 {
        self.window.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }

    pub fn value(&self) -> f64 {
        self.window.back().copied().unwrap_or(0.0)
    }
}

/// Named meters logged every `print_freq` iterations.
#[derive(Debug, Clone)]
pub struct MetricLogger {
    meters: BTreeMap<String, SmoothedValue>,
    print_freq: usize,
}

impl MetricLogger {
    pub fn new(print_freq: usize) -> Self {
        Self {
            meters: BTreeMap::new(),
            print_freq: print_freq.max(1),
        }
    }

    pub fn update(&mut self, name: &str, value: f64) {
        self.meters.entry(name.to_string()).or_default().update(value);
    }

    pub fn meter(&self, name: &str) -> Option<&SmoothedValue> {
        self.meters.get(name)
    }

    pub fn global_averages(&self) -> BTreeMap<String, f64> {
        self.meters
            .iter()
            .map(|(k, v)| (k.clone(), v.global_avg()))
            .collect()
    }

    /// Renders `name: median (global_avg)` for every meter.
    pub fn render(&self) -> String {
        self.meters
            .iter()
            .map(|(k, v)| format!("{k}: {:.4} ({:.4})", v.median(), v.global_avg()))
            .collect::<Vec<_>>()
            .join("  ")
    }

    pub fn should_log(&self, iter: usize, total: usize) -> bool {
        iter % self.print_freq == 0 || iter + 1 == total
    }

    pub fn log_iteration(
        &self,
        header: &str,
        iter: usize,
        total: usize,
        elapsed: Duration,
        lr: f64,
    ) {
        if !self.should_log(iter, total) {
            return;
        }
        let done = (iter + 1) as f64;
        let per_iter = elapsed.as_secs_f64() / done;
        let eta = per_iter * total.saturating_sub(iter + 1) as f64;
        tracing::info!(
            "{header} [{iter:>4}/{total}] eta: {eta:.0}s lr: {lr:.6} {}",
            self.render()
        );
    }
}

/// Append one epoch record as a JSON line.
pub fn append_jsonl(path: &Path, record: &EpochRecord) -> TrainResult<()> {
    ensure_parent(path)?;
    let line = serde_json::to_string(record).map_err(|source| TrainError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| TrainError::io(path, e))?;
    writeln!(file, "{line}").map_err(|e| TrainError::io(path, e))
}

/// Replace the file with one JSON line per record.
///
/// An empty history leaves an empty file.
pub fn write_jsonl(path: &Path, records: &[EpochRecord]) -> TrainResult<()> {
    ensure_parent(path)?;
    let mut raw = Vec::new();
    for record in records {
        serde_json::to_writer(&mut raw, record).map_err(|source| TrainError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        raw.push(b'\n');
    }
    let staged = path.with_extension("jsonl.tmp");
    fs::write(&staged, raw).map_err(|e| TrainError::io(&staged, e))?;
    commit(&staged, path)
}

/// Epoch records stored in a JSON lines file.
pub fn read_jsonl(path: &Path) -> TrainResult<MetricsHistory> {
    let raw = fs::read_to_string(path).map_err(|e| TrainError::io(path, e))?;
    raw.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            serde_json::from_str(line).map_err(|source| TrainError::Json {
                path: path.to_path_buf(),
                source,
            })
        })
        .collect()
}
