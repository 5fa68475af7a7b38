//! Subscriber setup shared by the binaries.

use crate::error::{TrainError, TrainResult};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Console logging filtered by `RUST_LOG` (default `info`), plus a daily-rolling
/// `<prefix>.<date>.log` under `log_dir` when given.
///
/// Keep the returned guard alive for the whole run; dropping it flushes the file writer.
pub fn init_tracing(log_dir: Option<&Path>, prefix: &str) -> TrainResult<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console = fmt::layer().with_target(false).with_writer(std::io::stderr);

    let Some(dir) = log_dir else {
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(console)
            .try_init();
        return Ok(None);
    };

    std::fs::create_dir_all(dir).map_err(|e| TrainError::io(dir, e))?;
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(prefix)
        .filename_suffix("log")
        .build(dir)
        .map_err(|e| TrainError::Config(format!("log dir {}: {e}", dir.display())))?;
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let file = fmt::layer()
        .with_ansi(false)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_writer(writer);
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .try_init();
    tracing::info!(dir = %dir.display(), "file logging enabled");
    Ok(Some(guard))
}
