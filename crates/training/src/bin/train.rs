use clap::Parser;
use training::config::{TrainArgs, TrainConfig};
use training::logging::init_tracing;
use training::util::run_train;

fn main() -> anyhow::Result<()> {
    let args = TrainArgs::parse();
    let cfg = TrainConfig::resolve(&args)?;
    let _guard = init_tracing(cfg.log_dir.as_deref(), "train")?;
    let summary = run_train(&cfg)?;
    println!(
        "Trained epochs {}..{} ({} steps); checkpoint at {}",
        summary.start_epoch,
        summary.start_epoch + summary.epochs_run,
        summary.global_step,
        summary.checkpoint.display()
    );
    Ok(())
}
