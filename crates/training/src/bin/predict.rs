use clap::Parser;
use std::path::PathBuf;
use training::checkpoint::{load_trained, read_json, CheckpointPaths};
use training::config::{parse_image_size, BackendKind};
use training::logging::init_tracing;
use training::predict::predict_to_png;
use training::util::validate_backend_choice;
use training::TrainBackend;

use data_contracts::RunManifest;

#[derive(Parser, Debug)]
#[command(
    name = "predict",
    about = "Run a detector checkpoint on one image and save boxes and masks as an overlay PNG"
)]
struct Args {
    /// Image to run.
    input: PathBuf,
    #[arg(long, default_value = "checkpoints/detector.bin")]
    checkpoint: PathBuf,
    #[arg(long, default_value = "prediction.png")]
    output: PathBuf,
    #[arg(long, default_value_t = 0.5)]
    score_thresh: f32,
    /// Force-resize target (e.g. 128x128 or none); defaults to the manifest's.
    #[arg(long)]
    image_size: Option<String>,
    #[arg(long, value_enum, default_value_t = BackendKind::NdArray)]
    backend: BackendKind,
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _guard = init_tracing(args.log_dir.as_deref(), "predict")?;
    validate_backend_choice(args.backend)?;

    let paths = CheckpointPaths::new(&args.checkpoint);
    let target_size = match &args.image_size {
        Some(raw) => parse_image_size(raw)?,
        None if paths.manifest.exists() => {
            let manifest: RunManifest = read_json(&paths.manifest)?;
            manifest.image_size.map(|[w, h]| (w, h))
        }
        None => Some((128, 128)),
    };

    let device = <TrainBackend as burn::tensor::backend::Backend>::Device::default();
    let (model, _) = load_trained::<TrainBackend>(&paths.model, &device)?;
    let detections = predict_to_png(
        &model,
        &args.input,
        &args.output,
        target_size,
        args.score_thresh,
        &device,
    )?;

    println!("{}", serde_json::to_string_pretty(&detections)?);
    println!("Saved overlay to {}", args.output.display());
    Ok(())
}
