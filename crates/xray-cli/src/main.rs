//! xray-detect CLI - classify a chest X-ray and write its Grad-CAM heatmap
//!
//! Thin collaborator over the detection core: decodes the given image,
//! prints the predicted class with its confidence, and saves the heatmap
//! overlay next to it. Stands in for the GUI layer the core deliberately
//! does not contain.

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use xray_detector::{DetectorConfig, PneumoniaDetector};

#[derive(Parser)]
#[command(
    name = "xray-detect",
    version,
    about = "Pneumonia detection from chest X-ray images with Grad-CAM explanations",
    after_help = "EXAMPLES:\n  \
                  xray-detect chest.dcm\n  \
                  xray-detect --models-dir ./models --output heatmap.png chest.png\n  \
                  xray-detect --json chest.jpg"
)]
struct Cli {
    /// X-ray image to classify (dcm, jpg, jpeg or png)
    image: PathBuf,

    /// Directory containing the model checkpoint
    #[arg(long, default_value = "models")]
    models_dir: PathBuf,

    /// Convolutional layer to explain
    #[arg(long)]
    layer: Option<String>,

    /// Where to write the heatmap overlay
    #[arg(short, long, default_value = "heatmap.png")]
    output: PathBuf,

    /// Emit the result as JSON on stdout
    #[arg(long)]
    json: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = DetectorConfig {
        models_dir: cli.models_dir.clone(),
        ..Default::default()
    };
    if let Some(layer) = cli.layer {
        config.grad_cam.layer_name = layer;
    }

    let detector = PneumoniaDetector::with_config(config)
        .with_context(|| format!("failed to initialize detector from {:?}", cli.models_dir))?;

    let detection = detector
        .process_path(&cli.image)
        .with_context(|| format!("failed to process {:?}", cli.image))?;

    detection
        .heatmap
        .save(&cli.output)
        .with_context(|| format!("failed to write heatmap to {:?}", cli.output))?;
    info!(path = %cli.output.display(), "heatmap written");

    if cli.json {
        let result = serde_json::json!({
            "label": detection.label.to_string(),
            "probability": detection.probability,
            "heatmap": cli.output,
        });
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!(
            "{}: {} ({:.2}%)",
            cli.image.display(),
            detection.label,
            detection.probability
        );
        println!("heatmap: {}", cli.output.display());
    }

    Ok(())
}
