//! pothole_assess - offline severity assessment
//!
//! `assess` scores a JSON list of detections against a frame size.
//! `analyze` runs the configured detector over an image file on disk.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use pothole_severity::{
    assess, config::ServiceConfig, decode::decode_image_bytes, Analyzer, Detection,
    ModelHandle, RawDetection,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Score detections read from a JSON file.
    Assess {
        /// JSON array of `{"boundingBox": {...}, "confidence": f, "classId": n}`.
        #[arg(long)]
        detections: PathBuf,
        /// Frame width in pixels.
        #[arg(long)]
        width: u32,
        /// Frame height in pixels.
        #[arg(long)]
        height: u32,
    },
    /// Detect and score potholes in an image file.
    Analyze {
        /// Image file (JPEG, PNG, WebP, BMP).
        #[arg(long)]
        image: PathBuf,
        /// Override the configured confidence threshold.
        #[arg(long, env = "POTHOLE_CONFIDENCE_THRESHOLD")]
        threshold: Option<f32>,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let output = match args.command {
        Command::Assess {
            detections,
            width,
            height,
        } => {
            let raw = std::fs::read_to_string(&detections)
                .with_context(|| format!("failed to read {}", detections.display()))?;
            let raw: Vec<RawDetection> = serde_json::from_str(&raw)
                .with_context(|| format!("invalid detections file {}", detections.display()))?;
            let detections = raw
                .into_iter()
                .enumerate()
                .map(|(i, r)| {
                    Detection::try_from(r).map_err(|e| anyhow!("detection {}: {}", i, e))
                })
                .collect::<Result<Vec<_>>>()?;
            let verdict = assess(&detections, width, height)?;
            serde_json::to_string_pretty(&verdict)?
        }
        Command::Analyze { image, threshold } => {
            let config = ServiceConfig::load()?;
            let model = Arc::new(ModelHandle::new());
            config.detector.load_into(&model)?;

            let bytes = std::fs::read(&image)
                .with_context(|| format!("failed to read {}", image.display()))?;
            let decoded = decode_image_bytes(&bytes)
                .with_context(|| format!("failed to decode {}", image.display()))?;
            let analyzer = Analyzer::new(model.clone())
                .with_threshold(threshold.unwrap_or(config.detector.confidence_threshold));
            let report = analyzer.analyze_decoded(&decoded)?;
            model.unload()?;
            serde_json::to_string_pretty(&report)?
        }
    };

    println!("{}", output);
    Ok(())
}
