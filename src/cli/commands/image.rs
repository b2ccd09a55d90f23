use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;

use super::load_registry;
use crate::cli::Output;
use crate::detection::DetectionRequest;
use crate::folder::FolderDetector;
use crate::reports;

#[derive(Args, Debug)]
pub struct ImageArgs {
    /// Image to process
    pub image: PathBuf,

    /// Detector model (defaults to batch.default_model)
    #[arg(short = 'm', long)]
    pub detection_model: Option<String>,

    /// Folder for the annotated image
    #[arg(short, long)]
    pub output_folder: Option<PathBuf>,

    /// JSON output (defaults to <output-folder>/<image stem>.json)
    #[arg(long)]
    pub json_path: Option<PathBuf>,

    /// Don't write a JSON file
    #[arg(long)]
    pub no_json: bool,

    /// Save an annotated copy of the image
    #[arg(long)]
    pub save_annotated: bool,
}

pub async fn execute(args: ImageArgs, custom_config: Option<&str>, output: &Output) -> Result<()> {
    let (settings, registry) = load_registry(custom_config)?;

    let model = args
        .detection_model
        .unwrap_or_else(|| settings.batch.default_model.clone());
    let output_folder = args
        .output_folder
        .unwrap_or_else(|| settings.batch.output_folder.clone());
    let request =
        DetectionRequest::new(&args.image, &output_folder).with_annotation(args.save_annotated);
    let image_name = request.image_name();

    output.step(&format!("Detecting faces in {image_name} with {model}"));

    let detector = FolderDetector::new(registry, settings.batch);
    let blocking_request = request.clone();
    let blocking_model = model.clone();
    let detections = tokio::task::spawn_blocking(move || {
        detector.detect_image(&blocking_model, &blocking_request)
    })
    .await
    .context("Detection task failed")??;

    output.success(&format!("Found {} faces", detections.len()));
    for (i, detection) in detections.iter().enumerate() {
        let bbox = detection.bbox;
        output.table_row(
            &format!("Face {}", i + 1),
            &format!(
                "({:.0}, {:.0}) - ({:.0}, {:.0})  confidence {:.2}",
                bbox.x1, bbox.y1, bbox.x2, bbox.y2, bbox.confidence
            ),
        );
    }

    if !args.no_json {
        let json_path = args.json_path.unwrap_or_else(|| {
            let stem = args
                .image
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_else(|| "detections".to_string());
            output_folder.join(format!("{stem}.json"))
        });
        reports::write_image_detections(&image_name, &detections, &json_path)?;
        output.success(&format!("Saved detections to {}", json_path.display()));
    }

    Ok(())
}
