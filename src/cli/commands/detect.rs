use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use std::str::FromStr;

use super::load_registry;
use crate::cli::Output;
use crate::error::DetectError;
use crate::folder::{FolderDetector, FolderReport, FolderRequest};
use crate::reports;

/// Worker count flag: a number, or `auto` for the configured optimum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerCount(pub Option<usize>);

impl FromStr for WorkerCount {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("auto") {
            return Ok(WorkerCount(None));
        }
        s.parse::<usize>()
            .map(|n| WorkerCount(Some(n)))
            .map_err(|_| format!("expected a worker count or 'auto', got '{s}'"))
    }
}

#[derive(Args, Debug)]
pub struct DetectArgs {
    /// Detector model (defaults to batch.default_model)
    #[arg(short = 'm', long)]
    pub detection_model: Option<String>,

    /// Folder containing the input images
    #[arg(short, long)]
    pub images_folder: Option<PathBuf>,

    /// Folder for annotated images
    #[arg(short, long)]
    pub output_folder: Option<PathBuf>,

    /// Consolidated JSON output
    #[arg(long)]
    pub json_path: Option<PathBuf>,

    /// Also write the detections as CSV
    #[arg(long)]
    pub csv_path: Option<PathBuf>,

    /// Save annotated images under <output-folder>/<image stem>/
    #[arg(long)]
    pub save_annotated: bool,

    /// Worker count: 0 runs sequentially, 'auto' sizes the pool from configuration
    #[arg(short = 'n', long, default_value = "0")]
    pub num_processes: WorkerCount,
}

pub async fn execute(args: DetectArgs, custom_config: Option<&str>, output: &Output) -> Result<()> {
    let (settings, registry) = load_registry(custom_config)?;

    let mut request = FolderRequest::from_settings(&settings.batch)
        .with_per_item_artifacts(args.save_annotated)
        .with_worker_count(args.num_processes.0);
    if let Some(model) = args.detection_model {
        request.model = model;
    }
    if let Some(folder) = args.images_folder {
        request.directory = folder;
    }
    if let Some(folder) = args.output_folder {
        request = request.with_output_root(folder);
    }
    if let Some(path) = args.json_path {
        request = request.with_consolidated_path(path);
    }

    output.step(&format!(
        "Detecting faces in {} with {}",
        request.directory.display(),
        request.model
    ));

    let icon = if request.worker_count == Some(0) { "⏳" } else { "⚡" };
    let detector =
        FolderDetector::new(registry, settings.batch.clone()).with_progress(output.progress(icon));

    let blocking_request = request.clone();
    let result = tokio::task::spawn_blocking(move || detector.detect_folder(&blocking_request))
        .await
        .context("Detection task failed")?;

    let report = match result {
        Ok(report) => report,
        Err(DetectError::Sink { error, report }) => {
            output.error(&format!(
                "Processed {} images but could not save detections: {error}",
                report.items_attempted
            ));
            return Err(error.into());
        }
        Err(e) => return Err(e.into()),
    };

    print_summary(&report, output);

    if let Some(csv_path) = args.csv_path {
        let rows = report
            .records()
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()?;
        if reports::json_to_csv(&rows, &csv_path)? {
            output.success(&format!("Saved CSV to {}", csv_path.display()));
        } else {
            output.warning("No detections found; CSV not written");
        }
    }

    Ok(())
}

fn print_summary(report: &FolderReport, output: &Output) {
    if let Some(fallback) = &report.fallback {
        output.warning(&fallback.to_string());
    }

    output.header("Detection summary");
    output.summary_stats("Images processed:", report.items_attempted);
    output.summary_stats("Faces detected:  ", report.total_detections());
    output.summary_stats("Failures:        ", report.failures.len());
    output.verbose(&format!(
        "Mode: {:?} ({} workers)",
        report.plan.mode, report.plan.worker_count
    ));

    for failure in &report.failures {
        output.list_item(&format!("{}: {}", failure.item, failure.error));
    }

    if let Some(path) = &report.consolidated_path {
        output.success(&format!("Saved detections to {}", path.display()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_count_parsing() {
        assert_eq!("0".parse::<WorkerCount>().unwrap(), WorkerCount(Some(0)));
        assert_eq!("4".parse::<WorkerCount>().unwrap(), WorkerCount(Some(4)));
        assert_eq!("auto".parse::<WorkerCount>().unwrap(), WorkerCount(None));
        assert_eq!("AUTO".parse::<WorkerCount>().unwrap(), WorkerCount(None));
        assert!("-1".parse::<WorkerCount>().is_err());
        assert!("many".parse::<WorkerCount>().is_err());
    }
}
