use anyhow::Result;
use clap::Args;
use std::path::PathBuf;

use crate::cli::Output;
use crate::reports;

#[derive(Args, Debug)]
pub struct ConvertArgs {
    /// Detections JSON file (an array of objects)
    pub json_path: PathBuf,

    /// CSV output (defaults to the JSON path with a .csv extension)
    #[arg(long)]
    pub csv_path: Option<PathBuf>,
}

pub async fn execute(args: ConvertArgs, output: &Output) -> Result<()> {
    let csv_path = args
        .csv_path
        .unwrap_or_else(|| args.json_path.with_extension("csv"));

    if reports::convert_json_file(&args.json_path, &csv_path)? {
        output.success(&format!("Saved CSV to {}", csv_path.display()));
    } else {
        output.warning(&format!(
            "{} contains no detections; CSV not written",
            args.json_path.display()
        ));
    }

    Ok(())
}
