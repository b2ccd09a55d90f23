//! Command-line interface for facebatch
//!
//! Argument parsing with clap; each subcommand lives in [`commands`].

use anyhow::Result;
use clap::{Parser, Subcommand};

pub mod commands;
pub mod output;

pub use output::Output;

use commands::{config, convert, detect, image, models};

/// facebatch - batch face detection over image folders
#[derive(Parser)]
#[command(
    name = "facebatch",
    version = env!("CARGO_PKG_VERSION"),
    about = "Batch face detection with parallel workers and sequential fallback",
    long_about = "facebatch runs a face detector over every image of a folder, either \
                  sequentially or on a pool of workers, and writes all detections to one \
                  JSON file with an optional CSV projection."
)]
pub struct Cli {
    /// Increase verbosity (can be repeated)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Use custom configuration file
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Detect faces in every image of a folder
    Detect(detect::DetectArgs),
    /// Detect faces in a single image
    Image(image::ImageArgs),
    /// List available detector models
    Models(models::ModelsArgs),
    /// Convert a detections JSON file to CSV
    Convert(convert::ConvertArgs),
    /// Configuration management
    Config(config::ConfigArgs),
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        // Set up logging based on verbosity
        setup_logging(self.verbose, self.quiet);

        let output = Output::new(self.verbose > 0, self.quiet);
        let custom_config = self.config.as_deref();

        match self.command {
            Commands::Detect(args) => detect::execute(args, custom_config, &output).await,
            Commands::Image(args) => image::execute(args, custom_config, &output).await,
            Commands::Models(args) => models::execute(args, custom_config, &output).await,
            Commands::Convert(args) => convert::execute(args, &output).await,
            Commands::Config(args) => config::execute(args, custom_config).await,
        }
    }
}

fn setup_logging(verbose: u8, quiet: bool) {
    if quiet {
        return;
    }

    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        match verbose {
            0 => tracing_subscriber::EnvFilter::new("warn"),
            1 => tracing_subscriber::EnvFilter::new("info"),
            2 => tracing_subscriber::EnvFilter::new("debug"),
            _ => tracing_subscriber::EnvFilter::new("trace"),
        }
    });

    // Logs share the terminal with progress bars, keep them off stdout
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
