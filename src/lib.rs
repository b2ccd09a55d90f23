//! # facebatch - Batch Face Detection
//!
//! Runs a face detector over every image of a folder and collects all
//! detections into one consolidated JSON file, with an optional CSV
//! projection.
//!
//! ## Features
//!
//! - **Parallel or sequential**: a per-call worker pool or in-thread execution
//! - **Per-worker detectors**: each worker builds its own detector instance
//! - **Sequential fallback**: a failed pool re-runs the batch in the calling thread
//! - **Item isolation**: one bad image is recorded as a failure, the batch continues
//! - **Pluggable models**: detectors are external commands declared in configuration
//!
//! ## Quick Start
//!
//! ```bash
//! # Detect faces in assets/images with 4 workers
//! facebatch detect --images-folder assets/images --num-processes 4 --csv-path output/detections.csv
//!
//! # List configured models
//! facebatch models
//! ```

pub mod cli;
pub mod config;
pub mod detection;
pub mod error;
pub mod folder;
pub mod parallel;
pub mod reports;

pub use cli::{Cli, Output};
pub use config::{FacebatchConfig, Settings};
pub use detection::{DetectorRegistry, FaceDetector};
pub use error::{BatchError, ConfigurationError, DetectError, SinkError};
pub use folder::{FolderDetector, FolderReport, FolderRequest};

/// Result type alias for facebatch operations
pub type Result<T> = anyhow::Result<T>;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");
pub const PKG_DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
