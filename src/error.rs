//! Error taxonomy for batch detection
//!
//! Configuration and sink errors reach the caller. Item failures and pool
//! failures are absorbed by the folder orchestrator and only show up as
//! entries in [`crate::folder::FolderReport`].

use std::path::PathBuf;
use thiserror::Error;

use crate::folder::FolderReport;

/// Invalid input detected before any item is processed
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Images folder does not exist: {}", .0.display())]
    MissingDirectory(PathBuf),

    #[error("Images path is not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    #[error("Failed to read images folder {}: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "No valid images found in {} (extensions: {})",
        directory.display(),
        extensions.join(", ")
    )]
    NoMatchingFiles {
        directory: PathBuf,
        extensions: Vec<String>,
    },

    #[error("Unknown detector model: {model}. Available models: {available:?}")]
    UnknownModel { model: String, available: Vec<String> },
}

/// Failure of the execution mechanism itself, not of a single item
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("failed to start worker pool: {0}")]
    PoolStartup(String),

    #[error("worker initializer failed: {0}")]
    Initializer(String),

    #[error("worker {worker_id} panicked: {message}")]
    WorkerPanicked { worker_id: usize, message: String },
}

/// Failure while writing consolidated or converted output
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize detections: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to write CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("expected a JSON array of objects, found {0}")]
    Shape(String),
}

/// Errors surfaced by [`crate::folder::FolderDetector::detect_folder`]
#[derive(Debug, Error)]
pub enum DetectError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("failed to create detector '{model}': {source:#}")]
    Detector {
        model: String,
        #[source]
        source: anyhow::Error,
    },

    /// The in-process run failed; there is nothing left to fall back to.
    #[error("sequential run failed: {0}")]
    Batch(#[from] BatchError),

    /// The batch finished but its output could not be persisted.
    /// The finished report is kept so serialization can be retried.
    #[error("{error}")]
    Sink {
        #[source]
        error: SinkError,
        report: Box<FolderReport>,
    },
}

/// One item that produced no detections because its worker invocation failed
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ItemFailure {
    pub item: String,
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_model_message_lists_available() {
        let err = ConfigurationError::UnknownModel {
            model: "invalid_model".to_string(),
            available: vec!["blazeface".into(), "mediapipe".into(), "ultralight".into()],
        };
        let message = err.to_string();
        assert!(message.contains("Unknown detector model: invalid_model"));
        assert!(message.contains(r#"Available models: ["blazeface", "mediapipe", "ultralight"]"#));
    }

    #[test]
    fn test_no_matching_files_message() {
        let err = ConfigurationError::NoMatchingFiles {
            directory: PathBuf::from("/tmp/empty"),
            extensions: vec![".jpg".into(), ".png".into()],
        };
        assert_eq!(
            err.to_string(),
            "No valid images found in /tmp/empty (extensions: .jpg, .png)"
        );
    }
}
