//! Configuration management for facebatch
//!
//! Settings are layered with figment (see [`FacebatchConfig`]) and extracted
//! into the typed [`Settings`] structure.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

pub mod core;
pub mod formats;

pub use self::core::FacebatchConfig;
pub use formats::ConfigFormat;

/// Main configuration structure for facebatch
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub batch: BatchSettings,

    /// Detector models by name
    #[serde(default)]
    pub models: BTreeMap<String, ModelSettings>,
}

/// Batch execution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSettings {
    /// Percentage of CPU cores to use when no worker count is given
    #[serde(default = "default_thread_percentage")]
    pub thread_percentage: u8,

    /// Maximum worker threads (0 = no limit)
    #[serde(default)]
    pub max_threads: usize,

    /// Channel buffer size multiplier
    #[serde(default = "default_buffer_multiplier")]
    pub buffer_multiplier: usize,

    /// Image file extensions, matched case-insensitively
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    #[serde(default = "default_images_folder")]
    pub images_folder: PathBuf,

    #[serde(default = "default_output_folder")]
    pub output_folder: PathBuf,

    #[serde(default = "default_consolidated_path")]
    pub consolidated_path: PathBuf,

    #[serde(default = "default_model")]
    pub default_model: String,

    /// Models that must never run on more than one worker
    #[serde(default = "default_parallel_unsafe")]
    pub parallel_unsafe: Vec<String>,
}

impl BatchSettings {
    /// Worker count used when the caller does not ask for one
    pub fn optimal_workers(&self) -> usize {
        crate::parallel::ExecutionStrategy::calculate_optimal_workers(
            self.max_threads,
            self.thread_percentage,
        )
    }
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            thread_percentage: default_thread_percentage(),
            max_threads: 0,
            buffer_multiplier: default_buffer_multiplier(),
            extensions: default_extensions(),
            images_folder: default_images_folder(),
            output_folder: default_output_folder(),
            consolidated_path: default_consolidated_path(),
            default_model: default_model(),
            parallel_unsafe: default_parallel_unsafe(),
        }
    }
}

/// A detector model backed by an external command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSettings {
    /// Command template, see [`crate::detection::CommandDetector`]
    pub command: String,

    #[serde(default)]
    pub description: String,
}

fn default_thread_percentage() -> u8 {
    75
}

fn default_buffer_multiplier() -> usize {
    2
}

fn default_extensions() -> Vec<String> {
    [".jpg", ".jpeg", ".png", ".bmp", ".tiff"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_images_folder() -> PathBuf {
    PathBuf::from("assets/images")
}

fn default_output_folder() -> PathBuf {
    PathBuf::from("output")
}

fn default_consolidated_path() -> PathBuf {
    PathBuf::from("output/detections.json")
}

fn default_model() -> String {
    "blazeface".to_string()
}

fn default_parallel_unsafe() -> Vec<String> {
    vec!["mediapipe".to_string()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_defaults() {
        let batch = BatchSettings::default();
        assert_eq!(batch.thread_percentage, 75);
        assert_eq!(batch.max_threads, 0);
        assert_eq!(batch.default_model, "blazeface");
        assert_eq!(batch.parallel_unsafe, vec!["mediapipe"]);
        assert!(batch.extensions.contains(&".tiff".to_string()));
        assert!(batch.optimal_workers() >= 1);
    }

    #[test]
    fn test_partial_settings_fill_defaults() {
        let settings: Settings = toml::from_str(
            r#"
            [batch]
            max_threads = 2

            [models.fake]
            command = "cat {image}"
            "#,
        )
        .unwrap();

        assert_eq!(settings.batch.max_threads, 2);
        assert_eq!(settings.batch.thread_percentage, 75);
        assert_eq!(settings.models["fake"].command, "cat {image}");
        assert!(settings.models["fake"].description.is_empty());
        assert!(settings.batch.optimal_workers() <= 2);
    }
}
