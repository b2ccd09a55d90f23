pub mod config;
pub mod convert;
pub mod detect;
pub mod image;
pub mod models;

use anyhow::Result;

use crate::config::{FacebatchConfig, Settings};
use crate::detection::DetectorRegistry;

/// Merged settings plus the registry of configured detectors
pub(crate) fn load_registry(custom_config: Option<&str>) -> Result<(Settings, DetectorRegistry)> {
    let settings = FacebatchConfig::load_with_custom_config(custom_config)?.settings()?;
    let registry = DetectorRegistry::from_settings(&settings);
    Ok((settings, registry))
}
