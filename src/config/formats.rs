use anyhow::Result;
use clap::ValueEnum;

use super::core::FacebatchConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ConfigFormat {
    Json,
    Toml,
    Yaml,
}

impl FacebatchConfig {
    /// Export configuration in specified format
    pub fn export_config(&self, format: ConfigFormat) -> Result<String> {
        let config: serde_json::Value = self.get_full_config()?;

        let output = match format {
            ConfigFormat::Json => serde_json::to_string_pretty(&config)?,
            ConfigFormat::Toml => toml::to_string_pretty(&config)?,
            ConfigFormat::Yaml => serde_yml::to_string(&config)?,
        };

        Ok(output)
    }
}
