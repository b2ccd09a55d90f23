use anyhow::Result;
use figment::{
    Figment,
    providers::{Env, Format, Json, Toml, Yaml},
};
use std::path::Path;

use super::Settings;

// Embed the default config at compile time
const DEFAULT_CONFIG: &str = include_str!("../../default-config.toml");

/// Layered configuration source
///
/// Priority, lowest first: embedded defaults, user config, repository config
/// (or only the explicit `--config` file), `FACEBATCH_` environment variables.
pub struct FacebatchConfig {
    figment: Figment,
}

impl FacebatchConfig {
    pub fn load() -> Result<Self> {
        Self::load_with_custom_config(None)
    }

    pub fn load_with_custom_config(custom_config: Option<&str>) -> Result<Self> {
        tracing::trace!("CONFIG LOAD: Starting");

        let mut figment = Figment::new().merge(Toml::string(DEFAULT_CONFIG)); // Embedded defaults

        // If custom config is specified, use only that + defaults + env vars
        if let Some(custom_path) = custom_config {
            figment = Self::merge_file(figment, custom_path);
        } else {
            // Standard priority: user config -> repo config
            let user_base = Self::user_config_base_path();
            for ext in ["toml", "json", "yaml", "yml"] {
                figment = Self::merge_file(figment, &format!("{user_base}.{ext}"));
            }
            for ext in ["toml", "json", "yaml", "yml"] {
                figment = Self::merge_file(figment, &format!("facebatch.{ext}"));
            }
        }

        // Environment variables always have highest priority
        figment = figment.merge(Env::prefixed("FACEBATCH_").split("__"));

        Ok(FacebatchConfig { figment })
    }

    /// Build directly from a figment, used to layer ad-hoc overrides
    pub fn from_figment(figment: Figment) -> Self {
        Self { figment }
    }

    /// Merge a TOML snippet on top of the current layers
    pub fn with_toml_override(self, toml: &str) -> Self {
        Self {
            figment: self.figment.merge(Toml::string(toml)),
        }
    }

    /// Typed view of the merged configuration
    pub fn settings(&self) -> Result<Settings> {
        Ok(self.figment.extract()?)
    }

    /// Get a nested object/section as JSON
    pub fn get_section(&self, path: &str) -> Result<serde_json::Value> {
        Ok(self.figment.extract_inner(path)?)
    }

    /// Get the full merged configuration as a structured value
    pub fn get_full_config(&self) -> Result<serde_json::Value> {
        Ok(self.figment.extract()?)
    }

    /// Get a string value from config
    pub fn get_string(&self, path: &str) -> Result<String> {
        Ok(self.figment.extract_inner(path)?)
    }

    /// Get a vector of strings from config
    pub fn get_vec(&self, path: &str) -> Result<Vec<String>> {
        Ok(self.figment.extract_inner(path)?)
    }

    fn merge_file(figment: Figment, path: &str) -> Figment {
        match Path::new(path).extension().and_then(|ext| ext.to_str()) {
            Some("json") => figment.merge(Json::file(path)),
            Some("yaml") | Some("yml") => figment.merge(Yaml::file(path)),
            _ => figment.merge(Toml::file(path)),
        }
    }

    fn user_config_base_path() -> String {
        match std::env::var("HOME") {
            Ok(home) => format!("{home}/.config/facebatch/config"),
            Err(_) => "~/.config/facebatch/config".to_string(),
        }
    }
}
