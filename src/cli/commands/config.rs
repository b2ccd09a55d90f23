use anyhow::Result;
use clap::{Args, Subcommand};

use crate::config::{ConfigFormat, FacebatchConfig};

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Display current merged configuration
    Show {
        /// Output format
        #[arg(short, long, value_enum, default_value = "toml")]
        format: ConfigFormat,
    },
    /// Get configuration value
    Get { key: String },
    /// Validate the merged configuration
    Validate,
}

pub async fn execute(args: ConfigArgs, custom_config: Option<&str>) -> Result<()> {
    let config = FacebatchConfig::load_with_custom_config(custom_config)?;

    match args.command {
        ConfigCommand::Show { format } => {
            println!("{}", config.export_config(format)?);
        }
        ConfigCommand::Get { key } => match config.get_section(&key)? {
            serde_json::Value::String(value) => println!("{value}"),
            value @ (serde_json::Value::Object(_) | serde_json::Value::Array(_)) => {
                println!("{}", serde_json::to_string_pretty(&value)?)
            }
            value => println!("{value}"),
        },
        ConfigCommand::Validate => {
            let settings = config.settings()?;
            if !settings.models.contains_key(&settings.batch.default_model) {
                anyhow::bail!(
                    "default model '{}' is not configured (models: {:?})",
                    settings.batch.default_model,
                    settings.models.keys().collect::<Vec<_>>()
                );
            }
            println!(
                "Configuration is valid ({} models, default '{}')",
                settings.models.len(),
                settings.batch.default_model
            );
        }
    }

    Ok(())
}
