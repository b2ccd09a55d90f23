use anyhow::Result;
use clap::Args;

use super::load_registry;
use crate::cli::Output;

#[derive(Args, Debug, Default)]
pub struct ModelsArgs {
    /// Print bare model names, one per line
    #[arg(long)]
    pub names_only: bool,
}

pub async fn execute(args: ModelsArgs, custom_config: Option<&str>, output: &Output) -> Result<()> {
    let (settings, registry) = load_registry(custom_config)?;
    let models = registry.list_available_models();

    if args.names_only {
        for model in &models {
            println!("{model}");
        }
        return Ok(());
    }

    output.header("Available models");
    for model in &models {
        let mut line = model.clone();
        if *model == settings.batch.default_model {
            line.push_str(" (default)");
        }
        if registry.is_parallel_unsafe(model) {
            line.push_str(" [sequential only]");
        }
        let description = settings
            .models
            .get(model)
            .map(|m| m.description.as_str())
            .unwrap_or_default();
        output.table_row(&line, description);
    }

    Ok(())
}
