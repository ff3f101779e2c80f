use std::path::{Path, PathBuf};

use tripwire_settings::{ConfigLoader, TripwireConfig};

use super::load_config;
use crate::cli::{ConfigArgs, ConfigSource, ConfigSubcommand, OutputFormat};
use crate::error::CliError;

pub async fn config(args: ConfigArgs, cwd: PathBuf) -> Result<(), CliError> {
    match args.subcommand {
        ConfigSubcommand::Init { global } => init(global, &cwd),
        ConfigSubcommand::Show { format, source } => show(format, &source, &cwd),
    }
}

fn init(global: bool, cwd: &Path) -> Result<(), CliError> {
    let path = if global {
        ConfigLoader::global_config_path().ok_or_else(|| {
            CliError::Other(
                "Cannot determine global config path: config directory not available".to_string(),
            )
        })?
    } else {
        ConfigLoader::project_config_path(cwd)
    };

    if path.exists() {
        return Err(CliError::Other(format!(
            "Config file already exists: {}",
            path.display()
        )));
    }

    TripwireConfig::starter().save(&path)?;
    println!("Created config: {}", path.display());
    Ok(())
}

/// Print the config `run` would use with the same config flags.
fn show(format: OutputFormat, source: &ConfigSource, cwd: &Path) -> Result<(), CliError> {
    let config = load_config(source, cwd)?;
    match format {
        OutputFormat::Toml => {
            let toml = config.to_toml()?;
            print!("{toml}");
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&config)
                .map_err(|e| CliError::Other(format!("JSON serialization failed: {e}")))?;
            println!("{json}");
        }
    }
    Ok(())
}
