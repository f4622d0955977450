//! Configuration view and validation commands (`quadro config`).

use std::path::Path;

use anyhow::{Context, Result};
use quadro::config::{CONFIG_FILE, QUADRO_DIR, QuadroConfig};

use super::super::ConfigCommands;

pub fn cmd_config(
    project_dir: &Path,
    config: &QuadroConfig,
    command: Option<ConfigCommands>,
) -> Result<()> {
    let config_path = project_dir.join(QUADRO_DIR).join(CONFIG_FILE);

    match command {
        None | Some(ConfigCommands::Show) => {
            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No {} found; showing defaults.", config_path.display());
            }
            println!("Effective values (with .env and QUADRO_* overrides):");
            println!();
            let rendered =
                toml::to_string_pretty(config).context("Failed to render configuration")?;
            println!("{}", rendered);
        }
        Some(ConfigCommands::Validate) => {
            let warnings = config.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
        }
    }

    Ok(())
}
