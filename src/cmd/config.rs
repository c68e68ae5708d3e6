//! Configuration view and validation commands: `pickplace config`.

use anyhow::Result;
use std::path::PathBuf;

use super::super::{Cli, ConfigCommands};

pub fn cmd_config(cli: &Cli, work_dir: PathBuf, command: Option<ConfigCommands>) -> Result<()> {
    use pickplace::config::Config;
    use pickplace::pickplace_config::PickPlaceToml;

    match command {
        None | Some(ConfigCommands::Show) => {
            let config = Config::new(work_dir, cli.config.clone(), cli.verbose)?;

            println!();
            println!("Pickplace Configuration");
            println!("=======================");
            println!();
            if config.loaded {
                println!("Config file: {}", config.config_file.display());
            } else {
                println!("No pickplace.toml found at {}", config.config_file.display());
                println!("Using default configuration.");
            }
            println!();
            print!("{}", config.settings().to_toml()?);
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            let config = Config::new(work_dir, cli.config.clone(), cli.verbose)?;
            if !config.loaded {
                println!("No pickplace.toml found. Using defaults (valid).");
                return Ok(());
            }

            let warnings = config.settings().validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            let config_path = Config::resolve_config_file(&work_dir, cli.config.clone());
            if config_path.exists() {
                println!("pickplace.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }
            if let Some(parent) = config_path.parent()
                && !parent.exists()
            {
                std::fs::create_dir_all(parent)?;
            }

            PickPlaceToml::default().save(&config_path)?;

            println!("Created pickplace.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [monitor] diff_tol, timeout_secs, feedback_deadline_secs");
            println!("  - [stages.<stage>] for stage-specific tolerances and policies");
            println!("  - [cell], [gripper], [persistent] for the work cell");
            println!("  - [sim] for the simulated controller");
            println!();
        }
    }

    Ok(())
}
