//! CLI command handlers

use std::path::Path;

use anyhow::{Context, Result};
use clap::Subcommand;
use kube::CustomResourceExt;

use crate::config::{ConfigLoader, KEYS, get_config_value, set_config_value};
use crate::models::ChartRelease;

/// Configuration management subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigSubcommand {
    /// Get configuration value
    Get {
        /// Configuration key (e.g., "concurrency", "helmBinary")
        key: Option<String>,
    },
    /// Set configuration value in the config file
    Set {
        /// Configuration key (e.g., "concurrency", "helmBinary")
        key: String,
        /// Configuration value
        value: String,
    },
    /// List all configuration
    List,
    /// Show configuration file path
    Path,
    /// Validate configuration
    Validate,
}

/// Handle configuration subcommands
pub fn handle_config_command(cmd: ConfigSubcommand, config_path: Option<&Path>) -> Result<()> {
    match cmd {
        ConfigSubcommand::Get { key } => {
            let config = ConfigLoader::load(config_path).context("Failed to load configuration")?;

            if let Some(key) = key {
                println!("{}", get_config_value(&config, &key)?);
            } else {
                let yaml =
                    serde_yaml::to_string(&config).context("Failed to serialize configuration")?;
                print!("{}", yaml);
            }
        }
        ConfigSubcommand::Set { key, value } => {
            let path = ConfigLoader::path(config_path);
            // only the file layer is persisted, never env overrides
            let mut config = if path.exists() {
                ConfigLoader::load_file(&path)?
            } else {
                Default::default()
            };

            set_config_value(&mut config, &key, &value)
                .with_context(|| format!("Failed to set {} = {}", key, value))?;

            ConfigLoader::save(&config, &path).context("Failed to save configuration")?;
            println!("Configuration saved to {}", path.display());
        }
        ConfigSubcommand::List => {
            let config = ConfigLoader::load(config_path).context("Failed to load configuration")?;
            for key in KEYS {
                println!("{}: {}", key, get_config_value(&config, key)?);
            }
        }
        ConfigSubcommand::Path => {
            println!("{}", ConfigLoader::path(config_path).display());
        }
        ConfigSubcommand::Validate => match ConfigLoader::validate(config_path) {
            Ok(()) => println!("Configuration is valid"),
            Err(e) => {
                eprintln!("Configuration validation failed: {:#}", e);
                std::process::exit(1);
            }
        },
    }

    Ok(())
}

/// Print the ChartRelease CustomResourceDefinition as YAML
pub fn print_crd() -> Result<()> {
    let yaml = serde_yaml::to_string(&ChartRelease::crd()).context("Failed to serialize CRD")?;
    print!("{}", yaml);
    Ok(())
}
