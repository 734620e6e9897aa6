//! Configuration loading
//!
//! Precedence (highest to lowest):
//! 1. `CHARTWARDEN_*` environment variables
//! 2. Config file (`--config` or the platform default path)
//! 3. Built-in defaults

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use super::{paths, schema::Config, set_config_value};

/// Environment overrides, keyed by config key
const ENV_OVERRIDES: &[(&str, &str)] = &[
    ("CHARTWARDEN_WATCH_NAMESPACE", "watchNamespace"),
    ("CHARTWARDEN_CONCURRENCY", "concurrency"),
    ("CHARTWARDEN_STEADY_REQUEUE_SECONDS", "steadyRequeueSeconds"),
    ("CHARTWARDEN_PRECONDITION_REQUEUE_SECONDS", "preconditionRequeueSeconds"),
    ("CHARTWARDEN_HELM_BINARY", "helmBinary"),
    ("CHARTWARDEN_FIELD_MANAGER", "fieldManager"),
    ("CHARTWARDEN_WATCH_TIMEOUT_SECONDS", "watchTimeoutSeconds"),
    ("CHARTWARDEN_HTTP_TIMEOUT_SECONDS", "httpTimeoutSeconds"),
];

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Config file in effect: the explicit path, else the platform default
    pub fn path(explicit: Option<&Path>) -> PathBuf {
        explicit
            .map(Path::to_path_buf)
            .unwrap_or_else(paths::root_config_path)
    }

    /// Load configuration with all layers applied.
    ///
    /// A missing default file is not an error; a missing explicit file is.
    pub fn load(explicit: Option<&Path>) -> Result<Config> {
        let path = Self::path(explicit);
        let config = if path.exists() || explicit.is_some() {
            Self::load_file(&path)?
        } else {
            Config::default()
        };
        Self::apply_overrides(config, |key| std::env::var(key).ok())
    }

    /// Load configuration from a file
    pub fn load_file(path: &Path) -> Result<Config> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Validate configuration by loading and checking value ranges
    pub fn validate(explicit: Option<&Path>) -> Result<()> {
        let config = Self::load(explicit).context("Failed to load configuration")?;
        Self::check(&config)
    }

    /// Reject values the controller cannot run with
    pub fn check(config: &Config) -> Result<()> {
        if config.concurrency == 0 {
            return Err(anyhow::anyhow!("concurrency must be at least 1"));
        }
        if config.steady_requeue_seconds == 0 {
            return Err(anyhow::anyhow!("steadyRequeueSeconds must be positive"));
        }
        if config.precondition_requeue_seconds == 0 {
            return Err(anyhow::anyhow!("preconditionRequeueSeconds must be positive"));
        }
        // the client read timeout is 30s
        if config.watch_timeout_seconds == 0 || config.watch_timeout_seconds >= 30 {
            return Err(anyhow::anyhow!(
                "watchTimeoutSeconds must be between 1 and 29, got {}",
                config.watch_timeout_seconds
            ));
        }
        if config.helm_binary.trim().is_empty() {
            return Err(anyhow::anyhow!("helmBinary must not be empty"));
        }
        Ok(())
    }

    /// Apply environment overrides read through `lookup`
    pub fn apply_overrides<F>(mut config: Config, lookup: F) -> Result<Config>
    where
        F: Fn(&str) -> Option<String>,
    {
        for (var, key) in ENV_OVERRIDES {
            if let Some(value) = lookup(var) {
                set_config_value(&mut config, key, &value)
                    .with_context(|| format!("Invalid value in {}", var))?;
            }
        }
        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(config: &Config, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            paths::ensure_dir(parent)?;
        }

        let yaml =
            serde_yaml::to_string(config).context("Failed to serialize configuration to YAML")?;

        std::fs::write(path, yaml)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("CHARTWARDEN_WATCH_NAMESPACE", "fleet"),
            ("CHARTWARDEN_CONCURRENCY", "8"),
        ]
        .into_iter()
        .collect();

        let config = ConfigLoader::apply_overrides(Config::default(), |key| {
            env.get(key).map(|v| v.to_string())
        })
        .unwrap();

        assert_eq!(config.watch_namespace.as_deref(), Some("fleet"));
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.helm_binary, "helm");
    }

    #[test]
    fn test_invalid_env_override_is_rejected() {
        let result = ConfigLoader::apply_overrides(Config::default(), |key| {
            (key == "CHARTWARDEN_CONCURRENCY").then(|| "many".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_save_and_load_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("config.yaml");
        let config = Config {
            watch_namespace: Some("fleet".into()),
            helm_binary: "/usr/local/bin/helm".into(),
            ..Default::default()
        };

        ConfigLoader::save(&config, &path).unwrap();
        assert_eq!(ConfigLoader::load_file(&path).unwrap(), config);
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(ConfigLoader::load(Some(&tmp.path().join("absent.yaml"))).is_err());
    }

    #[test]
    fn test_check_rejects_out_of_range_values() {
        assert!(ConfigLoader::check(&Config::default()).is_ok());
        assert!(
            ConfigLoader::check(&Config {
                concurrency: 0,
                ..Default::default()
            })
            .is_err()
        );
        assert!(
            ConfigLoader::check(&Config {
                watch_timeout_seconds: 30,
                ..Default::default()
            })
            .is_err()
        );
    }
}
