//! Controller configuration
//!
//! A single YAML file layered over built-in defaults, with environment
//! variable overrides on top.

pub mod loader;
pub mod paths;
pub mod schema;

pub use loader::ConfigLoader;
pub use schema::Config;

use anyhow::Context;

/// Every settable key, in display order
pub const KEYS: &[&str] = &[
    "watchNamespace",
    "concurrency",
    "steadyRequeueSeconds",
    "preconditionRequeueSeconds",
    "helmBinary",
    "fieldManager",
    "watchTimeoutSeconds",
    "httpTimeoutSeconds",
];

/// Get a configuration value by key
pub fn get_config_value(config: &Config, key: &str) -> anyhow::Result<String> {
    match key {
        "watchNamespace" => Ok(config.watch_namespace.clone().unwrap_or_default()),
        "concurrency" => Ok(config.concurrency.to_string()),
        "steadyRequeueSeconds" => Ok(config.steady_requeue_seconds.to_string()),
        "preconditionRequeueSeconds" => Ok(config.precondition_requeue_seconds.to_string()),
        "helmBinary" => Ok(config.helm_binary.clone()),
        "fieldManager" => Ok(config.field_manager.clone()),
        "watchTimeoutSeconds" => Ok(config.watch_timeout_seconds.to_string()),
        "httpTimeoutSeconds" => Ok(config.http_timeout_seconds.to_string()),
        _ => Err(anyhow::anyhow!("Unknown configuration key: {}", key)),
    }
}

/// Set a configuration value by key
pub fn set_config_value(config: &mut Config, key: &str, value: &str) -> anyhow::Result<()> {
    match key {
        "watchNamespace" => {
            // empty watches all namespaces
            config.watch_namespace = Some(value.trim())
                .filter(|v| !v.is_empty())
                .map(str::to_string);
        }
        "concurrency" => {
            config.concurrency = value.parse().context("concurrency must be a number")?;
        }
        "steadyRequeueSeconds" => {
            config.steady_requeue_seconds = value
                .parse()
                .context("steadyRequeueSeconds must be a number")?;
        }
        "preconditionRequeueSeconds" => {
            config.precondition_requeue_seconds = value
                .parse()
                .context("preconditionRequeueSeconds must be a number")?;
        }
        "helmBinary" => {
            config.helm_binary = value.to_string();
        }
        "fieldManager" => {
            config.field_manager = value.to_string();
        }
        "watchTimeoutSeconds" => {
            config.watch_timeout_seconds = value
                .parse()
                .context("watchTimeoutSeconds must be a number")?;
        }
        "httpTimeoutSeconds" => {
            config.http_timeout_seconds = value
                .parse()
                .context("httpTimeoutSeconds must be a number")?;
        }
        _ => return Err(anyhow::anyhow!("Unknown configuration key: {}", key)),
    }

    Ok(())
}
