//! Configuration schema definitions
//!
//! Defines the structure of the configuration file using serde for serialization.

use serde::{Deserialize, Serialize};

use crate::constants::{FIELD_MANAGER, WATCH_TIMEOUT_SECS};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Namespace to watch for ChartReleases; unset watches all namespaces
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watch_namespace: Option<String>,

    /// Maximum number of descriptors reconciled in parallel
    #[serde(default = "default_concurrency")]
    pub concurrency: u16,

    /// Requeue interval of a converged descriptor
    #[serde(default = "default_steady_requeue")]
    pub steady_requeue_seconds: u64,

    /// Requeue interval while waiting on a target or dependency
    #[serde(default = "default_precondition_requeue")]
    pub precondition_requeue_seconds: u64,

    /// Path or name of the helm binary
    #[serde(default = "default_helm_binary")]
    pub helm_binary: String,

    /// Field manager used for status and metadata patches
    #[serde(default = "default_field_manager")]
    pub field_manager: String,

    /// Server-side watch timeout
    #[serde(default = "default_watch_timeout")]
    pub watch_timeout_seconds: u32,

    /// Timeout for chart repository requests
    #[serde(default = "default_http_timeout")]
    pub http_timeout_seconds: u64,
}

fn default_concurrency() -> u16 {
    1
}

fn default_steady_requeue() -> u64 {
    300
}

fn default_precondition_requeue() -> u64 {
    30
}

fn default_helm_binary() -> String {
    "helm".to_string()
}

fn default_field_manager() -> String {
    FIELD_MANAGER.to_string()
}

fn default_watch_timeout() -> u32 {
    WATCH_TIMEOUT_SECS
}

fn default_http_timeout() -> u64 {
    60
}

impl Default for Config {
    fn default() -> Self {
        Self {
            watch_namespace: None,
            concurrency: default_concurrency(),
            steady_requeue_seconds: default_steady_requeue(),
            precondition_requeue_seconds: default_precondition_requeue(),
            helm_binary: default_helm_binary(),
            field_manager: default_field_manager(),
            watch_timeout_seconds: default_watch_timeout(),
            http_timeout_seconds: default_http_timeout(),
        }
    }
}
