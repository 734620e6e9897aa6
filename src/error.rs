//! Error types for the release reconciler
//!
//! Variants follow the failure taxonomy the controller reports through
//! conditions: transient infrastructure errors, chart resolution errors,
//! package action errors and the orphaned-history sentinel.

use thiserror::Error;

use crate::runner::ReleaseAction;

/// Result alias used throughout the crate
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Why a chart could not be resolved from its repository
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartFailure {
    /// Repository URL does not parse
    UrlInvalid,
    /// Repository index could not be fetched or parsed
    IndexDownloadFailed,
    /// Chart or version missing from the index, or the package download failed
    ChartPullFailed,
}

impl ChartFailure {
    /// Condition reason reported for this failure
    pub fn reason(&self) -> &'static str {
        match self {
            ChartFailure::UrlInvalid => "RepositoryURLInvalid",
            ChartFailure::IndexDownloadFailed => "IndexDownloadFailed",
            ChartFailure::ChartPullFailed => "ChartPullFailed",
        }
    }
}

/// Main error type for chartwarden operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// The target cluster could not be resolved to a client
    #[error("target cluster {cluster}: {message}")]
    TargetResolution {
        /// `namespace/name` of the target cluster
        cluster: String,
        /// Condition reason (e.g. ClusterNotFound)
        reason: &'static str,
        /// Description of what failed
        message: String,
    },

    /// The chart could not be resolved or downloaded
    #[error("chart resolution failed ({}): {message}", .reason.reason())]
    ChartResolution {
        /// Which resolution step failed
        reason: ChartFailure,
        /// Description of what failed
        message: String,
    },

    /// A required values source does not exist
    #[error("values source {kind} {namespace}/{name} not found")]
    ValuesSourceNotFound {
        /// Source kind (ConfigMap or Secret)
        kind: String,
        /// Source namespace
        namespace: String,
        /// Source name
        name: String,
    },

    /// A values document could not be parsed or merged
    #[error("invalid values from {origin}: {message}")]
    InvalidValues {
        /// Where the values came from (inline or a source reference)
        origin: String,
        /// Description of what failed
        message: String,
    },

    /// A package engine action failed
    #[error("{action} failed: {message}")]
    PackageAction {
        /// The action that failed
        action: ReleaseAction,
        /// Engine output describing the failure
        message: String,
    },

    /// The engine reports no deployed releases for a release that has history
    #[error("release {release} has no deployed releases")]
    NoDeployedReleases {
        /// Name of the release
        release: String,
    },

    /// The package engine could not be invoked
    #[error("package engine error: {message}")]
    Engine {
        /// Description of what failed
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
    },
}

impl Error {
    /// Create a target resolution error
    pub fn target(cluster: impl Into<String>, reason: &'static str, msg: impl Into<String>) -> Self {
        Self::TargetResolution {
            cluster: cluster.into(),
            reason,
            message: msg.into(),
        }
    }

    /// Create a chart resolution error
    pub fn chart(reason: ChartFailure, msg: impl Into<String>) -> Self {
        Self::ChartResolution {
            reason,
            message: msg.into(),
        }
    }

    /// Create a package action error
    pub fn action(action: ReleaseAction, msg: impl Into<String>) -> Self {
        Self::PackageAction {
            action,
            message: msg.into(),
        }
    }

    /// Create an engine invocation error
    pub fn engine(msg: impl Into<String>) -> Self {
        Self::Engine {
            message: msg.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// True for the orphaned-history sentinel
    pub fn is_no_deployed_releases(&self) -> bool {
        matches!(self, Self::NoDeployedReleases { .. })
    }

    /// True if this wraps a kube API 409 Conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Kube { source: kube::Error::Api(ae) } if ae.code == 409)
    }

    /// True for kube errors worth retrying: conflicts, throttling, server
    /// errors and transport failures
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Kube {
                source: kube::Error::Api(ae),
            } => ae.code == 409 || ae.code == 429 || ae.code >= 500,
            Self::Kube { .. } => true,
            _ => false,
        }
    }

    /// Condition reason used when this error is surfaced on a descriptor
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Kube { .. } => "KubernetesAPIError",
            Self::TargetResolution { reason, .. } => *reason,
            Self::ChartResolution { reason, .. } => reason.reason(),
            Self::ValuesSourceNotFound { .. } | Self::InvalidValues { .. } => {
                "ValuesResolutionFailed"
            }
            Self::PackageAction { action, .. } => action.failure_reason(),
            Self::NoDeployedReleases { .. } => "NoDeployedReleases",
            Self::Engine { .. } => "PackageEngineError",
            Self::Serialization { .. } => "SerializationError",
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::serialization(e.to_string())
    }
}

/// True if a kube error is an API 404
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chart_failure_reasons() {
        let err = Error::chart(ChartFailure::UrlInvalid, "relative URL without a base");
        assert_eq!(err.reason(), "RepositoryURLInvalid");
        assert!(err.to_string().contains("RepositoryURLInvalid"));
        assert_eq!(
            Error::chart(ChartFailure::ChartPullFailed, "x").reason(),
            "ChartPullFailed"
        );
    }

    #[test]
    fn test_action_error_reason() {
        let err = Error::action(ReleaseAction::Upgrade, "timed out waiting for condition");
        assert_eq!(err.reason(), "UpgradeFailed");
        assert_eq!(err.to_string(), "upgrade failed: timed out waiting for condition");
    }

    #[test]
    fn test_no_deployed_releases_sentinel() {
        let err = Error::NoDeployedReleases {
            release: "monitoring-grafana".into(),
        };
        assert!(err.is_no_deployed_releases());
        assert!(!Error::engine("helm not found").is_no_deployed_releases());
    }

    #[test]
    fn test_non_kube_errors_are_not_transient() {
        assert!(!Error::engine("helm not found").is_transient());
        assert!(!Error::action(ReleaseAction::Install, "boom").is_transient());
        assert!(!Error::serialization("bad json").is_transient());
    }
}
