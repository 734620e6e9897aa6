//! Shared constants
//!
//! Names, annotation keys, and fixed intervals used across the reconciler.

use std::time::Duration;

/// API group of the ChartRelease resource
pub const API_GROUP: &str = "chartwarden.io";

/// Finalizer guarding uninstall of the underlying release
pub const RELEASE_FINALIZER: &str = "chartwarden.io/uninstall";

/// Annotation flagging a descriptor as a core system component
pub const CORE_COMPONENT_ANNOTATION: &str = "chartwarden.io/core-component";

/// Annotation flagging a descriptor created while bootstrapping a cluster
pub const BOOTSTRAP_ANNOTATION: &str = "chartwarden.io/bootstrap";

/// Default field manager for server-side patches
pub const FIELD_MANAGER: &str = "chartwarden-controller";

/// Default key read from a values source
pub const DEFAULT_VALUES_KEY: &str = "values.yaml";

/// Suffix of the Cluster API kubeconfig secret (`<cluster>-kubeconfig`)
pub const KUBECONFIG_SECRET_SUFFIX: &str = "-kubeconfig";

/// Key holding the kubeconfig inside the Cluster API secret
pub const KUBECONFIG_SECRET_KEY: &str = "value";

/// Prefix of the package engine's release history secrets
pub const RELEASE_SECRET_PREFIX: &str = "sh.helm.release.v1.";

/// Steady-state drift re-check interval
pub const STEADY_REQUEUE: Duration = Duration::from_secs(300);

/// Fixed interval while waiting on an external precondition
pub const PRECONDITION_REQUEUE: Duration = Duration::from_secs(30);

/// Short retry after orphaned history cleanup or a pending uninstall
pub const SHORT_RETRY: Duration = Duration::from_secs(5);

/// Default action timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Default number of release revisions kept by the package engine
pub const DEFAULT_MAX_HISTORY: u32 = 10;

/// Read timeout of every Kubernetes client the controller builds
pub const CLIENT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
pub const WATCH_TIMEOUT_SECS: u32 = 25;
