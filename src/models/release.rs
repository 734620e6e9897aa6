//! ChartRelease CRD
//!
//! A ChartRelease is the desired-state record for one installed chart in a
//! target cluster/namespace. The status block is owned by the reconciler.

use std::time::Duration;

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::conditions::{Condition, Conditioned};
use crate::constants::{
    BOOTSTRAP_ANNOTATION, CORE_COMPONENT_ANNOTATION, DEFAULT_MAX_HISTORY, DEFAULT_TIMEOUT_SECS,
    DEFAULT_VALUES_KEY, RELEASE_FINALIZER,
};

/// Desired state for one chart release.
///
/// Example:
/// ```yaml
/// apiVersion: chartwarden.io/v1alpha1
/// kind: ChartRelease
/// metadata:
///   name: ingress
///   namespace: fleet
/// spec:
///   chart:
///     repository: https://kubernetes.github.io/ingress-nginx
///     name: ingress-nginx
///     version: 4.11.2
///   targetCluster: fleet/edge-01
///   targetNamespace: ingress
///   valuesFrom:
///     - kind: ConfigMap
///       name: ingress-defaults
///   values: |
///     controller:
///       replicaCount: 2
/// ```
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "chartwarden.io",
    version = "v1alpha1",
    kind = "ChartRelease",
    namespaced,
    status = "ChartReleaseStatus",
    shortname = "crel",
    printcolumn = r#"{"name":"Chart","type":"string","jsonPath":".spec.chart.name"}"#,
    printcolumn = r#"{"name":"Version","type":"string","jsonPath":".status.lastAppliedRevision"}"#,
    printcolumn = r#"{"name":"Cluster","type":"string","jsonPath":".spec.targetCluster"}"#,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ChartReleaseSpec {
    /// Chart to install. Repository and name are immutable.
    pub chart: ChartRef,

    /// Target cluster as `namespace/name` of a Cluster API Cluster.
    /// Empty targets the management cluster. Immutable.
    #[serde(default)]
    pub target_cluster: String,

    /// Namespace the release is installed into (defaults to the descriptor namespace)
    #[serde(default)]
    pub target_namespace: String,

    /// Release name (defaults to `{targetNamespace}-{name}`)
    #[serde(default)]
    pub release_name: String,

    /// Inline values document (YAML), merged last
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<String>,

    /// External values sources, merged in order before the inline document
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values_from: Vec<ValuesReference>,

    /// Descriptors that must be Ready before any action is taken
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<DependencyReference>,

    /// Skip reconciliation entirely
    #[serde(default)]
    pub paused: bool,

    /// Adopt newer minor/patch versions of the chart automatically
    #[serde(default)]
    pub auto_upgrade: bool,

    /// Wait for release resources to become ready
    #[serde(default = "default_true")]
    pub wait: bool,

    /// Reset values to the chart defaults on upgrade
    #[serde(default)]
    pub reset_values: bool,

    /// Force resource updates through delete/recreate on upgrade
    #[serde(default = "default_true")]
    pub force_upgrade: bool,

    /// Skip installing CRDs shipped with the chart
    #[serde(default, rename = "skipCRDs")]
    pub skip_crds: bool,

    /// Maximum number of revisions kept in release history
    #[serde(default = "default_max_history")]
    pub max_history: u32,

    /// Install/upgrade timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Rollback behaviour used when an upgrade fails
    #[serde(default)]
    pub rollback: RollbackPolicy,

    /// Release test behaviour
    #[serde(default)]
    pub test: TestPolicy,
}

/// Chart coordinates in a repository
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChartRef {
    /// Repository URL (the directory holding `index.yaml`)
    pub repository: String,
    /// Chart name
    pub name: String,
    /// Chart version; empty tracks the latest version
    #[serde(default)]
    pub version: String,
}

/// Kind of object a values reference reads from
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ValuesSourceKind {
    #[default]
    ConfigMap,
    Secret,
}

impl std::fmt::Display for ValuesSourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConfigMap => write!(f, "ConfigMap"),
            Self::Secret => write!(f, "Secret"),
        }
    }
}

/// Reference to values stored in a ConfigMap or Secret
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ValuesReference {
    /// Source kind
    #[serde(default)]
    pub kind: ValuesSourceKind,
    /// Source name, in the descriptor namespace
    pub name: String,
    /// Data key to read
    #[serde(default = "default_values_key")]
    pub key: String,
    /// Dotted path to merge a single scalar at; empty merges a whole document
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub target_path: String,
    /// Skip silently when the source or key does not exist
    #[serde(default)]
    pub optional: bool,
}

/// Reference to another ChartRelease that must be Ready first
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DependencyReference {
    pub name: String,
    /// Defaults to the namespace of the depending descriptor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Rollback options applied when an upgrade fails after creating a revision
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RollbackPolicy {
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub recreate: bool,
    #[serde(default)]
    pub disable_hooks: bool,
    #[serde(default)]
    pub wait: bool,
    /// Rollback timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl Default for RollbackPolicy {
    fn default() -> Self {
        Self {
            force: false,
            recreate: false,
            disable_hooks: false,
            wait: false,
            timeout: default_timeout(),
        }
    }
}

/// Release test options
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TestPolicy {
    /// Run release tests after an install or upgrade created a revision
    #[serde(default)]
    pub enable: bool,
    /// Record test failures without failing the release
    #[serde(default)]
    pub ignore_failures: bool,
    /// Test timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl Default for TestPolicy {
    fn default() -> Self {
        Self {
            enable: false,
            ignore_failures: false,
            timeout: default_timeout(),
        }
    }
}

/// Observed state, written only by the reconciler
///
/// Status is written with JSON merge patches, so cleared fields must still
/// serialize (as `""`, `[]` or `0`) to reach the server.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChartReleaseStatus {
    /// Generation last processed by the reconciler
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Chart version of the last successful convergence
    #[serde(default)]
    pub last_applied_revision: String,

    /// Chart version of the last attempt
    #[serde(default)]
    pub last_attempted_revision: String,

    /// Checksum of the merged values of the last attempt
    #[serde(default)]
    pub last_attempted_values_checksum: String,

    /// Installed package revision number observed last (0 = none)
    #[serde(default)]
    pub last_release_revision: u32,

    /// Failures since the last success or desired-state change
    #[serde(default)]
    pub failures: u64,

    #[serde(default)]
    pub install_failures: u64,

    #[serde(default)]
    pub upgrade_failures: u64,
}

impl ChartReleaseStatus {
    /// Reset failure counters
    pub fn reset_failures(&mut self) {
        self.failures = 0;
        self.install_failures = 0;
        self.upgrade_failures = 0;
    }

    /// Blank the attempted-state record so the next pass sees new state
    pub fn reset_attempted(&mut self) {
        self.last_attempted_revision.clear();
        self.last_attempted_values_checksum.clear();
        self.last_release_revision = 0;
    }
}

/// Identity of an installed release: (cluster, namespace, release name)
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReleaseKey {
    pub cluster: String,
    pub namespace: String,
    pub release_name: String,
}

impl std::fmt::Display for ReleaseKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cluster = if self.cluster.is_empty() {
            "management"
        } else {
            &self.cluster
        };
        write!(f, "{}:{}/{}", cluster, self.namespace, self.release_name)
    }
}

impl ChartRelease {
    /// Namespace the release is installed into
    pub fn target_namespace(&self) -> String {
        if self.spec.target_namespace.is_empty() {
            self.namespace().unwrap_or_else(|| "default".to_string())
        } else {
            self.spec.target_namespace.clone()
        }
    }

    /// Effective release name
    pub fn release_name(&self) -> String {
        if self.spec.release_name.is_empty() {
            format!("{}-{}", self.target_namespace(), self.name_any())
        } else {
            self.spec.release_name.clone()
        }
    }

    /// Target cluster as `(namespace, name)`, or `None` for the management cluster.
    ///
    /// A bare `name` resolves in the descriptor's own namespace.
    pub fn target_cluster(&self) -> Option<(String, String)> {
        let target = self.spec.target_cluster.trim();
        if target.is_empty() {
            return None;
        }
        match target.split_once('/') {
            Some((ns, name)) => Some((ns.to_string(), name.to_string())),
            None => Some((
                self.namespace().unwrap_or_default(),
                target.to_string(),
            )),
        }
    }

    pub fn release_key(&self) -> ReleaseKey {
        ReleaseKey {
            cluster: self
                .target_cluster()
                .map(|(ns, name)| format!("{}/{}", ns, name))
                .unwrap_or_default(),
            namespace: self.target_namespace(),
            release_name: self.release_name(),
        }
    }

    pub fn is_core_component(&self) -> bool {
        annotation_is_true(self, CORE_COMPONENT_ANNOTATION)
    }

    pub fn is_bootstrap(&self) -> bool {
        annotation_is_true(self, BOOTSTRAP_ANNOTATION)
    }

    pub fn has_finalizer(&self) -> bool {
        self.finalizers().iter().any(|f| f == RELEASE_FINALIZER)
    }

    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Install/upgrade timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.spec.timeout)
    }
}

impl Conditioned for ChartRelease {
    fn observed_generation(&self) -> Option<i64> {
        self.status.as_ref().and_then(|s| s.observed_generation)
    }

    fn conditions(&self) -> &[Condition] {
        self.status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or_default()
    }
}

fn annotation_is_true(release: &ChartRelease, key: &str) -> bool {
    release
        .annotations()
        .get(key)
        .is_some_and(|v| v.eq_ignore_ascii_case("true"))
}

fn default_true() -> bool {
    true
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_max_history() -> u32 {
    DEFAULT_MAX_HISTORY
}

fn default_values_key() -> String {
    DEFAULT_VALUES_KEY.to_string()
}
