//! Release runner
//!
//! A thin façade over the package engine scoped to one target
//! cluster/namespace. The engine itself (`PackageEngine`) and its release
//! history storage (`ReleaseHistoryStore`) are black boxes behind traits;
//! `HelmCli` and `SecretHistoryStore` are the production implementations.

mod helm;
mod history;

pub use helm::HelmCli;
pub use history::{SecretHistoryStore, decode_release_record, parse_release_json};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::repository::ChartPackage;

/// Package engine actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReleaseAction {
    Install,
    Upgrade,
    Test,
    Rollback,
    Uninstall,
}

impl ReleaseAction {
    /// Condition reason reported when this action fails
    pub fn failure_reason(&self) -> &'static str {
        match self {
            Self::Install => "InstallFailed",
            Self::Upgrade => "UpgradeFailed",
            Self::Test => "TestFailed",
            Self::Rollback => "RollbackFailed",
            Self::Uninstall => "UninstallFailed",
        }
    }

    /// Condition reason reported when this action succeeds
    pub fn success_reason(&self) -> &'static str {
        match self {
            Self::Install => "InstallSucceeded",
            Self::Upgrade => "UpgradeSucceeded",
            Self::Test => "TestSucceeded",
            Self::Rollback => "RollbackSucceeded",
            Self::Uninstall => "UninstallSucceeded",
        }
    }
}

impl std::fmt::Display for ReleaseAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Install => write!(f, "install"),
            Self::Upgrade => write!(f, "upgrade"),
            Self::Test => write!(f, "test"),
            Self::Rollback => write!(f, "rollback"),
            Self::Uninstall => write!(f, "uninstall"),
        }
    }
}

/// Status of an installed release as reported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseState {
    Deployed,
    PendingInstall,
    PendingUpgrade,
    PendingRollback,
    Uninstalling,
    Uninstalled,
    Superseded,
    Failed,
    Unknown,
}

impl ReleaseState {
    /// Parse an engine status string; unknown values map to `Unknown`
    pub fn parse(s: &str) -> Self {
        match s {
            "deployed" => Self::Deployed,
            "pending-install" => Self::PendingInstall,
            "pending-upgrade" => Self::PendingUpgrade,
            "pending-rollback" => Self::PendingRollback,
            "uninstalling" => Self::Uninstalling,
            "uninstalled" => Self::Uninstalled,
            "superseded" => Self::Superseded,
            "failed" => Self::Failed,
            _ => Self::Unknown,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            Self::PendingInstall | Self::PendingUpgrade | Self::PendingRollback
        )
    }
}

/// Last observed revision of an installed release
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedRelease {
    pub name: String,
    pub namespace: String,
    /// Package revision number, starting at 1
    pub revision: u32,
    /// Chart version the revision was installed from
    pub chart_version: String,
    pub state: ReleaseState,
    /// Set once the release has been uninstalled with history kept
    pub deleted: bool,
}

/// Where engine actions run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineTarget {
    pub namespace: String,
    /// Raw kubeconfig for a remote cluster; `None` uses the ambient credentials
    pub kubeconfig: Option<String>,
}

/// Inputs shared by install and upgrade
#[derive(Debug, Clone)]
pub struct ActionRequest {
    pub release_name: String,
    pub chart: ChartPackage,
    pub values: serde_json::Map<String, serde_json::Value>,
    pub wait: bool,
    pub timeout: Duration,
    pub skip_crds: bool,
    pub max_history: u32,
    pub reset_values: bool,
    pub force: bool,
}

/// Rollback options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackRequest {
    pub release_name: String,
    pub force: bool,
    pub recreate: bool,
    pub disable_hooks: bool,
    pub wait: bool,
    pub timeout: Duration,
    pub max_history: u32,
}

/// Package engine actions against one target
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PackageEngine: Send + Sync {
    async fn install(&self, target: &EngineTarget, request: &ActionRequest) -> Result<()>;
    async fn upgrade(&self, target: &EngineTarget, request: &ActionRequest) -> Result<()>;
    async fn test(&self, target: &EngineTarget, release_name: &str, timeout: Duration)
    -> Result<()>;
    async fn rollback(&self, target: &EngineTarget, request: &RollbackRequest) -> Result<()>;
    async fn uninstall(
        &self,
        target: &EngineTarget,
        release_name: &str,
        timeout: Duration,
    ) -> Result<()>;
    /// Current status, `None` if the engine does not know the release
    async fn status(
        &self,
        target: &EngineTarget,
        release_name: &str,
    ) -> Result<Option<ObservedRelease>>;
}

/// Release history storage in one namespace
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ReleaseHistoryStore: Send + Sync {
    /// Latest stored revision of a release
    async fn observe_last(&self, release_name: &str) -> Result<Option<ObservedRelease>>;
    /// Latest stored revision of every release
    async fn list(&self) -> Result<Vec<ObservedRelease>>;
    /// Delete every history record whose name contains `fragment`
    async fn delete_matching(&self, fragment: &str) -> Result<usize>;
    /// Delete one stored revision
    async fn delete_revision(&self, release_name: &str, revision: u32) -> Result<()>;
}

/// Engine façade bound to one target cluster/namespace.
///
/// Cheap to clone; constructed fresh for every reconciliation pass.
#[derive(Clone)]
pub struct ReleaseRunner {
    engine: Arc<dyn PackageEngine>,
    history: Arc<dyn ReleaseHistoryStore>,
    target: EngineTarget,
}

impl std::fmt::Debug for ReleaseRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReleaseRunner")
            .field("namespace", &self.target.namespace)
            .field("remote", &self.target.kubeconfig.is_some())
            .finish()
    }
}

impl ReleaseRunner {
    pub fn new(
        engine: Arc<dyn PackageEngine>,
        history: Arc<dyn ReleaseHistoryStore>,
        target: EngineTarget,
    ) -> Self {
        Self {
            engine,
            history,
            target,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.target.namespace
    }

    pub async fn install(&self, request: &ActionRequest) -> Result<()> {
        info!(
            release = %request.release_name,
            namespace = %self.target.namespace,
            chart = %request.chart.entry.name,
            version = %request.chart.entry.version,
            action = "install",
            "Installing release"
        );
        self.engine.install(&self.target, request).await
    }

    pub async fn upgrade(&self, request: &ActionRequest) -> Result<()> {
        info!(
            release = %request.release_name,
            namespace = %self.target.namespace,
            chart = %request.chart.entry.name,
            version = %request.chart.entry.version,
            force = request.force,
            action = "upgrade",
            "Upgrading release"
        );
        self.engine.upgrade(&self.target, request).await
    }

    pub async fn test(&self, release_name: &str, timeout: Duration) -> Result<()> {
        info!(release = %release_name, namespace = %self.target.namespace, action = "test", "Testing release");
        self.engine.test(&self.target, release_name, timeout).await
    }

    pub async fn rollback(&self, request: &RollbackRequest) -> Result<()> {
        info!(
            release = %request.release_name,
            namespace = %self.target.namespace,
            action = "rollback",
            "Rolling back release"
        );
        self.engine.rollback(&self.target, request).await
    }

    pub async fn uninstall(&self, release_name: &str, timeout: Duration) -> Result<()> {
        info!(release = %release_name, namespace = %self.target.namespace, action = "uninstall", "Uninstalling release");
        self.engine
            .uninstall(&self.target, release_name, timeout)
            .await
    }

    pub async fn status(&self, release_name: &str) -> Result<Option<ObservedRelease>> {
        self.engine.status(&self.target, release_name).await
    }

    /// Latest revision of every release in the target namespace
    pub async fn list(&self) -> Result<Vec<ObservedRelease>> {
        self.history.list().await
    }

    /// Last stored revision of a release; absence is `Ok(None)`
    pub async fn observe_last_release(&self, release_name: &str) -> Result<Option<ObservedRelease>> {
        self.history.observe_last(release_name).await
    }

    /// Drop the stuck pending revision so the previous one becomes current.
    ///
    /// Returns whether a record was deleted.
    pub async fn repair_pending(&self, release_name: &str) -> Result<bool> {
        match self.history.observe_last(release_name).await? {
            Some(last) if last.state.is_pending() => {
                warn!(
                    release = %release_name,
                    namespace = %self.target.namespace,
                    revision = last.revision,
                    state = ?last.state,
                    "Removing stuck pending release revision"
                );
                self.history
                    .delete_revision(release_name, last.revision)
                    .await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Delete all history records mentioning the release name
    pub async fn purge_history(&self, release_name: &str) -> Result<usize> {
        let removed = self.history.delete_matching(release_name).await?;
        debug!(
            release = %release_name,
            namespace = %self.target.namespace,
            removed,
            "Purged release history"
        );
        Ok(removed)
    }
}

/// Map engine output of a failed action to an error.
///
/// Recognises the orphaned-history sentinel so callers can clean up.
pub(crate) fn engine_failure(action: ReleaseAction, stderr: &str) -> Error {
    if stderr.contains("has no deployed releases") {
        let release = stderr
            .split('"')
            .nth(1)
            .unwrap_or_default()
            .to_string();
        return Error::NoDeployedReleases { release };
    }
    Error::action(action, stderr.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observed(revision: u32, state: ReleaseState) -> ObservedRelease {
        ObservedRelease {
            name: "fleet-grafana".into(),
            namespace: "monitoring".into(),
            revision,
            chart_version: "7.3.0".into(),
            state,
            deleted: false,
        }
    }

    fn runner(history: MockReleaseHistoryStore) -> ReleaseRunner {
        ReleaseRunner::new(
            Arc::new(MockPackageEngine::new()),
            Arc::new(history),
            EngineTarget {
                namespace: "monitoring".into(),
                kubeconfig: None,
            },
        )
    }

    #[test]
    fn test_release_state_parse() {
        assert_eq!(ReleaseState::parse("deployed"), ReleaseState::Deployed);
        assert_eq!(
            ReleaseState::parse("pending-upgrade"),
            ReleaseState::PendingUpgrade
        );
        assert_eq!(ReleaseState::parse("bogus"), ReleaseState::Unknown);
        assert!(ReleaseState::PendingRollback.is_pending());
        assert!(!ReleaseState::Failed.is_pending());
    }

    #[test]
    fn test_engine_failure_detects_orphan_sentinel() {
        let err = engine_failure(
            ReleaseAction::Upgrade,
            "Error: UPGRADE FAILED: \"fleet-grafana\" has no deployed releases",
        );
        match err {
            Error::NoDeployedReleases { release } => assert_eq!(release, "fleet-grafana"),
            other => panic!("unexpected error: {other:?}"),
        }

        let err = engine_failure(ReleaseAction::Install, "Error: timed out\n");
        assert_eq!(err.reason(), "InstallFailed");
    }

    #[tokio::test]
    async fn test_observe_last_absent_is_not_an_error() {
        let mut history = MockReleaseHistoryStore::new();
        history.expect_observe_last().returning(|_| Ok(None));
        let runner = runner(history);
        assert!(
            runner
                .observe_last_release("fleet-grafana")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_repair_pending_deletes_stuck_revision() {
        let mut history = MockReleaseHistoryStore::new();
        history
            .expect_observe_last()
            .returning(|_| Ok(Some(observed(4, ReleaseState::PendingUpgrade))));
        history
            .expect_delete_revision()
            .withf(|name, rev| name == "fleet-grafana" && *rev == 4)
            .times(1)
            .returning(|_, _| Ok(()));
        assert!(runner(history).repair_pending("fleet-grafana").await.unwrap());
    }

    #[tokio::test]
    async fn test_repair_pending_leaves_deployed_release_alone() {
        let mut history = MockReleaseHistoryStore::new();
        history
            .expect_observe_last()
            .returning(|_| Ok(Some(observed(4, ReleaseState::Deployed))));
        history.expect_delete_revision().never();
        assert!(!runner(history).repair_pending("fleet-grafana").await.unwrap());
    }
}
