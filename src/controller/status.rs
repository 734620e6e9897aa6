//! Descriptor access for the reconciler
//!
//! `ReleaseApi` is the only way the state machine reads or writes
//! ChartRelease objects. Status writes are merge patches guarded by the
//! object's resourceVersion and retried on conflict.

use async_trait::async_trait;
use kube::api::{ListParams, Patch, PatchParams};
use kube::{Api, Client, ResourceExt};
#[cfg(test)]
use mockall::automock;
use serde_json::json;
use tracing::debug;

use super::retry::{RetryConfig, retry_with_backoff, retry_with_backoff_if};
use crate::constants::RELEASE_FINALIZER;
use crate::error::{Error, Result, is_not_found};
use crate::models::{ChartRelease, ChartReleaseStatus};

/// Status update attempts before a conflict is surfaced
const STATUS_CONFLICT_ATTEMPTS: u32 = 5;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait ReleaseApi: Send + Sync {
    /// Fetch a descriptor, `None` if it does not exist
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<ChartRelease>>;
    /// All descriptors visible to the controller
    async fn list(&self) -> Result<Vec<ChartRelease>>;
    /// Replace the status block
    async fn update_status(&self, release: &ChartRelease, status: &ChartReleaseStatus)
    -> Result<()>;
    /// Record a resolved chart version in the spec
    async fn set_chart_version(&self, release: &ChartRelease, version: &str) -> Result<()>;
    async fn add_finalizer(&self, release: &ChartRelease) -> Result<()>;
    async fn remove_finalizer(&self, release: &ChartRelease) -> Result<()>;
}

/// `ReleaseApi` backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeReleaseApi {
    client: Client,
    /// Namespace to watch; `None` for all namespaces
    namespace: Option<String>,
    field_manager: String,
    retry: RetryConfig,
}

impl KubeReleaseApi {
    pub fn new(client: Client, namespace: Option<String>, field_manager: &str) -> Self {
        Self {
            client,
            namespace,
            field_manager: field_manager.to_string(),
            retry: RetryConfig::default(),
        }
    }

    fn api(&self, namespace: &str) -> Api<ChartRelease> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn patch_params(&self) -> PatchParams {
        PatchParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        }
    }

    /// Rewrite the finalizer list, guarded by resourceVersion
    async fn patch_finalizers(&self, release: &ChartRelease, add: bool) -> Result<()> {
        let namespace = release.namespace().unwrap_or_default();
        let name = release.name_any();
        let api = self.api(&namespace);
        let params = self.patch_params();

        retry_with_backoff(&self.retry, "patch_finalizers", || {
            let api = api.clone();
            let name = name.clone();
            let params = params.clone();
            async move {
                let current = match api.get(&name).await {
                    Ok(current) => current,
                    Err(e) if is_not_found(&e) => return Ok(()),
                    Err(e) => return Err(Error::from(e)),
                };
                let mut finalizers = current.finalizers().to_vec();
                let present = finalizers.iter().any(|f| f == RELEASE_FINALIZER);
                match (add, present) {
                    (true, true) | (false, false) => return Ok(()),
                    (true, false) => finalizers.push(RELEASE_FINALIZER.to_string()),
                    (false, true) => finalizers.retain(|f| f != RELEASE_FINALIZER),
                }
                let patch = json!({
                    "metadata": {
                        "resourceVersion": current.resource_version(),
                        "finalizers": finalizers,
                    }
                });
                match api.patch(&name, &params, &Patch::Merge(&patch)).await {
                    Ok(_) => Ok(()),
                    // deleted while we were patching
                    Err(e) if is_not_found(&e) && !add => Ok(()),
                    Err(e) => Err(Error::from(e)),
                }
            }
        })
        .await
    }
}

/// Merge patch body for a status update, guarded by `resource_version`
pub fn status_patch(
    resource_version: Option<String>,
    status: &ChartReleaseStatus,
) -> serde_json::Value {
    json!({
        "metadata": { "resourceVersion": resource_version },
        "status": status,
    })
}

#[async_trait]
impl ReleaseApi for KubeReleaseApi {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<ChartRelease>> {
        Ok(self.api(namespace).get_opt(name).await?)
    }

    async fn list(&self) -> Result<Vec<ChartRelease>> {
        let api: Api<ChartRelease> = match &self.namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        };
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn update_status(
        &self,
        release: &ChartRelease,
        status: &ChartReleaseStatus,
    ) -> Result<()> {
        let namespace = release.namespace().unwrap_or_default();
        let name = release.name_any();
        let api = self.api(&namespace);
        let params = self.patch_params();

        let mut attempt = 0;
        loop {
            attempt += 1;
            let current = api.get_status(&name).await?;
            let patch = status_patch(current.resource_version(), status);
            match api
                .patch_status(&name, &params, &Patch::Merge(&patch))
                .await
            {
                Ok(_) => return Ok(()),
                Err(e) => {
                    let err = Error::from(e);
                    if err.is_conflict() && attempt < STATUS_CONFLICT_ATTEMPTS {
                        debug!(release = %name, namespace = %namespace, attempt, "Status update conflicted, retrying");
                        continue;
                    }
                    return Err(err);
                }
            }
        }
    }

    async fn set_chart_version(&self, release: &ChartRelease, version: &str) -> Result<()> {
        let namespace = release.namespace().unwrap_or_default();
        let name = release.name_any();
        let api = self.api(&namespace);
        let params = self.patch_params();
        let patch = json!({ "spec": { "chart": { "version": version } } });

        retry_with_backoff_if(&self.retry, "set_chart_version", Error::is_transient, || {
            let api = api.clone();
            let name = name.clone();
            let params = params.clone();
            let patch = patch.clone();
            async move {
                api.patch(&name, &params, &Patch::Merge(&patch))
                    .await
                    .map(|_| ())
                    .map_err(Error::from)
            }
        })
        .await
    }

    async fn add_finalizer(&self, release: &ChartRelease) -> Result<()> {
        self.patch_finalizers(release, true).await
    }

    async fn remove_finalizer(&self, release: &ChartRelease) -> Result<()> {
        self.patch_finalizers(release, false).await
    }
}
