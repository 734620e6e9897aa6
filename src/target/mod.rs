//! Target resolution
//!
//! Decides whether a ChartRelease targets the management cluster or a
//! remote Cluster API workload cluster, and builds a `ReleaseRunner` bound
//! to that cluster and the release's target namespace.

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{ApiResource, DynamicObject, GroupVersionKind};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, Config};
#[cfg(test)]
use mockall::automock;
use tracing::debug;

use crate::constants::{KUBECONFIG_SECRET_KEY, KUBECONFIG_SECRET_SUFFIX};
use crate::error::{Error, Result, is_not_found};
use crate::models::ChartRelease;
use crate::runner::{EngineTarget, PackageEngine, ReleaseRunner, SecretHistoryStore};

/// Resolved release target
#[derive(Debug, Clone)]
pub struct Target {
    /// `namespace/name` of the workload cluster, empty for the management cluster
    pub cluster: String,
    pub runner: ReleaseRunner,
}

impl Target {
    pub fn is_management(&self) -> bool {
        self.cluster.is_empty()
    }
}

/// Outcome of a resolution
#[derive(Debug)]
pub enum TargetResolution {
    Ready(Target),
    /// An external precondition is not met yet; retried on a fixed interval
    Waiting {
        reason: &'static str,
        message: String,
    },
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait TargetResolver: Send + Sync {
    async fn resolve(&self, release: &ChartRelease) -> Result<TargetResolution>;
}

/// Resolves targets through Cluster API `Cluster` objects and their
/// `<name>-kubeconfig` secrets.
#[derive(Clone)]
pub struct ClusterTargetResolver {
    client: Client,
    engine: Arc<dyn PackageEngine>,
}

impl ClusterTargetResolver {
    pub fn new(client: Client, engine: Arc<dyn PackageEngine>) -> Self {
        Self { client, engine }
    }

    fn clusters(&self, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(
            self.client.clone(),
            namespace,
            &ApiResource::from_gvk(&GroupVersionKind {
                group: "cluster.x-k8s.io".to_string(),
                version: "v1beta1".to_string(),
                kind: "Cluster".to_string(),
            }),
        )
    }

    fn runner(&self, client: Client, namespace: &str, kubeconfig: Option<String>) -> ReleaseRunner {
        ReleaseRunner::new(
            self.engine.clone(),
            Arc::new(SecretHistoryStore::new(client, namespace)),
            EngineTarget {
                namespace: namespace.to_string(),
                kubeconfig,
            },
        )
    }
}

#[async_trait]
impl TargetResolver for ClusterTargetResolver {
    async fn resolve(&self, release: &ChartRelease) -> Result<TargetResolution> {
        let namespace = release.target_namespace();

        let Some((cluster_ns, cluster_name)) = release.target_cluster() else {
            return Ok(TargetResolution::Ready(Target {
                cluster: String::new(),
                runner: self.runner(self.client.clone(), &namespace, None),
            }));
        };
        let cluster_ref = format!("{cluster_ns}/{cluster_name}");

        let cluster = match self.clusters(&cluster_ns).get(&cluster_name).await {
            Ok(cluster) => cluster,
            Err(e) if is_not_found(&e) => {
                return Err(Error::target(
                    cluster_ref,
                    "ClusterNotFound",
                    "cluster does not exist",
                ));
            }
            Err(e) => return Err(e.into()),
        };

        if !cluster_provisioned(cluster.data.get("status")) {
            debug!(cluster = %cluster_ref, "Target cluster not provisioned yet");
            return Ok(TargetResolution::Waiting {
                reason: "ClusterNotReady",
                message: format!("cluster {cluster_ref} is not provisioned yet"),
            });
        }

        let secret_name = format!("{cluster_name}{KUBECONFIG_SECRET_SUFFIX}");
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), &cluster_ns);
        let raw = match secrets.get(&secret_name).await {
            Ok(secret) => secret
                .data
                .and_then(|mut d| d.remove(KUBECONFIG_SECRET_KEY))
                .map(|b| String::from_utf8_lossy(&b.0).into_owned()),
            Err(e) if is_not_found(&e) => None,
            Err(e) => return Err(e.into()),
        };

        let Some(raw) = raw else {
            if release.is_bootstrap() {
                return Ok(TargetResolution::Waiting {
                    reason: "CredentialsNotAvailable",
                    message: format!("credentials for cluster {cluster_ref} are not available yet"),
                });
            }
            return Err(Error::target(
                cluster_ref,
                "CredentialsNotFound",
                format!("secret {cluster_ns}/{secret_name} with key {KUBECONFIG_SECRET_KEY} not found"),
            ));
        };

        let client = client_from_kubeconfig(&cluster_ref, &raw).await?;
        Ok(TargetResolution::Ready(Target {
            cluster: cluster_ref,
            runner: self.runner(client, &namespace, Some(raw)),
        }))
    }
}

/// Cluster is usable once its control plane is ready or it reports Provisioned
fn cluster_provisioned(status: Option<&serde_json::Value>) -> bool {
    let Some(status) = status else {
        return false;
    };
    let control_plane_ready = status
        .get("controlPlaneReady")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let provisioned = status.get("phase").and_then(|v| v.as_str()) == Some("Provisioned");
    control_plane_ready || provisioned
}

async fn client_from_kubeconfig(cluster: &str, raw: &str) -> Result<Client> {
    let kubeconfig = Kubeconfig::from_yaml(raw).map_err(|e| {
        Error::target(cluster, "InvalidCredentials", format!("failed to parse kubeconfig: {e}"))
    })?;
    let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(|e| {
            Error::target(cluster, "InvalidCredentials", format!("failed to load kubeconfig: {e}"))
        })?;
    Ok(crate::kube::client_from_config(config)?)
}
