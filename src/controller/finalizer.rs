//! Deletion protocol
//!
//! A descriptor marked for deletion keeps its finalizer until the release
//! it owns is gone from the target, or the target itself no longer exists.

use kube::ResourceExt;
use tracing::{debug, info, warn};

use super::Context;
use super::requeue::Requeue;
use crate::error::{Error, Result};
use crate::models::ChartRelease;
use crate::target::TargetResolution;

pub async fn finalize(release: &ChartRelease, ctx: &Context) -> Result<Requeue> {
    if !release.has_finalizer() {
        return Ok(Requeue::Steady);
    }

    let name = release.name_any();
    let namespace = release.namespace().unwrap_or_default();
    let release_name = release.release_name();

    let target = match ctx.targets.resolve(release).await {
        Ok(TargetResolution::Ready(target)) => target,
        Ok(TargetResolution::Waiting { reason, message }) => {
            debug!(release = %name, namespace = %namespace, reason, "{}", message);
            return Ok(Requeue::After(ctx.settings.precondition_requeue));
        }
        Err(Error::TargetResolution {
            reason: "ClusterNotFound",
            cluster,
            ..
        }) => {
            warn!(
                release = %name,
                namespace = %namespace,
                cluster = %cluster,
                "Target cluster is gone, releasing finalizer"
            );
            ctx.api.remove_finalizer(release).await?;
            return Ok(Requeue::Steady);
        }
        Err(e) => return Err(e),
    };

    let runner = target.runner;
    if runner.observe_last_release(&release_name).await?.is_none() {
        debug!(release = %name, namespace = %namespace, "No release to uninstall");
        ctx.api.remove_finalizer(release).await?;
        return Ok(Requeue::Steady);
    }

    runner.uninstall(&release_name, release.timeout()).await?;

    let remaining = runner.list().await?;
    if remaining.iter().any(|r| r.name == release_name) {
        debug!(
            release = %name,
            namespace = %namespace,
            release_name = %release_name,
            "Release still listed after uninstall"
        );
        return Ok(Requeue::After(ctx.settings.short_retry));
    }

    ctx.api.remove_finalizer(release).await?;
    info!(
        release = %name,
        namespace = %namespace,
        release_name = %release_name,
        "Uninstalled release"
    );
    Ok(Requeue::Steady)
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use serde_json::json;

    use super::*;
    use crate::controller::status::MockReleaseApi;
    use crate::controller::test_support;
    use crate::repository::MockChartRepository;
    use crate::runner::{
        EngineTarget, MockPackageEngine, MockReleaseHistoryStore, ObservedRelease, ReleaseRunner,
        ReleaseState,
    };
    use crate::target::{MockTargetResolver, Target};
    use crate::values::MockValuesSource;

    fn deleting() -> ChartRelease {
        let mut release = test_support::release(json!({"targetCluster": "edge-01"}));
        release.metadata.deletion_timestamp =
            serde_json::from_value(json!("2024-02-01T00:00:00Z")).unwrap();
        release
    }

    fn installed() -> ObservedRelease {
        ObservedRelease {
            name: "apps-podinfo".into(),
            namespace: "apps".into(),
            revision: 4,
            chart_version: "1.0.0".into(),
            state: ReleaseState::Deployed,
            deleted: false,
        }
    }

    fn resolver(engine: MockPackageEngine, history: MockReleaseHistoryStore) -> MockTargetResolver {
        let runner = ReleaseRunner::new(
            Arc::new(engine),
            Arc::new(history),
            EngineTarget {
                namespace: "apps".into(),
                kubeconfig: Some("apiVersion: v1".into()),
            },
        );
        let mut targets = MockTargetResolver::new();
        targets.expect_resolve().returning(move |_| {
            Ok(TargetResolution::Ready(Target {
                cluster: "fleet/edge-01".into(),
                runner: runner.clone(),
            }))
        });
        targets
    }

    fn finalizer_api(removed: &Arc<Mutex<u32>>) -> MockReleaseApi {
        let removed = removed.clone();
        let mut api = MockReleaseApi::new();
        api.expect_remove_finalizer().returning(move |_| {
            *removed.lock().unwrap() += 1;
            Ok(())
        });
        api
    }

    #[tokio::test]
    async fn test_uninstalls_then_releases_finalizer() {
        let present = Arc::new(Mutex::new(Some(installed())));
        let removed = Arc::new(Mutex::new(0));

        let mut engine = MockPackageEngine::new();
        let uninstalled = present.clone();
        engine
            .expect_uninstall()
            .times(1)
            .returning(move |target, name, _| {
                assert!(target.kubeconfig.is_some());
                assert_eq!(name, "apps-podinfo");
                *uninstalled.lock().unwrap() = None;
                Ok(())
            });
        let mut history = MockReleaseHistoryStore::new();
        let observed = present.clone();
        history
            .expect_observe_last()
            .returning(move |_| Ok(observed.lock().unwrap().clone()));
        let listed = present.clone();
        history
            .expect_list()
            .returning(move || Ok(listed.lock().unwrap().iter().cloned().collect()));

        let ctx = test_support::context(
            finalizer_api(&removed),
            resolver(engine, history),
            MockChartRepository::new(),
            MockValuesSource::new(),
        );

        let requeue = finalize(&deleting(), &ctx).await.unwrap();
        assert_eq!(requeue, Requeue::Steady);
        assert_eq!(*removed.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_release_still_listed_retries_shortly() {
        let removed = Arc::new(Mutex::new(0));

        let mut engine = MockPackageEngine::new();
        engine.expect_uninstall().returning(|_, _, _| Ok(()));
        let mut history = MockReleaseHistoryStore::new();
        history
            .expect_observe_last()
            .returning(|_| Ok(Some(installed())));
        history.expect_list().returning(|| Ok(vec![installed()]));

        let ctx = test_support::context(
            finalizer_api(&removed),
            resolver(engine, history),
            MockChartRepository::new(),
            MockValuesSource::new(),
        );

        let requeue = finalize(&deleting(), &ctx).await.unwrap();
        assert_eq!(requeue, Requeue::After(ctx.settings.short_retry));
        assert_eq!(*removed.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_absent_release_releases_finalizer_without_uninstall() {
        let removed = Arc::new(Mutex::new(0));
        let mut history = MockReleaseHistoryStore::new();
        history.expect_observe_last().returning(|_| Ok(None));

        let ctx = test_support::context(
            finalizer_api(&removed),
            resolver(MockPackageEngine::new(), history),
            MockChartRepository::new(),
            MockValuesSource::new(),
        );

        assert_eq!(finalize(&deleting(), &ctx).await.unwrap(), Requeue::Steady);
        assert_eq!(*removed.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_missing_cluster_releases_finalizer() {
        let removed = Arc::new(Mutex::new(0));
        let mut targets = MockTargetResolver::new();
        targets.expect_resolve().returning(|_| {
            Err(Error::target(
                "fleet/edge-01",
                "ClusterNotFound",
                "cluster does not exist",
            ))
        });

        let ctx = test_support::context(
            finalizer_api(&removed),
            targets,
            MockChartRepository::new(),
            MockValuesSource::new(),
        );

        assert_eq!(finalize(&deleting(), &ctx).await.unwrap(), Requeue::Steady);
        assert_eq!(*removed.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_cluster_keeps_finalizer() {
        let removed = Arc::new(Mutex::new(0));
        let mut targets = MockTargetResolver::new();
        targets.expect_resolve().returning(|_| {
            Ok(TargetResolution::Waiting {
                reason: "ClusterNotReady",
                message: "control plane not ready".into(),
            })
        });

        let ctx = test_support::context(
            finalizer_api(&removed),
            targets,
            MockChartRepository::new(),
            MockValuesSource::new(),
        );

        assert_eq!(
            finalize(&deleting(), &ctx).await.unwrap(),
            Requeue::After(ctx.settings.precondition_requeue)
        );
        assert_eq!(*removed.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_without_finalizer_nothing_happens() {
        let ctx = test_support::context(
            MockReleaseApi::new(),
            MockTargetResolver::new(),
            MockChartRepository::new(),
            MockValuesSource::new(),
        );
        let mut release = deleting();
        release.metadata.finalizers = None;
        assert_eq!(finalize(&release, &ctx).await.unwrap(), Requeue::Steady);
    }
}
