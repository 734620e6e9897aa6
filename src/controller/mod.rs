//! ChartRelease controller
//!
//! Wires the reconciler into a `kube::runtime::Controller`. The runtime's
//! work queue guarantees at most one pass per descriptor at a time; the
//! `concurrency` setting bounds passes across descriptors.

pub mod drift;
pub mod finalizer;
pub mod gate;
pub mod reconcile;
pub mod requeue;
pub mod retry;
pub mod status;

pub use requeue::Requeue;
pub use status::{KubeReleaseApi, ReleaseApi};

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::StreamExt;
use kube::runtime::Controller;
use kube::runtime::controller::{Action, Config as ControllerConfig};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::{Api, Client, ResourceExt};
use tracing::{debug, error, info};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::ChartRelease;
use crate::repository::{ChartRepository, HttpChartRepository};
use crate::runner::HelmCli;
use crate::target::{ClusterTargetResolver, TargetResolver};
use crate::values::{KubeValuesSource, ValuesSource};

/// Requeue intervals
#[derive(Debug, Clone)]
pub struct Settings {
    pub steady_requeue: Duration,
    pub precondition_requeue: Duration,
    pub short_retry: Duration,
}

impl Settings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            steady_requeue: Duration::from_secs(config.steady_requeue_seconds),
            precondition_requeue: Duration::from_secs(config.precondition_requeue_seconds),
            short_retry: crate::constants::SHORT_RETRY,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            steady_requeue: crate::constants::STEADY_REQUEUE,
            precondition_requeue: crate::constants::PRECONDITION_REQUEUE,
            short_retry: crate::constants::SHORT_RETRY,
        }
    }
}

/// Shared reconciler context
pub struct Context {
    pub api: Arc<dyn ReleaseApi>,
    pub targets: Arc<dyn TargetResolver>,
    pub charts: Arc<dyn ChartRepository>,
    pub values: Arc<dyn ValuesSource>,
    pub settings: Settings,
    /// Consecutive reconcile errors per descriptor, for error backoff
    error_counts: Mutex<HashMap<String, ErrorCount>>,
}

#[derive(Debug, Clone, Copy)]
struct ErrorCount {
    count: u32,
    last: Instant,
}

impl Context {
    pub fn new(
        api: Arc<dyn ReleaseApi>,
        targets: Arc<dyn TargetResolver>,
        charts: Arc<dyn ChartRepository>,
        values: Arc<dyn ValuesSource>,
        settings: Settings,
    ) -> Self {
        Self {
            api,
            targets,
            charts,
            values,
            settings,
            error_counts: Mutex::new(HashMap::new()),
        }
    }

    /// Production wiring against a management cluster client
    pub fn from_client(client: Client, config: &Config) -> Result<Self> {
        let engine = Arc::new(HelmCli::new(&config.helm_binary));
        Ok(Self::new(
            Arc::new(KubeReleaseApi::new(
                client.clone(),
                config.watch_namespace.clone(),
                &config.field_manager,
            )),
            Arc::new(ClusterTargetResolver::new(client.clone(), engine)),
            Arc::new(HttpChartRepository::new(Duration::from_secs(
                config.http_timeout_seconds,
            ))?),
            Arc::new(KubeValuesSource::new(client)),
            Settings::from_config(config),
        ))
    }

    fn record_error(&self, key: &str) -> u32 {
        self.record_error_at(key, Instant::now())
    }

    /// A failing descriptor is requeued within the steady interval, so an
    /// entry untouched for two intervals belongs to a deleted descriptor
    fn record_error_at(&self, key: &str, now: Instant) -> u32 {
        let stale_after = self.settings.steady_requeue * 2;
        let mut counts = self
            .error_counts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        counts.retain(|_, entry| now.saturating_duration_since(entry.last) < stale_after);
        let entry = counts.entry(key.to_string()).or_insert(ErrorCount {
            count: 0,
            last: now,
        });
        entry.count = entry.count.saturating_add(1);
        entry.last = now;
        entry.count
    }

    #[cfg(test)]
    fn error_count(&self, key: &str) -> Option<u32> {
        self.error_counts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(key)
            .map(|entry| entry.count)
    }

    fn clear_errors(&self, key: &str) {
        self.error_counts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(key);
    }
}

fn object_key(release: &ChartRelease) -> String {
    format!(
        "{}/{}",
        release.namespace().unwrap_or_default(),
        release.name_any()
    )
}

/// Reconcile entry point: deletion protocol or convergence pass
pub async fn reconcile(release: Arc<ChartRelease>, ctx: Arc<Context>) -> Result<Action> {
    let key = object_key(&release);
    debug!(release = %key, "Reconciling ChartRelease");

    let requeue = if release.is_deleting() {
        if !release.has_finalizer() {
            // nothing left to do, and no later pass will clear the count
            ctx.clear_errors(&key);
            return Ok(Action::await_change());
        }
        finalizer::finalize(&release, &ctx).await?
    } else {
        if !release.has_finalizer() {
            ctx.api.add_finalizer(&release).await?;
        }
        reconcile::reconcile_release(&release, &ctx).await?
    };

    ctx.clear_errors(&key);
    Ok(requeue.into_action(ctx.settings.steady_requeue))
}

/// Error policy: exponential backoff per descriptor, short fixed retry
/// after orphaned history was cleaned up
pub fn error_policy(release: Arc<ChartRelease>, error: &Error, ctx: Arc<Context>) -> Action {
    let key = object_key(&release);
    let failures = ctx.record_error(&key);

    let delay = if error.is_no_deployed_releases() {
        ctx.settings.short_retry
    } else {
        retry::error_backoff(failures.saturating_sub(1), ctx.settings.steady_requeue)
    };

    error!(
        release = %key,
        reason = error.reason(),
        failures,
        delay_ms = delay.as_millis() as u64,
        error = %error,
        "Reconciliation failed"
    );
    Action::requeue(delay)
}

/// Run the ChartRelease controller until a shutdown signal arrives
pub async fn run(client: Client, config: &Config) -> anyhow::Result<()> {
    let ctx = Arc::new(Context::from_client(client.clone(), config)?);
    let releases: Api<ChartRelease> = match &config.watch_namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    };

    info!(
        namespace = config.watch_namespace.as_deref().unwrap_or("<all>"),
        concurrency = config.concurrency,
        "Starting ChartRelease controller"
    );

    Controller::new(
        releases,
        WatcherConfig::default().timeout(config.watch_timeout_seconds),
    )
    .with_config(ControllerConfig::default().concurrency(config.concurrency))
    .shutdown_on_signal()
    .run(reconcile, error_policy, ctx)
    .for_each(|result| {
        match result {
            Ok((object, action)) => debug!(release = %object.name, ?action, "Reconciliation completed"),
            Err(e) => debug!(error = %e, "Controller event error"),
        }
        std::future::ready(())
    })
    .await;

    info!("ChartRelease controller stopped");
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Fixtures shared by the reconciler tests

    use std::sync::Arc;

    use serde_json::json;

    use super::status::MockReleaseApi;
    use super::{Context, Settings};
    use crate::models::ChartRelease;
    use crate::repository::MockChartRepository;
    use crate::target::MockTargetResolver;
    use crate::values::MockValuesSource;

    pub fn release(spec: serde_json::Value) -> ChartRelease {
        let mut base = json!({
            "chart": {"repository": "https://charts.example.com", "name": "podinfo", "version": "1.0.0"},
            "targetNamespace": "apps"
        });
        if let (Some(b), Some(extra)) = (base.as_object_mut(), spec.as_object()) {
            b.extend(extra.clone());
        }
        serde_json::from_value(json!({
            "apiVersion": "chartwarden.io/v1alpha1",
            "kind": "ChartRelease",
            "metadata": {
                "name": "podinfo",
                "namespace": "fleet",
                "uid": "uid-podinfo",
                "generation": 1,
                "creationTimestamp": "2024-01-01T00:00:00Z",
                "finalizers": ["chartwarden.io/uninstall"]
            },
            "spec": base
        }))
        .unwrap()
    }

    pub fn context(
        api: MockReleaseApi,
        targets: MockTargetResolver,
        charts: MockChartRepository,
        values: MockValuesSource,
    ) -> Context {
        Context::new(
            Arc::new(api),
            Arc::new(targets),
            Arc::new(charts),
            Arc::new(values),
            Settings::default(),
        )
    }
}
