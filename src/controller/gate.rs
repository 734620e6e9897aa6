//! Pre-action checks: dependency readiness and release-name ownership

use std::cmp::Ordering;

use kube::{Resource, ResourceExt};
use tracing::debug;

use super::status::ReleaseApi;
use crate::error::Result;
use crate::models::{ChartRelease, Conditioned};

/// Outcome of the dependency gate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Gate {
    Open,
    /// At least one dependency is not Ready
    Blocked { message: String },
}

/// Check that every `dependsOn` entry exists and is Ready
pub async fn check_dependencies(api: &dyn ReleaseApi, release: &ChartRelease) -> Result<Gate> {
    let own_namespace = release.namespace().unwrap_or_default();
    let mut pending = Vec::new();

    for dep in &release.spec.depends_on {
        let namespace = dep.namespace.as_deref().unwrap_or(&own_namespace);
        let ready = match api.get(namespace, &dep.name).await? {
            Some(found) => is_ready(&found),
            None => false,
        };
        if !ready {
            pending.push(format!("{}/{}", namespace, dep.name));
        }
    }

    if pending.is_empty() {
        return Ok(Gate::Open);
    }
    debug!(
        release = %release.name_any(),
        namespace = %own_namespace,
        pending = ?pending,
        "Dependencies not ready"
    );
    Ok(Gate::Blocked {
        message: format!("dependencies not ready: {}", pending.join(", ")),
    })
}

/// Readiness as seen by dependents
pub fn is_ready<T: Conditioned>(resource: &T) -> bool {
    resource.is_ready()
}

/// Older descriptor that already claims this release's
/// (cluster, namespace, release name) identity, if any.
///
/// Age is the creation timestamp; ties are broken by `namespace/name`.
pub fn conflicting_owner<'a>(
    release: &ChartRelease,
    all: &'a [ChartRelease],
) -> Option<&'a ChartRelease> {
    let key = release.release_key();
    all.iter()
        .filter(|other| !same_object(release, other))
        .filter(|other| other.release_key() == key)
        .filter(|other| age_order(other, release) == Ordering::Less)
        .min_by(|a, b| age_order(a, b))
}

fn same_object(a: &ChartRelease, b: &ChartRelease) -> bool {
    match (a.meta().uid.as_ref(), b.meta().uid.as_ref()) {
        (Some(x), Some(y)) => x == y,
        _ => a.namespace() == b.namespace() && a.name_any() == b.name_any(),
    }
}

fn age_order(a: &ChartRelease, b: &ChartRelease) -> Ordering {
    let created = |r: &ChartRelease| {
        let ts = r.meta().creation_timestamp.clone();
        // objects without a timestamp sort as the newest
        (ts.is_none(), ts)
    };
    created(a)
        .cmp(&created(b))
        .then_with(|| a.namespace().cmp(&b.namespace()))
        .then_with(|| a.name_any().cmp(&b.name_any()))
}
