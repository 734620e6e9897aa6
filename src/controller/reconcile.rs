//! Convergence pass for one ChartRelease
//!
//! Pipeline: target → chart → values → dependency gate → ownership check →
//! observe → drift → action → finalize status. Each step either continues
//! or ends the pass with a `Requeue` directive (or an error, which the
//! controller retries with backoff).

use std::time::Duration;

use kube::{Resource, ResourceExt};
use tracing::{debug, info, warn};
use url::Url;

use super::Context;
use super::drift::{self, Decision, DesiredState, Facts};
use super::gate::{self, Gate};
use super::requeue::Requeue;
use crate::error::{ChartFailure, Error, Result};
use crate::models::conditions::types;
use crate::models::{
    ChartRelease, ChartReleaseStatus, Condition, ConditionStatus, Conditioned, find_condition,
    remove_condition, set_condition,
};
use crate::repository::{ChartEntry, auto_upgrade_target, parse_repository_url};
use crate::runner::{ActionRequest, ObservedRelease, ReleaseAction, ReleaseRunner, RollbackRequest};
use crate::target::TargetResolution;
use crate::values::{self, ComposedValues};

/// Run one convergence pass
pub async fn reconcile_release(release: &ChartRelease, ctx: &Context) -> Result<Requeue> {
    if release.spec.paused {
        info!(
            release = %release.name_any(),
            namespace = %release.namespace().unwrap_or_default(),
            "Reconciliation paused"
        );
        return Ok(Requeue::Steady);
    }
    Pass::new(release, ctx).run().await
}

/// Outcome of chart resolution
enum ChartStep {
    /// Spec was patched with a newer version; this pass stops
    Adopted(String),
    Resolved { repository: Url, entry: ChartEntry },
}

struct Pass<'a> {
    release: &'a ChartRelease,
    ctx: &'a Context,
    status: ChartReleaseStatus,
    name: String,
    namespace: String,
    release_name: String,
}

impl<'a> Pass<'a> {
    fn new(release: &'a ChartRelease, ctx: &'a Context) -> Self {
        Self {
            release,
            ctx,
            status: release.status.clone().unwrap_or_default(),
            name: release.name_any(),
            namespace: release.namespace().unwrap_or_default(),
            release_name: release.release_name(),
        }
    }

    async fn run(mut self) -> Result<Requeue> {
        let target = match self.ctx.targets.resolve(self.release).await {
            Ok(TargetResolution::Ready(target)) => target,
            Ok(TargetResolution::Waiting { reason, message }) => {
                return self.wait(reason, message).await;
            }
            Err(e) => return self.fail(e).await,
        };
        let runner = target.runner;

        let (repository, entry) = match self.resolve_chart().await {
            Ok(ChartStep::Adopted(version)) => {
                info!(
                    release = %self.name,
                    namespace = %self.namespace,
                    version = %version,
                    "Adopted chart version"
                );
                return Ok(Requeue::Now);
            }
            Ok(ChartStep::Resolved { repository, entry }) => (repository, entry),
            Err(e) => return self.fail(e).await,
        };

        let values = match values::compose(
            self.ctx.values.as_ref(),
            &self.namespace,
            &self.release.spec,
        )
        .await
        {
            Ok(values) => values,
            Err(e) => return self.fail(e).await,
        };

        match gate::check_dependencies(self.ctx.api.as_ref(), self.release).await? {
            Gate::Open => {}
            Gate::Blocked { message } => return self.wait("DependencyNotReady", message).await,
        }

        let all = self.ctx.api.list().await?;
        if let Some(owner) = gate::conflicting_owner(self.release, &all) {
            let message = format!(
                "release {} is already managed by ChartRelease {}/{}",
                self.release.release_key(),
                owner.namespace().unwrap_or_default(),
                owner.name_any()
            );
            warn!(release = %self.name, namespace = %self.namespace, "{}", message);
            self.not_ready("ReleaseNameConflict", message);
            self.commit().await?;
            return Ok(Requeue::Steady);
        }

        let observed = match runner.observe_last_release(&self.release_name).await {
            Ok(observed) => observed,
            Err(e) => return self.fail(e).await,
        };

        let desired = DesiredState::new(&entry.version, observed.as_ref(), &values.checksum);
        let new_state = drift::has_new_state(&self.status, &desired);
        let remediated = find_condition(&self.status.conditions, types::REMEDIATED)
            .is_some_and(Condition::is_true);
        drift::record_attempt(&mut self.status, &desired);

        if new_state {
            debug!(
                release = %self.name,
                namespace = %self.namespace,
                revision = %desired.revision,
                release_revision = desired.release_revision,
                checksum = %desired.values_checksum,
                "New desired state"
            );
            self.status.conditions.clear();
            self.set(
                types::READY,
                ConditionStatus::Unknown,
                "Progressing",
                "reconciliation in progress",
            );
            self.status.reset_failures();
        }

        let decision = drift::decide(&Facts {
            observed: observed.as_ref(),
            new_state,
            was_ready: self.release.is_ready(),
            core_component: self.release.is_core_component(),
            desired_version: &entry.version,
            failures: self.status.failures,
            remediated: remediated && !new_state,
            force_upgrade: self.release.spec.force_upgrade,
        });
        debug!(release = %self.name, namespace = %self.namespace, ?decision, "Decided next step");

        match decision {
            Decision::Ready => {
                self.mark_ready(observed.as_ref());
                self.commit().await?;
                Ok(Requeue::Steady)
            }
            Decision::Hold => {
                self.commit().await?;
                Ok(Requeue::Steady)
            }
            Decision::RepairPending => {
                if let Err(e) = runner.repair_pending(&self.release_name).await {
                    return self.fail(e).await;
                }
                self.set(
                    types::READY,
                    ConditionStatus::Unknown,
                    "PendingReleaseRepaired",
                    "removed a stuck pending release revision",
                );
                self.commit().await?;
                Ok(Requeue::Now)
            }
            Decision::Install => {
                self.apply(&runner, ReleaseAction::Install, false, &repository, &entry, values, &desired)
                    .await
            }
            Decision::Upgrade { force } => {
                self.apply(&runner, ReleaseAction::Upgrade, force, &repository, &entry, values, &desired)
                    .await
            }
        }
    }

    /// Resolve the chart entry, adopting a version into the spec when the
    /// version is empty or auto-upgrade finds a newer minor/patch release.
    async fn resolve_chart(&self) -> Result<ChartStep> {
        let chart = &self.release.spec.chart;
        let repository = parse_repository_url(&chart.repository)?;
        let index = self.ctx.charts.download_index(&repository).await?;

        let latest = index.latest(&chart.name).ok_or_else(|| {
            Error::chart(
                ChartFailure::ChartPullFailed,
                format!("chart {} not found in {}", chart.name, repository),
            )
        })?;

        if chart.version.is_empty() {
            self.ctx
                .api
                .set_chart_version(self.release, &latest.version)
                .await?;
            return Ok(ChartStep::Adopted(latest.version.clone()));
        }

        if self.release.spec.auto_upgrade {
            if let Some(newer) = auto_upgrade_target(&chart.version, &latest.version) {
                self.ctx.api.set_chart_version(self.release, &newer).await?;
                return Ok(ChartStep::Adopted(newer));
            }
        }

        let entry = index.get(&chart.name, &chart.version).ok_or_else(|| {
            Error::chart(
                ChartFailure::ChartPullFailed,
                format!("chart {} version {} not found in {}", chart.name, chart.version, repository),
            )
        })?;
        Ok(ChartStep::Resolved {
            repository,
            entry: entry.clone(),
        })
    }

    /// Install or upgrade, then test, remediate and finalize status
    #[allow(clippy::too_many_arguments)]
    async fn apply(
        &mut self,
        runner: &ReleaseRunner,
        action: ReleaseAction,
        force: bool,
        repository: &Url,
        entry: &ChartEntry,
        values: ComposedValues,
        desired: &DesiredState,
    ) -> Result<Requeue> {
        let release = self.release;
        let spec = &release.spec;
        let before = desired.release_revision;

        let chart = match self.ctx.charts.download_package(repository, entry).await {
            Ok(chart) => chart,
            Err(e) => return self.fail(e).await,
        };
        let request = ActionRequest {
            release_name: self.release_name.clone(),
            chart,
            values: values.values,
            wait: spec.wait,
            timeout: release.timeout(),
            skip_crds: spec.skip_crds,
            max_history: spec.max_history,
            reset_values: spec.reset_values,
            force,
        };

        let result = match action {
            ReleaseAction::Install => runner.install(&request).await,
            _ => runner.upgrade(&request).await,
        };
        let mut outcome = match result {
            Err(e) if e.is_no_deployed_releases() => return self.clean_orphan(runner, e).await,
            other => other,
        };

        let after = match runner.observe_last_release(&self.release_name).await {
            Ok(last) => revision_of(last.as_ref()),
            Err(e) if outcome.is_ok() => return self.fail(e).await,
            // keep the action's failure; without a known new revision there is
            // nothing to roll back
            Err(e) => {
                warn!(release = %self.name, namespace = %self.namespace, error = %e, "Could not observe release after failed action");
                before
            }
        };
        let revised = after > before;

        if outcome.is_ok() && revised && spec.test.enable {
            match runner
                .test(&self.release_name, Duration::from_secs(spec.test.timeout))
                .await
            {
                Ok(()) => self.set(
                    types::TEST_SUCCESS,
                    ConditionStatus::True,
                    ReleaseAction::Test.success_reason(),
                    format!("tests passed for revision {after}"),
                ),
                Err(e) => {
                    self.set(
                        types::TEST_SUCCESS,
                        ConditionStatus::False,
                        ReleaseAction::Test.failure_reason(),
                        e.to_string(),
                    );
                    if spec.test.ignore_failures {
                        warn!(release = %self.name, namespace = %self.namespace, error = %e, "Ignoring test failure");
                    } else {
                        outcome = Err(e);
                    }
                }
            }
        }

        let mut rollback: Option<Result<()>> = None;
        match &outcome {
            Ok(()) => self.set(
                types::RELEASED,
                ConditionStatus::True,
                action.success_reason(),
                format!("{} succeeded for chart {} {}", action, entry.name, entry.version),
            ),
            Err(e) => {
                self.status.failures += 1;
                match action {
                    ReleaseAction::Install => self.status.install_failures += 1,
                    _ => self.status.upgrade_failures += 1,
                }
                self.set(
                    types::RELEASED,
                    ConditionStatus::False,
                    action.failure_reason(),
                    e.to_string(),
                );

                if !revised {
                    info!(
                        release = %self.name,
                        namespace = %self.namespace,
                        action = %action,
                        "Action failed without creating a revision, nothing to remediate"
                    );
                } else if action == ReleaseAction::Upgrade {
                    let result = runner
                        .rollback(&RollbackRequest {
                            release_name: self.release_name.clone(),
                            force: spec.rollback.force,
                            recreate: spec.rollback.recreate,
                            disable_hooks: spec.rollback.disable_hooks,
                            wait: spec.rollback.wait,
                            timeout: Duration::from_secs(spec.rollback.timeout),
                            max_history: spec.max_history,
                        })
                        .await;
                    match &result {
                        Ok(()) => self.set(
                            types::REMEDIATED,
                            ConditionStatus::True,
                            ReleaseAction::Rollback.success_reason(),
                            format!("rolled back after failed upgrade to revision {after}"),
                        ),
                        Err(re) => self.set(
                            types::REMEDIATED,
                            ConditionStatus::False,
                            ReleaseAction::Rollback.failure_reason(),
                            re.to_string(),
                        ),
                    }
                    rollback = Some(result);
                }
            }
        }

        // finalize against the state the cluster ended up in
        self.status.last_release_revision =
            match runner.observe_last_release(&self.release_name).await {
                Ok(last) => revision_of(last.as_ref()),
                Err(e) => {
                    warn!(release = %self.name, namespace = %self.namespace, error = %e, "Could not re-observe release, keeping revision {after}");
                    after
                }
            };

        match (outcome, rollback) {
            (Ok(()), _) => {
                self.status.last_applied_revision = self.status.last_attempted_revision.clone();
                self.status.reset_failures();
                remove_condition(&mut self.status.conditions, types::REMEDIATED);
                self.set(
                    types::READY,
                    ConditionStatus::True,
                    action.success_reason(),
                    format!("release {} at revision {}", self.release_name, self.status.last_release_revision),
                );
                self.commit().await?;
                info!(
                    release = %self.name,
                    namespace = %self.namespace,
                    action = %action,
                    revision = self.status.last_release_revision,
                    "Release converged"
                );
                Ok(Requeue::Steady)
            }
            (Err(e), Some(Ok(()))) => {
                self.not_ready(
                    ReleaseAction::Rollback.success_reason(),
                    format!("{e}; rolled back to revision {}", self.status.last_release_revision),
                );
                self.commit().await?;
                Err(e)
            }
            (Err(e), Some(Err(re))) => {
                self.not_ready(ReleaseAction::Rollback.failure_reason(), format!("{e}; {re}"));
                self.commit().await?;
                Err(e)
            }
            (Err(e), None) => {
                self.not_ready(action.failure_reason(), e.to_string());
                self.commit().await?;
                Err(e)
            }
        }
    }

    /// The engine has history but no deployed revision: drop the history,
    /// blank the attempted state and surface the error for a retry
    async fn clean_orphan(&mut self, runner: &ReleaseRunner, err: Error) -> Result<Requeue> {
        warn!(
            release = %self.name,
            namespace = %self.namespace,
            release_name = %self.release_name,
            "Release has no deployed revisions, purging history"
        );
        runner.purge_history(&self.release_name).await?;
        self.status.reset_attempted();
        self.not_ready(err.reason(), err.to_string());
        self.commit().await?;
        Err(err)
    }

    fn mark_ready(&mut self, observed: Option<&ObservedRelease>) {
        self.status.last_applied_revision = self.status.last_attempted_revision.clone();
        self.status.reset_failures();
        let already = find_condition(&self.status.conditions, types::READY)
            .is_some_and(Condition::is_true);
        if !already {
            self.set(
                types::READY,
                ConditionStatus::True,
                "ReleaseReady",
                format!(
                    "release {} deployed at revision {}",
                    self.release_name,
                    revision_of(observed)
                ),
            );
        }
    }

    fn set(
        &mut self,
        type_: &str,
        status: ConditionStatus,
        reason: &str,
        message: impl Into<String>,
    ) {
        let condition = Condition::new(type_, status, reason, message)
            .with_generation(self.release.meta().generation);
        set_condition(&mut self.status.conditions, condition);
    }

    fn not_ready(&mut self, reason: &str, message: impl Into<String>) {
        self.set(types::READY, ConditionStatus::False, reason, message);
    }

    /// Write status if it differs from what the object carries
    async fn commit(&mut self) -> Result<()> {
        self.status.observed_generation = self.release.meta().generation;
        let unchanged = self
            .release
            .status
            .as_ref()
            .is_some_and(|current| *current == self.status);
        if unchanged {
            return Ok(());
        }
        self.ctx.api.update_status(self.release, &self.status).await
    }

    /// Soft wait on an external precondition; does not touch failure counters
    async fn wait(&mut self, reason: &str, message: String) -> Result<Requeue> {
        debug!(release = %self.name, namespace = %self.namespace, reason, "{}", message);
        self.not_ready(reason, message);
        self.commit().await?;
        Ok(Requeue::After(self.ctx.settings.precondition_requeue))
    }

    async fn fail(&mut self, err: Error) -> Result<Requeue> {
        self.not_ready(err.reason(), err.to_string());
        self.commit().await?;
        Err(err)
    }
}

fn revision_of(observed: Option<&ObservedRelease>) -> u32 {
    observed.map(|r| r.revision).unwrap_or(0)
}
