//! Drift detection and action selection
//!
//! Pure functions over the descriptor status and the observed release; the
//! reconciler supplies the facts and executes the returned decision.

use crate::models::ChartReleaseStatus;
use crate::runner::{ObservedRelease, ReleaseState};

/// What the current pass wants to converge to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredState {
    /// Desired chart version
    pub revision: String,
    /// Observed package revision number (0 if no release exists)
    pub release_revision: u32,
    pub values_checksum: String,
}

impl DesiredState {
    pub fn new(revision: &str, observed: Option<&ObservedRelease>, values_checksum: &str) -> Self {
        Self {
            revision: revision.to_string(),
            release_revision: observed.map(|r| r.revision).unwrap_or(0),
            values_checksum: values_checksum.to_string(),
        }
    }
}

/// True if any of chart version, observed revision or values checksum
/// differs from the last attempt recorded in `status`
pub fn has_new_state(status: &ChartReleaseStatus, desired: &DesiredState) -> bool {
    status.last_attempted_revision != desired.revision
        || status.last_release_revision != desired.release_revision
        || status.last_attempted_values_checksum != desired.values_checksum
}

/// Record the attempted state
pub fn record_attempt(status: &mut ChartReleaseStatus, desired: &DesiredState) {
    status.last_attempted_revision = desired.revision.clone();
    status.last_release_revision = desired.release_revision;
    status.last_attempted_values_checksum = desired.values_checksum.clone();
}

/// Inputs to the action choice
#[derive(Debug, Clone, Copy)]
pub struct Facts<'a> {
    pub observed: Option<&'a ObservedRelease>,
    pub new_state: bool,
    /// Descriptor was Ready for its current generation before this pass
    pub was_ready: bool,
    pub core_component: bool,
    pub desired_version: &'a str,
    pub failures: u64,
    /// Last failure was remediated by a rollback
    pub remediated: bool,
    pub force_upgrade: bool,
}

/// Next step for one pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Converged, no package action
    Ready,
    /// Rolled back after a failure; wait for new desired state
    Hold,
    /// Drop a stuck pending revision, then requeue
    RepairPending,
    Install,
    Upgrade { force: bool },
}

pub fn decide(facts: &Facts<'_>) -> Decision {
    // core components only act on real drift
    if facts.core_component
        && facts.observed.is_some_and(|r| {
            r.chart_version == facts.desired_version && r.state == ReleaseState::Deployed
        })
    {
        return Decision::Ready;
    }

    if facts.was_ready && !facts.new_state && facts.observed.is_some_and(|r| !r.deleted) {
        return Decision::Ready;
    }

    let Some(observed) = facts.observed else {
        return Decision::Install;
    };

    let upgrade = Decision::Upgrade {
        force: facts.force_upgrade,
    };

    match observed.state {
        state if state.is_pending() => Decision::RepairPending,
        ReleaseState::Uninstalled => Decision::Upgrade { force: true },
        ReleaseState::Deployed if facts.new_state => upgrade,
        ReleaseState::Deployed if facts.remediated => Decision::Hold,
        ReleaseState::Deployed if facts.failures > 0 => upgrade,
        ReleaseState::Deployed => Decision::Ready,
        _ if facts.remediated && !facts.new_state => Decision::Hold,
        _ => upgrade,
    }
}
