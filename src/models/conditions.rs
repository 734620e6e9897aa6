//! Condition and status protocol
//!
//! Conditions are kept as a list on the wire but treated as a map keyed by
//! type. `set_condition` is the single writer used by every reconciler: it
//! preserves `lastTransitionTime` unless the status actually changes.

use chrono::{DateTime, Utc};
use kube::ResourceExt;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition types written by the release reconciler
pub mod types {
    /// Overall convergence
    pub const READY: &str = "Ready";
    /// Last install/upgrade outcome
    pub const RELEASED: &str = "Released";
    /// Last release test outcome
    pub const TEST_SUCCESS: &str = "TestSuccess";
    /// Last rollback outcome
    pub const REMEDIATED: &str = "Remediated";
    /// Generated objects applied
    pub const OBJECTS_APPLIED: &str = "ObjectsApplied";
}

/// Condition status following Kubernetes conventions
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition is true
    True,
    /// Condition is false
    False,
    /// Condition status is unknown
    #[default]
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Kubernetes-style condition for status reporting
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition (e.g., Ready, Released)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Machine-readable reason for the condition
    pub reason: String,

    /// Human-readable message
    #[serde(default)]
    pub message: String,

    /// Generation of the object this condition was computed against
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Last time the condition transitioned
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Create a new condition with the current timestamp
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            observed_generation: None,
            last_transition_time: Utc::now(),
        }
    }

    /// Stamp the generation this condition reflects
    pub fn with_generation(mut self, generation: Option<i64>) -> Self {
        self.observed_generation = generation;
        self
    }

    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }
}

/// Upsert a condition by type.
///
/// Same type and status: only reason, message and observed generation are
/// refreshed. Different status or new type: the condition is replaced and
/// its transition time is taken from `condition`.
///
/// Returns `true` if the status changed (or the type was absent).
pub fn set_condition(conditions: &mut Vec<Condition>, condition: Condition) -> bool {
    match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        Some(existing) if existing.status == condition.status => {
            existing.reason = condition.reason;
            existing.message = condition.message;
            existing.observed_generation = condition.observed_generation;
            false
        }
        Some(existing) => {
            *existing = condition;
            true
        }
        None => {
            conditions.push(condition);
            true
        }
    }
}

/// Find a condition by type
pub fn find_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// Remove a condition by type, returning whether one was present
pub fn remove_condition(conditions: &mut Vec<Condition>, type_: &str) -> bool {
    let before = conditions.len();
    conditions.retain(|c| c.type_ != type_);
    conditions.len() != before
}

/// Narrow capability shared by every descriptor-like resource.
///
/// Readiness checks and the dependency gate only depend on this trait.
pub trait Conditioned: ResourceExt {
    /// Current `metadata.generation`
    fn generation(&self) -> Option<i64> {
        self.meta().generation
    }

    /// Generation last observed by the owning controller
    fn observed_generation(&self) -> Option<i64>;

    /// Current condition set
    fn conditions(&self) -> &[Condition];

    /// Ready iff conditions are present, the controller has observed the
    /// current generation and the Ready condition is True.
    fn is_ready(&self) -> bool {
        let conditions = self.conditions();
        !conditions.is_empty()
            && self.observed_generation() == Conditioned::generation(self)
            && find_condition(conditions, types::READY).is_some_and(Condition::is_true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(ts: i64, status: ConditionStatus, reason: &str) -> Condition {
        Condition {
            last_transition_time: Utc.timestamp_opt(ts, 0).unwrap(),
            ..Condition::new(types::READY, status, reason, "")
        }
    }

    #[test]
    fn test_same_status_keeps_transition_time() {
        let mut conditions = vec![at(100, ConditionStatus::True, "InstallSucceeded")];
        let changed = set_condition(
            &mut conditions,
            at(200, ConditionStatus::True, "UpgradeSucceeded"),
        );
        assert!(!changed);
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].reason, "UpgradeSucceeded");
        assert_eq!(conditions[0].last_transition_time.timestamp(), 100);
    }

    #[test]
    fn test_status_change_updates_transition_time() {
        let mut conditions = vec![at(100, ConditionStatus::True, "InstallSucceeded")];
        let changed = set_condition(
            &mut conditions,
            at(200, ConditionStatus::False, "UpgradeFailed"),
        );
        assert!(changed);
        assert_eq!(conditions[0].status, ConditionStatus::False);
        assert_eq!(conditions[0].last_transition_time.timestamp(), 200);
    }

    #[test]
    fn test_new_type_is_appended() {
        let mut conditions = vec![at(100, ConditionStatus::True, "InstallSucceeded")];
        let changed = set_condition(
            &mut conditions,
            Condition::new(types::TEST_SUCCESS, ConditionStatus::True, "TestSucceeded", ""),
        );
        assert!(changed);
        assert_eq!(conditions.len(), 2);
        assert!(find_condition(&conditions, types::TEST_SUCCESS).is_some());
        assert!(remove_condition(&mut conditions, types::TEST_SUCCESS));
        assert!(!remove_condition(&mut conditions, types::TEST_SUCCESS));
    }
}
