//! Resource model
//!
//! - `release.rs` - the ChartRelease custom resource
//! - `conditions.rs` - condition upsert protocol and the `Conditioned` capability

pub mod conditions;
pub mod release;

pub use conditions::{
    Condition, ConditionStatus, Conditioned, find_condition, remove_condition, set_condition,
};
pub use release::{
    ChartRef, ChartRelease, ChartReleaseSpec, ChartReleaseStatus, DependencyReference, ReleaseKey,
    RollbackPolicy, TestPolicy, ValuesReference, ValuesSourceKind,
};
