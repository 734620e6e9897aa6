//! chartwarden
//!
//! Declarative chart release reconciliation for a fleet of Kubernetes
//! clusters. A `ChartRelease` descriptor names a chart, its values and a
//! target cluster; the controller converges the installed release to it.

pub mod cli;
pub mod config;
pub mod constants;
pub mod controller;
pub mod error;
pub mod kube;
pub mod models;
pub mod repository;
pub mod runner;
pub mod target;
pub mod values;

pub use error::{Error, Result};
pub use models::{ChartRelease, ChartReleaseSpec, ChartReleaseStatus};
