//! Custom Resource Definitions for Tideway
//!
//! This module defines the Kubernetes CRDs managed by the operator and the
//! status document they share.

mod application;
mod job;
mod routing;
pub mod status;
pub mod types;

#[cfg(test)]
mod tests;

pub use application::{Application, ApplicationSpec, Replicas};
pub use job::{CronSettings, JobContainer, JobSettings, TideJob, TideJobSpec};
pub use routing::{Route, Routing, RoutingSpec};
pub use status::{StatusName, Summary, SyncStatus};
pub use types::*;
