//! Controller module for Tideway reconciliation
//! This module contains the generic reconciliation engine shared by every
//! managed kind and the controllers that drive it.

pub mod conditions;
pub mod context;
pub mod diff;
#[cfg(test)]
mod diff_test;
pub mod discovery;
pub mod engine;
pub mod finalizers;
pub mod kinds;
pub mod leader;
pub mod managed;
pub mod merge;
#[cfg(feature = "metrics")]
pub mod metrics;
mod reconciler;
pub mod registry;
pub mod status;
pub mod store;
pub mod sync;
pub mod validity;

pub use context::{DesiredResource, ReconciliationContext, ResourceKey};
pub use diff::{compute_diff, ResourceDiff};
pub use discovery::{discover, LiveResource};
pub use engine::{PassResult, ReconcileEngine};
pub use finalizers::TIDEWAY_FINALIZER;
pub use kinds::{ResourceKind, SyncStrategy};
pub use leader::LeaderElection;
pub use managed::{Managed, ManagedKind, ManagedObject};
pub use reconciler::{
    needs_status_write, retry_delay, run_controllers, skips_namespace, status_patch,
    ControllerState,
};
pub use registry::{GenerateFn, Generator, GeneratorRegistry};
pub use status::{PassOutcome, Phase};
pub use store::{DryRunStore, KubeStore, MemoryStore, ObjectStore, StoreError};
pub use sync::{SyncEngine, SyncReport};
