//! Prometheus metrics for the Tideway operator
//!
//! # Exported metrics
//! The `/metrics` endpoint (when built with `--features metrics`) exports the following metrics:
//! - `tideway_reconcile_duration_seconds` (histogram): reconcile duration labeled by controller.
//! - `tideway_reconcile_errors_total` (counter): reconcile errors labeled by controller and kind.
//! - `tideway_sync_operations_total` (counter): child writes labeled by resource kind and operation.
//! - `tideway_sync_failures_total` (counter): failed child writes labeled by resource kind and operation.
//! - `tideway_owned_resources` (gauge): live children per owner labeled by state
//!   (`managed`, `ignored`, `foreign`).

use std::sync::atomic::{AtomicI64, AtomicU64};

use once_cell::sync::Lazy;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;

/// Labels for operator reconcile metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ReconcileLabels {
    /// Controller name, e.g. "application"
    pub controller: String,
}

/// Labels for operator error metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ErrorLabels {
    /// Controller name, e.g. "application"
    pub controller: String,
    /// Error kind/category, e.g. "kube", "generation", "sync"
    pub kind: String,
}

/// Labels for child write metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct SyncLabels {
    /// Child kind, e.g. "Deployment"
    pub resource: String,
    /// "create", "update", "patch" or "delete"
    pub operation: String,
}

/// Labels for the owned resources gauge
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct OwnerLabels {
    pub owner_kind: String,
    pub namespace: String,
    pub name: String,
    pub state: String,
}

/// Histogram tracking reconcile duration (seconds)
pub static RECONCILE_DURATION_SECONDS: Lazy<Family<ReconcileLabels, Histogram>> = Lazy::new(|| {
    fn reconcile_histogram() -> Histogram {
        // 1ms .. ~32s across 16 buckets.
        Histogram::new(exponential_buckets(0.001, 2.0, 16))
    }

    Family::new_with_constructor(reconcile_histogram)
});

/// Counter tracking reconcile errors
pub static RECONCILE_ERRORS_TOTAL: Lazy<Family<ErrorLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

/// Counter tracking child writes
pub static SYNC_OPERATIONS_TOTAL: Lazy<Family<SyncLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

/// Counter tracking failed child writes
pub static SYNC_FAILURES_TOTAL: Lazy<Family<SyncLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

/// Gauge tracking live children per owner
pub static OWNED_RESOURCES: Lazy<Family<OwnerLabels, Gauge<i64, AtomicI64>>> =
    Lazy::new(Family::default);

pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let mut registry = Registry::default();

    registry.register(
        "tideway_reconcile_duration_seconds",
        "Duration of reconcile loops in seconds",
        RECONCILE_DURATION_SECONDS.clone(),
    );

    registry.register(
        "tideway_reconcile_errors_total",
        "Total number of reconcile errors",
        RECONCILE_ERRORS_TOTAL.clone(),
    );

    registry.register(
        "tideway_sync_operations_total",
        "Total number of child resource writes",
        SYNC_OPERATIONS_TOTAL.clone(),
    );
    registry.register(
        "tideway_sync_failures_total",
        "Total number of failed child resource writes",
        SYNC_FAILURES_TOTAL.clone(),
    );

    registry.register(
        "tideway_owned_resources",
        "Live child resources per owner by state",
        OWNED_RESOURCES.clone(),
    );

    registry
});

/// Observe a reconcile duration in seconds.
pub fn observe_reconcile_duration_seconds(controller: &str, seconds: f64) {
    let labels = ReconcileLabels {
        controller: controller.to_string(),
    };
    RECONCILE_DURATION_SECONDS
        .get_or_create(&labels)
        .observe(seconds);
}

/// Increment the reconcile error counter.
pub fn inc_reconcile_error(controller: &str, kind: &str) {
    let labels = ErrorLabels {
        controller: controller.to_string(),
        kind: kind.to_string(),
    };
    RECONCILE_ERRORS_TOTAL.get_or_create(&labels).inc();
}

pub fn inc_sync_operation(resource: &str, operation: &str) {
    let labels = SyncLabels {
        resource: resource.to_string(),
        operation: operation.to_string(),
    };
    SYNC_OPERATIONS_TOTAL.get_or_create(&labels).inc();
}

pub fn inc_sync_failure(resource: &str, operation: &str) {
    let labels = SyncLabels {
        resource: resource.to_string(),
        operation: operation.to_string(),
    };
    SYNC_FAILURES_TOTAL.get_or_create(&labels).inc();
}

/// Record how many live children an owner has in each state
pub fn set_owned_resources(owner_kind: &str, namespace: &str, name: &str, state: &str, count: i64) {
    let labels = OwnerLabels {
        owner_kind: owner_kind.to_string(),
        namespace: namespace.to_string(),
        name: name.to_string(),
        state: state.to_string(),
    };
    OWNED_RESOURCES.get_or_create(&labels).set(count);
}
