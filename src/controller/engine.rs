//! One reconciliation pass: generate, discover, diff, sync
//!
//! The engine is identical for every managed kind. It never writes status;
//! it returns a `PassOutcome` the reconciler reduces and persists.

use std::collections::HashSet;
use std::sync::Arc;

use kube::api::DynamicObject;
use tracing::{debug, info, instrument, warn};

use crate::config::ControllerConfig;
use crate::error::{Error, Result};

use super::context::{DesiredResource, ReconciliationContext};
use super::diff::compute_diff;
use super::discovery::{discover, LiveResource};
use super::kinds::ResourceKind;
use super::managed::{ManagedKind, ManagedObject};
use super::registry::GeneratorRegistry;
use super::status::{JobProgress, PassOutcome, Phase};
use super::store::ObjectStore;
use super::sync::{SyncEngine, SyncReport};

/// Outcome of a pass plus the typed error to hand to the error policy
#[derive(Debug)]
pub struct PassResult {
    pub outcome: PassOutcome,
    pub error: Option<Error>,
}

impl PassResult {
    fn failed(phase: Phase, error: Error) -> Self {
        Self {
            outcome: PassOutcome::Failed {
                phase,
                error: error.to_string(),
            },
            error: Some(error),
        }
    }
}

#[derive(Clone)]
pub struct ReconcileEngine {
    registry: Arc<GeneratorRegistry>,
    store: Arc<dyn ObjectStore>,
    config: Arc<ControllerConfig>,
}

impl ReconcileEngine {
    pub fn new(
        registry: Arc<GeneratorRegistry>,
        store: Arc<dyn ObjectStore>,
        config: Arc<ControllerConfig>,
    ) -> Self {
        Self {
            registry,
            store,
            config,
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn store(&self) -> &dyn ObjectStore {
        self.store.as_ref()
    }

    /// Run the owner's generator pipeline
    pub fn generate(&self, owner: &ManagedObject) -> Result<Vec<DesiredResource>> {
        let mut ctx = ReconciliationContext::new(owner, &self.config);
        self.registry.run(&mut ctx)?;
        Ok(ctx.into_resources())
    }

    #[instrument(skip(self, owner), fields(owner = %owner.identity(), kind = %owner.kind()))]
    pub async fn run_pass(&self, owner: &ManagedObject) -> PassResult {
        let desired = match self.generate(owner) {
            Ok(desired) => desired,
            Err(e) => {
                warn!(error = %e, "Generation failed");
                return PassResult::failed(Phase::Generate, e);
            }
        };
        debug!(count = desired.len(), "Generated desired children");

        let live = match discover(self.store(), owner, &self.config).await {
            Ok(live) => live,
            Err(e) => {
                warn!(error = %e, "Discovery failed");
                return PassResult::failed(Phase::Discover, e);
            }
        };
        record_owned(owner, &live);

        let job_progress = (owner.kind() == ManagedKind::Job)
            .then(|| JobProgress::from_live(batch_objects(&live)));

        let diff = compute_diff(desired, live);
        let report = SyncEngine::new(self.store(), owner.uid()).apply(diff).await;
        record_sync(&report);

        let error = (!report.is_success()).then(|| Error::SyncError {
            count: report.errors.len(),
            first: report.errors[0].to_string(),
        });
        if report.writes() > 0 || error.is_some() {
            info!(
                created = report.created.len(),
                updated = report.updated.len(),
                patched = report.patched.len(),
                deleted = report.deleted.len(),
                failed = report.errors.len(),
                "Sync finished"
            );
        }

        PassResult {
            outcome: PassOutcome::Completed {
                report,
                job_progress,
            },
            error,
        }
    }

    /// Delete children that owner references cannot garbage collect
    ///
    /// Only fixed-namespace kinds qualify; everything else is removed by the
    /// cluster once the owner is gone.
    #[instrument(skip(self, owner), fields(owner = %owner.identity()))]
    pub async fn finalize(&self, owner: &ManagedObject) -> Result<usize> {
        let selector = owner.label_selector();
        let namespace = &self.config.gateway_namespace;
        let mut removed = 0;

        for kind in ResourceKind::ALL
            .into_iter()
            .filter(|k| k.is_fixed_namespace())
        {
            let objects = match self.store.list(kind, namespace, &selector).await {
                Ok(objects) => objects,
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e.into()),
            };
            for object in objects {
                let live = LiveResource::new(kind, object, owner.uid());
                if !live.is_managed() {
                    continue;
                }
                let key = live.key();
                match self.store.delete(kind, &key.namespace, &key.name).await {
                    Ok(()) => {
                        info!(resource = %key, "Removed child during finalization");
                        removed += 1;
                    }
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Ok(removed)
    }
}

/// Jobs and CronJobs whose progress belongs to the owner
///
/// Scheduled runs are owned by our CronJob rather than the owner itself, so
/// they count even though they are foreign-owned.
fn batch_objects(live: &[LiveResource]) -> impl Iterator<Item = &DynamicObject> {
    let cron_uids: HashSet<&str> = live
        .iter()
        .filter(|l| l.kind == ResourceKind::CronJob && l.is_managed())
        .filter_map(|l| l.object.metadata.uid.as_deref())
        .collect();

    live.iter()
        .filter(move |l| match l.kind {
            ResourceKind::CronJob => l.is_managed(),
            ResourceKind::Job if l.ignored => false,
            ResourceKind::Job => {
                !l.foreign_owned
                    || l.object
                        .metadata
                        .owner_references
                        .iter()
                        .flatten()
                        .any(|r| cron_uids.contains(r.uid.as_str()))
            }
            _ => false,
        })
        .map(|l| &l.object)
}

#[cfg(feature = "metrics")]
fn record_owned(owner: &ManagedObject, live: &[LiveResource]) {
    let ignored = live.iter().filter(|l| l.ignored).count() as i64;
    let foreign = live.iter().filter(|l| !l.ignored && l.foreign_owned).count() as i64;
    let managed = live.len() as i64 - ignored - foreign;
    let kind = owner.kind().label_value();
    let namespace = owner.scope_namespace();
    let name = owner.name();
    for (state, count) in [("managed", managed), ("ignored", ignored), ("foreign", foreign)] {
        super::metrics::set_owned_resources(&kind, &namespace, &name, state, count);
    }
}

#[cfg(not(feature = "metrics"))]
fn record_owned(_owner: &ManagedObject, _live: &[LiveResource]) {}

#[cfg(feature = "metrics")]
fn record_sync(report: &SyncReport) {
    use super::metrics::{inc_sync_failure, inc_sync_operation};

    let writes = [
        (&report.created, "create"),
        (&report.updated, "update"),
        (&report.patched, "patch"),
        (&report.deleted, "delete"),
    ];
    for (keys, operation) in writes {
        for key in keys {
            inc_sync_operation(key.kind.as_str(), operation);
        }
    }
    for error in &report.errors {
        inc_sync_failure(error.key.kind.as_str(), error.operation.as_str());
    }
}

#[cfg(not(feature = "metrics"))]
fn record_sync(_report: &SyncReport) {}
