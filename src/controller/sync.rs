//! Applies a resource diff to the object store
//!
//! Deletions run first, then creations, then updates and patches. Within a
//! phase children are applied by kind priority and then by identity. A failed
//! child is recorded and the batch carries on.

use std::collections::BTreeMap;
use std::fmt;

use kube::api::DynamicObject;
use tracing::{debug, info, warn};

use super::context::{DesiredResource, ResourceKey};
use super::diff::ResourceDiff;
use super::discovery::LiveResource;
use super::kinds::{ResourceKind, SyncStrategy};
use super::merge::{build_patch, content, is_derivative, union_owner_references};
use super::store::{ObjectStore, StoreError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SyncOperation {
    Create,
    Update,
    Patch,
    Delete,
}

impl SyncOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncOperation::Create => "create",
            SyncOperation::Update => "update",
            SyncOperation::Patch => "patch",
            SyncOperation::Delete => "delete",
        }
    }
}

impl fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a single child operation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncError {
    pub key: ResourceKey,
    pub operation: SyncOperation,
    pub message: String,
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.operation, self.key, self.message)
    }
}

#[derive(Clone, Debug, Default)]
pub struct SyncReport {
    pub created: Vec<ResourceKey>,
    pub updated: Vec<ResourceKey>,
    pub patched: Vec<ResourceKey>,
    pub unchanged: Vec<ResourceKey>,
    pub deleted: Vec<ResourceKey>,
    /// Desired children left alone because the live object is ignored
    pub skipped: Vec<ResourceKey>,
    pub errors: Vec<SyncError>,
}

impl SyncReport {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    /// Number of writes sent to the store
    pub fn writes(&self) -> usize {
        self.created.len() + self.updated.len() + self.patched.len() + self.deleted.len()
    }

    /// Per kind outcome of this pass: `None` on success, else the first error
    pub fn kind_outcomes(&self) -> BTreeMap<ResourceKind, Option<String>> {
        let mut outcomes: BTreeMap<ResourceKind, Option<String>> = BTreeMap::new();
        for key in self
            .created
            .iter()
            .chain(&self.updated)
            .chain(&self.patched)
            .chain(&self.unchanged)
            .chain(&self.deleted)
            .chain(&self.skipped)
        {
            outcomes.entry(key.kind).or_insert(None);
        }
        for error in &self.errors {
            let entry = outcomes.entry(error.key.kind).or_insert(None);
            if entry.is_none() {
                *entry = Some(error.to_string());
            }
        }
        outcomes
    }

    fn fail(&mut self, key: ResourceKey, operation: SyncOperation, err: StoreError) {
        warn!(resource = %key, %operation, error = %err, "Sync operation failed");
        self.errors.push(SyncError {
            key,
            operation,
            message: err.to_string(),
        });
    }
}

fn order_key(kind: ResourceKind, key: &ResourceKey) -> (u8, ResourceKey) {
    (kind.priority(), key.clone())
}

/// Executes a diff against a store on behalf of one managed object
pub struct SyncEngine<'a> {
    store: &'a dyn ObjectStore,
    owner_uid: Option<&'a str>,
}

impl<'a> SyncEngine<'a> {
    pub fn new(store: &'a dyn ObjectStore, owner_uid: Option<&'a str>) -> Self {
        Self { store, owner_uid }
    }

    pub async fn apply(&self, diff: ResourceDiff) -> SyncReport {
        let ResourceDiff {
            mut to_create,
            to_update,
            to_patch,
            mut to_delete,
            skipped,
        } = diff;

        let mut report = SyncReport {
            skipped,
            ..Default::default()
        };

        to_delete.sort_by_key(|l| order_key(l.kind, &l.key()));
        for live in &to_delete {
            let key = live.key();
            match self.store.delete(key.kind, &key.namespace, &key.name).await {
                Ok(()) => {
                    info!(resource = %key, "Deleted child");
                    report.deleted.push(key);
                }
                Err(e) if e.is_not_found() => {
                    debug!(resource = %key, "Already gone");
                    report.deleted.push(key);
                }
                Err(e) => report.fail(key, SyncOperation::Delete, e),
            }
        }

        to_create.sort_by_key(|d| order_key(d.kind, &d.key()));
        for desired in &to_create {
            self.create(desired, &mut report).await;
        }

        let mut converge: Vec<DesiredResource> = to_update.into_iter().chain(to_patch).collect();
        converge.sort_by_key(|d| order_key(d.kind, &d.key()));
        for desired in &converge {
            self.converge(desired, &mut report).await;
        }

        report
    }

    async fn create(&self, desired: &DesiredResource, report: &mut SyncReport) {
        let key = desired.key();
        match self.store.create(desired.kind, &desired.object).await {
            Ok(_) => {
                info!(resource = %key, "Created child");
                report.created.push(key);
            }
            Err(e) if e.is_already_exists() => {
                debug!(resource = %key, "Exists already, converging instead");
                self.converge(desired, report).await;
            }
            Err(e) => report.fail(key, SyncOperation::Create, e),
        }
    }

    /// Bring an existing child in line through the kind's strategy
    async fn converge(&self, desired: &DesiredResource, report: &mut SyncReport) {
        let key = desired.key();
        let operation = match desired.kind.strategy() {
            SyncStrategy::Update => SyncOperation::Update,
            SyncStrategy::Patch => SyncOperation::Patch,
        };

        let live = match self.store.get(key.kind, &key.namespace, &key.name).await {
            Ok(live) => live,
            Err(e) if e.is_not_found() => {
                match self.store.create(desired.kind, &desired.object).await {
                    Ok(_) => {
                        info!(resource = %key, "Created child");
                        report.created.push(key);
                    }
                    Err(e) => report.fail(key, SyncOperation::Create, e),
                }
                return;
            }
            Err(e) => return report.fail(key, operation, e),
        };

        // A create that hit an existing object lands here without discovery
        // having vetted that object
        let live = LiveResource::new(desired.kind, live, self.owner_uid);
        if live.ignored {
            debug!(resource = %key, "Live object is ignored");
            report.skipped.push(key);
            return;
        }
        if live.foreign_owned {
            let target = key.to_string();
            return report.fail(
                key,
                operation,
                StoreError::Conflict {
                    target,
                    message: "object is owned by another controller".to_string(),
                },
            );
        }
        let live = live.object;

        let result = match operation {
            SyncOperation::Patch => self.patch(desired, live).await,
            _ => self.update(desired, live).await,
        };

        match result {
            Ok(true) => {
                info!(resource = %key, %operation, "Converged child");
                match operation {
                    SyncOperation::Patch => report.patched.push(key),
                    _ => report.updated.push(key),
                }
            }
            Ok(false) => report.unchanged.push(key),
            Err(e) => report.fail(key, operation, e),
        }
    }

    /// Replace the whole object, keeping server-assigned metadata
    async fn update(&self, desired: &DesiredResource, live: DynamicObject) -> Result<bool, StoreError> {
        let mut object = desired.object.clone();
        object.metadata.resource_version = live.metadata.resource_version.clone();
        object.metadata.uid = live.metadata.uid.clone();
        object.metadata.creation_timestamp = live.metadata.creation_timestamp.clone();
        object.metadata.owner_references = union_owner_references(
            live.metadata.owner_references.as_ref(),
            desired.object.metadata.owner_references.as_ref(),
        );

        let unchanged = object.metadata.labels == live.metadata.labels
            && object.metadata.annotations == live.metadata.annotations
            && object.metadata.owner_references == live.metadata.owner_references
            && content(&object) == content(&live);
        if unchanged {
            return Ok(false);
        }

        self.store.replace(desired.kind, &object).await?;
        Ok(true)
    }

    /// Merge live-owned fields in and patch only when something differs
    async fn patch(&self, desired: &DesiredResource, live: DynamicObject) -> Result<bool, StoreError> {
        let mut object = desired.object.clone();
        let mut scratch = live.clone();
        if let Some(merge) = desired.kind.spec().merge {
            merge(&mut object, &mut scratch);
        }
        object.metadata.owner_references = union_owner_references(
            live.metadata.owner_references.as_ref(),
            object.metadata.owner_references.as_ref(),
        );

        if is_derivative(&object, &scratch) {
            return Ok(false);
        }

        let key = desired.key();
        self.store
            .patch(desired.kind, &key.namespace, &key.name, &build_patch(&object))
            .await?;
        Ok(true)
    }
}
