//! Four-way partition of desired and live children
//!
//! The diff decides only which operation each child needs. Content comparison
//! happens later in the sync engine, against the freshly fetched object.

use std::collections::{BTreeMap, BTreeSet};

use super::context::{DesiredResource, ResourceKey};
use super::discovery::LiveResource;
use super::kinds::SyncStrategy;

#[derive(Debug, Default)]
pub struct ResourceDiff {
    pub to_create: Vec<DesiredResource>,
    pub to_update: Vec<DesiredResource>,
    pub to_patch: Vec<DesiredResource>,
    pub to_delete: Vec<LiveResource>,
    /// Desired children shadowed by an ignored or foreign-owned live object
    pub skipped: Vec<ResourceKey>,
}

impl ResourceDiff {
    pub fn is_empty(&self) -> bool {
        self.to_create.is_empty()
            && self.to_update.is_empty()
            && self.to_patch.is_empty()
            && self.to_delete.is_empty()
    }

    pub fn len(&self) -> usize {
        self.to_create.len() + self.to_update.len() + self.to_patch.len() + self.to_delete.len()
    }
}

/// Partition desired and live children by identity
///
/// Ignored and foreign-owned live children are left out entirely. They are
/// never deleted, and a desired child sharing their identity is skipped.
pub fn compute_diff(desired: Vec<DesiredResource>, live: Vec<LiveResource>) -> ResourceDiff {
    let (managed, excluded): (Vec<_>, Vec<_>) = live.into_iter().partition(LiveResource::is_managed);
    let excluded: BTreeSet<ResourceKey> = excluded.iter().map(LiveResource::key).collect();
    let mut live_by_key: BTreeMap<ResourceKey, LiveResource> =
        managed.into_iter().map(|l| (l.key(), l)).collect();

    let desired_by_key: BTreeMap<ResourceKey, DesiredResource> =
        desired.into_iter().map(|d| (d.key(), d)).collect();

    let mut diff = ResourceDiff::default();
    for (key, resource) in desired_by_key {
        if excluded.contains(&key) {
            diff.skipped.push(key);
            continue;
        }
        match live_by_key.remove(&key) {
            None => diff.to_create.push(resource),
            Some(existing) => {
                debug_assert_eq!(existing.key(), key);
                match resource.kind.strategy() {
                    SyncStrategy::Patch => diff.to_patch.push(resource),
                    SyncStrategy::Update => diff.to_update.push(resource),
                }
            }
        }
    }
    diff.to_delete = live_by_key.into_values().collect();
    diff
}
