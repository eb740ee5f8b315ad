//! Cluster object store abstraction
//!
//! The sync engine and discovery talk to the cluster only through
//! `ObjectStore`. `KubeStore` is backed by the API server, `DryRunStore` logs
//! writes instead of applying them and `MemoryStore` keeps everything in
//! process for tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::{
    api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams},
    Client,
};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use super::context::ResourceKey;
use super::kinds::ResourceKind;
use super::merge::json_merge_patch;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("Conflict on {target}: {message}")]
    Conflict { target: String, message: String },

    #[error("API error {code}: {message}")]
    Api { code: u16, message: String },

    #[error("Kubernetes client error: {0}")]
    Kube(#[source] kube::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::AlreadyExists(_))
    }

    pub fn is_retriable(&self) -> bool {
        match self {
            StoreError::Conflict { .. } | StoreError::Kube(_) => true,
            StoreError::Api { code, .. } => *code == 429 || *code >= 500,
            _ => false,
        }
    }

    /// Classify a client error for the given target
    pub fn from_kube(err: kube::Error, target: impl Into<String>) -> Self {
        match err {
            kube::Error::Api(e) if e.code == 404 => StoreError::NotFound(target.into()),
            kube::Error::Api(e) if e.code == 409 && e.reason == "AlreadyExists" => {
                StoreError::AlreadyExists(target.into())
            }
            kube::Error::Api(e) if e.code == 409 => StoreError::Conflict {
                target: target.into(),
                message: e.message,
            },
            kube::Error::Api(e) => StoreError::Api {
                code: e.code,
                message: e.message,
            },
            other => StoreError::Kube(other),
        }
    }
}

/// Namespaced object store addressed by resource kind
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// List objects of a kind matching an equality label selector
    async fn list(
        &self,
        kind: ResourceKind,
        namespace: &str,
        selector: &str,
    ) -> StoreResult<Vec<DynamicObject>>;

    async fn get(&self, kind: ResourceKind, namespace: &str, name: &str)
        -> StoreResult<DynamicObject>;

    async fn create(&self, kind: ResourceKind, object: &DynamicObject) -> StoreResult<DynamicObject>;

    /// Replace the whole object; `resourceVersion` must match the stored one
    async fn replace(&self, kind: ResourceKind, object: &DynamicObject)
        -> StoreResult<DynamicObject>;

    /// Apply a JSON merge patch (RFC 7386)
    async fn patch(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> StoreResult<DynamicObject>;

    async fn delete(&self, kind: ResourceKind, namespace: &str, name: &str) -> StoreResult<()>;
}

fn target(kind: ResourceKind, namespace: &str, name: &str) -> String {
    ResourceKey::new(kind, namespace, name).to_string()
}

fn object_name(object: &DynamicObject) -> (String, String) {
    (
        object.metadata.namespace.clone().unwrap_or_default(),
        object.metadata.name.clone().unwrap_or_default(),
    )
}

/// Store backed by the Kubernetes API server
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, kind: ResourceKind, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &kind.api_resource())
    }
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn list(
        &self,
        kind: ResourceKind,
        namespace: &str,
        selector: &str,
    ) -> StoreResult<Vec<DynamicObject>> {
        let params = ListParams::default().labels(selector);
        self.api(kind, namespace)
            .list(&params)
            .await
            .map(|list| list.items)
            .map_err(|e| StoreError::from_kube(e, format!("{kind} in {namespace}")))
    }

    async fn get(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> StoreResult<DynamicObject> {
        self.api(kind, namespace)
            .get(name)
            .await
            .map_err(|e| StoreError::from_kube(e, target(kind, namespace, name)))
    }

    async fn create(&self, kind: ResourceKind, object: &DynamicObject) -> StoreResult<DynamicObject> {
        let (namespace, name) = object_name(object);
        self.api(kind, &namespace)
            .create(&PostParams::default(), object)
            .await
            .map_err(|e| StoreError::from_kube(e, target(kind, &namespace, &name)))
    }

    async fn replace(
        &self,
        kind: ResourceKind,
        object: &DynamicObject,
    ) -> StoreResult<DynamicObject> {
        let (namespace, name) = object_name(object);
        self.api(kind, &namespace)
            .replace(&name, &PostParams::default(), object)
            .await
            .map_err(|e| StoreError::from_kube(e, target(kind, &namespace, &name)))
    }

    async fn patch(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> StoreResult<DynamicObject> {
        self.api(kind, namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(patch))
            .await
            .map_err(|e| StoreError::from_kube(e, target(kind, namespace, name)))
    }

    async fn delete(&self, kind: ResourceKind, namespace: &str, name: &str) -> StoreResult<()> {
        self.api(kind, namespace)
            .delete(name, &DeleteParams::background())
            .await
            .map(|_| ())
            .map_err(|e| StoreError::from_kube(e, target(kind, namespace, name)))
    }
}

/// Store that reads through to another store and only logs writes
pub struct DryRunStore<S> {
    inner: S,
}

impl<S: ObjectStore> DryRunStore<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<S: ObjectStore> ObjectStore for DryRunStore<S> {
    async fn list(
        &self,
        kind: ResourceKind,
        namespace: &str,
        selector: &str,
    ) -> StoreResult<Vec<DynamicObject>> {
        self.inner.list(kind, namespace, selector).await
    }

    async fn get(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> StoreResult<DynamicObject> {
        self.inner.get(kind, namespace, name).await
    }

    async fn create(&self, kind: ResourceKind, object: &DynamicObject) -> StoreResult<DynamicObject> {
        let (namespace, name) = object_name(object);
        info!(resource = %target(kind, &namespace, &name), "[dry-run] would create");
        Ok(object.clone())
    }

    async fn replace(
        &self,
        kind: ResourceKind,
        object: &DynamicObject,
    ) -> StoreResult<DynamicObject> {
        let (namespace, name) = object_name(object);
        info!(resource = %target(kind, &namespace, &name), "[dry-run] would replace");
        Ok(object.clone())
    }

    async fn patch(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> StoreResult<DynamicObject> {
        let live = self.inner.get(kind, namespace, name).await?;
        info!(
            resource = %target(kind, namespace, name),
            patch = %patch,
            "[dry-run] would patch"
        );
        Ok(live)
    }

    async fn delete(&self, kind: ResourceKind, namespace: &str, name: &str) -> StoreResult<()> {
        info!(resource = %target(kind, namespace, name), "[dry-run] would delete");
        Ok(())
    }
}

/// Write operation recorded by `MemoryStore`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WriteOp {
    Create,
    Replace,
    Patch,
    Delete,
}

impl fmt::Display for WriteOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WriteOp::Create => "create",
            WriteOp::Replace => "replace",
            WriteOp::Patch => "patch",
            WriteOp::Delete => "delete",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mutation {
    pub op: WriteOp,
    pub key: ResourceKey,
}

#[derive(Default)]
struct MemoryState {
    objects: BTreeMap<ResourceKey, DynamicObject>,
    mutations: Vec<Mutation>,
    failures: HashMap<(WriteOp, ResourceKey), String>,
    unserved: HashSet<ResourceKind>,
    next_uid: u64,
}

/// In-process store with API-server-like semantics
///
/// Assigns `uid`, `resourceVersion` and `creationTimestamp`, rejects stale
/// replaces and records every effective write. Writes that leave an object
/// unchanged are not recorded.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        // A poisoned lock only means a test panicked mid-write
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Seed an object without recording a mutation
    pub fn insert(&self, kind: ResourceKind, mut object: DynamicObject) -> DynamicObject {
        let mut state = self.lock();
        let key = ResourceKey::of(kind, &object);
        stamp_new(&mut state, &mut object);
        state.objects.insert(key, object.clone());
        object
    }

    pub fn object(&self, key: &ResourceKey) -> Option<DynamicObject> {
        self.lock().objects.get(key).cloned()
    }

    pub fn keys(&self) -> Vec<ResourceKey> {
        self.lock().objects.keys().cloned().collect()
    }

    pub fn mutations(&self) -> Vec<Mutation> {
        self.lock().mutations.clone()
    }

    pub fn clear_mutations(&self) {
        self.lock().mutations.clear();
    }

    /// Make the next matching write fail with a server error
    pub fn fail_on(&self, op: WriteOp, key: ResourceKey, message: impl Into<String>) {
        self.lock().failures.insert((op, key), message.into());
    }

    /// Make every list of a kind report that its API is not served
    pub fn mark_unserved(&self, kind: ResourceKind) {
        self.lock().unserved.insert(kind);
    }

    /// Overwrite a stored object in place, as another actor would
    pub fn mutate<F: FnOnce(&mut DynamicObject)>(&self, key: &ResourceKey, f: F) -> bool {
        let mut state = self.lock();
        match state.objects.get_mut(key) {
            Some(object) => {
                f(object);
                bump_version(object);
                true
            }
            None => false,
        }
    }
}

fn stamp_new(state: &mut MemoryState, object: &mut DynamicObject) {
    state.next_uid += 1;
    object.metadata.uid = Some(format!("uid-{}", state.next_uid));
    object.metadata.resource_version = Some("1".to_string());
    object.metadata.creation_timestamp = Some(Time(chrono::Utc::now()));
}

fn bump_version(object: &mut DynamicObject) {
    let next = object
        .metadata
        .resource_version
        .as_deref()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0)
        + 1;
    object.metadata.resource_version = Some(next.to_string());
}

fn take_failure(state: &mut MemoryState, op: WriteOp, key: &ResourceKey) -> StoreResult<()> {
    match state.failures.remove(&(op, key.clone())) {
        Some(message) => Err(StoreError::Api { code: 500, message }),
        None => Ok(()),
    }
}

fn same_content(a: &DynamicObject, b: &DynamicObject) -> bool {
    a.metadata.labels == b.metadata.labels
        && a.metadata.annotations == b.metadata.annotations
        && a.metadata.owner_references == b.metadata.owner_references
        && a.data == b.data
}

/// Match an equality-based selector such as `a=b,c=d`
fn matches_selector(object: &DynamicObject, selector: &str) -> bool {
    let labels = object.metadata.labels.clone().unwrap_or_default();
    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((k, v)) => labels.get(k.trim()).map(String::as_str) == Some(v.trim()),
            None => labels.contains_key(term),
        })
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn list(
        &self,
        kind: ResourceKind,
        namespace: &str,
        selector: &str,
    ) -> StoreResult<Vec<DynamicObject>> {
        let state = self.lock();
        if state.unserved.contains(&kind) {
            return Err(StoreError::NotFound(format!("{kind} API")));
        }
        Ok(state
            .objects
            .iter()
            .filter(|(key, _)| key.kind == kind && key.namespace == namespace)
            .map(|(_, object)| object)
            .filter(|object| matches_selector(object, selector))
            .cloned()
            .collect())
    }

    async fn get(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> StoreResult<DynamicObject> {
        let key = ResourceKey::new(kind, namespace, name);
        self.lock()
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn create(&self, kind: ResourceKind, object: &DynamicObject) -> StoreResult<DynamicObject> {
        let mut state = self.lock();
        let key = ResourceKey::of(kind, object);
        take_failure(&mut state, WriteOp::Create, &key)?;
        if state.objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists(key.to_string()));
        }

        let mut stored = object.clone();
        stamp_new(&mut state, &mut stored);
        state.objects.insert(key.clone(), stored.clone());
        state.mutations.push(Mutation {
            op: WriteOp::Create,
            key,
        });
        Ok(stored)
    }

    async fn replace(
        &self,
        kind: ResourceKind,
        object: &DynamicObject,
    ) -> StoreResult<DynamicObject> {
        let mut state = self.lock();
        let key = ResourceKey::of(kind, object);
        take_failure(&mut state, WriteOp::Replace, &key)?;
        let current = state
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;

        if let Some(version) = &object.metadata.resource_version {
            if current.metadata.resource_version.as_ref() != Some(version) {
                return Err(StoreError::Conflict {
                    target: key.to_string(),
                    message: "the object has been modified".to_string(),
                });
            }
        }

        if same_content(&current, object) {
            return Ok(current);
        }

        let mut stored = object.clone();
        stored.metadata.uid = current.metadata.uid.clone();
        stored.metadata.creation_timestamp = current.metadata.creation_timestamp.clone();
        stored.metadata.resource_version = current.metadata.resource_version.clone();
        bump_version(&mut stored);
        state.objects.insert(key.clone(), stored.clone());
        state.mutations.push(Mutation {
            op: WriteOp::Replace,
            key,
        });
        Ok(stored)
    }

    async fn patch(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> StoreResult<DynamicObject> {
        let mut state = self.lock();
        let key = ResourceKey::new(kind, namespace, name);
        take_failure(&mut state, WriteOp::Patch, &key)?;
        let current = state
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;

        let mut merged = serde_json::to_value(&current)?;
        json_merge_patch(&mut merged, patch);
        let mut stored: DynamicObject = serde_json::from_value(merged)?;
        if same_content(&current, &stored) {
            return Ok(current);
        }

        bump_version(&mut stored);
        state.objects.insert(key.clone(), stored.clone());
        state.mutations.push(Mutation {
            op: WriteOp::Patch,
            key,
        });
        Ok(stored)
    }

    async fn delete(&self, kind: ResourceKind, namespace: &str, name: &str) -> StoreResult<()> {
        let mut state = self.lock();
        let key = ResourceKey::new(kind, namespace, name);
        take_failure(&mut state, WriteOp::Delete, &key)?;
        if state.objects.remove(&key).is_none() {
            return Err(StoreError::NotFound(key.to_string()));
        }
        debug!(resource = %key, "Deleted from memory store");
        state.mutations.push(Mutation {
            op: WriteOp::Delete,
            key,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config_map(name: &str, labels: &[(&str, &str)]) -> DynamicObject {
        let mut object = DynamicObject::new(name, &ResourceKind::ConfigMap.api_resource())
            .within("default")
            .data(json!({ "data": { "key": "value" } }));
        object.metadata.labels = Some(
            labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
        object
    }

    #[tokio::test]
    async fn test_create_assigns_server_fields() {
        let store = MemoryStore::new();
        let created = store
            .create(ResourceKind::ConfigMap, &config_map("a", &[]))
            .await
            .unwrap();
        assert!(created.metadata.uid.is_some());
        assert_eq!(created.metadata.resource_version.as_deref(), Some("1"));

        let err = store
            .create(ResourceKind::ConfigMap, &config_map("a", &[]))
            .await
            .unwrap_err();
        assert!(err.is_already_exists());
        assert_eq!(store.mutations().len(), 1);
    }

    #[tokio::test]
    async fn test_list_filters_by_selector() {
        let store = MemoryStore::new();
        store.insert(ResourceKind::ConfigMap, config_map("a", &[("team", "x")]));
        store.insert(ResourceKind::ConfigMap, config_map("b", &[("team", "y")]));

        let listed = store
            .list(ResourceKind::ConfigMap, "default", "team=x")
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].metadata.name.as_deref(), Some("a"));

        let other_ns = store
            .list(ResourceKind::ConfigMap, "other", "team=x")
            .await
            .unwrap();
        assert!(other_ns.is_empty());
    }

    #[tokio::test]
    async fn test_replace_rejects_stale_version() {
        let store = MemoryStore::new();
        let stored = store.insert(ResourceKind::ConfigMap, config_map("a", &[]));
        let key = ResourceKey::of(ResourceKind::ConfigMap, &stored);
        store.mutate(&key, |o| o.data = json!({ "data": { "key": "other" } }));

        let err = store
            .replace(ResourceKind::ConfigMap, &stored)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
        assert!(err.is_retriable());
    }

    #[tokio::test]
    async fn test_unchanged_patch_not_recorded() {
        let store = MemoryStore::new();
        store.insert(ResourceKind::ConfigMap, config_map("a", &[]));

        store
            .patch(
                ResourceKind::ConfigMap,
                "default",
                "a",
                &json!({ "data": { "key": "value" } }),
            )
            .await
            .unwrap();
        assert!(store.mutations().is_empty());

        let patched = store
            .patch(
                ResourceKind::ConfigMap,
                "default",
                "a",
                &json!({ "data": { "extra": "1" } }),
            )
            .await
            .unwrap();
        assert_eq!(patched.data["data"]["key"], "value");
        assert_eq!(patched.data["data"]["extra"], "1");
        assert_eq!(store.mutations().len(), 1);
    }

    #[tokio::test]
    async fn test_unserved_kind_lists_not_found() {
        let store = MemoryStore::new();
        store.mark_unserved(ResourceKind::ServiceMonitor);
        let err = store
            .list(ResourceKind::ServiceMonitor, "default", "")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_injected_failure_fires_once() {
        let store = MemoryStore::new();
        let key = ResourceKey::new(ResourceKind::ConfigMap, "default", "a");
        store.fail_on(WriteOp::Create, key, "etcd unavailable");

        let err = store
            .create(ResourceKind::ConfigMap, &config_map("a", &[]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("etcd unavailable"));
        assert!(store
            .create(ResourceKind::ConfigMap, &config_map("a", &[]))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_dry_run_does_not_write() {
        let store = DryRunStore::new(MemoryStore::new());
        store
            .create(ResourceKind::ConfigMap, &config_map("a", &[]))
            .await
            .unwrap();
        assert!(store.inner.keys().is_empty());
        assert!(store.delete(ResourceKind::ConfigMap, "default", "a").await.is_ok());
    }

    #[test]
    fn test_kube_error_classification() {
        let not_found = kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: "not found".to_string(),
            reason: "NotFound".to_string(),
            code: 404,
        });
        assert!(StoreError::from_kube(not_found, "x").is_not_found());

        let exists = kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: "exists".to_string(),
            reason: "AlreadyExists".to_string(),
            code: 409,
        });
        assert!(StoreError::from_kube(exists, "x").is_already_exists());

        let conflict = kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: "modified".to_string(),
            reason: "Conflict".to_string(),
            code: 409,
        });
        assert!(StoreError::from_kube(conflict, "x").is_retriable());
    }
}
