//! Per-pass accumulator handed to every generator
//!
//! Generators never talk to the cluster. They read the managed object and the
//! configuration snapshot and append desired children; the context stamps
//! ownership on every child as it is added.

use std::fmt;

use kube::api::DynamicObject;
use serde::Serialize;

use crate::config::ControllerConfig;
use crate::error::GenerationError;

use super::kinds::ResourceKind;
use super::managed::ManagedObject;

/// Identity of a child across passes
///
/// Group and version are deliberately absent: a kind moving between API
/// versions is still the same child.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
    pub namespace: String,
    pub name: String,
    pub kind: ResourceKind,
}

impl ResourceKey {
    pub fn new(kind: ResourceKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            kind,
        }
    }

    pub fn of(kind: ResourceKind, object: &DynamicObject) -> Self {
        Self::new(
            kind,
            object.metadata.namespace.clone().unwrap_or_default(),
            object.metadata.name.clone().unwrap_or_default(),
        )
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}

/// A child the managed object should have after this pass
#[derive(Clone, Debug)]
pub struct DesiredResource {
    pub kind: ResourceKind,
    pub object: DynamicObject,
}

impl DesiredResource {
    pub fn key(&self) -> ResourceKey {
        ResourceKey::of(self.kind, &self.object)
    }
}

pub struct ReconciliationContext<'a> {
    owner: &'a ManagedObject,
    config: &'a ControllerConfig,
    resources: Vec<DesiredResource>,
}

impl<'a> ReconciliationContext<'a> {
    pub fn new(owner: &'a ManagedObject, config: &'a ControllerConfig) -> Self {
        Self {
            owner,
            config,
            resources: Vec::new(),
        }
    }

    pub fn owner(&self) -> &'a ManagedObject {
        self.owner
    }

    pub fn config(&self) -> &'a ControllerConfig {
        self.config
    }

    /// Namespace ordinary children are placed in
    pub fn namespace(&self) -> String {
        self.owner.scope_namespace()
    }

    pub fn resources(&self) -> &[DesiredResource] {
        &self.resources
    }

    pub fn into_resources(self) -> Vec<DesiredResource> {
        self.resources
    }

    /// Add a child built as a dynamic object
    ///
    /// The child is moved into the gateway namespace when its kind is
    /// fixed-namespace, otherwise into the owner's scope when no namespace is
    /// set. Ownership labels override generator labels of the same key.
    pub fn add(
        &mut self,
        kind: ResourceKind,
        mut object: DynamicObject,
    ) -> Result<(), GenerationError> {
        if object.metadata.name.as_deref().unwrap_or_default().is_empty() {
            return Err(GenerationError::new(format!("{kind} has no name")));
        }

        let spec = kind.spec();
        object.types = Some(kube::api::TypeMeta {
            api_version: spec.api_version(),
            kind: spec.kind.to_string(),
        });

        if kind.is_fixed_namespace() {
            object.metadata.namespace = Some(self.config.gateway_namespace.clone());
        } else if object.metadata.namespace.is_none() {
            object.metadata.namespace = Some(self.namespace());
        }

        object
            .metadata
            .labels
            .get_or_insert_with(Default::default)
            .extend(self.owner.ownership_labels());

        // Owner references cannot cross namespaces
        if !kind.is_fixed_namespace() {
            if let Some(owner_ref) = self.owner.owner_reference() {
                let refs = object.metadata.owner_references.get_or_insert_with(Vec::new);
                if !refs.iter().any(|r| r.uid == owner_ref.uid) {
                    refs.push(owner_ref);
                }
            }
        }

        if let Some(obj) = object.data.as_object_mut() {
            obj.remove("status");
        }

        let desired = DesiredResource { kind, object };
        let key = desired.key();
        if self.resources.iter().any(|r| r.key() == key) {
            return Err(GenerationError::new(format!("{key} generated twice")));
        }

        self.resources.push(desired);
        Ok(())
    }

    /// Add a typed Kubernetes object
    pub fn add_typed<K: Serialize>(
        &mut self,
        kind: ResourceKind,
        object: &K,
    ) -> Result<(), GenerationError> {
        let value = serde_json::to_value(object)
            .map_err(|e| GenerationError::new(format!("failed to serialize {kind}: {e}")))?;
        let dynamic: DynamicObject = serde_json::from_value(value)
            .map_err(|e| GenerationError::new(format!("failed to convert {kind}: {e}")))?;
        self.add(kind, dynamic)
    }

    /// Add an object of a custom resource kind from its name and body
    ///
    /// `data` holds the top-level fields besides metadata, usually `{"spec": ...}`.
    pub fn add_custom(
        &mut self,
        kind: ResourceKind,
        name: &str,
        data: serde_json::Value,
    ) -> Result<(), GenerationError> {
        let object = DynamicObject::new(name, &kind.api_resource()).data(data);
        self.add(kind, object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::managed::{OWNER_NAME_LABEL, MANAGED_BY_LABEL};
    use crate::crd::{Application, ApplicationSpec};
    use k8s_openapi::api::core::v1::ServiceAccount;
    use serde_json::json;

    fn owner() -> ManagedObject {
        let spec: ApplicationSpec = serde_json::from_value(json!({ "image": "nginx" })).unwrap();
        let mut app = Application::new("api", spec);
        app.metadata.namespace = Some("shop".to_string());
        app.metadata.uid = Some("uid-1".to_string());
        ManagedObject::Application(app)
    }

    #[test]
    fn test_add_stamps_ownership() {
        let owner = owner();
        let config = ControllerConfig::default();
        let mut ctx = ReconciliationContext::new(&owner, &config);

        let mut sa = ServiceAccount::default();
        sa.metadata.name = Some("api".to_string());
        ctx.add_typed(ResourceKind::ServiceAccount, &sa).unwrap();

        let added = &ctx.resources()[0];
        assert_eq!(added.key(), ResourceKey::new(ResourceKind::ServiceAccount, "shop", "api"));
        let labels = added.object.metadata.labels.as_ref().unwrap();
        assert_eq!(labels[MANAGED_BY_LABEL], "tideway");
        assert_eq!(labels[OWNER_NAME_LABEL], "api");
        let refs = added.object.metadata.owner_references.as_ref().unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].uid, "uid-1");
    }

    #[test]
    fn test_fixed_namespace_child_has_no_owner_reference() {
        let owner = owner();
        let config = ControllerConfig::default();
        let mut ctx = ReconciliationContext::new(&owner, &config);

        ctx.add_custom(
            ResourceKind::Certificate,
            "shop-api-abc",
            json!({ "spec": { "secretName": "shop-api-abc" } }),
        )
        .unwrap();

        let added = &ctx.resources()[0];
        assert_eq!(added.object.metadata.namespace.as_deref(), Some("istio-gateways"));
        assert!(added.object.metadata.owner_references.is_none());
        assert!(added.object.metadata.labels.is_some());
    }

    #[test]
    fn test_duplicate_child_rejected() {
        let owner = owner();
        let config = ControllerConfig::default();
        let mut ctx = ReconciliationContext::new(&owner, &config);

        ctx.add_custom(ResourceKind::ConfigMap, "cfg", json!({})).unwrap();
        let err = ctx
            .add_custom(ResourceKind::ConfigMap, "cfg", json!({}))
            .unwrap_err();
        assert!(err.message.contains("generated twice"));
    }

    #[test]
    fn test_unnamed_child_rejected() {
        let owner = owner();
        let config = ControllerConfig::default();
        let mut ctx = ReconciliationContext::new(&owner, &config);

        let sa = ServiceAccount::default();
        assert!(ctx.add_typed(ResourceKind::ServiceAccount, &sa).is_err());
        assert!(ctx.resources().is_empty());
    }
}
