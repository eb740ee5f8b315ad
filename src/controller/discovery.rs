//! Live-state discovery of children owned by a managed object

use futures::future::join_all;
use kube::api::DynamicObject;
use tracing::debug;

use crate::config::ControllerConfig;
use crate::error::{Error, Result};

use super::context::ResourceKey;
use super::kinds::ResourceKind;
use super::managed::{ManagedObject, IGNORE_LABEL};
use super::store::ObjectStore;

/// A child found in the cluster carrying the owner's labels
#[derive(Clone, Debug)]
pub struct LiveResource {
    pub kind: ResourceKind,
    pub object: DynamicObject,
    /// Labelled `tideway.dev/ignore=true`
    pub ignored: bool,
    /// Owned through owner references by something other than the managed object
    pub foreign_owned: bool,
}

impl LiveResource {
    pub fn new(kind: ResourceKind, object: DynamicObject, owner_uid: Option<&str>) -> Self {
        let ignored = object
            .metadata
            .labels
            .as_ref()
            .and_then(|l| l.get(IGNORE_LABEL))
            .is_some_and(|v| v == "true");

        let foreign_owned = match object.metadata.owner_references.as_deref() {
            None | Some([]) => false,
            Some(refs) => !refs.iter().any(|r| Some(r.uid.as_str()) == owner_uid),
        };

        Self {
            kind,
            object,
            ignored,
            foreign_owned,
        }
    }

    pub fn key(&self) -> ResourceKey {
        ResourceKey::of(self.kind, &self.object)
    }

    /// Eligible for update, patch and delete
    pub fn is_managed(&self) -> bool {
        !self.ignored && !self.foreign_owned
    }
}

/// Namespace a kind is listed in for this owner
pub fn discovery_namespace(
    kind: ResourceKind,
    owner: &ManagedObject,
    config: &ControllerConfig,
) -> String {
    if kind.is_fixed_namespace() {
        config.gateway_namespace.clone()
    } else {
        owner.scope_namespace()
    }
}

/// List every producible kind carrying the owner's ownership labels
///
/// Kinds whose API is not served contribute nothing.
pub async fn discover(
    store: &dyn ObjectStore,
    owner: &ManagedObject,
    config: &ControllerConfig,
) -> Result<Vec<LiveResource>> {
    let selector = owner.label_selector();
    let owner_uid = owner.uid();

    let listings = join_all(ResourceKind::ALL.into_iter().map(|kind| {
        let namespace = discovery_namespace(kind, owner, config);
        let selector = selector.as_str();
        async move { (kind, store.list(kind, &namespace, selector).await) }
    }))
    .await;

    let mut live = Vec::new();
    for (kind, listing) in listings {
        match listing {
            Ok(objects) => live.extend(
                objects
                    .into_iter()
                    .map(|object| LiveResource::new(kind, object, owner_uid)),
            ),
            Err(e) if e.is_not_found() => {
                debug!(%kind, "API not served, skipping");
            }
            Err(e) => return Err(Error::DiscoveryError(format!("listing {kind}: {e}"))),
        }
    }

    debug!(
        owner = %owner.identity(),
        found = live.len(),
        "Discovered live children"
    );
    Ok(live)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
    use serde_json::json;

    fn object(labels: &[(&str, &str)], owners: &[&str]) -> DynamicObject {
        let mut object = DynamicObject::new("x", &ResourceKind::ConfigMap.api_resource())
            .within("a")
            .data(json!({}));
        object.metadata.labels = Some(
            labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
        if !owners.is_empty() {
            object.metadata.owner_references = Some(
                owners
                    .iter()
                    .map(|uid| OwnerReference {
                        uid: uid.to_string(),
                        ..Default::default()
                    })
                    .collect(),
            );
        }
        object
    }

    #[test]
    fn test_ignore_label() {
        let live = LiveResource::new(
            ResourceKind::ConfigMap,
            object(&[(IGNORE_LABEL, "true")], &[]),
            Some("me"),
        );
        assert!(live.ignored);
        assert!(!live.is_managed());

        let live = LiveResource::new(
            ResourceKind::ConfigMap,
            object(&[(IGNORE_LABEL, "false")], &[]),
            Some("me"),
        );
        assert!(!live.ignored);
    }

    #[test]
    fn test_foreign_owner() {
        let mine = LiveResource::new(ResourceKind::ConfigMap, object(&[], &["me"]), Some("me"));
        assert!(!mine.foreign_owned);

        let shared = LiveResource::new(
            ResourceKind::ConfigMap,
            object(&[], &["other", "me"]),
            Some("me"),
        );
        assert!(!shared.foreign_owned);

        let theirs = LiveResource::new(ResourceKind::ConfigMap, object(&[], &["other"]), Some("me"));
        assert!(theirs.foreign_owned);
        assert!(!theirs.is_managed());

        let orphan = LiveResource::new(ResourceKind::ConfigMap, object(&[], &[]), Some("me"));
        assert!(orphan.is_managed());
    }
}
