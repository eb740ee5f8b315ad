//! Finalizer handling for managed owners
//!
//! Children in the owner's namespace carry owner references and are garbage
//! collected by the cluster. Certificates live in the gateway namespace, where
//! owner references cannot point across namespaces, so owners that generate
//! them are protected by a finalizer until those children are deleted.

use kube::ResourceExt;

use super::managed::{ManagedKind, ManagedObject};

/// Finalizer placed on owners that may produce cross-namespace children
pub const TIDEWAY_FINALIZER: &str = "tideway.dev/finalizer";

/// Whether owners of this kind need the finalizer at all
pub fn requires_finalizer(kind: ManagedKind) -> bool {
    matches!(kind, ManagedKind::Application | ManagedKind::Routing)
}

/// Check if the owner is being deleted
pub fn is_being_deleted(owner: &ManagedObject) -> bool {
    owner.meta().deletion_timestamp.is_some()
}

/// Check if the owner has our finalizer
pub fn has_finalizer<K: ResourceExt>(owner: &K) -> bool {
    owner.finalizers().iter().any(|f| f == TIDEWAY_FINALIZER)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{Routing, RoutingSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

    fn routing() -> Routing {
        Routing::new(
            "shop",
            RoutingSpec {
                hostname: "shop.example.com".to_string(),
                routes: Vec::new(),
                redirect_to_https: true,
            },
        )
    }

    #[test]
    fn test_finalizer_name() {
        assert_eq!(TIDEWAY_FINALIZER, "tideway.dev/finalizer");
    }

    #[test]
    fn test_requires_finalizer() {
        assert!(requires_finalizer(ManagedKind::Application));
        assert!(requires_finalizer(ManagedKind::Routing));
        assert!(!requires_finalizer(ManagedKind::Job));
        assert!(!requires_finalizer(ManagedKind::Namespace));
    }

    #[test]
    fn test_has_finalizer_and_deletion() {
        let mut routing = routing();
        assert!(!has_finalizer(&routing));
        routing
            .metadata
            .finalizers
            .get_or_insert_with(Vec::new)
            .push(TIDEWAY_FINALIZER.to_string());
        assert!(has_finalizer(&routing));

        assert!(!is_being_deleted(&ManagedObject::Routing(routing.clone())));
        routing.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
        assert!(is_being_deleted(&ManagedObject::Routing(routing)));
    }
}
