//! Unit tests for the desired/live partition.

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
    use kube::api::DynamicObject;
    use serde_json::json;

    use crate::controller::context::{DesiredResource, ResourceKey};
    use crate::controller::diff::compute_diff;
    use crate::controller::discovery::LiveResource;
    use crate::controller::kinds::ResourceKind;
    use crate::controller::managed::IGNORE_LABEL;

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    const OWNER_UID: &str = "owner-uid";

    fn object(kind: ResourceKind, namespace: &str, name: &str) -> DynamicObject {
        DynamicObject::new(name, &kind.api_resource())
            .within(namespace)
            .data(json!({}))
    }

    fn desired(kind: ResourceKind, namespace: &str, name: &str) -> DesiredResource {
        DesiredResource {
            kind,
            object: object(kind, namespace, name),
        }
    }

    fn live(kind: ResourceKind, namespace: &str, name: &str) -> LiveResource {
        LiveResource::new(kind, object(kind, namespace, name), Some(OWNER_UID))
    }

    fn ignored(kind: ResourceKind, namespace: &str, name: &str) -> LiveResource {
        let mut obj = object(kind, namespace, name);
        obj.metadata.labels = Some([(IGNORE_LABEL.to_string(), "true".to_string())].into());
        LiveResource::new(kind, obj, Some(OWNER_UID))
    }

    fn foreign(kind: ResourceKind, namespace: &str, name: &str) -> LiveResource {
        let mut obj = object(kind, namespace, name);
        obj.metadata.owner_references = Some(vec![OwnerReference {
            uid: "someone-else".to_string(),
            ..Default::default()
        }]);
        LiveResource::new(kind, obj, Some(OWNER_UID))
    }

    fn keys(resources: &[DesiredResource]) -> Vec<ResourceKey> {
        resources.iter().map(DesiredResource::key).collect()
    }

    // -----------------------------------------------------------------------
    // Partition
    // -----------------------------------------------------------------------

    #[test]
    fn test_ignored_deployment_left_alone() {
        let diff = compute_diff(
            vec![desired(ResourceKind::ServiceAccount, "a", "x")],
            vec![
                live(ResourceKind::ServiceAccount, "a", "x"),
                ignored(ResourceKind::Deployment, "a", "x"),
            ],
        );

        assert_eq!(
            keys(&diff.to_update),
            vec![ResourceKey::new(ResourceKind::ServiceAccount, "a", "x")]
        );
        assert!(diff.to_create.is_empty());
        assert!(diff.to_patch.is_empty());
        assert!(diff.to_delete.is_empty());
    }

    #[test]
    fn test_strategy_routes_to_patch_or_update() {
        let diff = compute_diff(
            vec![
                desired(ResourceKind::Deployment, "a", "x"),
                desired(ResourceKind::ConfigMap, "a", "x"),
            ],
            vec![
                live(ResourceKind::Deployment, "a", "x"),
                live(ResourceKind::ConfigMap, "a", "x"),
            ],
        );
        assert_eq!(diff.to_patch.len(), 1);
        assert_eq!(diff.to_patch[0].kind, ResourceKind::Deployment);
        assert_eq!(diff.to_update.len(), 1);
        assert_eq!(diff.to_update[0].kind, ResourceKind::ConfigMap);
    }

    #[test]
    fn test_rename_is_delete_plus_create() {
        let diff = compute_diff(
            vec![desired(ResourceKind::Service, "a", "new")],
            vec![live(ResourceKind::Service, "a", "old")],
        );
        assert_eq!(
            keys(&diff.to_create),
            vec![ResourceKey::new(ResourceKind::Service, "a", "new")]
        );
        assert_eq!(diff.to_delete.len(), 1);
        assert_eq!(diff.to_delete[0].key().name, "old");
    }

    #[test]
    fn test_kind_change_is_two_identities() {
        let diff = compute_diff(
            vec![desired(ResourceKind::CronJob, "a", "x")],
            vec![live(ResourceKind::Job, "a", "x")],
        );
        assert_eq!(diff.to_create.len(), 1);
        assert_eq!(diff.to_delete.len(), 1);
        assert!(diff.to_update.is_empty());
        assert!(diff.to_patch.is_empty());
    }

    #[test]
    fn test_foreign_owned_not_deleted_or_overwritten() {
        let diff = compute_diff(
            vec![desired(ResourceKind::ConfigMap, "a", "shared")],
            vec![
                foreign(ResourceKind::ConfigMap, "a", "shared"),
                foreign(ResourceKind::Service, "a", "theirs"),
            ],
        );
        assert!(diff.is_empty());
        assert_eq!(
            diff.skipped,
            vec![ResourceKey::new(ResourceKind::ConfigMap, "a", "shared")]
        );
    }

    #[test]
    fn test_partition_is_total_and_disjoint() {
        let desired_set = vec![
            desired(ResourceKind::ServiceAccount, "a", "x"),
            desired(ResourceKind::Service, "a", "x"),
            desired(ResourceKind::Deployment, "a", "x"),
            desired(ResourceKind::NetworkPolicy, "a", "deny"),
        ];
        let live_set = vec![
            live(ResourceKind::ServiceAccount, "a", "x"),
            live(ResourceKind::Deployment, "a", "x"),
            live(ResourceKind::ConfigMap, "a", "stale"),
            ignored(ResourceKind::PodDisruptionBudget, "a", "kept"),
        ];

        let mut expected: BTreeSet<ResourceKey> = desired_set.iter().map(|d| d.key()).collect();
        expected.extend(live_set.iter().filter(|l| l.is_managed()).map(|l| l.key()));

        let diff = compute_diff(desired_set, live_set);

        let mut seen = BTreeSet::new();
        for key in keys(&diff.to_create)
            .into_iter()
            .chain(keys(&diff.to_update))
            .chain(keys(&diff.to_patch))
            .chain(diff.to_delete.iter().map(LiveResource::key))
        {
            assert!(seen.insert(key.clone()), "{key} appears twice");
        }
        assert_eq!(seen, expected);
        assert_eq!(diff.len(), 5);
    }
}
