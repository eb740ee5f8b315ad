//! End-to-end reconciliation passes against the in-memory object store
//!
//! These drive the same engine the controllers use, without a cluster.

use std::sync::Arc;

use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::DynamicObject;
use serde_json::json;
use tideway::config::ControllerConfig;
use tideway::controller::conditions::{
    find_condition, is_condition_true, CONDITION_STATUS_FALSE, CONDITION_TYPE_FAILED,
    CONDITION_TYPE_SYNCED,
};
use tideway::controller::managed::IGNORE_LABEL;
use tideway::controller::status::{begin_pass, reduce};
use tideway::controller::store::{Mutation, WriteOp};
use tideway::controller::{
    validity, ManagedObject, MemoryStore, ObjectStore, PassOutcome, Phase, ReconcileEngine,
    ResourceKey, ResourceKind,
};
use tideway::crd::{Application, ApplicationSpec, StatusName, TideJob, TideJobSpec};
use tideway::generator::standard_registry;

const NOW: &str = "2024-06-01T12:00:00+00:00";
const LATER: &str = "2024-06-01T12:05:00+00:00";

fn engine(store: &Arc<MemoryStore>) -> ReconcileEngine {
    let store: Arc<dyn ObjectStore> = store.clone();
    ReconcileEngine::new(
        Arc::new(standard_registry()),
        store,
        Arc::new(ControllerConfig::default()),
    )
}

fn application(spec: serde_json::Value) -> ManagedObject {
    let spec: ApplicationSpec = serde_json::from_value(spec).unwrap();
    let mut app = Application::new("api", spec);
    app.metadata.namespace = Some("shop".to_string());
    app.metadata.uid = Some("uid-api".to_string());
    app.metadata.generation = Some(1);
    ManagedObject::Application(app)
}

fn tide_job(image: &str) -> ManagedObject {
    let spec: TideJobSpec = serde_json::from_value(json!({
        "container": { "image": image },
    }))
    .unwrap();
    let mut job = TideJob::new("migrate", spec);
    job.metadata.namespace = Some("shop".to_string());
    job.metadata.uid = Some("uid-migrate".to_string());
    ManagedObject::Job(job)
}

fn key_of(store: &MemoryStore, kind: ResourceKind) -> ResourceKey {
    store
        .keys()
        .into_iter()
        .find(|k| k.kind == kind)
        .unwrap_or_else(|| panic!("no {kind} in store"))
}

fn writes_to(mutations: &[Mutation], key: &ResourceKey) -> Vec<WriteOp> {
    mutations
        .iter()
        .filter(|m| &m.key == key)
        .map(|m| m.op)
        .collect()
}

#[tokio::test]
async fn second_pass_over_unchanged_owner_writes_nothing() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine(&store);
    let owner = application(json!({
        "image": "ghcr.io/shop/api:1.0.0",
        "ingresses": ["api.shop.example.com"],
        "env": [{ "name": "LOG_LEVEL", "value": "debug" }],
    }));

    let first = engine.run_pass(&owner).await;
    assert!(first.outcome.is_success(), "{:?}", first.outcome);
    assert!(first.error.is_none());
    assert!(store
        .keys()
        .contains(&ResourceKey::new(ResourceKind::Deployment, "shop", "api")));
    let certificate = key_of(&store, ResourceKind::Certificate);
    assert_eq!(certificate.namespace, "istio-gateways");

    store.clear_mutations();
    let second = engine.run_pass(&owner).await;
    assert!(second.outcome.is_success());
    assert!(store.mutations().is_empty(), "{:?}", store.mutations());
    match second.outcome {
        PassOutcome::Completed { report, .. } => {
            assert_eq!(report.writes(), 0, "{report:?}");
            assert!(report.updated.is_empty());
            assert!(report.patched.is_empty());
            assert!(report
                .unchanged
                .contains(&ResourceKey::new(ResourceKind::Deployment, "shop", "api")));
            assert!(report.unchanged.contains(&certificate));
        }
        other => panic!("unexpected outcome {other:?}"),
    }
}

#[tokio::test]
async fn autoscaled_replica_count_is_preserved() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine(&store);
    let owner = application(json!({
        "image": "ghcr.io/shop/api:1.0.0",
        "replicas": { "min": 2, "max": 6 },
    }));
    engine.run_pass(&owner).await;

    let deployment = ResourceKey::new(ResourceKind::Deployment, "shop", "api");
    store.mutate(&deployment, |d| d.data["spec"]["replicas"] = json!(3));
    store.clear_mutations();

    engine.run_pass(&owner).await;
    assert!(writes_to(&store.mutations(), &deployment).is_empty());
    assert_eq!(store.object(&deployment).unwrap().data["spec"]["replicas"], 3);

    store.mutate(&deployment, |d| d.data["spec"]["replicas"] = json!(0));
    engine.run_pass(&owner).await;
    assert_eq!(store.object(&deployment).unwrap().data["spec"]["replicas"], 1);
}

#[tokio::test]
async fn job_keeps_immutable_fields_from_live_object() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine(&store);
    engine.run_pass(&tide_job("ghcr.io/shop/migrate:1")).await;

    let job = key_of(&store, ResourceKind::Job);
    let selector = json!({ "matchLabels": { "controller-uid": "7f3c" } });
    store.mutate(&job, |j| {
        j.data["spec"]["selector"] = selector.clone();
        j.data["spec"]["template"]["metadata"]["labels"]["controller-uid"] = json!("7f3c");
    });
    store.clear_mutations();

    let result = engine.run_pass(&tide_job("ghcr.io/shop/migrate:2")).await;
    assert!(result.outcome.is_success(), "{:?}", result.outcome);

    let live = store.object(&job).unwrap();
    assert_eq!(live.data["spec"]["selector"], selector);
    assert_eq!(
        live.data["spec"]["template"]["metadata"]["labels"]["controller-uid"],
        "7f3c"
    );
    let ops = writes_to(&store.mutations(), &job);
    assert!(!ops.contains(&WriteOp::Delete));
    assert!(!ops.contains(&WriteOp::Replace));
}

#[tokio::test]
async fn failed_scheduled_run_shows_in_job_progress() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine(&store);
    let spec: TideJobSpec = serde_json::from_value(json!({
        "container": { "image": "ghcr.io/shop/report:1" },
        "cron": { "schedule": "0 * * * *" },
    }))
    .unwrap();
    let mut nightly = TideJob::new("nightly", spec);
    nightly.metadata.namespace = Some("shop".to_string());
    nightly.metadata.uid = Some("uid-nightly".to_string());
    let owner = ManagedObject::Job(nightly);

    engine.run_pass(&owner).await;
    let cron_job = store
        .object(&ResourceKey::new(ResourceKind::CronJob, "shop", "nightly"))
        .expect("cron job created");
    let cron_uid = cron_job.metadata.uid.clone().unwrap();

    // The run carries the template labels and is owned by the CronJob
    let template = &cron_job.data["spec"]["jobTemplate"];
    let mut run = DynamicObject::new("nightly-28471200", &ResourceKind::Job.api_resource())
        .within("shop")
        .data(json!({
            "spec": template["spec"].clone(),
            "status": {
                "failed": 3,
                "conditions": [{ "type": "Failed", "status": "True" }],
            },
        }));
    run.metadata.labels = serde_json::from_value(template["metadata"]["labels"].clone()).unwrap();
    run.metadata.owner_references = Some(vec![OwnerReference {
        api_version: "batch/v1".to_string(),
        kind: "CronJob".to_string(),
        name: "nightly".to_string(),
        uid: cron_uid,
        controller: Some(true),
        ..Default::default()
    }]);
    let run = store.insert(ResourceKind::Job, run);
    let run_key = ResourceKey::of(ResourceKind::Job, &run);
    store.clear_mutations();

    let result = engine.run_pass(&owner).await;
    assert!(result.outcome.is_success(), "{:?}", result.outcome);
    match &result.outcome {
        PassOutcome::Completed {
            job_progress: Some(progress),
            ..
        } => {
            assert_eq!(progress.failed, 3);
            assert!(progress.terminal_failure);
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    // The run is never deleted by the owner's pass
    assert!(store.object(&run_key).is_some());
    assert!(writes_to(&store.mutations(), &run_key).is_empty());

    let status = reduce(
        None,
        &result.outcome,
        &validity::check(&owner),
        owner.generation(),
        NOW,
    );
    assert!(is_condition_true(&status.conditions, CONDITION_TYPE_FAILED));
}

#[tokio::test]
async fn renamed_child_is_deleted_before_replacement_is_created() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine(&store);
    engine
        .run_pass(&application(json!({
            "image": "ghcr.io/shop/api:1.0.0",
            "ingresses": ["old.shop.example.com"],
        })))
        .await;
    let old_gateway = key_of(&store, ResourceKind::Gateway);
    store.clear_mutations();

    let result = engine
        .run_pass(&application(json!({
            "image": "ghcr.io/shop/api:1.0.0",
            "ingresses": ["new.shop.example.com"],
        })))
        .await;
    assert!(result.outcome.is_success());

    let new_gateway = key_of(&store, ResourceKind::Gateway);
    assert_ne!(old_gateway, new_gateway);
    assert!(store.object(&old_gateway).is_none());

    let mutations = store.mutations();
    let position = |key: &ResourceKey, op: WriteOp| {
        mutations
            .iter()
            .position(|m| &m.key == key && m.op == op)
            .unwrap_or_else(|| panic!("no {op} of {key}"))
    };
    assert!(position(&old_gateway, WriteOp::Delete) < position(&new_gateway, WriteOp::Create));
}

#[tokio::test]
async fn status_moves_from_pending_through_progressing_to_synced() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine(&store);
    let owner = application(json!({ "image": "ghcr.io/shop/api:1.0.0" }));

    let started = begin_pass(None, owner.generation(), NOW).expect("first pass writes status");
    assert_eq!(started.summary.status, StatusName::Progressing);

    let result = engine.run_pass(&owner).await;
    let status = reduce(
        Some(&started),
        &result.outcome,
        &validity::check(&owner),
        owner.generation(),
        LATER,
    );
    assert_eq!(status.summary.status, StatusName::Synced);
    assert_eq!(status.observed_generation, Some(1));
    assert_eq!(status.access_policies, Some(StatusName::Ready));
    assert_eq!(
        status.sub_resources["Deployment"].status,
        StatusName::Synced
    );

    assert!(begin_pass(Some(&status), owner.generation(), LATER).is_none());
}

#[tokio::test]
async fn failed_write_reports_error_with_sync_phase() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine(&store);
    let owner = application(json!({ "image": "ghcr.io/shop/api:1.0.0" }));
    let deployment = ResourceKey::new(ResourceKind::Deployment, "shop", "api");
    store.fail_on(WriteOp::Create, deployment.clone(), "exceeded quota");

    let result = engine.run_pass(&owner).await;
    assert!(!result.outcome.is_success());
    assert_eq!(result.outcome.failed_phase(), Some(Phase::Sync));
    assert!(result.error.is_some());
    // Siblings are still written
    assert!(store
        .keys()
        .contains(&ResourceKey::new(ResourceKind::Service, "shop", "api")));
    assert!(store.object(&deployment).is_none());

    let status = reduce(
        None,
        &result.outcome,
        &validity::check(&owner),
        owner.generation(),
        NOW,
    );
    assert_eq!(status.summary.status, StatusName::Error);
    assert!(status.summary.message.contains("exceeded quota"));
    let synced = find_condition(&status.conditions, CONDITION_TYPE_SYNCED).unwrap();
    assert_eq!(synced.status, CONDITION_STATUS_FALSE);
    assert_eq!(synced.reason, "Sync");
    assert_eq!(status.sub_resources["Deployment"].status, StatusName::Error);

    // The injected failure fires once, so the next pass recovers
    let retry = engine.run_pass(&owner).await;
    assert!(retry.outcome.is_success());
    assert!(store.object(&deployment).is_some());
}

#[test]
fn generation_failure_writes_nothing() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine(&store);
    let owner = application(json!({ "image": "" }));

    let result = tokio_test::block_on(engine.run_pass(&owner));
    assert!(matches!(
        result.outcome,
        PassOutcome::Failed {
            phase: Phase::Generate,
            ..
        }
    ));
    assert!(store.keys().is_empty());

    let status = reduce(
        None,
        &result.outcome,
        &validity::check(&owner),
        owner.generation(),
        NOW,
    );
    let synced = find_condition(&status.conditions, CONDITION_TYPE_SYNCED).unwrap();
    assert_eq!(synced.reason, "Generate");
}

#[tokio::test]
async fn ignored_child_is_left_alone() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine(&store);
    engine
        .run_pass(&application(json!({ "image": "ghcr.io/shop/api:1.0.0" })))
        .await;

    let service = ResourceKey::new(ResourceKind::Service, "shop", "api");
    store.mutate(&service, |s| {
        s.metadata
            .labels
            .get_or_insert_with(Default::default)
            .insert(IGNORE_LABEL.to_string(), "true".to_string());
    });
    store.clear_mutations();

    let result = engine
        .run_pass(&application(json!({
            "image": "ghcr.io/shop/api:1.0.0",
            "port": 9090,
        })))
        .await;
    assert!(writes_to(&store.mutations(), &service).is_empty());
    match result.outcome {
        PassOutcome::Completed { report, .. } => assert!(report.skipped.contains(&service)),
        other => panic!("unexpected outcome {other:?}"),
    }
}

#[tokio::test]
async fn same_named_object_of_another_owner_is_left_intact() {
    let store = Arc::new(MemoryStore::new());
    let mut existing =
        DynamicObject::new("api", &ResourceKind::ServiceAccount.api_resource())
            .within("shop")
            .data(json!({ "automountServiceAccountToken": true }));
    existing.metadata.owner_references = Some(vec![OwnerReference {
        api_version: "apps/v1".to_string(),
        kind: "Deployment".to_string(),
        name: "legacy".to_string(),
        uid: "someone-else".to_string(),
        controller: Some(true),
        ..Default::default()
    }]);
    store.insert(ResourceKind::ServiceAccount, existing);
    let account = ResourceKey::new(ResourceKind::ServiceAccount, "shop", "api");

    let result = engine(&store)
        .run_pass(&application(json!({ "image": "ghcr.io/shop/api:1.0.0" })))
        .await;
    assert!(!result.outcome.is_success());
    assert!(writes_to(&store.mutations(), &account).is_empty());

    let live = store.object(&account).unwrap();
    assert_eq!(live.data["automountServiceAccountToken"], true);
    let owners = live.metadata.owner_references.unwrap();
    assert_eq!(owners.len(), 1);
    assert_eq!(owners[0].uid, "someone-else");
}

#[tokio::test]
async fn unserved_api_does_not_fail_discovery() {
    let store = Arc::new(MemoryStore::new());
    store.mark_unserved(ResourceKind::ServiceMonitor);
    store.mark_unserved(ResourceKind::PeerAuthentication);
    let engine = engine(&store);

    let result = engine
        .run_pass(&application(json!({ "image": "ghcr.io/shop/api:1.0.0" })))
        .await;
    assert!(result.outcome.is_success(), "{:?}", result.outcome);
}

#[tokio::test]
async fn finalize_removes_gateway_namespace_certificates() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine(&store);
    let owner = application(json!({
        "image": "ghcr.io/shop/api:1.0.0",
        "ingresses": ["api.shop.example.com", "www.shop.example.com"],
    }));
    engine.run_pass(&owner).await;

    let certificates = store
        .keys()
        .into_iter()
        .filter(|k| k.kind == ResourceKind::Certificate)
        .count();
    assert_eq!(certificates, 2);

    let removed = engine.finalize(&owner).await.unwrap();
    assert_eq!(removed, 2);
    assert!(store.keys().iter().all(|k| k.kind != ResourceKind::Certificate));
    // Namespaced children are left to garbage collection
    assert!(store
        .keys()
        .contains(&ResourceKey::new(ResourceKind::Deployment, "shop", "api")));
}

#[tokio::test]
async fn namespace_gets_default_policies_and_sidecar() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine(&store);
    let mut namespace = Namespace::default();
    namespace.metadata.name = Some("shop".to_string());
    namespace.metadata.uid = Some("uid-ns".to_string());
    let owner = ManagedObject::Namespace(namespace);

    let result = engine.run_pass(&owner).await;
    assert!(result.outcome.is_success());

    let keys = store.keys();
    for (kind, name) in [
        (ResourceKind::NetworkPolicy, "default-deny"),
        (ResourceKind::NetworkPolicy, "allow-dns-egress"),
        (ResourceKind::Sidecar, "sidecar"),
    ] {
        assert!(keys.contains(&ResourceKey::new(kind, "shop", name)), "{kind}/{name}");
    }
}
