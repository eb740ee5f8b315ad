//! Controllers for every managed kind
//!
//! Each kind gets its own `kube::runtime::Controller`. They share one
//! `ControllerState` and funnel into the same `ReconcileEngine`, so the
//! reconcile logic below is written once and instantiated per kind.

use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{Event, Namespace, Service, ServiceAccount};
use k8s_openapi::api::networking::v1::NetworkPolicy;
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use kube::{
    api::{Api, ListParams, Patch, PatchParams, PostParams},
    client::Client,
    runtime::{
        controller::{Action, Controller},
        finalizer::{finalizer, Event as FinalizerEvent},
        predicates, reflector, watcher, WatchStreamExt,
    },
    Resource, ResourceExt,
};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info, instrument, warn};

use crate::config::ControllerConfig;
use crate::crd::SyncStatus;
use crate::error::{Error, Result};

use super::engine::ReconcileEngine;
use super::finalizers::{requires_finalizer, TIDEWAY_FINALIZER};
use super::managed::{Managed, ManagedKind, ManagedObject, MANAGED_BY_LABEL, MANAGED_BY_VALUE};
use super::status::{begin_pass, reduce};
use super::validity;

const FIELD_MANAGER: &str = "tideway-operator";

/// Requeue interval for replicas that do not hold the leader lease
const STANDBY_REQUEUE: Duration = Duration::from_secs(15);

/// Shared state for the controllers
pub struct ControllerState {
    pub client: Client,
    pub engine: ReconcileEngine,
    pub is_leader: Arc<AtomicBool>,
}

impl ControllerState {
    fn config(&self) -> &ControllerConfig {
        self.engine.config()
    }
}

/// Run one controller per managed kind until shutdown
pub async fn run_controllers(state: Arc<ControllerState>) -> Result<()> {
    info!("Starting Tideway controllers");

    let (applications, jobs, routings, namespaces) = futures::join!(
        run_kind::<crate::crd::Application>(state.clone()),
        run_kind::<crate::crd::TideJob>(state.clone()),
        run_kind::<crate::crd::Routing>(state.clone()),
        run_namespaces(state),
    );
    applications?;
    jobs?;
    routings?;
    namespaces
}

async fn run_kind<K: Managed>(state: Arc<ControllerState>) -> Result<()> {
    let client = state.client.clone();
    let api: Api<K> = Api::all(client.clone());

    // Verify CRD exists
    if let Err(e) = api.list(&ListParams::default().limit(1)).await {
        error!(kind = %K::KIND, "CRD not found. Please install the CRDs first: {:?}", e);
        return Err(Error::ConfigError(format!("{} CRD not installed", K::KIND)));
    }

    info!(kind = %K::KIND, "Starting controller");
    let (reader, writer) = reflector::store();
    let stream = reflector(writer, watcher(api, watcher::Config::default()))
        .default_backoff()
        .applied_objects()
        .predicate_filter(predicates::generation);

    watch_children(Controller::for_stream(stream, reader), &client, K::KIND)
        .shutdown_on_signal()
        .run(reconcile::<K>, error_policy::<K>, state)
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => debug!("Reconciled {}", obj),
                Err(e) => warn!("Reconcile error: {:?}", e),
            }
        })
        .await;
    Ok(())
}

async fn run_namespaces(state: Arc<ControllerState>) -> Result<()> {
    let client = state.client.clone();
    let api: Api<Namespace> = Api::all(client.clone());

    info!(kind = %ManagedKind::Namespace, "Starting controller");
    let (reader, writer) = reflector::store();
    let stream = reflector(writer, watcher(api, watcher::Config::default()))
        .default_backoff()
        .applied_objects()
        .predicate_filter(predicates::generation);

    watch_children(
        Controller::for_stream(stream, reader),
        &client,
        ManagedKind::Namespace,
    )
    .shutdown_on_signal()
    .run(reconcile_namespace, error_policy::<Namespace>, state)
    .for_each(|res| async move {
        if let Err(e) = res {
            warn!("Reconcile error: {:?}", e);
        }
    })
    .await;
    Ok(())
}

/// Register watches on the built-in child kinds an owner produces
///
/// Only operator-labelled children are watched. Custom resource children
/// (Istio, cert-manager, Prometheus operator) are picked up by the periodic
/// requeue instead, since their APIs may not be served.
fn watch_children<K>(controller: Controller<K>, client: &Client, kind: ManagedKind) -> Controller<K>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    let config =
        watcher::Config::default().labels(&format!("{MANAGED_BY_LABEL}={MANAGED_BY_VALUE}"));
    let controller =
        controller.owns::<NetworkPolicy>(Api::all(client.clone()), config.clone());

    match kind {
        ManagedKind::Application => controller
            .owns::<ServiceAccount>(Api::all(client.clone()), config.clone())
            .owns::<Service>(Api::all(client.clone()), config.clone())
            .owns::<Deployment>(Api::all(client.clone()), config.clone())
            .owns::<HorizontalPodAutoscaler>(Api::all(client.clone()), config.clone())
            .owns::<PodDisruptionBudget>(Api::all(client.clone()), config),
        ManagedKind::Job => controller
            .owns::<ServiceAccount>(Api::all(client.clone()), config.clone())
            .owns::<Job>(Api::all(client.clone()), config.clone())
            .owns::<CronJob>(Api::all(client.clone()), config),
        ManagedKind::Routing | ManagedKind::Namespace => controller,
    }
}

/// The main reconciliation function
///
/// Called when the owner's generation changes, when a watched child changes
/// and when the requeue timer expires.
#[instrument(skip(obj, ctx), fields(kind = %K::KIND, name = %obj.name_any(), namespace = obj.namespace()))]
async fn reconcile<K: Managed>(obj: Arc<K>, ctx: Arc<ControllerState>) -> Result<Action> {
    if !ctx.is_leader.load(Ordering::Relaxed) {
        debug!("Not the leader, skipping");
        return Ok(Action::requeue(STANDBY_REQUEUE));
    }

    let start = Instant::now();
    let namespace = obj
        .namespace()
        .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
    let api: Api<K> = Api::namespaced(ctx.client.clone(), &namespace);

    let result = if requires_finalizer(K::KIND) {
        finalizer(&api, TIDEWAY_FINALIZER, obj, |event| async {
            match event {
                FinalizerEvent::Apply(owner) => apply(&api, &ctx, owner.as_ref()).await,
                FinalizerEvent::Cleanup(owner) => cleanup(&ctx, owner.as_ref()).await,
            }
        })
        .await
        .map_err(Error::from)
    } else {
        apply(&api, &ctx, obj.as_ref()).await
    };

    #[cfg(feature = "metrics")]
    super::metrics::observe_reconcile_duration_seconds(
        &K::KIND.label_value(),
        start.elapsed().as_secs_f64(),
    );
    #[cfg(not(feature = "metrics"))]
    let _ = start;

    result
}

/// Run a pass for a status-bearing owner and persist the outcome
async fn apply<K: Managed>(api: &Api<K>, ctx: &ControllerState, obj: &K) -> Result<Action> {
    let owner = obj.to_managed();
    let name = owner.name();
    let generation = owner.generation();
    let previous = owner.status().cloned();

    let started = begin_pass(
        previous.as_ref(),
        generation,
        &chrono::Utc::now().to_rfc3339(),
    );
    if let Some(status) = &started {
        patch_status(api, &name, status).await?;
    }

    let pass = ctx.engine.run_pass(&owner).await;
    let validity = validity::check(&owner);
    let next = reduce(
        previous.as_ref(),
        &pass.outcome,
        &validity,
        generation,
        &chrono::Utc::now().to_rfc3339(),
    );
    if needs_status_write(previous.as_ref(), started.is_some(), &next) {
        patch_status(api, &name, &next).await?;
    }

    if !validity.is_valid() {
        warn!(violations = %validity.message(), "Access policies are invalid");
    }

    match pass.error {
        None => Ok(Action::requeue(ctx.config().requeue_after)),
        Some(e) => {
            let (_, message) = pass.outcome.summary();
            let reason = pass
                .outcome
                .failed_phase()
                .map(|p| format!("{p}Failed"))
                .unwrap_or_else(|| "ReconcileFailed".to_string());
            if let Err(event_err) =
                emit_event(&ctx.client, obj, &owner.scope_namespace(), &reason, &message).await
            {
                warn!("Failed to emit event: {:?}", event_err);
            }
            Err(e)
        }
    }
}

/// Remove children the cluster cannot garbage collect on its own
async fn cleanup<K: Managed>(ctx: &ControllerState, obj: &K) -> Result<Action> {
    let owner = obj.to_managed();
    info!("Cleaning up {}", owner.identity());
    let removed = ctx.engine.finalize(&owner).await?;
    info!(removed, "Cleanup complete for {}", owner.identity());
    Ok(Action::await_change())
}

#[instrument(skip(obj, ctx), fields(kind = %ManagedKind::Namespace, name = %obj.name_any()))]
async fn reconcile_namespace(obj: Arc<Namespace>, ctx: Arc<ControllerState>) -> Result<Action> {
    if !ctx.is_leader.load(Ordering::Relaxed) {
        return Ok(Action::requeue(STANDBY_REQUEUE));
    }
    if skips_namespace(&obj, ctx.config()) {
        return Ok(Action::await_change());
    }

    let start = Instant::now();
    let owner = ManagedObject::Namespace(obj.as_ref().clone());
    let pass = ctx.engine.run_pass(&owner).await;

    #[cfg(feature = "metrics")]
    super::metrics::observe_reconcile_duration_seconds(
        &ManagedKind::Namespace.label_value(),
        start.elapsed().as_secs_f64(),
    );
    #[cfg(not(feature = "metrics"))]
    let _ = start;

    match pass.error {
        None => Ok(Action::requeue(ctx.config().requeue_after)),
        Some(e) => {
            let (_, message) = pass.outcome.summary();
            if let Err(event_err) = emit_event(
                &ctx.client,
                obj.as_ref(),
                &owner.scope_namespace(),
                "ReconcileFailed",
                &message,
            )
            .await
            {
                warn!("Failed to emit event: {:?}", event_err);
            }
            Err(e)
        }
    }
}

/// Namespaces that never receive default plumbing
///
/// System namespaces, the gateway namespace and namespaces being torn down
/// are left alone.
pub fn skips_namespace(ns: &Namespace, config: &ControllerConfig) -> bool {
    let name = ns.name_any();
    name.starts_with("kube-")
        || name == "istio-system"
        || name == config.gateway_namespace
        || ns.metadata.deletion_timestamp.is_some()
}

/// Whether the reduced status must be written back
///
/// A `PROGRESSING` write always needs a closing write. Otherwise only a
/// changed document is written, so steady-state passes touch nothing.
pub fn needs_status_write(previous: Option<&SyncStatus>, started: bool, next: &SyncStatus) -> bool {
    started || previous != Some(next)
}

/// Requeue delay after a failed pass
pub fn retry_delay(error: &Error) -> Duration {
    if error.is_retriable() {
        Duration::from_secs(15)
    } else {
        Duration::from_secs(60)
    }
}

/// Merge patch body that replaces the whole status document
///
/// Optional fields that are unset are sent as `null` so a merge patch clears
/// them on the server instead of keeping the old value.
pub fn status_patch(status: &SyncStatus) -> Result<serde_json::Value> {
    let mut body = serde_json::to_value(status)?;
    if let Some(fields) = body.as_object_mut() {
        for optional in ["accessPolicies", "observedGeneration"] {
            fields.entry(optional).or_insert(serde_json::Value::Null);
        }
    }
    Ok(serde_json::json!({ "status": body }))
}

async fn patch_status<K: Managed>(api: &Api<K>, name: &str, status: &SyncStatus) -> Result<()> {
    let patch = status_patch(status)?;
    api.patch_status(
        name,
        &PatchParams::apply(FIELD_MANAGER),
        &Patch::Merge(&patch),
    )
    .await
    .map_err(Error::KubeError)?;
    Ok(())
}

/// Helper to emit a warning Event on the owner
async fn emit_event<K: Resource<DynamicType = ()>>(
    client: &Client,
    obj: &K,
    namespace: &str,
    reason: &str,
    message: &str,
) -> Result<()> {
    let events: Api<Event> = Api::namespaced(client.clone(), namespace);

    let time = chrono::Utc::now();
    let event = Event {
        metadata: kube::api::ObjectMeta {
            generate_name: Some(format!("{}-event-", obj.meta().name.clone().unwrap_or_default())),
            ..Default::default()
        },
        type_: Some("Warning".to_string()),
        reason: Some(reason.to_string()),
        message: Some(message.to_string()),
        involved_object: obj.object_ref(&()),
        first_timestamp: Some(k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(time)),
        last_timestamp: Some(k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(time)),
        count: Some(1),
        ..Default::default()
    };

    events
        .create(&PostParams::default(), &event)
        .await
        .map_err(Error::KubeError)?;
    Ok(())
}

/// Error policy for the controller
fn error_policy<K: Resource<DynamicType = ()>>(
    obj: Arc<K>,
    error: &Error,
    _ctx: Arc<ControllerState>,
) -> Action {
    let kind = K::kind(&()).to_lowercase();
    error!(
        "Reconciliation error for {} {}: {:?}",
        kind,
        obj.meta().name.clone().unwrap_or_default(),
        error
    );

    #[cfg(feature = "metrics")]
    super::metrics::inc_reconcile_error(&kind, error.metric_label());

    Action::requeue(retry_delay(error))
}
