//! Child resource generators
//!
//! One module per resource family. Each module exposes a `generator()`
//! returning its dispatch table; `standard_registry` wires every family into
//! the per-kind pipelines the operator runs.

mod certificate;
mod config_map;
mod deployment;
mod gateway;
mod horizontal_pod_autoscaler;
mod job;
mod network_policy;
mod peer_authentication;
mod pod;
mod pod_disruption_budget;
mod service;
mod service_account;
mod service_entry;
mod service_monitor;
mod sidecar;
mod virtual_service;

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

use crate::controller::context::ReconciliationContext;
use crate::controller::managed::{label_safe, ManagedKind, ManagedObject};
use crate::controller::registry::GeneratorRegistry;
use crate::crd::{Application, Routing, TideJob};
use crate::error::GenerationError;

/// Label selecting the pods of one workload
pub const APP_LABEL: &str = "app";

/// Build the registry with every family and the default pipelines
pub fn standard_registry() -> GeneratorRegistry {
    GeneratorRegistry::new()
        .with_generator(service_account::generator())
        .with_generator(config_map::generator())
        .with_generator(network_policy::generator())
        .with_generator(peer_authentication::generator())
        .with_generator(service_entry::generator())
        .with_generator(service::generator())
        .with_generator(deployment::generator())
        .with_generator(horizontal_pod_autoscaler::generator())
        .with_generator(pod_disruption_budget::generator())
        .with_generator(certificate::generator())
        .with_generator(gateway::generator())
        .with_generator(virtual_service::generator())
        .with_generator(service_monitor::generator())
        .with_generator(job::generator())
        .with_generator(sidecar::generator())
        .with_pipeline(
            ManagedKind::Application,
            &[
                "service_account",
                "config_map",
                "network_policy",
                "peer_authentication",
                "service_entry",
                "service",
                "deployment",
                "horizontal_pod_autoscaler",
                "pod_disruption_budget",
                "certificate",
                "gateway",
                "virtual_service",
                "service_monitor",
            ],
        )
        .with_pipeline(
            ManagedKind::Job,
            &[
                "service_account",
                "config_map",
                "network_policy",
                "service_entry",
                "job",
            ],
        )
        .with_pipeline(
            ManagedKind::Routing,
            &["certificate", "gateway", "virtual_service", "network_policy"],
        )
        .with_pipeline(ManagedKind::Namespace, &["network_policy", "sidecar"])
}

fn mismatch(expected: &str, owner: &ManagedObject) -> GenerationError {
    GenerationError::new(format!("expected {expected}, got {}", owner.kind()))
}

pub(crate) fn application<'a>(
    ctx: &ReconciliationContext<'a>,
) -> Result<&'a Application, GenerationError> {
    match ctx.owner() {
        ManagedObject::Application(app) => Ok(app),
        other => Err(mismatch("Application", other)),
    }
}

pub(crate) fn tide_job<'a>(ctx: &ReconciliationContext<'a>) -> Result<&'a TideJob, GenerationError> {
    match ctx.owner() {
        ManagedObject::Job(job) => Ok(job),
        other => Err(mismatch("TideJob", other)),
    }
}

pub(crate) fn routing<'a>(ctx: &ReconciliationContext<'a>) -> Result<&'a Routing, GenerationError> {
    match ctx.owner() {
        ManagedObject::Routing(routing) => Ok(routing),
        other => Err(mismatch("Routing", other)),
    }
}

/// Pod selector labels for a workload
pub(crate) fn app_labels(name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(APP_LABEL.to_string(), label_safe(name))])
}

/// Short stable suffix derived from a hostname
///
/// Hostnames may hold characters that are invalid in object names, so
/// per-host children are named by digest instead.
pub(crate) fn host_suffix(host: &str) -> String {
    let digest = Sha256::digest(host.as_bytes());
    hex::encode(digest)[..8].to_string()
}

/// Reject hostnames that cannot be served by the gateway
pub(crate) fn check_hostname(host: &str) -> Result<(), GenerationError> {
    if host.trim().is_empty() {
        return Err(GenerationError::new("hostname must not be empty"));
    }
    if host.chars().any(|c| c.is_whitespace() || c == '/' || c == ':') {
        return Err(GenerationError::new(format!(
            "hostname {host:?} is not a valid DNS name"
        )));
    }
    Ok(())
}

/// Hostnames an owner exposes through the shared gateway
pub(crate) fn ingress_hosts(owner: &ManagedObject) -> Vec<String> {
    match owner {
        ManagedObject::Application(app) => app.spec.ingresses.clone(),
        ManagedObject::Routing(routing) => vec![routing.spec.hostname.clone()],
        _ => Vec::new(),
    }
}

/// Whether the owner redirects plain HTTP to HTTPS
pub(crate) fn redirects_to_https(owner: &ManagedObject) -> bool {
    match owner {
        ManagedObject::Application(app) => app.spec.redirect_to_https,
        ManagedObject::Routing(routing) => routing.spec.redirect_to_https,
        _ => false,
    }
}

/// Name of the certificate and TLS secret for one exposed host
pub(crate) fn certificate_name(owner: &ManagedObject, host: &str) -> String {
    format!(
        "{}-{}-ingress-{}",
        owner.scope_namespace(),
        owner.name(),
        host_suffix(host)
    )
}

/// Name of the gateway serving one exposed host
pub(crate) fn gateway_name(owner: &ManagedObject, host: &str) -> String {
    format!("{}-ingress-{}", owner.name(), host_suffix(host))
}
