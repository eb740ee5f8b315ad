//! NetworkPolicies
//!
//! Namespaces get a default deny plus DNS egress. Workloads then open exactly
//! what their access policy names, and the gateway namespace is let in to
//! anything exposed through an ingress or a Routing.

use std::collections::BTreeMap;

use k8s_openapi::api::networking::v1::{
    IPBlock, NetworkPolicy, NetworkPolicyEgressRule, NetworkPolicyIngressRule, NetworkPolicyPeer,
    NetworkPolicyPort, NetworkPolicySpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::ObjectMeta;

use crate::controller::context::ReconciliationContext;
use crate::controller::kinds::ResourceKind;
use crate::controller::managed::ManagedKind;
use crate::controller::registry::Generator;
use crate::crd::{AccessPolicy, InternalRule};
use crate::error::GenerationError;

const NAMESPACE_NAME_LABEL: &str = "kubernetes.io/metadata.name";

pub(crate) fn generator() -> Generator {
    Generator::new("network_policy")
        .register(ManagedKind::Application, for_application)
        .register(ManagedKind::Job, for_job)
        .register(ManagedKind::Routing, for_routing)
        .register(ManagedKind::Namespace, for_namespace)
}

fn for_application(ctx: &mut ReconciliationContext<'_>) -> Result<(), GenerationError> {
    let app = super::application(ctx)?;
    let gateway_port = (!app.spec.ingresses.is_empty()).then_some(app.spec.port);
    let policy = workload_policy(ctx, app.spec.access_policy.as_ref(), gateway_port);
    ctx.add_typed(ResourceKind::NetworkPolicy, &policy)
}

fn for_job(ctx: &mut ReconciliationContext<'_>) -> Result<(), GenerationError> {
    let job = super::tide_job(ctx)?;
    match &job.spec.access_policy {
        None => Ok(()),
        Some(access) => {
            let policy = workload_policy(ctx, Some(access), None);
            ctx.add_typed(ResourceKind::NetworkPolicy, &policy)
        }
    }
}

/// One policy per target application letting the gateway reach its routes
fn for_routing(ctx: &mut ReconciliationContext<'_>) -> Result<(), GenerationError> {
    let routing = super::routing(ctx)?;
    let owner = ctx.owner().name();

    let mut ports_by_app: BTreeMap<&str, Vec<i32>> = BTreeMap::new();
    for route in &routing.spec.routes {
        let ports = ports_by_app.entry(route.target_app.as_str()).or_default();
        if !ports.contains(&route.port) {
            ports.push(route.port);
        }
    }

    for (app, ports) in ports_by_app {
        if app.is_empty() {
            return Err(GenerationError::new("route without a target application"));
        }
        let policy = NetworkPolicy {
            metadata: ObjectMeta {
                name: Some(format!("{owner}-{app}-istio-ingress")),
                ..Default::default()
            },
            spec: Some(NetworkPolicySpec {
                pod_selector: LabelSelector {
                    match_labels: Some(super::app_labels(app)),
                    ..Default::default()
                },
                policy_types: Some(vec!["Ingress".to_string()]),
                ingress: Some(vec![gateway_ingress(ctx, &ports)]),
                ..Default::default()
            }),
            ..Default::default()
        };
        ctx.add_typed(ResourceKind::NetworkPolicy, &policy)?;
    }
    Ok(())
}

fn for_namespace(ctx: &mut ReconciliationContext<'_>) -> Result<(), GenerationError> {
    let default_deny = NetworkPolicy {
        metadata: ObjectMeta {
            name: Some("default-deny".to_string()),
            ..Default::default()
        },
        spec: Some(NetworkPolicySpec {
            pod_selector: LabelSelector::default(),
            policy_types: Some(vec!["Ingress".to_string(), "Egress".to_string()]),
            ..Default::default()
        }),
        ..Default::default()
    };
    ctx.add_typed(ResourceKind::NetworkPolicy, &default_deny)?;

    let dns = NetworkPolicy {
        metadata: ObjectMeta {
            name: Some("allow-dns-egress".to_string()),
            ..Default::default()
        },
        spec: Some(NetworkPolicySpec {
            pod_selector: LabelSelector::default(),
            policy_types: Some(vec!["Egress".to_string()]),
            egress: Some(vec![NetworkPolicyEgressRule {
                to: Some(vec![NetworkPolicyPeer {
                    namespace_selector: Some(namespace_selector("kube-system")),
                    pod_selector: Some(LabelSelector {
                        match_labels: Some(BTreeMap::from([(
                            "k8s-app".to_string(),
                            "kube-dns".to_string(),
                        )])),
                        ..Default::default()
                    }),
                    ..Default::default()
                }]),
                ports: Some(vec![port(53, "UDP"), port(53, "TCP")]),
            }]),
            ..Default::default()
        }),
        ..Default::default()
    };
    ctx.add_typed(ResourceKind::NetworkPolicy, &dns)
}

fn workload_policy(
    ctx: &ReconciliationContext<'_>,
    access: Option<&AccessPolicy>,
    gateway_port: Option<i32>,
) -> NetworkPolicy {
    let name = ctx.owner().name();

    let mut ingress: Vec<NetworkPolicyIngressRule> = access
        .and_then(|a| a.inbound.as_ref())
        .map(|inbound| {
            inbound
                .rules
                .iter()
                .map(|rule| NetworkPolicyIngressRule {
                    from: Some(vec![internal_peer(rule)]),
                    ports: None,
                })
                .collect()
        })
        .unwrap_or_default();
    if let Some(port) = gateway_port {
        ingress.push(gateway_ingress(ctx, &[port]));
    }

    let mut egress = Vec::new();
    if let Some(outbound) = access.and_then(|a| a.outbound.as_ref()) {
        for rule in &outbound.rules {
            egress.push(NetworkPolicyEgressRule {
                to: Some(vec![internal_peer(rule)]),
                ports: None,
            });
        }
        for rule in &outbound.external {
            let cidr = rule
                .ip
                .as_ref()
                .map(|ip| format!("{ip}/32"))
                .unwrap_or_else(|| "0.0.0.0/0".to_string());
            egress.push(NetworkPolicyEgressRule {
                to: Some(vec![NetworkPolicyPeer {
                    ip_block: Some(IPBlock {
                        cidr,
                        except: None,
                    }),
                    ..Default::default()
                }]),
                ports: Some(rule.ports.iter().map(|p| port(p.port, "TCP")).collect()),
            });
        }
    }

    let mut policy_types = vec!["Ingress".to_string()];
    if !egress.is_empty() {
        policy_types.push("Egress".to_string());
    }

    NetworkPolicy {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            ..Default::default()
        },
        spec: Some(NetworkPolicySpec {
            pod_selector: LabelSelector {
                match_labels: Some(super::app_labels(&name)),
                ..Default::default()
            },
            policy_types: Some(policy_types),
            ingress: (!ingress.is_empty()).then_some(ingress),
            egress: (!egress.is_empty()).then_some(egress),
        }),
        ..Default::default()
    }
}

/// Peer for another application, in the owner's namespace unless one is named
fn internal_peer(rule: &InternalRule) -> NetworkPolicyPeer {
    NetworkPolicyPeer {
        pod_selector: Some(LabelSelector {
            match_labels: Some(super::app_labels(&rule.application)),
            ..Default::default()
        }),
        namespace_selector: rule.namespace.as_deref().map(namespace_selector),
        ..Default::default()
    }
}

fn gateway_ingress(ctx: &ReconciliationContext<'_>, ports: &[i32]) -> NetworkPolicyIngressRule {
    NetworkPolicyIngressRule {
        from: Some(vec![NetworkPolicyPeer {
            namespace_selector: Some(namespace_selector(&ctx.config().gateway_namespace)),
            ..Default::default()
        }]),
        ports: Some(ports.iter().map(|p| port(*p, "TCP")).collect()),
    }
}

fn namespace_selector(namespace: &str) -> LabelSelector {
    LabelSelector {
        match_labels: Some(BTreeMap::from([(
            NAMESPACE_NAME_LABEL.to_string(),
            namespace.to_string(),
        )])),
        ..Default::default()
    }
}

fn port(number: i32, protocol: &str) -> NetworkPolicyPort {
    NetworkPolicyPort {
        port: Some(IntOrString::Int(number)),
        protocol: Some(protocol.to_string()),
        ..Default::default()
    }
}
