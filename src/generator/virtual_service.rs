//! Istio VirtualServices routing gateway traffic to workloads

use serde_json::{json, Value};

use crate::controller::context::ReconciliationContext;
use crate::controller::kinds::ResourceKind;
use crate::controller::managed::ManagedKind;
use crate::controller::registry::Generator;
use crate::error::GenerationError;

pub(crate) fn generator() -> Generator {
    Generator::new("virtual_service")
        .register(ManagedKind::Application, for_application)
        .register(ManagedKind::Routing, for_routing)
}

fn gateways(ctx: &ReconciliationContext<'_>) -> Vec<String> {
    let owner = ctx.owner();
    super::ingress_hosts(owner)
        .iter()
        .map(|host| super::gateway_name(owner, host))
        .collect()
}

fn for_application(ctx: &mut ReconciliationContext<'_>) -> Result<(), GenerationError> {
    let app = super::application(ctx)?;
    if app.spec.ingresses.is_empty() {
        return Ok(());
    }

    let name = ctx.owner().name();
    let spec = json!({
        "spec": {
            "exportTo": ["."],
            "gateways": gateways(ctx),
            "hosts": app.spec.ingresses,
            "http": [{
                "name": "default-app-route",
                "route": [{
                    "destination": {
                        "host": name,
                        "port": { "number": app.spec.port },
                    }
                }],
            }],
        }
    });
    ctx.add_custom(ResourceKind::VirtualService, &format!("{name}-ingress"), spec)
}

fn for_routing(ctx: &mut ReconciliationContext<'_>) -> Result<(), GenerationError> {
    let routing = super::routing(ctx)?;
    if routing.spec.routes.is_empty() {
        return Ok(());
    }

    // Longest prefix first so the most specific route wins
    let mut routes: Vec<_> = routing.spec.routes.iter().collect();
    routes.sort_by(|a, b| {
        b.path_prefix
            .len()
            .cmp(&a.path_prefix.len())
            .then_with(|| a.path_prefix.cmp(&b.path_prefix))
    });

    let http: Vec<Value> = routes
        .into_iter()
        .map(|route| {
            let mut entry = json!({
                "name": route.target_app,
                "match": [{ "port": 443, "uri": { "prefix": route.path_prefix } }],
                "route": [{
                    "destination": {
                        "host": route.target_app,
                        "port": { "number": route.port },
                    }
                }],
            });
            if route.rewrite_uri {
                entry["rewrite"] = json!({ "uri": "/" });
            }
            entry
        })
        .collect();

    let name = format!("{}-routing-ingress", ctx.owner().name());
    let spec = json!({
        "spec": {
            "exportTo": ["."],
            "gateways": gateways(ctx),
            "hosts": [routing.spec.hostname],
            "http": http,
        }
    });
    ctx.add_custom(ResourceKind::VirtualService, &name, spec)
}
