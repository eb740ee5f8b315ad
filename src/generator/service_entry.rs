//! Istio ServiceEntries registering the external hosts a workload may call

use serde_json::{json, Value};

use crate::controller::context::ReconciliationContext;
use crate::controller::kinds::ResourceKind;
use crate::controller::managed::ManagedKind;
use crate::controller::registry::Generator;
use crate::crd::ExternalRule;
use crate::error::GenerationError;

pub(crate) fn generator() -> Generator {
    Generator::new("service_entry")
        .register(ManagedKind::Application, for_application)
        .register(ManagedKind::Job, for_job)
}

fn for_application(ctx: &mut ReconciliationContext<'_>) -> Result<(), GenerationError> {
    let app = super::application(ctx)?;
    let rules = app
        .spec
        .access_policy
        .as_ref()
        .map(|p| p.external_rules())
        .unwrap_or_default();
    add_entries(ctx, rules)
}

fn for_job(ctx: &mut ReconciliationContext<'_>) -> Result<(), GenerationError> {
    let job = super::tide_job(ctx)?;
    let rules = job
        .spec
        .access_policy
        .as_ref()
        .map(|p| p.external_rules())
        .unwrap_or_default();
    add_entries(ctx, rules)
}

fn add_entries(
    ctx: &mut ReconciliationContext<'_>,
    rules: &[ExternalRule],
) -> Result<(), GenerationError> {
    let owner = ctx.owner().name();
    for rule in rules {
        super::check_hostname(&rule.host)?;
        let name = format!("{owner}-egress-{}", super::host_suffix(&rule.host));
        ctx.add_custom(ResourceKind::ServiceEntry, &name, entry_spec(rule))?;
    }
    Ok(())
}

fn entry_spec(rule: &ExternalRule) -> Value {
    let ports: Vec<Value> = rule
        .ports
        .iter()
        .map(|p| json!({ "name": p.name, "number": p.port, "protocol": p.protocol }))
        .collect();

    let mut spec = json!({
        "hosts": [rule.host],
        "exportTo": ["."],
        "location": "MESH_EXTERNAL",
        "ports": ports,
        "resolution": "DNS",
    });
    if let Some(ip) = &rule.ip {
        spec["resolution"] = json!("STATIC");
        spec["addresses"] = json!([ip]);
        spec["endpoints"] = json!([{ "address": ip }]);
    }
    json!({ "spec": spec })
}
