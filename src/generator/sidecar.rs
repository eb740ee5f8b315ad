//! Namespace-wide Istio Sidecar restricting egress to registered services

use serde_json::json;

use crate::controller::context::ReconciliationContext;
use crate::controller::kinds::ResourceKind;
use crate::controller::managed::ManagedKind;
use crate::controller::registry::Generator;
use crate::error::GenerationError;

pub(crate) fn generator() -> Generator {
    Generator::new("sidecar").register(ManagedKind::Namespace, generate)
}

fn generate(ctx: &mut ReconciliationContext<'_>) -> Result<(), GenerationError> {
    let spec = json!({
        "spec": {
            "outboundTrafficPolicy": { "mode": "REGISTRY_ONLY" },
        }
    });
    ctx.add_custom(ResourceKind::Sidecar, "sidecar", spec)
}
