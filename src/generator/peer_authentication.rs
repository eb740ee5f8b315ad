//! Istio PeerAuthentication enforcing mutual TLS for an Application's pods

use serde_json::json;

use crate::controller::context::ReconciliationContext;
use crate::controller::kinds::ResourceKind;
use crate::controller::managed::ManagedKind;
use crate::controller::registry::Generator;
use crate::error::GenerationError;

pub(crate) fn generator() -> Generator {
    Generator::new("peer_authentication").register(ManagedKind::Application, generate)
}

fn generate(ctx: &mut ReconciliationContext<'_>) -> Result<(), GenerationError> {
    let name = ctx.owner().name();
    let spec = json!({
        "spec": {
            "selector": { "matchLabels": super::app_labels(&name) },
            "mtls": { "mode": "STRICT" },
        }
    });
    ctx.add_custom(ResourceKind::PeerAuthentication, &name, spec)
}
