//! Istio Gateways binding exposed hostnames to the shared ingress gateway

use serde_json::json;

use crate::controller::context::ReconciliationContext;
use crate::controller::kinds::ResourceKind;
use crate::controller::managed::ManagedKind;
use crate::controller::registry::Generator;
use crate::error::GenerationError;

/// Pod label of the shared Istio ingress gateway
pub const INGRESS_GATEWAY_SELECTOR: &str = "istio-ingress-gateway";

pub(crate) fn generator() -> Generator {
    Generator::new("gateway")
        .register(ManagedKind::Application, generate)
        .register(ManagedKind::Routing, generate)
}

fn generate(ctx: &mut ReconciliationContext<'_>) -> Result<(), GenerationError> {
    let owner = ctx.owner();
    let redirect = super::redirects_to_https(owner);

    for host in super::ingress_hosts(owner) {
        super::check_hostname(&host)?;

        let mut http = json!({
            "hosts": [host],
            "port": { "name": "http", "number": 80, "protocol": "HTTP" },
        });
        if redirect {
            http["tls"] = json!({ "httpsRedirect": true });
        }
        let https = json!({
            "hosts": [host],
            "port": { "name": "https", "number": 443, "protocol": "HTTPS" },
            "tls": {
                "mode": "SIMPLE",
                "credentialName": super::certificate_name(owner, &host),
            },
        });

        let spec = json!({
            "spec": {
                "selector": { "app": INGRESS_GATEWAY_SELECTOR },
                "servers": [http, https],
            }
        });
        ctx.add_custom(ResourceKind::Gateway, &super::gateway_name(owner, &host), spec)?;
    }
    Ok(())
}
