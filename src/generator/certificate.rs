//! cert-manager Certificates for exposed hostnames
//!
//! Certificates live in the gateway namespace next to the ingress gateway
//! that mounts their secret, so they are named after the owner's namespace
//! too and are cleaned up through the finalizer rather than owner references.

use serde_json::json;

use crate::controller::context::ReconciliationContext;
use crate::controller::kinds::ResourceKind;
use crate::controller::managed::ManagedKind;
use crate::controller::registry::Generator;
use crate::error::GenerationError;

pub(crate) fn generator() -> Generator {
    Generator::new("certificate")
        .register(ManagedKind::Application, generate)
        .register(ManagedKind::Routing, generate)
}

fn generate(ctx: &mut ReconciliationContext<'_>) -> Result<(), GenerationError> {
    let owner = ctx.owner();
    let issuer = ctx.config().cluster_issuer.clone();

    for host in super::ingress_hosts(owner) {
        super::check_hostname(&host)?;
        let name = super::certificate_name(owner, &host);
        let spec = json!({
            "spec": {
                "secretName": name,
                "dnsNames": [host],
                "issuerRef": {
                    "kind": "ClusterIssuer",
                    "name": issuer,
                },
            }
        });
        ctx.add_custom(ResourceKind::Certificate, &name, spec)?;
    }
    Ok(())
}
