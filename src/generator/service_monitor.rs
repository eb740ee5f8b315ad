//! Prometheus operator ServiceMonitor for Applications exposing metrics

use serde_json::json;

use crate::controller::context::ReconciliationContext;
use crate::controller::kinds::ResourceKind;
use crate::controller::managed::ManagedKind;
use crate::controller::registry::Generator;
use crate::error::GenerationError;

pub(crate) fn generator() -> Generator {
    Generator::new("service_monitor").register(ManagedKind::Application, generate)
}

fn generate(ctx: &mut ReconciliationContext<'_>) -> Result<(), GenerationError> {
    let app = super::application(ctx)?;
    let Some(prometheus) = &app.spec.prometheus else {
        return Ok(());
    };

    let name = ctx.owner().name();
    let port = if prometheus.port == app.spec.port {
        "http"
    } else {
        "metrics"
    };
    let spec = json!({
        "spec": {
            "selector": { "matchLabels": super::app_labels(&name) },
            "namespaceSelector": { "matchNames": [ctx.namespace()] },
            "endpoints": [{
                "port": port,
                "path": prometheus.path,
                "interval": "60s",
            }],
        }
    });
    ctx.add_custom(ResourceKind::ServiceMonitor, &name, spec)
}
