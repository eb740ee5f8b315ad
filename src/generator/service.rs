//! ClusterIP Service in front of an Application

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::ObjectMeta;

use crate::controller::context::ReconciliationContext;
use crate::controller::kinds::ResourceKind;
use crate::controller::managed::ManagedKind;
use crate::controller::registry::Generator;
use crate::error::GenerationError;

pub(crate) fn generator() -> Generator {
    Generator::new("service").register(ManagedKind::Application, generate)
}

fn generate(ctx: &mut ReconciliationContext<'_>) -> Result<(), GenerationError> {
    let app = super::application(ctx)?;
    let name = ctx.owner().name();

    if app.spec.port <= 0 || app.spec.port > 65535 {
        return Err(GenerationError::new(format!(
            "port {} is out of range",
            app.spec.port
        )));
    }

    let mut ports = vec![ServicePort {
        name: Some("http".to_string()),
        port: app.spec.port,
        target_port: Some(IntOrString::Int(app.spec.port)),
        protocol: Some("TCP".to_string()),
        app_protocol: Some("http".to_string()),
        ..Default::default()
    }];
    if let Some(prometheus) = &app.spec.prometheus {
        if prometheus.port != app.spec.port {
            ports.push(ServicePort {
                name: Some("metrics".to_string()),
                port: prometheus.port,
                target_port: Some(IntOrString::Int(prometheus.port)),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            });
        }
    }

    let service = Service {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            selector: Some(super::app_labels(&name)),
            ports: Some(ports),
            ..Default::default()
        }),
        status: None,
    };
    ctx.add_typed(ResourceKind::Service, &service)
}
