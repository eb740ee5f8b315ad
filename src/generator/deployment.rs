//! Deployment running an Application

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, DeploymentStrategy, RollingUpdateDeployment};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::ObjectMeta;

use crate::controller::context::ReconciliationContext;
use crate::controller::kinds::ResourceKind;
use crate::controller::managed::ManagedKind;
use crate::controller::registry::Generator;
use crate::error::GenerationError;

use super::pod::{build_pod_template, Workload};

pub(crate) fn generator() -> Generator {
    Generator::new("deployment").register(ManagedKind::Application, generate)
}

fn generate(ctx: &mut ReconciliationContext<'_>) -> Result<(), GenerationError> {
    let app = super::application(ctx)?;
    let name = ctx.owner().name();

    if app.spec.image.trim().is_empty() {
        return Err(GenerationError::new("image must not be empty"));
    }

    let selector = super::app_labels(&name);
    let mut labels = app.spec.labels.clone();
    labels.extend(selector.clone());

    let workload = Workload {
        name: &name,
        image: &app.spec.image,
        command: &app.spec.command,
        env: &app.spec.env,
        resources: &app.spec.resources,
        port: Some(app.spec.port),
        prometheus: app.spec.prometheus.as_ref(),
        labels,
    };

    let deployment = Deployment {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            // Left unset under autoscaling so the live count survives updates
            replicas: app.spec.replicas.fixed(),
            selector: LabelSelector {
                match_labels: Some(selector),
                ..Default::default()
            },
            strategy: Some(DeploymentStrategy {
                type_: Some("RollingUpdate".to_string()),
                rolling_update: Some(RollingUpdateDeployment {
                    max_surge: Some(IntOrString::String("25%".to_string())),
                    max_unavailable: Some(IntOrString::Int(0)),
                }),
            }),
            template: build_pod_template(&workload, ctx.config(), None, true),
            ..Default::default()
        }),
        status: None,
    };
    ctx.add_typed(ResourceKind::Deployment, &deployment)
}
