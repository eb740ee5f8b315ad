//! HorizontalPodAutoscaler owning the replica count of autoscaled Applications

use k8s_openapi::api::autoscaling::v2::{
    CrossVersionObjectReference, HorizontalPodAutoscaler, HorizontalPodAutoscalerSpec,
    MetricSpec, MetricTarget, ResourceMetricSource,
};
use kube::api::ObjectMeta;

use crate::controller::context::ReconciliationContext;
use crate::controller::kinds::ResourceKind;
use crate::controller::managed::ManagedKind;
use crate::controller::registry::Generator;
use crate::error::GenerationError;

pub(crate) fn generator() -> Generator {
    Generator::new("horizontal_pod_autoscaler").register(ManagedKind::Application, generate)
}

fn generate(ctx: &mut ReconciliationContext<'_>) -> Result<(), GenerationError> {
    let app = super::application(ctx)?;
    let replicas = &app.spec.replicas;

    // A pinned count needs no autoscaler; any stale one is deleted by the diff.
    if replicas.fixed().is_some() {
        return Ok(());
    }
    if replicas.min < 1 || replicas.max < replicas.min {
        return Err(GenerationError::new(format!(
            "replica bounds {}..{} are invalid",
            replicas.min, replicas.max
        )));
    }

    let name = ctx.owner().name();
    let hpa = HorizontalPodAutoscaler {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            ..Default::default()
        },
        spec: Some(HorizontalPodAutoscalerSpec {
            scale_target_ref: CrossVersionObjectReference {
                api_version: Some("apps/v1".to_string()),
                kind: "Deployment".to_string(),
                name,
            },
            min_replicas: Some(replicas.min),
            max_replicas: replicas.max,
            metrics: Some(vec![MetricSpec {
                type_: "Resource".to_string(),
                resource: Some(ResourceMetricSource {
                    name: "cpu".to_string(),
                    target: MetricTarget {
                        type_: "Utilization".to_string(),
                        average_utilization: Some(replicas.target_cpu_utilization),
                        ..Default::default()
                    },
                }),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        status: None,
    };
    ctx.add_typed(ResourceKind::HorizontalPodAutoscaler, &hpa)
}
