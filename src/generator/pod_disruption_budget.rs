//! PodDisruptionBudget for Applications running more than one replica

use k8s_openapi::api::policy::v1::{PodDisruptionBudget, PodDisruptionBudgetSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::ObjectMeta;

use crate::controller::context::ReconciliationContext;
use crate::controller::kinds::ResourceKind;
use crate::controller::managed::ManagedKind;
use crate::controller::registry::Generator;
use crate::error::GenerationError;

pub(crate) fn generator() -> Generator {
    Generator::new("pod_disruption_budget").register(ManagedKind::Application, generate)
}

fn generate(ctx: &mut ReconciliationContext<'_>) -> Result<(), GenerationError> {
    let app = super::application(ctx)?;
    if app.spec.replicas.min <= 1 {
        return Ok(());
    }

    let name = ctx.owner().name();
    let pdb = PodDisruptionBudget {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            ..Default::default()
        },
        spec: Some(PodDisruptionBudgetSpec {
            min_available: Some(IntOrString::String("50%".to_string())),
            selector: Some(LabelSelector {
                match_labels: Some(super::app_labels(&name)),
                ..Default::default()
            }),
            ..Default::default()
        }),
        status: None,
    };
    ctx.add_typed(ResourceKind::PodDisruptionBudget, &pdb)
}
