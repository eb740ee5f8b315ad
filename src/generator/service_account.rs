//! Per-workload ServiceAccount

use k8s_openapi::api::core::v1::ServiceAccount;
use kube::api::ObjectMeta;

use crate::controller::context::ReconciliationContext;
use crate::controller::kinds::ResourceKind;
use crate::controller::managed::ManagedKind;
use crate::controller::registry::Generator;
use crate::error::GenerationError;

pub(crate) fn generator() -> Generator {
    Generator::new("service_account")
        .register(ManagedKind::Application, generate)
        .register(ManagedKind::Job, generate)
}

fn generate(ctx: &mut ReconciliationContext<'_>) -> Result<(), GenerationError> {
    let service_account = ServiceAccount {
        metadata: ObjectMeta {
            name: Some(ctx.owner().name()),
            ..Default::default()
        },
        ..Default::default()
    };
    ctx.add_typed(ResourceKind::ServiceAccount, &service_account)
}
