//! Environment ConfigMap loaded into workload containers through `envFrom`

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::ObjectMeta;

use crate::controller::context::ReconciliationContext;
use crate::controller::kinds::ResourceKind;
use crate::controller::managed::ManagedKind;
use crate::controller::registry::Generator;
use crate::crd::EnvVar;
use crate::error::GenerationError;

pub(crate) fn generator() -> Generator {
    Generator::new("config_map")
        .register(ManagedKind::Application, for_application)
        .register(ManagedKind::Job, for_job)
}

pub(crate) fn env_config_map_name(workload: &str) -> String {
    format!("{workload}-env")
}

fn for_application(ctx: &mut ReconciliationContext<'_>) -> Result<(), GenerationError> {
    let app = super::application(ctx)?;
    add_env(ctx, &app.spec.env)
}

fn for_job(ctx: &mut ReconciliationContext<'_>) -> Result<(), GenerationError> {
    let job = super::tide_job(ctx)?;
    add_env(ctx, &job.spec.container.env)
}

fn add_env(ctx: &mut ReconciliationContext<'_>, env: &[EnvVar]) -> Result<(), GenerationError> {
    if env.is_empty() {
        return Ok(());
    }

    let mut data = BTreeMap::new();
    for var in env {
        if var.name.is_empty() {
            return Err(GenerationError::new("environment variable without a name"));
        }
        if data.insert(var.name.clone(), var.value.clone()).is_some() {
            return Err(GenerationError::new(format!(
                "environment variable {} is set twice",
                var.name
            )));
        }
    }

    let config_map = ConfigMap {
        metadata: ObjectMeta {
            name: Some(env_config_map_name(&ctx.owner().name())),
            ..Default::default()
        },
        data: Some(data),
        ..Default::default()
    };
    ctx.add_typed(ResourceKind::ConfigMap, &config_map)
}
