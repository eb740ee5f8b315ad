//! Batch Job or CronJob running a TideJob
//!
//! A TideJob with a `cron` block becomes a CronJob whose template carries the
//! job settings; otherwise it becomes a single Job. Switching between the two
//! changes the child's kind, so the diff deletes the old one.

use k8s_openapi::api::batch::v1::{CronJob, CronJobSpec, Job, JobSpec, JobTemplateSpec};
use kube::api::ObjectMeta;

use crate::controller::context::ReconciliationContext;
use crate::controller::kinds::ResourceKind;
use crate::controller::managed::{label_safe, ManagedKind};
use crate::controller::registry::Generator;
use crate::crd::TideJob;
use crate::error::GenerationError;

use super::pod::{build_pod_template, Workload};

/// Label tying pods back to the TideJob that started them
pub const JOB_NAME_LABEL: &str = "tideway.dev/job-name";

const CONCURRENCY_POLICIES: [&str; 3] = ["Allow", "Forbid", "Replace"];

pub(crate) fn generator() -> Generator {
    Generator::new("job").register(ManagedKind::Job, generate)
}

fn generate(ctx: &mut ReconciliationContext<'_>) -> Result<(), GenerationError> {
    let job = super::tide_job(ctx)?;
    let name = ctx.owner().name();

    if job.spec.container.image.trim().is_empty() {
        return Err(GenerationError::new("container image must not be empty"));
    }

    let spec = job_spec(ctx, job, &name);
    match &job.spec.cron {
        None => {
            let batch = Job {
                metadata: ObjectMeta {
                    name: Some(name),
                    ..Default::default()
                },
                spec: Some(spec),
                status: None,
            };
            ctx.add_typed(ResourceKind::Job, &batch)
        }
        Some(cron) => {
            if cron.schedule.split_whitespace().count() != 5 {
                return Err(GenerationError::new(format!(
                    "schedule {:?} must have five fields",
                    cron.schedule
                )));
            }
            if !CONCURRENCY_POLICIES.contains(&cron.concurrency_policy.as_str()) {
                return Err(GenerationError::new(format!(
                    "concurrency policy {} is not one of {}",
                    cron.concurrency_policy,
                    CONCURRENCY_POLICIES.join(", ")
                )));
            }

            // Runs spawned from the template must be discoverable by the
            // owner's selector
            let mut run_labels = super::app_labels(&name);
            run_labels.extend(ctx.owner().ownership_labels());

            let cron_job = CronJob {
                metadata: ObjectMeta {
                    name: Some(name.clone()),
                    ..Default::default()
                },
                spec: Some(CronJobSpec {
                    schedule: cron.schedule.clone(),
                    time_zone: cron.time_zone.clone(),
                    suspend: Some(cron.suspend),
                    concurrency_policy: Some(cron.concurrency_policy.clone()),
                    job_template: JobTemplateSpec {
                        metadata: Some(ObjectMeta {
                            labels: Some(run_labels),
                            ..Default::default()
                        }),
                        spec: Some(spec),
                    },
                    ..Default::default()
                }),
                status: None,
            };
            ctx.add_typed(ResourceKind::CronJob, &cron_job)
        }
    }
}

fn job_spec(ctx: &ReconciliationContext<'_>, job: &TideJob, name: &str) -> JobSpec {
    let container = &job.spec.container;
    let mut labels = super::app_labels(name);
    labels.insert(JOB_NAME_LABEL.to_string(), label_safe(name));

    let workload = Workload {
        name,
        image: &container.image,
        command: &container.command,
        env: &container.env,
        resources: &container.resources,
        port: None,
        prometheus: job.spec.prometheus.as_ref(),
        labels,
    };

    let settings = &job.spec.job;
    JobSpec {
        backoff_limit: settings.backoff_limit,
        active_deadline_seconds: settings.active_deadline_seconds,
        ttl_seconds_after_finished: settings.ttl_seconds_after_finished,
        // A scheduled job is suspended at the CronJob level
        suspend: job.spec.cron.is_none().then_some(settings.suspend),
        template: build_pod_template(&workload, ctx.config(), Some("Never"), false),
        ..Default::default()
    }
}
