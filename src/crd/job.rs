//! TideJob Custom Resource Definition
//!
//! A TideJob is a run-to-completion workload. Without a schedule it expands
//! into a single batch Job; with one it expands into a CronJob.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::status::SyncStatus;
use super::types::{
    AccessPolicy, EnvVar, PolicyViolation, PrometheusConfig, ResourceRequirements,
};

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "tideway.dev",
    version = "v1alpha1",
    kind = "TideJob",
    namespaced,
    status = "SyncStatus",
    shortname = "tjob",
    printcolumn = r#"{"name":"Schedule","type":"string","jsonPath":".spec.cron.schedule"}"#,
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.summary.status"}"#,
    printcolumn = r#"{"name":"Finished","type":"string","jsonPath":".status.conditions[?(@.type=='Finished')].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct TideJobSpec {
    pub container: JobContainer,

    #[serde(default)]
    pub job: JobSettings,

    /// Run on a schedule instead of once
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cron: Option<CronSettings>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_policy: Option<AccessPolicy>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub prometheus: Option<PrometheusConfig>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobContainer {
    pub image: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    #[serde(default)]
    pub resources: ResourceRequirements,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backoff_limit: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_deadline_seconds: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl_seconds_after_finished: Option<i32>,
    #[serde(default)]
    pub suspend: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CronSettings {
    pub schedule: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
    #[serde(default)]
    pub suspend: bool,
    #[serde(default = "default_concurrency_policy")]
    pub concurrency_policy: String,
}

fn default_concurrency_policy() -> String {
    "Forbid".to_string()
}

impl TideJobSpec {
    pub fn validate_access(&self) -> Result<(), Vec<PolicyViolation>> {
        let violations = self
            .access_policy
            .as_ref()
            .map(AccessPolicy::validate)
            .unwrap_or_default();

        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }

    pub fn is_scheduled(&self) -> bool {
        self.cron.is_some()
    }
}
