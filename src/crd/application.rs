//! Application Custom Resource Definition
//!
//! An Application is a long-running containerized workload. It expands into a
//! Deployment, its Service, autoscaling and disruption settings, network
//! policies and, when ingresses are declared, the certificate, gateway and
//! virtual service that expose it.

use std::collections::{BTreeMap, HashSet};

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
    kind = "Application",
    namespaced,
    status = "SyncStatus",
    shortname = "app",
    printcolumn = r#"{"name":"Image","type":"string","jsonPath":".spec.image"}"#,
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.summary.status"}"#,
    printcolumn = r#"{"name":"Policies","type":"string","jsonPath":".status.accessPolicies"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSpec {
    /// Container image reference
    pub image: String,

    /// Port the container listens on
    #[serde(default = "default_port")]
    pub port: i32,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,

    #[serde(default)]
    pub replicas: Replicas,

    #[serde(default)]
    pub resources: ResourceRequirements,

    /// Public hostnames routed to this application through the shared gateway
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ingresses: Vec<String>,

    #[serde(default = "default_true")]
    pub redirect_to_https: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_policy: Option<AccessPolicy>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub prometheus: Option<PrometheusConfig>,

    /// Extra labels applied to the pod template
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

fn default_port() -> i32 {
    8080
}

fn default_true() -> bool {
    true
}

/// Replica bounds for an Application
///
/// Equal bounds pin the Deployment to a fixed count. Otherwise the count is
/// owned by a HorizontalPodAutoscaler and left out of the Deployment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Replicas {
    #[serde(default = "default_min_replicas")]
    pub min: i32,
    #[serde(default = "default_max_replicas")]
    pub max: i32,
    #[serde(default = "default_target_cpu")]
    pub target_cpu_utilization: i32,
}

fn default_min_replicas() -> i32 {
    2
}

fn default_max_replicas() -> i32 {
    5
}

fn default_target_cpu() -> i32 {
    80
}

impl Default for Replicas {
    fn default() -> Self {
        Self {
            min: default_min_replicas(),
            max: default_max_replicas(),
            target_cpu_utilization: default_target_cpu(),
        }
    }
}

impl Replicas {
    /// Fixed replica count when autoscaling is disabled
    pub fn fixed(&self) -> Option<i32> {
        (self.min == self.max).then_some(self.min)
    }
}

impl ApplicationSpec {
    /// Check ingress hostnames and access policy rules
    pub fn validate_access(&self) -> Result<(), Vec<PolicyViolation>> {
        let mut violations = Vec::new();

        let mut seen = HashSet::new();
        for host in &self.ingresses {
            if !seen.insert(host.as_str()) {
                violations.push(PolicyViolation::new(
                    "spec.ingresses",
                    format!("Hostname {host} is listed more than once"),
                    "Remove the duplicate hostname.",
                ));
            }
        }

        if let Some(policy) = &self.access_policy {
            violations.extend(policy.validate());
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }
}
