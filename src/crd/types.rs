//! Shared types for Tideway resource specifications
//!
//! These types are used across the CRD definitions and the generators.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Plain environment variable passed to a workload container
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct EnvVar {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

/// CPU and memory quantities following Kubernetes conventions
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ResourceSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
}

impl ResourceSpec {
    pub fn is_empty(&self) -> bool {
        self.cpu.is_none() && self.memory.is_none()
    }

    pub fn to_quantities(
        &self,
    ) -> BTreeMap<String, k8s_openapi::apimachinery::pkg::api::resource::Quantity> {
        use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

        let mut out = BTreeMap::new();
        if let Some(cpu) = &self.cpu {
            out.insert("cpu".to_string(), Quantity(cpu.clone()));
        }
        if let Some(memory) = &self.memory {
            out.insert("memory".to_string(), Quantity(memory.clone()));
        }
        out
    }
}

/// Resource requests and limits for a workload container
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ResourceRequirements {
    #[serde(default)]
    pub requests: ResourceSpec,
    #[serde(default)]
    pub limits: ResourceSpec,
}

/// Network access rules for a workload
///
/// Inbound rules open the workload to other applications; outbound rules open
/// other applications and external hosts to the workload.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct AccessPolicy {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inbound: Option<InboundPolicy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outbound: Option<OutboundPolicy>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct InboundPolicy {
    #[serde(default)]
    pub rules: Vec<InternalRule>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct OutboundPolicy {
    #[serde(default)]
    pub rules: Vec<InternalRule>,
    #[serde(default)]
    pub external: Vec<ExternalRule>,
}

/// Rule targeting another application inside the cluster
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InternalRule {
    pub application: String,
    /// Defaults to the namespace of the workload declaring the rule
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Rule opening egress to a host outside the cluster
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ExternalRule {
    pub host: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default)]
    pub ports: Vec<ExternalPort>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ExternalPort {
    pub name: String,
    pub port: i32,
    #[serde(default = "default_external_protocol")]
    pub protocol: String,
}

fn default_external_protocol() -> String {
    "HTTPS".to_string()
}

/// Prometheus scrape configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PrometheusConfig {
    pub port: i32,
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

/// Kubernetes-style condition stored in the status document
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition (e.g., "Synced", "Running", "AccessPoliciesValid")
    #[serde(rename = "type")]
    pub type_: String,
    /// Status of the condition: "True", "False", or "Unknown"
    pub status: String,
    /// Last time the condition transitioned
    pub last_transition_time: String,
    /// Machine-readable reason for the condition
    pub reason: String,
    /// Human-readable message
    pub message: String,
    /// The .metadata.generation that the condition was set based upon
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl Condition {
    pub fn new(type_: &str, status: bool, reason: &str, message: &str) -> Self {
        Self {
            type_: type_.to_string(),
            status: if status { "True" } else { "False" }.to_string(),
            last_transition_time: chrono::Utc::now().to_rfc3339(),
            reason: reason.to_string(),
            message: message.to_string(),
            observed_generation: None,
        }
    }

    /// Set the observed generation for this condition
    pub fn with_observed_generation(mut self, generation: Option<i64>) -> Self {
        self.observed_generation = generation;
        self
    }

    pub fn is_true(&self) -> bool {
        self.status == "True"
    }
}

/// Structured access policy or routing violation
///
/// Violations never abort a pass; they are reported through the
/// `accessPolicies` sub-status and the `AccessPoliciesValid` condition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PolicyViolation {
    pub field: String,
    pub message: String,
    pub how_to_fix: String,
}

impl PolicyViolation {
    pub fn new(
        field: impl Into<String>,
        message: impl Into<String>,
        how_to_fix: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            how_to_fix: how_to_fix.into(),
        }
    }
}

impl std::fmt::Display for PolicyViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl AccessPolicy {
    /// Check the rules shared by every policy-bearing kind
    ///
    /// Internal rules must name an application and external rules must open
    /// at least one port.
    pub fn validate(&self) -> Vec<PolicyViolation> {
        let mut violations = Vec::new();

        if let Some(inbound) = &self.inbound {
            for (i, rule) in inbound.rules.iter().enumerate() {
                if rule.application.trim().is_empty() {
                    violations.push(PolicyViolation::new(
                        format!("spec.accessPolicy.inbound.rules[{i}].application"),
                        "Inbound rule does not name an application",
                        "Set application to the name of the caller.",
                    ));
                }
            }
        }

        if let Some(outbound) = &self.outbound {
            for (i, rule) in outbound.rules.iter().enumerate() {
                if rule.application.trim().is_empty() {
                    violations.push(PolicyViolation::new(
                        format!("spec.accessPolicy.outbound.rules[{i}].application"),
                        "Outbound rule does not name an application",
                        "Set application to the name of the callee.",
                    ));
                }
            }
            for (i, rule) in outbound.external.iter().enumerate() {
                if rule.ports.is_empty() {
                    violations.push(PolicyViolation::new(
                        format!("spec.accessPolicy.outbound.external[{i}].ports"),
                        format!("External rule for {} has no ports", rule.host),
                        "List at least one port the workload may reach.",
                    ));
                }
            }
        }

        violations
    }

    /// Outbound external rules, or an empty slice
    pub fn external_rules(&self) -> &[ExternalRule] {
        self.outbound
            .as_ref()
            .map(|o| o.external.as_slice())
            .unwrap_or_default()
    }
}
