//! Routing Custom Resource Definition
//!
//! A Routing exposes several Applications under one hostname, dispatching on
//! path prefix.

use std::collections::HashSet;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::status::SyncStatus;
use super::types::PolicyViolation;

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "tideway.dev",
    version = "v1alpha1",
    kind = "Routing",
    namespaced,
    status = "SyncStatus",
    shortname = "rt",
    printcolumn = r#"{"name":"Hostname","type":"string","jsonPath":".spec.hostname"}"#,
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.summary.status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RoutingSpec {
    pub hostname: String,

    #[serde(default)]
    pub routes: Vec<Route>,

    #[serde(default = "default_true")]
    pub redirect_to_https: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    pub path_prefix: String,
    pub target_app: String,
    pub port: i32,
    /// Strip the matched prefix before forwarding
    #[serde(default)]
    pub rewrite_uri: bool,
}

impl RoutingSpec {
    /// Check that path prefixes are unique and every route has a target
    pub fn validate_routes(&self) -> Result<(), Vec<PolicyViolation>> {
        let mut violations = Vec::new();
        let mut prefixes = HashSet::new();

        for (i, route) in self.routes.iter().enumerate() {
            if !prefixes.insert(route.path_prefix.as_str()) {
                violations.push(PolicyViolation::new(
                    format!("spec.routes[{i}].pathPrefix"),
                    format!("Path prefix {} is routed more than once", route.path_prefix),
                    "Give each route a distinct path prefix.",
                ));
            }
            if route.target_app.trim().is_empty() {
                violations.push(PolicyViolation::new(
                    format!("spec.routes[{i}].targetApp"),
                    "Route has no target application",
                    "Set targetApp to an Application in this namespace.",
                ));
            }
            if route.port <= 0 {
                violations.push(PolicyViolation::new(
                    format!("spec.routes[{i}].port"),
                    format!("Port {} is not a valid port", route.port),
                    "Use the port the target Application listens on.",
                ));
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }
}
