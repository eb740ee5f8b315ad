//! Status document written to every managed custom resource

use std::collections::BTreeMap;
use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::Condition;

/// Outcome states reported in a status summary
///
/// `Pending`, `Progressing`, `Synced` and `Error` describe the reconciliation
/// pass. `Ready` and `InvalidConfig` are reserved for the access policy
/// sub-status and never appear in the pass-level summary.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum StatusName {
    #[default]
    Pending,
    Progressing,
    Synced,
    Error,
    Ready,
    InvalidConfig,
}

impl fmt::Display for StatusName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StatusName::Pending => "PENDING",
            StatusName::Progressing => "PROGRESSING",
            StatusName::Synced => "SYNCED",
            StatusName::Error => "ERROR",
            StatusName::Ready => "READY",
            StatusName::InvalidConfig => "INVALIDCONFIG",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub status: StatusName,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub time_stamp: String,
}

impl Summary {
    pub fn new(status: StatusName, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            time_stamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Status subresource shared by Application, TideJob and Routing
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub summary: Summary,

    /// Per child kind outcome, keyed by kind name
    #[serde(default)]
    pub sub_resources: BTreeMap<String, Summary>,

    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Access policy validity, independent of the summary
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_policies: Option<StatusName>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self::pending()
    }
}

impl SyncStatus {
    /// Status of an object that has never been reconciled
    pub fn pending() -> Self {
        Self {
            summary: Summary {
                status: StatusName::Pending,
                message: "Awaiting first reconcile".to_string(),
                time_stamp: String::new(),
            },
            sub_resources: BTreeMap::new(),
            conditions: Vec::new(),
            access_policies: None,
            observed_generation: None,
        }
    }

    pub fn is_synced(&self) -> bool {
        self.summary.status == StatusName::Synced
    }
}
