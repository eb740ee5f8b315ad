//! Pure reduction of a pass outcome into the status document
//!
//! Nothing here talks to the cluster. The reconciler calls `begin_pass`
//! before a pass and `reduce` after it, then persists the result only when it
//! differs from what is already stored.

use std::collections::BTreeMap;
use std::fmt;

use kube::api::DynamicObject;

use crate::crd::{StatusName, Summary, SyncStatus};

use super::conditions::{
    carry_transition_times, set_condition, CONDITION_TYPE_ACCESS_POLICIES_VALID,
    CONDITION_TYPE_FAILED, CONDITION_TYPE_FINISHED, CONDITION_TYPE_RUNNING, CONDITION_TYPE_SYNCED,
};
use super::sync::SyncReport;
use super::validity::Validity;

/// Stage of a pass that failed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Generate,
    Discover,
    Sync,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Generate => "Generate",
            Phase::Discover => "Discover",
            Phase::Sync => "Sync",
        };
        f.write_str(s)
    }
}

/// Progress of the batch Jobs and CronJobs owned by a TideJob
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct JobProgress {
    pub active: i64,
    pub succeeded: i64,
    pub failed: i64,
    pub complete: bool,
    pub terminal_failure: bool,
}

fn has_true_condition(object: &DynamicObject, type_: &str) -> bool {
    object
        .data
        .pointer("/status/conditions")
        .and_then(|c| c.as_array())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c["type"] == type_ && c["status"] == "True")
        })
}

impl JobProgress {
    /// Fold the status of live Jobs and CronJobs
    pub fn from_live<'a>(jobs: impl IntoIterator<Item = &'a DynamicObject>) -> Self {
        let mut progress = JobProgress::default();
        for job in jobs {
            let status = &job.data["status"];
            // CronJobs report active runs as a list of references
            progress.active += status["active"]
                .as_i64()
                .or_else(|| status["active"].as_array().map(|a| a.len() as i64))
                .unwrap_or(0);
            progress.succeeded += status["succeeded"].as_i64().unwrap_or(0);
            progress.failed += status["failed"].as_i64().unwrap_or(0);
            progress.complete |= has_true_condition(job, "Complete");
            progress.terminal_failure |= has_true_condition(job, "Failed");
        }
        progress
    }
}

/// What a pass produced
#[derive(Clone, Debug)]
pub enum PassOutcome {
    /// Generation or discovery failed; nothing was synced
    Failed { phase: Phase, error: String },
    /// Sync ran; individual children may still have failed
    Completed {
        report: SyncReport,
        job_progress: Option<JobProgress>,
    },
}

impl PassOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, PassOutcome::Completed { report, .. } if report.is_success())
    }

    /// Summary status and message for this outcome
    pub fn summary(&self) -> (StatusName, String) {
        match self {
            PassOutcome::Failed { phase, error } => {
                (StatusName::Error, format!("{phase} failed: {error}"))
            }
            PassOutcome::Completed { report, .. } if !report.is_success() => (
                StatusName::Error,
                format!(
                    "{} resource(s) failed to sync, first error: {}",
                    report.errors.len(),
                    report.errors[0]
                ),
            ),
            PassOutcome::Completed { .. } => {
                (StatusName::Synced, "All resources are in sync".to_string())
            }
        }
    }

    pub fn failed_phase(&self) -> Option<Phase> {
        match self {
            PassOutcome::Failed { phase, .. } => Some(*phase),
            PassOutcome::Completed { report, .. } if !report.is_success() => Some(Phase::Sync),
            PassOutcome::Completed { .. } => None,
        }
    }
}

fn summary_since(previous: Option<&Summary>, status: StatusName, message: String, now: &str) -> Summary {
    let time_stamp = match previous {
        Some(p) if p.status == status && p.message == message => p.time_stamp.clone(),
        _ => now.to_string(),
    };
    Summary {
        status,
        message,
        time_stamp,
    }
}

/// Status to write before a pass, if any
///
/// `PROGRESSING` is only written for a new generation or when leaving a
/// state other than `SYNCED`, so steady-state resyncs write nothing.
pub fn begin_pass(previous: Option<&SyncStatus>, generation: Option<i64>, now: &str) -> Option<SyncStatus> {
    let needs_write = match previous {
        None => true,
        Some(prev) => {
            prev.observed_generation != generation
                || matches!(
                    prev.summary.status,
                    StatusName::Pending | StatusName::Error
                )
        }
    };
    if !needs_write {
        return None;
    }

    let mut status = previous.cloned().unwrap_or_default();
    status.summary = summary_since(
        previous.map(|p| &p.summary),
        StatusName::Progressing,
        "Reconciling".to_string(),
        now,
    );
    Some(status)
}

/// Build the status document for a finished pass
pub fn reduce(
    previous: Option<&SyncStatus>,
    outcome: &PassOutcome,
    validity: &Validity,
    generation: Option<i64>,
    now: &str,
) -> SyncStatus {
    let (status, message) = outcome.summary();
    let summary = summary_since(previous.map(|p| &p.summary), status, message.clone(), now);

    let mut conditions = Vec::new();
    match outcome.failed_phase() {
        None => set_condition(
            &mut conditions,
            CONDITION_TYPE_SYNCED,
            true,
            "Synced",
            &message,
            generation,
            now,
        ),
        Some(phase) => set_condition(
            &mut conditions,
            CONDITION_TYPE_SYNCED,
            false,
            &phase.to_string(),
            &message,
            generation,
            now,
        ),
    }

    if let PassOutcome::Completed {
        job_progress: Some(progress),
        ..
    } = outcome
    {
        set_condition(
            &mut conditions,
            CONDITION_TYPE_RUNNING,
            progress.active > 0,
            if progress.active > 0 { "Active" } else { "Idle" },
            &format!("{} active pod(s)", progress.active),
            generation,
            now,
        );
        set_condition(
            &mut conditions,
            CONDITION_TYPE_FINISHED,
            progress.complete,
            if progress.complete { "Complete" } else { "Pending" },
            &format!("{} succeeded", progress.succeeded),
            generation,
            now,
        );
        set_condition(
            &mut conditions,
            CONDITION_TYPE_FAILED,
            progress.terminal_failure,
            if progress.terminal_failure {
                "BackoffLimitExceeded"
            } else {
                "NoFailure"
            },
            &format!("{} failed", progress.failed),
            generation,
            now,
        );
    }

    let access_policies = match validity {
        Validity::NotApplicable => None,
        Validity::Valid => Some(StatusName::Ready),
        Validity::Invalid(_) => Some(StatusName::InvalidConfig),
    };
    if access_policies.is_some() {
        set_condition(
            &mut conditions,
            CONDITION_TYPE_ACCESS_POLICIES_VALID,
            validity.is_valid(),
            if validity.is_valid() {
                "Valid"
            } else {
                "InvalidConfig"
            },
            &validity.message(),
            generation,
            now,
        );
    }

    if let Some(prev) = previous {
        carry_transition_times(&prev.conditions, &mut conditions);
    }

    let mut sub_resources: BTreeMap<String, Summary> = previous
        .map(|p| p.sub_resources.clone())
        .unwrap_or_default();
    if let PassOutcome::Completed { report, .. } = outcome {
        for (kind, error) in report.kind_outcomes() {
            let (status, message) = match error {
                None => (StatusName::Synced, String::new()),
                Some(e) => (StatusName::Error, e),
            };
            let entry = summary_since(sub_resources.get(kind.as_str()), status, message, now);
            sub_resources.insert(kind.as_str().to_string(), entry);
        }
    }

    SyncStatus {
        summary,
        sub_resources,
        conditions,
        access_policies,
        observed_generation: generation,
    }
}
