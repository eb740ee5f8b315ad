//! Helpers for the `status.conditions` list written by every pass

use crate::crd::Condition;

/// Condition types written by the operator
pub const CONDITION_TYPE_SYNCED: &str = "Synced";
pub const CONDITION_TYPE_RUNNING: &str = "Running";
pub const CONDITION_TYPE_FINISHED: &str = "Finished";
pub const CONDITION_TYPE_FAILED: &str = "Failed";
pub const CONDITION_TYPE_ACCESS_POLICIES_VALID: &str = "AccessPoliciesValid";

/// Standard condition statuses
pub const CONDITION_STATUS_TRUE: &str = "True";
pub const CONDITION_STATUS_FALSE: &str = "False";

/// Update or add a condition to the conditions list
///
/// The transition time moves to `now` only when the status value changes or
/// the condition is new.
pub fn set_condition(
    conditions: &mut Vec<Condition>,
    type_: &str,
    status: bool,
    reason: &str,
    message: &str,
    observed_generation: Option<i64>,
    now: &str,
) {
    let status = if status {
        CONDITION_STATUS_TRUE
    } else {
        CONDITION_STATUS_FALSE
    };

    if let Some(existing) = conditions.iter_mut().find(|c| c.type_ == type_) {
        if existing.status != status {
            existing.last_transition_time = now.to_string();
        }
        existing.status = status.to_string();
        existing.reason = reason.to_string();
        existing.message = message.to_string();
        existing.observed_generation = observed_generation;
    } else {
        conditions.push(Condition {
            type_: type_.to_string(),
            status: status.to_string(),
            last_transition_time: now.to_string(),
            reason: reason.to_string(),
            message: message.to_string(),
            observed_generation,
        });
    }
}

/// Find a condition by type
pub fn find_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// Check if a condition is true
pub fn is_condition_true(conditions: &[Condition], type_: &str) -> bool {
    find_condition(conditions, type_).is_some_and(|c| c.status == CONDITION_STATUS_TRUE)
}

/// Keep the previous `lastTransitionTime` of conditions whose status value
/// did not change
pub fn carry_transition_times(previous: &[Condition], next: &mut [Condition]) {
    for condition in next.iter_mut() {
        if let Some(old) = find_condition(previous, &condition.type_) {
            if old.status == condition.status {
                condition.last_transition_time = old.last_transition_time.clone();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EARLIER: &str = "2024-01-01T00:00:00+00:00";
    const NOW: &str = "2024-06-01T00:00:00+00:00";

    #[test]
    fn test_set_condition_adds_new() {
        let mut conditions = Vec::new();
        set_condition(
            &mut conditions,
            CONDITION_TYPE_SYNCED,
            true,
            "Synced",
            "All children are in sync",
            Some(2),
            NOW,
        );

        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].type_, CONDITION_TYPE_SYNCED);
        assert_eq!(conditions[0].status, CONDITION_STATUS_TRUE);
        assert_eq!(conditions[0].observed_generation, Some(2));
        assert_eq!(conditions[0].last_transition_time, NOW);
    }

    #[test]
    fn test_set_condition_updates_existing() {
        let mut conditions = vec![Condition {
            type_: CONDITION_TYPE_SYNCED.to_string(),
            status: CONDITION_STATUS_FALSE.to_string(),
            last_transition_time: EARLIER.to_string(),
            reason: "Sync".to_string(),
            message: "1 resource(s) failed".to_string(),
            observed_generation: Some(1),
        }];

        set_condition(
            &mut conditions,
            CONDITION_TYPE_SYNCED,
            false,
            "Generate",
            "certificate failed",
            Some(1),
            NOW,
        );
        assert_eq!(conditions[0].last_transition_time, EARLIER);
        assert_eq!(conditions[0].reason, "Generate");

        set_condition(
            &mut conditions,
            CONDITION_TYPE_SYNCED,
            true,
            "Synced",
            "ok",
            Some(1),
            NOW,
        );
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].last_transition_time, NOW);
    }

    #[test]
    fn test_carry_transition_times() {
        let previous = vec![
            Condition::new(CONDITION_TYPE_SYNCED, true, "Synced", "ok"),
            Condition::new(CONDITION_TYPE_RUNNING, true, "Active", "1 active"),
        ];
        let mut next = Vec::new();
        set_condition(&mut next, CONDITION_TYPE_SYNCED, true, "Synced", "ok", None, NOW);
        set_condition(&mut next, CONDITION_TYPE_RUNNING, false, "Idle", "", None, NOW);

        carry_transition_times(&previous, &mut next);

        assert_eq!(next[0].last_transition_time, previous[0].last_transition_time);
        assert_eq!(next[1].last_transition_time, NOW);
        assert!(is_condition_true(&next, CONDITION_TYPE_SYNCED));
        assert!(!is_condition_true(&next, CONDITION_TYPE_RUNNING));
        assert!(!is_condition_true(&next, CONDITION_TYPE_FAILED));
    }
}
