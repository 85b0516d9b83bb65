//! Status condition helpers.
//!
//! Conditions are unique by type. `observedGeneration` and
//! `lastTransitionTime` move only when a condition's status flips or the
//! whole set is reinitialized for a new generation.

use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};

pub const TYPE_PROGRESSING: &str = "Progressing";
pub const TYPE_AVAILABLE: &str = "Available";

pub const REASON_PREPARING: &str = "Preparing";
pub const REASON_RUNNING: &str = "Running";
pub const REASON_BLOCKED: &str = "Blocked";

pub const STATUS_TRUE: &str = "True";
pub const STATUS_FALSE: &str = "False";

/// Condition contents without bookkeeping fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionUpdate {
    pub type_: String,
    pub status: &'static str,
    pub reason: String,
    pub message: String,
}

impl ConditionUpdate {
    pub fn new(type_: impl Into<String>, status: bool, reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            type_: type_.into(),
            status: if status { STATUS_TRUE } else { STATUS_FALSE },
            reason: reason.into(),
            message: message.into(),
        }
    }

    fn into_condition(self, generation: Option<i64>) -> Condition {
        Condition {
            type_: self.type_,
            status: self.status.to_string(),
            reason: self.reason,
            message: self.message,
            observed_generation: generation,
            last_transition_time: Time(Utc::now()),
        }
    }
}

pub fn find<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

pub fn is_true(conditions: &[Condition], type_: &str) -> bool {
    find(conditions, type_).is_some_and(|c| c.status == STATUS_TRUE)
}

/// Insert or update one condition. Returns whether anything changed.
pub fn set_condition(conditions: &mut Vec<Condition>, update: ConditionUpdate, generation: Option<i64>) -> bool {
    match conditions.iter_mut().find(|c| c.type_ == update.type_) {
        None => {
            conditions.push(update.into_condition(generation));
            true
        }
        Some(existing) if existing.status != update.status => {
            *existing = update.into_condition(generation);
            true
        }
        Some(existing) => {
            if existing.reason == update.reason && existing.message == update.message {
                return false;
            }
            existing.reason = update.reason;
            existing.message = update.message;
            true
        }
    }
}

/// Starting set written when the instance's generation moves.
pub fn initial_conditions(generation: Option<i64>) -> Vec<Condition> {
    vec![
        ConditionUpdate::new(TYPE_PROGRESSING, true, REASON_PREPARING, "reconciling new generation").into_condition(generation),
        ConditionUpdate::new(TYPE_AVAILABLE, false, REASON_PREPARING, "reconciling new generation").into_condition(generation),
    ]
}

/// True when `Progressing` is missing or was observed for another generation.
pub fn needs_init(conditions: &[Condition], generation: Option<i64>) -> bool {
    match find(conditions, TYPE_PROGRESSING) {
        Some(c) => c.observed_generation != generation,
        None => true,
    }
}
