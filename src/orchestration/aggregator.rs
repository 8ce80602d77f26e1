//! # Condition Aggregator
//!
//! Folds the stage conditions into the single `Ready` condition. The earliest
//! non-True condition in evaluation order decides, so the aggregate always
//! points at the first thing an operator has to look at.

use crate::models::{reasons, Condition, ConditionSet, ConditionStatus, ConditionType};

pub const READY_MESSAGE: &str = "Setup complete";

/// Compute `Ready` from `conditions`, walking `order`
pub fn aggregate(conditions: &ConditionSet, order: &[ConditionType]) -> Condition {
    let observed = order
        .iter()
        .any(|stage| conditions.status(*stage) != ConditionStatus::Unknown);

    let Some(blocking) = blocking_stage(conditions, order) else {
        return Condition::new(
            ConditionType::Ready,
            ConditionStatus::True,
            reasons::READY,
            READY_MESSAGE,
        );
    };

    let (reason, message) = conditions
        .get(blocking)
        .map(|c| (c.reason.clone(), c.message.clone()))
        .unwrap_or_else(|| (reasons::INIT.to_string(), "not yet evaluated".to_string()));

    match conditions.status(blocking) {
        ConditionStatus::Unknown if !observed => Condition::new(
            ConditionType::Ready,
            ConditionStatus::Unknown,
            reasons::INIT,
            format!("{blocking}: {message}"),
        ),
        ConditionStatus::Unknown => Condition::new(
            ConditionType::Ready,
            ConditionStatus::False,
            reasons::WAITING,
            format!("{blocking}: {message}"),
        ),
        _ => Condition::new(
            ConditionType::Ready,
            ConditionStatus::False,
            reason,
            format!("{blocking}: {message}"),
        ),
    }
}

/// The stage `Ready` currently points at, `None` when ready
pub fn blocking_stage(conditions: &ConditionSet, order: &[ConditionType]) -> Option<ConditionType> {
    order
        .iter()
        .copied()
        .find(|stage| !conditions.is_true(*stage))
}
