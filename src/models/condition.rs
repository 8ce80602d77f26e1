//! # Conditions
//!
//! Tri-state readiness conditions reported on the `Heat` status. A condition
//! is keyed by its [`ConditionType`]; the set holds at most one entry per type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Condition kinds reported by the reconciler, one per stage plus the `Ready` aggregate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConditionType {
    Ready,
    InputReady,
    #[serde(rename = "HeatRabbitMqTransportURLReady")]
    TransportUrlReady,
    ServiceConfigReady,
    #[serde(rename = "DBReady")]
    DbReady,
    #[serde(rename = "DBSyncReady")]
    DbSyncReady,
    #[serde(rename = "HeatStackDomainReady")]
    StackDomainReady,
    #[serde(rename = "HeatAPIReady")]
    ApiReady,
    #[serde(rename = "HeatCfnAPIReady")]
    CfnApiReady,
    #[serde(rename = "HeatEngineReady")]
    EngineReady,
}

impl ConditionType {
    /// Every stage condition in dependency order (excludes the `Ready` aggregate)
    pub const STAGES: [ConditionType; 9] = [
        Self::InputReady,
        Self::TransportUrlReady,
        Self::ServiceConfigReady,
        Self::DbReady,
        Self::DbSyncReady,
        Self::StackDomainReady,
        Self::ApiReady,
        Self::CfnApiReady,
        Self::EngineReady,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ready => "Ready",
            Self::InputReady => "InputReady",
            Self::TransportUrlReady => "HeatRabbitMqTransportURLReady",
            Self::ServiceConfigReady => "ServiceConfigReady",
            Self::DbReady => "DBReady",
            Self::DbSyncReady => "DBSyncReady",
            Self::StackDomainReady => "HeatStackDomainReady",
            Self::ApiReady => "HeatAPIReady",
            Self::CfnApiReady => "HeatCfnAPIReady",
            Self::EngineReady => "HeatEngineReady",
        }
    }
}

impl fmt::Display for ConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ConditionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        std::iter::once(Self::Ready)
            .chain(Self::STAGES)
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("Invalid condition type: {s}"))
    }
}

/// Tri-state condition status
///
/// `Unknown` means "no observation yet", which is distinct from an observed failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

impl ConditionStatus {
    pub fn is_true(&self) -> bool {
        matches!(self, Self::True)
    }
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Machine-readable reason attached to a condition
pub mod reasons {
    pub const INIT: &str = "Init";
    pub const READY: &str = "Ready";
    pub const REQUESTED: &str = "Requested";
    pub const ERROR: &str = "Error";
    pub const MISSING: &str = "Missing";
    pub const WAITING: &str = "Waiting";
    pub const DISABLED: &str = "Disabled";
}

/// A single readiness observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: ConditionType,
    pub status: ConditionStatus,
    pub reason: String,
    pub message: String,
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    pub fn new(
        condition_type: ConditionType,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            condition_type,
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }

    pub fn unknown(condition_type: ConditionType) -> Self {
        Self::new(
            condition_type,
            ConditionStatus::Unknown,
            reasons::INIT,
            format!("{condition_type} not yet evaluated"),
        )
    }
}

/// Conditions keyed by type
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConditionSet {
    conditions: BTreeMap<ConditionType, Condition>,
}

impl ConditionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// A set holding `Unknown` for `Ready` and every stage condition
    pub fn initialized() -> Self {
        let mut set = Self::new();
        set.init_missing();
        set
    }

    /// Add `Unknown` entries for any condition type not yet present
    pub fn init_missing(&mut self) {
        for condition_type in std::iter::once(ConditionType::Ready).chain(ConditionType::STAGES) {
            self.conditions
                .entry(condition_type)
                .or_insert_with(|| Condition::unknown(condition_type));
        }
    }

    pub fn get(&self, condition_type: ConditionType) -> Option<&Condition> {
        self.conditions.get(&condition_type)
    }

    /// Status of a condition, `Unknown` when absent
    pub fn status(&self, condition_type: ConditionType) -> ConditionStatus {
        self.get(condition_type)
            .map(|c| c.status)
            .unwrap_or(ConditionStatus::Unknown)
    }

    pub fn is_true(&self, condition_type: ConditionType) -> bool {
        self.status(condition_type).is_true()
    }

    /// Record a condition; returns true when anything observable changed.
    ///
    /// `last_transition_time` only moves when the status itself changes.
    pub fn set(&mut self, mut condition: Condition) -> bool {
        match self.conditions.get(&condition.condition_type) {
            Some(existing)
                if existing.status == condition.status
                    && existing.reason == condition.reason
                    && existing.message == condition.message =>
            {
                false
            }
            Some(existing) => {
                if existing.status == condition.status {
                    condition.last_transition_time = existing.last_transition_time;
                }
                self.conditions.insert(condition.condition_type, condition);
                true
            }
            None => {
                self.conditions.insert(condition.condition_type, condition);
                true
            }
        }
    }

    pub fn mark_true(&mut self, condition_type: ConditionType, message: impl Into<String>) -> bool {
        self.set(Condition::new(
            condition_type,
            ConditionStatus::True,
            reasons::READY,
            message,
        ))
    }

    pub fn mark_false(
        &mut self,
        condition_type: ConditionType,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> bool {
        self.set(Condition::new(
            condition_type,
            ConditionStatus::False,
            reason,
            message,
        ))
    }

    pub fn mark_unknown(
        &mut self,
        condition_type: ConditionType,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> bool {
        self.set(Condition::new(
            condition_type,
            ConditionStatus::Unknown,
            reason,
            message,
        ))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Condition> {
        self.conditions.values()
    }

    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }
}
