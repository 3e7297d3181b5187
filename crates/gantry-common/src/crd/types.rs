//! Shared status types following Kubernetes API conventions

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition status following Kubernetes conventions
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition is true
    True,
    /// Condition is false
    False,
    /// Condition status is unknown
    #[default]
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Kubernetes-style condition for status reporting
///
/// External tooling reads reconciliation progress through these, so the wire
/// shape follows the upstream status-condition convention. A condition is
/// only "current" when its `observed_generation` matches the object's
/// generation; a stale generation means the controller has not yet observed
/// the latest spec edit.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition (e.g. Ready, BindingRequested)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Machine-readable reason for the condition
    pub reason: String,

    /// Human-readable message
    #[serde(default)]
    pub message: String,

    /// Generation of the spec this condition was computed against
    #[serde(default)]
    pub observed_generation: i64,

    /// Last time the condition transitioned between statuses
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Create a new condition with the current timestamp
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
        observed_generation: i64,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            observed_generation,
            last_transition_time: Utc::now(),
        }
    }
}

/// Set a condition in a condition list, keeping at most one per type
///
/// Mirrors the upstream `SetStatusCondition` semantics: the transition time
/// only advances when the status value actually changes, so a repeated
/// identical update does not generate a new watch event from a merge patch.
pub fn set_condition(conditions: &mut Vec<Condition>, new: Condition) {
    match conditions.iter_mut().find(|c| c.type_ == new.type_) {
        Some(existing) => {
            if existing.status == new.status {
                // Keep the original transition time for a same-status update
                existing.reason = new.reason;
                existing.message = new.message;
                existing.observed_generation = new.observed_generation;
            } else {
                *existing = new;
            }
        }
        None => conditions.push(new),
    }
}

/// Check whether a condition of the given type is present with status True
pub fn is_condition_true(conditions: &[Condition], type_: &str) -> bool {
    conditions
        .iter()
        .any(|c| c.type_ == type_ && c.status == ConditionStatus::True)
}

/// Access to conditions and generation for objects the awaiter can poll
pub trait HasConditions {
    /// The object's status conditions (empty when status is unset)
    fn conditions(&self) -> &[Condition];

    /// The object's metadata generation
    fn generation(&self) -> Option<i64>;
}

/// Reference to another object by name
///
/// Unlike `LocalObjectReference`, the name is required.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ObjectRef {
    /// Name of the referenced object (in the same namespace)
    pub name: String,
}

impl ObjectRef {
    /// Create a reference to the named object
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}
