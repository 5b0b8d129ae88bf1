//! State transitions - records of significant changes.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::PsychologicalState;

/// Unique identifier for transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransitionId(pub Uuid);

impl TransitionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TransitionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TransitionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An immutable record of a significant state change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    pub id: TransitionId,
    pub previous: PsychologicalState,
    pub current: PsychologicalState,
    /// What caused the change (event type, rule id, ...).
    pub trigger: String,
    /// How large the change was, from 0.0 to 1.0.
    pub significance: f32,
    /// Store clock in seconds.
    pub timestamp: f64,
}

impl StateTransition {
    pub fn tension_delta(&self) -> f32 {
        self.current.tension - self.previous.tension
    }

    pub fn phase_changed(&self) -> bool {
        self.current.phase != self.previous.phase
    }
}
