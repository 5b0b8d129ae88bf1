//! Error types for the narrative core.
//!
//! Only the intent scheduler surfaces errors to callers. Metric and rule
//! errors are logged where they occur and recovered locally.

use thiserror::Error;

/// Failure of the external generation service.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GenerationError {
    #[error("generation timed out")]
    Timeout,

    #[error("generation service error: {0}")]
    Service(String),
}

/// Failure of the external coherence validator.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("coherence validation failed: {0}")]
pub struct ValidationError(pub String);

/// Why an intent did not produce a result.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum IntentError {
    /// The generation service failed during generation or enhancement.
    #[error("generation failure: {0}")]
    Generation(#[from] GenerationError),

    /// Dropped by the acceptance/shedding policy.
    #[error("intent shed (priority {priority:.2}): {reason}")]
    Shed { priority: f32, reason: String },

    /// The scheduler went away before the intent finished.
    #[error("scheduler dropped the intent")]
    Dropped,
}

/// A rule condition clause that could not be parsed.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("invalid rule condition clause '{clause}': {reason}")]
pub struct ConditionError {
    pub clause: String,
    pub reason: String,
}

/// Adjustment text that could not be parsed.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("unparseable adjustment '{fragment}': {reason}")]
pub struct AdjustmentParseError {
    pub fragment: String,
    pub reason: String,
}

/// Configuration loading failure.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

pub type IntentOutcome<T> = Result<T, IntentError>;
