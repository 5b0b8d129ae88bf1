//! Error types for the state crate.

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the state store and the notification bridge.
///
/// Store operations never fail outward; `Corruption` is produced while
/// loading a snapshot and is logged per field rather than returned.
#[derive(Debug, Error)]
pub enum StateError {
    /// A persisted field could not be read back.
    #[error("corrupt snapshot field '{field}': {reason}")]
    Corruption { field: String, reason: String },

    /// A notification wait exceeded its deadline.
    #[error("timed out after {timeout:?} waiting for '{event}'")]
    EventTimeout { event: String, timeout: Duration },

    /// The whole snapshot payload was not valid JSON.
    #[error("snapshot serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StateError {
    /// Create a corruption error for a named field.
    pub fn corruption(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Corruption {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

pub type StateResult<T> = Result<T, StateError>;
