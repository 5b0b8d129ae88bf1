//! External collaborators the scheduler calls during dispatch.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::context_assembler::ContextBundle;
use crate::error::{GenerationError, ValidationError};

/// The generative text service.
#[async_trait]
pub trait GenerationService: Send + Sync {
    /// Generate content for a prompt. `tag` identifies the call for tracing
    /// (`"<intent_type>"` or `"<intent_type>:enhance"`).
    async fn generate(&self, prompt: &str, tag: &str) -> Result<String, GenerationError>;
}

/// Outcome of a coherence check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub passed: bool,
    /// 0.0 - 1.0.
    pub coherence: f32,
    pub violations: Vec<String>,
}

impl ValidationReport {
    pub fn pass(coherence: f32) -> Self {
        Self {
            passed: true,
            coherence: psyche_state::clamp_unit(coherence),
            violations: Vec::new(),
        }
    }

    pub fn fail(coherence: f32, violations: Vec<String>) -> Self {
        Self {
            passed: false,
            coherence: psyche_state::clamp_unit(coherence),
            violations,
        }
    }

    /// Report substituted when the validator itself errors.
    pub fn errored(error: &ValidationError) -> Self {
        Self::fail(0.0, vec![error.to_string()])
    }
}

/// Checks generated content against established narrative facts.
#[async_trait]
pub trait CoherenceValidator: Send + Sync {
    async fn validate(
        &self,
        content: &str,
        bundle: &ContextBundle,
    ) -> Result<ValidationReport, ValidationError>;
}

/// Accepts everything that is not blank.
#[derive(Debug, Clone, Copy, Default)]
pub struct PermissiveValidator;

#[async_trait]
impl CoherenceValidator for PermissiveValidator {
    async fn validate(
        &self,
        content: &str,
        _bundle: &ContextBundle,
    ) -> Result<ValidationReport, ValidationError> {
        if content.trim().is_empty() {
            return Ok(ValidationReport::fail(0.0, vec!["content is empty".to_string()]));
        }
        Ok(ValidationReport::pass(1.0))
    }
}
