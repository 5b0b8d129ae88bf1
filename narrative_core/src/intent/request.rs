//! Intent requests, results and the handles callers await.

use psyche_state::{clamp_unit, DynamicValue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use uuid::Uuid;

use super::scoring::ContentScores;
use super::services::ValidationReport;
use crate::error::{IntentError, IntentOutcome};

/// Unique identifier for intents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IntentId(pub Uuid);

impl IntentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for IntentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for IntentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle stage of an intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IntentStage {
    Queued,
    RateLimited,
    Generating,
    Validating,
    Enhancing,
    Completed,
    Failed,
}

impl IntentStage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, IntentStage::Completed | IntentStage::Failed)
    }
}

/// A request for generated content.
#[derive(Debug, Clone)]
pub struct IntentRequest {
    pub id: IntentId,
    pub intent_type: String,
    pub context: String,
    pub parameters: BTreeMap<String, DynamicValue>,
    /// 0.0 - 1.0, fixed at submission.
    pub priority: f32,
    pub submitted_at: Instant,
}

impl IntentRequest {
    pub fn new(
        intent_type: impl Into<String>,
        context: impl Into<String>,
        parameters: BTreeMap<String, DynamicValue>,
        priority: f32,
    ) -> Self {
        Self {
            id: IntentId::new(),
            intent_type: intent_type.into(),
            context: context.into(),
            parameters,
            priority: clamp_unit(priority),
            submitted_at: Instant::now(),
        }
    }
}

/// Generated content with everything measured about it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentResult {
    pub intent_id: IntentId,
    pub intent_type: String,
    pub content: String,
    /// Psychological metric readouts for the final content.
    pub scores: ContentScores,
    pub validation: ValidationReport,
    pub applied_techniques: Vec<String>,
    /// Intent types worth submitting next.
    pub follow_ups: Vec<String>,
    pub enhanced: bool,
}

/// Resolves to the outcome of a submitted intent.
///
/// Dropping the ticket does not cancel the intent.
#[derive(Debug)]
pub struct IntentTicket {
    id: IntentId,
    priority: f32,
    receiver: oneshot::Receiver<IntentOutcome<IntentResult>>,
}

impl IntentTicket {
    pub(crate) fn new(
        id: IntentId,
        priority: f32,
        receiver: oneshot::Receiver<IntentOutcome<IntentResult>>,
    ) -> Self {
        Self {
            id,
            priority,
            receiver,
        }
    }

    pub fn id(&self) -> IntentId {
        self.id
    }

    pub fn priority(&self) -> f32 {
        self.priority
    }
}

impl Future for IntentTicket {
    type Output = IntentOutcome<IntentResult>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.get_mut().receiver).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => Poll::Ready(Err(IntentError::Dropped)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Counters over the scheduler's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub enhanced: u64,
    pub shed: u64,
}

/// One finished dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct TimelineEntry {
    pub intent_id: IntentId,
    pub intent_type: String,
    pub priority: f32,
    /// `Completed` or `Failed`.
    pub stage: IntentStage,
    pub enhanced: bool,
    pub scores: Option<ContentScores>,
    /// Time from submission to dispatch.
    pub waited: Duration,
    /// Time spent dispatching.
    pub duration: Duration,
    /// When the entry was recorded.
    pub finished_at: Instant,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_is_clamped() {
        assert_eq!(IntentRequest::new("scare", "", BTreeMap::new(), 3.0).priority, 1.0);
        assert_eq!(IntentRequest::new("scare", "", BTreeMap::new(), f32::NAN).priority, 0.0);
    }

    #[test]
    fn test_terminal_stages() {
        assert!(IntentStage::Completed.is_terminal());
        assert!(IntentStage::Failed.is_terminal());
        assert!(!IntentStage::Enhancing.is_terminal());
    }

    #[tokio::test]
    async fn test_ticket_resolves_dropped() {
        let (sender, receiver) = oneshot::channel();
        let ticket = IntentTicket::new(IntentId::new(), 0.5, receiver);
        drop(sender);
        assert_eq!(ticket.await, Err(IntentError::Dropped));
    }

    #[tokio::test]
    async fn test_ticket_resolves_outcome() {
        let (sender, receiver) = oneshot::channel();
        let ticket = IntentTicket::new(IntentId::new(), 0.5, receiver);
        let shed = IntentError::Shed {
            priority: 0.1,
            reason: "queue full".to_string(),
        };
        sender.send(Err(shed.clone())).unwrap();
        assert_eq!(ticket.await, Err(shed));
    }
}
