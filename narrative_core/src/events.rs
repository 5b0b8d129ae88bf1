//! Feedback events - measured reactions fed into the metric engine.

use psyche_state::{clamp_unit, DynamicValue};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Reserved event types that always take the immediate path.
pub const CRITICAL_EVENT_TYPES: &[&str] = &["critical", "critical_response"];

/// Metadata flag that forces immediate processing.
pub const IMMEDIATE_FLAG: &str = "immediate";

/// Metadata key holding free-form adjustment text (`"target=magnitude; ..."`).
pub const ADJUSTMENTS_KEY: &str = "adjustments";

/// Prefix of metadata keys carrying per-metric impact scores.
pub const IMPACT_PREFIX: &str = "impact.";

/// Intensity above which an event is processed immediately.
pub const IMMEDIATE_INTENSITY: f32 = 0.8;

/// Unique identifier for feedback events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single measured reaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackEvent {
    pub id: EventId,

    pub event_type: String,

    /// 0.0 - 1.0, except for the reserved critical types which are unbounded.
    pub intensity: f32,

    pub context: String,

    /// Engine clock in seconds. `None` means "stamp on submission".
    pub timestamp: Option<f64>,

    pub metadata: HashMap<String, DynamicValue>,

    /// Metrics this event informs.
    pub related_metrics: Vec<String>,
}

impl FeedbackEvent {
    /// Create a new event. Intensity is clamped unless the type is critical.
    pub fn new(event_type: impl Into<String>, intensity: f32) -> Self {
        let event_type = event_type.into();
        let intensity = if CRITICAL_EVENT_TYPES.contains(&event_type.as_str()) {
            if intensity.is_finite() {
                intensity.max(0.0)
            } else {
                1.0
            }
        } else {
            clamp_unit(intensity)
        };

        Self {
            id: EventId::new(),
            event_type,
            intensity,
            context: String::new(),
            timestamp: None,
            metadata: HashMap::new(),
            related_metrics: Vec::new(),
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    pub fn with_metric(mut self, metric_id: impl Into<String>) -> Self {
        self.related_metrics.push(metric_id.into());
        self
    }

    pub fn with_metrics<I, S>(mut self, metric_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.related_metrics
            .extend(metric_ids.into_iter().map(Into::into));
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: DynamicValue) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Attach an explicit impact score for one metric.
    pub fn with_impact(self, metric_id: &str, impact: f32) -> Self {
        self.with_metadata(
            format!("{}{}", IMPACT_PREFIX, metric_id),
            DynamicValue::Number(clamp_unit(impact) as f64),
        )
    }

    pub fn with_timestamp(mut self, timestamp: f64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Request immediate processing regardless of intensity.
    pub fn immediate(self) -> Self {
        self.with_metadata(IMMEDIATE_FLAG, DynamicValue::Bool(true))
    }

    pub fn is_critical_type(&self) -> bool {
        CRITICAL_EVENT_TYPES.contains(&self.event_type.as_str())
    }

    pub fn has_override(&self) -> bool {
        self.metadata
            .get(IMMEDIATE_FLAG)
            .and_then(DynamicValue::as_bool)
            .unwrap_or(false)
    }

    /// Whether this event skips the batch queue and rule cooldowns.
    pub fn is_urgent(&self) -> bool {
        self.intensity > IMMEDIATE_INTENSITY || self.has_override() || self.is_critical_type()
    }

    /// Explicit impact score recorded for a metric, if any.
    pub fn impact_for(&self, metric_id: &str) -> Option<f32> {
        self.metadata
            .get(&format!("{}{}", IMPACT_PREFIX, metric_id))
            .and_then(DynamicValue::as_number)
            .map(|n| clamp_unit(n as f32))
    }
}
