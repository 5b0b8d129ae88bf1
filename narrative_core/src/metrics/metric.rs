//! Metric definitions - decaying scalars with confidence and correlation.

use psyche_state::clamp_unit;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};

use super::DecayCurve;

pub const PSYCHOLOGICAL_IMPACT: &str = "psychological_impact";
pub const HORROR_EFFECTIVENESS: &str = "horror_effectiveness";
pub const PERSONAL_RESONANCE: &str = "personal_resonance";
pub const NARRATIVE_COHERENCE: &str = "narrative_coherence";
pub const PLAYER_ENGAGEMENT: &str = "player_engagement";

/// Metrics created for every engine.
pub const CORE_METRICS: &[&str] = &[
    PSYCHOLOGICAL_IMPACT,
    HORROR_EFFECTIVENESS,
    PERSONAL_RESONANCE,
    NARRATIVE_COHERENCE,
    PLAYER_ENGAGEMENT,
];

/// Capacity of each metric's recent-event ring buffer.
pub const RECENT_EVENT_CAPACITY: usize = 10;

/// A tracked quantity of measured psychological or narrative effect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metric {
    pub id: String,

    value: f32,

    confidence: f32,

    pub decay: DecayCurve,

    /// Other metric id -> learned correlation (0.0 - 1.0).
    correlations: HashMap<String, f32>,

    /// Most recent event types that touched this metric, oldest first.
    recent_events: VecDeque<String>,
}

impl Metric {
    /// Create a metric at zero with the given decay curve.
    pub fn new(id: impl Into<String>, decay: DecayCurve) -> Self {
        Self {
            id: id.into(),
            value: 0.0,
            confidence: 0.0,
            decay,
            correlations: HashMap::new(),
            recent_events: VecDeque::with_capacity(RECENT_EVENT_CAPACITY),
        }
    }

    pub fn with_value(mut self, value: f32) -> Self {
        self.value = clamp_unit(value);
        self
    }

    pub fn value(&self) -> f32 {
        self.value
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    /// Move the value towards `target` by `rate` (0.0 - 1.0).
    pub fn blend_towards(&mut self, target: f32, rate: f32) {
        let rate = clamp_unit(rate);
        self.value = clamp_unit(self.value + (clamp_unit(target) - self.value) * rate);
    }

    /// Shift the value by a signed amount.
    pub fn nudge(&mut self, delta: f32) {
        self.value = clamp_unit(self.value + delta);
    }

    pub fn reinforce_confidence(&mut self, amount: f32) {
        self.confidence = clamp_unit(self.confidence + amount.max(0.0));
    }

    /// Multiply value and confidence by a retention factor.
    pub fn apply_retention(&mut self, factor: f32) {
        let factor = clamp_unit(factor);
        self.value = clamp_unit(self.value * factor);
        self.confidence = clamp_unit(self.confidence * factor);
    }

    /// Remember an event type, evicting the oldest beyond capacity.
    pub fn push_event(&mut self, event_type: &str) {
        if self.recent_events.len() >= RECENT_EVENT_CAPACITY {
            self.recent_events.pop_front();
        }
        self.recent_events.push_back(event_type.to_string());
    }

    pub fn recent_events(&self) -> impl Iterator<Item = &str> {
        self.recent_events.iter().map(String::as_str)
    }

    pub fn recent_event_count(&self) -> usize {
        self.recent_events.len()
    }

    /// Distinct event types in the ring buffer.
    pub fn recent_event_set(&self) -> HashSet<&str> {
        self.recent_events().collect()
    }

    pub fn correlation(&self, other: &str) -> f32 {
        self.correlations.get(other).copied().unwrap_or(0.0)
    }

    pub fn correlations(&self) -> &HashMap<String, f32> {
        &self.correlations
    }

    pub fn set_correlation(&mut self, other: &str, strength: f32) {
        self.correlations.insert(other.to_string(), clamp_unit(strength));
    }

    /// Overlap of two metrics' recent event types: `|A ∩ B| / max(|A|, |B|)`.
    pub fn event_overlap(&self, other: &Metric) -> f32 {
        let mine = self.recent_event_set();
        let theirs = other.recent_event_set();
        if mine.is_empty() || theirs.is_empty() {
            return 0.0;
        }

        let shared = mine.intersection(&theirs).count();
        shared as f32 / mine.len().max(theirs.len()) as f32
    }
}
