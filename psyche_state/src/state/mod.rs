//! Psychological state - the central structure describing the participant.

mod transition;

pub use transition::*;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Phase every fresh state starts in.
pub const DEFAULT_PHASE: &str = "introduction";

/// Clamp a scalar into the unit interval, mapping NaN to zero.
pub fn clamp_unit(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Typed value for dynamic variables, event metadata and intent parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DynamicValue {
    Number(f64),
    Text(String),
    Bool(bool),
    Blob(Vec<u8>),
}

impl DynamicValue {
    /// Whether this value survives a JSON round trip unchanged.
    pub fn is_serializable(&self) -> bool {
        match self {
            DynamicValue::Number(n) => n.is_finite(),
            _ => true,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            DynamicValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            DynamicValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            DynamicValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl std::fmt::Display for DynamicValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DynamicValue::Number(n) => write!(f, "{}", n),
            DynamicValue::Text(s) => write!(f, "{}", s),
            DynamicValue::Bool(b) => write!(f, "{}", b),
            DynamicValue::Blob(bytes) => write!(f, "<{} bytes>", bytes.len()),
        }
    }
}

impl From<f64> for DynamicValue {
    fn from(value: f64) -> Self {
        DynamicValue::Number(value)
    }
}

impl From<bool> for DynamicValue {
    fn from(value: bool) -> Self {
        DynamicValue::Bool(value)
    }
}

impl From<&str> for DynamicValue {
    fn from(value: &str) -> Self {
        DynamicValue::Text(value.to_string())
    }
}

impl From<String> for DynamicValue {
    fn from(value: String) -> Self {
        DynamicValue::Text(value)
    }
}

/// The complete psychological and narrative state at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PsychologicalState {
    /// Overall dramatic intensity from 0.0 to 1.0.
    pub tension: f32,

    /// Current narrative phase.
    pub phase: String,

    /// Theme -> weight. Always sums to 1.0 when non-empty.
    narrative_weights: BTreeMap<String, f32>,

    /// Arbitrary keyed variables.
    pub variables: HashMap<String, DynamicValue>,

    /// Event type -> number of times recorded.
    pub event_counters: HashMap<String, u32>,

    /// Events recorded recently; decays after a quiet period.
    pub recent_event_count: u32,

    pub critical: bool,

    /// Seconds spent in the current area.
    pub time_in_area: f32,

    /// Seconds spent in the current phase.
    pub time_in_phase: f32,

    /// Seconds since the last recorded event.
    pub time_since_last_event: f32,
}

impl Default for PsychologicalState {
    fn default() -> Self {
        Self {
            tension: 0.0,
            phase: DEFAULT_PHASE.to_string(),
            narrative_weights: BTreeMap::new(),
            variables: HashMap::new(),
            event_counters: HashMap::new(),
            recent_event_count: 0,
            critical: false,
            time_in_area: 0.0,
            time_in_phase: 0.0,
            time_since_last_event: 0.0,
        }
    }
}

impl PsychologicalState {
    /// Create a state seeded with the given narrative weights.
    pub fn with_weights<I, S>(weights: I) -> Self
    where
        I: IntoIterator<Item = (S, f32)>,
        S: Into<String>,
    {
        let mut state = Self::default();
        state.set_weights(weights);
        state
    }

    /// All narrative weights, ordered by theme name.
    pub fn narrative_weights(&self) -> &BTreeMap<String, f32> {
        &self.narrative_weights
    }

    /// Weight of a single theme (0.0 if unknown).
    pub fn weight(&self, theme: &str) -> f32 {
        self.narrative_weights.get(theme).copied().unwrap_or(0.0)
    }

    /// Set one theme weight and rescale the others so the map sums to 1.0.
    ///
    /// The other themes keep their relative proportions. If they are all zero
    /// the remainder is split evenly between them.
    pub fn set_weight(&mut self, theme: impl Into<String>, weight: f32) {
        let theme = theme.into();
        let weight = clamp_unit(weight);

        let others: Vec<String> = self
            .narrative_weights
            .keys()
            .filter(|k| **k != theme)
            .cloned()
            .collect();

        if others.is_empty() {
            self.narrative_weights.insert(theme, 1.0);
            return;
        }

        let remainder = 1.0 - weight;
        let others_total: f32 = others
            .iter()
            .map(|k| self.narrative_weights.get(k).copied().unwrap_or(0.0))
            .sum();

        for key in &others {
            if let Some(w) = self.narrative_weights.get_mut(key) {
                *w = if others_total > f32::EPSILON {
                    *w / others_total * remainder
                } else {
                    remainder / others.len() as f32
                };
            }
        }
        self.narrative_weights.insert(theme, weight);
    }

    /// Replace several weights at once, then renormalize the whole map.
    pub fn set_weights<I, S>(&mut self, weights: I)
    where
        I: IntoIterator<Item = (S, f32)>,
        S: Into<String>,
    {
        for (theme, weight) in weights {
            self.narrative_weights.insert(theme.into(), clamp_unit(weight));
        }
        self.renormalize_weights();
    }

    /// Remove all weights.
    pub fn clear_weights(&mut self) {
        self.narrative_weights.clear();
    }

    /// Sum of all narrative weights.
    pub fn weight_total(&self) -> f32 {
        self.narrative_weights.values().sum()
    }

    /// Theme with the highest weight.
    pub fn dominant_theme(&self) -> Option<(&str, f32)> {
        self.narrative_weights
            .iter()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(theme, weight)| (theme.as_str(), *weight))
    }

    /// Largest absolute weight change between two states over all themes.
    pub fn max_weight_delta(&self, other: &PsychologicalState) -> f32 {
        self.narrative_weights
            .keys()
            .chain(other.narrative_weights.keys())
            .map(|theme| (self.weight(theme) - other.weight(theme)).abs())
            .fold(0.0, f32::max)
    }

    fn renormalize_weights(&mut self) {
        if self.narrative_weights.is_empty() {
            return;
        }

        let total = self.weight_total();
        if total > f32::EPSILON {
            for weight in self.narrative_weights.values_mut() {
                *weight /= total;
            }
        } else {
            let even = 1.0 / self.narrative_weights.len() as f32;
            for weight in self.narrative_weights.values_mut() {
                *weight = even;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> PsychologicalState {
        PsychologicalState::with_weights([
            ("isolation", 0.25),
            ("paranoia", 0.25),
            ("loss", 0.25),
            ("guilt", 0.25),
        ])
    }

    #[test]
    fn test_default_state() {
        let state = PsychologicalState::default();
        assert_eq!(state.phase, "introduction");
        assert_eq!(state.tension, 0.0);
        assert!(state.narrative_weights().is_empty());
        assert!(!state.critical);
    }

    #[test]
    fn test_set_weight_keeps_sum() {
        let mut state = seeded();

        state.set_weight("paranoia", 0.7);

        assert!((state.weight_total() - 1.0).abs() < 1e-4);
        assert!((state.weight("paranoia") - 0.7).abs() < 1e-4);
        // Others keep their proportions: 0.3 split three ways
        assert!((state.weight("loss") - 0.1).abs() < 1e-4);
    }

    #[test]
    fn test_set_weight_sequence_sums_to_one() {
        let mut state = seeded();
        let updates = [
            ("loss", 0.9),
            ("guilt", 0.0),
            ("isolation", 1.5),
            ("dread", 0.3),
            ("paranoia", -2.0),
            ("loss", 0.42),
        ];

        for (theme, weight) in updates {
            state.set_weight(theme, weight);
            assert!(
                (state.weight_total() - 1.0).abs() < 1e-4,
                "sum drifted to {} after setting {}",
                state.weight_total(),
                theme
            );
        }
    }

    #[test]
    fn test_set_weight_when_others_are_zero() {
        let mut state = PsychologicalState::with_weights([("a", 1.0), ("b", 0.0), ("c", 0.0)]);

        state.set_weight("a", 0.4);

        assert!((state.weight("b") - 0.3).abs() < 1e-4);
        assert!((state.weight("c") - 0.3).abs() < 1e-4);
    }

    #[test]
    fn test_single_theme_is_always_one() {
        let mut state = PsychologicalState::default();
        state.set_weight("dread", 0.2);
        assert_eq!(state.weight("dread"), 1.0);
    }

    #[test]
    fn test_bulk_weights_renormalize() {
        let state = PsychologicalState::with_weights([("a", 2.0), ("b", 1.0), ("c", 0.0)]);
        // Inputs are clamped before normalizing
        assert!((state.weight("a") - 0.5).abs() < 1e-4);
        assert!((state.weight("b") - 0.5).abs() < 1e-4);

        let zeros = PsychologicalState::with_weights([("a", 0.0), ("b", 0.0)]);
        assert!((zeros.weight("a") - 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_max_weight_delta() {
        let before = seeded();
        let mut after = before.clone();
        after.set_weight("guilt", 0.55);

        assert!((after.max_weight_delta(&before) - 0.3).abs() < 1e-4);
    }

    #[test]
    fn test_dynamic_value_serializable() {
        assert!(DynamicValue::Number(1.5).is_serializable());
        assert!(!DynamicValue::Number(f64::NAN).is_serializable());
        assert!(!DynamicValue::Number(f64::INFINITY).is_serializable());
        assert!(DynamicValue::Blob(vec![1, 2, 3]).is_serializable());
        assert_eq!(DynamicValue::from("x").as_text(), Some("x"));
        assert_eq!(DynamicValue::from(true).as_bool(), Some(true));
    }

    #[test]
    fn test_clamp_unit() {
        assert_eq!(clamp_unit(1.5), 1.0);
        assert_eq!(clamp_unit(-0.5), 0.0);
        assert_eq!(clamp_unit(f32::NAN), 0.0);
    }
}
