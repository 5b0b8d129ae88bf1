//! Persisted snapshot - a small flat key-value view of the state.
//!
//! ```json
//! {
//!   "phase": "descent",
//!   "tension": 0.42,
//!   "time_in_area": 12.0,
//!   "time_in_phase": 3.5,
//!   "narrative_weights": { "guilt": 0.4, "loss": 0.6 },
//!   "variables": { "door_opened": { "Bool": true } }
//! }
//! ```
//!
//! Loading is field-by-field: a malformed field is skipped with a warning and
//! the remaining fields still load.

use log::warn;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};

use super::StateStore;
use crate::error::{StateError, StateResult};
use crate::state::{clamp_unit, DynamicValue, PsychologicalState};

const PHASE: &str = "phase";
const TENSION: &str = "tension";
const TIME_IN_AREA: &str = "time_in_area";
const TIME_IN_PHASE: &str = "time_in_phase";
const NARRATIVE_WEIGHTS: &str = "narrative_weights";
const VARIABLES: &str = "variables";

/// Encode the persistable subset of a state.
///
/// Variables that do not serialize cleanly (non-finite numbers) are left out.
pub fn encode_snapshot(state: &PsychologicalState) -> Value {
    let mut snapshot = Map::new();
    snapshot.insert(PHASE.into(), Value::from(state.phase.clone()));
    snapshot.insert(TENSION.into(), Value::from(state.tension as f64));
    snapshot.insert(TIME_IN_AREA.into(), Value::from(state.time_in_area as f64));
    snapshot.insert(TIME_IN_PHASE.into(), Value::from(state.time_in_phase as f64));

    let weights: Map<String, Value> = state
        .narrative_weights()
        .iter()
        .map(|(theme, weight)| (theme.clone(), Value::from(*weight as f64)))
        .collect();
    snapshot.insert(NARRATIVE_WEIGHTS.into(), Value::Object(weights));

    let variables: Map<String, Value> = state
        .variables
        .iter()
        .filter(|(_, value)| value.is_serializable())
        .filter_map(|(key, value)| {
            serde_json::to_value(value)
                .ok()
                .map(|encoded| (key.clone(), encoded))
        })
        .collect();
    snapshot.insert(VARIABLES.into(), Value::Object(variables));

    Value::Object(snapshot)
}

/// Decode a snapshot on top of the documented defaults.
///
/// Returns the decoded state together with every field that had to be
/// skipped. An empty or missing snapshot yields the defaults and no errors.
pub fn decode_snapshot(
    snapshot: &Value,
    default_weights: &BTreeMap<String, f32>,
) -> (PsychologicalState, Vec<StateError>) {
    let mut state = PsychologicalState::default();
    let mut errors = Vec::new();

    let fields = match snapshot {
        Value::Object(fields) => fields.clone(),
        Value::Null => Map::new(),
        other => {
            errors.push(StateError::corruption(
                "snapshot",
                format!("expected an object, found {}", type_name(other)),
            ));
            Map::new()
        }
    };

    if let Some(value) = fields.get(PHASE) {
        match value.as_str() {
            Some(phase) if !phase.is_empty() => state.phase = phase.to_string(),
            _ => errors.push(StateError::corruption(PHASE, "expected a non-empty string")),
        }
    }

    if let Some(value) = fields.get(TENSION) {
        match finite(value) {
            Some(tension) => state.tension = clamp_unit(tension as f32),
            None => errors.push(StateError::corruption(TENSION, "expected a finite number")),
        }
    }

    for (key, slot) in [
        (TIME_IN_AREA, &mut state.time_in_area),
        (TIME_IN_PHASE, &mut state.time_in_phase),
    ] {
        if let Some(value) = fields.get(key) {
            match finite(value) {
                Some(secs) if secs >= 0.0 => *slot = secs as f32,
                _ => errors.push(StateError::corruption(key, "expected a non-negative number")),
            }
        }
    }

    let mut weights = BTreeMap::new();
    match fields.get(NARRATIVE_WEIGHTS) {
        Some(Value::Object(entries)) => {
            for (theme, value) in entries {
                match finite(value) {
                    Some(weight) => {
                        weights.insert(theme.clone(), weight as f32);
                    }
                    None => errors.push(StateError::corruption(
                        format!("{}.{}", NARRATIVE_WEIGHTS, theme),
                        "expected a finite number",
                    )),
                }
            }
        }
        Some(Value::Null) | None => {}
        Some(_) => errors.push(StateError::corruption(NARRATIVE_WEIGHTS, "expected a map")),
    }
    if weights.is_empty() {
        weights = default_weights.clone();
    }
    state.set_weights(weights);

    match fields.get(VARIABLES) {
        Some(Value::Object(entries)) => {
            let mut variables = HashMap::new();
            for (key, value) in entries {
                match serde_json::from_value::<DynamicValue>(value.clone()) {
                    Ok(decoded) if decoded.is_serializable() => {
                        variables.insert(key.clone(), decoded);
                    }
                    Ok(_) => errors.push(StateError::corruption(
                        format!("{}.{}", VARIABLES, key),
                        "value is not serializable",
                    )),
                    Err(e) => errors.push(StateError::corruption(
                        format!("{}.{}", VARIABLES, key),
                        e.to_string(),
                    )),
                }
            }
            state.variables = variables;
        }
        Some(Value::Null) | None => {}
        Some(_) => errors.push(StateError::corruption(VARIABLES, "expected a map")),
    }

    (state, errors)
}

fn finite(value: &Value) -> Option<f64> {
    value.as_f64().filter(|n| n.is_finite())
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl StateStore {
    /// Snapshot the current state for persistence.
    pub fn save_snapshot(&self) -> Value {
        encode_snapshot(self.state())
    }

    /// Snapshot the current state as a JSON string.
    pub fn save_snapshot_string(&self) -> StateResult<String> {
        Ok(serde_json::to_string(&self.save_snapshot())?)
    }

    /// Replace the current state with a persisted snapshot.
    ///
    /// Skipped fields are logged and returned. The undo stack is cleared;
    /// transition history is kept.
    pub fn load_snapshot(&mut self, snapshot: &Value) -> Vec<StateError> {
        let (state, errors) = decode_snapshot(snapshot, &self.config().default_weights);
        for error in &errors {
            warn!("skipping snapshot field: {}", error);
        }
        self.reset_with(state);
        errors
    }

    /// Load from a JSON string. Empty input loads the defaults.
    pub fn load_snapshot_str(&mut self, raw: &str) -> Vec<StateError> {
        if raw.trim().is_empty() {
            return self.load_snapshot(&Value::Null);
        }

        match serde_json::from_str::<Value>(raw) {
            Ok(snapshot) => self.load_snapshot(&snapshot),
            Err(e) => {
                let error = StateError::from(e);
                warn!("unreadable snapshot, loading defaults: {}", error);
                let mut errors = self.load_snapshot(&Value::Null);
                errors.insert(0, error);
                errors
            }
        }
    }
}
