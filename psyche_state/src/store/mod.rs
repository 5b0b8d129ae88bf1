//! State store - owns the canonical psychological state and its undo history.
//!
//! All mutation goes through `StateStore`. Notifications are published on the
//! shared `NotificationBridge`:
//! - `high_tension` on every rising edge of the critical predicate
//! - `state_changed` when `evaluate_significance` finds a significant change
//! - `phase_changed` on `transition_phase`

mod snapshot;

pub use snapshot::*;

use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use crate::signals::{names, Notification, NotificationBridge};
use crate::state::{
    clamp_unit, DynamicValue, PsychologicalState, StateTransition, TransitionId,
};

/// Tuning for the state store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// Maximum number of undo snapshots kept.
    pub undo_depth: usize,

    /// Recent events needed to enter the critical state.
    pub critical_event_count: u32,

    /// Tension above which a fresh event is critical.
    pub critical_tension: f32,

    /// How fresh (seconds) that event must be.
    pub critical_window_secs: f32,

    /// Quiet time (seconds) before the recent-event counter starts to decay.
    pub quiet_period_secs: f32,

    /// After the quiet period, one recent event is forgotten per interval.
    pub recent_event_decay_secs: f32,

    /// Linear tension decay per second while not critical.
    pub tension_decay_rate: f32,

    /// Exponential smoothing factor for `update_tension`.
    pub tension_smoothing: f32,

    pub signal_weight: f32,
    pub event_weight: f32,
    pub area_weight: f32,

    /// Recent-event count at which the event term saturates.
    pub event_saturation: f32,

    /// Time in area (seconds) at which the area term saturates.
    pub area_saturation_secs: f32,

    /// Tension movement considered significant.
    pub significant_tension_delta: f32,

    /// Per-theme weight movement considered significant.
    pub significant_weight_delta: f32,

    /// Fixed significance added when the phase changed.
    pub phase_change_bonus: f32,

    /// Narrative weights used for fresh and reloaded states.
    pub default_weights: BTreeMap<String, f32>,
}

impl Default for StateConfig {
    fn default() -> Self {
        let default_weights = [
            ("isolation", 0.25),
            ("paranoia", 0.25),
            ("loss", 0.25),
            ("guilt", 0.25),
        ]
        .into_iter()
        .map(|(theme, weight)| (theme.to_string(), weight))
        .collect();

        Self {
            undo_depth: 10,
            critical_event_count: 5,
            critical_tension: 0.8,
            critical_window_secs: 10.0,
            quiet_period_secs: 30.0,
            recent_event_decay_secs: 5.0,
            tension_decay_rate: 0.01,
            tension_smoothing: 0.1,
            signal_weight: 0.5,
            event_weight: 0.3,
            area_weight: 0.2,
            event_saturation: 5.0,
            area_saturation_secs: 300.0,
            significant_tension_delta: 0.2,
            significant_weight_delta: 0.15,
            phase_change_bonus: 0.3,
            default_weights,
        }
    }
}

/// Owner of the single canonical `PsychologicalState`.
pub struct StateStore {
    config: StateConfig,
    state: PsychologicalState,
    undo_stack: VecDeque<PsychologicalState>,
    history: Vec<StateTransition>,
    bridge: Arc<NotificationBridge>,
    /// Seconds advanced through `tick`.
    clock: f64,
    /// Quiet time accumulated towards the next recent-event decay step.
    recent_decay_accumulator: f32,
}

impl StateStore {
    /// Create a store seeded with the configured default weights.
    pub fn new(config: StateConfig, bridge: Arc<NotificationBridge>) -> Self {
        let state = PsychologicalState::with_weights(config.default_weights.clone());
        Self {
            undo_stack: VecDeque::with_capacity(config.undo_depth),
            config,
            state,
            history: Vec::new(),
            bridge,
            clock: 0.0,
            recent_decay_accumulator: 0.0,
        }
    }

    /// Create a store with default configuration.
    pub fn with_defaults(bridge: Arc<NotificationBridge>) -> Self {
        Self::new(StateConfig::default(), bridge)
    }

    /// Get the current state.
    pub fn state(&self) -> &PsychologicalState {
        &self.state
    }

    /// Get the store configuration.
    pub fn config(&self) -> &StateConfig {
        &self.config
    }

    /// All significant transitions, oldest first.
    pub fn history(&self) -> &[StateTransition] {
        &self.history
    }

    /// Get the number of undo snapshots held.
    pub fn undo_depth(&self) -> usize {
        self.undo_stack.len()
    }

    /// Seconds advanced since the store was created.
    pub fn clock(&self) -> f64 {
        self.clock
    }

    /// Get how many times an event type was recorded.
    pub fn event_count(&self, event_type: &str) -> u32 {
        self.state.event_counters.get(event_type).copied().unwrap_or(0)
    }

    /// Record a narrative event.
    ///
    /// Pushes an undo snapshot, bumps the counters and re-evaluates the
    /// critical predicate. Returns whether the state is critical afterwards.
    pub fn record_event(&mut self, event_type: &str) -> bool {
        self.push_snapshot();

        *self
            .state
            .event_counters
            .entry(event_type.to_string())
            .or_default() += 1;
        self.state.recent_event_count += 1;
        self.state.time_since_last_event = 0.0;
        self.recent_decay_accumulator = 0.0;

        debug!(
            "recorded event '{}' (recent={})",
            event_type, self.state.recent_event_count
        );

        self.refresh_critical()
    }

    /// Advance timers and apply passive decay.
    pub fn tick(&mut self, dt: f32) {
        let dt = if dt.is_finite() { dt.max(0.0) } else { 0.0 };
        if dt == 0.0 {
            return;
        }

        self.clock += dt as f64;
        self.state.time_in_area += dt;
        self.state.time_in_phase += dt;
        self.state.time_since_last_event += dt;

        // Forget recent events one step at a time once the scene goes quiet
        let quiet_excess = self.state.time_since_last_event - self.config.quiet_period_secs;
        if quiet_excess > 0.0 && self.state.recent_event_count > 0 {
            self.recent_decay_accumulator += dt.min(quiet_excess);
            let step = self.config.recent_event_decay_secs.max(f32::EPSILON);
            while self.recent_decay_accumulator >= step && self.state.recent_event_count > 0 {
                self.recent_decay_accumulator -= step;
                self.state.recent_event_count -= 1;
            }
        }

        if !self.state.critical {
            self.state.tension =
                clamp_unit(self.state.tension - self.config.tension_decay_rate * dt);
        }

        self.refresh_critical();
    }

    /// Blend a target tension into the current tension.
    ///
    /// The target combines the external psychological signal, the recent
    /// event count and the time spent in the current area, each capped.
    /// Returns the new tension.
    pub fn update_tension(&mut self, profile_signal: f32) -> f32 {
        let c = &self.config;
        let event_term =
            (self.state.recent_event_count as f32 / c.event_saturation.max(f32::EPSILON)).min(1.0);
        let area_term =
            (self.state.time_in_area / c.area_saturation_secs.max(f32::EPSILON)).min(1.0);
        let target = clamp_unit(
            c.signal_weight * clamp_unit(profile_signal)
                + c.event_weight * event_term
                + c.area_weight * area_term,
        );

        let current = self.state.tension;
        self.state.tension = clamp_unit(current + (target - current) * c.tension_smoothing);
        self.state.tension
    }

    /// Nudge tension by a signed amount.
    pub fn adjust_tension(&mut self, delta: f32) -> f32 {
        self.state.tension = clamp_unit(self.state.tension + delta);
        self.state.tension
    }

    /// Compare the current state against `previous` and log a transition if
    /// the change is significant.
    pub fn evaluate_significance(&mut self, previous: &PsychologicalState, trigger: &str) -> bool {
        let tension_delta = (self.state.tension - previous.tension).abs();
        let phase_changed = self.state.phase != previous.phase;
        let weight_delta = self.state.max_weight_delta(previous);

        let significant = tension_delta > self.config.significant_tension_delta
            || phase_changed
            || weight_delta > self.config.significant_weight_delta;
        if !significant {
            return false;
        }

        let bonus = if phase_changed {
            self.config.phase_change_bonus
        } else {
            0.0
        };
        let transition = StateTransition {
            id: TransitionId::new(),
            previous: previous.clone(),
            current: self.state.clone(),
            trigger: trigger.to_string(),
            significance: clamp_unit(bonus + tension_delta + weight_delta),
            timestamp: self.clock,
        };

        info!(
            "significant transition '{}' (significance {:.2})",
            trigger, transition.significance
        );

        self.history.push(transition.clone());
        self.bridge.publish(
            names::STATE_CHANGED,
            Notification::StateChanged(Box::new(transition)),
        );
        true
    }

    /// Restore the most recent snapshot. Returns false if there was none.
    pub fn undo(&mut self) -> bool {
        match self.undo_stack.pop_back() {
            Some(previous) => {
                self.state = previous;
                true
            }
            None => false,
        }
    }

    /// Move to a new narrative phase. Returns false if already in it.
    pub fn transition_phase(&mut self, new_phase: &str) -> bool {
        if self.state.phase == new_phase {
            return false;
        }

        let old = std::mem::replace(&mut self.state.phase, new_phase.to_string());
        self.state.time_in_phase = 0.0;

        info!("phase changed: {} -> {}", old, new_phase);
        self.bridge.publish(
            names::PHASE_CHANGED,
            Notification::PhaseChanged {
                old,
                new: new_phase.to_string(),
            },
        );
        true
    }

    /// Reset the area timer when the participant enters a new area.
    pub fn enter_area(&mut self) {
        self.state.time_in_area = 0.0;
    }

    pub fn set_narrative_weight(&mut self, theme: &str, weight: f32) {
        self.state.set_weight(theme, weight);
    }

    pub fn set_narrative_weights<I, S>(&mut self, weights: I)
    where
        I: IntoIterator<Item = (S, f32)>,
        S: Into<String>,
    {
        self.state.set_weights(weights);
    }

    /// Shift a theme weight by a signed amount, keeping the map normalized.
    pub fn adjust_narrative_weight(&mut self, theme: &str, delta: f32) {
        let current = self.state.weight(theme);
        self.state.set_weight(theme, current + delta);
    }

    pub fn set_variable(&mut self, key: impl Into<String>, value: DynamicValue) {
        self.state.variables.insert(key.into(), value);
    }

    /// Get a dynamic variable.
    pub fn variable(&self, key: &str) -> Option<&DynamicValue> {
        self.state.variables.get(key)
    }

    pub fn remove_variable(&mut self, key: &str) -> Option<DynamicValue> {
        self.state.variables.remove(key)
    }

    fn push_snapshot(&mut self) {
        if self.config.undo_depth == 0 {
            return;
        }
        if self.undo_stack.len() >= self.config.undo_depth {
            self.undo_stack.pop_front();
        }
        self.undo_stack.push_back(self.state.clone());
    }

    fn is_critical_now(&self) -> bool {
        let c = &self.config;
        self.state.recent_event_count >= c.critical_event_count
            || (self.state.tension > c.critical_tension
                && self.state.time_since_last_event < c.critical_window_secs)
    }

    /// Update the critical flag, notifying only on a rising edge.
    fn refresh_critical(&mut self) -> bool {
        let critical = self.is_critical_now();

        if critical && !self.state.critical {
            self.state.critical = true;
            info!(
                "critical state entered (tension {:.2}, recent events {})",
                self.state.tension, self.state.recent_event_count
            );
            self.bridge.publish(
                names::HIGH_TENSION,
                Notification::HighTension {
                    tension: self.state.tension,
                    recent_events: self.state.recent_event_count,
                },
            );
        } else if !critical && self.state.critical {
            self.state.critical = false;
            debug!("critical state cleared");
        }

        self.state.critical
    }

    fn reset_with(&mut self, state: PsychologicalState) {
        self.state = state;
        self.undo_stack.clear();
        self.recent_decay_accumulator = 0.0;
    }
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore")
            .field("state", &self.state)
            .field("undo_depth", &self.undo_stack.len())
            .field("history", &self.history.len())
            .field("clock", &self.clock)
            .finish()
    }
}
