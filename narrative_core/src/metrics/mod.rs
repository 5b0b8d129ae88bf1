//! Metric & adaptation engine.
//!
//! Each batch (every `batch_interval_secs` of tick time) runs, in order:
//! 1. **Reinforcement**: drain queued feedback, blend related metrics towards
//!    their impact score weighted by the event's age on the decay curve
//! 2. **Correlation**: blend pairwise correlation towards recent-event overlap
//! 3. **Decay**: multiply every metric by its curve at the time since the
//!    previous batch, including metrics reinforced in step 1
//! 4. **Rules**: fire every ready rule whose condition holds
//!
//! Urgent events (high intensity, reserved critical types, or the
//! `immediate` metadata flag) skip the queue and rule cooldowns.

mod adjustment;
mod decay;
mod metric;
mod rules;

pub use adjustment::*;
pub use decay::*;
pub use metric::*;
pub use rules::*;

use log::{debug, info, warn};
use psyche_state::{clamp_unit, DynamicValue};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

use crate::events::{FeedbackEvent, ADJUSTMENTS_KEY};

/// Supplies the score a metric is pulled towards by an event.
pub trait ImpactEstimator: Send + Sync {
    fn impact(&self, event: &FeedbackEvent, metric_id: &str) -> f32;
}

/// Uses an explicit `impact.<metric>` score when present, else the intensity.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntensityImpact;

impl ImpactEstimator for IntensityImpact {
    fn impact(&self, event: &FeedbackEvent, metric_id: &str) -> f32 {
        event
            .impact_for(metric_id)
            .unwrap_or_else(|| clamp_unit(event.intensity))
    }
}

/// Tuning for the metric engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricConfig {
    /// Tick time between batch passes.
    pub batch_interval_secs: f64,

    /// Fraction of the gap to the impact score closed by a fresh event.
    pub reinforcement_rate: f32,

    /// Confidence gained per event.
    pub confidence_step: f32,

    /// Fraction of the gap to the fresh overlap closed per co-occurrence.
    pub correlation_rate: f32,

    /// Decay curve for metrics without an override.
    pub decay: DecayCurve,

    /// Per-metric decay overrides.
    pub metric_decay: BTreeMap<String, DecayCurve>,

    /// Metrics created alongside the core set.
    pub extra_metrics: Vec<String>,

    /// Event type -> (target -> magnitude per unit intensity) for urgent events.
    pub immediate_adjustments: BTreeMap<String, BTreeMap<String, f32>>,

    /// Target used for urgent events with no configured adjustment.
    pub default_immediate_target: String,

    pub default_immediate_magnitude: f32,
}

impl Default for MetricConfig {
    fn default() -> Self {
        let mut immediate_adjustments = BTreeMap::new();
        immediate_adjustments.insert(
            "fear_response".to_string(),
            [("tension".to_string(), 0.2), ("theme:paranoia".to_string(), 0.05)]
                .into_iter()
                .collect(),
        );
        immediate_adjustments.insert(
            "critical_response".to_string(),
            [("tension".to_string(), 0.3)].into_iter().collect(),
        );

        Self {
            batch_interval_secs: 5.0,
            reinforcement_rate: 0.3,
            confidence_step: 0.1,
            correlation_rate: 0.2,
            decay: DecayCurve::standard(),
            metric_decay: BTreeMap::new(),
            extra_metrics: Vec::new(),
            immediate_adjustments,
            default_immediate_target: "tension".to_string(),
            default_immediate_magnitude: 0.1,
        }
    }
}

/// Owner of the metric table and the rule table.
pub struct MetricEngine {
    config: MetricConfig,
    metrics: BTreeMap<String, Metric>,
    rules: Vec<AdaptationRule>,
    pending: VecDeque<FeedbackEvent>,
    adjustments: Vec<AdjustmentRequest>,
    estimator: Box<dyn ImpactEstimator>,
    /// Seconds advanced through `tick`.
    clock: f64,
    since_batch: f64,
    last_batch: f64,
}

impl MetricEngine {
    /// Create an engine with the core metrics plus any configured extras.
    pub fn new(config: MetricConfig, rules: Vec<AdaptationRule>) -> Self {
        let mut engine = Self {
            metrics: BTreeMap::new(),
            rules,
            pending: VecDeque::new(),
            adjustments: Vec::new(),
            estimator: Box::new(IntensityImpact),
            clock: 0.0,
            since_batch: 0.0,
            last_batch: 0.0,
            config,
        };

        let ids: Vec<String> = CORE_METRICS
            .iter()
            .map(|id| id.to_string())
            .chain(engine.config.extra_metrics.iter().cloned())
            .collect();
        for id in ids {
            let curve = engine.curve_for(&id);
            engine.register_metric(&id, curve);
        }

        engine
    }

    /// Create an engine with default configuration and no rules.
    pub fn with_defaults() -> Self {
        Self::new(MetricConfig::default(), Vec::new())
    }

    /// Replace the impact estimator.
    pub fn with_estimator(mut self, estimator: Box<dyn ImpactEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    /// Get the engine configuration.
    pub fn config(&self) -> &MetricConfig {
        &self.config
    }

    /// Seconds advanced through `tick`.
    pub fn clock(&self) -> f64 {
        self.clock
    }

    /// Add a metric. Returns false if it already exists.
    pub fn register_metric(&mut self, id: &str, decay: DecayCurve) -> bool {
        if self.metrics.contains_key(id) {
            return false;
        }
        self.metrics.insert(id.to_string(), Metric::new(id, decay));
        true
    }

    /// Get a metric by id.
    pub fn metric(&self, id: &str) -> Option<&Metric> {
        self.metrics.get(id)
    }

    /// Get the current value of a metric.
    pub fn metric_value(&self, id: &str) -> Option<f32> {
        self.metrics.get(id).map(Metric::value)
    }

    /// Iterate over all metrics.
    pub fn metrics(&self) -> impl Iterator<Item = &Metric> {
        self.metrics.values()
    }

    /// Current value of every metric.
    pub fn readouts(&self) -> BTreeMap<String, f32> {
        self.metrics
            .iter()
            .map(|(id, metric)| (id.clone(), metric.value()))
            .collect()
    }

    /// Get the learned correlation between two metrics, 0.0 if unknown.
    pub fn correlation(&self, a: &str, b: &str) -> f32 {
        self.metrics.get(a).map(|m| m.correlation(b)).unwrap_or(0.0)
    }

    /// Shift a metric directly. Returns false for unknown metrics.
    pub fn nudge_metric(&mut self, id: &str, delta: f32) -> bool {
        match self.metrics.get_mut(id) {
            Some(metric) => {
                metric.nudge(delta);
                true
            }
            None => false,
        }
    }

    /// Get all rules in evaluation order.
    pub fn rules(&self) -> &[AdaptationRule] {
        &self.rules
    }

    /// Get a rule by id.
    pub fn rule(&self, id: &str) -> Option<&AdaptationRule> {
        self.rules.iter().find(|r| r.id == id)
    }

    /// Append a rule; it is evaluated after the existing ones.
    pub fn add_rule(&mut self, rule: AdaptationRule) {
        self.rules.push(rule);
    }

    /// Toggle a rule at runtime. Returns false for unknown rules.
    pub fn set_rule_active(&mut self, id: &str, active: bool) -> bool {
        match self.rules.iter_mut().find(|r| r.id == id) {
            Some(rule) => {
                rule.active = active;
                true
            }
            None => false,
        }
    }

    /// Get the number of events waiting for the next batch.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Take every adjustment emitted since the last drain.
    pub fn drain_adjustments(&mut self) -> Vec<AdjustmentRequest> {
        std::mem::take(&mut self.adjustments)
    }

    /// Submit a feedback event.
    ///
    /// Urgent events are processed on the spot and return true; others wait
    /// for the next batch.
    pub fn submit_feedback(&mut self, mut event: FeedbackEvent) -> bool {
        if event.timestamp.is_none() {
            event.timestamp = Some(self.clock);
        }

        if event.is_urgent() {
            debug!(
                "processing '{}' immediately (intensity {:.2})",
                event.event_type, event.intensity
            );
            self.process_event(&event);
            self.immediate_adaptation(&event);
            true
        } else {
            self.pending.push_back(event);
            false
        }
    }

    /// Advance the engine clock. Returns true if a batch ran.
    pub fn tick(&mut self, dt: f64) -> bool {
        if !dt.is_finite() || dt <= 0.0 {
            return false;
        }

        self.clock += dt;
        self.since_batch += dt;
        if self.since_batch < self.config.batch_interval_secs {
            return false;
        }

        self.run_batch();
        true
    }

    fn run_batch(&mut self) {
        let elapsed = (self.clock - self.last_batch) as f32;

        while let Some(event) = self.pending.pop_front() {
            self.process_event(&event);
        }

        // Decay uses tick spacing, not per-metric staleness
        for metric in self.metrics.values_mut() {
            let retention = metric.decay.evaluate(elapsed);
            metric.apply_retention(retention);
        }

        self.evaluate_rules();

        self.last_batch = self.clock;
        self.since_batch = 0.0;
    }

    fn process_event(&mut self, event: &FeedbackEvent) {
        let mut related: Vec<&str> = Vec::with_capacity(event.related_metrics.len());
        for id in &event.related_metrics {
            if !self.metrics.contains_key(id.as_str()) {
                debug!("event '{}' names unknown metric '{}'", event.event_type, id);
                continue;
            }
            if !related.contains(&id.as_str()) {
                related.push(id);
            }
        }

        let age = (self.clock - event.timestamp.unwrap_or(self.clock)).max(0.0) as f32;
        for id in &related {
            let impact = self.estimator.impact(event, id);
            if let Some(metric) = self.metrics.get_mut(*id) {
                let time_weight = metric.decay.evaluate(age);
                metric.blend_towards(impact, time_weight * self.config.reinforcement_rate);
                metric.reinforce_confidence(self.config.confidence_step);
                metric.push_event(&event.event_type);
            }
        }

        self.update_correlations(&related);
    }

    fn update_correlations(&mut self, related: &[&str]) {
        let rate = self.config.correlation_rate;
        for (i, a) in related.iter().enumerate() {
            for b in &related[i + 1..] {
                let (overlap, current) = match (self.metrics.get(*a), self.metrics.get(*b)) {
                    (Some(ma), Some(mb)) => (ma.event_overlap(mb), ma.correlation(b)),
                    _ => continue,
                };
                let blended = current + (overlap - current) * rate;

                if let Some(ma) = self.metrics.get_mut(*a) {
                    ma.set_correlation(b, blended);
                }
                if let Some(mb) = self.metrics.get_mut(*b) {
                    mb.set_correlation(a, blended);
                }
            }
        }
    }

    fn evaluate_rules(&mut self) {
        let now = self.clock;
        let metrics = &self.metrics;

        for rule in self.rules.iter_mut() {
            if !rule.is_ready(now) {
                continue;
            }
            if let Some(missing) = rule
                .required_metrics
                .iter()
                .find(|id| !metrics.contains_key(id.as_str()))
            {
                debug!("rule '{}' skipped: metric '{}' missing", rule.id, missing);
                continue;
            }
            if !rule
                .condition
                .evaluate(|id| metrics.get(id).map(Metric::value))
            {
                continue;
            }

            info!("rule '{}' fired at {:.1}s", rule.id, now);
            for (target, magnitude) in &rule.adjustments {
                self.adjustments.push(AdjustmentRequest::new(
                    AdjustmentSource::Rule(rule.id.clone()),
                    target.clone(),
                    *magnitude,
                ));
            }
            rule.mark_triggered(now);
        }
    }

    /// One-off adjustment keyed to an urgent event, bypassing rule cooldowns.
    fn immediate_adaptation(&mut self, event: &FeedbackEvent) {
        let source = AdjustmentSource::Immediate(event.event_type.clone());

        let adjustments: Vec<(String, f32)> = match event.metadata.get(ADJUSTMENTS_KEY) {
            Some(DynamicValue::Text(text)) => match parse_adjustment_text(text) {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!("ignoring adjustments on '{}': {}", event.event_type, e);
                    return;
                }
            },
            Some(other) => {
                warn!(
                    "ignoring adjustments on '{}': expected text, found {:?}",
                    event.event_type, other
                );
                return;
            }
            None => match self.config.immediate_adjustments.get(&event.event_type) {
                Some(configured) => configured
                    .iter()
                    .map(|(target, per_unit)| (target.clone(), per_unit * event.intensity))
                    .collect(),
                None => vec![(
                    self.config.default_immediate_target.clone(),
                    self.config.default_immediate_magnitude * event.intensity,
                )],
            },
        };

        for (target, magnitude) in adjustments {
            self.adjustments
                .push(AdjustmentRequest::new(source.clone(), target, magnitude));
        }
    }

    fn curve_for(&self, id: &str) -> DecayCurve {
        self.config
            .metric_decay
            .get(id)
            .cloned()
            .unwrap_or_else(|| self.config.decay.clone())
    }
}

impl std::fmt::Debug for MetricEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricEngine")
            .field("metrics", &self.readouts())
            .field("rules", &self.rules.len())
            .field("pending", &self.pending.len())
            .field("clock", &self.clock)
            .finish()
    }
}
