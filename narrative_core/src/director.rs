//! Narrative director - owns the control loop.
//!
//! The host calls `tick(dt)` at its own cadence. Each tick runs, in order:
//! 1. Apply completion messages from the intent scheduler
//! 2. Advance the state store
//! 3. Advance the metric engine
//! 4. Route the adjustments the engine emitted
//! 5. Steer tension towards the profile's tension signal
//! 6. Record a transition if the tick changed the state significantly
//!
//! The director is the only writer of the state store and metric engine.

use log::{debug, warn};
use psyche_state::{names, DynamicValue, Notification, NotificationBridge, StateStore};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::config::CoreConfig;
use crate::events::FeedbackEvent;
use crate::intent::{
    CoherenceValidator, ContentScorer, CoreMessage, GenerationService, IntentScheduler,
    IntentTicket, LexiconScorer, PermissiveValidator, SchedulerServices,
};
use crate::metrics::{
    AdjustmentRequest, AdjustmentTarget, MetricEngine, HORROR_EFFECTIVENESS, NARRATIVE_COHERENCE,
    PERSONAL_RESONANCE, PSYCHOLOGICAL_IMPACT,
};
use crate::profile::ProfileSource;

/// Event type fed back for every delivered piece of content.
pub const GENERATED_CONTENT: &str = "generated_content";

/// Collaborators injected into the director.
#[derive(Clone)]
pub struct DirectorServices {
    pub profile: Arc<dyn ProfileSource>,
    pub generator: Arc<dyn GenerationService>,
    pub validator: Arc<dyn CoherenceValidator>,
    pub scorer: Arc<dyn ContentScorer>,
    pub bridge: Arc<NotificationBridge>,
}

impl DirectorServices {
    /// Services with a permissive validator, the lexicon scorer and a fresh bridge.
    pub fn new(profile: Arc<dyn ProfileSource>, generator: Arc<dyn GenerationService>) -> Self {
        Self {
            profile,
            generator,
            validator: Arc::new(PermissiveValidator),
            scorer: Arc::new(LexiconScorer::default()),
            bridge: NotificationBridge::shared(),
        }
    }

    pub fn with_validator(mut self, validator: Arc<dyn CoherenceValidator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_scorer(mut self, scorer: Arc<dyn ContentScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn with_bridge(mut self, bridge: Arc<NotificationBridge>) -> Self {
        self.bridge = bridge;
        self
    }
}

/// What a single tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub completions: usize,
    pub adjustments: usize,
    pub significant: bool,
}

pub struct NarrativeDirector {
    store: StateStore,
    metrics: MetricEngine,
    scheduler: IntentScheduler,
    profile: Arc<dyn ProfileSource>,
    bridge: Arc<NotificationBridge>,
    completions: mpsc::UnboundedReceiver<CoreMessage>,
}

impl NarrativeDirector {
    pub fn new(config: CoreConfig, services: DirectorServices) -> Self {
        let (sender, completions) = mpsc::unbounded_channel();

        let store = StateStore::new(config.state.clone(), services.bridge.clone());
        let metrics = MetricEngine::new(config.metrics.clone(), config.compile_rules());
        let scheduler = IntentScheduler::new(
            config.scheduler,
            SchedulerServices {
                profile: services.profile.clone(),
                generator: services.generator,
                validator: services.validator,
                scorer: services.scorer,
                bridge: services.bridge.clone(),
                completions: Some(sender),
            },
        );

        Self {
            store,
            metrics,
            scheduler,
            profile: services.profile,
            bridge: services.bridge,
            completions,
        }
    }

    /// Get the state store.
    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut StateStore {
        &mut self.store
    }

    /// Get the metric engine.
    pub fn metrics(&self) -> &MetricEngine {
        &self.metrics
    }

    pub fn metrics_mut(&mut self) -> &mut MetricEngine {
        &mut self.metrics
    }

    /// Get the intent scheduler.
    pub fn scheduler(&self) -> &IntentScheduler {
        &self.scheduler
    }

    /// Get the notification bridge.
    pub fn bridge(&self) -> &Arc<NotificationBridge> {
        &self.bridge
    }

    /// Record a gameplay event in the state store.
    pub fn record_event(&mut self, event_type: &str) -> bool {
        self.store.record_event(event_type)
    }

    /// Hand a feedback event to the metric engine.
    pub fn submit_feedback(&mut self, event: FeedbackEvent) -> bool {
        self.metrics.submit_feedback(event)
    }

    /// Queue an intent with the scheduler.
    pub fn submit_intent(
        &self,
        intent_type: &str,
        context: &str,
        parameters: BTreeMap<String, DynamicValue>,
    ) -> IntentTicket {
        self.scheduler.submit(intent_type, context, parameters)
    }

    /// Advance the whole loop by `dt` seconds.
    pub fn tick(&mut self, dt: f64) -> TickSummary {
        let previous = self.store.state().clone();
        let mut summary = TickSummary::default();
        let mut trigger: Option<String> = None;

        while let Ok(message) = self.completions.try_recv() {
            let label = self.apply_completion(message);
            if trigger.is_none() {
                trigger = label;
            }
            summary.completions += 1;
        }

        self.store.tick(dt as f32);
        self.metrics.tick(dt);

        for adjustment in self.metrics.drain_adjustments() {
            if trigger.is_none() {
                trigger = Some(adjustment.source.to_string());
            }
            self.route(&adjustment);
            summary.adjustments += 1;
        }

        let signal = self.profile.read().tension_signal;
        self.store.update_tension(signal);

        let trigger = trigger.unwrap_or_else(|| "tick".to_string());
        summary.significant = self.store.evaluate_significance(&previous, &trigger);
        summary
    }

    fn apply_completion(&mut self, message: CoreMessage) -> Option<String> {
        match message {
            CoreMessage::IntentCompleted {
                intent_type,
                scores,
                enhanced,
                ..
            } => {
                debug!("absorbing '{}' (enhanced: {})", intent_type, enhanced);
                let event = FeedbackEvent::new(GENERATED_CONTENT, scores.psychological_impact)
                    .with_context(intent_type.clone())
                    .with_impact(PSYCHOLOGICAL_IMPACT, scores.psychological_impact)
                    .with_impact(HORROR_EFFECTIVENESS, scores.horror_effectiveness)
                    .with_impact(PERSONAL_RESONANCE, scores.personal_resonance)
                    .with_impact(NARRATIVE_COHERENCE, scores.coherence)
                    .with_metrics([
                        PSYCHOLOGICAL_IMPACT,
                        HORROR_EFFECTIVENESS,
                        PERSONAL_RESONANCE,
                        NARRATIVE_COHERENCE,
                    ]);
                self.metrics.submit_feedback(event);

                let label = format!("intent:{}", intent_type);
                self.store.record_event(&label);
                Some(label)
            }
            CoreMessage::IntentFailed {
                intent_type,
                reason,
                ..
            } => {
                warn!("intent '{}' produced nothing: {}", intent_type, reason);
                None
            }
        }
    }

    fn route(&mut self, adjustment: &AdjustmentRequest) {
        let magnitude = adjustment.magnitude;
        match adjustment.target() {
            AdjustmentTarget::Tension => {
                self.store.adjust_tension(magnitude);
            }
            AdjustmentTarget::Theme(theme) => {
                self.store.adjust_narrative_weight(theme, magnitude);
            }
            AdjustmentTarget::Metric(id) => {
                if !self.metrics.nudge_metric(id, magnitude) {
                    debug!("{} targets unknown metric '{}'", adjustment.source, id);
                }
            }
            AdjustmentTarget::Intent(kind) => {
                if magnitude <= 0.0 {
                    return;
                }
                let mut parameters = BTreeMap::new();
                parameters.insert(
                    "magnitude".to_string(),
                    DynamicValue::Number(magnitude as f64),
                );
                // Ticket dropped: the result comes back as a completion message
                let _ = self
                    .scheduler
                    .submit(kind, &adjustment.source.to_string(), parameters);
            }
            AdjustmentTarget::External(target) => {
                self.bridge.publish(
                    names::ADAPTATION,
                    Notification::Adaptation {
                        source: adjustment.source.to_string(),
                        target: target.to_string(),
                        magnitude,
                    },
                );
            }
        }
    }
}

impl std::fmt::Debug for NarrativeDirector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NarrativeDirector")
            .field("store", &self.store)
            .field("metrics", &self.metrics)
            .field("scheduler", &self.scheduler)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GenerationError;
    use crate::events::ADJUSTMENTS_KEY;
    use crate::intent::ContentScores;
    use crate::context_assembler::ContextBundle;
    use crate::metrics::PLAYER_ENGAGEMENT;
    use crate::profile::{ProfileReading, StaticProfile};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::time::Duration;

    struct EchoGenerator;

    #[async_trait]
    impl GenerationService for EchoGenerator {
        async fn generate(&self, _prompt: &str, tag: &str) -> Result<String, GenerationError> {
            Ok(format!("Something answers the {}.", tag))
        }
    }

    struct FixedScorer(ContentScores);

    impl ContentScorer for FixedScorer {
        fn score(&self, _content: &str, _bundle: &ContextBundle) -> ContentScores {
            self.0
        }
    }

    fn director_with(config: CoreConfig) -> NarrativeDirector {
        let profile = Arc::new(StaticProfile::new(
            ProfileReading::default()
                .with_level("fear", 0.5)
                .with_emotion("dread", 0.5)
                .with_bias("negativity", 0.5),
        ));
        let services = DirectorServices::new(profile, Arc::new(EchoGenerator))
            .with_scorer(Arc::new(FixedScorer(ContentScores::new(0.9, 0.9, 0.7))));
        NarrativeDirector::new(config, services)
    }

    fn quiet_config() -> CoreConfig {
        CoreConfig {
            rules: Vec::new(),
            ..CoreConfig::default()
        }
    }

    #[tokio::test]
    async fn test_routes_adjustments_by_target() {
        let mut director = director_with(quiet_config());
        let published = Arc::new(Mutex::new(Vec::new()));
        let sink = published.clone();
        director.bridge().subscribe(names::ADAPTATION, move |n| sink.lock().push(n.clone()));

        let guilt_before = director.store().state().weight("guilt");
        director.submit_feedback(FeedbackEvent::new("shudder", 0.2).immediate().with_metadata(
            ADJUSTMENTS_KEY,
            DynamicValue::from(
                "tension=0.3; theme:guilt=0.2; metric:player_engagement=0.4; lighting.flicker=0.5",
            ),
        ));

        let summary = director.tick(0.1);

        assert_eq!(summary.adjustments, 4);
        assert!(summary.significant);
        assert!(director.store().state().tension > 0.25);
        assert!(director.store().state().weight("guilt") > guilt_before);
        assert!((director.store().state().weight_total() - 1.0).abs() < 1e-4);
        assert_eq!(director.metrics().metric_value(PLAYER_ENGAGEMENT), Some(0.4));

        let published = published.lock();
        assert_eq!(published.len(), 1);
        match &published[0] {
            Notification::Adaptation { source, target, .. } => {
                assert_eq!(source, "immediate:shudder");
                assert_eq!(target, "lighting.flicker");
            }
            other => panic!("unexpected notification {:?}", other),
        }

        let history = director.store().history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].trigger, "immediate:shudder");
    }

    #[tokio::test(start_paused = true)]
    async fn test_completed_intent_feeds_back() {
        let mut director = director_with(quiet_config());

        let result = director
            .submit_intent("scare", "the cellar", BTreeMap::new())
            .await
            .unwrap();
        assert!(!result.enhanced);

        let summary = director.tick(5.0);

        assert_eq!(summary.completions, 1);
        assert_eq!(director.store().event_count("intent:scare"), 1);
        let impact = director.metrics().metric_value(PSYCHOLOGICAL_IMPACT).unwrap();
        let horror = director.metrics().metric_value(HORROR_EFFECTIVENESS).unwrap();
        assert!(impact > 0.2, "impact = {}", impact);
        assert!(horror > 0.2, "horror = {}", horror);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rule_submits_intent() {
        let mut director = director_with(CoreConfig::default());
        director.metrics_mut().nudge_metric(PLAYER_ENGAGEMENT, 0.5);

        let summary = director.tick(5.0);
        assert_eq!(summary.adjustments, 2);
        assert_eq!(director.scheduler().stats().submitted, 1);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(director.scheduler().stats().completed, 1);

        let summary = director.tick(1.0);
        assert_eq!(summary.completions, 1);
        assert_eq!(director.store().event_count("intent:scare"), 1);
    }

    #[test]
    fn test_tension_follows_profile_signal() {
        let profile = Arc::new(StaticProfile::new(ProfileReading::default().with_tension_signal(1.0)));
        let services = DirectorServices::new(profile.clone(), Arc::new(EchoGenerator));
        let mut director = NarrativeDirector::new(quiet_config(), services);

        for _ in 0..20 {
            director.tick(0.5);
        }
        let raised = director.store().state().tension;
        assert!(raised > 0.3, "tension = {}", raised);

        profile.set_tension_signal(0.0);
        for _ in 0..20 {
            director.tick(0.5);
        }
        assert!(director.store().state().tension < raised);
    }
}
