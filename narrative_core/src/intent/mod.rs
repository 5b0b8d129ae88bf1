//! Intent Scheduler - turns "something changed enough" into generated content.
//!
//! Requests are queued FIFO and drained by a single background task:
//! 1. **Rate limit**: wait until `min_interval` has passed since the last
//!    dispatch finished, polling at most every `rate_limit_poll`
//! 2. **Context**: assemble profile levels, dominant emotion and bias, and
//!    the most resonant themes
//! 3. **Generate**: call the generation service under `generation_timeout`
//! 4. **Score & validate**: measure the content and check its coherence
//! 5. **Enhance**: one extra generation pass when validation fails or the
//!    headline scores are under their floors
//! 6. **Tone**: reshape the content for the participant's dominant trait
//! 7. **Report**: resolve the caller's ticket, publish a notification and
//!    hand the readouts back to the director
//!
//! Exactly one generation call is in flight at any time.

mod enhance;
mod request;
mod scoring;
mod services;

pub use enhance::*;
pub use request::*;
pub use scoring::*;
pub use services::*;

use log::{debug, info, warn};
use parking_lot::Mutex;
use psyche_state::{clamp_unit, names, DynamicValue, Notification, NotificationBridge};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::context_assembler::{ContextAssembler, ContextBundle, ContextConfig};
use crate::error::{GenerationError, IntentError, IntentOutcome};
use crate::profile::{ProfileReading, ProfileSource};

/// Scheduler tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Minimum seconds between the end of one dispatch and the next.
    pub min_interval_secs: f64,

    /// Longest single sleep while rate limited.
    pub rate_limit_poll_secs: f64,

    pub generation_timeout_secs: f64,

    /// Requests below this priority are shed on submission.
    pub min_priority: f32,

    pub queue_capacity: usize,

    /// Enhance when psychological impact is below this.
    pub impact_floor: f32,

    /// Enhance when horror effectiveness is below this.
    pub horror_floor: f32,

    /// Intent type -> base priority weight.
    pub base_weights: BTreeMap<String, f32>,

    pub default_base_weight: f32,

    /// Finished intents kept for `timeline()`.
    pub timeline_capacity: usize,

    pub context: ContextConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        let base_weights = [
            ("scare", 0.8),
            ("revelation", 0.7),
            ("atmosphere", 0.5),
            ("calm", 0.4),
        ]
        .into_iter()
        .map(|(kind, weight)| (kind.to_string(), weight))
        .collect();

        Self {
            min_interval_secs: 15.0,
            rate_limit_poll_secs: 1.0,
            generation_timeout_secs: 30.0,
            min_priority: 0.02,
            queue_capacity: 32,
            impact_floor: 0.7,
            horror_floor: 0.6,
            base_weights,
            default_base_weight: 0.5,
            timeline_capacity: 100,
            context: ContextConfig::default(),
        }
    }
}

impl SchedulerConfig {
    pub fn base_weight(&self, intent_type: &str) -> f32 {
        clamp_unit(
            self.base_weights
                .get(intent_type)
                .copied()
                .unwrap_or(self.default_base_weight),
        )
    }

    pub fn min_interval(&self) -> Duration {
        secs(self.min_interval_secs)
    }

    pub fn rate_limit_poll(&self) -> Duration {
        secs(self.rate_limit_poll_secs)
    }

    pub fn generation_timeout(&self) -> Duration {
        secs(self.generation_timeout_secs)
    }
}

/// Longest duration any scheduler setting may ask for.
pub const MAX_DURATION_SECS: f64 = 86_400.0;

/// Negative and non-finite values mean zero; anything past a day is capped.
fn secs(value: f64) -> Duration {
    if value.is_finite() && value > 0.0 {
        Duration::try_from_secs_f64(value.min(MAX_DURATION_SECS)).unwrap_or(Duration::ZERO)
    } else {
        Duration::ZERO
    }
}

/// Results the director applies on its next tick.
#[derive(Debug, Clone, PartialEq)]
pub enum CoreMessage {
    IntentCompleted {
        intent_id: IntentId,
        intent_type: String,
        scores: ContentScores,
        enhanced: bool,
    },
    IntentFailed {
        intent_id: IntentId,
        intent_type: String,
        reason: String,
    },
}

/// Everything the scheduler calls out to.
#[derive(Clone)]
pub struct SchedulerServices {
    pub profile: Arc<dyn ProfileSource>,
    pub generator: Arc<dyn GenerationService>,
    pub validator: Arc<dyn CoherenceValidator>,
    pub scorer: Arc<dyn ContentScorer>,
    pub bridge: Arc<NotificationBridge>,
    /// Where completion readouts go.
    pub completions: Option<mpsc::UnboundedSender<CoreMessage>>,
}

struct Pending {
    request: IntentRequest,
    reply: oneshot::Sender<IntentOutcome<IntentResult>>,
}

#[derive(Default)]
struct SchedulerState {
    queue: VecDeque<Pending>,
    /// In-flight intents only; finished ones live in the timeline.
    stages: HashMap<IntentId, IntentStage>,
    last_dispatch: Option<Instant>,
    /// Intent popped by the drain task and not yet finished.
    in_flight: Option<IntentId>,
    draining: bool,
    stats: SchedulerStats,
    timeline: VecDeque<TimelineEntry>,
}

struct Inner {
    config: SchedulerConfig,
    assembler: ContextAssembler,
    services: SchedulerServices,
    state: Mutex<SchedulerState>,
}

/// Handle to the scheduler. Clones share the same queue.
#[derive(Clone)]
pub struct IntentScheduler {
    inner: Arc<Inner>,
}

impl IntentScheduler {
    pub fn new(config: SchedulerConfig, services: SchedulerServices) -> Self {
        let assembler = ContextAssembler::new(config.context.clone());
        Self {
            inner: Arc::new(Inner {
                config,
                assembler,
                services,
                state: Mutex::new(SchedulerState::default()),
            }),
        }
    }

    /// Get the scheduler configuration.
    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Priority for an intent type under a profile reading.
    pub fn priority_for(&self, intent_type: &str, reading: &ProfileReading) -> f32 {
        let base = self.inner.config.base_weight(intent_type);
        let psych = 0.5 + reading.mean_level();
        let emotional = 0.5 + reading.emotion_intensity();
        let bias = 0.5 + reading.bias_strength();
        clamp_unit(base * psych * emotional * bias)
    }

    /// Queue an intent and start draining if idle.
    ///
    /// Must be called from within a tokio runtime for the queue to drain.
    pub fn submit(
        &self,
        intent_type: &str,
        context: &str,
        parameters: BTreeMap<String, DynamicValue>,
    ) -> IntentTicket {
        let reading = self.inner.services.profile.read();
        let priority = self.priority_for(intent_type, &reading);
        let request = IntentRequest::new(intent_type, context, parameters, priority);

        let (reply, receiver) = oneshot::channel();
        let ticket = IntentTicket::new(request.id, priority, receiver);

        let shed = {
            let mut state = self.inner.state.lock();
            state.stats.submitted += 1;
            let shed = self.inner.admit(&mut state, Pending { request, reply });
            if !state.draining && !state.queue.is_empty() {
                match tokio::runtime::Handle::try_current() {
                    Ok(handle) => {
                        state.draining = true;
                        handle.spawn(self.inner.clone().drain());
                    }
                    Err(_) => warn!("no tokio runtime; intent queued until the next submit"),
                }
            }
            shed
        };

        if let Some(pending) = shed {
            self.inner.reject(pending);
        }

        ticket
    }

    /// Current stage of an intent, if it is known.
    pub fn stage(&self, id: IntentId) -> Option<IntentStage> {
        let state = self.inner.state.lock();
        state.stages.get(&id).copied().or_else(|| {
            state
                .timeline
                .iter()
                .rev()
                .find(|entry| entry.intent_id == id)
                .map(|entry| entry.stage)
        })
    }

    /// Get the lifetime counters.
    pub fn stats(&self) -> SchedulerStats {
        self.inner.state.lock().stats
    }

    /// Finished intents, oldest first.
    pub fn timeline(&self) -> Vec<TimelineEntry> {
        self.inner.state.lock().timeline.iter().cloned().collect()
    }

    /// Get the number of intents waiting to dispatch.
    pub fn queue_len(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    /// Whether a drain task is currently running.
    pub fn is_draining(&self) -> bool {
        self.inner.state.lock().draining
    }
}

impl std::fmt::Debug for IntentScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("IntentScheduler")
            .field("queued", &state.queue.len())
            .field("draining", &state.draining)
            .field("stats", &state.stats)
            .finish()
    }
}

impl Inner {
    /// Apply the acceptance policy. Returns the request that lost, if any.
    fn admit(&self, state: &mut SchedulerState, pending: Pending) -> Option<(Pending, String)> {
        let priority = pending.request.priority;

        if priority < self.config.min_priority {
            return Some((pending, "below minimum priority".to_string()));
        }

        if state.queue.len() >= self.config.queue_capacity.max(1) {
            // Latest of the lowest so older requests keep their place
            let lowest = state
                .queue
                .iter()
                .enumerate()
                .min_by(|(ia, a), (ib, b)| {
                    a.request
                        .priority
                        .partial_cmp(&b.request.priority)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| ib.cmp(ia))
                })
                .map(|(index, p)| (index, p.request.priority));

            match lowest {
                Some((index, lowest_priority)) if lowest_priority < priority => {
                    let evicted = state.queue.remove(index);
                    state.stages.insert(pending.request.id, IntentStage::Queued);
                    state.queue.push_back(pending);
                    return evicted.map(|e| {
                        state.stages.remove(&e.request.id);
                        (e, "evicted by a higher priority intent".to_string())
                    });
                }
                _ => return Some((pending, "queue full".to_string())),
            }
        }

        state.stages.insert(pending.request.id, IntentStage::Queued);
        state.queue.push_back(pending);
        None
    }

    fn reject(&self, (pending, reason): (Pending, String)) {
        let Pending { request, reply } = pending;
        info!(
            "shed intent {} '{}' (priority {:.2}): {}",
            request.id, request.intent_type, request.priority, reason
        );

        let now = Instant::now();
        self.finish(
            &request,
            IntentStage::Failed,
            false,
            None,
            now.saturating_duration_since(request.submitted_at),
            Duration::ZERO,
            |stats| stats.shed += 1,
        );
        self.announce_failure(&request, &reason);

        let _ = reply.send(Err(IntentError::Shed {
            priority: request.priority,
            reason,
        }));
    }

    async fn drain(self: Arc<Self>) {
        let mut guard = DrainGuard {
            inner: self.clone(),
            finished: false,
        };

        loop {
            let wait = {
                let mut state = self.state.lock();
                let head = match state.queue.front() {
                    Some(head) => head.request.id,
                    None => {
                        state.draining = false;
                        guard.finished = true;
                        return;
                    }
                };
                let wait = state
                    .last_dispatch
                    .map(|at| self.config.min_interval().saturating_sub(at.elapsed()))
                    .unwrap_or(Duration::ZERO);
                if !wait.is_zero() {
                    state.stages.insert(head, IntentStage::RateLimited);
                }
                wait
            };

            if !wait.is_zero() {
                let poll = self.config.rate_limit_poll();
                let nap = if poll.is_zero() { wait } else { wait.min(poll) };
                tokio::time::sleep(nap).await;
                continue;
            }

            let pending = {
                let mut state = self.state.lock();
                match state.queue.pop_front() {
                    Some(pending) => {
                        state.in_flight = Some(pending.request.id);
                        pending
                    }
                    None => {
                        state.draining = false;
                        guard.finished = true;
                        return;
                    }
                }
            };

            self.dispatch(pending).await;

            {
                let mut state = self.state.lock();
                state.in_flight = None;
                state.last_dispatch = Some(Instant::now());
            }
        }
    }

    async fn dispatch(&self, pending: Pending) {
        let Pending { request, reply } = pending;
        let started = Instant::now();
        let waited = started.saturating_duration_since(request.submitted_at);
        debug!("dispatching intent {} '{}'", request.id, request.intent_type);

        let outcome = self.run(&request).await;
        let duration = started.elapsed();

        match &outcome {
            Ok(result) => {
                info!(
                    "intent {} '{}' completed in {:?} (enhanced: {})",
                    request.id, request.intent_type, duration, result.enhanced
                );
                let enhanced = result.enhanced;
                self.finish(
                    &request,
                    IntentStage::Completed,
                    enhanced,
                    Some(result.scores),
                    waited,
                    duration,
                    |stats| {
                        stats.completed += 1;
                        if enhanced {
                            stats.enhanced += 1;
                        }
                    },
                );
                self.services.bridge.publish(
                    names::INTENT_COMPLETED,
                    Notification::IntentCompleted {
                        intent_id: request.id.to_string(),
                        intent_type: request.intent_type.clone(),
                        enhanced,
                    },
                );
                self.send_completion(CoreMessage::IntentCompleted {
                    intent_id: request.id,
                    intent_type: request.intent_type.clone(),
                    scores: result.scores,
                    enhanced,
                });
            }
            Err(e) => {
                warn!("intent {} '{}' failed: {}", request.id, request.intent_type, e);
                self.finish(
                    &request,
                    IntentStage::Failed,
                    false,
                    None,
                    waited,
                    duration,
                    |stats| stats.failed += 1,
                );
                self.announce_failure(&request, &e.to_string());
            }
        }

        if reply.send(outcome).is_err() {
            debug!("ticket for intent {} was dropped", request.id);
        }
    }

    async fn run(&self, request: &IntentRequest) -> IntentOutcome<IntentResult> {
        let reading = self.services.profile.read();
        let bundle = self.assembler.assemble(request, &reading);

        self.set_stage(request.id, IntentStage::Generating);
        let mut content = self
            .generate(&bundle.to_prompt_string(), &request.intent_type)
            .await?;
        let mut scores = self.services.scorer.score(&content, &bundle);

        self.set_stage(request.id, IntentStage::Validating);
        let mut report = self.validate(&content, &bundle).await;

        let mut techniques = Vec::new();
        let mut enhanced = false;
        if !report.passed || scores.below(self.config.impact_floor, self.config.horror_floor) {
            self.set_stage(request.id, IntentStage::Enhancing);
            debug!(
                "enhancing intent {} (passed: {}, impact {:.2}, horror {:.2})",
                request.id, report.passed, scores.psychological_impact, scores.horror_effectiveness
            );

            let prompt = enhancement_prompt(&content, &bundle, &report, &scores);
            content = self
                .generate(&prompt, &format!("{}:enhance", request.intent_type))
                .await?;
            scores = self.services.scorer.score(&content, &bundle);
            report = self.validate(&content, &bundle).await;
            enhanced = true;
            techniques.push("enhancement".to_string());
        }
        let scores = scores.with_coherence(report.coherence);

        let tone = Tone::for_trait(bundle.dominant_trait.as_deref());
        let content = tone.apply(&content);
        if tone != Tone::Neutral {
            techniques.push(format!("tone:{}", tone.name()));
        }

        let mut follow_ups: Vec<String> = bundle
            .theme_names()
            .map(|theme| format!("deepen:{}", theme))
            .collect();
        if scores.below(self.config.impact_floor, self.config.horror_floor) {
            follow_ups.push(request.intent_type.clone());
        }

        Ok(IntentResult {
            intent_id: request.id,
            intent_type: request.intent_type.clone(),
            content,
            scores,
            validation: report,
            applied_techniques: techniques,
            follow_ups,
            enhanced,
        })
    }

    async fn generate(&self, prompt: &str, tag: &str) -> IntentOutcome<String> {
        let timeout = self.config.generation_timeout();
        match tokio::time::timeout(timeout, self.services.generator.generate(prompt, tag)).await {
            Ok(result) => Ok(result?),
            Err(_) => {
                warn!("generation '{}' timed out after {:?}", tag, timeout);
                Err(GenerationError::Timeout.into())
            }
        }
    }

    /// Validator errors count as failed validation.
    async fn validate(
        &self,
        content: &str,
        bundle: &ContextBundle,
    ) -> ValidationReport {
        match self.services.validator.validate(content, bundle).await {
            Ok(report) => report,
            Err(e) => {
                warn!("{}", e);
                ValidationReport::errored(&e)
            }
        }
    }

    fn set_stage(&self, id: IntentId, stage: IntentStage) {
        self.state.lock().stages.insert(id, stage);
    }

    #[allow(clippy::too_many_arguments)]
    fn finish<F>(
        &self,
        request: &IntentRequest,
        stage: IntentStage,
        enhanced: bool,
        scores: Option<ContentScores>,
        waited: Duration,
        duration: Duration,
        count: F,
    ) where
        F: FnOnce(&mut SchedulerStats),
    {
        let mut state = self.state.lock();
        state.stages.remove(&request.id);
        count(&mut state.stats);

        if self.config.timeline_capacity == 0 {
            return;
        }
        while state.timeline.len() >= self.config.timeline_capacity {
            state.timeline.pop_front();
        }
        state.timeline.push_back(TimelineEntry {
            intent_id: request.id,
            intent_type: request.intent_type.clone(),
            priority: request.priority,
            stage,
            enhanced,
            scores,
            waited,
            duration,
            finished_at: Instant::now(),
        });
    }

    fn announce_failure(&self, request: &IntentRequest, reason: &str) {
        self.services.bridge.publish(
            names::INTENT_FAILED,
            Notification::IntentFailed {
                intent_id: request.id.to_string(),
                intent_type: request.intent_type.clone(),
                reason: reason.to_string(),
            },
        );
        self.send_completion(CoreMessage::IntentFailed {
            intent_id: request.id,
            intent_type: request.intent_type.clone(),
            reason: reason.to_string(),
        });
    }

    fn send_completion(&self, message: CoreMessage) {
        if let Some(sender) = &self.services.completions {
            if sender.send(message).is_err() {
                debug!("completion receiver is gone");
            }
        }
    }
}

/// Clears `draining` when the drain task stops without reaching an empty
/// queue, which happens when a collaborator panics or the task is cancelled.
/// Requests still queued get a fresh drain task.
struct DrainGuard {
    inner: Arc<Inner>,
    finished: bool,
}

impl Drop for DrainGuard {
    fn drop(&mut self) {
        if self.finished {
            return;
        }

        let mut state = self.inner.state.lock();
        if let Some(id) = state.in_flight.take() {
            warn!("drain task stopped while dispatching intent {}", id);
            state.stages.remove(&id);
            state.stats.failed += 1;
        }

        if state.queue.is_empty() {
            state.draining = false;
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!("restarting drain with {} queued intent(s)", state.queue.len());
                handle.spawn(self.inner.clone().drain());
            }
            Err(_) => state.draining = false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationError;
    use crate::profile::StaticProfile;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct ScriptedGenerator {
        calls: Mutex<Vec<(String, String, Instant)>>,
        responses: Mutex<VecDeque<Result<String, GenerationError>>>,
        latency: Duration,
    }

    impl ScriptedGenerator {
        fn with_latency(latency: Duration) -> Self {
            Self {
                latency,
                ..Self::default()
            }
        }

        fn script(self, response: Result<&str, GenerationError>) -> Self {
            self.responses.lock().push_back(response.map(str::to_string));
            self
        }

        fn tags(&self) -> Vec<String> {
            self.calls.lock().iter().map(|(_, tag, _)| tag.clone()).collect()
        }
    }

    #[async_trait]
    impl GenerationService for ScriptedGenerator {
        async fn generate(&self, prompt: &str, tag: &str) -> Result<String, GenerationError> {
            self.calls
                .lock()
                .push((prompt.to_string(), tag.to_string(), Instant::now()));
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            let scripted = self.responses.lock().pop_front();
            scripted.unwrap_or_else(|| Ok(format!("Something stirs ({}).", tag)))
        }
    }

    struct FixedScorer(ContentScores);

    impl ContentScorer for FixedScorer {
        fn score(&self, _content: &str, _bundle: &ContextBundle) -> ContentScores {
            self.0
        }
    }

    struct BrokenValidator;

    #[async_trait]
    impl CoherenceValidator for BrokenValidator {
        async fn validate(
            &self,
            _content: &str,
            _bundle: &ContextBundle,
        ) -> Result<ValidationReport, ValidationError> {
            Err(ValidationError("validator offline".to_string()))
        }
    }

    fn strong() -> ContentScores {
        ContentScores::new(0.9, 0.9, 0.5)
    }

    /// A profile whose multipliers are all exactly 1.0.
    fn unit_profile() -> ProfileReading {
        ProfileReading::default()
            .with_level("fear", 0.5)
            .with_emotion("dread", 0.5)
            .with_bias("negativity", 0.5)
    }

    struct Harness {
        scheduler: IntentScheduler,
        generator: Arc<ScriptedGenerator>,
        bridge: Arc<NotificationBridge>,
        completions: mpsc::UnboundedReceiver<CoreMessage>,
    }

    fn harness_with(
        config: SchedulerConfig,
        generator: ScriptedGenerator,
        scores: ContentScores,
        validator: Arc<dyn CoherenceValidator>,
        reading: ProfileReading,
    ) -> Harness {
        let generator = Arc::new(generator);
        let bridge = NotificationBridge::shared();
        let (sender, completions) = mpsc::unbounded_channel();
        let services = SchedulerServices {
            profile: Arc::new(StaticProfile::new(reading)),
            generator: generator.clone(),
            validator,
            scorer: Arc::new(FixedScorer(scores)),
            bridge: bridge.clone(),
            completions: Some(sender),
        };
        Harness {
            scheduler: IntentScheduler::new(config, services),
            generator,
            bridge,
            completions,
        }
    }

    fn harness(scores: ContentScores) -> Harness {
        harness_with(
            SchedulerConfig::default(),
            ScriptedGenerator::default(),
            scores,
            Arc::new(PermissiveValidator),
            unit_profile(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatches_are_rate_limited_in_order() {
        let h = harness(strong());
        let start = Instant::now();

        let tickets: Vec<_> = ["first", "second", "third"]
            .iter()
            .map(|kind| h.scheduler.submit(kind, "", BTreeMap::new()))
            .collect();

        let mut finished = Vec::new();
        for ticket in tickets {
            finished.push(ticket.await.unwrap().intent_type);
        }

        assert!(start.elapsed() >= Duration::from_secs(30));
        assert_eq!(finished, vec!["first", "second", "third"]);
        assert_eq!(h.generator.tags(), vec!["first", "second", "third"]);

        let calls = h.generator.calls.lock();
        for pair in calls.windows(2) {
            assert!(pair[1].2 - pair[0].2 >= Duration::from_secs(15));
        }

        let timeline = h.scheduler.timeline();
        assert_eq!(timeline.len(), 3);
        for pair in timeline.windows(2) {
            assert!(pair[1].finished_at - pair[0].finished_at >= Duration::from_secs(15));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_counts_from_dispatch_end() {
        let h = harness_with(
            SchedulerConfig::default(),
            ScriptedGenerator::with_latency(Duration::from_secs(10)),
            strong(),
            Arc::new(PermissiveValidator),
            unit_profile(),
        );

        let a = h.scheduler.submit("scare", "", BTreeMap::new());
        let b = h.scheduler.submit("scare", "", BTreeMap::new());
        a.await.unwrap();
        b.await.unwrap();

        let calls = h.generator.calls.lock();
        assert!(calls[1].2 - calls[0].2 >= Duration::from_secs(25));
    }

    #[tokio::test(start_paused = true)]
    async fn test_weak_horror_enhances_exactly_once() {
        let h = harness(ContentScores::new(0.9, 0.5, 0.5));

        let result = h.scheduler.submit("scare", "", BTreeMap::new()).await.unwrap();

        assert!(result.enhanced);
        assert_eq!(result.applied_techniques, vec!["enhancement"]);
        assert_eq!(h.generator.tags(), vec!["scare", "scare:enhance"]);
        assert!(h.generator.calls.lock()[1].0.contains("## Draft"));
        // Still weak after the pass, so the same intent is suggested again
        assert!(result.follow_ups.contains(&"scare".to_string()));
        assert_eq!(h.scheduler.stats().enhanced, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_strong_content_is_not_enhanced() {
        let h = harness(strong());

        let result = h.scheduler.submit("scare", "", BTreeMap::new()).await.unwrap();

        assert!(!result.enhanced);
        assert!(result.validation.passed);
        assert_eq!(result.scores.coherence, 1.0);
        assert_eq!(h.generator.tags(), vec!["scare"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_validator_error_counts_as_failed_validation() {
        let h = harness_with(
            SchedulerConfig::default(),
            ScriptedGenerator::default(),
            strong(),
            Arc::new(BrokenValidator),
            unit_profile(),
        );

        let result = h.scheduler.submit("scare", "", BTreeMap::new()).await.unwrap();

        assert!(result.enhanced);
        assert!(!result.validation.passed);
        assert_eq!(h.generator.tags().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_generation_failure_does_not_block_queue() {
        let generator = ScriptedGenerator::default()
            .script(Err(GenerationError::Service("down".to_string())))
            .script(Ok("The lights die."));
        let h = harness_with(
            SchedulerConfig::default(),
            generator,
            strong(),
            Arc::new(PermissiveValidator),
            unit_profile(),
        );

        let a = h.scheduler.submit("scare", "", BTreeMap::new());
        let b = h.scheduler.submit("scare", "", BTreeMap::new());

        assert_eq!(
            a.await,
            Err(IntentError::Generation(GenerationError::Service("down".to_string())))
        );
        assert_eq!(b.await.unwrap().content, "The lights die.");

        let stats = h.scheduler.stats();
        assert_eq!((stats.completed, stats.failed), (1, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_enhancement_failure_fails_intent() {
        let generator = ScriptedGenerator::default()
            .script(Ok("A draft."))
            .script(Err(GenerationError::Service("quota".to_string())));
        let h = harness_with(
            SchedulerConfig::default(),
            generator,
            ContentScores::new(0.1, 0.1, 0.0),
            Arc::new(PermissiveValidator),
            unit_profile(),
        );

        let outcome = h.scheduler.submit("scare", "", BTreeMap::new()).await;
        assert!(matches!(outcome, Err(IntentError::Generation(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_generation_timeout() {
        let h = harness_with(
            SchedulerConfig::default(),
            ScriptedGenerator::with_latency(Duration::from_secs(60)),
            strong(),
            Arc::new(PermissiveValidator),
            unit_profile(),
        );
        let start = Instant::now();

        let outcome = h.scheduler.submit("scare", "", BTreeMap::new()).await;

        assert_eq!(outcome, Err(IntentError::Generation(GenerationError::Timeout)));
        assert!(start.elapsed() >= Duration::from_secs(30));
        assert!(start.elapsed() < Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_priority_is_clamped() {
        let intense = ProfileReading::default()
            .with_level("fear", 1.0)
            .with_emotion("terror", 1.0)
            .with_bias("negativity", 1.0);
        let h = harness_with(
            SchedulerConfig::default(),
            ScriptedGenerator::default(),
            strong(),
            Arc::new(PermissiveValidator),
            intense.clone(),
        );

        let ticket = h.scheduler.submit("scare", "", BTreeMap::new());
        assert_eq!(ticket.priority(), 1.0);
        assert_eq!(h.scheduler.priority_for("calm", &ProfileReading::default()), 0.05);
        assert_eq!(h.scheduler.priority_for("calm", &unit_profile()), 0.4);
        ticket.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_queue_sheds_lowest_priority() {
        let mut config = SchedulerConfig::default();
        config.queue_capacity = 2;
        config.base_weights.insert("whisper".to_string(), 0.3);
        config.base_weights.insert("scream".to_string(), 0.9);
        config.base_weights.insert("creak".to_string(), 0.6);
        config.base_weights.insert("hush".to_string(), 0.1);
        let h = harness_with(
            config,
            ScriptedGenerator::default(),
            strong(),
            Arc::new(PermissiveValidator),
            unit_profile(),
        );

        // Nothing drains until the test yields
        let whisper = h.scheduler.submit("whisper", "", BTreeMap::new());
        let scream = h.scheduler.submit("scream", "", BTreeMap::new());
        let creak = h.scheduler.submit("creak", "", BTreeMap::new());
        let hush = h.scheduler.submit("hush", "", BTreeMap::new());

        assert!(matches!(whisper.await, Err(IntentError::Shed { .. })));
        assert!(matches!(hush.await, Err(IntentError::Shed { .. })));
        assert_eq!(scream.await.unwrap().intent_type, "scream");
        assert_eq!(creak.await.unwrap().intent_type, "creak");

        let stats = h.scheduler.stats();
        assert_eq!(stats.shed, 2);
        assert_eq!(stats.submitted, 4);
        assert_eq!(h.generator.tags(), vec!["scream", "creak"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_below_min_priority_is_shed() {
        let mut config = SchedulerConfig::default();
        config.base_weights.insert("murmur".to_string(), 0.01);
        let h = harness_with(
            config,
            ScriptedGenerator::default(),
            strong(),
            Arc::new(PermissiveValidator),
            unit_profile(),
        );

        let ticket = h.scheduler.submit("murmur", "", BTreeMap::new());
        let id = ticket.id();
        match ticket.await {
            Err(IntentError::Shed { reason, .. }) => assert!(reason.contains("minimum")),
            other => panic!("expected shed, got {:?}", other),
        }
        assert_eq!(h.scheduler.stage(id), Some(IntentStage::Failed));
        assert!(h.generator.tags().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stages_and_timeline() {
        let h = harness(strong());
        let start = Instant::now();

        let ticket = h.scheduler.submit("scare", "", BTreeMap::new());
        let id = ticket.id();
        assert_eq!(h.scheduler.stage(id), Some(IntentStage::Queued));
        assert_eq!(h.scheduler.queue_len(), 1);

        ticket.await.unwrap();
        assert_eq!(h.scheduler.stage(id), Some(IntentStage::Completed));

        let timeline = h.scheduler.timeline();
        assert_eq!(timeline.len(), 1);
        assert_eq!(timeline[0].intent_id, id);
        assert!(timeline[0].scores.is_some());
        assert!(timeline[0].finished_at >= start);
        assert!(timeline[0].finished_at <= Instant::now());
    }

    #[test]
    fn test_oversized_durations_are_capped() {
        let config = SchedulerConfig {
            min_interval_secs: 1e30,
            rate_limit_poll_secs: f64::MAX,
            generation_timeout_secs: 1e30,
            ..SchedulerConfig::default()
        };
        let day = Duration::from_secs(86_400);

        assert_eq!(config.min_interval(), day);
        assert_eq!(config.rate_limit_poll(), day);
        assert_eq!(config.generation_timeout(), day);
        assert_eq!(secs(-1.0), Duration::ZERO);
        assert_eq!(secs(f64::NAN), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_generation_timeout_still_dispatches() {
        let config = SchedulerConfig {
            generation_timeout_secs: 1e30,
            ..SchedulerConfig::default()
        };
        let h = harness_with(
            config,
            ScriptedGenerator::default(),
            strong(),
            Arc::new(PermissiveValidator),
            unit_profile(),
        );

        let first = h.scheduler.submit("scare", "", BTreeMap::new());
        let second = h.scheduler.submit("calm", "", BTreeMap::new());

        assert_eq!(first.await.unwrap().intent_type, "scare");
        assert_eq!(second.await.unwrap().intent_type, "calm");
        assert_eq!(h.scheduler.stats().completed, 2);
    }

    struct PanicsOnce {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl GenerationService for PanicsOnce {
        async fn generate(&self, _prompt: &str, tag: &str) -> Result<String, GenerationError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("generator crashed");
            }
            Ok(format!("The {} returns.", tag))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_generator_does_not_wedge_queue() {
        let services = SchedulerServices {
            profile: Arc::new(StaticProfile::new(unit_profile())),
            generator: Arc::new(PanicsOnce {
                calls: AtomicUsize::new(0),
            }),
            validator: Arc::new(PermissiveValidator),
            scorer: Arc::new(FixedScorer(strong())),
            bridge: NotificationBridge::shared(),
            completions: None,
        };
        let scheduler = IntentScheduler::new(SchedulerConfig::default(), services);

        let crashed = scheduler.submit("scare", "", BTreeMap::new());
        let queued = scheduler.submit("calm", "", BTreeMap::new());
        let crashed_id = crashed.id();

        assert_eq!(crashed.await, Err(IntentError::Dropped));
        assert_eq!(queued.await.unwrap().content, "The calm returns.");
        assert_eq!(scheduler.stage(crashed_id), None);

        // Idle again, so a later submit starts a fresh drain
        tokio::task::yield_now().await;
        assert!(!scheduler.is_draining());
        let later = scheduler.submit("scare", "", BTreeMap::new());
        assert_eq!(later.await.unwrap().content, "The scare returns.");

        let stats = scheduler.stats();
        assert_eq!((stats.completed, stats.failed), (2, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_reporting() {
        let mut h = harness(strong());
        let completed = Arc::new(AtomicUsize::new(0));
        let counter = completed.clone();
        h.bridge.subscribe(names::INTENT_COMPLETED, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let result = h.scheduler.submit("scare", "", BTreeMap::new()).await.unwrap();

        assert_eq!(completed.load(Ordering::SeqCst), 1);
        match h.completions.recv().await {
            Some(CoreMessage::IntentCompleted {
                intent_id, scores, ..
            }) => {
                assert_eq!(intent_id, result.intent_id);
                assert_eq!(scores, result.scores);
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_ticket_still_runs() {
        let h = harness(strong());

        drop(h.scheduler.submit("scare", "", BTreeMap::new()));
        h.scheduler.submit("calm", "", BTreeMap::new()).await.unwrap();

        assert_eq!(h.scheduler.stats().completed, 2);
        assert_eq!(h.scheduler.queue_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tone_follows_dominant_trait() {
        let generator = ScriptedGenerator::default().script(Ok("Run!"));
        let h = harness_with(
            SchedulerConfig::default(),
            generator,
            strong(),
            Arc::new(PermissiveValidator),
            unit_profile().with_trait("skeptical").with_resonance("isolation", 0.9),
        );

        let result = h.scheduler.submit("scare", "", BTreeMap::new()).await.unwrap();

        assert_eq!(result.content, "Run.");
        assert_eq!(result.applied_techniques, vec!["tone:clinical"]);
        assert_eq!(result.follow_ups, vec!["deepen:isolation"]);
    }
}
