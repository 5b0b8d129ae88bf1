//! Configuration root, loadable from TOML.
//!
//! ```toml
//! [state]
//! undo_depth = 10
//!
//! [metrics]
//! batch_interval_secs = 5.0
//!
//! [scheduler]
//! min_interval_secs = 15.0
//!
//! [[rules]]
//! id = "escalate"
//! condition = "horror_effectiveness < 0.3"
//! adjustments = { tension = 0.1, "intent:scare" = 1.0 }
//! ```
//!
//! Every section is optional. Omitting `rules` entirely keeps the built-in set.

use psyche_state::StateConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::ConfigError;
use crate::intent::{SchedulerConfig, MAX_DURATION_SECS};
use crate::metrics::{AdaptationRule, MetricConfig, RuleConfig};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub state: StateConfig,
    pub metrics: MetricConfig,
    pub scheduler: SchedulerConfig,
    pub rules: Vec<RuleConfig>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            state: StateConfig::default(),
            metrics: MetricConfig::default(),
            scheduler: SchedulerConfig::default(),
            rules: default_rules(),
        }
    }
}

impl CoreConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the loop cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let batch = self.metrics.batch_interval_secs;
        if !batch.is_finite() || batch <= 0.0 {
            return Err(ConfigError::Invalid(
                "metrics.batch_interval_secs must be positive".to_string(),
            ));
        }
        if self.scheduler.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "scheduler.queue_capacity must be at least 1".to_string(),
            ));
        }
        let durations = [
            ("scheduler.min_interval_secs", self.scheduler.min_interval_secs),
            ("scheduler.rate_limit_poll_secs", self.scheduler.rate_limit_poll_secs),
            ("scheduler.generation_timeout_secs", self.scheduler.generation_timeout_secs),
        ];
        for (key, secs) in durations {
            if !(0.0..=MAX_DURATION_SECS).contains(&secs) {
                return Err(ConfigError::Invalid(format!(
                    "{} must be between 0 and {} seconds",
                    key, MAX_DURATION_SECS
                )));
            }
        }

        let mut seen = HashSet::new();
        for rule in &self.rules {
            if !seen.insert(rule.id.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate rule id '{}'", rule.id)));
            }
        }

        Ok(())
    }

    /// Compile every configured rule.
    pub fn compile_rules(&self) -> Vec<AdaptationRule> {
        self.rules.iter().map(RuleConfig::compile).collect()
    }
}

fn rule(id: &str, condition: &str, adjustments: &[(&str, f32)], cooldown_secs: f64) -> RuleConfig {
    RuleConfig {
        id: id.to_string(),
        condition: condition.to_string(),
        required_metrics: Vec::new(),
        adjustments: adjustments
            .iter()
            .map(|(target, magnitude)| (target.to_string(), *magnitude))
            .collect(),
        cooldown_secs,
        active: true,
    }
}

/// Built-in rules: push when horror lags, back off when impact overwhelms,
/// and lean into what resonates.
pub fn default_rules() -> Vec<RuleConfig> {
    vec![
        rule(
            "escalate",
            "horror_effectiveness < 0.3 && player_engagement >= 0.2",
            &[("tension", 0.1), ("intent:scare", 1.0)],
            60.0,
        ),
        rule(
            "ease_off",
            "psychological_impact > 0.85",
            &[("tension", -0.15), ("intent:calm", 1.0)],
            45.0,
        ),
        rule(
            "deepen_resonance",
            "personal_resonance > 0.6 && narrative_coherence >= 0.5",
            &[("intent:revelation", 1.0)],
            90.0,
        ),
    ]
}
