//! Adaptation rules - cooldown-gated `condition -> adjustments` mappings.
//!
//! Conditions are compiled once from text such as
//! `"horror_effectiveness < 0.3 && player_engagement >= 0.5"` into a list of
//! conjuncts. A clause that fails to parse is kept as a malformed slot that
//! always evaluates to false, so a broken rule never fires.

use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::error::ConditionError;

/// Binary comparison between a metric and a threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparator {
    Less,
    Greater,
    LessOrEqual,
    GreaterOrEqual,
}

impl Comparator {
    pub fn symbol(&self) -> &'static str {
        match self {
            Comparator::Less => "<",
            Comparator::Greater => ">",
            Comparator::LessOrEqual => "<=",
            Comparator::GreaterOrEqual => ">=",
        }
    }

    pub fn holds(&self, lhs: f32, rhs: f32) -> bool {
        match self {
            Comparator::Less => lhs < rhs,
            Comparator::Greater => lhs > rhs,
            Comparator::LessOrEqual => lhs <= rhs,
            Comparator::GreaterOrEqual => lhs >= rhs,
        }
    }
}

/// One `metric op threshold` conjunct.
#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    pub metric: String,
    pub comparator: Comparator,
    pub threshold: f32,
}

impl Clause {
    pub fn new(metric: impl Into<String>, comparator: Comparator, threshold: f32) -> Self {
        Self {
            metric: metric.into(),
            comparator,
            threshold,
        }
    }

    /// Parse a single clause like `"player_engagement >= 0.5"`.
    pub fn parse(text: &str) -> Result<Self, ConditionError> {
        let fail = |reason: &str| ConditionError {
            clause: text.trim().to_string(),
            reason: reason.to_string(),
        };

        let (position, comparator, width) = find_comparator(text)
            .ok_or_else(|| fail("expected one of <, >, <=, >="))?;

        let metric = text[..position].trim();
        let threshold = text[position + width..].trim();

        if metric.is_empty() {
            return Err(fail("missing metric name"));
        }
        if !metric
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | ':' | '-'))
        {
            return Err(fail("metric name contains invalid characters"));
        }
        if threshold.contains(['<', '>', '=', '!']) {
            return Err(fail("more than one comparator"));
        }

        let threshold: f32 = threshold
            .parse()
            .map_err(|_| fail("threshold is not a number"))?;
        if !threshold.is_finite() {
            return Err(fail("threshold is not finite"));
        }

        Ok(Self::new(metric, comparator, threshold))
    }

    pub fn evaluate(&self, value: f32) -> bool {
        self.comparator.holds(value, self.threshold)
    }
}

impl std::fmt::Display for Clause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.metric, self.comparator.symbol(), self.threshold)
    }
}

fn find_comparator(text: &str) -> Option<(usize, Comparator, usize)> {
    let position = text.find(['<', '>', '=', '!'])?;
    let rest = &text[position..];
    if rest.starts_with("<=") {
        Some((position, Comparator::LessOrEqual, 2))
    } else if rest.starts_with(">=") {
        Some((position, Comparator::GreaterOrEqual, 2))
    } else if rest.starts_with('<') {
        Some((position, Comparator::Less, 1))
    } else if rest.starts_with('>') {
        Some((position, Comparator::Greater, 1))
    } else {
        // `==`, `!=` and friends are not supported
        None
    }
}

/// A compiled clause, or the error it failed with.
#[derive(Debug, Clone, PartialEq)]
pub enum ClauseSlot {
    Valid(Clause),
    Malformed(ConditionError),
}

/// Conjunction of clauses.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Condition {
    clauses: Vec<ClauseSlot>,
}

impl Condition {
    /// Compile a condition; clauses are separated by `&&` or `and`.
    pub fn parse(text: &str) -> Self {
        let normalized = text.replace(" AND ", " && ").replace(" and ", " && ");
        let clauses = normalized
            .split("&&")
            .filter(|part| !part.trim().is_empty())
            .map(|part| match Clause::parse(part) {
                Ok(clause) => ClauseSlot::Valid(clause),
                Err(e) => ClauseSlot::Malformed(e),
            })
            .collect();
        Self { clauses }
    }

    pub fn from_clauses(clauses: impl IntoIterator<Item = Clause>) -> Self {
        Self {
            clauses: clauses.into_iter().map(ClauseSlot::Valid).collect(),
        }
    }

    pub fn clauses(&self) -> &[ClauseSlot] {
        &self.clauses
    }

    pub fn errors(&self) -> impl Iterator<Item = &ConditionError> {
        self.clauses.iter().filter_map(|slot| match slot {
            ClauseSlot::Malformed(e) => Some(e),
            ClauseSlot::Valid(_) => None,
        })
    }

    /// Metric ids referenced by valid clauses, each once, in order of first use.
    pub fn metric_ids(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.clauses
            .iter()
            .filter_map(|slot| match slot {
                ClauseSlot::Valid(clause) => Some(clause.metric.clone()),
                ClauseSlot::Malformed(_) => None,
            })
            .filter(|metric| seen.insert(metric.clone()))
            .collect()
    }

    /// Evaluate against current metric values.
    ///
    /// Fails closed: an empty condition, a malformed clause or an unknown
    /// metric all make the condition false.
    pub fn evaluate<F>(&self, lookup: F) -> bool
    where
        F: Fn(&str) -> Option<f32>,
    {
        !self.clauses.is_empty()
            && self.clauses.iter().all(|slot| match slot {
                ClauseSlot::Valid(clause) => lookup(&clause.metric)
                    .map(|value| clause.evaluate(value))
                    .unwrap_or(false),
                ClauseSlot::Malformed(_) => false,
            })
    }
}

/// A rule as written in configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    pub id: String,

    pub condition: String,

    /// Metrics that must exist. Defaults to those named in the condition.
    #[serde(default)]
    pub required_metrics: Vec<String>,

    /// Adjustment target -> magnitude.
    #[serde(default)]
    pub adjustments: BTreeMap<String, f32>,

    #[serde(default = "default_cooldown")]
    pub cooldown_secs: f64,

    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_cooldown() -> f64 {
    30.0
}

fn default_active() -> bool {
    true
}

impl RuleConfig {
    /// Compile into a runtime rule, logging every malformed clause.
    pub fn compile(&self) -> AdaptationRule {
        let condition = Condition::parse(&self.condition);
        for error in condition.errors() {
            warn!("rule '{}': {}", self.id, error);
        }

        let required_metrics = if self.required_metrics.is_empty() {
            condition.metric_ids()
        } else {
            self.required_metrics.clone()
        };

        AdaptationRule {
            id: self.id.clone(),
            condition,
            required_metrics,
            adjustments: self.adjustments.clone(),
            active: self.active,
            cooldown_secs: self.cooldown_secs.max(0.0),
            last_triggered: None,
        }
    }
}

/// A compiled adaptation rule.
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptationRule {
    pub id: String,
    pub condition: Condition,
    pub required_metrics: Vec<String>,
    pub adjustments: BTreeMap<String, f32>,
    pub active: bool,
    pub cooldown_secs: f64,
    /// Engine clock of the last trigger.
    pub last_triggered: Option<f64>,
}

impl AdaptationRule {
    pub fn new(id: impl Into<String>, condition: Condition) -> Self {
        let required_metrics = condition.metric_ids();
        Self {
            id: id.into(),
            condition,
            required_metrics,
            adjustments: BTreeMap::new(),
            active: true,
            cooldown_secs: default_cooldown(),
            last_triggered: None,
        }
    }

    pub fn with_adjustment(mut self, target: impl Into<String>, magnitude: f32) -> Self {
        self.adjustments.insert(target.into(), magnitude);
        self
    }

    pub fn with_cooldown(mut self, secs: f64) -> Self {
        self.cooldown_secs = secs.max(0.0);
        self
    }

    pub fn cooldown_elapsed(&self, now: f64) -> bool {
        self.last_triggered
            .map(|at| now - at >= self.cooldown_secs)
            .unwrap_or(true)
    }

    /// Active and out of cooldown.
    pub fn is_ready(&self, now: f64) -> bool {
        self.active && self.cooldown_elapsed(now)
    }

    pub fn mark_triggered(&mut self, now: f64) {
        self.last_triggered = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(values: &[(&str, f32)]) -> impl Fn(&str) -> Option<f32> {
        let map: HashMap<String, f32> = values.iter().map(|(k, v)| (k.to_string(), *v)).collect();
        move |id| map.get(id).copied()
    }

    #[test]
    fn test_parse_clause() {
        let clause = Clause::parse("  horror_effectiveness <= 0.4 ").unwrap();
        assert_eq!(clause.metric, "horror_effectiveness");
        assert_eq!(clause.comparator, Comparator::LessOrEqual);
        assert!((clause.threshold - 0.4).abs() < 1e-6);

        assert_eq!(Clause::parse("a>1").unwrap().comparator, Comparator::Greater);
        assert_eq!(Clause::parse("a >= 1").unwrap().comparator, Comparator::GreaterOrEqual);
        assert_eq!(Clause::parse("a < 1").unwrap().comparator, Comparator::Less);
    }

    #[test]
    fn test_malformed_clauses() {
        for text in [
            "horror_effectiveness == 0.4",
            "horror_effectiveness != 0.4",
            "< 0.4",
            "horror_effectiveness < high",
            "horror_effectiveness",
            "horror effectiveness < 0.4",
            "a < 0.4 < 0.5",
            "a < NaN",
        ] {
            assert!(Clause::parse(text).is_err(), "'{}' should not parse", text);
        }
    }

    #[test]
    fn test_condition_conjunction() {
        let condition = Condition::parse("a < 0.3 && b >= 0.5 and c > 0.1");
        assert_eq!(condition.clauses().len(), 3);
        assert_eq!(condition.errors().count(), 0);

        assert!(condition.evaluate(lookup(&[("a", 0.2), ("b", 0.5), ("c", 0.2)])));
        assert!(!condition.evaluate(lookup(&[("a", 0.4), ("b", 0.5), ("c", 0.2)])));
    }

    #[test]
    fn test_metric_ids_are_unique_in_first_seen_order() {
        let condition = Condition::parse("a < 1 && b < 1 && a > 0");
        assert_eq!(condition.metric_ids(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_condition_fails_closed() {
        let malformed = Condition::parse("a < 0.3 && b ~ 0.5");
        assert_eq!(malformed.errors().count(), 1);
        assert!(!malformed.evaluate(lookup(&[("a", 0.0), ("b", 0.0)])));

        let missing_metric = Condition::parse("ghost > 0.1");
        assert!(!missing_metric.evaluate(lookup(&[("a", 1.0)])));

        let empty = Condition::parse("   ");
        assert!(!empty.evaluate(lookup(&[("a", 1.0)])));
    }

    #[test]
    fn test_compile_rule_config() {
        let config = RuleConfig {
            id: "ease_off".to_string(),
            condition: "psychological_impact > 0.85".to_string(),
            required_metrics: vec![],
            adjustments: [("tension".to_string(), -0.15)].into_iter().collect(),
            cooldown_secs: -5.0,
            active: true,
        };

        let rule = config.compile();
        assert_eq!(rule.required_metrics, vec!["psychological_impact".to_string()]);
        assert_eq!(rule.cooldown_secs, 0.0);
        assert!(rule.is_ready(0.0));
    }

    #[test]
    fn test_cooldown() {
        let mut rule = AdaptationRule::new("r", Condition::parse("a > 0.5")).with_cooldown(10.0);
        assert!(rule.is_ready(0.0));

        rule.mark_triggered(3.0);
        assert!(!rule.is_ready(12.9));
        assert!(rule.is_ready(13.0));

        rule.active = false;
        assert!(!rule.is_ready(100.0));
    }

    #[test]
    fn test_rule_config_from_toml() {
        let config: RuleConfig = toml::from_str(
            r#"
            id = "escalate"
            condition = "horror_effectiveness < 0.3"
            adjustments = { tension = 0.1, "intent:scare" = 1.0 }
            "#,
        )
        .unwrap();

        assert_eq!(config.cooldown_secs, 30.0);
        assert!(config.active);
        assert_eq!(config.adjustments.len(), 2);
    }
}
