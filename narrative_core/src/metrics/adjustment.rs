//! Adjustment requests produced by the metric engine.
//!
//! The engine never touches other subsystems directly. It emits requests and
//! the owner routes each one by its target:
//!
//! | target            | owner                          |
//! |-------------------|--------------------------------|
//! | `tension`         | state store                    |
//! | `theme:<name>`    | state store narrative weights  |
//! | `metric:<id>`     | metric engine                  |
//! | `intent:<type>`   | intent scheduler               |
//! | anything else     | external consumers             |

use serde::{Deserialize, Serialize};

use crate::error::AdjustmentParseError;

/// Where an adjustment came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AdjustmentSource {
    /// A configured rule fired.
    Rule(String),
    /// An urgent feedback event bypassed the rules.
    Immediate(String),
}

impl std::fmt::Display for AdjustmentSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdjustmentSource::Rule(id) => write!(f, "rule:{}", id),
            AdjustmentSource::Immediate(event_type) => write!(f, "immediate:{}", event_type),
        }
    }
}

/// Parsed adjustment target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdjustmentTarget<'a> {
    Tension,
    Theme(&'a str),
    Metric(&'a str),
    Intent(&'a str),
    External(&'a str),
}

impl<'a> AdjustmentTarget<'a> {
    pub fn parse(target: &'a str) -> Self {
        if target == "tension" {
            return AdjustmentTarget::Tension;
        }
        match target.split_once(':') {
            Some(("theme", name)) if !name.is_empty() => AdjustmentTarget::Theme(name),
            Some(("metric", id)) if !id.is_empty() => AdjustmentTarget::Metric(id),
            Some(("intent", kind)) if !kind.is_empty() => AdjustmentTarget::Intent(kind),
            _ => AdjustmentTarget::External(target),
        }
    }
}

/// A request to change something owned by another subsystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjustmentRequest {
    pub source: AdjustmentSource,
    pub target: String,
    pub magnitude: f32,
}

impl AdjustmentRequest {
    pub fn new(source: AdjustmentSource, target: impl Into<String>, magnitude: f32) -> Self {
        Self {
            source,
            target: target.into(),
            magnitude,
        }
    }

    pub fn target(&self) -> AdjustmentTarget<'_> {
        AdjustmentTarget::parse(&self.target)
    }
}

/// Parse adjustment text of the form `"tension=0.2; theme:guilt=-0.1"`.
///
/// Entries may be separated by `;`, `,` or newlines. Any malformed entry
/// rejects the whole text so a half-understood instruction is never applied.
pub fn parse_adjustment_text(text: &str) -> Result<Vec<(String, f32)>, AdjustmentParseError> {
    let mut adjustments = Vec::new();

    for fragment in text.split([';', ',', '\n']) {
        let fragment = fragment.trim();
        if fragment.is_empty() {
            continue;
        }

        let fail = |reason: &str| AdjustmentParseError {
            fragment: fragment.to_string(),
            reason: reason.to_string(),
        };

        let (target, magnitude) = fragment
            .split_once('=')
            .ok_or_else(|| fail("expected target=magnitude"))?;
        let target = target.trim();
        if target.is_empty() {
            return Err(fail("missing target"));
        }
        let magnitude: f32 = magnitude
            .trim()
            .parse()
            .map_err(|_| fail("magnitude is not a number"))?;
        if !magnitude.is_finite() {
            return Err(fail("magnitude is not finite"));
        }

        adjustments.push((target.to_string(), magnitude));
    }

    Ok(adjustments)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_routing() {
        assert_eq!(AdjustmentTarget::parse("tension"), AdjustmentTarget::Tension);
        assert_eq!(AdjustmentTarget::parse("theme:guilt"), AdjustmentTarget::Theme("guilt"));
        assert_eq!(
            AdjustmentTarget::parse("metric:player_engagement"),
            AdjustmentTarget::Metric("player_engagement")
        );
        assert_eq!(AdjustmentTarget::parse("intent:scare"), AdjustmentTarget::Intent("scare"));
        assert_eq!(
            AdjustmentTarget::parse("lighting.flicker"),
            AdjustmentTarget::External("lighting.flicker")
        );
        assert_eq!(AdjustmentTarget::parse("theme:"), AdjustmentTarget::External("theme:"));
    }

    #[test]
    fn test_parse_adjustment_text() {
        let parsed = parse_adjustment_text("tension = 0.2; theme:guilt=-0.1\nintent:scare=1").unwrap();
        assert_eq!(
            parsed,
            vec![
                ("tension".to_string(), 0.2),
                ("theme:guilt".to_string(), -0.1),
                ("intent:scare".to_string(), 1.0),
            ]
        );

        assert!(parse_adjustment_text("").unwrap().is_empty());
    }

    #[test]
    fn test_parse_adjustment_text_rejects_garbage() {
        assert!(parse_adjustment_text("make it scarier").is_err());
        assert!(parse_adjustment_text("tension=0.2; =0.3").is_err());
        assert!(parse_adjustment_text("tension=lots").is_err());
        assert!(parse_adjustment_text("tension=inf").is_err());
    }

    #[test]
    fn test_source_display() {
        assert_eq!(AdjustmentSource::Rule("ease_off".into()).to_string(), "rule:ease_off");
        assert_eq!(
            AdjustmentSource::Immediate("fear_response".into()).to_string(),
            "immediate:fear_response"
        );
    }
}
