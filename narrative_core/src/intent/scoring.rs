//! Scoring of generated content.

use psyche_state::clamp_unit;
use serde::{Deserialize, Serialize};

use crate::context_assembler::ContextBundle;

/// Measured effect of a piece of content, each 0.0 - 1.0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentScores {
    pub psychological_impact: f32,
    pub horror_effectiveness: f32,
    pub personal_resonance: f32,
    /// Filled from the coherence validator.
    pub coherence: f32,
}

impl ContentScores {
    pub fn new(psychological_impact: f32, horror_effectiveness: f32, personal_resonance: f32) -> Self {
        Self {
            psychological_impact: clamp_unit(psychological_impact),
            horror_effectiveness: clamp_unit(horror_effectiveness),
            personal_resonance: clamp_unit(personal_resonance),
            coherence: 0.0,
        }
    }

    pub fn with_coherence(mut self, coherence: f32) -> Self {
        self.coherence = clamp_unit(coherence);
        self
    }

    /// Whether either headline score is under its floor.
    pub fn below(&self, impact_floor: f32, horror_floor: f32) -> bool {
        self.psychological_impact < impact_floor || self.horror_effectiveness < horror_floor
    }
}

/// Estimates how content will land with the participant.
pub trait ContentScorer: Send + Sync {
    fn score(&self, content: &str, bundle: &ContextBundle) -> ContentScores;
}

const DREAD_WORDS: &[&str] = &[
    "alone", "behind", "blood", "breath", "cold", "dark", "darkness", "dead", "door", "dread",
    "empty", "footsteps", "hollow", "rot", "scream", "shadow", "shadows", "silence", "still",
    "watching", "whisper", "whispers", "wrong",
];

/// Word-list heuristic scorer.
#[derive(Debug, Clone)]
pub struct LexiconScorer {
    /// Share of dread words at which horror saturates.
    pub saturation_density: f32,
    /// Word count at which length stops adding impact.
    pub full_length: usize,
}

impl Default for LexiconScorer {
    fn default() -> Self {
        Self {
            saturation_density: 0.15,
            full_length: 40,
        }
    }
}

impl ContentScorer for LexiconScorer {
    fn score(&self, content: &str, bundle: &ContextBundle) -> ContentScores {
        let words = tokenize(content);
        if words.is_empty() {
            return ContentScores::default();
        }

        let dread = words.iter().filter(|w| DREAD_WORDS.contains(&w.as_str())).count();
        let density = dread as f32 / words.len() as f32;
        let horror = density / self.saturation_density.max(f32::EPSILON);

        let resonance = if bundle.themes.is_empty() {
            0.0
        } else {
            let hits = bundle
                .theme_names()
                .filter(|theme| {
                    let theme = theme.to_lowercase();
                    words.iter().any(|w| *w == theme)
                })
                .count();
            hits as f32 / bundle.themes.len() as f32
        };

        let length = (words.len() as f32 / self.full_length.max(1) as f32).min(1.0);
        let impact = 0.5 * clamp_unit(horror) + 0.3 * resonance + 0.2 * length;

        ContentScores::new(impact, horror, resonance)
    }
}

/// Lowercase alphanumeric words.
pub(crate) fn tokenize(content: &str) -> Vec<String> {
    content
        .split(|c: char| !c.is_alphanumeric() && c != '\'')
        .filter(|w| !w.is_empty())
        .map(|w| w.trim_matches('\'').to_lowercase())
        .filter(|w| !w.is_empty())
        .collect()
}
