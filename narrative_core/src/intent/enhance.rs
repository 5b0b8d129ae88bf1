//! Enhancement prompts and tone transforms.

use std::collections::HashMap;

use super::scoring::{tokenize, ContentScores};
use super::services::ValidationReport;
use crate::context_assembler::ContextBundle;

/// Words shorter than this are ignored when looking for repetition.
const MIN_REPEATED_LEN: usize = 4;

/// Occurrences at which a word counts as overused.
const REPEAT_THRESHOLD: usize = 3;

/// Build the prompt for a single enhancement pass.
pub fn enhancement_prompt(
    original: &str,
    bundle: &ContextBundle,
    report: &ValidationReport,
    scores: &ContentScores,
) -> String {
    let mut prompt = bundle.to_prompt_string();

    prompt.push_str("## Draft\n");
    prompt.push_str(original);
    prompt.push_str("\n\n");

    if !report.violations.is_empty() {
        prompt.push_str("## Coherence Violations\n");
        for violation in &report.violations {
            prompt.push_str(&format!("- {}\n", violation));
        }
        prompt.push('\n');
    }

    prompt.push_str("## Predicted Response\n");
    prompt.push_str(&predicted_response(bundle, scores));
    prompt.push_str("\n\n");

    if let Some(suggestion) = lexical_variation(original) {
        prompt.push_str("## Style\n");
        prompt.push_str(&suggestion);
        prompt.push_str("\n\n");
    }

    prompt
}

/// Describe how the participant is expected to react to the draft.
pub fn predicted_response(bundle: &ContextBundle, scores: &ContentScores) -> String {
    let emotion = bundle
        .dominant_emotion
        .as_ref()
        .map(|e| e.name.as_str())
        .unwrap_or("unease");

    let strength = match scores.horror_effectiveness {
        h if h >= 0.6 => "strong",
        h if h >= 0.3 => "mild",
        _ => "little",
    };

    format!(
        "{} {} (impact {:.2}, horror {:.2})",
        strength, emotion, scores.psychological_impact, scores.horror_effectiveness
    )
}

/// Suggest varying the most overused word, if any.
pub fn lexical_variation(content: &str) -> Option<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for word in tokenize(content) {
        if word.chars().count() >= MIN_REPEATED_LEN {
            *counts.entry(word).or_insert(0) += 1;
        }
    }

    counts
        .into_iter()
        .filter(|(_, count)| *count >= REPEAT_THRESHOLD)
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(&a.0)))
        .map(|(word, count)| format!("Vary the word '{}' (used {} times).", word, count))
}

/// Voice applied to finished content, keyed off the dominant trait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Neutral,
    /// Trailing sentences.
    Unsettled,
    /// Flat statements, no exclamations.
    Clinical,
    /// Second person.
    Intimate,
}

impl Tone {
    pub fn for_trait(dominant_trait: Option<&str>) -> Self {
        match dominant_trait.map(str::to_lowercase).as_deref() {
            Some("anxious" | "neurotic" | "fearful") => Tone::Unsettled,
            Some("analytical" | "skeptical" | "detached") => Tone::Clinical,
            Some("empathetic" | "sentimental" | "agreeable") => Tone::Intimate,
            _ => Tone::Neutral,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Tone::Neutral => "neutral",
            Tone::Unsettled => "unsettled",
            Tone::Clinical => "clinical",
            Tone::Intimate => "intimate",
        }
    }

    pub fn apply(&self, content: &str) -> String {
        match self {
            Tone::Neutral => content.to_string(),
            Tone::Unsettled => {
                let trimmed = content.trim_end();
                let body = trimmed.replace(". ", "... ");
                match body.strip_suffix('.') {
                    Some(stem) if !stem.ends_with('.') => format!("{}...", stem),
                    _ => body,
                }
            }
            Tone::Clinical => content.replace('!', "."),
            Tone::Intimate => content.replace("the player", "you"),
        }
    }
}
