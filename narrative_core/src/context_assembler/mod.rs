//! Context Assembler - Builds the context bundle handed to the generation service.
//!
//! Assembly works as follows:
//! 1. **Seed**: Theme resonance starts from the profile's thematic resonance
//! 2. **Boost**: Themes named in the request context receive extra energy
//! 3. **Filtering**: Keep themes above the resonance threshold
//! 4. **Selection**: Take the strongest `max_themes`
//! 5. **Assembly**: Combine with profile levels, dominant emotion and bias

mod resonance;

pub use resonance::*;

use psyche_state::DynamicValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::intent::IntentRequest;
use crate::profile::{Dominant, ProfileReading};

/// Configuration for theme selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Maximum number of themes to include.
    pub max_themes: usize,

    /// Minimum energy for a theme to be included.
    pub resonance_threshold: f32,

    /// Energy added to themes the request context mentions.
    pub context_boost: f32,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_themes: 3,
            resonance_threshold: 0.1,
            context_boost: 0.25,
        }
    }
}

/// Builds context bundles from requests and profile readings.
#[derive(Debug, Clone, Default)]
pub struct ContextAssembler {
    config: ContextConfig,
}

impl ContextAssembler {
    pub fn new(config: ContextConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(ContextConfig::default())
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// Compute theme resonance for a request context.
    pub fn resonance(&self, reading: &ProfileReading, context: &str) -> ResonanceState {
        let mut state = ResonanceState::from_weights(&reading.thematic_resonance);

        let context = context.to_lowercase();
        let mentioned: Vec<String> = state
            .themes()
            .filter(|theme| context.contains(&theme.to_lowercase()))
            .map(str::to_string)
            .collect();
        for theme in mentioned {
            state.add_energy(&theme, self.config.context_boost);
        }

        if state.strongest().map(|(_, e)| e > 1.0).unwrap_or(false) {
            state.normalize();
        }

        state
    }

    /// Assemble the complete bundle for one request.
    pub fn assemble(&self, request: &IntentRequest, reading: &ProfileReading) -> ContextBundle {
        let resonance = self.resonance(reading, &request.context);

        ContextBundle {
            intent_type: request.intent_type.clone(),
            context: request.context.clone(),
            parameters: request.parameters.clone(),
            profile_levels: reading.levels.clone(),
            dominant_emotion: reading.dominant_emotion.clone(),
            dominant_bias: reading.dominant_bias.clone(),
            dominant_trait: reading.dominant_trait.clone(),
            themes: resonance
                .hot_themes(self.config.resonance_threshold)
                .into_iter()
                .take(self.config.max_themes)
                .map(|(theme, energy)| (theme.to_string(), energy))
                .collect(),
        }
    }
}

/// The assembled context ready for prompt generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextBundle {
    pub intent_type: String,

    /// Free-form context supplied with the request.
    pub context: String,

    pub parameters: BTreeMap<String, DynamicValue>,

    pub profile_levels: BTreeMap<String, f32>,

    pub dominant_emotion: Option<Dominant>,

    pub dominant_bias: Option<Dominant>,

    pub dominant_trait: Option<String>,

    /// Most resonant themes with their energy, strongest first.
    pub themes: Vec<(String, f32)>,
}

impl ContextBundle {
    pub fn theme_names(&self) -> impl Iterator<Item = &str> {
        self.themes.iter().map(|(theme, _)| theme.as_str())
    }

    /// Format the bundle as a prompt string.
    pub fn to_prompt_string(&self) -> String {
        let mut prompt = String::new();

        prompt.push_str("## Intent\n");
        prompt.push_str(&self.intent_type);
        if !self.context.is_empty() {
            prompt.push_str(&format!(": {}", self.context));
        }
        prompt.push_str("\n\n");

        prompt.push_str("## Participant\n");
        if let Some(emotion) = &self.dominant_emotion {
            prompt.push_str(&format!(
                "Dominant emotion: {} ({:.2})\n",
                emotion.name, emotion.strength
            ));
        }
        if let Some(bias) = &self.dominant_bias {
            prompt.push_str(&format!("Dominant bias: {} ({:.2})\n", bias.name, bias.strength));
        }
        for (level, value) in &self.profile_levels {
            prompt.push_str(&format!("- {}: {:.2}\n", level, value));
        }
        prompt.push('\n');

        if !self.themes.is_empty() {
            prompt.push_str("## Resonant Themes\n");
            for (theme, energy) in &self.themes {
                prompt.push_str(&format!("- {} ({:.2})\n", theme, energy));
            }
            prompt.push('\n');
        }

        if !self.parameters.is_empty() {
            prompt.push_str("## Parameters\n");
            for (key, value) in &self.parameters {
                prompt.push_str(&format!("- {}: {}\n", key, value));
            }
            prompt.push('\n');
        }

        prompt
    }
}
