//! Participant profile readings.
//!
//! The psychological model itself lives outside this crate. The core only
//! needs a snapshot of its outputs when prioritizing intents, assembling
//! context and steering tension.

use parking_lot::RwLock;
use psyche_state::clamp_unit;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A named trait of the profile with its strength (0.0 - 1.0).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dominant {
    pub name: String,
    pub strength: f32,
}

impl Dominant {
    pub fn new(name: impl Into<String>, strength: f32) -> Self {
        Self {
            name: name.into(),
            strength: clamp_unit(strength),
        }
    }
}

/// Snapshot of the external profile model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileReading {
    /// Level name -> 0.0 - 1.0 (fear, anxiety, curiosity...).
    pub levels: BTreeMap<String, f32>,

    pub dominant_emotion: Option<Dominant>,

    pub dominant_bias: Option<Dominant>,

    /// Personality trait used to pick the tone of generated content.
    pub dominant_trait: Option<String>,

    /// Theme -> how strongly it resonates with the participant.
    pub thematic_resonance: BTreeMap<String, f32>,

    /// Signal the state store steers tension towards.
    pub tension_signal: f32,
}

impl ProfileReading {
    pub fn with_level(mut self, name: impl Into<String>, level: f32) -> Self {
        self.levels.insert(name.into(), clamp_unit(level));
        self
    }

    pub fn with_emotion(mut self, name: impl Into<String>, strength: f32) -> Self {
        self.dominant_emotion = Some(Dominant::new(name, strength));
        self
    }

    pub fn with_bias(mut self, name: impl Into<String>, strength: f32) -> Self {
        self.dominant_bias = Some(Dominant::new(name, strength));
        self
    }

    pub fn with_trait(mut self, name: impl Into<String>) -> Self {
        self.dominant_trait = Some(name.into());
        self
    }

    pub fn with_resonance(mut self, theme: impl Into<String>, strength: f32) -> Self {
        self.thematic_resonance.insert(theme.into(), clamp_unit(strength));
        self
    }

    pub fn with_tension_signal(mut self, signal: f32) -> Self {
        self.tension_signal = clamp_unit(signal);
        self
    }

    /// Mean of all levels, 0.0 when there are none.
    pub fn mean_level(&self) -> f32 {
        if self.levels.is_empty() {
            return 0.0;
        }
        let total: f32 = self.levels.values().map(|v| clamp_unit(*v)).sum();
        total / self.levels.len() as f32
    }

    pub fn emotion_intensity(&self) -> f32 {
        self.dominant_emotion.as_ref().map(|e| e.strength).unwrap_or(0.0)
    }

    pub fn bias_strength(&self) -> f32 {
        self.dominant_bias.as_ref().map(|b| b.strength).unwrap_or(0.0)
    }
}

/// Source of profile readings.
pub trait ProfileSource: Send + Sync {
    fn read(&self) -> ProfileReading;
}

/// A profile held in memory and replaced by the host when it changes.
#[derive(Debug, Default)]
pub struct StaticProfile {
    reading: RwLock<ProfileReading>,
}

impl StaticProfile {
    pub fn new(reading: ProfileReading) -> Self {
        Self {
            reading: RwLock::new(reading),
        }
    }

    pub fn replace(&self, reading: ProfileReading) {
        *self.reading.write() = reading;
    }

    pub fn set_tension_signal(&self, signal: f32) {
        self.reading.write().tension_signal = clamp_unit(signal);
    }
}

impl ProfileSource for StaticProfile {
    fn read(&self) -> ProfileReading {
        self.reading.read().clone()
    }
}
