//! Theme resonance energies for context selection.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Tracks how strongly each theme resonates for the current request.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ResonanceState {
    energies: BTreeMap<String, f32>,
}

impl ResonanceState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from a theme -> strength map.
    pub fn from_weights<'a>(weights: impl IntoIterator<Item = (&'a String, &'a f32)>) -> Self {
        let mut state = Self::new();
        for (theme, weight) in weights {
            state.set_energy(theme, weight.max(0.0));
        }
        state
    }

    /// Add energy to a theme (accumulates with existing energy).
    pub fn add_energy(&mut self, theme: &str, energy: f32) {
        *self.energies.entry(theme.to_string()).or_insert(0.0) += energy;
    }

    pub fn set_energy(&mut self, theme: &str, energy: f32) {
        self.energies.insert(theme.to_string(), energy);
    }

    pub fn energy(&self, theme: &str) -> f32 {
        self.energies.get(theme).copied().unwrap_or(0.0)
    }

    pub fn themes(&self) -> impl Iterator<Item = &str> {
        self.energies.keys().map(String::as_str)
    }

    /// Themes with energy at or above the threshold, strongest first.
    ///
    /// Ties are broken by name so selection is deterministic.
    pub fn hot_themes(&self, threshold: f32) -> Vec<(&str, f32)> {
        let mut themes: Vec<_> = self
            .energies
            .iter()
            .filter(|(_, energy)| **energy >= threshold)
            .map(|(theme, energy)| (theme.as_str(), *energy))
            .collect();

        themes.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(b.0))
        });
        themes
    }

    pub fn strongest(&self) -> Option<(&str, f32)> {
        self.hot_themes(f32::MIN).into_iter().next()
    }

    /// Scale energies so the maximum is 1.0.
    pub fn normalize(&mut self) {
        if let Some((_, max_energy)) = self.strongest() {
            if max_energy > 0.0 {
                for energy in self.energies.values_mut() {
                    *energy /= max_energy;
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.energies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.energies.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_energy_accumulation() {
        let mut state = ResonanceState::new();
        state.add_energy("guilt", 0.3);
        state.add_energy("guilt", 0.4);

        assert!((state.energy("guilt") - 0.7).abs() < 0.001);
        assert_eq!(state.energy("loss"), 0.0);
    }

    #[test]
    fn test_hot_themes_order() {
        let mut state = ResonanceState::new();
        state.add_energy("isolation", 0.9);
        state.add_energy("paranoia", 0.5);
        state.add_energy("loss", 0.5);
        state.add_energy("guilt", 0.1);

        let hot = state.hot_themes(0.4);
        assert_eq!(hot, vec![("isolation", 0.9), ("loss", 0.5), ("paranoia", 0.5)]);
    }

    #[test]
    fn test_strongest_and_normalize() {
        let mut state = ResonanceState::new();
        assert!(state.strongest().is_none());

        state.add_energy("a", 0.5);
        state.add_energy("b", 2.0);
        assert_eq!(state.strongest(), Some(("b", 2.0)));

        state.normalize();
        assert!((state.energy("b") - 1.0).abs() < 0.001);
        assert!((state.energy("a") - 0.25).abs() < 0.001);
    }

    #[test]
    fn test_from_weights() {
        let weights: BTreeMap<String, f32> =
            [("guilt".to_string(), 0.6), ("loss".to_string(), -0.2)].into_iter().collect();
        let state = ResonanceState::from_weights(&weights);

        assert_eq!(state.len(), 2);
        assert_eq!(state.energy("loss"), 0.0);
        assert_eq!(state.themes().collect::<Vec<_>>(), vec!["guilt", "loss"]);
    }
}
