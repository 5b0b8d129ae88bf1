//! Piecewise-linear decay curves.

use serde::{Deserialize, Serialize};

/// Retention factor as a function of elapsed seconds.
///
/// Control points are kept sorted by time. Before the first point the first
/// value holds, beyond the last point the last value holds. Output is always
/// within 0.0 - 1.0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<(f32, f32)>", into = "Vec<(f32, f32)>")]
pub struct DecayCurve {
    points: Vec<(f32, f32)>,
}

impl DecayCurve {
    /// Build a curve from `(time, value)` control points in any order.
    /// Non-finite points are dropped.
    pub fn new(points: impl IntoIterator<Item = (f32, f32)>) -> Self {
        let mut points: Vec<(f32, f32)> = points
            .into_iter()
            .filter(|(t, v)| t.is_finite() && v.is_finite())
            .map(|(t, v)| (t, v.clamp(0.0, 1.0)))
            .collect();
        points.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        Self { points }
    }

    /// A curve that never decays.
    pub fn constant(value: f32) -> Self {
        Self::new([(0.0, value)])
    }

    /// The default retention curve for core metrics.
    pub fn standard() -> Self {
        Self::new([(0.0, 1.0), (30.0, 0.85), (120.0, 0.5), (300.0, 0.15)])
    }

    pub fn points(&self) -> &[(f32, f32)] {
        &self.points
    }

    /// Evaluate the curve at `t` seconds.
    pub fn evaluate(&self, t: f32) -> f32 {
        let (first, last) = match (self.points.first(), self.points.last()) {
            (Some(first), Some(last)) => (*first, *last),
            // An empty curve retains everything
            _ => return 1.0,
        };

        if t.is_nan() || t <= first.0 {
            return first.1;
        }
        if t >= last.0 {
            return last.1;
        }

        for window in self.points.windows(2) {
            let (t0, v0) = window[0];
            let (t1, v1) = window[1];
            if t >= t0 && t <= t1 {
                let span = t1 - t0;
                if span <= f32::EPSILON {
                    return v1;
                }
                return (v0 + (v1 - v0) * (t - t0) / span).clamp(0.0, 1.0);
            }
        }

        last.1
    }
}

impl Default for DecayCurve {
    fn default() -> Self {
        Self::standard()
    }
}

impl From<Vec<(f32, f32)>> for DecayCurve {
    fn from(points: Vec<(f32, f32)>) -> Self {
        Self::new(points)
    }
}

impl From<DecayCurve> for Vec<(f32, f32)> {
    fn from(curve: DecayCurve) -> Self {
        curve.points
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpolation() {
        let curve = DecayCurve::new([(0.0, 1.0), (10.0, 0.5)]);
        assert!((curve.evaluate(5.0) - 0.75).abs() < 1e-6);
        assert!((curve.evaluate(2.0) - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_clamps_beyond_ends() {
        let curve = DecayCurve::new([(5.0, 0.8), (10.0, 0.2)]);
        assert_eq!(curve.evaluate(0.0), 0.8);
        assert_eq!(curve.evaluate(-3.0), 0.8);
        assert_eq!(curve.evaluate(1000.0), 0.2);
    }

    #[test]
    fn test_unsorted_points() {
        let curve = DecayCurve::new([(10.0, 0.0), (0.0, 1.0)]);
        assert!((curve.evaluate(5.0) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_values_are_clamped() {
        let curve = DecayCurve::new([(0.0, 1.5), (10.0, -0.5)]);
        assert_eq!(curve.evaluate(0.0), 1.0);
        assert_eq!(curve.evaluate(10.0), 0.0);
        for t in 0..=10 {
            let v = curve.evaluate(t as f32);
            assert!((0.0..=1.0).contains(&v));
        }
    }

    #[test]
    fn test_empty_and_constant() {
        assert_eq!(DecayCurve::new([]).evaluate(50.0), 1.0);
        assert_eq!(DecayCurve::constant(0.9).evaluate(50.0), 0.9);
    }

    #[test]
    fn test_standard_is_monotonic() {
        let curve = DecayCurve::standard();
        let mut previous = curve.evaluate(0.0);
        for t in 1..400 {
            let v = curve.evaluate(t as f32);
            assert!(v <= previous + 1e-6);
            previous = v;
        }
    }

    #[test]
    fn test_deserialize_from_points() {
        let curve: DecayCurve = serde_json::from_str("[[0.0, 1.0], [60.0, 0.5]]").unwrap();
        assert!((curve.evaluate(30.0) - 0.75).abs() < 1e-6);
    }
}
