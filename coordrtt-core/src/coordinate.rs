use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Position of a node in the synthetic latency space.
///
/// Units are seconds, matching the Vivaldi model maintained by the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    /// Euclidean component; every coordinate in a cluster shares its dimensionality.
    pub vec: Vec<f64>,
    /// Distance from the high-speed network core, added on both sides of a comparison.
    pub height: f64,
    /// Per-node correction for local effects such as asymmetric links.
    pub adjustment: f64,
}

/// Reasons an RTT cannot be estimated from two coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EstimateError {
    /// One side has not learned a coordinate yet.
    #[error("coordinate missing for one side of the comparison")]
    MissingCoordinate,
    /// The two vectors were computed with different dimensionality.
    #[error("coordinate dimensionality mismatch ({left} vs {right})")]
    DimensionMismatch {
        /// Length of the left-hand vector.
        left: usize,
        /// Length of the right-hand vector.
        right: usize,
    },
}

impl Coordinate {
    /// Creates a coordinate from its raw components.
    pub fn new(vec: impl Into<Vec<f64>>, height: f64, adjustment: f64) -> Self {
        Self {
            vec: vec.into(),
            height,
            adjustment,
        }
    }

    /// Estimated RTT to `other` in milliseconds.
    pub fn distance_to(&self, other: &Self) -> Result<f64, EstimateError> {
        if self.vec.len() != other.vec.len() {
            return Err(EstimateError::DimensionMismatch {
                left: self.vec.len(),
                right: other.vec.len(),
            });
        }

        let euclidean = self
            .vec
            .iter()
            .zip(&other.vec)
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f64>()
            .sqrt();
        // Pair the per-node terms first so the sum is identical in both directions.
        let raw = euclidean + (self.height + other.height);

        // The adjustment only applies while it keeps the estimate positive.
        let corrected = raw + (self.adjustment + other.adjustment);
        let seconds = if corrected > 0.0 { corrected } else { raw };

        Ok(seconds * 1000.0)
    }
}

/// Estimates the RTT in milliseconds between two optional coordinates.
pub fn estimate_rtt(a: Option<&Coordinate>, b: Option<&Coordinate>) -> Result<f64, EstimateError> {
    match (a, b) {
        (Some(a), Some(b)) => a.distance_to(b),
        _ => Err(EstimateError::MissingCoordinate),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use proptest::prelude::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn pythagorean_pair_plus_heights() {
        let a = Coordinate::new([0.0, 0.0], 0.01, 0.0);
        let b = Coordinate::new([3.0, 4.0], 0.02, 0.0);
        assert!(close(estimate_rtt(Some(&a), Some(&b)).unwrap(), 5030.0));
    }

    #[test]
    fn negative_adjustment_falls_back_to_raw() {
        let a = Coordinate::new([0.0, 0.0], 0.01, -10.0);
        let b = Coordinate::new([3.0, 4.0], 0.02, 0.0);
        assert!(close(estimate_rtt(Some(&a), Some(&b)).unwrap(), 5030.0));
    }

    #[test]
    fn positive_adjustment_is_applied() {
        let a = Coordinate::new([0.0], 0.0, 0.002);
        let b = Coordinate::new([0.010], 0.0, 0.003);
        assert!(close(estimate_rtt(Some(&a), Some(&b)).unwrap(), 15.0));
    }

    #[test]
    fn missing_side_is_unknown() {
        let a = Coordinate::new([1.0], 0.0, 0.0);
        assert_eq!(
            estimate_rtt(None, Some(&a)),
            Err(EstimateError::MissingCoordinate)
        );
        assert_eq!(
            estimate_rtt(Some(&a), None),
            Err(EstimateError::MissingCoordinate)
        );
        assert_eq!(estimate_rtt(None, None), Err(EstimateError::MissingCoordinate));
    }

    #[test]
    fn mismatched_dimensions_are_unknown() {
        let a = Coordinate::new([1.0, 2.0], 0.0, 0.0);
        let b = Coordinate::new([1.0, 2.0, 3.0], 0.0, 0.0);
        assert_eq!(
            estimate_rtt(Some(&a), Some(&b)),
            Err(EstimateError::DimensionMismatch { left: 2, right: 3 })
        );
    }

    #[test]
    fn serializes_with_short_field_names() {
        let coord = Coordinate::new([0.5], 0.1, -0.2);
        let json = serde_json::to_value(&coord).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"vec": [0.5], "height": 0.1, "adjustment": -0.2})
        );
    }

    fn coordinate_strategy(dims: usize) -> impl Strategy<Value = Coordinate> {
        (
            prop::collection::vec(-1.0f64..1.0, dims),
            0.0f64..0.1,
            -0.1f64..0.1,
        )
            .prop_map(|(vec, height, adjustment)| Coordinate::new(vec, height, adjustment))
    }

    proptest! {
        #[test]
        fn estimate_is_symmetric(a in coordinate_strategy(8), b in coordinate_strategy(8)) {
            let ab = estimate_rtt(Some(&a), Some(&b)).unwrap();
            let ba = estimate_rtt(Some(&b), Some(&a)).unwrap();
            prop_assert_eq!(ab, ba);
        }

        #[test]
        fn estimate_never_negative(a in coordinate_strategy(4), b in coordinate_strategy(4)) {
            let rtt = estimate_rtt(Some(&a), Some(&b)).unwrap();
            prop_assert!(rtt >= 0.0);
        }
    }
}
