use serde::{Deserialize, Serialize};

/// Reserved RTT value meaning "no valid estimate or measurement".
pub const UNKNOWN_RTT: f64 = -1.0;

/// Largest `decimals` value that still scales an `f64` without overflow.
pub const MAX_DECIMALS: u32 = 15;

/// How published RTT values are reduced to a fixed number of decimals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RoundingMode {
    /// Round to nearest, ties to even.
    #[default]
    HalfEven,
    /// Drop the extra digits (floor).
    Truncate,
    /// Publish values untouched.
    None,
}

/// Precision policy applied to every successful RTT before it is published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoundingConfig {
    /// Rounding strategy.
    pub mode: RoundingMode,
    /// Number of decimals kept (milliseconds).
    pub decimals: u32,
}

impl Default for RoundingConfig {
    fn default() -> Self {
        Self {
            mode: RoundingMode::HalfEven,
            decimals: 3,
        }
    }
}

impl RoundingConfig {
    /// Applies the policy to `value`. The sentinel passes through untouched.
    #[must_use]
    pub fn apply(&self, value: f64) -> f64 {
        if value == UNKNOWN_RTT || !value.is_finite() {
            return value;
        }
        let decimals = self.decimals.min(MAX_DECIMALS);
        let scale = 10f64.powi(i32::try_from(decimals).unwrap_or_default());
        match self.mode {
            RoundingMode::HalfEven => (value * scale).round_ties_even() / scale,
            RoundingMode::Truncate => (value * scale).floor() / scale,
            RoundingMode::None => value,
        }
    }
}
