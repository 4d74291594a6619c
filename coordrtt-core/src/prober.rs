use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::{ProbeConfig, RttConfig, RttMode};
use crate::coordinate::{EstimateError, estimate_rtt};
use crate::snapshot::NodeInfo;

/// Reasons a single RTT could not be produced. Always recorded as unknown.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// Coordinates were missing or incompatible.
    #[error(transparent)]
    Estimate(#[from] EstimateError),
    /// The probe executable could not be started.
    #[error("failed to run probe: {0}")]
    Spawn(#[from] std::io::Error),
    /// The probe exited unsuccessfully.
    #[error("probe exited with {code:?}: {output}")]
    ExitStatus {
        /// Exit code, absent when killed by a signal.
        code: Option<i32>,
        /// Combined output, trimmed.
        output: String,
    },
    /// Fewer tokens than the expected field position.
    #[error("unexpected probe output: expected at least {expected} fields, found {found}")]
    ShortOutput {
        /// Tokens required.
        expected: usize,
        /// Tokens found.
        found: usize,
    },
    /// The token at the expected position is not a number.
    #[error("invalid RTT value '{0}'")]
    InvalidValue(String),
    /// The probe did not finish in time and was killed.
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
}

/// Produces the RTT in milliseconds from one node to another.
#[async_trait]
pub trait RttProber: Send + Sync {
    /// RTT from `from` to `to` in milliseconds.
    async fn rtt(&self, from: &NodeInfo, to: &NodeInfo) -> Result<f64, ProbeError>;

    /// Which mode this prober implements.
    fn mode(&self) -> RttMode;
}

/// Estimates RTT from the coordinates already attached to each row.
#[derive(Debug, Clone, Copy, Default)]
pub struct CoordinateProber;

#[async_trait]
impl RttProber for CoordinateProber {
    async fn rtt(&self, from: &NodeInfo, to: &NodeInfo) -> Result<f64, ProbeError> {
        estimate_rtt(from.coordinate.as_ref(), to.coordinate.as_ref()).map_err(|err| {
            if let EstimateError::DimensionMismatch { .. } = err {
                warn!(from = %from.name, to = %to.name, "{err}");
            }
            ProbeError::from(err)
        })
    }

    fn mode(&self) -> RttMode {
        RttMode::Estimated
    }
}

/// Measures RTT by running an external probe command per pair.
#[derive(Debug, Clone)]
pub struct CommandProber {
    config: ProbeConfig,
}

impl CommandProber {
    /// Creates a prober from its invocation settings.
    #[must_use]
    pub const fn new(config: ProbeConfig) -> Self {
        Self { config }
    }

    fn command_for(&self, from: &NodeInfo, to: &NodeInfo) -> Command {
        let mut command = Command::new(&self.config.program);
        for arg in &self.config.args {
            command.arg(
                arg.replace("{from_addr}", &from.addr)
                    .replace("{to_addr}", &to.addr)
                    .replace("{from}", &from.name)
                    .replace("{to}", &to.name),
            );
        }
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

#[async_trait]
impl RttProber for CommandProber {
    async fn rtt(&self, from: &NodeInfo, to: &NodeInfo) -> Result<f64, ProbeError> {
        let output = tokio::time::timeout(
            self.config.timeout,
            self.command_for(from, to).output(),
        )
        .await
        .map_err(|_| ProbeError::Timeout(self.config.timeout))??;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            return Err(ProbeError::ExitStatus {
                code: output.status.code(),
                output: combined.trim().to_string(),
            });
        }
        let rtt = parse_probe_output(&combined, self.config.field_index)?;
        debug!(from = %from.name, to = %to.name, rtt_ms = rtt, "measured rtt");
        Ok(rtt)
    }

    fn mode(&self) -> RttMode {
        RttMode::Measured
    }
}

/// Reads the millisecond value at `field_index` of whitespace-split output.
///
/// Negative values are rejected so a probe can never publish the unknown
/// sentinel as if it were a measurement.
pub fn parse_probe_output(output: &str, field_index: usize) -> Result<f64, ProbeError> {
    let fields: Vec<&str> = output.split_whitespace().collect();
    let token = fields.get(field_index).ok_or(ProbeError::ShortOutput {
        expected: field_index + 1,
        found: fields.len(),
    })?;
    token
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite() && *value >= 0.0)
        .ok_or_else(|| ProbeError::InvalidValue((*token).to_string()))
}

/// Selects the prober implementation for the configured mode.
#[must_use]
pub fn build_prober(config: &RttConfig) -> Arc<dyn RttProber> {
    match config.mode {
        RttMode::Estimated => Arc::new(CoordinateProber),
        RttMode::Measured => Arc::new(CommandProber::new(config.probe.clone())),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    const SERF_RTT: &str = "Estimated clab-nebula-serf1 <-> clab-nebula-serf2 rtt: 25.180 ms (using LAN coordinates)\n";

    #[test]
    fn parses_value_at_fixed_position() {
        assert!((parse_probe_output(SERF_RTT, 5).unwrap() - 25.18).abs() < 1e-9);
    }

    #[test]
    fn short_output_is_typed_failure() {
        let err = parse_probe_output("Error: node not found", 5).unwrap_err();
        assert!(matches!(
            err,
            ProbeError::ShortOutput {
                expected: 6,
                found: 3
            }
        ));
    }

    #[test]
    fn non_numeric_field_is_typed_failure() {
        let err = parse_probe_output("a b c d e rtt f", 5).unwrap_err();
        assert!(matches!(err, ProbeError::InvalidValue(ref token) if token == "rtt"));
        assert!(matches!(
            parse_probe_output("a b c d e NaN", 5).unwrap_err(),
            ProbeError::InvalidValue(_)
        ));
    }

    #[test]
    fn negative_values_are_typed_failures() {
        let err = parse_probe_output("Estimated a <-> b rtt: -7.5 ms", 5).unwrap_err();
        assert!(matches!(err, ProbeError::InvalidValue(ref token) if token == "-7.5"));
        assert!(matches!(
            parse_probe_output("Estimated a <-> b rtt: -1 ms", 5).unwrap_err(),
            ProbeError::InvalidValue(_)
        ));
        assert_eq!(parse_probe_output("Estimated a <-> b rtt: 0 ms", 5).unwrap(), 0.0);
    }

    #[test]
    fn build_prober_follows_mode() {
        let mut config = RttConfig::default();
        assert_eq!(build_prober(&config).mode(), RttMode::Estimated);
        config.mode = RttMode::Measured;
        assert_eq!(build_prober(&config).mode(), RttMode::Measured);
    }
}
