use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::rounding::RoundingConfig;

/// Top-level runtime configuration shared across the CLI and core crates.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct RttServiceConfig {
    /// Connection to the local cluster agent.
    pub agent: AgentConfig,
    /// How RTT values are produced and published.
    pub rtt: RttConfig,
    /// Snapshot refresh cadence.
    pub refresh: RefreshConfig,
}

/// Connection settings for the cluster agent RPC endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    /// `host:port` of the agent's RPC listener.
    pub rpc_addr: String,
    /// Optional RPC auth key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_key: Option<String>,
    /// Deadline for each membership, coordinate or identity request.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Strategy for resolving the local node name.
    pub identity: IdentityConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            rpc_addr: "127.0.0.1:7373".to_string(),
            auth_key: None,
            request_timeout: default_request_timeout(),
            identity: IdentityConfig::default(),
        }
    }
}

const fn default_request_timeout() -> Duration {
    Duration::from_secs(5)
}

/// Supported strategies for resolving the local node name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum IdentityConfig {
    /// Reads `agent.name` from the agent's `stats` RPC.
    Rpc,
    /// Runs an info command and reads its `name = <node>` line.
    Command {
        /// Executable to run.
        program: String,
        /// Arguments passed to the executable.
        #[serde(default = "default_info_args")]
        args: Vec<String>,
    },
    /// Uses a fixed node name from configuration.
    Static {
        /// Node name as registered with the agent.
        node_name: String,
    },
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self::Rpc
    }
}

fn default_info_args() -> Vec<String> {
    vec!["info".to_string()]
}

/// Source of published RTT values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RttMode {
    /// Predicted from network coordinates.
    #[default]
    Estimated,
    /// Measured by an external probe command.
    Measured,
}

impl RttMode {
    /// Lowercase label used in logs and configuration.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Estimated => "estimated",
            Self::Measured => "measured",
        }
    }
}

impl std::str::FromStr for RttMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "estimated" => Ok(Self::Estimated),
            "measured" => Ok(Self::Measured),
            other => Err(format!("unknown rtt mode '{other}' (expected estimated|measured)")),
        }
    }
}

/// Which rows of the snapshot receive an `rtts` map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RttScope {
    /// Only the local node's row.
    #[default]
    Local,
    /// Every alive node (full matrix).
    Full,
}

/// RTT production settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct RttConfig {
    /// Estimated from coordinates or measured with a probe.
    pub mode: RttMode,
    /// Local row only or full matrix.
    pub scope: RttScope,
    /// External probe used in measured mode.
    pub probe: ProbeConfig,
    /// Precision policy for published values.
    pub rounding: RoundingConfig,
}

/// External probe invocation settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProbeConfig {
    /// Executable to run.
    pub program: String,
    /// Arguments; `{from}` and `{to}` are replaced with node names,
    /// `{from_addr}` and `{to_addr}` with their addresses.
    pub args: Vec<String>,
    /// Whitespace-delimited token holding the millisecond value.
    pub field_index: usize,
    /// Upper bound on a single probe invocation.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Maximum probes in flight during one refresh.
    pub concurrency: usize,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            program: "serf".to_string(),
            args: vec!["rtt".to_string(), "{from}".to_string(), "{to}".to_string()],
            field_index: 5,
            timeout: Duration::from_secs(5),
            concurrency: 4,
        }
    }
}

/// Scheduling policy for the refresh loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ScheduleMode {
    /// Sleep `interval` after each completed cycle; builds never overlap.
    #[default]
    FixedDelay,
    /// Start cycles on a fixed grid; ticks that fire mid-build are skipped.
    FixedRate,
}

/// Snapshot refresh cadence.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RefreshConfig {
    /// Period between refresh cycles.
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Fixed-delay or fixed-rate scheduling.
    pub schedule: ScheduleMode,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            schedule: ScheduleMode::FixedDelay,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::rounding::RoundingMode;

    #[test]
    fn defaults_match_agent_conventions() {
        let config = RttServiceConfig::default();
        assert_eq!(config.agent.rpc_addr, "127.0.0.1:7373");
        assert_eq!(config.agent.identity, IdentityConfig::Rpc);
        assert_eq!(config.rtt.mode, RttMode::Estimated);
        assert_eq!(config.rtt.scope, RttScope::Local);
        assert_eq!(config.rtt.probe.field_index, 5);
        assert_eq!(config.rtt.rounding.mode, RoundingMode::HalfEven);
        assert_eq!(config.refresh.interval, Duration::from_secs(30));
        assert_eq!(config.refresh.schedule, ScheduleMode::FixedDelay);
    }

    #[test]
    fn parses_partial_json_with_humantime() {
        let config: RttServiceConfig = serde_json::from_value(serde_json::json!({
            "rtt": {"mode": "measured", "scope": "full", "probe": {"timeout": "750ms"}},
            "refresh": {"interval": "10s", "schedule": "fixed-rate"},
            "agent": {"identity": {"type": "static", "node_name": "serf1"}}
        }))
        .unwrap();
        assert_eq!(config.rtt.mode, RttMode::Measured);
        assert_eq!(config.rtt.scope, RttScope::Full);
        assert_eq!(config.rtt.probe.timeout, Duration::from_millis(750));
        assert_eq!(config.rtt.probe.program, "serf");
        assert_eq!(config.refresh.interval, Duration::from_secs(10));
        assert_eq!(config.refresh.schedule, ScheduleMode::FixedRate);
        assert_eq!(
            config.agent.identity,
            IdentityConfig::Static {
                node_name: "serf1".to_string()
            }
        );
    }

    #[test]
    fn rtt_mode_parses_from_flags() {
        assert_eq!("Measured".parse::<RttMode>(), Ok(RttMode::Measured));
        assert!("pinged".parse::<RttMode>().is_err());
    }
}
