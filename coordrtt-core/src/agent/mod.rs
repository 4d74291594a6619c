//! Adapters for the external cluster agent.
//!
//! The agent owns membership, coordinate learning and node identity. The
//! builder only consumes point-in-time copies through the traits below.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{AgentConfig, IdentityConfig};
use crate::coordinate::Coordinate;
use crate::error::AgentError;

/// Identity adapters that do not need the RPC connection.
pub mod identity;
/// Msgpack RPC client for the Serf agent.
pub mod serf;

pub use identity::{CommandIdentity, StaticIdentity, parse_agent_name};
pub use serf::SerfRpcClient;

/// Membership status as reported by the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberStatus {
    /// Healthy and participating.
    Alive,
    /// Announced an intent to leave.
    Leaving,
    /// Left gracefully.
    Left,
    /// Declared failed by the failure detector.
    Failed,
    /// Any status string the agent reports that is not recognised.
    #[serde(other)]
    Unknown,
}

impl MemberStatus {
    /// Maps the agent's status string, falling back to [`MemberStatus::Unknown`].
    #[must_use]
    pub fn from_agent(raw: &str) -> Self {
        match raw {
            "alive" => Self::Alive,
            "leaving" => Self::Leaving,
            "left" => Self::Left,
            "failed" => Self::Failed,
            _ => Self::Unknown,
        }
    }

    /// Lowercase label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Alive => "alive",
            Self::Leaving => "leaving",
            Self::Left => "left",
            Self::Failed => "failed",
            Self::Unknown => "unknown",
        }
    }
}

/// One membership entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    /// Unique node name.
    pub name: String,
    /// Advertised address.
    pub addr: IpAddr,
    /// Advertised gossip port.
    pub port: u16,
    /// Current membership status.
    pub status: MemberStatus,
    /// Free-form tags.
    pub tags: BTreeMap<String, String>,
}

/// Lists cluster members in the agent's enumeration order.
#[async_trait]
pub trait MembershipSource: Send + Sync {
    /// Returns the current membership list.
    async fn members(&self) -> Result<Vec<Member>, AgentError>;
}

/// Looks up the agent's current coordinate for a node.
#[async_trait]
pub trait CoordinateSource: Send + Sync {
    /// Returns `None` when the agent has no coordinate for `node` yet.
    async fn coordinate(&self, node: &str) -> Result<Option<Coordinate>, AgentError>;
}

/// Resolves the name of the node this process runs beside.
#[async_trait]
pub trait IdentitySource: Send + Sync {
    /// Returns the local node name.
    async fn local_name(&self) -> Result<String, AgentError>;
}

/// Trait-object handles for the three agent capabilities.
#[derive(Clone)]
pub struct AgentHandles {
    /// Membership listing.
    pub membership: Arc<dyn MembershipSource>,
    /// Coordinate lookup.
    pub coordinates: Arc<dyn CoordinateSource>,
    /// Local identity.
    pub identity: Arc<dyn IdentitySource>,
}

/// Connects to the agent described by `config` and wires up identity.
pub async fn connect_agent(config: &AgentConfig) -> Result<AgentHandles, AgentError> {
    let client = Arc::new(
        SerfRpcClient::connect(
            config.rpc_addr.clone(),
            config.auth_key.clone(),
            config.request_timeout,
        )
        .await?,
    );
    let identity: Arc<dyn IdentitySource> = match &config.identity {
        IdentityConfig::Rpc => Arc::clone(&client) as Arc<dyn IdentitySource>,
        IdentityConfig::Command { program, args } => Arc::new(CommandIdentity::new(
            program.clone(),
            args.clone(),
            config.request_timeout,
        )),
        IdentityConfig::Static { node_name } => Arc::new(StaticIdentity::new(node_name.clone())),
    };
    Ok(AgentHandles {
        membership: Arc::clone(&client) as Arc<dyn MembershipSource>,
        coordinates: client,
        identity,
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn unknown_status_strings_fall_back() {
        assert_eq!(MemberStatus::from_agent("alive"), MemberStatus::Alive);
        assert_eq!(MemberStatus::from_agent("failed"), MemberStatus::Failed);
        assert_eq!(MemberStatus::from_agent("reaped"), MemberStatus::Unknown);
        let parsed: MemberStatus = serde_json::from_str("\"none\"").unwrap();
        assert_eq!(parsed, MemberStatus::Unknown);
    }

    #[test]
    fn labels_round_trip_through_from_agent() {
        for status in [
            MemberStatus::Alive,
            MemberStatus::Leaving,
            MemberStatus::Left,
            MemberStatus::Failed,
        ] {
            assert_eq!(MemberStatus::from_agent(status.label()), status);
        }
    }
}
