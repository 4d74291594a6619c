use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::agent::{AgentHandles, CoordinateSource, IdentitySource, MembershipSource};
use crate::config::{RttConfig, RttScope};
use crate::error::{AgentError, BuildError};
use crate::prober::{ProbeError, RttProber, build_prober};
use crate::rounding::{RoundingConfig, UNKNOWN_RTT};
use crate::snapshot::{ClusterStatus, NodeInfo};

/// Output of one successful build.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltSnapshot {
    /// The cluster-wide snapshot.
    pub status: ClusterStatus,
    /// Name of the node this process runs beside.
    pub local_node: String,
}

/// Assembles a [`ClusterStatus`] from membership, coordinates and a prober.
///
/// Every build starts from scratch; nothing from a previous snapshot is reused.
pub struct SnapshotBuilder {
    membership: Arc<dyn MembershipSource>,
    coordinates: Arc<dyn CoordinateSource>,
    identity: Arc<dyn IdentitySource>,
    prober: Arc<dyn RttProber>,
    scope: RttScope,
    rounding: RoundingConfig,
    probe_concurrency: usize,
    lookup_timeout: Duration,
}

impl SnapshotBuilder {
    /// Creates a builder around explicit collaborators.
    #[must_use]
    pub fn new(
        agent: AgentHandles,
        prober: Arc<dyn RttProber>,
        rtt: &RttConfig,
        lookup_timeout: Duration,
    ) -> Self {
        Self {
            membership: agent.membership,
            coordinates: agent.coordinates,
            identity: agent.identity,
            prober,
            scope: rtt.scope,
            rounding: rtt.rounding,
            probe_concurrency: rtt.probe.concurrency.max(1),
            lookup_timeout,
        }
    }

    /// Creates a builder whose prober is chosen from `rtt.mode`.
    #[must_use]
    pub fn from_config(agent: AgentHandles, rtt: &RttConfig, lookup_timeout: Duration) -> Self {
        Self::new(agent, build_prober(rtt), rtt, lookup_timeout)
    }

    /// Builds one complete snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError`] only when membership or the local identity cannot
    /// be resolved. Missing coordinates and failed probes degrade individual
    /// values to [`UNKNOWN_RTT`] instead.
    pub async fn build(&self) -> Result<BuiltSnapshot, BuildError> {
        let members = self
            .bounded(self.membership.members())
            .await
            .map_err(BuildError::Membership)?;
        debug!(count = members.len(), "fetched cluster members");

        let local_node = self
            .bounded(self.identity.local_name())
            .await
            .map_err(BuildError::Identity)?;

        let mut nodes = Vec::with_capacity(members.len());
        for member in members {
            let coordinate = match self.bounded(self.coordinates.coordinate(&member.name)).await {
                Ok(Some(coordinate)) => Some(coordinate),
                Ok(None) => {
                    warn!(node = %member.name, "no coordinate yet");
                    None
                }
                Err(err) => {
                    warn!(node = %member.name, "failed to get coordinate: {err}");
                    None
                }
            };
            nodes.push(NodeInfo::from_member(member, coordinate));
        }

        let sources = self.sources(&nodes, &local_node);
        self.fill_rtts(&mut nodes, &sources).await;

        let status = ClusterStatus {
            timestamp: Utc::now(),
            nodes,
        };
        info!(
            nodes = status.nodes.len(),
            alive = status.alive_count(),
            mode = self.prober.mode().label(),
            "built cluster snapshot"
        );
        Ok(BuiltSnapshot { status, local_node })
    }

    /// Indices of rows that receive an `rtts` map.
    fn sources(&self, nodes: &[NodeInfo], local_node: &str) -> Vec<usize> {
        match self.scope {
            RttScope::Full => nodes
                .iter()
                .enumerate()
                .filter(|(_, node)| node.is_alive())
                .map(|(idx, _)| idx)
                .collect(),
            RttScope::Local => match nodes.iter().position(|node| node.name == local_node) {
                Some(idx) if nodes[idx].is_alive() => vec![idx],
                Some(_) => {
                    warn!(node = %local_node, "local node is not alive; skipping rtts");
                    Vec::new()
                }
                None => {
                    warn!(node = %local_node, "local node missing from membership");
                    Vec::new()
                }
            },
        }
    }

    async fn fill_rtts(&self, nodes: &mut [NodeInfo], sources: &[usize]) {
        let pairs: Vec<(usize, usize)> = sources
            .iter()
            .flat_map(|&from| {
                nodes
                    .iter()
                    .enumerate()
                    .filter(move |&(to, node)| to != from && node.is_alive())
                    .map(move |(to, _)| (from, to))
            })
            .collect();

        let readonly: &[NodeInfo] = &*nodes;
        let probes: Vec<_> = pairs
            .into_iter()
            .map(|(from, to)| self.probe_pair(readonly, from, to))
            .collect();
        let results: Vec<(usize, usize, Result<f64, ProbeError>)> = stream::iter(probes)
            .buffer_unordered(self.probe_concurrency)
            .collect()
            .await;

        for (from, to, result) in results {
            let value = match result {
                Ok(rtt) => self.rounding.apply(rtt),
                Err(err) => {
                    debug!(from = %nodes[from].name, to = %nodes[to].name, "rtt unknown: {err}");
                    UNKNOWN_RTT
                }
            };
            let peer = nodes[to].name.clone();
            nodes[from].rtts.insert(peer, value);
        }
    }

    async fn probe_pair(
        &self,
        nodes: &[NodeInfo],
        from: usize,
        to: usize,
    ) -> (usize, usize, Result<f64, ProbeError>) {
        (from, to, self.prober.rtt(&nodes[from], &nodes[to]).await)
    }

    async fn bounded<T>(
        &self,
        lookup: impl Future<Output = Result<T, AgentError>>,
    ) -> Result<T, AgentError> {
        tokio::time::timeout(self.lookup_timeout, lookup)
            .await
            .unwrap_or(Err(AgentError::Timeout(self.lookup_timeout)))
    }
}
