use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::agent::{Member, MemberStatus};
use crate::coordinate::Coordinate;

/// One cluster member as published in a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Unique node name within the cluster.
    pub name: String,
    /// Advertised address.
    pub addr: String,
    /// Advertised gossip port.
    pub port: u16,
    /// Membership status reported by the agent.
    pub status: MemberStatus,
    /// Free-form member tags.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// Network coordinate, absent until the agent has learned one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinate: Option<Coordinate>,
    /// Peer name to RTT in milliseconds; only populated on source rows.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub rtts: BTreeMap<String, f64>,
}

impl NodeInfo {
    /// Builds a row from a membership entry and its (optional) coordinate.
    #[must_use]
    pub fn from_member(member: Member, coordinate: Option<Coordinate>) -> Self {
        Self {
            name: member.name,
            addr: member.addr.to_string(),
            port: member.port,
            status: member.status,
            tags: member.tags,
            coordinate,
            rtts: BTreeMap::new(),
        }
    }

    /// Whether this node participates in RTT computation.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.status == MemberStatus::Alive
    }
}

/// Immutable cluster-wide snapshot produced by one refresh cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterStatus {
    /// When the snapshot was computed.
    #[serde(serialize_with = "serialize_rfc3339", deserialize_with = "deserialize_rfc3339")]
    pub timestamp: DateTime<Utc>,
    /// Rows in membership enumeration order.
    pub nodes: Vec<NodeInfo>,
}

impl ClusterStatus {
    /// Looks up a row by node name.
    #[must_use]
    pub fn node(&self, name: &str) -> Option<&NodeInfo> {
        self.nodes.iter().find(|node| node.name == name)
    }

    /// Number of rows whose status is `alive`.
    #[must_use]
    pub fn alive_count(&self) -> usize {
        self.nodes.iter().filter(|node| node.is_alive()).count()
    }

    /// RFC3339 rendering of the snapshot timestamp.
    #[must_use]
    pub fn timestamp_rfc3339(&self) -> String {
        self.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
    }
}

/// Single-node view served on the `/rtts` route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalRttView {
    /// Snapshot timestamp (RFC3339).
    pub timestamp: String,
    /// Local node name.
    pub node: String,
    /// Local node address, empty when the node is missing from membership.
    pub addr: String,
    /// Peer name to RTT in milliseconds.
    pub rtts: BTreeMap<String, f64>,
}

impl LocalRttView {
    /// Projects the local node's row out of a full snapshot.
    #[must_use]
    pub fn from_status(status: &ClusterStatus, local_node: &str) -> Self {
        let row = status.node(local_node);
        Self {
            timestamp: status.timestamp_rfc3339(),
            node: local_node.to_string(),
            addr: row.map(|node| node.addr.clone()).unwrap_or_default(),
            rtts: row.map(|node| node.rtts.clone()).unwrap_or_default(),
        }
    }
}

fn serialize_rfc3339<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Secs, true))
}

fn deserialize_rfc3339<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
    let raw = String::deserialize(deserializer)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use chrono::TimeZone;
    use std::net::{IpAddr, Ipv4Addr};

    fn member(name: &str, status: MemberStatus) -> Member {
        Member {
            name: name.to_string(),
            addr: IpAddr::V4(Ipv4Addr::new(10, 0, 1, 10)),
            port: 7946,
            status,
            tags: BTreeMap::from([("role".to_string(), "edge".to_string())]),
        }
    }

    #[test]
    fn optional_fields_are_omitted_not_null() {
        let status = ClusterStatus {
            timestamp: Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap(),
            nodes: vec![NodeInfo::from_member(member("serf1", MemberStatus::Alive), None)],
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["timestamp"], "2025-01-15T12:00:00Z");
        let node = json["nodes"][0].as_object().unwrap();
        assert!(!node.contains_key("coordinate"));
        assert!(!node.contains_key("rtts"));
        assert_eq!(node["addr"], "10.0.1.10");
        assert_eq!(node["status"], "alive");
        assert_eq!(node["tags"]["role"], "edge");
    }

    #[test]
    fn snapshot_json_parses_back() {
        let mut row = NodeInfo::from_member(
            member("serf1", MemberStatus::Alive),
            Some(Coordinate::new([0.1, 0.2], 0.01, 0.0)),
        );
        row.rtts.insert("serf2".to_string(), 12.5);
        let status = ClusterStatus {
            timestamp: Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap(),
            nodes: vec![row],
        };
        let body = serde_json::to_string(&status).unwrap();
        let parsed: ClusterStatus = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed, status);
    }

    #[test]
    fn local_view_handles_missing_row() {
        let status = ClusterStatus {
            timestamp: Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap(),
            nodes: Vec::new(),
        };
        let view = LocalRttView::from_status(&status, "ghost");
        assert_eq!(view.node, "ghost");
        assert!(view.addr.is_empty());
        assert!(view.rtts.is_empty());
    }
}
