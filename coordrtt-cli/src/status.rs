//! Client side of the query server: fetch and summarise a snapshot.

use std::fmt::Write as _;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use coordrtt_core::{ClusterStatus, UNKNOWN_RTT};
use reqwest::StatusCode;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// `GET {base}/cluster-status`.
#[must_use]
pub fn cluster_status_url(base: &str) -> String {
    format!("{}/cluster-status", base.trim_end_matches('/'))
}

/// Fetches and decodes a snapshot from `url`.
pub async fn fetch_status(url: &str) -> Result<ClusterStatus> {
    let client = reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .context("failed to build HTTP client")?;
    let response = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("request to {url} failed"))?;

    match response.status() {
        StatusCode::OK => response
            .json::<ClusterStatus>()
            .await
            .with_context(|| format!("invalid cluster status from {url}")),
        StatusCode::SERVICE_UNAVAILABLE => {
            bail!("{url}: no snapshot published yet, try again after the first refresh")
        }
        other => bail!("{url} answered {other}"),
    }
}

/// Renders one line per node: status, coordinate presence and RTT summary.
#[must_use]
pub fn render_table(status: &ClusterStatus) -> String {
    let width = status
        .nodes
        .iter()
        .map(|node| node.name.len())
        .max()
        .unwrap_or(4)
        .max(4);

    let mut out = String::new();
    let _ = writeln!(
        out,
        "Snapshot {} ({} nodes, {} alive)",
        status.timestamp_rfc3339(),
        status.nodes.len(),
        status.alive_count()
    );
    let _ = writeln!(
        out,
        "{:<width$}  {:<21}  {:<8}  {:<5}  {:>5}  {:>9}  {:>7}",
        "NAME", "ADDRESS", "STATUS", "COORD", "PEERS", "MEAN_MS", "UNKNOWN"
    );
    for node in &status.nodes {
        let known: Vec<f64> = node
            .rtts
            .values()
            .copied()
            .filter(|rtt| *rtt != UNKNOWN_RTT)
            .collect();
        let mean = if known.is_empty() {
            "-".to_string()
        } else {
            format!("{:.3}", known.iter().sum::<f64>() / known.len() as f64)
        };
        let _ = writeln!(
            out,
            "{:<width$}  {:<21}  {:<8}  {:<5}  {:>5}  {:>9}  {:>7}",
            node.name,
            format!("{}:{}", node.addr, node.port),
            node.status.label(),
            if node.coordinate.is_some() { "yes" } else { "no" },
            node.rtts.len(),
            mean,
            node.rtts.len() - known.len(),
        );
    }
    out
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn url_joins_without_double_slash() {
        assert_eq!(
            cluster_status_url("http://127.0.0.1:8080/"),
            "http://127.0.0.1:8080/cluster-status"
        );
    }

    #[test]
    fn table_summarises_known_and_unknown_rtts() {
        let status: ClusterStatus = serde_json::from_value(serde_json::json!({
            "timestamp": "2026-01-15T10:00:00Z",
            "nodes": [
                {"name": "serf1", "addr": "10.0.1.10", "port": 7946, "status": "alive",
                 "tags": {}, "rtts": {"serf2": 10.0, "serf3": 20.0, "serf4": -1.0}},
                {"name": "serf2", "addr": "10.0.1.11", "port": 7946, "status": "failed", "tags": {}}
            ]
        }))
        .unwrap();

        let table = render_table(&status);
        let lines: Vec<&str> = table.lines().collect();
        assert!(lines[0].contains("2 nodes, 1 alive"));
        assert!(lines[2].contains("15.000"));
        assert!(lines[2].trim_end().ends_with('1'));
        assert!(lines[3].contains("failed"));
        assert!(lines[3].contains(" - "));
    }
}
