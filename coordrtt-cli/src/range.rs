//! Latency range queries over a published snapshot.
//!
//! A query asks which nodes lie within `threshold_ms` of a query node. The
//! answer comes from coordinate space (a sphere around the query node's
//! vector) and is scored against the truth set read from the query node's
//! `rtts` row.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use coordrtt_core::{ClusterStatus, UNKNOWN_RTT};
use serde::Serialize;
use tracing::{debug, warn};

use crate::matrix::{natural_cmp, write_file};

/// Converts agent coordinate vectors (seconds) to milliseconds.
pub const SECONDS_TO_MS: f64 = 1000.0;

/// Parameters of one range query.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeQuery {
    /// Name of the query node.
    pub node: String,
    /// Inclusive latency bound in milliseconds.
    pub threshold_ms: f64,
    /// Factor applied to coordinate vectors to express them in milliseconds.
    pub vec_scale: f64,
}

impl RangeQuery {
    #[must_use]
    pub fn new(node: impl Into<String>, threshold_ms: f64) -> Self {
        Self {
            node: node.into(),
            threshold_ms,
            vec_scale: SECONDS_TO_MS,
        }
    }
}

/// Confusion counts and the scores derived from them.
///
/// A ratio is `None` when its denominator is zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RangeMetrics {
    pub true_positives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
    pub precision: Option<f64>,
    pub recall: Option<f64>,
    pub jaccard: Option<f64>,
}

impl RangeMetrics {
    /// Scores a retrieved set against a truth set.
    #[must_use]
    pub fn score(retrieved: &BTreeSet<&str>, truth: &BTreeSet<&str>) -> Self {
        let true_positives = retrieved.intersection(truth).count();
        let false_positives = retrieved.len() - true_positives;
        let false_negatives = truth.len() - true_positives;
        let ratio = |denominator: usize| {
            (denominator > 0).then(|| true_positives as f64 / denominator as f64)
        };
        Self {
            true_positives,
            false_positives,
            false_negatives,
            precision: ratio(retrieved.len()),
            recall: ratio(truth.len()),
            jaccard: ratio(retrieved.len() + false_negatives),
        }
    }
}

/// Result of a range query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RangeReport {
    pub node: String,
    pub threshold_ms: f64,
    /// Nodes whose RTT from the query node is within the threshold, with that RTT.
    pub truth: BTreeMap<String, f64>,
    /// Nodes inside the coordinate sphere, with their coordinate distance in ms.
    pub retrieved: BTreeMap<String, f64>,
    pub metrics: RangeMetrics,
    /// Retrieved but not in the truth set, naturally ordered.
    pub false_positive_nodes: Vec<String>,
    /// In the truth set but not retrieved, naturally ordered.
    pub false_negative_nodes: Vec<String>,
}

/// Answers `query` from the coordinates in `status` and scores the answer.
///
/// The query node itself is never part of either set. Unknown RTTs never
/// count as within range, and peers whose vectors differ in dimensionality
/// from the query node's are left out of the coordinate search.
///
/// # Errors
///
/// Fails when the threshold or scale is unusable, the query node is absent,
/// or it has no coordinate or `rtts` row to score against.
pub fn run_range_query(status: &ClusterStatus, query: &RangeQuery) -> Result<RangeReport> {
    if !query.threshold_ms.is_finite() || query.threshold_ms < 0.0 {
        bail!("rtt threshold must be a non-negative number of milliseconds");
    }
    if !query.vec_scale.is_finite() || query.vec_scale <= 0.0 {
        bail!("coordinate scale must be positive");
    }

    let Some(center) = status.node(&query.node) else {
        bail!("query node {} not found in snapshot", query.node);
    };
    let Some(center_coordinate) = center.coordinate.as_ref() else {
        bail!("query node {} has no coordinate", query.node);
    };
    if center.rtts.is_empty() {
        bail!(
            "query node {} has no rtts row; use a full-scope snapshot or one served by that node",
            query.node
        );
    }

    let mut truth = BTreeMap::new();
    let mut retrieved = BTreeMap::new();
    for peer in status.nodes.iter().filter(|peer| peer.name != center.name) {
        if let Some(&rtt) = center.rtts.get(&peer.name) {
            if rtt != UNKNOWN_RTT && rtt <= query.threshold_ms {
                truth.insert(peer.name.clone(), rtt);
            }
        }

        let Some(coordinate) = peer.coordinate.as_ref() else {
            continue;
        };
        if coordinate.vec.len() != center_coordinate.vec.len() {
            debug!(node = %peer.name, "skipping coordinate with mismatched dimensionality");
            continue;
        }
        let distance_ms = euclidean(&center_coordinate.vec, &coordinate.vec) * query.vec_scale;
        if distance_ms <= query.threshold_ms {
            retrieved.insert(peer.name.clone(), distance_ms);
        }
    }

    let truth_names: BTreeSet<&str> = truth.keys().map(String::as_str).collect();
    let retrieved_names: BTreeSet<&str> = retrieved.keys().map(String::as_str).collect();
    let metrics = RangeMetrics::score(&retrieved_names, &truth_names);

    Ok(RangeReport {
        node: center.name.clone(),
        threshold_ms: query.threshold_ms,
        false_positive_nodes: sorted(retrieved_names.difference(&truth_names)),
        false_negative_nodes: sorted(truth_names.difference(&retrieved_names)),
        truth,
        retrieved,
        metrics,
    })
}

fn euclidean(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

fn sorted<S: AsRef<str>>(names: impl Iterator<Item = S>) -> Vec<String> {
    let mut names: Vec<String> = names.map(|name| name.as_ref().to_string()).collect();
    names.sort_by(|a, b| natural_cmp(a, b));
    names
}

fn ratio_label(value: Option<f64>) -> String {
    value.map_or_else(|| "n/a".to_string(), |value| format!("{value:.3}"))
}

impl RangeReport {
    /// Human-readable summary in natural node order.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Range query: {} within {:.3} ms",
            self.node, self.threshold_ms
        );

        let _ = writeln!(out, "Truth set ({}):", self.truth.len());
        for name in sorted_keys(&self.truth) {
            let _ = writeln!(out, "  {name:<24} rtt={:.3}", self.truth[name]);
        }

        let _ = writeln!(out, "Coordinate range ({}):", self.retrieved.len());
        for name in sorted_keys(&self.retrieved) {
            let _ = writeln!(out, "  {name:<24} dist={:.3}", self.retrieved[name]);
        }

        let m = &self.metrics;
        let _ = writeln!(out, "Metrics vs RTT truth set:");
        let _ = writeln!(
            out,
            "  TP={} FP={} FN={}",
            m.true_positives, m.false_positives, m.false_negatives
        );
        let _ = writeln!(
            out,
            "  precision={} recall={} jaccard={}",
            ratio_label(m.precision),
            ratio_label(m.recall),
            ratio_label(m.jaccard)
        );
        if !self.false_positive_nodes.is_empty() {
            let _ = writeln!(
                out,
                "FP nodes ({}): {}",
                self.false_positive_nodes.len(),
                self.false_positive_nodes.join(" ")
            );
        }
        if !self.false_negative_nodes.is_empty() {
            let _ = writeln!(
                out,
                "FN nodes ({}): {}",
                self.false_negative_nodes.len(),
                self.false_negative_nodes.join(" ")
            );
        }
        out
    }
}

fn sorted_keys(map: &BTreeMap<String, f64>) -> Vec<&String> {
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort_by(|a, b| natural_cmp(a, b));
    keys
}

/// How often each node has been a false positive across repeated queries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FalsePositiveCounts {
    counts: BTreeMap<String, u64>,
}

impl FalsePositiveCounts {
    /// Loads counts from `path`.
    ///
    /// A missing file starts from zero. An unreadable or malformed file is
    /// logged and also starts from zero so it gets rewritten on save.
    #[must_use]
    pub fn load(path: &Path) -> Self {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Self::default(),
            Err(err) => {
                warn!(path = %path.display(), "cannot read false-positive counts: {err}");
                return Self::default();
            }
        };
        match serde_json::from_str(&text) {
            Ok(counts) => Self { counts },
            Err(err) => {
                warn!(path = %path.display(), "discarding malformed false-positive counts: {err}");
                Self::default()
            }
        }
    }

    /// Adds one occurrence for every false positive in `report`.
    pub fn record(&mut self, report: &RangeReport) {
        for name in &report.false_positive_nodes {
            *self.counts.entry(name.clone()).or_default() += 1;
        }
    }

    #[must_use]
    pub fn get(&self, node: &str) -> u64 {
        self.counts.get(node).copied().unwrap_or_default()
    }

    /// Writes the counts as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.counts)
            .context("failed to encode false-positive counts")?;
        write_file(path, &json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scores_follow_confusion_counts() {
        let retrieved = BTreeSet::from(["a", "b", "c"]);
        let truth = BTreeSet::from(["b", "c", "d", "e"]);
        let m = RangeMetrics::score(&retrieved, &truth);
        assert_eq!((m.true_positives, m.false_positives, m.false_negatives), (2, 1, 2));
        assert!((m.precision.unwrap_or_default() - 2.0 / 3.0).abs() < 1e-9);
        assert!((m.recall.unwrap_or_default() - 0.5).abs() < 1e-9);
        assert!((m.jaccard.unwrap_or_default() - 0.4).abs() < 1e-9);
    }

    #[test]
    fn empty_sets_leave_ratios_undefined() {
        let m = RangeMetrics::score(&BTreeSet::new(), &BTreeSet::new());
        assert_eq!(m.precision, None);
        assert_eq!(m.recall, None);
        assert_eq!(m.jaccard, None);
        assert_eq!(ratio_label(m.precision), "n/a");
    }

    #[test]
    fn distance_is_plain_euclidean() {
        assert!((euclidean(&[0.0, 0.0], &[3.0, 4.0]) - 5.0).abs() < 1e-12);
    }
}
