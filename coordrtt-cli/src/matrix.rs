//! Offline tooling: predicted RTT matrices and comparisons against ground truth.
//!
//! Matrices are plain CSV: a header row of node names preceded by an empty
//! cell, then one row per source node. Empty cells are unknown.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use coordrtt_core::{ClusterStatus, UNKNOWN_RTT};

/// Square RTT matrix in milliseconds; `rows[from][to]`.
#[derive(Debug, Clone, PartialEq)]
pub struct RttMatrix {
    nodes: Vec<String>,
    rows: Vec<Vec<Option<f64>>>,
}

impl RttMatrix {
    /// Builds the predicted matrix from a snapshot's `rtts` maps.
    ///
    /// Names lose `strip_prefix` when given, nodes are ordered naturally
    /// (`serf2` before `serf10`), the diagonal is zero and values are truncated
    /// to three decimals. Unknown RTTs stay empty.
    #[must_use]
    pub fn from_status(status: &ClusterStatus, strip_prefix: Option<&str>) -> Self {
        let short = |name: &str| -> String {
            strip_prefix
                .and_then(|prefix| name.strip_prefix(prefix))
                .filter(|rest| !rest.is_empty())
                .unwrap_or(name)
                .to_string()
        };

        let mut nodes: Vec<String> = status.nodes.iter().map(|node| short(&node.name)).collect();
        nodes.sort_by(|a, b| natural_cmp(a, b));
        nodes.dedup();

        let mut matrix = Self::empty(nodes);
        for idx in 0..matrix.nodes.len() {
            matrix.rows[idx][idx] = Some(0.0);
        }
        for node in &status.nodes {
            let Some(from) = matrix.index_of(&short(&node.name)) else {
                continue;
            };
            for (peer, rtt) in &node.rtts {
                if *rtt == UNKNOWN_RTT {
                    continue;
                }
                if let Some(to) = matrix.index_of(&short(peer)) {
                    matrix.rows[from][to] = Some(truncate3(*rtt));
                }
            }
        }
        matrix
    }

    fn empty(nodes: Vec<String>) -> Self {
        let size = nodes.len();
        Self {
            nodes,
            rows: vec![vec![None; size]; size],
        }
    }

    #[must_use]
    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        self.nodes.iter().position(|node| node == name)
    }

    /// RTT from `from` to `to`, `None` when unknown or not in the matrix.
    #[must_use]
    pub fn get(&self, from: &str, to: &str) -> Option<f64> {
        let from = self.index_of(from)?;
        let to = self.index_of(to)?;
        self.rows[from][to]
    }

    #[must_use]
    pub fn to_csv(&self) -> String {
        let mut out = String::new();
        for node in &self.nodes {
            out.push(',');
            out.push_str(node);
        }
        out.push('\n');
        for (node, row) in self.nodes.iter().zip(&self.rows) {
            out.push_str(node);
            for cell in row {
                out.push(',');
                if let Some(value) = cell {
                    let _ = write!(out, "{value:.3}");
                }
            }
            out.push('\n');
        }
        out
    }

    /// Parses a matrix written by [`Self::to_csv`] or a compatible tool.
    pub fn from_csv(text: &str) -> Result<Self> {
        let mut lines = text.lines().filter(|line| !line.trim().is_empty());
        let header = lines.next().context("matrix CSV is empty")?;
        let columns: Vec<String> = header
            .split(',')
            .skip(1)
            .map(|name| name.trim().to_string())
            .collect();

        let mut matrix = Self::empty(columns.clone());
        let mut seen = BTreeSet::new();
        for (line_no, line) in lines.enumerate() {
            let mut cells = line.split(',');
            let name = cells.next().unwrap_or_default().trim().to_string();
            let Some(from) = matrix.index_of(&name) else {
                bail!("row {} names '{name}', which is not a column", line_no + 2);
            };
            if !seen.insert(from) {
                bail!("duplicate row for '{name}'");
            }
            for (to, cell) in cells.enumerate() {
                if to >= columns.len() {
                    bail!("row '{name}' has more cells than the header");
                }
                let cell = cell.trim();
                if cell.is_empty() || cell.eq_ignore_ascii_case("nan") {
                    continue;
                }
                let value: f64 = cell
                    .parse()
                    .with_context(|| format!("row '{name}': invalid value '{cell}'"))?;
                matrix.rows[from][to] = Some(value);
            }
        }
        Ok(matrix)
    }

    pub fn read(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_csv(&text).with_context(|| format!("invalid matrix in {}", path.display()))
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        write_file(path, &self.to_csv())
    }
}

/// Whether the prediction is above or below ground truth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Over,
    Under,
}

impl Direction {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Over => "OVER",
            Self::Under => "UNDER",
        }
    }
}

/// One pair whose prediction is off by at least the threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct RttDifference {
    pub from: String,
    pub to: String,
    pub truth_ms: f64,
    pub predicted_ms: f64,
    /// `predicted - truth`; positive means the prediction is too high.
    pub diff_ms: f64,
    pub direction: Direction,
}

/// Compares two matrices over the nodes they share.
///
/// Pairs missing on either side are skipped. Results are sorted by absolute
/// difference, largest first.
#[must_use]
pub fn diff_matrices(truth: &RttMatrix, predicted: &RttMatrix, threshold: f64) -> Vec<RttDifference> {
    let mut common: Vec<&String> = truth
        .nodes()
        .iter()
        .filter(|node| predicted.index_of(node).is_some())
        .collect();
    common.sort_by(|a, b| natural_cmp(a, b));

    let mut diffs = Vec::new();
    for from in &common {
        for to in &common {
            if from == to {
                continue;
            }
            let (Some(truth_ms), Some(predicted_ms)) = (truth.get(from, to), predicted.get(from, to))
            else {
                continue;
            };
            let diff_ms = predicted_ms - truth_ms;
            if diff_ms.abs() < threshold {
                continue;
            }
            diffs.push(RttDifference {
                from: (*from).clone(),
                to: (*to).clone(),
                truth_ms,
                predicted_ms,
                diff_ms,
                direction: if diff_ms > 0.0 {
                    Direction::Over
                } else {
                    Direction::Under
                },
            });
        }
    }
    diffs.sort_by(|a, b| b.diff_ms.abs().total_cmp(&a.diff_ms.abs()));
    diffs
}

#[must_use]
pub fn differences_csv(diffs: &[RttDifference]) -> String {
    let mut out = String::from("from,to,gt_rtt_ms,pred_rtt_ms,diff_ms,direction\n");
    for diff in diffs {
        let _ = writeln!(
            out,
            "{},{},{:.3},{:.3},{:.3},{}",
            diff.from,
            diff.to,
            diff.truth_ms,
            diff.predicted_ms,
            diff.diff_ms,
            diff.direction.label()
        );
    }
    out
}

/// Human-readable table of the first `limit` differences.
#[must_use]
pub fn render_differences(diffs: &[RttDifference], limit: usize, threshold: f64) -> String {
    let mut out = format!("Top {limit} biggest differences (>= {threshold:.3} ms only):\n");
    if diffs.is_empty() {
        let _ = writeln!(out, "No differences >= {threshold:.3} ms found.");
        return out;
    }
    let _ = writeln!(
        out,
        "{:>10} {:>10} {:>10} {:>12} {:>10} {:>9}",
        "from", "to", "gt_rtt_ms", "pred_rtt_ms", "diff_ms", "direction"
    );
    for diff in diffs.iter().take(limit) {
        let _ = writeln!(
            out,
            "{:>10} {:>10} {:>10.3} {:>12.3} {:>10.3} {:>9}",
            diff.from,
            diff.to,
            diff.truth_ms,
            diff.predicted_ms,
            diff.diff_ms,
            diff.direction.label()
        );
    }
    out
}

pub fn write_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("failed to write {}", path.display()))
}

/// Keeps the first three decimals without rounding.
fn truncate3(value: f64) -> f64 {
    (value * 1000.0).floor() / 1000.0
}

/// Orders names by their text prefix, then by a trailing number.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let (a_stem, a_num) = split_trailing_number(a);
    let (b_stem, b_num) = split_trailing_number(b);
    a_stem
        .cmp(b_stem)
        .then_with(|| a_num.cmp(&b_num))
        .then_with(|| a.cmp(b))
}

fn split_trailing_number(name: &str) -> (&str, Option<u64>) {
    let stem = name.trim_end_matches(|c: char| c.is_ascii_digit());
    let number = name[stem.len()..].parse().ok();
    (stem, number)
}
