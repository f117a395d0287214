//! Budget-bounded summarisation of a call tree.
//!
//! Nodes are included best-first: a max-heap frontier is seeded with the
//! roots and each popped node pushes its children. Because every scoring
//! strategy is monotone (a child never outscores its parent), the pop order
//! is a valid inclusion order and the hottest paths always make the cut.

use crate::error::{Error, Result};
use crate::profile::CallTreeSource;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_MAX_NODES: usize = 100;
pub const DEFAULT_MAX_DEPTH: usize = 200;
pub const DEFAULT_MAX_CHILDREN: usize = 100;

/// Share of the node budget the roots may take up front.
const ROOT_BUDGET_SHARE: f64 = 0.7;

/// How a node's inclusion priority decays with depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ScoringStrategy {
    Exponential095,
    #[default]
    Exponential09,
    Exponential08,
    Harmonic01,
    Harmonic05,
    Harmonic10,
    PercentageOnly,
}

impl ScoringStrategy {
    pub const ALL: [ScoringStrategy; 7] = [
        ScoringStrategy::Exponential095,
        ScoringStrategy::Exponential09,
        ScoringStrategy::Exponential08,
        ScoringStrategy::Harmonic01,
        ScoringStrategy::Harmonic05,
        ScoringStrategy::Harmonic10,
        ScoringStrategy::PercentageOnly,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ScoringStrategy::Exponential095 => "exponential-0.95",
            ScoringStrategy::Exponential09 => "exponential-0.9",
            ScoringStrategy::Exponential08 => "exponential-0.8",
            ScoringStrategy::Harmonic01 => "harmonic-0.1",
            ScoringStrategy::Harmonic05 => "harmonic-0.5",
            ScoringStrategy::Harmonic10 => "harmonic-1.0",
            ScoringStrategy::PercentageOnly => "percentage-only",
        }
    }

    pub fn score(self, percentage: f64, depth: usize) -> f64 {
        let d = depth as f64;
        match self {
            ScoringStrategy::Exponential095 => percentage * 0.95f64.powf(d),
            ScoringStrategy::Exponential09 => percentage * 0.9f64.powf(d),
            ScoringStrategy::Exponential08 => percentage * 0.8f64.powf(d),
            ScoringStrategy::Harmonic01 => percentage / (1.0 + 0.1 * d),
            ScoringStrategy::Harmonic05 => percentage / (1.0 + 0.5 * d),
            ScoringStrategy::Harmonic10 => percentage / (1.0 + d),
            ScoringStrategy::PercentageOnly => percentage,
        }
    }
}

impl fmt::Display for ScoringStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ScoringStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ScoringStrategy::ALL
            .into_iter()
            .find(|strategy| strategy.name() == s)
            .ok_or_else(|| {
                let names: Vec<&str> = ScoringStrategy::ALL.iter().map(|s| s.name()).collect();
                Error::InvalidArgument(format!(
                    "unknown scoring strategy '{s}' (expected one of: {})",
                    names.join(", ")
                ))
            })
    }
}

impl TryFrom<String> for ScoringStrategy {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ScoringStrategy> for String {
    fn from(value: ScoringStrategy) -> Self {
        value.name().to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CollectOptions {
    pub max_nodes: usize,
    pub scoring: ScoringStrategy,
    pub max_depth: usize,
    pub max_children_per_node: usize,
}

impl Default for CollectOptions {
    fn default() -> Self {
        CollectOptions {
            max_nodes: DEFAULT_MAX_NODES,
            scoring: ScoringStrategy::default(),
            max_depth: DEFAULT_MAX_DEPTH,
            max_children_per_node: DEFAULT_MAX_CHILDREN,
        }
    }
}

/// Summary of children left out of a collected node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildrenTruncated {
    pub count: usize,
    pub combined_samples: f64,
    pub combined_percentage: f64,
    pub max_samples: f64,
    pub max_percentage: f64,
    /// Depth of the elided children.
    pub depth: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectedNode {
    pub name: String,
    pub name_with_library: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_handle: Option<String>,
    pub total_samples: f64,
    pub total_percentage: f64,
    pub self_samples: f64,
    pub self_percentage: f64,
    /// Depth in the full tree; the synthetic root sits at -1.
    pub original_depth: i64,
    #[serde(default)]
    pub children: Vec<CollectedNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children_truncated: Option<ChildrenTruncated>,
}

impl CollectedNode {
    /// Number of nodes below this one.
    pub fn descendant_count(&self) -> usize {
        self.children
            .iter()
            .map(|c| 1 + c.descendant_count())
            .sum()
    }
}

struct FrontierEntry {
    score: f64,
    seq: usize,
    node: usize,
    depth: usize,
}

impl PartialEq for FrontierEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for FrontierEntry {}

impl PartialOrd for FrontierEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FrontierEntry {
    // Highest score first; earlier pushes win ties.
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Collect at most `options.max_nodes` nodes of `tree` under a synthetic
/// root. `handle_for` turns a function index into its display handle.
pub fn collect_call_tree<T, F>(tree: &T, options: &CollectOptions, mut handle_for: F) -> CollectedNode
where
    T: CallTreeSource,
    F: FnMut(usize) -> String,
{
    let grand_total = tree.grand_total();
    let percent = |samples: f64| {
        if grand_total > 0.0 {
            samples / grand_total * 100.0
        } else {
            0.0
        }
    };

    let roots = tree.roots();
    let root_cap = (ROOT_BUDGET_SHARE * options.max_nodes as f64).ceil() as usize;

    let mut frontier = BinaryHeap::new();
    let mut seq = 0;
    for &root in roots.iter().take(root_cap) {
        let data = tree.node_data(root);
        frontier.push(FrontierEntry {
            score: options.scoring.score(data.total_relative * 100.0, 0),
            seq,
            node: root,
            depth: 0,
        });
        seq += 1;
    }

    let mut included = HashSet::new();
    while included.len() < options.max_nodes {
        let Some(entry) = frontier.pop() else {
            break;
        };
        included.insert(entry.node);
        if entry.depth + 1 >= options.max_depth {
            continue;
        }
        for child in tree
            .children(entry.node)
            .into_iter()
            .take(options.max_children_per_node)
        {
            let data = tree.node_data(child);
            frontier.push(FrontierEntry {
                score: options.scoring.score(data.total_relative * 100.0, entry.depth + 1),
                seq,
                node: child,
                depth: entry.depth + 1,
            });
            seq += 1;
        }
    }

    let mut materialize = Materializer {
        tree,
        included: &included,
        percent: &percent,
        handle_for: &mut handle_for,
    };
    let (children, truncated) = materialize.partition(&roots, 0);

    CollectedNode {
        name: "(root)".to_string(),
        name_with_library: "(root)".to_string(),
        function_handle: None,
        total_samples: grand_total,
        total_percentage: if grand_total > 0.0 { 100.0 } else { 0.0 },
        self_samples: 0.0,
        self_percentage: 0.0,
        original_depth: -1,
        children,
        children_truncated: truncated,
    }
}

struct Materializer<'a, T, P, F> {
    tree: &'a T,
    included: &'a HashSet<usize>,
    percent: &'a P,
    handle_for: &'a mut F,
}

impl<T, P, F> Materializer<'_, T, P, F>
where
    T: CallTreeSource,
    P: Fn(f64) -> f64,
    F: FnMut(usize) -> String,
{
    /// Split `nodes` into included subtrees and one elision summary.
    fn partition(
        &mut self,
        nodes: &[usize],
        depth: usize,
    ) -> (Vec<CollectedNode>, Option<ChildrenTruncated>) {
        let mut kept = Vec::new();
        let mut elided: Option<ChildrenTruncated> = None;
        for &node in nodes {
            if self.included.contains(&node) {
                kept.push(self.build(node, depth));
                continue;
            }
            let total = self.tree.node_data(node).total;
            let summary = elided.get_or_insert(ChildrenTruncated {
                count: 0,
                combined_samples: 0.0,
                combined_percentage: 0.0,
                max_samples: 0.0,
                max_percentage: 0.0,
                depth,
            });
            summary.count += 1;
            summary.combined_samples += total;
            if total > summary.max_samples {
                summary.max_samples = total;
            }
        }
        if let Some(summary) = elided.as_mut() {
            summary.combined_percentage = (self.percent)(summary.combined_samples);
            summary.max_percentage = (self.percent)(summary.max_samples);
        }
        (kept, elided)
    }

    fn build(&mut self, node: usize, depth: usize) -> CollectedNode {
        let data = self.tree.node_data(node);
        let children = self.tree.children(node);
        let (children, children_truncated) = self.partition(&children, depth + 1);
        CollectedNode {
            name_with_library: match &data.library {
                Some(lib) => format!("{} [{}]", data.name, lib),
                None => data.name.clone(),
            },
            name: data.name,
            function_handle: Some((self.handle_for)(data.func_index)),
            total_samples: data.total,
            total_percentage: (self.percent)(data.total),
            self_samples: data.self_time,
            self_percentage: (self.percent)(data.self_time),
            original_depth: depth as i64,
            children,
            children_truncated,
        }
    }
}
