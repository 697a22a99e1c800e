//! Pairwise network reachability.
//!
//! The relation is symmetric: cutting `a`-`b` also cuts `b`-`a`. Only cut
//! pairs are stored, so an empty relation means a fully connected network.

use repl_types::NodeId;
use std::collections::BTreeSet;

/// Set of node pairs that cannot reach each other.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reachability {
    cut: BTreeSet<(NodeId, NodeId)>,
}

fn ordered(a: NodeId, b: NodeId) -> (NodeId, NodeId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

impl Reachability {
    /// A fully connected network.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cut `a`-`b`. Returns `false` if the pair was already cut or `a == b`.
    pub fn cut(&mut self, a: NodeId, b: NodeId) -> bool {
        a != b && self.cut.insert(ordered(a, b))
    }

    /// Heal `a`-`b`. Returns `false` if the pair was not cut.
    pub fn heal(&mut self, a: NodeId, b: NodeId) -> bool {
        self.cut.remove(&ordered(a, b))
    }

    /// Whether `a` can reach `b`. A node always reaches itself.
    pub fn can_reach(&self, a: NodeId, b: NodeId) -> bool {
        a == b || !self.cut.contains(&ordered(a, b))
    }

    /// Nodes that `node` cannot reach.
    pub fn unreachable_from(&self, node: NodeId) -> Vec<NodeId> {
        self.cut
            .iter()
            .filter_map(|&(a, b)| match (a == node, b == node) {
                (true, _) => Some(b),
                (_, true) => Some(a),
                _ => None,
            })
            .collect()
    }

    /// Whether no pair is cut.
    pub fn is_fully_connected(&self) -> bool {
        self.cut.is_empty()
    }

    /// Cut pairs, smaller id first.
    pub fn cut_pairs(&self) -> impl Iterator<Item = (NodeId, NodeId)> + '_ {
        self.cut.iter().copied()
    }
}
