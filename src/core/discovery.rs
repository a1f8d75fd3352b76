//! Neighbor discovery: a pure read over a registry snapshot.
//!
//! Sensing is asymmetric: `b` is a candidate of `a` when *either* side's influence
//! radius covers the distance between them.

use std::collections::BTreeSet;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::node::{Node, NodeId};

/// Discovery range between two nodes.
#[inline]
pub fn sensing_range(a: &Node, b: &Node) -> f64 {
    a.influence_radius.max(b.influence_radius)
}

#[inline]
pub fn in_range(a: &Node, b: &Node) -> bool {
    // NaN distances compare false and are never in range.
    a.position().distance(b.position()) <= sensing_range(a, b)
}

#[inline]
fn is_candidate(node: &Node, other: &Node) -> bool {
    other.id != node.id && !other.state.degraded && in_range(node, other)
}

/// Ids of every other live node within sensing range of `node`, connected or not.
#[cfg(not(feature = "parallel"))]
pub fn candidates(node: &Node, snapshot: &[Node]) -> BTreeSet<NodeId> {
    snapshot
        .iter()
        .filter(|other| is_candidate(node, other))
        .map(|other| other.id)
        .collect()
}

/// Ids of every other live node within sensing range of `node`, connected or not.
#[cfg(feature = "parallel")]
pub fn candidates(node: &Node, snapshot: &[Node]) -> BTreeSet<NodeId> {
    let ids: Vec<NodeId> = snapshot
        .par_iter()
        .filter(|other| is_candidate(node, other))
        .map(|other| other.id)
        .collect();
    ids.into_iter().collect()
}
