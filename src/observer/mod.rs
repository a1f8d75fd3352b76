#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::node::{Node, NodeId, NodeKind, PayloadKind};
use crate::scheduler::TickRateSummary;
use crate::vector::Vec3;

/// A read-only snapshot of one node.
///
/// Design intent:
/// - Views are copies; holding one never blocks a tick.
/// - Nothing here can be fed back to mutate neighbors, attempts or anchoring.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct NodeView {
    pub id: NodeId,
    pub address: String,
    pub kind: NodeKind,
    pub payload: Value,
    pub payload_kind: PayloadKind,
    pub position: Vec3,
    pub velocity: Vec3,
    pub gravity: f64,
    pub connection_threshold: f64,
    pub influence_radius: f64,
    /// Seconds between ticks, in the unit overrides use.
    pub tick_interval: f64,
    pub stability_window: u32,
    pub max_degree: Option<usize>,
    pub attempts: u32,
    pub is_anchor: bool,
    pub degraded: bool,
    pub ticks: u64,
    pub neighbors: Vec<NodeId>,
}

impl From<&Node> for NodeView {
    fn from(n: &Node) -> Self {
        Self {
            id: n.id,
            address: n.address.clone(),
            kind: n.kind,
            payload: n.payload.value().clone(),
            payload_kind: n.payload.kind(),
            position: n.state.position,
            velocity: n.state.velocity,
            gravity: n.state.gravity,
            connection_threshold: n.connection_threshold,
            influence_radius: n.influence_radius,
            tick_interval: n.tick_interval.as_secs_f64(),
            stability_window: n.stability_window,
            max_degree: n.max_degree,
            attempts: n.state.attempts,
            is_anchor: n.state.is_anchor,
            degraded: n.state.degraded,
            ticks: n.state.ticks,
            neighbors: n.neighbors.iter().copied().collect(),
        }
    }
}

/// Population-level aggregates.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StatusSnapshot {
    pub node_count: usize,
    /// Undirected links; each symmetric pair counts once.
    pub connection_count: usize,
    pub anchored_count: usize,
    pub degraded_count: usize,
    pub average_gravity_magnitude: f64,
    pub tick_rate: TickRateSummary,
    pub running: bool,
}

impl StatusSnapshot {
    pub fn collect(nodes: &[Node], tick_rate: TickRateSummary, running: bool) -> Self {
        let degree_sum: usize = nodes.iter().map(Node::degree).sum();
        let gravity_sum: f64 = nodes.iter().map(|n| n.state.gravity).sum();
        Self {
            node_count: nodes.len(),
            connection_count: degree_sum / 2,
            anchored_count: nodes.iter().filter(|n| n.state.is_anchor).count(),
            degraded_count: nodes.iter().filter(|n| n.state.degraded).count(),
            average_gravity_magnitude: if nodes.is_empty() {
                0.0
            } else {
                gravity_sum / nodes.len() as f64
            },
            tick_rate,
            running,
        }
    }
}
