use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SimError;
use crate::vector::Vec3;

pub type NodeId = u64;

/// The closed set of entity kinds. Kinds differ only in their defaults;
/// every kind runs the same tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum NodeKind {
    Block,
    Point,
    Sphere,
}

impl NodeKind {
    pub const ALL: [NodeKind; 3] = [NodeKind::Block, NodeKind::Point, NodeKind::Sphere];

    pub fn name(self) -> &'static str {
        match self {
            NodeKind::Block => "Block",
            NodeKind::Point => "Point",
            NodeKind::Sphere => "Sphere",
        }
    }

    pub(crate) fn letter(self) -> char {
        match self {
            NodeKind::Block => 'B',
            NodeKind::Point => 'P',
            NodeKind::Sphere => 'S',
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for NodeKind {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        NodeKind::ALL
            .into_iter()
            .find(|k| k.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| SimError::InvalidKind(s.to_string()))
    }
}

/// Shape tag of a payload. Only the similarity scorer looks at it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum PayloadKind {
    Empty,
    Flag,
    Scalar,
    Text,
    /// Non-empty array of numbers.
    Vector,
    /// Non-empty array of equally sized, non-empty number arrays.
    Matrix,
    /// Any other array.
    Sequence,
    Mapping,
}

impl PayloadKind {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => PayloadKind::Empty,
            Value::Bool(_) => PayloadKind::Flag,
            Value::Number(_) => PayloadKind::Scalar,
            Value::String(_) => PayloadKind::Text,
            Value::Object(_) => PayloadKind::Mapping,
            Value::Array(items) => {
                if items.is_empty() {
                    PayloadKind::Sequence
                } else if items.iter().all(Value::is_number) {
                    PayloadKind::Vector
                } else if is_matrix(items) {
                    PayloadKind::Matrix
                } else {
                    PayloadKind::Sequence
                }
            }
        }
    }
}

fn is_matrix(rows: &[Value]) -> bool {
    let mut width = None;
    for row in rows {
        let Value::Array(cells) = row else {
            return false;
        };
        if cells.is_empty() || !cells.iter().all(Value::is_number) {
            return false;
        }
        match width {
            None => width = Some(cells.len()),
            Some(w) if w != cells.len() => return false,
            Some(_) => {}
        }
    }
    true
}

/// Opaque node payload plus its derived shape tag.
#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    kind: PayloadKind,
    value: Value,
}

impl Payload {
    pub fn new(value: Value) -> Self {
        Self {
            kind: PayloadKind::of(&value),
            value,
        }
    }

    pub fn kind(&self) -> PayloadKind {
        self.kind
    }

    pub fn value(&self) -> &Value {
        &self.value
    }
}

impl Default for Payload {
    fn default() -> Self {
        Self::new(Value::Null)
    }
}

/// What "unchanged" means for anchoring: bit-identical position and the same neighbor set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Fingerprint {
    position: [u64; 3],
    neighbors: Vec<NodeId>,
}

impl Fingerprint {
    pub(crate) fn new(position: Vec3, neighbors: &BTreeSet<NodeId>) -> Self {
        Self {
            position: position.to_bits(),
            neighbors: neighbors.iter().copied().collect(),
        }
    }
}

/// A node's own mutable state. Neighbor membership lives outside this struct so
/// that nothing but the registry's pair operations can change it.
#[derive(Debug, Clone)]
pub struct NodeState {
    pub position: Vec3,
    pub velocity: Vec3,
    /// Magnitude of the last computed acceleration.
    pub gravity: f64,
    /// Longest current run of failed re-checks among this node's links.
    pub attempts: u32,
    pub is_anchor: bool,
    pub degraded: bool,
    pub ticks: u64,
    /// Consecutive failed re-checks per connected peer; absent means passing.
    pub(crate) strikes: BTreeMap<NodeId, u32>,
    pub(crate) recent: VecDeque<Fingerprint>,
}

impl NodeState {
    pub(crate) fn new(position: Vec3, velocity: Vec3, is_anchor: bool) -> Self {
        Self {
            position,
            velocity,
            gravity: 0.0,
            attempts: 0,
            is_anchor,
            degraded: false,
            ticks: 0,
            strikes: BTreeMap::new(),
            // Creation counts as tick zero: a node has no neighbors yet.
            recent: VecDeque::from([Fingerprint::new(position, &BTreeSet::new())]),
        }
    }

    /// Push this tick's fingerprint; returns true if the node anchors right now.
    ///
    /// A node anchors once this tick's fingerprint matches each of the previous
    /// `window` ones, the creation state included. Anchoring never reverts.
    pub(crate) fn observe(&mut self, fingerprint: Fingerprint, window: u32) -> bool {
        let span = window.max(1) as usize + 1;
        self.recent.push_back(fingerprint);
        while self.recent.len() > span {
            self.recent.pop_front();
        }

        if self.is_anchor || self.recent.len() < span {
            return false;
        }
        let first = &self.recent[0];
        if self.recent.iter().all(|f| f == first) {
            self.is_anchor = true;
            self.velocity = Vec3::ZERO;
            return true;
        }
        false
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub address: String,
    pub kind: NodeKind,
    pub payload: Payload,
    pub connection_threshold: f64,
    pub influence_radius: f64,
    pub tick_interval: Duration,
    pub stability_window: u32,
    pub max_degree: Option<usize>,
    pub state: NodeState,
    pub neighbors: BTreeSet<NodeId>,
}

impl Node {
    pub fn degree(&self) -> usize {
        self.neighbors.len()
    }

    pub fn is_full(&self) -> bool {
        self.max_degree.is_some_and(|m| self.neighbors.len() >= m)
    }

    pub fn position(&self) -> Vec3 {
        self.state.position
    }
}
