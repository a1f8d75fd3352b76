//! The authoritative node arena.
//!
//! Nodes live in a `Vec` indexed by `id - 1`; everything else refers to them by id.
//! One `RwLock` guards the whole arena: snapshots share it, and every mutation
//! (a node's own state, or the neighbor sets of a pair) holds it exclusively for
//! a short, non-blocking critical section.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{Result, SimError};
use crate::node::{Node, NodeId, NodeState};
use crate::policy::Rewire;

/// A point-in-time copy of every node, ordered by id.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    nodes: Vec<Node>,
}

impl Snapshot {
    pub(crate) fn from_nodes(nodes: Vec<Node>) -> Self {
        Self { nodes }
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        let idx = usize::try_from(id.checked_sub(1)?).ok()?;
        self.nodes.get(idx).filter(|n| n.id == id)
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn into_nodes(self) -> Vec<Node> {
        self.nodes
    }
}

#[derive(Debug, Default)]
struct Arena {
    nodes: Vec<Node>,
}

impl Arena {
    fn index(&self, id: NodeId) -> Result<usize> {
        let idx = id
            .checked_sub(1)
            .and_then(|i| usize::try_from(i).ok())
            .ok_or(SimError::NotFound(id))?;
        match self.nodes.get(idx) {
            Some(n) if n.id == id => Ok(idx),
            Some(n) => Err(SimError::InvariantViolation(format!(
                "arena slot {idx} holds node {} instead of {id}",
                n.id
            ))),
            None => Err(SimError::NotFound(id)),
        }
    }

    fn get(&self, id: NodeId) -> Result<&Node> {
        let idx = self.index(id)?;
        Ok(&self.nodes[idx])
    }

    fn get_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        let idx = self.index(id)?;
        Ok(&mut self.nodes[idx])
    }

    fn pair_mut(&mut self, a: NodeId, b: NodeId) -> Result<(&mut Node, &mut Node)> {
        if a == b {
            return Err(SimError::InvariantViolation(format!(
                "pair operation on node {a} with itself"
            )));
        }
        let ia = self.index(a)?;
        let ib = self.index(b)?;
        if ia < ib {
            let (left, right) = self.nodes.split_at_mut(ib);
            Ok((&mut left[ia], &mut right[0]))
        } else {
            let (left, right) = self.nodes.split_at_mut(ia);
            Ok((&mut right[0], &mut left[ib]))
        }
    }

    /// Apply `f` to both nodes of a pair, then verify the pair is still symmetric.
    fn apply_pair<R>(
        &mut self,
        a: NodeId,
        b: NodeId,
        f: impl FnOnce(&mut Node, &mut Node) -> R,
    ) -> Result<R> {
        let (na, nb) = self.pair_mut(a, b)?;
        let out = f(na, nb);
        if na.neighbors.contains(&b) != nb.neighbors.contains(&a) {
            return Err(SimError::InvariantViolation(format!(
                "asymmetric neighbor relation between {a} and {b}"
            )));
        }
        Ok(out)
    }

    fn connect(&mut self, a: NodeId, b: NodeId) -> Result<bool> {
        self.apply_pair(a, b, link)
    }

    fn disconnect(&mut self, a: NodeId, b: NodeId) -> Result<bool> {
        self.apply_pair(a, b, unlink)
    }
}

/// Link two nodes and reset both `attempts`. False if already linked.
fn link(a: &mut Node, b: &mut Node) -> bool {
    if a.neighbors.contains(&b.id) {
        return false;
    }
    a.neighbors.insert(b.id);
    b.neighbors.insert(a.id);
    a.state.strikes.remove(&b.id);
    b.state.strikes.remove(&a.id);
    a.state.attempts = 0;
    b.state.attempts = 0;
    true
}

fn unlink(a: &mut Node, b: &mut Node) -> bool {
    let removed = a.neighbors.remove(&b.id);
    b.neighbors.remove(&a.id);
    a.state.strikes.remove(&b.id);
    b.state.strikes.remove(&a.id);
    removed
}

#[derive(Debug, Default)]
pub struct NodeRegistry {
    arena: RwLock<Arena>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Arena>> {
        self.arena
            .read()
            .map_err(|_| SimError::InvariantViolation("registry lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Arena>> {
        self.arena
            .write()
            .map_err(|_| SimError::InvariantViolation("registry lock poisoned".to_string()))
    }

    /// Allocate the next id and insert the node built for it, as one step.
    ///
    /// `build` receives the new id and the creation ordinal. If it fails, no id is
    /// consumed.
    pub(crate) fn register_with(
        &self,
        build: impl FnOnce(NodeId, u64) -> Result<Node>,
    ) -> Result<NodeId> {
        let mut arena = self.write()?;
        let ordinal = arena.nodes.len() as u64;
        let id = ordinal + 1;
        let node = build(id, ordinal)?;
        if node.id != id {
            return Err(SimError::InvariantViolation(format!(
                "node built with id {} but {id} was allocated",
                node.id
            )));
        }
        if let Some(last) = arena.nodes.last() {
            if last.id >= id {
                return Err(SimError::InvariantViolation(format!(
                    "non-monotonic id {id} after {}",
                    last.id
                )));
            }
        }
        arena.nodes.push(node);
        Ok(id)
    }

    pub fn get(&self, id: NodeId) -> Result<Node> {
        Ok(self.read()?.get(id)?.clone())
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.read().map(|a| a.index(id).is_ok()).unwrap_or(false)
    }

    /// Every node, ordered by id, read under one lock.
    pub fn all(&self) -> Result<Vec<Node>> {
        Ok(self.read()?.nodes.clone())
    }

    pub fn snapshot(&self) -> Result<Snapshot> {
        self.all().map(Snapshot::from_nodes)
    }

    pub fn len(&self) -> usize {
        self.read().map(|a| a.nodes.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mutate a node's own state. Neighbor membership is visible but read-only here.
    pub(crate) fn update_state<R>(
        &self,
        id: NodeId,
        f: impl FnOnce(&mut NodeState, &BTreeSet<NodeId>) -> R,
    ) -> Result<R> {
        let mut arena = self.write()?;
        let node = arena.get_mut(id)?;
        Ok(f(&mut node.state, &node.neighbors))
    }

    /// Apply `f` to both nodes as one atomic unit; the only primitive that may
    /// change neighbor membership. Fails with `InvariantViolation` if the pair is
    /// left asymmetric.
    pub(crate) fn mutate_pair<R>(
        &self,
        a: NodeId,
        b: NodeId,
        f: impl FnOnce(&mut Node, &mut Node) -> R,
    ) -> Result<R> {
        self.write()?.apply_pair(a, b, f)
    }

    /// Store a tick's hysteresis counters, but only if the node's neighbor set is
    /// still the one they were computed for. A pair operation by another node in
    /// the meantime wins; returns false and leaves the live counters alone.
    pub(crate) fn record_strikes(
        &self,
        id: NodeId,
        planned_for: &BTreeSet<NodeId>,
        strikes: BTreeMap<NodeId, u32>,
        attempts: u32,
    ) -> Result<bool> {
        self.update_state(id, |s, neighbors| {
            if neighbors != planned_for {
                return false;
            }
            s.strikes = strikes;
            s.attempts = attempts;
            true
        })
    }

    /// Unlink two nodes. Returns false if they were not linked.
    pub(crate) fn disconnect(&self, a: NodeId, b: NodeId) -> Result<bool> {
        self.mutate_pair(a, b, unlink)
    }

    /// Apply a planned rewire in one transaction: evictions, then the new link.
    ///
    /// The plan was made from a snapshot, so it is re-validated against the live
    /// arena first; a stale plan is skipped (`Ok(false)`) rather than partially
    /// applied.
    pub(crate) fn rewire(&self, r: &Rewire) -> Result<bool> {
        let mut arena = self.write()?;

        let a = arena.get(r.a)?;
        let b = arena.get(r.b)?;
        if a.neighbors.contains(&r.b) || b.state.degraded || a.state.degraded {
            return Ok(false);
        }
        // Evict only from a side that is still full; a side with room keeps its links.
        let slot = |n: &Node, evict: Option<NodeId>| -> Option<Option<NodeId>> {
            if !n.is_full() {
                return Some(None);
            }
            match evict {
                Some(e) if n.neighbors.contains(&e) && n.max_degree == Some(n.degree()) => {
                    Some(Some(e))
                }
                _ => None,
            }
        };
        let (Some(evict_a), Some(evict_b)) = (slot(a, r.evict_a), slot(b, r.evict_b)) else {
            return Ok(false);
        };

        if let Some(e) = evict_a {
            arena.disconnect(r.a, e)?;
        }
        if let Some(e) = evict_b {
            arena.disconnect(r.b, e)?;
        }
        arena.connect(r.a, r.b)
    }

    /// Full audit of the neighbor relation: no self links, no dangling ids, symmetric.
    pub fn check_symmetry(&self) -> Result<()> {
        let arena = self.read()?;
        for node in &arena.nodes {
            for &peer in &node.neighbors {
                if peer == node.id {
                    return Err(SimError::InvariantViolation(format!(
                        "node {peer} lists itself as a neighbor"
                    )));
                }
                let other = arena.get(peer).map_err(|_| {
                    SimError::InvariantViolation(format!(
                        "node {} lists unknown neighbor {peer}",
                        node.id
                    ))
                })?;
                if !other.neighbors.contains(&node.id) {
                    return Err(SimError::InvariantViolation(format!(
                        "{} -> {peer} has no reverse link",
                        node.id
                    )));
                }
            }
        }
        Ok(())
    }
}
