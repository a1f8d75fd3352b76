//! One node's tick.
//!
//! physics -> discovery -> scoring -> connection maintenance -> anchoring -> history.
//!
//! Every read is taken from a registry snapshot and every write goes back through
//! the registry's short critical sections, so a tick never holds the lock while
//! scoring.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};

use crate::discovery;
use crate::error::{Result, SimError};
use crate::history::{HistoryLog, HistoryRecord};
use crate::node::{Fingerprint, NodeId};
use crate::physics::PhysicsIntegrator;
use crate::policy::ConnectionPolicy;
use crate::registry::NodeRegistry;
use crate::vector::Vec3;

#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub connected: Vec<NodeId>,
    pub dropped: Vec<NodeId>,
    /// True only on the tick that anchored the node.
    pub anchored: bool,
    pub attempts: u32,
    pub history_idx: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Ticked(TickReport),
    /// The node was already degraded; nothing happened.
    Skipped,
    /// This tick hit a numeric fault and the node is now degraded.
    Degraded(SimError),
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[derive(Clone)]
pub(crate) struct Ticker {
    registry: Arc<NodeRegistry>,
    history: Arc<HistoryLog>,
    physics: PhysicsIntegrator,
    policy: ConnectionPolicy,
}

impl Ticker {
    pub(crate) fn new(
        registry: Arc<NodeRegistry>,
        history: Arc<HistoryLog>,
        physics: PhysicsIntegrator,
        policy: ConnectionPolicy,
    ) -> Self {
        Self {
            registry,
            history,
            physics,
            policy,
        }
    }

    pub(crate) fn tick(&self, id: NodeId) -> Result<TickOutcome> {
        let snapshot = self.registry.snapshot()?;
        let me = snapshot.get(id).ok_or(SimError::NotFound(id))?;
        if me.state.degraded {
            return Ok(TickOutcome::Skipped);
        }

        // Physics: pulled only by connected neighbors.
        let connected: Vec<Vec3> = me
            .neighbors
            .iter()
            .filter_map(|n| snapshot.get(*n))
            .map(|n| n.position())
            .collect();
        let dt = me.tick_interval.as_secs_f64();
        let motion = self.physics.step(&me.state, &connected, dt);

        if !motion.is_finite() {
            let fault = SimError::NumericFault {
                id,
                detail: format!(
                    "non-finite motion: position {} velocity {}",
                    motion.position, motion.velocity
                ),
            };
            self.registry.update_state(id, |s, _| s.degraded = true)?;
            warn!(id, error = %fault, "node degraded");
            return Ok(TickOutcome::Degraded(fault));
        }

        self.registry.update_state(id, |s, _| {
            s.position = motion.position;
            s.velocity = motion.velocity;
            s.gravity = motion.gravity();
        })?;

        // Discovery and policy see the post-move world.
        let snapshot = self.registry.snapshot()?;
        let me = snapshot.get(id).ok_or(SimError::NotFound(id))?;
        let candidates = discovery::candidates(me, snapshot.nodes());
        let plan = self.policy.evaluate(me, &candidates, &snapshot);
        let window = me.stability_window;
        let mut planned_for = me.neighbors.clone();

        let mut dropped = Vec::with_capacity(plan.drop.len());
        for &peer in &plan.drop {
            if self.registry.disconnect(id, peer)? {
                info!(id, peer, "connection dropped");
                dropped.push(peer);
            }
            planned_for.remove(&peer);
        }
        if !plan.failing.is_empty() {
            debug!(id, failing = ?plan.failing, attempts = plan.attempts, "re-check failed");
        }
        let recorded = self
            .registry
            .record_strikes(id, &planned_for, plan.strikes, plan.attempts)?;
        if !recorded {
            debug!(id, "neighbors changed mid-tick; counters left as they were");
        }

        let mut connected = Vec::with_capacity(plan.connect.len());
        for rewire in &plan.connect {
            if self.registry.rewire(rewire)? {
                info!(
                    id,
                    peer = rewire.b,
                    similarity = rewire.similarity,
                    evicted = ?rewire.evict_a.or(rewire.evict_b),
                    "connected"
                );
                connected.push(rewire.b);
            }
        }

        let (anchored, record, attempts) = self.registry.update_state(id, |s, neighbors| {
            let anchored = s.observe(Fingerprint::new(s.position, neighbors), window);
            s.ticks += 1;
            let record = HistoryRecord {
                timestamp_ms: now_ms(),
                position: s.position,
                velocity: s.velocity,
                gravity: s.gravity,
                neighbors: neighbors.iter().copied().collect(),
            };
            (anchored, record, s.attempts)
        })?;
        if anchored {
            info!(id, position = %record.position, "node anchored");
        }

        let entry = self.history.append(id, record)?;
        debug!(id, idx = entry.idx, candidates = candidates.len(), "tick");

        Ok(TickOutcome::Ticked(TickReport {
            connected,
            dropped,
            anchored,
            attempts,
            history_idx: entry.idx,
        }))
    }
}
