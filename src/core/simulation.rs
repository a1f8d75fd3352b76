//! The public face of the engine.
//!
//! `Simulation` wires the registry, history, factory and scheduler together and
//! exposes only creation and read-only queries. Neighbor sets, `attempts` and
//! anchoring change solely inside ticks.

use std::sync::Arc;

use tracing::info;

use crate::config::SimulationConfig;
use crate::error::{Result, SimError};
use crate::factory::{NeighborFactory, NodeOverrides};
use crate::history::{HistoryEntry, HistoryLog};
use crate::node::{NodeId, NodeKind};
use crate::observer::{NodeView, StatusSnapshot};
use crate::physics::PhysicsIntegrator;
use crate::policy::ConnectionPolicy;
use crate::registry::NodeRegistry;
use crate::scheduler::TickScheduler;
use crate::similarity::SimilarityScorer;
#[cfg(test)]
use crate::tick::TickOutcome;
use crate::tick::Ticker;

pub struct Simulation {
    config: SimulationConfig,
    registry: Arc<NodeRegistry>,
    history: Arc<HistoryLog>,
    factory: NeighborFactory,
    scheduler: TickScheduler,
}

impl Simulation {
    pub fn new(config: SimulationConfig) -> Result<Self> {
        config.validate().map_err(SimError::InvalidConfig)?;

        let registry = Arc::new(NodeRegistry::new());
        let history = Arc::new(HistoryLog::new(config.history_capacity));
        let ticker = Ticker::new(
            Arc::clone(&registry),
            Arc::clone(&history),
            PhysicsIntegrator::new(config.physics),
            ConnectionPolicy::new(
                config.similarity_cutoff,
                SimilarityScorer::new(config.similarity),
            ),
        );
        let factory = NeighborFactory::new(Arc::clone(&registry), config.clone());
        let scheduler = TickScheduler::new(ticker, Arc::clone(&registry));

        Ok(Self {
            config,
            registry,
            history,
            factory,
            scheduler,
        })
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Mint a node; it is ticked right away if the scheduler is running.
    pub fn create_node(&self, kind: &str, overrides: NodeOverrides) -> Result<NodeId> {
        let id = self.factory.create(kind, overrides)?;
        self.scheduler.spawn(id)?;
        Ok(id)
    }

    pub fn create_node_kind(&self, kind: NodeKind, overrides: NodeOverrides) -> Result<NodeId> {
        let id = self.factory.create_kind(kind, overrides)?;
        self.scheduler.spawn(id)?;
        Ok(id)
    }

    pub fn get_node_snapshot(&self, id: NodeId) -> Result<NodeView> {
        Ok(NodeView::from(&self.registry.get(id)?))
    }

    pub fn list_node_snapshots(&self) -> Result<Vec<NodeView>> {
        Ok(self.registry.all()?.iter().map(NodeView::from).collect())
    }

    pub fn get_history(&self, id: NodeId) -> Result<Vec<HistoryEntry>> {
        if !self.registry.contains(id) {
            return Err(SimError::NotFound(id));
        }
        self.history.read(id)
    }

    pub fn get_status(&self) -> Result<StatusSnapshot> {
        let nodes = self.registry.all()?;
        Ok(StatusSnapshot::collect(
            &nodes,
            self.scheduler.tick_rate_summary(),
            self.scheduler.is_running(),
        ))
    }

    /// Audit the neighbor relation. Read-only.
    pub fn check_invariants(&self) -> Result<()> {
        self.registry.check_symmetry()
    }

    pub fn start(&self) -> Result<()> {
        self.scheduler.start()
    }

    pub async fn stop(&self) {
        self.scheduler.stop().await;
    }

    pub fn is_running(&self) -> bool {
        self.scheduler.is_running()
    }

    /// Resolves once any tick reports an invariant violation.
    pub async fn wait_fatal(&self) -> SimError {
        let err = self.scheduler.wait_fatal().await;
        info!(error = %err, "simulation halted");
        err
    }

    #[cfg(test)]
    pub(crate) fn tick(&self, id: NodeId) -> Result<TickOutcome> {
        self.scheduler.ticker().tick(id)
    }

    #[cfg(test)]
    pub(crate) fn registry(&self) -> &NodeRegistry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::Vec3;
    use serde_json::json;

    fn sim() -> Simulation {
        Simulation::new(SimulationConfig::default().with_seed(7)).unwrap()
    }

    fn point_at(sim: &Simulation, x: f64) -> NodeId {
        sim.create_node(
            "point",
            NodeOverrides::default()
                .at(Vec3::new(x, 0.0, 0.0))
                .with_connection_threshold(2.0)
                .with_payload(json!("point data")),
        )
        .unwrap()
    }

    fn ticked(outcome: TickOutcome) -> crate::tick::TickReport {
        match outcome {
            TickOutcome::Ticked(r) => r,
            other => panic!("expected a tick, got {other:?}"),
        }
    }

    #[test]
    fn invalid_config_is_rejected() {
        let cfg = SimulationConfig::default().with_history_capacity(0);
        assert!(matches!(Simulation::new(cfg), Err(SimError::InvalidConfig(_))));
    }

    #[test]
    fn close_similar_points_connect_after_one_tick_each() {
        let sim = sim();
        let a = point_at(&sim, 0.0);
        let b = point_at(&sim, 1.0);

        ticked(sim.tick(a).unwrap());
        ticked(sim.tick(b).unwrap());

        assert_eq!(sim.get_node_snapshot(a).unwrap().neighbors, vec![b]);
        assert_eq!(sim.get_node_snapshot(b).unwrap().neighbors, vec![a]);
        sim.check_invariants().unwrap();
    }

    #[test]
    fn far_apart_nodes_never_meet() {
        let sim = sim();
        let make = |x| {
            sim.create_node(
                "block",
                NodeOverrides::default()
                    .at(Vec3::new(x, 0.0, 0.0))
                    .with_connection_threshold(1.0)
                    .with_influence_radius(5.0),
            )
            .unwrap()
        };
        let a = make(0.0);
        let b = make(100.0);
        for _ in 0..50 {
            ticked(sim.tick(a).unwrap());
            ticked(sim.tick(b).unwrap());
        }
        assert!(sim.get_node_snapshot(a).unwrap().neighbors.is_empty());
        assert!(sim.get_node_snapshot(b).unwrap().neighbors.is_empty());
        assert_eq!(sim.get_node_snapshot(b).unwrap().position, Vec3::new(100.0, 0.0, 0.0));
    }

    #[test]
    fn pushed_apart_link_survives_window_then_drops() {
        let sim = sim();
        let window = 3;
        let make = |x| {
            sim.create_node(
                "point",
                NodeOverrides::default()
                    .at(Vec3::new(x, 0.0, 0.0))
                    .with_connection_threshold(2.0)
                    .with_stability_window(window)
                    .with_payload(json!("x")),
            )
            .unwrap()
        };
        let a = make(0.0);
        let b = make(1.0);
        ticked(sim.tick(a).unwrap());
        assert_eq!(sim.get_node_snapshot(a).unwrap().neighbors, vec![b]);

        sim.registry()
            .update_state(b, |s, _| s.position = Vec3::new(50.0, 0.0, 0.0))
            .unwrap();

        for expected in 1..=window {
            let r = ticked(sim.tick(a).unwrap());
            assert!(r.dropped.is_empty());
            assert_eq!(r.attempts, expected);
            assert_eq!(sim.get_node_snapshot(a).unwrap().neighbors, vec![b]);
        }

        let r = ticked(sim.tick(a).unwrap());
        assert_eq!(r.dropped, vec![b]);
        assert_eq!(r.attempts, 0);
        assert!(sim.get_node_snapshot(a).unwrap().neighbors.is_empty());
        assert!(sim.get_node_snapshot(b).unwrap().neighbors.is_empty());

        // The partner's own next evaluation finds nothing failing.
        sim.registry().update_state(b, |s, _| s.attempts = 2).unwrap();
        let r = ticked(sim.tick(b).unwrap());
        assert_eq!(r.attempts, 0);
        sim.check_invariants().unwrap();
    }

    #[test]
    fn still_node_anchors_on_window_tick_and_stays_put() {
        let sim = sim();
        let id = sim
            .create_node(
                "sphere",
                NodeOverrides::default()
                    .at(Vec3::new(3.0, 3.0, 3.0))
                    .with_stability_window(3),
            )
            .unwrap();

        assert!(!ticked(sim.tick(id).unwrap()).anchored);
        assert!(!ticked(sim.tick(id).unwrap()).anchored);
        assert!(ticked(sim.tick(id).unwrap()).anchored);
        assert!(sim.get_node_snapshot(id).unwrap().is_anchor);

        // A neighbor bonds to it; the anchor neither moves nor un-anchors.
        let other = sim
            .create_node(
                "sphere",
                NodeOverrides::default().at(Vec3::new(3.9, 3.0, 3.0)),
            )
            .unwrap();
        assert_eq!(ticked(sim.tick(other).unwrap()).connected, vec![id]);
        for _ in 0..5 {
            ticked(sim.tick(id).unwrap());
            let v = sim.get_node_snapshot(id).unwrap();
            assert!(v.is_anchor);
            assert_eq!(v.position, Vec3::new(3.0, 3.0, 3.0));
            assert_eq!(v.velocity, Vec3::ZERO);
        }
    }

    #[test]
    fn late_failing_link_gets_its_own_full_window() {
        let sim = sim();
        let window = 3;
        let make = |x| {
            sim.create_node(
                "block",
                NodeOverrides::default()
                    .at(Vec3::new(x, 0.0, 0.0))
                    .with_connection_threshold(2.0)
                    .with_influence_radius(5.0)
                    .with_tick_interval(0.01)
                    .with_stability_window(window)
                    .with_payload(json!("x")),
            )
            .unwrap()
        };
        let a = make(0.0);
        let b = make(1.0);
        let c = make(-1.0);
        let r = ticked(sim.tick(a).unwrap());
        assert_eq!(r.connected, vec![b, c]);

        let push = |id, x| {
            sim.registry()
                .update_state(id, |s, _| s.position = Vec3::new(x, 0.0, 0.0))
                .unwrap()
        };
        push(b, 50.0);
        for expected in 1..=window {
            let r = ticked(sim.tick(a).unwrap());
            assert!(r.dropped.is_empty());
            assert_eq!(r.attempts, expected);
        }

        // b is past its window; c fails for the first time and must stay.
        push(c, -50.0);
        let r = ticked(sim.tick(a).unwrap());
        assert_eq!(r.dropped, vec![b]);
        assert_eq!(r.attempts, 1);
        assert_eq!(sim.get_node_snapshot(a).unwrap().neighbors, vec![c]);

        for expected in 2..=window {
            let r = ticked(sim.tick(a).unwrap());
            assert!(r.dropped.is_empty());
            assert_eq!(r.attempts, expected);
        }
        let r = ticked(sim.tick(a).unwrap());
        assert_eq!(r.dropped, vec![c]);
        assert_eq!(r.attempts, 0);
        assert!(sim.get_node_snapshot(a).unwrap().neighbors.is_empty());
        sim.check_invariants().unwrap();
    }

    #[test]
    fn moving_node_never_anchors_while_it_moves() {
        let sim = sim();
        let id = sim
            .create_node(
                "sphere",
                NodeOverrides::default()
                    .at(Vec3::ZERO)
                    .with_velocity(Vec3::new(1.0, 0.0, 0.0))
                    .with_stability_window(1),
            )
            .unwrap();

        for _ in 0..3 {
            assert!(!ticked(sim.tick(id).unwrap()).anchored);
        }
        let v = sim.get_node_snapshot(id).unwrap();
        assert!(!v.is_anchor);
        assert!(v.position.x > 0.0);

        // At rest from creation, a window of one anchors on the first tick.
        let still = sim
            .create_node(
                "sphere",
                NodeOverrides::default()
                    .at(Vec3::new(-20.0, 0.0, 0.0))
                    .with_stability_window(1),
            )
            .unwrap();
        assert!(ticked(sim.tick(still).unwrap()).anchored);
    }

    #[test]
    fn history_is_bounded_and_ordered() {
        let sim = Simulation::new(
            SimulationConfig::default()
                .with_seed(1)
                .with_history_capacity(4),
        )
        .unwrap();
        let id = point_at(&sim, 0.0);
        assert!(sim.get_history(id).unwrap().is_empty());
        for _ in 0..10 {
            sim.tick(id).unwrap();
        }
        let h = sim.get_history(id).unwrap();
        assert_eq!(h.len(), 4);
        assert_eq!(h.first().map(|e| e.idx), Some(6));
        assert!(h.windows(2).all(|w| w[1].idx == w[0].idx + 1));
        assert_eq!(sim.get_history(99), Err(SimError::NotFound(99)));
    }

    #[test]
    fn degraded_node_is_isolated() {
        let sim = sim();
        let a = point_at(&sim, 0.0);
        let b = point_at(&sim, 1.0);
        sim.registry()
            .update_state(a, |s, _| {
                s.position = Vec3::new(f64::MAX, 0.0, 0.0);
                s.velocity = Vec3::new(f64::MAX, 0.0, 0.0);
            })
            .unwrap();

        assert!(matches!(
            sim.tick(a).unwrap(),
            TickOutcome::Degraded(SimError::NumericFault { .. })
        ));
        assert_eq!(sim.tick(a).unwrap(), TickOutcome::Skipped);

        let r = ticked(sim.tick(b).unwrap());
        assert!(r.connected.is_empty());
        let status = sim.get_status().unwrap();
        assert_eq!(status.degraded_count, 1);
        assert_eq!(status.connection_count, 0);
        // Still queryable.
        assert!(sim.get_node_snapshot(a).unwrap().degraded);
    }

    #[test]
    fn full_point_trades_up_and_stays_symmetric() {
        let sim = sim();
        let mk = |x: f64, payload| {
            sim.create_node(
                "point",
                NodeOverrides::default()
                    .at(Vec3::new(x, 0.0, 0.0))
                    .with_payload(payload),
            )
            .unwrap()
        };
        let hub = mk(0.0, json!("alpha"));
        let weak = mk(1.0, json!("alphx"));
        ticked(sim.tick(hub).unwrap());
        assert_eq!(sim.get_node_snapshot(hub).unwrap().neighbors, vec![weak]);

        let strong = mk(-1.0, json!("alpha"));
        let r = ticked(sim.tick(hub).unwrap());
        assert_eq!(r.connected, vec![strong]);
        assert_eq!(sim.get_node_snapshot(hub).unwrap().neighbors, vec![strong]);
        assert!(sim.get_node_snapshot(weak).unwrap().neighbors.is_empty());
        sim.check_invariants().unwrap();
    }

    #[test]
    fn status_counts_links_once() {
        let sim = sim();
        let a = point_at(&sim, 0.0);
        let _b = point_at(&sim, 1.0);
        sim.tick(a).unwrap();
        let s = sim.get_status().unwrap();
        assert_eq!(s.node_count, 2);
        assert_eq!(s.connection_count, 1);
        assert!(!s.running);
    }
}
