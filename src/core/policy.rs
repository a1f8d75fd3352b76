//! Connection maintenance.
//!
//! Per discovered pair a connection is `Absent`, `Pending` (in range, condition not
//! met) or `Connected`. The policy only *plans*; the registry applies the plan
//! under its lock and re-validates each step.
//!
//! Hysteresis: every link keeps its own run of consecutive failed re-checks, and
//! a link is dropped only once its run exceeds `stability_window`. A passing
//! re-check clears the run. The node's `attempts` is its longest live run, so a
//! tick in which a link fails bumps it and a clean tick resets it to 0.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::discovery;
use crate::node::{Node, NodeId};
use crate::registry::Snapshot;
use crate::similarity::SimilarityScorer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ConnectionState {
    Absent,
    Pending,
    Connected,
}

/// Distance and similarity of one pair, with the connect condition evaluated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Link {
    pub peer: NodeId,
    pub distance: f64,
    pub similarity: f64,
    pub satisfied: bool,
}

/// Connect `a` and `b`, first evicting the named neighbors to free capacity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rewire {
    pub a: NodeId,
    pub b: NodeId,
    pub evict_a: Option<NodeId>,
    pub evict_b: Option<NodeId>,
    pub similarity: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionPlan {
    /// New `attempts` value for the ticking node (before any connect resets it).
    pub attempts: u32,
    /// Failure runs of the links that stay, keyed by peer.
    pub strikes: BTreeMap<NodeId, u32>,
    /// Connected peers that failed their re-check this tick.
    pub failing: Vec<NodeId>,
    /// Connections to dissolve now.
    pub drop: Vec<NodeId>,
    pub connect: Vec<Rewire>,
    /// Candidates in range that did not connect this tick.
    pub pending: Vec<NodeId>,
}

#[derive(Debug, Clone, Copy)]
pub struct ConnectionPolicy {
    similarity_cutoff: f64,
    scorer: SimilarityScorer,
}

impl ConnectionPolicy {
    pub fn new(similarity_cutoff: f64, scorer: SimilarityScorer) -> Self {
        Self {
            similarity_cutoff,
            scorer,
        }
    }

    pub fn similarity_cutoff(&self) -> f64 {
        self.similarity_cutoff
    }

    pub fn scorer(&self) -> &SimilarityScorer {
        &self.scorer
    }

    /// Evaluate the connect condition for `a -> b`.
    pub fn check(&self, a: &Node, b: &Node) -> Link {
        let distance = a.position().distance(b.position());
        let similarity = self.scorer.score_payloads(&a.payload, &b.payload);
        let threshold = a.connection_threshold.min(b.connection_threshold);
        Link {
            peer: b.id,
            distance,
            similarity,
            satisfied: !b.state.degraded
                && distance <= threshold
                && similarity >= self.similarity_cutoff,
        }
    }

    pub fn classify(&self, a: &Node, b: &Node) -> ConnectionState {
        if a.neighbors.contains(&b.id) {
            ConnectionState::Connected
        } else if discovery::in_range(a, b) {
            ConnectionState::Pending
        } else {
            ConnectionState::Absent
        }
    }

    /// Plan this tick's connection changes for `me`.
    pub fn evaluate(
        &self,
        me: &Node,
        candidates: &BTreeSet<NodeId>,
        snapshot: &Snapshot,
    ) -> ConnectionPlan {
        let mut plan = ConnectionPlan::default();

        // Re-check existing connections.
        let mut kept: Vec<Link> = Vec::with_capacity(me.neighbors.len());
        for &peer in &me.neighbors {
            let link = match snapshot.get(peer) {
                Some(other) => self.check(me, other),
                None => Link {
                    peer,
                    distance: f64::INFINITY,
                    similarity: 0.0,
                    satisfied: false,
                },
            };
            if link.satisfied {
                kept.push(link);
                continue;
            }

            plan.failing.push(peer);
            let run = me
                .state
                .strikes
                .get(&peer)
                .copied()
                .unwrap_or(0)
                .saturating_add(1);
            if run > me.stability_window {
                plan.drop.push(peer);
            } else {
                plan.strikes.insert(peer, run);
                kept.push(link);
            }
        }
        plan.attempts = plan.strikes.values().copied().max().unwrap_or(0);

        // Strongest candidates first so limited slots go to the best matches.
        let mut offers: Vec<(Link, &Node)> = candidates
            .iter()
            .filter(|id| !me.neighbors.contains(id))
            .filter_map(|&id| snapshot.get(id))
            .map(|other| (self.check(me, other), other))
            .collect();
        offers.sort_by(|(x, _), (y, _)| rank(x, y));

        for (link, other) in offers {
            if !link.satisfied {
                plan.pending.push(link.peer);
                continue;
            }

            let mut evict_a = None;
            if me.max_degree.is_some_and(|m| kept.len() >= m) {
                match weakest(&kept) {
                    Some(w) if link.similarity > w.similarity => evict_a = Some(w.peer),
                    _ => {
                        plan.pending.push(link.peer);
                        continue;
                    }
                }
            }

            let mut evict_b = None;
            if other.is_full() {
                let theirs: Vec<Link> = other
                    .neighbors
                    .iter()
                    .map(|&n| match snapshot.get(n) {
                        Some(nn) => self.check(other, nn),
                        None => Link {
                            peer: n,
                            distance: f64::INFINITY,
                            similarity: 0.0,
                            satisfied: false,
                        },
                    })
                    .collect();
                match weakest(&theirs) {
                    Some(w) if link.similarity > w.similarity => evict_b = Some(w.peer),
                    _ => {
                        plan.pending.push(link.peer);
                        continue;
                    }
                }
            }

            if let Some(e) = evict_a {
                kept.retain(|l| l.peer != e);
            }
            kept.push(link);
            plan.connect.push(Rewire {
                a: me.id,
                b: link.peer,
                evict_a,
                evict_b,
                similarity: link.similarity,
            });
        }

        plan
    }
}

/// Higher similarity first, then nearer, then lower id.
fn rank(x: &Link, y: &Link) -> Ordering {
    y.similarity
        .total_cmp(&x.similarity)
        .then(x.distance.total_cmp(&y.distance))
        .then(x.peer.cmp(&y.peer))
}

/// Lowest similarity, ties broken toward the farthest, then highest id.
fn weakest(links: &[Link]) -> Option<Link> {
    links.iter().copied().max_by(|x, y| rank(x, y))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{NodeKind, NodeState, Payload};
    use crate::vector::Vec3;
    use serde_json::{json, Value};
    use std::time::Duration;

    fn node(id: NodeId, x: f64, payload: Value) -> Node {
        Node {
            id,
            address: format!("T-{id}"),
            kind: NodeKind::Block,
            payload: Payload::new(payload),
            connection_threshold: 2.0,
            influence_radius: 5.0,
            tick_interval: Duration::from_millis(100),
            stability_window: 2,
            max_degree: None,
            state: NodeState::new(Vec3::new(x, 0.0, 0.0), Vec3::ZERO, false),
            neighbors: BTreeSet::new(),
        }
    }

    fn link(a: &mut Node, b: &mut Node) {
        a.neighbors.insert(b.id);
        b.neighbors.insert(a.id);
    }

    fn policy() -> ConnectionPolicy {
        ConnectionPolicy::new(0.6, SimilarityScorer::default())
    }

    fn all_candidates(me: &Node, snap: &Snapshot) -> BTreeSet<NodeId> {
        discovery::candidates(me, snap.nodes())
    }

    #[test]
    fn connects_close_similar_nodes() {
        let a = node(1, 0.0, json!("x"));
        let b = node(2, 1.0, json!("x"));
        let snap = Snapshot::from_nodes(vec![a.clone(), b]);
        let plan = policy().evaluate(&a, &all_candidates(&a, &snap), &snap);
        assert_eq!(plan.connect.len(), 1);
        assert_eq!(plan.connect[0].b, 2);
        assert!(plan.pending.is_empty());
    }

    #[test]
    fn dissimilar_or_distant_nodes_stay_pending() {
        let a = node(1, 0.0, json!("x"));
        let b = node(2, 1.0, json!(12));
        let c = node(3, 4.0, json!("x"));
        let snap = Snapshot::from_nodes(vec![a.clone(), b, c]);
        let plan = policy().evaluate(&a, &all_candidates(&a, &snap), &snap);
        assert!(plan.connect.is_empty());
        // Ranked by similarity: the distant text match comes before the scalar.
        assert_eq!(plan.pending, vec![3, 2]);
    }

    #[test]
    fn failing_link_counts_attempts_then_drops() {
        let mut a = node(1, 0.0, json!("x"));
        let mut b = node(2, 50.0, json!("x"));
        link(&mut a, &mut b);
        let p = policy();

        for expected in 1..=2 {
            let snap = Snapshot::from_nodes(vec![a.clone(), b.clone()]);
            let plan = p.evaluate(&a, &all_candidates(&a, &snap), &snap);
            assert_eq!(plan.failing, vec![2]);
            assert!(plan.drop.is_empty());
            assert_eq!(plan.attempts, expected);
            a.state.attempts = plan.attempts;
            a.state.strikes = plan.strikes;
        }

        let snap = Snapshot::from_nodes(vec![a.clone(), b.clone()]);
        let plan = p.evaluate(&a, &all_candidates(&a, &snap), &snap);
        assert_eq!(plan.drop, vec![2]);
        assert_eq!(plan.attempts, 0);
    }

    #[test]
    fn each_link_serves_its_own_window() {
        let mut a = node(1, 0.0, json!("x"));
        let mut b = node(2, 50.0, json!("x"));
        let mut c = node(3, 1.0, json!("x"));
        link(&mut a, &mut b);
        link(&mut a, &mut c);
        let p = policy();

        for _ in 0..2 {
            let snap = Snapshot::from_nodes(vec![a.clone(), b.clone(), c.clone()]);
            let plan = p.evaluate(&a, &all_candidates(&a, &snap), &snap);
            assert_eq!(plan.failing, vec![2]);
            a.state.strikes = plan.strikes;
        }

        // b has now failed past the window; c fails for the first time.
        c.state.position = Vec3::new(-50.0, 0.0, 0.0);
        let snap = Snapshot::from_nodes(vec![a.clone(), b.clone(), c.clone()]);
        let plan = p.evaluate(&a, &all_candidates(&a, &snap), &snap);
        assert_eq!(plan.failing, vec![2, 3]);
        assert_eq!(plan.drop, vec![2]);
        assert_eq!(plan.strikes, BTreeMap::from([(3, 1)]));
        assert_eq!(plan.attempts, 1);
    }

    #[test]
    fn passing_recheck_clears_that_links_run() {
        let mut a = node(1, 0.0, json!("x"));
        let mut b = node(2, 1.0, json!("x"));
        link(&mut a, &mut b);
        a.state.strikes.insert(2, 2);
        let snap = Snapshot::from_nodes(vec![a.clone(), b]);
        let plan = policy().evaluate(&a, &all_candidates(&a, &snap), &snap);
        assert!(plan.strikes.is_empty());
        assert_eq!(plan.attempts, 0);
    }

    #[test]
    fn clean_recheck_resets_attempts() {
        let mut a = node(1, 0.0, json!("x"));
        let mut b = node(2, 1.0, json!("x"));
        link(&mut a, &mut b);
        a.state.attempts = 2;
        let snap = Snapshot::from_nodes(vec![a.clone(), b]);
        let plan = policy().evaluate(&a, &all_candidates(&a, &snap), &snap);
        assert_eq!(plan.attempts, 0);
        assert!(plan.failing.is_empty());
        assert!(plan.connect.is_empty());
    }

    #[test]
    fn full_node_evicts_weaker_neighbor_only_for_a_better_match() {
        let mut a = node(1, 0.0, json!("alpha"));
        a.max_degree = Some(1);
        let mut weak = node(2, 1.0, json!("alphx"));
        link(&mut a, &mut weak);
        let strong = node(3, -1.0, json!("alpha"));

        let snap = Snapshot::from_nodes(vec![a.clone(), weak.clone(), strong]);
        let plan = policy().evaluate(&a, &all_candidates(&a, &snap), &snap);
        assert_eq!(plan.connect.len(), 1);
        assert_eq!(plan.connect[0].b, 3);
        assert_eq!(plan.connect[0].evict_a, Some(2));

        // An equal-scoring candidate does not displace anyone.
        let same = node(3, -1.0, json!("alphx"));
        let snap = Snapshot::from_nodes(vec![a.clone(), weak, same]);
        let plan = policy().evaluate(&a, &all_candidates(&a, &snap), &snap);
        assert!(plan.connect.is_empty());
        assert_eq!(plan.pending, vec![3]);
    }

    #[test]
    fn classify_pair_states() {
        let mut a = node(1, 0.0, json!("x"));
        let mut b = node(2, 1.0, json!("x"));
        let c = node(3, 4.0, json!("x"));
        let d = node(4, 40.0, json!("x"));
        let p = policy();
        assert_eq!(p.classify(&a, &b), ConnectionState::Pending);
        link(&mut a, &mut b);
        assert_eq!(p.classify(&a, &b), ConnectionState::Connected);
        assert_eq!(p.classify(&a, &c), ConnectionState::Pending);
        assert_eq!(p.classify(&a, &d), ConnectionState::Absent);
    }
}
