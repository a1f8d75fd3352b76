#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::node::NodeKind;

/// Per-kind defaults applied by the factory when the caller does not override them.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct KindDefaults {
    /// Max distance at which a connection may form.
    pub connection_threshold: f64,
    /// Max distance at which another node is considered at all.
    pub influence_radius: f64,
    pub tick_interval_ms: u64,
    /// `None` means unlimited.
    pub max_degree: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct KindTable {
    pub block: KindDefaults,
    pub point: KindDefaults,
    pub sphere: KindDefaults,
}

impl Default for KindTable {
    /// Blocks are mid-range connectors with six slots, points hold a single
    /// parent link, spheres are short-range hubs with unlimited degree.
    fn default() -> Self {
        Self {
            block: KindDefaults {
                connection_threshold: 4.0,
                influence_radius: 10.0,
                tick_interval_ms: 500,
                max_degree: Some(6),
            },
            point: KindDefaults {
                connection_threshold: 2.5,
                influence_radius: 5.0,
                tick_interval_ms: 250,
                max_degree: Some(1),
            },
            sphere: KindDefaults {
                connection_threshold: 1.0,
                influence_radius: 1.0,
                tick_interval_ms: 1000,
                max_degree: None,
            },
        }
    }
}

impl KindTable {
    pub fn get(&self, kind: NodeKind) -> &KindDefaults {
        match kind {
            NodeKind::Block => &self.block,
            NodeKind::Point => &self.point,
            NodeKind::Sphere => &self.sphere,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PhysicsConfig {
    /// Scales the summed inverse-square pull into an acceleration.
    pub gravity: f64,

    /// Distances below this are clamped before the inverse-square term.
    pub min_distance: f64,

    /// Neighbors closer than this are touching and exert no pull.
    pub contact_distance: f64,

    // Fraction of velocity shed per second while the node has at least one bond.
    pub damping: f64,

    // Below this speed (with no pull) a bonded node comes to rest exactly.
    pub rest_speed: f64,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            gravity: 1.0,
            min_distance: 0.1,
            contact_distance: 0.5,
            damping: 0.5,
            rest_speed: 1e-3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SimilarityWeights {
    /// Score granted for matching payload kinds before structural comparison.
    pub same_kind_base: f64,
    /// Flat score for payloads of different kinds. Low, but not zero.
    pub mismatch_score: f64,
    /// Text payloads are compared on at most this many characters.
    pub text_compare_limit: usize,
}

impl Default for SimilarityWeights {
    fn default() -> Self {
        Self {
            same_kind_base: 0.5,
            mismatch_score: 0.1,
            text_compare_limit: 128,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SimulationConfig {
    // If set, default spawn positions are reproducible.
    pub seed: Option<u64>,

    /// Max history entries kept per node (oldest evicted first).
    pub history_capacity: usize,

    /// Minimum similarity for a connection to form or hold.
    pub similarity_cutoff: f64,

    /// Default `stability_window` for new nodes.
    pub stability_window: u32,

    /// Nodes without an explicit position spawn uniformly in `[0, spawn_extent)^3`.
    pub spawn_extent: f64,

    pub physics: PhysicsConfig,
    pub similarity: SimilarityWeights,
    pub kinds: KindTable,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: None,
            history_capacity: 256,
            similarity_cutoff: 0.6,
            stability_window: 10,
            spawn_extent: 10.0,
            physics: PhysicsConfig::default(),
            similarity: SimilarityWeights::default(),
            kinds: KindTable::default(),
        }
    }
}

impl SimulationConfig {
    /// Upper bound on history capacity; keeps per-node memory bounded.
    pub const MAX_HISTORY: usize = 1 << 16;

    /// Validate the configuration, returning an error message if invalid.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.history_capacity == 0 {
            return Err("history_capacity must be > 0");
        }
        if self.history_capacity > Self::MAX_HISTORY {
            return Err("history_capacity too large");
        }
        if !(0.0..=1.0).contains(&self.similarity_cutoff) {
            return Err("similarity_cutoff must be in [0, 1]");
        }
        if self.stability_window == 0 {
            return Err("stability_window must be >= 1");
        }
        if !(self.spawn_extent.is_finite() && self.spawn_extent > 0.0) {
            return Err("spawn_extent must be finite and > 0");
        }

        let p = &self.physics;
        if !(p.gravity.is_finite() && p.gravity >= 0.0) {
            return Err("physics.gravity must be finite and >= 0");
        }
        if !(p.min_distance.is_finite() && p.min_distance > 0.0) {
            return Err("physics.min_distance must be finite and > 0");
        }
        if !(p.contact_distance.is_finite() && p.contact_distance >= 0.0) {
            return Err("physics.contact_distance must be finite and >= 0");
        }
        if !(p.damping.is_finite() && p.damping >= 0.0) {
            return Err("physics.damping must be finite and >= 0");
        }
        if !(p.rest_speed.is_finite() && p.rest_speed >= 0.0) {
            return Err("physics.rest_speed must be finite and >= 0");
        }

        let s = &self.similarity;
        if !(0.0..=1.0).contains(&s.same_kind_base) {
            return Err("similarity.same_kind_base must be in [0, 1]");
        }
        if !(s.mismatch_score > 0.0 && s.mismatch_score <= s.same_kind_base) {
            return Err("similarity.mismatch_score must be in (0, same_kind_base]");
        }

        for kind in NodeKind::ALL {
            let d = self.kinds.get(kind);
            if !(d.connection_threshold.is_finite() && d.connection_threshold > 0.0) {
                return Err("kind connection_threshold must be finite and > 0");
            }
            if !(d.influence_radius.is_finite() && d.influence_radius > 0.0) {
                return Err("kind influence_radius must be finite and > 0");
            }
            if d.influence_radius < d.connection_threshold {
                return Err("kind influence_radius must be >= connection_threshold");
            }
            if d.tick_interval_ms == 0 {
                return Err("kind tick_interval_ms must be > 0");
            }
            if d.max_degree == Some(0) {
                return Err("kind max_degree must be >= 1");
            }
        }

        Ok(())
    }

    /// Set the random seed for reproducible spawn positions.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    pub fn with_similarity_cutoff(mut self, cutoff: f64) -> Self {
        self.similarity_cutoff = cutoff;
        self
    }

    pub fn with_stability_window(mut self, window: u32) -> Self {
        self.stability_window = window;
        self
    }

    pub fn with_gravity(mut self, gravity: f64) -> Self {
        self.physics.gravity = gravity;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert_eq!(SimulationConfig::default().validate(), Ok(()));
    }

    #[test]
    fn kind_defaults_keep_radius_above_threshold() {
        let kinds = KindTable::default();
        for kind in NodeKind::ALL {
            let d = kinds.get(kind);
            assert!(d.influence_radius >= d.connection_threshold, "{kind:?}");
        }
    }

    #[test]
    fn validate_rejects_bad_values() {
        let cfg = SimulationConfig::default().with_history_capacity(0);
        assert!(cfg.validate().is_err());

        let cfg = SimulationConfig::default().with_similarity_cutoff(1.5);
        assert!(cfg.validate().is_err());

        let mut cfg = SimulationConfig::default();
        cfg.kinds.sphere.influence_radius = 0.5;
        assert!(cfg.validate().is_err());

        let mut cfg = SimulationConfig::default();
        cfg.similarity.mismatch_score = 0.0;
        assert!(cfg.validate().is_err());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn partial_json_fills_defaults() {
        let cfg: SimulationConfig =
            serde_json::from_str(r#"{"seed": 9, "physics": {"gravity": 2.0}}"#).unwrap();
        assert_eq!(cfg.seed, Some(9));
        assert_eq!(cfg.physics.gravity, 2.0);
        assert_eq!(cfg.physics.damping, PhysicsConfig::default().damping);
        assert_eq!(cfg.history_capacity, 256);
    }
}
