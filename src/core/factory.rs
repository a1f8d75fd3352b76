//! Node minting: kind defaults, validated overrides, id and address allocation.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[cfg(feature = "serde")]
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use crate::config::SimulationConfig;
use crate::error::{Result, SimError};
use crate::node::{Node, NodeId, NodeKind, NodeState, Payload};
use crate::prng::Prng;
use crate::registry::NodeRegistry;
use crate::vector::Vec3;

/// Smallest accepted `tick_interval`, in seconds.
pub const MIN_TICK_INTERVAL_SECS: f64 = 0.001;

/// Caller-supplied replacements for kind defaults. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Deserialize))]
#[cfg_attr(feature = "serde", serde(default, deny_unknown_fields))]
pub struct NodeOverrides {
    pub position: Option<Vec3>,
    pub velocity: Option<Vec3>,
    pub connection_threshold: Option<f64>,
    pub influence_radius: Option<f64>,
    /// Seconds.
    pub tick_interval: Option<f64>,
    pub payload: Option<Value>,
    pub is_anchor: Option<bool>,
    pub stability_window: Option<u32>,
    pub max_degree: Option<usize>,
}

impl NodeOverrides {
    pub fn at(mut self, position: Vec3) -> Self {
        self.position = Some(position);
        self
    }

    pub fn with_velocity(mut self, velocity: Vec3) -> Self {
        self.velocity = Some(velocity);
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_connection_threshold(mut self, threshold: f64) -> Self {
        self.connection_threshold = Some(threshold);
        self
    }

    pub fn with_influence_radius(mut self, radius: f64) -> Self {
        self.influence_radius = Some(radius);
        self
    }

    pub fn with_tick_interval(mut self, secs: f64) -> Self {
        self.tick_interval = Some(secs);
        self
    }

    pub fn with_stability_window(mut self, window: u32) -> Self {
        self.stability_window = Some(window);
        self
    }

    pub fn with_max_degree(mut self, max: usize) -> Self {
        self.max_degree = Some(max);
        self
    }

    pub fn anchored(mut self) -> Self {
        self.is_anchor = Some(true);
        self
    }

    /// Parse overrides from a JSON object; unknown keys are rejected.
    #[cfg(feature = "serde")]
    pub fn from_json(value: Value) -> Result<Self> {
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(value)
            .map_err(|e| SimError::invalid_override("overrides", e.to_string()))
    }
}

fn positive(field: &'static str, v: f64) -> Result<f64> {
    if !v.is_finite() {
        return Err(SimError::invalid_override(field, "must be finite"));
    }
    if v <= 0.0 {
        return Err(SimError::invalid_override(field, format!("must be > 0, got {v}")));
    }
    Ok(v)
}

fn finite_vec(field: &'static str, v: Vec3) -> Result<Vec3> {
    if v.is_finite() {
        Ok(v)
    } else {
        Err(SimError::invalid_override(field, format!("must be finite, got {v}")))
    }
}

/// Everything about a new node except its id and address, already validated.
#[derive(Debug, Clone)]
struct Blueprint {
    position: Option<Vec3>,
    velocity: Vec3,
    connection_threshold: f64,
    influence_radius: f64,
    tick_interval: Duration,
    payload: Payload,
    is_anchor: bool,
    stability_window: u32,
    max_degree: Option<usize>,
}

/// FNV-1a over id, kind and creation ordinal.
fn address_hash(id: NodeId, kind: NodeKind, ordinal: u64) -> u32 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut h = OFFSET;
    let bytes = id
        .to_le_bytes()
        .into_iter()
        .chain([kind.letter() as u8])
        .chain(ordinal.to_le_bytes());
    for b in bytes {
        h ^= u64::from(b);
        h = h.wrapping_mul(PRIME);
    }
    (h ^ (h >> 32)) as u32
}

pub fn derive_address(id: NodeId, kind: NodeKind, ordinal: u64) -> String {
    format!("{}-{id:04}-{:08x}", kind.letter(), address_hash(id, kind, ordinal))
}

fn entropy_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0x5EED)
}

pub struct NeighborFactory {
    registry: Arc<NodeRegistry>,
    config: SimulationConfig,
    rng: Mutex<Prng>,
}

impl NeighborFactory {
    pub fn new(registry: Arc<NodeRegistry>, config: SimulationConfig) -> Self {
        let seed = config.seed.unwrap_or_else(entropy_seed);
        Self {
            registry,
            config,
            rng: Mutex::new(Prng::new(seed)),
        }
    }

    /// Create a node from a kind name (`block`, `point`, `sphere`, any case).
    pub fn create(&self, kind: &str, overrides: NodeOverrides) -> Result<NodeId> {
        self.create_kind(kind.parse()?, overrides)
    }

    pub fn create_kind(&self, kind: NodeKind, overrides: NodeOverrides) -> Result<NodeId> {
        let bp = self.blueprint(kind, overrides)?;
        let position = match bp.position {
            Some(p) => p,
            None => self
                .rng
                .lock()
                .map_err(|_| SimError::InvariantViolation("spawn rng poisoned".to_string()))?
                .gen_position(self.config.spawn_extent),
        };

        let id = self.registry.register_with(|id, ordinal| {
            Ok(Node {
                id,
                address: derive_address(id, kind, ordinal),
                kind,
                payload: bp.payload,
                connection_threshold: bp.connection_threshold,
                influence_radius: bp.influence_radius,
                tick_interval: bp.tick_interval,
                stability_window: bp.stability_window,
                max_degree: bp.max_degree,
                state: NodeState::new(position, bp.velocity, bp.is_anchor),
                neighbors: BTreeSet::new(),
            })
        })?;

        info!(id, kind = %kind, position = %position, "node created");
        Ok(id)
    }

    fn blueprint(&self, kind: NodeKind, o: NodeOverrides) -> Result<Blueprint> {
        let defaults = self.config.kinds.get(kind);

        let position = o.position.map(|p| finite_vec("position", p)).transpose()?;
        let velocity = match o.velocity {
            Some(v) => finite_vec("velocity", v)?,
            None => Vec3::ZERO,
        };

        let connection_threshold = match o.connection_threshold {
            Some(v) => positive("connection_threshold", v)?,
            None => defaults.connection_threshold,
        };
        let influence_radius = match o.influence_radius {
            Some(v) => positive("influence_radius", v)?,
            None => defaults.influence_radius,
        };
        if influence_radius < connection_threshold {
            return Err(SimError::invalid_override(
                "influence_radius",
                format!("{influence_radius} is below connection_threshold {connection_threshold}"),
            ));
        }

        let tick_interval = match o.tick_interval {
            Some(secs) => {
                let secs = positive("tick_interval", secs)?;
                if secs < MIN_TICK_INTERVAL_SECS {
                    return Err(SimError::invalid_override(
                        "tick_interval",
                        format!("must be >= {MIN_TICK_INTERVAL_SECS}s, got {secs}"),
                    ));
                }
                Duration::try_from_secs_f64(secs)
                    .map_err(|e| SimError::invalid_override("tick_interval", e.to_string()))?
            }
            None => Duration::from_millis(defaults.tick_interval_ms),
        };

        let stability_window = match o.stability_window {
            Some(0) => return Err(SimError::invalid_override("stability_window", "must be >= 1")),
            Some(w) => w,
            None => self.config.stability_window,
        };
        let max_degree = match o.max_degree {
            Some(0) => return Err(SimError::invalid_override("max_degree", "must be >= 1")),
            Some(m) => Some(m),
            None => defaults.max_degree,
        };

        Ok(Blueprint {
            position,
            velocity,
            connection_threshold,
            influence_radius,
            tick_interval,
            payload: Payload::new(o.payload.unwrap_or(Value::Null)),
            is_anchor: o.is_anchor.unwrap_or(false),
            stability_window,
            max_degree,
        })
    }
}
