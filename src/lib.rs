//! Radiant: a population of spatial nodes that drift, sense each other, bond by
//! proximity and payload similarity, and settle into anchored structures.
//!
//! Start with [`simulation::Simulation`].

#[path = "core/vector.rs"]
pub mod vector;

#[path = "core/prng.rs"]
pub mod prng;

#[path = "core/error.rs"]
pub mod error;

#[path = "core/config.rs"]
pub mod config;

#[path = "core/node.rs"]
pub mod node;

#[path = "core/similarity.rs"]
pub mod similarity;

#[path = "core/physics.rs"]
pub mod physics;

#[path = "core/discovery.rs"]
pub mod discovery;

#[path = "core/policy.rs"]
pub mod policy;

#[path = "core/registry.rs"]
pub mod registry;

#[path = "core/history.rs"]
pub mod history;

#[path = "core/factory.rs"]
pub mod factory;

#[path = "core/tick.rs"]
pub mod tick;

#[path = "core/scheduler.rs"]
pub mod scheduler;

#[path = "core/simulation.rs"]
pub mod simulation;

pub mod observer;

#[cfg(feature = "serde")]
pub mod protocol;

pub use config::SimulationConfig;
pub use error::{Result, SimError};
pub use factory::NodeOverrides;
pub use history::HistoryEntry;
pub use node::{NodeId, NodeKind};
pub use observer::{NodeView, StatusSnapshot};
pub use simulation::Simulation;
pub use vector::Vec3;
