//! JSON-lines wire protocol spoken by `radiantd` and `radiant-cli`.
//!
//! One `type`-tagged object per line in each direction.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SimError;
use crate::history::HistoryEntry;
use crate::node::NodeId;
use crate::observer::{NodeView, StatusSnapshot};

pub const DEFAULT_ADDR: &str = "127.0.0.1:8401";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    CreateNode {
        kind: String,
        #[serde(default)]
        overrides: Value,
    },
    GetNode {
        id: NodeId,
    },
    ListNodes,
    GetHistory {
        id: NodeId,
    },
    GetStatus,
    /// Stream `Nodes` frames every `interval_ms` until the client goes away.
    Watch {
        #[serde(default = "default_watch_ms")]
        interval_ms: u64,
    },
    Shutdown,
}

fn default_watch_ms() -> u64 {
    500
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Response {
    Created { id: NodeId },
    Node(NodeView),
    Nodes { nodes: Vec<NodeView> },
    History { id: NodeId, entries: Vec<HistoryEntry> },
    Status(StatusSnapshot),
    Success { message: String },
    Error { kind: String, message: String },
}

impl Response {
    pub fn error(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

impl From<SimError> for Response {
    fn from(e: SimError) -> Self {
        Self::error(e.kind(), e.to_string())
    }
}
