use thiserror::Error;

use crate::node::NodeId;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimError {
    #[error("invalid node kind '{0}' (expected Block, Point or Sphere)")]
    InvalidKind(String),

    #[error("invalid override `{field}`: {reason}")]
    InvalidOverride {
        field: &'static str,
        reason: String,
    },

    #[error("node not found: {0}")]
    NotFound(NodeId),

    /// Shared state is corrupt (neighbor symmetry, id or history ordering).
    /// Nothing downstream can be trusted after this.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("numeric fault on node {id}: {detail}")]
    NumericFault { id: NodeId, detail: String },

    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

impl SimError {
    pub(crate) fn invalid_override(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidOverride {
            field,
            reason: reason.into(),
        }
    }

    /// Only invariant violations should take the process down.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::InvariantViolation(_))
    }

    /// Short machine-readable tag, used by the wire protocol.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidKind(_) => "InvalidKind",
            Self::InvalidOverride { .. } => "InvalidOverride",
            Self::NotFound(_) => "NotFound",
            Self::InvariantViolation(_) => "InvariantViolation",
            Self::NumericFault { .. } => "NumericFault",
            Self::InvalidConfig(_) => "InvalidConfig",
        }
    }
}

pub type Result<T> = core::result::Result<T, SimError>;
