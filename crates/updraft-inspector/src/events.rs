//! Event types for graph tracing.

use serde::{Deserialize, Serialize};

use updraft::{EvaluationState, InvalidationState};

/// Serializable mirror of [`InvalidationState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvalidationKind {
    Dirty,
    Deleted,
}

impl From<InvalidationState> for InvalidationKind {
    fn from(state: InvalidationState) -> Self {
        match state {
            InvalidationState::Dirty => Self::Dirty,
            InvalidationState::Deleted => Self::Deleted,
        }
    }
}

/// Serializable mirror of [`EvaluationState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EvaluationKind {
    Built,
    Clean,
}

impl From<EvaluationState> for EvaluationKind {
    fn from(state: EvaluationState) -> Self {
        match state {
            EvaluationState::Built => Self::Built,
            EvaluationState::Clean => Self::Clean,
        }
    }
}

/// One progress event, with the node identified by its debug representation
/// (e.g. `file("/etc/hosts")`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GraphEvent {
    Invalidated { node: String, state: InvalidationKind },
    Enqueueing { node: String },
    Evaluated { node: String, state: EvaluationKind },
}

impl GraphEvent {
    /// The debug representation of the node this event concerns.
    pub fn node(&self) -> &str {
        match self {
            GraphEvent::Invalidated { node, .. }
            | GraphEvent::Enqueueing { node }
            | GraphEvent::Evaluated { node, .. } => node,
        }
    }
}
