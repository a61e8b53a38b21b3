//! Error kinds of the exploration core.
//!
//! Exhaustion of the search is not an error: operations that can run out of
//! choices return `bool` or `Option` instead.

use crate::storage::StorageError;
use crate::StateId;
use thiserror::Error;

/// Errors surfaced by the core.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("choice generator \"{id}\" advanced past its last choice")]
    ChoiceGeneratorDone { id: String },

    #[error("no transition is open; call begin_transition() first")]
    NoOpenTransition,

    #[error("a transition is already open")]
    TransitionAlreadyOpen,

    #[error("no choice generator is installed")]
    NoChoiceGenerator,

    #[error("choice set of {len} alternatives exceeds the limit of {limit}")]
    ChoiceSetTooLarge { len: u128, limit: u128 },

    #[error("snapshot has no last transition")]
    NoLastTransition,

    #[error("snapshot data is no longer available: {reason}")]
    SnapshotLost { reason: String },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("invariant violated in state {state_id}: {message}")]
    InvariantViolation { state_id: StateId, message: String },

    #[error("invalid value {value:?} for option `{key}`")]
    Config { key: String, value: String },
}

/// Coarse classification of a [`CoreError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// API misuse; fatal to the current search.
    Usage,
    /// Snapshot offload or rehydration failure; fatal to that snapshot only.
    Storage,
    /// Internal assertion failed; fatal to the search.
    InvariantViolation,
    /// Invalid configuration value.
    Config,
}

impl CoreError {
    pub fn invariant(state_id: StateId, message: impl Into<String>) -> Self {
        let message = message.into();
        log::error!("invariant violated in state {}: {}", state_id, message);
        CoreError::InvariantViolation { state_id, message }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::ChoiceGeneratorDone { .. }
            | CoreError::NoOpenTransition
            | CoreError::TransitionAlreadyOpen
            | CoreError::NoChoiceGenerator
            | CoreError::ChoiceSetTooLarge { .. }
            | CoreError::NoLastTransition => ErrorKind::Usage,
            CoreError::Storage(_) | CoreError::SnapshotLost { .. } => ErrorKind::Storage,
            CoreError::InvariantViolation { .. } => ErrorKind::InvariantViolation,
            CoreError::Config { .. } => ErrorKind::Config,
        }
    }

    /// Whether the search has to be aborted.
    ///
    /// Storage failures only invalidate the snapshot they belong to.
    pub fn is_fatal_to_search(&self) -> bool {
        self.kind() != ErrorKind::Storage
    }
}
