//! Error taxonomy for the entry tree.
//!
//! Every variant is a caller-visible validation failure. Nothing in the core
//! performs I/O, so none of them is transient and none should be retried
//! as-is.

use thiserror::Error;
use uuid::Uuid;

use crate::storage::entry::EntryId;

pub type Result<T> = std::result::Result<T, WorkspaceError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkspaceError {
    /// An entry or parent id does not resolve.
    #[error("entry {0} not found")]
    NotFound(EntryId),

    /// The target of a move or create is not a folder.
    #[error("entry {0} is not a folder")]
    InvalidTarget(EntryId),

    /// An entry was asked to become its own parent.
    #[error("entry {0} cannot be moved into itself")]
    InvalidMove(EntryId),

    /// The move would place a folder beneath one of its own descendants.
    #[error("moving {entry} under {target} would create a cycle")]
    CycleDetected { entry: EntryId, target: EntryId },

    /// A sibling with the same name already exists under the parent.
    #[error("an entry named {name:?} already exists in {}", display_parent(.parent))]
    NameConflict {
        parent: Option<EntryId>,
        name: String,
    },

    /// Non-cascading delete of a folder that still has children.
    #[error("folder {0} is not empty")]
    NotEmpty(EntryId),

    #[error("invalid name: {0}")]
    InvalidName(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("entry {0} already exists")]
    AlreadyExists(EntryId),

    /// Stored data violates a tree invariant (dangling parent link, cycle).
    #[error("tree corrupted: {0}")]
    Corrupted(String),
}

impl WorkspaceError {
    /// Stable machine-readable code, used in wire responses and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            WorkspaceError::NotFound(_) => "not_found",
            WorkspaceError::InvalidTarget(_) => "invalid_target",
            WorkspaceError::InvalidMove(_) => "invalid_move",
            WorkspaceError::CycleDetected { .. } => "cycle_detected",
            WorkspaceError::NameConflict { .. } => "name_conflict",
            WorkspaceError::NotEmpty(_) => "not_empty",
            WorkspaceError::InvalidName(_) => "invalid_name",
            WorkspaceError::InvalidQuery(_) => "invalid_query",
            WorkspaceError::AlreadyExists(_) => "already_exists",
            WorkspaceError::Corrupted(_) => "corrupted",
        }
    }
}

fn display_parent(parent: &Option<Uuid>) -> String {
    match parent {
        Some(id) => format!("folder {}", id),
        None => "the root".to_string(),
    }
}
