//! Move validation and reparenting.
//!
//! [`validate_move`] is pure: it reads the store and either rejects the move
//! or returns a [`MovePlan`]. [`apply_move`] executes a plan. Callers that
//! share the store must run both under the same write lock, otherwise two
//! concurrent moves can each pass the cycle check and together close a loop.

use crate::error::{Result, WorkspaceError};
use crate::storage::{Entry, EntryId, EntryStore};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MovePlan {
    /// The entry already lives under the requested parent.
    Unchanged { id: EntryId },
    Reparent {
        id: EntryId,
        from: Option<EntryId>,
        to: Option<EntryId>,
    },
}

impl MovePlan {
    pub fn id(&self) -> EntryId {
        match self {
            MovePlan::Unchanged { id } | MovePlan::Reparent { id, .. } => *id,
        }
    }
}

pub fn validate_move(
    store: &EntryStore,
    id: EntryId,
    new_parent: Option<EntryId>,
) -> Result<MovePlan> {
    let entry = store.get(id)?;

    if let Some(target_id) = new_parent {
        let target = store.get(target_id)?;
        if !target.is_folder() {
            return Err(WorkspaceError::InvalidTarget(target_id));
        }
    }

    if entry.parent_id() == new_parent {
        return Ok(MovePlan::Unchanged { id });
    }

    if new_parent == Some(id) {
        return Err(WorkspaceError::InvalidMove(id));
    }

    // files can never be ancestors, so only folders need the walk
    if let (true, Some(target_id)) = (entry.is_folder(), new_parent) {
        if store.ancestors(target_id)?.contains(&id) {
            return Err(WorkspaceError::CycleDetected {
                entry: id,
                target: target_id,
            });
        }
    }

    if store.sibling_named(new_parent, entry.name(), Some(id)).is_some() {
        return Err(WorkspaceError::NameConflict {
            parent: new_parent,
            name: entry.name().to_string(),
        });
    }

    Ok(MovePlan::Reparent {
        id,
        from: entry.parent_id(),
        to: new_parent,
    })
}

/// Execute a validated plan and return the entry as stored afterwards.
pub fn apply_move(store: &mut EntryStore, plan: MovePlan) -> Result<Entry> {
    match plan {
        MovePlan::Unchanged { id } => Ok(store.get(id)?.clone()),
        MovePlan::Reparent { id, to, .. } => {
            let mut entry = store.get(id)?.clone();
            entry.set_parent_id(to);
            store.update(entry.clone())?;
            Ok(entry)
        }
    }
}

/// Validate and apply in one step against an exclusively borrowed store.
pub fn move_entry(
    store: &mut EntryStore,
    id: EntryId,
    new_parent: Option<EntryId>,
) -> Result<(MovePlan, Entry)> {
    let plan = validate_move(store, id, new_parent)?;
    let entry = apply_move(store, plan)?;
    Ok((plan, entry))
}
