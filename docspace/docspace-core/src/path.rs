//! Breadcrumbs: the chain of folders from the root down to an entry.

use serde::{Deserialize, Serialize};

use crate::error::{Result, WorkspaceError};
use crate::storage::{EntryId, EntryStore};

pub const ROOT_NAME: &str = "Root";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Crumb {
    pub id: Option<EntryId>,
    pub name: String,
}

impl Crumb {
    pub fn root() -> Self {
        Self {
            id: None,
            name: ROOT_NAME.to_string(),
        }
    }
}

/// Resolve the breadcrumb for `id`, starting with the synthetic root and
/// ending with the entry itself. `None` yields just the root.
pub fn resolve_path(store: &EntryStore, id: Option<EntryId>) -> Result<Vec<Crumb>> {
    let Some(id) = id else {
        return Ok(vec![Crumb::root()]);
    };
    let entry = store.get(id)?;
    let ancestors = store.ancestors(id)?;

    let mut crumbs = Vec::with_capacity(ancestors.len() + 2);
    crumbs.push(Crumb {
        id: Some(id),
        name: entry.name().to_string(),
    });
    for pid in ancestors {
        let parent = store
            .get(pid)
            .map_err(|_| WorkspaceError::Corrupted(format!("{} has dangling ancestor {}", id, pid)))?;
        crumbs.push(Crumb {
            id: Some(pid),
            name: parent.name().to_string(),
        });
    }
    crumbs.push(Crumb::root());
    crumbs.reverse();
    Ok(crumbs)
}

/// Slash-joined names below the root, e.g. `Reports/2024/q1.pdf`.
pub fn display_path(crumbs: &[Crumb]) -> String {
    crumbs
        .iter()
        .filter(|c| c.id.is_some())
        .map(|c| c.name.as_str())
        .collect::<Vec<_>>()
        .join("/")
}
