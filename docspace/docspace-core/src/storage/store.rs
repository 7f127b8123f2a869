//! The authoritative collection of entries plus the `parent -> children`
//! index. The store keeps its own bookkeeping consistent but does not decide
//! whether a mutation is *allowed*; that is the job of the command handlers
//! and the reparent engine.

use std::collections::{BTreeSet, HashMap, HashSet};

use thiserror::Error;

use crate::error::{Result, WorkspaceError};
use crate::storage::entry::{Entry, EntryId, EntryKind};

/// A broken tree invariant found by [`EntryStore::verify`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Violation {
    #[error("{entry} points at missing parent {parent}")]
    DanglingParent { entry: EntryId, parent: EntryId },
    #[error("{entry} is parented by file {parent}")]
    ParentNotFolder { entry: EntryId, parent: EntryId },
    #[error("{entry} is its own ancestor")]
    Cycle { entry: EntryId },
    #[error("duplicate sibling name {name:?} under {parent:?}")]
    DuplicateName {
        parent: Option<EntryId>,
        name: String,
    },
    #[error("{entry} has inconsistent file metadata")]
    KindMetadata { entry: EntryId },
    #[error("child index out of sync for {entry}")]
    IndexMismatch { entry: EntryId },
}

#[derive(Debug, Default)]
pub struct EntryStore {
    entries: HashMap<EntryId, Entry>,
    children: HashMap<Option<EntryId>, BTreeSet<EntryId>>,
    dirty: bool,
}

impl EntryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a store (and its index) from loose records, e.g. a snapshot.
    /// Structural validity is not checked here; call [`verify`](Self::verify).
    pub fn from_entries(entries: impl IntoIterator<Item = Entry>) -> Result<Self> {
        let mut store = Self::new();
        for entry in entries {
            store.insert(entry)?;
        }
        store.dirty = false;
        Ok(store)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over all entries in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.entries.values()
    }

    pub fn contains(&self, id: EntryId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn get(&self, id: EntryId) -> Result<&Entry> {
        self.entries.get(&id).ok_or(WorkspaceError::NotFound(id))
    }

    /// Ids of the direct children of `parent` (`None` is the root).
    pub fn child_ids(&self, parent: Option<EntryId>) -> impl Iterator<Item = EntryId> + '_ {
        self.children
            .get(&parent)
            .into_iter()
            .flat_map(|set| set.iter().copied())
    }

    /// Direct children of `parent`. Ownership index only; callers sort.
    pub fn children_of(&self, parent: Option<EntryId>) -> impl Iterator<Item = &Entry> + '_ {
        self.child_ids(parent)
            .filter_map(move |id| self.entries.get(&id))
    }

    pub fn child_count(&self, parent: Option<EntryId>) -> usize {
        self.children.get(&parent).map_or(0, |set| set.len())
    }

    pub fn has_children(&self, id: EntryId) -> bool {
        self.child_count(Some(id)) > 0
    }

    /// A sibling under `parent` carrying exactly `name`, other than `except`.
    /// Sibling names are compared case-sensitively and across both kinds.
    pub fn sibling_named(
        &self,
        parent: Option<EntryId>,
        name: &str,
        except: Option<EntryId>,
    ) -> Option<&Entry> {
        self.children_of(parent)
            .find(|e| e.name() == name && Some(e.id()) != except)
    }

    pub fn insert(&mut self, entry: Entry) -> Result<()> {
        let id = entry.id();
        if self.entries.contains_key(&id) {
            return Err(WorkspaceError::AlreadyExists(id));
        }
        self.children.entry(entry.parent_id()).or_default().insert(id);
        self.entries.insert(id, entry);
        self.mark_dirty();
        Ok(())
    }

    /// Replace a stored entry, re-indexing it when its parent changed.
    pub fn update(&mut self, entry: Entry) -> Result<()> {
        let id = entry.id();
        let old_parent = self.get(id)?.parent_id();
        let new_parent = entry.parent_id();
        if old_parent != new_parent {
            self.unlink(old_parent, id);
            self.children.entry(new_parent).or_default().insert(id);
        }
        self.entries.insert(id, entry);
        self.mark_dirty();
        Ok(())
    }

    /// Remove a single entry. Folders must be emptied first so that the
    /// store can never hold an orphan.
    pub fn remove(&mut self, id: EntryId) -> Result<Entry> {
        let parent = self.get(id)?.parent_id();
        if self.has_children(id) {
            return Err(WorkspaceError::NotEmpty(id));
        }
        self.unlink(parent, id);
        self.children.remove(&Some(id));
        let entry = self
            .entries
            .remove(&id)
            .ok_or(WorkspaceError::NotFound(id))?;
        self.mark_dirty();
        Ok(entry)
    }

    fn unlink(&mut self, parent: Option<EntryId>, id: EntryId) {
        if let Some(set) = self.children.get_mut(&parent) {
            set.remove(&id);
            if set.is_empty() {
                self.children.remove(&parent);
            }
        }
    }

    /// Parent chain of `id`, nearest first, excluding `id` itself.
    ///
    /// Walks at most `len()` links; a longer walk can only mean a cycle.
    pub fn ancestors(&self, id: EntryId) -> Result<Vec<EntryId>> {
        let mut out = Vec::new();
        let mut current = self.get(id)?.parent_id();
        while let Some(pid) = current {
            if out.len() >= self.entries.len() {
                return Err(WorkspaceError::Corrupted(format!(
                    "parent chain of {} does not terminate",
                    id
                )));
            }
            let parent = self.entries.get(&pid).ok_or_else(|| {
                WorkspaceError::Corrupted(format!("{} has dangling ancestor {}", id, pid))
            })?;
            out.push(pid);
            current = parent.parent_id();
        }
        Ok(out)
    }

    /// All descendants of `id` in depth-first post-order (children before
    /// their parent). `id` itself is not included.
    pub fn descendants(&self, id: EntryId) -> Vec<EntryId> {
        // no recursion: depth is bounded by memory, not the thread stack
        let mut out = Vec::new();
        let mut seen = HashSet::from([id]);
        let mut stack: Vec<(EntryId, bool)> = Vec::new();
        push_children(self, id, &mut seen, &mut stack);
        while let Some((current, expanded)) = stack.pop() {
            if expanded {
                out.push(current);
            } else {
                stack.push((current, true));
                push_children(self, current, &mut seen, &mut stack);
            }
        }
        out
    }

    /// Check every tree invariant, returning all violations found.
    pub fn verify(&self) -> Vec<Violation> {
        let mut problems = Vec::new();
        let mut indexed = 0usize;

        for (parent, ids) in &self.children {
            for id in ids {
                indexed += 1;
                match self.entries.get(id) {
                    Some(e) if e.parent_id() == *parent => {}
                    _ => problems.push(Violation::IndexMismatch { entry: *id }),
                }
            }
        }
        if indexed != self.entries.len() {
            for entry in self.entries.values() {
                let listed = self
                    .children
                    .get(&entry.parent_id())
                    .is_some_and(|set| set.contains(&entry.id()));
                if !listed {
                    problems.push(Violation::IndexMismatch { entry: entry.id() });
                }
            }
        }

        for entry in self.entries.values() {
            let metadata_ok = match entry.kind() {
                EntryKind::Folder => entry.size_bytes().is_none() && entry.extension().is_none(),
                EntryKind::File => entry.size_bytes().is_some(),
            };
            if !metadata_ok {
                problems.push(Violation::KindMetadata { entry: entry.id() });
            }

            if let Some(pid) = entry.parent_id() {
                match self.entries.get(&pid) {
                    None => problems.push(Violation::DanglingParent {
                        entry: entry.id(),
                        parent: pid,
                    }),
                    Some(p) if !p.is_folder() => problems.push(Violation::ParentNotFolder {
                        entry: entry.id(),
                        parent: pid,
                    }),
                    Some(_) => {}
                }
            }

            if let Err(WorkspaceError::Corrupted(_)) = self.ancestors(entry.id()) {
                // a dangling link is already reported above
                let dangling = problems.iter().any(|v| {
                    matches!(v, Violation::DanglingParent { entry: e, .. } if *e == entry.id())
                });
                if !dangling && self.on_cycle(entry.id()) {
                    problems.push(Violation::Cycle { entry: entry.id() });
                }
            }
        }

        for (parent, ids) in &self.children {
            let mut names = HashSet::new();
            for id in ids {
                if let Some(e) = self.entries.get(id) {
                    if !names.insert(e.name()) {
                        problems.push(Violation::DuplicateName {
                            parent: *parent,
                            name: e.name().to_string(),
                        });
                    }
                }
            }
        }

        problems
    }

    fn on_cycle(&self, id: EntryId) -> bool {
        let mut current = self.entries.get(&id).and_then(|e| e.parent_id());
        for _ in 0..self.entries.len() {
            match current {
                Some(pid) if pid == id => return true,
                Some(pid) => current = self.entries.get(&pid).and_then(|e| e.parent_id()),
                None => return false,
            }
        }
        false
    }

    /// Return whether the store has changes not yet captured by a snapshot.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Mark the store as having pending changes.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Clear the dirty flag after a snapshot has been taken.
    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }
}

// children are pushed in reverse so they pop in index order
fn push_children(
    store: &EntryStore,
    parent: EntryId,
    seen: &mut HashSet<EntryId>,
    stack: &mut Vec<(EntryId, bool)>,
) {
    let children: Vec<EntryId> = store
        .child_ids(Some(parent))
        .filter(|child| seen.insert(*child))
        .collect();
    stack.extend(children.into_iter().rev().map(|child| (child, false)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn folder(name: &str, parent: Option<EntryId>) -> Entry {
        Entry::folder(Uuid::new_v4(), name.to_string(), parent, "user1".to_string())
    }

    fn file(name: &str, parent: Option<EntryId>) -> Entry {
        Entry::file(Uuid::new_v4(), name.to_string(), parent, 10, "user1".to_string())
    }

    #[test]
    fn insert_indexes_children() {
        let mut store = EntryStore::new();
        let root = folder("root", None);
        let root_id = root.id();
        store.insert(root).unwrap();
        let child = file("a.txt", Some(root_id));
        let child_id = child.id();
        store.insert(child).unwrap();

        assert_eq!(store.child_count(None), 1);
        assert_eq!(store.child_ids(Some(root_id)).collect::<Vec<_>>(), vec![child_id]);
        assert!(store.has_children(root_id));
        assert!(store.is_dirty());
        assert!(store.verify().is_empty());
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let mut store = EntryStore::new();
        let entry = folder("x", None);
        store.insert(entry.clone()).unwrap();
        assert_eq!(
            store.insert(entry.clone()),
            Err(WorkspaceError::AlreadyExists(entry.id()))
        );
    }

    #[test]
    fn update_moves_index_entry() {
        let mut store = EntryStore::new();
        let a = folder("a", None);
        let b = folder("b", None);
        let (a_id, b_id) = (a.id(), b.id());
        store.insert(a).unwrap();
        store.insert(b).unwrap();
        let doc = file("doc.txt", Some(a_id));
        let doc_id = doc.id();
        store.insert(doc).unwrap();

        let mut moved = store.get(doc_id).unwrap().clone();
        moved.set_parent_id(Some(b_id));
        store.update(moved).unwrap();

        assert_eq!(store.child_count(Some(a_id)), 0);
        assert_eq!(store.child_ids(Some(b_id)).collect::<Vec<_>>(), vec![doc_id]);
        assert!(store.verify().is_empty());
    }

    #[test]
    fn remove_refuses_non_empty_folder() {
        let mut store = EntryStore::new();
        let a = folder("a", None);
        let a_id = a.id();
        store.insert(a).unwrap();
        let doc = file("doc.txt", Some(a_id));
        let doc_id = doc.id();
        store.insert(doc).unwrap();

        assert_eq!(store.remove(a_id), Err(WorkspaceError::NotEmpty(a_id)));
        store.remove(doc_id).unwrap();
        store.remove(a_id).unwrap();
        assert!(store.is_empty());
        assert_eq!(store.get(a_id), Err(WorkspaceError::NotFound(a_id)));
    }

    #[test]
    fn ancestors_and_descendants() {
        let mut store = EntryStore::new();
        let a = folder("a", None);
        let a_id = a.id();
        store.insert(a).unwrap();
        let b = folder("b", Some(a_id));
        let b_id = b.id();
        store.insert(b).unwrap();
        let c = file("c.txt", Some(b_id));
        let c_id = c.id();
        store.insert(c).unwrap();

        assert_eq!(store.ancestors(c_id).unwrap(), vec![b_id, a_id]);
        assert!(store.ancestors(a_id).unwrap().is_empty());
        // children come before their parent
        assert_eq!(store.descendants(a_id), vec![c_id, b_id]);
        assert!(store.descendants(c_id).is_empty());
    }

    #[test]
    fn sibling_lookup_is_case_sensitive_and_kind_blind() {
        let mut store = EntryStore::new();
        let dir = folder("Docs", None);
        let dir_id = dir.id();
        store.insert(dir).unwrap();

        assert!(store.sibling_named(None, "Docs", None).is_some());
        assert!(store.sibling_named(None, "docs", None).is_none());
        assert!(store.sibling_named(None, "Docs", Some(dir_id)).is_none());
    }

    #[test]
    fn verify_reports_broken_records() {
        let ghost = Uuid::new_v4();
        let orphan = folder("orphan", Some(ghost));
        let a = folder("same", None);
        let b = file("same", None);
        let store = EntryStore::from_entries(vec![orphan.clone(), a, b]).unwrap();
        assert!(!store.is_dirty());

        let problems = store.verify();
        assert!(problems.contains(&Violation::DanglingParent {
            entry: orphan.id(),
            parent: ghost
        }));
        assert!(problems.iter().any(|v| matches!(v, Violation::DuplicateName { .. })));
        assert!(matches!(
            store.ancestors(orphan.id()),
            Err(WorkspaceError::Corrupted(_))
        ));
    }

    #[test]
    fn verify_reports_cycles_and_file_parents() {
        let a_id = Uuid::new_v4();
        let b_id = Uuid::new_v4();
        let a = Entry::folder(a_id, "a".into(), Some(b_id), "u".into());
        let b = Entry::folder(b_id, "b".into(), Some(a_id), "u".into());
        let doc = file("doc.txt", None);
        let under_file = file("inner.txt", Some(doc.id()));
        let store = EntryStore::from_entries(vec![a, b, doc.clone(), under_file.clone()]).unwrap();

        let problems = store.verify();
        assert!(problems.contains(&Violation::Cycle { entry: a_id }));
        assert!(problems.contains(&Violation::Cycle { entry: b_id }));
        assert!(problems.contains(&Violation::ParentNotFolder {
            entry: under_file.id(),
            parent: doc.id()
        }));
    }
}
