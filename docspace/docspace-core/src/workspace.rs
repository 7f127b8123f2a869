//! Command handlers over a shared [`EntryStore`].
//!
//! All mutations take the single write lock for the whole
//! check-then-mutate step; reads take the read lock and see a consistent
//! tree. Events are published after the lock is released.

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Result, WorkspaceError};
use crate::events::{Event, EventBus};
use crate::path::{self, Crumb};
use crate::query::{self, ListOptions, Page};
use crate::reparent::{self, MovePlan};
use crate::storage::entry::{derive_extension, normalize_name};
use crate::storage::{Entry, EntryId, EntryKind, EntryStore, Violation};

const UNTITLED: &str = "Untitled";

/// Metadata for a file whose bytes were accepted by the storage service.
#[derive(Clone, Debug, Default)]
pub struct NewFile {
    pub title: Option<String>,
    pub original_filename: String,
    pub size_bytes: u64,
    pub created_by: String,
    pub case_ref: Option<Uuid>,
}

/// Outcome of a delete: every removed entry, descendants before ancestors,
/// the requested entry last.
#[derive(Clone, Debug)]
pub struct Deleted {
    pub removed: Vec<Entry>,
}

impl Deleted {
    pub fn removed_files(&self) -> impl Iterator<Item = &Entry> {
        self.removed.iter().filter(|e| e.kind() == EntryKind::File)
    }
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct ManifestItem {
    /// Path relative to the exported folder; folder paths end with `/`.
    pub path: String,
    pub entry: Entry,
}

#[derive(Clone, Copy, Debug, Default, Serialize, PartialEq, Eq)]
pub struct Stats {
    pub folders: usize,
    pub files: usize,
    pub total_bytes: u64,
}

/// Entries captured for a snapshot, sorted by id.
pub struct Checkpoint {
    pub entries: Vec<Entry>,
}

pub struct Workspace {
    store: RwLock<EntryStore>,
    events: EventBus,
}

impl Default for Workspace {
    fn default() -> Self {
        Self::new()
    }
}

impl Workspace {
    pub fn new() -> Self {
        Self::from_store(EntryStore::new())
    }

    pub fn from_store(store: EntryStore) -> Self {
        Self {
            store: RwLock::new(store),
            events: EventBus::new(),
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn get(&self, id: EntryId) -> Result<Entry> {
        self.store.read().get(id).cloned()
    }

    pub fn list(&self, parent: Option<EntryId>, opts: &ListOptions) -> Result<Page> {
        query::list(&self.store.read(), parent, opts)
    }

    pub fn path(&self, id: Option<EntryId>) -> Result<Vec<Crumb>> {
        path::resolve_path(&self.store.read(), id)
    }

    pub fn create_folder(
        &self,
        parent: Option<EntryId>,
        name: &str,
        created_by: &str,
    ) -> Result<Entry> {
        let entry = logged("create_folder", self.insert_new(parent, name, |name| {
            Entry::folder(Uuid::new_v4(), name, parent, created_by.to_string())
        }))?;
        info!(id = %entry.id(), name = entry.name(), parent = ?parent, "folder created");
        self.events.send(Event::Created {
            id: entry.id(),
            parent_id: parent,
        });
        Ok(entry)
    }

    /// Record a file that the byte-storage service has accepted.
    pub fn register_file(&self, parent: Option<EntryId>, file: NewFile) -> Result<Entry> {
        let name = file_display_name(file.title.as_deref(), &file.original_filename);
        let entry = logged("register_file", self.insert_new(parent, &name, |name| {
            Entry::file(Uuid::new_v4(), name, parent, file.size_bytes, file.created_by)
                .with_case_ref(file.case_ref)
        }))?;
        info!(
            id = %entry.id(),
            name = entry.name(),
            size = file.size_bytes,
            parent = ?parent,
            "file registered"
        );
        self.events.send(Event::Created {
            id: entry.id(),
            parent_id: parent,
        });
        Ok(entry)
    }

    fn insert_new(
        &self,
        parent: Option<EntryId>,
        raw_name: &str,
        build: impl FnOnce(String) -> Entry,
    ) -> Result<Entry> {
        let name = normalize_name(raw_name)?;
        let mut store = self.store.write();
        check_parent(&store, parent)?;
        ensure_unique(&store, parent, &name, None)?;
        let entry = build(name);
        store.insert(entry.clone())?;
        Ok(entry)
    }

    pub fn rename(&self, id: EntryId, new_name: &str) -> Result<Entry> {
        let result = normalize_name(new_name).and_then(|name| {
            let mut store = self.store.write();
            apply_rename(&mut store, id, name)
        });
        let (entry, changed) = logged("rename", result)?;
        if changed {
            info!(id = %id, name = entry.name(), "entry renamed");
            self.events.send(Event::Renamed {
                id,
                name: entry.name().to_string(),
            });
        }
        Ok(entry)
    }

    pub fn move_entry(&self, id: EntryId, new_parent: Option<EntryId>) -> Result<Entry> {
        let result = {
            let mut store = self.store.write();
            reparent::move_entry(&mut store, id, new_parent)
        };
        let (plan, entry) = logged("move", result)?;
        match plan {
            MovePlan::Unchanged { .. } => {
                debug!(id = %id, "move to current parent ignored");
            }
            MovePlan::Reparent { id, from, to } => {
                info!(id = %id, from = ?from, to = ?to, "entry moved");
                self.events.send(Event::Moved { id, from, to });
            }
        }
        Ok(entry)
    }

    /// Associate an entry with an external case, or clear the association.
    pub fn set_case(&self, id: EntryId, case_ref: Option<Uuid>) -> Result<Entry> {
        let result = {
            let mut store = self.store.write();
            apply_case(&mut store, id, case_ref)
        };
        let (entry, changed) = logged("set_case", result)?;
        if changed {
            info!(id = %id, case_ref = ?case_ref, "case association changed");
            self.events.send(Event::CaseChanged { id, case_ref });
        }
        Ok(entry)
    }

    /// Delete an entry. A non-empty folder needs `cascade`; the whole subtree
    /// then goes, or nothing does.
    pub fn delete(&self, id: EntryId, cascade: bool) -> Result<Deleted> {
        let result = {
            let mut store = self.store.write();
            remove_subtree(&mut store, id, cascade)
        };
        let removed = logged("delete", result)?;
        let ids: Vec<EntryId> = removed.iter().map(|e| e.id()).collect();
        info!(id = %id, removed = ids.len(), cascade, "entry deleted");
        self.events.send(Event::Deleted { id, removed: ids });
        Ok(Deleted { removed })
    }

    /// Every descendant of `folder_id` with its path relative to the folder,
    /// parents before children. This is what an archive export walks.
    pub fn export_manifest(&self, folder_id: EntryId) -> Result<Vec<ManifestItem>> {
        let store = self.store.read();
        let folder = store.get(folder_id)?;
        if !folder.is_folder() {
            return Err(WorkspaceError::InvalidTarget(folder_id));
        }

        let mut out = Vec::new();
        let mut pending: Vec<(&Entry, String)> = Vec::new();
        push_sorted_children(&store, folder_id, "", &mut pending);
        while let Some((entry, path)) = pending.pop() {
            if entry.is_folder() {
                push_sorted_children(&store, entry.id(), &path, &mut pending);
            }
            out.push(ManifestItem {
                path,
                entry: entry.clone(),
            });
        }
        Ok(out)
    }

    pub fn stats(&self) -> Stats {
        let store = self.store.read();
        store.iter().fold(Stats::default(), |mut acc, e| {
            match e.kind() {
                EntryKind::Folder => acc.folders += 1,
                EntryKind::File => {
                    acc.files += 1;
                    acc.total_bytes += e.size_bytes().unwrap_or(0);
                }
            }
            acc
        })
    }

    pub fn verify(&self) -> Vec<Violation> {
        self.store.read().verify()
    }

    pub fn is_dirty(&self) -> bool {
        self.store.read().is_dirty()
    }

    /// Copy out all entries for a snapshot and clear the dirty flag.
    /// Returns `None` when nothing changed since the last checkpoint, unless
    /// `force` is set. Call [`mark_dirty`](Self::mark_dirty) if persisting
    /// the checkpoint fails.
    pub fn checkpoint(&self, force: bool) -> Option<Checkpoint> {
        let mut store = self.store.write();
        if !force && !store.is_dirty() {
            return None;
        }
        let mut entries: Vec<Entry> = store.iter().cloned().collect();
        entries.sort_by_key(|e| e.id());
        store.clear_dirty();
        Some(Checkpoint { entries })
    }

    pub fn mark_dirty(&self) {
        self.store.write().mark_dirty();
    }
}

fn check_parent(store: &EntryStore, parent: Option<EntryId>) -> Result<()> {
    if let Some(pid) = parent {
        if !store.get(pid)?.is_folder() {
            return Err(WorkspaceError::InvalidTarget(pid));
        }
    }
    Ok(())
}

fn ensure_unique(
    store: &EntryStore,
    parent: Option<EntryId>,
    name: &str,
    except: Option<EntryId>,
) -> Result<()> {
    if store.sibling_named(parent, name, except).is_some() {
        return Err(WorkspaceError::NameConflict {
            parent,
            name: name.to_string(),
        });
    }
    Ok(())
}

fn apply_rename(store: &mut EntryStore, id: EntryId, name: String) -> Result<(Entry, bool)> {
    let mut entry = store.get(id)?.clone();
    if entry.name() == name {
        return Ok((entry, false));
    }
    ensure_unique(store, entry.parent_id(), &name, Some(id))?;
    entry.set_name(name);
    store.update(entry.clone())?;
    Ok((entry, true))
}

fn apply_case(store: &mut EntryStore, id: EntryId, case_ref: Option<Uuid>) -> Result<(Entry, bool)> {
    let mut entry = store.get(id)?.clone();
    if entry.case_ref() == case_ref {
        return Ok((entry, false));
    }
    entry.set_case_ref(case_ref);
    store.update(entry.clone())?;
    Ok((entry, true))
}

fn remove_subtree(store: &mut EntryStore, id: EntryId, cascade: bool) -> Result<Vec<Entry>> {
    let entry = store.get(id)?;
    let mut doomed = Vec::new();
    if entry.is_folder() && store.has_children(id) {
        if !cascade {
            return Err(WorkspaceError::NotEmpty(id));
        }
        doomed = store.descendants(id);
    }
    doomed.push(id);

    let mut removed: Vec<Entry> = Vec::with_capacity(doomed.len());
    for target in doomed {
        match store.remove(target) {
            Ok(entry) => removed.push(entry),
            Err(err) => {
                restore_removed(store, removed)?;
                return Err(err);
            }
        }
    }
    Ok(removed)
}

/// Put back entries taken by a half-finished delete, parents before children.
/// A failure here means the tree no longer matches what was removed.
fn restore_removed(store: &mut EntryStore, removed: Vec<Entry>) -> Result<()> {
    for entry in removed.into_iter().rev() {
        let id = entry.id();
        store.insert(entry).map_err(|err| {
            WorkspaceError::Corrupted(format!("could not restore {} after failed delete: {}", id, err))
        })?;
    }
    Ok(())
}

// pushed in reverse name order so the stack pops them alphabetically
fn push_sorted_children<'a>(
    store: &'a EntryStore,
    parent: EntryId,
    prefix: &str,
    pending: &mut Vec<(&'a Entry, String)>,
) {
    let mut children: Vec<&Entry> = store.children_of(Some(parent)).collect();
    children.sort_by(|a, b| a.name().cmp(b.name()).then_with(|| a.id().cmp(&b.id())));
    for child in children.into_iter().rev() {
        let path = match child.kind() {
            EntryKind::Folder => format!("{}{}/", prefix, child.name()),
            EntryKind::File => format!("{}{}", prefix, child.name()),
        };
        pending.push((child, path));
    }
}

/// Name a registered file: the caller's title if given (gaining the
/// original extension when it lacks it), otherwise the original filename.
pub fn file_display_name(title: Option<&str>, original_filename: &str) -> String {
    let original = original_filename.trim();
    match title.map(str::trim).filter(|t| !t.is_empty()) {
        Some(title) => match derive_extension(original) {
            Some(ext) if !title.to_lowercase().ends_with(&format!(".{}", ext)) => {
                format!("{}.{}", title, ext)
            }
            _ => title.to_string(),
        },
        None if original.is_empty() => UNTITLED.to_string(),
        None => original.to_string(),
    }
}

fn logged<T>(op: &'static str, result: Result<T>) -> Result<T> {
    if let Err(err) = &result {
        debug!(op, kind = err.kind(), error = %err, "command rejected");
    }
    result
}
