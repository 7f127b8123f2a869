//! Metadata records for folders and files.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, WorkspaceError};

pub type EntryId = Uuid;

/// Longest accepted display name, in characters.
pub const MAX_NAME_LEN: usize = 255;

/// The two kinds of nodes in the tree. Fixed at creation.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Folder,
    File,
}

/// A node in the tree.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Entry {
    id: EntryId,
    name: String,
    kind: EntryKind,
    parent_id: Option<EntryId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    size_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    extension: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    created_by: String,
    #[serde(default)]
    case_ref: Option<Uuid>,
}

impl Entry {
    /// Build a new folder record. `name` must already be normalized.
    pub fn folder(
        id: EntryId,
        name: String,
        parent_id: Option<EntryId>,
        created_by: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            name,
            kind: EntryKind::Folder,
            parent_id,
            size_bytes: None,
            extension: None,
            created_at: now,
            updated_at: now,
            created_by,
            case_ref: None,
        }
    }

    /// Build a new file record. The extension is derived from `name`.
    pub fn file(
        id: EntryId,
        name: String,
        parent_id: Option<EntryId>,
        size_bytes: u64,
        created_by: String,
    ) -> Self {
        let now = Utc::now();
        let extension = derive_extension(&name);
        Self {
            id,
            name,
            kind: EntryKind::File,
            parent_id,
            size_bytes: Some(size_bytes),
            extension,
            created_at: now,
            updated_at: now,
            created_by,
            case_ref: None,
        }
    }

    pub fn with_case_ref(mut self, case_ref: Option<Uuid>) -> Self {
        self.case_ref = case_ref;
        self
    }

    pub fn with_created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = at;
        self.updated_at = at;
        self
    }

    pub fn id(&self) -> EntryId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> EntryKind {
        self.kind
    }

    pub fn is_folder(&self) -> bool {
        self.kind == EntryKind::Folder
    }

    pub fn parent_id(&self) -> Option<EntryId> {
        self.parent_id
    }

    pub fn size_bytes(&self) -> Option<u64> {
        self.size_bytes
    }

    pub fn extension(&self) -> Option<&str> {
        self.extension.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn created_by(&self) -> &str {
        &self.created_by
    }

    pub fn case_ref(&self) -> Option<Uuid> {
        self.case_ref
    }

    pub(crate) fn set_name(&mut self, name: String) {
        if self.kind == EntryKind::File {
            self.extension = derive_extension(&name);
        }
        self.name = name;
        self.touch();
    }

    pub(crate) fn set_parent_id(&mut self, parent: Option<EntryId>) {
        self.parent_id = parent;
        self.touch();
    }

    pub(crate) fn set_case_ref(&mut self, case_ref: Option<Uuid>) {
        self.case_ref = case_ref;
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Trim and validate a display name.
pub fn normalize_name(raw: &str) -> Result<String> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(WorkspaceError::InvalidName("name must not be empty".into()));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(WorkspaceError::InvalidName(format!(
            "name longer than {} characters",
            MAX_NAME_LEN
        )));
    }
    if name.contains('/') {
        return Err(WorkspaceError::InvalidName(format!(
            "{:?} contains '/'",
            name
        )));
    }
    if name == "." || name == ".." {
        return Err(WorkspaceError::InvalidName(format!("{:?} is reserved", name)));
    }
    Ok(name.to_string())
}

/// Lower-cased text after the last dot, ignoring a leading dot.
pub fn derive_extension(name: &str) -> Option<String> {
    let idx = name.rfind('.')?;
    if idx == 0 || idx + 1 == name.len() {
        return None;
    }
    Some(name[idx + 1..].to_lowercase())
}
