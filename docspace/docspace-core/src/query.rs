//! Filtered, sorted and paginated listing of a folder's direct children.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, WorkspaceError};
use crate::storage::{Entry, EntryId, EntryKind, EntryStore};

pub const DEFAULT_LIMIT: usize = 50;

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    Name,
    Size,
    #[default]
    CreatedAt,
    CreatedBy,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListOptions {
    /// Case-insensitive substring of the name. Never recursive.
    pub search: Option<String>,
    pub sort_by: SortField,
    pub order: SortOrder,
    pub limit: usize,
    pub offset: usize,
    pub kind: Option<EntryKind>,
    pub case_ref: Option<Uuid>,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            search: None,
            sort_by: SortField::default(),
            order: SortOrder::default(),
            limit: DEFAULT_LIMIT,
            offset: 0,
            kind: None,
            case_ref: None,
        }
    }
}

impl ListOptions {
    pub fn sorted(mut self, sort_by: SortField, order: SortOrder) -> Self {
        self.sort_by = sort_by;
        self.order = order;
        self
    }

    pub fn page(mut self, limit: usize, offset: usize) -> Self {
        self.limit = limit;
        self.offset = offset;
        self
    }

    pub fn search(mut self, needle: impl Into<String>) -> Self {
        self.search = Some(needle.into());
        self
    }

    pub fn kind(mut self, kind: EntryKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn case_ref(mut self, case_ref: Uuid) -> Self {
        self.case_ref = Some(case_ref);
        self
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Page {
    pub items: Vec<Entry>,
    /// Size of the filtered set before pagination.
    pub total: usize,
}

/// List the direct children of `parent` (`None` for the root).
pub fn list(store: &EntryStore, parent: Option<EntryId>, opts: &ListOptions) -> Result<Page> {
    if opts.limit == 0 {
        return Err(WorkspaceError::InvalidQuery("limit must be positive".into()));
    }
    if let Some(pid) = parent {
        // listing "inside" a file is the same as listing a folder that isn't there
        if !store.get(pid)?.is_folder() {
            return Err(WorkspaceError::NotFound(pid));
        }
    }

    let needle = opts
        .search
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_lowercase);

    let mut matches: Vec<&Entry> = store
        .children_of(parent)
        .filter(|e| opts.kind.map_or(true, |k| e.kind() == k))
        .filter(|e| opts.case_ref.map_or(true, |c| e.case_ref() == Some(c)))
        .filter(|e| {
            needle
                .as_deref()
                .map_or(true, |n| e.name().to_lowercase().contains(n))
        })
        .collect();

    matches.sort_by(|a, b| compare(a, b, opts.sort_by, opts.order));

    let total = matches.len();
    let items = matches
        .into_iter()
        .skip(opts.offset)
        .take(opts.limit)
        .cloned()
        .collect();
    Ok(Page { items, total })
}

/// Total order used for listings: the requested field in the requested
/// direction, then `id` ascending regardless of direction.
pub fn compare(a: &Entry, b: &Entry, sort_by: SortField, order: SortOrder) -> Ordering {
    let primary = match sort_by {
        SortField::Name => a
            .name()
            .to_lowercase()
            .cmp(&b.name().to_lowercase())
            .then_with(|| a.name().cmp(b.name())),
        SortField::Size => size_key(a).cmp(&size_key(b)),
        SortField::CreatedAt => a.created_at().cmp(&b.created_at()),
        SortField::CreatedBy => a.created_by().cmp(b.created_by()),
    };
    let primary = match order {
        SortOrder::Asc => primary,
        SortOrder::Desc => primary.reverse(),
    };
    primary.then_with(|| a.id().cmp(&b.id()))
}

// folders rank below every file, whatever the file's size
fn size_key(entry: &Entry) -> (u8, u64) {
    match entry.kind() {
        EntryKind::Folder => (0, 0),
        EntryKind::File => (1, entry.size_bytes().unwrap_or(0)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn store_with(entries: Vec<Entry>) -> EntryStore {
        EntryStore::from_entries(entries).unwrap()
    }

    fn names(page: &Page) -> Vec<&str> {
        page.items.iter().map(|e| e.name()).collect()
    }

    #[test]
    fn search_is_case_insensitive_and_not_recursive() {
        let dir = Entry::folder(Uuid::new_v4(), "Reports".into(), None, "u".into());
        let nested = Entry::file(Uuid::new_v4(), "report-q1.pdf".into(), Some(dir.id()), 1, "u".into());
        let top = Entry::file(Uuid::new_v4(), "Annual REPORT.docx".into(), None, 1, "u".into());
        let other = Entry::file(Uuid::new_v4(), "notes.txt".into(), None, 1, "u".into());
        let store = store_with(vec![dir, nested, top, other]);

        let opts = ListOptions::default()
            .search("report")
            .sorted(SortField::Name, SortOrder::Asc);
        let page = list(&store, None, &opts).unwrap();
        assert_eq!(names(&page), vec!["Annual REPORT.docx", "Reports"]);
        assert_eq!(page.total, 2);
    }

    #[test]
    fn blank_search_matches_everything() {
        let a = Entry::file(Uuid::new_v4(), "a".into(), None, 1, "u".into());
        let store = store_with(vec![a]);
        let page = list(&store, None, &ListOptions::default().search("   ")).unwrap();
        assert_eq!(page.total, 1);
    }

    #[test]
    fn size_sort_keeps_folders_apart() {
        let big = Entry::file(Uuid::new_v4(), "big".into(), None, 900, "u".into());
        let small = Entry::file(Uuid::new_v4(), "small".into(), None, 5, "u".into());
        let dir = Entry::folder(Uuid::new_v4(), "dir".into(), None, "u".into());
        let empty = Entry::file(Uuid::new_v4(), "empty".into(), None, 0, "u".into());
        let store = store_with(vec![big, small, dir, empty]);

        let asc = list(&store, None, &ListOptions::default().sorted(SortField::Size, SortOrder::Asc)).unwrap();
        assert_eq!(names(&asc), vec!["dir", "empty", "small", "big"]);
        let desc = list(&store, None, &ListOptions::default().sorted(SortField::Size, SortOrder::Desc)).unwrap();
        assert_eq!(names(&desc), vec!["big", "small", "empty", "dir"]);
    }

    #[test]
    fn ties_break_by_id_ascending_in_both_directions() {
        let at = Utc::now();
        let mut entries: Vec<Entry> = (0..6)
            .map(|i| {
                Entry::file(Uuid::new_v4(), format!("f{}", i), None, 7, "u".into()).with_created_at(at)
            })
            .collect();
        let store = store_with(entries.clone());
        entries.sort_by_key(|e| e.id());
        let expected: Vec<_> = entries.iter().map(|e| e.id()).collect();

        for order in [SortOrder::Asc, SortOrder::Desc] {
            for field in [SortField::Size, SortField::CreatedAt, SortField::CreatedBy] {
                let page = list(&store, None, &ListOptions::default().sorted(field, order)).unwrap();
                let got: Vec<_> = page.items.iter().map(|e| e.id()).collect();
                assert_eq!(got, expected, "{:?} {:?}", field, order);
            }
        }
    }

    #[test]
    fn default_order_is_newest_first() {
        let now = Utc::now();
        let old = Entry::file(Uuid::new_v4(), "old".into(), None, 1, "u".into())
            .with_created_at(now - Duration::days(2));
        let new = Entry::file(Uuid::new_v4(), "new".into(), None, 1, "u".into()).with_created_at(now);
        let store = store_with(vec![old, new]);
        let page = list(&store, None, &ListOptions::default()).unwrap();
        assert_eq!(names(&page), vec!["new", "old"]);
    }

    #[test]
    fn name_sort_ignores_case_first() {
        let entries = ["beta", "Alpha", "alpha", "Gamma"]
            .iter()
            .map(|n| Entry::file(Uuid::new_v4(), n.to_string(), None, 1, "u".into()))
            .collect();
        let store = store_with(entries);
        let page = list(&store, None, &ListOptions::default().sorted(SortField::Name, SortOrder::Asc)).unwrap();
        assert_eq!(names(&page), vec!["Alpha", "alpha", "beta", "Gamma"]);
    }

    #[test]
    fn pagination_reports_full_total() {
        let entries = (0..7)
            .map(|i| Entry::file(Uuid::new_v4(), format!("f{}", i), None, i, "u".into()))
            .collect();
        let store = store_with(entries);
        let opts = ListOptions::default()
            .sorted(SortField::Size, SortOrder::Asc)
            .page(3, 6);
        let page = list(&store, None, &opts).unwrap();
        assert_eq!(names(&page), vec!["f6"]);
        assert_eq!(page.total, 7);

        let past_end = list(&store, None, &opts.clone().page(3, 40)).unwrap();
        assert!(past_end.items.is_empty());
        assert_eq!(past_end.total, 7);
    }

    #[test]
    fn kind_and_case_filters() {
        let case = Uuid::new_v4();
        let dir = Entry::folder(Uuid::new_v4(), "dir".into(), None, "u".into()).with_case_ref(Some(case));
        let linked = Entry::file(Uuid::new_v4(), "linked".into(), None, 1, "u".into()).with_case_ref(Some(case));
        let loose = Entry::file(Uuid::new_v4(), "loose".into(), None, 1, "u".into());
        let store = store_with(vec![dir, linked, loose]);

        let files = list(&store, None, &ListOptions::default().kind(EntryKind::File)).unwrap();
        assert_eq!(files.total, 2);
        let cased = list(
            &store,
            None,
            &ListOptions::default()
                .case_ref(case)
                .sorted(SortField::Name, SortOrder::Asc),
        )
        .unwrap();
        assert_eq!(names(&cased), vec!["dir", "linked"]);
    }

    #[test]
    fn rejects_zero_limit_and_non_folder_parent() {
        let doc = Entry::file(Uuid::new_v4(), "doc".into(), None, 1, "u".into());
        let doc_id = doc.id();
        let store = store_with(vec![doc]);
        assert!(matches!(
            list(&store, None, &ListOptions::default().page(0, 0)),
            Err(WorkspaceError::InvalidQuery(_))
        ));
        assert_eq!(
            list(&store, Some(doc_id), &ListOptions::default()),
            Err(WorkspaceError::NotFound(doc_id))
        );
        let ghost = Uuid::new_v4();
        assert_eq!(
            list(&store, Some(ghost), &ListOptions::default()),
            Err(WorkspaceError::NotFound(ghost))
        );
    }
}
