pub mod error;
pub mod events;
pub mod path;
pub mod query;
pub mod reparent;
pub mod snapshot;
pub mod storage;
pub mod workspace;

pub use error::{Result, WorkspaceError};
pub use events::{Event, EventBus};
pub use path::{display_path, Crumb};
pub use query::{ListOptions, Page, SortField, SortOrder};
pub use storage::{Entry, EntryId, EntryKind, EntryStore, Violation};
pub use workspace::{Deleted, ManifestItem, NewFile, Stats, Workspace};
