pub mod entry;
pub mod store;

pub use entry::{Entry, EntryId, EntryKind};
pub use store::{EntryStore, Violation};
