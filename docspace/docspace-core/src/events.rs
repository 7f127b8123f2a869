use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::storage::EntryId;

const CHANNEL_CAPACITY: usize = 100;

/// Change notifications emitted after a mutation has been committed.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum Event {
    Created {
        id: EntryId,
        parent_id: Option<EntryId>,
    },
    Renamed {
        id: EntryId,
        name: String,
    },
    Moved {
        id: EntryId,
        from: Option<EntryId>,
        to: Option<EntryId>,
    },
    CaseChanged {
        id: EntryId,
        case_ref: Option<Uuid>,
    },
    /// `removed` lists every entry that disappeared, descendants first.
    Deleted {
        id: EntryId,
        removed: Vec<EntryId>,
    },
}

impl Event {
    pub fn id(&self) -> EntryId {
        match self {
            Event::Created { id, .. }
            | Event::Renamed { id, .. }
            | Event::Moved { id, .. }
            | Event::CaseChanged { id, .. }
            | Event::Deleted { id, .. } => *id,
        }
    }
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn send(&self, event: Event) {
        // no subscribers is fine
        let _ = self.tx.send(event);
    }
}
