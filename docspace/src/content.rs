//! The seam to the service that holds file bytes.

use async_trait::async_trait;
use docspace_core::EntryId;
use tokio::sync::Mutex;

#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Drop the stored bytes of a file whose entry is gone.
    async fn purge(&self, id: EntryId) -> anyhow::Result<()>;
}

/// Used when no byte store is attached.
pub struct NullContentStore;

#[async_trait]
impl ContentStore for NullContentStore {
    async fn purge(&self, _id: EntryId) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Remembers every purge request. Can be told to fail them.
#[derive(Default)]
pub struct RecordingContentStore {
    purged: Mutex<Vec<EntryId>>,
    fail: bool,
}

impl RecordingContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            purged: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub async fn purged(&self) -> Vec<EntryId> {
        self.purged.lock().await.clone()
    }
}

#[async_trait]
impl ContentStore for RecordingContentStore {
    async fn purge(&self, id: EntryId) -> anyhow::Result<()> {
        self.purged.lock().await.push(id);
        if self.fail {
            anyhow::bail!("byte store unavailable");
        }
        Ok(())
    }
}
