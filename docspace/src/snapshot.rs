//! Periodic persistence of the workspace tree.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use docspace_core::snapshot::{SnapshotInfo, SnapshotManager};
use docspace_core::Workspace;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, warn};

/// Write a snapshot if the tree changed since the last one (or always, with
/// `force`), then apply retention. On failure the tree stays dirty so the
/// next attempt picks the changes up again.
pub fn persist(
    workspace: &Workspace,
    manager: &SnapshotManager,
    retention: Option<usize>,
    force: bool,
) -> Result<Option<SnapshotInfo>> {
    let Some(checkpoint) = workspace.checkpoint(force) else {
        debug!("no changes since last snapshot");
        return Ok(None);
    };
    let info = match manager.snapshot(&checkpoint.entries) {
        Ok(info) => info,
        Err(err) => {
            workspace.mark_dirty();
            return Err(err);
        }
    };
    if let Some(keep) = retention {
        // the snapshot itself is safe; a failed prune only leaves extra files
        if let Err(err) = manager.prune(keep.max(1)) {
            warn!(error = %err, "pruning old snapshots failed");
        }
    }
    Ok(Some(info))
}

/// [`persist`] on the blocking pool; it does file I/O under the store lock.
pub async fn persist_blocking(
    workspace: Arc<Workspace>,
    manager: Arc<SnapshotManager>,
    retention: Option<usize>,
    force: bool,
) -> Result<Option<SnapshotInfo>> {
    tokio::task::spawn_blocking(move || persist(&workspace, &manager, retention, force)).await?
}

pub async fn snapshot_task(
    workspace: Arc<Workspace>,
    manager: Arc<SnapshotManager>,
    retention: Option<usize>,
    period: Duration,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // the first tick completes immediately
    ticker.tick().await;
    loop {
        ticker.tick().await;
        if let Err(err) = persist_blocking(workspace.clone(), manager.clone(), retention, false).await {
            warn!(error = %err, "periodic snapshot failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_dirty_trees_are_written() {
        let tempdir = tempfile::tempdir().unwrap();
        let manager = SnapshotManager::new(tempdir.path()).unwrap();
        let ws = Workspace::new();

        assert!(persist(&ws, &manager, None, false).unwrap().is_none());
        ws.create_folder(None, "Reports", "user1").unwrap();
        let info = persist(&ws, &manager, None, false).unwrap().unwrap();
        assert_eq!(info.entries, 1);
        assert!(!ws.is_dirty());
        assert!(persist(&ws, &manager, None, false).unwrap().is_none());
        assert!(persist(&ws, &manager, None, true).unwrap().is_some());
    }

    #[test]
    fn retention_keeps_the_newest() {
        let tempdir = tempfile::tempdir().unwrap();
        let manager = SnapshotManager::new(tempdir.path()).unwrap();
        let ws = Workspace::new();
        for i in 0..4 {
            ws.create_folder(None, &format!("f{}", i), "user1").unwrap();
            persist(&ws, &manager, Some(2), false).unwrap();
        }
        let kept = manager.list().unwrap();
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].entries, 4);
    }

    #[test]
    fn failed_write_leaves_tree_dirty() {
        let tempdir = tempfile::tempdir().unwrap();
        let manager = SnapshotManager::new(tempdir.path().join("snaps")).unwrap();
        std::fs::remove_dir_all(tempdir.path().join("snaps")).unwrap();
        let ws = Workspace::new();
        ws.create_folder(None, "Reports", "user1").unwrap();

        assert!(persist(&ws, &manager, None, false).is_err());
        assert!(ws.is_dirty());
    }

    #[tokio::test]
    async fn background_task_snapshots_dirty_trees() {
        let tempdir = tempfile::tempdir().unwrap();
        let manager = Arc::new(SnapshotManager::new(tempdir.path()).unwrap());
        let ws = Arc::new(Workspace::new());
        ws.create_folder(None, "Reports", "user1").unwrap();

        let task = tokio::spawn(snapshot_task(
            ws.clone(),
            manager.clone(),
            None,
            Duration::from_millis(20),
        ));
        for _ in 0..100 {
            if !manager.list().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        task.abort();

        let written = manager.list().unwrap();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].entries, 1);
        assert!(!ws.is_dirty());
    }
}
