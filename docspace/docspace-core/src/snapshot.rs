use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::storage::{Entry, EntryStore};

const PREFIX: &str = "snapshot-";
const SUFFIX: &str = ".json";
const STAMP_FORMAT: &str = "%Y%m%dT%H%M%S%3fZ";

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct SnapshotInfo {
    pub name: String,
    pub taken_at: DateTime<Utc>,
    pub entries: usize,
}

#[derive(Serialize, Deserialize)]
struct SnapshotFile {
    taken_at: DateTime<Utc>,
    entries: Vec<Entry>,
}

/// Point-in-time copies of the entry tree, one JSON file each.
pub struct SnapshotManager {
    dir: PathBuf,
}

impl SnapshotManager {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("creating snapshot directory {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `entries` as a new snapshot. The file appears atomically.
    pub fn snapshot(&self, entries: &[Entry]) -> Result<SnapshotInfo> {
        let mut taken_at = Utc::now();
        let mut name = file_name(taken_at);
        // two snapshots inside the same millisecond must not overwrite
        while self.dir.join(&name).exists() {
            taken_at += chrono::Duration::milliseconds(1);
            name = file_name(taken_at);
        }

        let body = SnapshotFile {
            taken_at,
            entries: entries.to_vec(),
        };
        let tmp = self.dir.join(format!(".{}.tmp", name));
        std::fs::write(&tmp, serde_json::to_vec_pretty(&body)?)
            .with_context(|| format!("writing {}", tmp.display()))?;
        std::fs::rename(&tmp, self.dir.join(&name))?;

        info!(snapshot = %name, entries = entries.len(), "snapshot written");
        Ok(SnapshotInfo {
            name,
            taken_at,
            entries: entries.len(),
        })
    }

    /// Snapshot the full contents of a store.
    pub fn snapshot_store(&self, store: &EntryStore) -> Result<SnapshotInfo> {
        let mut entries: Vec<Entry> = store.iter().cloned().collect();
        entries.sort_by_key(|e| e.id());
        self.snapshot(&entries)
    }

    /// Readable snapshots, newest first. Files with a snapshot name that
    /// cannot be read or parsed are logged and left out.
    pub fn list(&self) -> Result<Vec<SnapshotInfo>> {
        let mut out = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(taken_at) = parse_name(&name) else {
                continue;
            };
            let entries = match self.read(&name) {
                Ok(file) => file.entries.len(),
                Err(err) => {
                    warn!(snapshot = %name, error = %err, "skipping unreadable snapshot");
                    continue;
                }
            };
            out.push(SnapshotInfo {
                name,
                taken_at,
                entries,
            });
        }
        out.sort_by(|a, b| b.taken_at.cmp(&a.taken_at));
        Ok(out)
    }

    fn read(&self, name: &str) -> Result<SnapshotFile> {
        if parse_name(name).is_none() {
            bail!("{:?} is not a snapshot name", name);
        }
        let path = self.dir.join(name);
        let data = std::fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
        Ok(serde_json::from_slice(&data)?)
    }

    /// Rebuild a store from the named snapshot. A tree that breaks any
    /// invariant is refused rather than loaded.
    pub fn restore(&self, name: &str) -> Result<EntryStore> {
        let file = self.read(name)?;
        let store = EntryStore::from_entries(file.entries)
            .map_err(|e| anyhow!("snapshot {} is inconsistent: {}", name, e))?;
        let problems = store.verify();
        if let Some(first) = problems.first() {
            bail!(
                "snapshot {} violates {} tree invariant(s), first: {}",
                name,
                problems.len(),
                first
            );
        }
        debug!(snapshot = name, entries = store.len(), "snapshot restored");
        Ok(store)
    }

    /// Restore the newest snapshot, if there is one.
    pub fn restore_latest(&self) -> Result<Option<(SnapshotInfo, EntryStore)>> {
        match self.list()?.into_iter().next() {
            Some(info) => {
                let store = self.restore(&info.name)?;
                Ok(Some((info, store)))
            }
            None => Ok(None),
        }
    }

    /// Delete all but the newest `keep` snapshots. Returns how many went.
    pub fn prune(&self, keep: usize) -> Result<usize> {
        let mut removed = 0;
        for info in self.list()?.into_iter().skip(keep) {
            std::fs::remove_file(self.dir.join(&info.name))?;
            removed += 1;
        }
        if removed > 0 {
            debug!(removed, keep, "old snapshots pruned");
        }
        Ok(removed)
    }
}

fn file_name(at: DateTime<Utc>) -> String {
    format!("{}{}{}", PREFIX, at.format(STAMP_FORMAT), SUFFIX)
}

fn parse_name(name: &str) -> Option<DateTime<Utc>> {
    let stamp = name.strip_prefix(PREFIX)?.strip_suffix(SUFFIX)?;
    NaiveDateTime::parse_from_str(stamp, STAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::Workspace;
    use uuid::Uuid;

    #[test]
    fn snapshot_and_restore_roundtrip() {
        let tempdir = tempfile::tempdir().unwrap();
        let mgr = SnapshotManager::new(tempdir.path().join("snaps")).unwrap();

        let ws = Workspace::new();
        let dir = ws.create_folder(None, "Reports", "user1").unwrap();
        let doc = ws
            .register_file(
                Some(dir.id()),
                crate::workspace::NewFile {
                    original_filename: "q1.pdf".into(),
                    size_bytes: 10,
                    created_by: "user1".into(),
                    ..Default::default()
                },
            )
            .unwrap();
        let cp = ws.checkpoint(false).unwrap();
        let info = mgr.snapshot(&cp.entries).unwrap();
        assert_eq!(info.entries, 2);

        let store = mgr.restore(&info.name).unwrap();
        assert!(!store.is_dirty());
        assert_eq!(store.get(doc.id()).unwrap(), &doc);
        assert_eq!(store.child_ids(Some(dir.id())).collect::<Vec<_>>(), vec![doc.id()]);
    }

    #[test]
    fn list_is_newest_first_and_prune_keeps_newest() {
        let tempdir = tempfile::tempdir().unwrap();
        let mgr = SnapshotManager::new(tempdir.path()).unwrap();
        let store = EntryStore::new();
        let first = mgr.snapshot_store(&store).unwrap();
        let second = mgr.snapshot_store(&store).unwrap();
        let third = mgr.snapshot_store(&store).unwrap();
        std::fs::write(tempdir.path().join("notes.txt"), "ignored").unwrap();

        let names: Vec<_> = mgr.list().unwrap().into_iter().map(|i| i.name).collect();
        assert_eq!(names, vec![third.name.clone(), second.name, first.name]);

        assert_eq!(mgr.prune(1).unwrap(), 2);
        let (latest, _) = mgr.restore_latest().unwrap().unwrap();
        assert_eq!(latest.name, third.name);
    }

    #[test]
    fn empty_directory_has_nothing_to_restore() {
        let tempdir = tempfile::tempdir().unwrap();
        let mgr = SnapshotManager::new(tempdir.path()).unwrap();
        assert!(mgr.restore_latest().unwrap().is_none());
        assert!(mgr.restore("../etc/passwd").is_err());
    }

    #[test]
    fn corrupt_snapshots_are_refused() {
        let tempdir = tempfile::tempdir().unwrap();
        let mgr = SnapshotManager::new(tempdir.path()).unwrap();
        let orphan = Entry::folder(Uuid::new_v4(), "orphan".into(), Some(Uuid::new_v4()), "u".into());
        let info = mgr.snapshot(&[orphan]).unwrap();
        let err = mgr.restore(&info.name).unwrap_err();
        assert!(err.to_string().contains("invariant"));
    }

    #[test]
    fn unreadable_snapshots_are_skipped() {
        let tempdir = tempfile::tempdir().unwrap();
        let mgr = SnapshotManager::new(tempdir.path()).unwrap();
        let ws = Workspace::new();
        ws.create_folder(None, "Docs", "user1").unwrap();
        let good = mgr.snapshot(&ws.checkpoint(false).unwrap().entries).unwrap();
        // newer than any real snapshot, but truncated
        std::fs::write(
            tempdir.path().join("snapshot-29991231T235959000Z.json"),
            "{\"taken_at\":",
        )
        .unwrap();

        let listed: Vec<_> = mgr.list().unwrap().into_iter().map(|i| i.name).collect();
        assert_eq!(listed, vec![good.name.clone()]);
        let (latest, store) = mgr.restore_latest().unwrap().unwrap();
        assert_eq!(latest.name, good.name);
        assert_eq!(store.len(), 1);
    }
}
