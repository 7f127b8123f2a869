use std::sync::Arc;

use docspace::snapshot::persist;
use docspace_core::snapshot::SnapshotManager;
use docspace_core::{display_path, NewFile, Workspace};

#[test]
fn restart_restores_the_latest_tree() {
    let tempdir = tempfile::tempdir().unwrap();
    let manager = SnapshotManager::new(tempdir.path()).unwrap();

    let before = Arc::new(Workspace::new());
    let reports = before.create_folder(None, "Reports", "user1").unwrap();
    let year = before.create_folder(Some(reports.id()), "2024", "user1").unwrap();
    let q1 = before
        .register_file(
            Some(year.id()),
            NewFile {
                original_filename: "q1.pdf".into(),
                size_bytes: 2048,
                created_by: "user1".into(),
                ..Default::default()
            },
        )
        .unwrap();
    persist(&before, &manager, Some(3), false).unwrap().unwrap();

    before.move_entry(year.id(), None).unwrap();
    persist(&before, &manager, Some(3), false).unwrap().unwrap();

    let (info, store) = manager.restore_latest().unwrap().unwrap();
    assert_eq!(info.entries, 3);
    let after = Workspace::from_store(store);
    assert!(!after.is_dirty());
    assert_eq!(display_path(&after.path(Some(q1.id())).unwrap()), "2024/q1.pdf");
    assert_eq!(after.get(q1.id()).unwrap(), before.get(q1.id()).unwrap());
    assert_eq!(after.stats(), before.stats());
}
