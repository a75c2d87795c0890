//! Scenario 5 (crash mid-rewrite) and a literal check of property P7's
//! on-disk recoverability invariants.

use std::sync::Arc;

use treeline_core::config::Options;
use treeline_core::multitree::{ChangeSet, KvPair};
use treeline_core::path;
use treeline_core::testkit::MemMultiTreeFactory;
use treeline_runtime::Db;

fn kv(key: &str, value: &str) -> ChangeSet {
    ChangeSet {
        pairs: vec![KvPair {
            key: key.as_bytes().to_vec(),
            value: value.as_bytes().to_vec(),
            delete: false,
        }],
    }
}

fn opts() -> Options {
    Options::new(Arc::new(MemMultiTreeFactory))
}

#[test]
fn orphaned_tmp_snapshot_from_a_crashed_rewrite_is_cleaned_on_load() {
    let dir = tempfile::tempdir().unwrap();
    let mut options = opts();
    options.create_if_missing = true;
    options.initial_stores = vec!["bank".into()];

    {
        let mut db = Db::load(dir.path(), options.clone()).unwrap();
        db.apply_change_set("bank", kv("a", "1")).unwrap();
        db.commit().unwrap();
        db.close().unwrap();
    }

    // Simulate a process kill partway through a background rewrite: a
    // `snapshot-<v>-tmp` directory left on disk, `current` unchanged.
    let tmp_dir = dir.path().join(format!("{}-tmp", path::snapshot_name(5)));
    std::fs::create_dir_all(&tmp_dir).unwrap();
    std::fs::write(tmp_dir.join("partial"), b"incomplete").unwrap();

    let current_before = std::fs::read_link(dir.path().join("current")).unwrap();

    let db = Db::load(dir.path(), options).unwrap();
    assert_eq!(db.version(), 1);
    assert!(!tmp_dir.exists(), "orphaned tmp snapshot must be removed on load");
    let current_after = std::fs::read_link(dir.path().join("current")).unwrap();
    assert_eq!(current_before, current_after);
}

#[test]
fn stale_current_tmp_symlink_is_cleaned_on_load() {
    let dir = tempfile::tempdir().unwrap();
    let mut options = opts();
    options.create_if_missing = true;

    {
        let db = Db::load(dir.path(), options.clone()).unwrap();
        db.close().unwrap();
    }

    #[cfg(unix)]
    std::os::unix::fs::symlink(path::snapshot_name(0), dir.path().join("current-tmp")).unwrap();

    let db = Db::load(dir.path(), options).unwrap();
    assert_eq!(db.version(), 0);
    assert!(!dir.path().join("current-tmp").exists());
}
