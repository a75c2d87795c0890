//! Property-based checks for P1 (WAL bijection), P2 (monotonic commit), P4
//! (retention), P5 (WAL front-truncation safety), and P8 (read-only
//! rejection).

use std::sync::Arc;

use proptest::prelude::*;
use treeline_core::config::Options;
use treeline_core::multitree::{ChangeSet, KvPair};
use treeline_core::testkit::MemMultiTreeFactory;
use treeline_runtime::Db;

fn kv(key: &str) -> ChangeSet {
    ChangeSet {
        pairs: vec![KvPair {
            key: key.as_bytes().to_vec(),
            value: b"v".to_vec(),
            delete: false,
        }],
    }
}

fn opts() -> Options {
    Options::new(Arc::new(MemMultiTreeFactory))
}

proptest! {
    #[test]
    fn p1_wal_bijection_round_trips(v in 1i64..1_000_000, initial in 0i64..1000) {
        let index = v - initial + 1;
        let recovered = index + initial - 1;
        prop_assert_eq!(recovered, v);
    }

    #[test]
    fn p2_commit_strictly_increments_version(n_commits in 1usize..20) {
        let dir = tempfile::tempdir().unwrap();
        let mut options = opts();
        options.create_if_missing = true;
        options.initial_stores = vec!["bank".into()];
        let mut db = Db::load(dir.path(), options).unwrap();

        let mut prev = db.version();
        for i in 0..n_commits {
            db.apply_change_set("bank", kv(&format!("k{i}"))).unwrap();
            let v = db.commit().unwrap();
            prop_assert_eq!(v, prev + 1);
            prev = v;
        }
    }

    #[test]
    fn p4_retention_bounds_older_snapshot_count(keep_recent in 0u32..5, n_commits in 1i64..30) {
        let dir = tempfile::tempdir().unwrap();
        let mut options = opts();
        options.create_if_missing = true;
        options.initial_stores = vec!["bank".into()];
        options.snapshot_interval = 3;
        options.snapshot_keep_recent = keep_recent;

        let mut db = Db::load(dir.path(), options).unwrap();
        for i in 0..n_commits {
            db.apply_change_set("bank", kv(&format!("k{i}"))).unwrap();
            db.commit().unwrap();
        }
        for _ in 0..100 {
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        let current = treeline_core::snapshot_dir::current_version(&treeline_core::path::Layout::new(dir.path())).unwrap().unwrap();
        let older_count = treeline_core::snapshot_dir::list_snapshots_ascending(&treeline_core::path::Layout::new(dir.path()))
            .unwrap()
            .into_iter()
            .filter(|&v| v < current)
            .count();
        prop_assert!(older_count <= keep_recent as usize);
    }

    #[test]
    fn p8_mutators_reject_on_read_only(n in 1i64..10) {
        let dir = tempfile::tempdir().unwrap();
        let mut options = opts();
        options.create_if_missing = true;
        options.initial_stores = vec!["bank".into()];
        {
            let mut db = Db::load(dir.path(), options.clone()).unwrap();
            for i in 0..n {
                db.apply_change_set("bank", kv(&format!("k{i}"))).unwrap();
                db.commit().unwrap();
            }
            db.close().unwrap();
        }

        let mut ro_options = options.clone();
        ro_options.read_only = true;
        ro_options.create_if_missing = false;
        let mut db = Db::load(dir.path(), ro_options).unwrap();

        prop_assert!(db.apply_change_set("bank", kv("x")).is_err());
        prop_assert!(db.commit().is_err());
        prop_assert!(db.read_only());
        // Non-mutators still succeed.
        let _ = db.version();
        let _ = db.last_commit_info();
    }
}

#[test]
fn p5_wal_first_index_never_precedes_earliest_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let mut options = opts();
    options.create_if_missing = true;
    options.initial_stores = vec!["bank".into()];
    options.snapshot_interval = 4;
    options.snapshot_keep_recent = 1;

    let mut db = Db::load(dir.path(), options).unwrap();
    for i in 0..20 {
        db.apply_change_set("bank", kv(&format!("k{i}"))).unwrap();
        db.commit().unwrap();
    }
    for _ in 0..50 {
        std::thread::sleep(std::time::Duration::from_millis(10));
    }
    db.close().unwrap();

    let layout = treeline_core::path::Layout::new(dir.path());
    let earliest_snapshot = treeline_core::snapshot_dir::list_snapshots_ascending(&layout)
        .unwrap()
        .into_iter()
        .next()
        .unwrap();
    let mut wal = treeline_core::wal::WalHandle::open(layout.wal_dir(), 0).unwrap();
    if let Some(first_version) = wal.first_version() {
        assert!(first_version >= earliest_snapshot);
    }
}
