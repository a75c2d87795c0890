//! Scenario 4 (rollback) and property P6 (rollback round-trip).

use std::sync::Arc;

use treeline_core::config::Options;
use treeline_core::multitree::{ChangeSet, KvPair};
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
fn load_for_overwriting_rolls_back_to_target_version() {
    let dir = tempfile::tempdir().unwrap();
    let mut options = opts();
    options.create_if_missing = true;
    options.initial_stores = vec!["bank".into()];
    options.snapshot_interval = 5;
    options.snapshot_keep_recent = 1;

    {
        let mut db = Db::load(dir.path(), options.clone()).unwrap();
        for i in 1..=10 {
            db.apply_change_set("bank", kv(&format!("k{i}"), "v")).unwrap();
            db.commit().unwrap();
        }
        db.close().unwrap();
    }

    let mut rollback_opts = options.clone();
    rollback_opts.target_version = 7;
    rollback_opts.load_for_overwriting = true;

    let db = Db::load(dir.path(), rollback_opts).unwrap();
    assert_eq!(db.version(), 7);

    let remaining: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let name = e.file_name().into_string().ok()?;
            treeline_core::path::parse_snapshot_name(&name)
        })
        .collect();
    assert!(remaining.iter().all(|&v| v <= 7));
}

#[test]
fn rollback_then_recommit_is_as_if_the_later_blocks_never_happened() {
    // DB A: commit blocks 1-10, then roll back to 5 and recommit blocks
    // 6-8 with different ("redone") values.
    let dir_a = tempfile::tempdir().unwrap();
    let opts_a = opts();
    {
        let mut db = Db::load(
            dir_a.path(),
            Options {
                create_if_missing: true,
                initial_stores: vec!["bank".into()],
                ..opts_a.clone()
            },
        )
        .unwrap();
        for i in 1..=10 {
            db.apply_change_set("bank", kv(&format!("k{i}"), "original")).unwrap();
            db.commit().unwrap();
        }
        db.close().unwrap();
    }
    let mut rollback = opts_a.clone();
    rollback.target_version = 5;
    rollback.load_for_overwriting = true;
    let mut db = Db::load(dir_a.path(), rollback).unwrap();
    for i in 6..=8 {
        db.apply_change_set("bank", kv(&format!("k{i}"), "redone")).unwrap();
        db.commit().unwrap();
    }
    let hash_a = db.working_commit_info();
    db.close().unwrap();

    // DB B: a single continuous run that commits blocks 1-5, then the
    // redone versions of 6-8 directly, never committing the original 6-10.
    let dir_b = tempfile::tempdir().unwrap();
    let mut db_b = Db::load(
        dir_b.path(),
        Options {
            create_if_missing: true,
            initial_stores: vec!["bank".into()],
            ..opts()
        },
    )
    .unwrap();
    for i in 1..=5 {
        db_b.apply_change_set("bank", kv(&format!("k{i}"), "original")).unwrap();
        db_b.commit().unwrap();
    }
    for i in 6..=8 {
        db_b.apply_change_set("bank", kv(&format!("k{i}"), "redone")).unwrap();
        db_b.commit().unwrap();
    }
    let hash_b = db_b.working_commit_info();

    assert_eq!(hash_a.store_infos, hash_b.store_infos);
}
