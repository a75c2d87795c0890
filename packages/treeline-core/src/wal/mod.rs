//! `WalHandle` (C4): the version-addressed write-ahead log used by `Db`,
//! the async WAL writer, and `MultiTree::catchup_wal`.
//!
//! Entries are addressed by the tree's own version space; `log::SegmentLog`
//! only knows about a monotonic `u64` index. The bijection between the two
//! (spec §3):
//!
//! ```text
//! walIndex(v)   = v - initialVersion + 1
//! walVersion(i) = i + initialVersion - 1
//! ```

mod log;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::DbError;
use crate::multitree::{ChangeSet, TreeNameUpgrade};
use log::SegmentLog;

/// One committed block's worth of mutations, as persisted in the WAL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalEntry {
    pub version: i64,
    pub upgrades: Vec<TreeNameUpgrade>,
    pub changesets: Vec<(String, ChangeSet)>,
}

pub struct WalHandle {
    log: SegmentLog,
    initial_version: i64,
}

impl WalHandle {
    pub fn open(dir: impl AsRef<Path>, initial_version: i64) -> Result<Self, DbError> {
        std::fs::create_dir_all(&dir).map_err(|e| crate::error::classify_io_error(e, "creating WAL directory"))?;
        let log = SegmentLog::open(dir.as_ref().join("wal.log"))?;
        Ok(Self { log, initial_version })
    }

    fn wal_index(&self, version: i64) -> u64 {
        (version - self.initial_version + 1) as u64
    }

    fn wal_version(&self, index: u64) -> i64 {
        index as i64 + self.initial_version - 1
    }

    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }

    pub fn first_version(&self) -> Option<i64> {
        self.log.first_index().map(|i| self.wal_version(i))
    }

    pub fn last_version(&self) -> Option<i64> {
        self.log.last_index().map(|i| self.wal_version(i))
    }

    /// Appends the entry for `version`. `version` must immediately follow
    /// the log's current last version (enforced by the caller, which always
    /// writes in version order).
    pub fn append(&mut self, entry: &WalEntry) -> Result<(), DbError> {
        let payload = serde_json::to_vec(entry).map_err(|e| DbError::Codec(e.to_string()))?;
        self.log.append(self.wal_index(entry.version), &payload)
    }

    pub fn read(&mut self, version: i64) -> Result<Option<WalEntry>, DbError> {
        match self.log.read(self.wal_index(version))? {
            Some(payload) => {
                let entry = serde_json::from_slice(&payload).map_err(|e| DbError::Codec(e.to_string()))?;
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }

    /// Every entry with version in `(from, to]`, in ascending order — used
    /// by `catchup_wal` to replay from a snapshot's version up to the
    /// target.
    pub fn range_after(&mut self, from: i64, to: i64) -> Result<Vec<WalEntry>, DbError> {
        if from >= to {
            return Ok(Vec::new());
        }
        let raw = self.log.range(self.wal_index(from + 1), self.wal_index(to))?;
        raw.into_iter()
            .map(|(_, payload)| serde_json::from_slice(&payload).map_err(|e| DbError::Codec(e.to_string())))
            .collect()
    }

    /// Drops every entry for a version `< keep_from_version` (spec §4.4,
    /// run after a snapshot at or beyond `keep_from_version` is durable).
    pub fn truncate_front(&mut self, keep_from_version: i64) -> Result<(), DbError> {
        self.log.truncate_front(self.wal_index(keep_from_version))
    }

    /// Drops every entry for a version `> keep_to_version` (rollback /
    /// `LoadVersion` discarding WAL entries beyond the target).
    pub fn truncate_back(&mut self, keep_to_version: i64) -> Result<(), DbError> {
        self.log.truncate_back(self.wal_index(keep_to_version))
    }

    /// Flushes the WAL to disk. Part of `Db::close`'s "close MultiTree;
    /// close WAL; release the file lock" sequence (spec §4.1).
    pub fn close(&mut self) -> Result<(), DbError> {
        self.log.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::multitree::KvPair;

    fn entry(version: i64) -> WalEntry {
        WalEntry {
            version,
            upgrades: vec![],
            changesets: vec![(
                "bank".to_string(),
                ChangeSet {
                    pairs: vec![KvPair {
                        key: b"k".to_vec(),
                        value: b"v".to_vec(),
                        delete: false,
                    }],
                },
            )],
        }
    }

    #[test]
    fn append_and_read_with_nonzero_initial_version() {
        let dir = tempfile::tempdir().unwrap();
        let mut wal = WalHandle::open(dir.path(), 100).unwrap();
        wal.append(&entry(100)).unwrap();
        wal.append(&entry(101)).unwrap();
        assert_eq!(wal.first_version(), Some(100));
        assert_eq!(wal.last_version(), Some(101));
        let got = wal.read(101).unwrap().unwrap();
        assert_eq!(got.version, 101);
    }

    #[test]
    fn range_after_is_exclusive_of_from() {
        let dir = tempfile::tempdir().unwrap();
        let mut wal = WalHandle::open(dir.path(), 1).unwrap();
        for v in 1..=5 {
            wal.append(&entry(v)).unwrap();
        }
        let got = wal.range_after(2, 5).unwrap();
        let versions: Vec<i64> = got.iter().map(|e| e.version).collect();
        assert_eq!(versions, vec![3, 4, 5]);
    }

    #[test]
    fn truncate_front_ties_to_surviving_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let mut wal = WalHandle::open(dir.path(), 1).unwrap();
        for v in 1..=5 {
            wal.append(&entry(v)).unwrap();
        }
        wal.truncate_front(4).unwrap();
        assert_eq!(wal.first_version(), Some(4));
    }

    #[test]
    fn truncate_back_discards_rolled_back_versions() {
        let dir = tempfile::tempdir().unwrap();
        let mut wal = WalHandle::open(dir.path(), 1).unwrap();
        for v in 1..=5 {
            wal.append(&entry(v)).unwrap();
        }
        wal.truncate_back(3).unwrap();
        assert_eq!(wal.last_version(), Some(3));
        assert_eq!(wal.read(4).unwrap(), None);
    }

    #[test]
    fn close_succeeds_after_appends() {
        let dir = tempfile::tempdir().unwrap();
        let mut wal = WalHandle::open(dir.path(), 1).unwrap();
        wal.append(&entry(1)).unwrap();
        wal.close().unwrap();
    }
}
