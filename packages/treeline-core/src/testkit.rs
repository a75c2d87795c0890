//! An in-memory `MultiTree`/`Tree` implementation for this workspace's own
//! tests and benches. Not a substitute for a real IAVL-style tree: the
//! "root hash" is a plain content hash over sorted keys, not a Merkle
//! proof-bearing structure.
//!
//! `Options::zero_copy` is accepted and carried on `MemMultiTree` so the
//! flag round-trips through `Db` without erroring, but this backend has no
//! on-disk page cache to avoid copying out of — there is nothing for a
//! toy in-memory `BTreeMap` to mmap. A real tree implementation would honor
//! it by mapping snapshot pages directly instead of reading them into a
//! `Vec`.

use std::collections::BTreeMap;
use std::path::Path;

use tokio_util::sync::CancellationToken;

use crate::error::{classify_io_error, DbError};
use crate::multitree::{
    ChangeSet, CommitId, CommitInfo, MultiTree, MultiTreeFactory, StoreInfo, Tree, TreeNameUpgrade,
};
use crate::wal::WalHandle;
use crate::worker_pool::WorkerPool;

#[derive(Clone, Default)]
struct MemTree {
    version: i64,
    data: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl MemTree {
    fn root_hash(&self) -> Vec<u8> {
        let mut hasher = crc32fast::Hasher::new();
        for (k, v) in &self.data {
            hasher.update(k);
            hasher.update(v);
        }
        hasher.finalize().to_le_bytes().to_vec()
    }

    fn apply(&mut self, cs: &ChangeSet) {
        for pair in &cs.pairs {
            if pair.delete {
                self.data.remove(&pair.key);
            } else {
                self.data.insert(pair.key.clone(), pair.value.clone());
            }
        }
    }
}

/// A `Tree` handle borrowed out of a `MemMultiTree` for the lifetime of the
/// borrow that produced it.
pub struct MemTreeView(MemTree);

impl Tree for MemTreeView {
    fn version(&self) -> i64 {
        self.0.version
    }
    fn root_hash(&self) -> Vec<u8> {
        self.0.root_hash()
    }
}

/// In-memory `MultiTree` used by this workspace's tests and benches.
pub struct MemMultiTree {
    version: i64,
    /// Version the *first* `save_version` call jumps to directly, rather
    /// than incrementing from 0 by one — set by `MultiTreeFactory::empty`
    /// or `set_initial_version`. Irrelevant once `version != 0`.
    first_version: i64,
    trees: BTreeMap<String, MemTree>,
    last_commit_info: CommitInfo,
    cache_size: usize,
    zero_copy: bool,
}

impl MemMultiTree {
    pub fn new(first_version: i64, cache_size: usize, zero_copy: bool) -> Self {
        Self {
            version: 0,
            first_version,
            trees: BTreeMap::new(),
            last_commit_info: CommitInfo::default(),
            cache_size,
            zero_copy,
        }
    }

    fn compute_commit_info(&self) -> CommitInfo {
        CommitInfo {
            version: self.version,
            store_infos: self
                .trees
                .iter()
                .map(|(name, t)| StoreInfo {
                    name: name.clone(),
                    commit_id: CommitId {
                        version: t.version,
                        hash: t.root_hash(),
                    },
                })
                .collect(),
        }
    }
}

impl MultiTree for MemMultiTree {
    fn version(&self) -> i64 {
        self.version
    }

    fn apply_upgrades(&mut self, upgrades: &[TreeNameUpgrade]) -> Result<(), DbError> {
        for upgrade in upgrades {
            match upgrade {
                TreeNameUpgrade::Add(name) => {
                    self.trees.entry(name.clone()).or_insert_with(|| MemTree {
                        version: self.version,
                        data: BTreeMap::new(),
                    });
                }
                TreeNameUpgrade::Delete(name) => {
                    self.trees.remove(name);
                }
                TreeNameUpgrade::Rename { old, new } => {
                    if let Some(tree) = self.trees.remove(old) {
                        self.trees.insert(new.clone(), tree);
                    }
                }
            }
        }
        Ok(())
    }

    fn apply_change_set(&mut self, store: &str, cs: &ChangeSet) -> Result<(), DbError> {
        let tree = self
            .trees
            .get_mut(store)
            .ok_or_else(|| DbError::Corruption(format!("unknown store {store}")))?;
        tree.apply(cs);
        Ok(())
    }

    fn save_version(&mut self, update_commit_info: bool) -> Result<i64, DbError> {
        if self.version == 0 && self.first_version > 0 {
            self.version = self.first_version;
        } else {
            self.version += 1;
        }
        for tree in self.trees.values_mut() {
            tree.version = self.version;
        }
        if update_commit_info {
            self.update_commit_info();
        }
        Ok(self.version)
    }

    fn catchup_wal(&mut self, wal: &mut WalHandle, target_version: i64) -> Result<(), DbError> {
        let to = if target_version == 0 {
            wal.last_version().unwrap_or(self.version)
        } else {
            target_version
        };
        for entry in wal.range_after(self.version, to)? {
            self.apply_upgrades(&entry.upgrades)?;
            for (store, cs) in &entry.changesets {
                self.apply_change_set(store, cs)?;
            }
            self.save_version(true)?;
        }
        Ok(())
    }

    fn write_snapshot_with_context(
        &self,
        cancel: &CancellationToken,
        dir: &Path,
        pool: &WorkerPool,
    ) -> Result<(), DbError> {
        std::fs::create_dir_all(dir).map_err(|e| classify_io_error(e, "creating snapshot directory"))?;
        let entries: Vec<(String, MemTree)> = self
            .trees
            .iter()
            .map(|(name, tree)| (name.clone(), tree.clone()))
            .collect();
        let dir = dir.to_path_buf();
        let cancel = cancel.clone();
        let jobs: Vec<_> = entries
            .into_iter()
            .map(|(name, tree)| {
                let dir = dir.clone();
                let cancel = cancel.clone();
                move || -> Result<(), DbError> {
                    if cancel.is_cancelled() {
                        return Ok(());
                    }
                    let bytes = serde_json::to_vec(&tree.data).map_err(|e| DbError::Codec(e.to_string()))?;
                    std::fs::write(dir.join(format!("{name}.tree")), bytes)
                        .map_err(|e| classify_io_error(e, "writing tree snapshot file"))
                }
            })
            .collect();
        pool.run_all(jobs)?;

        let meta = serde_json::to_vec(&self.last_commit_info).map_err(|e| DbError::Codec(e.to_string()))?;
        std::fs::write(dir.join("commit_info.json"), meta)
            .map_err(|e| classify_io_error(e, "writing commit info"))
    }

    fn copy(&self, cache_size: usize) -> Box<dyn MultiTree> {
        Box::new(Self {
            version: self.version,
            first_version: self.first_version,
            trees: self.trees.clone(),
            last_commit_info: self.last_commit_info.clone(),
            cache_size,
            zero_copy: self.zero_copy,
        })
    }

    fn close(&mut self) -> Result<(), DbError> {
        Ok(())
    }

    fn set_initial_version(&mut self, v: i64) -> Result<(), DbError> {
        if self.last_commit_info.version != 0 {
            return Err(DbError::InvalidOptions(
                "set_initial_version called after first commit".into(),
            ));
        }
        self.first_version = v;
        Ok(())
    }

    fn last_commit_info(&self) -> CommitInfo {
        self.last_commit_info.clone()
    }

    fn working_commit_info(&self) -> CommitInfo {
        self.compute_commit_info()
    }

    fn update_commit_info(&mut self) {
        self.last_commit_info = self.compute_commit_info();
    }

    fn tree_by_name(&self, _name: &str) -> Option<&dyn Tree> {
        // Returning a borrowed trait object over `MemTree` directly isn't
        // expressible without an adapter allocation; tests needing tree
        // contents go through `working_commit_info` / `last_commit_info`
        // instead.
        None
    }
}

/// Builds `MemMultiTree` instances from `snapshot-<version>` directories.
pub struct MemMultiTreeFactory;

impl MultiTreeFactory for MemMultiTreeFactory {
    fn load(&self, snapshot_dir: &Path, initial_version: i64, cache_size: usize) -> Result<Box<dyn MultiTree>, DbError> {
        let mut mt = MemMultiTree::new(initial_version, cache_size, false);
        let meta_path = snapshot_dir.join("commit_info.json");
        if meta_path.exists() {
            let bytes = std::fs::read(&meta_path).map_err(|e| classify_io_error(e, "reading commit info"))?;
            let info: CommitInfo = serde_json::from_slice(&bytes).map_err(|e| DbError::Codec(e.to_string()))?;
            mt.version = info.version;
            for store in &info.store_infos {
                let tree_path = snapshot_dir.join(format!("{}.tree", store.name));
                let data: BTreeMap<Vec<u8>, Vec<u8>> = if tree_path.exists() {
                    let bytes = std::fs::read(&tree_path).map_err(|e| classify_io_error(e, "reading tree snapshot"))?;
                    serde_json::from_slice(&bytes).map_err(|e| DbError::Codec(e.to_string()))?
                } else {
                    BTreeMap::new()
                };
                mt.trees.insert(
                    store.name.clone(),
                    MemTree {
                        version: info.version,
                        data,
                    },
                );
            }
            mt.last_commit_info = info;
        }
        Ok(Box::new(mt))
    }

    fn empty(&self, initial_version: i64) -> Box<dyn MultiTree> {
        Box::new(MemMultiTree::new(initial_version, 0, false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::multitree::KvPair;

    #[test]
    fn apply_and_save_version_advances_state() {
        let mut mt = MemMultiTree::new(0, 0, false);
        mt.apply_upgrades(&[TreeNameUpgrade::Add("bank".into())]).unwrap();
        mt.apply_change_set(
            "bank",
            &ChangeSet {
                pairs: vec![KvPair {
                    key: b"k".to_vec(),
                    value: b"v".to_vec(),
                    delete: false,
                }],
            },
        )
        .unwrap();
        let v = mt.save_version(true).unwrap();
        assert_eq!(v, 1);
        assert_eq!(mt.last_commit_info().version, 1);
    }

    #[test]
    fn write_snapshot_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let mut mt = MemMultiTree::new(0, 0, false);
        mt.apply_upgrades(&[TreeNameUpgrade::Add("bank".into())]).unwrap();
        mt.apply_change_set(
            "bank",
            &ChangeSet {
                pairs: vec![KvPair {
                    key: b"k".to_vec(),
                    value: b"v".to_vec(),
                    delete: false,
                }],
            },
        )
        .unwrap();
        mt.save_version(true).unwrap();

        let pool = WorkerPool::new(1).unwrap();
        mt.write_snapshot_with_context(&CancellationToken::new(), dir.path(), &pool)
            .unwrap();

        let factory = MemMultiTreeFactory;
        let loaded = factory.load(dir.path(), 0, 0).unwrap();
        assert_eq!(loaded.version(), 1);
    }
}
