//! Narrow interfaces to the external collaborators this crate does not
//! implement: the IAVL-style `Tree`, the aggregation of named trees
//! (`MultiTree`), and how a `MultiTree` is constructed from an on-disk
//! snapshot (`MultiTreeFactory`). See spec §1 and §6.

use std::path::Path;

use tokio_util::sync::CancellationToken;

use crate::error::DbError;
use crate::wal::WalHandle;
use crate::worker_pool::WorkerPool;

/// A single authenticated tree within a `MultiTree`.
pub trait Tree: Send + Sync {
    /// The tree's own version, which tracks the owning `MultiTree`'s version.
    fn version(&self) -> i64;
    /// The tree's Merkle root hash at its current version.
    fn root_hash(&self) -> Vec<u8>;
}

/// An `add`/`rename`/`delete` of a named tree within a `MultiTree`,
/// recorded in `PendingLog::upgrades` for the block being built.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum TreeNameUpgrade {
    Add(String),
    Delete(String),
    Rename { old: String, new: String },
}

/// A single key's mutation within a changeset: set to `value`, or a
/// tombstone when `delete` is `true`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct KvPair {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub delete: bool,
}

/// An ordered batch of key mutations destined for one named tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ChangeSet {
    pub pairs: Vec<KvPair>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Appends `other`'s pairs after this changeset's own, matching spec
    /// §3's "pairs appended to the existing entry" merge rule for
    /// `PendingLog::changesets`.
    pub fn merge(&mut self, mut other: ChangeSet) {
        self.pairs.append(&mut other.pairs);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CommitId {
    pub version: i64,
    pub hash: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StoreInfo {
    pub name: String,
    pub commit_id: CommitId,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CommitInfo {
    pub version: i64,
    pub store_infos: Vec<StoreInfo>,
}

/// The aggregation of multiple named `Tree`s sharing one version, and its
/// own WAL-apply logic. Out of scope for this crate's implementation
/// (spec §1); consumed only through this trait.
pub trait MultiTree: Send + Sync {
    fn version(&self) -> i64;
    fn apply_upgrades(&mut self, upgrades: &[TreeNameUpgrade]) -> Result<(), DbError>;
    fn apply_change_set(&mut self, store: &str, cs: &ChangeSet) -> Result<(), DbError>;
    /// Advances the version by one, optionally recomputing `last_commit_info`.
    fn save_version(&mut self, update_commit_info: bool) -> Result<i64, DbError>;
    /// Replays WAL entries on top of the current state up to `target_version`
    /// (`0` meaning "replay to the end of the WAL").
    fn catchup_wal(&mut self, wal: &mut WalHandle, target_version: i64) -> Result<(), DbError>;
    /// Serializes the current state into `dir` (a `snapshot-<v>-tmp`
    /// directory), parallelizing per-tree emission over `pool`. Must honor
    /// `cancel`: abandon and let the caller clean up `dir` if cancelled.
    fn write_snapshot_with_context(
        &self,
        cancel: &CancellationToken,
        dir: &Path,
        pool: &WorkerPool,
    ) -> Result<(), DbError>;
    /// A cheap, structural copy sharing immutable nodes — not a deep clone.
    fn copy(&self, cache_size: usize) -> Box<dyn MultiTree>;
    fn close(&mut self) -> Result<(), DbError>;
    /// Only valid while `last_commit_info().version == 0`.
    fn set_initial_version(&mut self, v: i64) -> Result<(), DbError>;
    fn last_commit_info(&self) -> CommitInfo;
    fn working_commit_info(&self) -> CommitInfo;
    fn update_commit_info(&mut self);
    fn tree_by_name(&self, name: &str) -> Option<&dyn Tree>;
}

/// Constructs a `MultiTree` from a `snapshot-<version>` directory. Allows
/// `Db`/the rewriter to obtain fresh instances without depending on a
/// concrete `MultiTree` type.
pub trait MultiTreeFactory: Send + Sync {
    fn load(&self, snapshot_dir: &Path, initial_version: i64, cache_size: usize) -> Result<Box<dyn MultiTree>, DbError>;
    /// Creates the empty state materialized the first time a directory is
    /// initialized (spec §4.1: "one empty snapshot at version 0").
    fn empty(&self, initial_version: i64) -> Box<dyn MultiTree>;
}
