//! `Db` configuration.

use std::sync::Arc;

use crate::error::DbError;
use crate::multitree::MultiTreeFactory;

/// Options controlling how a `Db` directory is opened and how it behaves
/// once open. See spec §6 for the full enumeration.
#[derive(Clone)]
pub struct Options {
    /// Initialize an empty database if `current` is missing.
    pub create_if_missing: bool,
    /// Version assigned to the empty state when initialized.
    pub initial_version: i64,
    /// Disables all mutators and skips file-lock acquisition.
    pub read_only: bool,
    /// Tree names materialized at first create, applied as `add` upgrades.
    pub initial_stores: Vec<String>,
    /// Number of older snapshots retained after a prune pass.
    pub snapshot_keep_recent: u32,
    /// Versions between automatic background snapshot rewrites.
    pub snapshot_interval: u64,
    /// Optional callback fired after a successful rewrite swap, with the
    /// new snapshot's version.
    pub trigger_state_sync_export: Option<Arc<dyn Fn(i64) + Send + Sync>>,
    /// Load a specific version; `0` means "latest".
    pub target_version: i64,
    /// Async WAL channel capacity. `-1` forces synchronous WAL writes,
    /// `>= 0` enables the async writer with that buffer size.
    pub async_commit_buffer: i64,
    /// Tree reads may return mmap-backed slices.
    pub zero_copy: bool,
    /// Per-tree read cache size, forwarded to `MultiTreeFactory::load`.
    pub cache_size: usize,
    /// Rollback mode: requires `target_version > 0`.
    pub load_for_overwriting: bool,
    /// Worker pool size for parallel per-tree snapshot emission (`0` = rayon default).
    pub snapshot_writer_limit: usize,
    /// Maximum retry attempts for transient filesystem errors.
    pub persistence_max_retries: u32,
    /// Delay between retry attempts, in milliseconds.
    pub persistence_retry_delay_ms: u64,
    /// Constructs `MultiTree` instances from an on-disk snapshot directory.
    pub factory: Arc<dyn MultiTreeFactory>,
}

impl Options {
    /// Starts from sensible defaults; `factory` is the only field every
    /// caller must supply (there is no meaningful default `MultiTree`
    /// implementation).
    pub fn new(factory: Arc<dyn MultiTreeFactory>) -> Self {
        Self {
            create_if_missing: false,
            initial_version: 0,
            read_only: false,
            initial_stores: Vec::new(),
            snapshot_keep_recent: 1,
            snapshot_interval: 1000,
            trigger_state_sync_export: None,
            target_version: 0,
            async_commit_buffer: -1,
            zero_copy: false,
            cache_size: 0,
            load_for_overwriting: false,
            snapshot_writer_limit: 4,
            persistence_max_retries: 3,
            persistence_retry_delay_ms: 100,
            factory,
        }
    }

    /// Validates option combinations that are individually well-typed but
    /// jointly nonsensical. Mirrors spec §4.1 `Load`'s precondition checks.
    pub fn validate(&self) -> Result<(), DbError> {
        if self.read_only && self.create_if_missing {
            return Err(DbError::InvalidOptions(
                "ReadOnly and CreateIfMissing are mutually exclusive".into(),
            ));
        }
        if self.read_only && self.load_for_overwriting {
            return Err(DbError::InvalidOptions(
                "ReadOnly and LoadForOverwriting are mutually exclusive".into(),
            ));
        }
        if self.load_for_overwriting && self.target_version == 0 {
            return Err(DbError::InvalidOptions(
                "LoadForOverwriting requires a non-zero TargetVersion".into(),
            ));
        }
        Ok(())
    }
}

impl std::fmt::Debug for Options {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Options")
            .field("create_if_missing", &self.create_if_missing)
            .field("initial_version", &self.initial_version)
            .field("read_only", &self.read_only)
            .field("initial_stores", &self.initial_stores)
            .field("snapshot_keep_recent", &self.snapshot_keep_recent)
            .field("snapshot_interval", &self.snapshot_interval)
            .field("target_version", &self.target_version)
            .field("async_commit_buffer", &self.async_commit_buffer)
            .field("zero_copy", &self.zero_copy)
            .field("cache_size", &self.cache_size)
            .field("load_for_overwriting", &self.load_for_overwriting)
            .field("snapshot_writer_limit", &self.snapshot_writer_limit)
            .finish_non_exhaustive()
    }
}
