//! Building blocks for a versioned, multi-tree key-value storage engine:
//! on-disk layout, crash-safe snapshot directory operations, the
//! write-ahead log, file locking, and the worker pool used to parallelize
//! snapshot rewrites. The tree implementation itself (`Tree`/`MultiTree`)
//! is supplied by the embedding application through the traits in
//! [`multitree`]; the coordinator that ties all of this together lives in
//! the `treeline-runtime` crate.

pub mod config;
pub mod error;
pub mod file_lock;
pub mod multitree;
pub mod path;
pub mod pending_log;
pub mod snapshot_dir;
pub mod wal;
pub mod worker_pool;

#[cfg(feature = "testkit")]
pub mod testkit;

pub use config::Options;
pub use error::DbError;
pub use multitree::{ChangeSet, CommitInfo, KvPair, MultiTree, MultiTreeFactory, Tree, TreeNameUpgrade};
pub use path::Layout;
pub use wal::{WalEntry, WalHandle};
pub use worker_pool::WorkerPool;
