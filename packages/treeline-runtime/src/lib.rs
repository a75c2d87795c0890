//! The `Db` coordinator: durable commit via WAL, the async WAL writer, the
//! background snapshot rewriter, retention, and load/rollback/catchup
//! orchestration, built on top of the primitives in `treeline-core`.

mod async_wal_writer;
pub mod db;
mod retention;
mod rewriter;

pub use db::{get_latest_version, Db};
pub use treeline_core::config::Options;
pub use treeline_core::error::DbError;
pub use treeline_core::multitree::{ChangeSet, CommitInfo, KvPair, MultiTree, MultiTreeFactory, Tree, TreeNameUpgrade};
