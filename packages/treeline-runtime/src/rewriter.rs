//! Background snapshot rewriter (C6): serializes a cloned `MultiTree` into
//! a new `snapshot-<v>` directory, swaps `current` onto it, and best-effort
//! catches the fresh image up to the live WAL.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use treeline_core::error::{retry_io_operation, DbError};
use treeline_core::multitree::{MultiTree, MultiTreeFactory};
use treeline_core::path::Layout;
use treeline_core::snapshot_dir;
use treeline_core::wal::WalHandle;
use treeline_core::worker_pool::WorkerPool;

/// What a completed (non-cancelled) rewrite hands back to the coordinator.
pub struct RewriteOutcome {
    pub version: i64,
    pub multitree: Box<dyn MultiTree>,
}

/// The coordinator's view of an in-flight rewrite: a cancellation switch
/// and the single-item result channel from spec §4.3.
pub struct RewriteHandle {
    pub cancel: CancellationToken,
    pub result_rx: tokio::sync::oneshot::Receiver<Result<Option<RewriteOutcome>, DbError>>,
}

/// Spawns the rewrite as a blocking task on `runtime` (the work is
/// synchronous filesystem I/O fanned out over `pool`, not an async
/// computation). Returns immediately with a handle the coordinator polls
/// non-blockingly from `Db::check_async_tasks`.
pub fn spawn(
    runtime: &tokio::runtime::Handle,
    layout: Layout,
    factory: Arc<dyn MultiTreeFactory>,
    cloned: Box<dyn MultiTree>,
    wal: Arc<Mutex<WalHandle>>,
    pool: Arc<WorkerPool>,
    cache_size: usize,
    initial_version: i64,
    max_retries: u32,
    retry_delay_ms: u64,
) -> RewriteHandle {
    let cancel = CancellationToken::new();
    let task_cancel = cancel.clone();
    let (tx, result_rx) = tokio::sync::oneshot::channel();

    runtime.spawn_blocking(move || {
        let result = run(
            &task_cancel,
            &layout,
            &*factory,
            cloned,
            &wal,
            &pool,
            cache_size,
            initial_version,
            max_retries,
            retry_delay_ms,
        );
        let _ = tx.send(result);
    });

    RewriteHandle { cancel, result_rx }
}

#[allow(clippy::too_many_arguments)]
fn run(
    cancel: &CancellationToken,
    layout: &Layout,
    factory: &dyn MultiTreeFactory,
    cloned: Box<dyn MultiTree>,
    wal: &Mutex<WalHandle>,
    pool: &WorkerPool,
    cache_size: usize,
    initial_version: i64,
    max_retries: u32,
    retry_delay_ms: u64,
) -> Result<Option<RewriteOutcome>, DbError> {
    let version = cloned.version();
    let tmp_dir = layout.snapshot_tmp_dir(version);
    let final_dir = layout.snapshot_dir(version);

    let write_result = cloned.write_snapshot_with_context(cancel, &tmp_dir, pool);
    if cancel.is_cancelled() {
        let _ = snapshot_dir::remove_dir_atomic(&tmp_dir);
        return Ok(None);
    }
    write_result?;

    retry_io_operation(
        || {
            std::fs::rename(&tmp_dir, &final_dir)
                .map_err(|e| treeline_core::error::classify_io_error(e, "renaming tmp snapshot into place"))?;
            snapshot_dir::swap_current(layout, version)
        },
        max_retries,
        retry_delay_ms,
        "swapping in rewritten snapshot",
    )?;

    let mut fresh = factory.load(&final_dir, initial_version, cache_size)?;
    {
        let mut wal = wal.lock();
        if let Err(e) = fresh.catchup_wal(&mut wal, 0) {
            tracing::warn!(error = %e, "best-effort catchup of rewritten snapshot failed");
        }
    }

    Ok(Some(RewriteOutcome {
        version,
        multitree: fresh,
    }))
}
