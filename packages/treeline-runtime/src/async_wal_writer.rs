//! Async WAL writer (C5): drains a bounded channel of pending entries and
//! batches them into the WAL on a dedicated runtime task.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use treeline_core::error::DbError;
use treeline_core::wal::{WalEntry, WalHandle};

/// Handle to the lazily-started async WAL writer task. Owned by `Db`; a
/// fresh one is spawned the first time `Db::commit` is called with
/// `async_commit_buffer >= 0`.
pub struct AsyncWalWriter {
    tx: mpsc::Sender<WalEntry>,
    handle: JoinHandle<Result<(), DbError>>,
}

impl AsyncWalWriter {
    pub fn spawn(runtime: &tokio::runtime::Handle, wal: Arc<Mutex<WalHandle>>, buffer: i64) -> Self {
        let capacity = buffer.max(1) as usize;
        let (tx, rx) = mpsc::channel(capacity);
        let handle = runtime.spawn(Self::run(rx, wal));
        Self { tx, handle }
    }

    async fn run(mut rx: mpsc::Receiver<WalEntry>, wal: Arc<Mutex<WalHandle>>) -> Result<(), DbError> {
        loop {
            let first = match rx.recv().await {
                Some(entry) => entry,
                None => return Ok(()),
            };
            let mut batch = vec![first];
            while let Ok(entry) = rx.try_recv() {
                batch.push(entry);
            }

            let mut wal = wal.lock();
            for entry in batch {
                if let Some(last) = wal.last_version() {
                    if entry.version <= last {
                        tracing::warn!(version = entry.version, "idempotent re-commit, dropping WAL entry");
                        continue;
                    }
                }
                if let Err(e) = wal.append(&entry) {
                    tracing::error!(error = %e, "async WAL writer failed, task exiting");
                    return Err(e);
                }
            }
        }
    }

    /// Submits `entry`, blocking the caller (the foreground commit thread,
    /// never a runtime worker) if the channel is full. This is the
    /// intended backpressure mechanism.
    pub fn submit(&self, entry: WalEntry) -> Result<(), DbError> {
        self.tx
            .blocking_send(entry)
            .map_err(|_| DbError::AsyncWalFailed("writer task has already exited".into()))
    }

    /// Closes the submission channel and waits for the writer to drain and
    /// exit, surfacing any terminal error.
    pub fn wait(self, runtime: &tokio::runtime::Handle) -> Result<(), DbError> {
        drop(self.tx);
        runtime
            .block_on(self.handle)
            .map_err(|e| DbError::AsyncWalFailed(format!("writer task panicked: {e}")))?
    }
}
