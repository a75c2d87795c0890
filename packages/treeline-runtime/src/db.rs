//! `Db` (C7): the public coordinator. Owns the `MultiTree`, the WAL, the
//! file lock, and the two background activities (async WAL writer,
//! snapshot rewriter), and sequences commit/rewrite/prune/close.

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use treeline_core::config::Options;
use treeline_core::error::{classify_io_error, retry_io_operation, DbError};
use treeline_core::file_lock::FileLock;
use treeline_core::multitree::{ChangeSet, CommitInfo, MultiTree, Tree, TreeNameUpgrade};
use treeline_core::path::Layout;
use treeline_core::pending_log::PendingLog;
use treeline_core::snapshot_dir;
use treeline_core::wal::{WalEntry, WalHandle};
use treeline_core::worker_pool::WorkerPool;

use crate::async_wal_writer::AsyncWalWriter;
use crate::retention;
use crate::rewriter::{self, RewriteHandle};

/// The versioned multi-tree key-value store. Not `Clone`/`Send` across
/// threads on purpose: one `Db` is driven by one caller thread, matching
/// the single-writer-mutex model in spec §5 (here, Rust's own `&mut self`
/// borrow checking plays the role of that mutex).
pub struct Db {
    layout: Layout,
    options: Options,
    multitree: Box<dyn MultiTree>,
    wal: Option<Arc<Mutex<WalHandle>>>,
    file_lock: Option<FileLock>,
    pending_log: PendingLog,
    async_writer: Option<AsyncWalWriter>,
    rewrite: Option<RewriteHandle>,
    worker_pool: Arc<WorkerPool>,
    runtime: tokio::runtime::Runtime,
    initial_version: i64,
}

impl Db {
    /// Opens (and optionally initializes) the database directory at `dir`.
    pub fn load(dir: impl AsRef<Path>, options: Options) -> Result<Self, DbError> {
        options.validate()?;
        let layout = Layout::new(dir.as_ref());
        std::fs::create_dir_all(layout.root()).map_err(|e| classify_io_error(e, "creating database directory"))?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("treeline-bg")
            .enable_all()
            .build()
            .map_err(|e| DbError::Io(format!("building background runtime: {e}")))?;
        let worker_pool = Arc::new(WorkerPool::new(options.snapshot_writer_limit)?);

        let existing = snapshot_dir::current_version(&layout)?;
        let is_fresh = existing.is_none();
        if is_fresh && !options.create_if_missing {
            return Err(DbError::Io(format!(
                "{}: no current snapshot and create_if_missing is false",
                layout.root().display()
            )));
        }

        let file_lock = if options.read_only {
            None
        } else {
            snapshot_dir::clean_tmp_snapshots(&layout)?;
            Some(FileLock::lock(layout.lock_file())?)
        };

        if is_fresh {
            let empty = options.factory.empty(options.initial_version);
            write_snapshot_sync(&layout, &worker_pool, 0, empty.as_ref(), &options)?;
            snapshot_dir::swap_current(&layout, 0)?;
        }

        let load_version = if options.target_version == 0 {
            snapshot_dir::current_version(&layout)?.unwrap_or(0)
        } else {
            let oldest = snapshot_dir::list_snapshots_ascending(&layout)?.first().copied().unwrap_or(0);
            snapshot_dir::seek_snapshot(&layout, options.target_version)?.ok_or(DbError::TargetPruned {
                target: options.target_version,
                oldest,
            })?
        };

        let mut multitree = options
            .factory
            .load(&layout.snapshot_dir(load_version), options.initial_version, options.cache_size)?;
        let mut wal = WalHandle::open(layout.wal_dir(), options.initial_version)?;

        if options.target_version == 0 || options.target_version > multitree.version() {
            multitree.catchup_wal(&mut wal, options.target_version)?;
        }

        if options.load_for_overwriting && options.target_version > 0 {
            snapshot_dir::swap_current(&layout, load_version)?;
            wal.truncate_back(options.target_version)?;
            for version in snapshot_dir::list_snapshots_ascending(&layout)? {
                if version > options.target_version {
                    snapshot_dir::remove_dir_atomic(&layout.snapshot_dir(version))?;
                }
            }
        }

        let mut pending_log = PendingLog::default();
        if is_fresh && !options.initial_stores.is_empty() {
            let upgrades: Vec<TreeNameUpgrade> = options
                .initial_stores
                .iter()
                .cloned()
                .map(TreeNameUpgrade::Add)
                .collect();
            multitree.apply_upgrades(&upgrades)?;
            // Not yet durable: routed through `pending_log` like any other
            // `apply_upgrades` call, so the first `commit()`'s `WalEntry`
            // actually carries the store-creation upgrade.
            pending_log.push_upgrades(upgrades);
        }

        Ok(Self {
            layout,
            wal: Some(Arc::new(Mutex::new(wal))),
            multitree,
            file_lock,
            pending_log,
            async_writer: None,
            rewrite: None,
            worker_pool,
            runtime,
            initial_version: options.initial_version,
            options,
        })
    }

    pub fn apply_upgrades(&mut self, upgrades: &[TreeNameUpgrade]) -> Result<(), DbError> {
        self.reject_if_read_only()?;
        self.multitree.apply_upgrades(upgrades)?;
        self.pending_log.push_upgrades(upgrades.iter().cloned());
        Ok(())
    }

    pub fn apply_change_set(&mut self, store: &str, cs: ChangeSet) -> Result<(), DbError> {
        self.reject_if_read_only()?;
        self.multitree.apply_change_set(store, &cs)?;
        self.pending_log.push_change_set(store, cs);
        Ok(())
    }

    pub fn apply_change_sets(&mut self, sets: Vec<(String, ChangeSet)>) -> Result<(), DbError> {
        for (store, cs) in sets {
            self.apply_change_set(&store, cs)?;
        }
        Ok(())
    }

    /// Only valid before the first commit (`last_commit_info().version == 0`).
    pub fn set_initial_version(&mut self, v: i64) -> Result<(), DbError> {
        self.reject_if_read_only()?;
        if self.multitree.last_commit_info().version != 0 {
            return Err(DbError::AlreadyCommitted(self.multitree.last_commit_info().version));
        }
        self.multitree.set_initial_version(v)?;
        self.initial_version = v;
        write_snapshot_sync(&self.layout, &self.worker_pool, 0, self.multitree.as_ref(), &self.options)?;
        snapshot_dir::swap_current(&self.layout, 0)?;
        Ok(())
    }

    /// Advances the tree by one version, durably records the pending log,
    /// reaps any finished background task, and kicks off a new rewrite
    /// every `snapshot_interval` versions.
    pub fn commit(&mut self) -> Result<i64, DbError> {
        self.reject_if_read_only()?;
        let version = self.multitree.save_version(true)?;

        if let Some(wal) = self.wal.clone() {
            let entry = WalEntry {
                version,
                upgrades: std::mem::take(&mut self.pending_log.upgrades),
                changesets: self
                    .pending_log
                    .changesets
                    .drain(..)
                    .map(|nc| (nc.name, nc.change_set))
                    .collect(),
            };
            if self.options.async_commit_buffer >= 0 {
                if self.async_writer.is_none() {
                    self.async_writer = Some(AsyncWalWriter::spawn(
                        &self.runtime.handle().clone(),
                        wal,
                        self.options.async_commit_buffer,
                    ));
                }
                self.async_writer.as_ref().unwrap().submit(entry)?;
            } else {
                wal.lock().append(&entry)?;
            }
        }
        self.pending_log.clear();

        self.check_async_tasks()?;

        if self.options.snapshot_interval > 0 && version % self.options.snapshot_interval as i64 == 0 {
            if let Err(e) = self.rewrite_snapshot_background() {
                tracing::warn!(error = %e, "failed to start background snapshot rewrite");
            }
        }

        Ok(version)
    }

    /// Closes the submission channel of the async writer (if any) and waits
    /// for it to drain, surfacing any terminal error.
    pub fn wait_async_commit(&mut self) -> Result<(), DbError> {
        if let Some(writer) = self.async_writer.take() {
            writer.wait(&self.runtime.handle().clone())?;
        }
        Ok(())
    }

    /// Waits for the writer, cancels any in-flight rewrite, then closes the
    /// tree, closes the WAL, and releases the file lock, joining all their
    /// errors rather than stopping at the first one (spec §4.1).
    pub fn close(mut self) -> Result<(), DbError> {
        self.wait_async_commit()?;
        if let Some(rewrite) = self.rewrite.take() {
            rewrite.cancel.cancel();
            let _ = self.runtime.block_on(rewrite.result_rx);
        }

        let mut errors = Vec::new();
        if let Err(e) = self.multitree.close() {
            errors.push(e.to_string());
        }
        if let Some(wal) = self.wal.take() {
            if let Err(e) = wal.lock().close() {
                errors.push(e.to_string());
            }
        }
        if let Some(lock) = self.file_lock.take() {
            if let Err(e) = lock.unlock() {
                errors.push(e.to_string());
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(DbError::Io(errors.join("; ")))
        }
    }

    /// Rebinds `multitree` from `current` and re-applies the pending log
    /// to restore uncommitted in-memory state.
    pub fn reload(&mut self) -> Result<(), DbError> {
        let version = snapshot_dir::current_version(&self.layout)?.unwrap_or(0);
        let mut fresh = self
            .options
            .factory
            .load(&self.layout.snapshot_dir(version), self.initial_version, self.options.cache_size)?;
        if let Some(wal) = &self.wal {
            fresh.catchup_wal(&mut wal.lock(), 0)?;
        }
        self.multitree = fresh;
        self.reapply_pending_log()?;
        Ok(())
    }

    /// Starts a background rewrite of the current in-memory state to a new
    /// snapshot directory. Fails with `RewriteInProgress` if one is already
    /// running.
    pub fn rewrite_snapshot_background(&mut self) -> Result<(), DbError> {
        self.reject_if_read_only()?;
        if self.rewrite.is_some() {
            return Err(DbError::RewriteInProgress);
        }
        let Some(wal) = self.wal.clone() else {
            return Ok(());
        };
        let cloned = self.multitree.copy(self.options.cache_size);
        let handle = rewriter::spawn(
            &self.runtime.handle().clone(),
            self.layout.clone(),
            self.options.factory.clone(),
            cloned,
            wal,
            self.worker_pool.clone(),
            self.options.cache_size,
            self.initial_version,
            self.options.persistence_max_retries,
            self.options.persistence_retry_delay_ms,
        );
        self.rewrite = Some(handle);
        Ok(())
    }

    /// `true` while a background rewrite is in flight. Lets callers that
    /// are not piggybacking on a `commit()` (the CLI's `rewrite`/`gc`
    /// subcommands) poll until one settles.
    pub fn rewrite_in_progress(&self) -> bool {
        self.rewrite.is_some()
    }

    /// Public wrapper over the non-blocking reap/retention step normally
    /// run from inside `commit()`.
    pub fn poll_background_tasks(&mut self) -> Result<(), DbError> {
        self.check_async_tasks()
    }

    /// Non-blocking poll of the rewrite-result channel; swaps in the fresh
    /// tree and kicks off retention if a rewrite has finished.
    fn check_async_tasks(&mut self) -> Result<(), DbError> {
        let Some(rewrite) = &mut self.rewrite else {
            return Ok(());
        };
        match rewrite.result_rx.try_recv() {
            Err(tokio::sync::oneshot::error::TryRecvError::Empty) => Ok(()),
            Err(tokio::sync::oneshot::error::TryRecvError::Closed) => {
                tracing::error!("snapshot rewrite task terminated without a result");
                self.rewrite = None;
                Ok(())
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "background snapshot rewrite failed; continuing on previous snapshot");
                self.rewrite = None;
                Ok(())
            }
            Ok(Ok(None)) => {
                self.rewrite = None;
                Ok(())
            }
            Ok(Ok(Some(outcome))) => {
                self.rewrite = None;
                self.swap_in_rewritten(outcome)
            }
        }
    }

    fn swap_in_rewritten(&mut self, outcome: rewriter::RewriteOutcome) -> Result<(), DbError> {
        let live_version = self.committed_version();
        let mut fresh = outcome.multitree;

        let mut attempts = 0;
        while fresh.version() < live_version && attempts < 2_000 {
            if let Some(wal) = &self.wal {
                let _ = fresh.catchup_wal(&mut wal.lock(), live_version);
            }
            if fresh.version() < live_version {
                std::thread::sleep(std::time::Duration::from_micros(200));
            }
            attempts += 1;
        }

        let mut old = std::mem::replace(&mut self.multitree, fresh);
        old.close()?;
        self.reapply_pending_log()?;

        let new_version = outcome.version;
        let layout = self.layout.clone();
        let keep_recent = self.options.snapshot_keep_recent;
        let wal = self.wal.clone();
        self.runtime.spawn_blocking(move || {
            match retention::prune_snapshots(&layout, new_version, keep_recent) {
                Ok(Some(earliest)) => {
                    if let Some(wal) = wal {
                        if let Err(e) = wal.lock().truncate_front(earliest) {
                            tracing::warn!(error = %e, "WAL front truncation failed");
                        }
                    }
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(error = %e, "snapshot retention pass failed"),
            }
        });

        if let Some(hook) = &self.options.trigger_state_sync_export {
            hook(new_version);
        }
        Ok(())
    }

    fn reapply_pending_log(&mut self) -> Result<(), DbError> {
        if !self.pending_log.upgrades.is_empty() {
            self.multitree.apply_upgrades(&self.pending_log.upgrades)?;
        }
        for nc in &self.pending_log.changesets {
            self.multitree.apply_change_set(&nc.name, &nc.change_set)?;
        }
        Ok(())
    }

    fn reject_if_read_only(&self) -> Result<(), DbError> {
        if self.options.read_only {
            Err(DbError::ReadOnly)
        } else {
            Ok(())
        }
    }

    pub fn version(&self) -> i64 {
        self.multitree.version()
    }

    pub fn last_commit_info(&self) -> CommitInfo {
        self.multitree.last_commit_info()
    }

    pub fn working_commit_info(&self) -> CommitInfo {
        self.multitree.working_commit_info()
    }

    pub fn tree_by_name(&self, name: &str) -> Option<&dyn Tree> {
        self.multitree.tree_by_name(name)
    }

    pub fn read_only(&self) -> bool {
        self.options.read_only
    }

    /// `walVersion(LastIndex)`, or the base snapshot's version if the WAL
    /// is empty.
    pub fn committed_version(&self) -> i64 {
        match &self.wal {
            Some(wal) => wal.lock().last_version().unwrap_or(self.multitree.version()),
            None => self.multitree.version(),
        }
    }
}

/// Writes `tree` into a freshly created `snapshot-<version>` directory via
/// the usual tmp-then-rename idiom, without touching `current` — callers
/// swap the symlink themselves once this returns. Retries transient I/O
/// errors (`DbError::TransientIo`) per `options.persistence_max_retries`.
fn write_snapshot_sync(
    layout: &Layout,
    pool: &WorkerPool,
    version: i64,
    tree: &dyn MultiTree,
    options: &Options,
) -> Result<(), DbError> {
    retry_io_operation(
        || {
            let tmp_dir = layout.snapshot_tmp_dir(version);
            let final_dir = layout.snapshot_dir(version);
            if final_dir.exists() {
                snapshot_dir::remove_dir_atomic(&final_dir)?;
            }
            tree.write_snapshot_with_context(&CancellationToken::new(), &tmp_dir, pool)?;
            std::fs::rename(&tmp_dir, &final_dir)
                .map_err(|e| classify_io_error(e, "renaming initial snapshot into place"))
        },
        options.persistence_max_retries,
        options.persistence_retry_delay_ms,
        "writing initial snapshot",
    )
}

/// Standalone inspection, mirroring the spec's `GetLatestVersion(dir)`:
/// does not take the file lock and does not mutate.
pub fn get_latest_version(dir: impl AsRef<Path>, initial_version: i64) -> Result<i64, DbError> {
    let layout = Layout::new(dir.as_ref());
    let Some(_current) = snapshot_dir::current_version(&layout)? else {
        return Ok(0);
    };
    let wal = WalHandle::open(layout.wal_dir(), initial_version)?;
    Ok(wal.last_version().unwrap_or(initial_version))
}
