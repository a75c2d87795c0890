//! Bounded worker pool for parallel per-tree snapshot emission (C8).
//!
//! A thin wrapper over a dedicated `rayon::ThreadPool`, sized by
//! `Options::snapshot_writer_limit`, so a rewrite's fan-out never competes
//! with (or is starved by) whatever global rayon pool the embedding
//! application may already have configured.

use crate::error::DbError;

pub struct WorkerPool {
    pool: rayon::ThreadPool,
}

impl WorkerPool {
    /// `limit == 0` means "one worker per available core", matching rayon's
    /// own default when no explicit size is given.
    pub fn new(limit: usize) -> Result<Self, DbError> {
        let mut builder = rayon::ThreadPoolBuilder::new().thread_name(|i| format!("treeline-snapshot-{i}"));
        if limit > 0 {
            builder = builder.num_threads(limit);
        }
        let pool = builder
            .build()
            .map_err(|e| DbError::Io(format!("building snapshot worker pool: {e}")))?;
        Ok(Self { pool })
    }

    /// Runs `jobs` to completion, collecting the first error encountered (if
    /// any) while still letting every job run — a rewrite cancellation is
    /// signalled separately via `CancellationToken`, not by aborting peers.
    pub fn run_all<F>(&self, jobs: Vec<F>) -> Result<(), DbError>
    where
        F: FnOnce() -> Result<(), DbError> + Send,
    {
        let results = self.pool.install(|| {
            use rayon::prelude::*;
            jobs.into_par_iter().map(|job| job()).collect::<Vec<_>>()
        });
        results.into_iter().collect::<Result<Vec<()>, _>>().map(|_| ())
    }
}
