//! Error types for the treeline storage engine.

use std::io::ErrorKind;
use thiserror::Error;

/// All ways a `treeline` operation can fail.
#[derive(Error, Debug, Clone)]
pub enum DbError {
    /// Incompatible combination of `Options` fields.
    #[error("invalid options: {0}")]
    InvalidOptions(String),

    /// Mutating call on a read-only `Db`.
    #[error("database is read-only")]
    ReadOnly,

    /// `SetInitialVersion` called after a version has already been committed.
    #[error("cannot set initial version: database already at version {0}")]
    AlreadyCommitted(i64),

    /// Requested `TargetVersion` is older than the oldest retained snapshot.
    #[error("target version {target} has been pruned (oldest retained snapshot is {oldest})")]
    TargetPruned { target: i64, oldest: i64 },

    /// A second background rewrite was requested while one is already running.
    #[error("a snapshot rewrite is already in progress")]
    RewriteInProgress,

    /// The async WAL writer task terminated with an error; fatal for the `Db`.
    #[error("async WAL writer failed: {0}")]
    AsyncWalFailed(String),

    /// The process-exclusive file lock is held by another writer.
    #[error("failed to acquire exclusive lock on {path}: {reason}")]
    LockHeld { path: String, reason: String },

    /// Filesystem, symlink, or rename failure.
    #[error("I/O error: {0}")]
    Io(String),

    /// A filesystem error that may succeed if retried (timeouts, interrupts).
    #[error("transient I/O error: {0}")]
    TransientIo(String),

    /// Snapshot or WAL (de)serialization failure.
    #[error("codec error: {0}")]
    Codec(String),

    /// A WAL or snapshot record failed its checksum.
    #[error("data corruption detected: {0}")]
    Corruption(String),
}

impl From<std::io::Error> for DbError {
    fn from(err: std::io::Error) -> Self {
        classify_io_error(err, "")
    }
}

/// Classifies a raw I/O error into the appropriate `DbError` variant.
///
/// `context` is prepended to the message when non-empty; callers pass the
/// operation name (`"writing snapshot"`, `"opening WAL"`, ...).
pub fn classify_io_error(error: std::io::Error, context: &str) -> DbError {
    let msg = if context.is_empty() {
        error.to_string()
    } else {
        format!("{context}: {error}")
    };
    match error.kind() {
        ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted => {
            DbError::TransientIo(msg)
        }
        _ => DbError::Io(msg),
    }
}

/// Retries `operation` while it fails with `DbError::TransientIo`, up to
/// `max_retries` additional attempts, sleeping `retry_delay_ms` in between.
pub fn retry_io_operation<F, T>(
    mut operation: F,
    max_retries: u32,
    retry_delay_ms: u64,
    context: &str,
) -> Result<T, DbError>
where
    F: FnMut() -> Result<T, DbError>,
{
    let mut attempt = 0;
    loop {
        match operation() {
            Ok(v) => return Ok(v),
            Err(DbError::TransientIo(msg)) => {
                attempt += 1;
                if attempt > max_retries {
                    return Err(DbError::TransientIo(msg));
                }
                tracing::warn!(
                    attempt,
                    max_retries,
                    context,
                    "transient I/O error, retrying"
                );
                if retry_delay_ms > 0 {
                    std::thread::sleep(std::time::Duration::from_millis(retry_delay_ms));
                }
            }
            Err(other) => return Err(other),
        }
    }
}
