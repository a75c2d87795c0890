//! Snapshot retention pass (spec §4.4): keeps the newest `snapshot_keep_recent`
//! snapshots strictly older than the current one, removes the rest, and
//! reports the earliest surviving version so the caller can truncate the
//! WAL front to match.

use treeline_core::error::DbError;
use treeline_core::path::Layout;
use treeline_core::snapshot_dir;

/// Removes snapshot directories strictly older than `current_version`
/// beyond the newest `keep_recent` of them. Returns the earliest surviving
/// snapshot version, or `None` if none remain (only possible if
/// `current_version` itself has no on-disk snapshot, which should not
/// happen once the DB has been loaded).
pub fn prune_snapshots(
    layout: &Layout,
    current_version: i64,
    keep_recent: u32,
) -> Result<Option<i64>, DbError> {
    let descending = snapshot_dir::list_snapshots_descending(layout)?;
    let older: Vec<i64> = descending
        .iter()
        .copied()
        .filter(|&v| v < current_version)
        .collect();

    let (keep, drop) = if (keep_recent as usize) >= older.len() {
        (older.as_slice(), &[][..])
    } else {
        older.split_at(keep_recent as usize)
    };

    for &version in drop {
        let dir = layout.snapshot_dir(version);
        tracing::debug!(version, "pruning old snapshot");
        snapshot_dir::remove_dir_atomic(&dir)?;
    }

    let mut surviving: Vec<i64> = descending
        .into_iter()
        .filter(|v| *v >= current_version || keep.contains(v))
        .collect();
    surviving.sort_unstable();
    Ok(surviving.first().copied())
}
