//! Atomic snapshot-directory operations (C3): symlink swap, crash-safe
//! removal, tmp cleanup, and ascending/descending traversal.

use std::fs;
use std::path::Path;

use crate::error::{classify_io_error, DbError};
use crate::path::{self, Layout};

/// Atomically repoints `current` at `snapshot-<version>`.
///
/// Implemented as "symlink to a tmp name, then rename onto `current`" so a
/// crash mid-swap leaves either the old or the new target, never a
/// half-written symlink (spec I1, §4.3 step c).
pub fn swap_current(layout: &Layout, version: i64) -> Result<(), DbError> {
    let target = path::snapshot_name(version);
    let tmp_link = layout.current_tmp_link();
    let current_link = layout.current_link();

    if tmp_link.symlink_metadata().is_ok() {
        fs::remove_file(&tmp_link).map_err(|e| classify_io_error(e, "clearing stale current-tmp"))?;
    }
    symlink(&target, &tmp_link)?;
    fs::rename(&tmp_link, &current_link)
        .map_err(|e| classify_io_error(e, "renaming current-tmp onto current"))?;
    Ok(())
}

/// Reads the version `current` points at, or `None` if `current` does not
/// exist (fresh, never-initialized directory).
pub fn current_version(layout: &Layout) -> Result<Option<i64>, DbError> {
    let current_link = layout.current_link();
    match fs::read_link(&current_link) {
        Ok(target) => {
            let name = target
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| DbError::Corruption("current symlink has no file name".into()))?;
            path::parse_snapshot_name(name)
                .map(Some)
                .ok_or_else(|| DbError::Corruption(format!("current points at non-snapshot name {name}")))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(classify_io_error(e, "reading current symlink")),
    }
}

/// Removes a directory as-if-atomically: rename it to a tmp name in the
/// same parent first, then recursively delete. A crash between the two
/// steps leaves an orphaned `-tmp` directory, never a half-deleted
/// original (spec §4.4 step 2).
pub fn remove_dir_atomic(dir: &Path) -> Result<(), DbError> {
    if !dir.exists() {
        return Ok(());
    }
    let parent = dir
        .parent()
        .ok_or_else(|| DbError::Io(format!("{} has no parent directory", dir.display())))?;
    let name = dir
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| DbError::Io(format!("{} has no file name", dir.display())))?;
    let tmp = parent.join(format!("{name}{}", path::TMP_SUFFIX));
    fs::rename(dir, &tmp).map_err(|e| classify_io_error(e, "renaming snapshot before removal"))?;
    fs::remove_dir_all(&tmp).map_err(|e| classify_io_error(e, "removing renamed snapshot"))?;
    Ok(())
}

/// Removes any `snapshot-<...>-tmp` directories left over from a rewrite
/// that was interrupted before completion. Run once at `Load` time, before
/// anything else touches the directory (spec §4.1, §8 scenario 5).
pub fn clean_tmp_snapshots(layout: &Layout) -> Result<(), DbError> {
    let current_tmp = layout.current_tmp_link();
    if current_tmp.symlink_metadata().is_ok() {
        fs::remove_file(&current_tmp).map_err(|e| classify_io_error(e, "removing stale current-tmp"))?;
    }
    for (version, dir) in list_snapshot_tmp_dirs(layout)? {
        tracing::warn!(version, path = %dir.display(), "removing orphaned tmp snapshot from a previous crash");
        fs::remove_dir_all(&dir).map_err(|e| classify_io_error(e, "removing orphaned tmp snapshot"))?;
    }
    Ok(())
}

fn list_snapshot_tmp_dirs(layout: &Layout) -> Result<Vec<(i64, std::path::PathBuf)>, DbError> {
    let mut out = Vec::new();
    let entries = match fs::read_dir(layout.root()) {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
        Err(e) => return Err(classify_io_error(e, "listing directory")),
    };
    for entry in entries {
        let entry = entry.map_err(|e| classify_io_error(e, "reading directory entry"))?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if path::is_tmp_snapshot_name(name) {
            let base = &name[..name.len() - path::TMP_SUFFIX.len()];
            if let Some(version) = path::parse_snapshot_name(base) {
                out.push((version, entry.path()));
            }
        }
    }
    Ok(out)
}

/// Lists all non-tmp `snapshot-<version>` directories present on disk, in
/// ascending version order.
pub fn list_snapshots_ascending(layout: &Layout) -> Result<Vec<i64>, DbError> {
    let mut versions = list_snapshots(layout)?;
    versions.sort_unstable();
    Ok(versions)
}

/// Lists all non-tmp `snapshot-<version>` directories present on disk, in
/// descending version order (used by retention and seek-for-target-version).
pub fn list_snapshots_descending(layout: &Layout) -> Result<Vec<i64>, DbError> {
    let mut versions = list_snapshots(layout)?;
    versions.sort_unstable_by(|a, b| b.cmp(a));
    Ok(versions)
}

fn list_snapshots(layout: &Layout) -> Result<Vec<i64>, DbError> {
    let mut out = Vec::new();
    let entries = match fs::read_dir(layout.root()) {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
        Err(e) => return Err(classify_io_error(e, "listing directory")),
    };
    for entry in entries {
        let entry = entry.map_err(|e| classify_io_error(e, "reading directory entry"))?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if let Some(version) = path::parse_snapshot_name(name) {
            out.push(version);
        }
    }
    Ok(out)
}

/// Finds the greatest snapshot version `<= target` (or the latest if
/// `target == 0`). Returns `None` if no such snapshot is retained (spec
/// §4.5, `TargetPruned`).
pub fn seek_snapshot(layout: &Layout, target: i64) -> Result<Option<i64>, DbError> {
    let descending = list_snapshots_descending(layout)?;
    if target == 0 {
        return Ok(descending.first().copied());
    }
    Ok(descending.into_iter().find(|&v| v <= target))
}

#[cfg(unix)]
fn symlink(target: &Path, link: &Path) -> Result<(), DbError> {
    std::os::unix::fs::symlink(target, link).map_err(|e| classify_io_error(e, "creating symlink"))
}

#[cfg(windows)]
fn symlink(target: &Path, link: &Path) -> Result<(), DbError> {
    std::os::windows::fs::symlink_dir(target, link)
        .map_err(|e| classify_io_error(e, "creating symlink"))
}
