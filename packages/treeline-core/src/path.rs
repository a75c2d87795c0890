//! Filesystem path and snapshot-name layout (C1).
//!
//! ```text
//! <dir>/
//!   LOCK
//!   current -> snapshot-XXXXXXXXXXXXXXXXXXXX
//!   current-tmp
//!   snapshot-<20 digits>/
//!   snapshot-<20 digits>-tmp/
//!   wal/
//! ```

use std::path::{Path, PathBuf};

/// Width of the zero-padded decimal version in a snapshot directory name.
pub const VERSION_DIGITS: usize = 20;
/// Total length of `snapshot-<20 digits>`.
pub const SNAPSHOT_NAME_LEN: usize = 9 + VERSION_DIGITS;
/// Suffix appended to a directory name while it is being written.
pub const TMP_SUFFIX: &str = "-tmp";
const SNAPSHOT_PREFIX: &str = "snapshot-";

/// Name of a snapshot directory for `version`, e.g. `snapshot-00000000000000000007`.
pub fn snapshot_name(version: i64) -> String {
    format!("{SNAPSHOT_PREFIX}{version:0width$}", width = VERSION_DIGITS)
}

/// Parses a snapshot directory name back into its version, rejecting
/// anything that doesn't match `^snapshot-[0-9]{20}$` (including `-tmp`
/// suffixed names).
pub fn parse_snapshot_name(name: &str) -> Option<i64> {
    if name.len() != SNAPSHOT_NAME_LEN || !name.starts_with(SNAPSHOT_PREFIX) {
        return None;
    }
    let digits = &name[SNAPSHOT_PREFIX.len()..];
    if digits.len() != VERSION_DIGITS || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse::<i64>().ok()
}

/// `true` if `name` is a transient snapshot directory left over from an
/// in-progress or crashed rewrite.
pub fn is_tmp_snapshot_name(name: &str) -> bool {
    name.starts_with(SNAPSHOT_PREFIX) && name.ends_with(TMP_SUFFIX)
}

/// Layout of all paths rooted at a `Db` directory.
#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn lock_file(&self) -> PathBuf {
        self.root.join("LOCK")
    }

    pub fn current_link(&self) -> PathBuf {
        self.root.join("current")
    }

    pub fn current_tmp_link(&self) -> PathBuf {
        self.root.join("current-tmp")
    }

    pub fn wal_dir(&self) -> PathBuf {
        self.root.join("wal")
    }

    pub fn snapshot_dir(&self, version: i64) -> PathBuf {
        self.root.join(snapshot_name(version))
    }

    pub fn snapshot_tmp_dir(&self, version: i64) -> PathBuf {
        self.root.join(format!("{}{TMP_SUFFIX}", snapshot_name(version)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_name() {
        for v in [0i64, 1, 7, 1_000, 99_999_999_999_999_999] {
            let name = snapshot_name(v);
            assert_eq!(name.len(), SNAPSHOT_NAME_LEN);
            assert_eq!(parse_snapshot_name(&name), Some(v));
        }
    }

    #[test]
    fn lexicographic_order_matches_numeric_order() {
        let a = snapshot_name(5);
        let b = snapshot_name(10);
        assert!(a < b, "{a} should sort before {b}");
    }

    #[test]
    fn rejects_malformed_names() {
        assert_eq!(parse_snapshot_name("snapshot-7"), None);
        assert_eq!(parse_snapshot_name("snapshot-0000000000000000000x"), None);
        assert_eq!(parse_snapshot_name("current"), None);
        assert!(is_tmp_snapshot_name(&format!(
            "{}{TMP_SUFFIX}",
            snapshot_name(3)
        )));
        assert!(!is_tmp_snapshot_name(&snapshot_name(3)));
    }
}
