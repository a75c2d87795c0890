//! `PendingLog` — the in-memory accumulator of uncommitted tree
//! modifications for the block currently being built (spec §3 `WALEntry`).

use crate::multitree::{ChangeSet, TreeNameUpgrade};

/// One `(store name, changeset)` pair, as stored in `PendingLog::changesets`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct NamedChangeSet {
    pub name: String,
    pub change_set: ChangeSet,
}

/// Accumulates `ApplyUpgrades`/`ApplyChangeSets` calls between commits.
/// Serialized into the WAL entry at `Commit`, then cleared.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PendingLog {
    pub upgrades: Vec<TreeNameUpgrade>,
    /// Kept sorted by store name; duplicate names have their changesets
    /// merged in place (spec §3).
    pub changesets: Vec<NamedChangeSet>,
}

impl PendingLog {
    pub fn is_empty(&self) -> bool {
        self.upgrades.is_empty() && self.changesets.is_empty()
    }

    pub fn push_upgrades(&mut self, upgrades: impl IntoIterator<Item = TreeNameUpgrade>) {
        self.upgrades.extend(upgrades);
    }

    /// Inserts or merges `cs` into `changesets`, keeping the list sorted by
    /// store name. A no-op for an empty changeset.
    pub fn push_change_set(&mut self, name: &str, cs: ChangeSet) {
        if cs.is_empty() {
            return;
        }
        match self.changesets.binary_search_by(|e| e.name.as_str().cmp(name)) {
            Ok(idx) => self.changesets[idx].change_set.merge(cs),
            Err(idx) => self.changesets.insert(
                idx,
                NamedChangeSet {
                    name: name.to_string(),
                    change_set: cs,
                },
            ),
        }
    }

    pub fn clear(&mut self) {
        self.upgrades.clear();
        self.changesets.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cs(key: &str) -> ChangeSet {
        ChangeSet {
            pairs: vec![crate::multitree::KvPair {
                key: key.as_bytes().to_vec(),
                value: b"v".to_vec(),
                delete: false,
            }],
        }
    }

    #[test]
    fn keeps_changesets_sorted_by_name() {
        let mut log = PendingLog::default();
        log.push_change_set("zebra", cs("k1"));
        log.push_change_set("acorn", cs("k2"));
        log.push_change_set("mango", cs("k3"));
        let names: Vec<_> = log.changesets.iter().map(|e| e.name.clone()).collect();
        assert_eq!(names, vec!["acorn", "mango", "zebra"]);
    }

    #[test]
    fn merges_duplicate_store_names() {
        let mut log = PendingLog::default();
        log.push_change_set("bank", cs("k1"));
        log.push_change_set("bank", cs("k2"));
        assert_eq!(log.changesets.len(), 1);
        assert_eq!(log.changesets[0].change_set.pairs.len(), 2);
    }

    #[test]
    fn empty_change_set_is_a_no_op() {
        let mut log = PendingLog::default();
        log.push_change_set("bank", ChangeSet::default());
        assert!(log.changesets.is_empty());
    }

    #[test]
    fn clear_resets_both_fields() {
        let mut log = PendingLog::default();
        log.push_upgrades([TreeNameUpgrade::Add("bank".into())]);
        log.push_change_set("bank", cs("k1"));
        log.clear();
        assert!(log.is_empty());
    }
}
