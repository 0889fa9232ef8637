//! Pure set algebra behind upload and merge.
//!
//! The store only answers "which ids exist where" and applies writes; the
//! decisions about what to move, union, insert or strip are made here so
//! they can be tested without a database.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::db::converters::SetDoc;

/// `a − b`, sorted.
pub fn difference(a: &HashSet<i64>, b: &HashSet<i64>) -> Vec<i64> {
    let mut out: Vec<i64> = a.difference(b).copied().collect();
    out.sort_unstable();
    out
}

/// `a ∩ b`, sorted.
pub fn intersection(a: &HashSet<i64>, b: &HashSet<i64>) -> Vec<i64> {
    let mut out: Vec<i64> = a.intersection(b).copied().collect();
    out.sort_unstable();
    out
}

/// Sorted, deduplicated union of two member lists.
pub fn union(a: &[i64], b: &[i64]) -> Vec<i64> {
    a.iter()
        .chain(b)
        .copied()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

// ---------------------------------------------------------------------------
// Merge planning
// ---------------------------------------------------------------------------

/// How the keys of a merging commit split against the destination branch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergePlan {
    /// Present only in the source; reassigned to the destination branch.
    pub to_move: Vec<i64>,
    /// Present on both sides; destination keeps its copy (unioned for sets).
    pub to_union: Vec<i64>,
}

impl MergePlan {
    pub fn new(source: &HashSet<i64>, dest: &HashSet<i64>) -> Self {
        Self {
            to_move: difference(source, dest),
            to_union: intersection(source, dest),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.to_move.is_empty() && self.to_union.is_empty()
    }
}

/// For every destination key, the union of all destination and source
/// members under that key. Keys missing on the destination side are
/// ignored; those are moved, not unioned.
pub fn union_docs(dest: &[SetDoc], source: &[SetDoc]) -> Vec<(i64, Vec<i64>)> {
    let mut merged: BTreeMap<i64, BTreeSet<i64>> = BTreeMap::new();
    for doc in dest {
        merged
            .entry(doc.key)
            .or_default()
            .extend(doc.members.iter().copied());
    }
    for doc in source {
        if let Some(members) = merged.get_mut(&doc.key) {
            members.extend(doc.members.iter().copied());
        }
    }
    merged
        .into_iter()
        .map(|(key, members)| (key, members.into_iter().collect()))
        .collect()
}

/// Remove `removed` from every document's members. Only documents that
/// actually changed are returned.
pub fn strip_members(docs: &[SetDoc], removed: &HashSet<i64>) -> Vec<(i64, Vec<i64>)> {
    docs.iter()
        .filter(|doc| doc.members.iter().any(|m| removed.contains(m)))
        .map(|doc| {
            let kept = doc
                .members
                .iter()
                .copied()
                .filter(|m| !removed.contains(m))
                .collect();
            (doc.key, kept)
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Upload planning
// ---------------------------------------------------------------------------

/// Incoming set documents split against what the same commit already holds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpsertPlan {
    pub inserts: Vec<(i64, Vec<i64>)>,
    /// Existing keys with the union of stored and incoming members.
    pub updates: Vec<(i64, Vec<i64>)>,
}

/// Collapse repeated incoming keys, then split into inserts (key unknown)
/// and in-place unions (key already stored).
pub fn split_upserts(incoming: &[(i64, Vec<i64>)], existing: &[SetDoc]) -> UpsertPlan {
    let mut by_key: BTreeMap<i64, BTreeSet<i64>> = BTreeMap::new();
    for (key, members) in incoming {
        by_key.entry(*key).or_default().extend(members.iter().copied());
    }

    let mut stored: BTreeMap<i64, BTreeSet<i64>> = BTreeMap::new();
    for doc in existing {
        stored
            .entry(doc.key)
            .or_default()
            .extend(doc.members.iter().copied());
    }

    let mut plan = UpsertPlan::default();
    for (key, members) in by_key {
        match stored.get(&key) {
            Some(old) => {
                let merged = old.union(&members).copied().collect();
                plan.updates.push((key, merged));
            }
            None => plan.inserts.push((key, members.into_iter().collect())),
        }
    }
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Scope, VcsInfo};
    use pretty_assertions::assert_eq;

    fn doc(key: i64, members: &[i64]) -> SetDoc {
        SetDoc {
            key,
            members: members.to_vec(),
            scope: Scope::default(),
            vcs: VcsInfo::default(),
        }
    }

    fn set(ids: &[i64]) -> HashSet<i64> {
        ids.iter().copied().collect()
    }

    #[test]
    fn merge_plan_splits_move_and_union() {
        let plan = MergePlan::new(&set(&[1, 2, 3]), &set(&[3, 4]));
        assert_eq!(plan.to_move, vec![1, 2]);
        assert_eq!(plan.to_union, vec![3]);
        assert!(!plan.is_empty());
        assert!(MergePlan::new(&set(&[]), &set(&[1])).is_empty());
    }

    #[test]
    fn union_docs_only_touches_destination_keys() {
        let dest = [doc(1, &[10, 11])];
        let source = [doc(1, &[11, 12]), doc(2, &[20])];
        assert_eq!(union_docs(&dest, &source), vec![(1, vec![10, 11, 12])]);
    }

    #[test]
    fn strip_returns_only_changed_docs() {
        let docs = [doc(1, &[10, 11]), doc(2, &[20]), doc(3, &[11])];
        let stripped = strip_members(&docs, &set(&[11]));
        assert_eq!(stripped, vec![(1, vec![10]), (3, vec![])]);
    }

    #[test]
    fn split_upserts_unions_existing_keys() {
        let incoming = [(1, vec![5]), (2, vec![6]), (1, vec![7])];
        let existing = [doc(1, &[4, 5])];
        let plan = split_upserts(&incoming, &existing);
        assert_eq!(plan.inserts, vec![(2, vec![6])]);
        assert_eq!(plan.updates, vec![(1, vec![4, 5, 7])]);
    }

    #[test]
    fn union_is_sorted_and_deduplicated() {
        assert_eq!(union(&[3, 1], &[2, 3]), vec![1, 2, 3]);
        assert_eq!(union(&[], &[]), Vec::<i64>::new());
    }
}
