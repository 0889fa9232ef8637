//! Property-based tests for the TI engine using proptest.
//!
//! These cover the set algebra the merge and upload paths are built on and
//! the size bound of the visualization walk.

use std::collections::{BTreeSet, HashSet};

use proptest::prelude::*;

use ti_engine::config::VisualizationConfig;
use ti_engine::context::RequestContext;
use ti_engine::db::converters::SetDoc;
use ti_engine::db::schema::initialize_database;
use ti_engine::graph::setops::{split_upserts, union, union_docs, MergePlan};
use ti_engine::graph::{GraphStore, SetCollection, VisGraphBuilder};
use ti_engine::types::{GetVgReq, Node, NodeType, Scope, VcsInfo};

// ---------------------------------------------------------------------------
// Strategy helpers
// ---------------------------------------------------------------------------

fn arb_ids() -> impl Strategy<Value = Vec<i64>> {
    prop::collection::vec(0i64..64, 0..24)
}

fn arb_id_set() -> impl Strategy<Value = HashSet<i64>> {
    prop::collection::hash_set(0i64..64, 0..24)
}

/// Documents with unique keys.
fn arb_docs() -> impl Strategy<Value = Vec<(i64, Vec<i64>)>> {
    prop::collection::btree_map(0i64..16, arb_ids(), 0..8)
        .prop_map(|m| m.into_iter().collect())
}

fn to_set_docs(docs: &[(i64, Vec<i64>)]) -> Vec<SetDoc> {
    docs.iter()
        .map(|(key, members)| SetDoc {
            key: *key,
            members: union(members, &[]),
            scope: Scope::new("acct", "", ""),
            vcs: VcsInfo::new("repo", "main", "sha"),
        })
        .collect()
}

fn sorted_set(v: &[i64]) -> BTreeSet<i64> {
    v.iter().copied().collect()
}

// ---------------------------------------------------------------------------
// Set algebra
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn union_is_commutative(a in arb_ids(), b in arb_ids()) {
        prop_assert_eq!(union(&a, &b), union(&b, &a));
    }

    #[test]
    fn union_is_idempotent_and_sorted(a in arb_ids(), b in arb_ids()) {
        let once = union(&a, &b);
        prop_assert_eq!(union(&once, &b), once.clone());
        prop_assert!(once.windows(2).all(|w| w[0] < w[1]));
        let expected: BTreeSet<i64> = sorted_set(&a).union(&sorted_set(&b)).copied().collect();
        prop_assert_eq!(sorted_set(&once), expected);
    }

    #[test]
    fn merge_plan_partitions_source(source in arb_id_set(), dest in arb_id_set()) {
        let plan = MergePlan::new(&source, &dest);
        let moved: HashSet<i64> = plan.to_move.iter().copied().collect();
        let unioned: HashSet<i64> = plan.to_union.iter().copied().collect();

        prop_assert!(moved.is_disjoint(&unioned));
        prop_assert_eq!(moved.union(&unioned).copied().collect::<HashSet<_>>(), source.clone());
        prop_assert!(moved.is_disjoint(&dest));
        prop_assert!(unioned.is_subset(&dest));
    }

    #[test]
    fn union_docs_covers_both_sides(dest in arb_docs(), source in arb_docs()) {
        let merged = union_docs(&to_set_docs(&dest), &to_set_docs(&source));
        for (key, members) in &merged {
            let d = dest.iter().find(|(k, _)| k == key);
            prop_assert!(d.is_some(), "only destination keys are rewritten");
            let s = source.iter().find(|(k, _)| k == key);
            let mut expected = sorted_set(&d.unwrap().1);
            if let Some((_, s)) = s {
                expected.extend(s.iter().copied());
            }
            prop_assert_eq!(sorted_set(members), expected);
        }
    }

    #[test]
    fn split_upserts_converges(existing in arb_docs(), incoming in arb_docs()) {
        let existing_docs = to_set_docs(&existing);
        let plan = split_upserts(&incoming, &existing_docs);

        let existing_keys: HashSet<i64> = existing.iter().map(|(k, _)| *k).collect();
        for (key, _) in &plan.inserts {
            prop_assert!(!existing_keys.contains(key));
        }
        for (key, members) in &plan.updates {
            prop_assert!(existing_keys.contains(key));
            let (_, old) = existing.iter().find(|(k, _)| k == key).unwrap();
            prop_assert!(sorted_set(old).is_subset(&sorted_set(members)));
        }

        // Re-running against the applied plan rewrites nothing.
        let mut applied: Vec<(i64, Vec<i64>)> = existing
            .iter()
            .map(|(k, m)| (*k, union(m, &[])))
            .collect();
        for (key, members) in plan.updates.iter().chain(&plan.inserts) {
            match applied.iter_mut().find(|(k, _)| k == key) {
                Some(slot) => slot.1 = members.clone(),
                None => applied.push((*key, members.clone())),
            }
        }
        let again = split_upserts(&incoming, &to_set_docs(&applied));
        prop_assert!(again.inserts.is_empty());
        for (key, members) in &again.updates {
            let (_, stored) = applied.iter().find(|(k, _)| k == key).unwrap();
            prop_assert_eq!(members, stored);
        }
    }
}

// ---------------------------------------------------------------------------
// Visualization bound
// ---------------------------------------------------------------------------

fn node(class_id: i64) -> Node {
    Node {
        id: class_id,
        class_id,
        package: "io.app".to_string(),
        class: format!("C{class_id}"),
        method: "m".to_string(),
        params: String::new(),
        kind: NodeType::Source,
        file: String::new(),
        calls_reflection: false,
        scope: Scope::new("acct", "", ""),
        vcs: VcsInfo::new("repo", "main", "sha"),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn vis_walk_respects_limit(
        edges in prop::collection::btree_map(0i64..20, prop::collection::vec(0i64..20, 0..5), 1..20),
        limit in 1i64..12,
    ) {
        let store = GraphStore::from_connection(initialize_database(":memory:").unwrap());
        let nodes: Vec<Node> = (0..20).map(node).collect();
        store.insert_nodes(&nodes, "t0").unwrap();
        let docs: Vec<(i64, Vec<i64>)> = edges.into_iter().collect();
        store
            .insert_set_docs(SetCollection::VisEdges, &to_set_docs(&docs), "t0")
            .unwrap();

        let ctx = RequestContext::default();
        let config = VisualizationConfig::default();
        let resp = VisGraphBuilder::new(&store, &ctx, &config)
            .build(&GetVgReq {
                account_id: "acct".to_string(),
                repo: "repo".to_string(),
                target_branch: "main".to_string(),
                class: "io.app.C0".to_string(),
                limit,
                ..Default::default()
            })
            .unwrap();

        prop_assert!(resp.nodes.len() as i64 <= limit);
        prop_assert!(resp.edges.len() as i64 <= limit);
        prop_assert_eq!(resp.nodes.iter().filter(|n| n.root).count(), 1);
        prop_assert!(resp.nodes.iter().any(|n| n.root && n.class == "C0"));
        let ids: HashSet<i64> = resp.nodes.iter().map(|n| n.id).collect();
        prop_assert_eq!(ids.len(), resp.nodes.len(), "no duplicate nodes");
    }
}
