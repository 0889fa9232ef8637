//! Partial call-graph ingestion for one commit of one branch.

use std::collections::HashSet;

use crate::callgraph::Callgraph;
use crate::context::RequestContext;
use crate::db::converters::SetDoc;
use crate::error::{Result, TiError};
use crate::graph::setops::split_upserts;
use crate::graph::store::{Filter, GraphStore, SetCollection};
use crate::types::{Node, NodeType, Scope, SelectTestsResp, VcsInfo};

/// Writes a partial call graph into the store.
///
/// At most one commit's worth of partial data exists per branch after an
/// upload: records from other commits of the same branch are purged first.
/// The fetch-then-write windows are not isolated from concurrent writers to
/// the same branch; callers serialize uploads per branch.
pub struct PartialUploader<'a> {
    store: &'a GraphStore,
    ctx: &'a RequestContext,
}

impl<'a> PartialUploader<'a> {
    pub fn new(store: &'a GraphStore, ctx: &'a RequestContext) -> Self {
        Self { store, ctx }
    }

    /// Upload `cg` under `scope`/`vcs`. Returns the new-test summary
    /// computed against `target_branch`.
    pub fn upload(
        &self,
        cg: &Callgraph,
        vcs: &VcsInfo,
        scope: &Scope,
        target_branch: &str,
    ) -> Result<SelectTestsResp> {
        if cg.is_empty() && cg.vis_relations.is_empty() {
            tracing::info!(
                repo = %vcs.repo,
                branch = %vcs.branch,
                commit = %vcs.commit_id,
                "empty partial callgraph, nothing to upload"
            );
            return Ok(SelectTestsResp::default());
        }

        let wrap = |err: TiError, msg: &str| {
            TiError::store(err, msg, &vcs.repo, &vcs.branch, &vcs.commit_id)
        };

        let resp = self
            .count_new_tests(cg, vcs, scope, target_branch)
            .map_err(|e| wrap(e, "failed to count new tests"))?;
        self.purge_stale(vcs, scope)
            .map_err(|e| wrap(e, "failed to delete stale partial callgraph"))?;
        self.upsert_nodes(cg, vcs, scope)
            .map_err(|e| wrap(e, "failed to upsert nodes"))?;

        let relations: Vec<(i64, Vec<i64>)> = cg
            .relations
            .iter()
            .map(|r| (r.source, r.tests.clone()))
            .collect();
        self.upsert_sets(SetCollection::Relations, &relations, vcs, scope)
            .map_err(|e| wrap(e, "failed to upsert relations"))?;

        let vis: Vec<(i64, Vec<i64>)> = cg
            .vis_relations
            .iter()
            .map(|v| (v.caller, v.callees.clone()))
            .collect();
        self.upsert_sets(SetCollection::VisEdges, &vis, vcs, scope)
            .map_err(|e| wrap(e, "failed to upsert vis edges"))?;

        Ok(resp)
    }

    /// Incoming test methods the target branch has never seen.
    fn count_new_tests(
        &self,
        cg: &Callgraph,
        vcs: &VcsInfo,
        scope: &Scope,
        target_branch: &str,
    ) -> Result<SelectTestsResp> {
        self.ctx.check("fetch target branch tests")?;
        let known: HashSet<(String, String, String)> = self
            .store
            .find_nodes(
                &Filter::new(&scope.account, &vcs.repo).branch(target_branch),
                Some(NodeType::Test),
            )?
            .into_iter()
            .map(|n| (n.package, n.class, n.method))
            .collect();

        let mut seen = HashSet::new();
        let mut new_tests = 0;
        for node in cg.test_nodes() {
            let key = (node.package.clone(), node.class.clone(), node.method.clone());
            if !known.contains(&key) && seen.insert(key) {
                new_tests += 1;
            }
        }
        tracing::debug!(new_tests, known = known.len(), "counted new tests");
        Ok(SelectTestsResp {
            new_tests,
            total_tests: new_tests,
            ..Default::default()
        })
    }

    fn purge_stale(&self, vcs: &VcsInfo, scope: &Scope) -> Result<()> {
        let stale = Filter::new(&scope.account, &vcs.repo)
            .branch(&vcs.branch)
            .not_commit(&vcs.commit_id);

        self.ctx.check("delete stale nodes")?;
        let nodes = self.store.delete_nodes(&stale)?;
        self.ctx.check("delete stale relations")?;
        let relations = self.store.delete_set_docs(SetCollection::Relations, &stale)?;
        self.ctx.check("delete stale vis edges")?;
        let vis_edges = self.store.delete_set_docs(SetCollection::VisEdges, &stale)?;

        tracing::info!(
            repo = %vcs.repo,
            branch = %vcs.branch,
            nodes,
            relations,
            vis_edges,
            "deleted partial callgraph of earlier commits"
        );
        Ok(())
    }

    /// Insert nodes whose id is not yet stored for this branch and commit.
    /// A colliding id is a replay and is dropped, never overwritten.
    fn upsert_nodes(&self, cg: &Callgraph, vcs: &VcsInfo, scope: &Scope) -> Result<()> {
        self.ctx.check("fetch existing nodes")?;
        let here = Filter::new(&scope.account, &vcs.repo)
            .branch(&vcs.branch)
            .commit(&vcs.commit_id);
        let mut present = self.store.node_ids(&here)?;

        let fresh: Vec<Node> = cg
            .nodes
            .iter()
            .filter(|n| present.insert(n.id))
            .map(|n| Node {
                id: n.id,
                class_id: n.class_id,
                package: n.package.clone(),
                class: n.class.clone(),
                method: n.method.clone(),
                params: n.params.clone(),
                kind: n.kind,
                file: n.file.clone(),
                calls_reflection: n.calls_reflection,
                scope: scope.clone(),
                vcs: vcs.clone(),
            })
            .collect();

        self.ctx.check("insert nodes")?;
        let inserted = self.store.insert_nodes(&fresh, &self.ctx.timestamp())?;
        tracing::info!(
            inserted,
            skipped = cg.nodes.len() - inserted,
            commit = %vcs.commit_id,
            "upserted nodes"
        );
        Ok(())
    }

    /// Insert unknown keys; union members into keys already stored for this
    /// branch and commit.
    fn upsert_sets(
        &self,
        coll: SetCollection,
        incoming: &[(i64, Vec<i64>)],
        vcs: &VcsInfo,
        scope: &Scope,
    ) -> Result<()> {
        if incoming.is_empty() {
            return Ok(());
        }
        let here = Filter::new(&scope.account, &vcs.repo)
            .branch(&vcs.branch)
            .commit(&vcs.commit_id);

        self.ctx.check("fetch existing set documents")?;
        let keys: Vec<i64> = incoming.iter().map(|(k, _)| *k).collect();
        let existing = self.store.find_set_docs(coll, &here, Some(keys.as_slice()))?;
        let plan = split_upserts(incoming, &existing);

        let now = self.ctx.timestamp();
        let docs: Vec<SetDoc> = plan
            .inserts
            .into_iter()
            .map(|(key, members)| SetDoc {
                key,
                members,
                scope: scope.clone(),
                vcs: vcs.clone(),
            })
            .collect();

        self.ctx.check("insert set documents")?;
        let inserted = self.store.insert_set_docs(coll, &docs, &now)?;
        self.ctx.check("update set documents")?;
        let updated = self.store.overwrite_members(coll, &here, &plan.updates, &now)?;
        tracing::info!(%coll, inserted, updated, commit = %vcs.commit_id, "upserted set documents");
        Ok(())
    }
}
