//! Branch merge: reconcile a merged commit's partial graph into the target
//! branch.
//!
//! Three phases run in order: nodes, set documents (relations, then vis
//! edges), and the delete cascade for files removed in the change. Each
//! phase is derived from set differences over what is currently stored, so
//! re-running a merge after a failure converges to the same end state.
//! Progress of completed phases is not rolled back.

use std::collections::{BTreeSet, HashSet};

use crate::context::RequestContext;
use crate::error::{Result, TiError};
use crate::graph::setops::{strip_members, union_docs, MergePlan};
use crate::graph::store::{Filter, GraphStore, SetCollection};
use crate::naming::{parse_file, FileKind};
use crate::types::{MergePartialCgRequest, TestClass};

pub struct BranchMerger<'a> {
    store: &'a GraphStore,
    ctx: &'a RequestContext,
}

/// Identity of files deleted by the merged change.
#[derive(Debug, Default)]
struct DeletedFiles {
    classes: Vec<TestClass>,
    resources: Vec<String>,
}

impl<'a> BranchMerger<'a> {
    pub fn new(store: &'a GraphStore, ctx: &'a RequestContext) -> Self {
        Self { store, ctx }
    }

    pub fn merge(&self, req: &MergePartialCgRequest) -> Result<()> {
        let sha = req.diff.sha.as_str();
        let wrap = |err: TiError, msg: &str| {
            TiError::store(err, msg, &req.repo, &req.target_branch, sha)
        };

        self.merge_nodes(req)
            .map_err(|e| wrap(e, "failed to merge nodes"))?;
        self.merge_sets(SetCollection::Relations, req)
            .map_err(|e| wrap(e, "failed to merge relations"))?;
        self.merge_sets(SetCollection::VisEdges, req)
            .map_err(|e| wrap(e, "failed to merge vis edges"))?;
        self.delete_removed_files(req)
            .map_err(|e| wrap(e, "failed to delete nodes of removed files"))?;

        tracing::info!(
            repo = %req.repo,
            branch = %req.target_branch,
            commit = sha,
            "merged partial callgraph"
        );
        Ok(())
    }

    fn dest<'r>(&self, req: &'r MergePartialCgRequest) -> Filter<'r> {
        Filter::new(&req.account_id, &req.repo).branch(&req.target_branch)
    }

    /// Rows of the merging commit that have not reached the target yet.
    fn source<'r>(&self, req: &'r MergePartialCgRequest) -> Filter<'r> {
        Filter::new(&req.account_id, &req.repo)
            .commit(&req.diff.sha)
            .not_branch(&req.target_branch)
    }

    /// Move ids unique to the merging commit; drop the rest, since the
    /// destination copy is authoritative.
    fn merge_nodes(&self, req: &MergePartialCgRequest) -> Result<()> {
        let (dest, source) = (self.dest(req), self.source(req));

        self.ctx.check("fetch destination node ids")?;
        let dest_ids = self.store.node_ids(&dest)?;
        self.ctx.check("fetch source node ids")?;
        let source_ids = self.store.node_ids(&source)?;
        let plan = MergePlan::new(&source_ids, &dest_ids);

        self.ctx.check("move nodes")?;
        let moved = self
            .store
            .move_nodes(&source, &plan.to_move, &req.target_branch, &self.ctx.timestamp())?;
        self.ctx.check("delete duplicate nodes")?;
        let deleted = self.store.delete_nodes(&source)?;

        tracing::info!(
            moved,
            deleted,
            duplicates = plan.to_union.len(),
            branch = %req.target_branch,
            "merged nodes"
        );
        Ok(())
    }

    /// Move keys unique to the merging commit, union members of keys both
    /// sides hold into the destination document, then drop the source copies.
    fn merge_sets(&self, coll: SetCollection, req: &MergePartialCgRequest) -> Result<()> {
        let (dest, source) = (self.dest(req), self.source(req));

        self.ctx.check("fetch destination keys")?;
        let dest_keys = self.store.set_keys(coll, &dest)?;
        self.ctx.check("fetch source keys")?;
        let source_keys = self.store.set_keys(coll, &source)?;
        let plan = MergePlan::new(&source_keys, &dest_keys);
        let now = self.ctx.timestamp();

        let mut unioned = 0;
        if !plan.to_union.is_empty() {
            self.ctx.check("fetch documents to union")?;
            let dest_docs = self.store.find_set_docs(coll, &dest, Some(plan.to_union.as_slice()))?;
            let source_docs = self.store.find_set_docs(coll, &source, Some(plan.to_union.as_slice()))?;
            let updates = union_docs(&dest_docs, &source_docs);
            self.ctx.check("update unioned documents")?;
            unioned = self.store.overwrite_members(coll, &dest, &updates, &now)?;
        }

        self.ctx.check("move set documents")?;
        let moved = self
            .store
            .move_set_docs(coll, &source, &plan.to_move, &req.target_branch, &now)?;
        self.ctx.check("delete merged set documents")?;
        let deleted = self.store.delete_set_docs(coll, &source)?;

        tracing::info!(%coll, moved, unioned, deleted, branch = %req.target_branch, "merged set documents");
        Ok(())
    }

    fn deleted_files(req: &MergePartialCgRequest) -> DeletedFiles {
        let mut out = DeletedFiles::default();
        let mut seen = HashSet::new();
        for file in req.diff.files.iter().filter(|f| f.is_deleted()) {
            let node = parse_file(&file.name);
            match node.kind {
                FileKind::Source | FileKind::Test => {
                    let class = TestClass::new(&node.pkg, &node.class);
                    if seen.insert(class.clone()) {
                        out.classes.push(class);
                    }
                }
                FileKind::Resource => out.resources.push(node.file),
                FileKind::Unsupported => {
                    tracing::debug!(file = %file.name, "ignoring unsupported deleted file");
                }
            }
        }
        out
    }

    /// Remove every target-branch node of a deleted file, the relations it
    /// is the source of, and its id from every remaining member set.
    fn delete_removed_files(&self, req: &MergePartialCgRequest) -> Result<()> {
        let deleted = Self::deleted_files(req);
        if deleted.classes.is_empty() && deleted.resources.is_empty() {
            return Ok(());
        }
        let dest = self.dest(req);

        self.ctx.check("find nodes of deleted files")?;
        let mut nodes = self.store.find_nodes_by_classes(&dest, &deleted.classes, None)?;
        nodes.extend(self.store.find_resources_by_files(&dest, &deleted.resources)?);
        if nodes.is_empty() {
            tracing::warn!(
                files = deleted.classes.len() + deleted.resources.len(),
                branch = %req.target_branch,
                "no nodes found for deleted files"
            );
            return Ok(());
        }

        let ids: Vec<i64> = nodes.iter().map(|n| n.id).collect::<BTreeSet<_>>().into_iter().collect();
        let class_ids: Vec<i64> = nodes
            .iter()
            .filter(|n| n.class_id != 0)
            .map(|n| n.class_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let now = self.ctx.timestamp();

        self.ctx.check("delete nodes")?;
        let deleted_nodes = self.store.delete_nodes_by_ids(&dest, &ids)?;
        self.ctx.check("delete relations")?;
        let deleted_relations =
            self.store
                .delete_set_docs_by_keys(SetCollection::Relations, &dest, &ids)?;
        let stripped_relations = self.pull(SetCollection::Relations, &dest, &ids, &now)?;

        self.ctx.check("delete vis edges")?;
        let deleted_vis =
            self.store
                .delete_set_docs_by_keys(SetCollection::VisEdges, &dest, &class_ids)?;
        let stripped_vis = self.pull(SetCollection::VisEdges, &dest, &class_ids, &now)?;

        tracing::info!(
            deleted_nodes,
            deleted_relations,
            stripped_relations,
            deleted_vis,
            stripped_vis,
            branch = %req.target_branch,
            "removed deleted files from callgraph"
        );
        Ok(())
    }

    fn pull(&self, coll: SetCollection, dest: &Filter<'_>, ids: &[i64], now: &str) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        self.ctx.check("find documents referencing deleted ids")?;
        let docs = self.store.find_set_docs_containing(coll, dest, ids)?;
        let removed: HashSet<i64> = ids.iter().copied().collect();
        let updates = strip_members(&docs, &removed);
        self.ctx.check("pull deleted ids")?;
        self.store.overwrite_members(coll, dest, &updates, now)
    }
}
