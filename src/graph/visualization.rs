//! Bounded breadth-first expansion over `vis_edges` for impact graphs.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use crate::config::VisualizationConfig;
use crate::context::RequestContext;
use crate::error::{Result, TiError};
use crate::graph::store::{Filter, GraphStore, SetCollection};
use crate::naming::{parse_file, FileKind};
use crate::types::{GetVgReq, GetVgResp, Node, NodeType, TestClass, VisMapping, VisNode};

/// Split `pkg.Class` on the last dot.
pub fn parse_class_name(name: &str) -> Result<TestClass> {
    match name.rsplit_once('.') {
        Some((pkg, class)) if !pkg.is_empty() && !class.is_empty() => Ok(TestClass::new(pkg, class)),
        _ => Err(TiError::InvalidInput(format!(
            "class name '{name}' is not of the form package.Class"
        ))),
    }
}

/// Result of one BFS run, in visit order.
#[derive(Debug, Default)]
struct Traversal {
    visited: Vec<i64>,
    edges: Vec<VisMapping>,
}

/// Changed files in node identity terms.
#[derive(Debug, Default)]
struct DiffSet {
    classes: HashSet<TestClass>,
    resources: HashSet<String>,
}

impl DiffSet {
    fn contains(&self, node: &Node) -> bool {
        self.classes.contains(&TestClass::new(&node.package, &node.class))
            || (!node.file.is_empty() && self.resources.contains(&node.file))
    }
}

pub struct VisGraphBuilder<'a> {
    store: &'a GraphStore,
    ctx: &'a RequestContext,
    config: &'a VisualizationConfig,
}

impl<'a> VisGraphBuilder<'a> {
    pub fn new(store: &'a GraphStore, ctx: &'a RequestContext, config: &'a VisualizationConfig) -> Self {
        Self { store, ctx, config }
    }

    pub fn build(&self, req: &GetVgReq) -> Result<GetVgResp> {
        let limit = self.config.effective_limit(req.limit);
        let diff = diff_set(req);

        if req.class.is_empty() {
            return self.build_random(req, limit, &diff);
        }

        let class = parse_class_name(&req.class)?;
        let (branch, roots) = self.resolve_roots(req, &class)?;
        let filter = Filter::new(&req.account_id, &req.repo).branch(branch);

        let start: Vec<i64> = roots.iter().map(|n| n.class_id).collect::<BTreeSet<_>>().into_iter().collect();
        let traversal = self.bfs(&filter, &start, VecDeque::new(), limit)?;
        let mut resp = self.format(&filter, &traversal, &start, &diff)?;
        match self.append_direct_diff_links(&filter, &mut resp, &roots, &diff, limit) {
            Ok(()) => {}
            Err(err @ TiError::Cancelled { .. }) => return Err(err),
            Err(err) => {
                tracing::warn!(error = %err, class = %req.class, branch, "could not link changed files to the test");
            }
        }

        tracing::info!(
            class = %req.class,
            branch,
            nodes = resp.nodes.len(),
            edges = resp.edges.len(),
            "built visualization graph"
        );
        Ok(resp)
    }

    /// Prefer the source branch when it holds the requested class.
    fn resolve_roots<'r>(&self, req: &'r GetVgReq, class: &TestClass) -> Result<(&'r str, Vec<Node>)> {
        let candidates = [req.source_branch.as_str(), req.target_branch.as_str()];
        for branch in candidates.into_iter().filter(|b| !b.is_empty()) {
            self.ctx.check("find visualization root")?;
            let filter = Filter::new(&req.account_id, &req.repo).branch(branch);
            let nodes = self
                .store
                .find_nodes_by_classes(&filter, std::slice::from_ref(class), None)?;
            if !nodes.is_empty() {
                return Ok((branch, nodes));
            }
        }
        Err(TiError::NotFound(format!("could not find an entry for {class}")))
    }

    /// Whole-graph view: seed from the first `limit` target-branch nodes.
    /// The first is the root; the rest restart the BFS when its queue drains.
    fn build_random(&self, req: &GetVgReq, limit: usize, diff: &DiffSet) -> Result<GetVgResp> {
        let filter = Filter::new(&req.account_id, &req.repo).branch(&req.target_branch);
        self.ctx.check("fetch seed nodes")?;
        let seeds = self.store.first_nodes(&filter, limit)?;
        let Some(first) = seeds.first() else {
            return Ok(GetVgResp::default());
        };
        let start = vec![first.class_id];
        let extra: VecDeque<i64> = seeds.iter().skip(1).map(|n| n.class_id).collect();
        let traversal = self.bfs(&filter, &start, extra, limit)?;
        self.format(&filter, &traversal, &start, diff)
    }

    fn bfs(&self, filter: &Filter<'_>, start: &[i64], mut extra: VecDeque<i64>, limit: usize) -> Result<Traversal> {
        let mut out = Traversal::default();
        let mut seen: HashSet<i64> = start.iter().copied().collect();
        let mut queue: VecDeque<i64> = start.iter().copied().collect();

        while out.visited.len() < limit {
            if queue.is_empty() {
                match extra.pop_front() {
                    Some(id) if seen.insert(id) => queue.push_back(id),
                    Some(_) => continue,
                    None => break,
                }
            }
            let Some(current) = queue.pop_front() else {
                break;
            };
            out.visited.push(current);

            self.ctx.check("fetch vis edge")?;
            let callees: Vec<i64> = self
                .store
                .find_set_docs(SetCollection::VisEdges, filter, Some(std::slice::from_ref(&current)))?
                .into_iter()
                .flat_map(|d| d.members)
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            if callees.is_empty() {
                continue;
            }
            for callee in &callees {
                if seen.insert(*callee) {
                    queue.push_back(*callee);
                }
            }
            out.edges.push(VisMapping {
                from: current,
                to: callees,
            });
        }
        Ok(out)
    }

    /// Turn visited class ids into nodes (one per class id) and keep only
    /// edges between emitted nodes.
    fn format(
        &self,
        filter: &Filter<'_>,
        traversal: &Traversal,
        roots: &[i64],
        diff: &DiffSet,
    ) -> Result<GetVgResp> {
        self.ctx.check("fetch visited nodes")?;
        let nodes = self.store.find_nodes_by_class_ids(filter, &traversal.visited)?;
        let mut by_class: HashMap<i64, &Node> = HashMap::new();
        for node in &nodes {
            by_class.entry(node.class_id).or_insert(node);
        }

        let mut resp = GetVgResp::default();
        let mut emitted = HashSet::new();
        for class_id in &traversal.visited {
            let Some(node) = by_class.get(class_id) else {
                continue;
            };
            if !emitted.insert(*class_id) {
                continue;
            }
            let mut vis = VisNode::from_node(node, diff.contains(node));
            vis.root = roots.contains(class_id);
            resp.nodes.push(vis);
        }

        for edge in &traversal.edges {
            if !emitted.contains(&edge.from) {
                continue;
            }
            let to: Vec<i64> = edge.to.iter().copied().filter(|id| emitted.contains(id)).collect();
            if !to.is_empty() {
                resp.edges.push(VisMapping { from: edge.from, to });
            }
        }
        Ok(resp)
    }

    /// Changed source classes and resources whose relations list one of the
    /// root's test nodes led to this test being run. They are shown as
    /// important even when the walk did not reach them, while the node
    /// budget allows.
    fn append_direct_diff_links(
        &self,
        filter: &Filter<'_>,
        resp: &mut GetVgResp,
        roots: &[Node],
        diff: &DiffSet,
        limit: usize,
    ) -> Result<()> {
        if (diff.classes.is_empty() && diff.resources.is_empty()) || resp.nodes.len() >= limit {
            return Ok(());
        }

        self.ctx.check("find diff nodes")?;
        let classes: Vec<TestClass> = diff.classes.iter().cloned().collect();
        let mut diff_nodes = self
            .store
            .find_nodes_by_classes(filter, &classes, Some(NodeType::Source))?;
        if !diff.resources.is_empty() {
            let files: Vec<String> = diff.resources.iter().cloned().collect();
            self.ctx.check("find diff resources")?;
            diff_nodes.extend(self.store.find_resources_by_files(filter, &files)?);
        }
        if diff_nodes.is_empty() {
            return Ok(());
        }

        let test_ids: HashSet<i64> = roots.iter().map(|n| n.id).collect();
        let source_ids: Vec<i64> = diff_nodes
            .iter()
            .map(|n| n.id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        self.ctx.check("find diff relations")?;
        let linked: HashSet<i64> = self
            .store
            .find_set_docs(SetCollection::Relations, filter, Some(source_ids.as_slice()))?
            .into_iter()
            .filter(|doc| doc.members.iter().any(|t| test_ids.contains(t)))
            .map(|doc| doc.key)
            .collect();

        let mut present: HashSet<i64> = resp.nodes.iter().map(|n| n.id).collect();
        for node in diff_nodes.iter().filter(|n| linked.contains(&n.id)) {
            if resp.nodes.len() >= limit {
                break;
            }
            if present.insert(node.class_id) {
                resp.nodes.push(VisNode::from_node(node, true));
            }
        }
        Ok(())
    }
}

fn diff_set(req: &GetVgReq) -> DiffSet {
    let mut out = DiffSet::default();
    for file in &req.diff_files {
        let node = parse_file(&file.name);
        match node.kind {
            FileKind::Source | FileKind::Test => {
                out.classes.insert(TestClass::new(&node.pkg, &node.class));
            }
            FileKind::Resource => {
                out.resources.insert(node.file);
            }
            FileKind::Unsupported => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::converters::SetDoc;
    use crate::db::schema::initialize_database;
    use crate::types::{ChangedFile, FileStatus, Scope, VcsInfo};
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    const ACCT: &str = "acct";
    const REPO: &str = "github.com/acme/app";
    const NOW: &str = "2024-03-01T12:00:00.000Z";

    fn setup() -> (GraphStore, RequestContext) {
        let conn = initialize_database(":memory:").expect("schema init should succeed on :memory:");
        (GraphStore::from_connection(conn), RequestContext::default())
    }

    fn node(class_id: i64, class: &str, kind: NodeType, branch: &str) -> Node {
        Node {
            id: class_id * 10,
            class_id,
            package: "io.app".to_string(),
            class: class.to_string(),
            method: "m".to_string(),
            params: String::new(),
            kind,
            file: String::new(),
            calls_reflection: false,
            scope: Scope::new(ACCT, "", ""),
            vcs: VcsInfo::new(REPO, branch, "c0"),
        }
    }

    fn edge(caller: i64, callees: &[i64], branch: &str) -> SetDoc {
        SetDoc {
            key: caller,
            members: callees.to_vec(),
            scope: Scope::new(ACCT, "", ""),
            vcs: VcsInfo::new(REPO, branch, "c0"),
        }
    }

    /// Chain: FooTest(1) → Foo(2) → Bar(3) → Baz(4).
    fn seed_chain(store: &GraphStore, branch: &str) {
        store
            .insert_nodes(
                &[
                    node(1, "FooTest", NodeType::Test, branch),
                    node(2, "Foo", NodeType::Source, branch),
                    node(3, "Bar", NodeType::Source, branch),
                    node(4, "Baz", NodeType::Source, branch),
                ],
                NOW,
            )
            .unwrap();
        store
            .insert_set_docs(
                SetCollection::VisEdges,
                &[edge(1, &[2], branch), edge(2, &[3], branch), edge(3, &[4], branch)],
                NOW,
            )
            .unwrap();
    }

    fn req(class: &str, limit: i64) -> GetVgReq {
        GetVgReq {
            account_id: ACCT.to_string(),
            repo: REPO.to_string(),
            source_branch: "feature".to_string(),
            target_branch: "main".to_string(),
            class: class.to_string(),
            limit,
            diff_files: vec![],
        }
    }

    fn build(store: &GraphStore, ctx: &RequestContext, req: &GetVgReq) -> Result<GetVgResp> {
        let config = VisualizationConfig::default();
        VisGraphBuilder::new(store, ctx, &config).build(req)
    }

    #[test_case(1 ; "root only")]
    #[test_case(2 ; "two nodes")]
    #[test_case(3 ; "three nodes")]
    #[test_case(10 ; "whole chain")]
    fn bfs_respects_limit(limit: i64) {
        let (store, ctx) = setup();
        seed_chain(&store, "main");
        let resp = build(&store, &ctx, &req("io.app.FooTest", limit)).unwrap();
        assert!(resp.nodes.len() <= limit as usize);
        assert!(resp.edges.len() <= limit as usize);
        assert_eq!(resp.nodes.len(), (limit as usize).min(4));
        let roots: Vec<_> = resp.nodes.iter().filter(|n| n.root).collect();
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].class, "FooTest");
    }

    #[test]
    fn diff_nodes_are_important() {
        let (store, ctx) = setup();
        seed_chain(&store, "main");
        let mut r = req("io.app.FooTest", 10);
        r.diff_files = vec![ChangedFile::new("src/main/java/io/app/Bar.java", FileStatus::Modified)];
        let resp = build(&store, &ctx, &r).unwrap();
        let important: Vec<&str> = resp
            .nodes
            .iter()
            .filter(|n| n.important)
            .map(|n| n.class.as_str())
            .collect();
        assert_eq!(important, vec!["Bar"]);
        assert_eq!(
            resp.edges,
            vec![
                VisMapping { from: 1, to: vec![2] },
                VisMapping { from: 2, to: vec![3] },
                VisMapping { from: 3, to: vec![4] },
            ]
        );
    }

    #[test]
    fn source_branch_is_preferred() {
        let (store, ctx) = setup();
        seed_chain(&store, "main");
        store
            .insert_nodes(&[node(9, "FooTest", NodeType::Test, "feature")], NOW)
            .unwrap();
        let resp = build(&store, &ctx, &req("io.app.FooTest", 10)).unwrap();
        assert_eq!(resp.nodes.len(), 1);
        assert_eq!(resp.nodes[0].id, 9);
    }

    #[test]
    fn missing_class_is_not_found() {
        let (store, ctx) = setup();
        seed_chain(&store, "main");
        let err = build(&store, &ctx, &req("io.app.Nope", 10)).unwrap_err();
        assert!(matches!(err, TiError::NotFound(_)));
    }

    #[test_case("NoPackage" ; "no dot")]
    #[test_case("io.app." ; "trailing dot")]
    #[test_case(".Foo" ; "leading dot")]
    fn malformed_class_is_input_error(class: &str) {
        assert!(matches!(parse_class_name(class), Err(TiError::InvalidInput(_))));
    }

    #[test]
    fn empty_class_walks_whole_graph() {
        let (store, ctx) = setup();
        seed_chain(&store, "main");
        store
            .insert_nodes(&[node(7, "Island", NodeType::Source, "main")], NOW)
            .unwrap();
        let resp = build(&store, &ctx, &req("", 10)).unwrap();
        assert_eq!(resp.nodes.len(), 5, "BFS restarts from unvisited seeds");
        assert!(resp.nodes[0].root);
        assert_eq!(resp.nodes.iter().filter(|n| n.root).count(), 1);
    }

    fn relation(source: i64, tests: &[i64]) -> SetDoc {
        edge(source, tests, "main")
    }

    #[test]
    fn diff_class_linked_through_relations_is_appended() {
        let (store, ctx) = setup();
        seed_chain(&store, "main");
        // Ledger(60) is covered by FooTest(10) but has no vis edge at all.
        store
            .insert_nodes(&[node(6, "Ledger", NodeType::Source, "main")], NOW)
            .unwrap();
        store
            .insert_set_docs(SetCollection::Relations, &[relation(60, &[10])], NOW)
            .unwrap();
        let mut r = req("io.app.FooTest", 10);
        r.diff_files = vec![ChangedFile::new("src/main/java/io/app/Ledger.java", FileStatus::Modified)];
        let resp = build(&store, &ctx, &r).unwrap();

        let ledger = resp.nodes.iter().find(|n| n.class == "Ledger").unwrap();
        assert!(ledger.important);
        assert!(!ledger.root);
        assert_eq!(resp.nodes.len(), 5);

        // No room left: the limit wins.
        let mut tight = r.clone();
        tight.limit = 4;
        let resp = build(&store, &ctx, &tight).unwrap();
        assert_eq!(resp.nodes.len(), 4);
        assert!(resp.nodes.iter().all(|n| n.class != "Ledger"));
    }

    #[test]
    fn diff_class_covering_other_tests_is_not_appended() {
        let (store, ctx) = setup();
        seed_chain(&store, "main");
        store
            .insert_nodes(
                &[
                    node(6, "Ledger", NodeType::Source, "main"),
                    node(8, "LedgerTest", NodeType::Test, "main"),
                ],
                NOW,
            )
            .unwrap();
        store
            .insert_set_docs(SetCollection::Relations, &[relation(60, &[80])], NOW)
            .unwrap();
        let mut r = req("io.app.FooTest", 10);
        r.diff_files = vec![ChangedFile::new("src/main/java/io/app/Ledger.java", FileStatus::Modified)];
        let resp = build(&store, &ctx, &r).unwrap();
        assert!(resp.nodes.iter().all(|n| n.class != "Ledger"));
    }

    #[test]
    fn changed_resource_linked_to_test_is_appended() {
        let (store, ctx) = setup();
        seed_chain(&store, "main");
        let mut res = node(7, "", NodeType::Resource, "main");
        res.package = String::new();
        res.file = "app.yaml".to_string();
        store.insert_nodes(&[res], NOW).unwrap();
        store
            .insert_set_docs(SetCollection::Relations, &[relation(70, &[10])], NOW)
            .unwrap();
        let mut r = req("io.app.FooTest", 10);
        r.diff_files = vec![ChangedFile::new("src/main/resources/app.yaml", FileStatus::Modified)];
        let resp = build(&store, &ctx, &r).unwrap();
        let appended = resp.nodes.iter().find(|n| n.file == "app.yaml").unwrap();
        assert!(appended.important);
        assert_eq!(appended.id, 7);
    }
}
