//! Test selection: decide which tests a change set must run.
//!
//! Changed files are classified with the naming convention. Test files are
//! scheduled directly, source and resource files are resolved to the tests
//! that exercise them through the stored relations. Any ambiguity falls
//! back to running the whole suite.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::config::schema::SelectionConfig;
use crate::context::RequestContext;
use crate::error::{Result, TiError};
use crate::graph::store::{Filter, GraphStore, SetCollection};
use crate::naming::{parse_file, FileKind};
use crate::types::{ChangedFile, NodeType, RunnableTest, SelectTestsReq, SelectTestsResp, Selection, TestClass};

// ---------------------------------------------------------------------------
// Ignore globs
// ---------------------------------------------------------------------------

/// Compile ignore patterns. An unparsable pattern is an input error.
pub fn compile_ignore<'p, I>(patterns: I) -> Result<GlobSet>
where
    I: IntoIterator<Item = &'p String>,
{
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| {
            TiError::InvalidInput(format!("invalid ignore glob '{pattern}': {e}"))
        })?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| TiError::InvalidInput(format!("invalid ignore globs: {e}")))
}

// ---------------------------------------------------------------------------
// Inventory
// ---------------------------------------------------------------------------

/// Tests known on the target branch.
#[derive(Debug, Default)]
struct Inventory {
    methods: BTreeMap<TestClass, Vec<String>>,
    reflection: BTreeSet<TestClass>,
    total: usize,
}

impl Inventory {
    fn methods(&self, class: &TestClass) -> Option<&[String]> {
        self.methods.get(class).map(Vec::as_slice)
    }
}

/// What the classification pass queued for a graph lookup.
#[derive(Debug, Default)]
struct Lookup {
    classes: Vec<TestClass>,
    resources: Vec<String>,
}

// ---------------------------------------------------------------------------
// TestSelector
// ---------------------------------------------------------------------------

pub struct TestSelector<'a> {
    store: &'a GraphStore,
    ctx: &'a RequestContext,
    config: &'a SelectionConfig,
    enable_reflection: bool,
}

impl<'a> TestSelector<'a> {
    pub fn new(store: &'a GraphStore, ctx: &'a RequestContext, config: &'a SelectionConfig) -> Self {
        Self {
            store,
            ctx,
            config,
            enable_reflection: config.enable_reflection,
        }
    }

    /// Per-call reflection switch; `None` keeps the configured default.
    pub fn with_reflection(mut self, enabled: Option<bool>) -> Self {
        if let Some(enabled) = enabled {
            self.enable_reflection = enabled;
        }
        self
    }

    pub fn select(&self, req: &SelectTestsReq, account: &str) -> Result<SelectTestsResp> {
        let ignore = compile_ignore(req.ti_config.config.ignore.iter().chain(&self.config.ignore))?;

        // Ignored or not, a deleted test no longer exists.
        let deleted_tests: HashSet<TestClass> = req
            .files
            .iter()
            .filter(|f| f.is_deleted())
            .map(|f| parse_file(&f.name))
            .filter(|n| n.is_test())
            .map(|n| TestClass::new(&n.pkg, &n.class))
            .collect();
        let files: Vec<&ChangedFile> = req
            .files
            .iter()
            .filter(|f| !ignore.is_match(&f.name))
            .collect();

        let target = Filter::new(account, &req.repo).branch(&req.target_branch);
        let inventory = self
            .inventory(&target)
            .map_err(|e| TiError::store(e, "failed to fetch test inventory", &req.repo, &req.target_branch, ""))?;

        if req.select_all || inventory.total == 0 {
            tracing::info!(
                repo = %req.repo,
                branch = %req.target_branch,
                total = inventory.total,
                requested = req.select_all,
                "selecting all tests"
            );
            return Ok(select_all(inventory.total, 0));
        }

        let mut tests: Vec<RunnableTest> = Vec::new();
        let mut selected: HashSet<TestClass> = HashSet::new();
        let mut lookup = Lookup::default();
        let (mut new_tests, mut updated_tests) = (0, 0);

        for file in &files {
            let node = parse_file(&file.name);
            match node.kind {
                FileKind::Unsupported => {
                    tracing::info!(file = %file.name, "unsupported file, selecting all tests");
                    return Ok(select_all(inventory.total, updated_tests));
                }
                FileKind::Test => {
                    let class = TestClass::new(&node.pkg, &node.class);
                    if file.is_deleted() || deleted_tests.contains(&class) {
                        continue;
                    }
                    // Test classes can host helpers other tests call.
                    lookup.classes.push(class.clone());
                    if !selected.insert(class.clone()) {
                        continue;
                    }
                    match inventory.methods(&class) {
                        None => {
                            tests.push(RunnableTest::new(&class.pkg, &class.class, "*", Selection::SelectNewTest));
                            new_tests += 1;
                        }
                        Some(methods) => {
                            for m in methods {
                                tests.push(RunnableTest::new(&class.pkg, &class.class, m, Selection::SelectUpdatedTest));
                            }
                            updated_tests += methods.len();
                        }
                    }
                }
                FileKind::Source => {
                    if !file.is_deleted() {
                        lookup.classes.push(TestClass::new(&node.pkg, &node.class));
                    }
                }
                FileKind::Resource => {
                    if !file.is_deleted() {
                        lookup.resources.push(node.file);
                    }
                }
            }
        }

        match self.query_helper(&target, &lookup) {
            Ok(Some(hits)) => {
                for class in hits {
                    if deleted_tests.contains(&class) || selected.contains(&class) {
                        continue;
                    }
                    let Some(methods) = inventory.methods(&class) else {
                        tracing::warn!(test = %class, "test reached through relations is not in the inventory");
                        continue;
                    };
                    selected.insert(class.clone());
                    for m in methods {
                        tests.push(RunnableTest::new(&class.pkg, &class.class, m, Selection::SelectSourceCode));
                    }
                }
            }
            Ok(None) => {
                tracing::info!("changed resource unknown to the callgraph, selecting all tests");
                return Ok(select_all(inventory.total, updated_tests));
            }
            Err(err @ TiError::Cancelled { .. }) => return Err(err),
            Err(err) => {
                tracing::warn!(error = %err, repo = %req.repo, "graph lookup failed, selecting all tests");
                return Ok(select_all(inventory.total, updated_tests));
            }
        }

        if self.enable_reflection {
            for class in &inventory.reflection {
                if deleted_tests.contains(class) || !selected.insert(class.clone()) {
                    continue;
                }
                for m in inventory.methods(class).unwrap_or_default() {
                    tests.push(RunnableTest::new(&class.pkg, &class.class, m, Selection::SelectSourceCode));
                }
            }
        }

        let selected_tests = tests.len() - new_tests;
        let resp = SelectTestsResp {
            select_all: false,
            total_tests: inventory.total,
            selected_tests,
            src_code_tests: selected_tests - updated_tests,
            updated_tests,
            new_tests,
            tests,
        };
        tracing::info!(
            repo = %req.repo,
            branch = %req.target_branch,
            total = resp.total_tests,
            selected = resp.selected_tests,
            src_code = resp.src_code_tests,
            updated = resp.updated_tests,
            new = resp.new_tests,
            "selected tests"
        );
        Ok(resp)
    }

    fn inventory(&self, target: &Filter<'_>) -> Result<Inventory> {
        self.ctx.check("fetch test inventory")?;
        let nodes = self.store.find_nodes(target, Some(NodeType::Test))?;

        let mut seen_ids = HashSet::new();
        let mut methods: BTreeMap<TestClass, BTreeSet<String>> = BTreeMap::new();
        let mut reflection = BTreeSet::new();
        for node in nodes {
            if !seen_ids.insert(node.id) {
                continue;
            }
            let class = TestClass::new(&node.package, &node.class);
            if !class.is_valid() {
                continue;
            }
            if node.calls_reflection {
                reflection.insert(class.clone());
            }
            methods.entry(class).or_default().insert(node.method);
        }

        let total = methods.values().map(BTreeSet::len).sum();
        Ok(Inventory {
            methods: methods
                .into_iter()
                .map(|(k, v)| (k, v.into_iter().collect()))
                .collect(),
            reflection,
            total,
        })
    }

    /// Tests reachable from the queued classes and resources. `None` means
    /// a changed resource is unknown, so nothing narrower is provably safe.
    fn query_helper(&self, target: &Filter<'_>, lookup: &Lookup) -> Result<Option<Vec<TestClass>>> {
        if lookup.classes.is_empty() && lookup.resources.is_empty() {
            return Ok(Some(Vec::new()));
        }

        self.ctx.check("find changed nodes")?;
        let mut ids: BTreeSet<i64> = self
            .store
            .find_nodes_by_classes(target, &lookup.classes, Some(NodeType::Source))?
            .into_iter()
            .map(|n| n.id)
            .collect();

        if !lookup.resources.is_empty() {
            let wanted: BTreeSet<&String> = lookup.resources.iter().collect();
            let wanted_files: Vec<String> = wanted.iter().map(|f| (*f).clone()).collect();
            self.ctx.check("find changed resources")?;
            let found = self.store.find_resources_by_files(target, &wanted_files)?;
            let found_files: BTreeSet<&str> = found.iter().map(|n| n.file.as_str()).collect();
            if found_files.len() < wanted.len() {
                return Ok(None);
            }
            ids.extend(found.iter().map(|n| n.id));
        }

        if ids.is_empty() {
            tracing::warn!(classes = lookup.classes.len(), "no nodes found for changed files");
            return Ok(Some(Vec::new()));
        }

        let ids: Vec<i64> = ids.into_iter().collect();
        self.ctx.check("find relations")?;
        let test_ids: Vec<i64> = self
            .store
            .find_set_docs(SetCollection::Relations, target, Some(ids.as_slice()))?
            .into_iter()
            .flat_map(|d| d.members)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if test_ids.is_empty() {
            return Ok(Some(Vec::new()));
        }

        self.ctx.check("find tests")?;
        let tests = self.store.find_nodes_by_ids(target, &test_ids, Some(NodeType::Test))?;
        let found: HashSet<i64> = tests.iter().map(|n| n.id).collect();
        if found.len() < test_ids.len() {
            tracing::warn!(
                expected = test_ids.len(),
                found = found.len(),
                "expected test ids missing from the inventory"
            );
        }

        let mut seen = HashSet::new();
        Ok(Some(
            tests
                .into_iter()
                .map(|n| TestClass::new(&n.package, &n.class))
                .filter(|c| seen.insert(c.clone()))
                .collect(),
        ))
    }
}

/// The "run everything" response.
fn select_all(total: usize, updated: usize) -> SelectTestsResp {
    SelectTestsResp {
        select_all: true,
        total_tests: total,
        selected_tests: total,
        src_code_tests: total.saturating_sub(updated),
        updated_tests: updated,
        new_tests: 0,
        tests: Vec::new(),
    }
}
