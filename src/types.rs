//! Core domain types for the test intelligence engine.
//!
//! Persisted entities (`Node`, `Relation`, `VisEdge`), their scoping
//! (`Scope`, `VcsInfo`), and the request/response payloads of the four
//! public operations: upload, merge, select, and visualize.

use serde::{Deserialize, Serialize};

use crate::config::TiConfig;

// ---------------------------------------------------------------------------
// NodeType
// ---------------------------------------------------------------------------

/// Kind of unit a graph node stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    /// A production method or class-level unit.
    Source,
    /// A test method.
    Test,
    /// A non-code resource file (config, fixture, template...).
    Resource,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::Test => "test",
            Self::Resource => "resource",
        }
    }

    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "source" => Some(Self::Source),
            "test" => Some(Self::Test),
            "resource" => Some(Self::Resource),
            _ => None,
        }
    }
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Scoping
// ---------------------------------------------------------------------------

/// Version control coordinates of a stored record.
///
/// Canonical (merged) branch records keep the commit of the upload that
/// produced them; it is informational only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VcsInfo {
    pub repo: String,
    pub branch: String,
    pub commit_id: String,
}

impl VcsInfo {
    pub fn new(repo: impl Into<String>, branch: impl Into<String>, commit_id: impl Into<String>) -> Self {
        Self {
            repo: repo.into(),
            branch: branch.into(),
            commit_id: commit_id.into(),
        }
    }
}

/// Tenant scope every record is written under.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    pub account: String,
    pub org: String,
    pub project: String,
}

impl Scope {
    pub fn new(account: impl Into<String>, org: impl Into<String>, project: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            org: org.into(),
            project: project.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Persisted entities
// ---------------------------------------------------------------------------

/// A method, class-level source unit, or resource in the stored graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: i64,
    /// Shared by all methods of one class; the visualization graph is
    /// keyed on it.
    pub class_id: i64,
    pub package: String,
    pub class: String,
    pub method: String,
    pub params: String,
    #[serde(rename = "type")]
    pub kind: NodeType,
    /// Only populated for resource nodes.
    pub file: String,
    pub calls_reflection: bool,
    pub scope: Scope,
    pub vcs: VcsInfo,
}

/// Maps one source node to the set of tests exercising it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    pub source: i64,
    pub tests: Vec<i64>,
    pub scope: Scope,
    pub vcs: VcsInfo,
}

/// Maps one caller class to its callee classes. Visualization only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisEdge {
    pub caller: i64,
    pub callees: Vec<i64>,
    pub scope: Scope,
    pub vcs: VcsInfo,
}

// ---------------------------------------------------------------------------
// Changed files
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Added,
    #[default]
    Modified,
    Deleted,
}

/// One entry of a change set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangedFile {
    pub name: String,
    #[serde(default)]
    pub status: FileStatus,
}

impl ChangedFile {
    pub fn new(name: impl Into<String>, status: FileStatus) -> Self {
        Self {
            name: name.into(),
            status,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.status == FileStatus::Deleted
    }
}

// ---------------------------------------------------------------------------
// Test selection
// ---------------------------------------------------------------------------

/// Why a test was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Selection {
    /// Test file is new; its methods are unknown until its callgraph lands.
    #[serde(rename = "new_test")]
    SelectNewTest,
    /// Test file itself changed.
    #[serde(rename = "updated_test")]
    SelectUpdatedTest,
    /// Test exercises changed source code.
    #[serde(rename = "source_code")]
    SelectSourceCode,
}

/// A test to schedule.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunnableTest {
    pub pkg: String,
    pub class: String,
    #[serde(default)]
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selection: Option<Selection>,
}

impl RunnableTest {
    pub fn new(pkg: &str, class: &str, method: &str, selection: Selection) -> Self {
        Self {
            pkg: pkg.to_string(),
            class: class.to_string(),
            method: method.to_string(),
            selection: Some(selection),
        }
    }

    pub fn class_key(&self) -> TestClass {
        TestClass::new(&self.pkg, &self.class)
    }
}

/// (package, class) identity of a test class.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TestClass {
    pub pkg: String,
    pub class: String,
}

impl TestClass {
    pub fn new(pkg: &str, class: &str) -> Self {
        Self {
            pkg: pkg.to_string(),
            class: class.to_string(),
        }
    }

    /// Tests without package or class cannot be scheduled.
    pub fn is_valid(&self) -> bool {
        !self.pkg.is_empty() && !self.class.is_empty()
    }
}

impl std::fmt::Display for TestClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.pkg, self.class)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SelectTestsReq {
    #[serde(default)]
    pub files: Vec<ChangedFile>,
    #[serde(default)]
    pub ti_config: TiConfig,
    pub target_branch: String,
    #[serde(default)]
    pub source_branch: String,
    pub repo: String,
    /// Caller already knows everything must run.
    #[serde(default)]
    pub select_all: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectTestsResp {
    pub select_all: bool,
    pub total_tests: usize,
    pub selected_tests: usize,
    pub src_code_tests: usize,
    pub updated_tests: usize,
    pub new_tests: usize,
    #[serde(default)]
    pub tests: Vec<RunnableTest>,
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiffInfo {
    /// Commit whose partial callgraph is being merged.
    pub sha: String,
    #[serde(default)]
    pub files: Vec<ChangedFile>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MergePartialCgRequest {
    pub account_id: String,
    pub repo: String,
    pub target_branch: String,
    pub diff: DiffInfo,
}

// ---------------------------------------------------------------------------
// Visualization
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetVgReq {
    pub account_id: String,
    pub repo: String,
    #[serde(default)]
    pub source_branch: String,
    pub target_branch: String,
    /// Fully qualified `pkg.Class`; empty means "any starting point".
    #[serde(default)]
    pub class: String,
    #[serde(default)]
    pub limit: i64,
    #[serde(default)]
    pub diff_files: Vec<ChangedFile>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisNode {
    /// The class id.
    pub id: i64,
    pub package: String,
    pub class: String,
    pub file: String,
    #[serde(rename = "type")]
    pub kind: NodeType,
    pub important: bool,
    pub root: bool,
}

impl VisNode {
    pub fn from_node(node: &Node, important: bool) -> Self {
        Self {
            id: node.class_id,
            package: node.package.clone(),
            class: node.class.clone(),
            file: node.file.clone(),
            kind: node.kind,
            important,
            root: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisMapping {
    pub from: i64,
    pub to: Vec<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetVgResp {
    pub nodes: Vec<VisNode>,
    pub edges: Vec<VisMapping>,
}
