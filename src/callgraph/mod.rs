//! In-memory partial call graph produced by one CI run.
//!
//! A [`Callgraph`] is what the uploader consumes: nodes keyed by numeric
//! id, source→tests relations, and caller→callees visualization edges. It
//! carries no scope; the uploader stamps account/repo/branch/commit on it.

pub mod parser;

use serde::{Deserialize, Serialize};

use crate::types::NodeType;

pub use parser::{parse_callgraph, parse_callgraph_reader, parse_vis_graph, parse_vis_reader};

/// A node as reported by the instrumented test run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CgNode {
    pub id: i64,
    pub class_id: i64,
    pub package: String,
    pub class: String,
    pub method: String,
    pub params: String,
    #[serde(rename = "type")]
    pub kind: NodeType,
    pub file: String,
    pub calls_reflection: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CgRelation {
    pub source: i64,
    pub tests: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CgVisRelation {
    pub caller: i64,
    pub callees: Vec<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Callgraph {
    pub nodes: Vec<CgNode>,
    pub relations: Vec<CgRelation>,
    #[serde(default)]
    pub vis_relations: Vec<CgVisRelation>,
}

impl Callgraph {
    /// Parse the callgraph dump files and the visualization dump files.
    pub fn from_files<P, Q>(cg_files: &[P], vis_files: &[Q]) -> crate::error::Result<Self>
    where
        P: AsRef<std::path::Path>,
        Q: AsRef<std::path::Path>,
    {
        let mut cg = parse_callgraph(cg_files)?;
        cg.vis_relations = parse_vis_graph(vis_files)?;
        Ok(cg)
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.relations.is_empty()
    }

    pub fn test_nodes(&self) -> impl Iterator<Item = &CgNode> {
        self.nodes.iter().filter(|n| n.kind == NodeType::Test)
    }
}
