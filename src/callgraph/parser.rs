//! Newline-delimited JSON callgraph dump parser.
//!
//! Each line of a callgraph dump is one call edge:
//!
//! ```json
//! {"test": {"id": 7, "classId": 3, "package": "io.app", "class": "AbcTest", "method": "testRun"},
//!  "source": {"id": 1, "classId": 1, "package": "io.app", "class": "Abc", "method": "run"}}
//! ```
//!
//! A record whose `source` side is absent or all-zero describes a resource
//! edge; its `resource` side is used as is, zero value included. Records are versioned with an
//! optional `"v"` field (current and only version: 1). Unknown fields are
//! rejected so that a producer/consumer schema drift fails loudly.
//!
//! Visualization dumps hold one `{"caller": 3, "callees": [4, 5]}` line per
//! caller class.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use serde::Deserialize;

use crate::callgraph::{CgNode, CgRelation, CgVisRelation, Callgraph};
use crate::error::{Result, TiError};
use crate::types::NodeType;

const SUPPORTED_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Wire schema
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRecord {
    #[serde(default = "default_version")]
    v: u32,
    test: RawNode,
    #[serde(default)]
    source: Option<RawNode>,
    #[serde(default)]
    resource: Option<RawNode>,
}

#[derive(Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct RawNode {
    #[serde(default)]
    id: i64,
    #[serde(default)]
    class_id: i64,
    #[serde(default)]
    package: String,
    #[serde(default)]
    class: String,
    #[serde(default)]
    method: String,
    #[serde(default)]
    params: String,
    #[serde(default)]
    file: String,
    #[serde(default)]
    calls_reflection: bool,
    /// Informational; the side of the record decides the node type.
    #[serde(default, rename = "type")]
    _kind: Option<String>,
}

impl RawNode {
    fn is_zero(&self) -> bool {
        *self == RawNode::default()
    }

    fn into_node(self, kind: NodeType) -> CgNode {
        CgNode {
            id: self.id,
            class_id: self.class_id,
            package: self.package,
            class: self.class,
            method: self.method,
            params: self.params,
            kind,
            file: self.file,
            calls_reflection: self.calls_reflection,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawVisRecord {
    #[serde(default = "default_version")]
    v: u32,
    caller: i64,
    #[serde(default)]
    callees: Vec<i64>,
}

fn default_version() -> u32 {
    SUPPORTED_VERSION
}

// ---------------------------------------------------------------------------
// Accumulator
// ---------------------------------------------------------------------------

/// Collects nodes and relations across all input files of one parse.
#[derive(Default)]
struct GraphAccumulator {
    nodes: BTreeMap<i64, CgNode>,
    relations: BTreeMap<i64, BTreeSet<i64>>,
}

impl GraphAccumulator {
    fn add(&mut self, record: RawRecord) -> std::result::Result<(), String> {
        if record.v != SUPPORTED_VERSION {
            return Err(format!("unsupported record version {}", record.v));
        }
        if record.test.class.is_empty() {
            return Err("test node has no class".to_string());
        }

        let other = match record.source {
            Some(src) if !src.is_zero() => src.into_node(NodeType::Source),
            _ => record.resource.unwrap_or_default().into_node(NodeType::Resource),
        };
        let test = record.test.into_node(NodeType::Test);

        self.relations.entry(other.id).or_default().insert(test.id);
        // Within one parse pass ids are stable; last write wins.
        self.nodes.insert(test.id, test);
        self.nodes.insert(other.id, other);
        Ok(())
    }

    fn finish(self) -> Callgraph {
        Callgraph {
            nodes: self.nodes.into_values().collect(),
            relations: self
                .relations
                .into_iter()
                .map(|(source, tests)| CgRelation {
                    source,
                    tests: tests.into_iter().collect(),
                })
                .collect(),
            vis_relations: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Parse callgraph dump files in order. Any malformed line or missing file
/// fails the whole parse.
pub fn parse_callgraph<P: AsRef<Path>>(files: &[P]) -> Result<Callgraph> {
    let mut acc = GraphAccumulator::default();
    for path in files {
        let path = path.as_ref();
        let reader = open(path)?;
        read_records(reader, path, &mut acc)?;
    }
    let cg = acc.finish();
    tracing::debug!(
        files = files.len(),
        nodes = cg.nodes.len(),
        relations = cg.relations.len(),
        "parsed callgraph"
    );
    Ok(cg)
}

/// Parse one callgraph stream. `label` names the stream in errors.
pub fn parse_callgraph_reader<R: BufRead>(reader: R, label: &Path) -> Result<Callgraph> {
    let mut acc = GraphAccumulator::default();
    read_records(reader, label, &mut acc)?;
    Ok(acc.finish())
}

/// Parse visualization dump files; callee lists of repeated callers are
/// unioned.
pub fn parse_vis_graph<P: AsRef<Path>>(files: &[P]) -> Result<Vec<CgVisRelation>> {
    let mut edges: BTreeMap<i64, BTreeSet<i64>> = BTreeMap::new();
    for path in files {
        let path = path.as_ref();
        let reader = open(path)?;
        read_vis_records(reader, path, &mut edges)?;
    }
    Ok(finish_vis(edges))
}

pub fn parse_vis_reader<R: BufRead>(reader: R, label: &Path) -> Result<Vec<CgVisRelation>> {
    let mut edges = BTreeMap::new();
    read_vis_records(reader, label, &mut edges)?;
    Ok(finish_vis(edges))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn open(path: &Path) -> Result<BufReader<File>> {
    match File::open(path) {
        Ok(f) => Ok(BufReader::new(f)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(TiError::MissingFile {
            path: path.to_path_buf(),
        }),
        Err(e) => Err(e.into()),
    }
}

fn parse_error(label: &Path, line: usize, message: impl Into<String>) -> TiError {
    TiError::Parse {
        file: label.to_path_buf(),
        line,
        message: message.into(),
    }
}

fn read_records<R: BufRead>(reader: R, label: &Path, acc: &mut GraphAccumulator) -> Result<()> {
    for (idx, line) in reader.lines().enumerate() {
        let line_no = idx + 1;
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: RawRecord =
            serde_json::from_str(&line).map_err(|e| parse_error(label, line_no, e.to_string()))?;
        acc.add(record)
            .map_err(|msg| parse_error(label, line_no, msg))?;
    }
    Ok(())
}

fn read_vis_records<R: BufRead>(
    reader: R,
    label: &Path,
    edges: &mut BTreeMap<i64, BTreeSet<i64>>,
) -> Result<()> {
    for (idx, line) in reader.lines().enumerate() {
        let line_no = idx + 1;
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: RawVisRecord =
            serde_json::from_str(&line).map_err(|e| parse_error(label, line_no, e.to_string()))?;
        if record.v != SUPPORTED_VERSION {
            return Err(parse_error(
                label,
                line_no,
                format!("unsupported record version {}", record.v),
            ));
        }
        edges.entry(record.caller).or_default().extend(record.callees);
    }
    Ok(())
}

fn finish_vis(edges: BTreeMap<i64, BTreeSet<i64>>) -> Vec<CgVisRelation> {
    edges
        .into_iter()
        .map(|(caller, callees)| CgVisRelation {
            caller,
            callees: callees.into_iter().collect(),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
