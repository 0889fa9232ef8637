//! Row → entity decoding for the SQLite-backed store.
//!
//! Every function here takes a row produced by a `SELECT` over a fixed
//! column list, so column positions are fixed. Set documents are selected
//! as `key, members, account, org, project, repo, branch, commit_id`.

use rusqlite::Row;

use crate::error::{Result, TiError};
use crate::types::{Node, NodeType, Scope, VcsInfo};

/// Column list for node queries, in the order [`row_to_node`] reads them.
pub const NODE_COLUMNS: &str = "id, class_id, package, class, method, params, type, file, \
     calls_reflection, account, org, project, repo, branch, commit_id";

/// A set-valued document: one relation (`source` → `tests`) or one vis
/// edge (`caller` → `callees`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetDoc {
    pub key: i64,
    pub members: Vec<i64>,
    pub scope: Scope,
    pub vcs: VcsInfo,
}

pub fn row_to_node(row: &Row<'_>) -> Result<Node> {
    let kind: String = row.get(6)?;
    let kind = NodeType::from_str_loose(&kind)
        .ok_or_else(|| TiError::InvalidInput(format!("unknown node type '{kind}'")))?;
    Ok(Node {
        id: row.get(0)?,
        class_id: row.get(1)?,
        package: row.get(2)?,
        class: row.get(3)?,
        method: row.get(4)?,
        params: row.get(5)?,
        kind,
        file: row.get(7)?,
        calls_reflection: row.get::<_, i64>(8)? != 0,
        scope: Scope {
            account: row.get(9)?,
            org: row.get(10)?,
            project: row.get(11)?,
        },
        vcs: VcsInfo {
            repo: row.get(12)?,
            branch: row.get(13)?,
            commit_id: row.get(14)?,
        },
    })
}

pub fn row_to_set_doc(row: &Row<'_>) -> Result<SetDoc> {
    row_to_set_doc_at(row, 0)
}

/// Decode a set document whose columns start at `offset`.
pub fn row_to_set_doc_at(row: &Row<'_>, offset: usize) -> Result<SetDoc> {
    let members: String = row.get(offset + 1)?;
    Ok(SetDoc {
        key: row.get(offset)?,
        members: decode_members(&members)?,
        scope: Scope {
            account: row.get(offset + 2)?,
            org: row.get(offset + 3)?,
            project: row.get(offset + 4)?,
        },
        vcs: VcsInfo {
            repo: row.get(offset + 5)?,
            branch: row.get(offset + 6)?,
            commit_id: row.get(offset + 7)?,
        },
    })
}

/// Encode a member set as a sorted, deduplicated JSON array.
pub fn encode_members(members: &[i64]) -> Result<String> {
    let mut sorted = members.to_vec();
    sorted.sort_unstable();
    sorted.dedup();
    Ok(serde_json::to_string(&sorted)?)
}

pub fn decode_members(raw: &str) -> Result<Vec<i64>> {
    Ok(serde_json::from_str(raw)?)
}
