//! SQLite CRUD layer for the call-graph store.
//!
//! Three collections live here: `nodes`, `relations` (source → tests) and
//! `vis_edges` (caller → callees). Every query is scoped by a [`Filter`]
//! over account, repo, branch and commit. Relations and vis edges have the
//! same shape (an integer key plus an integer set) and share one code path
//! through [`SetCollection`].
//!
//! Batch writes run inside one transaction per call, which is the embedded
//! equivalent of a single bulk request. Callers compose several of these
//! calls per operation; there is no transaction spanning them.

use std::collections::HashSet;

use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection};

use crate::db::converters::{
    encode_members, row_to_node, row_to_set_doc, row_to_set_doc_at, SetDoc, NODE_COLUMNS,
};
use crate::db::schema::initialize_database;
use crate::error::Result;
use crate::types::{Node, NodeType, TestClass};

/// Upper bound on ids bound into one `IN (...)` list.
const MAX_IN_PARAMS: usize = 500;

// ---------------------------------------------------------------------------
// Filter
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Match<'a> {
    Eq(&'a str),
    Ne(&'a str),
}

/// Scope predicate shared by every store query.
///
/// ```
/// use ti_engine::graph::store::Filter;
/// let f = Filter::new("acct", "github.com/acme/app").branch("main");
/// assert!(f.where_clause().0.contains("branch = ?"));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Filter<'a> {
    pub account: &'a str,
    pub repo: &'a str,
    pub branch: Option<Match<'a>>,
    pub commit: Option<Match<'a>>,
}

impl<'a> Filter<'a> {
    pub fn new(account: &'a str, repo: &'a str) -> Self {
        Self {
            account,
            repo,
            branch: None,
            commit: None,
        }
    }

    pub fn branch(mut self, branch: &'a str) -> Self {
        self.branch = Some(Match::Eq(branch));
        self
    }

    pub fn not_branch(mut self, branch: &'a str) -> Self {
        self.branch = Some(Match::Ne(branch));
        self
    }

    pub fn commit(mut self, commit: &'a str) -> Self {
        self.commit = Some(Match::Eq(commit));
        self
    }

    pub fn not_commit(mut self, commit: &'a str) -> Self {
        self.commit = Some(Match::Ne(commit));
        self
    }

    /// SQL predicate (without `WHERE`) and its bound values.
    pub fn where_clause(&self) -> (String, Vec<Value>) {
        let mut sql = String::from("account = ? AND repo = ?");
        let mut values = vec![
            Value::Text(self.account.to_string()),
            Value::Text(self.repo.to_string()),
        ];
        for (column, m) in [("branch", self.branch), ("commit_id", self.commit)] {
            match m {
                Some(Match::Eq(v)) => {
                    sql.push_str(&format!(" AND {column} = ?"));
                    values.push(Value::Text(v.to_string()));
                }
                Some(Match::Ne(v)) => {
                    sql.push_str(&format!(" AND {column} != ?"));
                    values.push(Value::Text(v.to_string()));
                }
                None => {}
            }
        }
        (sql, values)
    }
}

// ---------------------------------------------------------------------------
// SetCollection
// ---------------------------------------------------------------------------

/// The two set-valued collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SetCollection {
    Relations,
    VisEdges,
}

impl SetCollection {
    pub fn table(&self) -> &'static str {
        match self {
            Self::Relations => "relations",
            Self::VisEdges => "vis_edges",
        }
    }

    pub fn key_column(&self) -> &'static str {
        match self {
            Self::Relations => "source",
            Self::VisEdges => "caller",
        }
    }

    pub fn members_column(&self) -> &'static str {
        match self {
            Self::Relations => "tests",
            Self::VisEdges => "callees",
        }
    }

    fn select_columns(&self) -> String {
        format!(
            "{}, {}, account, org, project, repo, branch, commit_id",
            self.key_column(),
            self.members_column()
        )
    }
}

impl std::fmt::Display for SetCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.table())
    }
}

// ---------------------------------------------------------------------------
// SQL constants
// ---------------------------------------------------------------------------

const INSERT_NODE_SQL: &str = "\
INSERT INTO nodes (id, class_id, package, class, method, params, type, file, calls_reflection,
                   account, org, project, repo, branch, commit_id, created_at, updated_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?16)";

// ---------------------------------------------------------------------------
// GraphStore
// ---------------------------------------------------------------------------

/// Typed CRUD wrapper around the call-graph SQLite database.
pub struct GraphStore {
    pub conn: Connection,
}

impl std::fmt::Debug for GraphStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphStore").finish_non_exhaustive()
    }
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(",")
}

fn id_values(ids: &[i64]) -> impl Iterator<Item = Value> + '_ {
    ids.iter().map(|id| Value::Integer(*id))
}

impl GraphStore {
    /// Open (or create) the database at `db_path` and apply the schema.
    pub fn new(db_path: &str) -> Result<Self> {
        let conn = initialize_database(db_path)?;
        Ok(Self { conn })
    }

    /// Wrap an already-initialized connection.
    pub fn from_connection(conn: Connection) -> Self {
        Self { conn }
    }

    // -------------------------------------------------------------------
    // Nodes
    // -------------------------------------------------------------------

    /// Insert nodes in one transaction. Duplicate suppression is the
    /// caller's job.
    pub fn insert_nodes(&self, nodes: &[Node], now: &str) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare_cached(INSERT_NODE_SQL)?;
            for node in nodes {
                stmt.execute(params![
                    node.id,
                    node.class_id,
                    node.package,
                    node.class,
                    node.method,
                    node.params,
                    node.kind.as_str(),
                    node.file,
                    node.calls_reflection as i32,
                    node.scope.account,
                    node.scope.org,
                    node.scope.project,
                    node.vcs.repo,
                    node.vcs.branch,
                    node.vcs.commit_id,
                    now,
                ])?;
            }
        }
        tx.commit()?;
        Ok(nodes.len())
    }

    /// Distinct node ids matching `filter`.
    pub fn node_ids(&self, filter: &Filter<'_>) -> Result<HashSet<i64>> {
        let (clause, values) = filter.where_clause();
        let sql = format!("SELECT DISTINCT id FROM nodes WHERE {clause}");
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), |row| row.get::<_, i64>(0))?;
        rows.collect::<std::result::Result<HashSet<_>, _>>()
            .map_err(Into::into)
    }

    pub fn count_nodes(&self, filter: &Filter<'_>) -> Result<usize> {
        let (clause, values) = filter.where_clause();
        let sql = format!("SELECT COUNT(*) FROM nodes WHERE {clause}");
        let count: i64 = self
            .conn
            .query_row(&sql, params_from_iter(values.iter()), |row| row.get(0))?;
        Ok(count as usize)
    }

    /// All nodes matching `filter`, optionally restricted to one type.
    pub fn find_nodes(&self, filter: &Filter<'_>, kind: Option<NodeType>) -> Result<Vec<Node>> {
        let (mut clause, mut values) = filter.where_clause();
        push_kind(&mut clause, &mut values, kind);
        let sql = format!("SELECT {NODE_COLUMNS} FROM nodes WHERE {clause} ORDER BY row_id");
        self.query_nodes(&sql, values)
    }

    /// The first `limit` nodes matching `filter`, in insertion order.
    pub fn first_nodes(&self, filter: &Filter<'_>, limit: usize) -> Result<Vec<Node>> {
        let (clause, mut values) = filter.where_clause();
        values.push(Value::Integer(limit as i64));
        let sql = format!("SELECT {NODE_COLUMNS} FROM nodes WHERE {clause} ORDER BY row_id LIMIT ?");
        self.query_nodes(&sql, values)
    }

    /// Nodes whose (package, class) equals one of `classes`.
    pub fn find_nodes_by_classes(
        &self,
        filter: &Filter<'_>,
        classes: &[TestClass],
        kind: Option<NodeType>,
    ) -> Result<Vec<Node>> {
        let mut out = Vec::new();
        // Two parameters per class.
        for chunk in classes.chunks(MAX_IN_PARAMS / 2) {
            let (mut clause, mut values) = filter.where_clause();
            push_kind(&mut clause, &mut values, kind);
            let pairs = vec!["(package = ? AND class = ?)"; chunk.len()].join(" OR ");
            for c in chunk {
                values.push(Value::Text(c.pkg.clone()));
                values.push(Value::Text(c.class.clone()));
            }
            let sql = format!(
                "SELECT {NODE_COLUMNS} FROM nodes WHERE {clause} AND ({pairs}) ORDER BY row_id"
            );
            out.extend(self.query_nodes(&sql, values)?);
        }
        Ok(out)
    }

    pub fn find_nodes_by_ids(
        &self,
        filter: &Filter<'_>,
        ids: &[i64],
        kind: Option<NodeType>,
    ) -> Result<Vec<Node>> {
        self.find_nodes_in(filter, "id", ids, kind)
    }

    pub fn find_nodes_by_class_ids(&self, filter: &Filter<'_>, class_ids: &[i64]) -> Result<Vec<Node>> {
        self.find_nodes_in(filter, "class_id", class_ids, None)
    }

    /// Resource nodes whose `file` is one of `files`.
    pub fn find_resources_by_files(&self, filter: &Filter<'_>, files: &[String]) -> Result<Vec<Node>> {
        let mut out = Vec::new();
        for chunk in files.chunks(MAX_IN_PARAMS) {
            let (mut clause, mut values) = filter.where_clause();
            push_kind(&mut clause, &mut values, Some(NodeType::Resource));
            values.extend(chunk.iter().map(|f| Value::Text(f.clone())));
            let sql = format!(
                "SELECT {NODE_COLUMNS} FROM nodes WHERE {clause} AND file IN ({}) ORDER BY row_id",
                placeholders(chunk.len())
            );
            out.extend(self.query_nodes(&sql, values)?);
        }
        Ok(out)
    }

    /// Reassign the branch of the listed nodes in place.
    pub fn move_nodes(&self, filter: &Filter<'_>, ids: &[i64], to_branch: &str, now: &str) -> Result<usize> {
        self.move_rows("nodes", "id", filter, ids, to_branch, now)
    }

    /// Delete every node matching `filter`.
    pub fn delete_nodes(&self, filter: &Filter<'_>) -> Result<usize> {
        self.delete_rows("nodes", filter)
    }

    pub fn delete_nodes_by_ids(&self, filter: &Filter<'_>, ids: &[i64]) -> Result<usize> {
        self.delete_rows_in("nodes", "id", filter, ids)
    }

    // -------------------------------------------------------------------
    // Relations and vis edges
    // -------------------------------------------------------------------

    /// Insert set documents in one transaction. `docs` carry their own scope.
    pub fn insert_set_docs(&self, coll: SetCollection, docs: &[SetDoc], now: &str) -> Result<usize> {
        let sql = format!(
            "INSERT INTO {} ({}, {}, account, org, project, repo, branch, commit_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
            coll.table(),
            coll.key_column(),
            coll.members_column()
        );
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare_cached(&sql)?;
            for doc in docs {
                stmt.execute(params![
                    doc.key,
                    encode_members(&doc.members)?,
                    doc.scope.account,
                    doc.scope.org,
                    doc.scope.project,
                    doc.vcs.repo,
                    doc.vcs.branch,
                    doc.vcs.commit_id,
                    now,
                ])?;
            }
        }
        tx.commit()?;
        Ok(docs.len())
    }

    /// Distinct document keys matching `filter`.
    pub fn set_keys(&self, coll: SetCollection, filter: &Filter<'_>) -> Result<HashSet<i64>> {
        let (clause, values) = filter.where_clause();
        let sql = format!(
            "SELECT DISTINCT {} FROM {} WHERE {clause}",
            coll.key_column(),
            coll.table()
        );
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), |row| row.get::<_, i64>(0))?;
        rows.collect::<std::result::Result<HashSet<_>, _>>()
            .map_err(Into::into)
    }

    pub fn count_set_docs(&self, coll: SetCollection, filter: &Filter<'_>) -> Result<usize> {
        let (clause, values) = filter.where_clause();
        let sql = format!("SELECT COUNT(*) FROM {} WHERE {clause}", coll.table());
        let count: i64 = self
            .conn
            .query_row(&sql, params_from_iter(values.iter()), |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Documents matching `filter`; `keys` narrows to those keys.
    pub fn find_set_docs(
        &self,
        coll: SetCollection,
        filter: &Filter<'_>,
        keys: Option<&[i64]>,
    ) -> Result<Vec<SetDoc>> {
        let Some(keys) = keys else {
            let (clause, values) = filter.where_clause();
            let sql = format!(
                "SELECT {} FROM {} WHERE {clause} ORDER BY row_id",
                coll.select_columns(),
                coll.table()
            );
            return self.query_set_docs(&sql, values);
        };

        let mut out = Vec::new();
        for chunk in keys.chunks(MAX_IN_PARAMS) {
            let (clause, mut values) = filter.where_clause();
            values.extend(id_values(chunk));
            let sql = format!(
                "SELECT {} FROM {} WHERE {clause} AND {} IN ({}) ORDER BY row_id",
                coll.select_columns(),
                coll.table(),
                coll.key_column(),
                placeholders(chunk.len())
            );
            out.extend(self.query_set_docs(&sql, values)?);
        }
        Ok(out)
    }

    /// Documents whose member set contains any of `members`.
    pub fn find_set_docs_containing(
        &self,
        coll: SetCollection,
        filter: &Filter<'_>,
        members: &[i64],
    ) -> Result<Vec<SetDoc>> {
        let mut out: Vec<SetDoc> = Vec::new();
        let mut seen = HashSet::new();
        for chunk in members.chunks(MAX_IN_PARAMS) {
            let (clause, mut values) = filter.where_clause();
            values.extend(id_values(chunk));
            let sql = format!(
                "SELECT row_id, {} FROM {} WHERE {clause} AND EXISTS (
                   SELECT 1 FROM json_each({}.{}) WHERE json_each.value IN ({})
                 ) ORDER BY row_id",
                coll.select_columns(),
                coll.table(),
                coll.table(),
                coll.members_column(),
                placeholders(chunk.len())
            );
            let mut stmt = self.conn.prepare(&sql)?;
            let rows = stmt.query_and_then(params_from_iter(values.iter()), |row| {
                let row_id: i64 = row.get(0)?;
                let doc = row_to_set_doc_at(row, 1)?;
                Ok::<_, crate::error::TiError>((row_id, doc))
            })?;
            for row in rows {
                let (row_id, doc) = row?;
                // A document can match several chunks.
                if seen.insert(row_id) {
                    out.push(doc);
                }
            }
        }
        Ok(out)
    }

    pub fn move_set_docs(
        &self,
        coll: SetCollection,
        filter: &Filter<'_>,
        keys: &[i64],
        to_branch: &str,
        now: &str,
    ) -> Result<usize> {
        self.move_rows(coll.table(), coll.key_column(), filter, keys, to_branch, now)
    }

    /// Overwrite the member set of each `(key, members)` in one transaction.
    pub fn overwrite_members(
        &self,
        coll: SetCollection,
        filter: &Filter<'_>,
        updates: &[(i64, Vec<i64>)],
        now: &str,
    ) -> Result<usize> {
        let (clause, values) = filter.where_clause();
        let sql = format!(
            "UPDATE {} SET {} = ?, updated_at = ? WHERE {clause} AND {} = ?",
            coll.table(),
            coll.members_column(),
            coll.key_column()
        );
        let mut changed = 0;
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare_cached(&sql)?;
            for (key, members) in updates {
                let mut bound = vec![
                    Value::Text(encode_members(members)?),
                    Value::Text(now.to_string()),
                ];
                bound.extend(values.iter().cloned());
                bound.push(Value::Integer(*key));
                changed += stmt.execute(params_from_iter(bound.iter()))?;
            }
        }
        tx.commit()?;
        Ok(changed)
    }

    pub fn delete_set_docs(&self, coll: SetCollection, filter: &Filter<'_>) -> Result<usize> {
        self.delete_rows(coll.table(), filter)
    }

    pub fn delete_set_docs_by_keys(
        &self,
        coll: SetCollection,
        filter: &Filter<'_>,
        keys: &[i64],
    ) -> Result<usize> {
        self.delete_rows_in(coll.table(), coll.key_column(), filter, keys)
    }

    // -------------------------------------------------------------------
    // Internal helpers
    // -------------------------------------------------------------------

    fn query_nodes(&self, sql: &str, values: Vec<Value>) -> Result<Vec<Node>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_and_then(params_from_iter(values.iter()), row_to_node)?;
        rows.collect()
    }

    fn query_set_docs(&self, sql: &str, values: Vec<Value>) -> Result<Vec<SetDoc>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_and_then(params_from_iter(values.iter()), row_to_set_doc)?;
        rows.collect()
    }

    fn find_nodes_in(
        &self,
        filter: &Filter<'_>,
        column: &str,
        ids: &[i64],
        kind: Option<NodeType>,
    ) -> Result<Vec<Node>> {
        let mut out = Vec::new();
        for chunk in ids.chunks(MAX_IN_PARAMS) {
            let (mut clause, mut values) = filter.where_clause();
            push_kind(&mut clause, &mut values, kind);
            values.extend(id_values(chunk));
            let sql = format!(
                "SELECT {NODE_COLUMNS} FROM nodes WHERE {clause} AND {column} IN ({}) ORDER BY row_id",
                placeholders(chunk.len())
            );
            out.extend(self.query_nodes(&sql, values)?);
        }
        Ok(out)
    }

    fn move_rows(
        &self,
        table: &str,
        key_column: &str,
        filter: &Filter<'_>,
        keys: &[i64],
        to_branch: &str,
        now: &str,
    ) -> Result<usize> {
        let mut moved = 0;
        let tx = self.conn.unchecked_transaction()?;
        for chunk in keys.chunks(MAX_IN_PARAMS) {
            let (clause, values) = filter.where_clause();
            let mut bound = vec![Value::Text(to_branch.to_string()), Value::Text(now.to_string())];
            bound.extend(values);
            bound.extend(id_values(chunk));
            let sql = format!(
                "UPDATE {table} SET branch = ?, updated_at = ? WHERE {clause} AND {key_column} IN ({})",
                placeholders(chunk.len())
            );
            moved += tx.execute(&sql, params_from_iter(bound.iter()))?;
        }
        tx.commit()?;
        Ok(moved)
    }

    fn delete_rows(&self, table: &str, filter: &Filter<'_>) -> Result<usize> {
        let (clause, values) = filter.where_clause();
        let sql = format!("DELETE FROM {table} WHERE {clause}");
        Ok(self.conn.execute(&sql, params_from_iter(values.iter()))?)
    }

    fn delete_rows_in(&self, table: &str, key_column: &str, filter: &Filter<'_>, keys: &[i64]) -> Result<usize> {
        let mut deleted = 0;
        let tx = self.conn.unchecked_transaction()?;
        for chunk in keys.chunks(MAX_IN_PARAMS) {
            let (clause, mut values) = filter.where_clause();
            values.extend(id_values(chunk));
            let sql = format!(
                "DELETE FROM {table} WHERE {clause} AND {key_column} IN ({})",
                placeholders(chunk.len())
            );
            deleted += tx.execute(&sql, params_from_iter(values.iter()))?;
        }
        tx.commit()?;
        Ok(deleted)
    }
}

fn push_kind(clause: &mut String, values: &mut Vec<Value>, kind: Option<NodeType>) {
    if let Some(kind) = kind {
        clause.push_str(" AND type = ?");
        values.push(Value::Text(kind.as_str().to_string()));
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
