//! SQLite schema initialization for the test intelligence store.
//!
//! The three collections of the call-graph store map to three tables. Each
//! row is one document: set-valued fields (`tests`, `callees`) are sorted
//! JSON integer arrays, so a relation stays a single row per
//! (source, repo, branch, commit).

use rusqlite::Connection;

// ---------------------------------------------------------------------------
// DDL constants
// ---------------------------------------------------------------------------

const CREATE_NODES: &str = "\
CREATE TABLE IF NOT EXISTS nodes (
  row_id INTEGER PRIMARY KEY AUTOINCREMENT,
  id INTEGER NOT NULL,
  class_id INTEGER NOT NULL DEFAULT 0,
  package TEXT NOT NULL DEFAULT '',
  class TEXT NOT NULL DEFAULT '',
  method TEXT NOT NULL DEFAULT '',
  params TEXT NOT NULL DEFAULT '',
  type TEXT NOT NULL,
  file TEXT NOT NULL DEFAULT '',
  calls_reflection INTEGER NOT NULL DEFAULT 0,
  account TEXT NOT NULL,
  org TEXT NOT NULL DEFAULT '',
  project TEXT NOT NULL DEFAULT '',
  repo TEXT NOT NULL,
  branch TEXT NOT NULL,
  commit_id TEXT NOT NULL,
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL
)";

const CREATE_RELATIONS: &str = "\
CREATE TABLE IF NOT EXISTS relations (
  row_id INTEGER PRIMARY KEY AUTOINCREMENT,
  source INTEGER NOT NULL,
  tests TEXT NOT NULL DEFAULT '[]',
  account TEXT NOT NULL,
  org TEXT NOT NULL DEFAULT '',
  project TEXT NOT NULL DEFAULT '',
  repo TEXT NOT NULL,
  branch TEXT NOT NULL,
  commit_id TEXT NOT NULL,
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL
)";

const CREATE_VIS_EDGES: &str = "\
CREATE TABLE IF NOT EXISTS vis_edges (
  row_id INTEGER PRIMARY KEY AUTOINCREMENT,
  caller INTEGER NOT NULL,
  callees TEXT NOT NULL DEFAULT '[]',
  account TEXT NOT NULL,
  org TEXT NOT NULL DEFAULT '',
  project TEXT NOT NULL DEFAULT '',
  repo TEXT NOT NULL,
  branch TEXT NOT NULL,
  commit_id TEXT NOT NULL,
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL
)";

// Indexes ----------------------------------------------------------------

const CREATE_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_nodes_scope ON nodes(account, repo, branch, commit_id, id)",
    "CREATE INDEX IF NOT EXISTS idx_nodes_class ON nodes(account, repo, branch, package, class)",
    "CREATE INDEX IF NOT EXISTS idx_nodes_commit ON nodes(account, repo, commit_id)",
    "CREATE INDEX IF NOT EXISTS idx_nodes_class_id ON nodes(account, repo, branch, class_id)",
    "CREATE INDEX IF NOT EXISTS idx_relations_scope ON relations(account, repo, branch, commit_id, source)",
    "CREATE INDEX IF NOT EXISTS idx_relations_commit ON relations(account, repo, commit_id)",
    "CREATE INDEX IF NOT EXISTS idx_vis_edges_scope ON vis_edges(account, repo, branch, commit_id, caller)",
    "CREATE INDEX IF NOT EXISTS idx_vis_edges_commit ON vis_edges(account, repo, commit_id)",
];

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Open (or create) the SQLite database at `db_path` and apply the schema.
///
/// The returned connection has WAL mode and synchronous NORMAL configured.
///
/// # Errors
///
/// Returns a `rusqlite::Error` if the database cannot be opened or any DDL
/// statement fails.
pub fn initialize_database(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;

    // -- Pragmas ----------------------------------------------------------
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;

    // -- Tables -----------------------------------------------------------
    conn.execute_batch(CREATE_NODES)?;
    conn.execute_batch(CREATE_RELATIONS)?;
    conn.execute_batch(CREATE_VIS_EDGES)?;

    // -- Indexes ----------------------------------------------------------
    for ddl in CREATE_INDEXES {
        conn.execute_batch(ddl)?;
    }

    Ok(conn)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> Connection {
        initialize_database(":memory:").expect("schema creation should succeed on :memory:")
    }

    fn object_exists(conn: &Connection, obj_type: &str, obj_name: &str) -> bool {
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = ?1 AND name = ?2",
                rusqlite::params![obj_type, obj_name],
                |row| row.get(0),
            )
            .unwrap();
        count > 0
    }

    fn column_names(conn: &Connection, table: &str) -> Vec<String> {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})")).unwrap();
        stmt.query_map([], |row| row.get::<_, String>(1))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap()
    }

    #[test]
    fn core_tables_exist() {
        let conn = setup();
        for table in &["nodes", "relations", "vis_edges"] {
            assert!(
                object_exists(&conn, "table", table),
                "table '{table}' should exist"
            );
        }
    }

    #[test]
    fn indexes_exist() {
        let conn = setup();
        for idx in &[
            "idx_nodes_scope",
            "idx_nodes_class",
            "idx_relations_scope",
            "idx_vis_edges_scope",
        ] {
            assert!(
                object_exists(&conn, "index", idx),
                "index '{idx}' should exist"
            );
        }
    }

    #[test]
    fn every_table_carries_scope_columns() {
        let conn = setup();
        for table in &["nodes", "relations", "vis_edges"] {
            let cols = column_names(&conn, table);
            for col in &[
                "account",
                "org",
                "project",
                "repo",
                "branch",
                "commit_id",
                "created_at",
                "updated_at",
            ] {
                assert!(
                    cols.iter().any(|c| c == col),
                    "{table} should have column {col}"
                );
            }
        }
    }

    #[test]
    fn pragmas_are_set() {
        let conn = setup();
        let journal_mode: String = conn
            .pragma_query_value(None, "journal_mode", |row| row.get(0))
            .unwrap();
        // In-memory databases report "memory" instead of "wal".
        assert!(
            journal_mode == "wal" || journal_mode == "memory",
            "journal_mode should be 'wal' or 'memory', got '{journal_mode}'"
        );
        let sync: i64 = conn
            .pragma_query_value(None, "synchronous", |row| row.get(0))
            .unwrap();
        assert_eq!(sync, 1, "synchronous should be NORMAL (1)");
    }

    #[test]
    fn initialization_is_idempotent_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ti.db");
        let path = path.to_str().unwrap();
        drop(initialize_database(path).unwrap());
        let conn = initialize_database(path).unwrap();
        assert!(object_exists(&conn, "table", "nodes"));
    }

    #[test]
    fn set_columns_default_to_empty_arrays() {
        let conn = setup();
        conn.execute(
            "INSERT INTO relations (source, account, repo, branch, commit_id, created_at, updated_at)
             VALUES (1, 'acc', 'repo', 'main', 'c1', 't', 't')",
            [],
        )
        .unwrap();
        let tests: String = conn
            .query_row("SELECT tests FROM relations WHERE source = 1", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(tests, "[]");
    }
}
