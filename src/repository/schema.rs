//! Repository schema definitions and creation
//!
//! This module defines the SQLite schema of the bundled document repository
//! and provides functions to create and configure it.

use crate::error::SinkResult;
use rusqlite::{Connection, OptionalExtension};

/// Current schema version for migrations
pub const SCHEMA_VERSION: u32 = 1;

/// Path of the repository root container
pub const ROOT_PATH: &str = "/";

/// SQL to create the documents table
const CREATE_DOCUMENTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    id INTEGER PRIMARY KEY,
    parent_id INTEGER,
    name TEXT NOT NULL,
    path TEXT NOT NULL UNIQUE,
    kind INTEGER NOT NULL,        -- 0=file, 1=folder
    size INTEGER DEFAULT 0,
    content BLOB,
    metadata TEXT,                -- JSON object
    source_path TEXT,
    created_at TEXT NOT NULL,

    FOREIGN KEY (parent_id) REFERENCES documents(id)
)
"#;

/// SQL to create import metadata table
const CREATE_IMPORT_INFO_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS import_info (
    key TEXT PRIMARY KEY,
    value TEXT
)
"#;

/// SQL to create indexes for common queries
const CREATE_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_documents_parent ON documents(parent_id)",
    "CREATE INDEX IF NOT EXISTS idx_documents_kind ON documents(kind)",
];

/// SQLite pragmas for concurrent sessions
///
/// Every import task holds its own connection, so locking stays NORMAL and
/// writers queue on the busy timeout.
const WRITE_PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA cache_size = -32000;      -- 32MB cache per connection
PRAGMA temp_store = MEMORY;
PRAGMA foreign_keys = ON;
"#;

/// Pragmas applied once the import is finished
const READ_PRAGMAS: &str = r#"
PRAGMA synchronous = FULL;
"#;

/// Configure a freshly opened connection
pub fn configure_connection(conn: &Connection) -> SinkResult<()> {
    conn.execute_batch(WRITE_PRAGMAS)?;
    Ok(())
}

/// Create tables, indexes and the root container
pub fn create_repository(conn: &Connection) -> SinkResult<()> {
    configure_connection(conn)?;

    conn.execute(CREATE_DOCUMENTS_TABLE, [])?;
    conn.execute(CREATE_IMPORT_INFO_TABLE, [])?;
    for sql in CREATE_INDEXES {
        conn.execute(sql, [])?;
    }

    conn.execute(
        "INSERT OR IGNORE INTO documents (parent_id, name, path, kind, created_at)
         VALUES (NULL, '', ?1, 1, ?2)",
        rusqlite::params![ROOT_PATH, chrono::Utc::now().to_rfc3339()],
    )?;

    set_import_info(conn, keys::SCHEMA_VERSION, &SCHEMA_VERSION.to_string())?;
    Ok(())
}

/// Apply read-optimized settings
pub fn optimize_for_reads(conn: &Connection) -> SinkResult<()> {
    conn.execute_batch(READ_PRAGMAS)?;

    // Run ANALYZE to update statistics for query planner
    conn.execute("ANALYZE", [])?;

    Ok(())
}

/// Store import metadata
pub fn set_import_info(conn: &Connection, key: &str, value: &str) -> SinkResult<()> {
    conn.execute(
        "INSERT OR REPLACE INTO import_info (key, value) VALUES (?1, ?2)",
        [key, value],
    )?;
    Ok(())
}

/// Get import metadata
pub fn get_import_info(conn: &Connection, key: &str) -> SinkResult<Option<String>> {
    let value = conn
        .query_row(
            "SELECT value FROM import_info WHERE key = ?1",
            [key],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value)
}

/// Count stored documents of the given kind
pub fn count_documents(conn: &Connection, kind: i64) -> SinkResult<u64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM documents WHERE kind = ?1 AND path != ?2",
        rusqlite::params![kind, ROOT_PATH],
        |row| row.get(0),
    )?;
    Ok(count as u64)
}

/// Metadata keys written by the importer
pub mod keys {
    /// Name of the last import job
    pub const JOB_NAME: &str = "job_name";

    /// Timestamp when the job started (ISO 8601)
    pub const START_TIME: &str = "start_time";

    /// Timestamp when the job ended (ISO 8601)
    pub const END_TIME: &str = "end_time";

    /// Total duration in seconds
    pub const DURATION_SECS: &str = "duration_secs";

    /// Documents created by the job
    pub const TOTAL_DOCUMENTS: &str = "total_documents";

    /// Node creation errors
    pub const ERROR_COUNT: &str = "error_count";

    /// Schema version
    pub const SCHEMA_VERSION: &str = "schema_version";

    /// Job status: "running", "done", "failed", "interrupted"
    pub const STATUS: &str = "status";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_repository() {
        let conn = Connection::open_in_memory().unwrap();
        create_repository(&conn).unwrap();

        let count: i32 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='documents'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);

        let root: String = conn
            .query_row("SELECT path FROM documents WHERE parent_id IS NULL", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(root, ROOT_PATH);
    }

    #[test]
    fn test_create_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        create_repository(&conn).unwrap();
        create_repository(&conn).unwrap();

        let roots: i64 = conn
            .query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))
            .unwrap();
        assert_eq!(roots, 1);
        assert_eq!(count_documents(&conn, 1).unwrap(), 0);
    }

    #[test]
    fn test_import_info() {
        let conn = Connection::open_in_memory().unwrap();
        create_repository(&conn).unwrap();

        set_import_info(&conn, "test_key", "test_value").unwrap();
        assert_eq!(
            get_import_info(&conn, "test_key").unwrap(),
            Some("test_value".to_string())
        );
        assert_eq!(get_import_info(&conn, "nonexistent").unwrap(), None);
    }
}
