//! SQLite document repository
//!
//! Each session owns its own connection. Write transactions are opened lazily
//! with `BEGIN IMMEDIATE` on the first write after a commit, so a session only
//! holds the database write lock for the duration of one batch.

use super::schema::{self, keys, ROOT_PATH};
use super::{DocKind, DocumentSink, SinkSession, TargetContainer};
use crate::error::{SinkError, SinkResult};
use crate::import::history::{JobHistory, JobSummary};
use crate::source::SourceNode;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// How long a session waits for another session's batch to commit
const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(60);

/// Document repository stored in a single SQLite file
#[derive(Debug, Clone)]
pub struct SqliteRepository {
    path: PathBuf,
    busy_timeout: Duration,
}

impl SqliteRepository {
    /// Open a repository, creating the file and schema if needed
    pub fn open(path: impl AsRef<Path>) -> SinkResult<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path).map_err(|e| SinkError::CreateFailed {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        schema::create_repository(&conn)?;

        info!(path = %path.display(), "Repository opened");
        Ok(Self {
            path,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        })
    }

    /// Override the lock wait timeout of sessions
    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// Path of the repository file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> SinkResult<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(self.busy_timeout)?;
        schema::configure_connection(&conn)?;
        Ok(conn)
    }

    /// Create every missing folder of `path` and return the deepest one
    pub fn ensure_container(&self, path: &str) -> SinkResult<TargetContainer> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;

        let mut current = TargetContainer::new(root_id(&tx)?, ROOT_PATH);
        for name in path.split('/').filter(|s| !s.is_empty()) {
            let child_path = current.child_path(name);
            let existing: Option<i64> = tx
                .query_row(
                    "SELECT id FROM documents WHERE path = ?1 AND kind = 1",
                    [&child_path],
                    |row| row.get(0),
                )
                .optional()?;
            let id = match existing {
                Some(id) => id,
                None => {
                    tx.execute(
                        "INSERT INTO documents (parent_id, name, path, kind, created_at)
                         VALUES (?1, ?2, ?3, 1, ?4)",
                        params![current.id, name, child_path, chrono::Utc::now().to_rfc3339()],
                    )?;
                    tx.last_insert_rowid()
                }
            };
            current = TargetContainer::new(id, child_path);
        }

        tx.commit()?;
        Ok(current)
    }

    /// Number of documents of a kind (the root container excluded)
    pub fn count(&self, kind: DocKind) -> SinkResult<u64> {
        let conn = self.connect()?;
        schema::count_documents(&conn, kind.as_db_int())
    }

    /// Read a metadata value written by the job history
    pub fn import_info(&self, key: &str) -> SinkResult<Option<String>> {
        let conn = self.connect()?;
        schema::get_import_info(&conn, key)
    }

    /// Size of the repository file on disk
    pub fn file_size(&self) -> Option<u64> {
        std::fs::metadata(&self.path).ok().map(|m| m.len())
    }

    /// Switch the file to read-optimized settings
    pub fn finalize(&self) -> SinkResult<()> {
        let conn = self.connect()?;
        schema::optimize_for_reads(&conn)
    }
}

fn root_id(conn: &Connection) -> SinkResult<i64> {
    let id = conn.query_row(
        "SELECT id FROM documents WHERE path = ?1",
        [ROOT_PATH],
        |row| row.get(0),
    )?;
    Ok(id)
}

impl DocumentSink for SqliteRepository {
    fn open_session(&self) -> SinkResult<Box<dyn SinkSession>> {
        Ok(Box::new(SqliteSession {
            conn: self.connect()?,
            in_transaction: false,
        }))
    }

    fn describe(&self) -> String {
        format!("sqlite:{}", self.path.display())
    }
}

impl JobHistory for SqliteRepository {
    fn log_job_started(&self, job: &str) -> SinkResult<()> {
        let conn = self.connect()?;
        schema::set_import_info(&conn, keys::JOB_NAME, job)?;
        schema::set_import_info(&conn, keys::START_TIME, &chrono::Utc::now().to_rfc3339())?;
        schema::set_import_info(&conn, keys::STATUS, "running")?;
        Ok(())
    }

    fn log_job_ended(&self, job: &str, summary: &JobSummary) -> SinkResult<()> {
        let conn = self.connect()?;
        schema::set_import_info(&conn, keys::JOB_NAME, job)?;
        schema::set_import_info(&conn, keys::END_TIME, &chrono::Utc::now().to_rfc3339())?;
        schema::set_import_info(
            &conn,
            keys::DURATION_SECS,
            &summary.duration.as_secs().to_string(),
        )?;
        schema::set_import_info(&conn, keys::TOTAL_DOCUMENTS, &summary.documents.to_string())?;
        schema::set_import_info(&conn, keys::ERROR_COUNT, &summary.node_errors.to_string())?;
        schema::set_import_info(&conn, keys::STATUS, summary.status)?;
        Ok(())
    }
}

/// Session over one SQLite connection
struct SqliteSession {
    conn: Connection,
    in_transaction: bool,
}

impl SqliteSession {
    fn begin(&mut self) -> SinkResult<()> {
        if !self.in_transaction {
            self.conn.execute_batch("BEGIN IMMEDIATE")?;
            self.in_transaction = true;
        }
        Ok(())
    }
}

impl SinkSession for SqliteSession {
    fn resolve(&mut self, path: &str) -> SinkResult<Option<TargetContainer>> {
        let id: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM documents WHERE path = ?1 AND kind = 1",
                [path],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id.map(|id| TargetContainer::new(id, path)))
    }

    fn create_container(
        &mut self,
        parent: &TargetContainer,
        node: &dyn SourceNode,
    ) -> SinkResult<TargetContainer> {
        let path = parent.child_path(node.name());
        self.begin()?;
        self.conn.execute(
            "INSERT INTO documents (parent_id, name, path, kind, source_path, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                parent.id,
                node.name(),
                path,
                DocKind::Folder.as_db_int(),
                node.path(),
                chrono::Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(TargetContainer::new(self.conn.last_insert_rowid(), path))
    }

    fn create_leaf(&mut self, parent: &TargetContainer, node: &dyn SourceNode) -> SinkResult<()> {
        // Only the first document of a batch is read before BEGIN IMMEDIATE;
        // later reads hold the write lock, so readers use WAL snapshots
        let payload = node.payload()?;
        let metadata = if payload.metadata.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&payload.metadata)?)
        };

        self.begin()?;
        self.conn.execute(
            "INSERT INTO documents (parent_id, name, path, kind, size, content, metadata, source_path, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                parent.id,
                node.name(),
                parent.child_path(node.name()),
                DocKind::File.as_db_int(),
                payload.len() as i64,
                payload.content,
                metadata,
                node.path(),
                chrono::Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn commit(&mut self) -> SinkResult<()> {
        if self.in_transaction {
            self.conn
                .execute_batch("COMMIT")
                .map_err(|e| SinkError::Commit(e.to_string()))?;
            self.in_transaction = false;
            debug!("Batch committed");
        }
        Ok(())
    }

    fn close(mut self: Box<Self>) -> SinkResult<()> {
        self.commit()
    }
}
