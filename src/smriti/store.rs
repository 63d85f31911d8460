//! Persistence manager: SQLite handles for the agent and vector databases.
//!
//! One lazily opened connection per database file, each behind a mutex so
//! there is exactly one writer per database; readers share the same handle
//! cooperatively. Schema initialization is idempotent, batch writes are
//! transactional, and the one-shot legacy `embeddings.json` migration runs
//! under the store lock so readers never observe a half-migrated state.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use miette::Diagnostic;
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::message::ToolCallRecord;

use super::embedding::{blob_to_vector, vector_to_blob};
use super::graph::{GraphEdge, GraphNode};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from the persistence layer.
#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("failed to open database at {path}")]
    #[diagnostic(
        code(chitragupta::store::open),
        help("Check that the parent directory exists and is writable.")
    )]
    Open {
        path: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("database operation failed: {message}")]
    #[diagnostic(
        code(chitragupta::store::sqlite),
        help(
            "The statement failed against SQLite. If this persists, the database file \
             may be corrupt; move it aside and let the schema re-initialize."
        )
    )]
    Sqlite { message: String },

    #[error("legacy migration failed: {message}")]
    #[diagnostic(
        code(chitragupta::store::migration),
        help(
            "The embeddings.json import did not complete. The database is now read-only \
             to avoid mixing states; fix or remove the legacy file and restart."
        )
    )]
    Migration { message: String },

    #[error("database is read-only after a failed migration")]
    #[diagnostic(
        code(chitragupta::store::read_only),
        help("Resolve the earlier migration failure and reopen the store.")
    )]
    ReadOnly,

    #[error("serialization error: {message}")]
    #[diagnostic(
        code(chitragupta::store::serde),
        help("A row's JSON column could not be encoded or decoded. Re-index the source data.")
    )]
    Serialization { message: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Embedding(#[from] super::embedding::EmbeddingError),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Sqlite {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization {
            message: err.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Embedding entry
// ---------------------------------------------------------------------------

/// What produced an embedding entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Session,
    Stream,
    DailySummary,
    MonthlySummary,
    YearlySummary,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Session => "session",
            Self::Stream => "stream",
            Self::DailySummary => "daily_summary",
            Self::MonthlySummary => "monthly_summary",
            Self::YearlySummary => "yearly_summary",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "session" => Some(Self::Session),
            "stream" => Some(Self::Stream),
            "daily_summary" => Some(Self::DailySummary),
            "monthly_summary" => Some(Self::MonthlySummary),
            "yearly_summary" => Some(Self::YearlySummary),
            _ => None,
        }
    }
}

/// One indexed embedding row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingEntry {
    pub id: String,
    pub vector: Vec<f32>,
    pub source: SourceType,
    pub source_id: String,
    pub title: String,
    /// Indexed text, truncated to 5000 chars at indexing time.
    pub text: String,
    pub summary: String,
    pub tags: Vec<String>,
    /// ISO date of the underlying material, if dated.
    pub date: Option<String>,
    pub device_id: Option<String>,
    /// Consolidation period ("2025", "2025-07", "2025-07-31"), if any.
    pub period: Option<String>,
    pub project: Option<String>,
    /// Epoch ms.
    pub created_at: i64,
}

/// Metadata JSON column contents for an embedding row.
#[derive(Debug, Serialize, Deserialize, Default)]
struct EmbeddingMetadata {
    title: String,
    summary: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    device_id: Option<String>,
    #[serde(default)]
    period: Option<String>,
    #[serde(default)]
    project: Option<String>,
}

/// One row of the `turns` table, used by offline procedure mining.
#[derive(Debug, Clone)]
pub struct TurnRow {
    pub session_id: String,
    pub turn_number: i64,
    pub role: String,
    pub content: String,
    pub tool_calls: Vec<ToolCallRecord>,
}

// ---------------------------------------------------------------------------
// The manager
// ---------------------------------------------------------------------------

const AGENT_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS sessions (
    id          TEXT PRIMARY KEY,
    project     TEXT NOT NULL DEFAULT '',
    title       TEXT NOT NULL DEFAULT '',
    created_at  INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS turns (
    session_id  TEXT NOT NULL,
    turn_number INTEGER NOT NULL,
    role        TEXT NOT NULL,
    content     TEXT NOT NULL DEFAULT '',
    tool_calls  TEXT NOT NULL DEFAULT '[]',
    created_at  INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (session_id, turn_number)
);
CREATE TABLE IF NOT EXISTS graph_nodes (
    id        TEXT PRIMARY KEY,
    node_type TEXT NOT NULL,
    label     TEXT NOT NULL DEFAULT '',
    content   TEXT NOT NULL DEFAULT '',
    metadata  TEXT NOT NULL DEFAULT '{}'
);
CREATE TABLE IF NOT EXISTS graph_edges (
    rowid_alias   INTEGER PRIMARY KEY AUTOINCREMENT,
    source        TEXT NOT NULL,
    target        TEXT NOT NULL,
    relationship  TEXT NOT NULL,
    weight        REAL NOT NULL DEFAULT 0,
    valid_from    TEXT NOT NULL,
    valid_until   TEXT,
    recorded_at   TEXT NOT NULL,
    superseded_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_edges_pair ON graph_edges (source, target);
CREATE TABLE IF NOT EXISTS kv (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
";

const VECTORS_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS embeddings (
    id          TEXT PRIMARY KEY,
    vector      BLOB NOT NULL,
    text        TEXT NOT NULL DEFAULT '',
    source_type TEXT NOT NULL,
    source_id   TEXT NOT NULL DEFAULT '',
    dimensions  INTEGER NOT NULL,
    metadata    TEXT NOT NULL DEFAULT '{}',
    created_at  INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_embeddings_source ON embeddings (source_id);
CREATE INDEX IF NOT EXISTS idx_embeddings_type ON embeddings (source_type);
";

/// SQLite handles for the agent and vector databases.
pub struct PersistenceManager {
    agent: Mutex<Connection>,
    vectors: Mutex<Connection>,
    vectors_read_only: std::sync::atomic::AtomicBool,
}

impl PersistenceManager {
    /// Open (or create) both databases at the given paths.
    pub fn open(agent_path: &Path, vectors_path: &Path) -> StoreResult<Self> {
        let agent = Self::open_one(agent_path, AGENT_SCHEMA)?;
        let vectors = Self::open_one(vectors_path, VECTORS_SCHEMA)?;
        tracing::info!(
            agent = %agent_path.display(),
            vectors = %vectors_path.display(),
            "persistence manager ready"
        );
        Ok(Self {
            agent: Mutex::new(agent),
            vectors: Mutex::new(vectors),
            vectors_read_only: std::sync::atomic::AtomicBool::new(false),
        })
    }

    /// In-memory databases for tests and memory-only mode.
    pub fn in_memory() -> StoreResult<Self> {
        let agent = Connection::open_in_memory()?;
        agent.execute_batch(AGENT_SCHEMA)?;
        let vectors = Connection::open_in_memory()?;
        vectors.execute_batch(VECTORS_SCHEMA)?;
        Ok(Self {
            agent: Mutex::new(agent),
            vectors: Mutex::new(vectors),
            vectors_read_only: std::sync::atomic::AtomicBool::new(false),
        })
    }

    fn open_one(path: &Path, schema: &str) -> StoreResult<Connection> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Sqlite {
                message: format!("cannot create {}: {e}", parent.display()),
            })?;
        }
        let conn = Connection::open(path).map_err(|source| StoreError::Open {
            path: path.display().to_string(),
            source,
        })?;
        conn.execute_batch(schema)?;
        Ok(conn)
    }

    fn vectors_writable(&self) -> StoreResult<()> {
        if self.vectors_read_only.load(std::sync::atomic::Ordering::Relaxed) {
            Err(StoreError::ReadOnly)
        } else {
            Ok(())
        }
    }

    // -- sessions / turns ---------------------------------------------------

    /// Create or refresh a session row.
    pub fn upsert_session(&self, id: &str, project: &str, title: &str) -> StoreResult<()> {
        let conn = self.agent.lock().unwrap_or_else(|p| p.into_inner());
        conn.execute(
            "INSERT INTO sessions (id, project, title, created_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET project = ?2, title = ?3",
            params![id, project, title, chrono::Utc::now().timestamp_millis()],
        )?;
        Ok(())
    }

    /// Append one turn with its tool-call log.
    pub fn append_turn(
        &self,
        session_id: &str,
        turn_number: i64,
        role: &str,
        content: &str,
        tool_calls: &[ToolCallRecord],
    ) -> StoreResult<()> {
        let encoded = serde_json::to_string(tool_calls)?;
        let conn = self.agent.lock().unwrap_or_else(|p| p.into_inner());
        conn.execute(
            "INSERT OR REPLACE INTO turns
             (session_id, turn_number, role, content, tool_calls, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                session_id,
                turn_number,
                role,
                content,
                encoded,
                chrono::Utc::now().timestamp_millis()
            ],
        )?;
        Ok(())
    }

    /// All turns for sessions of a project, ordered by session then turn.
    pub fn turns_for_project(&self, project: &str) -> StoreResult<Vec<TurnRow>> {
        let conn = self.agent.lock().unwrap_or_else(|p| p.into_inner());
        let mut stmt = conn.prepare(
            "SELECT t.session_id, t.turn_number, t.role, t.content, t.tool_calls
             FROM turns t JOIN sessions s ON s.id = t.session_id
             WHERE s.project = ?1
             ORDER BY t.session_id, t.turn_number",
        )?;
        let rows = stmt.query_map(params![project], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut turns = Vec::new();
        for row in rows {
            let (session_id, turn_number, role, content, tool_calls_json) = row?;
            let tool_calls: Vec<ToolCallRecord> =
                serde_json::from_str(&tool_calls_json).unwrap_or_default();
            turns.push(TurnRow {
                session_id,
                turn_number,
                role,
                content,
                tool_calls,
            });
        }
        Ok(turns)
    }

    // -- graph --------------------------------------------------------------

    /// Insert or replace a graph node.
    pub fn upsert_node(&self, node: &GraphNode) -> StoreResult<()> {
        let node_type = serde_json::to_string(&node.node_type)?;
        let conn = self.agent.lock().unwrap_or_else(|p| p.into_inner());
        conn.execute(
            "INSERT OR REPLACE INTO graph_nodes (id, node_type, label, content, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                node.id,
                node_type.trim_matches('"'),
                node.label,
                node.content,
                node.metadata.to_string()
            ],
        )?;
        Ok(())
    }

    /// Append edges in one transaction.
    pub fn insert_edges(&self, edges: &[GraphEdge]) -> StoreResult<()> {
        let mut conn = self.agent.lock().unwrap_or_else(|p| p.into_inner());
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO graph_edges
                 (source, target, relationship, weight, valid_from, valid_until,
                  recorded_at, superseded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for edge in edges {
                stmt.execute(params![
                    edge.source,
                    edge.target,
                    edge.relationship,
                    edge.weight,
                    edge.valid_from.to_rfc3339(),
                    edge.valid_until.map(|t| t.to_rfc3339()),
                    edge.recorded_at.to_rfc3339(),
                    edge.superseded_at.map(|t| t.to_rfc3339()),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Replace the whole edge set (used after compaction).
    pub fn replace_edges(&self, edges: &[GraphEdge]) -> StoreResult<()> {
        {
            let conn = self.agent.lock().unwrap_or_else(|p| p.into_inner());
            conn.execute("DELETE FROM graph_edges", [])?;
        }
        self.insert_edges(edges)
    }

    /// Load every edge.
    pub fn load_edges(&self) -> StoreResult<Vec<GraphEdge>> {
        let conn = self.agent.lock().unwrap_or_else(|p| p.into_inner());
        let mut stmt = conn.prepare(
            "SELECT source, target, relationship, weight, valid_from, valid_until,
                    recorded_at, superseded_at
             FROM graph_edges ORDER BY rowid_alias",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, f64>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, Option<String>>(7)?,
            ))
        })?;

        let mut edges = Vec::new();
        for row in rows {
            let (source, target, relationship, weight, vf, vu, ra, sa) = row?;
            edges.push(GraphEdge {
                source,
                target,
                relationship,
                weight,
                valid_from: parse_rfc3339_or_epoch(&vf),
                valid_until: vu.as_deref().map(parse_rfc3339_or_epoch),
                recorded_at: parse_rfc3339_or_epoch(&ra),
                superseded_at: sa.as_deref().map(parse_rfc3339_or_epoch),
            });
        }
        Ok(edges)
    }

    /// Load every node.
    pub fn load_nodes(&self) -> StoreResult<Vec<GraphNode>> {
        let conn = self.agent.lock().unwrap_or_else(|p| p.into_inner());
        let mut stmt =
            conn.prepare("SELECT id, node_type, label, content, metadata FROM graph_nodes")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut nodes = Vec::new();
        for row in rows {
            let (id, node_type, label, content, metadata) = row?;
            let node_type = serde_json::from_str(&format!("\"{node_type}\""))
                .unwrap_or(super::graph::NodeType::Entity);
            nodes.push(GraphNode {
                id,
                node_type,
                label,
                content,
                embedding: None,
                metadata: serde_json::from_str(&metadata).unwrap_or(serde_json::Value::Null),
            });
        }
        Ok(nodes)
    }

    // -- key/value ----------------------------------------------------------

    /// Store an opaque value (bandit state, snapshots).
    pub fn put_kv(&self, key: &str, value: &str) -> StoreResult<()> {
        let conn = self.agent.lock().unwrap_or_else(|p| p.into_inner());
        conn.execute(
            "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn get_kv(&self, key: &str) -> StoreResult<Option<String>> {
        let conn = self.agent.lock().unwrap_or_else(|p| p.into_inner());
        let value = conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get::<_, String>(0)
            })
            .optional()?;
        Ok(value)
    }

    // -- embeddings ---------------------------------------------------------

    /// Insert or replace one embedding row.
    pub fn upsert_embedding(&self, entry: &EmbeddingEntry) -> StoreResult<()> {
        self.vectors_writable()?;
        let metadata = serde_json::to_string(&EmbeddingMetadata {
            title: entry.title.clone(),
            summary: entry.summary.clone(),
            tags: entry.tags.clone(),
            date: entry.date.clone(),
            device_id: entry.device_id.clone(),
            period: entry.period.clone(),
            project: entry.project.clone(),
        })?;
        let conn = self.vectors.lock().unwrap_or_else(|p| p.into_inner());
        conn.execute(
            "INSERT OR REPLACE INTO embeddings
             (id, vector, text, source_type, source_id, dimensions, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                entry.id,
                vector_to_blob(&entry.vector),
                entry.text,
                entry.source.as_str(),
                entry.source_id,
                entry.vector.len() as i64,
                metadata,
                entry.created_at,
            ],
        )?;
        Ok(())
    }

    /// Remove every row indexed from a given source.
    pub fn delete_embeddings_by_source(&self, source_id: &str) -> StoreResult<usize> {
        self.vectors_writable()?;
        let conn = self.vectors.lock().unwrap_or_else(|p| p.into_inner());
        let deleted = conn.execute(
            "DELETE FROM embeddings WHERE source_id = ?1",
            params![source_id],
        )?;
        Ok(deleted)
    }

    /// Load embedding rows, optionally restricted to source types.
    pub fn load_embeddings(&self, source_types: Option<&[SourceType]>) -> StoreResult<Vec<EmbeddingEntry>> {
        let conn = self.vectors.lock().unwrap_or_else(|p| p.into_inner());
        let mut stmt = conn.prepare(
            "SELECT id, vector, text, source_type, source_id, metadata, created_at
             FROM embeddings",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Vec<u8>>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, i64>(6)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (id, blob, text, source_type, source_id, metadata_json, created_at) = row?;
            let Some(source) = SourceType::parse(&source_type) else {
                tracing::warn!(id = %id, source_type = %source_type, "skipping unknown source type");
                continue;
            };
            if let Some(wanted) = source_types {
                if !wanted.contains(&source) {
                    continue;
                }
            }
            let vector = match blob_to_vector(&blob) {
                Ok(v) => v,
                Err(err) => {
                    tracing::warn!(id = %id, %err, "skipping corrupt vector row");
                    continue;
                }
            };
            let meta: EmbeddingMetadata =
                serde_json::from_str(&metadata_json).unwrap_or_default();
            entries.push(EmbeddingEntry {
                id,
                vector,
                source,
                source_id,
                title: meta.title,
                text,
                summary: meta.summary,
                tags: meta.tags,
                date: meta.date,
                device_id: meta.device_id,
                period: meta.period,
                project: meta.project,
                created_at,
            });
        }
        Ok(entries)
    }

    // -- legacy migration ---------------------------------------------------

    /// One-shot import of a legacy `embeddings.json` file.
    ///
    /// Rows are inserted with `INSERT OR IGNORE`, so re-running against an
    /// already-migrated database is harmless. On success the legacy file is
    /// renamed to `.bak`; on failure the vector database drops to read-only.
    pub fn migrate_legacy_embeddings(&self, legacy_path: &Path) -> StoreResult<usize> {
        if !legacy_path.exists() {
            return Ok(0);
        }
        match self.try_migrate(legacy_path) {
            Ok(count) => {
                tracing::info!(count, path = %legacy_path.display(), "migrated legacy embeddings");
                Ok(count)
            }
            Err(err) => {
                tracing::error!(%err, "legacy embedding migration failed; vectors now read-only");
                self.vectors_read_only
                    .store(true, std::sync::atomic::Ordering::Relaxed);
                Err(StoreError::Migration {
                    message: err.to_string(),
                })
            }
        }
    }

    fn try_migrate(&self, legacy_path: &Path) -> StoreResult<usize> {
        let raw = std::fs::read_to_string(legacy_path).map_err(|e| StoreError::Migration {
            message: format!("cannot read {}: {e}", legacy_path.display()),
        })?;
        let entries: Vec<EmbeddingEntry> =
            serde_json::from_str(&raw).map_err(|e| StoreError::Migration {
                message: format!("cannot parse {}: {e}", legacy_path.display()),
            })?;

        let mut count = 0usize;
        {
            let mut conn = self.vectors.lock().unwrap_or_else(|p| p.into_inner());
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT OR IGNORE INTO embeddings
                     (id, vector, text, source_type, source_id, dimensions, metadata, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                )?;
                for entry in &entries {
                    let metadata = serde_json::to_string(&EmbeddingMetadata {
                        title: entry.title.clone(),
                        summary: entry.summary.clone(),
                        tags: entry.tags.clone(),
                        date: entry.date.clone(),
                        device_id: entry.device_id.clone(),
                        period: entry.period.clone(),
                        project: entry.project.clone(),
                    })?;
                    count += stmt.execute(params![
                        entry.id,
                        vector_to_blob(&entry.vector),
                        entry.text,
                        entry.source.as_str(),
                        entry.source_id,
                        entry.vector.len() as i64,
                        metadata,
                        entry.created_at,
                    ])?;
                }
            }
            tx.commit()?;
        }

        let backup: PathBuf = legacy_path.with_extension("json.bak");
        std::fs::rename(legacy_path, &backup).map_err(|e| StoreError::Migration {
            message: format!("cannot rename legacy file: {e}"),
        })?;
        Ok(count)
    }
}

fn parse_rfc3339_or_epoch(value: &str) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&chrono::Utc))
        .unwrap_or_else(|_| chrono::TimeZone::timestamp_millis_opt(&chrono::Utc, 0).single().unwrap_or_default())
}

impl std::fmt::Debug for PersistenceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceManager").finish_non_exhaustive()
    }
}
