//! Path resolution for the `~/.chitragupta/` data directory.
//!
//! All durable memory lives under `~/.chitragupta/smriti/`: the four
//! stream files, per-session deltas, compaction sidecars, and the two
//! SQLite databases. `CHITRAGUPTA_HOME` overrides the root for tests and
//! sandboxed installs.

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

/// Errors from path resolution.
#[derive(Debug, Error, Diagnostic)]
pub enum PathError {
    #[error("cannot determine home directory")]
    #[diagnostic(
        code(chitragupta::paths::no_home),
        help("Set HOME or CHITRAGUPTA_HOME so the data directory can be located.")
    )]
    NoHome,

    #[error("failed to create directory: {path}")]
    #[diagnostic(
        code(chitragupta::paths::create_dir),
        help("Check that the parent directory exists and you have write permissions.")
    )]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub type PathResult<T> = std::result::Result<T, PathError>;

/// The on-disk layout of the memory layer.
#[derive(Debug, Clone)]
pub struct SmritiPaths {
    /// `~/.chitragupta/smriti/`.
    pub root: PathBuf,
}

impl SmritiPaths {
    /// Resolve from the environment.
    pub fn resolve() -> PathResult<Self> {
        let home = std::env::var("CHITRAGUPTA_HOME")
            .map(PathBuf::from)
            .or_else(|_| {
                std::env::var("HOME")
                    .map(|h| PathBuf::from(h).join(".chitragupta"))
            })
            .map_err(|_| PathError::NoHome)?;
        Ok(Self {
            root: home.join("smriti"),
        })
    }

    /// Rooted at an explicit directory (tests, embedders).
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `smriti/streams/`.
    pub fn streams_dir(&self) -> PathBuf {
        self.root.join("streams")
    }

    /// `smriti/deltas/`.
    pub fn deltas_dir(&self) -> PathBuf {
        self.root.join("deltas")
    }

    /// `smriti/compaction/`.
    pub fn compaction_dir(&self) -> PathBuf {
        self.root.join("compaction")
    }

    /// The agent database (sessions, turns, graph, kv).
    pub fn agent_db(&self) -> PathBuf {
        self.root.join("agent.sqlite")
    }

    /// The vector database (embeddings).
    pub fn vectors_db(&self) -> PathBuf {
        self.root.join("vectors.sqlite")
    }

    /// The legacy pre-SQLite embedding store.
    pub fn legacy_embeddings(&self) -> PathBuf {
        self.root.join("embeddings.json")
    }

    /// Create every directory. Idempotent.
    pub fn ensure_dirs(&self) -> PathResult<()> {
        for dir in [
            &self.root,
            &self.streams_dir(),
            &self.deltas_dir(),
            &self.compaction_dir(),
        ] {
            std::fs::create_dir_all(dir).map_err(|source| PathError::CreateDir {
                path: dir.display().to_string(),
                source,
            })?;
        }
        Ok(())
    }
}
