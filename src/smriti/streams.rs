//! Memory streams: four long-lived plain-text documents with budgeted
//! append logs, plus the compaction step that feeds them.
//!
//! `identity`, `projects`, and `tasks` are shared and append-only on disk;
//! `flow` is per-device and atomically replaced each turn. Budgets come
//! from the Sinkhorn allocator; when a stream exceeds its budget the
//! oldest unpinned entries are trimmed. Every compaction writes a JSON
//! sidecar for auditing.

use std::path::{Path, PathBuf};

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::sinkhorn::{allocate, SinkhornResult, StreamKind};

/// Errors from stream file handling.
#[derive(Debug, Error, Diagnostic)]
pub enum StreamError {
    #[error("stream I/O failed at {path}: {source}")]
    #[diagnostic(
        code(chitragupta::streams::io),
        help("Check permissions and free space under the smriti directory.")
    )]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("sidecar serialization failed: {0}")]
    #[diagnostic(
        code(chitragupta::streams::sidecar),
        help("This is a bug in the compaction report structure.")
    )]
    Sidecar(#[from] serde_json::Error),
}

pub type StreamResult<T> = std::result::Result<T, StreamError>;

/// Rough token estimate: one token per four characters, rounded up.
pub fn approx_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// One appended block in a stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntry {
    pub text: String,
    pub tokens: usize,
    /// Pinned entries survive trimming.
    pub pinned: bool,
    pub timestamp_ms: i64,
}

/// A memory stream document with its append log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryStream {
    pub kind: StreamKind,
    /// Set only for `flow` streams.
    pub device_id: Option<String>,
    entries: Vec<AppendEntry>,
}

impl MemoryStream {
    pub fn new(kind: StreamKind, device_id: Option<String>) -> Self {
        Self {
            kind,
            device_id,
            entries: Vec::new(),
        }
    }

    /// Append a block.
    pub fn append(&mut self, text: impl Into<String>, pinned: bool) {
        let text = text.into();
        let tokens = approx_tokens(&text);
        self.entries.push(AppendEntry {
            text,
            tokens,
            pinned,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
        });
    }

    /// Current token total.
    pub fn token_count(&self) -> usize {
        self.entries.iter().map(|e| e.tokens).sum()
    }

    /// Trim oldest unpinned entries until the budget is met. Pinned
    /// entries are never removed, so a budget smaller than the pinned
    /// total leaves only pinned entries behind.
    pub fn trim_to_budget(&mut self, budget: usize) -> usize {
        let mut removed = 0usize;
        while self.token_count() > budget {
            let Some(victim) = self.entries.iter().position(|e| !e.pinned) else {
                break;
            };
            self.entries.remove(victim);
            removed += 1;
        }
        removed
    }

    /// The document text, blocks separated by blank lines.
    pub fn content(&self) -> String {
        self.entries
            .iter()
            .map(|e| e.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn entries(&self) -> &[AppendEntry] {
        &self.entries
    }
}

/// One extracted compaction signal destined for a stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub stream: StreamKind,
    pub text: String,
}

/// Audit sidecar written after every compaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompactionSidecar {
    pub session_id: String,
    /// Epoch ms.
    pub timestamp: i64,
    /// Stream names that received content.
    pub streams: Vec<String>,
    pub mixing_matrix: [[f64; 4]; 4],
    pub signal_counts: [f64; 4],
    /// First ten signal texts, for inspection.
    pub signals: Vec<String>,
}

/// The full set of live streams for one host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamSet {
    pub identity: MemoryStream,
    pub projects: MemoryStream,
    pub tasks: MemoryStream,
    pub flow: MemoryStream,
}

impl StreamSet {
    pub fn new(device_id: &str) -> Self {
        Self {
            identity: MemoryStream::new(StreamKind::Identity, None),
            projects: MemoryStream::new(StreamKind::Projects, None),
            tasks: MemoryStream::new(StreamKind::Tasks, None),
            flow: MemoryStream::new(StreamKind::Flow, Some(device_id.to_string())),
        }
    }

    pub fn stream_mut(&mut self, kind: StreamKind) -> &mut MemoryStream {
        match kind {
            StreamKind::Identity => &mut self.identity,
            StreamKind::Projects => &mut self.projects,
            StreamKind::Tasks => &mut self.tasks,
            StreamKind::Flow => &mut self.flow,
        }
    }

    pub fn stream(&self, kind: StreamKind) -> &MemoryStream {
        match kind {
            StreamKind::Identity => &self.identity,
            StreamKind::Projects => &self.projects,
            StreamKind::Tasks => &self.tasks,
            StreamKind::Flow => &self.flow,
        }
    }

    /// Fold a batch of compaction signals in and enforce budgets.
    ///
    /// Returns the Sinkhorn result and the per-stream budgets used.
    pub fn compact(
        &mut self,
        session_id: &str,
        signals: &[Signal],
        total_budget: usize,
    ) -> (SinkhornResult, [usize; 4], CompactionSidecar) {
        let mut counts = [0.0f64; 4];
        for signal in signals {
            counts[signal.stream.index()] += 1.0;
        }

        let (result, budgets) = allocate(counts, total_budget);

        let mut touched = std::collections::BTreeSet::new();
        for signal in signals {
            self.stream_mut(signal.stream).append(&signal.text, false);
            touched.insert(signal.stream.as_str().to_string());
        }
        for kind in StreamKind::ALL {
            let trimmed = self
                .stream_mut(kind)
                .trim_to_budget(budgets[kind.index()]);
            if trimmed > 0 {
                tracing::debug!(stream = kind.as_str(), trimmed, "stream trimmed to budget");
            }
        }

        let sidecar = CompactionSidecar {
            session_id: session_id.to_string(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            streams: touched.into_iter().collect(),
            mixing_matrix: result.matrix,
            signal_counts: counts,
            signals: signals.iter().take(10).map(|s| s.text.clone()).collect(),
        };
        (result, budgets, sidecar)
    }
}

// ---------------------------------------------------------------------------
// On-disk layout
// ---------------------------------------------------------------------------

/// File layer for the `~/.chitragupta/smriti/` layout.
#[derive(Debug, Clone)]
pub struct StreamStore {
    base_dir: PathBuf,
}

impl StreamStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn streams_dir(&self) -> PathBuf {
        self.base_dir.join("streams")
    }

    pub fn deltas_dir(&self) -> PathBuf {
        self.base_dir.join("deltas")
    }

    pub fn compaction_dir(&self) -> PathBuf {
        self.base_dir.join("compaction")
    }

    fn stream_path(&self, kind: StreamKind, device_id: Option<&str>) -> PathBuf {
        let name = match (kind, device_id) {
            (StreamKind::Flow, Some(device)) => format!("flow-{device}.md"),
            (kind, _) => format!("{}.md", kind.as_str()),
        };
        self.streams_dir().join(name)
    }

    /// Append a block to a shared stream file.
    pub fn append_shared(&self, kind: StreamKind, text: &str) -> StreamResult<()> {
        use std::io::Write;
        let path = self.stream_path(kind, None);
        ensure_parent(&path)?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| StreamError::Io {
                path: path.display().to_string(),
                source,
            })?;
        writeln!(file, "{text}\n").map_err(|source| StreamError::Io {
            path: path.display().to_string(),
            source,
        })
    }

    /// Replace a device's flow stream atomically (write-then-rename).
    pub fn replace_flow(&self, device_id: &str, content: &str) -> StreamResult<()> {
        let path = self.stream_path(StreamKind::Flow, Some(device_id));
        ensure_parent(&path)?;
        let tmp = path.with_extension("md.tmp");
        std::fs::write(&tmp, content).map_err(|source| StreamError::Io {
            path: tmp.display().to_string(),
            source,
        })?;
        std::fs::rename(&tmp, &path).map_err(|source| StreamError::Io {
            path: path.display().to_string(),
            source,
        })
    }

    /// Read a stream file, empty when absent.
    pub fn read(&self, kind: StreamKind, device_id: Option<&str>) -> String {
        std::fs::read_to_string(self.stream_path(kind, device_id)).unwrap_or_default()
    }

    /// Write the compaction sidecar for a session.
    pub fn write_sidecar(&self, sidecar: &CompactionSidecar) -> StreamResult<PathBuf> {
        let path = self
            .compaction_dir()
            .join(format!("{}.json", sidecar.session_id));
        ensure_parent(&path)?;
        let json = serde_json::to_string_pretty(sidecar)?;
        std::fs::write(&path, json).map_err(|source| StreamError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(path)
    }

    /// Write a session's delta document.
    pub fn write_delta(&self, session_id: &str, content: &str) -> StreamResult<()> {
        let path = self.deltas_dir().join(format!("{session_id}.md"));
        ensure_parent(&path)?;
        std::fs::write(&path, content).map_err(|source| StreamError::Io {
            path: path.display().to_string(),
            source,
        })
    }
}

fn ensure_parent(path: &Path) -> StreamResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| StreamError::Io {
            path: parent.display().to_string(),
            source,
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_estimate_rounds_up() {
        assert_eq!(approx_tokens(""), 0);
        assert_eq!(approx_tokens("abc"), 1);
        assert_eq!(approx_tokens("abcd"), 1);
        assert_eq!(approx_tokens("abcde"), 2);
    }

    #[test]
    fn trim_removes_oldest_unpinned_first() {
        let mut stream = MemoryStream::new(StreamKind::Tasks, None);
        stream.append("oldest entry with some words", false);
        stream.append("pinned decision that must stay", true);
        stream.append("newest entry with some words", false);

        let pinned_tokens = approx_tokens("pinned decision that must stay");
        let newest_tokens = approx_tokens("newest entry with some words");
        stream.trim_to_budget(pinned_tokens + newest_tokens);

        assert_eq!(stream.entries().len(), 2);
        assert!(stream.content().contains("pinned decision"));
        assert!(stream.content().contains("newest entry"));
        assert!(!stream.content().contains("oldest entry"));
    }

    #[test]
    fn trim_never_drops_pinned() {
        let mut stream = MemoryStream::new(StreamKind::Identity, None);
        stream.append("pinned identity fact", true);
        stream.append("disposable note", false);
        stream.trim_to_budget(0);
        assert_eq!(stream.entries().len(), 1);
        assert!(stream.entries()[0].pinned);
    }

    #[test]
    fn compact_enforces_budgets_and_reports() {
        let mut streams = StreamSet::new("laptop");
        let signals: Vec<Signal> = (0..30)
            .map(|i| Signal {
                stream: StreamKind::Projects,
                text: format!("project signal number {i} with a meaningful sentence"),
            })
            .chain((0..3).map(|i| Signal {
                stream: StreamKind::Identity,
                text: format!("identity signal {i}"),
            }))
            .collect();

        let (result, budgets, sidecar) = streams.compact("sess-1", &signals, 200);
        assert!(result.converged);
        assert_eq!(budgets.iter().sum::<usize>(), 200);
        for kind in StreamKind::ALL {
            assert!(
                streams.stream(kind).token_count() <= budgets[kind.index()],
                "{kind} over budget"
            );
        }
        assert_eq!(sidecar.session_id, "sess-1");
        assert_eq!(sidecar.signals.len(), 10);
        assert!((sidecar.signal_counts[1] - 30.0).abs() < f64::EPSILON);
        assert!(sidecar.streams.contains(&"projects".to_string()));
    }

    #[test]
    fn shared_streams_append_on_disk() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = StreamStore::new(dir.path());
        store.append_shared(StreamKind::Projects, "first block").unwrap();
        store.append_shared(StreamKind::Projects, "second block").unwrap();

        let content = store.read(StreamKind::Projects, None);
        let first = content.find("first block").unwrap();
        let second = content.find("second block").unwrap();
        assert!(first < second);
    }

    #[test]
    fn flow_is_replaced_not_appended() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = StreamStore::new(dir.path());
        store.replace_flow("laptop", "state one").unwrap();
        store.replace_flow("laptop", "state two").unwrap();

        let content = store.read(StreamKind::Flow, Some("laptop"));
        assert_eq!(content, "state two");
    }

    #[test]
    fn flow_files_are_per_device() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = StreamStore::new(dir.path());
        store.replace_flow("laptop", "laptop flow").unwrap();
        store.replace_flow("desktop", "desktop flow").unwrap();
        assert_eq!(store.read(StreamKind::Flow, Some("laptop")), "laptop flow");
        assert_eq!(store.read(StreamKind::Flow, Some("desktop")), "desktop flow");
    }

    #[test]
    fn sidecar_written_as_json() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = StreamStore::new(dir.path());
        let mut streams = StreamSet::new("laptop");
        let (_, _, sidecar) = streams.compact(
            "sess-9",
            &[Signal {
                stream: StreamKind::Tasks,
                text: "finish the migration".into(),
            }],
            100,
        );
        let path = store.write_sidecar(&sidecar).unwrap();
        let raw = std::fs::read_to_string(path).unwrap();
        let parsed: CompactionSidecar = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.session_id, "sess-9");
        assert_eq!(parsed.signals, vec!["finish the migration".to_string()]);
    }

    #[test]
    fn missing_stream_reads_empty() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = StreamStore::new(dir.path());
        assert_eq!(store.read(StreamKind::Identity, None), "");
    }
}
