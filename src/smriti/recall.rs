//! Vector index and recall: chunked session indexing, filtered cosine
//! retrieval, and hybrid graph-aware search.
//!
//! Indexing chunks long texts into overlapping windows, embeds each chunk
//! (falling back to the deterministic hash embedder when no provider is
//! configured), and persists rows in the vectors database. Recall is
//! brute-force cosine over every row, filtered, deduplicated by source,
//! and never propagates storage errors; a best-effort empty result with a
//! logged warning is the worst case.

use std::path::PathBuf;

use rayon::prelude::*;

use super::embedding::{cosine_similarity, Embedder};
use super::graph::{GraphEdge, GraphNode};
use super::pagerank::pagerank;
use super::store::{EmbeddingEntry, PersistenceManager, SourceType};
use crate::hash::fnv1a;

/// Chunk window size in characters.
const CHUNK_SIZE: usize = 4_000;

/// Overlap between consecutive chunks.
const CHUNK_OVERLAP: usize = 500;

/// Stream snapshots index at most this many characters.
const STREAM_INDEX_LIMIT: usize = 8_000;

/// Stored text cap per entry.
const TEXT_CAP: usize = 5_000;

/// Returned match snippet cap.
const MATCH_SNIPPET_CAP: usize = 1_000;

/// Weight of embedding similarity in hybrid graph search.
const HYBRID_COSINE_WEIGHT: f64 = 0.7;

/// Weight of normalized PageRank in hybrid graph search.
const HYBRID_PAGERANK_WEIGHT: f64 = 0.3;

/// A session to index: id, project, title, and turns as (role, content).
#[derive(Debug, Clone)]
pub struct SessionDocument {
    pub id: String,
    pub project: String,
    pub title: String,
    pub turns: Vec<(String, String)>,
    /// ISO date of the session.
    pub date: Option<String>,
}

/// Recall query options.
#[derive(Debug, Clone)]
pub struct RecallOptions {
    pub top_k: usize,
    pub threshold: f64,
    /// Inclusive ISO date range.
    pub date_range: Option<(String, String)>,
    /// Require at least one shared tag when non-empty.
    pub tag_filter: Vec<String>,
    pub device_filter: Option<String>,
    /// Restrict to these source types when non-empty.
    pub source_types: Vec<SourceType>,
}

impl Default for RecallOptions {
    fn default() -> Self {
        Self {
            top_k: 10,
            threshold: 0.3,
            date_range: None,
            tag_filter: Vec::new(),
            device_filter: None,
            source_types: Vec::new(),
        }
    }
}

/// One recall hit.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RecallResult {
    pub session_id: String,
    pub title: String,
    pub relevance: f64,
    pub summary: String,
    pub source: SourceType,
    /// Matched text, capped at 1000 chars.
    pub matched_content: String,
    pub period: Option<String>,
    pub date: Option<String>,
    pub project: Option<String>,
}

/// The vector index over the persistence manager.
pub struct VectorIndex<'a> {
    store: &'a PersistenceManager,
    embedder: &'a dyn Embedder,
    /// Legacy JSON fallback consulted when the database cannot be read.
    legacy_path: Option<PathBuf>,
}

impl<'a> VectorIndex<'a> {
    pub fn new(store: &'a PersistenceManager, embedder: &'a dyn Embedder) -> Self {
        Self {
            store,
            embedder,
            legacy_path: None,
        }
    }

    /// Configure the legacy `embeddings.json` fallback path.
    pub fn with_legacy_path(mut self, path: PathBuf) -> Self {
        self.legacy_path = Some(path);
        self
    }

    /// The embedder backing this index.
    pub fn embedder(&self) -> &dyn Embedder {
        self.embedder
    }

    // -- indexing -----------------------------------------------------------

    /// Index a session: prior entries for it are replaced by fresh chunks.
    pub fn index_session(&self, session: &SessionDocument) -> usize {
        let index_text = session
            .turns
            .iter()
            .map(|(role, content)| format!("{role}: {content}"))
            .collect::<Vec<_>>()
            .join("\n");

        if let Err(err) = self.store.delete_embeddings_by_source(&session.id) {
            tracing::warn!(%err, session = %session.id, "could not clear prior session entries");
        }

        let mut indexed = 0usize;
        for (i, chunk) in chunk_text(&index_text, CHUNK_SIZE, CHUNK_OVERLAP).iter().enumerate() {
            let Ok(vector) = self.embedder.embed(chunk) else {
                tracing::warn!(session = %session.id, chunk = i, "embedding failed; chunk skipped");
                continue;
            };
            let entry = EmbeddingEntry {
                id: fnv1a(&format!("{}|chunk|{i}", session.id)),
                vector,
                source: SourceType::Session,
                source_id: session.id.clone(),
                title: session.title.clone(),
                text: cap(chunk, TEXT_CAP),
                summary: cap(chunk, 200),
                tags: Vec::new(),
                date: session.date.clone(),
                device_id: None,
                period: None,
                project: Some(session.project.clone()),
                created_at: chrono::Utc::now().timestamp_millis(),
            };
            match self.store.upsert_embedding(&entry) {
                Ok(()) => indexed += 1,
                Err(err) => tracing::warn!(%err, "embedding row not persisted"),
            }
        }
        tracing::debug!(session = %session.id, chunks = indexed, "session indexed");
        indexed
    }

    /// Index a memory stream snapshot (first 8000 chars).
    pub fn index_stream(&self, stream_type: &str, content: &str, device_id: Option<&str>) {
        let source_id = match device_id {
            Some(device) => format!("stream-{stream_type}-{device}"),
            None => format!("stream-{stream_type}"),
        };
        let snippet = cap(content, STREAM_INDEX_LIMIT);
        let Ok(vector) = self.embedder.embed(&snippet) else {
            tracing::warn!(stream = stream_type, "stream embedding failed");
            return;
        };
        let entry = EmbeddingEntry {
            id: fnv1a(&source_id),
            vector,
            source: SourceType::Stream,
            source_id,
            title: format!("{stream_type} stream"),
            text: cap(&snippet, TEXT_CAP),
            summary: cap(&snippet, 200),
            tags: vec![stream_type.to_string()],
            date: None,
            device_id: device_id.map(str::to_string),
            period: None,
            project: None,
            created_at: chrono::Utc::now().timestamp_millis(),
        };
        if let Err(err) = self.store.upsert_embedding(&entry) {
            tracing::warn!(%err, "stream entry not persisted");
        }
    }

    // -- recall -------------------------------------------------------------

    /// Score every entry against the query, filter, deduplicate by source,
    /// and return the top matches. Never errors: storage trouble degrades
    /// to the legacy file or an empty result.
    pub fn recall(&self, query: &str, options: &RecallOptions) -> Vec<RecallResult> {
        let Ok(query_vector) = self.embedder.embed(query) else {
            return Vec::new();
        };

        let wanted: Option<&[SourceType]> = if options.source_types.is_empty() {
            None
        } else {
            Some(&options.source_types)
        };
        let entries = match self.store.load_embeddings(wanted) {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!(%err, "vector database unavailable; trying legacy file");
                self.load_legacy()
            }
        };

        let mut scored: Vec<(f64, EmbeddingEntry)> = entries
            .into_par_iter()
            .filter_map(|entry| {
                let score = cosine_similarity(&query_vector, &entry.vector);
                if score < options.threshold {
                    return None;
                }
                if !passes_filters(&entry, options) {
                    return None;
                }
                Some((score, entry))
            })
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        // Deduplicate by source, keeping the best-scoring chunk.
        let mut seen = std::collections::HashSet::new();
        let mut results = Vec::new();
        for (score, entry) in scored {
            if !seen.insert(entry.source_id.clone()) {
                continue;
            }
            results.push(RecallResult {
                session_id: entry.source_id,
                title: entry.title,
                relevance: score,
                summary: entry.summary,
                source: entry.source,
                matched_content: cap(&entry.text, MATCH_SNIPPET_CAP),
                period: entry.period,
                date: entry.date,
                project: entry.project,
            });
            if results.len() >= options.top_k {
                break;
            }
        }
        results
    }

    /// Hybrid node search: cosine against node embeddings blended with
    /// PageRank normalized to the global maximum.
    pub fn search_graph(
        &self,
        query: &str,
        nodes: &[GraphNode],
        edges: &[GraphEdge],
        top_k: usize,
    ) -> Vec<(String, f64)> {
        let Ok(query_vector) = self.embedder.embed(query) else {
            return Vec::new();
        };

        let node_ids: Vec<String> = nodes.iter().map(|n| n.id.clone()).collect();
        let edge_pairs: Vec<(String, String)> = edges
            .iter()
            .filter(|e| e.is_current())
            .map(|e| (e.source.clone(), e.target.clone()))
            .collect();
        let ranks = pagerank(&node_ids, &edge_pairs);
        let max_rank = ranks.values().copied().fold(0.0f64, f64::max).max(f64::MIN_POSITIVE);

        let mut scored: Vec<(String, f64)> = nodes
            .iter()
            .map(|node| {
                let cosine = node
                    .embedding
                    .as_deref()
                    .map(|v| cosine_similarity(&query_vector, v))
                    .unwrap_or(0.0);
                let rank = ranks.get(&node.id).copied().unwrap_or(0.0) / max_rank;
                (
                    node.id.clone(),
                    HYBRID_COSINE_WEIGHT * cosine + HYBRID_PAGERANK_WEIGHT * rank,
                )
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        scored
    }

    fn load_legacy(&self) -> Vec<EmbeddingEntry> {
        let Some(path) = &self.legacy_path else {
            return Vec::new();
        };
        let Ok(raw) = std::fs::read_to_string(path) else {
            return Vec::new();
        };
        serde_json::from_str(&raw).unwrap_or_default()
    }
}

fn passes_filters(entry: &EmbeddingEntry, options: &RecallOptions) -> bool {
    if let Some((from, to)) = &options.date_range {
        match &entry.date {
            Some(date) => {
                if date < from || date > to {
                    return false;
                }
            }
            None => return false,
        }
    }
    if !options.tag_filter.is_empty()
        && !options.tag_filter.iter().any(|t| entry.tags.contains(t))
    {
        return false;
    }
    if let Some(device) = &options.device_filter {
        if entry.device_id.as_deref() != Some(device.as_str()) {
            return false;
        }
    }
    true
}

/// Split text into windows of at most `size` chars with `overlap` chars of
/// carry-over, on char boundaries.
pub fn chunk_text(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return Vec::new();
    }
    if chars.len() <= size {
        return vec![text.to_string()];
    }
    let step = size.saturating_sub(overlap).max(1);
    let mut chunks = Vec::new();
    let mut start = 0usize;
    while start < chars.len() {
        let end = (start + size).min(chars.len());
        chunks.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += step;
    }
    chunks
}

fn cap(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
