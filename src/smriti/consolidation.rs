//! Consolidation summaries: indexing and hierarchical temporal search.
//!
//! Daily, monthly, and yearly rollups are produced by an external
//! collaborator as markdown; the core extracts the high-signal lines,
//! indexes them in the vector store, and searches them coarse-to-fine:
//! year hits open their months, month hits open their days. Deeper levels
//! score higher via depth boosts.

use crate::hash::fnv1a;

use super::recall::{RecallOptions, VectorIndex};
use super::store::{EmbeddingEntry, PersistenceManager, SourceType};

/// Summary granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsolidationLevel {
    Daily,
    Monthly,
    Yearly,
}

impl ConsolidationLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Monthly => "monthly",
            Self::Yearly => "yearly",
        }
    }

    pub fn source_type(&self) -> SourceType {
        match self {
            Self::Daily => SourceType::DailySummary,
            Self::Monthly => SourceType::MonthlySummary,
            Self::Yearly => SourceType::YearlySummary,
        }
    }

    /// Depth boost applied to hit scores: finer levels are worth more.
    pub fn depth_boost(&self) -> f64 {
        match self {
            Self::Yearly => 0.6,
            Self::Monthly => 0.8,
            Self::Daily => 1.0,
        }
    }
}

/// One hierarchical search hit.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TemporalHit {
    pub score: f64,
    /// "2025", "2025-07", or "2025-07-31".
    pub period: String,
    pub level: ConsolidationLevel,
    /// Matched text, capped at 300 chars.
    pub snippet: String,
    /// Set for daily hits only.
    pub date: Option<String>,
    pub project: Option<String>,
}

/// Per-stage hit limit while walking down the hierarchy.
const STAGE_LIMIT: usize = 5;

/// Pull the high-signal lines out of a summary, per level.
///
/// Daily keeps headers and fact/decision/preference/topic lines; monthly
/// keeps metrics, vasana names, and recommendations; yearly keeps the
/// annual summary headers and trend lines. An extraction that comes up
/// empty falls back to the leading text.
pub fn extract_index_text(level: ConsolidationLevel, markdown: &str) -> String {
    let mut lines: Vec<&str> = Vec::new();
    for line in markdown.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let lower = trimmed.to_lowercase();
        let keep = match level {
            ConsolidationLevel::Daily => {
                trimmed.starts_with('#')
                    || lower.contains("fact:")
                    || lower.contains("decision:")
                    || lower.contains("preference:")
                    || lower.contains("topic:")
            }
            ConsolidationLevel::Monthly => {
                trimmed.starts_with('#')
                    || lower.contains("metric")
                    || lower.contains("vasana")
                    || lower.contains("recommendation")
            }
            ConsolidationLevel::Yearly => {
                trimmed.starts_with('#') || lower.contains("trend") || lower.contains("summary")
            }
        };
        if keep {
            lines.push(trimmed);
        }
    }
    if lines.is_empty() {
        markdown.chars().take(500).collect()
    } else {
        lines.join("\n")
    }
}

/// Consolidation index over the vector store.
pub struct Consolidation<'a> {
    index: &'a VectorIndex<'a>,
    store: &'a PersistenceManager,
}

impl<'a> Consolidation<'a> {
    pub fn new(index: &'a VectorIndex<'a>, store: &'a PersistenceManager) -> Self {
        Self { index, store }
    }

    /// Index one summary document. Re-indexing the same
    /// (level, period, project) replaces the prior entry.
    pub fn index_summary(
        &self,
        level: ConsolidationLevel,
        period: &str,
        markdown: &str,
        project: Option<&str>,
    ) {
        let text = extract_index_text(level, markdown);
        let Ok(vector) = self.index.embedder().embed(&text) else {
            tracing::warn!(level = level.as_str(), period, "summary embedding failed");
            return;
        };
        let id = fnv1a(&format!(
            "{}|{}|{}",
            level.as_str(),
            period,
            project.unwrap_or("")
        ));
        let entry = EmbeddingEntry {
            id,
            vector,
            source: level.source_type(),
            source_id: format!("{}-{}", level.as_str(), period),
            title: format!("{} summary {period}", level.as_str()),
            text: text.chars().take(5_000).collect(),
            summary: text.chars().take(200).collect(),
            tags: vec![level.as_str().to_string()],
            date: match level {
                ConsolidationLevel::Daily => Some(period.to_string()),
                _ => None,
            },
            device_id: None,
            period: Some(period.to_string()),
            project: project.map(str::to_string),
            created_at: chrono::Utc::now().timestamp_millis(),
        };
        if let Err(err) = self.store.upsert_embedding(&entry) {
            tracing::warn!(%err, "summary entry not persisted");
        }
    }

    /// Coarse-to-fine temporal search.
    ///
    /// Yearly hits open their months, monthly hits open their days. When a
    /// level has no hits at all, the search starts one level finer.
    /// Results deduplicate on (level, period) and sort by boosted score.
    pub fn hierarchical_search(
        &self,
        query: &str,
        project: Option<&str>,
        limit: usize,
    ) -> Vec<TemporalHit> {
        let mut hits: Vec<TemporalHit> = Vec::new();

        let yearly = self.query_level(query, ConsolidationLevel::Yearly, project, None);
        if yearly.is_empty() {
            let monthly = self.query_level(query, ConsolidationLevel::Monthly, project, None);
            if monthly.is_empty() {
                hits.extend(self.query_level(query, ConsolidationLevel::Daily, project, None));
            } else {
                for month in &monthly {
                    hits.extend(self.query_level(
                        query,
                        ConsolidationLevel::Daily,
                        project,
                        Some(&month.period),
                    ));
                }
                hits.extend(monthly);
            }
        } else {
            for year in &yearly {
                let monthly = self.query_level(
                    query,
                    ConsolidationLevel::Monthly,
                    project,
                    Some(&year.period),
                );
                for month in &monthly {
                    hits.extend(self.query_level(
                        query,
                        ConsolidationLevel::Daily,
                        project,
                        Some(&month.period),
                    ));
                }
                hits.extend(monthly);
            }
            hits.extend(yearly);
        }

        // Deduplicate on (level, period), keeping the best score.
        let mut best: std::collections::HashMap<(&'static str, String), TemporalHit> =
            std::collections::HashMap::new();
        for hit in hits {
            let key = (hit.level.as_str(), hit.period.clone());
            match best.get(&key) {
                Some(existing) if existing.score >= hit.score => {}
                _ => {
                    best.insert(key, hit);
                }
            }
        }
        let mut merged: Vec<TemporalHit> = best.into_values().collect();
        merged.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        merged.truncate(limit);
        merged
    }

    fn query_level(
        &self,
        query: &str,
        level: ConsolidationLevel,
        project: Option<&str>,
        period_prefix: Option<&str>,
    ) -> Vec<TemporalHit> {
        // No similarity cutoff at stage level: ranking plus the depth
        // boost decides, and a sparse index should still answer.
        let options = RecallOptions {
            top_k: STAGE_LIMIT * 4,
            threshold: -1.0,
            source_types: vec![level.source_type()],
            ..Default::default()
        };
        let mut hits: Vec<TemporalHit> = self
            .index
            .recall(query, &options)
            .into_iter()
            .filter_map(|result| {
                let period = result.period.clone()?;
                if let Some(prefix) = period_prefix {
                    if !period.starts_with(prefix) || period == prefix {
                        return None;
                    }
                }
                if let (Some(wanted), Some(actual)) = (project, result.project.as_deref()) {
                    if wanted != actual {
                        return None;
                    }
                }
                Some(TemporalHit {
                    score: result.relevance * level.depth_boost(),
                    period,
                    level,
                    snippet: result.matched_content.chars().take(300).collect(),
                    date: match level {
                        ConsolidationLevel::Daily => result.date.clone(),
                        _ => None,
                    },
                    project: result.project,
                })
            })
            .collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(STAGE_LIMIT);
        hits
    }
}
