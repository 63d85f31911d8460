//! Dvikala: bi-temporal knowledge-graph edges.
//!
//! Every edge carries two time axes. Valid time (`valid_from` /
//! `valid_until`) says when the fact held in the world; record time
//! (`recorded_at` / `superseded_at`) says when the system believed it.
//! Both intervals are half-open: inclusive lower bound, exclusive upper.
//! An edge is *current* iff it has not been superseded.
//!
//! The graph itself is stored as `(nodes, edges)` rows with string ids;
//! nothing here holds pointer cycles.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Node categories in the knowledge graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Session,
    Memory,
    Concept,
    Entity,
}

/// A knowledge-graph node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphNode {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub label: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// A bi-temporal edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
    pub relationship: String,
    /// Strength in [0, 1].
    pub weight: f64,
    /// Valid-time interval start (inclusive).
    #[serde(default = "epoch")]
    pub valid_from: DateTime<Utc>,
    /// Valid-time interval end (exclusive); open if absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_until: Option<DateTime<Utc>>,
    /// Record-time interval start (inclusive).
    #[serde(default = "epoch")]
    pub recorded_at: DateTime<Utc>,
    /// Record-time interval end (exclusive); current if absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub superseded_at: Option<DateTime<Utc>>,
}

fn epoch() -> DateTime<Utc> {
    Utc.timestamp_millis_opt(0).single().unwrap_or_default()
}

impl GraphEdge {
    /// Whether this edge is the current belief.
    pub fn is_current(&self) -> bool {
        self.superseded_at.is_none()
    }
}

/// Create a new edge. `valid_from` defaults to now; `recorded_at` is
/// always now.
pub fn create_edge(
    source: impl Into<String>,
    target: impl Into<String>,
    relationship: impl Into<String>,
    weight: f64,
    valid_from: Option<DateTime<Utc>>,
) -> GraphEdge {
    let now = Utc::now();
    GraphEdge {
        source: source.into(),
        target: target.into(),
        relationship: relationship.into(),
        weight: weight.clamp(0.0, 1.0),
        valid_from: valid_from.unwrap_or(now),
        valid_until: None,
        recorded_at: now,
        superseded_at: None,
    }
}

/// Supersede an edge with a revised version.
///
/// Returns the closed-out old edge and the replacement. The new edge keeps
/// source and target, and starts both its valid and record intervals at
/// the supersedure instant, so `valid_from == recorded_at` holds.
pub fn supersede_edge(
    old: &GraphEdge,
    new_weight: Option<f64>,
    new_relationship: Option<&str>,
) -> (GraphEdge, GraphEdge) {
    let now = Utc::now();
    let mut closed = old.clone();
    closed.superseded_at = Some(now);

    let replacement = GraphEdge {
        source: old.source.clone(),
        target: old.target.clone(),
        relationship: new_relationship
            .map(str::to_string)
            .unwrap_or_else(|| old.relationship.clone()),
        weight: new_weight.unwrap_or(old.weight).clamp(0.0, 1.0),
        valid_from: now,
        valid_until: None,
        recorded_at: now,
        superseded_at: None,
    };
    (closed, replacement)
}

/// Close an edge's valid-time interval. Defaults to now.
pub fn expire_edge(edge: &GraphEdge, valid_until: Option<DateTime<Utc>>) -> GraphEdge {
    let mut expired = edge.clone();
    expired.valid_until = Some(valid_until.unwrap_or_else(Utc::now));
    expired
}

/// Time-travel query over both axes.
///
/// With no `as_of_record`, only current (unsuperseded) edges are
/// considered. With one, the record axis is filtered with the same
/// half-open semantics as valid time.
pub fn query_edges_at_time<'a>(
    edges: &'a [GraphEdge],
    as_of_valid: DateTime<Utc>,
    as_of_record: Option<DateTime<Utc>>,
) -> Vec<&'a GraphEdge> {
    edges
        .iter()
        .filter(|edge| {
            if edge.valid_from > as_of_valid {
                return false;
            }
            if let Some(until) = edge.valid_until {
                if until <= as_of_valid {
                    return false;
                }
            }
            match as_of_record {
                Some(record) => {
                    edge.recorded_at <= record
                        && edge.superseded_at.map(|s| s > record).unwrap_or(true)
                }
                None => edge.superseded_at.is_none(),
            }
        })
        .collect()
}

/// All versions of the `source → target` edge, ascending by record time.
pub fn edge_history<'a>(
    edges: &'a [GraphEdge],
    source: &str,
    target: &str,
) -> Vec<&'a GraphEdge> {
    let mut history: Vec<&GraphEdge> = edges
        .iter()
        .filter(|edge| edge.source == source && edge.target == target)
        .collect();
    history.sort_by_key(|edge| edge.recorded_at);
    history
}

/// Exponential half-life decay of edge weight.
///
/// The reference instant is the valid-time end if set, otherwise the
/// valid-time start; weight is unchanged for non-positive elapsed time.
pub fn temporal_decay(edge: &GraphEdge, now: DateTime<Utc>, half_life_ms: i64) -> f64 {
    let reference = edge.valid_until.unwrap_or(edge.valid_from);
    let elapsed_ms = now.signed_duration_since(reference).num_milliseconds();
    if elapsed_ms <= 0 || half_life_ms <= 0 {
        return edge.weight;
    }
    edge.weight * (-std::f64::consts::LN_2 * elapsed_ms as f64 / half_life_ms as f64).exp()
}

/// Drop superseded edges older than the retention horizon. Current edges
/// are always kept.
pub fn compact_edges(edges: Vec<GraphEdge>, retention_ms: i64, now: DateTime<Utc>) -> Vec<GraphEdge> {
    let horizon = now - chrono::Duration::milliseconds(retention_ms);
    edges
        .into_iter()
        .filter(|edge| match edge.superseded_at {
            None => true,
            Some(superseded) => superseded >= horizon,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).single().unwrap()
    }

    fn edge_at(valid_from_ms: i64, recorded_ms: i64) -> GraphEdge {
        GraphEdge {
            source: "a".into(),
            target: "b".into(),
            relationship: "references".into(),
            weight: 0.5,
            valid_from: at(valid_from_ms),
            valid_until: None,
            recorded_at: at(recorded_ms),
            superseded_at: None,
        }
    }

    #[test]
    fn create_clamps_weight() {
        let edge = create_edge("a", "b", "references", 1.5, None);
        assert!((edge.weight - 1.0).abs() < f64::EPSILON);
        assert!(edge.is_current());
    }

    #[test]
    fn valid_interval_is_half_open() {
        let mut edge = edge_at(1_000, 1_000);
        edge.valid_until = Some(at(2_000));
        let edges = vec![edge];

        // Inclusive lower bound.
        assert_eq!(query_edges_at_time(&edges, at(1_000), None).len(), 1);
        // Exclusive upper bound.
        assert_eq!(query_edges_at_time(&edges, at(2_000), None).len(), 0);
        // Inside.
        assert_eq!(query_edges_at_time(&edges, at(1_500), None).len(), 1);
        // Before.
        assert_eq!(query_edges_at_time(&edges, at(999), None).len(), 0);
    }

    #[test]
    fn record_axis_filters_when_given() {
        let mut old = edge_at(1_000, 1_000);
        old.superseded_at = Some(at(5_000));
        let new = GraphEdge {
            valid_from: at(5_000),
            recorded_at: at(5_000),
            weight: 0.9,
            ..edge_at(5_000, 5_000)
        };
        let edges = vec![old, new];

        // As we believed at t=2000: only the old version existed.
        let at_2000 = query_edges_at_time(&edges, at(2_000), Some(at(2_000)));
        assert_eq!(at_2000.len(), 1);
        assert!((at_2000[0].weight - 0.5).abs() < f64::EPSILON);

        // As we believe now (no record bound): only the current version.
        let current = query_edges_at_time(&edges, at(6_000), None);
        assert_eq!(current.len(), 1);
        assert!((current[0].weight - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn supersede_roundtrip() {
        let original = create_edge("a", "b", "references", 0.5, None);
        let (closed, replacement) = supersede_edge(&original, Some(0.9), None);

        assert!(closed.superseded_at.is_some());
        assert!(replacement.is_current());
        assert_eq!(replacement.source, original.source);
        assert_eq!(replacement.target, original.target);
        assert_eq!(replacement.valid_from, replacement.recorded_at);
        assert!((replacement.weight - 0.9).abs() < f64::EPSILON);

        let edges = vec![closed.clone(), replacement.clone()];

        // Before the supersedure instant, the old version answers.
        let before = query_edges_at_time(
            &edges,
            original.valid_from,
            Some(original.recorded_at),
        );
        assert_eq!(before.len(), 1);
        assert!((before[0].weight - 0.5).abs() < f64::EPSILON);

        // At the supersedure instant, the new version answers.
        let after = query_edges_at_time(&edges, replacement.valid_from, None);
        assert_eq!(after.len(), 1);
        assert!((after[0].weight - 0.9).abs() < f64::EPSILON);

        // History returns both, oldest first.
        let history = edge_history(&edges, "a", "b");
        assert_eq!(history.len(), 2);
        assert!((history[0].weight - 0.5).abs() < f64::EPSILON);
        assert!((history[1].weight - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn expire_sets_valid_until() {
        let edge = create_edge("a", "b", "references", 0.5, None);
        let expired = expire_edge(&edge, Some(at(9_000)));
        assert_eq!(expired.valid_until, Some(at(9_000)));
    }

    #[test]
    fn decay_halves_at_half_life() {
        let edge = edge_at(0, 0);
        let decayed = temporal_decay(&edge, at(3_600_000), 3_600_000);
        // One half-life on a weight of 0.5 → 0.25.
        assert!((decayed - 0.25).abs() < 1e-9);
    }

    #[test]
    fn decay_is_monotone_in_time() {
        let edge = edge_at(0, 0);
        let earlier = temporal_decay(&edge, at(10_000), 60_000);
        let later = temporal_decay(&edge, at(20_000), 60_000);
        assert!(earlier >= later);
    }

    #[test]
    fn decay_uses_valid_until_as_reference() {
        let mut edge = edge_at(0, 0);
        edge.valid_until = Some(at(50_000));
        // At t=50_000 no time has elapsed past the reference.
        let undecayed = temporal_decay(&edge, at(50_000), 60_000);
        assert!((undecayed - edge.weight).abs() < f64::EPSILON);
    }

    #[test]
    fn decay_no_op_before_reference() {
        let edge = edge_at(10_000, 10_000);
        let value = temporal_decay(&edge, at(5_000), 60_000);
        assert!((value - edge.weight).abs() < f64::EPSILON);
    }

    #[test]
    fn compaction_keeps_current_and_recent() {
        let current = edge_at(0, 0);
        let mut recently_superseded = edge_at(0, 0);
        recently_superseded.superseded_at = Some(at(95_000));
        let mut anciently_superseded = edge_at(0, 0);
        anciently_superseded.superseded_at = Some(at(1_000));

        let kept = compact_edges(
            vec![current, recently_superseded, anciently_superseded],
            10_000,
            at(100_000),
        );
        assert_eq!(kept.len(), 2);
        assert!(kept.iter().any(GraphEdge::is_current));
        assert!(kept.iter().all(|e| e
            .superseded_at
            .map(|s| s >= at(90_000))
            .unwrap_or(true)));
    }

    #[test]
    fn missing_temporal_fields_deserialize_to_epoch() {
        let json = r#"{"source":"a","target":"b","relationship":"references","weight":0.4}"#;
        let edge: GraphEdge = serde_json::from_str(json).unwrap();
        assert_eq!(edge.valid_from.timestamp_millis(), 0);
        assert_eq!(edge.recorded_at.timestamp_millis(), 0);
        assert!(edge.valid_until.is_none());
        assert!(edge.superseded_at.is_none());
    }
}
