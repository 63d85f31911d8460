//! Akasha: the stigmergic trace field.
//!
//! Agents coordinate indirectly by depositing traces (solutions, warnings,
//! shortcuts, patterns, corrections, preferences) into a shared field.
//! Traces are reinforced with diminishing returns, decay exponentially with
//! a reinforcement-stretched half-life, and are pruned when too weak.
//! Retrieval ranks by token overlap with the query times current strength.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::hash::fnv1a;
use crate::text::{jaccard, token_set};

/// Hard ceiling on stored traces regardless of configuration.
const TRACE_CAP: usize = 50_000;

/// Maximum stored content length per trace.
const CONTENT_CAP: usize = 10_000;

/// What kind of knowledge a trace carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceType {
    Solution,
    Warning,
    Shortcut,
    Pattern,
    Correction,
    Preference,
}

/// A deposited trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StigmergicTrace {
    pub id: String,
    pub agent_id: String,
    pub trace_type: TraceType,
    pub topic: String,
    pub content: String,
    /// Current strength in [0, 1].
    pub strength: f64,
    pub reinforcements: u32,
    #[serde(default)]
    pub metadata: serde_json::Value,
    /// Epoch ms.
    pub created_at: i64,
    pub last_reinforced_at: i64,
    /// Agents that already reinforced this trace (depositor included).
    pub reinforced_by: HashSet<String>,
}

/// Field tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AkashaConfig {
    /// Strength a fresh trace starts with.
    pub initial_strength: f64,
    /// Base reinforcement boost before diminishing returns.
    pub base_boost: f64,
    /// Diminishing-returns coefficient (α).
    pub diminishing_alpha: f64,
    /// Half-life of an unreinforced trace, in ms.
    pub base_half_life_ms: i64,
    /// Half-life stretch per reinforcement (β).
    pub reinforcement_beta: f64,
    /// Traces below this strength are pruned.
    pub min_strength: f64,
    /// Maximum retained traces (clamped to the 50k system cap).
    pub capacity: usize,
    /// Multiplier when boosting external result scores.
    pub trace_boost: f64,
    /// Ceiling on any single result boost.
    pub boost_cap: f64,
}

impl Default for AkashaConfig {
    fn default() -> Self {
        Self {
            initial_strength: 0.5,
            base_boost: 0.2,
            diminishing_alpha: 0.3,
            base_half_life_ms: 7 * 24 * 3_600_000,
            reinforcement_beta: 0.5,
            min_strength: 0.05,
            capacity: 10_000,
            trace_boost: 0.3,
            boost_cap: 0.5,
        }
    }
}

/// Query options for trace retrieval.
#[derive(Debug, Clone, Default)]
pub struct TraceQuery {
    pub trace_type: Option<TraceType>,
    pub min_strength: Option<f64>,
    pub limit: Option<usize>,
}

/// A retrieval hit: the trace and its relevance score.
#[derive(Debug, Clone)]
pub struct TraceMatch {
    pub trace: StigmergicTrace,
    /// Jaccard(topic tokens, trace tokens) × strength.
    pub score: f64,
}

/// A result score adjusted by the field.
#[derive(Debug, Clone)]
pub struct BoostedResult {
    pub id: String,
    pub score: f64,
    /// How much the field added.
    pub trace_boost: f64,
}

/// The stigmergic field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Akasha {
    traces: HashMap<String, StigmergicTrace>,
    config: AkashaConfig,
}

impl Akasha {
    pub fn new(config: AkashaConfig) -> Self {
        Self {
            traces: HashMap::new(),
            config,
        }
    }

    /// Deposit a trace. Returns its id.
    ///
    /// Depositing the identical content again yields the same id and
    /// refreshes nothing; the depositor counts as the first reinforcer.
    pub fn leave(
        &mut self,
        agent_id: &str,
        trace_type: TraceType,
        topic: &str,
        content: &str,
        metadata: Option<serde_json::Value>,
    ) -> String {
        let content: String = content.chars().take(CONTENT_CAP).collect();
        let id = format!(
            "aks-{}",
            fnv1a(&format!("{agent_id}:{trace_type:?}:{topic}:{content}"))
        );
        if self.traces.contains_key(&id) {
            return id;
        }

        let capacity = self.config.capacity.min(TRACE_CAP);
        while self.traces.len() >= capacity {
            self.evict_weakest();
        }

        let now = chrono::Utc::now().timestamp_millis();
        let mut reinforced_by = HashSet::new();
        reinforced_by.insert(agent_id.to_string());
        self.traces.insert(
            id.clone(),
            StigmergicTrace {
                id: id.clone(),
                agent_id: agent_id.to_string(),
                trace_type,
                topic: topic.to_string(),
                content,
                strength: self.config.initial_strength.clamp(0.0, 1.0),
                reinforcements: 0,
                metadata: metadata.unwrap_or(serde_json::Value::Null),
                created_at: now,
                last_reinforced_at: now,
                reinforced_by,
            },
        );
        id
    }

    /// Reinforce a trace. Returns false when the agent already reinforced
    /// it (or the trace is unknown); each agent gets one vote.
    pub fn reinforce(&mut self, trace_id: &str, agent_id: &str) -> bool {
        let Some(trace) = self.traces.get_mut(trace_id) else {
            return false;
        };
        if !trace.reinforced_by.insert(agent_id.to_string()) {
            return false;
        }
        let boost = self.config.base_boost
            / (1.0 + self.config.diminishing_alpha * f64::from(trace.reinforcements));
        trace.strength = (trace.strength + boost).clamp(0.0, 1.0);
        trace.reinforcements += 1;
        trace.last_reinforced_at = chrono::Utc::now().timestamp_millis();
        true
    }

    /// Retrieve traces relevant to a topic, strongest-and-closest first.
    pub fn query(&self, topic: &str, options: &TraceQuery) -> Vec<TraceMatch> {
        let query_tokens = token_set(topic, 2, true);
        let min_strength = options.min_strength.unwrap_or(0.0);

        let mut matches: Vec<TraceMatch> = self
            .traces
            .values()
            .filter(|trace| {
                options
                    .trace_type
                    .map(|t| trace.trace_type == t)
                    .unwrap_or(true)
                    && trace.strength >= min_strength
            })
            .filter_map(|trace| {
                let trace_tokens =
                    token_set(&format!("{} {}", trace.topic, trace.content), 2, true);
                let score = jaccard(&query_tokens, &trace_tokens) * trace.strength;
                if score > 0.0 {
                    Some(TraceMatch {
                        trace: trace.clone(),
                        score,
                    })
                } else {
                    None
                }
            })
            .collect();

        matches.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        if let Some(limit) = options.limit {
            matches.truncate(limit);
        }
        matches
    }

    /// Apply exponential decay as of now, pruning exhausted traces.
    pub fn decay(&mut self) {
        self.decay_at(chrono::Utc::now().timestamp_millis());
    }

    /// Decay with an explicit clock, for callers that batch or test.
    ///
    /// Reinforced traces decay slower: the effective half-life is
    /// `base × (1 + β·ln(1 + reinforcements))`.
    pub fn decay_at(&mut self, now_ms: i64) {
        let config = self.config.clone();
        self.traces.retain(|_, trace| {
            let elapsed = (now_ms - trace.last_reinforced_at).max(0) as f64;
            let effective_half_life = config.base_half_life_ms as f64
                * (1.0 + config.reinforcement_beta * (1.0 + f64::from(trace.reinforcements)).ln());
            trace.strength *= (-std::f64::consts::LN_2 * elapsed / effective_half_life).exp();
            trace.strength >= config.min_strength
        });
    }

    /// Boost external result scores using matching traces.
    ///
    /// Each result id gains `min(trace_boost × best_match_score, cap)`.
    pub fn boost_results(&self, results: &[(String, f64)], query: &str) -> Vec<BoostedResult> {
        let matches = self.query(query, &TraceQuery::default());
        let best = matches.first().map(|m| m.score).unwrap_or(0.0);
        let boost = (self.config.trace_boost * best).min(self.config.boost_cap);
        results
            .iter()
            .map(|(id, score)| BoostedResult {
                id: id.clone(),
                score: score + boost,
                trace_boost: boost,
            })
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<&StigmergicTrace> {
        self.traces.get(id)
    }

    pub fn len(&self) -> usize {
        self.traces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.traces.is_empty()
    }

    fn evict_weakest(&mut self) {
        let victim = self
            .traces
            .values()
            .min_by(|a, b| {
                a.strength
                    .partial_cmp(&b.strength)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.created_at.cmp(&b.created_at))
            })
            .map(|t| t.id.clone());
        if let Some(id) = victim {
            self.traces.remove(&id);
        }
    }
}

impl Default for Akasha {
    fn default() -> Self {
        Self::new(AkashaConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field() -> Akasha {
        Akasha::default()
    }

    #[test]
    fn leave_truncates_and_hashes_stably() {
        let mut akasha = field();
        let long = "x".repeat(20_000);
        let id1 = akasha.leave("agent-1", TraceType::Solution, "retries", &long, None);
        assert!(id1.starts_with("aks-"));
        assert!(akasha.get(&id1).unwrap().content.chars().count() <= 10_000);

        // Same deposit → same id, no duplicate.
        let id2 = akasha.leave("agent-1", TraceType::Solution, "retries", &long, None);
        assert_eq!(id1, id2);
        assert_eq!(akasha.len(), 1);
    }

    #[test]
    fn depositor_cannot_reinforce_own_trace() {
        let mut akasha = field();
        let id = akasha.leave("agent-1", TraceType::Warning, "flaky test", "avoid it", None);
        assert!(!akasha.reinforce(&id, "agent-1"));
        assert!(akasha.reinforce(&id, "agent-2"));
        assert!(!akasha.reinforce(&id, "agent-2"));
    }

    #[test]
    fn reinforcement_has_diminishing_returns() {
        let mut akasha = field();
        let id = akasha.leave("agent-1", TraceType::Solution, "retries", "use backoff", None);
        let initial = akasha.get(&id).unwrap().strength;

        akasha.reinforce(&id, "agent-2");
        let first_gain = akasha.get(&id).unwrap().strength - initial;
        let mid = akasha.get(&id).unwrap().strength;

        akasha.reinforce(&id, "agent-3");
        let second_gain = akasha.get(&id).unwrap().strength - mid;

        assert!(second_gain < first_gain, "{second_gain} !< {first_gain}");
        assert!(second_gain > 0.0);
    }

    #[test]
    fn strength_clamps_at_one() {
        let mut akasha = field();
        let id = akasha.leave("agent-1", TraceType::Solution, "retries", "use backoff", None);
        for i in 0..100 {
            akasha.reinforce(&id, &format!("agent-{i}"));
        }
        assert!(akasha.get(&id).unwrap().strength <= 1.0);
    }

    #[test]
    fn query_ranks_by_overlap_times_strength() {
        let mut akasha = field();
        akasha.leave(
            "agent-1",
            TraceType::Solution,
            "database retries",
            "exponential backoff for database connections",
            None,
        );
        akasha.leave(
            "agent-1",
            TraceType::Solution,
            "css layout",
            "flexbox centering",
            None,
        );

        let matches = akasha.query("database connection retries", &TraceQuery::default());
        assert_eq!(matches.len(), 1);
        assert!(matches[0].trace.topic.contains("database"));
    }

    #[test]
    fn query_filters_by_type_and_strength() {
        let mut akasha = field();
        akasha.leave("a", TraceType::Warning, "database locks", "watch for deadlocks", None);
        akasha.leave("a", TraceType::Solution, "database locks", "use smaller transactions", None);

        let warnings = akasha.query(
            "database locks",
            &TraceQuery {
                trace_type: Some(TraceType::Warning),
                ..Default::default()
            },
        );
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].trace.trace_type, TraceType::Warning);

        let none = akasha.query(
            "database locks",
            &TraceQuery {
                min_strength: Some(0.9),
                ..Default::default()
            },
        );
        assert!(none.is_empty());
    }

    #[test]
    fn decay_prunes_weak_traces() {
        let mut akasha = field();
        let id = akasha.leave("agent-1", TraceType::Shortcut, "build", "use sccache", None);
        let deposited_at = akasha.get(&id).unwrap().last_reinforced_at;

        // Far beyond many half-lives.
        akasha.decay_at(deposited_at + 100 * akasha.config.base_half_life_ms);
        assert!(akasha.is_empty());
    }

    #[test]
    fn reinforced_traces_outlive_unreinforced_ones() {
        let mut akasha = field();
        let lone = akasha.leave("a", TraceType::Solution, "alpha topic", "alpha detail", None);
        let popular = akasha.leave("a", TraceType::Solution, "beta topic", "beta detail", None);
        for i in 0..5 {
            akasha.reinforce(&popular, &format!("agent-{i}"));
        }
        let now = akasha.get(&popular).unwrap().last_reinforced_at;

        akasha.decay_at(now + 4 * akasha.config.base_half_life_ms);
        let lone_strength = akasha.get(&lone).map(|t| t.strength).unwrap_or(0.0);
        let popular_strength = akasha.get(&popular).map(|t| t.strength).unwrap_or(0.0);
        assert!(popular_strength > lone_strength);
    }

    #[test]
    fn capacity_evicts_weakest_first() {
        let mut akasha = Akasha::new(AkashaConfig {
            capacity: 2,
            ..Default::default()
        });
        let weak = akasha.leave("a", TraceType::Pattern, "topic one", "detail one", None);
        let strong = akasha.leave("a", TraceType::Pattern, "topic two", "detail two", None);
        akasha.reinforce(&strong, "b");

        akasha.leave("a", TraceType::Pattern, "topic three", "detail three", None);
        assert_eq!(akasha.len(), 2);
        assert!(akasha.get(&weak).is_none());
        assert!(akasha.get(&strong).is_some());
    }

    #[test]
    fn boost_results_caps_and_annotates() {
        let mut akasha = field();
        let id = akasha.leave(
            "agent-1",
            TraceType::Solution,
            "retry backoff",
            "retry backoff",
            None,
        );
        for i in 0..20 {
            akasha.reinforce(&id, &format!("agent-{i}"));
        }

        let results = vec![("r1".to_string(), 0.4), ("r2".to_string(), 0.2)];
        let boosted = akasha.boost_results(&results, "retry backoff");
        assert_eq!(boosted.len(), 2);
        assert!(boosted[0].trace_boost > 0.0);
        assert!(boosted[0].trace_boost <= akasha.config.boost_cap);
        assert!(boosted[0].score > 0.4);
    }

    #[test]
    fn boost_without_matches_is_zero() {
        let akasha = field();
        let boosted = akasha.boost_results(&[("r1".to_string(), 0.4)], "anything");
        assert!((boosted[0].trace_boost - 0.0).abs() < f64::EPSILON);
        assert!((boosted[0].score - 0.4).abs() < f64::EPSILON);
    }
}
