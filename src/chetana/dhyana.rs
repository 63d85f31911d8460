//! Dhyana: the attention subsystem.
//!
//! Weighs three things: messages (salience in `[0, 2]`, with sticky boosts
//! around errors and corrections), concepts (recency-decayed keyword
//! weights in `[0, 1]`, capacity-bounded), and tools (usefulness weights in
//! `[0, 1]`). The focus window is the top-salience slice of the message
//! history.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::text::token_set;

/// Hard ceiling on tracked concepts regardless of configuration.
const CONCEPT_CAP: usize = 100;

/// Hard ceiling on the focus window size.
const FOCUS_WINDOW_CAP: usize = 200;

/// Per-message attention metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageMeta {
    pub has_error: bool,
    pub is_correction: bool,
    pub base_salience: f32,
    /// Accumulated boost from error-adjacent messages.
    pub error_neighbor_boost: f32,
}

/// Tunables for attention dynamics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DhyanaConfig {
    /// Boost given to the neighbors of an erroring message.
    pub error_boost: f32,
    /// Boost given to correction messages.
    pub correction_boost: f32,
    /// Exponential recency decay rate for salience refresh.
    pub decay_lambda: f32,
    /// Messages returned by the focus window (capped at 200).
    pub focus_window: usize,
}

impl Default for DhyanaConfig {
    fn default() -> Self {
        Self {
            error_boost: 0.3,
            correction_boost: 0.5,
            decay_lambda: 0.1,
            focus_window: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConceptEntry {
    weight: f32,
    /// Insertion sequence, for oldest-first eviction among equal weights.
    seq: u64,
}

/// The attention subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dhyana {
    /// Message id → current salience in [0, 2].
    salience: HashMap<String, f32>,
    /// Message ids in insertion order.
    order: Vec<String>,
    meta: HashMap<String, MessageMeta>,
    concepts: HashMap<String, ConceptEntry>,
    /// Tool name → usefulness weight in [0, 1].
    tools: HashMap<String, f32>,
    next_seq: u64,
    config: DhyanaConfig,
}

impl Dhyana {
    pub fn new(config: DhyanaConfig) -> Self {
        Self {
            salience: HashMap::new(),
            order: Vec::new(),
            meta: HashMap::new(),
            concepts: HashMap::new(),
            tools: HashMap::new(),
            next_seq: 0,
            config,
        }
    }

    /// Register a message and apply adjacency boosts.
    ///
    /// An erroring message boosts up to two predecessors immediately; later
    /// messages that land within radius two of it pick up the boost when
    /// they arrive, which covers the successor side.
    pub fn add_message(&mut self, id: impl Into<String>, has_error: bool, is_correction: bool) {
        let id = id.into();
        let mut initial = 1.0;
        if is_correction {
            initial += self.config.correction_boost;
        }

        // Successor side: inherit boost from a recent erroring message.
        let mut neighbor_boost = 0.0;
        let n = self.order.len();
        for back in 1..=2usize {
            if back > n {
                break;
            }
            let prior = &self.order[n - back];
            if self.meta.get(prior).is_some_and(|m| m.has_error) {
                neighbor_boost += self.config.error_boost;
            }
        }
        initial = (initial + neighbor_boost).clamp(0.0, 2.0);

        self.meta.insert(
            id.clone(),
            MessageMeta {
                has_error,
                is_correction,
                base_salience: 1.0,
                error_neighbor_boost: neighbor_boost,
            },
        );
        self.salience.insert(id.clone(), initial);
        self.order.push(id);

        // Predecessor side: boost up to two earlier messages.
        if has_error {
            let n = self.order.len();
            for back in 2..=3usize {
                if back > n {
                    break;
                }
                let prior = self.order[n - back].clone();
                if let Some(meta) = self.meta.get_mut(&prior) {
                    meta.error_neighbor_boost += self.config.error_boost;
                }
                if let Some(weight) = self.salience.get_mut(&prior) {
                    *weight = (*weight + self.config.error_boost).clamp(0.0, 2.0);
                }
            }
        }
    }

    /// Extract and weigh concept tokens from message text.
    pub fn track_concepts(&mut self, text: &str) {
        for token in token_set(text, 4, true) {
            let seq = self.next_seq;
            self.next_seq += 1;
            let entry = self
                .concepts
                .entry(token)
                .or_insert(ConceptEntry { weight: 0.0, seq });
            entry.weight = (entry.weight + 0.1).clamp(0.0, 1.0);
        }
        self.evict_concepts();
    }

    /// Adjust a tool's weight after use.
    pub fn on_tool_used(&mut self, name: &str, success: bool, score: f32) {
        let weight = self.tools.entry(name.to_string()).or_insert(0.0);
        if success {
            *weight += score * 0.1;
        } else {
            *weight -= 0.05;
        }
        *weight = weight.clamp(0.0, 1.0);
    }

    /// Recompute salience from recency, error adjacency, and corrections.
    /// Concept weights decay; exhausted concepts are forgotten.
    pub fn refresh_salience(&mut self) {
        let n = self.order.len();
        for (i, id) in self.order.iter().enumerate() {
            let Some(meta) = self.meta.get(id) else {
                continue;
            };
            let age = (n - 1 - i) as f32;
            let lambda = self.config.decay_lambda;
            let mut value = meta.base_salience * (-lambda * age).exp();
            value += meta.error_neighbor_boost;
            if meta.is_correction {
                value += self.config.correction_boost * (-lambda * 0.5 * age).exp();
            }
            self.salience.insert(id.clone(), value.clamp(0.0, 2.0));
        }

        self.concepts.retain(|_, entry| {
            entry.weight -= 0.05;
            entry.weight > 0.0
        });
    }

    /// Top-salience message ids, highest first.
    pub fn focus_window(&self) -> Vec<(String, f32)> {
        let limit = self.config.focus_window.min(FOCUS_WINDOW_CAP);
        let mut ranked: Vec<(String, f32)> = self
            .salience
            .iter()
            .map(|(id, w)| (id.clone(), *w))
            .collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        ranked.truncate(limit);
        ranked
    }

    /// Current salience of one message.
    pub fn message_salience(&self, id: &str) -> Option<f32> {
        self.salience.get(id).copied()
    }

    /// Concept weights, strongest first.
    pub fn top_concepts(&self, n: usize) -> Vec<(String, f32)> {
        let mut ranked: Vec<(String, f32)> = self
            .concepts
            .iter()
            .map(|(token, entry)| (token.clone(), entry.weight))
            .collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        ranked.truncate(n);
        ranked
    }

    /// Weight of one tool.
    pub fn tool_weight(&self, name: &str) -> Option<f32> {
        self.tools.get(name).copied()
    }

    pub fn message_count(&self) -> usize {
        self.order.len()
    }

    pub fn concept_count(&self) -> usize {
        self.concepts.len()
    }

    /// Evict lowest-weight (oldest among ties) concepts down to the cap.
    fn evict_concepts(&mut self) {
        while self.concepts.len() > CONCEPT_CAP {
            let weakest = self
                .concepts
                .iter()
                .min_by(|a, b| {
                    a.1.weight
                        .partial_cmp(&b.1.weight)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then(a.1.seq.cmp(&b.1.seq))
                })
                .map(|(token, _)| token.clone());
            match weakest {
                Some(token) => {
                    self.concepts.remove(&token);
                }
                None => break,
            }
        }
    }
}

impl Default for Dhyana {
    fn default() -> Self {
        Self::new(DhyanaConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_boost_reaches_both_neighbor_sides() {
        let mut dhyana = Dhyana::default();
        dhyana.add_message("m1", false, false);
        dhyana.add_message("m2", false, false);
        dhyana.add_message("m3", true, false);
        dhyana.add_message("m4", false, false);
        dhyana.add_message("m5", false, false);

        let boost = dhyana.config.error_boost;
        for id in ["m1", "m2", "m4", "m5"] {
            let meta = dhyana.meta.get(id).unwrap();
            assert!(
                (meta.error_neighbor_boost - boost).abs() < f32::EPSILON,
                "{id} boost = {}",
                meta.error_neighbor_boost
            );
        }
        // The erroring message itself keeps base salience only.
        let m3 = dhyana.meta.get("m3").unwrap();
        assert!((m3.error_neighbor_boost - 0.0).abs() < f32::EPSILON);
    }

    #[test]
    fn error_boost_radius_is_two() {
        let mut dhyana = Dhyana::default();
        for id in ["m1", "m2", "m3"] {
            dhyana.add_message(id, false, false);
        }
        dhyana.add_message("m4", true, false);
        // m1 is three back from m4, outside the radius.
        assert!((dhyana.meta["m1"].error_neighbor_boost - 0.0).abs() < f32::EPSILON);
        assert!(dhyana.meta["m2"].error_neighbor_boost > 0.0);
        assert!(dhyana.meta["m3"].error_neighbor_boost > 0.0);
    }

    #[test]
    fn salience_stays_in_range() {
        let mut dhyana = Dhyana::default();
        // Surround one message with many errors to pile boosts on.
        dhyana.add_message("a", true, true);
        dhyana.add_message("b", true, true);
        dhyana.add_message("c", true, true);
        dhyana.refresh_salience();
        for (_, weight) in dhyana.focus_window() {
            assert!((0.0..=2.0).contains(&weight));
        }
    }

    #[test]
    fn corrections_start_boosted() {
        let mut dhyana = Dhyana::default();
        dhyana.add_message("plain", false, false);
        dhyana.add_message("corrected", false, true);
        assert!(
            dhyana.message_salience("corrected").unwrap()
                > dhyana.message_salience("plain").unwrap()
        );
    }

    #[test]
    fn concepts_filter_short_and_stopwords() {
        let mut dhyana = Dhyana::default();
        dhyana.track_concepts("the fix for the database connection bug");
        assert!(dhyana.concepts.contains_key("database"));
        assert!(dhyana.concepts.contains_key("connection"));
        assert!(!dhyana.concepts.contains_key("the"));
        assert!(!dhyana.concepts.contains_key("fix")); // length < 4
    }

    #[test]
    fn concept_weights_accumulate_and_clamp() {
        let mut dhyana = Dhyana::default();
        for _ in 0..20 {
            dhyana.track_concepts("database");
        }
        let weight = dhyana.concepts["database"].weight;
        assert!((weight - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn concept_capacity_enforced() {
        let mut dhyana = Dhyana::default();
        for i in 0..250 {
            dhyana.track_concepts(&format!("concept{i:04}"));
        }
        assert!(dhyana.concept_count() <= CONCEPT_CAP);
    }

    #[test]
    fn concept_decay_forgets_weak_entries() {
        let mut dhyana = Dhyana::default();
        dhyana.track_concepts("ephemeral");
        assert_eq!(dhyana.concept_count(), 1);
        for _ in 0..3 {
            dhyana.refresh_salience();
        }
        assert_eq!(dhyana.concept_count(), 0);
    }

    #[test]
    fn tool_weights_move_and_clamp() {
        let mut dhyana = Dhyana::default();
        dhyana.on_tool_used("read", true, 0.8);
        assert!(dhyana.tool_weight("read").unwrap() > 0.0);
        for _ in 0..50 {
            dhyana.on_tool_used("read", false, 0.0);
        }
        assert!((dhyana.tool_weight("read").unwrap() - 0.0).abs() < f32::EPSILON);
        for _ in 0..500 {
            dhyana.on_tool_used("read", true, 0.8);
        }
        assert!((dhyana.tool_weight("read").unwrap() - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn refresh_favors_recent_messages() {
        let mut dhyana = Dhyana::default();
        for i in 0..10 {
            dhyana.add_message(format!("m{i}"), false, false);
        }
        dhyana.refresh_salience();
        let newest = dhyana.message_salience("m9").unwrap();
        let oldest = dhyana.message_salience("m0").unwrap();
        assert!(newest > oldest);
    }

    #[test]
    fn focus_window_respects_limit() {
        let mut dhyana = Dhyana::new(DhyanaConfig {
            focus_window: 5,
            ..Default::default()
        });
        for i in 0..30 {
            dhyana.add_message(format!("m{i}"), false, false);
        }
        dhyana.refresh_salience();
        assert_eq!(dhyana.focus_window().len(), 5);
    }
}
