//! Sankalpa: the intention subsystem.
//!
//! Goals are mined from user phrasing ("I want to …", "let's …", "fix the
//! …"), deduplicated by word overlap, advanced by matching tool output,
//! escalated when re-mentioned, and paged out (paused, then abandoned)
//! when they go stale. Capacity is bounded; the least-alive intentions are
//! evicted first.

use serde::{Deserialize, Serialize};

use crate::hash::fnv1a;
use crate::text::token_set;

use super::events::{ChetanaEvent, EventBus};

/// Hard ceiling on tracked intentions regardless of configuration.
const INTENTION_CAP: usize = 100;

/// Evidence entries retained per intention.
const EVIDENCE_CAP: usize = 10;

/// Word-overlap threshold for treating a candidate goal as a re-mention.
const MENTION_OVERLAP: f64 = 0.5;

/// Keyword matches in tool output needed to count as progress.
const PROGRESS_KEYWORD_MIN: usize = 2;

/// Intention priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

impl Priority {
    /// Eviction rank: lower evicts first.
    pub fn rank(&self) -> u32 {
        match self {
            Self::Low => 0,
            Self::Normal => 1,
            Self::High => 2,
            Self::Critical => 3,
        }
    }
}

/// Intention lifecycle status. `Achieved` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentionStatus {
    Active,
    Paused,
    Achieved,
    Abandoned,
}

impl IntentionStatus {
    /// Eviction rank: lower evicts first.
    pub fn rank(&self) -> u32 {
        match self {
            Self::Abandoned => 0,
            Self::Paused => 1,
            Self::Achieved => 2,
            Self::Active => 3,
        }
    }
}

/// A tracked goal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intention {
    /// Stable id: FNV-1a of the goal text.
    pub id: String,
    pub goal: String,
    pub priority: Priority,
    pub status: IntentionStatus,
    /// Completion estimate in [0, 1], monotone until achieved.
    pub progress: f32,
    /// Epoch ms.
    pub created_at: i64,
    /// Epoch ms of the last progress bump.
    pub last_advanced_at: i64,
    /// Tool names that advanced this intention, newest last.
    pub evidence: Vec<String>,
    pub subgoals: Vec<String>,
    /// Turns since the last advance.
    pub stale_turns: u32,
    /// How many user messages have referenced this goal.
    pub mention_count: u32,
}

impl Intention {
    fn new(goal: String, now_ms: i64) -> Self {
        Self {
            id: fnv1a(&goal),
            goal,
            priority: Priority::Normal,
            status: IntentionStatus::Active,
            progress: 0.0,
            created_at: now_ms,
            last_advanced_at: now_ms,
            evidence: Vec::new(),
            subgoals: Vec::new(),
            stale_turns: 0,
            mention_count: 1,
        }
    }
}

/// Tunables for intention tracking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SankalpaConfig {
    /// Maximum tracked intentions (clamped to the system cap of 100).
    pub capacity: usize,
    /// Stale turns before an active intention is paused; twice this
    /// abandons a paused one.
    pub abandonment_threshold: u32,
}

impl Default for SankalpaConfig {
    fn default() -> Self {
        Self {
            capacity: 50,
            abandonment_threshold: 5,
        }
    }
}

/// Goal-introducing phrases. `keep_verb` controls whether the matched
/// phrase itself is part of the goal ("fix the login bug") or only what
/// follows it ("I want to add JWT auth" → "add JWT auth").
const INTENT_PREFIXES: [(&str, bool); 18] = [
    ("i want to ", false),
    ("let's ", false),
    ("let us ", false),
    ("goal is ", false),
    ("we need to ", false),
    ("fix the ", true),
    ("add a ", true),
    ("add an ", true),
    ("implement ", true),
    ("create a ", true),
    ("build a ", true),
    ("write a ", true),
    ("remove ", true),
    ("delete ", true),
    ("update ", true),
    ("change ", true),
    ("make ", true),
    ("refactor ", true),
];

/// The intention subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sankalpa {
    intentions: Vec<Intention>,
    config: SankalpaConfig,
}

impl Sankalpa {
    pub fn new(config: SankalpaConfig) -> Self {
        Self {
            intentions: Vec::new(),
            config,
        }
    }

    /// Restore from a persisted snapshot.
    pub fn restore(intentions: Vec<Intention>, config: SankalpaConfig) -> Self {
        Self { intentions, config }
    }

    pub fn intentions(&self) -> &[Intention] {
        &self.intentions
    }

    pub fn get(&self, id: &str) -> Option<&Intention> {
        self.intentions.iter().find(|i| i.id == id)
    }

    /// Active intentions, highest priority first.
    pub fn active(&self) -> Vec<&Intention> {
        let mut active: Vec<&Intention> = self
            .intentions
            .iter()
            .filter(|i| i.status == IntentionStatus::Active)
            .collect();
        active.sort_by(|a, b| b.priority.rank().cmp(&a.priority.rank()));
        active
    }

    /// Scan a user message for goal phrasing; create or re-mention
    /// intentions accordingly.
    pub fn extract_from_message(&mut self, message: &str, bus: &mut EventBus) {
        let lower: String = message.chars().map(|c| c.to_ascii_lowercase()).collect();
        let mut covered: Vec<(usize, usize)> = Vec::new();
        let mut candidates: Vec<String> = Vec::new();

        let mut matches: Vec<(usize, usize, bool)> = Vec::new();
        for (prefix, keep_verb) in INTENT_PREFIXES {
            for (start, _) in lower.match_indices(prefix) {
                matches.push((start, start + prefix.len(), keep_verb));
            }
        }
        matches.sort_by_key(|(start, ..)| *start);

        for (start, end, keep_verb) in matches {
            // A phrase nested inside an earlier capture is the same goal.
            if covered.iter().any(|(s, e)| start >= *s && start < *e) {
                continue;
            }
            let goal_start = if keep_verb { start } else { end };
            let boundary = lower[end..]
                .find(|c: char| matches!(c, '.' | '!' | '?' | ','))
                .map(|i| end + i)
                .unwrap_or(lower.len());
            if boundary <= goal_start {
                continue;
            }
            let raw = message[goal_start..boundary].trim();
            if raw.len() < 4 {
                continue;
            }
            covered.push((start, boundary));
            for part in raw.split(" and ") {
                let part = part.trim();
                if part.len() >= 4 {
                    candidates.push(part.to_string());
                }
            }
        }

        for goal in candidates {
            self.register_goal(goal, bus);
        }
    }

    /// Match tool output against active goals and advance the ones it
    /// plausibly serves.
    pub fn on_tool_result(&mut self, tool: &str, content: &str, bus: &mut EventBus) {
        let lower = content.to_lowercase();
        let now = chrono::Utc::now().timestamp_millis();
        for intention in &mut self.intentions {
            if intention.status != IntentionStatus::Active {
                continue;
            }
            let keywords = token_set(&intention.goal, 3, true);
            let hits = keywords.iter().filter(|k| lower.contains(k.as_str())).count();
            if hits < PROGRESS_KEYWORD_MIN {
                continue;
            }
            intention.progress = (intention.progress + 0.1).min(1.0);
            if intention.evidence.len() >= EVIDENCE_CAP {
                intention.evidence.remove(0);
            }
            intention.evidence.push(tool.to_string());
            intention.stale_turns = 0;
            intention.last_advanced_at = now;
            if intention.progress >= 1.0 {
                intention.status = IntentionStatus::Achieved;
                bus.emit(ChetanaEvent::GoalChanged {
                    intention_id: intention.id.clone(),
                    status: IntentionStatus::Achieved,
                });
            }
        }
    }

    /// Turn boundary: stale active intentions pause, stale paused ones
    /// are abandoned.
    pub fn end_turn(&mut self, bus: &mut EventBus) {
        let threshold = self.config.abandonment_threshold;
        for intention in &mut self.intentions {
            match intention.status {
                IntentionStatus::Active => {
                    intention.stale_turns += 1;
                    if intention.stale_turns >= threshold {
                        intention.status = IntentionStatus::Paused;
                        bus.emit(ChetanaEvent::GoalChanged {
                            intention_id: intention.id.clone(),
                            status: IntentionStatus::Paused,
                        });
                    }
                }
                IntentionStatus::Paused => {
                    intention.stale_turns += 1;
                    if intention.stale_turns >= threshold * 2 {
                        intention.status = IntentionStatus::Abandoned;
                        bus.emit(ChetanaEvent::GoalChanged {
                            intention_id: intention.id.clone(),
                            status: IntentionStatus::Abandoned,
                        });
                    }
                }
                IntentionStatus::Achieved | IntentionStatus::Abandoned => {}
            }
        }
    }

    fn register_goal(&mut self, goal: String, bus: &mut EventBus) {
        let goal_tokens = token_set(&goal, 3, true);

        // Re-mention of a live intention?
        let existing = self.intentions.iter_mut().find(|i| {
            matches!(i.status, IntentionStatus::Active | IntentionStatus::Paused)
                && crate::text::jaccard(&goal_tokens, &token_set(&i.goal, 3, true))
                    >= MENTION_OVERLAP
        });

        if let Some(intention) = existing {
            intention.mention_count += 1;
            if intention.status == IntentionStatus::Paused {
                intention.status = IntentionStatus::Active;
                intention.stale_turns = 0;
                bus.emit(ChetanaEvent::GoalChanged {
                    intention_id: intention.id.clone(),
                    status: IntentionStatus::Active,
                });
            }
            if intention.mention_count >= 5 && intention.priority == Priority::High {
                intention.priority = Priority::Critical;
            } else if intention.mention_count >= 3 && intention.priority == Priority::Normal {
                intention.priority = Priority::High;
            }
            return;
        }

        let capacity = self.config.capacity.min(INTENTION_CAP);
        while self.intentions.len() >= capacity {
            self.evict_one();
        }

        let intention = Intention::new(goal, chrono::Utc::now().timestamp_millis());
        tracing::debug!(id = %intention.id, goal = %intention.goal, "new intention");
        bus.emit(ChetanaEvent::GoalCreated {
            intention_id: intention.id.clone(),
            goal: intention.goal.clone(),
        });
        self.intentions.push(intention);
    }

    /// Remove the intention with the lowest (status, priority, age) score.
    ///
    /// Age contributes a [0, 1) term normalized from oldest to newest, so
    /// among equals the oldest goes first.
    fn evict_one(&mut self) {
        if self.intentions.is_empty() {
            return;
        }
        let oldest = self.intentions.iter().map(|i| i.created_at).min().unwrap_or(0);
        let newest = self.intentions.iter().map(|i| i.created_at).max().unwrap_or(0);
        let span = (newest - oldest).max(1) as f64;

        let victim = self
            .intentions
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                let score = |i: &Intention| {
                    f64::from(i.status.rank() * 100 + i.priority.rank() * 10)
                        + (i.created_at - oldest) as f64 / span
                };
                score(a)
                    .partial_cmp(&score(b))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|(idx, _)| idx);

        if let Some(idx) = victim {
            let removed = self.intentions.remove(idx);
            tracing::debug!(id = %removed.id, "evicted intention");
        }
    }

    pub fn len(&self) -> usize {
        self.intentions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intentions.is_empty()
    }
}

impl Default for Sankalpa {
    fn default() -> Self {
        Self::new(SankalpaConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bus() -> EventBus {
        EventBus::default()
    }

    #[test]
    fn extraction_strips_declarative_prefix() {
        let mut sankalpa = Sankalpa::default();
        let mut bus = bus();
        sankalpa.extract_from_message("I want to add JWT auth.", &mut bus);
        assert_eq!(sankalpa.len(), 1);
        assert_eq!(sankalpa.intentions()[0].goal, "add JWT auth");
    }

    #[test]
    fn extraction_keeps_verb_prefix() {
        let mut sankalpa = Sankalpa::default();
        let mut bus = bus();
        sankalpa.extract_from_message("Please fix the login redirect bug.", &mut bus);
        assert_eq!(sankalpa.len(), 1);
        assert!(sankalpa.intentions()[0].goal.starts_with("fix the login"));
    }

    #[test]
    fn repeated_mentions_merge_and_escalate() {
        let mut sankalpa = Sankalpa::default();
        let mut bus = bus();
        sankalpa.extract_from_message("I want to add JWT auth.", &mut bus);
        sankalpa.extract_from_message("Let's add JWT auth to the login.", &mut bus);
        sankalpa.extract_from_message("We need to add JWT auth now.", &mut bus);

        assert_eq!(sankalpa.len(), 1);
        let intention = &sankalpa.intentions()[0];
        assert_eq!(intention.goal, "add JWT auth");
        assert_eq!(intention.mention_count, 3);
        assert_eq!(intention.priority, Priority::High);
    }

    #[test]
    fn five_mentions_reach_critical() {
        let mut sankalpa = Sankalpa::default();
        let mut bus = bus();
        for _ in 0..5 {
            sankalpa.extract_from_message("I want to add JWT auth.", &mut bus);
        }
        assert_eq!(sankalpa.intentions()[0].priority, Priority::Critical);
    }

    #[test]
    fn compound_goals_split_on_and() {
        let mut sankalpa = Sankalpa::default();
        let mut bus = bus();
        sankalpa
            .extract_from_message("I want to update the parser and remove dead code.", &mut bus);
        assert_eq!(sankalpa.len(), 2);
    }

    #[test]
    fn goal_id_is_stable() {
        let mut a = Sankalpa::default();
        let mut b = Sankalpa::default();
        let mut bus = bus();
        a.extract_from_message("I want to add JWT auth.", &mut bus);
        b.extract_from_message("I want to add JWT auth.", &mut bus);
        assert_eq!(a.intentions()[0].id, b.intentions()[0].id);
    }

    #[test]
    fn created_event_emitted() {
        let mut sankalpa = Sankalpa::default();
        let mut bus = bus();
        sankalpa.extract_from_message("I want to add JWT auth.", &mut bus);
        let events = bus.drain();
        assert!(events
            .iter()
            .any(|e| matches!(e, ChetanaEvent::GoalCreated { goal, .. } if goal == "add JWT auth")));
    }

    #[test]
    fn progress_advances_on_matching_tool_output() {
        let mut sankalpa = Sankalpa::default();
        let mut bus = bus();
        sankalpa.extract_from_message("I want to add JWT auth.", &mut bus);
        sankalpa.on_tool_result("edit", "added jwt middleware to auth router", &mut bus);

        let intention = &sankalpa.intentions()[0];
        assert!((intention.progress - 0.1).abs() < f32::EPSILON);
        assert_eq!(intention.evidence, vec!["edit".to_string()]);
        assert_eq!(intention.stale_turns, 0);
    }

    #[test]
    fn unrelated_output_does_not_advance() {
        let mut sankalpa = Sankalpa::default();
        let mut bus = bus();
        sankalpa.extract_from_message("I want to add JWT auth.", &mut bus);
        sankalpa.on_tool_result("bash", "compiled 14 crates in 3.2s", &mut bus);
        assert!((sankalpa.intentions()[0].progress - 0.0).abs() < f32::EPSILON);
    }

    #[test]
    fn progress_is_monotone_and_caps_at_one() {
        let mut sankalpa = Sankalpa::default();
        let mut bus = bus();
        sankalpa.extract_from_message("I want to add JWT auth.", &mut bus);
        let mut last = 0.0f32;
        for _ in 0..15 {
            sankalpa.on_tool_result("edit", "jwt auth work", &mut bus);
            let p = sankalpa.intentions()[0].progress;
            assert!(p >= last);
            last = p;
        }
        let intention = &sankalpa.intentions()[0];
        assert!((intention.progress - 1.0).abs() < f32::EPSILON);
        assert_eq!(intention.status, IntentionStatus::Achieved);
    }

    #[test]
    fn evidence_is_capped() {
        let mut sankalpa = Sankalpa::default();
        let mut bus = bus();
        sankalpa.extract_from_message("I want to add JWT auth.", &mut bus);
        for i in 0..20 {
            // Alternate tools so the cap, not dedup, is what bounds it.
            sankalpa.on_tool_result(&format!("tool{i}"), "jwt auth progress", &mut bus);
        }
        assert!(sankalpa.intentions()[0].evidence.len() <= EVIDENCE_CAP);
    }

    #[test]
    fn stale_intentions_pause_then_abandon() {
        let mut sankalpa = Sankalpa::new(SankalpaConfig {
            abandonment_threshold: 2,
            ..Default::default()
        });
        let mut bus = bus();
        sankalpa.extract_from_message("I want to add JWT auth.", &mut bus);

        sankalpa.end_turn(&mut bus);
        sankalpa.end_turn(&mut bus);
        assert_eq!(sankalpa.intentions()[0].status, IntentionStatus::Paused);

        sankalpa.end_turn(&mut bus);
        sankalpa.end_turn(&mut bus);
        assert_eq!(sankalpa.intentions()[0].status, IntentionStatus::Abandoned);
    }

    #[test]
    fn re_mention_reactivates_paused() {
        let mut sankalpa = Sankalpa::new(SankalpaConfig {
            abandonment_threshold: 1,
            ..Default::default()
        });
        let mut bus = bus();
        sankalpa.extract_from_message("I want to add JWT auth.", &mut bus);
        sankalpa.end_turn(&mut bus);
        assert_eq!(sankalpa.intentions()[0].status, IntentionStatus::Paused);

        sankalpa.extract_from_message("Let's add JWT auth.", &mut bus);
        let intention = &sankalpa.intentions()[0];
        assert_eq!(intention.status, IntentionStatus::Active);
        assert_eq!(intention.stale_turns, 0);
    }

    #[test]
    fn capacity_evicts_least_alive_first() {
        let mut sankalpa = Sankalpa::new(SankalpaConfig {
            capacity: 3,
            abandonment_threshold: 1,
        });
        let mut bus = bus();
        sankalpa.extract_from_message("I want to improve alpha subsystem logging.", &mut bus);
        // Stale out the first goal so it pauses (lower status rank).
        sankalpa.end_turn(&mut bus);
        sankalpa.extract_from_message("I want to remove beta parser deadcode.", &mut bus);
        sankalpa.extract_from_message("I want to document gamma client quirks.", &mut bus);
        assert_eq!(sankalpa.len(), 3);

        sankalpa.extract_from_message("I want to speed delta index rebuilds.", &mut bus);
        assert_eq!(sankalpa.len(), 3);
        assert!(
            !sankalpa.intentions().iter().any(|i| i.goal.contains("alpha")),
            "paused goal should be evicted before active ones"
        );
    }

    #[test]
    fn capacity_never_exceeds_system_cap() {
        let mut sankalpa = Sankalpa::new(SankalpaConfig {
            capacity: 5_000,
            ..Default::default()
        });
        let mut bus = bus();
        // Goals share only one token, staying under the merge threshold.
        for i in 0..150 {
            sankalpa.extract_from_message(
                &format!("I want to implement module{i:03} feature{i:03} pipeline{i:03}."),
                &mut bus,
            );
        }
        assert!(sankalpa.len() <= INTENTION_CAP);
        assert!(sankalpa.len() > 50, "goals should not have merged");
    }
}
