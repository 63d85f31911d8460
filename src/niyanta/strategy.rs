//! Dispatch strategies: how a routed task maps onto agent slots.
//!
//! Six strategies compete under the bandit: round-robin, least-loaded,
//! specialized (capability affinity), hierarchical (decompose on "then" /
//! "and"), competitive (race N slots, first wins), and swarm (everyone
//! contributes, results merge). Each implements [`Strategy`] and is held
//! in a [`StrategyRegistry`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::{capability_affinity, AgentSlot, SlotStats, Task};

/// The six dispatch strategies, in canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    RoundRobin,
    LeastLoaded,
    Specialized,
    Hierarchical,
    Competitive,
    Swarm,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 6] = [
        StrategyKind::RoundRobin,
        StrategyKind::LeastLoaded,
        StrategyKind::Specialized,
        StrategyKind::Hierarchical,
        StrategyKind::Competitive,
        StrategyKind::Swarm,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RoundRobin => "round-robin",
            Self::LeastLoaded => "least-loaded",
            Self::Specialized => "specialized",
            Self::Hierarchical => "hierarchical",
            Self::Competitive => "competitive",
            Self::Swarm => "swarm",
        }
    }

    /// Index in canonical order.
    pub fn index(&self) -> usize {
        Self::ALL.iter().position(|k| k == self).unwrap_or(0)
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How multi-slot results combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Aggregation {
    /// One slot, one result.
    Single,
    /// Race: the first finisher wins, the rest are cancelled.
    FirstWins,
    /// Everyone's output merges.
    MergeAll,
}

/// One decomposed subtask.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubTask {
    pub description: String,
    pub task_type: String,
    /// Subtasks sharing a group run in parallel; groups run in order.
    pub parallel_group: usize,
}

/// Shared working context initialized for swarm dispatch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SwarmContext {
    pub task_id: String,
    /// Slot id → contribution summary.
    pub contributions: HashMap<String, String>,
    pub shared_notes: Vec<String>,
}

/// The outcome of a strategy's slot selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub strategy: StrategyKind,
    /// Chosen slots, in dispatch order.
    pub slot_ids: Vec<String>,
    pub aggregation: Aggregation,
    /// Non-empty only for hierarchical dispatch.
    pub subtasks: Vec<SubTask>,
    /// Present only for swarm dispatch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub swarm: Option<SwarmContext>,
}

/// A slot-selection strategy.
pub trait Strategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Choose slots for a task. Slots at their concurrency limit are
    /// already filtered out by the caller.
    fn assign(
        &mut self,
        task: &Task,
        slots: &[AgentSlot],
        stats: &HashMap<String, SlotStats>,
    ) -> Assignment;
}

// ---------------------------------------------------------------------------
// Round-robin
// ---------------------------------------------------------------------------

/// A single counter modulo the slot count.
#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: usize,
}

impl Strategy for RoundRobin {
    fn kind(&self) -> StrategyKind {
        StrategyKind::RoundRobin
    }

    fn assign(
        &mut self,
        _task: &Task,
        slots: &[AgentSlot],
        _stats: &HashMap<String, SlotStats>,
    ) -> Assignment {
        let slot_ids = if slots.is_empty() {
            Vec::new()
        } else {
            let chosen = &slots[self.counter % slots.len()];
            self.counter = self.counter.wrapping_add(1);
            vec![chosen.id.clone()]
        };
        Assignment {
            strategy: self.kind(),
            slot_ids,
            aggregation: Aggregation::Single,
            subtasks: Vec::new(),
            swarm: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Least-loaded
// ---------------------------------------------------------------------------

/// Minimum running tasks, ties broken by minimum queued tasks.
#[derive(Debug, Default)]
pub struct LeastLoaded;

impl Strategy for LeastLoaded {
    fn kind(&self) -> StrategyKind {
        StrategyKind::LeastLoaded
    }

    fn assign(
        &mut self,
        _task: &Task,
        slots: &[AgentSlot],
        stats: &HashMap<String, SlotStats>,
    ) -> Assignment {
        let chosen = slots.iter().min_by_key(|slot| {
            let stat = stats.get(&slot.id).copied().unwrap_or_default();
            (stat.running_tasks, stat.queued_tasks)
        });
        Assignment {
            strategy: self.kind(),
            slot_ids: chosen.map(|s| vec![s.id.clone()]).unwrap_or_default(),
            aggregation: Aggregation::Single,
            subtasks: Vec::new(),
            swarm: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Specialized
// ---------------------------------------------------------------------------

/// Best capability affinity; ties go to the first slot.
#[derive(Debug, Default)]
pub struct Specialized;

impl Strategy for Specialized {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Specialized
    }

    fn assign(
        &mut self,
        task: &Task,
        slots: &[AgentSlot],
        _stats: &HashMap<String, SlotStats>,
    ) -> Assignment {
        let mut best: Option<(&AgentSlot, f64)> = None;
        for slot in slots {
            let affinity = capability_affinity(task, slot);
            if best.map(|(_, score)| affinity > score).unwrap_or(true) {
                best = Some((slot, affinity));
            }
        }
        Assignment {
            strategy: self.kind(),
            slot_ids: best.map(|(s, _)| vec![s.id.clone()]).unwrap_or_default(),
            aggregation: Aggregation::Single,
            subtasks: Vec::new(),
            swarm: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Hierarchical
// ---------------------------------------------------------------------------

/// Decompose on "then" (sequential) and "and" (parallel within a stage).
#[derive(Debug, Default)]
pub struct Hierarchical;

/// Verb-to-type inference for decomposed subtasks.
fn infer_subtask_type(description: &str) -> String {
    let first = description
        .split_whitespace()
        .next()
        .unwrap_or("")
        .to_lowercase();
    match first.as_str() {
        "implement" | "write" | "add" | "fix" | "refactor" | "build" | "create" => "code".into(),
        "test" | "verify" | "validate" => "test".into(),
        "search" | "find" | "locate" | "grep" => "search".into(),
        "deploy" | "release" | "publish" => "deploy".into(),
        _ => "general".into(),
    }
}

/// Split a description into staged subtasks.
///
/// Depth 0 returns the task as-is; with no markers the whole description
/// becomes a single subtask.
pub fn decompose(description: &str, depth: usize) -> Vec<SubTask> {
    if depth == 0 {
        return vec![SubTask {
            description: description.to_string(),
            task_type: infer_subtask_type(description),
            parallel_group: 0,
        }];
    }

    let mut subtasks = Vec::new();
    for (group, stage) in description.split(" then ").enumerate() {
        for part in stage.split(" and ") {
            let part = part.trim().trim_start_matches(',').trim();
            if part.is_empty() {
                continue;
            }
            subtasks.push(SubTask {
                description: part.to_string(),
                task_type: infer_subtask_type(part),
                parallel_group: group,
            });
        }
    }
    if subtasks.is_empty() {
        subtasks.push(SubTask {
            description: description.to_string(),
            task_type: infer_subtask_type(description),
            parallel_group: 0,
        });
    }
    subtasks
}

impl Strategy for Hierarchical {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Hierarchical
    }

    fn assign(
        &mut self,
        task: &Task,
        slots: &[AgentSlot],
        _stats: &HashMap<String, SlotStats>,
    ) -> Assignment {
        let subtasks = decompose(&task.description, 1);
        let slot_ids = slots
            .iter()
            .cycle()
            .take(subtasks.len().min(slots.len().max(1)))
            .map(|s| s.id.clone())
            .collect();
        Assignment {
            strategy: self.kind(),
            slot_ids,
            aggregation: Aggregation::MergeAll,
            subtasks,
            swarm: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Competitive
// ---------------------------------------------------------------------------

/// Race the first N slots; first finisher wins.
#[derive(Debug)]
pub struct Competitive {
    pub racers: usize,
}

impl Default for Competitive {
    fn default() -> Self {
        Self { racers: 2 }
    }
}

impl Strategy for Competitive {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Competitive
    }

    fn assign(
        &mut self,
        _task: &Task,
        slots: &[AgentSlot],
        _stats: &HashMap<String, SlotStats>,
    ) -> Assignment {
        let n = self.racers.max(2).min(slots.len().max(1));
        Assignment {
            strategy: self.kind(),
            slot_ids: slots.iter().take(n).map(|s| s.id.clone()).collect(),
            aggregation: Aggregation::FirstWins,
            subtasks: Vec::new(),
            swarm: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Swarm
// ---------------------------------------------------------------------------

/// Everyone works; results merge.
#[derive(Debug, Default)]
pub struct Swarm;

impl Strategy for Swarm {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Swarm
    }

    fn assign(
        &mut self,
        task: &Task,
        slots: &[AgentSlot],
        _stats: &HashMap<String, SlotStats>,
    ) -> Assignment {
        Assignment {
            strategy: self.kind(),
            slot_ids: slots.iter().map(|s| s.id.clone()).collect(),
            aggregation: Aggregation::MergeAll,
            subtasks: Vec::new(),
            swarm: Some(SwarmContext {
                task_id: task.id.clone(),
                contributions: HashMap::new(),
                shared_notes: Vec::new(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Holds one instance of every strategy.
pub struct StrategyRegistry {
    strategies: Vec<Box<dyn Strategy>>,
}

impl StrategyRegistry {
    /// All six built-ins.
    pub fn with_builtins() -> Self {
        Self {
            strategies: vec![
                Box::new(RoundRobin::default()),
                Box::new(LeastLoaded),
                Box::new(Specialized),
                Box::new(Hierarchical),
                Box::new(Competitive::default()),
                Box::new(Swarm),
            ],
        }
    }

    /// Dispatch through a specific strategy, skipping saturated slots.
    pub fn assign(
        &mut self,
        kind: StrategyKind,
        task: &Task,
        slots: &[AgentSlot],
        stats: &HashMap<String, SlotStats>,
    ) -> Assignment {
        let eligible: Vec<AgentSlot> = slots
            .iter()
            .filter(|slot| {
                let running = stats.get(&slot.id).map(|s| s.running_tasks).unwrap_or(0);
                running < slot.max_concurrent.max(1)
            })
            .cloned()
            .collect();
        let strategy = self
            .strategies
            .iter_mut()
            .find(|s| s.kind() == kind)
            .expect("all built-in strategies registered");
        strategy.assign(task, &eligible, stats)
    }
}

impl std::fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kinds: Vec<&str> = self.strategies.iter().map(|s| s.kind().as_str()).collect();
        f.debug_struct("StrategyRegistry").field("strategies", &kinds).finish()
    }
}

// ---------------------------------------------------------------------------
// Result merging
// ---------------------------------------------------------------------------

/// Execution metrics attached to a task result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskMetrics {
    /// Epoch ms.
    pub start_time: i64,
    pub end_time: i64,
    pub tokens: u64,
    pub cost: f64,
    pub tool_calls: u32,
    pub retries: u32,
}

/// The outcome of one slot's work on a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub success: bool,
    pub output: String,
    pub artifacts: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub metrics: TaskMetrics,
}

/// Merge swarm results into one outcome.
///
/// Any success makes the merge a success: successful outputs concatenate,
/// artifacts union, metrics span the envelope and sum the counters. All
/// failures collapse into one failure with the errors joined.
pub fn merge_swarm_results(results: &[TaskOutcome]) -> TaskOutcome {
    let successes: Vec<&TaskOutcome> = results.iter().filter(|r| r.success).collect();

    let mut metrics = TaskMetrics {
        start_time: results.iter().map(|r| r.metrics.start_time).min().unwrap_or(0),
        end_time: results.iter().map(|r| r.metrics.end_time).max().unwrap_or(0),
        ..TaskMetrics::default()
    };
    for result in results {
        metrics.tokens += result.metrics.tokens;
        metrics.cost += result.metrics.cost;
        metrics.tool_calls += result.metrics.tool_calls;
        metrics.retries += result.metrics.retries;
    }

    if successes.is_empty() {
        let joined = results
            .iter()
            .filter_map(|r| r.error.as_deref())
            .collect::<Vec<_>>()
            .join("; ");
        return TaskOutcome {
            success: false,
            output: "All swarm agents failed".into(),
            artifacts: Vec::new(),
            error: Some(joined),
            metrics,
        };
    }

    let output = successes
        .iter()
        .map(|r| r.output.as_str())
        .filter(|o| !o.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    let mut artifacts = Vec::new();
    for result in &successes {
        for artifact in &result.artifacts {
            if !artifacts.contains(artifact) {
                artifacts.push(artifact.clone());
            }
        }
    }

    TaskOutcome {
        success: true,
        output,
        artifacts,
        error: None,
        metrics,
    }
}
