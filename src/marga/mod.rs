//! Marga: the request classification pipeline.
//!
//! Two lightweight classifiers run on every request: one names the task
//! type (chat, search, memory, file-op, code-gen, reasoning, other), the
//! other scores complexity into five tiers from weighted keyword signals.
//! The combined result is looked up in a declarative binding table to pick
//! a provider and model; retrieval-shaped tasks skip the LLM entirely.

use serde::{Deserialize, Serialize};

use crate::message::{Message, Role};

/// What kind of work a request is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskType {
    Chat,
    Search,
    Memory,
    FileOp,
    CodeGen,
    Reasoning,
    Other,
}

impl TaskType {
    /// Task types answered from local data without a provider call.
    pub fn skips_llm(&self) -> bool {
        matches!(self, Self::Search | Self::Memory | Self::FileOp)
    }
}

/// Complexity tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Trivial,
    Simple,
    Medium,
    Complex,
    Expert,
}

impl Complexity {
    /// Map an accumulated signal score to a tier.
    pub fn from_score(score: f64) -> Self {
        if score < 1.0 {
            Self::Trivial
        } else if score < 2.5 {
            Self::Simple
        } else if score < 4.0 {
            Self::Medium
        } else if score < 5.5 {
            Self::Complex
        } else {
            Self::Expert
        }
    }
}

/// Classification input: the conversation plus any available tools.
#[derive(Debug, Clone, Default)]
pub struct ClassifyContext {
    pub messages: Vec<Message>,
    pub tools: Vec<String>,
}

impl ClassifyContext {
    pub fn from_text(text: &str) -> Self {
        Self {
            messages: vec![Message::text(Role::User, text)],
            tools: Vec::new(),
        }
    }

    fn last_user_text(&self) -> String {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(Message::text_content)
            .unwrap_or_default()
    }
}

/// Task-type verdict.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TaskTypeResult {
    pub task_type: TaskType,
    pub confidence: f64,
}

/// Complexity verdict.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComplexityResult {
    pub complexity: Complexity,
    pub confidence: f64,
    pub score: f64,
}

/// The routing outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteDecision {
    pub task_type: TaskType,
    pub complexity: Complexity,
    pub provider_id: String,
    pub model_id: String,
    pub rationale: String,
    pub confidence: f64,
    pub skip_llm: bool,
    pub temperature: Option<f32>,
}

/// One row of the binding table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelBinding {
    pub task_types: Vec<TaskType>,
    pub min_complexity: Complexity,
    pub max_complexity: Complexity,
    /// Preferred providers, best first.
    pub provider_ids: Vec<String>,
    /// Model per provider, parallel to `provider_ids`.
    pub model_ids: Vec<String>,
}

impl ModelBinding {
    fn matches(&self, task_type: TaskType, complexity: Complexity) -> bool {
        self.task_types.contains(&task_type)
            && complexity >= self.min_complexity
            && complexity <= self.max_complexity
    }
}

/// Optional temperature adjustment hook.
pub type TemperatureHook = Box<dyn Fn(f32, TaskType, Complexity) -> f32 + Send + Sync>;

/// The router.
pub struct MargaRouter {
    bindings: Vec<ModelBinding>,
    availability: Box<dyn Fn(&str) -> bool + Send + Sync>,
    temperature_hook: Option<TemperatureHook>,
}

/// Base sampling temperature before the hook runs.
const BASE_TEMPERATURE: f32 = 0.7;

impl MargaRouter {
    /// Router over an explicit binding table; all providers assumed
    /// available.
    pub fn new(bindings: Vec<ModelBinding>) -> Self {
        Self {
            bindings,
            availability: Box::new(|_| true),
            temperature_hook: None,
        }
    }

    /// Router with the default binding table.
    pub fn with_defaults() -> Self {
        Self::new(default_bindings())
    }

    /// Install a provider availability probe.
    pub fn with_availability(
        mut self,
        probe: impl Fn(&str) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.availability = Box::new(probe);
        self
    }

    /// Install a temperature adjustment hook.
    pub fn with_temperature_hook(mut self, hook: TemperatureHook) -> Self {
        self.temperature_hook = Some(hook);
        self
    }

    /// Run both classifiers and resolve the binding.
    pub fn classify(&self, ctx: &ClassifyContext) -> RouteDecision {
        let task = classify_task_type(ctx);
        let mut complexity = classify_complexity(ctx);

        // Reasoning work is never routed below complex.
        if task.task_type == TaskType::Reasoning && complexity.complexity < Complexity::Complex {
            complexity.complexity = Complexity::Complex;
        }

        let confidence = (task.confidence * complexity.confidence).sqrt();
        let (provider_id, model_id, rationale) =
            self.resolve_binding(task.task_type, complexity.complexity);

        let skip_llm = task.task_type.skips_llm();
        let temperature = if skip_llm {
            None
        } else {
            Some(match &self.temperature_hook {
                Some(hook) => hook(BASE_TEMPERATURE, task.task_type, complexity.complexity),
                None => BASE_TEMPERATURE,
            })
        };

        tracing::debug!(
            task = ?task.task_type,
            complexity = ?complexity.complexity,
            provider = %provider_id,
            skip_llm,
            "request classified"
        );

        RouteDecision {
            task_type: task.task_type,
            complexity: complexity.complexity,
            provider_id,
            model_id,
            rationale,
            confidence,
            skip_llm,
            temperature,
        }
    }

    fn resolve_binding(
        &self,
        task_type: TaskType,
        complexity: Complexity,
    ) -> (String, String, String) {
        for binding in &self.bindings {
            if !binding.matches(task_type, complexity) {
                continue;
            }
            for (provider, model) in binding.provider_ids.iter().zip(&binding.model_ids) {
                if (self.availability)(provider) {
                    return (
                        provider.clone(),
                        model.clone(),
                        format!("{task_type:?}/{complexity:?} matched binding, {provider} available"),
                    );
                }
            }
        }
        // Nothing matched or nothing available: a deliberate last resort.
        (
            "local".to_string(),
            "fallback".to_string(),
            format!("no available binding for {task_type:?}/{complexity:?}"),
        )
    }
}

impl std::fmt::Debug for MargaRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MargaRouter")
            .field("bindings", &self.bindings.len())
            .finish_non_exhaustive()
    }
}

/// The stock binding table: cheap models for light work, frontier models
/// for complex and expert tiers, local handlers for retrieval shapes.
pub fn default_bindings() -> Vec<ModelBinding> {
    vec![
        ModelBinding {
            task_types: vec![TaskType::Search, TaskType::Memory, TaskType::FileOp],
            min_complexity: Complexity::Trivial,
            max_complexity: Complexity::Expert,
            provider_ids: vec!["local".into()],
            model_ids: vec!["none".into()],
        },
        ModelBinding {
            task_types: vec![TaskType::Chat, TaskType::Other],
            min_complexity: Complexity::Trivial,
            max_complexity: Complexity::Simple,
            provider_ids: vec!["anthropic".into(), "openai".into()],
            model_ids: vec!["claude-haiku".into(), "gpt-mini".into()],
        },
        ModelBinding {
            task_types: vec![TaskType::Chat, TaskType::CodeGen, TaskType::Other],
            min_complexity: Complexity::Medium,
            max_complexity: Complexity::Medium,
            provider_ids: vec!["anthropic".into(), "openai".into()],
            model_ids: vec!["claude-sonnet".into(), "gpt-standard".into()],
        },
        ModelBinding {
            task_types: vec![
                TaskType::Chat,
                TaskType::CodeGen,
                TaskType::Reasoning,
                TaskType::Other,
            ],
            min_complexity: Complexity::Complex,
            max_complexity: Complexity::Expert,
            provider_ids: vec!["anthropic".into(), "openai".into()],
            model_ids: vec!["claude-opus".into(), "gpt-pro".into()],
        },
        ModelBinding {
            task_types: vec![TaskType::CodeGen],
            min_complexity: Complexity::Trivial,
            max_complexity: Complexity::Simple,
            provider_ids: vec!["anthropic".into(), "openai".into()],
            model_ids: vec!["claude-sonnet".into(), "gpt-standard".into()],
        },
    ]
}

// ---------------------------------------------------------------------------
// Task-type classifier
// ---------------------------------------------------------------------------

fn classify_task_type(ctx: &ClassifyContext) -> TaskTypeResult {
    let text = ctx.last_user_text().to_lowercase();
    if text.is_empty() {
        return TaskTypeResult {
            task_type: TaskType::Other,
            confidence: 0.3,
        };
    }

    let groups: [(TaskType, &[&str]); 5] = [
        (
            TaskType::Search,
            &["search", "find", "look up", "locate", "grep", "where is", "where are"],
        ),
        (
            TaskType::Memory,
            &["remember", "recall", "last time", "previously", "what did we", "memory"],
        ),
        (
            TaskType::FileOp,
            &[
                "rename",
                "move the file",
                "copy the file",
                "delete the file",
                "create directory",
                "list files",
                "mkdir",
            ],
        ),
        (
            TaskType::Reasoning,
            &[
                "why",
                "analyze",
                "explain",
                "compare",
                "trade-off",
                "tradeoff",
                "design",
                "architecture",
                "pros and cons",
            ],
        ),
        (
            TaskType::CodeGen,
            &[
                "implement", "write a", "refactor", "fix", "add a", "function", "class", "bug",
                "compile", "test",
            ],
        ),
    ];

    let mut best = (TaskType::Other, 0usize);
    for (task_type, keywords) in groups {
        let hits = keywords.iter().filter(|k| text.contains(*k)).count();
        if hits > best.1 {
            best = (task_type, hits);
        }
    }

    if best.1 == 0 {
        let greeting = ["hi", "hello", "hey", "thanks", "thank you", "ok", "okay"]
            .iter()
            .any(|g| text.trim() == *g || text.starts_with(&format!("{g} ")) || text.starts_with(&format!("{g},")));
        let task_type = if greeting || text.split_whitespace().count() < 12 {
            TaskType::Chat
        } else {
            TaskType::Other
        };
        return TaskTypeResult {
            task_type,
            confidence: 0.5,
        };
    }

    TaskTypeResult {
        task_type: best.0,
        confidence: (0.5 + 0.15 * best.1 as f64).min(0.95),
    }
}

// ---------------------------------------------------------------------------
// Complexity classifier
// ---------------------------------------------------------------------------

const CODE_KEYWORDS: [&str; 10] = [
    "function", "class", "struct", "implement", "refactor", "compile", "test", "bug", "api",
    "module",
];

const REASONING_MARKERS: [&str; 5] = ["analyze", "trade-off", "tradeoff", "evaluate", "compare"];

const EXPERT_MARKERS: [&str; 6] = [
    "distributed",
    "fault tolerance",
    "consensus",
    "linearizability",
    "byzantine",
    "formal verification",
];

fn classify_complexity(ctx: &ClassifyContext) -> ComplexityResult {
    let text = ctx.last_user_text().to_lowercase();
    let words = text.split_whitespace().count();
    let mut score = 0.0f64;
    let mut signals = 0usize;

    let greeting = ["hi", "hello", "hey", "thanks", "thank you"]
        .iter()
        .any(|g| text.trim() == *g);
    if greeting {
        signals += 1; // weight 0
    }
    if words > 0 && words < 10 && text.contains('?') {
        score += 0.5;
        signals += 1;
    }
    let has_code = CODE_KEYWORDS.iter().any(|k| text.contains(k));
    if words > 0 && words < 50 && !has_code && !greeting {
        score += 1.0;
        signals += 1;
    }
    if has_code {
        score += 2.0;
        signals += 1;
    }
    if !ctx.tools.is_empty() {
        score += 2.0;
        signals += 1;
    }
    if text.contains("first") && text.contains("then") {
        score += 3.0;
        signals += 1;
    }
    if words > 200 {
        score += 3.0;
        signals += 1;
    }
    if REASONING_MARKERS.iter().any(|m| text.contains(m)) {
        score += 1.5;
        signals += 1;
    }

    let mut complexity = Complexity::from_score(score);
    if EXPERT_MARKERS.iter().any(|m| text.contains(m)) {
        complexity = Complexity::Expert;
        signals += 1;
    }

    ComplexityResult {
        complexity,
        confidence: (0.4 + 0.1 * signals as f64).min(0.9),
        score,
    }
}
