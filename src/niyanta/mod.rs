//! Niyanta: rule-based task routing over a fleet of agent slots.
//!
//! Priority-ordered rules match tasks by keyword, regex, capability
//! overlap, file extension, a tiny expression DSL, or unconditionally (the
//! required fallback). Routing results are cached per (type, description)
//! and rules may transform the task on the way through, e.g. escalating
//! priority.

pub mod bandit;
pub mod strategy;

use std::collections::{BTreeSet, HashMap};

use miette::Diagnostic;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::hash::fnv1a;
use crate::text::{jaccard, token_set};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from task routing.
#[derive(Debug, Error, Diagnostic)]
pub enum RouteError {
    #[error("invalid route pattern \"{pattern}\": {message}")]
    #[diagnostic(
        code(chitragupta::niyanta::bad_pattern),
        help("Fix the regular expression in the routing rule definition.")
    )]
    BadPattern { pattern: String, message: String },

    #[error("invalid route expression \"{expression}\"")]
    #[diagnostic(
        code(chitragupta::niyanta::bad_expression),
        help(
            "Expressions support `task.type == \"x\"` and `task.description contains \"x\"`, \
             joined with `and`."
        )
    )]
    BadExpression { expression: String },
}

pub type RouteResult<T> = std::result::Result<T, RouteError>;

// ---------------------------------------------------------------------------
// Tasks and slots
// ---------------------------------------------------------------------------

/// Task priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    Normal,
    High,
    Critical,
}

/// Task lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// A unit of routable work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub task_type: String,
    pub description: String,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}

impl Task {
    pub fn new(id: impl Into<String>, task_type: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            task_type: task_type.into(),
            description: description.into(),
            priority: TaskPriority::Normal,
            status: TaskStatus::Pending,
            context: None,
        }
    }

    /// The file this task concerns, when the context names one.
    fn context_file(&self) -> Option<&str> {
        self.context.as_ref()?.get("file")?.as_str()
    }
}

/// One agent slot in the fleet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSlot {
    pub id: String,
    pub role: String,
    pub capabilities: BTreeSet<String>,
    /// At least 1.
    pub max_concurrent: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_scale: Option<bool>,
    pub min_instances: usize,
    pub max_instances: usize,
}

impl AgentSlot {
    pub fn new(id: impl Into<String>, role: impl Into<String>, capabilities: &[&str]) -> Self {
        Self {
            id: id.into(),
            role: role.into(),
            capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
            max_concurrent: 1,
            auto_scale: None,
            min_instances: 1,
            max_instances: 1,
        }
    }
}

/// Live load numbers per slot; absent stats count as idle.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SlotStats {
    pub running_tasks: usize,
    pub queued_tasks: usize,
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

/// How a rule decides whether it applies.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleMatcher {
    /// Case-insensitive substring match on the description.
    Keyword { keywords: Vec<String> },
    /// Regex on the description.
    Pattern { pattern: String },
    /// Capability-set overlap with the target role's slot.
    Capability { required: BTreeSet<String> },
    /// Description or context file ends with one of these extensions.
    FileType { extensions: Vec<String> },
    /// Unconditional; the required fallback.
    Always,
    /// Tiny DSL over type and description.
    Expression { expression: String },
}

/// Applied to a task as it routes through a matching rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskTransform {
    /// Raise the task's priority to critical.
    EscalateToCritical,
}

/// A routing rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteRule {
    pub name: String,
    pub matcher: RuleMatcher,
    pub target_role: String,
    /// Higher wins; the fallback sits at 0.
    pub priority: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transform: Option<TaskTransform>,
}

/// Minimum capability Jaccard for a capability rule to fire.
const CAPABILITY_MIN_JACCARD: f64 = 0.3;

impl RouteRule {
    fn matches(&self, task: &Task, slots: &[AgentSlot]) -> RouteResult<bool> {
        let description = task.description.to_lowercase();
        match &self.matcher {
            RuleMatcher::Keyword { keywords } => Ok(keywords
                .iter()
                .any(|k| description.contains(&k.to_lowercase()))),
            RuleMatcher::Pattern { pattern } => {
                let regex = Regex::new(pattern).map_err(|e| RouteError::BadPattern {
                    pattern: pattern.clone(),
                    message: e.to_string(),
                })?;
                Ok(regex.is_match(&task.description))
            }
            RuleMatcher::Capability { required } => {
                let Some(slot) = slots.iter().find(|s| s.role == self.target_role) else {
                    return Ok(false);
                };
                let required: std::collections::HashSet<String> =
                    required.iter().cloned().collect();
                let held: std::collections::HashSet<String> =
                    slot.capabilities.iter().cloned().collect();
                Ok(jaccard(&required, &held) >= CAPABILITY_MIN_JACCARD)
            }
            RuleMatcher::FileType { extensions } => {
                let candidates = [Some(task.description.as_str()), task.context_file()];
                Ok(candidates.iter().flatten().any(|text| {
                    extensions
                        .iter()
                        .any(|ext| text.to_lowercase().ends_with(&ext.to_lowercase()))
                }))
            }
            RuleMatcher::Always => Ok(true),
            RuleMatcher::Expression { expression } => evaluate_expression(expression, task),
        }
    }
}

/// Evaluate the tiny rule DSL.
///
/// Grammar: clauses joined by `and`, each either
/// `task.type == "x"` or `task.description contains "x"`.
fn evaluate_expression(expression: &str, task: &Task) -> RouteResult<bool> {
    let bad = || RouteError::BadExpression {
        expression: expression.to_string(),
    };
    for clause in expression.split(" and ") {
        let clause = clause.trim();
        let holds = if let Some(rest) = clause.strip_prefix("task.type") {
            let rest = rest.trim();
            let value = rest.strip_prefix("==").ok_or_else(bad)?.trim();
            let value = value.strip_prefix('"').and_then(|v| v.strip_suffix('"')).ok_or_else(bad)?;
            task.task_type == value
        } else if let Some(rest) = clause.strip_prefix("task.description") {
            let rest = rest.trim();
            let value = rest.strip_prefix("contains").ok_or_else(bad)?.trim();
            let value = value.strip_prefix('"').and_then(|v| v.strip_suffix('"')).ok_or_else(bad)?;
            task.description.to_lowercase().contains(&value.to_lowercase())
        } else {
            return Err(bad());
        };
        if !holds {
            return Ok(false);
        }
    }
    Ok(true)
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// The rule-based task router with a route cache.
pub struct TaskRouter {
    rules: Vec<RouteRule>,
    cache: HashMap<(String, String), String>,
}

impl TaskRouter {
    /// Build a router. A fallback `always` rule at priority 0 is appended
    /// when the rule set lacks one.
    pub fn new(mut rules: Vec<RouteRule>) -> Self {
        if !rules
            .iter()
            .any(|r| matches!(r.matcher, RuleMatcher::Always))
        {
            rules.push(RouteRule {
                name: "fallback".into(),
                matcher: RuleMatcher::Always,
                target_role: "generalist".into(),
                priority: 0,
                transform: None,
            });
        }
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        Self {
            rules,
            cache: HashMap::new(),
        }
    }

    /// Route a task to a role. Cached per (type, description hash).
    pub fn route(&mut self, task: &Task, slots: &[AgentSlot]) -> RouteResult<String> {
        let key = (task.task_type.clone(), fnv1a(&task.description));
        if let Some(role) = self.cache.get(&key) {
            return Ok(role.clone());
        }
        let (role, _) = self.match_rule(task, slots)?;
        self.cache.insert(key, role.clone());
        Ok(role)
    }

    /// Route and apply the matching rule's transform to a task copy.
    pub fn route_and_transform(
        &mut self,
        task: &Task,
        slots: &[AgentSlot],
    ) -> RouteResult<(String, Task)> {
        let (role, transform) = self.match_rule(task, slots)?;
        let mut routed = task.clone();
        if let Some(TaskTransform::EscalateToCritical) = transform {
            routed.priority = TaskPriority::Critical;
        }
        Ok((role, routed))
    }

    /// Drop all cached routes.
    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    fn match_rule(
        &self,
        task: &Task,
        slots: &[AgentSlot],
    ) -> RouteResult<(String, Option<TaskTransform>)> {
        for rule in &self.rules {
            if rule.matches(task, slots)? {
                tracing::trace!(rule = %rule.name, role = %rule.target_role, task = %task.id, "task routed");
                return Ok((rule.target_role.clone(), rule.transform));
            }
        }
        // Unreachable: construction guarantees an always rule.
        Ok(("generalist".into(), None))
    }
}

impl std::fmt::Debug for TaskRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRouter")
            .field("rules", &self.rules.len())
            .field("cached", &self.cache.len())
            .finish()
    }
}

/// Specialization ranking helper shared with the strategies: Jaccard of
/// task keywords against slot capabilities.
pub(crate) fn capability_affinity(task: &Task, slot: &AgentSlot) -> f64 {
    let task_tokens = token_set(&format!("{} {}", task.task_type, task.description), 2, true);
    let capability_tokens: std::collections::HashSet<String> =
        slot.capabilities.iter().cloned().collect();
    jaccard(&task_tokens, &capability_tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slots() -> Vec<AgentSlot> {
        vec![
            AgentSlot::new("slot-1", "tester", &["test", "coverage", "fixtures"]),
            AgentSlot::new("slot-2", "coder", &["rust", "refactor"]),
        ]
    }

    fn rules() -> Vec<RouteRule> {
        vec![
            RouteRule {
                name: "tests-by-keyword".into(),
                matcher: RuleMatcher::Keyword {
                    keywords: vec!["test".into(), "coverage".into()],
                },
                target_role: "tester".into(),
                priority: 10,
                transform: None,
            },
            RouteRule {
                name: "hotfix-pattern".into(),
                matcher: RuleMatcher::Pattern {
                    pattern: r"(?i)\bhotfix\b".into(),
                },
                target_role: "coder".into(),
                priority: 20,
                transform: Some(TaskTransform::EscalateToCritical),
            },
            RouteRule {
                name: "rust-files".into(),
                matcher: RuleMatcher::FileType {
                    extensions: vec![".rs".into()],
                },
                target_role: "coder".into(),
                priority: 5,
                transform: None,
            },
        ]
    }

    #[test]
    fn keyword_rule_matches_case_insensitively() {
        let mut router = TaskRouter::new(rules());
        let task = Task::new("t1", "code", "improve TEST coverage for the parser");
        assert_eq!(router.route(&task, &slots()).unwrap(), "tester");
    }

    #[test]
    fn fallback_rule_always_exists() {
        let mut router = TaskRouter::new(vec![]);
        let task = Task::new("t1", "misc", "completely unmatched request");
        assert_eq!(router.route(&task, &slots()).unwrap(), "generalist");
    }

    #[test]
    fn higher_priority_rule_wins() {
        let mut router = TaskRouter::new(rules());
        // Matches both the hotfix pattern (20) and test keyword (10).
        let task = Task::new("t1", "code", "hotfix the failing test");
        assert_eq!(router.route(&task, &slots()).unwrap(), "coder");
    }

    #[test]
    fn file_type_checks_description_and_context() {
        let mut router = TaskRouter::new(rules());
        let by_description = Task::new("t1", "code", "tidy src/paths.rs");
        assert_eq!(router.route(&by_description, &slots()).unwrap(), "coder");

        let mut by_context = Task::new("t2", "code", "tidy this up");
        by_context.context = Some(serde_json::json!({"file": "src/lib.rs"}));
        assert_eq!(router.route(&by_context, &slots()).unwrap(), "coder");
    }

    #[test]
    fn capability_rule_uses_jaccard_threshold() {
        let rules = vec![RouteRule {
            name: "needs-testing-caps".into(),
            matcher: RuleMatcher::Capability {
                required: ["test", "coverage"].iter().map(|s| s.to_string()).collect(),
            },
            target_role: "tester".into(),
            priority: 10,
            transform: None,
        }];
        let mut router = TaskRouter::new(rules);
        let task = Task::new("t1", "qa", "whatever");
        // tester holds {test, coverage, fixtures}: overlap 2 of union 3.
        assert_eq!(router.route(&task, &slots()).unwrap(), "tester");
    }

    #[test]
    fn expression_dsl_matches_type_and_description() {
        let rules = vec![RouteRule {
            name: "expr".into(),
            matcher: RuleMatcher::Expression {
                expression: r#"task.type == "deploy" and task.description contains "staging""#
                    .into(),
            },
            target_role: "deployer".into(),
            priority: 10,
            transform: None,
        }];
        let mut router = TaskRouter::new(rules);

        let hit = Task::new("t1", "deploy", "push build to STAGING cluster");
        assert_eq!(router.route(&hit, &slots()).unwrap(), "deployer");

        let miss = Task::new("t2", "deploy", "push build to production");
        assert_eq!(router.route(&miss, &slots()).unwrap(), "generalist");
    }

    #[test]
    fn malformed_expression_errors() {
        let rules = vec![RouteRule {
            name: "broken".into(),
            matcher: RuleMatcher::Expression {
                expression: "task.size > 10".into(),
            },
            target_role: "x".into(),
            priority: 10,
            transform: None,
        }];
        let mut router = TaskRouter::new(rules);
        let task = Task::new("t1", "misc", "anything");
        assert!(router.route(&task, &slots()).is_err());
    }

    #[test]
    fn route_cache_hits_and_clears() {
        let mut router = TaskRouter::new(rules());
        let task = Task::new("t1", "code", "improve test coverage");
        router.route(&task, &slots()).unwrap();
        assert_eq!(router.cache_len(), 1);
        router.route(&task, &slots()).unwrap();
        assert_eq!(router.cache_len(), 1);
        router.clear_cache();
        assert_eq!(router.cache_len(), 0);
    }

    #[test]
    fn transform_escalates_priority() {
        let mut router = TaskRouter::new(rules());
        let task = Task::new("t1", "code", "hotfix the login flow");
        let (role, routed) = router.route_and_transform(&task, &slots()).unwrap();
        assert_eq!(role, "coder");
        assert_eq!(routed.priority, TaskPriority::Critical);
        // Original is untouched.
        assert_eq!(task.priority, TaskPriority::Normal);
    }
}
