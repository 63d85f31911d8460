//! Vidhi: procedures mined from recurring tool-call n-grams.
//!
//! Offline mining walks a project's session turn logs, enumerates
//! contiguous error-free tool-call windows, aggregates them by tool-name
//! key, and anti-unifies the argument objects: keys with identical values
//! everywhere stay literal, diverging keys become `${tool_idx_key}`
//! parameters with inferred types. Verb-object phrases from the preceding
//! user messages become triggers. At query time a procedure is chosen by
//! trigger overlap blended with a Thompson sample of its track record.

pub mod sampler;

use std::collections::{BTreeMap, BTreeSet, HashMap};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::hash::fnv1a;
use crate::smriti::store::TurnRow;
use crate::text::{jaccard, tokenize};

/// Action verbs that may start a trigger phrase.
const ACTION_VERBS: [&str; 20] = [
    "add", "create", "make", "build", "write", "fix", "run", "debug", "update", "remove",
    "delete", "refactor", "implement", "test", "install", "setup", "configure", "deploy",
    "check", "find",
];

/// Triggers retained per procedure.
const TRIGGER_CAP: usize = 10;

/// Example values retained per parameter.
const EXAMPLE_CAP: usize = 5;

/// Minimum trigger overlap for a match to be considered.
const MATCH_MIN_JACCARD: f64 = 0.15;

/// Weight of trigger overlap in the match score.
const MATCH_JACCARD_WEIGHT: f64 = 0.7;

/// Weight of the Thompson sample in the match score.
const MATCH_THOMPSON_WEIGHT: f64 = 0.3;

/// Mining thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MiningConfig {
    /// Smallest window length.
    pub min_n: usize,
    /// Largest window length.
    pub max_n: usize,
    /// Distinct sessions required to keep an aggregate.
    pub min_sessions: usize,
    /// Fraction of windows that must be error-free.
    pub min_success_rate: f64,
}

impl Default for MiningConfig {
    fn default() -> Self {
        Self {
            min_n: 2,
            max_n: 5,
            min_sessions: 3,
            min_success_rate: 0.75,
        }
    }
}

/// One step of a procedure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VidhiStep {
    /// Contiguous from 0.
    pub index: usize,
    pub tool_name: String,
    /// Argument object whose values are literals or `${param}` strings.
    pub arg_template: serde_json::Value,
    pub description: String,
    /// Mutating steps are critical; read-only ones are not.
    pub critical: bool,
}

/// An inferred parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    /// "string" | "number" | "boolean" | "array" | "object".
    pub param_type: String,
    /// Present in every observed instance.
    pub required: bool,
    /// Up to five distinct observed values.
    pub examples: Vec<serde_json::Value>,
}

/// A mined procedure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vidhi {
    /// FNV-1a of `name|project`.
    pub id: String,
    pub project: String,
    /// Tool-name key, e.g. "read|edit|bash".
    pub name: String,
    pub learned_from: BTreeSet<String>,
    pub confidence: f64,
    pub steps: Vec<VidhiStep>,
    /// Top verb-object phrases, most frequent first.
    pub triggers: Vec<String>,
    pub success_rate: f64,
    pub success_count: u32,
    pub failure_count: u32,
    pub parameter_schema: BTreeMap<String, ParamSpec>,
    /// Epoch ms.
    pub created_at: i64,
    pub updated_at: i64,
}

impl Vidhi {
    /// Record an execution outcome.
    pub fn record_outcome(&mut self, success: bool) {
        if success {
            self.success_count += 1;
        } else {
            self.failure_count += 1;
        }
        let total = self.success_count + self.failure_count;
        if total > 0 {
            self.success_rate = f64::from(self.success_count) / f64::from(total);
        }
        self.updated_at = chrono::Utc::now().timestamp_millis();
    }
}

// ---------------------------------------------------------------------------
// Deep equality over JSON values
// ---------------------------------------------------------------------------

/// Structural equality over the JSON value type.
///
/// Numbers compare by value (1 == 1.0); objects compare key-by-key;
/// arrays element-by-element. Nothing relies on `Value`'s own `Eq`.
pub fn json_deep_eq(a: &serde_json::Value, b: &serde_json::Value) -> bool {
    use serde_json::Value;
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Number(x), Value::Number(y)) => {
            match (x.as_f64(), y.as_f64()) {
                (Some(fx), Some(fy)) => fx == fy,
                _ => x == y,
            }
        }
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| json_deep_eq(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).is_some_and(|y| json_deep_eq(x, y)))
        }
        _ => false,
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    use serde_json::Value;
    match value {
        Value::Null | Value::String(_) => "string",
        Value::Number(_) => "number",
        Value::Bool(_) => "boolean",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ---------------------------------------------------------------------------
// Mining
// ---------------------------------------------------------------------------

/// One observed window instance during aggregation.
struct WindowInstance {
    session_id: String,
    calls: Vec<crate::message::ToolCallRecord>,
    trigger_message: Option<String>,
}

struct Aggregate {
    instances: Vec<WindowInstance>,
    total_windows: usize,
    clean_windows: usize,
}

/// Mine procedures for a project from its turn rows.
///
/// Deterministic: unchanged turn data produces identical ids, steps, and
/// templates on every run.
pub fn mine(project: &str, turns: &[TurnRow], config: &MiningConfig) -> Vec<Vidhi> {
    // Rebuild per-session call sequences, remembering the most recent user
    // message before each call.
    let mut sessions: BTreeMap<String, Vec<(crate::message::ToolCallRecord, Option<String>)>> =
        BTreeMap::new();
    let mut last_user: HashMap<String, String> = HashMap::new();
    for row in turns {
        if row.role == "user" {
            last_user.insert(row.session_id.clone(), row.content.clone());
        }
        let context = last_user.get(&row.session_id).cloned();
        let sequence = sessions.entry(row.session_id.clone()).or_default();
        for call in &row.tool_calls {
            sequence.push((call.clone(), context.clone()));
        }
    }

    // Enumerate windows, aggregate by tool-name key.
    let mut aggregates: BTreeMap<String, Aggregate> = BTreeMap::new();
    for (session_id, sequence) in &sessions {
        let mut seen_keys: BTreeSet<String> = BTreeSet::new();
        for n in config.min_n..=config.max_n {
            if sequence.len() < n {
                break;
            }
            for window in sequence.windows(n) {
                let key = window
                    .iter()
                    .map(|(call, _)| call.name.as_str())
                    .collect::<Vec<_>>()
                    .join("|");
                let clean = window.iter().all(|(call, _)| !call.is_error);

                let aggregate = aggregates.entry(key.clone()).or_insert(Aggregate {
                    instances: Vec::new(),
                    total_windows: 0,
                    clean_windows: 0,
                });
                aggregate.total_windows += 1;
                if !clean {
                    continue;
                }
                aggregate.clean_windows += 1;

                // First clean window per session per key.
                if !seen_keys.insert(key) {
                    continue;
                }
                aggregate.instances.push(WindowInstance {
                    session_id: session_id.clone(),
                    calls: window.iter().map(|(call, _)| call.clone()).collect(),
                    trigger_message: window.first().and_then(|(_, msg)| msg.clone()),
                });
            }
        }
    }

    let now = chrono::Utc::now().timestamp_millis();
    let mut vidhis = Vec::new();
    for (key, aggregate) in aggregates {
        let session_count = aggregate
            .instances
            .iter()
            .map(|i| i.session_id.as_str())
            .collect::<BTreeSet<_>>()
            .len();
        if session_count < config.min_sessions {
            continue;
        }
        let success_rate = if aggregate.total_windows == 0 {
            0.0
        } else {
            aggregate.clean_windows as f64 / aggregate.total_windows as f64
        };
        if success_rate < config.min_success_rate {
            continue;
        }

        let (steps, parameter_schema) = anti_unify(&aggregate.instances);
        let triggers = extract_triggers(
            aggregate
                .instances
                .iter()
                .filter_map(|i| i.trigger_message.as_deref()),
        );

        vidhis.push(Vidhi {
            id: fnv1a(&format!("{key}|{project}")),
            project: project.to_string(),
            name: key,
            learned_from: aggregate
                .instances
                .iter()
                .map(|i| i.session_id.clone())
                .collect(),
            confidence: (0.5 + 0.1 * session_count as f64).min(1.0),
            steps,
            triggers,
            success_rate,
            success_count: 0,
            failure_count: 0,
            parameter_schema,
            created_at: now,
            updated_at: now,
        });
    }
    tracing::debug!(project, mined = vidhis.len(), "procedure mining complete");
    vidhis
}

/// Anti-unify argument objects across instances, step by step.
fn anti_unify(instances: &[WindowInstance]) -> (Vec<VidhiStep>, BTreeMap<String, ParamSpec>) {
    let mut steps = Vec::new();
    let mut schema = BTreeMap::new();
    let Some(first) = instances.first() else {
        return (steps, schema);
    };

    for (idx, reference) in first.calls.iter().enumerate() {
        let tool = reference.name.clone();
        let mut template = serde_json::Map::new();

        // Union of keys across all instances for this step, ordered.
        let mut keys: BTreeSet<String> = BTreeSet::new();
        for instance in instances {
            if let Some(obj) = instance.calls[idx].input.as_object() {
                keys.extend(obj.keys().cloned());
            }
        }

        for key in keys {
            let values: Vec<Option<&serde_json::Value>> = instances
                .iter()
                .map(|i| i.calls[idx].input.get(&key))
                .collect();
            let present_everywhere = values.iter().all(Option::is_some);
            let present: Vec<&serde_json::Value> =
                values.iter().flatten().copied().collect();

            let all_equal = present_everywhere
                && present
                    .windows(2)
                    .all(|pair| json_deep_eq(pair[0], pair[1]));

            if all_equal {
                template.insert(key, present[0].clone());
                continue;
            }

            // Diverging key: parameterize.
            let param_name = format!("{tool}_{idx}_{key}");
            template.insert(
                key,
                serde_json::Value::String(format!("${{{param_name}}}")),
            );

            // Mixed observed types collapse to string.
            let types: BTreeSet<&'static str> =
                present.iter().map(|v| json_type_name(v)).collect();
            let param_type = if types.len() == 1 {
                types.iter().next().copied().unwrap_or("string")
            } else {
                "string"
            };

            let mut examples: Vec<serde_json::Value> = Vec::new();
            for value in &present {
                if examples.len() >= EXAMPLE_CAP {
                    break;
                }
                if !examples.iter().any(|e| json_deep_eq(e, value)) {
                    examples.push((*value).clone());
                }
            }

            schema.insert(
                param_name,
                ParamSpec {
                    param_type: param_type.to_string(),
                    required: present_everywhere,
                    examples,
                },
            );
        }

        let critical = !["read", "list", "search", "get", "grep"]
            .iter()
            .any(|prefix| tool.starts_with(prefix));
        steps.push(VidhiStep {
            index: idx,
            tool_name: tool.clone(),
            arg_template: serde_json::Value::Object(template),
            description: format!("run {tool}"),
            critical,
        });
    }
    (steps, schema)
}

/// Pull verb-object bigrams and trigrams from user messages, ranked by
/// frequency.
fn extract_triggers<'a>(messages: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for message in messages {
        let tokens = tokenize(message, 2, true);
        for window in tokens.windows(2).chain(tokens.windows(3)) {
            if !ACTION_VERBS.contains(&window[0].as_str()) {
                continue;
            }
            *counts.entry(window.join(" ")).or_default() += 1;
        }
    }
    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked
        .into_iter()
        .take(TRIGGER_CAP)
        .map(|(phrase, _)| phrase)
        .collect()
}

// ---------------------------------------------------------------------------
// Matching
// ---------------------------------------------------------------------------

/// Pick the procedure best matching a query, or none.
///
/// Trigger Jaccard gates candidacy; the final score blends it with a
/// Thompson sample of the procedure's Beta posterior.
pub fn match_vidhi<'a, R: Rng + ?Sized>(
    vidhis: &'a [Vidhi],
    query: &str,
    rng: &mut R,
) -> Option<&'a Vidhi> {
    let query_tokens: std::collections::HashSet<String> =
        tokenize(query, 2, true).into_iter().collect();
    if query_tokens.is_empty() {
        return None;
    }

    let mut best: Option<(&Vidhi, f64)> = None;
    for vidhi in vidhis {
        let trigger_tokens: std::collections::HashSet<String> = vidhi
            .triggers
            .iter()
            .flat_map(|t| tokenize(t, 2, true))
            .collect();
        let overlap = jaccard(&query_tokens, &trigger_tokens);
        if overlap < MATCH_MIN_JACCARD {
            continue;
        }
        let thompson = sampler::sample_beta(
            rng,
            f64::from(vidhi.success_count) + 1.0,
            f64::from(vidhi.failure_count) + 1.0,
        );
        let score = MATCH_JACCARD_WEIGHT * overlap + MATCH_THOMPSON_WEIGHT * thompson;
        if best.map(|(_, s)| score > s).unwrap_or(true) {
            best = Some((vidhi, score));
        }
    }
    best.map(|(vidhi, _)| vidhi)
}
