//! Anveshi: the per-turn orchestrator.
//!
//! One orchestrator owns one session. Each turn flows through a fixed
//! order: consciousness pre-pass, route classification, provider loop
//! with invariant-checked tool execution, turn recording for offline
//! procedure mining, consciousness post-pass. Multi-slot dispatch runs
//! through the strategy registry with the bandit choosing the strategy
//! and learning from the outcome.
//!
//! The whole turn is single-threaded and cooperative; that is what keeps
//! intention progress monotone and message ordering stable.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use miette::Diagnostic;
use thiserror::Error;

use crate::chetana::events::ChetanaEvent;
use crate::chetana::Chetana;
use crate::marga::{ClassifyContext, MargaRouter, RouteDecision, TaskType};
use crate::message::{ContentPart, Message, Role, ToolCallRecord, Usage};
use crate::niyanta::bandit::{ContextVector, StrategyBandit};
use crate::niyanta::strategy::{Assignment, StrategyKind, StrategyRegistry};
use crate::niyanta::{AgentSlot, SlotStats, Task};
use crate::retry::{compute_delay, is_retryable_error, RetryConfig};
use crate::rta::{RtaContext, RtaEngine, Verdict};
use crate::smriti::store::PersistenceManager;
use crate::tantra::bridge::{InternalTool, InternalToolResult};

/// Cap on provider/tool round-trips within one turn.
const MAX_TOOL_ROUNDS: usize = 8;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A provider call failure.
#[derive(Debug, Error, Diagnostic)]
#[error("provider {provider_id} failed: {message}")]
#[diagnostic(
    code(chitragupta::anveshi::provider),
    help("Transient provider failures are retried automatically; persistent ones surface here.")
)]
pub struct ProviderError {
    pub provider_id: String,
    pub status_code: Option<u16>,
    pub retry_after_ms: Option<u64>,
    pub message: String,
}

/// Errors from the orchestrator.
#[derive(Debug, Error, Diagnostic)]
pub enum AnveshiError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Provider(#[from] ProviderError),

    #[error("no provider registered with id \"{provider_id}\"")]
    #[diagnostic(
        code(chitragupta::anveshi::unknown_provider),
        help("Register the provider with the orchestrator before routing to it.")
    )]
    UnknownProvider { provider_id: String },

    #[error("turn cancelled")]
    #[diagnostic(
        code(chitragupta::anveshi::cancelled),
        help("The session's cancellation token was set; this is not a failure.")
    )]
    Cancelled,
}

pub type AnveshiResult<T> = std::result::Result<T, AnveshiError>;

// ---------------------------------------------------------------------------
// Providers
// ---------------------------------------------------------------------------

/// One provider exchange.
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub message: Message,
    pub usage: Usage,
}

/// An LLM provider.
pub trait Provider: Send + Sync {
    fn id(&self) -> &str;

    /// One blocking completion call.
    fn complete(
        &self,
        model: &str,
        messages: &[Message],
        temperature: Option<f32>,
    ) -> std::result::Result<ProviderResponse, ProviderError>;

    fn is_available(&self) -> bool {
        true
    }
}

/// Registry of providers by id.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: std::collections::BTreeMap<String, Box<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Box<dyn Provider>) {
        self.providers.insert(provider.id().to_string(), provider);
    }

    pub fn get(&self, id: &str) -> Option<&dyn Provider> {
        self.providers.get(id).map(|p| p.as_ref())
    }

    pub fn is_available(&self, id: &str) -> bool {
        self.providers
            .get(id)
            .map(|p| p.is_available())
            .unwrap_or(false)
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ids: Vec<&String> = self.providers.keys().collect();
        f.debug_struct("ProviderRegistry").field("providers", &ids).finish()
    }
}

/// Handles search/memory/file-op requests locally, without a provider.
/// Implementations are best-effort and must not propagate data-layer
/// errors; an explanatory string is the worst outcome.
pub trait LocalHandler: Send + Sync {
    fn handle(&self, task_type: TaskType, query: &str) -> String;
}

/// Default local handler: honest about having nothing configured.
struct NullLocalHandler;

impl LocalHandler for NullLocalHandler {
    fn handle(&self, task_type: TaskType, _query: &str) -> String {
        format!("no local {task_type:?} handler configured; nothing found")
    }
}

// ---------------------------------------------------------------------------
// Turn report
// ---------------------------------------------------------------------------

/// Everything that happened in one turn.
#[derive(Debug)]
pub struct TurnReport {
    pub turn_number: i64,
    pub decision: RouteDecision,
    pub response_text: String,
    pub tool_calls: Vec<ToolCallRecord>,
    /// Tool executions vetoed by the invariant layer.
    pub denials: u32,
    pub usage: Usage,
    pub events: Vec<ChetanaEvent>,
    pub cancelled: bool,
}

// ---------------------------------------------------------------------------
// The orchestrator
// ---------------------------------------------------------------------------

/// Per-session orchestrator.
pub struct Anveshi {
    session_id: String,
    project: String,
    turn_number: i64,
    chetana: Chetana,
    rta: RtaEngine,
    marga: MargaRouter,
    providers: ProviderRegistry,
    tools: HashMap<String, Box<dyn InternalTool>>,
    local_handler: Box<dyn LocalHandler>,
    strategies: StrategyRegistry,
    retry: RetryConfig,
    store: Option<Arc<PersistenceManager>>,
    cancel: Arc<AtomicBool>,
    working_directory: String,
    cost_budget: f64,
    allowed_domains: Vec<String>,
    total_cost: f64,
}

impl Anveshi {
    pub fn new(
        session_id: impl Into<String>,
        project: impl Into<String>,
        chetana: Chetana,
        marga: MargaRouter,
        providers: ProviderRegistry,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            project: project.into(),
            turn_number: 0,
            chetana,
            rta: RtaEngine::new(),
            marga,
            providers,
            tools: HashMap::new(),
            local_handler: Box::new(NullLocalHandler),
            strategies: StrategyRegistry::with_builtins(),
            retry: RetryConfig::default(),
            store: None,
            cancel: Arc::new(AtomicBool::new(false)),
            working_directory: String::new(),
            cost_budget: 10.0,
            allowed_domains: Vec::new(),
            total_cost: 0.0,
        }
    }

    /// Attach the persistence manager; turns then record durably.
    pub fn with_store(mut self, store: Arc<PersistenceManager>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_local_handler(mut self, handler: Box<dyn LocalHandler>) -> Self {
        self.local_handler = handler;
        self
    }

    pub fn with_environment(
        mut self,
        working_directory: impl Into<String>,
        cost_budget: f64,
        allowed_domains: Vec<String>,
    ) -> Self {
        self.working_directory = working_directory.into();
        self.cost_budget = cost_budget;
        self.allowed_domains = allowed_domains;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Register an executable tool.
    pub fn register_tool(&mut self, tool: Box<dyn InternalTool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// This session's cancellation token.
    pub fn cancel_token(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn chetana(&self) -> &Chetana {
        &self.chetana
    }

    pub fn rta(&self) -> &RtaEngine {
        &self.rta
    }

    /// Run one full turn for a user message.
    pub fn handle_turn(&mut self, user_message: &str) -> AnveshiResult<TurnReport> {
        self.turn_number += 1;
        let turn = self.turn_number;
        tracing::info!(session = %self.session_id, turn, "beginning turn");

        let context = self.chetana.before_turn(Some(user_message));
        let decision = self.marga.classify(&ClassifyContext {
            messages: vec![Message::text(Role::User, user_message)],
            tools: self.tools.keys().cloned().collect(),
        });

        let report = if decision.skip_llm {
            let output = self.local_handler.handle(decision.task_type, user_message);
            TurnReport {
                turn_number: turn,
                decision,
                response_text: output,
                tool_calls: Vec::new(),
                denials: 0,
                usage: Usage::default(),
                events: Vec::new(),
                cancelled: false,
            }
        } else {
            self.provider_loop(user_message, &decision, &context.steering_suggestions)?
        };

        self.record_turn(user_message, &report);
        self.chetana.after_turn();

        let mut report = report;
        report.events = self.chetana.drain_events();
        Ok(report)
    }

    /// The provider/tool round-trip loop.
    fn provider_loop(
        &mut self,
        user_message: &str,
        decision: &RouteDecision,
        steering: &[String],
    ) -> AnveshiResult<TurnReport> {
        let mut conversation: Vec<Message> = Vec::new();
        if !steering.is_empty() {
            conversation.push(Message::text(Role::System, steering.join("\n")));
        }
        conversation.push(Message::text(Role::User, user_message));

        let mut tool_calls: Vec<ToolCallRecord> = Vec::new();
        let mut denials = 0u32;
        let mut usage = Usage::default();
        let mut response_text = String::new();

        for _round in 0..MAX_TOOL_ROUNDS {
            if self.cancel.load(Ordering::Relaxed) {
                return Ok(self.cancelled_report(decision, tool_calls, denials, usage));
            }

            let response = self.call_with_retry(decision, &conversation)?;
            usage = usage.add(&response.usage);
            let assistant = response.message;
            let uses: Vec<(String, String, serde_json::Value)> = assistant
                .tool_uses()
                .into_iter()
                .map(|(id, name, input)| (id.to_string(), name.to_string(), input.clone()))
                .collect();

            if uses.is_empty() {
                response_text = assistant.text_content();
                break;
            }

            conversation.push(assistant);
            let mut results: Vec<ContentPart> = Vec::new();
            for (use_id, name, input) in uses {
                if self.cancel.load(Ordering::Relaxed) {
                    return Ok(self.cancelled_report(decision, tool_calls, denials, usage));
                }
                let started = std::time::Instant::now();
                let (result, denied) = self.execute_tool(&name, &input);
                let latency_ms = started.elapsed().as_millis() as u64;
                if denied {
                    denials += 1;
                }

                self.chetana.after_tool_execution(
                    &name,
                    !result.is_error,
                    latency_ms,
                    &result.content,
                    false,
                );
                tool_calls.push(ToolCallRecord {
                    name: name.clone(),
                    input,
                    result: result.content.clone(),
                    is_error: result.is_error,
                });
                results.push(ContentPart::ToolResult {
                    tool_use_id: use_id,
                    content: Some(result.content),
                    is_error: result.is_error.then_some(true),
                });
            }
            conversation.push(Message {
                role: Role::User,
                content: results,
            });
        }

        Ok(TurnReport {
            turn_number: self.turn_number,
            decision: decision.clone(),
            response_text,
            tool_calls,
            denials,
            usage,
            events: Vec::new(),
            cancelled: false,
        })
    }

    /// Invariant-checked tool execution. A deny becomes a synthetic error
    /// result carrying the reason and alternative verbatim.
    fn execute_tool(&mut self, name: &str, input: &serde_json::Value) -> (InternalToolResult, bool) {
        let ctx = RtaContext {
            tool_name: name.to_string(),
            args: input.clone(),
            working_directory: self.working_directory.clone(),
            session_id: Some(self.session_id.clone()),
            cost_budget: Some(self.cost_budget),
            total_cost_so_far: Some(self.total_cost),
            allowed_domains: self.allowed_domains.clone(),
            ..Default::default()
        };
        if let Verdict::Deny {
            rule_id,
            reason,
            alternative,
        } = self.rta.check(&ctx)
        {
            return (
                InternalToolResult::err(format!("[{rule_id}] {reason}. {alternative}")),
                true,
            );
        }

        let result = match self.tools.get(name) {
            Some(tool) => match tool.execute(input) {
                Ok(result) => result,
                Err(err) => InternalToolResult::err(err.to_string()),
            },
            None => InternalToolResult::err(format!("unknown tool: {name}")),
        };
        (result, false)
    }

    /// Provider call with exponential backoff on retryable failures.
    fn call_with_retry(
        &self,
        decision: &RouteDecision,
        conversation: &[Message],
    ) -> AnveshiResult<ProviderResponse> {
        let provider =
            self.providers
                .get(&decision.provider_id)
                .ok_or_else(|| AnveshiError::UnknownProvider {
                    provider_id: decision.provider_id.clone(),
                })?;

        let mut attempt = 0u32;
        loop {
            if self.cancel.load(Ordering::Relaxed) {
                return Err(AnveshiError::Cancelled);
            }
            match provider.complete(&decision.model_id, conversation, decision.temperature) {
                Ok(response) => return Ok(response),
                Err(err) => {
                    let retryable = is_retryable_error(err.status_code, &err.message);
                    if !retryable || attempt >= self.retry.max_retries {
                        return Err(err.into());
                    }
                    let delay = compute_delay(attempt, &self.retry, err.retry_after_ms);
                    tracing::warn!(
                        provider = %err.provider_id,
                        attempt,
                        delay_ms = delay,
                        "provider call failed; retrying"
                    );
                    std::thread::sleep(std::time::Duration::from_millis(delay));
                    attempt += 1;
                }
            }
        }
    }

    fn cancelled_report(
        &self,
        decision: &RouteDecision,
        tool_calls: Vec<ToolCallRecord>,
        denials: u32,
        usage: Usage,
    ) -> TurnReport {
        TurnReport {
            turn_number: self.turn_number,
            decision: decision.clone(),
            response_text: String::new(),
            tool_calls,
            denials,
            usage,
            events: Vec::new(),
            cancelled: true,
        }
    }

    /// Persist the turn pair (user + assistant with tool calls).
    fn record_turn(&self, user_message: &str, report: &TurnReport) {
        let Some(store) = &self.store else {
            return;
        };
        let base = (report.turn_number - 1) * 2;
        if let Err(err) = store.upsert_session(&self.session_id, &self.project, "") {
            tracing::warn!(%err, "session row not persisted");
            return;
        }
        if let Err(err) = store.append_turn(&self.session_id, base, "user", user_message, &[]) {
            tracing::warn!(%err, "user turn not persisted");
        }
        if let Err(err) = store.append_turn(
            &self.session_id,
            base + 1,
            "assistant",
            &report.response_text,
            &report.tool_calls,
        ) {
            tracing::warn!(%err, "assistant turn not persisted");
        }
    }

    // -- multi-slot dispatch ------------------------------------------------

    /// Pick a strategy via the bandit and assign slots for a task.
    pub fn dispatch_task<R: rand::Rng + ?Sized>(
        &mut self,
        task: &Task,
        slots: &[AgentSlot],
        stats: &HashMap<String, SlotStats>,
        bandit: &mut StrategyBandit,
        context: Option<&ContextVector>,
        rng: &mut R,
    ) -> (StrategyKind, Assignment) {
        let kind = bandit.select(context, rng);
        let assignment = self.strategies.assign(kind, task, slots, stats);
        (kind, assignment)
    }

    /// Report a task outcome to the bandit.
    ///
    /// Success earns 1.0, failure 0.0, both scaled by how fast the task
    /// ran; a cancelled task gets the neutral 0.5.
    pub fn complete_task(
        &mut self,
        bandit: &mut StrategyBandit,
        kind: StrategyKind,
        success: bool,
        normalized_latency: f64,
        cancelled: bool,
        context: Option<&ContextVector>,
    ) {
        let reward = if cancelled {
            0.5
        } else {
            let base = if success { 1.0 } else { 0.0 };
            base * (1.0 - normalized_latency.clamp(0.0, 1.0))
        };
        bandit.update(kind, reward, context);
    }
}

impl std::fmt::Debug for Anveshi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Anveshi")
            .field("session_id", &self.session_id)
            .field("turn", &self.turn_number)
            .field("tools", &self.tools.len())
            .finish()
    }
}
