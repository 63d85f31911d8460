//! Engine facade: one owner for the whole cognitive stack.
//!
//! `Chitragupta` wires the memory layer (store, vector index, trace
//! field, streams), the procedure engine, and the strategy bandit behind
//! a single handle, in memory-only or persistent mode. Per-session
//! orchestrators ([`crate::anveshi::Anveshi`]) borrow what they need from
//! here.

use std::sync::Arc;

use rand::Rng;

use crate::config::ChitraguptaConfig;
use crate::error::ChitraguptaResult;
use crate::niyanta::bandit::{BanditMode, StrategyBandit};
use crate::paths::SmritiPaths;
use crate::smriti::akasha::{Akasha, TraceMatch, TraceQuery, TraceType};
use crate::smriti::consolidation::{Consolidation, ConsolidationLevel, TemporalHit};
use crate::smriti::embedding::{CachedEmbedder, HashEmbedder};
use crate::smriti::recall::{RecallOptions, RecallResult, SessionDocument, VectorIndex};
use crate::smriti::store::PersistenceManager;
use crate::smriti::streams::{Signal, StreamSet, StreamStore};
use crate::vidhi::{match_vidhi, mine, Vidhi};

/// Key under which bandit state persists in the agent database.
const BANDIT_STATE_KEY: &str = "bandit_state";

/// The engine.
pub struct Chitragupta {
    config: ChitraguptaConfig,
    store: Arc<PersistenceManager>,
    embedder: CachedEmbedder<HashEmbedder>,
    akasha: Akasha,
    streams: StreamSet,
    stream_store: Option<StreamStore>,
    bandit: StrategyBandit,
    vidhis: Vec<Vidhi>,
}

impl Chitragupta {
    /// Memory-only engine; nothing survives the process.
    pub fn new(config: ChitraguptaConfig) -> ChitraguptaResult<Self> {
        let store = Arc::new(PersistenceManager::in_memory()?);
        Ok(Self::assemble(config, store, None))
    }

    /// Persistent engine rooted at the smriti directory. Runs the legacy
    /// embedding migration and restores bandit state when present.
    pub fn open(config: ChitraguptaConfig, paths: &SmritiPaths) -> ChitraguptaResult<Self> {
        paths.ensure_dirs()?;
        let store = Arc::new(PersistenceManager::open(
            &paths.agent_db(),
            &paths.vectors_db(),
        )?);

        let legacy = paths.legacy_embeddings();
        if legacy.exists() {
            if let Err(err) = store.migrate_legacy_embeddings(&legacy) {
                tracing::warn!(%err, "legacy embedding migration failed");
            }
        }

        let mut engine = Self::assemble(config, store, Some(StreamStore::new(&paths.root)));
        if let Ok(Some(raw)) = engine.store.get_kv(BANDIT_STATE_KEY) {
            match StrategyBandit::from_json(&raw) {
                Ok(bandit) => engine.bandit = bandit,
                Err(err) => tracing::warn!(%err, "stored bandit state unreadable; starting fresh"),
            }
        }
        Ok(engine)
    }

    fn assemble(
        config: ChitraguptaConfig,
        store: Arc<PersistenceManager>,
        stream_store: Option<StreamStore>,
    ) -> Self {
        let mode = match config.bandit.mode.as_str() {
            "ucb1" => BanditMode::Ucb1,
            "linucb" => BanditMode::Linucb,
            _ => BanditMode::Thompson,
        };
        let mut bandit = StrategyBandit::new(mode);
        bandit.exploration_c = config.bandit.exploration_c;
        bandit.linucb_alpha = config.bandit.linucb_alpha;

        Self {
            akasha: Akasha::new(config.akasha.clone()),
            streams: StreamSet::new(&config.streams.device_id),
            store,
            embedder: CachedEmbedder::new(HashEmbedder),
            stream_store,
            bandit,
            vidhis: Vec::new(),
            config,
        }
    }

    pub fn store(&self) -> &Arc<PersistenceManager> {
        &self.store
    }

    pub fn config(&self) -> &ChitraguptaConfig {
        &self.config
    }

    pub fn bandit_mut(&mut self) -> &mut StrategyBandit {
        &mut self.bandit
    }

    // -- vectors --------------------------------------------------------

    /// Index a finished session for later recall.
    pub fn index_session(&self, session: &SessionDocument) -> usize {
        VectorIndex::new(&self.store, &self.embedder).index_session(session)
    }

    /// Semantic recall over everything indexed.
    pub fn recall(&self, query: &str, options: &RecallOptions) -> Vec<RecallResult> {
        VectorIndex::new(&self.store, &self.embedder).recall(query, options)
    }

    /// Index a consolidation summary produced by an external rollup.
    pub fn index_summary(
        &self,
        level: ConsolidationLevel,
        period: &str,
        markdown: &str,
        project: Option<&str>,
    ) {
        let index = VectorIndex::new(&self.store, &self.embedder);
        Consolidation::new(&index, &self.store).index_summary(level, period, markdown, project);
    }

    /// Coarse-to-fine search across consolidation levels.
    pub fn temporal_search(
        &self,
        query: &str,
        project: Option<&str>,
        limit: usize,
    ) -> Vec<TemporalHit> {
        let index = VectorIndex::new(&self.store, &self.embedder);
        Consolidation::new(&index, &self.store).hierarchical_search(query, project, limit)
    }

    // -- traces ---------------------------------------------------------

    /// Deposit a stigmergic trace.
    pub fn leave_trace(
        &mut self,
        agent_id: &str,
        trace_type: TraceType,
        topic: &str,
        content: &str,
    ) -> String {
        self.akasha.leave(agent_id, trace_type, topic, content, None)
    }

    /// Reinforce a trace on behalf of an agent.
    pub fn reinforce_trace(&mut self, trace_id: &str, agent_id: &str) -> bool {
        self.akasha.reinforce(trace_id, agent_id)
    }

    /// Query the trace field.
    pub fn query_traces(&self, topic: &str, options: &TraceQuery) -> Vec<TraceMatch> {
        self.akasha.query(topic, options)
    }

    /// Decay the trace field (typically once per consolidation pass).
    pub fn decay_traces(&mut self) {
        self.akasha.decay();
    }

    pub fn akasha(&self) -> &Akasha {
        &self.akasha
    }

    // -- streams --------------------------------------------------------

    /// Compact a session's extracted signals into the four streams,
    /// writing the audit sidecar when persistent.
    pub fn compact_session(&mut self, session_id: &str, signals: &[Signal]) -> [usize; 4] {
        let (_, budgets, sidecar) = self.streams.compact(
            session_id,
            signals,
            self.config.streams.total_token_budget,
        );
        if let Some(stream_store) = &self.stream_store {
            if let Err(err) = stream_store.write_sidecar(&sidecar) {
                tracing::warn!(%err, "compaction sidecar not written");
            }
            let device = self.config.streams.device_id.clone();
            if let Err(err) = stream_store.replace_flow(&device, &self.streams.flow.content()) {
                tracing::warn!(%err, "flow stream not written");
            }
        }
        budgets
    }

    pub fn streams(&self) -> &StreamSet {
        &self.streams
    }

    // -- procedures -----------------------------------------------------

    /// Re-mine procedures for a project from its recorded turns.
    pub fn mine_vidhis(&mut self, project: &str) -> ChitraguptaResult<usize> {
        let turns = self.store.turns_for_project(project)?;
        self.vidhis = mine(project, &turns, &self.config.vidhi);
        Ok(self.vidhis.len())
    }

    /// Pick the procedure best matching a query.
    pub fn match_vidhi<R: Rng + ?Sized>(&self, query: &str, rng: &mut R) -> Option<&Vidhi> {
        match_vidhi(&self.vidhis, query, rng)
    }

    pub fn vidhis(&self) -> &[Vidhi] {
        &self.vidhis
    }

    // -- state ----------------------------------------------------------

    /// Persist bandit state into the agent database.
    pub fn save_state(&self) -> ChitraguptaResult<()> {
        if let Ok(encoded) = self.bandit.to_json() {
            self.store.put_kv(BANDIT_STATE_KEY, &encoded)?;
        }
        Ok(())
    }

    /// Summary counts for diagnostics.
    pub fn info(&self) -> EngineInfo {
        EngineInfo {
            traces: self.akasha.len(),
            vidhis: self.vidhis.len(),
            bandit_plays: self.bandit.total_plays(),
            stream_tokens: crate::smriti::sinkhorn::StreamKind::ALL
                .iter()
                .map(|k| self.streams.stream(*k).token_count())
                .sum(),
            persistent: self.stream_store.is_some(),
        }
    }
}

impl std::fmt::Debug for Chitragupta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chitragupta")
            .field("info", &self.info())
            .finish()
    }
}

/// Summary information about the engine state.
#[derive(Debug, Clone)]
pub struct EngineInfo {
    pub traces: usize,
    pub vidhis: usize,
    pub bandit_plays: u64,
    pub stream_tokens: usize,
    pub persistent: bool,
}

impl std::fmt::Display for EngineInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "chitragupta engine info")?;
        writeln!(f, "  traces:        {}", self.traces)?;
        writeln!(f, "  procedures:    {}", self.vidhis)?;
        writeln!(f, "  bandit plays:  {}", self.bandit_plays)?;
        writeln!(f, "  stream tokens: {}", self.stream_tokens)?;
        writeln!(f, "  persistent:    {}", self.persistent)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smriti::sinkhorn::StreamKind;

    fn engine() -> Chitragupta {
        Chitragupta::new(ChitraguptaConfig::default()).unwrap()
    }

    #[test]
    fn memory_only_engine_reports_not_persistent() {
        let engine = engine();
        assert!(!engine.info().persistent);
    }

    #[test]
    fn index_and_recall_through_facade() {
        let engine = engine();
        engine.index_session(&SessionDocument {
            id: "s1".into(),
            project: "demo".into(),
            title: "retry work".into(),
            turns: vec![("user".into(), "tune the retry backoff jitter".into())],
            date: None,
        });
        // Chunks store "role: content", so query the exact chunk text.
        let results = engine.recall(
            "user: tune the retry backoff jitter",
            &RecallOptions {
                threshold: 0.0,
                ..Default::default()
            },
        );
        assert!(!results.is_empty());
        assert_eq!(results[0].session_id, "s1");
    }

    #[test]
    fn traces_flow_through_facade() {
        let mut engine = engine();
        let id = engine.leave_trace("a1", TraceType::Solution, "flaky tests", "rerun twice");
        assert!(engine.reinforce_trace(&id, "a2"));
        let matches = engine.query_traces("flaky tests", &TraceQuery::default());
        assert_eq!(matches.len(), 1);
        assert_eq!(engine.info().traces, 1);
    }

    #[test]
    fn compaction_respects_configured_budget() {
        let mut engine = engine();
        let signals: Vec<Signal> = (0..100)
            .map(|i| Signal {
                stream: StreamKind::Tasks,
                text: format!("completed subtask {i} of the migration effort"),
            })
            .collect();
        let budgets = engine.compact_session("sess-1", &signals);
        assert_eq!(
            budgets.iter().sum::<usize>(),
            engine.config().streams.total_token_budget
        );
        assert!(
            engine.streams().tasks.token_count() <= budgets[StreamKind::Tasks.index()]
        );
    }

    #[test]
    fn persistent_engine_roundtrips_bandit_state() {
        let dir = tempfile::TempDir::new().unwrap();
        let paths = SmritiPaths::at(dir.path().join("smriti"));

        {
            let mut engine =
                Chitragupta::open(ChitraguptaConfig::default(), &paths).unwrap();
            let mut rng = rand::thread_rng();
            for _ in 0..10 {
                let kind = engine.bandit_mut().select(None, &mut rng);
                engine.bandit_mut().update(kind, 0.8, None);
            }
            engine.save_state().unwrap();
        }

        let engine = Chitragupta::open(ChitraguptaConfig::default(), &paths).unwrap();
        assert_eq!(engine.info().bandit_plays, 10);
    }

    #[test]
    fn mining_pipeline_runs_end_to_end() {
        let mut engine = engine();
        for i in 0..3 {
            let session = format!("s{i}");
            engine.store().upsert_session(&session, "demo", "").unwrap();
            engine
                .store()
                .append_turn(&session, 0, "user", "fix the formatter config", &[])
                .unwrap();
            engine
                .store()
                .append_turn(
                    &session,
                    1,
                    "assistant",
                    "",
                    &[
                        crate::message::ToolCallRecord {
                            name: "read".into(),
                            input: serde_json::json!({"path": format!("file{i}.toml")}),
                            result: "ok".into(),
                            is_error: false,
                        },
                        crate::message::ToolCallRecord {
                            name: "edit".into(),
                            input: serde_json::json!({"path": format!("file{i}.toml")}),
                            result: "ok".into(),
                            is_error: false,
                        },
                    ],
                )
                .unwrap();
        }
        let mined = engine.mine_vidhis("demo").unwrap();
        assert!(mined >= 1);
        let mut rng = rand::thread_rng();
        assert!(engine.match_vidhi("fix the formatter", &mut rng).is_some());
    }
}
