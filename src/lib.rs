//! # chitragupta
//!
//! The cognitive orchestration core of a terminal-native coding
//! assistant: per-turn consciousness signals, request routing across an
//! LLM provider bank, persistent bi-temporal memory with stigmergic
//! traces and procedure mining, pre-tool safety invariants, and MCP tool
//! federation.
//!
//! ## Architecture
//!
//! - **Consciousness** (`chetana`): affect, attention, self-model, and
//!   intention subsystems driven through a strict turn lifecycle
//! - **Routing** (`marga`, `niyanta`): two-classifier request routing to
//!   a provider/model binding, rule-based task routing to agent slots via
//!   six strategies with a contextual bandit on top
//! - **Memory** (`smriti`): bi-temporal graph, embedded vector search
//!   with a deterministic fallback embedder, stigmergic trace field,
//!   hierarchical consolidation search, Sinkhorn-Knopp stream compaction
//! - **Safety** (`rta`): five deny-before-decide invariants checked
//!   before every tool execution
//! - **Federation** (`tantra`): JSON-RPC 2.0 clients over stdio/SSE,
//!   aggregated behind one namespaced tool view
//! - **Orchestration** (`anveshi`, `engine`): the per-turn loop and the
//!   engine facade owning the durable subsystems
//!
//! ## Library usage
//!
//! ```no_run
//! use chitragupta::config::ChitraguptaConfig;
//! use chitragupta::engine::Chitragupta;
//! use chitragupta::smriti::recall::RecallOptions;
//!
//! let engine = Chitragupta::new(ChitraguptaConfig::default()).unwrap();
//! let hits = engine.recall("retry backoff", &RecallOptions::default());
//! for hit in hits {
//!     println!("{}: {:.2}", hit.title, hit.relevance);
//! }
//! ```

pub mod anveshi;
pub mod chetana;
pub mod config;
pub mod engine;
pub mod error;
pub mod hash;
pub mod marga;
pub mod message;
pub mod niyanta;
pub mod paths;
pub mod retry;
pub mod rta;
pub mod smriti;
pub mod tantra;
pub mod text;
pub mod vidhi;

/// Install a `RUST_LOG`-driven tracing subscriber for embedders that do
/// not bring their own. Safe to call more than once; later calls are
/// no-ops.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init();
}
