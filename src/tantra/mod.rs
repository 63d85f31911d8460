//! Tantra: federation of external MCP tool servers.
//!
//! Each server speaks JSON-RPC 2.0 over stdio or SSE ([`jsonrpc`],
//! [`transport`], [`client`]). The [`CapabilityAggregator`] merges every
//! server's tools behind one namespaced view (`server.tool`), routes calls
//! back to the owning server, and answers fuzzy discovery queries. The
//! [`bridge`] converts between the internal tool shape and MCP's.

pub mod bridge;
pub mod client;
pub mod jsonrpc;
pub mod transport;

use std::collections::BTreeMap;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from the federation layer.
#[derive(Debug, Error, Diagnostic)]
pub enum TantraError {
    #[error("failed to spawn MCP server process \"{command}\"")]
    #[diagnostic(
        code(chitragupta::tantra::spawn),
        help("Check that the command exists and is executable.")
    )]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("transport error: {message}")]
    #[diagnostic(
        code(chitragupta::tantra::transport),
        help("The connection to the MCP server broke. The caller decides whether to retry.")
    )]
    Transport { message: String },

    #[error("protocol error: {message}")]
    #[diagnostic(
        code(chitragupta::tantra::protocol),
        help(
            "The server sent a malformed JSON-RPC envelope. This is a server bug; \
             the call fails without retry."
        )
    )]
    Protocol { message: String },

    #[error("request timed out after {timeout_ms}ms: {method}")]
    #[diagnostic(
        code(chitragupta::tantra::timeout),
        help("Raise the per-request timeout or check the server's health.")
    )]
    Timeout { timeout_ms: u64, method: String },

    #[error("server returned error {code}: {message}")]
    #[diagnostic(
        code(chitragupta::tantra::rpc),
        help("The server rejected the request; see its message for details.")
    )]
    Rpc { code: i64, message: String },

    #[error("request cancelled")]
    #[diagnostic(
        code(chitragupta::tantra::cancelled),
        help("The owning task was cancelled; this is not a failure.")
    )]
    Cancelled,

    #[error("client is not connected (state: {state})")]
    #[diagnostic(
        code(chitragupta::tantra::not_connected),
        help("Call connect() and wait for the initialize handshake first.")
    )]
    NotConnected { state: String },
}

pub type TantraResult<T> = std::result::Result<T, TantraError>;

impl TantraError {
    /// Whether the caller may retry. Cancellation and protocol breakage
    /// are final.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Timeout { .. })
    }
}

// ---------------------------------------------------------------------------
// Tool shapes
// ---------------------------------------------------------------------------

/// A tool as reported by an MCP server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpTool {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "inputSchema")]
    pub input_schema: serde_json::Value,
}

/// A tool as exposed through the aggregator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamespacedTool {
    pub server_id: String,
    /// `{sanitized_server}.{original}`.
    pub namespaced_name: String,
    pub original_name: String,
    /// Prefixed with `[{sanitized_server}] `.
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// A call routed back to its owning server.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutedCall {
    pub server_id: String,
    /// The server's own (un-namespaced) tool name.
    pub tool_name: String,
    pub args: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Aggregator
// ---------------------------------------------------------------------------

struct ServerEntry {
    sanitized: String,
    tools: Vec<McpTool>,
}

/// Merges tools from many servers behind one namespaced view.
pub struct CapabilityAggregator {
    servers: BTreeMap<String, ServerEntry>,
}

impl Default for CapabilityAggregator {
    fn default() -> Self {
        Self::new()
    }
}

/// Replace anything outside `[a-zA-Z0-9_-]` with `_`.
pub fn sanitize_server_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

impl CapabilityAggregator {
    pub fn new() -> Self {
        Self {
            servers: BTreeMap::new(),
        }
    }

    /// Register (or re-register) a server and its tool list.
    pub fn register_server(&mut self, id: impl Into<String>, name: &str, tools: Vec<McpTool>) {
        let id = id.into();
        tracing::info!(server = %id, tools = tools.len(), "registered MCP server");
        self.servers.insert(
            id,
            ServerEntry {
                sanitized: sanitize_server_name(name),
                tools,
            },
        );
    }

    /// Drop a server.
    pub fn remove_server(&mut self, id: &str) -> bool {
        self.servers.remove(id).is_some()
    }

    /// Replace a server's cached tool list (list-changed notifications).
    pub fn update_server_tools(&mut self, id: &str, tools: Vec<McpTool>) -> bool {
        match self.servers.get_mut(id) {
            Some(entry) => {
                entry.tools = tools;
                true
            }
            None => false,
        }
    }

    /// Every tool, namespaced.
    pub fn get_all_tools(&self) -> Vec<NamespacedTool> {
        let mut all = Vec::new();
        for (id, entry) in &self.servers {
            for tool in &entry.tools {
                all.push(NamespacedTool {
                    server_id: id.clone(),
                    namespaced_name: format!("{}.{}", entry.sanitized, tool.name),
                    original_name: tool.name.clone(),
                    description: format!("[{}] {}", entry.sanitized, tool.description),
                    input_schema: tool.input_schema.clone(),
                });
            }
        }
        all
    }

    /// Resolve an external tool name to its owning server.
    ///
    /// Dotted names split at the first dot and match the sanitized server
    /// name; bare names search all servers for an exact match.
    pub fn route_tool_call(&self, name: &str, args: serde_json::Value) -> Option<RoutedCall> {
        if let Some((server_part, tool_part)) = name.split_once('.') {
            for (id, entry) in &self.servers {
                if entry.sanitized != server_part {
                    continue;
                }
                if entry.tools.iter().any(|t| t.name == tool_part) {
                    return Some(RoutedCall {
                        server_id: id.clone(),
                        tool_name: tool_part.to_string(),
                        args,
                    });
                }
            }
            return None;
        }

        for (id, entry) in &self.servers {
            if entry.tools.iter().any(|t| t.name == name) {
                return Some(RoutedCall {
                    server_id: id.clone(),
                    tool_name: name.to_string(),
                    args,
                });
            }
        }
        None
    }

    /// Fuzzy tool discovery.
    ///
    /// Scoring tiers: exact name 1.0, prefix 0.9, substring 0.7,
    /// description substring 0.4, character-set overlap ≥ 0.5 scores
    /// `0.1 + overlap × 0.2`. Ties order by namespaced name.
    pub fn find_tools(&self, query: &str, limit: usize) -> Vec<(NamespacedTool, f64)> {
        let query_lower = query.to_lowercase();
        let mut scored: Vec<(NamespacedTool, f64)> = self
            .get_all_tools()
            .into_iter()
            .filter_map(|tool| {
                let score = score_tool(&tool, &query_lower);
                if score > 0.0 {
                    Some((tool, score))
                } else {
                    None
                }
            })
            .collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.namespaced_name.cmp(&b.0.namespaced_name))
        });
        scored.truncate(limit.max(1));
        scored
    }

    pub fn server_count(&self) -> usize {
        self.servers.len()
    }

    pub fn tool_count(&self) -> usize {
        self.servers.values().map(|e| e.tools.len()).sum()
    }
}

impl std::fmt::Debug for CapabilityAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityAggregator")
            .field("servers", &self.server_count())
            .field("tools", &self.tool_count())
            .finish()
    }
}

fn score_tool(tool: &NamespacedTool, query_lower: &str) -> f64 {
    let original = tool.original_name.to_lowercase();
    let namespaced = tool.namespaced_name.to_lowercase();
    if original == query_lower || namespaced == query_lower {
        return 1.0;
    }
    if original.starts_with(query_lower) || namespaced.starts_with(query_lower) {
        return 0.9;
    }
    if original.contains(query_lower) || namespaced.contains(query_lower) {
        return 0.7;
    }
    if tool.description.to_lowercase().contains(query_lower) {
        return 0.4;
    }
    let overlap = char_overlap(query_lower, &original);
    if overlap >= 0.5 {
        return 0.1 + overlap * 0.2;
    }
    0.0
}

/// Fraction of the query's character set present in the candidate.
fn char_overlap(query: &str, candidate: &str) -> f64 {
    let query_chars: std::collections::HashSet<char> =
        query.chars().filter(|c| c.is_alphanumeric()).collect();
    if query_chars.is_empty() {
        return 0.0;
    }
    let candidate_chars: std::collections::HashSet<char> =
        candidate.chars().filter(|c| c.is_alphanumeric()).collect();
    query_chars.intersection(&candidate_chars).count() as f64 / query_chars.len() as f64
}
