//! The MCP client: initialize handshake, discovery, execution, timeouts.
//!
//! The client is synchronous: a request writes to the transport and then
//! drains the incoming channel until its response id arrives, dispatching
//! any interleaved notifications to registered handlers along the way.
//! State machine: disconnected → connecting → connected, with error as
//! the terminal failure state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;

use super::jsonrpc::{parse_incoming, Incoming, Notification, Request, Response, PROTOCOL_VERSION};
use super::transport::Transport;
use super::{McpTool, TantraError, TantraResult};

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl std::fmt::Display for ClientState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        };
        write!(f, "{name}")
    }
}

/// Client tunables.
#[derive(Debug, Clone)]
pub struct McpClientConfig {
    /// Per-request timeout.
    pub request_timeout_ms: u64,
    pub client_name: String,
    pub client_version: String,
}

impl Default for McpClientConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 30_000,
            client_name: "chitragupta".into(),
            client_version: env!("CARGO_PKG_VERSION").into(),
        }
    }
}

type NotificationHandler = Box<dyn Fn(&Notification) + Send>;

/// A connection to one MCP server.
pub struct McpClient {
    transport: Box<dyn Transport>,
    incoming: Receiver<String>,
    state: ClientState,
    next_id: u64,
    /// Responses that arrived while waiting for a different id.
    buffered: HashMap<u64, Response>,
    handlers: HashMap<String, NotificationHandler>,
    cancel: Arc<AtomicBool>,
    config: McpClientConfig,
}

impl McpClient {
    pub fn new(
        transport: Box<dyn Transport>,
        incoming: Receiver<String>,
        config: McpClientConfig,
    ) -> Self {
        Self {
            transport,
            incoming,
            state: ClientState::Disconnected,
            next_id: 0,
            buffered: HashMap::new(),
            handlers: HashMap::new(),
            cancel: Arc::new(AtomicBool::new(false)),
            config,
        }
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    /// Token that, when set, rejects in-flight requests with
    /// [`TantraError::Cancelled`].
    pub fn cancel_token(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Register a handler for a server notification method.
    pub fn on_notification(
        &mut self,
        method: impl Into<String>,
        handler: impl Fn(&Notification) + Send + 'static,
    ) {
        self.handlers.insert(method.into(), Box::new(handler));
    }

    /// Perform the initialize handshake.
    pub fn connect(&mut self) -> TantraResult<serde_json::Value> {
        self.state = ClientState::Connecting;
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": self.config.client_name,
                "version": self.config.client_version,
            },
        });
        let server_info = match self.raw_request("initialize", Some(params)) {
            Ok(info) => info,
            Err(err) => {
                self.state = ClientState::Error;
                return Err(err);
            }
        };
        self.notify("notifications/initialized", None)?;
        self.state = ClientState::Connected;
        tracing::info!(transport = self.transport.kind(), "mcp client connected");
        Ok(server_info)
    }

    /// Send a request and wait for its response.
    pub fn request(
        &mut self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> TantraResult<serde_json::Value> {
        if self.state != ClientState::Connected {
            return Err(TantraError::NotConnected {
                state: self.state.to_string(),
            });
        }
        self.raw_request(method, params)
    }

    /// Send a notification (no reply expected).
    pub fn notify(&mut self, method: &str, params: Option<serde_json::Value>) -> TantraResult<()> {
        let notification = Notification::new(method, params);
        let payload = serde_json::to_string(&notification).map_err(|e| TantraError::Protocol {
            message: format!("cannot encode notification: {e}"),
        })?;
        self.transport.send(&payload)
    }

    /// Drain any pending incoming messages, dispatching notifications.
    pub fn pump(&mut self) {
        while let Ok(line) = self.incoming.try_recv() {
            match parse_incoming(&line) {
                Ok(Incoming::Response(response)) => {
                    self.buffered.insert(response.id, response);
                }
                Ok(Incoming::Notification(notification)) => self.dispatch(&notification),
                Ok(Incoming::ServerRequest(request)) => {
                    tracing::debug!(method = %request.method, "ignoring server-initiated request");
                }
                Err(err) => tracing::warn!(%err, "dropping malformed mcp message"),
            }
        }
    }

    /// Close the connection.
    pub fn close(&mut self) {
        self.transport.close();
        self.state = ClientState::Disconnected;
    }

    // -- discovery ----------------------------------------------------------

    /// `tools/list`.
    pub fn list_tools(&mut self) -> TantraResult<Vec<McpTool>> {
        let result = self.request("tools/list", None)?;
        let tools = result.get("tools").cloned().unwrap_or(json!([]));
        serde_json::from_value(tools).map_err(|e| TantraError::Protocol {
            message: format!("malformed tools/list result: {e}"),
        })
    }

    /// `resources/list`.
    pub fn list_resources(&mut self) -> TantraResult<serde_json::Value> {
        Ok(self
            .request("resources/list", None)?
            .get("resources")
            .cloned()
            .unwrap_or(json!([])))
    }

    /// `prompts/list`.
    pub fn list_prompts(&mut self) -> TantraResult<serde_json::Value> {
        Ok(self
            .request("prompts/list", None)?
            .get("prompts")
            .cloned()
            .unwrap_or(json!([])))
    }

    // -- execution ----------------------------------------------------------

    /// `tools/call`.
    pub fn call_tool(
        &mut self,
        name: &str,
        args: serde_json::Value,
    ) -> TantraResult<serde_json::Value> {
        self.request("tools/call", Some(json!({"name": name, "arguments": args})))
    }

    /// `resources/read`.
    pub fn read_resource(&mut self, uri: &str) -> TantraResult<serde_json::Value> {
        self.request("resources/read", Some(json!({"uri": uri})))
    }

    /// `prompts/get`.
    pub fn get_prompt(
        &mut self,
        name: &str,
        args: serde_json::Value,
    ) -> TantraResult<serde_json::Value> {
        self.request("prompts/get", Some(json!({"name": name, "arguments": args})))
    }

    // -- internals ----------------------------------------------------------

    fn raw_request(
        &mut self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> TantraResult<serde_json::Value> {
        self.next_id += 1;
        let id = self.next_id;
        let request = Request::new(id, method, params);
        let payload = serde_json::to_string(&request).map_err(|e| TantraError::Protocol {
            message: format!("cannot encode request: {e}"),
        })?;
        self.transport.send(&payload)?;

        let timeout = Duration::from_millis(self.config.request_timeout_ms);
        let deadline = Instant::now() + timeout;
        loop {
            if self.cancel.load(Ordering::Relaxed) {
                return Err(TantraError::Cancelled);
            }
            if let Some(response) = self.buffered.remove(&id) {
                return response.into_result();
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(TantraError::Timeout {
                    timeout_ms: self.config.request_timeout_ms,
                    method: method.to_string(),
                });
            }
            let poll = remaining.min(Duration::from_millis(50));
            match self.incoming.recv_timeout(poll) {
                Ok(line) => match parse_incoming(&line)? {
                    Incoming::Response(response) if response.id == id => {
                        return response.into_result();
                    }
                    Incoming::Response(response) => {
                        self.buffered.insert(response.id, response);
                    }
                    Incoming::Notification(notification) => self.dispatch(&notification),
                    Incoming::ServerRequest(request) => {
                        tracing::debug!(method = %request.method, "ignoring server-initiated request");
                    }
                },
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    self.state = ClientState::Error;
                    return Err(TantraError::Transport {
                        message: "connection closed while awaiting response".into(),
                    });
                }
            }
        }
    }

    fn dispatch(&self, notification: &Notification) {
        match self.handlers.get(&notification.method) {
            Some(handler) => handler(notification),
            None => {
                tracing::trace!(method = %notification.method, "unhandled mcp notification");
            }
        }
    }
}

impl std::fmt::Debug for McpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpClient")
            .field("state", &self.state)
            .field("transport", &self.transport.kind())
            .finish()
    }
}
