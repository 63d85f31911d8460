//! JSON-RPC 2.0 envelopes for the MCP wire.
//!
//! Requests carry an id; notifications do not. Incoming lines classify
//! into responses (id + result/error), notifications (method, no id), or
//! server-initiated requests (method + id). Anything else is a protocol
//! error.

use serde::{Deserialize, Serialize};

use super::{TantraError, TantraResult};

/// The only JSON-RPC version MCP speaks.
pub const JSONRPC_VERSION: &str = "2.0";

/// MCP protocol revision sent during initialize.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// A client request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl Request {
    pub fn new(id: u64, method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id,
            method: method.into(),
            params,
        }
    }
}

/// A notification (no id, no reply).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl Notification {
    pub fn new(method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            method: method.into(),
            params,
        }
    }
}

/// The error member of a response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// A response to a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: String,
    pub id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl Response {
    /// Unwrap the result or surface the server's error.
    pub fn into_result(self) -> TantraResult<serde_json::Value> {
        if let Some(error) = self.error {
            return Err(TantraError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        Ok(self.result.unwrap_or(serde_json::Value::Null))
    }
}

/// Any message a server may send us.
#[derive(Debug, Clone)]
pub enum Incoming {
    Response(Response),
    Notification(Notification),
    /// Server-initiated request; MCP clients log and ignore these.
    ServerRequest(Request),
}

/// Classify one wire line.
pub fn parse_incoming(line: &str) -> TantraResult<Incoming> {
    let value: serde_json::Value =
        serde_json::from_str(line).map_err(|e| TantraError::Protocol {
            message: format!("invalid JSON: {e}"),
        })?;
    let object = value.as_object().ok_or_else(|| TantraError::Protocol {
        message: "message is not an object".into(),
    })?;
    if object.get("jsonrpc").and_then(|v| v.as_str()) != Some(JSONRPC_VERSION) {
        return Err(TantraError::Protocol {
            message: "missing or wrong jsonrpc version".into(),
        });
    }

    let has_id = object.contains_key("id") && !object["id"].is_null();
    let has_method = object.contains_key("method");

    if has_id && !has_method {
        let response: Response =
            serde_json::from_value(value).map_err(|e| TantraError::Protocol {
                message: format!("malformed response: {e}"),
            })?;
        if response.result.is_none() && response.error.is_none() {
            return Err(TantraError::Protocol {
                message: "response carries neither result nor error".into(),
            });
        }
        return Ok(Incoming::Response(response));
    }
    if has_method && !has_id {
        let notification: Notification =
            serde_json::from_value(value).map_err(|e| TantraError::Protocol {
                message: format!("malformed notification: {e}"),
            })?;
        return Ok(Incoming::Notification(notification));
    }
    if has_method && has_id {
        let request: Request =
            serde_json::from_value(value).map_err(|e| TantraError::Protocol {
                message: format!("malformed request: {e}"),
            })?;
        return Ok(Incoming::ServerRequest(request));
    }
    Err(TantraError::Protocol {
        message: "message is neither request, response, nor notification".into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_serializes_without_null_params() {
        let request = Request::new(1, "tools/list", None);
        let encoded = serde_json::to_string(&request).unwrap();
        assert!(!encoded.contains("params"));
        assert!(encoded.contains("\"jsonrpc\":\"2.0\""));
    }

    #[test]
    fn parse_response_with_result() {
        let line = r#"{"jsonrpc":"2.0","id":3,"result":{"tools":[]}}"#;
        match parse_incoming(line).unwrap() {
            Incoming::Response(response) => {
                assert_eq!(response.id, 3);
                assert_eq!(response.into_result().unwrap(), json!({"tools": []}));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parse_response_with_error() {
        let line = r#"{"jsonrpc":"2.0","id":4,"error":{"code":-32601,"message":"no such method"}}"#;
        match parse_incoming(line).unwrap() {
            Incoming::Response(response) => {
                let err = response.into_result().unwrap_err();
                assert!(matches!(err, TantraError::Rpc { code: -32601, .. }));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parse_notification() {
        let line = r#"{"jsonrpc":"2.0","method":"notifications/tools/list_changed"}"#;
        match parse_incoming(line).unwrap() {
            Incoming::Notification(notification) => {
                assert_eq!(notification.method, "notifications/tools/list_changed");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parse_server_request() {
        let line = r#"{"jsonrpc":"2.0","id":9,"method":"sampling/createMessage","params":{}}"#;
        assert!(matches!(
            parse_incoming(line).unwrap(),
            Incoming::ServerRequest(_)
        ));
    }

    #[test]
    fn malformed_lines_are_protocol_errors() {
        for line in [
            "not json at all",
            r#"{"id":1,"result":{}}"#,
            r#"{"jsonrpc":"1.0","id":1,"result":{}}"#,
            r#"{"jsonrpc":"2.0","id":1}"#,
            r#"{"jsonrpc":"2.0"}"#,
            r#"[1,2,3]"#,
        ] {
            assert!(
                matches!(parse_incoming(line), Err(TantraError::Protocol { .. })),
                "line should fail: {line}"
            );
        }
    }
}
