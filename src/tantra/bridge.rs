//! Tool bridge: conversions between the internal tool shape and MCP's.
//!
//! Internal tools return a flat `{success, content}` result; MCP tools
//! return a list of typed content parts. The bridge wraps internal tools
//! for MCP consumers (exceptions become error results, never panics
//! across the boundary) and collapses MCP part lists into a single string
//! for internal consumers.

use serde_json::json;

use super::client::McpClient;
use super::{TantraError, TantraResult};

/// Result of an internal tool execution.
#[derive(Debug, Clone, PartialEq)]
pub struct InternalToolResult {
    pub is_error: bool,
    pub content: String,
}

impl InternalToolResult {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            is_error: false,
            content: content.into(),
        }
    }

    pub fn err(content: impl Into<String>) -> Self {
        Self {
            is_error: true,
            content: content.into(),
        }
    }
}

/// A tool implemented inside this process.
pub trait InternalTool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;

    /// Execute with JSON arguments.
    fn execute(&self, args: &serde_json::Value) -> TantraResult<InternalToolResult>;
}

/// Render an internal result in MCP shape:
/// `{content: [{type: "text", text}], isError}`.
pub fn internal_to_mcp_result(result: &InternalToolResult) -> serde_json::Value {
    json!({
        "content": [{"type": "text", "text": result.content}],
        "isError": result.is_error,
    })
}

/// Execute an internal tool on behalf of an MCP consumer.
///
/// Errors never escape: a failed execution becomes an
/// `isError: true` result with the message as text.
pub fn execute_internal_for_mcp(
    tool: &dyn InternalTool,
    args: &serde_json::Value,
) -> serde_json::Value {
    match tool.execute(args) {
        Ok(result) => internal_to_mcp_result(&result),
        Err(err) => json!({
            "content": [{"type": "text", "text": err.to_string()}],
            "isError": true,
        }),
    }
}

/// Collapse an MCP content-part list into one string.
///
/// Text parts join with newlines; resources contribute their text;
/// images become a `[image: {mime}]` placeholder. Unknown part types are
/// skipped.
pub fn collapse_content(result: &serde_json::Value) -> String {
    let Some(parts) = result.get("content").and_then(|c| c.as_array()) else {
        return String::new();
    };
    let mut pieces: Vec<String> = Vec::new();
    for part in parts {
        match part.get("type").and_then(|t| t.as_str()) {
            Some("text") => {
                if let Some(text) = part.get("text").and_then(|t| t.as_str()) {
                    pieces.push(text.to_string());
                }
            }
            Some("resource") => {
                if let Some(text) = part
                    .pointer("/resource/text")
                    .and_then(|t| t.as_str())
                {
                    pieces.push(text.to_string());
                }
            }
            Some("image") => {
                let mime = part
                    .get("mimeType")
                    .and_then(|m| m.as_str())
                    .unwrap_or("unknown");
                pieces.push(format!("[image: {mime}]"));
            }
            _ => {}
        }
    }
    pieces.join("\n")
}

/// Call a remote MCP tool and collapse the result for internal use.
///
/// A client failure becomes an internal error result rather than a
/// propagated exception; the caller sees `{is_error, content}` either
/// way.
pub fn execute_mcp_for_internal(
    client: &mut McpClient,
    tool_name: &str,
    args: serde_json::Value,
) -> InternalToolResult {
    match client.call_tool(tool_name, args) {
        Ok(result) => {
            let is_error = result
                .get("isError")
                .and_then(|e| e.as_bool())
                .unwrap_or(false);
            InternalToolResult {
                is_error,
                content: collapse_content(&result),
            }
        }
        Err(err) => InternalToolResult::err(err.to_string()),
    }
}

/// Convenience: does this MCP result flag an error?
pub fn mcp_result_is_error(result: &serde_json::Value) -> bool {
    result
        .get("isError")
        .and_then(|e| e.as_bool())
        .unwrap_or(false)
}

/// A simple internal tool built from a closure, for registration and
/// tests.
pub struct FnTool<F> {
    name: String,
    description: String,
    func: F,
}

impl<F> FnTool<F>
where
    F: Fn(&serde_json::Value) -> TantraResult<InternalToolResult> + Send + Sync,
{
    pub fn new(name: impl Into<String>, description: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            func,
        }
    }
}

impl<F> InternalTool for FnTool<F>
where
    F: Fn(&serde_json::Value) -> TantraResult<InternalToolResult> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn execute(&self, args: &serde_json::Value) -> TantraResult<InternalToolResult> {
        (self.func)(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_success_wraps_as_text_part() {
        let result = internal_to_mcp_result(&InternalToolResult::ok("all good"));
        assert_eq!(result["content"][0]["type"], "text");
        assert_eq!(result["content"][0]["text"], "all good");
        assert_eq!(result["isError"], false);
    }

    #[test]
    fn internal_error_flag_is_preserved() {
        let result = internal_to_mcp_result(&InternalToolResult::err("nope"));
        assert_eq!(result["isError"], true);
        assert_eq!(result["content"][0]["text"], "nope");
    }

    #[test]
    fn execution_failure_becomes_error_result() {
        let tool = FnTool::new("boom", "always fails", |_| {
            Err(TantraError::Protocol {
                message: "exploded".into(),
            })
        });
        let result = execute_internal_for_mcp(&tool, &json!({}));
        assert_eq!(result["isError"], true);
        let text = result["content"][0]["text"].as_str().unwrap();
        assert!(text.contains("exploded"));
    }

    #[test]
    fn collapse_joins_text_parts() {
        let result = json!({
            "content": [
                {"type": "text", "text": "first"},
                {"type": "text", "text": "second"},
            ]
        });
        assert_eq!(collapse_content(&result), "first\nsecond");
    }

    #[test]
    fn collapse_extracts_resource_text() {
        let result = json!({
            "content": [
                {"type": "resource", "resource": {"uri": "file:///a", "text": "file body"}},
            ]
        });
        assert_eq!(collapse_content(&result), "file body");
    }

    #[test]
    fn collapse_renders_image_placeholder() {
        let result = json!({
            "content": [
                {"type": "image", "mimeType": "image/png", "data": "AAAA"},
                {"type": "text", "text": "caption"},
            ]
        });
        assert_eq!(collapse_content(&result), "[image: image/png]\ncaption");
    }

    #[test]
    fn collapse_of_partless_result_is_empty() {
        assert_eq!(collapse_content(&json!({})), "");
        assert_eq!(collapse_content(&json!({"content": "oops"})), "");
    }

    #[test]
    fn fn_tool_executes() {
        let tool = FnTool::new("echo", "echoes input", |args| {
            Ok(InternalToolResult::ok(
                args.get("text").and_then(|t| t.as_str()).unwrap_or(""),
            ))
        });
        assert_eq!(tool.name(), "echo");
        let result = tool.execute(&json!({"text": "hi"})).unwrap();
        assert_eq!(result.content, "hi");
        assert!(!result.is_error);
    }
}
