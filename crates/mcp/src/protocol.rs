//! JSON-RPC 2.0 framing and the tool-server message shapes.
//!
//! Only the subset needed to talk to a tool server is modelled: the
//! `initialize` handshake, `tools/list` and `tools/call`. Everything the
//! server sends beyond that (logging, progress, sampling requests) is
//! classified and skipped by the transports.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use switchyard_core::error::ProtocolError;

pub const JSONRPC_VERSION: &str = "2.0";

pub const METHOD_INITIALIZE: &str = "initialize";
pub const METHOD_INITIALIZED: &str = "notifications/initialized";
pub const METHOD_TOOLS_LIST: &str = "tools/list";
pub const METHOD_TOOLS_CALL: &str = "tools/call";

/// Client identity sent in the handshake.
pub const CLIENT_NAME: &str = "switchyard";

/// Answer used when a call returns neither content nor structured output.
pub const EMPTY_RESULT_ANSWER: &str = "Tool executed successfully";

/// JSON-RPC request
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC notification (no id, no response expected)
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: &'static str,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method: method.into(),
            params: None,
        }
    }
}

/// JSON-RPC response
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcError>,
}

impl JsonRpcResponse {
    /// The result payload, or the server's error as a [`ProtocolError`].
    pub fn into_result(self) -> Result<Value, ProtocolError> {
        if let Some(err) = self.error {
            return Err(ProtocolError::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        Ok(self.result.unwrap_or(Value::Null))
    }

    /// Decode the result payload into `T`.
    pub fn decode<T: for<'de> Deserialize<'de>>(self, method: &str) -> Result<T, ProtocolError> {
        let value = self.into_result()?;
        serde_json::from_value(value)
            .map_err(|e| ProtocolError::Transport(format!("malformed {method} result: {e}")))
    }
}

/// JSON-RPC error object
#[derive(Debug, Clone, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

/// Classification of one incoming frame.
#[derive(Debug, PartialEq, Eq)]
pub enum FrameKind {
    /// Reply to one of our requests.
    Response(u64),
    /// A request from the server to us (sampling, roots). Not served.
    ServerRequest,
    /// A notification (logging, progress, list_changed).
    Notification,
}

/// Classify a frame by inspecting its `id` and `method` fields.
pub fn classify_frame(frame: &Value) -> FrameKind {
    let id = frame.get("id").and_then(Value::as_u64);
    let method = frame.get("method").and_then(Value::as_str);
    match (id, method) {
        (Some(_), Some(_)) => FrameKind::ServerRequest,
        (Some(id), None) => FrameKind::Response(id),
        _ => FrameKind::Notification,
    }
}

/// Parse `frame` as the response to request `id`, if that is what it is.
pub fn match_response(frame: Value, id: u64) -> Option<Result<JsonRpcResponse, ProtocolError>> {
    match classify_frame(&frame) {
        FrameKind::Response(got) if got == id => Some(
            serde_json::from_value(frame)
                .map_err(|e| ProtocolError::Transport(format!("malformed response: {e}"))),
        ),
        _ => None,
    }
}

/// Parameters of the `initialize` request.
pub fn initialize_params(protocol_version: &str) -> Value {
    json!({
        "protocolVersion": protocol_version,
        "capabilities": {},
        "clientInfo": {
            "name": CLIENT_NAME,
            "version": env!("CARGO_PKG_VERSION"),
        }
    })
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    #[serde(default)]
    pub protocol_version: Option<String>,
    #[serde(default)]
    pub capabilities: Value,
    #[serde(default)]
    pub server_info: Option<ServerInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

/// A tool as reported by `tools/list`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteTool {
    pub name: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "empty_object_schema")]
    pub input_schema: Value,
    #[serde(default)]
    pub output_schema: Option<Value>,
}

fn empty_object_schema() -> Value {
    json!({"type": "object", "properties": {}})
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListToolsResult {
    #[serde(default)]
    pub tools: Vec<RemoteTool>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

pub fn list_tools_params(cursor: Option<&str>) -> Option<Value> {
    cursor.map(|c| json!({ "cursor": c }))
}

pub fn call_tool_params(name: &str, arguments: Value) -> Value {
    let arguments = if arguments.is_null() { json!({}) } else { arguments };
    json!({ "name": name, "arguments": arguments })
}

/// One content segment of a `tools/call` result.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentItem {
    Text {
        text: String,
    },
    Image {
        data: String,
        #[serde(rename = "mimeType", default)]
        mime_type: Option<String>,
    },
    Audio {
        data: String,
        #[serde(rename = "mimeType", default)]
        mime_type: Option<String>,
    },
    Resource {
        resource: EmbeddedResource,
    },
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddedResource {
    pub uri: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    #[serde(default)]
    pub content: Vec<ContentItem>,
    #[serde(default)]
    pub structured_content: Option<Value>,
    #[serde(default)]
    pub is_error: bool,
}

impl CallToolResult {
    /// Fold the heterogeneous content into one JSON value for the model.
    ///
    /// Structured content wins when present. A lone text segment collapses
    /// to `{"answer": text}`; anything else becomes `{"content": [...]}`.
    /// A result flagged `isError` becomes [`ProtocolError::ToolFailed`].
    pub fn normalize(self) -> Result<Value, ProtocolError> {
        let segments: Vec<Value> = self.content.into_iter().filter_map(segment_json).collect();

        if self.is_error {
            let message = segments
                .iter()
                .filter_map(|s| s.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n");
            return Err(ProtocolError::ToolFailed(if message.is_empty() {
                "no details".into()
            } else {
                message
            }));
        }

        if let Some(structured) = self.structured_content.filter(|v| !v.is_null()) {
            return Ok(structured);
        }
        match segments.as_slice() {
            [] => Ok(json!({ "answer": EMPTY_RESULT_ANSWER })),
            [only] if only["type"] == "text" => Ok(json!({ "answer": only["text"] })),
            _ => Ok(json!({ "content": segments })),
        }
    }
}

fn segment_json(item: ContentItem) -> Option<Value> {
    match item {
        ContentItem::Text { text } => Some(json!({ "type": "text", "text": text })),
        ContentItem::Image { data, mime_type } => {
            Some(json!({ "type": "image", "data": data, "mimeType": mime_type }))
        }
        ContentItem::Audio { data, mime_type } => {
            Some(json!({ "type": "audio", "data": data, "mimeType": mime_type }))
        }
        // Blob resources carry no text for the model
        ContentItem::Resource { resource } => resource
            .text
            .map(|text| json!({ "type": "resource", "uri": resource.uri, "text": text })),
        ContentItem::Unsupported => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call_result(value: Value) -> CallToolResult {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn classify_frames() {
        assert_eq!(classify_frame(&json!({"id": 3, "result": {}})), FrameKind::Response(3));
        assert_eq!(
            classify_frame(&json!({"id": 1, "method": "sampling/createMessage"})),
            FrameKind::ServerRequest
        );
        assert_eq!(
            classify_frame(&json!({"method": "notifications/message"})),
            FrameKind::Notification
        );
    }

    #[test]
    fn match_response_ignores_other_ids() {
        assert!(match_response(json!({"id": 2, "result": {}}), 1).is_none());
        let resp = match_response(json!({"jsonrpc": "2.0", "id": 1, "result": {"ok": true}}), 1)
            .unwrap()
            .unwrap();
        assert_eq!(resp.into_result().unwrap(), json!({"ok": true}));
    }

    #[test]
    fn rpc_error_surfaces() {
        let resp: JsonRpcResponse =
            serde_json::from_value(json!({"id": 1, "error": {"code": -32601, "message": "Method not found"}}))
                .unwrap();
        let err = resp.into_result().unwrap_err();
        assert_eq!(err.to_string(), "JSON-RPC error -32601: Method not found");
    }

    #[test]
    fn single_text_collapses_to_answer() {
        let out = call_result(json!({"content": [{"type": "text", "text": "42"}]}))
            .normalize()
            .unwrap();
        assert_eq!(out, json!({"answer": "42"}));
    }

    #[test]
    fn mixed_segments_fold_into_content_list() {
        let out = call_result(json!({"content": [
            {"type": "text", "text": "see image"},
            {"type": "image", "data": "aGVsbG8=", "mimeType": "image/png"},
            {"type": "resource", "resource": {"uri": "file:///a.txt", "text": "alpha"}},
            {"type": "resource_link", "uri": "file:///b.txt"}
        ]}))
        .normalize()
        .unwrap();
        assert_eq!(
            out,
            json!({"content": [
                {"type": "text", "text": "see image"},
                {"type": "image", "data": "aGVsbG8=", "mimeType": "image/png"},
                {"type": "resource", "uri": "file:///a.txt", "text": "alpha"}
            ]})
        );
    }

    #[test]
    fn structured_content_wins() {
        let out = call_result(json!({
            "content": [{"type": "text", "text": "{\"temp\":21}"}],
            "structuredContent": {"temp": 21}
        }))
        .normalize()
        .unwrap();
        assert_eq!(out, json!({"temp": 21}));
    }

    #[test]
    fn empty_result_gets_success_answer() {
        let out = call_result(json!({"content": []})).normalize().unwrap();
        assert_eq!(out, json!({"answer": EMPTY_RESULT_ANSWER}));
    }

    #[test]
    fn is_error_becomes_tool_failed() {
        let err = call_result(json!({"content": [{"type": "text", "text": "rate limited"}], "isError": true}))
            .normalize()
            .unwrap_err();
        assert!(matches!(err, ProtocolError::ToolFailed(m) if m == "rate limited"));
    }

    #[test]
    fn remote_tool_defaults() {
        let tool: RemoteTool = serde_json::from_value(json!({"name": "echo"})).unwrap();
        assert_eq!(tool.input_schema["type"], "object");
        assert!(tool.title.is_none());
        assert!(tool.output_schema.is_none());
    }
}
