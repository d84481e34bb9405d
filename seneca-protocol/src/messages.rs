//! JSON-RPC and MCP message types
//!
//! Implements the JSON-RPC 2.0 envelope used by the orchestrator, the MCP
//! handshake and tool-call payloads, and the observer registration exchange.

use serde::{Deserialize, Serialize, Serializer};
use serde_json::{json, Value};

use crate::{MCP_PROTOCOL_VERSION, ROLE_OBSERVER};

/// JSON-RPC version string
pub const JSONRPC_VERSION: &str = "2.0";

/// Handshake request method
pub const METHOD_INITIALIZE: &str = "initialize";

/// Notification completing the handshake
pub const METHOD_INITIALIZED: &str = "notifications/initialized";

/// Tool invocation method; every remote operation goes through it
pub const METHOD_TOOLS_CALL: &str = "tools/call";

/// Liveness request the remote may send us
pub const METHOD_PING: &str = "ping";

/// Tool used to register this client and learn its permitted operations
pub const REGISTRATION_OPERATION: &str = "authenticate";

/// JSON-RPC 2.0 request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// JSON-RPC version (always "2.0")
    pub jsonrpc: String,
    /// Request ID (string or number)
    pub id: Value,
    /// Method name
    pub method: String,
    /// Method parameters (optional)
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id: Value::from(id),
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC 2.0 notification (no id, no response expected)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC 2.0 response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// JSON-RPC version (always "2.0")
    pub jsonrpc: String,
    /// Request ID that this response is for
    pub id: Value,
    /// Result (mutually exclusive with error)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error (mutually exclusive with result)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Create a success response
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response
    pub fn error(id: Value, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Numeric request id, accepting numbers and numeric strings
    pub fn id_u64(&self) -> Option<u64> {
        match &self.id {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Split into the result value or the remote error
    pub fn into_result(self) -> Result<Value, JsonRpcError> {
        match (self.error, self.result) {
            (Some(error), _) => Err(error),
            (None, Some(result)) => Ok(result),
            (None, None) => Ok(Value::Null),
        }
    }
}

/// JSON-RPC 2.0 error object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Error code
    pub code: i64,
    /// Error message
    pub message: String,
    /// Additional error data (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    /// Create a new JSON-RPC error
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    // Standard JSON-RPC error codes
    /// Parse error: Invalid JSON was received
    pub const PARSE_ERROR: i64 = -32700;
    /// Invalid Request: The JSON sent is not a valid Request object
    pub const INVALID_REQUEST: i64 = -32600;
    /// Method not found: The method does not exist
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// Invalid params: Invalid method parameter(s)
    pub const INVALID_PARAMS: i64 = -32602;
    /// Internal error: Internal JSON-RPC error
    pub const INTERNAL_ERROR: i64 = -32603;
    /// A tool ran but reported failure (`isError: true`)
    pub const TOOL_ERROR: i64 = -32000;
}

/// Any JSON-RPC frame, classified by the fields it carries
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawMessage")]
pub enum JsonRpcMessage {
    Request(JsonRpcRequest),
    Notification(JsonRpcNotification),
    Response(JsonRpcResponse),
}

impl Serialize for JsonRpcMessage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Request(req) => req.serialize(serializer),
            Self::Notification(note) => note.serialize(serializer),
            Self::Response(resp) => resp.serialize(serializer),
        }
    }
}

impl From<JsonRpcRequest> for JsonRpcMessage {
    fn from(req: JsonRpcRequest) -> Self {
        Self::Request(req)
    }
}

impl From<JsonRpcNotification> for JsonRpcMessage {
    fn from(note: JsonRpcNotification) -> Self {
        Self::Notification(note)
    }
}

impl From<JsonRpcResponse> for JsonRpcMessage {
    fn from(resp: JsonRpcResponse) -> Self {
        Self::Response(resp)
    }
}

/// Permissive wire shape used to classify incoming frames
#[derive(Deserialize)]
struct RawMessage {
    #[serde(default)]
    jsonrpc: Option<String>,
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

impl TryFrom<RawMessage> for JsonRpcMessage {
    type Error = String;

    fn try_from(raw: RawMessage) -> Result<Self, Self::Error> {
        let jsonrpc = raw.jsonrpc.unwrap_or_else(|| JSONRPC_VERSION.into());
        match (raw.method, raw.id) {
            (Some(method), Some(id)) => Ok(Self::Request(JsonRpcRequest {
                jsonrpc,
                id,
                method,
                params: raw.params.unwrap_or(Value::Null),
            })),
            (Some(method), None) => Ok(Self::Notification(JsonRpcNotification {
                jsonrpc,
                method,
                params: raw.params.unwrap_or(Value::Null),
            })),
            (None, id) if raw.result.is_some() || raw.error.is_some() => {
                Ok(Self::Response(JsonRpcResponse {
                    jsonrpc,
                    id: id.unwrap_or(Value::Null),
                    result: raw.result,
                    error: raw.error,
                }))
            }
            _ => Err("frame is neither a request, a notification nor a response".into()),
        }
    }
}

/// Client identification sent in the handshake
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

/// Parameters of the `initialize` request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: String,
    pub capabilities: Value,
    pub client_info: ClientInfo,
}

impl InitializeParams {
    pub fn for_client(name: impl Into<String>) -> Self {
        Self {
            protocol_version: MCP_PROTOCOL_VERSION.into(),
            capabilities: json!({}),
            client_info: ClientInfo {
                name: name.into(),
                version: env!("CARGO_PKG_VERSION").into(),
            },
        }
    }
}

/// Parameters of a `tools/call` request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallParams {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// MCP tool call result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Content blocks returned by the tool
    #[serde(default)]
    pub content: Vec<ToolContent>,
    /// Whether this result represents an error
    #[serde(rename = "isError", default, skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

impl ToolResult {
    /// Create a text result
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text { text: text.into() }],
            is_error: None,
        }
    }

    /// Create an error result
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text {
                text: message.into(),
            }],
            is_error: Some(true),
        }
    }

    fn first_text(&self) -> Option<&str> {
        self.content.iter().find_map(|c| match c {
            ToolContent::Text { text } => Some(text.as_str()),
            ToolContent::Other => None,
        })
    }

    /// Decode the payload: the first text block as JSON, or as a plain string
    pub fn into_value(self) -> Result<Value, JsonRpcError> {
        let text = self.first_text().map(str::to_owned);
        if self.is_error == Some(true) {
            return Err(JsonRpcError::new(
                JsonRpcError::TOOL_ERROR,
                text.unwrap_or_else(|| "tool reported an error".into()),
            ));
        }
        Ok(match text {
            Some(text) => serde_json::from_str(&text).unwrap_or(Value::String(text)),
            None => json!({}),
        })
    }
}

/// MCP tool content types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ToolContent {
    /// Text content
    #[serde(rename = "text")]
    Text {
        /// The text content
        text: String,
    },
    /// Images, resources and anything else we do not render
    #[serde(other)]
    Other,
}

/// Unwrap a `tools/call` result; results without a content array pass through
pub fn tool_result_value(result: Value) -> Result<Value, JsonRpcError> {
    if !result.get("content").map(Value::is_array).unwrap_or(false) {
        return Ok(result);
    }
    let parsed: ToolResult = serde_json::from_value(result).map_err(|e| {
        JsonRpcError::new(JsonRpcError::INVALID_REQUEST, format!("malformed tool result: {}", e))
    })?;
    parsed.into_value()
}

/// Arguments of the registration call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationRequest {
    pub client_id: String,
    pub client_type: String,
    pub client_role: String,
    pub role: String,
    pub client_label: String,
    #[serde(default)]
    pub metadata: Value,
}

impl RegistrationRequest {
    /// Registration declaring the read-only observer role
    pub fn observer(client_id: impl Into<String>, client_label: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_type: ROLE_OBSERVER.into(),
            client_role: ROLE_OBSERVER.into(),
            role: ROLE_OBSERVER.into(),
            client_label: client_label.into(),
            metadata: json!({
                "tool": "seneca",
                "version": env!("CARGO_PKG_VERSION"),
            }),
        }
    }
}

/// Result of the registration call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistrationResponse {
    /// Explicit verdict; absent means the remote did not say
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    /// Server-side session token (network transport only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
    /// Operations permitted for the declared role
    #[serde(default, alias = "available_tools")]
    pub allowed_operations: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl RegistrationResponse {
    pub fn is_rejected(&self) -> bool {
        self.success == Some(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_request() {
        let msg: JsonRpcMessage =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":7,"method":"ping"}"#).unwrap();
        match msg {
            JsonRpcMessage::Request(req) => {
                assert_eq!(req.id, json!(7));
                assert_eq!(req.method, "ping");
                assert!(req.params.is_null());
            }
            other => panic!("expected request, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_notification() {
        let msg: JsonRpcMessage = serde_json::from_str(
            r#"{"jsonrpc":"2.0","method":"notifications/event","params":{"event_type":"x"}}"#,
        )
        .unwrap();
        assert!(matches!(
            msg,
            JsonRpcMessage::Notification(n) if n.method == "notifications/event"
        ));
    }

    #[test]
    fn test_classify_error_response_with_null_id() {
        let msg: JsonRpcMessage = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32700,"message":"parse error"}}"#,
        )
        .unwrap();
        match msg {
            JsonRpcMessage::Response(resp) => {
                assert_eq!(resp.id, Value::Null);
                assert_eq!(resp.id_u64(), None);
                let err = resp.into_result().unwrap_err();
                assert_eq!(err.code, JsonRpcError::PARSE_ERROR);
            }
            other => panic!("expected response, got {:?}", other),
        }
    }

    #[test]
    fn test_reject_unclassifiable_frame() {
        let result: Result<JsonRpcMessage, _> = serde_json::from_str(r#"{"jsonrpc":"2.0","id":1}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_response_id_accepts_numeric_string() {
        let resp = JsonRpcResponse::success(json!("42"), json!({}));
        assert_eq!(resp.id_u64(), Some(42));
    }

    #[test]
    fn test_message_serializes_without_wrapper() {
        let msg = JsonRpcMessage::from(JsonRpcRequest::new(3, "initialize", json!({"a": 1})));
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({"jsonrpc": "2.0", "id": 3, "method": "initialize", "params": {"a": 1}})
        );
    }

    #[test]
    fn test_initialize_params_camel_case() {
        let value = serde_json::to_value(InitializeParams::for_client("seneca")).unwrap();
        assert_eq!(value["protocolVersion"], MCP_PROTOCOL_VERSION);
        assert_eq!(value["clientInfo"]["name"], "seneca");
    }

    #[test]
    fn test_tool_result_json_text() {
        let value = tool_result_value(json!({
            "content": [{"type": "text", "text": "{\"agents\": []}"}]
        }))
        .unwrap();
        assert_eq!(value, json!({"agents": []}));
    }

    #[test]
    fn test_tool_result_plain_text() {
        let value = ToolResult::text("pong").into_value().unwrap();
        assert_eq!(value, json!("pong"));
    }

    #[test]
    fn test_tool_result_error_flag() {
        let err = tool_result_value(json!({
            "content": [{"type": "text", "text": "no such agent"}],
            "isError": true
        }))
        .unwrap_err();
        assert_eq!(err.code, JsonRpcError::TOOL_ERROR);
        assert_eq!(err.message, "no such agent");
    }

    #[test]
    fn test_tool_result_skips_non_text_blocks() {
        let value = tool_result_value(json!({
            "content": [
                {"type": "image", "data": "...", "mimeType": "image/png"},
                {"type": "text", "text": "42"}
            ]
        }))
        .unwrap();
        assert_eq!(value, json!(42));
    }

    #[test]
    fn test_plain_result_passes_through() {
        let value = tool_result_value(json!({"status": "ok"})).unwrap();
        assert_eq!(value, json!({"status": "ok"}));
    }

    #[test]
    fn test_observer_registration_request() {
        let req = RegistrationRequest::observer("seneca-1234", "dashboard");
        assert_eq!(req.client_type, ROLE_OBSERVER);
        assert_eq!(req.client_role, ROLE_OBSERVER);
        assert_eq!(req.role, ROLE_OBSERVER);
        assert_eq!(req.metadata["tool"], "seneca");
    }

    #[test]
    fn test_registration_response_legacy_field() {
        let resp: RegistrationResponse = serde_json::from_value(json!({
            "success": true,
            "available_tools": ["ping", "get_project_status"]
        }))
        .unwrap();
        assert!(!resp.is_rejected());
        assert_eq!(resp.allowed_operations.len(), 2);
        assert!(resp.session_token.is_none());
    }

    #[test]
    fn test_registration_response_rejected() {
        let resp: RegistrationResponse =
            serde_json::from_value(json!({"success": false, "message": "unknown role"})).unwrap();
        assert!(resp.is_rejected());
        assert!(resp.allowed_operations.is_empty());
    }
}
