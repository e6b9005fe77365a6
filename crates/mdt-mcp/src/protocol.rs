//! JSON-RPC 2.0 envelopes and tool-server payload types
//!
//! Outbound requests are `{jsonrpc, id, method, params}`; inbound responses are
//! `{jsonrpc, id, result | error}`. The same envelope is used by both transports.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC protocol version
pub const JSONRPC_VERSION: &str = "2.0";

/// Method used to enumerate tools
pub const METHOD_LIST_TOOLS: &str = "tools/list";

/// Method used to invoke a tool
pub const METHOD_CALL_TOOL: &str = "tools/call";

/// Method used to probe reachability
pub const METHOD_PING: &str = "ping";

/// Generic server error code, used when an error carries no code of its own
pub const SERVER_ERROR_CODE: i64 = -32000;

/// Outbound JSON-RPC request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcRequest {
    /// Always `"2.0"`
    pub jsonrpc: String,
    /// Correlation identifier
    pub id: u64,
    /// Method name
    pub method: String,
    /// Method parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Build a request envelope
    #[must_use]
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id,
            method: method.into(),
            params,
        }
    }

    /// `tools/list` request
    #[must_use]
    pub fn list_tools(id: u64) -> Self {
        Self::new(id, METHOD_LIST_TOOLS, Some(Value::Object(serde_json::Map::new())))
    }

    /// `tools/call` request with `params = {name, arguments}`
    #[must_use]
    pub fn call_tool(id: u64, name: &str, arguments: Value) -> Self {
        Self::new(
            id,
            METHOD_CALL_TOOL,
            Some(serde_json::json!({ "name": name, "arguments": arguments })),
        )
    }

    /// Name used in timeout and log messages: the tool name for calls,
    /// otherwise the method
    #[must_use]
    pub fn label(&self) -> String {
        self.params
            .as_ref()
            .filter(|_| self.method == METHOD_CALL_TOOL)
            .and_then(|p| p.get("name"))
            .and_then(Value::as_str)
            .map_or_else(|| self.method.clone(), ToString::to_string)
    }
}

/// Inbound JSON-RPC response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcResponse {
    /// Protocol version as sent by the server
    #[serde(default)]
    pub jsonrpc: String,
    /// Echoed identifier; servers may send `null` for unparseable requests
    #[serde(default)]
    pub id: Option<Value>,
    /// Successful result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Protocol-level error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Successful response
    #[must_use]
    pub fn success(id: u64, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id: Some(Value::from(id)),
            result: Some(result),
            error: None,
        }
    }

    /// Error response
    #[must_use]
    pub fn failure(id: u64, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id: Some(Value::from(id)),
            result: None,
            error: Some(JsonRpcError {
                code: Some(code),
                message: Some(message.into()),
                data: None,
            }),
        }
    }

    /// Numeric identifier, if the server echoed one
    #[must_use]
    pub fn numeric_id(&self) -> Option<u64> {
        self.id.as_ref().and_then(Value::as_u64)
    }
}

/// JSON-RPC error object
///
/// Every field is optional: servers in the wild omit codes or messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcError {
    /// Error code
    #[serde(default)]
    pub code: Option<i64>,
    /// Error message
    #[serde(default)]
    pub message: Option<String>,
    /// Additional error data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Tool advertised by the tool server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDescriptor {
    /// Tool name
    pub name: String,
    /// Tool description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Input schema (JSON Schema, opaque to the client)
    #[serde(rename = "inputSchema", default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
}

/// `tools/list` result body
#[derive(Debug, Clone, Deserialize)]
pub struct ListToolsResult {
    /// Advertised tools
    #[serde(default)]
    pub tools: Vec<ToolDescriptor>,
}

/// Typed unit of tool output
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentBlock {
    /// Plain text
    Text {
        /// Text body
        text: String,
    },
    /// Base64 image
    Image {
        /// Encoded data
        data: String,
        /// MIME type
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    /// Embedded resource
    Resource {
        /// Resource body
        resource: Value,
    },
    /// Any block type this client does not interpret
    #[serde(other)]
    Unsupported,
}

impl ContentBlock {
    /// Text body for text blocks
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentBlock::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// Shape of a `tools/call` reply, decoded with an explicit priority order
#[derive(Debug, Clone, PartialEq)]
pub enum ToolPayload {
    /// Response carried a JSON-RPC error object
    ProtocolError(JsonRpcError),
    /// Result flagged `isError: true`
    ExecutionFailed(Vec<ContentBlock>),
    /// Result content is a list of typed blocks (raw list kept for pass-through)
    Blocks {
        /// Decoded blocks
        blocks: Vec<ContentBlock>,
        /// Undecoded list as received
        raw: Value,
    },
    /// Result content is present but not a list
    Content(Value),
    /// Result without a `content` field (or an empty reply)
    Unrecognized(Value),
}

impl ToolPayload {
    /// Decode a response into a payload variant
    ///
    /// Priority: error object, `isError` flag, content list, other content,
    /// anything else.
    #[must_use]
    pub fn decode(response: JsonRpcResponse) -> Self {
        if let Some(error) = response.error {
            return ToolPayload::ProtocolError(error);
        }

        let result = response.result.unwrap_or(Value::Null);

        let is_error = result
            .get("isError")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if is_error {
            let blocks = result
                .get("content")
                .map(decode_blocks)
                .unwrap_or_default();
            return ToolPayload::ExecutionFailed(blocks);
        }

        match result.get("content") {
            Some(content @ Value::Array(_)) => ToolPayload::Blocks {
                blocks: decode_blocks(content),
                raw: content.clone(),
            },
            Some(content) => ToolPayload::Content(content.clone()),
            None => ToolPayload::Unrecognized(result),
        }
    }
}

/// Decode each element independently so one malformed block does not
/// discard its siblings
fn decode_blocks(content: &Value) -> Vec<ContentBlock> {
    content
        .as_array()
        .map(|items| {
            items
                .iter()
                .map(|item| {
                    serde_json::from_value(item.clone()).unwrap_or(ContentBlock::Unsupported)
                })
                .collect()
        })
        .unwrap_or_default()
}
