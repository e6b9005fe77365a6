//! Response normalization
//!
//! Turns whatever the tool server sent back into a [`CallOutcome`]. Rules are
//! applied in a fixed order:
//!
//! 1. transport failure → code `-1`
//! 2. JSON-RPC error object → its code (default `-32000`) and message
//! 3. `isError: true` → `-32000`, first text block as the message
//! 4. content blocks are flattened (text blocks joined with `\n`)
//! 5. text starting with the error marker is a disguised failure, unless the
//!    named tool is on the allow-list
//! 6. anything else is a success
//!
//! Protocol and transport failures whose message looks like throttling are
//! tagged [`FailureKind::RateLimited`]. Tool execution failures are business
//! results and are never reclassified.

use crate::error::{MCPError, Result};
use crate::outcome::{CallOutcome, FailureKind, ToolError, TRANSPORT_ERROR_CODE};
use crate::protocol::{ContentBlock, JsonRpcResponse, ToolPayload, SERVER_ERROR_CODE};
use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;
use tracing::debug;

/// Message used when a failed tool reports no text
pub const DEFAULT_TOOL_ERROR_MESSAGE: &str = "Tool execution error";

/// Message used when a protocol error carries no message
const DEFAULT_PROTOCOL_ERROR_MESSAGE: &str = "Unknown error";

/// Error marker some tools prefix to formatted failure text, e.g.
/// `❌ **Error in get_cr**: CR not found`
const ERROR_MARKER_PATTERN: &str =
    r"(?s)^\s*(?:❌\s*)?\*{0,2}Error in\s+`?([A-Za-z0-9_.\-]+)`?\*{0,2}\s*:?\s*(.*)$";

/// Messages that indicate deliberate throttling; 429 only counts as an HTTP status
const RATE_LIMIT_PATTERN: &str =
    r"(?i)\brate[\s_-]?limit|\btoo many requests\b|\bHTTP\s+429\b|\bthrottl|\bquota exceeded\b";

/// Converts raw replies into canonical outcomes
#[derive(Debug, Clone)]
pub struct ResponseNormalizer {
    disguised_error_tools: HashSet<String>,
    error_marker: Regex,
    rate_limit: Regex,
}

impl ResponseNormalizer {
    /// Create a normalizer with the given disguised-error allow-list
    ///
    /// # Errors
    /// Returns a configuration error if a built-in pattern fails to compile
    pub fn new<I, S>(disguised_error_tools: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Ok(Self {
            disguised_error_tools: disguised_error_tools.into_iter().map(Into::into).collect(),
            error_marker: compile(ERROR_MARKER_PATTERN)?,
            rate_limit: compile(RATE_LIMIT_PATTERN)?,
        })
    }

    /// Whether the message matches a throttling signature
    #[must_use]
    pub fn is_rate_limit(&self, message: &str) -> bool {
        self.rate_limit.is_match(message)
    }

    /// Normalize the result of one transport exchange for `tool`
    #[must_use]
    pub fn normalize(&self, tool: &str, response: Result<JsonRpcResponse>) -> CallOutcome {
        let outcome = match response {
            Err(err) => {
                let (kind, timeout_ms) = match err {
                    MCPError::Timeout { timeout_ms, .. } => (FailureKind::Timeout, Some(timeout_ms)),
                    MCPError::NotConnected => (FailureKind::NotConnected, None),
                    _ => (FailureKind::Transport, None),
                };
                let mut error = ToolError::new(kind, TRANSPORT_ERROR_CODE, err.to_string());
                error.timeout_ms = timeout_ms;
                CallOutcome::Failure { error }
            }
            Ok(response) => self.normalize_payload(tool, ToolPayload::decode(response)),
        };
        self.tag_rate_limit(outcome)
    }

    fn normalize_payload(&self, tool: &str, payload: ToolPayload) -> CallOutcome {
        match payload {
            ToolPayload::ProtocolError(error) => CallOutcome::failure(
                FailureKind::Protocol,
                error.code.unwrap_or(SERVER_ERROR_CODE),
                error
                    .message
                    .unwrap_or_else(|| DEFAULT_PROTOCOL_ERROR_MESSAGE.into()),
            ),
            ToolPayload::ExecutionFailed(blocks) => {
                let message = blocks
                    .iter()
                    .find_map(ContentBlock::as_text)
                    .unwrap_or(DEFAULT_TOOL_ERROR_MESSAGE);
                CallOutcome::failure(FailureKind::ToolExecution, SERVER_ERROR_CODE, message)
            }
            ToolPayload::Blocks { blocks, raw } => {
                let texts: Vec<&str> = blocks.iter().filter_map(ContentBlock::as_text).collect();
                if texts.is_empty() {
                    // Nothing textual to flatten (images, resources): hand back the list
                    return CallOutcome::success(raw);
                }
                self.check_disguised_error(tool, texts.join("\n"))
            }
            ToolPayload::Content(Value::String(text)) => self.check_disguised_error(tool, text),
            ToolPayload::Content(content) | ToolPayload::Unrecognized(content) => {
                CallOutcome::success(content)
            }
        }
    }

    fn check_disguised_error(&self, tool: &str, text: String) -> CallOutcome {
        let parsed = self.error_marker.captures(&text).map(|captures| {
            let named_tool = captures.get(1).map_or_else(String::new, |m| m.as_str().to_string());
            let message = captures
                .get(2)
                .map(|m| m.as_str().trim().to_string())
                .filter(|m| !m.is_empty());
            (named_tool, message)
        });
        let Some((named_tool, message)) = parsed else {
            return CallOutcome::success(Value::String(text));
        };

        if self.disguised_error_tools.contains(&named_tool) {
            debug!(
                tool,
                %named_tool, "Error-formatted text from allow-listed tool, keeping as success"
            );
            return CallOutcome::success(Value::String(text));
        }

        debug!(tool, %named_tool, "Reinterpreting error-formatted text as failure");
        let message = message.unwrap_or_else(|| text.trim().to_string());
        CallOutcome::failure(FailureKind::ToolExecution, SERVER_ERROR_CODE, message)
    }

    fn tag_rate_limit(&self, outcome: CallOutcome) -> CallOutcome {
        match outcome {
            CallOutcome::Failure { mut error }
                if matches!(error.kind, FailureKind::Protocol | FailureKind::Transport)
                    && self.is_rate_limit(&error.message) =>
            {
                error.kind = FailureKind::RateLimited;
                CallOutcome::Failure { error }
            }
            other => other,
        }
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| MCPError::Config(format!("invalid pattern: {e}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn normalizer() -> ResponseNormalizer {
        ResponseNormalizer::new(["create_cr"]).unwrap()
    }

    fn reply(result: Value) -> Result<JsonRpcResponse> {
        Ok(JsonRpcResponse::success(1, result))
    }

    fn text_blocks(texts: &[&str]) -> Value {
        json!({
            "content": texts
                .iter()
                .map(|t| json!({"type": "text", "text": t}))
                .collect::<Vec<_>>()
        })
    }

    #[test]
    fn test_transport_failure() {
        let outcome = normalizer().normalize(
            "get_cr",
            Err(MCPError::Transport("broken pipe".into())),
        );
        let error = outcome.error().unwrap();
        assert_eq!(error.code, -1);
        assert_eq!(error.kind, FailureKind::Transport);
        assert_eq!(error.message, "Transport error: broken pipe");
    }

    #[test]
    fn test_timeout_failure() {
        let outcome = normalizer().normalize(
            "get_cr",
            Err(MCPError::Timeout {
                tool: "get_cr".into(),
                timeout_ms: 10,
            }),
        );
        let error = outcome.error().unwrap();
        assert_eq!(error.code, -1);
        assert_eq!(error.kind, FailureKind::Timeout);
        assert_eq!(error.timeout_ms, Some(10));
        assert!(error.message.contains("get_cr"));
    }

    #[test]
    fn test_protocol_error_code_and_default() {
        let n = normalizer();

        let with_code = n.normalize("x", Ok(JsonRpcResponse::failure(1, -32601, "Method not found")));
        let error = with_code.error().unwrap();
        assert_eq!((error.code, error.message.as_str()), (-32601, "Method not found"));
        assert_eq!(error.kind, FailureKind::Protocol);

        let mut response = JsonRpcResponse::failure(1, 0, "Server busy");
        if let Some(e) = response.error.as_mut() {
            e.code = None;
        }
        let without_code = n.normalize("x", Ok(response));
        assert_eq!(without_code.error().unwrap().code, -32000);
    }

    #[test]
    fn test_is_error_flag_uses_first_text_block() {
        let outcome = normalizer().normalize(
            "get_cr",
            reply(json!({
                "isError": true,
                "content": [
                    {"type": "image", "data": "x", "mimeType": "image/png"},
                    {"type": "text", "text": "CR MDT-999 not found"},
                    {"type": "text", "text": "second"}
                ]
            })),
        );
        let error = outcome.error().unwrap();
        assert_eq!(error.code, -32000);
        assert_eq!(error.kind, FailureKind::ToolExecution);
        assert_eq!(error.message, "CR MDT-999 not found");
    }

    #[test]
    fn test_is_error_flag_without_text() {
        let outcome = normalizer().normalize("get_cr", reply(json!({"isError": true})));
        assert_eq!(outcome.error().unwrap().message, DEFAULT_TOOL_ERROR_MESSAGE);
    }

    #[test]
    fn test_single_block_verbatim() {
        let outcome = normalizer().normalize("get_cr", reply(text_blocks(&["  line one\n"])));
        assert_eq!(outcome, CallOutcome::success(json!("  line one\n")));
    }

    #[test]
    fn test_three_blocks_joined_in_order() {
        let outcome = normalizer().normalize("list_crs", reply(text_blocks(&["a", "b", "c"])));
        assert_eq!(outcome.data(), Some(&json!("a\nb\nc")));
    }

    #[test]
    fn test_non_list_content_passes_through() {
        let n = normalizer();
        let object = n.normalize("x", reply(json!({"content": {"projects": 2}})));
        assert_eq!(object.data(), Some(&json!({"projects": 2})));

        let bare = n.normalize("x", reply(json!({"structured": [1, 2]})));
        assert_eq!(bare.data(), Some(&json!({"structured": [1, 2]})));
    }

    #[test]
    fn test_blocks_without_text_pass_through() {
        let content = json!([{"type": "image", "data": "x", "mimeType": "image/png"}]);
        let outcome = normalizer().normalize("render", reply(json!({"content": content.clone()})));
        assert_eq!(outcome.data(), Some(&content));
    }

    #[test]
    fn test_disguised_error_outside_allow_list() {
        let outcome = normalizer().normalize(
            "get_cr",
            reply(text_blocks(&["❌ **Error in get_cr**\n\nCR 'MDT-404' not found"])),
        );
        let error = outcome.error().unwrap();
        assert_eq!(error.kind, FailureKind::ToolExecution);
        assert_eq!(error.code, -32000);
        assert_eq!(error.message, "CR 'MDT-404' not found");
    }

    #[test]
    fn test_disguised_error_inside_allow_list() {
        let text = "❌ **Error in create_cr**\n\nTitle is required";
        let outcome = normalizer().normalize("create_cr", reply(text_blocks(&[text])));
        assert_eq!(outcome, CallOutcome::success(json!(text)));
    }

    #[test]
    fn test_disguised_error_plain_marker() {
        let outcome = normalizer().normalize(
            "update_cr_status",
            reply(json!({"content": "Error in update_cr_status: invalid transition"})),
        );
        assert_eq!(outcome.error().unwrap().message, "invalid transition");
    }

    #[test]
    fn test_error_word_later_in_text_is_not_a_marker() {
        let text = "Found 3 CRs. Error in validation was fixed last week.";
        let outcome = normalizer().normalize("list_crs", reply(text_blocks(&[text])));
        assert!(outcome.is_success());
    }

    #[test]
    fn test_rate_limit_tagging() {
        let n = normalizer();
        for message in [
            "Rate limit exceeded, retry later",
            "HTTP 429 Too Many Requests",
            "request throttled",
        ] {
            let outcome = n.normalize("x", Ok(JsonRpcResponse::failure(1, -32000, message)));
            assert_eq!(outcome.error().unwrap().kind, FailureKind::RateLimited, "{message}");
        }

        let transport = n.normalize("x", Err(MCPError::Transport("HTTP 429: slow down".into())));
        assert_eq!(transport.error().unwrap().kind, FailureKind::RateLimited);

        let plain = n.normalize("x", Ok(JsonRpcResponse::failure(1, -32000, "disk full")));
        assert_eq!(plain.error().unwrap().kind, FailureKind::Protocol);

        let ticket = n.normalize("x", Ok(JsonRpcResponse::failure(1, -32000, "MDT-429 is locked")));
        assert_eq!(ticket.error().unwrap().kind, FailureKind::Protocol);
    }

    #[test]
    fn test_tool_failures_are_never_rate_limited() {
        let n = normalizer();
        for text in ["CR 'MDT-429' not found", "CR 'Add rate limiting to the API' is closed"] {
            let outcome = n.normalize(
                "get_cr",
                reply(json!({"isError": true, "content": [{"type": "text", "text": text}]})),
            );
            let error = outcome.error().unwrap();
            assert_eq!(error.kind, FailureKind::ToolExecution, "{text}");
            assert_eq!(error.message, text);
        }

        let disguised = n.normalize(
            "get_cr",
            reply(text_blocks(&["❌ **Error in get_cr**: CR 'MDT-429' not found"])),
        );
        assert_eq!(disguised.error().unwrap().kind, FailureKind::ToolExecution);
    }
}
