//! Canonical result of a tool call

use crate::error::MCPError;
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use serde_json::Value;

/// Code used for failures that never reached the tool server
pub const TRANSPORT_ERROR_CODE: i64 = -1;

/// JSON-RPC codes that describe a malformed request; repeating it cannot help
const CLIENT_ERROR_CODES: [i64; 4] = [-32700, -32600, -32601, -32602];

/// Why an attempt failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The transport was not connected; nothing was sent
    NotConnected,
    /// Connectivity failure mid-session
    Transport,
    /// No response within the request budget
    Timeout,
    /// JSON-RPC error object from the server
    Protocol,
    /// The tool ran and reported failure
    ToolExecution,
    /// The server is throttling requests
    RateLimited,
}

/// Error half of a [`CallOutcome`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolError {
    /// Error code (`-1` for transport failures)
    pub code: i64,
    /// Human-readable message
    pub message: String,
    /// Classification used by the retry policy; not part of the wire shape
    #[serde(skip)]
    pub kind: FailureKind,
    /// Request budget that expired, for [`FailureKind::Timeout`]
    #[serde(skip)]
    pub timeout_ms: Option<u64>,
}

impl ToolError {
    /// Build an error
    #[must_use]
    pub fn new(kind: FailureKind, code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            kind,
            timeout_ms: None,
        }
    }

    /// Record the request budget that expired
    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Whether another attempt could plausibly succeed
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self.kind {
            FailureKind::Transport | FailureKind::Timeout => true,
            FailureKind::Protocol => !CLIENT_ERROR_CODES.contains(&self.code),
            FailureKind::NotConnected | FailureKind::ToolExecution | FailureKind::RateLimited => {
                false
            }
        }
    }

    /// Convert into the matching [`MCPError`]
    #[must_use]
    pub fn into_error(self, tool: &str) -> MCPError {
        match self.kind {
            FailureKind::NotConnected => MCPError::NotConnected,
            FailureKind::Transport => MCPError::Transport(self.message),
            FailureKind::Timeout => MCPError::Timeout {
                tool: tool.into(),
                timeout_ms: self.timeout_ms.unwrap_or_default(),
            },
            FailureKind::Protocol => MCPError::Protocol {
                code: self.code,
                message: self.message,
            },
            FailureKind::ToolExecution => MCPError::ToolExecution {
                tool: tool.into(),
                message: self.message,
            },
            FailureKind::RateLimited => MCPError::RateLimited {
                tool: tool.into(),
                message: self.message,
            },
        }
    }
}

/// Result of one tool call: either data or an error, never both
///
/// Serializes as `{"success": true, "data": ...}` or
/// `{"success": false, "error": {"code": ..., "message": ...}}`.
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome {
    /// The tool produced output
    Success {
        /// Flattened tool output (unvalidated)
        data: Value,
    },
    /// The call failed
    Failure {
        /// What went wrong
        error: ToolError,
    },
}

impl CallOutcome {
    /// Successful outcome
    #[must_use]
    pub fn success(data: Value) -> Self {
        CallOutcome::Success { data }
    }

    /// Failed outcome
    #[must_use]
    pub fn failure(kind: FailureKind, code: i64, message: impl Into<String>) -> Self {
        CallOutcome::Failure {
            error: ToolError::new(kind, code, message),
        }
    }

    /// Outcome for a call attempted without a connected transport
    #[must_use]
    pub fn not_connected() -> Self {
        Self::failure(
            FailureKind::NotConnected,
            TRANSPORT_ERROR_CODE,
            MCPError::NotConnected.to_string(),
        )
    }

    /// Whether the call succeeded
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, CallOutcome::Success { .. })
    }

    /// Output data, if successful
    #[must_use]
    pub fn data(&self) -> Option<&Value> {
        match self {
            CallOutcome::Success { data } => Some(data),
            CallOutcome::Failure { .. } => None,
        }
    }

    /// Error, if failed
    #[must_use]
    pub fn error(&self) -> Option<&ToolError> {
        match self {
            CallOutcome::Success { .. } => None,
            CallOutcome::Failure { error } => Some(error),
        }
    }

    /// Convert into a `Result`, mapping failures onto [`MCPError`]
    ///
    /// # Errors
    /// Returns the failure converted with [`ToolError::into_error`]
    pub fn into_result(self, tool: &str) -> Result<Value, MCPError> {
        match self {
            CallOutcome::Success { data } => Ok(data),
            CallOutcome::Failure { error } => Err(error.into_error(tool)),
        }
    }
}

impl Serialize for CallOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("CallOutcome", 2)?;
        match self {
            CallOutcome::Success { data } => {
                state.serialize_field("success", &true)?;
                state.serialize_field("data", data)?;
            }
            CallOutcome::Failure { error } => {
                state.serialize_field("success", &false)?;
                state.serialize_field("error", error)?;
            }
        }
        state.end()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_serialized_shapes() {
        let ok = serde_json::to_value(CallOutcome::success(json!("hi"))).unwrap();
        assert_eq!(ok, json!({"success": true, "data": "hi"}));

        let failed = serde_json::to_value(CallOutcome::not_connected()).unwrap();
        assert_eq!(
            failed,
            json!({
                "success": false,
                "error": {"code": -1, "message": "Client not connected to server"}
            })
        );
    }

    #[test]
    fn test_retry_classification() {
        let retryable = [
            ToolError::new(FailureKind::Transport, -1, "reset"),
            ToolError::new(FailureKind::Timeout, -1, "slow"),
            ToolError::new(FailureKind::Protocol, -32000, "busy"),
            ToolError::new(FailureKind::Protocol, -32603, "internal"),
        ];
        assert!(retryable.iter().all(ToolError::is_retryable));

        let terminal = [
            ToolError::new(FailureKind::Protocol, -32601, "no such method"),
            ToolError::new(FailureKind::Protocol, -32602, "bad params"),
            ToolError::new(FailureKind::ToolExecution, -32000, "not found"),
            ToolError::new(FailureKind::RateLimited, -32000, "slow down"),
            ToolError::new(FailureKind::NotConnected, -1, "down"),
        ];
        assert!(terminal.iter().all(|e| !e.is_retryable()));
    }

    #[test]
    fn test_into_result() {
        let err = CallOutcome::failure(FailureKind::ToolExecution, -32000, "missing key")
            .into_result("get_cr")
            .unwrap_err();
        assert_eq!(err.to_string(), "Tool 'get_cr' failed: missing key");
        assert_eq!(
            CallOutcome::success(json!(1)).into_result("x").unwrap(),
            json!(1)
        );
    }

    #[test]
    fn test_timeout_keeps_its_category() {
        let outcome = CallOutcome::Failure {
            error: ToolError::new(FailureKind::Timeout, -1, "timed out").with_timeout_ms(250),
        };
        match outcome.into_result("slow_tool").unwrap_err() {
            MCPError::Timeout { tool, timeout_ms } => {
                assert_eq!(tool, "slow_tool");
                assert_eq!(timeout_ms, 250);
            }
            other => panic!("expected timeout, got {other:?}"),
        }

        let transport = CallOutcome::failure(FailureKind::Transport, -1, "reset")
            .into_result("x")
            .unwrap_err();
        assert!(matches!(transport, MCPError::Transport(_)));
    }
}
