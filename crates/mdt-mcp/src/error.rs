//! Error types for tool-server client operations

use thiserror::Error;

/// Tool-server client errors
#[derive(Debug, Error)]
pub enum MCPError {
    /// Transport could not be established (spawn failure, unreachable endpoint)
    #[error("Failed to start tool server: {reason}")]
    Startup {
        /// Failure reason
        reason: String,
    },

    /// Connectivity lost mid-session (I/O, closed stream, HTTP failure)
    #[error("Transport error: {0}")]
    Transport(String),

    /// No response arrived within the request budget
    #[error("Request for '{tool}' timed out after {timeout_ms}ms")]
    Timeout {
        /// Tool name (or method name for non-call requests)
        tool: String,
        /// Timeout in milliseconds
        timeout_ms: u64,
    },

    /// Well-formed JSON-RPC error returned by the tool server
    #[error("Protocol error {code}: {message}")]
    Protocol {
        /// JSON-RPC error code
        code: i64,
        /// Error message
        message: String,
    },

    /// The tool server is deliberately throttling requests
    #[error("Rate limited while calling '{tool}': {message}")]
    RateLimited {
        /// Tool name
        tool: String,
        /// Throttling message reported by the server
        message: String,
    },

    /// The named tool ran but reported failure
    #[error("Tool '{tool}' failed: {message}")]
    ToolExecution {
        /// Tool name
        tool: String,
        /// Failure message
        message: String,
    },

    /// Call attempted while the transport is not connected
    #[error("Client not connected to server")]
    NotConnected,

    /// Response could not be interpreted
    #[error("Invalid response from tool server: {0}")]
    InvalidResponse(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for MCPError {
    fn from(err: config::ConfigError) -> Self {
        MCPError::Config(err.to_string())
    }
}

/// Convenient Result type alias
pub type Result<T> = std::result::Result<T, MCPError>;
