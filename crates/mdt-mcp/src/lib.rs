//! MDT tool-server client
//!
//! Calls named tools on an external tool server and turns its replies into a
//! uniform [`CallOutcome`].
//!
//! ## Features
//!
//! - Child-process (newline-delimited JSON over stdio) and HTTP transports
//! - Concurrent in-flight calls correlated by unique request ids
//! - Per-request timeouts; late responses are dropped
//! - Bounded retry that never retries rate limits or tool failures
//! - Detection of errors reported as successful formatted text
//! - Zero unsafe code

#![deny(unsafe_code, dead_code, unused_imports, unused_variables, missing_docs)]

pub mod client;
pub mod config;
pub mod correlator;
pub mod error;
pub mod framing;
pub mod normalize;
pub mod outcome;
pub mod protocol;
pub mod retry;
pub mod transport;

pub use client::MCPClient;
pub use config::{ClientConfig, ServerCommand, ServerConfig, TransportConfig, TransportType};
pub use error::MCPError;
pub use outcome::{CallOutcome, FailureKind, ToolError};
pub use protocol::ToolDescriptor;
pub use transport::{Transport, TransportState};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{CallOutcome, ClientConfig, MCPClient, MCPError, ServerConfig, ToolDescriptor};
}
