//! Transports that carry JSON-RPC envelopes to the tool server

use crate::error::Result;
use crate::protocol::{JsonRpcRequest, JsonRpcResponse};
use async_trait::async_trait;

#[cfg(feature = "http")]
pub mod http;
pub mod stdio;

#[cfg(feature = "http")]
pub use http::HttpTransport;
pub use stdio::ProcessTransport;

/// Lifecycle state of a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    /// `start()` has not succeeded yet
    NotStarted,
    /// Ready to send
    Connected,
    /// Stopped, or the connection was lost
    Stopped,
}

/// Channel delivering one request and returning its matching response
///
/// Implementations are owned by a single client. Every method takes `&self`
/// so `stop()` can run while calls are in flight.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establish connectivity
    ///
    /// # Errors
    /// Returns [`MCPError::Startup`](crate::MCPError::Startup) if the process
    /// cannot be spawned or the endpoint is unreachable
    async fn start(&self) -> Result<()>;

    /// Release all resources and reject outstanding requests
    ///
    /// Stopping an already stopped (or never started) transport is a no-op.
    ///
    /// # Errors
    /// Returns an error only if tearing down the underlying resource fails
    async fn stop(&self) -> Result<()>;

    /// Current lifecycle state
    fn state(&self) -> TransportState;

    /// Snapshot of connectivity, no side effects
    fn is_connected(&self) -> bool {
        self.state() == TransportState::Connected
    }

    /// Send a request and wait for its response
    ///
    /// # Errors
    /// Returns a transport or timeout error; JSON-RPC error responses are
    /// returned as `Ok` for the normalizer to classify
    async fn send(&self, request: &JsonRpcRequest) -> Result<JsonRpcResponse>;

    /// Short name for logs
    fn kind(&self) -> &'static str;
}
