//! HTTP transport: one `POST <base>/mcp` per request
//!
//! Correlation is synchronous here, each reply arrives on the response of the
//! POST that carried the request, so there is no pending table. The request
//! identifier is still embedded and checked against the reply.

use super::{Transport, TransportState};
use crate::error::{MCPError, Result};
use crate::protocol::{JsonRpcRequest, JsonRpcResponse};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Path appended to the base URL
pub const MCP_ENDPOINT_PATH: &str = "/mcp";

const JSON_MIME_TYPE: &str = "application/json";

/// Longest slice of an error body quoted in messages
const BODY_PREVIEW_CHARS: usize = 200;

const STATE_NOT_STARTED: u8 = 0;
const STATE_CONNECTED: u8 = 1;
const STATE_STOPPED: u8 = 2;

/// Transport that POSTs each envelope to a fixed endpoint
#[derive(Debug)]
pub struct HttpTransport {
    endpoint: String,
    client: reqwest::Client,
    timeout: Duration,
    state: AtomicU8,
    /// Cancelled by `stop`; replaced on every `start`
    shutdown: Mutex<CancellationToken>,
}

impl HttpTransport {
    /// Create a transport for `base_url`; reachability is checked by [`Transport::start`]
    #[must_use]
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self {
            endpoint: format!("{}{MCP_ENDPOINT_PATH}", base_url.trim_end_matches('/')),
            client: reqwest::Client::new(),
            timeout,
            state: AtomicU8::new(STATE_NOT_STARTED),
            shutdown: Mutex::new(CancellationToken::new()),
        }
    }

    /// Full endpoint URL
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn shutdown_token(&self) -> CancellationToken {
        self.shutdown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn post(&self, request: &JsonRpcRequest) -> Result<reqwest::Response> {
        self.client
            .post(&self.endpoint)
            .header(reqwest::header::ACCEPT, JSON_MIME_TYPE)
            .json(request)
            .send()
            .await
            .map_err(|e| MCPError::Transport(format!("POST {} failed: {e}", self.endpoint)))
    }

    async fn exchange(&self, request: &JsonRpcRequest) -> Result<JsonRpcResponse> {
        trace!(id = request.id, endpoint = %self.endpoint, "POST {}", request.method);
        let response = self.post(request).await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let preview: String = body.chars().take(BODY_PREVIEW_CHARS).collect();
            return Err(MCPError::Transport(format!("HTTP {status}: {preview}")));
        }

        // text() + from_str() keeps JSON errors distinguishable from I/O errors
        let body = response
            .text()
            .await
            .map_err(|e| MCPError::Transport(format!("failed to read response body: {e}")))?;
        debug!(%status, body_len = body.len(), "HTTP response received");

        let reply: JsonRpcResponse = serde_json::from_str(&body)
            .map_err(|e| MCPError::InvalidResponse(format!("{e}: {body}")))?;

        match reply.numeric_id() {
            Some(id) if id != request.id => Err(MCPError::InvalidResponse(format!(
                "response id {id} does not match request id {}",
                request.id
            ))),
            _ => Ok(reply),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn start(&self) -> Result<()> {
        // Any HTTP answer proves the endpoint is reachable, even an error status
        let probe = JsonRpcRequest::new(0, crate::protocol::METHOD_PING, None);
        let result = tokio::time::timeout(self.timeout, self.post(&probe)).await;

        match result {
            Ok(Ok(response)) => {
                debug!(status = %response.status(), "Endpoint probe answered");
                *self.shutdown.lock().unwrap_or_else(PoisonError::into_inner) =
                    CancellationToken::new();
                self.state.store(STATE_CONNECTED, Ordering::Release);
                info!("Connected to tool server at {}", self.endpoint);
                Ok(())
            }
            Ok(Err(e)) => Err(MCPError::Startup {
                reason: e.to_string(),
            }),
            Err(_) => Err(MCPError::Startup {
                reason: format!(
                    "{} did not answer within {:?}",
                    self.endpoint, self.timeout
                ),
            }),
        }
    }

    async fn stop(&self) -> Result<()> {
        let previous = self.state.swap(STATE_STOPPED, Ordering::AcqRel);
        self.shutdown_token().cancel();
        if previous == STATE_CONNECTED {
            info!("Disconnected from tool server at {}", self.endpoint);
        }
        Ok(())
    }

    fn state(&self) -> TransportState {
        match self.state.load(Ordering::Acquire) {
            STATE_CONNECTED => TransportState::Connected,
            STATE_NOT_STARTED => TransportState::NotStarted,
            _ => TransportState::Stopped,
        }
    }

    async fn send(&self, request: &JsonRpcRequest) -> Result<JsonRpcResponse> {
        if !self.is_connected() {
            return Err(MCPError::NotConnected);
        }

        let shutdown = self.shutdown_token();
        let exchange = tokio::time::timeout(self.timeout, self.exchange(request));

        let result = tokio::select! {
            () = shutdown.cancelled() => {
                debug!(id = request.id, "Request abandoned, transport stopped");
                return Err(MCPError::Transport("Transport stopped".into()));
            }
            result = exchange => result,
        };

        match result {
            Ok(result) => result,
            Err(_) => {
                let tool = request.label();
                warn!(id = request.id, %tool, "HTTP request timed out after {:?}", self.timeout);
                Err(MCPError::Timeout {
                    tool,
                    timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
                })
            }
        }
    }

    fn kind(&self) -> &'static str {
        "http"
    }
}
