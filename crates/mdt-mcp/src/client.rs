//! Client facade
//!
//! [`MCPClient`] is the only type callers need: it owns the transport, the
//! identifier generator, the response normalizer and the retry policy, and
//! exposes lifecycle plus `list_tools` / `call_tool`.

use crate::config::{ClientConfig, TransportType};
use crate::correlator::IdGenerator;
use crate::error::{MCPError, Result};
use crate::normalize::ResponseNormalizer;
use crate::outcome::CallOutcome;
use crate::protocol::{JsonRpcRequest, ListToolsResult, ToolDescriptor, SERVER_ERROR_CODE};
use crate::retry::RetryPolicy;
use crate::transport::{ProcessTransport, Transport};
use serde_json::Value;
use std::sync::RwLock;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Client for a single tool server
pub struct MCPClient {
    transport: Box<dyn Transport>,
    ids: IdGenerator,
    normalizer: ResponseNormalizer,
    retry: RetryPolicy,
    startup_timeout: Duration,
    /// Tools advertised on the current connection
    tools: RwLock<Option<Vec<ToolDescriptor>>>,
}

impl MCPClient {
    /// Build a client and its transport from configuration
    ///
    /// Nothing is spawned or contacted until [`start`](Self::start).
    ///
    /// # Errors
    /// Returns a configuration error if the configured transport is unavailable
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let transport: Box<dyn Transport> = match config.server.detect_transport() {
            TransportType::Stdio(command) => {
                Box::new(ProcessTransport::new(command, config.timeout()))
            }
            #[cfg(feature = "http")]
            TransportType::Http(url) => {
                Box::new(crate::transport::HttpTransport::new(&url, config.timeout()))
            }
            #[cfg(not(feature = "http"))]
            TransportType::Http(url) => {
                return Err(MCPError::Config(format!(
                    "HTTP transport for '{url}' requires the `http` feature"
                )))
            }
        };
        Self::with_transport(config, transport)
    }

    /// Build a client around an existing transport
    ///
    /// # Errors
    /// Returns a configuration error if the normalizer cannot be built
    pub fn with_transport(config: &ClientConfig, transport: Box<dyn Transport>) -> Result<Self> {
        Ok(Self {
            transport,
            ids: IdGenerator::new(),
            normalizer: ResponseNormalizer::new(config.disguised_error_tools.iter().cloned())?,
            retry: RetryPolicy::new(config.max_retries, config.retry_delay()),
            startup_timeout: config.startup_timeout(),
            tools: RwLock::new(None),
        })
    }

    /// Connect to the tool server
    ///
    /// # Errors
    /// Returns [`MCPError::Startup`] if the transport cannot be established
    /// within the startup timeout
    pub async fn start(&self) -> Result<()> {
        info!(
            "Starting {} tool-server client (startup timeout {:?})",
            self.transport.kind(),
            self.startup_timeout
        );

        let started = tokio::time::timeout(self.startup_timeout, self.transport.start())
            .await
            .map_err(|_| MCPError::Startup {
                reason: format!("timeout after {}s", self.startup_timeout.as_secs()),
            })
            .and_then(|result| result);

        if let Err(e) = &started {
            warn!("Tool server failed to start: {}", e);
            // Release anything half-open so the client reports "not connected"
            self.transport.stop().await.ok();
        }
        started
    }

    /// Disconnect; outstanding calls are rejected. Safe to call repeatedly.
    ///
    /// # Errors
    /// Returns an error only if the transport fails to tear down
    pub async fn stop(&self) -> Result<()> {
        self.clear_tool_cache();
        self.transport.stop().await
    }

    /// Whether the transport is connected
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Tools advertised by the server, cached for the connection
    ///
    /// # Errors
    /// Returns [`MCPError::NotConnected`] when not connected, or the transport /
    /// protocol error that prevented listing
    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
        if let Some(tools) = self.cached_tools() {
            return Ok(tools);
        }
        self.refresh_tools().await
    }

    /// Re-fetch the tool list, replacing the cache
    ///
    /// # Errors
    /// Same as [`list_tools`](Self::list_tools)
    pub async fn refresh_tools(&self) -> Result<Vec<ToolDescriptor>> {
        if !self.is_connected() {
            return Err(MCPError::NotConnected);
        }

        let request = JsonRpcRequest::list_tools(self.ids.next_id());
        let response = self.transport.send(&request).await?;

        if let Some(error) = response.error {
            return Err(MCPError::Protocol {
                code: error.code.unwrap_or(SERVER_ERROR_CODE),
                message: error.message.unwrap_or_default(),
            });
        }

        let result: ListToolsResult =
            serde_json::from_value(response.result.unwrap_or(Value::Null)).map_err(|e| {
                MCPError::InvalidResponse(format!("tools/list result: {e}"))
            })?;

        for tool in &result.tools {
            debug!("  Tool '{}': {:?}", tool.name, tool.description);
        }
        info!("Discovered {} tools", result.tools.len());

        *self
            .tools
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(result.tools.clone());
        Ok(result.tools)
    }

    /// Look up one tool by name
    ///
    /// # Errors
    /// Same as [`list_tools`](Self::list_tools)
    pub async fn find_tool(&self, name: &str) -> Result<Option<ToolDescriptor>> {
        Ok(self
            .list_tools()
            .await?
            .into_iter()
            .find(|tool| tool.name == name))
    }

    /// Call a tool and return its canonical outcome
    ///
    /// Transport and timeout failures are retried up to the configured bound;
    /// every other failure is returned as soon as it is seen. Calls made while
    /// disconnected fail with code `-1` without touching the transport.
    ///
    /// # Errors
    /// Returns [`MCPError::RateLimited`] when the server is throttling
    pub async fn call_tool(&self, name: &str, args: Value) -> Result<CallOutcome> {
        let arguments = shape_arguments(name, args);

        self.retry
            .run(name, |attempt| {
                let arguments = arguments.clone();
                async move {
                    if !self.transport.is_connected() {
                        warn!(tool = name, "Call attempted while not connected");
                        return CallOutcome::not_connected();
                    }

                    let request = JsonRpcRequest::call_tool(self.ids.next_id(), name, arguments);
                    debug!(tool = name, id = request.id, attempt, "Calling tool");

                    let response = self.transport.send(&request).await;
                    self.normalizer.normalize(name, response)
                }
            })
            .await
    }

    fn cached_tools(&self) -> Option<Vec<ToolDescriptor>> {
        self.tools
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    fn clear_tool_cache(&self) {
        *self
            .tools
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = None;
    }
}

/// Tool arguments must be an object: `null` becomes `{}`, anything else is
/// wrapped as `{"input": value}`
fn shape_arguments(tool: &str, args: Value) -> Value {
    match args {
        Value::Object(_) => args,
        Value::Null => Value::Object(serde_json::Map::new()),
        other => {
            warn!(
                "Tool '{}' called with non-object args, wrapping: {:?}",
                tool, other
            );
            let mut map = serde_json::Map::new();
            map.insert("input".into(), other);
            Value::Object(map)
        }
    }
}
