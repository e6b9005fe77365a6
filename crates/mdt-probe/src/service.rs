use anyhow::{Context, Result};
use mdt_mcp::{CallOutcome, ClientConfig, MCPClient, MCPError};
use serde_json::{json, Value};
use tracing::{info, warn};

/// Everything worked
pub const EXIT_OK: u8 = 0;
/// Unexpected failure (bad arguments, I/O)
pub const EXIT_FAILURE: u8 = 1;
/// The tool server failed, refused, or reported an error
pub const EXIT_TOOL_SERVER: u8 = 2;
/// Configuration could not be loaded
pub const EXIT_CONFIG: u8 = 5;

/// Probe service - owns the client for one command
pub struct ProbeService {
    client: MCPClient,
}

impl ProbeService {
    /// Build the client from configuration
    pub fn new(config: &ClientConfig) -> Result<Self, MCPError> {
        Ok(Self {
            client: MCPClient::new(config)?,
        })
    }

    /// Start the client, run `job`, then stop the client whatever happened
    async fn with_client<'a, T, F, Fut>(&'a self, job: F) -> Result<T, MCPError>
    where
        F: FnOnce(&'a MCPClient) -> Fut,
        Fut: std::future::Future<Output = Result<T, MCPError>>,
    {
        self.client.start().await?;
        let result = job(&self.client).await;
        if let Err(e) = self.client.stop().await {
            warn!("Failed to stop tool server cleanly: {}", e);
        }
        result
    }

    /// Tool names and descriptions as JSON
    pub async fn list(&self) -> Result<Value, MCPError> {
        let tools = self.with_client(|client| client.list_tools()).await?;
        info!("Server advertises {} tools", tools.len());
        Ok(json!(tools))
    }

    /// Call `tool` with JSON-encoded `args`
    pub async fn call(&self, tool: &str, args: &str) -> Result<CallOutcome> {
        let args: Value = serde_json::from_str(args)
            .with_context(|| format!("arguments for '{tool}' are not valid JSON"))?;
        let outcome = self
            .with_client(|client| client.call_tool(tool, args))
            .await?;
        Ok(outcome)
    }
}

/// Exit code for a failed run
pub fn exit_code_for(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<MCPError>() {
        Some(MCPError::Config(_)) => EXIT_CONFIG,
        Some(_) => EXIT_TOOL_SERVER,
        None => EXIT_FAILURE,
    }
}
