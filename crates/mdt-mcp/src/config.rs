//! Configuration types for the tool-server client

use crate::error::Result;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Environment variable the spawned tool server reads its state directory from
pub const CONFIG_DIR_ENV: &str = "CONFIG_DIR";

/// Tool server command used when nothing is configured
pub const DEFAULT_SERVER_COMMAND: &str = "node mcp-server/dist/index.js";

/// Tool-server client configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ClientConfig {
    /// Per-request timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Maximum physical attempts per logical tool call
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay between attempts in milliseconds (multiplied by the attempt number)
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Startup timeout in seconds
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout: u64,

    /// Tools allowed to report recoverable failures as successful formatted text
    ///
    /// Replies from these tools that begin with the error marker stay successful
    /// and the caller interprets the text. Replies of that shape from any other
    /// tool are turned into failures.
    #[serde(default)]
    pub disguised_error_tools: Vec<String>,

    /// Tool server to connect to
    pub server: ServerConfig,
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    500
}

fn default_startup_timeout() -> u64 {
    10
}

impl ClientConfig {
    /// Configuration with defaults for the given server
    #[must_use]
    pub fn new(server: ServerConfig) -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            startup_timeout: default_startup_timeout(),
            disguised_error_tools: Vec::new(),
            server,
        }
    }

    /// Override the per-request timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Override the attempt bound
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Override the base retry delay
    #[must_use]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the disguised-error allow-list
    #[must_use]
    pub fn with_disguised_error_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.disguised_error_tools = tools.into_iter().map(Into::into).collect();
        self
    }

    /// Per-request timeout
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Base retry delay
    #[must_use]
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Startup timeout
    #[must_use]
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout)
    }

    /// Global config path: `<config dir>/mdt/mdt-mcp.toml`
    fn global_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("mdt").join("mdt-mcp.toml"))
    }

    /// Load configuration with a layered approach:
    /// 1. Global config: `<config dir>/mdt/mdt-mcp.toml` (optional)
    /// 2. Local override: `./mdt-mcp.toml` or the explicit `path` (optional / required)
    /// 3. Environment variables with the `MDT_MCP__` prefix
    /// 4. Convenience overrides: `MDT_MCP_SERVER`, `MDT_MCP_URL`, `MDT_TIMEOUT`, `MDT_MAX_RETRIES`
    ///
    /// # Errors
    /// Returns an error if a source cannot be read or the result does not deserialize
    pub fn load(path: Option<&Path>) -> Result<Self> {
        // Load .env file from current directory
        dotenvy::dotenv().ok();

        let mut builder = config::Config::builder()
            .set_default("server.transport", "stdio")?
            .set_default("server.command", DEFAULT_SERVER_COMMAND)?;

        if let Some(global) = Self::global_config_path() {
            debug!("Global config candidate: {}", global.display());
            builder = builder.add_source(config::File::from(global).required(false));
        }

        builder = match path {
            Some(path) => builder.add_source(config::File::from(path)),
            None => builder.add_source(config::File::with_name("mdt-mcp").required(false)),
        };

        builder = builder.add_source(config::Environment::with_prefix("MDT_MCP").separator("__"));

        if let Ok(command) = env::var("MDT_MCP_SERVER") {
            builder = builder
                .set_override("server.transport", "stdio")?
                .set_override("server.command", command)?;
        }

        if let Ok(url) = env::var("MDT_MCP_URL") {
            builder = builder
                .set_override("server.transport", "http")?
                .set_override("server.url", url)?;
        }

        if let Some(secs) = parse_env_number::<i64>("MDT_TIMEOUT") {
            builder = builder.set_override("timeout_ms", secs.saturating_mul(1000))?;
        }

        if let Some(retries) = parse_env_number::<i64>("MDT_MAX_RETRIES") {
            builder = builder.set_override("max_retries", retries)?;
        }

        let config: Self = builder.build()?.try_deserialize()?;
        Ok(config)
    }
}

/// Read a numeric environment variable, ignoring unparseable values
fn parse_env_number<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring {}={:?}: not a number", key, raw);
            None
        }
    }
}

/// Tool server configuration
#[derive(Debug, Deserialize, Clone)]
#[serde(untagged)]
pub enum ServerConfig {
    /// Simple form: a command line or an `http(s)://` base URL
    Simple(String),

    /// Explicit transport table
    Advanced(TransportConfig),
}

/// Transport configuration, tagged by `transport = "stdio" | "http"`
#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "transport", rename_all = "lowercase")]
pub enum TransportConfig {
    /// Spawn the tool server and talk over stdin/stdout
    Stdio {
        /// Command to execute (e.g. `"node"` or `"node dist/index.js"`)
        command: String,

        /// Optional separate arguments list
        ///
        /// If provided, `command` is treated as the program name only.
        /// If omitted, `command` is split on whitespace into program + args.
        #[serde(default)]
        args: Vec<String>,

        /// Working directory for the child process
        #[serde(default)]
        cwd: Option<PathBuf>,

        /// Extra environment variables for the child process
        #[serde(default)]
        env: HashMap<String, String>,

        /// State directory exported to the child as `CONFIG_DIR`
        #[serde(default)]
        config_dir: Option<PathBuf>,
    },

    /// POST each request to `<url>/mcp`
    Http {
        /// Base URL
        url: String,
    },
}

/// Everything needed to spawn the tool server
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ServerCommand {
    /// Program to execute
    pub program: String,
    /// Command-line arguments
    pub args: Vec<String>,
    /// Working directory
    pub cwd: Option<PathBuf>,
    /// Environment variables
    pub env: HashMap<String, String>,
    /// State directory exported as [`CONFIG_DIR_ENV`]
    pub config_dir: Option<PathBuf>,
}

impl ServerCommand {
    /// Parse a whitespace-separated command line
    #[must_use]
    pub fn from_command_line(command: &str) -> Self {
        let mut parts = command.split_whitespace().map(ToString::to_string);
        let program = parts.next().unwrap_or_else(|| command.to_string());
        Self {
            program,
            args: parts.collect(),
            ..Self::default()
        }
    }
}

/// Detected transport type with all parameters needed to start a connection
#[derive(Debug, Clone, PartialEq)]
pub enum TransportType {
    /// Child process over stdio
    Stdio(ServerCommand),
    /// HTTP endpoint base URL
    Http(String),
}

impl ServerConfig {
    /// Detect transport type from configuration
    #[must_use]
    pub fn detect_transport(&self) -> TransportType {
        match self {
            ServerConfig::Simple(s) => {
                if s.starts_with("http://") || s.starts_with("https://") {
                    TransportType::Http(s.clone())
                } else {
                    TransportType::Stdio(ServerCommand::from_command_line(s))
                }
            }
            ServerConfig::Advanced(TransportConfig::Stdio {
                command,
                args,
                cwd,
                env,
                config_dir,
            }) => {
                let mut server = if args.is_empty() {
                    // No explicit args: split the command string like the simple form
                    ServerCommand::from_command_line(command)
                } else {
                    ServerCommand {
                        program: command.clone(),
                        args: args.clone(),
                        ..ServerCommand::default()
                    }
                };
                server.cwd.clone_from(cwd);
                server.env.clone_from(env);
                server.config_dir.clone_from(config_dir);
                TransportType::Stdio(server)
            }
            ServerConfig::Advanced(TransportConfig::Http { url }) => TransportType::Http(url.clone()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_config_stdio() {
        let config = ServerConfig::Simple("node dist/index.js --stdio".into());
        assert_eq!(
            config.detect_transport(),
            TransportType::Stdio(ServerCommand {
                program: "node".into(),
                args: vec!["dist/index.js".into(), "--stdio".into()],
                ..ServerCommand::default()
            })
        );
    }

    #[test]
    fn test_simple_config_http() {
        let config = ServerConfig::Simple("http://localhost:3002".into());
        assert_eq!(
            config.detect_transport(),
            TransportType::Http("http://localhost:3002".into())
        );
    }

    #[test]
    fn test_defaults() {
        let config = ClientConfig::new(ServerConfig::Simple("server".into()));
        assert_eq!(config.timeout(), Duration::from_secs(10));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_delay(), Duration::from_millis(500));
        assert!(config.disguised_error_tools.is_empty());
    }

    #[test]
    fn test_builders() {
        let config = ClientConfig::new(ServerConfig::Simple("server".into()))
            .with_timeout(Duration::from_millis(250))
            .with_max_retries(5)
            .with_retry_delay(Duration::from_millis(1))
            .with_disguised_error_tools(["create_cr"]);
        assert_eq!(config.timeout_ms, 250);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.retry_delay_ms, 1);
        assert_eq!(config.disguised_error_tools, vec!["create_cr".to_string()]);
    }

    #[test]
    fn test_toml_stdio_with_env_and_config_dir() {
        let toml_str = r#"
            timeout_ms = 2500
            disguised_error_tools = ["create_cr", "update_cr_status"]

            [server]
            transport = "stdio"
            command = "node"
            args = ["dist/index.js"]
            cwd = "/srv/mcp-server"
            config_dir = "/tmp/mdt-config"
            env = { NODE_ENV = "test" }
        "#;

        let config: ClientConfig = toml::from_str(toml_str).expect("Failed to parse TOML");
        assert_eq!(config.timeout_ms, 2500);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.disguised_error_tools.len(), 2);

        match config.server.detect_transport() {
            TransportType::Stdio(server) => {
                assert_eq!(server.program, "node");
                assert_eq!(server.args, vec!["dist/index.js"]);
                assert_eq!(server.cwd, Some(PathBuf::from("/srv/mcp-server")));
                assert_eq!(server.config_dir, Some(PathBuf::from("/tmp/mdt-config")));
                assert_eq!(server.env.get("NODE_ENV").unwrap(), "test");
            }
            TransportType::Http(_) => panic!("Expected Stdio transport"),
        }
    }

    #[test]
    fn test_toml_stdio_command_split() {
        let toml_str = r#"
            [server]
            transport = "stdio"
            command = "npx -y mdt-mcp-server"
        "#;

        let config: ClientConfig = toml::from_str(toml_str).expect("Failed to parse TOML");
        match config.server.detect_transport() {
            TransportType::Stdio(server) => {
                assert_eq!(server.program, "npx");
                assert_eq!(server.args, vec!["-y", "mdt-mcp-server"]);
            }
            TransportType::Http(_) => panic!("Expected Stdio transport"),
        }
    }

    #[test]
    fn test_toml_http() {
        let toml_str = r#"
            max_retries = 1

            [server]
            transport = "http"
            url = "http://localhost:3002"
        "#;

        let config: ClientConfig = toml::from_str(toml_str).expect("Failed to parse TOML");
        assert_eq!(config.max_retries, 1);
        assert_eq!(
            config.server.detect_transport(),
            TransportType::Http("http://localhost:3002".into())
        );
    }

    #[test]
    fn test_toml_simple_server_string() {
        let config: ClientConfig =
            toml::from_str(r#"server = "https://tools.example.com""#).expect("Failed to parse TOML");
        assert_eq!(
            config.server.detect_transport(),
            TransportType::Http("https://tools.example.com".into())
        );
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = std::env::temp_dir().join(format!("mdt-mcp-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("client.toml");
        std::fs::write(
            &path,
            "retry_delay_ms = 5\n[server]\ntransport = \"stdio\"\ncommand = \"node server.js\"\n",
        )
        .unwrap();

        let config = ClientConfig::load(Some(&path)).unwrap();
        assert_eq!(config.retry_delay_ms, 5);

        std::fs::remove_dir_all(&dir).ok();
    }
}
