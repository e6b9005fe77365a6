mod cli;
mod service;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Command};
use mdt_logging::LogFormat;
use mdt_mcp::ClientConfig;
use service::{exit_code_for, ProbeService, EXIT_CONFIG, EXIT_OK, EXIT_TOOL_SERVER};
use std::process::ExitCode;
use tracing::error;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.debug { "debug" } else { "info" };
    let format = cli.log_format.parse().unwrap_or_else(|e| {
        eprintln!("{e}; falling back to pretty logs");
        LogFormat::Pretty
    });
    if let Err(e) = mdt_logging::init_logging(level, format) {
        eprintln!("Failed to initialize logging: {e}");
    }

    // Load configuration
    let config = match ClientConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    match run(cli.command, &config).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(exit_code_for(&e))
        }
    }
}

/// Run one command, printing its JSON result to stdout
async fn run(command: Command, config: &ClientConfig) -> Result<u8> {
    let service = ProbeService::new(config)?;

    match command {
        Command::List => {
            let tools = service.list().await?;
            println!("{tools:#}");
            Ok(EXIT_OK)
        }
        Command::Call { tool, args } => {
            let outcome = service.call(&tool, &args).await?;
            println!("{:#}", serde_json::to_value(&outcome)?);
            Ok(if outcome.is_success() {
                EXIT_OK
            } else {
                EXIT_TOOL_SERVER
            })
        }
    }
}
