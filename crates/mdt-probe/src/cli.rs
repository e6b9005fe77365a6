//! Command-line arguments

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Probe an MDT tool server from the command line
#[derive(Parser, Debug)]
#[command(name = "mdt-probe", version, about)]
pub struct Cli {
    /// Configuration file (defaults to ./mdt-mcp.toml if present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, env = "MDT_DEBUG", global = true)]
    pub debug: bool,

    /// Log output format: pretty or json
    #[arg(long, env = "MDT_LOG_FORMAT", default_value = "pretty", global = true)]
    pub log_format: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List the tools the server advertises
    List,
    /// Call one tool and print its outcome
    Call {
        /// Tool name
        tool: String,
        /// Arguments as a JSON value (an object, usually)
        #[arg(default_value = "{}")]
        args: String,
    },
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_call_with_args() {
        let cli = Cli::try_parse_from([
            "mdt-probe",
            "--config",
            "probe.toml",
            "call",
            "get_cr",
            r#"{"key":"MDT-1"}"#,
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("probe.toml")));
        match cli.command {
            Command::Call { tool, args } => {
                assert_eq!(tool, "get_cr");
                assert_eq!(args, r#"{"key":"MDT-1"}"#);
            }
            Command::List => panic!("expected call"),
        }
    }

    #[test]
    fn test_call_args_default_to_empty_object() {
        let cli = Cli::try_parse_from(["mdt-probe", "call", "list_projects"]).unwrap();
        assert!(matches!(cli.command, Command::Call { ref args, .. } if args == "{}"));
    }

    #[test]
    fn test_subcommand_required() {
        assert!(Cli::try_parse_from(["mdt-probe"]).is_err());
    }
}
