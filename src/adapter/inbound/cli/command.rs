//! Command-line interface definitions.
//!
//! Defines the CLI structure for the marketsync service using `clap`.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Prediction market indexer and contract-call service
#[derive(Parser, Debug)]
#[command(name = "marketsync")]
#[command(version)]
pub struct Cli {
    /// Configuration file; environment variables alone are used when it is missing
    #[arg(short, long, global = true, default_value = "config.toml")]
    pub config: PathBuf,

    /// JSON output for scripting
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the indexer and contract-call queue until Ctrl+C
    Run(RunArgs),

    /// Validate configuration and report health
    Check(CheckArgs),
}

/// Arguments for `marketsync run`.
#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Override the log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Emit JSON logs
    #[arg(long)]
    pub json_logs: bool,

    /// Override the database path (`:memory:` for an in-memory store)
    #[arg(long)]
    pub database: Option<PathBuf>,

    /// Override the first block indexed when no cursor is stored
    #[arg(long)]
    pub start_block: Option<u64>,
}

/// Arguments for `marketsync check`.
#[derive(Args, Debug, Default)]
pub struct CheckArgs {
    /// Also query the RPC endpoint for its head block
    #[arg(long)]
    pub live: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_overrides() {
        let cli = Cli::parse_from([
            "marketsync",
            "--config",
            "other.toml",
            "run",
            "--log-level",
            "debug",
            "--start-block",
            "42",
        ]);
        assert_eq!(cli.config, PathBuf::from("other.toml"));
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert_eq!(args.start_block, Some(42));
        assert!(!args.json_logs);
    }

    #[test]
    fn parses_check_with_global_json() {
        let cli = Cli::parse_from(["marketsync", "check", "--live", "--json"]);
        assert!(cli.json);
        assert!(matches!(cli.command, Commands::Check(CheckArgs { live: true })));
    }
}
