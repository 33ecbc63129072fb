//! CLI argument definitions using clap.

use clap::{Parser, Subcommand};
use observability::LogFormat;
use std::path::PathBuf;

/// Autoflush - batch items and hand them to a handler by size or time
#[derive(Parser, Debug)]
#[command(
    name = "autoflush",
    author,
    version,
    about = "Size- and time-triggered batching buffer",
    long_about = "Drives an autoflush buffer with synthetic producers.\n\n\
                  Items are sealed into batches when the buffer reaches max_len or when \n\
                  the flush interval fires, and handed to the configured handler by a \n\
                  fixed pool of workers."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "AUTOFLUSH_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        default_value = "pretty",
        global = true,
        env = "AUTOFLUSH_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run synthetic producers against a buffer
    Run(RunArgs),

    /// Validate configuration file without running
    Validate(ValidateArgs),
}

/// Arguments for the `run` command
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Path to configuration file (TOML or JSON); built-in defaults when omitted
    #[arg(short, long, env = "AUTOFLUSH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override buffer.max_len
    #[arg(long, env = "AUTOFLUSH_MAX_LEN")]
    pub max_len: Option<usize>,

    /// Override buffer.parallelism
    #[arg(long, env = "AUTOFLUSH_PARALLELISM")]
    pub parallelism: Option<usize>,

    /// Override buffer.interval_ms
    #[arg(long, env = "AUTOFLUSH_INTERVAL_MS")]
    pub interval_ms: Option<u64>,

    /// Override load.producers
    #[arg(long)]
    pub producers: Option<usize>,

    /// Override load.items_per_producer
    #[arg(long)]
    pub items: Option<u64>,

    /// Override load.batch_size
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Validate configuration and exit without running
    #[arg(long)]
    pub dry_run: bool,

    /// Metrics server port (0 = disabled)
    #[arg(long, default_value = "0", env = "AUTOFLUSH_METRICS_PORT")]
    pub metrics_port: u16,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file to validate
    #[arg(short, long, default_value = "autoflush.toml")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_overrides_parse() {
        let cli = Cli::try_parse_from([
            "autoflush",
            "run",
            "--max-len",
            "32",
            "--producers",
            "2",
            "--dry-run",
        ])
        .unwrap();
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.max_len, Some(32));
                assert_eq!(args.producers, Some(2));
                assert!(args.config.is_none());
                assert!(args.dry_run);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_log_format_parse() {
        let cli = Cli::try_parse_from(["autoflush", "--log-format", "json", "validate"]).unwrap();
        assert_eq!(cli.log_format, LogFormat::Json);
        assert!(Cli::try_parse_from(["autoflush", "--log-format", "xml", "validate"]).is_err());
    }

    #[test]
    fn test_quiet_conflicts_with_verbose() {
        assert!(Cli::try_parse_from(["autoflush", "-q", "-v", "validate"]).is_err());
    }
}
