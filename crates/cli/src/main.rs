//! # Autoflush CLI
//!
//! 命令行接口入口点。
//!
//! 提供：
//! - 配置加载与验证
//! - 以合成负载驱动缓冲区
//! - 优雅关闭处理

mod cli;
mod commands;
mod pipeline;

use anyhow::Result;
use clap::Parser;
use observability::ObservabilityConfig;
use tracing::info;

use cli::{Cli, Commands};
use commands::{run_buffer, run_validate};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    observability::init_with_config(observability_config(&cli))?;

    info!(version = env!("CARGO_PKG_VERSION"), "Autoflush CLI starting");

    let result = match &cli.command {
        Commands::Run(args) => run_buffer(args).await,
        Commands::Validate(args) => run_validate(args),
    };

    if let Err(ref e) = result {
        tracing::error!(error = %e, "Command failed");
    }

    result
}

/// Logging follows -v/-q and --log-format; Prometheus only for a real run with a port
fn observability_config(cli: &Cli) -> ObservabilityConfig {
    let metrics_port = match &cli.command {
        Commands::Run(args) if !args.dry_run && args.metrics_port != 0 => Some(args.metrics_port),
        _ => None,
    };
    ObservabilityConfig {
        log_format: cli.log_format,
        metrics_port,
        ..Default::default()
    }
    .with_verbosity(cli.verbose, cli.quiet)
}
