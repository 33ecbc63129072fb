//! `validate` command implementation.

use anyhow::{Context, Result};
use contracts::{HandlerKind, RunConfig};
use serde::Serialize;
use tracing::info;

use crate::cli::ValidateArgs;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ConfigSummary>,
}

#[derive(Serialize)]
struct ConfigSummary {
    max_len: usize,
    max_flushes: usize,
    parallelism: usize,
    interval_ms: u64,
    shutdown_grace_period_ms: u64,
    handler: String,
    producers: usize,
    items_per_producer: u64,
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating configuration");

    let result = validate_config(args);

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{}", json);
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        anyhow::bail!("Configuration validation failed")
    }
}

fn validate_config(args: &ValidateArgs) -> ValidationResult {
    let config_path = args.config.display().to_string();

    if !args.config.exists() {
        return ValidationResult {
            valid: false,
            config_path,
            error: Some(format!("File not found: {}", args.config.display())),
            warnings: None,
            summary: None,
        };
    }

    match config_loader::ConfigLoader::load_from_path(&args.config) {
        Ok(config) => {
            let warnings = collect_warnings(&config);
            ValidationResult {
                valid: true,
                config_path,
                error: None,
                warnings: if warnings.is_empty() {
                    None
                } else {
                    Some(warnings)
                },
                summary: Some(ConfigSummary {
                    max_len: config.buffer.max_len,
                    max_flushes: config.buffer.max_flushes,
                    parallelism: config.buffer.parallelism(),
                    interval_ms: config.buffer.interval_ms,
                    shutdown_grace_period_ms: config.buffer.shutdown_grace_period_ms,
                    handler: format!("{:?}", config.handler.kind),
                    producers: config.load.producers,
                    items_per_producer: config.load.items_per_producer,
                }),
            }
        }
        Err(e) => ValidationResult {
            valid: false,
            config_path,
            error: Some(e.to_string()),
            warnings: None,
            summary: None,
        },
    }
}

/// Collect configuration warnings (non-fatal issues)
fn collect_warnings(config: &RunConfig) -> Vec<String> {
    let mut warnings = Vec::new();
    let buffer = &config.buffer;

    if buffer.shutdown_grace_period_ms == 0 {
        warnings.push(
            "buffer.shutdown_grace_period_ms is 0 - queued flushes are abandoned on stop"
                .to_string(),
        );
    } else if buffer.shutdown_grace_period_ms < buffer.interval_ms {
        warnings.push(format!(
            "shutdown grace period ({}ms) is shorter than the flush interval ({}ms)",
            buffer.shutdown_grace_period_ms, buffer.interval_ms
        ));
    }

    if config.load.batch_size > buffer.max_len {
        warnings.push(format!(
            "load.batch_size ({}) exceeds buffer.max_len ({}) - each call seals several flushes",
            config.load.batch_size, buffer.max_len
        ));
    }

    if buffer.max_flushes < buffer.parallelism() {
        warnings.push(format!(
            "buffer.max_flushes ({}) is below parallelism ({}) - some workers may stay idle",
            buffer.max_flushes,
            buffer.parallelism()
        ));
    }

    match config.handler.kind {
        HandlerKind::Log if !config.handler.params.is_empty() => {
            warnings.push("handler.params are ignored by the log handler".to_string());
        }
        HandlerKind::File if config.handler.params.is_empty() => {
            warnings.push("no file handler path given - writing to ./output/flushes.jsonl".to_string());
        }
        _ => {}
    }

    warnings
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Configuration is valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            println!("\n  max_len: {}", summary.max_len);
            println!("  max_flushes: {}", summary.max_flushes);
            println!("  parallelism: {}", summary.parallelism);
            println!("  interval: {}ms", summary.interval_ms);
            println!("  shutdown grace: {}ms", summary.shutdown_grace_period_ms);
            println!("  handler: {}", summary.handler);
            println!(
                "  load: {} producers x {} items",
                summary.producers, summary.items_per_producer
            );
        }

        if let Some(ref warnings) = result.warnings {
            println!("\n⚠ Warnings:");
            for warning in warnings {
                println!("  - {}", warning);
            }
        }
    } else {
        println!("✗ Configuration is invalid: {}", result.config_path);
        if let Some(ref error) = result.error {
            println!("\n  Error: {}", error);
        }
    }
}
