//! `run` command implementation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use autoflush::{AutoflushError, Buffer, FlushContext};
use contracts::RunConfig;
use observability::{MetricsCollector, SpanTracer};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::cli::RunArgs;
use crate::pipeline::{spawn_producers, ProducerConfig, RunHandler, RunStats};

/// Capacity of the errors sink; overflow is dropped by the buffer
const ERRORS_CAPACITY: usize = 256;

/// Execute the `run` command
pub async fn run_buffer(args: &RunArgs) -> Result<()> {
    let mut config = load_config(args)?;
    apply_overrides(&mut config, args);
    config
        .buffer
        .check()
        .context("Invalid buffer settings after CLI overrides")?;
    if config.load.producers == 0 || config.load.batch_size == 0 {
        anyhow::bail!("load.producers and load.batch_size must be at least 1");
    }

    info!(
        max_len = config.buffer.max_len,
        max_flushes = config.buffer.max_flushes,
        parallelism = config.buffer.parallelism(),
        interval_ms = config.buffer.interval_ms,
        handler = ?config.handler.kind,
        producers = config.load.producers,
        items_per_producer = config.load.items_per_producer,
        "Configuration loaded"
    );

    if args.dry_run {
        info!("Dry run mode - configuration is valid, exiting");
        print_config_summary(&config);
        return Ok(());
    }

    let stats = run(&config).await?;
    info!(
        items_added = stats.items_added,
        items_handled = stats.batches.items,
        batches = stats.batches.batches,
        errors = stats.errors,
        duration_secs = stats.duration.as_secs_f64(),
        "Run completed"
    );
    stats.print_summary();

    info!("Autoflush finished");
    Ok(())
}

async fn run(config: &RunConfig) -> Result<RunStats> {
    let handler = RunHandler::from_config(&config.handler).context("Failed to create handler")?;
    let batch_stats = handler.stats();

    let (errors_tx, errors_rx) = mpsc::channel(ERRORS_CAPACITY);
    let error_count = Arc::new(AtomicU64::new(0));
    let error_task = tokio::spawn(log_errors(errors_rx, Arc::clone(&error_count)));

    let buffer = Arc::new(
        Buffer::builder(handler)
            .config(&config.buffer)
            .errors(errors_tx)
            .stats(Arc::new(MetricsCollector::new()))
            .tracer(Arc::new(SpanTracer::new()))
            .build()
            .context("Failed to build buffer")?,
    );

    let started = buffer.notify_started();
    let runner = {
        let buffer = Arc::clone(&buffer);
        tokio::spawn(async move { buffer.start().await })
    };
    started.await;

    let cancel = FlushContext::background();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            warn!("Received shutdown signal, stopping producers...");
            cancel.cancel();
        })
    };

    let start = Instant::now();
    let mut producers = spawn_producers(&buffer, &ProducerConfig::from(&config.load), &cancel);
    let mut items_added = 0;
    while let Some(joined) = producers.join_next().await {
        match joined {
            Ok(added) => items_added += added,
            Err(e) => warn!(error = %e, "Producer task failed"),
        }
    }
    watcher.abort();
    let interrupted = cancel.is_done();

    info!(items_added, "Producers finished, stopping buffer");
    buffer.stop().await.context("Failed to stop buffer")?;
    match runner.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "Buffer exited with error"),
        Err(e) => warn!(error = %e, "Buffer task failed"),
    }
    let duration = start.elapsed();

    // the errors task ends once every sender held by the buffer is gone
    drop(buffer);
    if tokio::time::timeout(Duration::from_secs(1), error_task)
        .await
        .is_err()
    {
        warn!("Errors sink still open after stop");
    }

    let batches = batch_stats
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .summary();
    Ok(RunStats {
        items_added,
        errors: error_count.load(Ordering::Relaxed),
        interrupted,
        duration,
        batches,
    })
}

fn load_config(args: &RunArgs) -> Result<RunConfig> {
    let Some(path) = &args.config else {
        info!("No configuration file given, using defaults");
        return Ok(RunConfig::default());
    };
    info!(config = %path.display(), "Loading configuration");

    if !path.exists() {
        anyhow::bail!("Configuration file not found: {}", path.display());
    }
    config_loader::ConfigLoader::load_from_path(path)
        .with_context(|| format!("Failed to load config from {}", path.display()))
}

fn apply_overrides(config: &mut RunConfig, args: &RunArgs) {
    if let Some(max_len) = args.max_len {
        info!(max_len, "Overriding buffer.max_len from CLI");
        config.buffer.max_len = max_len;
    }
    if let Some(parallelism) = args.parallelism {
        info!(parallelism, "Overriding buffer.parallelism from CLI");
        config.buffer.parallelism = Some(parallelism);
    }
    if let Some(interval_ms) = args.interval_ms {
        info!(interval_ms, "Overriding buffer.interval_ms from CLI");
        config.buffer.interval_ms = interval_ms;
    }
    if let Some(producers) = args.producers {
        config.load.producers = producers;
    }
    if let Some(items) = args.items {
        config.load.items_per_producer = items;
    }
    if let Some(batch_size) = args.batch_size {
        config.load.batch_size = batch_size;
    }
}

async fn log_errors(mut errors: mpsc::Receiver<AutoflushError>, count: Arc<AtomicU64>) {
    while let Some(err) = errors.recv().await {
        count.fetch_add(1, Ordering::Relaxed);
        warn!(error = %err, "Buffer reported error");
    }
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Print configuration summary for dry-run mode
fn print_config_summary(config: &RunConfig) {
    println!("\n=== Configuration Summary ===\n");
    println!("Buffer:");
    println!("  max_len: {}", config.buffer.max_len);
    println!("  max_flushes: {}", config.buffer.max_flushes);
    println!("  parallelism: {}", config.buffer.parallelism());
    println!("  interval: {}ms", config.buffer.interval_ms);
    println!(
        "  shutdown grace period: {}ms",
        config.buffer.shutdown_grace_period_ms
    );
    println!("\nHandler: {:?}", config.handler.kind);
    for (key, value) in &config.handler.params {
        println!("  {key} = {value}");
    }
    println!("\nLoad:");
    println!("  producers: {}", config.load.producers);
    println!("  items per producer: {}", config.load.items_per_producer);
    println!("  batch size: {}", config.load.batch_size);
    if !config.load.labels.is_empty() {
        println!("  labels: {:?}", config.load.labels);
    }
    println!();
}
