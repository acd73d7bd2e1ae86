//! quiet-window - replay interaction scripts through the idle scheduler.
//!
//! Reads a script (stdin by default) of interactions, task registrations and
//! sleeps, and reports when each task runs and with what deadline.

use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use quiet_window::Config;
use quiet_window::IdleRuntime;
use quiet_window::IdleScheduler;
use quiet_window::LineSource;
use quiet_window::SchedulerStatus;
use quiet_window::replay::Replay;
use quiet_window::replay::TaskRecord;
use tokio::io::AsyncBufRead;
use tokio::io::BufReader;
use tracing::info;
use tracing::warn;
use tracing_subscriber::EnvFilter;

/// Interaction-aware idle callback scheduler.
///
/// Replays a script of interactions and task registrations in real time.
#[derive(Parser, Debug)]
#[command(name = "quiet-window")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to config file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Script to replay (defaults to stdin).
    script: Option<PathBuf>,

    /// Live interaction feed, one tag per line (a file or FIFO).
    #[arg(long)]
    interactions: Option<PathBuf>,

    /// Override the quiet period in milliseconds.
    #[arg(long)]
    quiet_period_ms: Option<u64>,

    /// Override the default fallback delay in milliseconds.
    #[arg(long)]
    default_fallback_ms: Option<u64>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Print task executions as JSON lines on stdout.
    #[arg(long)]
    print_events: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level)?;

    info!("quiet-window v{} starting", env!("CARGO_PKG_VERSION"));

    let mut config =
        Config::load_or_default(args.config.as_deref()).context("Failed to load configuration")?;

    if let Some(ms) = args.quiet_period_ms {
        config.quiet_period_ms = ms;
    }
    if let Some(ms) = args.default_fallback_ms {
        config.default_fallback_ms = Some(ms);
    }

    info!(
        "Configuration loaded (quiet_period_ms={}, default_fallback_ms={:?})",
        config.quiet_period_ms, config.default_fallback_ms
    );

    let reader: Box<dyn AsyncBufRead + Unpin + Send> = match &args.script {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Failed to open script: {}", path.display()))?;
            Box::new(BufReader::new(file))
        }
        None => Box::new(BufReader::new(tokio::io::stdin())),
    };

    let feed = match &args.interactions {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Failed to open interaction feed: {}", path.display()))?;
            info!("Reading interactions from {}", path.display());
            Some(LineSource::new(BufReader::new(file)))
        }
        None => None,
    };

    run(config, reader, feed, args.print_events).await
}

/// Initialize logging with the specified level.
fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(format!("quiet_window={level}"))
        .or_else(|_| EnvFilter::try_new("info"))
        .context("Invalid log level")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}

/// Replay the script while forwarding the interaction feed, then shut the
/// scheduler down.
async fn run(
    config: Config,
    reader: Box<dyn AsyncBufRead + Unpin + Send>,
    feed: Option<LineSource<BufReader<tokio::fs::File>>>,
    print_events: bool,
) -> Result<()> {
    let runtime = IdleRuntime::start(IdleScheduler::from_config(&config));
    let pump = feed.map(|source| runtime.handle().attach(source));
    let (mut replay, mut records) = Replay::new(runtime.handle());

    let printer = tokio::spawn(async move {
        while let Some(record) = records.recv().await {
            report_task(&record, print_events);
        }
    });

    tokio::select! {
        result = replay.run(reader, |status| report_status(&status, print_events)) => {
            let applied = result.context("Replay failed")?;
            info!("Replay complete, {} commands applied", applied);
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, shutting down");
        }
    }

    drop(replay);
    if let Some(pump) = pump {
        pump.abort();
    }
    let stats = runtime
        .shutdown()
        .await
        .context("Scheduler did not shut down cleanly")?;
    printer.await.context("Event printer failed")?;

    info!(
        "Done: {} immediate, {} flushed, {} by fallback, {} drained, {} cancelled",
        stats.immediate, stats.flushed, stats.fallback_fired, stats.drained, stats.cancelled
    );
    if stats.panicked > 0 {
        warn!("{} callbacks panicked", stats.panicked);
    }

    Ok(())
}

fn report_task(record: &TaskRecord, print_events: bool) {
    if print_events {
        match serde_json::to_string(record) {
            Ok(line) => println!("{line}"),
            Err(e) => warn!("Failed to encode task record: {}", e),
        }
    } else {
        info!(
            "[TASK] {} at {}ms (time_remaining={}ms, did_timeout={})",
            record.label, record.elapsed_ms, record.time_remaining_ms, record.did_timeout
        );
    }
}

fn report_status(status: &SchedulerStatus, print_events: bool) {
    if print_events {
        match serde_json::to_string(status) {
            Ok(line) => println!("{line}"),
            Err(e) => warn!("Failed to encode status: {}", e),
        }
    } else {
        info!(
            "[STATUS] {:?}, {} pending, {} interactions",
            status.state, status.pending, status.stats.interactions
        );
    }
}
