//! fimwatch - File Integrity Monitor
//!
//! Entry point for the CLI application.

use anyhow::{Context, Result};
use clap::Parser;
use fimwatch::config::{CliArgs, MonitorConfig};
use fimwatch::monitor::FimEngine;
use fimwatch::progress::{print_header, print_scan_summary};
use fimwatch::store::SqliteStore;
use fimwatch::transport::{EventSink, JsonLinesSink};
use std::fs::File;
use std::io;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::error;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let args = CliArgs::parse();
    setup_logging(args.verbose)?;

    let config = MonitorConfig::from_args(args).context("Invalid configuration")?;

    let store = if config.db_path == ":memory:" {
        SqliteStore::open_in_memory(enabled_limit(&config))
    } else {
        SqliteStore::open(&config.db_path, enabled_limit(&config))
    }
    .with_context(|| format!("Failed to open entry database '{}'", config.db_path))?;

    let sink: Arc<dyn EventSink> = if config.output_path == "-" {
        Arc::new(JsonLinesSink::new(io::stdout()))
    } else {
        let file = File::create(&config.output_path)
            .with_context(|| format!("Failed to create event output '{}'", config.output_path))?;
        Arc::new(JsonLinesSink::new(file))
    };

    if config.show_summary {
        print_header(
            &config
                .dirs
                .iter()
                .map(|d| d.path.clone())
                .collect::<Vec<_>>(),
            &config.db_path,
            &config.output_path,
        );
    }

    let interval = config.interval;
    let show_summary = config.show_summary;
    let db_path = config.db_path.clone();

    let engine = FimEngine::new(Arc::new(config), store, sink);

    // First Ctrl+C stops cleanly at the next directory boundary; a second
    // one force-exits
    let shutdown = engine.shutdown_flag();
    let interrupts = Arc::new(AtomicU32::new(0));
    let interrupts_handler = Arc::clone(&interrupts);
    let shutdown_handler = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        if interrupts_handler.fetch_add(1, Ordering::SeqCst) == 0 {
            eprintln!("\nInterrupt received, shutting down gracefully...");
            eprintln!("Press Ctrl+C again to force exit immediately.");
            shutdown_handler.store(true, Ordering::SeqCst);
        } else {
            eprintln!("\nForced exit!");
            std::process::exit(130);
        }
    })
    .context("Failed to set signal handler")?;

    loop {
        let summary = engine.scan();

        if show_summary {
            let db_size = if db_path == ":memory:" {
                None
            } else {
                std::fs::metadata(&db_path).map(|m| m.len()).ok()
            };
            print_scan_summary(&summary, db_size);
        }

        if interval == 0 || !sleep_between_scans(interval, &shutdown) {
            break;
        }
    }

    Ok(())
}

/// Wait out the scan interval in one-second slices so an interrupt ends
/// the wait promptly. Returns false once the shutdown flag is set.
fn sleep_between_scans(interval: u64, shutdown: &AtomicBool) -> bool {
    for _ in 0..interval {
        if shutdown.load(Ordering::SeqCst) {
            return false;
        }
        std::thread::sleep(Duration::from_secs(1));
    }
    !shutdown.load(Ordering::SeqCst)
}

fn enabled_limit(config: &MonitorConfig) -> Option<usize> {
    if config.file_limit_enabled {
        Some(config.file_limit)
    } else {
        None
    }
}

fn setup_logging(verbose: bool) -> Result<()> {
    let default_filter = if verbose { "fimwatch=debug" } else { "fimwatch=info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {e}"))?;

    Ok(())
}
