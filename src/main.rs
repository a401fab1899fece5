//! Photo Manager - load images through the memory and disk caches.
//!
//! This binary loads every path given on the command line with the chosen
//! transform, waits for the disk cache write-backs to finish and reports
//! per-image results plus manager statistics.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use photo_manager::{
    callback_fn, Config, LoadError, ManagerStats, PhotoManager, WorkerPool,
};

/// Outcome of one path, as printed.
#[derive(Debug, Serialize)]
struct LoadReport {
    path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct RunReport {
    results: Vec<LoadReport>,
    stats: ManagerStats,
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse();

    // Initialize logging
    init_logging(config.verbose);

    // Validate configuration
    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let manager_config = config.manager_config();
    let mode = config.load_mode();

    print_banner();
    info!("Configuration:");
    info!("  Cache dir: {}", manager_config.cache_dir.display());
    info!(
        "  Cache: {}MB memory, {}MB disk, {} recycled/size",
        manager_config.memory_cache_size / (1024 * 1024),
        manager_config.disk_cache_size / (1024 * 1024),
        manager_config.max_recycled_per_size
    );
    info!("  Workers: {}", config.workers);
    info!("  Mode: {:?} {}x{}", mode, config.width, config.height);

    let executor = Arc::new(WorkerPool::new(config.workers));
    let manager = match PhotoManager::open(manager_config, executor.clone()).await {
        Ok(manager) => manager,
        Err(e) => {
            error!("Failed to open disk cache: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let (tx, mut rx) = mpsc::unbounded_channel();
    for path in &config.paths {
        let (ok_tx, err_tx) = (tx.clone(), tx.clone());
        let (ok_path, err_path) = (path.clone(), path.clone());
        let callback = callback_fn(
            move |buffer| {
                let _ = ok_tx.send((ok_path.clone(), Ok(buffer.dimensions())));
            },
            move |e: LoadError| {
                let _ = err_tx.send((err_path.clone(), Err(e)));
            },
        );
        manager.request(path, mode, config.width, config.height, callback);
    }
    drop(tx);

    // Results and write-backs both complete inside the pool
    executor.wait_idle().await;

    let mut results = Vec::with_capacity(config.paths.len());
    while let Ok((path, outcome)) = rx.try_recv() {
        results.push(match outcome {
            Ok((width, height)) => LoadReport {
                path,
                width: Some(width),
                height: Some(height),
                error: None,
            },
            Err(e) => LoadReport {
                path,
                width: None,
                height: None,
                error: Some(e.to_string()),
            },
        });
    }

    let failed = results.iter().filter(|r| r.error.is_some()).count();
    let report = RunReport {
        results,
        stats: manager.stats(),
    };

    if config.json {
        match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                error!("Failed to serialize report: {}", e);
                return ExitCode::FAILURE;
            }
        }
    } else {
        print_report(&report);
    }

    if failed > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

/// Print the startup banner.
fn print_banner() {
    let version = env!("CARGO_PKG_VERSION");
    info!("");
    info!("┌─┐┬ ┬┌─┐┌┬┐┌─┐  ┌┬┐┌─┐┌┐┌┌─┐┌─┐┌─┐┬─┐");
    info!("├─┘├─┤│ │ │ │ │  │││├─┤│││├─┤│ ┬├┤ ├┬┘");
    info!("┴  ┴ ┴└─┘ ┴ └─┘  ┴ ┴┴ ┴┘└┘┴ ┴└─┘└─┘┴└─");
    info!("                                 v{}", version);
    info!("");
}

fn print_report(report: &RunReport) {
    for result in &report.results {
        match (&result.error, result.width, result.height) {
            (Some(error), _, _) => println!("✗ {}: {}", result.path.display(), error),
            (None, Some(width), Some(height)) => {
                println!("✓ {}: {}x{}", result.path.display(), width, height)
            }
            _ => println!("? {}", result.path.display()),
        }
    }

    let stats = &report.stats;
    println!();
    println!("Requests:      {}", stats.requests);
    println!("  memory hits: {}", stats.memory_hits);
    println!("  disk hits:   {}", stats.disk_hits);
    println!("  transforms:  {}", stats.transforms);
    println!("  failed:      {}", stats.failed);
    println!(
        "Write-backs:   {} ok, {} failed",
        stats.write_backs, stats.write_back_failures
    );
    println!(
        "Memory cache:  {} entries, {} / {} bytes",
        stats.memory_entries, stats.memory_bytes, stats.memory_capacity
    );
    println!(
        "Buffer pool:   {} tracked, {} pooled ({} bytes)",
        stats.tracked_buffers, stats.pooled_buffers, stats.pooled_bytes
    );
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "photo_manager=debug"
    } else {
        "photo_manager=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
