//! Run one sync cycle against the GitHub GraphQL API.
//!
//! Run with:
//! ```bash
//! GHSA_SYNC__GITHUB__TOKEN=ghp_... REDIS_URL=redis://localhost:6379 cargo run --example sync
//! ```
//!
//! Ctrl-C cancels the cycle between round trips; cursors of unfinished
//! collectors are left untouched.

use std::time::{Duration, Instant};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use ghsa_sync::{Config, SyncJob};

/// Upper bound for a whole cycle. A first full advisory sync walks every page.
const CYCLE_TIMEOUT: Duration = Duration::from_secs(1800);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    // Hold the guard until the end of main so file logs are flushed.
    let _guard = ghsa_sync::logging::init_logging(&config)?;

    println!("=== GHSA Sync ===\n");
    println!("API URL: {}", config.api_url);
    println!(
        "Ecosystem: {}",
        config.ecosystem.as_deref().unwrap_or("all ecosystems")
    );
    println!("Page size: {}", config.page_size);
    println!("Cursor backend: {:?}", config.cursor_backend);
    println!("Store: {}", config.redis_url);
    println!();

    let mut job = SyncJob::from_config(&config)?;
    println!("Collectors: {}", job.collector_names().join(", "));

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nCancelling after the current round trip...");
            on_signal.cancel();
        }
    });

    let start = Instant::now();
    match timeout(CYCLE_TIMEOUT, job.run(&cancel)).await {
        Ok(stats) => {
            println!("\nCycle finished in {:.1}s", start.elapsed().as_secs_f64());
            println!("  Collectors run: {}", stats.total_collectors);
            println!("  Succeeded: {}", stats.successful_collectors);
            println!("  Failed: {}", stats.failed_collectors);
            println!("  Skipped: {}", stats.skipped_collectors);
            println!("  Nodes ingested: {}", stats.total_nodes_ingested);
            for (collector, error) in &stats.errors {
                println!("    - {}: {}", collector, error);
            }
            if !stats.is_success() {
                anyhow::bail!("sync cycle incomplete");
            }
        }
        Err(_) => {
            cancel.cancel();
            anyhow::bail!("sync cycle timed out after {}s", CYCLE_TIMEOUT.as_secs());
        }
    }

    Ok(())
}
