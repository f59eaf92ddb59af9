//! `tracing` subscriber set-up for the sync job.

use crate::config::Config;
use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "ghsa_sync=info,warn";

/// Install the global subscriber.
///
/// With `log_to_file`, output goes to a daily-rotated `ghsa-sync.log` in
/// `log_dir` and the returned guard must be held until shutdown so buffered
/// lines are flushed. Otherwise logs go to stdout and no guard is returned.
pub fn init_logging(config: &Config) -> Result<Option<WorkerGuard>> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    if config.log_to_file {
        std::fs::create_dir_all(&config.log_dir)
            .with_context(|| format!("creating log directory {}", config.log_dir.display()))?;
        let file_appender = rolling::daily(&config.log_dir, "ghsa-sync.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
            .try_init()
            .context("installing file subscriber")?;

        Ok(Some(guard))
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .try_init()
            .map_err(|e| anyhow::anyhow!("installing stdout subscriber: {e}"))?;

        Ok(None)
    }
}
