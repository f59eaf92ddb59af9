use anyhow::{Context, Result, bail};
use dotenvy::dotenv;
use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::ecosystem::graphql_ecosystem;

pub const DEFAULT_API_URL: &str = "https://api.github.com/graphql";
pub const DEFAULT_PAGE_SIZE: usize = 100;
/// Largest `first:` the GitHub GraphQL API accepts on a connection.
pub const MAX_PAGE_SIZE: usize = 100;

/// Where durable cursors are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CursorBackend {
    File,
    Redis,
    /// Process-local; every run starts from the beginning. For dry runs.
    Memory,
}

impl FromStr for CursorBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(Self::File),
            "redis" => Ok(Self::Redis),
            "memory" => Ok(Self::Memory),
            other => bail!("unknown cursor backend '{other}' (expected 'file', 'redis' or 'memory')"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub github_token: String,
    pub api_url: String,
    pub page_size: usize,
    /// GraphQL `SecurityAdvisoryEcosystem` value, `None` for every ecosystem.
    pub ecosystem: Option<String>,
    pub cursor_backend: CursorBackend,
    pub cursor_dir: PathBuf,
    pub advisory_cursor_name: String,
    pub vulnerability_cursor_name: String,
    pub redis_url: String,
    pub http_timeout_secs: u64,
    pub http_max_retries: u32,
    pub log_to_file: bool,
    pub log_dir: PathBuf,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let github_token = env::var("GHSA_SYNC__GITHUB__TOKEN")
            .context("GHSA_SYNC__GITHUB__TOKEN must be set")?;

        let ecosystem = match env::var("GHSA_SYNC__ECOSYSTEM") {
            Ok(raw) => parse_ecosystem(&raw)?,
            Err(_) => Some("NUGET".to_string()),
        };

        let cursor_backend = match env::var("GHSA_SYNC__CURSOR__BACKEND") {
            Ok(raw) => raw.parse()?,
            Err(_) => CursorBackend::File,
        };

        let config = Self {
            github_token,
            api_url: env_or("GHSA_SYNC__GITHUB__API_URL", DEFAULT_API_URL),
            page_size: env_parse("GHSA_SYNC__PAGE_SIZE", DEFAULT_PAGE_SIZE)?,
            ecosystem,
            cursor_backend,
            cursor_dir: PathBuf::from(env_or("GHSA_SYNC__CURSOR__DIR", "./cursors")),
            advisory_cursor_name: env_or("GHSA_SYNC__CURSOR__ADVISORY", "advisories.cursor"),
            vulnerability_cursor_name: env_or(
                "GHSA_SYNC__CURSOR__VULNERABILITY",
                "vulnerabilities.cursor",
            ),
            redis_url: env_or("REDIS_URL", "redis://127.0.0.1:6379"),
            http_timeout_secs: env_parse("GHSA_SYNC__HTTP__TIMEOUT_SECS", 60)?,
            http_max_retries: env_parse("GHSA_SYNC__HTTP__MAX_RETRIES", 0)?,
            log_to_file: env_parse("GHSA_SYNC__LOG_TO_FILE", false)?,
            log_dir: PathBuf::from(env_or("GHSA_SYNC__LOG_DIR", "./logs")),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.github_token.trim().is_empty() {
            bail!("GitHub token is empty");
        }
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            bail!(
                "page size {} out of range (1..={MAX_PAGE_SIZE})",
                self.page_size
            );
        }
        if self.advisory_cursor_name == self.vulnerability_cursor_name {
            bail!(
                "advisory and vulnerability collectors must not share cursor '{}'",
                self.advisory_cursor_name
            );
        }
        Ok(())
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid value '{raw}' for {key}: {e}")),
        Err(_) => Ok(default),
    }
}

/// `all` or an empty value disables the ecosystem filter.
fn parse_ecosystem(raw: &str) -> Result<Option<String>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("all") {
        return Ok(None);
    }
    match graphql_ecosystem(trimmed) {
        Some(value) => Ok(Some(value.to_string())),
        None => bail!("unsupported ecosystem '{trimmed}'"),
    }
}
