use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use roster_commit::PipelineConfig;

use crate::db::DbConfig;

/// Backing store for assignments and commit reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Postgres,
    Memory,
}

impl std::str::FromStr for StoreKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "pg" => Ok(Self::Postgres),
            "memory" | "mem" => Ok(Self::Memory),
            other => bail!("unknown store '{other}', expected 'postgres' or 'memory'"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub log_level: String,
    pub dev_mode: bool,
    pub store: StoreKind,
    pub pipeline: PipelineConfig,
    pub database: DbConfig,
}

fn env_millis(name: &str) -> Result<Option<Duration>> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => {
            let ms: u64 = v
                .trim()
                .parse()
                .with_context(|| format!("{name} must be a number of milliseconds"))?;
            Ok(Some(Duration::from_millis(ms)))
        }
        _ => Ok(None),
    }
}

fn env_usize(name: &str, default: usize) -> Result<usize> {
    match std::env::var(name) {
        Ok(v) => v
            .trim()
            .parse()
            .with_context(|| format!("{name} must be a positive integer")),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let listen_addr = std::env::var("ROSTER_LISTEN_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8080".to_string())
            .parse()?;

        let log_level = std::env::var("ROSTER_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let dev_mode = std::env::var("ROSTER_DEV")
            .map(|v| v == "1" || v.to_lowercase() == "true")
            .unwrap_or(false);

        let store = std::env::var("ROSTER_STORE")
            .unwrap_or_else(|_| "postgres".to_string())
            .parse()?;

        let defaults = PipelineConfig::default();
        let pipeline = PipelineConfig {
            batch_size: env_usize("ROSTER_BATCH_SIZE", defaults.batch_size)?,
            batch_timeout: env_millis("ROSTER_BATCH_TIMEOUT_MS")?,
            operation_timeout: env_millis("ROSTER_COMMIT_TIMEOUT_MS")?,
            max_parallel_rosters: env_usize(
                "ROSTER_MAX_PARALLEL_ROSTERS",
                defaults.max_parallel_rosters,
            )?,
        };

        let database = DbConfig::from_env();

        Ok(Self {
            listen_addr,
            log_level,
            dev_mode,
            store,
            pipeline,
            database,
        })
    }
}
