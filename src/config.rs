//! Configuration Module
//!
//! This module defines the configuration structures consumed at construction
//! time. Configuration is loaded from TOML files and parsed using serde.
//! Nothing in the pipeline reads configuration after construction; values are
//! handed over as immutable structs.

use crate::batch::BatchOptions;
use serde::Deserialize;
use std::fs;
use std::time::Duration;

/// Main configuration structure
///
/// # Example TOML
/// ```toml
/// [broadcast]
/// batch_size = 200
/// batch_timeout_ms = 500
/// agent_timeout_ms = 120000
///
/// [database]
/// url = "sqlite://batchpin.db"
/// max_connections = 4
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub broadcast: BroadcastConfig,
    pub database: DatabaseConfig,
}

/// Batching options the broadcast dispatcher registers with the batch manager
///
/// # Fields
/// - `batch_size`: Maximum number of messages per batch
/// - `batch_timeout_ms`: How long a partial batch may wait before it is sealed
/// - `agent_timeout_ms`: How long an idle batch agent lives before disposal
#[derive(Debug, Clone, Deserialize)]
pub struct BroadcastConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_batch_timeout_ms")]
    pub batch_timeout_ms: u64,
    #[serde(default = "default_agent_timeout_ms")]
    pub agent_timeout_ms: u64,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            batch_timeout_ms: default_batch_timeout_ms(),
            agent_timeout_ms: default_agent_timeout_ms(),
        }
    }
}

fn default_batch_size() -> usize {
    200
}

fn default_batch_timeout_ms() -> u64 {
    500
}

fn default_agent_timeout_ms() -> u64 {
    120_000
}

impl From<&BroadcastConfig> for BatchOptions {
    fn from(cfg: &BroadcastConfig) -> Self {
        BatchOptions {
            batch_max_size: cfg.batch_size,
            batch_timeout: Duration::from_millis(cfg.batch_timeout_ms),
            dispose_timeout: Duration::from_millis(cfg.agent_timeout_ms),
        }
    }
}

/// Database configuration
///
/// # Fields
/// - `url`: Database connection URL (e.g., "sqlite://batchpin.db")
/// - `max_connections`: Size of the connection pool. In-memory databases
///   (`sqlite::memory:`) always use a single connection.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    4
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    /// * `path` - Path to the TOML configuration file
    ///
    /// # Returns
    /// * `Ok(Config)` if the file was successfully loaded and parsed
    /// * `Err` if the file couldn't be read or the TOML is invalid
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        if config.broadcast.batch_size == 0 {
            anyhow::bail!("broadcast.batch_size must be at least 1");
        }
        Ok(config)
    }

    /// Batch options for the broadcast dispatcher
    pub fn batch_options(&self) -> BatchOptions {
        BatchOptions::from(&self.broadcast)
    }
}
