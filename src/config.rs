// src/config.rs

//! Manages coordinator configuration: loading, resolving defaults, and validation.

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;

/// The raw, on-disk shape of the configuration file. Every field has a
/// default so a near-empty TOML file is a valid configuration.
#[derive(Serialize, Deserialize, Debug, Clone)]
struct RawConfig {
    #[serde(default = "default_tick_interval_ms")]
    tick_interval_ms: u64,
    #[serde(default = "default_restart_timeout_ms")]
    restart_timeout_ms: u64,
    #[serde(default = "default_startup_lock_name")]
    coordinator_startup_lock_name: String,
    #[serde(default = "default_election_timeout_ms")]
    election_timeout_ms: u64,
    #[serde(default = "default_raft_data_dir")]
    raft_data_dir: String,
    #[serde(default = "default_bind_address")]
    bind_address: String,
    #[serde(default)]
    seed_nodes: Vec<String>,
    #[serde(default = "default_log_level")]
    log_level: String,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            restart_timeout_ms: default_restart_timeout_ms(),
            coordinator_startup_lock_name: default_startup_lock_name(),
            election_timeout_ms: default_election_timeout_ms(),
            raft_data_dir: default_raft_data_dir(),
            bind_address: default_bind_address(),
            seed_nodes: Vec::new(),
            log_level: default_log_level(),
        }
    }
}

fn default_tick_interval_ms() -> u64 {
    60_000
}
fn default_restart_timeout_ms() -> u64 {
    1_000
}
fn default_startup_lock_name() -> String {
    "coordinator/bootstrap".to_string()
}
fn default_election_timeout_ms() -> u64 {
    5_000
}
fn default_raft_data_dir() -> String {
    "./data/raft".to_string()
}
fn default_bind_address() -> String {
    "127.0.0.1:7070".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

/// Resolved, validated coordinator configuration (§4.10).
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub tick_interval_ms: u64,
    pub restart_timeout_ms: u64,
    pub coordinator_startup_lock_name: String,
    pub election_timeout_ms: u64,
    pub raft_data_dir: String,
    pub bind_address: SocketAddr,
    pub seed_nodes: Vec<String>,
    pub log_level: String,
}

impl CoordinatorConfig {
    /// Creates a new `CoordinatorConfig` by reading and parsing a TOML file,
    /// then validating the resolved result.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        let raw: RawConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse TOML from '{path}'"))?;
        Self::from_raw(raw)
    }

    /// Used when no config file is supplied: an all-defaults configuration.
    pub fn default_config() -> Result<Self> {
        Self::from_raw(RawConfig::default())
    }

    fn from_raw(raw: RawConfig) -> Result<Self> {
        let bind_address = raw
            .bind_address
            .parse()
            .with_context(|| format!("invalid bind_address '{}'", raw.bind_address))?;

        let config = CoordinatorConfig {
            tick_interval_ms: raw.tick_interval_ms,
            restart_timeout_ms: raw.restart_timeout_ms,
            coordinator_startup_lock_name: raw.coordinator_startup_lock_name,
            election_timeout_ms: raw.election_timeout_ms,
            raft_data_dir: raw.raft_data_dir,
            bind_address,
            seed_nodes: raw.seed_nodes,
            log_level: raw.log_level,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validates the resolved configuration to ensure logical consistency.
    fn validate(&self) -> Result<()> {
        if self.tick_interval_ms == 0 {
            return Err(anyhow!("tick_interval_ms cannot be 0"));
        }
        if self.restart_timeout_ms == 0 {
            return Err(anyhow!("restart_timeout_ms cannot be 0"));
        }
        if self.coordinator_startup_lock_name.trim().is_empty() {
            return Err(anyhow!("coordinator_startup_lock_name cannot be empty"));
        }
        if self.election_timeout_ms == 0 {
            return Err(anyhow!("election_timeout_ms cannot be 0"));
        }
        Ok(())
    }
}
