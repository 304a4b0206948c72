//! Configuration management
//!
//! Handles loading and validating pool and soak-driver configuration from
//! TOML files.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;

use crate::pool::ReleasePolicy;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub soak: SoakConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Slab pool configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfig {
    /// Bytes per slab (raised to the pool minimum if smaller)
    #[serde(default = "default_slab_capacity")]
    pub slab_capacity: usize,
    /// Slabs created up front; shrink never goes below this
    #[serde(default = "default_initial_slab_count")]
    pub initial_slab_count: usize,
    /// Slabs added per growth event
    #[serde(default = "default_growth_batch_size")]
    pub growth_batch_size: usize,
    /// What to do when a region cannot be released
    #[serde(default)]
    pub release_policy: ReleasePolicy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            slab_capacity: default_slab_capacity(),
            initial_slab_count: default_initial_slab_count(),
            growth_batch_size: default_growth_batch_size(),
            release_policy: ReleasePolicy::default(),
        }
    }
}

/// Soak driver configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SoakConfig {
    /// Number of worker threads (0 = auto)
    #[serde(default)]
    pub workers: usize,
    /// Run time in seconds (0 = until Ctrl-C)
    #[serde(default = "default_duration_secs")]
    pub duration_secs: u64,
    /// Largest buffer a worker requests
    #[serde(default = "default_max_buffer_size")]
    pub max_buffer_size: usize,
    /// Buffers parked between threads for cross-thread disposal
    #[serde(default = "default_handoff_capacity")]
    pub handoff_capacity: usize,
    /// How often the shrink policy runs
    #[serde(default = "default_shrink_interval_ms")]
    pub shrink_interval_ms: u64,
}

impl SoakConfig {
    /// Get effective worker count (auto-detect if 0)
    pub fn effective_workers(&self) -> usize {
        if self.workers == 0 {
            num_cpus::get()
        } else {
            self.workers
        }
    }
}

impl Default for SoakConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            duration_secs: default_duration_secs(),
            max_buffer_size: default_max_buffer_size(),
            handoff_capacity: default_handoff_capacity(),
            shrink_interval_ms: default_shrink_interval_ms(),
        }
    }
}

/// Metrics configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics endpoint
    #[serde(default)]
    pub enabled: bool,
    /// Metrics server bind address
    #[serde(default = "default_metrics_addr")]
    pub bind_addr: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_addr: default_metrics_addr(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format: "json" or "pretty"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// Default value functions
fn default_slab_capacity() -> usize { 1024 * 1024 }
fn default_initial_slab_count() -> usize { 1 }
fn default_growth_batch_size() -> usize { 1 }
fn default_duration_secs() -> u64 { 10 }
fn default_max_buffer_size() -> usize { 64 * 1024 }
fn default_handoff_capacity() -> usize { 256 }
fn default_shrink_interval_ms() -> u64 { 500 }
fn default_metrics_addr() -> SocketAddr { SocketAddr::from(([127, 0, 0, 1], 9090)) }
fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "pretty".to_string() }

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        Self::from_toml(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)
            .with_context(|| "Failed to parse config file")?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if self.pool.slab_capacity == 0 {
            anyhow::bail!("slab_capacity must be > 0");
        }
        if self.pool.initial_slab_count == 0 {
            anyhow::bail!("initial_slab_count must be > 0");
        }
        if self.pool.growth_batch_size == 0 {
            anyhow::bail!("growth_batch_size must be > 0");
        }
        if self.soak.max_buffer_size == 0 {
            anyhow::bail!("max_buffer_size must be > 0");
        }
        if self.soak.handoff_capacity == 0 {
            anyhow::bail!("handoff_capacity must be > 0");
        }
        if self.soak.shrink_interval_ms == 0 {
            anyhow::bail!("shrink_interval_ms must be > 0");
        }
        Ok(())
    }
}
