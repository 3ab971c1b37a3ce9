//! Configuration schema definitions

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Root configuration for forge-comm
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Bus storage configuration
    #[serde(default)]
    pub bus: BusConfig,
    /// Listener polling configuration
    #[serde(default)]
    pub listener: ListenerConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where the bus lives and how it is locked
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Path of the bus JSON document (`~` is expanded)
    #[serde(default = "default_bus_path")]
    pub path: String,
    /// How long to wait for another process to release the bus
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

fn default_bus_path() -> String {
    "~/.forge-comm/forge_comm_bus.json".to_string()
}

fn default_lock_timeout_ms() -> u64 {
    5_000
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            path: default_bus_path(),
            lock_timeout_ms: default_lock_timeout_ms(),
        }
    }
}

/// Listener polling behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// Delay between polls
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Upper bound for the delay after repeated storage failures
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_interval_ms() -> u64 {
    4_000
}

fn default_max_backoff_ms() -> u64 {
    60_000
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log format (text, json)
    #[serde(default = "default_log_format")]
    pub format: String,
    /// Directory for log files, relative paths resolve against the config directory
    #[serde(default = "default_log_dir")]
    pub dir: String,
    /// Module-specific overrides
    #[serde(default)]
    pub overrides: HashMap<String, String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            dir: default_log_dir(),
            overrides: HashMap::new(),
        }
    }
}
