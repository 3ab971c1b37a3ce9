//! Configuration loading and management

use super::schema::Config;
use super::validate::validate_config;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

/// Environment variable prefix for path overrides, e.g. `FORGE_COMM__BUS__PATH`
const ENV_PREFIX: &str = "FORGE_COMM__";

/// Short environment names for the settings people change most
const ENV_ALIASES: [(&str, &str); 2] = [
    ("FORGE_COMM_BUS", "bus.path"),
    ("FORGE_COMM_LOG", "logging.level"),
];

/// Configuration loader
pub struct ConfigLoader {
    config_dir: PathBuf,
}

impl ConfigLoader {
    /// Create a new config loader with the default config directory
    pub fn new() -> Self {
        let config_dir = dirs::home_dir()
            .map(|h| h.join(".forge-comm"))
            .unwrap_or_else(|| PathBuf::from(".forge-comm"));

        Self { config_dir }
    }

    /// Create a new config loader with a custom config directory
    pub fn with_dir<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            config_dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Load configuration from file and environment
    pub fn load(&self) -> crate::Result<Config> {
        let config_path = self.config_path();
        let mut merged = serde_json::to_value(Config::default())?;

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let file_value: Value = serde_json::from_str(&content).map_err(|e| {
                crate::Error::Config(format!("invalid {}: {}", config_path.display(), e))
            })?;
            merge_values(&mut merged, file_value);
        }

        apply_env_overrides(&mut merged);

        let config: Config = serde_json::from_value(merged)
            .map_err(|e| crate::Error::Config(e.to_string()))?;
        validate_config(&config)?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, config: &Config) -> crate::Result<()> {
        std::fs::create_dir_all(&self.config_dir)?;
        let content = serde_json::to_string_pretty(config)?;
        std::fs::write(self.config_path(), content)?;
        Ok(())
    }

    /// Get the config directory path
    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Get the config file path
    pub fn config_path(&self) -> PathBuf {
        self.config_dir.join("config.json")
    }

    /// Resolve the log directory, relative paths hang off the config directory
    pub fn log_dir(&self, config: &Config) -> PathBuf {
        let dir = crate::utils::expand_tilde(&config.logging.dir);
        if dir.is_absolute() {
            dir
        } else {
            self.config_dir.join(dir)
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Overlay `patch` onto `target`; objects merge key by key, anything else replaces
fn merge_values(target: &mut Value, patch: Value) {
    if let (Value::Object(target_map), Value::Object(patch_map)) = (&mut *target, &patch) {
        for (key, value) in patch_map {
            match target_map.get_mut(key) {
                Some(slot) => merge_values(slot, value.clone()),
                None => {
                    target_map.insert(key.clone(), value.clone());
                }
            }
        }
        return;
    }
    *target = patch;
}

/// Interpret an environment value as JSON when possible, else as a plain string
fn parse_env_value(raw: &str) -> Value {
    let trimmed = raw.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return value;
    }
    match trimmed.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" => Value::Bool(true),
        "false" | "no" | "off" => Value::Bool(false),
        _ => Value::String(raw.to_string()),
    }
}

/// Write `value` at a dotted location, creating intermediate objects
fn set_path_value(root: &mut Value, path: &[&str], value: Value) {
    let Some((head, rest)) = path.split_first() else {
        *root = value;
        return;
    };
    if !root.is_object() {
        *root = Value::Object(Map::new());
    }
    if let Value::Object(map) = root {
        let child = map.entry((*head).to_string()).or_insert(Value::Null);
        set_path_value(child, rest, value);
    }
}

/// Environment overrides in the order they apply: aliases first, then
/// `FORGE_COMM__SECTION__KEY` paths, so a path override wins over its alias.
fn env_overrides() -> Vec<(Vec<String>, Value)> {
    let mut overrides = Vec::new();

    for (var, target) in ENV_ALIASES {
        if let Ok(raw) = std::env::var(var) {
            let path = target.split('.').map(str::to_string).collect();
            overrides.push((path, Value::String(raw)));
        }
    }

    let mut prefixed: Vec<(String, String)> = std::env::vars()
        .filter(|(key, _)| key.starts_with(ENV_PREFIX))
        .collect();
    prefixed.sort();
    for (key, raw) in prefixed {
        let path: Vec<String> = key[ENV_PREFIX.len()..]
            .split("__")
            .filter(|segment| !segment.is_empty())
            .map(str::to_ascii_lowercase)
            .collect();
        if !path.is_empty() {
            overrides.push((path, parse_env_value(&raw)));
        }
    }

    overrides
}

fn apply_env_overrides(config: &mut Value) {
    for (path, value) in env_overrides() {
        let path: Vec<&str> = path.iter().map(String::as_str).collect();
        set_path_value(config, &path, value);
    }
}
