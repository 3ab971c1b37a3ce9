//! Configuration validation rules.

use super::schema::Config;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];
const LOG_FORMATS: &[&str] = &["text", "json"];

/// Validate configuration and return aggregated validation errors.
pub fn validate_config(config: &Config) -> crate::Result<()> {
    let mut errors = Vec::new();

    if config.bus.path.trim().is_empty() {
        errors.push("bus.path must not be empty".to_string());
    }
    if config.bus.lock_timeout_ms == 0 {
        errors.push("bus.lock_timeout_ms must be > 0".to_string());
    }

    if config.listener.interval_ms == 0 {
        errors.push("listener.interval_ms must be > 0".to_string());
    }
    if config.listener.max_backoff_ms < config.listener.interval_ms {
        errors.push("listener.max_backoff_ms must be >= listener.interval_ms".to_string());
    }

    let level = config.logging.level.to_ascii_lowercase();
    if !LOG_LEVELS.contains(&level.as_str()) {
        errors.push(format!(
            "logging.level must be one of {}",
            LOG_LEVELS.join(", ")
        ));
    }
    let format = config.logging.format.to_ascii_lowercase();
    if !LOG_FORMATS.contains(&format.as_str()) {
        errors.push(format!(
            "logging.format must be one of {}",
            LOG_FORMATS.join(", ")
        ));
    }
    for (module, level) in &config.logging.overrides {
        if !LOG_LEVELS.contains(&level.to_ascii_lowercase().as_str()) {
            errors.push(format!("logging.overrides.{} has unknown level '{}'", module, level));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(crate::Error::Validation(errors.join("; ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_rejects_zero_interval_and_small_backoff() {
        let mut config = Config::default();
        config.listener.interval_ms = 0;
        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("listener.interval_ms"));

        let mut config = Config::default();
        config.listener.interval_ms = 10_000;
        config.listener.max_backoff_ms = 5_000;
        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("max_backoff_ms"));
    }

    #[test]
    fn test_aggregates_errors() {
        let mut config = Config::default();
        config.bus.path = "  ".to_string();
        config.logging.level = "loud".to_string();
        config.logging.format = "xml".to_string();

        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("bus.path"));
        assert!(err.contains("logging.level"));
        assert!(err.contains("logging.format"));
    }

    #[test]
    fn test_rejects_bad_override_level() {
        let mut config = Config::default();
        config
            .logging
            .overrides
            .insert("forge_comm_core::bus".to_string(), "chatty".to_string());
        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("forge_comm_core::bus"));
    }
}
