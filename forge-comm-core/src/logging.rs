//! Tracing setup shared by the forge-comm binaries

use std::path::Path;
use std::time::Duration;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::{self, MakeWriter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

use crate::config::schema::LoggingConfig;

/// Prefix of the rolling log files, rotated as `forge-comm.log.YYYY-MM-DD`
const LOG_FILE_PREFIX: &str = "forge-comm.log";

/// Days of log files kept on startup
const LOG_RETENTION_DAYS: u64 = 7;

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    fn parse(s: &str) -> Self {
        if s.trim().eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Text
        }
    }
}

/// Initialize the logging system
///
/// Console output goes to stderr so command output on stdout stays clean.
/// The returned guard must be held for the life of the process to flush the
/// file writer.
pub fn init_logging(config: &LoggingConfig, dir: &Path) -> crate::Result<WorkerGuard> {
    let format = LogFormat::parse(
        &std::env::var("LOG_FORMAT").unwrap_or_else(|_| config.format.clone()),
    );

    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX));

    let layers = vec![
        output_layer(format, std::io::stderr, true, false),
        output_layer(format, file_writer, false, true),
    ];

    Registry::default()
        .with(layers)
        .with(build_filter(config))
        .try_init()
        .map_err(|e| crate::Error::Internal(format!("failed to install logger: {}", e)))?;

    match cleanup_old_logs(dir, Duration::from_secs(LOG_RETENTION_DAYS * 24 * 3600)) {
        Ok(0) => {}
        Ok(n) => tracing::debug!("Removed {} old log file(s) from {}", n, dir.display()),
        Err(e) => tracing::warn!("Failed to clean up old logs: {}", e),
    }

    Ok(guard)
}

/// `RUST_LOG` wins over the configured level; per-module overrides apply on top
fn build_filter(config: &LoggingConfig) -> EnvFilter {
    let base = std::env::var("RUST_LOG").unwrap_or_else(|_| config.level.clone());
    let mut filter = EnvFilter::try_new(&base).unwrap_or_else(|_| EnvFilter::new("info"));

    for (module, level) in &config.overrides {
        match format!("{}={}", module, level).parse() {
            Ok(directive) => filter = filter.add_directive(directive),
            Err(_) => eprintln!("Invalid log directive: {}={}", module, level),
        }
    }
    filter
}

/// One formatting layer; `source` adds file and line to each event
fn output_layer<W>(format: LogFormat, writer: W, ansi: bool, source: bool) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(ansi)
        .with_target(true)
        .with_file(source)
        .with_line_number(source);

    match format {
        LogFormat::Json => layer.json().with_thread_ids(true).boxed(),
        LogFormat::Text => layer.boxed(),
    }
}

/// Remove forge-comm log files older than `max_age`
fn cleanup_old_logs(dir: &Path, max_age: Duration) -> std::io::Result<usize> {
    if !dir.exists() {
        return Ok(0);
    }

    let now = std::time::SystemTime::now();
    let mut removed = 0;

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let is_ours = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|name| name.starts_with(LOG_FILE_PREFIX))
            .unwrap_or(false);
        if !is_ours {
            continue;
        }

        let age = entry
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| now.duration_since(modified).ok());
        if matches!(age, Some(age) if age > max_age) {
            match std::fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => eprintln!("Failed to remove old log file {:?}: {}", path, e),
            }
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse("JSON"), LogFormat::Json);
        assert_eq!(LogFormat::parse("text"), LogFormat::Text);
        assert_eq!(LogFormat::parse("anything"), LogFormat::Text);
    }

    #[test]
    fn test_cleanup_missing_dir() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("nope");
        assert_eq!(cleanup_old_logs(&missing, Duration::ZERO).unwrap(), 0);
    }

    #[test]
    fn test_cleanup_only_touches_our_files() {
        let temp_dir = TempDir::new().unwrap();
        let ours = temp_dir.path().join("forge-comm.log.2024-01-01");
        let theirs = temp_dir.path().join("other.log");
        std::fs::write(&ours, "old").unwrap();
        std::fs::write(&theirs, "keep").unwrap();
        std::thread::sleep(Duration::from_millis(20));

        let removed = cleanup_old_logs(temp_dir.path(), Duration::from_millis(1)).unwrap();
        assert_eq!(removed, 1);
        assert!(!ours.exists());
        assert!(theirs.exists());
    }

    #[test]
    fn test_cleanup_keeps_recent_files() {
        let temp_dir = TempDir::new().unwrap();
        let recent = temp_dir.path().join("forge-comm.log.2024-01-02");
        std::fs::write(&recent, "fresh").unwrap();

        let removed = cleanup_old_logs(temp_dir.path(), Duration::from_secs(3600)).unwrap();
        assert_eq!(removed, 0);
        assert!(recent.exists());
    }
}
