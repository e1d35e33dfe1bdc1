//! Tracing subscriber setup for processes that embed InfraGraph.

use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::LoggingConfig;

/// Resolve the filter directive: `RUST_LOG` wins over the configured level.
fn filter_directive(config: &LoggingConfig) -> String {
    std::env::var("RUST_LOG").unwrap_or_else(|_| config.level.clone())
}

/// Directory for JSON log files when none is configured.
pub fn default_log_dir() -> PathBuf {
    directories::ProjectDirs::from("dev", "infragraph", "infragraph")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Install the global subscriber: a compact stderr layer plus, when
/// `config.json` is set, a daily-rotated JSON file layer.
///
/// Keep the returned guard alive for the life of the process so buffered
/// file output is flushed. Calling this twice leaves the first subscriber in
/// place.
pub fn init_tracing(config: &LoggingConfig) -> Option<WorkerGuard> {
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter_directive(config)));

    let (json_layer, guard) = if config.json {
        let log_dir = config.log_dir.clone().unwrap_or_else(default_log_dir);
        let _ = std::fs::create_dir_all(&log_dir);
        let file_appender = tracing_appender::rolling::daily(&log_dir, "infragraph.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        let layer = tracing_subscriber::fmt::layer()
            .json()
            .with_writer(non_blocking)
            .with_filter(EnvFilter::new("debug"));
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    let _ = tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .try_init();

    guard
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_init_tracing_with_json_file() {
        let dir = TempDir::new().unwrap();
        let config = LoggingConfig {
            level: "debug".into(),
            json: true,
            log_dir: Some(dir.path().to_path_buf()),
        };
        let guard = init_tracing(&config);
        assert!(guard.is_some());
        tracing::info!(test = true, "telemetry initialized");
        // A second call must not panic.
        let _ = init_tracing(&LoggingConfig::default());
    }
}
