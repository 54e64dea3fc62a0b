//! Logging configuration with file rotation
//!
//! Installs a `tracing` subscriber with:
//! - an `EnvFilter` honouring `RUST_LOG`
//! - a stderr layer, as text or JSON
//! - an optional daily-rotated file layer

use crate::error::{RegistryError, Result};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter};

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Default level when `RUST_LOG` does not set one
    pub level: Level,

    /// Log to file
    pub file_path: Option<PathBuf>,

    /// Log to stderr
    pub stderr: bool,

    /// Emit JSON instead of text on stderr
    pub json: bool,

    /// Include thread IDs
    pub thread_ids: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            file_path: None,
            stderr: true,
            json: false,
            thread_ids: false,
        }
    }
}

impl LogConfig {
    /// Create config from environment
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(rust_log) = std::env::var("RUST_LOG") {
            config.level = level_hint(&rust_log).unwrap_or(config.level);
        }

        if let Ok(log_file) = std::env::var("REGISTRY_LOG_FILE") {
            if !log_file.trim().is_empty() {
                config.file_path = Some(PathBuf::from(log_file));
            }
        }

        if let Ok(log_stderr) = std::env::var("REGISTRY_LOG_STDERR") {
            config.stderr = log_stderr.to_lowercase() != "false";
        }

        if let Ok(json) = std::env::var("REGISTRY_LOG_JSON") {
            config.json = matches!(json.to_lowercase().as_str(), "1" | "true" | "yes");
        }

        config
    }
}

/// Most verbose level mentioned in a filter string
fn level_hint(filter: &str) -> Option<Level> {
    let filter = filter.to_lowercase();
    [
        ("trace", Level::TRACE),
        ("debug", Level::DEBUG),
        ("info", Level::INFO),
        ("warn", Level::WARN),
        ("error", Level::ERROR),
    ]
    .into_iter()
    .find(|(name, _)| filter.contains(name))
    .map(|(_, level)| level)
}

/// Initialize logging with the given configuration
pub fn init_logging(config: LogConfig) -> Result<()> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(config.level.into())
        .from_env_lossy();

    let stderr_text = (config.stderr && !config.json).then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(true)
            .with_target(true)
            .with_thread_ids(config.thread_ids)
    });

    let stderr_json = (config.stderr && config.json).then(|| {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_thread_ids(config.thread_ids)
    });

    let file_layer = match &config.file_path {
        Some(file_path) => {
            let directory = file_path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| std::path::Path::new("."));
            std::fs::create_dir_all(directory)?;

            let file_appender = tracing_appender::rolling::daily(
                directory,
                file_path
                    .file_name()
                    .unwrap_or_else(|| std::ffi::OsStr::new("registry-resilience.log")),
            );

            Some(
                fmt::layer()
                    .with_writer(file_appender)
                    .with_ansi(false)
                    .with_thread_ids(config.thread_ids),
            )
        }
        None => None,
    };

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_text)
        .with(stderr_json)
        .with(file_layer);

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| RegistryError::config(format!("failed to install subscriber: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_env() {
        temp_env::with_vars(
            [
                ("RUST_LOG", Some("registry_resilience=debug")),
                ("REGISTRY_LOG_FILE", Some("/tmp/registry/access.log")),
                ("REGISTRY_LOG_STDERR", Some("false")),
                ("REGISTRY_LOG_JSON", Some("1")),
            ],
            || {
                let config = LogConfig::from_env();
                assert_eq!(config.level, Level::DEBUG);
                assert_eq!(
                    config.file_path,
                    Some(PathBuf::from("/tmp/registry/access.log"))
                );
                assert!(!config.stderr);
                assert!(config.json);
            },
        );
    }

    #[test]
    fn test_defaults_without_env() {
        temp_env::with_vars_unset(
            [
                "RUST_LOG",
                "REGISTRY_LOG_FILE",
                "REGISTRY_LOG_STDERR",
                "REGISTRY_LOG_JSON",
            ],
            || {
                let config = LogConfig::from_env();
                assert_eq!(config.level, Level::INFO);
                assert!(config.stderr);
                assert!(!config.json);
                assert!(config.file_path.is_none());
            },
        );
    }
}
