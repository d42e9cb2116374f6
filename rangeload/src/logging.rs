//! Opt-in `tracing` subscriber setup.
//!
//! The library only emits events; applications that want them printed call
//! [`init_logging`] once at startup and keep the returned guard alive.

use std::io;
use std::path::PathBuf;

use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::UtcOffset;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::OffsetTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Filter used when `RUST_LOG` is not set.
pub const DEFAULT_LOG_FILTER: &str = "rangeload=info";

/// Errors from subscriber installation.
#[derive(Debug, Error)]
pub enum LogError {
    /// A global subscriber is already installed.
    #[error("logging already initialized")]
    AlreadyInitialized,

    /// The filter directive could not be parsed.
    #[error("invalid log filter '{filter}': {source}")]
    Filter {
        filter: String,
        source: tracing_subscriber::filter::ParseError,
    },

    /// The log file directory could not be created.
    #[error("failed to create log directory {}: {source}", path.display())]
    CreateDir { path: PathBuf, source: io::Error },
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Filter directive, overridden by `RUST_LOG` when that is set.
    pub filter: String,
    /// Colourise console output.
    pub ansi: bool,
    /// Also write to this file (never rotated).
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_LOG_FILTER.to_string(),
            ansi: true,
            file: None,
        }
    }
}

impl LogConfig {
    /// Set the filter directive.
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    /// Enable or disable ANSI colours.
    pub fn with_ansi(mut self, ansi: bool) -> Self {
        self.ansi = ansi;
        self
    }

    /// Additionally log to `path`.
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }
}

/// Keeps the background file writer alive; pending lines are flushed on drop.
#[derive(Debug)]
pub struct LoggingGuard {
    _file: Option<WorkerGuard>,
}

/// Install the global subscriber described by `config`.
pub fn init_logging(config: &LogConfig) -> Result<LoggingGuard, LogError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.filter).map_err(|source| LogError::Filter {
            filter: config.filter.clone(),
            source,
        })?,
    };

    // Local offset lookup fails on some platforms once threads exist.
    let timer = OffsetTime::local_rfc_3339()
        .unwrap_or_else(|_| OffsetTime::new(UtcOffset::UTC, Rfc3339));

    let (file_layer, file_guard) = match &config.file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from("."));
            std::fs::create_dir_all(&dir).map_err(|source| LogError::CreateDir {
                path: dir.clone(),
                source,
            })?;
            let file_name = path
                .file_name()
                .map(|n| n.to_os_string())
                .unwrap_or_else(|| "rangeload.log".into());

            let appender = tracing_appender::rolling::never(&dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_timer(timer.clone())
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let console_layer = fmt::layer()
        .with_timer(timer)
        .with_ansi(config.ansi)
        .with_writer(io::stderr);

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|_| LogError::AlreadyInitialized)?;

    Ok(LoggingGuard { _file: file_guard })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = LogConfig::default();
        assert_eq!(config.filter, "rangeload=info");
        assert!(config.file.is_none());

        let config = config
            .with_filter("rangeload=debug")
            .with_ansi(false)
            .with_file("/tmp/x.log");
        assert_eq!(config.filter, "rangeload=debug");
        assert!(!config.ansi);
        assert_eq!(config.file, Some(PathBuf::from("/tmp/x.log")));
    }

    #[test]
    fn test_init_once_with_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("logs").join("rangeload.log");
        let config = LogConfig::default().with_ansi(false).with_file(&path);

        let guard = init_logging(&config).unwrap();
        tracing::info!("logging initialized");
        assert!(dir.path().join("logs").is_dir());

        assert!(matches!(
            init_logging(&config),
            Err(LogError::AlreadyInitialized)
        ));
        drop(guard);
    }
}
