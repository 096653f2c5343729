//! Logging
//!
//! Diagnostics go through `tracing`. [`init`] installs a
//! `tracing-subscriber` fmt subscriber filtered by an [`EnvFilter`]
//! (`RUST_LOG` wins over the configured level) that writes either to
//! stdout or, when a directory is configured, through a [`LogWriter`] into
//! rolling day files.
//!
//! ```text
//!   info!(..) ──> EnvFilter ──> fmt layer ──> LogWriter ──┬─> BoundedQueue ──> tinyweb-log thread ─┐
//!                                                         └─> (sync / queue full) ───────────────────┴─> 2026_10_18.log
//! ```

pub mod writer;

pub use writer::{file_stem, format_line, LogLine, LogWriter};

use std::io;
use std::path::PathBuf;

use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Lines per file before rolling to `<date>-<n><suffix>`.
pub const DEFAULT_MAX_LINES: u64 = 50_000;

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Filter directive: `trace`, `debug`, `info`, `warn`, `error`, `off`,
    /// or any `EnvFilter` expression.
    pub level: String,

    /// Directory for log files. `None` logs to stdout.
    pub dir: Option<PathBuf>,

    /// File name suffix.
    pub suffix: String,

    /// Pending-line capacity of the async writer. Zero writes synchronously.
    pub queue_capacity: usize,

    pub max_lines: u64,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: None,
            suffix: ".log".to_string(),
            queue_capacity: 1024,
            max_lines: DEFAULT_MAX_LINES,
        }
    }
}

/// Errors from setting up logging.
#[derive(Debug, Error)]
pub enum LogError {
    #[error("no log directory configured")]
    NoDirectory,

    #[error("max lines per log file must be positive")]
    InvalidMaxLines,

    #[error("cannot open log file in {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot start log writer thread: {0}")]
    Spawn(#[source] io::Error),

    #[error("invalid log filter '{directive}': {message}")]
    InvalidFilter { directive: String, message: String },

    #[error("cannot install global subscriber: {0}")]
    Install(String),
}

/// Keeps the file writer alive; flushes and stops it when dropped.
#[derive(Debug)]
pub struct LogGuard {
    writer: Option<LogWriter>,
}

impl LogGuard {
    pub fn writer(&self) -> Option<&LogWriter> {
        self.writer.as_ref()
    }
}

impl Drop for LogGuard {
    fn drop(&mut self) {
        if let Some(writer) = &self.writer {
            writer.shutdown();
        }
    }
}

/// Builds the filter: `RUST_LOG` when set, else `config.level`.
pub fn build_filter(config: &LogConfig) -> Result<EnvFilter, LogError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.level).map_err(|e| LogError::InvalidFilter {
        directive: config.level.clone(),
        message: e.to_string(),
    })
}

/// Installs the global subscriber. Call once, early in `main`.
pub fn init(config: &LogConfig) -> Result<LogGuard, LogError> {
    let filter = build_filter(config)?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    match config.dir {
        Some(_) => {
            let writer = LogWriter::new(config)?;
            builder
                .with_ansi(false)
                .with_writer(writer.clone())
                .try_init()
                .map_err(|e| LogError::Install(e.to_string()))?;
            Ok(LogGuard {
                writer: Some(writer),
            })
        }
        None => {
            builder
                .try_init()
                .map_err(|e| LogError::Install(e.to_string()))?;
            Ok(LogGuard { writer: None })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LogConfig::default();
        assert_eq!(config.level, "info");
        assert_eq!(config.suffix, ".log");
        assert!(config.dir.is_none());
        assert!(config.queue_capacity > 0);
    }

    #[test]
    fn test_invalid_filter_rejected() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let config = LogConfig {
            level: "tinyweb=loudest".to_string(),
            ..LogConfig::default()
        };
        assert!(matches!(
            build_filter(&config),
            Err(LogError::InvalidFilter { .. })
        ));
    }

    #[test]
    fn test_guard_without_writer() {
        let guard = LogGuard { writer: None };
        assert!(guard.writer().is_none());
    }
}
