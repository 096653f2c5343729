//! Server configuration.
//!
//! Built with [`Default`] and adjusted field by field; the binary fills it
//! from command-line flags. [`ServerConfig::validate`] runs before the
//! reactor binds anything.

use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::logging::LogConfig;

/// Default port.
pub const DEFAULT_PORT: u16 = 1316;

/// Default host.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default connection limit.
pub const DEFAULT_MAX_CONNECTIONS: usize = 65_536;

/// Edge- or level-triggered readiness for the listener and connections.
///
/// The numeric codes are the ones accepted by `--trigger-mode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TriggerMode {
    /// 0: both level-triggered.
    Level,
    /// 1: connections edge-triggered, listener level-triggered.
    EdgeConnections,
    /// 2: listener edge-triggered, connections level-triggered.
    EdgeListener,
    /// 3: both edge-triggered.
    #[default]
    Edge,
}

impl TriggerMode {
    pub fn from_code(code: u8) -> Result<Self, ConfigError> {
        match code {
            0 => Ok(TriggerMode::Level),
            1 => Ok(TriggerMode::EdgeConnections),
            2 => Ok(TriggerMode::EdgeListener),
            3 => Ok(TriggerMode::Edge),
            other => Err(ConfigError::InvalidTriggerMode(other)),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            TriggerMode::Level => 0,
            TriggerMode::EdgeConnections => 1,
            TriggerMode::EdgeListener => 2,
            TriggerMode::Edge => 3,
        }
    }

    pub fn listener_edge(self) -> bool {
        matches!(self, TriggerMode::EdgeListener | TriggerMode::Edge)
    }

    pub fn connection_edge(self) -> bool {
        matches!(self, TriggerMode::EdgeConnections | TriggerMode::Edge)
    }
}

/// Errors from invalid configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid trigger mode {0} (expected 0-3)")]
    InvalidTriggerMode(u8),

    #[error("{field} must be positive")]
    Zero { field: &'static str },

    #[error("cannot resolve bind address {0}")]
    BadAddress(String),

    #[error("document root {0} is not a directory")]
    BadDocRoot(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub trigger_mode: TriggerMode,
    /// Idle timeout. `Duration::ZERO` disables eviction.
    pub idle_timeout: Duration,
    pub worker_threads: usize,
    pub task_queue_capacity: usize,
    pub max_connections: usize,
    /// Events returned by one multiplexer wait.
    pub max_events: usize,
    pub doc_root: PathBuf,
    pub store_pool_size: usize,
    pub log: LogConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            trigger_mode: TriggerMode::default(),
            idle_timeout: Duration::from_secs(60),
            worker_threads: 6,
            task_queue_capacity: 1024,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            max_events: 1024,
            doc_root: PathBuf::from("./resources"),
            store_pool_size: 12,
            log: LogConfig::default(),
        }
    }
}

impl ServerConfig {
    /// `host:port`.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Resolves [`ServerConfig::bind_address`] to the first socket address.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.bind_address()
            .to_socket_addrs()
            .ok()
            .and_then(|mut addrs| addrs.next())
            .ok_or_else(|| ConfigError::BadAddress(self.bind_address()))
    }

    /// `None` when eviction is disabled.
    pub fn idle_timeout(&self) -> Option<Duration> {
        (!self.idle_timeout.is_zero()).then_some(self.idle_timeout)
    }

    /// Checks sizes and the bind address. The document root is only
    /// checked for existence when `check_doc_root` is set.
    pub fn validate(&self, check_doc_root: bool) -> Result<(), ConfigError> {
        let positive = [
            ("worker_threads", self.worker_threads),
            ("task_queue_capacity", self.task_queue_capacity),
            ("max_connections", self.max_connections),
            ("max_events", self.max_events),
            ("store_pool_size", self.store_pool_size),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::Zero { field });
            }
        }
        if self.log.max_lines == 0 {
            return Err(ConfigError::Zero {
                field: "log.max_lines",
            });
        }

        self.socket_addr()?;

        if check_doc_root && !self.doc_root.is_dir() {
            return Err(ConfigError::BadDocRoot(self.doc_root.clone()));
        }
        Ok(())
    }
}
