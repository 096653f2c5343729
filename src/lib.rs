//! # tinyweb - An epoll Reactor Web Server
//!
//! tinyweb serves static files and a small login/register flow over
//! HTTP/1.1. One reactor thread waits on epoll; a fixed pool of worker
//! threads does the socket I/O and the protocol work.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                               tinyweb                                   │
//! │                                                                         │
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐                    │
//! │  │  Listener   │──>│  Reactor    │──>│ WorkerPool  │                    │
//! │  │ (epoll fd)  │   │ epoll_wait  │   │ BoundedQueue│                    │
//! │  └─────────────┘   │ TimerHeap   │   └──────┬──────┘                    │
//! │                    │ conn table  │          │ read/process/write        │
//! │                    └──────▲──────┘          ▼                           │
//! │                           │        ┌──────────────────┐                 │
//! │            Completion +   │        │ ProtocolHandler  │                 │
//! │            eventfd wake   │        │  (HttpHandler)   │───> StorePool   │
//! │                           │        └────────┬─────────┘     UserStore   │
//! │                           └─────────────────┘                           │
//! │                                                                         │
//! │  tracing ──> LogWriter ──> BoundedQueue ──> log thread ──> day files     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use tinyweb::protocol::HttpHandler;
//! use tinyweb::reactor::Reactor;
//! use tinyweb::ServerConfig;
//!
//! let config = ServerConfig::default();
//! let handler = HttpHandler::new(config.doc_root.clone());
//! let mut handle = Reactor::bind(config, handler)?.spawn()?;
//! println!("listening on {}", handle.local_addr());
//! handle.shutdown()?;
//! # Ok::<(), tinyweb::ServerError>(())
//! ```
//!
//! ## Module Overview
//!
//! - [`buffer`]: growable byte buffer with read/write cursors
//! - [`timer`]: indexed min-heap of idle deadlines
//! - [`pool`]: bounded blocking queue and worker threads
//! - [`reactor`]: epoll wrapper, connection state machine, event loop
//! - [`protocol`]: the handler contract and the HTTP/1.1 handler
//! - [`storage`]: user store and its fixed-size connection pool
//! - [`logging`]: subscriber setup and rolling log files
//! - [`config`]: server configuration
//!
//! ## Design Highlights
//!
//! ### Single-owner reactor state
//!
//! The multiplexer, the timer heap and the connection table belong to the
//! reactor thread. Workers report back through a completion queue instead
//! of touching them.
//!
//! ### One task per connection
//!
//! Sockets are registered one-shot. Until the reactor re-arms a connection
//! no second task can be dispatched for it, so reads, processing and
//! writes on one connection happen in order.

pub mod buffer;
pub mod config;
pub mod error;
pub mod logging;
pub mod pool;
pub mod protocol;
pub mod reactor;
pub mod storage;
pub mod timer;

pub use buffer::Buffer;
pub use config::{ServerConfig, TriggerMode, DEFAULT_HOST, DEFAULT_PORT};
pub use error::ServerError;
pub use logging::{LogConfig, LogGuard};
pub use pool::{BoundedQueue, WorkerPool};
pub use protocol::{HttpHandler, ParseResult, ProtocolHandler, Response};
pub use reactor::{Reactor, ServerHandle, ServerStats};
pub use storage::{StoreError, StorePool, UserStore};
pub use timer::{EvictReason, TimerHeap};

/// Version of tinyweb
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
