//! Reactor
//!
//! This module contains the event loop and everything it owns:
//!
//! - [`Multiplexer`]: thin epoll wrapper
//! - [`Waker`]: eventfd that lets workers interrupt the wait
//! - [`Connection`]: per-client socket, buffers and state
//! - [`Reactor`] / [`ServerHandle`]: the loop and its remote control
//! - [`ServerStats`]: counters shared with the workers
//!
//! ## Threads
//!
//! ```text
//!   ┌──────────────── tinyweb-reactor ────────────────┐
//!   │ listener  epoll  TimerHeap  HashMap<id, Conn>   │
//!   └──────┬─────────────────────────────▲────────────┘
//!          │ add_task                    │ SegQueue<Completion> + eventfd
//!          ▼                             │
//!   ┌─ tinyweb-worker-0..N ─────────────────────────────┐
//!   │  read ──> handler.parse/build_response ──> write  │
//!   └───────────────────────────────────────────────────┘
//! ```

pub mod connection;
pub mod multiplexer;
pub mod server;
pub mod stats;
pub mod waker;

pub use connection::{ConnId, ConnState, Connection};
pub use multiplexer::{Event, Interest, Multiplexer};
pub use server::{Reactor, ServerHandle};
pub use stats::{ServerStats, StatsSnapshot};
pub use waker::Waker;
