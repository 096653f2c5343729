//! Backing Store
//!
//! The login and register pages need somewhere to keep accounts. This
//! module provides an in-memory sharded user table and a fixed-size pool
//! of handles onto it.
//!
//! ## Architecture
//!
//! ```text
//!   worker ──acquire()──> ┌────────────────────┐
//!                         │     StorePool      │  Semaphore(N), try_acquire
//!   worker <─PooledConn── │  [conn][conn][..]  │  Busy when exhausted
//!                         └─────────┬──────────┘
//!                                   │ Arc
//!                         ┌─────────▼──────────┐
//!                         │     UserStore      │  sharded RwLock<HashMap>
//!                         └────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use tinyweb::storage::{StorePool, UserStore};
//! use std::sync::Arc;
//!
//! let pool = StorePool::new(Arc::new(UserStore::new()), 4);
//!
//! let conn = pool.acquire().unwrap();
//! conn.register("ariz", "secret").unwrap();
//! assert!(conn.verify("ariz", "secret"));
//! ```

pub mod engine;
pub mod pool;

pub use engine::{StoreStats, UserStore};
pub use pool::{PooledConn, StoreConn, StorePool};

/// Errors from the backing store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Every handle is in use.
    #[error("store pool busy")]
    Busy,

    /// The pool has been closed.
    #[error("store pool closed")]
    Closed,

    #[error("user name and password must not be empty")]
    EmptyCredentials,
}
