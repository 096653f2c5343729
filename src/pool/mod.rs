//! Worker Pool
//!
//! ```text
//!   reactor ──add_task──> ┌──────────────────┐ ──pop──> worker-0
//!                         │  BoundedQueue<T> │ ──pop──> worker-1
//!                         │  (capacity N)    │ ──pop──> ...
//!                         └──────────────────┘
//! ```
//!
//! [`BoundedQueue`] is a general blocking queue; the async log writer
//! reuses it for pending lines.

pub mod queue;
pub mod worker;

pub use queue::{BoundedQueue, QueueClosed, TryPushError};
pub use worker::{Task, WorkerPool};
