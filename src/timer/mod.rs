//! Idle Connection Timers
//!
//! Every accepted connection gets a deadline. The reactor keeps those
//! deadlines in a [`TimerHeap`], an array-backed min-heap with an
//! id → slot index so that a deadline can be pushed back in O(log n) every
//! time the connection shows activity.
//!
//! ## How the reactor uses it
//!
//! ```text
//!   accept ──> add(id, idle_timeout, IdleTimeout)
//!   read   ──> adjust(id, idle_timeout)
//!   close  ──> cancel(id)
//!
//!   loop {
//!       timeout = next_tick(now, &mut expired)   // fires due timers
//!       for node in expired { evict(node.id, node.reason) }
//!       multiplexer.wait(timeout)
//!   }
//! ```
//!
//! The heap is not synchronized. It belongs to the reactor thread and
//! workers never touch it; they report activity back to the reactor, which
//! adjusts the deadline itself.
//!
//! Timers do not carry closures. A node carries an [`EvictReason`] and the
//! reactor routes every eviction, timed or not, through one method.

pub mod heap;

pub use heap::{TimerHeap, TimerId, TimerNode};

use std::fmt;

/// Why a connection is being torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EvictReason {
    /// No activity within the configured idle timeout.
    IdleTimeout,
    /// The peer closed its side or hung up.
    PeerClosed,
    /// The response was flushed and the protocol asked not to keep alive.
    Finished,
    /// The request could not be parsed; the canned error was flushed.
    Malformed,
    /// A read or write failed with something other than would-block.
    IoError,
    /// The server is shutting down.
    Shutdown,
}

impl fmt::Display for EvictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EvictReason::IdleTimeout => "idle timeout",
            EvictReason::PeerClosed => "peer closed",
            EvictReason::Finished => "finished",
            EvictReason::Malformed => "malformed request",
            EvictReason::IoError => "i/o error",
            EvictReason::Shutdown => "shutdown",
        };
        f.write_str(s)
    }
}
