//! Blocking Bounded Queue
//!
//! A `Mutex<VecDeque<T>>` with two condition variables: producers wait on
//! `not_full`, consumers wait on `not_empty`. Closing the queue clears it
//! and wakes everybody; from then on nothing blocks and every operation
//! reports failure.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Returned by a push on a closed queue. Carries the rejected item.
pub struct QueueClosed<T>(pub T);

impl<T> QueueClosed<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for QueueClosed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("QueueClosed(..)")
    }
}

impl<T> fmt::Display for QueueClosed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("push on a closed queue")
    }
}

impl<T> std::error::Error for QueueClosed<T> {}

/// Why a non-blocking push was refused.
#[derive(Debug)]
pub enum TryPushError<T> {
    Full(T),
    Closed(T),
}

#[derive(Debug)]
struct State<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Capacity-limited double-ended queue with blocking push and pop.
#[derive(Debug)]
pub struct BoundedQueue<T> {
    state: Mutex<State<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

impl<T> BoundedQueue<T> {
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be positive");
        Self {
            state: Mutex::new(State {
                items: VecDeque::with_capacity(capacity.min(1024)),
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.lock().items.len() >= self.capacity
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Appends at the back, waiting while the queue is full.
    pub fn push_back(&self, item: T) -> Result<(), QueueClosed<T>> {
        let Some(mut state) = self.wait_for_room() else {
            return Err(QueueClosed(item));
        };
        state.items.push_back(item);
        drop(state);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Inserts at the front, waiting while the queue is full.
    pub fn push_front(&self, item: T) -> Result<(), QueueClosed<T>> {
        let Some(mut state) = self.wait_for_room() else {
            return Err(QueueClosed(item));
        };
        state.items.push_front(item);
        drop(state);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Appends at the back only if there is room right now.
    pub fn try_push_back(&self, item: T) -> Result<(), TryPushError<T>> {
        let mut state = self.lock();
        if state.closed {
            return Err(TryPushError::Closed(item));
        }
        if state.items.len() >= self.capacity {
            return Err(TryPushError::Full(item));
        }
        state.items.push_back(item);
        drop(state);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Takes the front item, waiting while the queue is empty.
    ///
    /// Returns `None` once the queue is closed.
    pub fn pop(&self) -> Option<T> {
        let mut state = self.lock();
        loop {
            if state.closed {
                return None;
            }
            if let Some(item) = state.items.pop_front() {
                drop(state);
                self.not_full.notify_one();
                return Some(item);
            }
            state = self.not_empty.wait(state).unwrap();
        }
    }

    /// Like [`BoundedQueue::pop`] but gives up after `timeout`.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if state.closed {
                return None;
            }
            if let Some(item) = state.items.pop_front() {
                drop(state);
                self.not_full.notify_one();
                return Some(item);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            state = self.not_empty.wait_timeout(state, remaining).unwrap().0;
        }
    }

    /// Wakes one waiting consumer.
    pub fn flush(&self) {
        self.not_empty.notify_one();
    }

    /// Drops every queued item.
    pub fn clear(&self) {
        self.lock().items.clear();
        self.not_full.notify_all();
    }

    /// Clears the queue, marks it closed and releases every waiter.
    pub fn close(&self) {
        {
            let mut state = self.lock();
            state.items.clear();
            state.closed = true;
        }
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Waits until there is room. `None` if the queue is closed.
    fn wait_for_room(&self) -> Option<MutexGuard<'_, State<T>>> {
        let mut state = self.lock();
        loop {
            if state.closed {
                return None;
            }
            if state.items.len() < self.capacity {
                return Some(state);
            }
            state = self.not_full.wait(state).unwrap();
        }
    }
}

impl<T: Clone> BoundedQueue<T> {
    pub fn front(&self) -> Option<T> {
        self.lock().items.front().cloned()
    }

    pub fn back(&self) -> Option<T> {
        self.lock().items.back().cloned()
    }
}
