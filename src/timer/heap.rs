//! Indexed Min-Heap Timer
//!
//! ## Complexity
//!
//! - add / adjust / fire / cancel / pop: O(log n)
//! - lookup by id: O(1) through the index map
//! - next deadline: O(1)
//!
//! ## Index bookkeeping
//!
//! `index[id]` is the slot holding `id`. Every swap inside the heap updates
//! the entry of *both* swapped nodes, and every removal updates the entry of
//! the node moved into the vacated slot. [`TimerHeap`] tests check that the
//! map and the heap agree after every operation.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use super::EvictReason;

/// Identifier of a timer. The reactor uses connection ids.
pub type TimerId = u64;

/// A single deadline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerNode {
    pub id: TimerId,
    pub expires: Instant,
    pub reason: EvictReason,
}

/// Min-heap of [`TimerNode`]s ordered by `expires`.
#[derive(Debug)]
pub struct TimerHeap {
    heap: Vec<TimerNode>,
    index: HashMap<TimerId, usize>,
}

impl Default for TimerHeap {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerHeap {
    pub fn new() -> Self {
        Self::with_capacity(64)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            heap: Vec::with_capacity(capacity),
            index: HashMap::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn contains(&self, id: TimerId) -> bool {
        self.index.contains_key(&id)
    }

    /// Deadline currently recorded for `id`.
    pub fn expires_at(&self, id: TimerId) -> Option<Instant> {
        self.index.get(&id).map(|&i| self.heap[i].expires)
    }

    /// The soonest deadline.
    pub fn peek(&self) -> Option<&TimerNode> {
        self.heap.first()
    }

    /// Schedules `id` to expire `timeout` from now.
    ///
    /// An id that is already tracked gets its deadline and reason replaced.
    pub fn add(&mut self, id: TimerId, timeout: Duration, reason: EvictReason) {
        self.add_at(id, Instant::now() + timeout, reason);
    }

    /// Schedules `id` to expire at `expires`.
    pub fn add_at(&mut self, id: TimerId, expires: Instant, reason: EvictReason) {
        match self.index.get(&id) {
            Some(&i) => {
                self.heap[i].expires = expires;
                self.heap[i].reason = reason;
                if !self.sift_down(i) {
                    self.sift_up(i);
                }
            }
            None => {
                let i = self.heap.len();
                self.index.insert(id, i);
                self.heap.push(TimerNode {
                    id,
                    expires,
                    reason,
                });
                self.sift_up(i);
            }
        }
    }

    /// Moves the deadline of `id` to `timeout` from now.
    ///
    /// Returns `false` if `id` is not tracked.
    pub fn adjust(&mut self, id: TimerId, timeout: Duration) -> bool {
        self.adjust_at(id, Instant::now() + timeout)
    }

    /// Moves the deadline of `id` to `expires`, in either direction.
    pub fn adjust_at(&mut self, id: TimerId, expires: Instant) -> bool {
        let Some(&i) = self.index.get(&id) else {
            return false;
        };

        let previous = self.heap[i].expires;
        self.heap[i].expires = expires;
        // Activity almost always pushes the deadline out.
        if expires >= previous {
            self.sift_down(i);
        } else {
            self.sift_up(i);
        }
        true
    }

    /// Removes and returns the soonest node.
    pub fn pop(&mut self) -> Option<TimerNode> {
        if self.heap.is_empty() {
            None
        } else {
            Some(self.remove_at(0))
        }
    }

    /// Removes `id` regardless of its deadline and hands it back so the
    /// caller can dispatch its reason.
    pub fn fire(&mut self, id: TimerId) -> Option<TimerNode> {
        let i = *self.index.get(&id)?;
        Some(self.remove_at(i))
    }

    /// Removes `id` without dispatching it.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        self.fire(id).is_some()
    }

    /// Removes every node due at `now`, appending them to `expired` in
    /// non-decreasing deadline order.
    pub fn tick(&mut self, now: Instant, expired: &mut Vec<TimerNode>) {
        while self.heap.first().is_some_and(|node| node.expires <= now) {
            expired.push(self.remove_at(0));
        }
    }

    /// Runs [`TimerHeap::tick`] and returns how long until the next
    /// deadline: zero if already due, `None` if nothing is scheduled.
    pub fn next_tick(&mut self, now: Instant, expired: &mut Vec<TimerNode>) -> Option<Duration> {
        self.tick(now, expired);
        self.heap
            .first()
            .map(|node| node.expires.saturating_duration_since(now))
    }

    pub fn clear(&mut self) {
        self.heap.clear();
        self.index.clear();
    }

    fn remove_at(&mut self, i: usize) -> TimerNode {
        let node = self.heap.swap_remove(i);
        self.index.remove(&node.id);

        if i < self.heap.len() {
            // the former last node now sits in slot i
            self.index.insert(self.heap[i].id, i);
            if !self.sift_down(i) {
                self.sift_up(i);
            }
        }
        node
    }

    fn sift_up(&mut self, mut i: usize) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if self.heap[parent].expires <= self.heap[i].expires {
                break;
            }
            self.swap_nodes(i, parent);
            i = parent;
        }
    }

    /// Returns `true` if the node moved.
    fn sift_down(&mut self, start: usize) -> bool {
        let n = self.heap.len();
        let mut i = start;
        loop {
            let mut child = 2 * i + 1;
            if child >= n {
                break;
            }
            if child + 1 < n && self.heap[child + 1].expires < self.heap[child].expires {
                child += 1;
            }
            if self.heap[child].expires >= self.heap[i].expires {
                break;
            }
            self.swap_nodes(i, child);
            i = child;
        }
        i > start
    }

    fn swap_nodes(&mut self, i: usize, j: usize) {
        self.heap.swap(i, j);
        self.index.insert(self.heap[i].id, i);
        self.index.insert(self.heap[j].id, j);
    }

    #[cfg(test)]
    fn assert_invariants(&self) {
        assert_eq!(self.heap.len(), self.index.len());
        for (i, node) in self.heap.iter().enumerate() {
            assert_eq!(self.index.get(&node.id), Some(&i), "index of {}", node.id);
            if i > 0 {
                let parent = (i - 1) / 2;
                assert!(self.heap[parent].expires <= node.expires, "heap order at {i}");
            }
        }
    }
}
