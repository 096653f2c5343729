//! Fixed-size pool of store handles.
//!
//! Admission goes through a [`Semaphore`] with `try_acquire`, so a caller
//! on a worker thread never blocks: an exhausted pool answers
//! [`StoreError::Busy`] immediately and the request is served a 503.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{Semaphore, SemaphorePermit, TryAcquireError};
use tracing::{debug, warn};

use super::{StoreError, UserStore};

/// One handle onto the shared [`UserStore`].
#[derive(Debug)]
pub struct StoreConn {
    id: usize,
    store: Arc<UserStore>,
}

impl StoreConn {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn register(&self, name: &str, password: &str) -> Result<bool, StoreError> {
        self.store.register(name, password)
    }

    pub fn verify(&self, name: &str, password: &str) -> bool {
        self.store.verify(name, password)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.store.contains(name)
    }
}

#[derive(Debug)]
pub struct StorePool {
    conns: Mutex<Vec<StoreConn>>,
    permits: Semaphore,
    size: usize,
    closed: AtomicBool,
}

impl StorePool {
    /// Pre-creates `size` handles onto `store`.
    ///
    /// # Panics
    ///
    /// Panics if `size` is zero.
    pub fn new(store: Arc<UserStore>, size: usize) -> Self {
        assert!(size > 0, "store pool size must be positive");

        let conns = (0..size)
            .map(|id| StoreConn {
                id,
                store: Arc::clone(&store),
            })
            .collect();

        debug!(size, "Store pool created");
        Self {
            conns: Mutex::new(conns),
            permits: Semaphore::new(size),
            size,
            closed: AtomicBool::new(false),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Takes a handle without waiting.
    pub fn acquire(&self) -> Result<PooledConn<'_>, StoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }

        let permit = match self.permits.try_acquire() {
            Ok(permit) => permit,
            Err(TryAcquireError::NoPermits) => {
                warn!("Store pool busy");
                return Err(StoreError::Busy);
            }
            Err(TryAcquireError::Closed) => return Err(StoreError::Closed),
        };

        // a permit guarantees a parked handle unless close() raced us
        let conn = self
            .conns
            .lock()
            .unwrap()
            .pop()
            .ok_or(StoreError::Closed)?;

        Ok(PooledConn {
            conn: Some(conn),
            pool: self,
            _permit: permit,
        })
    }

    /// Returns a handle early. Same as dropping the guard.
    pub fn release(&self, conn: PooledConn<'_>) {
        drop(conn);
    }

    /// Handles currently parked in the pool.
    pub fn free_count(&self) -> usize {
        self.conns.lock().unwrap().len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Drops every parked handle and fails all further acquires.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.permits.close();
        self.conns.lock().unwrap().clear();
        debug!("Store pool closed");
    }
}

/// RAII guard over a [`StoreConn`]; the handle goes back on drop.
#[derive(Debug)]
pub struct PooledConn<'a> {
    conn: Option<StoreConn>,
    pool: &'a StorePool,
    _permit: SemaphorePermit<'a>,
}

impl std::ops::Deref for PooledConn<'_> {
    type Target = StoreConn;

    fn deref(&self) -> &StoreConn {
        // Some until drop
        self.conn.as_ref().unwrap()
    }
}

impl Drop for PooledConn<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            if !self.pool.is_closed() {
                self.pool.conns.lock().unwrap().push(conn);
            }
        }
    }
}
