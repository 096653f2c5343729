//! Fixed Worker Pool
//!
//! N named threads share one [`BoundedQueue`] of boxed closures. A worker
//! pops, runs, repeats, and exits when the queue reports closed.
//!
//! A task that panics is caught and logged; the worker keeps going.

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, error};

use super::queue::{BoundedQueue, QueueClosed};

/// Unit of work accepted by the pool.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Fixed-size pool of worker threads.
pub struct WorkerPool {
    queue: Arc<BoundedQueue<Task>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `threads` workers over a queue holding at most
    /// `queue_capacity` pending tasks.
    ///
    /// # Panics
    ///
    /// Panics if either argument is zero.
    pub fn new(threads: usize, queue_capacity: usize) -> io::Result<Self> {
        assert!(threads > 0, "worker pool needs at least one thread");

        let queue: Arc<BoundedQueue<Task>> = Arc::new(BoundedQueue::new(queue_capacity));
        let mut workers = Vec::with_capacity(threads);

        for i in 0..threads {
            let worker_queue = Arc::clone(&queue);
            let spawned = thread::Builder::new()
                .name(format!("tinyweb-worker-{i}"))
                .spawn(move || worker_loop(&worker_queue));

            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    queue.close();
                    for handle in workers {
                        let _ = handle.join();
                    }
                    return Err(e);
                }
            }
        }

        debug!(threads, queue_capacity, "Worker pool started");
        Ok(Self { queue, workers })
    }

    pub fn threads(&self) -> usize {
        self.workers.len()
    }

    /// Number of tasks waiting for a worker.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Enqueues a task, blocking while the queue is full.
    ///
    /// Fails only after [`WorkerPool::shutdown`]; the task is dropped.
    pub fn add_task<F>(&self, f: F) -> Result<(), QueueClosed<Task>>
    where
        F: FnOnce() + Send + 'static,
    {
        self.queue.push_back(Box::new(f))
    }

    /// Closes the queue and joins every worker.
    ///
    /// Tasks still queued are discarded. Tasks already running finish.
    pub fn shutdown(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        self.queue.close();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                error!("Worker thread exited abnormally");
            }
        }
        debug!("Worker pool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(queue: &BoundedQueue<Task>) {
    while let Some(task) = queue.pop() {
        if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
            error!(
                worker = thread::current().name().unwrap_or("worker"),
                "Task panicked"
            );
        }
    }
}
