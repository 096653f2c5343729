//! The Reactor Loop
//!
//! One thread owns the listener, the [`Multiplexer`], the [`TimerHeap`] and
//! the connection table. Each pass of the loop:
//!
//! ```text
//!   next_tick ──> evict expired ──> wait(timeout) ──┬─ LISTENER ──> accept
//!       ▲                                           ├─ WAKER    ──> drain eventfd
//!       │                                           └─ conn id  ──> dispatch task
//!       └────────────── apply completions <───────────────────────────┘
//! ```
//!
//! Connections are registered one-shot, so a connection has at most one
//! task in flight. When a task finishes the worker pushes a [`Completion`]
//! and wakes the loop, which refreshes the timer and re-arms interest or
//! evicts. Only this thread mutates the multiplexer, the heap and the table.

use std::collections::HashMap;
use std::io::Write;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_queue::SegQueue;
use tracing::{debug, error, info, warn};

use super::connection::{Completion, ConnId, Connection, Op, Outcome};
use super::multiplexer::{Event, Interest, Multiplexer};
use super::stats::ServerStats;
use super::waker::Waker;
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::pool::WorkerPool;
use crate::protocol::ProtocolHandler;
use crate::timer::{EvictReason, TimerHeap};

/// Multiplexer token of the listening socket.
const LISTENER: u64 = u64::MAX;

/// Multiplexer token of the completion eventfd.
const WAKER: u64 = u64::MAX - 1;

pub struct Reactor<H: ProtocolHandler> {
    config: ServerConfig,
    listener: TcpListener,
    local_addr: SocketAddr,
    mux: Multiplexer,
    waker: Arc<Waker>,
    timers: TimerHeap,
    conns: HashMap<ConnId, Arc<Connection>>,
    next_id: ConnId,
    pool: WorkerPool,
    handler: Arc<H>,
    completions: Arc<SegQueue<Completion>>,
    stats: Arc<ServerStats>,
    shutdown: Arc<AtomicBool>,
}

impl<H: ProtocolHandler> Reactor<H> {
    /// Binds the listener and sets up the multiplexer, eventfd and workers.
    /// Nothing is served until [`Reactor::run`] or [`Reactor::spawn`].
    pub fn bind(config: ServerConfig, handler: H) -> Result<Self, ServerError> {
        config.validate(false)?;
        let addr = config.socket_addr()?;

        let listener = TcpListener::bind(addr).map_err(|source| ServerError::Bind {
            addr: config.bind_address(),
            source,
        })?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let mux = Multiplexer::new(config.max_events).map_err(ServerError::Multiplexer)?;
        let waker = Waker::new().map_err(ServerError::Multiplexer)?;

        let mut listen_interest = Interest::READABLE;
        if config.trigger_mode.listener_edge() {
            listen_interest = listen_interest | Interest::EDGE;
        }
        mux.add(listener.as_raw_fd(), LISTENER, listen_interest)
            .map_err(ServerError::Multiplexer)?;
        mux.add(waker.as_raw_fd(), WAKER, Interest::READABLE)
            .map_err(ServerError::Multiplexer)?;

        let pool = WorkerPool::new(config.worker_threads, config.task_queue_capacity)
            .map_err(ServerError::WorkerPool)?;

        Ok(Self {
            listener,
            local_addr,
            mux,
            waker: Arc::new(waker),
            timers: TimerHeap::new(),
            conns: HashMap::new(),
            next_id: 0,
            pool,
            handler: Arc::new(handler),
            completions: Arc::new(SegQueue::new()),
            stats: Arc::new(ServerStats::new()),
            shutdown: Arc::new(AtomicBool::new(false)),
            config,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stats(&self) -> Arc<ServerStats> {
        Arc::clone(&self.stats)
    }

    /// Runs the loop on the current thread until shutdown is requested or
    /// the multiplexer fails. Every connection is closed on the way out.
    pub fn run(&mut self) -> Result<(), ServerError> {
        info!(
            addr = %self.local_addr,
            trigger_mode = self.config.trigger_mode.code(),
            workers = self.pool.threads(),
            "Reactor started"
        );

        let result = self.event_loop();

        self.close_all();
        self.pool.shutdown();
        info!("Reactor stopped");
        result
    }

    /// Moves the reactor onto its own thread.
    pub fn spawn(self) -> Result<ServerHandle, ServerError> {
        let local_addr = self.local_addr;
        let stats = Arc::clone(&self.stats);
        let shutdown = Arc::clone(&self.shutdown);
        let waker = Arc::clone(&self.waker);

        let mut reactor = self;
        let thread = thread::Builder::new()
            .name("tinyweb-reactor".to_string())
            .spawn(move || reactor.run())
            .map_err(ServerError::Spawn)?;

        Ok(ServerHandle {
            local_addr,
            stats,
            shutdown,
            waker,
            thread: Some(thread),
        })
    }

    fn event_loop(&mut self) -> Result<(), ServerError> {
        let mut expired = Vec::new();
        while !self.shutdown.load(Ordering::Acquire) {
            let timeout = self.timers.next_tick(Instant::now(), &mut expired);
            for node in expired.drain(..) {
                if node.reason == EvictReason::IdleTimeout {
                    self.stats.idle_timeout();
                }
                self.evict(node.id, node.reason);
            }

            let ready = self.mux.wait(timeout)?;
            for i in 0..ready {
                let event = self.mux.event(i);
                match event.token {
                    LISTENER => self.accept(),
                    WAKER => self.waker.drain(),
                    id => self.on_connection_event(id, event),
                }
            }

            self.apply_completions();
        }
        Ok(())
    }

    fn accept(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => self.admit(stream, peer),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(error = %e, "Accept failed");
                    return;
                }
            }
            if !self.config.trigger_mode.listener_edge() {
                return;
            }
        }
    }

    fn admit(&mut self, mut stream: TcpStream, peer: SocketAddr) {
        if self.conns.len() >= self.config.max_connections {
            self.stats.connection_rejected();
            warn!(%peer, active = self.conns.len(), "Server busy, rejecting connection");
            let delivered = stream
                .set_nonblocking(true)
                .and_then(|()| stream.write_all(&self.handler.reject_response()));
            if let Err(e) = delivered {
                debug!(%peer, error = %e, "Rejection not delivered");
            }
            return;
        }

        if let Err(e) = stream.set_nonblocking(true) {
            warn!(%peer, error = %e, "Cannot make socket non-blocking");
            return;
        }
        let _ = stream.set_nodelay(true);

        let id = self.next_id;
        self.next_id += 1;
        let conn = Arc::new(Connection::new(id, stream, peer));

        if let Err(e) = self.mux.add(conn.fd(), id, self.interest(Op::Read, true)) {
            warn!(%peer, error = %e, "Cannot register connection");
            return;
        }
        if let Some(timeout) = self.config.idle_timeout() {
            self.timers.add(id, timeout, EvictReason::IdleTimeout);
        }
        self.conns.insert(id, conn);
        self.stats.connection_opened();

        info!(conn = id, %peer, active = self.conns.len(), "Client connected");
    }

    fn on_connection_event(&mut self, id: ConnId, event: Event) {
        let Some(conn) = self.conns.get(&id).map(Arc::clone) else {
            return;
        };

        // a half-close goes through a read so buffered requests get answered
        if event.is_error() {
            self.evict(id, EvictReason::IoError);
        } else if event.is_closed() {
            self.evict(id, EvictReason::PeerClosed);
        } else if event.is_writable() {
            self.dispatch(conn, Op::Write);
        } else if event.is_readable() || event.is_read_closed() {
            self.dispatch(conn, Op::Read);
        }
    }

    /// Hands one read or write task for `conn` to the worker pool.
    fn dispatch(&mut self, conn: Arc<Connection>, op: Op) {
        let id = conn.id();
        if let Some(timeout) = self.config.idle_timeout() {
            self.timers.adjust(id, timeout);
        }

        let handler = Arc::clone(&self.handler);
        let stats = Arc::clone(&self.stats);
        let completions = Arc::clone(&self.completions);
        let waker = Arc::clone(&self.waker);
        let edge = self.config.trigger_mode.connection_edge();

        let task = move || {
            if let Some(done) = conn.serve(op, handler.as_ref(), edge, &stats) {
                completions.push(done);
                if let Err(e) = waker.wake() {
                    error!(error = %e, "Cannot wake reactor");
                }
            }
        };

        if self.pool.add_task(task).is_err() {
            self.evict(id, EvictReason::Shutdown);
        }
    }

    fn apply_completions(&mut self) {
        while let Some(done) = self.completions.pop() {
            if !self.conns.contains_key(&done.id) {
                continue;
            }
            match done.outcome {
                Outcome::WantRead => self.rearm(done, Op::Read),
                Outcome::WantWrite => self.rearm(done, Op::Write),
                Outcome::Close(reason) => {
                    self.evict(done.id, reason);
                }
            }
        }
    }

    fn rearm(&mut self, done: Completion, op: Op) {
        let Some(conn) = self.conns.get(&done.id) else {
            return;
        };
        let fd = conn.fd();

        if done.activity {
            if let Some(timeout) = self.config.idle_timeout() {
                self.timers.adjust(done.id, timeout);
            }
        }
        // RDHUP stays asserted after a half-close and would fire forever
        let interest = self.interest(op, !done.read_closed);
        if let Err(e) = self.mux.modify(fd, done.id, interest) {
            warn!(conn = done.id, error = %e, "Cannot re-arm connection");
            self.evict(done.id, EvictReason::IoError);
        }
    }

    fn interest(&self, op: Op, watch_hangup: bool) -> Interest {
        let mut interest = match op {
            Op::Read => Interest::READABLE,
            Op::Write => Interest::WRITABLE,
        } | Interest::ONESHOT;
        if watch_hangup {
            interest = interest | Interest::PEER_HANGUP;
        }
        if self.config.trigger_mode.connection_edge() {
            interest = interest | Interest::EDGE;
        }
        interest
    }

    /// Removes a connection from the table, the timers and the multiplexer.
    /// Returns `false` if it was already gone.
    fn evict(&mut self, id: ConnId, reason: EvictReason) -> bool {
        let Some(conn) = self.conns.remove(&id) else {
            return false;
        };
        self.timers.cancel(id);
        conn.mark_closed();
        if let Err(e) = self.mux.remove(conn.fd()) {
            debug!(conn = id, error = %e, "Deregister failed");
        }
        self.stats.connection_closed();

        match reason {
            EvictReason::IoError => {
                warn!(conn = id, peer = %conn.peer(), %reason, "Client closed")
            }
            EvictReason::IdleTimeout | EvictReason::Malformed => {
                info!(conn = id, peer = %conn.peer(), %reason, "Client closed")
            }
            _ => debug!(conn = id, peer = %conn.peer(), %reason, "Client closed"),
        }
        true
    }

    fn close_all(&mut self) {
        let ids: Vec<ConnId> = self.conns.keys().copied().collect();
        for id in ids {
            self.evict(id, EvictReason::Shutdown);
        }
        self.timers.clear();
    }
}

/// Handle to a reactor running on its own thread.
pub struct ServerHandle {
    local_addr: SocketAddr,
    stats: Arc<ServerStats>,
    shutdown: Arc<AtomicBool>,
    waker: Arc<Waker>,
    thread: Option<JoinHandle<Result<(), ServerError>>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stops the loop, closes every connection and joins the reactor
    /// thread. Returns the loop's error, if it stopped on one.
    pub fn shutdown(&mut self) -> Result<(), ServerError> {
        if self.thread.is_none() {
            return Ok(());
        }
        self.shutdown.store(true, Ordering::Release);
        self.waker.wake()?;
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };
        thread.join().map_err(|_| ServerError::Panicked)?
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!(error = %e, "Reactor shutdown failed");
        }
    }
}
