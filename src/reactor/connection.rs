//! Per-Connection State and the Worker Task
//!
//! ## Lifecycle
//!
//! ```text
//!   Accepted ──> Reading ──> Processing ──> Writing ──┬─> Reading   (keep-alive)
//!                   ▲                         │       └─> Closing   (done / error)
//!                   └──── WantRead ───────────┘
//!                                  WantWrite: resume Writing on the next
//!                                             write readiness
//! ```
//!
//! One worker task runs read → process → write for one readiness event and
//! reports an [`Outcome`]. The reactor turns that into a re-arm or an
//! eviction; workers never touch the multiplexer or the timers.
//!
//! A [`Connection`] is shared between the reactor's table and at most one
//! in-flight task. Eviction sets the `closed` flag and drops the table's
//! reference; the socket closes when the last reference goes.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::os::fd::{AsRawFd, RawFd};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tracing::{debug, error, trace};

use super::ServerStats;
use crate::buffer::Buffer;
use crate::protocol::{ParseResult, ProtocolHandler};
use crate::timer::EvictReason;

/// Connection identifier. Doubles as the multiplexer token and timer id.
pub type ConnId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Reading,
    Processing,
    Writing,
    Closing,
}

/// Which readiness a task is serving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Op {
    Read,
    Write,
}

/// What a task wants the reactor to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    WantRead,
    WantWrite,
    Close(EvictReason),
}

/// Report pushed by a worker when a task finishes.
#[derive(Debug)]
pub(crate) struct Completion {
    pub id: ConnId,
    pub outcome: Outcome,
    /// Bytes moved in either direction.
    pub activity: bool,
    /// The peer has shut down its write side.
    pub read_closed: bool,
}

/// Socket plus buffers. Only the task holding the lock touches it.
#[derive(Debug)]
pub(crate) struct ConnIo<S> {
    stream: S,
    inbound: Buffer,
    outbound: Buffer,
    keep_alive: bool,
    malformed: bool,
    read_closed: bool,
    state: ConnState,
}

impl<S: Read + Write> ConnIo<S> {
    pub(crate) fn new(stream: S) -> Self {
        Self {
            stream,
            inbound: Buffer::new(),
            outbound: Buffer::new(),
            keep_alive: true,
            malformed: false,
            read_closed: false,
            state: ConnState::Reading,
        }
    }

    /// Runs one task. Returns the outcome and whether any bytes moved.
    pub(crate) fn run<H: ProtocolHandler>(
        &mut self,
        op: Op,
        handler: &H,
        edge: bool,
        stats: &ServerStats,
    ) -> (Outcome, bool) {
        let mut read = 0;
        if op == Op::Read {
            self.state = ConnState::Reading;
            match self.fill(edge, stats) {
                Ok(n) => read = n,
                Err(reason) => {
                    self.state = ConnState::Closing;
                    return (Outcome::Close(reason), false);
                }
            }
            if self.read_closed && self.inbound.is_empty() && self.outbound.is_empty() {
                self.state = ConnState::Closing;
                return (Outcome::Close(EvictReason::PeerClosed), read > 0);
            }
            self.state = ConnState::Processing;
            self.process(handler, stats);
        }

        let (outcome, written) = self.flush(handler, stats);
        if let Outcome::Close(_) = outcome {
            self.state = ConnState::Closing;
        }
        (outcome, read + written > 0)
    }

    /// Reads into the inbound buffer: once in level mode, until would-block
    /// or end of stream in edge mode.
    fn fill(&mut self, edge: bool, stats: &ServerStats) -> Result<usize, EvictReason> {
        let mut total = 0;
        loop {
            match self.inbound.read_from(&mut self.stream) {
                Ok(0) => {
                    self.read_closed = true;
                    return Ok(total);
                }
                Ok(n) => {
                    total += n;
                    stats.bytes_read(n);
                    if !edge {
                        return Ok(total);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(total),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(io_reason(&e)),
            }
        }
    }

    /// Parses and answers every complete request in the inbound buffer.
    /// Stops after a response that closes the connection.
    fn process<H: ProtocolHandler>(&mut self, handler: &H, stats: &ServerStats) {
        while !self.inbound.is_empty() && self.keep_alive {
            match handler.parse(self.inbound.peek()) {
                ParseResult::Complete { request, consumed } => {
                    self.inbound.retrieve(consumed);
                    let response = handler.build_response(request);
                    self.outbound.append(&response.bytes);
                    self.keep_alive = response.keep_alive;
                    stats.request_processed();
                }
                ParseResult::NeedMoreData => {
                    trace!(buffered = self.inbound.readable_bytes(), "Partial request");
                    break;
                }
                ParseResult::Malformed(e) => {
                    debug!(error = %e, "Malformed request");
                    stats.malformed_request();
                    self.outbound.append(&handler.malformed_response(&e));
                    self.inbound.retrieve_all();
                    self.keep_alive = false;
                    self.malformed = true;
                }
            }
        }
    }

    /// Drains the outbound buffer. Returns the outcome and bytes written.
    fn flush<H: ProtocolHandler>(&mut self, handler: &H, stats: &ServerStats) -> (Outcome, usize) {
        let mut written = 0;
        loop {
            if self.outbound.is_empty() {
                if self.malformed {
                    return (Outcome::Close(EvictReason::Malformed), written);
                }
                if !self.keep_alive {
                    return (Outcome::Close(EvictReason::Finished), written);
                }
                // pipelined requests that arrived with the last read
                if !self.inbound.is_empty() {
                    self.process(handler, stats);
                    if !self.outbound.is_empty() {
                        continue;
                    }
                }
                if self.read_closed {
                    return (Outcome::Close(EvictReason::PeerClosed), written);
                }
                self.state = ConnState::Reading;
                return (Outcome::WantRead, written);
            }

            self.state = ConnState::Writing;
            match self.outbound.write_to(&mut self.stream) {
                Ok(0) => return (Outcome::Close(EvictReason::IoError), written),
                Ok(n) => {
                    written += n;
                    stats.bytes_written(n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return (Outcome::WantWrite, written)
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return (Outcome::Close(io_reason(&e)), written),
            }
        }
    }
}

fn io_reason(e: &io::Error) -> EvictReason {
    match e.kind() {
        io::ErrorKind::ConnectionReset | io::ErrorKind::BrokenPipe => EvictReason::PeerClosed,
        _ => {
            debug!(error = %e, "Socket error");
            EvictReason::IoError
        }
    }
}

/// An accepted client.
#[derive(Debug)]
pub struct Connection {
    id: ConnId,
    peer: SocketAddr,
    fd: RawFd,
    closed: AtomicBool,
    io: Mutex<ConnIo<TcpStream>>,
}

impl Connection {
    pub(crate) fn new(id: ConnId, stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            id,
            peer,
            fd: stream.as_raw_fd(),
            closed: AtomicBool::new(false),
            io: Mutex::new(ConnIo::new(stream)),
        }
    }

    pub fn id(&self) -> ConnId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Runs one task on a worker thread. `None` if the connection was
    /// evicted before the task got to it.
    pub(crate) fn serve<H: ProtocolHandler>(
        &self,
        op: Op,
        handler: &H,
        edge: bool,
        stats: &ServerStats,
    ) -> Option<Completion> {
        if self.is_closed() {
            return None;
        }
        let mut io = self.io.lock().unwrap();
        if self.is_closed() {
            return None;
        }

        // the guard stays outside the unwind boundary so the lock is never poisoned
        let ran = panic::catch_unwind(AssertUnwindSafe(|| io.run(op, handler, edge, stats)));
        let (outcome, activity) = match ran {
            Ok(done) => done,
            Err(_) => {
                error!(
                    conn = self.id,
                    peer = %self.peer,
                    ?op,
                    "Handler panicked, closing connection"
                );
                io.state = ConnState::Closing;
                (Outcome::Close(EvictReason::IoError), false)
            }
        };
        trace!(conn = self.id, ?op, ?outcome, state = ?io.state, "Task finished");
        Some(Completion {
            id: self.id,
            outcome,
            activity,
            read_closed: io.read_closed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Response;
    use bytes::Bytes;
    use std::collections::VecDeque;

    /// Newline-delimited echo. `bye` closes, `!` is malformed.
    struct LineHandler;

    #[derive(Debug, thiserror::Error)]
    #[error("bad line")]
    struct BadLine;

    impl ProtocolHandler for LineHandler {
        type Request = String;
        type Error = BadLine;

        fn parse(&self, input: &[u8]) -> ParseResult<String, BadLine> {
            match input.iter().position(|&b| b == b'\n') {
                None => ParseResult::NeedMoreData,
                Some(i) if &input[..i] == b"!" => ParseResult::Malformed(BadLine),
                Some(i) => ParseResult::Complete {
                    request: String::from_utf8_lossy(&input[..i]).into_owned(),
                    consumed: i + 1,
                },
            }
        }

        fn build_response(&self, line: String) -> Response {
            let keep_alive = line != "bye";
            Response::new(format!("echo: {line}\n"), keep_alive)
        }

        fn malformed_response(&self, _: &BadLine) -> Bytes {
            Bytes::from_static(b"error\n")
        }

        fn reject_response(&self) -> Bytes {
            Bytes::from_static(b"busy\n")
        }
    }

    enum Chunk {
        Data(Vec<u8>),
        Eof,
    }

    /// Scripted socket: reads pop chunks (then would-block), writes accept
    /// at most `budget` bytes before would-block.
    struct MockStream {
        input: VecDeque<Chunk>,
        output: Vec<u8>,
        budget: usize,
    }

    impl MockStream {
        fn new(chunks: &[&[u8]]) -> Self {
            Self {
                input: chunks.iter().map(|c| Chunk::Data(c.to_vec())).collect(),
                output: Vec::new(),
                budget: usize::MAX,
            }
        }
    }

    impl Read for MockStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.input.pop_front() {
                None => Err(io::ErrorKind::WouldBlock.into()),
                Some(Chunk::Eof) => Ok(0),
                Some(Chunk::Data(mut data)) => {
                    let n = data.len().min(buf.len());
                    buf[..n].copy_from_slice(&data[..n]);
                    if n < data.len() {
                        self.input.push_front(Chunk::Data(data.split_off(n)));
                    }
                    Ok(n)
                }
            }
        }
    }

    impl Write for MockStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.budget == 0 {
                return Err(io::ErrorKind::WouldBlock.into());
            }
            let n = buf.len().min(self.budget);
            self.output.extend_from_slice(&buf[..n]);
            self.budget -= n;
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn run(io: &mut ConnIo<MockStream>, op: Op, edge: bool) -> Outcome {
        io.run(op, &LineHandler, edge, &ServerStats::new()).0
    }

    #[test]
    fn test_request_in_one_read_keeps_connection() {
        let mut io = ConnIo::new(MockStream::new(&[b"hello\n"]));

        assert_eq!(run(&mut io, Op::Read, true), Outcome::WantRead);
        assert_eq!(io.stream.output, b"echo: hello\n");
        assert_eq!(io.state, ConnState::Reading);
    }

    #[test]
    fn test_request_split_across_reads() {
        let mut io = ConnIo::new(MockStream::new(&[b"hel"]));

        assert_eq!(run(&mut io, Op::Read, true), Outcome::WantRead);
        assert!(io.stream.output.is_empty());

        io.stream.input.push_back(Chunk::Data(b"lo\n".to_vec()));
        assert_eq!(run(&mut io, Op::Read, true), Outcome::WantRead);
        assert_eq!(io.stream.output, b"echo: hello\n");
    }

    #[test]
    fn test_pipelined_requests_answered_in_order() {
        let mut io = ConnIo::new(MockStream::new(&[b"a\nb\nc"]));

        assert_eq!(run(&mut io, Op::Read, true), Outcome::WantRead);
        assert_eq!(io.stream.output, b"echo: a\necho: b\n");
        assert_eq!(io.inbound.peek(), b"c");
    }

    #[test]
    fn test_not_keep_alive_closes_after_flush() {
        let mut io = ConnIo::new(MockStream::new(&[b"bye\nignored\n"]));

        assert_eq!(
            run(&mut io, Op::Read, true),
            Outcome::Close(EvictReason::Finished)
        );
        assert_eq!(io.stream.output, b"echo: bye\n");
        assert_eq!(io.state, ConnState::Closing);
    }

    #[test]
    fn test_malformed_sends_error_then_closes() {
        let mut io = ConnIo::new(MockStream::new(&[b"!\nhello\n"]));

        assert_eq!(
            run(&mut io, Op::Read, true),
            Outcome::Close(EvictReason::Malformed)
        );
        assert_eq!(io.stream.output, b"error\n");
    }

    #[test]
    fn test_partial_write_resumes_without_loss() {
        let mut stream = MockStream::new(&[b"0123456789\n"]);
        stream.budget = 5;
        let mut io = ConnIo::new(stream);

        assert_eq!(run(&mut io, Op::Read, true), Outcome::WantWrite);
        assert_eq!(io.state, ConnState::Writing);
        assert_eq!(io.stream.output, b"echo:");

        io.stream.budget = 4;
        assert_eq!(run(&mut io, Op::Write, true), Outcome::WantWrite);

        io.stream.budget = usize::MAX;
        assert_eq!(run(&mut io, Op::Write, true), Outcome::WantRead);
        assert_eq!(io.stream.output, b"echo: 0123456789\n");
    }

    #[test]
    fn test_eof_closes() {
        let mut stream = MockStream::new(&[]);
        stream.input.push_back(Chunk::Eof);
        let mut io = ConnIo::new(stream);

        assert_eq!(
            run(&mut io, Op::Read, true),
            Outcome::Close(EvictReason::PeerClosed)
        );
    }

    #[test]
    fn test_half_close_still_answered() {
        let mut stream = MockStream::new(&[b"hello\n"]);
        stream.input.push_back(Chunk::Eof);
        let mut io = ConnIo::new(stream);

        assert_eq!(
            run(&mut io, Op::Read, true),
            Outcome::Close(EvictReason::PeerClosed)
        );
        assert_eq!(io.stream.output, b"echo: hello\n");
    }

    #[test]
    fn test_half_close_waits_for_pending_write() {
        let mut stream = MockStream::new(&[b"hello\n"]);
        stream.input.push_back(Chunk::Eof);
        stream.budget = 3;
        let mut io = ConnIo::new(stream);

        assert_eq!(run(&mut io, Op::Read, true), Outcome::WantWrite);
        assert!(io.read_closed);

        io.stream.budget = usize::MAX;
        assert_eq!(
            run(&mut io, Op::Write, true),
            Outcome::Close(EvictReason::PeerClosed)
        );
        assert_eq!(io.stream.output, b"echo: hello\n");
    }

    #[test]
    fn test_level_mode_reads_once() {
        let mut io = ConnIo::new(MockStream::new(&[b"one\n", b"two\n"]));

        assert_eq!(run(&mut io, Op::Read, false), Outcome::WantRead);
        assert_eq!(io.stream.output, b"echo: one\n");

        assert_eq!(run(&mut io, Op::Read, false), Outcome::WantRead);
        assert_eq!(io.stream.output, b"echo: one\necho: two\n");
    }

    #[test]
    fn test_edge_mode_drains_socket() {
        let mut io = ConnIo::new(MockStream::new(&[b"one\n", b"two\n"]));

        assert_eq!(run(&mut io, Op::Read, true), Outcome::WantRead);
        assert_eq!(io.stream.output, b"echo: one\necho: two\n");
        assert!(io.stream.input.is_empty());
    }

    #[test]
    fn test_activity_reported() {
        let stats = ServerStats::new();
        let mut io = ConnIo::new(MockStream::new(&[]));
        let (outcome, activity) = io.run(Op::Read, &LineHandler, true, &stats);
        assert_eq!(outcome, Outcome::WantRead);
        assert!(!activity);

        io.stream.input.push_back(Chunk::Data(b"x\n".to_vec()));
        let (_, activity) = io.run(Op::Read, &LineHandler, true, &stats);
        assert!(activity);
        assert_eq!(stats.snapshot().requests_processed, 1);
        assert_eq!(stats.snapshot().bytes_read, 2);
    }
}
