//! The seam between the reactor and an application protocol.
//!
//! The reactor never interprets bytes. It hands the inbound buffer to a
//! [`ProtocolHandler`], appends whatever the handler produces to the
//! outbound buffer, and keeps only the keep-alive verdict.

use bytes::Bytes;

/// Outcome of trying to parse one request off the front of the inbound
/// buffer.
#[derive(Debug, PartialEq, Eq)]
pub enum ParseResult<R, E> {
    /// A full request. `consumed` bytes may be discarded from the buffer.
    Complete { request: R, consumed: usize },
    /// The buffer holds a prefix of a request; read more and try again.
    NeedMoreData,
    /// The bytes can never form a valid request.
    Malformed(E),
}

/// A serialized response and whether the connection stays open after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub bytes: Bytes,
    pub keep_alive: bool,
}

impl Response {
    pub fn new(bytes: impl Into<Bytes>, keep_alive: bool) -> Self {
        Self {
            bytes: bytes.into(),
            keep_alive,
        }
    }
}

/// Application protocol driven by the reactor.
///
/// Handlers are shared by every worker thread and must not block for long:
/// a slow handler holds a worker, and a connection, hostage.
pub trait ProtocolHandler: Send + Sync + 'static {
    type Request: Send;
    type Error: std::error::Error + Send;

    /// Parses at most one request from the front of `input`.
    fn parse(&self, input: &[u8]) -> ParseResult<Self::Request, Self::Error>;

    /// Builds the response to a parsed request.
    fn build_response(&self, request: Self::Request) -> Response;

    /// Bytes sent before closing a connection whose input was malformed.
    fn malformed_response(&self, error: &Self::Error) -> Bytes;

    /// Bytes sent to a connection refused because the server is full.
    fn reject_response(&self) -> Bytes;
}
