//! HTTP/1.x Request Parsing
//!
//! Incremental: [`parse_request`] looks at the front of the inbound buffer
//! and either returns one complete request with the number of bytes it
//! used, asks for more data, or reports the input as malformed.
//!
//! ```text
//!   GET /login HTTP/1.1\r\n          request line ┐
//!   Host: example\r\n                 headers      ├ httparse
//!   Content-Length: 27\r\n                         │
//!   \r\n                                          ┘ body_offset
//!   username=ariz&password=x          body (Content-Length bytes)
//! ```
//!
//! Bodies are delimited by `Content-Length` only. `Transfer-Encoding` is
//! rejected as unsupported.

use bytes::Bytes;
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http::{Method, Version};
use httparse::Status;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::trace;

use super::handler::ParseResult;

/// Maximum number of request headers.
pub const MAX_HEADERS: usize = 64;

/// Maximum size of the request line plus headers.
pub const MAX_HEADER_BYTES: usize = 8 * 1024;

/// Maximum request body size.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Pages reachable without their `.html` suffix.
const DEFAULT_HTML: [&str; 6] = [
    "/index", "/register", "/login", "/welcome", "/video", "/picture",
];

/// Errors that make a request unparseable.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HttpParseError {
    #[error("invalid request head: {0}")]
    InvalidHead(#[source] httparse::Error),

    #[error("too many headers (max: {max})")]
    TooManyHeaders { max: usize },

    #[error("request head too large: {size} bytes (max: {max})")]
    HeadTooLarge { size: usize, max: usize },

    #[error("unsupported HTTP version 1.{0}")]
    UnsupportedVersion(u8),

    #[error("invalid method: {0}")]
    InvalidMethod(String),

    #[error("invalid header: {0}")]
    InvalidHeader(String),

    #[error("invalid content-length: {0}")]
    InvalidContentLength(String),

    #[error("transfer-encoding is not supported")]
    UnsupportedTransferEncoding,

    #[error("body too large: {size} bytes (max: {max})")]
    BodyTooLarge { size: usize, max: usize },
}

/// A parsed request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    method: Method,
    path: String,
    query: Option<String>,
    version: Version,
    headers: HeaderMap,
    body: Bytes,
}

impl HttpRequest {
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Request path after normalisation (`/` → `/index.html`, known pages
    /// get their `.html` suffix).
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header_str(&self, name: &HeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// HTTP/1.1 stays open unless the client sent `Connection: close`;
    /// HTTP/1.0 only with an explicit `Connection: keep-alive`.
    pub fn is_keep_alive(&self) -> bool {
        let has_token = |token: &str| {
            self.headers
                .get_all(header::CONNECTION)
                .iter()
                .filter_map(|v| v.to_str().ok())
                .flat_map(|v| v.split(','))
                .any(|t| t.trim().eq_ignore_ascii_case(token))
        };

        match self.version {
            Version::HTTP_11 => !has_token("close"),
            Version::HTTP_10 => has_token("keep-alive"),
            _ => false,
        }
    }

    /// Whether the body is an urlencoded form.
    pub fn is_form(&self) -> bool {
        self.header_str(&header::CONTENT_TYPE).is_some_and(|ct| {
            ct.split(';')
                .next()
                .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("application/x-www-form-urlencoded"))
        })
    }

    /// Decodes an urlencoded body into `T`.
    pub fn form<T: DeserializeOwned>(&self) -> Result<T, serde_urlencoded::de::Error> {
        serde_urlencoded::from_bytes(&self.body)
    }
}

/// Attempts to parse one request from the front of `input`.
pub fn parse_request(input: &[u8]) -> ParseResult<HttpRequest, HttpParseError> {
    match try_parse(input) {
        Ok(Some((request, consumed))) => ParseResult::Complete { request, consumed },
        Ok(None) => ParseResult::NeedMoreData,
        Err(e) => ParseResult::Malformed(e),
    }
}

fn try_parse(input: &[u8]) -> Result<Option<(HttpRequest, usize)>, HttpParseError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut headers);

    let body_offset = match req.parse(input) {
        Ok(Status::Complete(offset)) => offset,
        Ok(Status::Partial) => {
            if input.len() > MAX_HEADER_BYTES {
                return Err(HttpParseError::HeadTooLarge {
                    size: input.len(),
                    max: MAX_HEADER_BYTES,
                });
            }
            return Ok(None);
        }
        Err(httparse::Error::TooManyHeaders) => {
            return Err(HttpParseError::TooManyHeaders { max: MAX_HEADERS })
        }
        Err(e) => return Err(HttpParseError::InvalidHead(e)),
    };

    if body_offset > MAX_HEADER_BYTES {
        return Err(HttpParseError::HeadTooLarge {
            size: body_offset,
            max: MAX_HEADER_BYTES,
        });
    }

    // httparse fills method, path and version on Complete
    let raw_method = req.method.unwrap_or_default();
    let method = Method::from_bytes(raw_method.as_bytes())
        .map_err(|_| HttpParseError::InvalidMethod(raw_method.to_owned()))?;

    let version = match req.version {
        Some(0) => Version::HTTP_10,
        Some(1) => Version::HTTP_11,
        Some(v) => return Err(HttpParseError::UnsupportedVersion(v)),
        None => return Err(HttpParseError::UnsupportedVersion(0)),
    };

    let mut header_map = HeaderMap::with_capacity(req.headers.len());
    for h in req.headers.iter() {
        let name = HeaderName::from_bytes(h.name.as_bytes())
            .map_err(|_| HttpParseError::InvalidHeader(h.name.to_owned()))?;
        let value = HeaderValue::from_bytes(h.value)
            .map_err(|_| HttpParseError::InvalidHeader(h.name.to_owned()))?;
        header_map.append(name, value);
    }

    if header_map.contains_key(header::TRANSFER_ENCODING) {
        return Err(HttpParseError::UnsupportedTransferEncoding);
    }

    let content_length = match header_map.get(header::CONTENT_LENGTH) {
        None => 0,
        Some(v) => {
            let s = v
                .to_str()
                .map_err(|_| HttpParseError::InvalidContentLength("not ascii".into()))?;
            s.trim()
                .parse::<usize>()
                .map_err(|_| HttpParseError::InvalidContentLength(s.to_owned()))?
        }
    };

    if content_length > MAX_BODY_BYTES {
        return Err(HttpParseError::BodyTooLarge {
            size: content_length,
            max: MAX_BODY_BYTES,
        });
    }

    let total = body_offset + content_length;
    if input.len() < total {
        trace!(have = input.len(), need = total, "Waiting for request body");
        return Ok(None);
    }

    let raw_path = req.path.unwrap_or("/");
    let (path, query) = match raw_path.split_once('?') {
        Some((p, q)) => (p, Some(q.to_owned())),
        None => (raw_path, None),
    };

    let request = HttpRequest {
        method,
        path: normalize_path(path),
        query,
        version,
        headers: header_map,
        body: Bytes::copy_from_slice(&input[body_offset..total]),
    };

    Ok(Some((request, total)))
}

fn normalize_path(path: &str) -> String {
    if path == "/" {
        return "/index.html".to_owned();
    }
    if DEFAULT_HTML.contains(&path) {
        return format!("{path}.html");
    }
    path.to_owned()
}
