//! HTTP Response Building
//!
//! Serves files from a document root. Every status other than 200 gets an
//! error page: `<root>/<code>.html` when it exists, otherwise a small
//! inline HTML body.

use std::fmt::Write as _;
use std::io;
use std::path::{Component, Path, PathBuf};

use bytes::{BufMut, Bytes, BytesMut};
use http::StatusCode;
use tracing::debug;

/// `Keep-Alive` parameters advertised on persistent connections.
const KEEP_ALIVE_PARAMS: &str = "max=6, timeout=120";

/// Content type by file suffix.
pub fn content_type(path: &str) -> &'static str {
    let suffix = match path.rfind('.') {
        Some(i) => &path[i..],
        None => return "text/plain",
    };
    match suffix {
        ".html" => "text/html",
        ".xml" => "text/xml",
        ".xhtml" => "application/xhtml+xml",
        ".txt" => "text/plain",
        ".rtf" => "application/rtf",
        ".pdf" => "application/pdf",
        ".word" => "application/msword",
        ".png" => "image/png",
        ".gif" => "image/gif",
        ".jpg" | ".jpeg" => "image/jpeg",
        ".au" => "audio/basic",
        ".mpeg" | ".mpg" => "video/mpeg",
        ".avi" => "video/x-msvideo",
        ".gz" => "application/x-gzip",
        ".tar" => "application/x-tar",
        ".css" => "text/css",
        ".js" => "text/javascript",
        _ => "text/plain",
    }
}

/// A response ready to be serialized.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    status: StatusCode,
    keep_alive: bool,
    content_type: &'static str,
    body: Bytes,
    head_only: bool,
}

impl HttpResponse {
    /// Serves `path` (already normalised, starting with `/`) from `root`.
    pub fn file(root: &Path, path: &str, keep_alive: bool) -> Self {
        let Some(full) = resolve(root, path) else {
            return Self::error(root, StatusCode::FORBIDDEN, keep_alive);
        };

        match read_file(&full) {
            Ok(body) => Self {
                status: StatusCode::OK,
                keep_alive,
                content_type: content_type(path),
                body,
                head_only: false,
            },
            Err(status) => {
                debug!(path, status = status.as_u16(), "File not served");
                Self::error(root, status, keep_alive)
            }
        }
    }

    /// An error response for `status`.
    pub fn error(root: &Path, status: StatusCode, keep_alive: bool) -> Self {
        let page = root.join(format!("{}.html", status.as_u16()));
        let body = match std::fs::read(&page) {
            Ok(bytes) => Bytes::from(bytes),
            Err(_) => inline_error_body(status),
        };
        Self {
            status,
            keep_alive,
            content_type: "text/html",
            body,
            head_only: false,
        }
    }

    /// Drops the body on serialization but keeps its `Content-Length`.
    pub fn head_only(mut self) -> Self {
        self.head_only = true;
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Status line, headers and body as one buffer.
    pub fn into_bytes(self) -> Bytes {
        let mut head = String::with_capacity(160);
        let _ = write!(
            head,
            "HTTP/1.1 {} {}\r\n",
            self.status.as_u16(),
            self.status.canonical_reason().unwrap_or("Unknown")
        );
        if self.keep_alive {
            head.push_str("Connection: keep-alive\r\n");
            let _ = write!(head, "Keep-Alive: {KEEP_ALIVE_PARAMS}\r\n");
        } else {
            head.push_str("Connection: close\r\n");
        }
        let _ = write!(head, "Content-Type: {}\r\n", self.content_type);
        let _ = write!(head, "Content-Length: {}\r\n\r\n", self.body.len());

        if self.head_only || self.body.is_empty() {
            return Bytes::from(head);
        }

        let mut out = BytesMut::with_capacity(head.len() + self.body.len());
        out.put_slice(head.as_bytes());
        out.put_slice(&self.body);
        out.freeze()
    }
}

/// Joins `path` onto `root`, refusing anything that could climb out.
fn resolve(root: &Path, path: &str) -> Option<PathBuf> {
    let relative = Path::new(path.trim_start_matches('/'));
    if relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return None;
    }
    Some(root.join(relative))
}

fn read_file(path: &Path) -> Result<Bytes, StatusCode> {
    let meta = std::fs::metadata(path).map_err(|e| io_status(&e))?;
    if meta.is_dir() {
        return Err(StatusCode::NOT_FOUND);
    }
    std::fs::read(path)
        .map(Bytes::from)
        .map_err(|e| io_status(&e))
}

fn io_status(e: &io::Error) -> StatusCode {
    match e.kind() {
        io::ErrorKind::PermissionDenied => StatusCode::FORBIDDEN,
        _ => StatusCode::NOT_FOUND,
    }
}

fn inline_error_body(status: StatusCode) -> Bytes {
    let reason = status.canonical_reason().unwrap_or("Error");
    let message = match status {
        StatusCode::BAD_REQUEST => "The request could not be understood.",
        StatusCode::FORBIDDEN => "You do not have permission to get this file.",
        StatusCode::NOT_FOUND => "File not found.",
        StatusCode::SERVICE_UNAVAILABLE => "Server busy, try again later.",
        _ => "",
    };
    Bytes::from(format!(
        "<html><title>Error</title><body bgcolor=\"ffffff\">{} : {}\n<p>{}</p><hr><em>tinyweb</em></body></html>",
        status.as_u16(),
        reason,
        message
    ))
}
