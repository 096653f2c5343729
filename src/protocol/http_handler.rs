//! The HTTP [`ProtocolHandler`]: static files plus login and register.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use http::{Method, StatusCode};
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::handler::{ParseResult, ProtocolHandler, Response};
use super::request::{parse_request, HttpParseError, HttpRequest};
use super::response::HttpResponse;
use crate::storage::{StoreError, StorePool};

/// Canned answer for connections refused at capacity.
const SERVER_BUSY: &[u8] = b"HTTP/1.1 503 Service Unavailable\r\n\
Connection: close\r\n\
Content-Type: text/plain\r\n\
Content-Length: 12\r\n\
\r\n\
Server busy!";

const LOGIN_PAGE: &str = "/login.html";
const REGISTER_PAGE: &str = "/register.html";
const WELCOME_PAGE: &str = "/welcome.html";
const ERROR_PAGE: &str = "/error.html";

/// Fields posted by the login and register forms.
#[derive(Debug, Deserialize)]
struct Credentials {
    username: String,
    password: String,
}

/// Serves a document root and authenticates through a [`StorePool`].
#[derive(Debug, Clone)]
pub struct HttpHandler {
    doc_root: PathBuf,
    store: Option<Arc<StorePool>>,
}

impl HttpHandler {
    pub fn new(doc_root: impl Into<PathBuf>) -> Self {
        Self {
            doc_root: doc_root.into(),
            store: None,
        }
    }

    /// Enables the login and register pages.
    pub fn with_store(mut self, store: Arc<StorePool>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn doc_root(&self) -> &Path {
        &self.doc_root
    }

    /// Decides which page a form post lands on.
    fn authenticate(&self, req: &HttpRequest) -> Result<&'static str, StoreError> {
        let creds: Credentials = match req.form() {
            Ok(creds) => creds,
            Err(e) => {
                debug!(error = %e, "Undecodable form");
                return Ok(ERROR_PAGE);
            }
        };

        let Some(pool) = &self.store else {
            debug!("No store configured, refusing credentials");
            return Ok(ERROR_PAGE);
        };

        let conn = pool.acquire()?;
        let ok = if req.path() == REGISTER_PAGE {
            match conn.register(&creds.username, &creds.password) {
                Ok(created) => created,
                Err(StoreError::EmptyCredentials) => false,
                Err(e) => return Err(e),
            }
        } else {
            conn.verify(&creds.username, &creds.password)
        };

        if ok {
            info!(user = %creds.username, page = req.path(), "User accepted");
            Ok(WELCOME_PAGE)
        } else {
            info!(user = %creds.username, page = req.path(), "User rejected");
            Ok(ERROR_PAGE)
        }
    }
}

impl ProtocolHandler for HttpHandler {
    type Request = HttpRequest;
    type Error = HttpParseError;

    fn parse(&self, input: &[u8]) -> ParseResult<HttpRequest, HttpParseError> {
        parse_request(input)
    }

    fn build_response(&self, req: HttpRequest) -> Response {
        let keep_alive = req.is_keep_alive();
        let root = self.doc_root.as_path();

        let response = match *req.method() {
            Method::GET => HttpResponse::file(root, req.path(), keep_alive),
            Method::HEAD => HttpResponse::file(root, req.path(), keep_alive).head_only(),
            Method::POST => {
                let is_auth = req.path() == LOGIN_PAGE || req.path() == REGISTER_PAGE;
                if is_auth && req.is_form() {
                    match self.authenticate(&req) {
                        Ok(page) => HttpResponse::file(root, page, keep_alive),
                        Err(e) => {
                            warn!(error = %e, "Store unavailable");
                            HttpResponse::error(root, StatusCode::SERVICE_UNAVAILABLE, keep_alive)
                        }
                    }
                } else {
                    HttpResponse::file(root, req.path(), keep_alive)
                }
            }
            _ => HttpResponse::error(root, StatusCode::METHOD_NOT_ALLOWED, keep_alive),
        };

        debug!(
            method = %req.method(),
            path = req.path(),
            status = response.status().as_u16(),
            "Request served"
        );

        Response::new(response.into_bytes(), keep_alive)
    }

    fn malformed_response(&self, error: &HttpParseError) -> Bytes {
        debug!(%error, "Malformed request");
        HttpResponse::error(&self.doc_root, StatusCode::BAD_REQUEST, false).into_bytes()
    }

    fn reject_response(&self) -> Bytes {
        Bytes::from_static(SERVER_BUSY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::UserStore;
    use std::fs;

    fn site(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("tinyweb-site-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        for page in ["index", "welcome", "error", "login", "register"] {
            fs::write(dir.join(format!("{page}.html")), page).unwrap();
        }
        dir
    }

    fn request(handler: &HttpHandler, raw: &[u8]) -> Response {
        match handler.parse(raw) {
            ParseResult::Complete { request, .. } => handler.build_response(request),
            other => panic!("unexpected parse result: {:?}", other),
        }
    }

    fn post_form(path: &str, body: &str) -> Vec<u8> {
        format!(
            "POST {path} HTTP/1.1\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: {}\r\n\r\n{body}",
            body.len()
        )
        .into_bytes()
    }

    fn body_of(resp: &Response) -> &str {
        let s = std::str::from_utf8(&resp.bytes).unwrap();
        s.split_once("\r\n\r\n").map(|(_, b)| b).unwrap_or("")
    }

    #[test]
    fn test_get_root_serves_index() {
        let root = site("index");
        let handler = HttpHandler::new(&root);

        let resp = request(&handler, b"GET / HTTP/1.1\r\n\r\n");
        assert!(resp.keep_alive);
        assert!(resp.bytes.starts_with(b"HTTP/1.1 200 OK"));
        assert_eq!(body_of(&resp), "index");

        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_register_then_login() {
        let root = site("auth");
        let pool = Arc::new(StorePool::new(Arc::new(UserStore::new()), 2));
        let handler = HttpHandler::new(&root).with_store(pool);

        let resp = request(&handler, &post_form("/register", "username=ariz&password=pw"));
        assert_eq!(body_of(&resp), "welcome");

        // duplicate registration fails
        let resp = request(&handler, &post_form("/register", "username=ariz&password=pw"));
        assert_eq!(body_of(&resp), "error");

        let resp = request(&handler, &post_form("/login", "username=ariz&password=pw"));
        assert_eq!(body_of(&resp), "welcome");

        let resp = request(&handler, &post_form("/login", "username=ariz&password=bad"));
        assert_eq!(body_of(&resp), "error");

        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_exhausted_store_answers_503_and_keeps_connection() {
        let root = site("busy");
        let pool = Arc::new(StorePool::new(Arc::new(UserStore::new()), 1));
        let handler = HttpHandler::new(&root).with_store(Arc::clone(&pool));

        let _held = pool.acquire().unwrap();
        let resp = request(&handler, &post_form("/login", "username=a&password=b"));

        assert!(resp.bytes.starts_with(b"HTTP/1.1 503"));
        assert!(resp.keep_alive);

        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_unsupported_method() {
        let root = site("method");
        let handler = HttpHandler::new(&root);

        let resp = request(&handler, b"DELETE /index.html HTTP/1.1\r\n\r\n");
        assert!(resp.bytes.starts_with(b"HTTP/1.1 405"));

        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_canned_responses() {
        let handler = HttpHandler::new("/nonexistent");

        let reject = handler.reject_response();
        assert!(reject.starts_with(b"HTTP/1.1 503"));
        assert!(reject.ends_with(b"Server busy!"));

        let malformed = handler.malformed_response(&HttpParseError::UnsupportedTransferEncoding);
        assert!(malformed.starts_with(b"HTTP/1.1 400 Bad Request"));
        assert!(std::str::from_utf8(&malformed)
            .unwrap()
            .contains("Connection: close"));
    }
}
