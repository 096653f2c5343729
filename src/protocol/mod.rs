//! Protocol Layer
//!
//! The reactor moves bytes; a [`ProtocolHandler`] gives them meaning.
//!
//! ## Modules
//!
//! - `handler`: the [`ProtocolHandler`] trait, [`ParseResult`] and [`Response`]
//! - `request`: incremental HTTP/1.x request parser
//! - `response`: status line, headers and file bodies
//! - `http_handler`: [`HttpHandler`], static files plus login/register
//!
//! ## Example
//!
//! ```
//! use tinyweb::protocol::{HttpHandler, ParseResult, ProtocolHandler};
//!
//! let handler = HttpHandler::new("./resources");
//! let input = b"GET /index.html HTTP/1.1\r\nHost: localhost\r\n\r\n";
//!
//! match handler.parse(input) {
//!     ParseResult::Complete { request, consumed } => {
//!         assert_eq!(consumed, input.len());
//!         let response = handler.build_response(request);
//!         assert!(response.keep_alive);
//!     }
//!     _ => unreachable!(),
//! }
//! ```

pub mod handler;
pub mod http_handler;
pub mod request;
pub mod response;

pub use handler::{ParseResult, ProtocolHandler, Response};
pub use http_handler::HttpHandler;
pub use request::{parse_request, HttpParseError, HttpRequest};
pub use response::HttpResponse;
