//! HTTP/1.1 message engine
//!
//! This module turns an arbitrarily fragmented byte stream into a validated
//! [`Request`] and turns a response back into correctly ordered bytes.
//!
//! # Architecture
//!
//! - [`Headers`] parses one field line at a time and folds repeated names
//! - [`RequestParser`] owns a growable buffer and drives start-line, header
//!   and body parsing as bytes arrive
//! - [`ResponseWriter`] enforces status line, headers, body (fixed-length or
//!   chunked) and trailers, in that order
//! - [`Server`] accepts connections and runs one parse/handle cycle per
//!   connection on its own thread
//!
//! # Examples
//!
//! ```no_run
//! use httpfromtcp::http::{default_headers, Server, ServerConfig, StatusCode};
//!
//! let server = Server::serve(ServerConfig::default(), |w, req| {
//!     let body = format!("you asked for {}\n", req.target());
//!     w.write_status_line(StatusCode::Ok)?;
//!     w.write_headers(&default_headers(body.len()))?;
//!     w.write_body(body.as_bytes())?;
//!     Ok(())
//! })
//! .unwrap();
//! println!("listening on {}", server.local_addr());
//! ```

pub mod chunked;
pub mod client;
pub mod headers;
pub mod message;
pub mod parser;
pub mod server;
pub mod session;
pub mod writer;

pub use client::{Upstream, UpstreamResponse};
pub use headers::Headers;
pub use message::{Method, Request, RequestLine, StatusCode};
pub use parser::{request_from_reader, ParseLimits, ParserState, RequestParser};
pub use server::{Handler, Server, ServerConfig};
pub use session::Session;
pub use writer::{default_headers, ResponseWriter, WriterState};

/// Result type for HTTP operations
pub type Result<T> = std::result::Result<T, Error>;

/// HTTP operation errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("malformed start line: {0}")]
    MalformedStartLine(String),

    #[error("malformed header field: {0}")]
    MalformedHeaderField(String),

    #[error("incomplete message")]
    IncompleteMessage,

    #[error("body length {received} exceeds content-length {declared}")]
    BodyLengthExceeded { declared: usize, received: usize },

    #[error("request exceeds limit of {limit} bytes")]
    RequestTooLarge { limit: usize },

    #[error("cannot {operation} in writer state {state:?}")]
    WriterOutOfOrder {
        operation: &'static str,
        state: WriterState,
    },

    #[error("invalid chunk size: {0}")]
    InvalidChunkSize(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// CRLF line ending
pub const CRLF: &str = "\r\n";

/// Find the first CRLF in a buffer
pub(crate) fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}
