//! HTTP message types
//!
//! This module defines the request start line, the parsed request and the
//! response status codes.

use super::headers::field_text;
use super::{Error, Headers, Result};
use bytes::Bytes;
use std::fmt;
use std::str::FromStr;

/// HTTP methods accepted by the request parser
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    /// Convert method to string
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

impl FromStr for Method {
    type Err = Error;

    /// Parse a method; matching is case-sensitive
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "PATCH" => Ok(Method::Patch),
            "DELETE" => Ok(Method::Delete),
            _ => Err(Error::MalformedStartLine(format!("unsupported method {:?}", s))),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Request start line
///
/// Format: METHOD SP TARGET SP HTTP/1.1
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    method: Method,
    target: String,
    http_version: String,
}

impl RequestLine {
    /// Parse a start line without its trailing CRLF
    ///
    /// The line is split on single spaces and must yield exactly three
    /// tokens, so doubled spaces are rejected.
    pub fn parse(line: &str) -> Result<Self> {
        Self::from_bytes(line.as_bytes())
    }

    /// Parse a start line from raw bytes
    ///
    /// Method and version must be ASCII; target bytes that are not UTF-8 are
    /// read as ISO-8859-1.
    pub fn from_bytes(line: &[u8]) -> Result<Self> {
        let parts: Vec<&[u8]> = line.split(|&b| b == b' ').collect();
        let [method, target, version] = parts.as_slice() else {
            return Err(Error::MalformedStartLine(format!(
                "expected 3 parts, got {}",
                parts.len()
            )));
        };

        let method = std::str::from_utf8(method)
            .map_err(|_| Error::MalformedStartLine("method is not ASCII".to_string()))?
            .parse::<Method>()?;

        let target = field_text(target);
        if !is_valid_target(&target) {
            return Err(Error::MalformedStartLine(format!(
                "invalid request target {:?}",
                target
            )));
        }

        let version = std::str::from_utf8(version)
            .map_err(|_| Error::MalformedStartLine("HTTP version is not ASCII".to_string()))?;
        let http_version = parse_version(version)?;

        Ok(RequestLine {
            method,
            target,
            http_version: http_version.to_string(),
        })
    }

    /// Get the request method
    pub fn method(&self) -> Method {
        self.method
    }

    /// Get the request target
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Get the HTTP version number, e.g. `"1.1"`
    pub fn http_version(&self) -> &str {
        &self.http_version
    }
}

impl fmt::Display for RequestLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} HTTP/{}", self.method, self.target, self.http_version)
    }
}

/// Check the origin-form target: `/` or `/`-separated non-empty segments
fn is_valid_target(target: &str) -> bool {
    if target == "/" {
        return true;
    }

    match target.strip_prefix('/') {
        Some(rest) => rest.split('/').all(|segment| !segment.is_empty()),
        None => false,
    }
}

/// Validate `HTTP/1.1` and return the version number
fn parse_version(version: &str) -> Result<&str> {
    let invalid = || Error::MalformedStartLine(format!("invalid HTTP version {:?}", version));

    if version.matches('/').count() != 1 {
        return Err(invalid());
    }

    match version.split_once('/') {
        Some(("HTTP", number @ "1.1")) => Ok(number),
        _ => Err(invalid()),
    }
}

/// A fully parsed HTTP request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    request_line: RequestLine,
    headers: Headers,
    body: Bytes,
}

impl Request {
    /// Create a request from its parts
    pub fn new(request_line: RequestLine, headers: Headers, body: impl Into<Bytes>) -> Self {
        Request {
            request_line,
            headers,
            body: body.into(),
        }
    }

    /// Get the start line
    pub fn request_line(&self) -> &RequestLine {
        &self.request_line
    }

    /// Get the request method
    pub fn method(&self) -> Method {
        self.request_line.method
    }

    /// Get the request target
    pub fn target(&self) -> &str {
        &self.request_line.target
    }

    /// Get the HTTP version number
    pub fn http_version(&self) -> &str {
        &self.request_line.http_version
    }

    /// Get the headers; names are lower-cased
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Get the body
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Get the body as shared bytes
    pub fn body_bytes(&self) -> Bytes {
        self.body.clone()
    }
}

/// HTTP response status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Ok,
    BadRequest,
    NotFound,
    PayloadTooLarge,
    InternalServerError,
}

impl StatusCode {
    /// Get the numeric status code
    pub fn code(&self) -> u16 {
        match self {
            StatusCode::Ok => 200,
            StatusCode::BadRequest => 400,
            StatusCode::NotFound => 404,
            StatusCode::PayloadTooLarge => 413,
            StatusCode::InternalServerError => 500,
        }
    }

    /// Get the canonical reason phrase
    pub fn reason_phrase(&self) -> &'static str {
        match self {
            StatusCode::Ok => "OK",
            StatusCode::BadRequest => "Bad Request",
            StatusCode::NotFound => "Not Found",
            StatusCode::PayloadTooLarge => "Payload Too Large",
            StatusCode::InternalServerError => "Internal Server Error",
        }
    }

    /// Check if this is a success status (2xx)
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code())
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code(), self.reason_phrase())
    }
}
