//! Incremental HTTP request parsing
//!
//! This module provides a request parser that consumes bytes as they arrive
//! from a stream, in fragments of any size, and produces a validated
//! [`Request`] without re-parsing bytes it has already consumed.

use super::{find_crlf, Error, Headers, Request, RequestLine, Result};
use bytes::BytesMut;
use std::io::{self, Read};

/// Size limits applied while reading a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseLimits {
    /// Initial capacity of the read buffer
    pub initial_buffer_size: usize,
    /// Maximum number of buffered, not yet consumed bytes
    ///
    /// The start line and every single header line must fit in this.
    pub max_buffer_size: usize,
    /// Maximum accepted Content-Length
    pub max_body_size: usize,
}

impl Default for ParseLimits {
    fn default() -> Self {
        ParseLimits {
            initial_buffer_size: 8,
            max_buffer_size: 64 * 1024,     // 64KB
            max_body_size: 10 * 1024 * 1024, // 10MB
        }
    }
}

/// Request parser state
///
/// States only ever move forward, in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    ParsingStartLine,
    ParsingHeaders,
    ParsingBody,
    Done,
}

/// HTTP request parser
///
/// Feed it bytes with [`RequestParser::parse`], or let
/// [`RequestParser::parse_from`] drive it from a reader.
#[derive(Debug)]
pub struct RequestParser {
    state: ParserState,
    limits: ParseLimits,
    request_line: Option<RequestLine>,
    headers: Headers,
    content_length: Option<usize>,
    body: BytesMut,
}

impl RequestParser {
    /// Create a new request parser with default limits
    pub fn new() -> Self {
        Self::with_limits(ParseLimits::default())
    }

    /// Create a new request parser with the given limits
    pub fn with_limits(limits: ParseLimits) -> Self {
        RequestParser {
            state: ParserState::ParsingStartLine,
            limits,
            request_line: None,
            headers: Headers::new(),
            content_length: None,
            body: BytesMut::new(),
        }
    }

    /// Get the current state
    pub fn state(&self) -> ParserState {
        self.state
    }

    /// Parse as many complete elements of `data` as possible
    ///
    /// Returns the number of bytes consumed; the caller must discard them
    /// before passing the remaining bytes (plus any new ones) next time.
    /// Returning 0 without an error means more bytes are needed.
    pub fn parse(&mut self, data: &[u8]) -> Result<usize> {
        let mut consumed = 0;

        while self.state != ParserState::Done {
            let n = self.parse_single(&data[consumed..])?;
            if n == 0 {
                break;
            }
            consumed += n;
        }

        Ok(consumed)
    }

    fn parse_single(&mut self, data: &[u8]) -> Result<usize> {
        match self.state {
            ParserState::ParsingStartLine => {
                let Some(crlf_pos) = find_crlf(data) else {
                    return Ok(0);
                };

                self.request_line = Some(RequestLine::from_bytes(&data[..crlf_pos])?);
                self.state = ParserState::ParsingHeaders;

                Ok(crlf_pos + 2)
            }

            ParserState::ParsingHeaders => {
                let (n, done) = self.headers.parse_one_field(data)?;
                if done {
                    self.content_length = self.declared_content_length()?;
                    self.state = ParserState::ParsingBody;
                }
                Ok(n)
            }

            ParserState::ParsingBody => {
                // Without a declared length the body is empty, whatever follows.
                let Some(declared) = self.content_length else {
                    self.state = ParserState::Done;
                    return Ok(0);
                };

                let received = self.body.len() + data.len();
                if received > declared {
                    return Err(Error::BodyLengthExceeded { declared, received });
                }

                self.body.extend_from_slice(data);
                // A zero-length body is only known to be complete at end of
                // input; anything arriving before then overflows it.
                if received == declared && declared > 0 {
                    self.state = ParserState::Done;
                }

                Ok(data.len())
            }

            ParserState::Done => Ok(0),
        }
    }

    fn declared_content_length(&self) -> Result<Option<usize>> {
        let Some(value) = self.headers.get("content-length") else {
            return Ok(None);
        };

        let length = value.parse::<usize>().map_err(|_| {
            Error::MalformedHeaderField(format!("invalid content-length {:?}", value))
        })?;

        if length > self.limits.max_body_size {
            return Err(Error::RequestTooLarge {
                limit: self.limits.max_body_size,
            });
        }

        Ok(Some(length))
    }

    /// Complete parsing after the stream has ended
    ///
    /// Fails with [`Error::IncompleteMessage`] if the start line or header
    /// section is unfinished, or if fewer body bytes than the declared
    /// Content-Length arrived.
    pub fn finish(self) -> Result<Request> {
        match self.state {
            ParserState::ParsingStartLine | ParserState::ParsingHeaders => {
                return Err(Error::IncompleteMessage);
            }
            ParserState::ParsingBody => {
                if let Some(declared) = self.content_length {
                    if self.body.len() < declared {
                        return Err(Error::IncompleteMessage);
                    }
                }
            }
            ParserState::Done => {}
        }

        let request_line = self.request_line.ok_or(Error::IncompleteMessage)?;
        Ok(Request::new(request_line, self.headers, self.body.freeze()))
    }

    /// Whether only the end of input is missing
    ///
    /// True after a header section declaring `Content-Length: 0` until more
    /// bytes or the end of input arrive.
    pub fn awaiting_end_of_input(&self) -> bool {
        self.state == ParserState::ParsingBody && self.content_length == Some(0)
    }

    /// Read from `reader` until a complete request has been parsed
    ///
    /// The read buffer starts at `initial_buffer_size` bytes and doubles
    /// whenever it fills up, up to `max_buffer_size`. Consumed bytes are
    /// discarded by shifting the remainder to the front.
    pub fn parse_from<R: Read + ?Sized>(self, reader: &mut R) -> Result<Request> {
        self.parse_from_with(reader, |_| {})
    }

    /// Like [`RequestParser::parse_from`], but calls `on_settle` once when
    /// [`RequestParser::awaiting_end_of_input`] becomes true
    ///
    /// `on_settle` typically shortens the reader's timeout. A read that then
    /// fails with `TimedOut` or `WouldBlock` counts as the end of input.
    pub fn parse_from_with<R, F>(mut self, reader: &mut R, mut on_settle: F) -> Result<Request>
    where
        R: Read + ?Sized,
        F: FnMut(&mut R),
    {
        let mut buf = vec![0u8; self.limits.initial_buffer_size.max(1)];
        let mut filled = 0;
        let mut settled = false;

        while self.state != ParserState::Done {
            if filled == buf.len() {
                self.grow(&mut buf)?;
            }

            let settling = self.awaiting_end_of_input();
            if settling && !settled {
                on_settle(reader);
                settled = true;
            }

            let n = match reader.read(&mut buf[filled..]) {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e)
                    if settling
                        && matches!(
                            e.kind(),
                            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
                        ) =>
                {
                    return self.finish();
                }
                Err(e) => return Err(e.into()),
            };

            if n == 0 {
                self.parse(&buf[..filled])?;
                return self.finish();
            }
            filled += n;

            let consumed = self.parse(&buf[..filled])?;
            if consumed > 0 {
                buf.copy_within(consumed..filled, 0);
                filled -= consumed;
            }
        }

        self.finish()
    }

    fn grow(&self, buf: &mut Vec<u8>) -> Result<()> {
        let limit = self.limits.max_buffer_size;
        if buf.len() >= limit {
            return Err(Error::RequestTooLarge { limit });
        }

        let new_len = (buf.len() * 2).min(limit);
        buf.resize(new_len, 0);
        Ok(())
    }
}

impl Default for RequestParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Read and parse one request from `reader` with default limits
pub fn request_from_reader<R: Read + ?Sized>(reader: &mut R) -> Result<Request> {
    RequestParser::new().parse_from(reader)
}
