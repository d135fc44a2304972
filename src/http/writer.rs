//! HTTP response writing
//!
//! This module provides a writer that emits one response in wire order:
//! status line, headers, then a fixed-length or chunked body, then trailers.
//! Calls made out of order fail without writing anything.

use super::{chunked, Error, Headers, Result, StatusCode, CRLF};
use std::io::Write;

/// Response writer state
///
/// States only ever move forward, in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    AwaitingStatusLine,
    AwaitingHeaders,
    AwaitingBody,
    AwaitingTrailers,
    Closed,
}

/// Ordered writer for a single HTTP/1.1 response
///
/// Wraps the output sink without taking over its lifetime; use
/// [`ResponseWriter::into_inner`] to get it back. Nothing is buffered, so a
/// sink failure leaves whatever was already written on the wire and closes
/// the writer.
pub struct ResponseWriter<W: Write> {
    writer: W,
    state: WriterState,
    trailers_declared: bool,
}

impl<W: Write> ResponseWriter<W> {
    /// Create a writer for one response
    pub fn new(writer: W) -> Self {
        ResponseWriter {
            writer,
            state: WriterState::AwaitingStatusLine,
            trailers_declared: false,
        }
    }

    /// Get the current state
    pub fn state(&self) -> WriterState {
        self.state
    }

    fn expect_state(&self, expected: WriterState, operation: &'static str) -> Result<()> {
        if self.state != expected {
            return Err(Error::WriterOutOfOrder {
                operation,
                state: self.state,
            });
        }
        Ok(())
    }

    fn send(&mut self, bytes: &[u8], next: WriterState) -> Result<()> {
        if let Err(e) = self.writer.write_all(bytes) {
            self.state = WriterState::Closed;
            return Err(e.into());
        }
        self.state = next;
        Ok(())
    }

    /// Write `HTTP/1.1 <code> <reason>\r\n`
    pub fn write_status_line(&mut self, status: StatusCode) -> Result<()> {
        self.expect_state(WriterState::AwaitingStatusLine, "write status line")?;

        let line = format!(
            "HTTP/1.1 {} {}{}",
            status.code(),
            status.reason_phrase(),
            CRLF
        );
        self.send(line.as_bytes(), WriterState::AwaitingHeaders)
    }

    /// Write the header section, including the blank line that ends it
    ///
    /// A `Trailer` field here makes [`ResponseWriter::write_chunked_body_done`]
    /// leave room for [`ResponseWriter::write_trailers`].
    pub fn write_headers(&mut self, headers: &Headers) -> Result<()> {
        self.expect_state(WriterState::AwaitingHeaders, "write headers")?;

        let mut section = Vec::new();
        headers.write_section(&mut section);
        self.send(&section, WriterState::AwaitingBody)?;

        self.trailers_declared = headers.contains("trailer");
        Ok(())
    }

    /// Write fixed-length body bytes verbatim
    ///
    /// The caller is responsible for a matching `Content-Length` header.
    pub fn write_body(&mut self, body: &[u8]) -> Result<usize> {
        self.expect_state(WriterState::AwaitingBody, "write body")?;

        self.send(body, WriterState::AwaitingBody)?;
        Ok(body.len())
    }

    /// Write one chunk of a chunked body
    ///
    /// Returns the number of payload bytes written. An empty slice writes
    /// nothing.
    pub fn write_chunk(&mut self, data: &[u8]) -> Result<usize> {
        self.expect_state(WriterState::AwaitingBody, "write chunk")?;

        let mut frame = Vec::with_capacity(data.len() + 12);
        chunked::encode_chunk(data, &mut frame);
        if !frame.is_empty() {
            self.send(&frame, WriterState::AwaitingBody)?;
        }
        Ok(data.len())
    }

    /// Write the last chunk
    ///
    /// Without a declared `Trailer` header this also ends the message
    /// (`0\r\n\r\n`); otherwise the message ends with
    /// [`ResponseWriter::write_trailers`].
    pub fn write_chunked_body_done(&mut self) -> Result<()> {
        self.expect_state(WriterState::AwaitingBody, "finish chunked body")?;

        if self.trailers_declared {
            self.send(chunked::LAST_CHUNK, WriterState::AwaitingTrailers)
        } else {
            let mut last = chunked::LAST_CHUNK.to_vec();
            last.extend_from_slice(CRLF.as_bytes());
            self.send(&last, WriterState::Closed)
        }
    }

    /// Write trailer fields and the blank line ending the message
    pub fn write_trailers(&mut self, trailers: &Headers) -> Result<()> {
        self.expect_state(WriterState::AwaitingTrailers, "write trailers")?;

        let mut section = Vec::new();
        trailers.write_section(&mut section);
        self.send(&section, WriterState::Closed)
    }

    /// Flush the underlying sink
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Get a reference to the underlying sink
    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    /// Consume the writer and return the underlying sink
    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// Headers for a fixed-length, non-persistent plain-text response
///
/// Callers override individual entries as needed, e.g. swapping
/// `Content-Length` for `Transfer-Encoding: chunked`.
pub fn default_headers(content_length: usize) -> Headers {
    let mut headers = Headers::new();
    headers.set("Content-Length", content_length.to_string());
    headers.set("Connection", "close");
    headers.set("Content-Type", "text/plain");
    headers
}
