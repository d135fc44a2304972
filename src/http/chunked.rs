//! Chunked transfer encoding support
//!
//! This module provides chunk framing for the response writer and an
//! incremental decoder for chunked bodies, trailers included.

use super::{find_crlf, Error, Headers, Result, CRLF};

/// The zero-size chunk that ends a chunked body, before any trailers
pub const LAST_CHUNK: &[u8] = b"0\r\n";

/// Append one chunk (`<hex size>\r\n<data>\r\n`) to `out`
///
/// Empty data appends nothing, since a zero-size chunk ends the body.
pub fn encode_chunk(data: &[u8], out: &mut Vec<u8>) {
    if data.is_empty() {
        return;
    }

    out.extend_from_slice(format!("{:x}{}", data.len(), CRLF).as_bytes());
    out.extend_from_slice(data);
    out.extend_from_slice(CRLF.as_bytes());
}

/// Chunked decoder
///
/// Decodes HTTP chunked transfer encoding format. Trailer fields after the
/// last chunk are parsed with the same rules as request headers.
#[derive(Debug)]
pub struct ChunkedDecoder {
    state: DecoderState,
    chunk_size: usize,
    chunk_read: usize,
    trailers: Headers,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum DecoderState {
    ChunkSize,
    ChunkData,
    ChunkEnd,
    Trailer,
    Complete,
}

impl ChunkedDecoder {
    /// Create a new chunked decoder
    pub fn new() -> Self {
        ChunkedDecoder {
            state: DecoderState::ChunkSize,
            chunk_size: 0,
            chunk_read: 0,
            trailers: Headers::new(),
        }
    }

    /// Decode as much of `input` into `output` as possible
    ///
    /// Returns (bytes_consumed, bytes_decoded, is_complete). Unconsumed input
    /// must be passed again, with more bytes appended, on the next call.
    pub fn decode(&mut self, input: &[u8], output: &mut [u8]) -> Result<(usize, usize, bool)> {
        let mut input_pos = 0;
        let mut output_pos = 0;

        loop {
            let rest = &input[input_pos..];

            match self.state {
                DecoderState::ChunkSize => {
                    let Some(crlf_pos) = find_crlf(rest) else {
                        break;
                    };

                    self.chunk_size = parse_chunk_size(&rest[..crlf_pos])?;
                    self.chunk_read = 0;
                    input_pos += crlf_pos + 2;

                    self.state = if self.chunk_size == 0 {
                        DecoderState::Trailer
                    } else {
                        DecoderState::ChunkData
                    };
                }

                DecoderState::ChunkData => {
                    let to_copy = (self.chunk_size - self.chunk_read)
                        .min(rest.len())
                        .min(output.len() - output_pos);
                    if to_copy == 0 {
                        break;
                    }

                    output[output_pos..output_pos + to_copy].copy_from_slice(&rest[..to_copy]);
                    input_pos += to_copy;
                    output_pos += to_copy;
                    self.chunk_read += to_copy;

                    if self.chunk_read == self.chunk_size {
                        self.state = DecoderState::ChunkEnd;
                    }
                }

                DecoderState::ChunkEnd => {
                    if rest.len() < 2 {
                        break;
                    }
                    if &rest[..2] != b"\r\n" {
                        return Err(Error::Protocol("expected CRLF after chunk data".to_string()));
                    }
                    input_pos += 2;
                    self.state = DecoderState::ChunkSize;
                }

                DecoderState::Trailer => {
                    let (n, done) = self.trailers.parse_one_field(rest)?;
                    if n == 0 {
                        break;
                    }
                    input_pos += n;
                    if done {
                        self.state = DecoderState::Complete;
                    }
                }

                DecoderState::Complete => break,
            }
        }

        Ok((input_pos, output_pos, self.is_complete()))
    }

    /// Check if decoding is complete
    pub fn is_complete(&self) -> bool {
        self.state == DecoderState::Complete
    }

    /// Trailer fields received after the last chunk
    pub fn trailers(&self) -> &Headers {
        &self.trailers
    }

    /// Consume the decoder and return its trailers
    pub fn into_trailers(self) -> Headers {
        self.trailers
    }
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a chunk-size line, ignoring chunk extensions
fn parse_chunk_size(line: &[u8]) -> Result<usize> {
    let line = String::from_utf8_lossy(line);
    let size = line.split(';').next().unwrap_or_default().trim();

    if size.is_empty() || !size.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(Error::InvalidChunkSize(size.to_string()));
    }

    usize::from_str_radix(size, 16).map_err(|_| Error::InvalidChunkSize(size.to_string()))
}

/// Decode a complete chunked body, returning the data and the trailers
pub fn decode_chunked_body(input: &[u8]) -> Result<(Vec<u8>, Headers)> {
    let mut decoder = ChunkedDecoder::new();
    let mut output = vec![0u8; input.len()];

    let (_, decoded, complete) = decoder.decode(input, &mut output)?;
    if !complete {
        return Err(Error::IncompleteMessage);
    }

    output.truncate(decoded);
    Ok((output, decoder.into_trailers()))
}
