//! Upstream HTTP client
//!
//! This module provides a minimal HTTP/1.1 client for fetching a resource
//! from an upstream server, over plain TCP or TLS, with the response body
//! exposed as a stream so it can be relayed without buffering it whole.

use super::chunked::ChunkedDecoder;
use super::{find_crlf, Error, Headers, Result, CRLF};
use openssl::ssl::{SslConnector, SslMethod, SslStream};
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

/// Maximum size of a response status line plus headers
const MAX_HEAD_SIZE: usize = 64 * 1024;

const READ_SIZE: usize = 4096;

/// Upstream server address
#[derive(Debug, Clone)]
pub struct Upstream {
    host: String,
    port: u16,
    tls: bool,
    timeout: Option<Duration>,
}

impl Upstream {
    /// Plain-TCP upstream
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Upstream {
            host: host.into(),
            port,
            tls: false,
            timeout: Some(Duration::from_secs(30)),
        }
    }

    /// TLS upstream on port 443
    pub fn https(host: impl Into<String>) -> Self {
        Upstream::new(host, 443).with_tls(true)
    }

    /// Enable or disable TLS
    pub fn with_tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }

    /// Set the socket read/write timeout
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Get the upstream host
    pub fn host(&self) -> &str {
        &self.host
    }

    fn host_header(&self) -> String {
        let default_port = if self.tls { 443 } else { 80 };
        if self.port == default_port {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    fn connect(&self) -> Result<Transport> {
        let tcp = TcpStream::connect((self.host.as_str(), self.port))?;
        tcp.set_read_timeout(self.timeout)?;
        tcp.set_write_timeout(self.timeout)?;

        if !self.tls {
            return Ok(Transport::Plain(tcp));
        }

        let connector = SslConnector::builder(SslMethod::tls_client())
            .map_err(|e| Error::Tls(e.to_string()))?
            .build();
        let stream = connector
            .connect(&self.host, tcp)
            .map_err(|e| Error::Tls(format!("handshake with {} failed: {}", self.host, e)))?;

        Ok(Transport::Tls(Box::new(stream)))
    }

    /// Send `GET <path>` and read the response head
    ///
    /// The body is read lazily through the returned response's `Read` impl.
    pub fn get(&self, path: &str) -> Result<UpstreamResponse> {
        let mut conn = self.connect()?;

        let request = format!(
            "GET {path} HTTP/1.1{CRLF}\
             Host: {host}{CRLF}\
             User-Agent: httpfromtcp/{version}{CRLF}\
             Accept: */*{CRLF}\
             Connection: close{CRLF}{CRLF}",
            host = self.host_header(),
            version = env!("CARGO_PKG_VERSION"),
        );
        conn.write_all(request.as_bytes())?;
        conn.flush()?;

        let head = read_head(&mut conn)?;
        let framing = Framing::for_response(head.status, &head.headers)?;

        Ok(UpstreamResponse {
            status: head.status,
            reason: head.reason,
            headers: head.headers,
            body: BodyReader {
                conn,
                pending: head.leftover,
                framing,
                trailers: None,
            },
        })
    }
}

enum Transport {
    Plain(TcpStream),
    Tls(Box<SslStream<TcpStream>>),
}

impl Read for Transport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Transport::Plain(s) => s.read(buf),
            Transport::Tls(s) => s.read(buf),
        }
    }
}

impl Write for Transport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Transport::Plain(s) => s.write(buf),
            Transport::Tls(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Transport::Plain(s) => s.flush(),
            Transport::Tls(s) => s.flush(),
        }
    }
}

struct ResponseHead {
    status: u16,
    reason: String,
    headers: Headers,
    leftover: Vec<u8>,
}

/// Read the status line and header section, keeping any body bytes read
/// along with them
fn read_head<R: Read>(conn: &mut R) -> Result<ResponseHead> {
    let mut buf = Vec::with_capacity(READ_SIZE);
    let mut start = 0;
    let mut status_line = None;
    let mut headers = Headers::new();
    let mut chunk = [0u8; READ_SIZE];

    loop {
        loop {
            let rest = &buf[start..];
            match status_line {
                None => {
                    let Some(crlf_pos) = find_crlf(rest) else {
                        break;
                    };
                    status_line = Some(parse_status_line(&rest[..crlf_pos])?);
                    start += crlf_pos + 2;
                }
                Some((status, ref reason)) => {
                    let (n, done) = headers.parse_one_field(rest)?;
                    if n == 0 {
                        break;
                    }
                    start += n;
                    if done {
                        return Ok(ResponseHead {
                            status,
                            reason: String::clone(reason),
                            headers,
                            leftover: buf[start..].to_vec(),
                        });
                    }
                }
            }
        }

        if buf.len() - start > MAX_HEAD_SIZE {
            return Err(Error::Protocol("response head too large".to_string()));
        }

        let n = match conn.read(&mut chunk) {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        if n == 0 {
            return Err(Error::IncompleteMessage);
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

/// Parse `HTTP/1.x <code> [reason]`
fn parse_status_line(line: &[u8]) -> Result<(u16, String)> {
    let line = std::str::from_utf8(line)
        .map_err(|_| Error::Protocol("status line is not valid UTF-8".to_string()))?;
    let invalid = || Error::Protocol(format!("invalid status line {:?}", line));

    let mut parts = line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    let code = parts.next().ok_or_else(invalid)?;
    let reason = parts.next().unwrap_or_default();

    if !matches!(version, "HTTP/1.0" | "HTTP/1.1") {
        return Err(invalid());
    }
    if code.len() != 3 || !code.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    let status = code.parse::<u16>().map_err(|_| invalid())?;

    Ok((status, reason.to_string()))
}

/// How the end of a response body is found
enum Framing {
    Length(usize),
    Chunked(ChunkedDecoder),
    Eof,
    Done,
}

impl Framing {
    fn for_response(status: u16, headers: &Headers) -> Result<Self> {
        if (100..200).contains(&status) || status == 204 || status == 304 {
            return Ok(Framing::Done);
        }

        if let Some(encoding) = headers.get("transfer-encoding") {
            let last = encoding.rsplit(',').next().unwrap_or_default().trim();
            if last.eq_ignore_ascii_case("chunked") {
                return Ok(Framing::Chunked(ChunkedDecoder::new()));
            }
            return Ok(Framing::Eof);
        }

        if let Some(value) = headers.get("content-length") {
            let length = value.parse::<usize>().map_err(|_| {
                Error::MalformedHeaderField(format!("invalid content-length {:?}", value))
            })?;
            return Ok(Framing::Length(length));
        }

        Ok(Framing::Eof)
    }
}

struct BodyReader {
    conn: Transport,
    pending: Vec<u8>,
    framing: Framing,
    trailers: Option<Headers>,
}

impl BodyReader {
    /// Move buffered bytes into `out`, preferring them over the socket
    fn read_raw(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if self.pending.is_empty() {
            return self.conn.read(out);
        }
        let n = out.len().min(self.pending.len());
        out[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }

    fn fill_pending(&mut self) -> io::Result<()> {
        let mut chunk = [0u8; READ_SIZE];
        let n = self.conn.read(&mut chunk)?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "upstream closed mid-body",
            ));
        }
        self.pending.extend_from_slice(&chunk[..n]);
        Ok(())
    }
}

impl Read for BodyReader {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }

        loop {
            match self.framing {
                Framing::Done => return Ok(0),

                Framing::Eof => return self.read_raw(out),

                Framing::Length(remaining) => {
                    if remaining == 0 {
                        self.framing = Framing::Done;
                        return Ok(0);
                    }
                    let max = out.len().min(remaining);
                    let n = self.read_raw(&mut out[..max])?;
                    if n == 0 {
                        return Err(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "upstream closed mid-body",
                        ));
                    }
                    self.framing = Framing::Length(remaining - n);
                    return Ok(n);
                }

                Framing::Chunked(ref mut decoder) => {
                    let (consumed, decoded, complete) = decoder
                        .decode(&self.pending, out)
                        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                    self.pending.drain(..consumed);

                    if complete {
                        if let Framing::Chunked(decoder) =
                            std::mem::replace(&mut self.framing, Framing::Done)
                        {
                            self.trailers = Some(decoder.into_trailers());
                        }
                    }
                    if decoded > 0 || complete {
                        return Ok(decoded);
                    }

                    self.fill_pending()?;
                }
            }
        }
    }
}

/// Response from an upstream server
///
/// Reading from it yields the decoded body.
pub struct UpstreamResponse {
    status: u16,
    reason: String,
    headers: Headers,
    body: BodyReader,
}

impl UpstreamResponse {
    /// Get the status code
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Get the reason phrase
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Get the headers; names are lower-cased
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Trailers of a chunked body, once it has been read to the end
    pub fn trailers(&self) -> Option<&Headers> {
        self.body.trailers.as_ref()
    }
}

impl Read for UpstreamResponse {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.body.read(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{SocketAddr, TcpListener};
    use std::thread::{self, JoinHandle};

    /// Serve one canned response and hand back the request that was received
    fn upstream(response: &'static [u8]) -> (SocketAddr, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.ends_with(b"\r\n\r\n") {
                let n = stream.read(&mut buf).unwrap();
                request.extend_from_slice(&buf[..n]);
            }
            for piece in response.chunks(7) {
                stream.write_all(piece).unwrap();
            }
            String::from_utf8(request).unwrap()
        });

        (addr, handle)
    }

    #[test]
    fn test_content_length_body() {
        let (addr, handle) = upstream(b"HTTP/1.1 200 OK\r\nContent-Length: 11\r\n\r\nhello world");

        let mut response = Upstream::new("127.0.0.1", addr.port()).get("/get").unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.reason(), "OK");
        assert_eq!(response.headers().get("content-length"), Some("11"));

        let mut body = String::new();
        response.read_to_string(&mut body).unwrap();
        assert_eq!(body, "hello world");

        let request = handle.join().unwrap();
        assert!(request.starts_with("GET /get HTTP/1.1\r\n"));
        assert!(request.contains(&format!("Host: 127.0.0.1:{}\r\n", addr.port())));
        assert!(request.contains("Connection: close\r\n"));
    }

    #[test]
    fn test_chunked_body_with_trailers() {
        let (addr, handle) = upstream(
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n\
              5\r\nhello\r\n6\r\n world\r\n0\r\nX-Sum: 11\r\n\r\n",
        );

        let mut response = Upstream::new("127.0.0.1", addr.port()).get("/stream/2").unwrap();
        let mut body = Vec::new();
        response.read_to_end(&mut body).unwrap();
        assert_eq!(body, b"hello world");
        assert_eq!(
            response.trailers().and_then(|t| t.get("x-sum")),
            Some("11")
        );

        handle.join().unwrap();
    }

    #[test]
    fn test_eof_delimited_body() {
        let (addr, handle) = upstream(b"HTTP/1.0 200 OK\r\nContent-Type: text/plain\r\n\r\nuntil close");

        let mut response = Upstream::new("127.0.0.1", addr.port()).get("/").unwrap();
        handle.join().unwrap();

        let mut body = String::new();
        response.read_to_string(&mut body).unwrap();
        assert_eq!(body, "until close");
    }

    #[test]
    fn test_truncated_body() {
        let (addr, handle) = upstream(b"HTTP/1.1 200 OK\r\nContent-Length: 50\r\n\r\nshort");

        let mut response = Upstream::new("127.0.0.1", addr.port()).get("/").unwrap();
        handle.join().unwrap();

        let mut body = Vec::new();
        let err = response.read_to_end(&mut body).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_parse_status_line() {
        assert_eq!(parse_status_line(b"HTTP/1.1 200 OK").unwrap(), (200, "OK".to_string()));
        assert_eq!(
            parse_status_line(b"HTTP/1.1 404 Not Found").unwrap(),
            (404, "Not Found".to_string())
        );
        assert_eq!(parse_status_line(b"HTTP/1.0 204").unwrap(), (204, String::new()));

        assert!(parse_status_line(b"HTTP/2 200 OK").is_err());
        assert!(parse_status_line(b"HTTP/1.1 20 OK").is_err());
        assert!(parse_status_line(b"HTTP/1.1 abc OK").is_err());
        assert!(parse_status_line(b"garbage").is_err());
    }

    #[test]
    fn test_read_head_keeps_body_bytes() {
        let mut input: &[u8] = b"HTTP/1.1 200 OK\r\nA: b\r\n\r\nbody";
        let head = read_head(&mut input).unwrap();
        assert_eq!(head.status, 200);
        assert_eq!(head.headers.get("a"), Some("b"));
        assert_eq!(head.leftover, b"body");
    }

    #[test]
    fn test_read_head_incomplete() {
        let mut input: &[u8] = b"HTTP/1.1 200 OK\r\nA: b\r\n";
        assert!(matches!(read_head(&mut input), Err(Error::IncompleteMessage)));
    }

    #[test]
    fn test_host_header() {
        assert_eq!(Upstream::https("httpbin.org").host_header(), "httpbin.org");
        assert_eq!(Upstream::new("localhost", 8080).host_header(), "localhost:8080");
        assert_eq!(Upstream::new("localhost", 80).host_header(), "localhost");
    }
}
