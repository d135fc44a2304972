//! HTTP server implementation
//!
//! This module provides the connection driver: it accepts TCP connections,
//! parses one request per connection on a dedicated thread, hands the
//! request and a [`ResponseWriter`] to the application handler, then closes
//! the connection.

use super::{
    default_headers, Error, ParseLimits, Request, RequestParser, ResponseWriter, Result, Session,
    StatusCode,
};
use socket2::{Domain, Protocol, Socket, Type};
use std::io::{self, Read, Write};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, info_span, warn};

/// Default listening port
pub const DEFAULT_PORT: u16 = 42069;

/// How long to keep reading after the response before closing
const LINGER_TIMEOUT: Duration = Duration::from_millis(500);

/// Maximum bytes discarded while lingering
const LINGER_LIMIT: usize = 64 * 1024;

/// How long to wait for stray bytes after a `Content-Length: 0` request
pub const SETTLE_TIMEOUT: Duration = Duration::from_millis(50);

const WAKE_TIMEOUT: Duration = Duration::from_secs(1);

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on
    pub addr: SocketAddr,
    /// Listen backlog
    pub backlog: i32,
    /// Per-connection read/write timeout; `None` waits indefinitely
    pub timeout: Option<Duration>,
    /// Request parsing limits
    pub limits: ParseLimits,
}

impl ServerConfig {
    /// Listen on all interfaces at `port`
    pub fn with_port(mut self, port: u16) -> Self {
        self.addr.set_port(port);
        self
    }

    /// Set the listening address
    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    /// Set the listen backlog
    pub fn with_backlog(mut self, backlog: i32) -> Self {
        self.backlog = backlog;
        self
    }

    /// Set the per-connection timeout
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the request parsing limits
    pub fn with_limits(mut self, limits: ParseLimits) -> Self {
        self.limits = limits;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT),
            backlog: 128,
            timeout: Some(Duration::from_secs(30)),
            limits: ParseLimits::default(),
        }
    }
}

/// Application callback invoked once per successfully parsed request
pub trait Handler:
    Fn(&mut ResponseWriter<&mut Session>, &Request) -> Result<()> + Send + Sync + 'static
{
}

impl<F> Handler for F where
    F: Fn(&mut ResponseWriter<&mut Session>, &Request) -> Result<()> + Send + Sync + 'static
{
}

/// Running HTTP server
///
/// Closing (explicitly or by dropping) stops accepting new connections and
/// releases the listener. Connections already accepted run to completion.
pub struct Server {
    local_addr: SocketAddr,
    closed: Arc<AtomicBool>,
    accept_thread: Option<JoinHandle<()>>,
}

impl Server {
    /// Bind the listener and start accepting connections in the background
    pub fn serve<F: Handler>(config: ServerConfig, handler: F) -> Result<Server> {
        let listener = bind(&config)?;
        let local_addr = listener.local_addr()?;
        let closed = Arc::new(AtomicBool::new(false));
        let handler = Arc::new(handler);

        let accept_thread = thread::Builder::new()
            .name("http-accept".to_string())
            .spawn({
                let closed = Arc::clone(&closed);
                move || accept_loop(listener, config, handler, closed)
            })?;

        info!(address = %local_addr, "listening for connections");

        Ok(Server {
            local_addr,
            closed,
            accept_thread: Some(accept_thread),
        })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting connections and release the listener
    pub fn close(&mut self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        wake_and_join(wake_addr(self.local_addr), self.accept_thread.take());

        info!(address = %self.local_addr, "server closed");
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.close();
    }
}

fn bind(config: &ServerConfig) -> io::Result<TcpListener> {
    let socket = Socket::new(
        Domain::for_address(config.addr),
        Type::STREAM,
        Some(Protocol::TCP),
    )?;
    socket.set_reuse_address(true)?;
    socket.bind(&config.addr.into())?;
    socket.listen(config.backlog)?;
    Ok(socket.into())
}

fn wake_addr(addr: SocketAddr) -> SocketAddr {
    match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), addr.port())
        }
        IpAddr::V6(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), addr.port())
        }
        _ => addr,
    }
}

/// Unblock accept() so the loop can observe the closed flag, then join it
///
/// Returns whether the accept thread was joined. If the wake-up connection
/// fails the thread is left detached; it exits on its next accept.
fn wake_and_join(addr: SocketAddr, handle: Option<JoinHandle<()>>) -> bool {
    if let Err(e) = TcpStream::connect_timeout(&addr, WAKE_TIMEOUT) {
        warn!(error = %e, "wake-up connection failed, leaving accept thread detached");
        return false;
    }

    match handle {
        Some(handle) => {
            if handle.join().is_err() {
                error!("accept thread panicked");
            }
            true
        }
        None => false,
    }
}

fn accept_loop<F: Handler>(
    listener: TcpListener,
    config: ServerConfig,
    handler: Arc<F>,
    closed: Arc<AtomicBool>,
) {
    for conn in listener.incoming() {
        if closed.load(Ordering::SeqCst) {
            break;
        }

        let stream = match conn {
            Ok(stream) => stream,
            Err(e) => {
                warn!(error = %e, "accept failed");
                continue;
            }
        };

        let handler = Arc::clone(&handler);
        let timeout = config.timeout;
        let limits = config.limits;

        let spawned = thread::Builder::new()
            .name("http-conn".to_string())
            .spawn(move || handle_connection(stream, handler.as_ref(), timeout, limits));

        if let Err(e) = spawned {
            error!(error = %e, "failed to spawn connection thread");
        }
    }
}

fn handle_connection<F: Handler>(
    stream: TcpStream,
    handler: &F,
    timeout: Option<Duration>,
    limits: ParseLimits,
) {
    let peer = stream
        .peer_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    let span = info_span!("connection", peer = %peer);
    let _enter = span.enter();

    let mut session = Session::new(stream, timeout);

    let parsed = RequestParser::with_limits(limits)
        .parse_from_with(&mut session, |s| s.set_timeout(Some(SETTLE_TIMEOUT)));
    session.set_timeout(timeout);

    match parsed {
        Ok(request) => {
            debug!(
                method = %request.method(),
                target = request.target(),
                body_len = request.body().len(),
                "request parsed"
            );

            let mut writer = ResponseWriter::new(&mut session);
            if let Err(e) = handler(&mut writer, &request) {
                warn!(error = %e, target = request.target(), "handler failed");
            } else if let Err(e) = writer.flush() {
                debug!(error = %e, "flush failed");
            }
        }
        Err(Error::Io(e)) => {
            debug!(error = %e, "connection read failed");
        }
        Err(e) => {
            warn!(error = %e, "rejecting request");
            if let Err(e) = write_error_response(&mut session, &e) {
                debug!(error = %e, "error response failed");
            }
        }
    }

    if let Err(e) = linger_close(&mut session) {
        debug!(error = %e, "close failed");
    }
}

/// Write a plain-text response describing a parse failure
fn write_error_response<W: Write>(sink: W, error: &Error) -> Result<()> {
    let status = match error {
        Error::RequestTooLarge { .. } => StatusCode::PayloadTooLarge,
        _ => StatusCode::BadRequest,
    };
    let body = format!("{}\n", error);

    let mut writer = ResponseWriter::new(sink);
    writer.write_status_line(status)?;
    writer.write_headers(&default_headers(body.len()))?;
    writer.write_body(body.as_bytes())?;
    writer.flush()
}

/// Half-close, then discard late input so the peer sees our response
/// before the connection is torn down
fn linger_close(session: &mut Session) -> io::Result<()> {
    session.stream().shutdown(Shutdown::Write)?;
    session.set_timeout(Some(LINGER_TIMEOUT));

    let mut scratch = [0u8; 1024];
    let mut drained = 0;
    while drained < LINGER_LIMIT {
        match session.read(&mut scratch) {
            Ok(0) => break,
            Ok(n) => drained += n,
            Err(e) => {
                debug!(error = %e, "stopped draining connection");
                break;
            }
        }
    }

    session.close()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_config() -> ServerConfig {
        ServerConfig::default()
            .with_addr("127.0.0.1:0".parse().unwrap())
            .with_timeout(Some(Duration::from_secs(5)))
    }

    fn roundtrip(addr: SocketAddr, request: &[u8]) -> String {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.write_all(request).unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).unwrap();
        response
    }

    #[test]
    fn test_serve_and_respond() {
        let server = Server::serve(local_config(), |w, req| {
            let body = format!("target={}", req.target());
            w.write_status_line(StatusCode::Ok)?;
            w.write_headers(&default_headers(body.len()))?;
            w.write_body(body.as_bytes())?;
            Ok(())
        })
        .unwrap();

        let response = roundtrip(
            server.local_addr(),
            b"GET /coffee HTTP/1.1\r\nHost: localhost\r\n\r\n",
        );
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.contains("Content-Length: 14\r\n"));
        assert!(response.ends_with("\r\n\r\ntarget=/coffee"));
    }

    #[test]
    fn test_malformed_request_gets_400() {
        let server = Server::serve(local_config(), |_, _| {
            panic!("handler must not run for malformed requests")
        })
        .unwrap();

        let response = roundtrip(server.local_addr(), b"GET /a//b HTTP/1.1\r\n\r\n");
        assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(response.contains("malformed start line"));
    }

    #[test]
    fn test_oversized_request_gets_413() {
        let config = local_config().with_limits(ParseLimits {
            max_buffer_size: 32,
            ..ParseLimits::default()
        });
        let server = Server::serve(config, |_, _| Ok(())).unwrap();

        let request = format!("GET /{} HTTP/1.1\r\n\r\n", "a".repeat(64));
        let response = roundtrip(server.local_addr(), request.as_bytes());
        assert!(response.starts_with("HTTP/1.1 413 Payload Too Large\r\n"));
    }

    #[test]
    fn test_close_stops_accepting() {
        let mut server = Server::serve(local_config(), |_, _| Ok(())).unwrap();
        let addr = server.local_addr();
        server.close();

        assert!(TcpStream::connect(addr).is_err());
        // Closing twice is a no-op
        server.close();
    }

    #[test]
    fn test_failed_wake_does_not_join() {
        // A port nobody listens on refuses the wake-up connection.
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };

        let (_release, blocked) = std::sync::mpsc::channel::<()>();
        let stuck = thread::spawn(move || {
            let _ = blocked.recv();
        });

        let started = std::time::Instant::now();
        assert!(!wake_and_join(addr, Some(stuck)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_wake_and_join_after_close_flag() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = thread::spawn(move || {
            let _ = listener.accept();
        });

        assert!(wake_and_join(addr, Some(handle)));
    }

    #[test]
    fn test_wake_addr() {
        let addr: SocketAddr = "0.0.0.0:8080".parse().unwrap();
        assert_eq!(wake_addr(addr), "127.0.0.1:8080".parse().unwrap());

        let addr: SocketAddr = "[::]:8080".parse().unwrap();
        assert_eq!(wake_addr(addr), "[::1]:8080".parse().unwrap());

        let addr: SocketAddr = "10.0.0.1:8080".parse().unwrap();
        assert_eq!(wake_addr(addr), addr);
    }

    #[test]
    fn test_error_response_format() {
        let mut out = Vec::new();
        write_error_response(&mut out, &Error::IncompleteMessage).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "HTTP/1.1 400 Bad Request\r\n\
             Content-Length: 19\r\n\
             Connection: close\r\n\
             Content-Type: text/plain\r\n\
             \r\n\
             incomplete message\n"
        );
    }
}
