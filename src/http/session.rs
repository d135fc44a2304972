//! Connection sessions
//!
//! A [`Session`] wraps an accepted TCP stream and bounds every blocking
//! read and write by a readiness poll, so a silent peer cannot pin a
//! connection thread forever.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::os::fd::AsRawFd;
use std::time::Duration;

/// Poll events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollEvents {
    Read,
    Write,
}

/// TCP session with an optional I/O timeout
#[derive(Debug)]
pub struct Session {
    stream: TcpStream,
    timeout: Option<Duration>,
}

impl Session {
    /// Create a new session; `None` waits indefinitely
    pub fn new(stream: TcpStream, timeout: Option<Duration>) -> Self {
        Session { stream, timeout }
    }

    /// Set the timeout for operations
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    /// Get the timeout
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Address of the remote peer
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.stream.peer_addr()
    }

    /// Wait until the stream is ready for `events`
    ///
    /// Returns `false` if the timeout expired first.
    pub fn poll(&self, events: PollEvents) -> io::Result<bool> {
        use libc::{poll, pollfd, POLLIN, POLLOUT};

        let mut pfd = pollfd {
            fd: self.stream.as_raw_fd(),
            events: match events {
                PollEvents::Read => POLLIN,
                PollEvents::Write => POLLOUT,
            },
            revents: 0,
        };

        let timeout_ms = self
            .timeout
            .map(|d| i32::try_from(d.as_millis()).unwrap_or(i32::MAX))
            .unwrap_or(-1); // -1 = infinite

        loop {
            // SAFETY: `pfd` is a valid pollfd for the duration of the call.
            let result = unsafe { poll(&mut pfd as *mut pollfd, 1, timeout_ms) };

            if result < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }

            return Ok(result > 0);
        }
    }

    fn wait(&self, events: PollEvents) -> io::Result<()> {
        if self.poll(events)? {
            Ok(())
        } else {
            Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "connection timed out",
            ))
        }
    }

    /// Shut down both halves of the connection
    pub fn close(&mut self) -> io::Result<()> {
        match self.stream.shutdown(Shutdown::Both) {
            Err(e) if e.kind() != io::ErrorKind::NotConnected => Err(e),
            _ => Ok(()),
        }
    }

    /// Get a reference to the underlying stream
    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }
}

impl Read for Session {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.wait(PollEvents::Read)?;
        self.stream.read(buf)
    }
}

impl Write for Session {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.wait(PollEvents::Write)?;
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn test_session_read_write() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            stream.write_all(b"Hello").unwrap();
            let mut buf = [0u8; 5];
            stream.read_exact(&mut buf).unwrap();
            assert_eq!(&buf, b"World");
        });

        let stream = TcpStream::connect(addr).unwrap();
        let mut session = Session::new(stream, Some(Duration::from_secs(1)));

        assert!(session.poll(PollEvents::Read).unwrap());

        let mut buf = [0u8; 5];
        session.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"Hello");
        session.write_all(b"World").unwrap();

        handle.join().unwrap();
    }

    #[test]
    fn test_session_read_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = thread::spawn(move || {
            let (_stream, _) = listener.accept().unwrap();
            thread::sleep(Duration::from_millis(500));
        });

        let stream = TcpStream::connect(addr).unwrap();
        let mut session = Session::new(stream, Some(Duration::from_millis(100)));

        let mut buf = [0u8; 10];
        let err = session.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);

        handle.join().unwrap();
    }

    #[test]
    fn test_session_eof_after_close() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut session = Session::new(stream, None);
            session.close().unwrap();
        });

        let stream = TcpStream::connect(addr).unwrap();
        let mut session = Session::new(stream, Some(Duration::from_secs(1)));
        let mut buf = [0u8; 10];
        assert_eq!(session.read(&mut buf).unwrap(), 0);

        handle.join().unwrap();
    }
}
