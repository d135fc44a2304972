//! Print incoming HTTP requests
//!
//! Accepts connections one at a time, parses a single request from each and
//! dumps its request line, headers and body to stdout.

use clap::Parser;
use httpfromtcp::http::server::SETTLE_TIMEOUT;
use httpfromtcp::http::{ParseLimits, Request, RequestParser, Session};
use std::io::{self, Write};
use std::net::{Ipv4Addr, TcpListener};
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const SEPARATOR: &str = "---------------------------------------------";

#[derive(Debug, Parser)]
#[command(name = "tcplistener", version, about = "Dump HTTP requests received over TCP")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value_t = httpfromtcp::http::server::DEFAULT_PORT)]
    port: u16,

    /// Per-connection read timeout in seconds (0 disables it)
    #[arg(long, default_value_t = 30)]
    read_timeout_secs: u64,

    /// Largest start line or header line accepted, in bytes
    #[arg(long, default_value_t = ParseLimits::default().max_buffer_size)]
    max_buffer_size: usize,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "httpfromtcp=info,tcplistener=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let timeout = match args.read_timeout_secs {
        0 => None,
        secs => Some(Duration::from_secs(secs)),
    };
    let limits = ParseLimits {
        max_buffer_size: args.max_buffer_size,
        ..ParseLimits::default()
    };

    let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, args.port))?;
    info!(address = %listener.local_addr()?, "listening for connections");

    for conn in listener.incoming() {
        let stream = match conn {
            Ok(stream) => stream,
            Err(e) => {
                warn!(error = %e, "accept failed");
                continue;
            }
        };
        let peer = stream.peer_addr().ok();
        info!(peer = ?peer, "connection accepted");

        let mut session = Session::new(stream, timeout);
        let parsed = RequestParser::with_limits(limits)
            .parse_from_with(&mut session, |s| s.set_timeout(Some(SETTLE_TIMEOUT)));
        match parsed {
            Ok(request) => {
                let mut stdout = io::stdout().lock();
                print_request(&mut stdout, &request)?;
                stdout.flush()?;
            }
            Err(e) => warn!(peer = ?peer, error = %e, "failed to read request"),
        }

        if let Err(e) = session.close() {
            warn!(peer = ?peer, error = %e, "failed to close connection");
        }
    }

    Ok(())
}

fn print_request<W: Write>(out: &mut W, request: &Request) -> io::Result<()> {
    writeln!(out, "\n{}", SEPARATOR)?;
    writeln!(out, "Request line:")?;
    writeln!(out, "- Method: {}", request.method())?;
    writeln!(out, "- Target: {}", request.target())?;
    writeln!(out, "- Version: {}", request.http_version())?;
    writeln!(out, "Headers:")?;
    for (name, value) in request.headers().iter() {
        writeln!(out, "- {}: {}", name, value)?;
    }
    writeln!(out, "Body:")?;
    writeln!(out, "{}", String::from_utf8_lossy(request.body()))?;
    writeln!(out, "\n{}", SEPARATOR)
}
