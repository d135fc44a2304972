//! Demonstration HTTP server
//!
//! Serves canned HTML pages and proxies `/httpbin/*` to an upstream host as
//! a chunked response with integrity trailers. Runs until SIGINT or SIGTERM.

use clap::Parser;
use httpfromtcp::http::{
    default_headers, Headers, ParseLimits, Request, ResponseWriter, Result, Server, ServerConfig,
    Session, StatusCode, Upstream,
};
use httpfromtcp::shutdown;
use openssl::sha::Sha256;
use std::io::{self, Read};
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Largest single read from the upstream body, and so the largest chunk
const PROXY_READ_SIZE: usize = 1024;

const PROXY_PREFIX: &str = "/httpbin/";

const BAD_REQUEST_PAGE: &str = "<html>
<head>
<title>400 Bad Request</title>
</head>
<body>
<h1>Bad Request</h1>
<p>Your request honestly kinda sucked.</p>
</body>
</html>
";

const INTERNAL_ERROR_PAGE: &str = "<html>
<head>
<title>500 Internal Server Error</title>
</head>
<body>
<h1>Internal Server Error</h1>
<p>Okay, you know what? This one is on me.</p>
</body>
</html>
";

const OK_PAGE: &str = "<html>
<head>
<title>200 OK</title>
</head>
<body>
<h1>Success!</h1>
<p>Your request was an absolute banger.</p>
</body>
</html>
";

#[derive(Debug, Parser)]
#[command(name = "httpserver", version, about = "HTTP/1.1 demonstration server")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value_t = httpfromtcp::http::server::DEFAULT_PORT)]
    port: u16,

    /// Per-connection read/write timeout in seconds (0 disables it)
    #[arg(long, default_value_t = 30)]
    read_timeout_secs: u64,

    /// Largest start line or header line accepted, in bytes
    #[arg(long, default_value_t = ParseLimits::default().max_buffer_size)]
    max_buffer_size: usize,

    /// Host that /httpbin/ requests are proxied to
    #[arg(long, default_value = "httpbin.org")]
    upstream_host: String,

    /// Upstream port
    #[arg(long, default_value_t = 443)]
    upstream_port: u16,

    /// Talk to the upstream over plain TCP instead of TLS
    #[arg(long)]
    upstream_plain: bool,
}

type Writer<'a> = ResponseWriter<&'a mut Session>;

fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "httpfromtcp=info,httpserver=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Connection threads must inherit the blocked mask.
    shutdown::block_signals()?;

    let timeout = match args.read_timeout_secs {
        0 => None,
        secs => Some(Duration::from_secs(secs)),
    };
    let limits = ParseLimits {
        max_buffer_size: args.max_buffer_size,
        ..ParseLimits::default()
    };
    let config = ServerConfig::default()
        .with_port(args.port)
        .with_timeout(timeout)
        .with_limits(limits);

    let upstream =
        Upstream::new(args.upstream_host, args.upstream_port).with_tls(!args.upstream_plain);

    let mut server = Server::serve(config, move |w, req| route(w, req, &upstream))?;
    info!(port = server.local_addr().port(), "server started");

    let signal = shutdown::wait_for_signal()?;
    info!(signal = shutdown::signal_name(signal), "shutting down");

    server.close();
    info!("server gracefully stopped");
    Ok(())
}

fn route(w: &mut Writer<'_>, req: &Request, upstream: &Upstream) -> Result<()> {
    match req.target() {
        "/yourproblem" => html(w, StatusCode::BadRequest, BAD_REQUEST_PAGE),
        "/myproblem" => html(w, StatusCode::InternalServerError, INTERNAL_ERROR_PAGE),
        target => match target.strip_prefix(PROXY_PREFIX) {
            Some(path) => proxy(w, upstream, path),
            None => html(w, StatusCode::Ok, OK_PAGE),
        },
    }
}

fn html(w: &mut Writer<'_>, status: StatusCode, page: &str) -> Result<()> {
    let mut headers = default_headers(page.len());
    headers.set("Content-Type", "text/html");

    w.write_status_line(status)?;
    w.write_headers(&headers)?;
    w.write_body(page.as_bytes())?;
    Ok(())
}

fn proxy(w: &mut Writer<'_>, upstream: &Upstream, path: &str) -> Result<()> {
    let path = format!("/{}", path);
    info!(host = upstream.host(), path = %path, "proxying");

    let mut response = match upstream.get(&path) {
        Ok(response) => response,
        Err(e) => {
            warn!(host = upstream.host(), error = %e, "upstream request failed");
            return html(w, StatusCode::InternalServerError, INTERNAL_ERROR_PAGE);
        }
    };
    debug!(status = response.status(), "upstream responded");

    let mut headers = default_headers(0);
    headers.remove("Content-Length");
    headers.set("Transfer-Encoding", "chunked");
    headers.set("Trailer", "X-Content-SHA256, X-Content-Length");

    w.write_status_line(StatusCode::Ok)?;
    w.write_headers(&headers)?;

    let mut hasher = Sha256::new();
    let mut total = 0usize;
    let mut buf = [0u8; PROXY_READ_SIZE];

    loop {
        let n = match response.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                // The status line is already out; end the body cleanly.
                warn!(error = %e, "upstream body read failed");
                break;
            }
        };

        w.write_chunk(&buf[..n])?;
        hasher.update(&buf[..n]);
        total += n;
        debug!(bytes = n, "relayed chunk");
    }

    w.write_chunked_body_done()?;

    let mut trailers = Headers::new();
    trailers.set("X-Content-SHA256", to_hex(&hasher.finish()));
    trailers.set("X-Content-Length", total.to_string());
    w.write_trailers(&trailers)?;

    info!(bytes = total, "proxied response complete");
    Ok(())
}

fn to_hex(digest: &[u8]) -> String {
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}
