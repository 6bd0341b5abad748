//! Lightweight HTTP sidecar for dashboards and health checks.
//!
//! Runs on its own port alongside the binary protocol and answers a handful
//! of read-only `GET` endpoints:
//! - `GET /health`: liveness, always 200 while the process runs
//! - `GET /ready`: 503 once the coordinator is degraded
//! - `GET /metrics`: Prometheus text format
//! - `GET /stats`: coordinator counters as JSON
//! - `GET /discoveries`: accepted prime witnesses as JSON

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::SocketAddr;

use mio::net::{TcpListener, TcpStream};
use mio::{Interest, Poll, Registry, Token};
use perfectnet::Coordinator;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::metrics::Metrics;

/// Token for the HTTP listener in the mio event loop.
pub const HTTP_LISTENER_TOKEN: Token = Token(usize::MAX / 2);

/// Requests larger than this are refused.
const MAX_REQUEST_BYTES: usize = 8 * 1024;

/// Read-only HTTP endpoints served from the main event loop.
///
/// Each connection carries exactly one request and is closed after the
/// reply.
pub struct HttpSidecar {
    listener: TcpListener,
    clients: HashMap<Token, HttpClient>,
    next_token: usize,
}

struct HttpClient {
    stream: TcpStream,
    received: Vec<u8>,
}

impl HttpClient {
    /// Drains the socket. Returns `true` once the peer has gone away.
    fn drain(&mut self) -> bool {
        let mut chunk = [0u8; 1024];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => return true,
                Ok(n) => self.received.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return false,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    debug!(error = %e, "sidecar read failed");
                    return true;
                }
            }
        }
    }

    fn has_request_line(&self) -> bool {
        self.received.windows(2).any(|w| w == b"\r\n")
    }
}

impl HttpSidecar {
    pub fn bind(addr: SocketAddr, poll: &Poll) -> io::Result<Self> {
        let mut listener = TcpListener::bind(addr)?;
        poll.registry()
            .register(&mut listener, HTTP_LISTENER_TOKEN, Interest::READABLE)?;
        info!(addr = %listener.local_addr()?, "http sidecar listening");
        Ok(Self {
            listener,
            clients: HashMap::new(),
            next_token: HTTP_LISTENER_TOKEN.0 + 1,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Sidecar tokens occupy the upper half of the token space.
    pub fn owns(&self, token: Token) -> bool {
        token.0 >= HTTP_LISTENER_TOKEN.0
    }

    pub fn handle_event(&mut self, token: Token, registry: &Registry, coordinator: &Coordinator) {
        if token == HTTP_LISTENER_TOKEN {
            self.accept_all(registry);
        } else {
            self.respond(token, registry, coordinator);
        }
    }

    fn accept_all(&mut self, registry: &Registry) {
        loop {
            let (mut stream, addr) = match self.listener.accept() {
                Ok(accepted) => accepted,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) => {
                    error!(error = %e, "sidecar accept failed");
                    return;
                }
            };
            let token = Token(self.next_token);
            self.next_token += 1;
            match registry.register(&mut stream, token, Interest::READABLE) {
                Ok(()) => {
                    debug!(%addr, "sidecar client connected");
                    self.clients.insert(
                        token,
                        HttpClient {
                            stream,
                            received: Vec::new(),
                        },
                    );
                }
                Err(e) => warn!(%addr, error = %e, "sidecar register failed"),
            }
        }
    }

    fn respond(&mut self, token: Token, registry: &Registry, coordinator: &Coordinator) {
        let Some(client) = self.clients.get_mut(&token) else {
            return;
        };
        let gone = client.drain();
        let oversized = client.received.len() > MAX_REQUEST_BYTES;
        let ready = client.has_request_line();
        if !(gone || oversized || ready) {
            return;
        }

        let Some(mut client) = self.clients.remove(&token) else {
            return;
        };
        if ready || oversized {
            let reply = match request_target(&client.received) {
                Some(path) if !oversized => route(path, coordinator),
                _ => Reply::text(400, "malformed request"),
            };
            if let Err(e) = send_all(&mut client.stream, &reply.into_bytes()) {
                debug!(error = %e, "sidecar write failed");
            }
        }
        let _ = registry.deregister(&mut client.stream);
    }
}

/// Replies are small enough for the socket send buffer, so a client that
/// stops reading just loses the tail.
fn send_all(stream: &mut TcpStream, mut data: &[u8]) -> io::Result<()> {
    while !data.is_empty() {
        match stream.write(data) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => data = &data[n..],
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// The path of a `GET` request line; anything else is `None`.
fn request_target(raw: &[u8]) -> Option<&str> {
    let line_end = raw.windows(2).position(|w| w == b"\r\n")?;
    let line = std::str::from_utf8(&raw[..line_end]).ok()?;
    match line.split(' ').collect::<Vec<_>>()[..] {
        ["GET", path, _version] => Some(path),
        _ => None,
    }
}

struct Reply {
    status: u16,
    content_type: &'static str,
    body: String,
}

impl Reply {
    fn text(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: "text/plain; charset=utf-8",
            body: body.into(),
        }
    }

    fn json<T: Serialize>(status: u16, value: &T) -> Self {
        match serde_json::to_string(value) {
            Ok(body) => Self {
                status,
                content_type: "application/json",
                body,
            },
            Err(e) => Self::text(500, e.to_string()),
        }
    }

    fn reason(&self) -> &'static str {
        match self.status {
            200 => "OK",
            400 => "Bad Request",
            404 => "Not Found",
            500 => "Internal Server Error",
            503 => "Service Unavailable",
            _ => "",
        }
    }

    fn into_bytes(self) -> Vec<u8> {
        let head = format!(
            "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            self.status,
            self.reason(),
            self.content_type,
            self.body.len(),
        );
        let mut out = head.into_bytes();
        out.extend_from_slice(self.body.as_bytes());
        out
    }
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
    degraded: bool,
}

fn route(path: &str, coordinator: &Coordinator) -> Reply {
    let degraded = coordinator.is_degraded();
    match path {
        "/health" => Reply::json(
            200,
            &Health {
                status: "ok",
                degraded,
            },
        ),
        "/ready" if degraded => Reply::json(
            503,
            &Health {
                status: "degraded",
                degraded,
            },
        ),
        "/ready" => Reply::json(
            200,
            &Health {
                status: "ready",
                degraded,
            },
        ),
        "/metrics" => match Metrics::global() {
            Some(metrics) => {
                if let Ok(stats) = coordinator.stats() {
                    metrics.observe(&stats);
                }
                Reply {
                    status: 200,
                    content_type: prometheus::TEXT_FORMAT,
                    body: metrics.render(),
                }
            }
            None => Reply::text(503, "metrics registry unavailable"),
        },
        "/stats" => match coordinator.stats() {
            Ok(stats) => Reply::json(200, &stats),
            Err(e) => Reply::text(500, e.to_string()),
        },
        "/discoveries" => match coordinator.list_discoveries() {
            Ok(found) => Reply::json(200, &found),
            Err(e) => Reply::text(500, e.to_string()),
        },
        _ => Reply::text(404, format!("no such endpoint: {path}")),
    }
}
