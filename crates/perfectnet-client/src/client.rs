//! Blocking client implementation.

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use bytes::BytesMut;
use perfectnet_kernel::{Lease, ResultRecord};
use perfectnet_types::{Assignment, Exponent, Priority, Stats, Timestamp, Verdict, WorkerId};
use perfectnet_wire::{
    AdminRequest, Frame, HandshakeRequest, HandshakeResponse, PROTOCOL_VERSION, Request,
    RequestId, RequestPayload, Response, ResponsePayload, SubmitVerdictRequest, UserInfo,
    VerdictResponse,
};
use tracing::debug;

use crate::error::{ClientError, ClientResult};

/// Connection settings and credentials.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Read timeout. `None` blocks indefinitely.
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
    pub connect_timeout: Option<Duration>,
    /// Initial read buffer size.
    pub buffer_size: usize,
    /// Worker identity to authenticate as.
    pub worker: Option<WorkerId>,
    pub api_key: Option<String>,
    pub admin_token: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            read_timeout: Some(Duration::from_secs(30)),
            write_timeout: Some(Duration::from_secs(30)),
            connect_timeout: Some(Duration::from_secs(10)),
            buffer_size: 64 * 1024,
            worker: None,
            api_key: None,
            admin_token: None,
        }
    }
}

impl ClientConfig {
    pub fn with_worker(mut self, worker: WorkerId, api_key: Option<String>) -> Self {
        self.worker = Some(worker);
        self.api_key = api_key;
        self
    }

    pub fn with_admin_token(mut self, token: Option<String>) -> Self {
        self.admin_token = token;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }
}

/// A connection to the coordinator.
#[derive(Debug)]
pub struct Client {
    stream: TcpStream,
    read_buf: BytesMut,
    next_id: u64,
    handshake: HandshakeResponse,
}

impl Client {
    /// Connects and performs the handshake.
    pub fn connect(addr: impl ToSocketAddrs, config: ClientConfig) -> ClientResult<Self> {
        let stream = open_stream(addr, config.connect_timeout)?;
        stream.set_read_timeout(config.read_timeout)?;
        stream.set_write_timeout(config.write_timeout)?;
        stream.set_nodelay(true)?;

        let mut client = Self {
            stream,
            read_buf: BytesMut::with_capacity(config.buffer_size),
            next_id: 1,
            handshake: HandshakeResponse {
                server_version: 0,
                authenticated: false,
                admin: false,
            },
        };

        let response = client.send(RequestPayload::Handshake(HandshakeRequest {
            client_version: PROTOCOL_VERSION,
            worker: config.worker,
            api_key: config.api_key,
            admin_token: config.admin_token,
        }));
        client.handshake = match response {
            Ok(ResponsePayload::Handshake(handshake)) => handshake,
            Ok(other) => return Err(unexpected("Handshake", &other)),
            Err(ClientError::Server { message, .. }) => {
                return Err(ClientError::HandshakeFailed(message));
            }
            Err(e) => return Err(e),
        };
        debug!(
            server_version = client.handshake.server_version,
            authenticated = client.handshake.authenticated,
            "connected to coordinator"
        );
        Ok(client)
    }

    /// What the handshake established.
    pub fn session(&self) -> &HandshakeResponse {
        &self.handshake
    }

    // ========================================================================
    // Worker operations
    // ========================================================================

    pub fn request_assignment(&mut self, worker: &WorkerId) -> ClientResult<Assignment> {
        match self.send(RequestPayload::RequestAssignment {
            worker: worker.clone(),
        })? {
            ResponsePayload::Assignment(assignment) => Ok(assignment),
            other => Err(unexpected("Assignment", &other)),
        }
    }

    /// Sends a heartbeat. Returns the renewed lease deadline.
    pub fn report_progress(
        &mut self,
        worker: &WorkerId,
        exponent: Exponent,
        percent: f64,
    ) -> ClientResult<Timestamp> {
        match self.send(RequestPayload::ReportProgress {
            worker: worker.clone(),
            exponent,
            percent,
        })? {
            ResponsePayload::Progress(progress) => Ok(progress.lease_expires_at),
            other => Err(unexpected("Progress", &other)),
        }
    }

    pub fn submit_verdict(&mut self, verdict: &Verdict) -> ClientResult<VerdictResponse> {
        match self.send(RequestPayload::SubmitVerdict(SubmitVerdictRequest {
            worker: verdict.worker.clone(),
            exponent: verdict.exponent,
            is_prime_witness: verdict.is_prime_witness,
            residue: verdict.residue,
            elapsed_seconds: verdict.elapsed.as_secs_f64(),
        }))? {
            ResponsePayload::Verdict(response) => Ok(response),
            other => Err(unexpected("Verdict", &other)),
        }
    }

    pub fn stats(&mut self) -> ClientResult<Stats> {
        match self.send(RequestPayload::Stats)? {
            ResponsePayload::Stats(stats) => Ok(stats),
            other => Err(unexpected("Stats", &other)),
        }
    }

    /// Obtains an API key. Returns the key; the coordinator keeps only
    /// its hash.
    pub fn register(&mut self, worker: &WorkerId, rotate: bool) -> ClientResult<String> {
        match self.send(RequestPayload::Register {
            worker: worker.clone(),
            rotate,
        })? {
            ResponsePayload::Registered { api_key } => Ok(api_key),
            other => Err(unexpected("Registered", &other)),
        }
    }

    pub fn discoveries(&mut self) -> ClientResult<Vec<ResultRecord>> {
        match self.send(RequestPayload::Discoveries)? {
            ResponsePayload::Discoveries(found) => Ok(found),
            other => Err(unexpected("Discoveries", &other)),
        }
    }

    pub fn leaderboard(&mut self, limit: u32) -> ClientResult<Vec<UserInfo>> {
        match self.send(RequestPayload::Leaderboard { limit })? {
            ResponsePayload::Leaderboard(users) => Ok(users),
            other => Err(unexpected("Leaderboard", &other)),
        }
    }

    pub fn worker_info(&mut self, worker: &WorkerId) -> ClientResult<Option<UserInfo>> {
        match self.send(RequestPayload::WorkerInfo {
            worker: worker.clone(),
        })? {
            ResponsePayload::WorkerInfo(user) => Ok(user),
            other => Err(unexpected("WorkerInfo", &other)),
        }
    }

    // ========================================================================
    // Admin operations
    // ========================================================================

    pub fn enqueue(&mut self, exponent: Exponent, priority: Priority) -> ClientResult<()> {
        match self.admin(AdminRequest::Enqueue { exponent, priority })? {
            ResponsePayload::Enqueued => Ok(()),
            other => Err(unexpected("Enqueued", &other)),
        }
    }

    /// Queues the primes in `start..=end`. Returns how many were new.
    pub fn seed(&mut self, start: u64, end: u64) -> ClientResult<u64> {
        match self.admin(AdminRequest::Seed { start, end })? {
            ResponsePayload::Seeded { added } => Ok(added),
            other => Err(unexpected("Seeded", &other)),
        }
    }

    pub fn withdraw(&mut self, exponent: Exponent) -> ClientResult<()> {
        match self.admin(AdminRequest::Withdraw { exponent })? {
            ResponsePayload::Withdrawn => Ok(()),
            other => Err(unexpected("Withdrawn", &other)),
        }
    }

    pub fn release_worker(&mut self, worker: &WorkerId) -> ClientResult<Vec<Exponent>> {
        match self.admin(AdminRequest::ReleaseWorker {
            worker: worker.clone(),
        })? {
            ResponsePayload::Released { exponents } => Ok(exponents),
            other => Err(unexpected("Released", &other)),
        }
    }

    pub fn sweep(&mut self) -> ClientResult<Vec<Exponent>> {
        match self.admin(AdminRequest::Sweep)? {
            ResponsePayload::Swept { exponents } => Ok(exponents),
            other => Err(unexpected("Swept", &other)),
        }
    }

    pub fn recent_results(&mut self, limit: u32) -> ClientResult<Vec<ResultRecord>> {
        match self.admin(AdminRequest::RecentResults { limit })? {
            ResponsePayload::RecentResults(results) => Ok(results),
            other => Err(unexpected("RecentResults", &other)),
        }
    }

    pub fn leases(&mut self) -> ClientResult<Vec<Lease>> {
        match self.admin(AdminRequest::Leases)? {
            ResponsePayload::Leases(leases) => Ok(leases),
            other => Err(unexpected("Leases", &other)),
        }
    }

    pub fn users(&mut self) -> ClientResult<Vec<UserInfo>> {
        match self.admin(AdminRequest::Users)? {
            ResponsePayload::Users(users) => Ok(users),
            other => Err(unexpected("Users", &other)),
        }
    }

    // ========================================================================
    // Transport
    // ========================================================================

    fn admin(&mut self, request: AdminRequest) -> ClientResult<ResponsePayload> {
        self.send(RequestPayload::Admin(request))
    }

    /// Sends one request and waits for its response.
    fn send(&mut self, payload: RequestPayload) -> ClientResult<ResponsePayload> {
        let id = RequestId(self.next_id);
        self.next_id += 1;

        let frame = Request::new(id, payload).to_frame()?;
        self.stream.write_all(&frame.to_bytes())?;
        self.stream.flush()?;

        let response = self.read_response()?;
        if response.request_id != id {
            return Err(ClientError::ResponseMismatch {
                expected: id.0,
                received: response.request_id.0,
            });
        }
        match response.payload {
            ResponsePayload::Error(err) => Err(ClientError::Server {
                code: err.code,
                message: err.message,
                held_lease: err.held_lease,
            }),
            payload => Ok(payload),
        }
    }

    fn read_response(&mut self) -> ClientResult<Response> {
        let mut chunk = [0u8; 4096];
        loop {
            if let Some(frame) = Frame::decode(&mut self.read_buf)? {
                return Ok(Response::from_frame(&frame)?);
            }
            let n = self.stream.read(&mut chunk)?;
            if n == 0 {
                return Err(ClientError::Connection(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "server closed the connection",
                )));
            }
            self.read_buf.extend_from_slice(&chunk[..n]);
        }
    }
}

fn open_stream(addr: impl ToSocketAddrs, timeout: Option<Duration>) -> ClientResult<TcpStream> {
    let Some(timeout) = timeout else {
        return Ok(TcpStream::connect(addr)?);
    };
    let mut last_err = None;
    for addr in addr.to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = Some(e),
        }
    }
    Err(ClientError::Connection(last_err.unwrap_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "address resolved to nothing")
    })))
}

fn unexpected(expected: &'static str, actual: &ResponsePayload) -> ClientError {
    let actual = format!("{actual:?}");
    let actual = actual
        .split(['(', ' ', '{'])
        .next()
        .unwrap_or_default()
        .to_string();
    ClientError::UnexpectedResponse { expected, actual }
}
