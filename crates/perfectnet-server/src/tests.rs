//! Unit tests for the coordinator daemon.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use perfectnet::{Coordinator, CoordinatorConfig, FileStore, FileStoreConfig, MemoryStore, SystemClock};
use perfectnet_client::{Client, ClientConfig, ClientError};
use perfectnet_types::{Exponent, Priority, Residue64, Verdict, WorkerId};
use perfectnet_wire::{
    AdminRequest, ErrorCode, HandshakeRequest, PROTOCOL_VERSION, Request, RequestId,
    RequestPayload, ResponsePayload,
};

use crate::{AuthPolicy, RequestHandler, Server, ServerConfig, Session, ShutdownHandle};

// ============================================================================
// Test Helpers
// ============================================================================

fn coordinator() -> Coordinator {
    Coordinator::open(
        CoordinatorConfig::default(),
        Box::new(MemoryStore::new()),
        Arc::new(SystemClock),
    )
    .unwrap()
}

fn worker(name: &str) -> WorkerId {
    WorkerId::new(name).unwrap()
}

fn request(id: u64, payload: RequestPayload) -> Request {
    Request::new(RequestId(id), payload)
}

fn handshake(admin_token: Option<&str>) -> RequestPayload {
    RequestPayload::Handshake(HandshakeRequest {
        client_version: PROTOCOL_VERSION,
        worker: None,
        api_key: None,
        admin_token: admin_token.map(str::to_string),
    })
}

fn error_code(payload: &ResponsePayload) -> Option<ErrorCode> {
    match payload {
        ResponsePayload::Error(err) => Some(err.code),
        _ => None,
    }
}

struct Running {
    addr: std::net::SocketAddr,
    http: Option<std::net::SocketAddr>,
    shutdown: ShutdownHandle,
    thread: JoinHandle<()>,
}

impl Running {
    fn stop(self) {
        self.shutdown.shutdown();
        self.thread.join().unwrap();
    }
}

fn spawn_server(config: ServerConfig, coordinator: Coordinator) -> Running {
    let mut server = Server::new(config, coordinator).unwrap();
    let addr = server.local_addr().unwrap();
    let http = server.http_addr();
    let shutdown = server.shutdown_handle();
    let thread = thread::spawn(move || server.run().unwrap());
    Running {
        addr,
        http,
        shutdown,
        thread,
    }
}

fn local_config() -> ServerConfig {
    ServerConfig::new(([127, 0, 0, 1], 0)).with_sweep_interval(None)
}

// ============================================================================
// Handler
// ============================================================================

#[test]
fn requests_before_handshake_are_refused() {
    let handler = RequestHandler::new(coordinator(), AuthPolicy::open());
    let mut session = Session::default();

    let response = handler.handle(&mut session, request(1, RequestPayload::Stats));
    assert_eq!(response.request_id, RequestId(1));
    assert_eq!(error_code(&response.payload), Some(ErrorCode::InvalidRequest));
}

#[test]
fn version_mismatch_is_refused() {
    let handler = RequestHandler::new(coordinator(), AuthPolicy::open());
    let mut session = Session::default();
    let payload = RequestPayload::Handshake(HandshakeRequest {
        client_version: PROTOCOL_VERSION + 1,
        worker: None,
        api_key: None,
        admin_token: None,
    });

    let response = handler.handle(&mut session, request(1, payload));
    assert_eq!(
        error_code(&response.payload),
        Some(ErrorCode::UnsupportedVersion)
    );
    assert!(!session.handshaken);
}

#[test]
fn kernel_errors_map_to_codes() {
    let handler = RequestHandler::new(coordinator(), AuthPolicy::open());
    let mut session = Session::default();
    handler.handle(&mut session, request(1, handshake(None)));

    let response = handler.handle(
        &mut session,
        request(
            2,
            RequestPayload::RequestAssignment {
                worker: worker("alice"),
            },
        ),
    );
    assert_eq!(
        error_code(&response.payload),
        Some(ErrorCode::NoWorkAvailable)
    );

    handler.handle(
        &mut session,
        request(
            3,
            RequestPayload::Admin(AdminRequest::Enqueue {
                exponent: Exponent::new(127),
                priority: Priority::new(1),
            }),
        ),
    );
    let duplicate = handler.handle(
        &mut session,
        request(
            4,
            RequestPayload::Admin(AdminRequest::Enqueue {
                exponent: Exponent::new(127),
                priority: Priority::new(1),
            }),
        ),
    );
    assert_eq!(
        error_code(&duplicate.payload),
        Some(ErrorCode::DuplicateCandidate)
    );
}

#[test]
fn second_assignment_names_the_lease_already_held() {
    let coordinator = coordinator();
    coordinator.seed(500, 530).unwrap();
    let handler = RequestHandler::new(coordinator, AuthPolicy::open());
    let mut session = Session::default();
    handler.handle(&mut session, request(1, handshake(None)));

    let assign = || RequestPayload::RequestAssignment {
        worker: worker("alice"),
    };
    let first = handler.handle(&mut session, request(2, assign()));
    let ResponsePayload::Assignment(assignment) = first.payload else {
        panic!("expected an assignment, got {:?}", first.payload);
    };

    let second = handler.handle(&mut session, request(3, assign()));
    match second.payload {
        ResponsePayload::Error(err) => {
            assert_eq!(err.code, ErrorCode::LeaseAlreadyActive);
            assert_eq!(err.held_lease, Some(assignment.exponent));
        }
        other => panic!("expected an error, got {other:?}"),
    }
}

#[test]
fn admin_requests_need_the_token() {
    let handler = RequestHandler::new(coordinator(), AuthPolicy::new(Some("op"), false));

    let mut anonymous = Session::default();
    handler.handle(&mut anonymous, request(1, handshake(None)));
    let refused = handler.handle(
        &mut anonymous,
        request(2, RequestPayload::Admin(AdminRequest::Sweep)),
    );
    assert_eq!(error_code(&refused.payload), Some(ErrorCode::Forbidden));

    let mut operator = Session::default();
    handler.handle(&mut operator, request(1, handshake(Some("op"))));
    let swept = handler.handle(
        &mut operator,
        request(2, RequestPayload::Admin(AdminRequest::Sweep)),
    );
    assert!(matches!(swept.payload, ResponsePayload::Swept { .. }));
}

#[test]
fn negative_elapsed_is_invalid() {
    let coordinator = coordinator();
    coordinator.seed(2, 20).unwrap();
    let alice = worker("alice");
    let assignment = coordinator.request_assignment(&alice).unwrap();

    let handler = RequestHandler::new(coordinator, AuthPolicy::open());
    let mut session = Session::default();
    handler.handle(&mut session, request(1, handshake(None)));
    let response = handler.handle(
        &mut session,
        request(
            2,
            RequestPayload::SubmitVerdict(perfectnet_wire::SubmitVerdictRequest {
                worker: alice,
                exponent: assignment.exponent,
                is_prime_witness: true,
                residue: Residue64::ZERO,
                elapsed_seconds: -1.0,
            }),
        ),
    );
    assert_eq!(
        error_code(&response.payload),
        Some(ErrorCode::InvalidRequest)
    );
}

// ============================================================================
// End to end
// ============================================================================

#[test]
fn worker_round_trip_over_tcp() {
    let running = spawn_server(local_config(), coordinator());

    let mut admin = Client::connect(running.addr, ClientConfig::default()).unwrap();
    assert_eq!(admin.seed(2, 130).unwrap(), 31);

    let alice = worker("alice");
    let mut client = Client::connect(running.addr, ClientConfig::default()).unwrap();
    let assignment = client.request_assignment(&alice).unwrap();
    assert_eq!(assignment.exponent, Exponent::new(2));

    let renewed = client
        .report_progress(&alice, assignment.exponent, 50.0)
        .unwrap();
    assert!(renewed >= assignment.expires_at);

    let response = client
        .submit_verdict(&Verdict {
            exponent: assignment.exponent,
            worker: alice.clone(),
            is_prime_witness: true,
            residue: Residue64::ZERO,
            elapsed: Duration::from_millis(5),
        })
        .unwrap();
    assert!(response.accepted);
    assert_eq!(response.perfect_number.unwrap().digit_count, 1);

    let err = client
        .submit_verdict(&Verdict {
            exponent: assignment.exponent,
            worker: alice.clone(),
            is_prime_witness: true,
            residue: Residue64::ZERO,
            elapsed: Duration::from_millis(5),
        })
        .unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::AlreadyRecorded));

    let stats = admin.stats().unwrap();
    assert_eq!(stats.discoveries, 1);
    assert_eq!(stats.results, 1);
    assert_eq!(stats.rejected_verdicts, 1);
    assert_eq!(admin.discoveries().unwrap().len(), 1);
    assert_eq!(admin.leaderboard(10).unwrap()[0].id, alice);

    running.stop();
}

#[test]
fn api_keys_gate_worker_requests() {
    let running = spawn_server(local_config().with_require_api_keys(true), coordinator());
    let alice = worker("alice");

    let mut anonymous = Client::connect(running.addr, ClientConfig::default()).unwrap();
    let key = anonymous.register(&alice, false).unwrap();
    let refused = anonymous.request_assignment(&alice).unwrap_err();
    assert_eq!(refused.code(), Some(ErrorCode::AuthenticationFailed));

    let bad = Client::connect(
        running.addr,
        ClientConfig::default().with_worker(alice.clone(), Some("wrong".into())),
    )
    .unwrap_err();
    assert!(matches!(bad, ClientError::HandshakeFailed(_)));

    let mut authed = Client::connect(
        running.addr,
        ClientConfig::default().with_worker(alice.clone(), Some(key)),
    )
    .unwrap();
    assert!(authed.session().authenticated);
    let err = authed.request_assignment(&alice).unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::NoWorkAvailable));

    let info = authed.worker_info(&alice).unwrap().unwrap();
    assert!(info.has_api_key);

    running.stop();
}

#[test]
fn http_sidecar_serves_stats() {
    use std::io::{Read, Write};

    let running = spawn_server(
        local_config().with_http_addr(Some(([127, 0, 0, 1], 0).into())),
        coordinator(),
    );
    let http = running.http.unwrap();

    let mut stream = std::net::TcpStream::connect(http).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    stream
        .write_all(b"GET /stats HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .unwrap();
    let mut body = String::new();
    stream.read_to_string(&mut body).unwrap();
    assert!(body.starts_with("HTTP/1.1 200 OK"));
    assert!(body.contains("\"queued\":0"));

    running.stop();
}

#[test]
fn state_survives_server_restart() {
    let dir = tempfile::tempdir().unwrap();
    let open = || {
        Coordinator::open(
            CoordinatorConfig::default(),
            Box::new(FileStore::new(FileStoreConfig::new(dir.path()))),
            Arc::new(SystemClock),
        )
        .unwrap()
    };
    let alice = worker("alice");

    let running = spawn_server(local_config(), open());
    let mut client = Client::connect(running.addr, ClientConfig::default()).unwrap();
    client.seed(2, 20).unwrap();
    let assignment = client.request_assignment(&alice).unwrap();
    drop(client);
    running.stop();

    let running = spawn_server(local_config(), open());
    let mut client = Client::connect(running.addr, ClientConfig::default()).unwrap();
    let leases = client.leases().unwrap();
    assert_eq!(leases.len(), 1);
    assert_eq!(leases[0].exponent, assignment.exponent);
    assert_eq!(client.stats().unwrap().queued, 7);
    running.stop();
}

#[test]
fn malformed_frame_drops_the_connection() {
    use std::io::{Read, Write};

    let running = spawn_server(local_config(), coordinator());
    let mut stream = std::net::TcpStream::connect(running.addr).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    stream.write_all(b"GARBAGE-GARBAGE-GARBAGE").unwrap();

    let mut buf = [0u8; 16];
    let n = stream.read(&mut buf).unwrap_or(0);
    assert_eq!(n, 0, "server should close without replying");

    // the server keeps serving others
    let mut client = Client::connect(running.addr, ClientConfig::default()).unwrap();
    client.stats().unwrap();
    running.stop();
}

#[test]
fn pipelined_burst_is_answered_in_order_once_drained() {
    use std::io::{Read, Write};

    use bytes::BytesMut;
    use perfectnet_wire::{Frame, Response};

    const BURST: u64 = 20_000;

    let running = spawn_server(local_config(), coordinator());
    let mut stream = std::net::TcpStream::connect(running.addr).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(10)))
        .unwrap();

    let mut outgoing = BytesMut::new();
    request(0, handshake(None))
        .to_frame()
        .unwrap()
        .encode(&mut outgoing);
    for id in 1..=BURST {
        request(id, RequestPayload::Stats)
            .to_frame()
            .unwrap()
            .encode(&mut outgoing);
    }

    // Nothing is read until the whole burst is written, so the server
    // has to hold back instead of buffering every answer
    let mut writer = stream.try_clone().unwrap();
    let sender = thread::spawn(move || writer.write_all(&outgoing).unwrap());
    thread::sleep(Duration::from_millis(200));

    let mut incoming = BytesMut::new();
    let mut chunk = [0u8; 64 * 1024];
    let mut next_id = 0;
    while next_id <= BURST {
        while let Some(frame) = Frame::decode(&mut incoming).unwrap() {
            let response = Response::from_frame(&frame).unwrap();
            assert_eq!(response.request_id, RequestId(next_id));
            assert_eq!(error_code(&response.payload), None);
            next_id += 1;
        }
        if next_id > BURST {
            break;
        }
        let n = stream.read(&mut chunk).unwrap();
        assert_ne!(n, 0, "server closed after {next_id} responses");
        incoming.extend_from_slice(&chunk[..n]);
    }

    sender.join().unwrap();
    assert!(BURST as usize * 32 > crate::connection::MAX_OUTBOUND);
    running.stop();
}
