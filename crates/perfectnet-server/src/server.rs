//! The mio event loop.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use mio::event::Event;
use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token, Waker};
use perfectnet::{Coordinator, ExpirySweeper};
use tracing::{debug, error, info, warn};

use crate::auth::AuthPolicy;
use crate::config::ServerConfig;
use crate::connection::{Connection, Disposition};
use crate::error::{ServerError, ServerResult};
use crate::handler::RequestHandler;
use crate::http::HttpSidecar;
use crate::metrics;

const LISTENER_TOKEN: Token = Token(0);
#[cfg(unix)]
const SIGNAL_TOKEN: Token = Token(1);
const WAKER_TOKEN: Token = Token(2);
const FIRST_CONNECTION_TOKEN: usize = 16;

/// How long one poll may block; bounds idle-connection checks.
const POLL_TIMEOUT: Duration = Duration::from_millis(500);

/// Stops a running [`Server`] from another thread.
#[derive(Clone)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.flag.store(true, Ordering::SeqCst);
        if let Err(e) = self.waker.wake() {
            warn!(error = %e, "failed to wake server for shutdown");
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Serves the binary protocol (and optionally the HTTP sidecar) on one
/// thread.
pub struct Server {
    config: ServerConfig,
    poll: Poll,
    listener: TcpListener,
    connections: HashMap<Token, Connection>,
    next_token: usize,
    handler: RequestHandler,
    http: Option<HttpSidecar>,
    shutdown: Arc<AtomicBool>,
    waker: Arc<Waker>,
    #[cfg(unix)]
    signals: Option<signal_hook_mio::v1_0::Signals>,
}

impl Server {
    /// Binds the listeners. Nothing is served until [`Server::run`].
    pub fn new(config: ServerConfig, coordinator: Coordinator) -> ServerResult<Self> {
        let poll = Poll::new()?;

        let mut listener =
            TcpListener::bind(config.bind_addr).map_err(|source| ServerError::BindFailed {
                addr: config.bind_addr,
                source,
            })?;
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;

        let http = match config.http_addr {
            Some(addr) => Some(
                HttpSidecar::bind(addr, &poll)
                    .map_err(|source| ServerError::BindFailed { addr, source })?,
            ),
            None => None,
        };

        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);
        let auth = AuthPolicy::new(config.admin_token.as_deref(), config.require_api_keys);

        Ok(Self {
            handler: RequestHandler::new(coordinator, auth),
            config,
            poll,
            listener,
            connections: HashMap::new(),
            next_token: FIRST_CONNECTION_TOKEN,
            http,
            shutdown: Arc::new(AtomicBool::new(false)),
            waker,
            #[cfg(unix)]
            signals: None,
        })
    }

    /// Like [`Server::new`], and SIGINT/SIGTERM trigger a graceful shutdown.
    pub fn with_signal_handling(
        config: ServerConfig,
        coordinator: Coordinator,
    ) -> ServerResult<Self> {
        #[allow(unused_mut)]
        let mut server = Self::new(config, coordinator)?;
        #[cfg(unix)]
        {
            use signal_hook::consts::{SIGINT, SIGTERM};
            let mut signals = signal_hook_mio::v1_0::Signals::new([SIGINT, SIGTERM])?;
            server
                .poll
                .registry()
                .register(&mut signals, SIGNAL_TOKEN, Interest::READABLE)?;
            server.signals = Some(signals);
        }
        Ok(server)
    }

    pub fn local_addr(&self) -> ServerResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn http_addr(&self) -> Option<SocketAddr> {
        self.http.as_ref().and_then(|http| http.local_addr().ok())
    }

    pub fn coordinator(&self) -> &Coordinator {
        self.handler.coordinator()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            flag: Arc::clone(&self.shutdown),
            waker: Arc::clone(&self.waker),
        }
    }

    /// Serves until shut down, running the expiry sweeper alongside.
    ///
    /// On the way out the journal is compacted so the next start replays
    /// nothing.
    pub fn run(&mut self) -> ServerResult<()> {
        let sweeper = self
            .config
            .sweep_interval
            .map(|interval| ExpirySweeper::spawn(self.coordinator().clone(), interval))
            .transpose()?;

        info!(addr = %self.local_addr()?, "coordinator listening");
        let mut events = Events::with_capacity(1024);
        let mut last_idle_check = Instant::now();

        let result = loop {
            if self.shutdown.load(Ordering::SeqCst) {
                break Ok(());
            }
            if let Err(e) = self.poll_once(&mut events, Some(POLL_TIMEOUT)) {
                break Err(e);
            }
            if last_idle_check.elapsed() >= POLL_TIMEOUT {
                self.close_idle();
                last_idle_check = Instant::now();
            }
        };

        if let Some(sweeper) = sweeper {
            sweeper.stop();
        }
        info!(connections = self.connections.len(), "coordinator shutting down");
        self.connections.clear();
        metrics::set_connections(0);
        if let Err(e) = self.coordinator().compact() {
            warn!(error = %e, "compaction on shutdown failed");
        }
        result
    }

    /// Waits for and processes one batch of events.
    pub fn poll_once(&mut self, events: &mut Events, timeout: Option<Duration>) -> ServerResult<()> {
        if let Err(e) = self.poll.poll(events, timeout) {
            if e.kind() == std::io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(e.into());
        }

        for event in events.iter() {
            match event.token() {
                LISTENER_TOKEN => self.accept()?,
                WAKER_TOKEN => debug!("server woken"),
                #[cfg(unix)]
                SIGNAL_TOKEN => self.drain_signals(),
                token if self.http.as_ref().is_some_and(|http| http.owns(token)) => {
                    if let Some(http) = self.http.as_mut() {
                        http.handle_event(token, self.poll.registry(), self.handler.coordinator());
                    }
                }
                token => self.handle_connection_event(token, event),
            }
        }
        Ok(())
    }

    #[cfg(unix)]
    fn drain_signals(&mut self) {
        if let Some(signals) = self.signals.as_mut() {
            for signal in signals.pending() {
                info!(signal, "received shutdown signal");
                self.shutdown.store(true, Ordering::SeqCst);
            }
        }
    }

    fn accept(&mut self) -> ServerResult<()> {
        loop {
            match self.listener.accept() {
                Ok((mut stream, addr)) => {
                    if self.connections.len() >= self.config.max_connections {
                        warn!(%addr, max = self.config.max_connections, "connection refused: at capacity");
                        continue;
                    }
                    let token = Token(self.next_token);
                    self.next_token += 1;
                    self.poll
                        .registry()
                        .register(&mut stream, token, Interest::READABLE)?;
                    debug!(%addr, token = token.0, "connection accepted");
                    self.connections.insert(
                        token,
                        Connection::new(stream, self.config.buffer_capacity),
                    );
                    metrics::set_connections(self.connections.len());
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => {
                    error!(error = %e, "accept failed");
                    return Ok(());
                }
            }
        }
    }

    fn handle_connection_event(&mut self, token: Token, event: &Event) {
        let Some(conn) = self.connections.get_mut(&token) else {
            return;
        };
        let Disposition::Keep(interest) = conn.on_event(event, &self.handler) else {
            self.close(token);
            return;
        };
        if let Err(e) = self
            .poll
            .registry()
            .reregister(conn.stream_mut(), token, interest)
        {
            warn!(error = %e, "reregister failed");
            self.close(token);
        }
    }

    fn close(&mut self, token: Token) {
        if let Some(mut conn) = self.connections.remove(&token) {
            let _ = self.poll.registry().deregister(conn.stream_mut());
            debug!(token = token.0, served = conn.served(), "connection closed");
        }
        metrics::set_connections(self.connections.len());
    }

    fn close_idle(&mut self) {
        let timeout = self.config.idle_timeout;
        let idle: Vec<Token> = self
            .connections
            .iter()
            .filter(|(_, conn)| conn.is_idle(timeout))
            .map(|(token, _)| *token)
            .collect();
        for token in idle {
            debug!(token = token.0, "closing idle connection");
            self.close(token);
        }
    }
}
