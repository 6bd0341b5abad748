use std::net::SocketAddr;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 7420;

/// Listener addresses, connection limits, and access control for a
/// [`Server`](crate::Server).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// `None` serves no HTTP sidecar.
    pub http_addr: Option<SocketAddr>,
    /// Connections beyond this are accepted and dropped immediately.
    pub max_connections: usize,
    /// Initial capacity of each connection's inbound and outbound buffers.
    pub buffer_capacity: usize,
    pub idle_timeout: Duration,
    /// `None` leaves expired leases in place until someone sweeps by hand.
    pub sweep_interval: Option<Duration>,
    /// With no token configured every session may issue admin requests.
    pub admin_token: Option<String>,
    pub require_api_keys: bool,
}

impl ServerConfig {
    pub fn new(bind_addr: impl Into<SocketAddr>) -> Self {
        Self {
            bind_addr: bind_addr.into(),
            ..Self::default()
        }
    }

    pub fn with_http_addr(mut self, addr: Option<SocketAddr>) -> Self {
        self.http_addr = addr;
        self
    }

    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Option<Duration>) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_admin_token(mut self, token: Option<String>) -> Self {
        self.admin_token = token;
        self
    }

    pub fn with_require_api_keys(mut self, required: bool) -> Self {
        self.require_api_keys = required;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)),
            http_addr: None,
            max_connections: 1024,
            buffer_capacity: 16 * 1024,
            idle_timeout: Duration::from_secs(300),
            sweep_interval: Some(Duration::from_secs(60)),
            admin_token: None,
            require_api_keys: false,
        }
    }
}
