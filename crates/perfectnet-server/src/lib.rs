//! Network front end for a PerfectNet coordinator.
//!
//! One thread runs a `mio` poll over three kinds of socket: the binary
//! protocol listener and its connections, the optional HTTP sidecar
//! (`/health`, `/ready`, `/metrics`, `/stats`), and on unix a signal pipe
//! that turns SIGINT or SIGTERM into a graceful stop. Each decoded
//! [`Request`](perfectnet_wire::Request) is answered inline by
//! [`RequestHandler`]; the coordinator lock is the only point shared with
//! the background expiry sweeper.
//!
//! ```ignore
//! use perfectnet_server::{Server, ServerConfig};
//!
//! let mut server = Server::with_signal_handling(ServerConfig::default(), coordinator)?;
//! server.run()?;
//! ```

mod auth;
mod config;
mod connection;
mod error;
mod handler;
pub mod http;
pub mod metrics;
mod server;
#[cfg(test)]
mod tests;

pub use auth::{AuthPolicy, Session};
pub use config::{DEFAULT_PORT, ServerConfig};
pub use error::{ServerError, ServerResult};
pub use handler::RequestHandler;
pub use server::{Server, ShutdownHandle};
