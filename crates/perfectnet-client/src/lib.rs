//! # perfectnet-client: RPC client for `PerfectNet`
//!
//! A synchronous client for the coordinator's binary wire protocol. One
//! request is in flight at a time; every call blocks until the matching
//! response arrives.
//!
//! ## Usage
//!
//! ```ignore
//! use perfectnet_client::{Client, ClientConfig};
//! use perfectnet_types::WorkerId;
//!
//! let worker = WorkerId::new("alice")?;
//! let mut client = Client::connect("127.0.0.1:7420", ClientConfig::default())?;
//!
//! let assignment = client.request_assignment(&worker)?;
//! client.report_progress(&worker, assignment.exponent, 12.5)?;
//! ```
//!
//! ## Configuration
//!
//! Credentials travel in the handshake that `connect` performs:
//!
//! ```ignore
//! let config = ClientConfig::default()
//!     .with_worker(worker, Some(api_key))
//!     .with_admin_token(Some("operator-secret".to_string()));
//! ```

mod client;
mod error;

pub use client::{Client, ClientConfig};
pub use error::{ClientError, ClientResult};

// Re-export useful types from dependencies
pub use perfectnet_wire::{ErrorCode, HandshakeResponse, UserInfo, VerdictResponse};
