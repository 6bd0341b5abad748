//! # perfectnet-wire: Binary wire protocol for `PerfectNet`
//!
//! Workers, admin tools and the coordinator talk over TCP using
//! length-prefixed, checksummed frames.
//!
//! ## Frame Format
//!
//! ```text
//! ┌──────────┬──────────┬──────────┬──────────┬─────────────────┐
//! │  Magic   │ Version  │  Length  │ Checksum │     Payload     │
//! │ (4 bytes)│ (2 bytes)│ (4 bytes)│ (4 bytes)│ (Length bytes)  │
//! └──────────┴──────────┴──────────┴──────────┴─────────────────┘
//! ```
//!
//! - **Magic**: `0x504E4554` ("PNET")
//! - **Version**: protocol version (currently 1)
//! - **Length**: payload length in bytes (max 16 MiB)
//! - **Checksum**: CRC32 of the payload
//!
//! All integers are big-endian. The payload is a postcard-encoded
//! [`Request`] or [`Response`].
//!
//! ## Message Flow
//!
//! A connection opens with a [`RequestPayload::Handshake`] carrying the
//! protocol version and credentials. Every later request carries a
//! [`RequestId`] that the matching [`Response`] echoes back.

mod error;
mod frame;
mod message;


pub use error::{WireError, WireResult};
pub use frame::{
    FRAME_HEADER_SIZE, Frame, FrameHeader, MAGIC, MAX_PAYLOAD_SIZE, PROTOCOL_VERSION,
};
pub use message::{
    AdminRequest, ErrorCode, ErrorResponse, HandshakeRequest, HandshakeResponse,
    ProgressResponse, Request, RequestId, RequestPayload, Response, ResponsePayload,
    SubmitVerdictRequest, UserInfo, VerdictResponse,
};
