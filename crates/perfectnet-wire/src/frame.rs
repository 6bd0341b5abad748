//! Frame encoding and decoding.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{WireError, WireResult};

/// "PNET" in ASCII.
pub const MAGIC: u32 = 0x504E_4554;

pub const PROTOCOL_VERSION: u16 = 1;

/// magic(4) + version(2) + length(4) + checksum(4)
pub const FRAME_HEADER_SIZE: usize = 14;

/// Largest payload a peer may send.
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: u16,
    pub length: u32,
    pub checksum: u32,
}

impl FrameHeader {
    /// Parses a header without consuming it.
    ///
    /// Returns `Ok(None)` if fewer than [`FRAME_HEADER_SIZE`] bytes are
    /// available.
    pub fn peek(buf: &[u8]) -> WireResult<Option<Self>> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }
        let mut cursor = &buf[..FRAME_HEADER_SIZE];
        let magic = cursor.get_u32();
        if magic != MAGIC {
            return Err(WireError::InvalidMagic(magic));
        }
        let version = cursor.get_u16();
        if version != PROTOCOL_VERSION {
            return Err(WireError::UnsupportedVersion(version));
        }
        let length = cursor.get_u32();
        if length as usize > MAX_PAYLOAD_SIZE {
            return Err(WireError::FrameTooLarge {
                size: length as usize,
                max: MAX_PAYLOAD_SIZE,
            });
        }
        let checksum = cursor.get_u32();
        Ok(Some(Self {
            version,
            length,
            checksum,
        }))
    }
}

/// One framed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Bytes,
}

impl Frame {
    /// Wraps `payload`, computing its checksum.
    pub fn new(payload: Bytes) -> WireResult<Self> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(WireError::FrameTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }
        Ok(Self {
            header: FrameHeader {
                version: PROTOCOL_VERSION,
                length: payload.len() as u32,
                checksum: crc32fast::hash(&payload),
            },
            payload,
        })
    }

    /// Size of the frame on the wire.
    pub fn encoded_len(&self) -> usize {
        FRAME_HEADER_SIZE + self.payload.len()
    }

    /// Appends the encoded frame to `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(self.encoded_len());
        buf.put_u32(MAGIC);
        buf.put_u16(self.header.version);
        buf.put_u32(self.header.length);
        buf.put_u32(self.header.checksum);
        buf.put_slice(&self.payload);
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Takes one complete frame off the front of `buf`.
    ///
    /// Returns `Ok(None)` and leaves `buf` untouched while the frame is
    /// still incomplete. A bad header or checksum is an error; the
    /// connection should be dropped since the stream cannot be resynced.
    pub fn decode(buf: &mut BytesMut) -> WireResult<Option<Self>> {
        let Some(header) = FrameHeader::peek(buf)? else {
            return Ok(None);
        };
        let total = FRAME_HEADER_SIZE + header.length as usize;
        if buf.len() < total {
            return Ok(None);
        }

        buf.advance(FRAME_HEADER_SIZE);
        let payload = buf.split_to(header.length as usize).freeze();
        let actual = crc32fast::hash(&payload);
        if actual != header.checksum {
            return Err(WireError::ChecksumMismatch {
                expected: header.checksum,
                actual,
            });
        }
        Ok(Some(Self { header, payload }))
    }
}
