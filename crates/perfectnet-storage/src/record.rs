//! Journal record framing.
//!
//! One record per committed batch of durable effects:
//!
//! ```text
//! magic  u32   0x4A524E4C ("JRNL")
//! seq    u64   batch sequence, starting at 1
//! len    u32   payload length
//! body   [u8]  postcard-encoded effects
//! crc    u32   crc32 over magic..body
//! tail   u32   0x454E444A
//! ```
//!
//! Integers are little-endian. A record without its tail was cut short by
//! a crash mid-append.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::StorageError;

const MAGIC: u32 = 0x4A52_4E4C;
const TAIL: u32 = 0x454E_444A;

const PREFIX_LEN: usize = 4 + 8 + 4;
const SUFFIX_LEN: usize = 4 + 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalRecord {
    sequence: u64,
    payload: Bytes,
}

impl JournalRecord {
    pub fn new(sequence: u64, payload: impl Into<Bytes>) -> Self {
        Self {
            sequence,
            payload: payload.into(),
        }
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn encoded_len(&self) -> usize {
        PREFIX_LEN + self.payload.len() + SUFFIX_LEN
    }

    pub fn encode(&self) -> BytesMut {
        let mut out = BytesMut::with_capacity(self.encoded_len());
        out.put_u32_le(MAGIC);
        out.put_u64_le(self.sequence);
        out.put_u32_le(self.payload.len() as u32);
        out.put_slice(&self.payload);
        let checksum = crc32fast::hash(&out);
        out.put_u32_le(checksum);
        out.put_u32_le(TAIL);
        out
    }

    /// Reads the record at the front of `data`, returning it with the
    /// number of bytes it occupied.
    ///
    /// A short buffer is [`StorageError::UnexpectedEof`], a checksum
    /// mismatch is [`StorageError::CorruptedRecord`], and a bad magic or
    /// tail is [`StorageError::TornWrite`].
    pub fn decode(data: &Bytes) -> Result<(Self, usize), StorageError> {
        let mut prefix = data.get(..PREFIX_LEN).ok_or(StorageError::UnexpectedEof)?;
        let magic = prefix.get_u32_le();
        if magic != MAGIC {
            return Err(StorageError::TornWrite {
                reason: format!("no record magic at this offset (found {magic:#010x})"),
            });
        }
        let sequence = prefix.get_u64_le();
        let body_end = PREFIX_LEN + prefix.get_u32_le() as usize;

        let mut suffix = data
            .get(body_end..body_end + SUFFIX_LEN)
            .ok_or(StorageError::UnexpectedEof)?;
        if suffix.get_u32_le() != crc32fast::hash(&data[..body_end]) {
            return Err(StorageError::CorruptedRecord);
        }
        let tail = suffix.get_u32_le();
        if tail != TAIL {
            return Err(StorageError::TornWrite {
                reason: format!("record {sequence} has tail {tail:#010x}"),
            });
        }

        let record = Self {
            sequence,
            payload: data.slice(PREFIX_LEN..body_end),
        };
        Ok((record, body_end + SUFFIX_LEN))
    }
}
