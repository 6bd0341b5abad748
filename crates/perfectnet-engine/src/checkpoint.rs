//! Worker-local checkpoint files.
//!
//! # Format
//!
//! ```text
//! [CHECKPOINT_START:u32][version:u8][exponent:u64][iteration:u64][started_at:u64][residue_len:u32][residue:bytes][crc32:u32][CHECKPOINT_END:u32]
//!          4B               1B          8B            8B              8B              4B           variable        4B             4B
//! ```
//!
//! The residue is stored little-endian. The CRC covers everything from the
//! start sentinel through the residue. A file is written to a temporary
//! sibling, synced, then renamed over the old checkpoint, so a crash leaves
//! either the previous checkpoint or the new one and never a mix.

use std::{
    fs::{self, File, OpenOptions},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};

use bytes::{Buf, BufMut, BytesMut};
use num_bigint::BigUint;
use perfectnet_types::{Exponent, Timestamp};
use tracing::debug;

use crate::{EngineError, Result, VerificationState};

const CHECKPOINT_START: u32 = 0x4C4C_4350; // "PCLL"
const CHECKPOINT_END: u32 = 0x454E_4421;
const CHECKPOINT_VERSION: u8 = 1;

// start(4) + version(1) + exponent(8) + iteration(8) + started_at(8) + residue_len(4)
const HEADER_SIZE: usize = 33;
// crc(4) + end(4)
const TRAILER_SIZE: usize = 8;

/// Serializes a verification state into a checkpoint frame.
pub fn encode_checkpoint(state: &VerificationState) -> Vec<u8> {
    let residue = state.residue.to_bytes_le();
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + residue.len() + TRAILER_SIZE);
    buf.put_u32_le(CHECKPOINT_START);
    buf.put_u8(CHECKPOINT_VERSION);
    buf.put_u64_le(state.exponent.as_u64());
    buf.put_u64_le(state.iteration);
    buf.put_u64_le(state.started_at.as_nanos());
    buf.put_u32_le(residue.len() as u32);
    buf.put_slice(&residue);
    let crc = crc32fast::hash(&buf);
    buf.put_u32_le(crc);
    buf.put_u32_le(CHECKPOINT_END);
    buf.to_vec()
}

/// Parses a checkpoint frame written for `expected`.
///
/// Every failure, from truncation to a checkpoint that belongs to another
/// exponent, is `CorruptCheckpoint`.
pub fn decode_checkpoint(expected: Exponent, data: &[u8]) -> Result<VerificationState> {
    let corrupt = |reason: &str| EngineError::CorruptCheckpoint {
        exponent: expected,
        reason: reason.to_string(),
    };

    if data.len() < HEADER_SIZE + TRAILER_SIZE {
        return Err(corrupt("truncated header"));
    }
    let mut header = &data[..HEADER_SIZE];
    if header.get_u32_le() != CHECKPOINT_START {
        return Err(corrupt("missing start sentinel"));
    }
    let version = header.get_u8();
    if version != CHECKPOINT_VERSION {
        return Err(corrupt(&format!("unsupported version {version}")));
    }
    let exponent = Exponent::new(header.get_u64_le());
    let iteration = header.get_u64_le();
    let started_at = Timestamp::from_nanos(header.get_u64_le());
    let residue_len = header.get_u32_le() as usize;

    let body_end = HEADER_SIZE + residue_len;
    if data.len() != body_end + TRAILER_SIZE {
        return Err(corrupt("length does not match residue size"));
    }
    let mut trailer = &data[body_end..];
    let stored_crc = trailer.get_u32_le();
    if stored_crc != crc32fast::hash(&data[..body_end]) {
        return Err(corrupt("crc mismatch"));
    }
    if trailer.get_u32_le() != CHECKPOINT_END {
        return Err(corrupt("missing end sentinel"));
    }
    if exponent != expected {
        return Err(corrupt(&format!("file holds exponent {exponent}")));
    }

    Ok(VerificationState {
        exponent,
        iteration,
        residue: BigUint::from_bytes_le(&data[HEADER_SIZE..body_end]),
        started_at,
    })
}

/// A directory of checkpoint files, one per exponent.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    /// Opens (creating if needed) a checkpoint directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, exponent: Exponent) -> PathBuf {
        self.dir.join(format!("checkpoint-{exponent}.bin"))
    }

    /// Durably replaces the checkpoint for `state.exponent`.
    pub fn save(&self, state: &VerificationState) -> Result<()> {
        let path = self.path_for(state.exponent);
        let tmp = path.with_extension("bin.tmp");
        {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp)?;
            file.write_all(&encode_checkpoint(state))?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        sync_dir(&self.dir)?;
        debug!(exponent = %state.exponent, iteration = state.iteration, "checkpoint saved");
        Ok(())
    }

    /// Loads the checkpoint for `exponent`, if one exists.
    pub fn load(&self, exponent: Exponent) -> Result<Option<VerificationState>> {
        match fs::read(self.path_for(exponent)) {
            Ok(data) => decode_checkpoint(exponent, &data).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Deletes the checkpoint for `exponent`. Missing files are fine.
    pub fn remove(&self, exponent: Exponent) -> Result<()> {
        match fs::remove_file(self.path_for(exponent)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Exponents that currently have a checkpoint on disk.
    pub fn list(&self) -> Result<Vec<Exponent>> {
        let mut found = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let name = entry?.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(p) = name
                .strip_prefix("checkpoint-")
                .and_then(|rest| rest.strip_suffix(".bin"))
                .and_then(|p| p.parse::<u64>().ok())
            {
                found.push(Exponent::new(p));
            }
        }
        found.sort();
        Ok(found)
    }
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> std::io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(p: u64, iteration: u64, residue: u32) -> VerificationState {
        VerificationState {
            exponent: Exponent::new(p),
            iteration,
            residue: BigUint::from(residue),
            started_at: Timestamp::from_secs(1_700_000_000),
        }
    }

    #[test]
    fn frame_round_trips() {
        let original = state(127, 50, 0xDEAD_BEEF);
        let decoded = decode_checkpoint(Exponent::new(127), &encode_checkpoint(&original)).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn flipped_bit_is_detected() {
        let mut bytes = encode_checkpoint(&state(127, 50, 12345));
        bytes[HEADER_SIZE] ^= 0x01;
        let err = decode_checkpoint(Exponent::new(127), &bytes).unwrap_err();
        assert!(matches!(err, EngineError::CorruptCheckpoint { .. }));
        assert!(err.to_string().contains("crc mismatch"));
    }

    #[test]
    fn truncation_is_detected() {
        let bytes = encode_checkpoint(&state(127, 50, 12345));
        for len in [0, 10, HEADER_SIZE, bytes.len() - 1] {
            assert!(
                decode_checkpoint(Exponent::new(127), &bytes[..len]).is_err(),
                "length {len} should be rejected"
            );
        }
    }

    #[test]
    fn wrong_exponent_is_corrupt() {
        let bytes = encode_checkpoint(&state(521, 10, 7));
        let err = decode_checkpoint(Exponent::new(127), &bytes).unwrap_err();
        assert!(err.to_string().contains("exponent 521"));
    }

    #[test]
    fn store_save_load_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::open(dir.path().join("checkpoints")).unwrap();
        let p = Exponent::new(127);

        assert_eq!(store.load(p).unwrap(), None);
        store.save(&state(127, 10, 99)).unwrap();
        store.save(&state(127, 20, 42)).unwrap();
        assert_eq!(store.load(p).unwrap(), Some(state(127, 20, 42)));
        assert_eq!(store.list().unwrap(), vec![p]);
        assert!(!store.path_for(p).with_extension("bin.tmp").exists());

        store.remove(p).unwrap();
        store.remove(p).unwrap();
        assert_eq!(store.load(p).unwrap(), None);
    }

    #[test]
    fn garbage_file_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::open(dir.path()).unwrap();
        fs::write(store.path_for(Exponent::new(127)), b"not a checkpoint").unwrap();
        assert!(matches!(
            store.load(Exponent::new(127)),
            Err(EngineError::CorruptCheckpoint { .. })
        ));
    }
}
