//! # perfectnet-storage: Durable state for the `PerfectNet` coordinator
//!
//! The kernel describes every state change as a batch of effects. This
//! crate makes those batches durable and rebuilds the kernel's collections
//! after a restart.
//!
//! - [`FileStore`]: an append-only journal of CRC-framed effect batches
//!   plus a periodically compacted JSON snapshot
//! - [`MemoryStore`]: an in-process store with failure injection, for tests
//! - [`Tables`]: the keyed mirror both stores maintain
//!
//! # File Layout
//!
//! ```text
//! {data_dir}/
//! ├── snapshot.json   <- collections as of journal sequence `watermark`
//! └── journal.log     <- records with sequence > watermark
//! ```

use std::io;

use perfectnet_kernel::{Effect, Snapshot};

mod file;
mod memory;
mod record;
mod tables;


pub use file::{FileStore, FileStoreConfig};
pub use memory::MemoryStore;
pub use record::JournalRecord;
pub use tables::Tables;

/// A store that can make effect batches durable and replay them.
pub trait DurableStore: Send + Sync + std::fmt::Debug {
    /// Loads whatever was persisted. Must be called once before `persist`.
    fn recover(&mut self) -> Result<Snapshot>;

    /// Makes one command's effects durable. Returns only after the batch
    /// would survive a crash. Audit effects are skipped.
    fn persist(&mut self, effects: &[Effect]) -> Result<()>;

    /// Folds the journal into a fresh snapshot, if the store has one.
    fn compact(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<S: DurableStore + ?Sized> DurableStore for Box<S> {
    fn recover(&mut self) -> Result<Snapshot> {
        (**self).recover()
    }

    fn persist(&mut self, effects: &[Effect]) -> Result<()> {
        (**self).persist(effects)
    }

    fn compact(&mut self) -> Result<()> {
        (**self).compact()
    }
}

/// Errors that can occur during storage operations.
#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error("filesystem error: {0}")]
    Io(#[from] io::Error),

    #[error("unexpected end of file")]
    UnexpectedEof,

    #[error("corrupted record: CRC mismatch")]
    CorruptedRecord,

    #[error("torn write detected: {reason}")]
    TornWrite { reason: String },

    #[error("failed to encode journal record: {0}")]
    Encode(postcard::Error),

    #[error("journal record {sequence} has a valid checksum but cannot be decoded: {source}")]
    Decode {
        sequence: u64,
        source: postcard::Error,
    },

    #[error("snapshot file is unreadable: {0}")]
    Snapshot(#[from] serde_json::Error),

    #[error("store used before recovery")]
    NotRecovered,

    #[error("injected write failure")]
    Injected,

    #[error("store lock poisoned")]
    Poisoned,
}

pub type Result<T> = std::result::Result<T, StorageError>;
