//! Journal + snapshot store on the local filesystem.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use perfectnet_kernel::{Effect, Snapshot};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::record::JournalRecord;
use crate::{DurableStore, Result, StorageError, Tables};

const JOURNAL_FILENAME: &str = "journal.log";
const SNAPSHOT_FILENAME: &str = "snapshot.json";

/// Default number of journal records between snapshots.
const DEFAULT_COMPACT_EVERY: u64 = 1000;

/// Where and how often a [`FileStore`] writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStoreConfig {
    pub dir: PathBuf,
    /// Journal records written before the journal is folded into a snapshot.
    /// Zero disables automatic compaction.
    pub compact_every: u64,
}

impl FileStoreConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            compact_every: DEFAULT_COMPACT_EVERY,
        }
    }

    pub fn with_compact_every(mut self, records: u64) -> Self {
        self.compact_every = records;
        self
    }
}

/// On-disk shape of `snapshot.json`.
#[derive(Debug, Serialize, Deserialize)]
struct SnapshotFile {
    /// Sequence of the last journal record folded into `collections`.
    watermark: u64,
    collections: Snapshot,
}

/// Result of reading snapshot + journal without changing either.
#[derive(Debug)]
struct Replay {
    tables: Tables,
    last_sequence: u64,
    replayed: u64,
    /// Length of the journal prefix made of intact records.
    valid_len: u64,
    journal_len: u64,
}

/// Append-only effect journal with periodic JSON snapshots.
///
/// # Invariants
///
/// - Journal sequences are contiguous and start right after the snapshot
///   watermark
/// - `persist` returns only after the record is fsynced
/// - The snapshot is replaced by atomic rename before the journal is
///   truncated, so a crash in between only leaves records that replay
///   skips
#[derive(Debug)]
pub struct FileStore {
    config: FileStoreConfig,
    journal: Option<File>,
    tables: Tables,
    next_sequence: u64,
    since_compaction: u64,
}

impl FileStore {
    /// Creates a store handle. Nothing is read until [`DurableStore::recover`].
    pub fn new(config: FileStoreConfig) -> Self {
        Self {
            config,
            journal: None,
            tables: Tables::default(),
            next_sequence: 1,
            since_compaction: 0,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.config.dir
    }

    /// Sequence number the next persisted batch will get.
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Reads the persisted collections without repairing or locking anything.
    ///
    /// Used by offline tooling. A damaged journal tail is ignored, not
    /// truncated.
    pub fn read_snapshot(dir: impl AsRef<Path>) -> Result<Snapshot> {
        Ok(replay(dir.as_ref())?.tables.to_snapshot())
    }

    fn journal_path(&self) -> PathBuf {
        self.config.dir.join(JOURNAL_FILENAME)
    }

    fn write_snapshot(&self, watermark: u64) -> Result<()> {
        let file = SnapshotFile {
            watermark,
            collections: self.tables.to_snapshot(),
        };
        let json = serde_json::to_vec_pretty(&file)?;

        let path = self.config.dir.join(SNAPSHOT_FILENAME);
        let tmp = path.with_extension("json.tmp");
        {
            let mut out = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp)?;
            out.write_all(&json)?;
            out.sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        sync_dir(&self.config.dir)?;
        Ok(())
    }
}

impl DurableStore for FileStore {
    fn recover(&mut self) -> Result<Snapshot> {
        fs::create_dir_all(&self.config.dir)?;
        let replay = replay(&self.config.dir)?;

        if replay.valid_len < replay.journal_len {
            warn!(
                dir = %self.config.dir.display(),
                discarded_bytes = replay.journal_len - replay.valid_len,
                "truncating damaged journal tail"
            );
            let file = OpenOptions::new().write(true).open(self.journal_path())?;
            file.set_len(replay.valid_len)?;
            file.sync_all()?;
        }

        let journal = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.journal_path())?;

        info!(
            dir = %self.config.dir.display(),
            replayed = replay.replayed,
            last_sequence = replay.last_sequence,
            rows = replay.tables.row_count(),
            "store recovered"
        );

        self.journal = Some(journal);
        self.tables = replay.tables;
        self.next_sequence = replay.last_sequence + 1;
        self.since_compaction = replay.replayed;
        Ok(self.tables.to_snapshot())
    }

    fn persist(&mut self, effects: &[Effect]) -> Result<()> {
        let durable: Vec<&Effect> = effects.iter().filter(|e| e.is_durable()).collect();
        if durable.is_empty() {
            return Ok(());
        }
        let journal = self.journal.as_mut().ok_or(StorageError::NotRecovered)?;

        let payload = postcard::to_allocvec(&durable).map_err(StorageError::Encode)?;
        let sequence = self.next_sequence;
        let record = JournalRecord::new(sequence, payload);
        journal.write_all(&record.encode())?;
        journal.sync_data()?;

        for effect in durable {
            self.tables.apply(effect);
        }
        self.next_sequence += 1;
        self.since_compaction += 1;
        debug!(sequence, "journal record committed");

        if self.config.compact_every > 0 && self.since_compaction >= self.config.compact_every {
            // The batch is already durable; a failed compaction is retried
            // on the next write.
            if let Err(e) = self.compact() {
                warn!(error = %e, "journal compaction failed");
            }
        }
        Ok(())
    }

    fn compact(&mut self) -> Result<()> {
        if self.journal.is_none() {
            return Err(StorageError::NotRecovered);
        }
        let watermark = self.next_sequence - 1;
        self.write_snapshot(watermark)?;

        if let Some(journal) = self.journal.as_mut() {
            journal.set_len(0)?;
            journal.sync_all()?;
        }
        info!(
            watermark,
            folded = self.since_compaction,
            "journal compacted into snapshot"
        );
        self.since_compaction = 0;
        Ok(())
    }
}

fn replay(dir: &Path) -> Result<Replay> {
    let (watermark, mut tables) = match fs::read(dir.join(SNAPSHOT_FILENAME)) {
        Ok(data) => {
            let file: SnapshotFile = serde_json::from_slice(&data)?;
            (file.watermark, Tables::from_snapshot(file.collections))
        }
        Err(e) if e.kind() == ErrorKind::NotFound => (0, Tables::default()),
        Err(e) => return Err(e.into()),
    };

    let data: Bytes = match fs::read(dir.join(JOURNAL_FILENAME)) {
        Ok(data) => data.into(),
        Err(e) if e.kind() == ErrorKind::NotFound => Bytes::new(),
        Err(e) => return Err(e.into()),
    };

    let mut last_sequence = watermark;
    let mut replayed = 0;
    let mut pos = 0;
    while pos < data.len() {
        let (record, consumed) = match JournalRecord::decode(&data.slice(pos..)) {
            Ok(parsed) => parsed,
            Err(
                e @ (StorageError::UnexpectedEof
                | StorageError::TornWrite { .. }
                | StorageError::CorruptedRecord),
            ) => {
                warn!(offset = pos, error = %e, "journal ends in a damaged record");
                break;
            }
            Err(e) => return Err(e),
        };

        let sequence = record.sequence();
        if sequence <= watermark {
            // already folded into the snapshot
            pos += consumed;
            continue;
        }
        if sequence != last_sequence + 1 {
            warn!(
                offset = pos,
                expected = last_sequence + 1,
                found = sequence,
                "journal sequence gap"
            );
            break;
        }

        let effects: Vec<Effect> = postcard::from_bytes(record.payload())
            .map_err(|source| StorageError::Decode { sequence, source })?;
        for effect in &effects {
            tables.apply(effect);
        }
        last_sequence = sequence;
        replayed += 1;
        pos += consumed;
    }

    Ok(Replay {
        tables,
        last_sequence,
        replayed,
        valid_len: pos as u64,
        journal_len: data.len() as u64,
    })
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> std::io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}
