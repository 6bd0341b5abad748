//! In-memory store for tests.

use std::sync::{Arc, Mutex, MutexGuard};

use perfectnet_kernel::{Effect, Snapshot};

use crate::{DurableStore, Result, StorageError, Tables};

#[derive(Debug, Default)]
struct Inner {
    tables: Tables,
    batches: u64,
    failing: bool,
}

/// A non-durable [`DurableStore`] whose writes can be made to fail.
///
/// Clones share the same tables, so a test can keep a handle while the
/// coordinator owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that recovers `snapshot`.
    pub fn with_snapshot(snapshot: Snapshot) -> Self {
        let store = Self::default();
        if let Ok(mut inner) = store.inner.lock() {
            inner.tables = Tables::from_snapshot(snapshot);
        }
        store
    }

    /// While set, every `persist` fails with [`StorageError::Injected`] and
    /// changes nothing.
    pub fn set_failing(&self, failing: bool) -> Result<()> {
        self.lock()?.failing = failing;
        Ok(())
    }

    /// Number of batches successfully persisted.
    pub fn batches(&self) -> Result<u64> {
        Ok(self.lock()?.batches)
    }

    /// The collections as persisted so far.
    pub fn snapshot(&self) -> Result<Snapshot> {
        Ok(self.lock()?.tables.to_snapshot())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner.lock().map_err(|_| StorageError::Poisoned)
    }
}

impl DurableStore for MemoryStore {
    fn recover(&mut self) -> Result<Snapshot> {
        self.snapshot()
    }

    fn persist(&mut self, effects: &[Effect]) -> Result<()> {
        let mut inner = self.lock()?;
        if inner.failing {
            return Err(StorageError::Injected);
        }
        if !effects.iter().any(Effect::is_durable) {
            return Ok(());
        }
        for effect in effects {
            inner.tables.apply(effect);
        }
        inner.batches += 1;
        Ok(())
    }
}
