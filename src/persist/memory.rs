//! In-process store, shareable between "restarts" of a runtime.

use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use crate::{command::StoredCommand, types::CommandSeq};

use super::{decode_payload, encode_payload, CommandStore, PersistError, PersistResult};

/// Keeps encoded rows in a shared map.
///
/// Clones share the same rows, so dropping a runtime and restoring from a
/// clone behaves like a process restart over the same database.
#[derive(Debug, Clone, Default)]
pub struct MemoryCommandStore {
    rows: Arc<Mutex<BTreeMap<CommandSeq, Vec<u8>>>>,
    fail_writes: Arc<AtomicBool>,
}

impl MemoryCommandStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following write fail, simulating a broken disk.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of stored rows.
    pub fn len(&self) -> usize {
        self.lock().map(|rows| rows.len()).unwrap_or(0)
    }

    /// True when no row is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Decoded copy of every row.
    pub fn snapshot(&self) -> Vec<StoredCommand> {
        let Ok(rows) = self.lock() else {
            return Vec::new();
        };
        rows.iter()
            .filter_map(|(seq, payload)| decode_payload(*seq, payload).ok())
            .collect()
    }

    /// Stores raw bytes under `seq`, bypassing encoding.
    pub fn insert_raw(&self, seq: CommandSeq, payload: Vec<u8>) {
        if let Ok(mut rows) = self.lock() {
            rows.insert(seq, payload);
        }
    }

    fn lock(&self) -> PersistResult<std::sync::MutexGuard<'_, BTreeMap<CommandSeq, Vec<u8>>>> {
        self.rows
            .lock()
            .map_err(|_| PersistError::Message("memory store poisoned".to_string()))
    }

    fn check_writable(&self) -> PersistResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(PersistError::Message("write rejected".to_string()));
        }
        Ok(())
    }
}

impl CommandStore for MemoryCommandStore {
    fn save(&mut self, stored: &StoredCommand) -> PersistResult<()> {
        self.check_writable()?;
        let payload = encode_payload(stored)?;
        self.lock()?.insert(stored.seq, payload);
        Ok(())
    }

    fn load_all(&mut self) -> PersistResult<Vec<PersistResult<StoredCommand>>> {
        let rows = self.lock()?;
        Ok(rows
            .iter()
            .map(|(seq, payload)| decode_payload(*seq, payload))
            .collect())
    }

    fn delete(&mut self, seq: CommandSeq) -> PersistResult<()> {
        self.check_writable()?;
        self.lock()?.remove(&seq);
        Ok(())
    }

    fn update(&mut self, stored: &StoredCommand) -> PersistResult<()> {
        self.check_writable()?;
        let payload = encode_payload(stored)?;
        let mut rows = self.lock()?;
        if !rows.contains_key(&stored.seq) {
            return Err(PersistError::Message(format!("row {} missing", stored.seq)));
        }
        rows.insert(stored.seq, payload);
        Ok(())
    }
}
