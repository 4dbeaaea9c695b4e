//! In-memory implementation of the Store trait.
//!
//! This is primarily for testing. It has the same semantics as SQLite
//! but keeps everything in memory with no persistence.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use bytes::Bytes;

use keyledger_core::{EncryptedRecord, EncryptionUnit, RecordId, SyncState};
use keyledger_grants::{Grant, GrantId};

use crate::error::Result;
use crate::traits::{InsertResult, Store};

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock.
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    /// Current rows, ordered by record id.
    records: BTreeMap<RecordId, StoredRecord>,

    /// Archived rows keyed by (record id, data version, nonce).
    history: BTreeMap<(RecordId, u64, Bytes), EncryptedRecord>,

    /// Sync state per unit.
    sync_states: HashMap<EncryptionUnit, SyncState>,

    grants: HashMap<GrantId, Grant>,
}

struct StoredRecord {
    record: EncryptedRecord,
    pending: bool,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryStoreInner::default()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, MemoryStoreInner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, MemoryStoreInner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn put_record(&self, record: &EncryptedRecord, pending: bool) -> Result<()> {
        self.write().records.insert(
            record.record_id,
            StoredRecord {
                record: record.clone(),
                pending,
            },
        );
        Ok(())
    }

    async fn get_record(&self, id: &RecordId) -> Result<Option<EncryptedRecord>> {
        Ok(self.read().records.get(id).map(|s| s.record.clone()))
    }

    async fn records_in_unit(&self, unit: &EncryptionUnit) -> Result<Vec<EncryptedRecord>> {
        Ok(self
            .read()
            .records
            .values()
            .filter(|s| s.record.unit == *unit)
            .map(|s| s.record.clone())
            .collect())
    }

    async fn pending_records(&self, unit: &EncryptionUnit) -> Result<Vec<EncryptedRecord>> {
        Ok(self
            .read()
            .records
            .values()
            .filter(|s| s.pending && s.record.unit == *unit)
            .map(|s| s.record.clone())
            .collect())
    }

    async fn clear_pending(&self, accepted: &[(RecordId, u64)]) -> Result<()> {
        let mut inner = self.write();
        for (id, version) in accepted {
            if let Some(stored) = inner.records.get_mut(id) {
                if stored.record.data_version == *version {
                    stored.pending = false;
                }
            }
        }
        Ok(())
    }

    async fn append_history(&self, record: &EncryptedRecord) -> Result<InsertResult> {
        let key = (
            record.record_id,
            record.data_version,
            record.envelope.nonce.clone(),
        );
        let mut inner = self.write();
        if inner.history.contains_key(&key) {
            return Ok(InsertResult::AlreadyExists);
        }
        inner.history.insert(key, record.clone());
        Ok(InsertResult::Inserted)
    }

    async fn history(&self, id: &RecordId) -> Result<Vec<EncryptedRecord>> {
        Ok(self
            .read()
            .history
            .iter()
            .filter(|((rid, _, _), _)| rid == id)
            .map(|(_, r)| r.clone())
            .collect())
    }

    async fn count_encryptions(&self, unit: &EncryptionUnit) -> Result<u64> {
        let inner = self.read();
        let current = inner
            .records
            .values()
            .filter(|s| s.record.unit == *unit)
            .count();
        let archived = inner.history.values().filter(|r| r.unit == *unit).count();
        Ok((current + archived) as u64)
    }

    async fn get_sync_state(&self, unit: &EncryptionUnit) -> Result<Option<SyncState>> {
        Ok(self.read().sync_states.get(unit).cloned())
    }

    async fn upsert_sync_state(&self, state: &SyncState) -> Result<()> {
        self.write().sync_states.insert(state.unit, state.clone());
        Ok(())
    }

    async fn list_sync_states(&self) -> Result<Vec<SyncState>> {
        let mut states: Vec<SyncState> = self.read().sync_states.values().cloned().collect();
        states.sort_by_key(|s| s.unit);
        Ok(states)
    }

    async fn put_grant(&self, grant: &Grant) -> Result<()> {
        self.write().grants.insert(grant.id, grant.clone());
        Ok(())
    }

    async fn get_grant(&self, id: &GrantId) -> Result<Option<Grant>> {
        Ok(self.read().grants.get(id).cloned())
    }

    async fn list_grants(&self) -> Result<Vec<Grant>> {
        let mut grants: Vec<Grant> = self.read().grants.values().cloned().collect();
        grants.sort_by_key(|g| (g.created_at, g.id));
        Ok(grants)
    }
}
