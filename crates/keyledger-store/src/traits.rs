//! Store trait: the abstract interface for device-local persistence.
//!
//! A store belongs to one device of one account. It keeps the current row
//! of every record, an append-only history of superseded rows, the
//! per-unit sync state, and the grants the account has issued.

use async_trait::async_trait;
use keyledger_core::{EncryptedRecord, EncryptionUnit, RecordId, SyncState};
use keyledger_grants::{Grant, GrantId};

use crate::error::Result;

/// Result of appending a row to the history ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertResult {
    /// Row was appended.
    Inserted,
    /// The same (record id, data version, nonce) is already archived.
    AlreadyExists,
}

/// The Store trait: async interface for local persistence.
///
/// All methods are async so SQLite can run on `spawn_blocking` without
/// blocking the runtime.
///
/// # Design Notes
///
/// - **Superseded, not mutated**: callers archive the old row with
///   [`append_history`](Store::append_history) before replacing it.
/// - **Pending flag**: a current row is pending until a push containing
///   exactly that data version is accepted.
/// - **Idempotent history**: appending the same row twice is not an error.
#[async_trait]
pub trait Store: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Current rows
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert or replace the current row for `record.record_id`.
    async fn put_record(&self, record: &EncryptedRecord, pending: bool) -> Result<()>;

    /// Get the current row of a record.
    async fn get_record(&self, id: &RecordId) -> Result<Option<EncryptedRecord>>;

    /// All current rows of a unit, ordered by record id.
    async fn records_in_unit(&self, unit: &EncryptionUnit) -> Result<Vec<EncryptedRecord>>;

    /// Current rows of a unit not yet accepted by the server.
    async fn pending_records(&self, unit: &EncryptionUnit) -> Result<Vec<EncryptedRecord>>;

    /// Clear the pending flag of each `(record id, data version)` whose
    /// current row still has that version.
    async fn clear_pending(&self, accepted: &[(RecordId, u64)]) -> Result<()>;

    // ─────────────────────────────────────────────────────────────────────────
    // History ledger
    // ─────────────────────────────────────────────────────────────────────────

    /// Archive a row. Keyed by (record id, data version, nonce).
    async fn append_history(&self, record: &EncryptedRecord) -> Result<InsertResult>;

    /// Archived rows of a record, ordered by data version.
    async fn history(&self, id: &RecordId) -> Result<Vec<EncryptedRecord>>;

    /// Number of encryptions performed under the unit's key that this
    /// device knows of: current rows plus archived rows.
    async fn count_encryptions(&self, unit: &EncryptionUnit) -> Result<u64>;

    // ─────────────────────────────────────────────────────────────────────────
    // Sync state
    // ─────────────────────────────────────────────────────────────────────────

    /// Get the sync state of a unit.
    async fn get_sync_state(&self, unit: &EncryptionUnit) -> Result<Option<SyncState>>;

    /// Insert or replace the sync state of a unit.
    async fn upsert_sync_state(&self, state: &SyncState) -> Result<()>;

    /// Sync states of every unit this device has touched, ordered by unit.
    async fn list_sync_states(&self) -> Result<Vec<SyncState>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Grants
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert or replace a grant, keyed by its id.
    async fn put_grant(&self, grant: &Grant) -> Result<()>;

    async fn get_grant(&self, id: &GrantId) -> Result<Option<Grant>>;

    /// Every stored grant, tombstones included, ordered by creation time.
    async fn list_grants(&self) -> Result<Vec<Grant>>;
}

/// Extension trait for common store patterns.
#[async_trait]
pub trait StoreExt: Store {
    /// Sync state of a unit, or a fresh one if the unit was never touched.
    async fn sync_state_or_new(&self, unit: &EncryptionUnit) -> Result<SyncState> {
        Ok(self
            .get_sync_state(unit)
            .await?
            .unwrap_or_else(|| SyncState::new(*unit)))
    }

    /// Archive the current row of `record.record_id` (if any) and make
    /// `record` the current row.
    async fn supersede(&self, record: &EncryptedRecord, pending: bool) -> Result<()> {
        if let Some(previous) = self.get_record(&record.record_id).await? {
            self.append_history(&previous).await?;
        }
        self.put_record(record, pending).await
    }

    /// Units with unsynced local writes.
    async fn dirty_units(&self) -> Result<Vec<EncryptionUnit>> {
        Ok(self
            .list_sync_states()
            .await?
            .into_iter()
            .filter(|s| s.dirty)
            .map(|s| s.unit)
            .collect())
    }
}

impl<S: Store + ?Sized> StoreExt for S {}
