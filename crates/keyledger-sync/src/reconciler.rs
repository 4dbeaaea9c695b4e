//! Sync reconciliation between a device store and the ledger.
//!
//! Per unit, per device:
//!
//! ```text
//! Clean ──write──▶ Dirty ──push──▶ Clean
//!                    │
//!                    └─rejected / ambiguous──▶ ConflictPending ──pull──▶ Dirty ──push──▶ Clean
//! ```
//!
//! The reconciler compares plaintext metadata only and never holds keys.
//! Conflicts resolve by data version; on a tie with different content the
//! server's row wins. Losing rows go to the history ledger.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use keyledger_core::{
    AccountId, DeviceId, EncryptedRecord, EncryptionUnit, RecordId, SyncPhase, SyncState,
};
use keyledger_store::{InsertResult, Store, StoreExt};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};
use crate::ledger::Ledger;
use crate::messages::{limits, PullRequest, PushOutcome, PushRequest, PROTOCOL_VERSION};

/// Configuration for sync behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Pushes attempted per unit per cycle, counting the first.
    pub max_push_attempts: u32,
    /// Records per push request.
    pub max_records_per_push: usize,
    /// Timeout for a single ledger request.
    #[serde(with = "duration_millis")]
    pub request_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_push_attempts: 2,
            max_records_per_push: limits::MAX_RECORDS_PER_PUSH,
            request_timeout: Duration::from_secs(30),
        }
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

/// What one sync cycle did to one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitOutcome {
    pub unit: EncryptionUnit,
    /// Remote rows applied locally.
    pub pulled: usize,
    /// Local rows accepted by the server.
    pub pushed: usize,
    /// Pushes attempted (including rejected ones).
    pub push_attempts: u32,
    /// Rows where both sides changed; the loser went to history.
    pub conflicts: usize,
    /// A push outcome was unknown; the next cycle re-pulls first.
    pub ambiguous: bool,
    /// Phase the unit ended in.
    pub phase: SyncPhase,
}

impl UnitOutcome {
    fn new(unit: EncryptionUnit) -> Self {
        Self {
            unit,
            pulled: 0,
            pushed: 0,
            push_attempts: 0,
            conflicts: 0,
            ambiguous: false,
            phase: SyncPhase::Clean,
        }
    }
}

/// Result of syncing every unit.
#[derive(Debug, Default)]
pub struct SyncReport {
    /// Units that completed a cycle.
    pub units: Vec<UnitOutcome>,
    /// Units whose cycle failed, with the error.
    pub failed: Vec<(EncryptionUnit, String)>,
    /// Cancellation stopped the walk early.
    pub cancelled: bool,
}

impl SyncReport {
    /// Units left in `ConflictPending`.
    pub fn conflict_pending(&self) -> Vec<EncryptionUnit> {
        self.units
            .iter()
            .filter(|u| u.phase == SyncPhase::ConflictPending)
            .map(|u| u.unit)
            .collect()
    }

    /// Every unit completed and ended clean.
    pub fn is_clean(&self) -> bool {
        !self.cancelled
            && self.failed.is_empty()
            && self.units.iter().all(|u| u.phase == SyncPhase::Clean)
    }
}

/// How a remote row was merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Merge {
    /// New or newer remote row adopted.
    Applied,
    /// Remote row equals the local one.
    Unchanged,
    /// Local row is newer; the remote row was archived.
    LocalWins,
    /// Both sides changed the same version; the server's row was adopted
    /// and the local row archived.
    ServerWins,
}

/// Handle to cancel a running [`SyncReconciler::sync_all`].
#[derive(Debug, Clone)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    /// Stop the walk before the next unit.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Reconciles one device's store with the ledger.
pub struct SyncReconciler<S: Store, L: Ledger> {
    store: S,
    ledger: L,
    account_id: AccountId,
    device_id: DeviceId,
    config: SyncConfig,
    cancelled: Arc<AtomicBool>,
}

impl<S: Store, L: Ledger> SyncReconciler<S, L> {
    /// Create a new reconciler.
    pub fn new(
        store: S,
        ledger: L,
        account_id: AccountId,
        device_id: DeviceId,
        config: SyncConfig,
    ) -> Self {
        Self {
            store,
            ledger,
            account_id,
            device_id,
            config,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn account_id(&self) -> &AccountId {
        &self.account_id
    }

    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(Arc::clone(&self.cancelled))
    }

    /// Run one sync cycle for every unit known locally or on the ledger.
    ///
    /// Cancellation is checked between units. A failing unit does not stop
    /// the others; its error is reported.
    pub async fn sync_all(&self) -> Result<SyncReport> {
        let mut units: BTreeSet<EncryptionUnit> = self
            .store
            .list_sync_states()
            .await?
            .into_iter()
            .map(|s| s.unit)
            .collect();
        match self.with_timeout(self.ledger.units(&self.account_id)).await {
            Ok(remote) => units.extend(remote),
            Err(e) => {
                tracing::warn!(error = %e, "could not list ledger units; syncing local units only")
            }
        }

        let mut report = SyncReport::default();
        for unit in units {
            if self.cancelled.swap(false, Ordering::SeqCst) {
                tracing::debug!(done = report.units.len(), "sync cancelled");
                report.cancelled = true;
                break;
            }
            match self.sync_unit(&unit).await {
                Ok(outcome) => report.units.push(outcome),
                Err(e) => {
                    tracing::warn!(%unit, error = %e, "unit sync failed");
                    report.failed.push((unit, e.to_string()));
                }
            }
        }

        tracing::info!(
            units = report.units.len(),
            failed = report.failed.len(),
            conflict_pending = report.conflict_pending().len(),
            "sync cycle complete"
        );
        Ok(report)
    }

    /// Run one sync cycle for `unit`.
    ///
    /// Pulls first when the unit is clean or conflict-pending, pushes when
    /// dirty, and on rejection pulls and retries up to
    /// [`SyncConfig::max_push_attempts`] pushes. Conflicts that remain leave
    /// the unit `ConflictPending` and are reported, not raised.
    pub async fn sync_unit(&self, unit: &EncryptionUnit) -> Result<UnitOutcome> {
        let mut state = self.store.sync_state_or_new(unit).await?;
        let mut outcome = UnitOutcome::new(*unit);

        if state.conflict_pending || !state.dirty {
            self.pull_into(&mut state, &mut outcome).await?;
        }

        while state.dirty {
            if outcome.push_attempts >= self.config.max_push_attempts {
                state.record_conflict();
                self.store.upsert_sync_state(&state).await?;
                tracing::warn!(
                    %unit,
                    attempts = outcome.push_attempts,
                    "push attempts exhausted; conflict pending"
                );
                break;
            }
            outcome.push_attempts += 1;

            match self.push_from(&mut state, &mut outcome).await {
                Ok(()) => {}
                Err(SyncError::VersionConflict { actual, .. }) => {
                    tracing::debug!(%unit, server_version = actual, "push rejected; pulling");
                    state.record_conflict();
                    self.store.upsert_sync_state(&state).await?;
                    self.pull_into(&mut state, &mut outcome).await?;
                }
                Err(SyncError::Ambiguous(_)) => {
                    tracing::warn!(%unit, "push outcome unknown; next cycle pulls first");
                    state.record_conflict();
                    self.store.upsert_sync_state(&state).await?;
                    outcome.ambiguous = true;
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        outcome.phase = state.phase();
        Ok(outcome)
    }

    /// Pull every row of `unit` changed since the cursor and merge it.
    pub async fn pull_unit(&self, unit: &EncryptionUnit) -> Result<UnitOutcome> {
        let mut state = self.store.sync_state_or_new(unit).await?;
        let mut outcome = UnitOutcome::new(*unit);
        self.pull_into(&mut state, &mut outcome).await?;
        outcome.phase = state.phase();
        Ok(outcome)
    }

    /// Push the pending rows of `unit` once.
    ///
    /// Returns [`SyncError::VersionConflict`] on a stale baseline and
    /// [`SyncError::Ambiguous`] when the outcome is unknown.
    pub async fn push_unit(&self, unit: &EncryptionUnit) -> Result<UnitOutcome> {
        let mut state = self.store.sync_state_or_new(unit).await?;
        let mut outcome = UnitOutcome::new(*unit);
        outcome.push_attempts = 1;
        let result = self.push_from(&mut state, &mut outcome).await;
        if matches!(
            result,
            Err(SyncError::VersionConflict { .. }) | Err(SyncError::Ambiguous(_))
        ) {
            state.record_conflict();
            self.store.upsert_sync_state(&state).await?;
        }
        result?;
        outcome.phase = state.phase();
        Ok(outcome)
    }

    async fn push_from(&self, state: &mut SyncState, outcome: &mut UnitOutcome) -> Result<()> {
        let unit = state.unit;
        let pending = self.store.pending_records(&unit).await?;
        if pending.is_empty() {
            state.dirty = false;
            self.store.upsert_sync_state(state).await?;
            return Ok(());
        }

        let batch = self
            .config
            .max_records_per_push
            .clamp(1, limits::MAX_RECORDS_PER_PUSH);
        for chunk in pending.chunks(batch) {
            let request = PushRequest {
                protocol_version: PROTOCOL_VERSION,
                account_id: self.account_id.clone(),
                device_id: self.device_id,
                unit,
                base_version: state.server_version,
                local_version: state.local_version,
                records: chunk.to_vec(),
            };

            let timeout = self.config.request_timeout;
            let response = match tokio::time::timeout(timeout, self.ledger.push(request)).await {
                Ok(r) => r,
                // The request may have landed.
                Err(_) => Err(SyncError::Ambiguous(unit)),
            };

            match response? {
                PushOutcome::Accepted { server_version, as_of } => {
                    let accepted: Vec<(RecordId, u64)> =
                        chunk.iter().map(|r| (r.record_id, r.data_version)).collect();
                    self.store.clear_pending(&accepted).await?;
                    let still_pending = !self.store.pending_records(&unit).await?.is_empty();
                    state.record_push_accepted(server_version, as_of, still_pending);
                    self.store.upsert_sync_state(state).await?;
                    outcome.pushed += chunk.len();
                    tracing::debug!(%unit, server_version, rows = chunk.len(), "push accepted");
                }
                PushOutcome::Rejected { server_version } => {
                    return Err(SyncError::VersionConflict {
                        unit,
                        expected: state.server_version,
                        actual: server_version,
                    });
                }
            }
        }
        Ok(())
    }

    async fn pull_into(&self, state: &mut SyncState, outcome: &mut UnitOutcome) -> Result<()> {
        let unit = state.unit;
        let mut pending: HashMap<RecordId, u64> = self
            .store
            .pending_records(&unit)
            .await?
            .into_iter()
            .map(|r| (r.record_id, r.data_version))
            .collect();
        let mut since = state.last_synced_at;

        loop {
            let request = PullRequest {
                protocol_version: PROTOCOL_VERSION,
                account_id: self.account_id.clone(),
                device_id: self.device_id,
                unit,
                since,
            };
            let response = self.with_timeout(self.ledger.pull(request)).await?;
            if response.unit != unit {
                return Err(SyncError::InvalidMessage(format!(
                    "pulled {} while asking for {unit}",
                    response.unit
                )));
            }

            for remote in &response.records {
                if remote.unit != unit || remote.account_id != self.account_id {
                    return Err(SyncError::InvalidMessage(format!(
                        "row {} does not belong to {}/{unit}",
                        remote.record_id, self.account_id
                    )));
                }
                match self.merge(remote, &mut pending).await? {
                    Merge::Applied => outcome.pulled += 1,
                    Merge::Unchanged => {}
                    Merge::LocalWins => outcome.conflicts += 1,
                    Merge::ServerWins => {
                        outcome.pulled += 1;
                        outcome.conflicts += 1;
                    }
                }
            }

            if response.has_more {
                since = Some(response.as_of);
                continue;
            }

            state.record_pull(response.server_version, response.as_of, !pending.is_empty());
            self.store.upsert_sync_state(state).await?;
            tracing::debug!(%unit, server_version = response.server_version, "pull applied");
            return Ok(());
        }
    }

    /// Merge one remote row into the store.
    ///
    /// `pending` maps locally pending record ids to their data version and
    /// is kept current as rows are resolved.
    async fn merge(
        &self,
        remote: &EncryptedRecord,
        pending: &mut HashMap<RecordId, u64>,
    ) -> Result<Merge> {
        let Some(local) = self.store.get_record(&remote.record_id).await? else {
            self.store.put_record(remote, false).await?;
            return Ok(Merge::Applied);
        };
        let local_pending = pending.get(&local.record_id) == Some(&local.data_version);

        if remote.data_version == local.data_version && remote.same_content(&local) {
            // Our own row, e.g. after an ambiguous push that landed.
            if local_pending {
                self.store.clear_pending(&[(local.record_id, local.data_version)]).await?;
                pending.remove(&local.record_id);
            }
            return Ok(Merge::Unchanged);
        }

        if remote.data_version > local.data_version {
            self.store.supersede(remote, false).await?;
            if local_pending {
                pending.remove(&local.record_id);
                tracing::warn!(
                    record = %local.record_id,
                    local_version = local.data_version,
                    remote_version = remote.data_version,
                    "local edit superseded by newer server row; kept in history"
                );
                return Ok(Merge::ServerWins);
            }
            return Ok(Merge::Applied);
        }

        if remote.data_version < local.data_version {
            // An older row we already archived is not news.
            let archived = self.store.append_history(remote).await?;
            return Ok(if local_pending && archived == InsertResult::Inserted {
                Merge::LocalWins
            } else {
                Merge::Unchanged
            });
        }

        // Same version, different content: the server-accepted row wins.
        self.store.supersede(remote, false).await?;
        pending.remove(&local.record_id);
        tracing::warn!(
            record = %local.record_id,
            version = local.data_version,
            "concurrent edit at same version; server row wins, local row kept in history"
        );
        Ok(Merge::ServerWins)
    }

    async fn with_timeout<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.config.request_timeout, fut)
            .await
            .map_err(|_| SyncError::Transport("ledger request timed out".into()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::memory::MemoryLedger;
    use bytes::Bytes;
    use keyledger_core::Envelope;
    use keyledger_store::MemoryStore;

    type Device = SyncReconciler<MemoryStore, Arc<MemoryLedger>>;

    fn unit() -> EncryptionUnit {
        "presence/2025-Q1".parse().unwrap()
    }

    fn rid(n: u16) -> RecordId {
        let mut bytes = [0u8; 16];
        bytes[..2].copy_from_slice(&n.to_be_bytes());
        RecordId::from_bytes(bytes)
    }

    fn device(ledger: &Arc<MemoryLedger>, n: u8, config: SyncConfig) -> Device {
        SyncReconciler::new(
            MemoryStore::new(),
            Arc::clone(ledger),
            AccountId::new("acct"),
            DeviceId::from_bytes([n; 16]),
            config,
        )
    }

    /// What the vault does on a write: new version, pending, dirty.
    async fn write(device: &Device, id: RecordId, fill: u8) -> EncryptedRecord {
        let store = device.store();
        let envelope = Envelope {
            algorithm: 2,
            nonce: Bytes::from(vec![fill; 24]),
            ciphertext: Bytes::from(vec![fill; 20]),
        };
        let record = match store.get_record(&id).await.unwrap() {
            Some(prev) => prev.supersede(None, envelope, 2_000),
            None => EncryptedRecord::new(id, AccountId::new("acct"), unit(), None, envelope, 1_000),
        };
        store.supersede(&record, true).await.unwrap();
        let mut state = store.sync_state_or_new(&unit()).await.unwrap();
        state.record_local_write();
        store.upsert_sync_state(&state).await.unwrap();
        record
    }

    async fn state(device: &Device) -> SyncState {
        device.store().sync_state_or_new(&unit()).await.unwrap()
    }

    #[tokio::test]
    async fn test_push_then_pull_on_other_device() {
        let ledger = MemoryLedger::shared();
        let a = device(&ledger, 1, SyncConfig::default());
        let b = device(&ledger, 2, SyncConfig::default());

        let written = write(&a, rid(1), 0xa1).await;
        let outcome = a.sync_unit(&unit()).await.unwrap();
        assert_eq!(outcome.pushed, 1);
        assert_eq!(outcome.phase, SyncPhase::Clean);
        assert!(a.store().pending_records(&unit()).await.unwrap().is_empty());

        let outcome = b.sync_unit(&unit()).await.unwrap();
        assert_eq!(outcome.pulled, 1);
        assert_eq!(b.store().get_record(&rid(1)).await.unwrap(), Some(written));
        assert_eq!(state(&b).await.server_version, 1);
    }

    #[tokio::test]
    async fn test_stale_push_pulls_and_retries() {
        let ledger = MemoryLedger::shared();
        let a = device(&ledger, 1, SyncConfig::default());
        let b = device(&ledger, 2, SyncConfig::default());

        write(&a, rid(1), 1).await;
        a.sync_unit(&unit()).await.unwrap();

        write(&b, rid(2), 2).await;
        let outcome = b.sync_unit(&unit()).await.unwrap();
        assert_eq!(outcome.push_attempts, 2);
        assert_eq!(outcome.pulled, 1);
        assert_eq!(outcome.pushed, 1);
        assert_eq!(outcome.phase, SyncPhase::Clean);

        assert_eq!(ledger.rows(&AccountId::new("acct"), &unit()).await.unwrap().len(), 2);
        assert_eq!(state(&b).await.server_version, 2);
    }

    #[tokio::test]
    async fn test_push_unit_reports_version_conflict() {
        let ledger = MemoryLedger::shared();
        let a = device(&ledger, 1, SyncConfig::default());
        let b = device(&ledger, 2, SyncConfig::default());

        write(&a, rid(1), 1).await;
        a.sync_unit(&unit()).await.unwrap();
        write(&b, rid(2), 2).await;

        let err = b.push_unit(&unit()).await.unwrap_err();
        assert!(matches!(
            err,
            SyncError::VersionConflict { expected: 0, actual: 1, .. }
        ));
        assert!(state(&b).await.conflict_pending);
        // Nothing from the rejected push was applied.
        assert_eq!(ledger.rows(&AccountId::new("acct"), &unit()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_ambiguous_push_repulls_next_cycle() {
        let ledger = MemoryLedger::shared();
        let a = device(&ledger, 1, SyncConfig::default());

        write(&a, rid(1), 1).await;
        ledger.fail_next_push_after_commit().await;
        let outcome = a.sync_unit(&unit()).await.unwrap();
        assert!(outcome.ambiguous);
        assert_eq!(outcome.push_attempts, 1);
        assert_eq!(outcome.phase, SyncPhase::ConflictPending);

        // The push landed; the next cycle learns that by pulling, then has
        // nothing left to push.
        let outcome = a.sync_unit(&unit()).await.unwrap();
        assert_eq!(outcome.push_attempts, 0);
        assert_eq!(outcome.phase, SyncPhase::Clean);
        assert_eq!(state(&a).await.server_version, 1);
        assert!(a.store().pending_records(&unit()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_equal_version_conflict_server_wins_loser_in_history() {
        let ledger = MemoryLedger::shared();
        let a = device(&ledger, 1, SyncConfig::default());
        let b = device(&ledger, 2, SyncConfig::default());

        write(&a, rid(1), 1).await;
        a.sync_unit(&unit()).await.unwrap();
        b.sync_unit(&unit()).await.unwrap();

        let a_v2 = write(&a, rid(1), 0xaa).await;
        a.sync_unit(&unit()).await.unwrap();
        let b_v2 = write(&b, rid(1), 0xbb).await;
        assert_eq!(a_v2.data_version, b_v2.data_version);

        let outcome = b.sync_unit(&unit()).await.unwrap();
        assert_eq!(outcome.conflicts, 1);
        assert_eq!(outcome.phase, SyncPhase::Clean);

        let current = b.store().get_record(&rid(1)).await.unwrap().unwrap();
        assert!(current.same_content(&a_v2));
        let history = b.store().history(&rid(1)).await.unwrap();
        assert!(history.iter().any(|r| r.same_content(&b_v2)));
    }

    #[tokio::test]
    async fn test_higher_local_version_wins() {
        let ledger = MemoryLedger::shared();
        let a = device(&ledger, 1, SyncConfig::default());
        let b = device(&ledger, 2, SyncConfig::default());

        write(&a, rid(1), 1).await;
        a.sync_unit(&unit()).await.unwrap();
        b.sync_unit(&unit()).await.unwrap();

        write(&b, rid(1), 0xb2).await;
        let b_v3 = write(&b, rid(1), 0xb3).await;
        let a_v2 = write(&a, rid(1), 0xa2).await;
        a.sync_unit(&unit()).await.unwrap();

        let outcome = b.sync_unit(&unit()).await.unwrap();
        assert_eq!(outcome.phase, SyncPhase::Clean);
        assert_eq!(outcome.conflicts, 1);

        let rows = ledger.rows(&AccountId::new("acct"), &unit()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].data_version, 3);
        assert!(rows[0].same_content(&b_v3));
        let history = b.store().history(&rid(1)).await.unwrap();
        assert!(history.iter().any(|r| r.same_content(&a_v2)));
    }

    #[tokio::test]
    async fn test_push_attempts_exhausted_leaves_conflict_pending() {
        let ledger = MemoryLedger::shared();
        let a = device(&ledger, 1, SyncConfig::default());
        let config = SyncConfig {
            max_push_attempts: 1,
            ..SyncConfig::default()
        };
        let b = device(&ledger, 2, config);

        write(&a, rid(1), 1).await;
        a.sync_unit(&unit()).await.unwrap();
        write(&b, rid(2), 2).await;

        let outcome = b.sync_unit(&unit()).await.unwrap();
        assert_eq!(outcome.push_attempts, 1);
        assert_eq!(outcome.phase, SyncPhase::ConflictPending);

        // Next cycle pulls first and then pushes successfully.
        let outcome = b.sync_unit(&unit()).await.unwrap();
        assert_eq!(outcome.phase, SyncPhase::Clean);
    }

    #[tokio::test]
    async fn test_transport_failure_is_reported_per_unit() {
        let ledger = MemoryLedger::shared();
        let a = device(&ledger, 1, SyncConfig::default());
        write(&a, rid(1), 1).await;

        ledger.fail_next_push().await;
        let report = a.sync_all().await.unwrap();
        assert_eq!(report.failed.len(), 1);
        assert!(!report.is_clean());
        assert!(state(&a).await.dirty);

        let report = a.sync_all().await.unwrap();
        assert!(report.is_clean());
    }

    #[tokio::test]
    async fn test_fresh_device_discovers_units() {
        let ledger = MemoryLedger::shared();
        let a = device(&ledger, 1, SyncConfig::default());
        write(&a, rid(1), 1).await;
        a.sync_all().await.unwrap();

        let fresh = device(&ledger, 9, SyncConfig::default());
        let report = fresh.sync_all().await.unwrap();
        assert_eq!(report.units.len(), 1);
        assert!(fresh.store().get_record(&rid(1)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_cancel_stops_between_units() {
        let ledger = MemoryLedger::shared();
        let a = device(&ledger, 1, SyncConfig::default());
        write(&a, rid(1), 1).await;

        a.cancel_handle().cancel();
        let report = a.sync_all().await.unwrap();
        assert!(report.cancelled);
        assert!(report.units.is_empty());

        // The flag is consumed; the next walk runs.
        let report = a.sync_all().await.unwrap();
        assert_eq!(report.units.len(), 1);
    }

    #[tokio::test]
    async fn test_large_unit_pulls_in_pages() {
        let ledger = MemoryLedger::shared();
        let a = device(&ledger, 1, SyncConfig::default());
        let total = limits::MAX_RECORDS_PER_PULL as u16 + 100;
        for n in 0..total {
            write(&a, rid(n), n as u8).await;
        }
        let outcome = a.sync_unit(&unit()).await.unwrap();
        assert_eq!(outcome.pushed, total as usize);

        let b = device(&ledger, 2, SyncConfig::default());
        let outcome = b.sync_unit(&unit()).await.unwrap();
        assert_eq!(outcome.pulled, total as usize);
        assert_eq!(state(&b).await.server_version, state(&a).await.server_version);
    }
}
