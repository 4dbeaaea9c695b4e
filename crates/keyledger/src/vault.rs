//! The Vault: the device-side API.
//!
//! A vault ties an unlocked [`Session`] to a local store, a ledger, the
//! record codec, and the account's grants. Producers hand it opaque
//! payloads; everything it persists or sends is ciphertext.
//!
//! Grants live in three places: the in-memory registry, the device store,
//! and the ledger. New grants reach the ledger before the store, so a
//! refused grant never survives. Tombstones reach the store first, so a
//! revocation made offline is published by the next [`Vault::sync_grants`].

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use keyledger_core::{
    now_millis, CoarseDate, DeviceId, EncryptedRecord, EncryptionUnit, PeriodLabel,
    RecordCodec, RecordId, Session, UnitKey,
};
use keyledger_grants::{
    AnonymousCredential, Grant, GrantId, GrantLifecycleManager, GrantRequest, Recipient,
    RecipientPublicKey, Renewal,
};
use keyledger_store::{Store, StoreExt};
use keyledger_sync::{
    limits, verify_convergence, CancelHandle, ConvergenceResult, Ledger, SyncReconciler,
    SyncReport, UnitOutcome,
};

use crate::config::VaultConfig;
use crate::error::{Result, VaultError};

/// A decrypted record handed back to the payload consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptedRecord {
    pub record_id: RecordId,
    pub unit: EncryptionUnit,
    pub record_date: Option<CoarseDate>,
    pub data_version: u64,
    pub created_at: i64,
    pub updated_at: i64,
    pub payload: Vec<u8>,
}

/// Decrypt one row, logging authentication failures as integrity alarms.
pub(crate) fn open_record(
    codec: &RecordCodec,
    key: &UnitKey,
    record: &EncryptedRecord,
) -> Result<DecryptedRecord> {
    let payload = codec.decrypt(key, &record.envelope).map_err(|e| {
        if e.is_integrity_failure() {
            tracing::error!(
                record = %record.record_id,
                unit = %record.unit,
                version = record.data_version,
                "record failed authentication"
            );
        }
        e
    })?;
    Ok(DecryptedRecord {
        record_id: record.record_id,
        unit: record.unit,
        record_date: record.record_date,
        data_version: record.data_version,
        created_at: record.created_at,
        updated_at: record.updated_at,
        payload,
    })
}

/// One account on one device.
pub struct Vault<S: Store, L: Ledger> {
    session: Session,
    codec: RecordCodec,
    reconciler: SyncReconciler<S, L>,
    grants: Mutex<GrantLifecycleManager>,
    config: VaultConfig,
}

impl<S: Store, L: Ledger> Vault<S, L> {
    /// Open a vault for the session's account.
    ///
    /// Loads the grants kept in `store`, then adopts those the ledger
    /// holds. An unreachable ledger is logged and the stored grants used.
    pub async fn new(
        session: Session,
        device_id: DeviceId,
        store: S,
        ledger: L,
        config: VaultConfig,
    ) -> Result<Self> {
        config.validate()?;
        let account_id = session.account_id().clone();
        let stored = store.list_grants().await?;
        let vault = Self {
            codec: config.codec(),
            reconciler: SyncReconciler::new(
                store,
                ledger,
                account_id.clone(),
                device_id,
                config.sync.clone(),
            ),
            grants: Mutex::new(GrantLifecycleManager::restore(account_id, stored)),
            session,
            config,
        };

        match vault.sync_grants().await {
            Ok(_) => {}
            Err(e) if e.is_transient() => {
                tracing::warn!(error = %e, "ledger unreachable; using stored grants");
            }
            Err(e) => return Err(e),
        }
        Ok(vault)
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn store(&self) -> &S {
        self.reconciler.store()
    }

    pub fn ledger(&self) -> &L {
        self.reconciler.ledger()
    }

    pub fn device_id(&self) -> DeviceId {
        self.reconciler.device_id()
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    /// Scrub the root secret. Reads, writes and grants fail until a new
    /// vault is opened; sync keeps working on ciphertext.
    pub fn lock(&self) {
        self.session.lock();
    }

    pub fn is_locked(&self) -> bool {
        self.session.is_locked()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Records
    // ─────────────────────────────────────────────────────────────────────────

    /// Encrypt and store a payload.
    ///
    /// With `record_id` naming an existing record, writes its next version
    /// and archives the current one. Otherwise creates a record (with a
    /// fresh id if none is given). The unit becomes dirty.
    ///
    /// A payload whose ciphertext would exceed the ledger's per-record
    /// limit is refused here; the ledger could never accept it.
    pub async fn write_record(
        &self,
        unit: EncryptionUnit,
        record_id: Option<RecordId>,
        record_date: Option<CoarseDate>,
        payload: &[u8],
    ) -> Result<EncryptedRecord> {
        let sealed = RecordCodec::ciphertext_len(payload.len());
        if sealed > limits::MAX_RECORD_BYTES {
            return Err(VaultError::InvalidOperation(format!(
                "payload of {} bytes seals to {sealed}, over the {} byte record limit",
                payload.len(),
                limits::MAX_RECORD_BYTES
            )));
        }
        if let (Some(period), Some(date)) = (unit.period(), record_date) {
            if !period.contains(&date) {
                return Err(VaultError::InvalidOperation(format!(
                    "record date {date} lies outside {unit}"
                )));
            }
        }

        let previous = match record_id {
            Some(id) => self.store().get_record(&id).await?,
            None => None,
        };
        if let Some(prev) = &previous {
            if prev.unit != unit {
                return Err(VaultError::InvalidOperation(format!(
                    "record {} belongs to {}, not {unit}",
                    prev.record_id, prev.unit
                )));
            }
        }

        let key = self.session.unit_key(&unit)?;
        let used = self.store().count_encryptions(&unit).await?;
        let envelope = self.codec.encrypt(&key, payload, used)?;

        let now = now_millis();
        let record = match &previous {
            Some(prev) => prev.supersede(record_date, envelope, now),
            None => EncryptedRecord::new(
                record_id.unwrap_or_else(RecordId::generate),
                self.session.account_id().clone(),
                unit,
                record_date,
                envelope,
                now,
            ),
        };
        self.store().supersede(&record, true).await?;

        let mut state = self.store().sync_state_or_new(&unit).await?;
        state.record_local_write();
        self.store().upsert_sync_state(&state).await?;

        tracing::debug!(
            record = %record.record_id,
            %unit,
            version = record.data_version,
            "record written"
        );
        Ok(record)
    }

    /// Decrypt the current version of a record.
    pub async fn read_record(&self, id: &RecordId) -> Result<DecryptedRecord> {
        let record = self
            .store()
            .get_record(id)
            .await?
            .ok_or(VaultError::RecordNotFound(*id))?;
        self.decrypt_record(&record)
    }

    /// Every archived version of a record, as ciphertext.
    pub async fn history(&self, id: &RecordId) -> Result<Vec<EncryptedRecord>> {
        Ok(self.store().history(id).await?)
    }

    /// Decrypt a specific version, current or archived.
    pub async fn read_version(&self, id: &RecordId, data_version: u64) -> Result<DecryptedRecord> {
        if let Some(current) = self.store().get_record(id).await? {
            if current.data_version == data_version {
                return self.decrypt_record(&current);
            }
        }
        let archived = self
            .store()
            .history(id)
            .await?
            .into_iter()
            .find(|r| r.data_version == data_version)
            .ok_or(VaultError::VersionNotFound {
                record_id: *id,
                data_version,
            })?;
        self.decrypt_record(&archived)
    }

    /// Decrypt every current record of a unit.
    pub async fn read_unit(&self, unit: &EncryptionUnit) -> Result<Vec<DecryptedRecord>> {
        let key = self.session.unit_key(unit)?;
        self.store()
            .records_in_unit(unit)
            .await?
            .iter()
            .map(|r| open_record(&self.codec, &key, r))
            .collect()
    }

    /// Decrypt any row of this account, e.g. one returned by [`Self::history`].
    pub fn decrypt_record(&self, record: &EncryptedRecord) -> Result<DecryptedRecord> {
        let key = self.session.unit_key(&record.unit)?;
        open_record(&self.codec, &key, record)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Sync
    // ─────────────────────────────────────────────────────────────────────────

    /// Run one sync cycle over every known unit, then reconcile grants.
    pub async fn sync(&self) -> Result<SyncReport> {
        let report = self.reconciler.sync_all().await?;
        self.sync_grants().await?;
        Ok(report)
    }

    /// Run one sync cycle for a single unit.
    pub async fn sync_unit(&self, unit: &EncryptionUnit) -> Result<UnitOutcome> {
        Ok(self.reconciler.sync_unit(unit).await?)
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.reconciler.cancel_handle()
    }

    /// Compare this device's rows of `unit` with the ledger's.
    pub async fn verify_convergence(&self, unit: &EncryptionUnit) -> Result<ConvergenceResult> {
        Ok(verify_convergence(
            self.store(),
            self.ledger(),
            self.session.account_id(),
            unit,
        )
        .await?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Grants
    // ─────────────────────────────────────────────────────────────────────────

    /// Delegate read access over one unit.
    ///
    /// The grant is published to the ledger before this returns. A
    /// recipient already holding an active grant on the unit, here or on
    /// another device, is a conflict.
    pub async fn grant(&self, request: GrantRequest) -> Result<Grant> {
        self.sync_grants().await?;
        let grant = self.grants().issue(&self.session, request, now_millis())?;
        self.commit_grants(vec![grant.clone()]).await?;
        Ok(grant)
    }

    /// Delegate read access to a fresh anonymous token holder.
    pub async fn grant_anonymous(
        &self,
        unit: EncryptionUnit,
        start_offset: Option<CoarseDate>,
        expires_at: Option<i64>,
    ) -> Result<(Grant, AnonymousCredential)> {
        self.sync_grants().await?;
        let (grant, credential) = self.grants().issue_anonymous(
            &self.session,
            unit,
            start_offset,
            expires_at,
            now_millis(),
        )?;
        self.commit_grants(vec![grant.clone()]).await?;
        Ok((grant, credential))
    }

    /// Issue a rolling window ending at `latest`.
    ///
    /// `window_length` defaults to the configured length.
    pub async fn grant_rolling_window(
        &self,
        recipient: Recipient,
        recipient_key: RecipientPublicKey,
        latest: EncryptionUnit,
        window_length: Option<u32>,
    ) -> Result<Vec<Grant>> {
        let window = window_length.unwrap_or(self.config.default_window_length);
        self.sync_grants().await?;
        let grants = self.grants().issue_rolling_window(
            &self.session,
            recipient,
            recipient_key,
            latest,
            window,
            now_millis(),
        )?;
        self.commit_grants(grants.clone()).await?;
        Ok(grants)
    }

    pub async fn renew_grant(&self, id: &GrantId) -> Result<Renewal> {
        self.sync_grants().await?;
        let renewal = self.grants().renew(&self.session, id, now_millis())?;
        let changed = self.renewal_changes(std::slice::from_ref(&renewal));
        self.commit_grants(changed).await?;
        Ok(renewal)
    }

    /// Bring every rolling window up to `current`.
    pub async fn roll_forward(&self, current: PeriodLabel) -> Result<Vec<Renewal>> {
        self.sync_grants().await?;
        let renewals = self.grants().roll_forward(&self.session, current, now_millis())?;
        let changed = self.renewal_changes(&renewals);
        self.commit_grants(changed).await?;
        Ok(renewals)
    }

    /// Tombstone a grant.
    ///
    /// The tombstone is stored before it is published. If publishing
    /// fails the revocation still stands locally and the next
    /// [`Self::sync_grants`] delivers it.
    pub async fn revoke_grant(&self, id: &GrantId) -> Result<Grant> {
        if self.get_grant(id).is_none() {
            self.sync_grants().await?;
        }
        let grant = self.grants().revoke(id, now_millis())?;
        self.store().put_grant(&grant).await?;
        self.ledger()
            .publish_grants(std::slice::from_ref(&grant))
            .await?;
        Ok(grant)
    }

    pub fn get_grant(&self, id: &GrantId) -> Option<Grant> {
        self.grants().get(id).cloned()
    }

    /// Every grant of the account, tombstones included, oldest first.
    pub fn list_grants(&self) -> Vec<Grant> {
        let grants = self.grants();
        grants
            .registry()
            .for_account(grants.account_id())
            .into_iter()
            .cloned()
            .collect()
    }

    /// Reconcile this device's grants with the ledger's.
    ///
    /// Adopts grants and tombstones made on other devices, then publishes
    /// local tombstones the ledger has not seen. Returns the number of
    /// grants that changed on either side.
    pub async fn sync_grants(&self) -> Result<usize> {
        let remote = self.ledger().grants(self.session.account_id()).await?;
        let remote_tombstoned: HashMap<GrantId, bool> =
            remote.iter().map(|g| (g.id, g.is_tombstoned())).collect();

        let mut adopted = Vec::new();
        {
            let mut grants = self.grants();
            for grant in remote {
                let id = grant.id;
                if grants.merge(grant) {
                    adopted.extend(grants.get(&id).cloned());
                }
            }
        }
        for grant in &adopted {
            self.store().put_grant(grant).await?;
        }

        let unpublished: Vec<Grant> = self
            .list_grants()
            .into_iter()
            .filter(|g| g.is_tombstoned() && remote_tombstoned.get(&g.id) != Some(&true))
            .collect();
        if !unpublished.is_empty() {
            self.ledger().publish_grants(&unpublished).await?;
        }

        let changed = adopted.len() + unpublished.len();
        if changed > 0 {
            tracing::info!(
                adopted = adopted.len(),
                published = unpublished.len(),
                "grants reconciled with ledger"
            );
        }
        Ok(changed)
    }

    /// Publish grants a lifecycle operation created or tombstoned, then
    /// store them.
    ///
    /// If the ledger refuses, the registry is rebuilt from the store and
    /// the refused grants are gone.
    async fn commit_grants(&self, changed: Vec<Grant>) -> Result<()> {
        if changed.is_empty() {
            return Ok(());
        }
        if let Err(e) = self.ledger().publish_grants(&changed).await {
            tracing::warn!(error = %e, grants = changed.len(), "grant publication failed");
            self.reload_grants().await?;
            return Err(e.into());
        }
        for grant in &changed {
            self.store().put_grant(grant).await?;
        }
        Ok(())
    }

    async fn reload_grants(&self) -> Result<()> {
        let stored = self.store().list_grants().await?;
        *self.grants() = GrantLifecycleManager::restore(self.session.account_id().clone(), stored);
        Ok(())
    }

    /// Current copies of the grants a set of renewals created or
    /// tombstoned, each once.
    fn renewal_changes(&self, renewals: &[Renewal]) -> Vec<Grant> {
        let mut ids: Vec<GrantId> = Vec::new();
        for renewal in renewals {
            let created = renewal.created.then_some(renewal.grant.id);
            for id in created.into_iter().chain(renewal.tombstoned.iter().copied()) {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
        }
        let grants = self.grants();
        ids.iter().filter_map(|id| grants.get(id).cloned()).collect()
    }

    fn grants(&self) -> MutexGuard<'_, GrantLifecycleManager> {
        // Lifecycle operations leave the registry consistent at each step.
        self.grants.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<S: Store, L: Ledger> std::fmt::Debug for Vault<S, L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vault")
            .field("account_id", self.session.account_id())
            .field("device_id", &self.device_id())
            .field("locked", &self.is_locked())
            .finish_non_exhaustive()
    }
}
