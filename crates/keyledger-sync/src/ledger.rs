//! The remote ledger: an untrusted server holding opaque ciphertext rows.
//!
//! The ledger sees plaintext metadata only. Its hard duties are the
//! atomic compare-and-increment on push and refusing a second active
//! grant for the same recipient and unit. It also holds the grants
//! advisors are served under, so a revocation on any device reaches it.

use std::sync::Arc;

use async_trait::async_trait;
use keyledger_core::{AccountId, EncryptedRecord, EncryptionUnit};
use keyledger_grants::{Grant, GrantId};

use crate::error::Result;
use crate::messages::{PullRequest, PullResponse, PushOutcome, PushRequest};

/// Ledger trait for pushing and pulling rows of one unit.
///
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Apply a batch iff its baseline matches the current version.
    async fn push(&self, request: PushRequest) -> Result<PushOutcome>;

    /// Rows of a unit updated after the request's cursor.
    async fn pull(&self, request: PullRequest) -> Result<PullResponse>;

    /// Current version of a unit (0 if never pushed).
    async fn server_version(&self, account: &AccountId, unit: &EncryptionUnit) -> Result<u64>;

    /// Units the account has rows in.
    async fn units(&self, account: &AccountId) -> Result<Vec<EncryptionUnit>>;

    /// Current rows of a unit, ordered by record id.
    async fn rows(&self, account: &AccountId, unit: &EncryptionUnit)
        -> Result<Vec<EncryptedRecord>>;

    /// Accept new grants and tombstones, all or nothing.
    ///
    /// A grant the ledger already holds only takes on a tombstone, and a
    /// held tombstone is never cleared. A new grant is refused with
    /// [`SyncError::GrantConflict`](crate::SyncError::GrantConflict) while
    /// another grant for the same (account, recipient, unit) is active.
    async fn publish_grants(&self, grants: &[Grant]) -> Result<()>;

    /// The ledger's copy of a grant.
    async fn grant(&self, account: &AccountId, id: &GrantId) -> Result<Option<Grant>>;

    /// Every grant of the account, ordered by creation time.
    async fn grants(&self, account: &AccountId) -> Result<Vec<Grant>>;
}

#[async_trait]
impl<L: Ledger + ?Sized> Ledger for Arc<L> {
    async fn push(&self, request: PushRequest) -> Result<PushOutcome> {
        (**self).push(request).await
    }

    async fn pull(&self, request: PullRequest) -> Result<PullResponse> {
        (**self).pull(request).await
    }

    async fn server_version(&self, account: &AccountId, unit: &EncryptionUnit) -> Result<u64> {
        (**self).server_version(account, unit).await
    }

    async fn units(&self, account: &AccountId) -> Result<Vec<EncryptionUnit>> {
        (**self).units(account).await
    }

    async fn rows(
        &self,
        account: &AccountId,
        unit: &EncryptionUnit,
    ) -> Result<Vec<EncryptedRecord>> {
        (**self).rows(account, unit).await
    }

    async fn publish_grants(&self, grants: &[Grant]) -> Result<()> {
        (**self).publish_grants(grants).await
    }

    async fn grant(&self, account: &AccountId, id: &GrantId) -> Result<Option<Grant>> {
        (**self).grant(account, id).await
    }

    async fn grants(&self, account: &AccountId) -> Result<Vec<Grant>> {
        (**self).grants(account).await
    }
}

/// An in-memory ledger for tests and local demos.
pub mod memory {
    use super::*;
    use std::collections::{BTreeMap, HashMap, HashSet};

    use keyledger_core::{now_millis, RecordId};
    use keyledger_grants::Recipient;
    use tokio::sync::Mutex;

    use crate::error::SyncError;
    use crate::messages::limits;

    /// Fault to inject into the next push.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Fault {
        /// Fail without applying anything.
        BeforeCommit,
        /// Apply the batch, then report an unknown outcome.
        AfterCommit,
    }

    struct StoredRow {
        record: EncryptedRecord,
        /// Server time the row was last written.
        stamp: i64,
    }

    #[derive(Default)]
    struct LedgerUnit {
        version: u64,
        rows: BTreeMap<RecordId, StoredRow>,
    }

    #[derive(Default)]
    struct Inner {
        units: HashMap<(AccountId, EncryptionUnit), LedgerUnit>,
        grants: HashMap<GrantId, Grant>,
        /// Last stamp handed out. Strictly increasing.
        clock: i64,
        fault: Option<Fault>,
        fail_next_publish: bool,
    }

    impl Inner {
        fn next_stamp(&mut self) -> i64 {
            self.clock = now_millis().max(self.clock + 1);
            self.clock
        }
    }

    /// Refuse the batch if a new grant would be a second active grant for
    /// its (account, recipient, unit). Tombstones in the batch count as
    /// already applied.
    fn check_new_grants(
        held: &HashMap<GrantId, Grant>,
        grants: &[Grant],
        now: i64,
    ) -> Result<()> {
        let closing: HashSet<GrantId> = grants
            .iter()
            .filter(|g| g.is_tombstoned())
            .map(|g| g.id)
            .collect();
        let mut claimed: HashMap<(&AccountId, &Recipient, EncryptionUnit), GrantId> = held
            .values()
            .filter(|g| g.is_active(now) && !closing.contains(&g.id))
            .map(|g| ((&g.account_id, &g.recipient, g.unit), g.id))
            .collect();

        for grant in grants {
            if grant.is_tombstoned() || held.contains_key(&grant.id) {
                continue;
            }
            let key = (&grant.account_id, &grant.recipient, grant.unit);
            match claimed.get(&key) {
                Some(&existing) if existing != grant.id => {
                    tracing::debug!(grant = %grant.id, %existing, "grant refused");
                    return Err(SyncError::GrantConflict {
                        grant: grant.id,
                        existing,
                    });
                }
                _ => {
                    claimed.insert(key, grant.id);
                }
            }
        }
        Ok(())
    }

    /// In-memory ledger implementation.
    ///
    /// A single lock covers every unit and grant, which makes each push
    /// and each grant batch atomic.
    #[derive(Default)]
    pub struct MemoryLedger {
        inner: Mutex<Inner>,
    }

    impl MemoryLedger {
        /// Create a new empty ledger.
        pub fn new() -> Self {
            Self::default()
        }

        /// Create a ledger shareable between devices.
        pub fn shared() -> Arc<Self> {
            Arc::new(Self::new())
        }

        /// The next push fails with a transport error and applies nothing.
        pub async fn fail_next_push(&self) {
            self.inner.lock().await.fault = Some(Fault::BeforeCommit);
        }

        /// The next push is applied but reports an ambiguous outcome.
        pub async fn fail_next_push_after_commit(&self) {
            self.inner.lock().await.fault = Some(Fault::AfterCommit);
        }

        /// The next grant publication fails and applies nothing.
        pub async fn fail_next_publish(&self) {
            self.inner.lock().await.fail_next_publish = true;
        }
    }

    #[async_trait]
    impl Ledger for MemoryLedger {
        async fn push(&self, request: PushRequest) -> Result<PushOutcome> {
            request.validate()?;
            let mut inner = self.inner.lock().await;

            let fault = inner.fault.take();
            if fault == Some(Fault::BeforeCommit) {
                return Err(SyncError::Transport("connection reset before commit".into()));
            }

            let key = (request.account_id.clone(), request.unit);
            let current = inner.units.get(&key).map_or(0, |u| u.version);
            if request.base_version != current {
                tracing::debug!(
                    unit = %request.unit,
                    base = request.base_version,
                    current,
                    "push rejected: stale baseline"
                );
                return Ok(PushOutcome::Rejected {
                    server_version: current,
                });
            }

            let stamp = inner.next_stamp();
            let unit = inner.units.entry(key).or_default();
            for record in request.records {
                let newer = unit
                    .rows
                    .get(&record.record_id)
                    .map_or(true, |row| record.data_version >= row.record.data_version);
                if newer {
                    unit.rows.insert(record.record_id, StoredRow { record, stamp });
                }
            }
            unit.version += 1;
            let server_version = unit.version;

            if fault == Some(Fault::AfterCommit) {
                return Err(SyncError::Ambiguous(request.unit));
            }
            Ok(PushOutcome::Accepted {
                server_version,
                as_of: stamp,
            })
        }

        async fn pull(&self, request: PullRequest) -> Result<PullResponse> {
            let inner = self.inner.lock().await;
            let since = request.since.unwrap_or(i64::MIN);
            let Some(unit) = inner.units.get(&(request.account_id, request.unit)) else {
                return Ok(PullResponse {
                    unit: request.unit,
                    server_version: 0,
                    records: Vec::new(),
                    as_of: inner.clock,
                    has_more: false,
                });
            };

            let mut rows: Vec<&StoredRow> = unit.rows.values().filter(|r| r.stamp > since).collect();
            rows.sort_by_key(|r| (r.stamp, r.record.record_id));

            // Pages end on a stamp boundary so the cursor never splits a batch.
            let mut take = rows.len().min(limits::MAX_RECORDS_PER_PULL);
            if take < rows.len() {
                let boundary = rows[take].stamp;
                while take > 0 && rows[take - 1].stamp == boundary {
                    take -= 1;
                }
                if take == 0 {
                    take = rows.iter().take_while(|r| r.stamp == boundary).count();
                }
            }
            let has_more = take < rows.len();
            let as_of = if has_more {
                rows[take - 1].stamp
            } else {
                inner.clock
            };

            Ok(PullResponse {
                unit: request.unit,
                server_version: unit.version,
                records: rows[..take].iter().map(|r| r.record.clone()).collect(),
                as_of,
                has_more,
            })
        }

        async fn server_version(&self, account: &AccountId, unit: &EncryptionUnit) -> Result<u64> {
            let inner = self.inner.lock().await;
            Ok(inner
                .units
                .get(&(account.clone(), *unit))
                .map_or(0, |u| u.version))
        }

        async fn units(&self, account: &AccountId) -> Result<Vec<EncryptionUnit>> {
            let inner = self.inner.lock().await;
            let mut units: Vec<EncryptionUnit> = inner
                .units
                .keys()
                .filter(|(a, _)| a == account)
                .map(|(_, u)| *u)
                .collect();
            units.sort();
            Ok(units)
        }

        async fn rows(
            &self,
            account: &AccountId,
            unit: &EncryptionUnit,
        ) -> Result<Vec<EncryptedRecord>> {
            let inner = self.inner.lock().await;
            Ok(inner
                .units
                .get(&(account.clone(), *unit))
                .map(|u| u.rows.values().map(|r| r.record.clone()).collect())
                .unwrap_or_default())
        }

        async fn publish_grants(&self, grants: &[Grant]) -> Result<()> {
            let mut inner = self.inner.lock().await;
            if std::mem::take(&mut inner.fail_next_publish) {
                return Err(SyncError::Transport("connection reset before commit".into()));
            }

            // Check every new grant before applying anything.
            check_new_grants(&inner.grants, grants, now_millis())?;

            for grant in grants {
                match inner.grants.get_mut(&grant.id) {
                    Some(held) => {
                        if held.tombstoned_at.is_none() && grant.tombstoned_at.is_some() {
                            held.tombstoned_at = grant.tombstoned_at;
                        }
                    }
                    None => {
                        inner.grants.insert(grant.id, grant.clone());
                    }
                }
            }
            Ok(())
        }

        async fn grant(&self, account: &AccountId, id: &GrantId) -> Result<Option<Grant>> {
            let inner = self.inner.lock().await;
            Ok(inner
                .grants
                .get(id)
                .filter(|g| &g.account_id == account)
                .cloned())
        }

        async fn grants(&self, account: &AccountId) -> Result<Vec<Grant>> {
            let inner = self.inner.lock().await;
            let mut grants: Vec<Grant> = inner
                .grants
                .values()
                .filter(|g| &g.account_id == account)
                .cloned()
                .collect();
            grants.sort_by_key(|g| (g.created_at, g.id));
            Ok(grants)
        }
    }
}
