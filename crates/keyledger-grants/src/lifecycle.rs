//! Issuing, renewing, and revoking grants.
//!
//! The manager belongs to one account and needs that account's unlocked
//! [`Session`] for anything that wraps a key. Revocation needs no keys.
//!
//! Rolling windows are series of period grants sharing (account,
//! recipient, scope). Renewing a series issues the next period's grant
//! and tombstones the oldest until exactly `window_length` stay active.

use keyledger_core::{AccountId, CoarseDate, EncryptionUnit, PeriodLabel, Session};

use crate::crypto::{RecipientPublicKey, RecipientSecret};
use crate::error::{GrantError, Result};
use crate::grant::{AccessToken, Grant, GrantId, Recipient, SeriesKey};
use crate::registry::GrantRegistry;
use crate::wrap::wrap;

/// Parameters for a new grant.
#[derive(Debug, Clone)]
pub struct GrantRequest {
    pub recipient: Recipient,
    pub recipient_key: RecipientPublicKey,
    pub unit: EncryptionUnit,
    pub start_offset: Option<CoarseDate>,
    pub expires_at: Option<i64>,
    /// `Some(n)` makes the grant part of a rolling window of `n` periods.
    pub window_length: Option<u32>,
}

impl GrantRequest {
    pub fn new(
        recipient: Recipient,
        recipient_key: RecipientPublicKey,
        unit: EncryptionUnit,
    ) -> Self {
        Self {
            recipient,
            recipient_key,
            unit,
            start_offset: None,
            expires_at: None,
            window_length: None,
        }
    }

    /// Serve only rows dated on or after `date`.
    pub fn starting(mut self, date: CoarseDate) -> Self {
        self.start_offset = Some(date);
        self
    }

    /// Stop serving at `at` (Unix ms, exclusive).
    pub fn expiring(mut self, at: i64) -> Self {
        self.expires_at = Some(at);
        self
    }

    pub fn rolling(mut self, window_length: u32) -> Self {
        self.window_length = Some(window_length);
        self
    }

    fn validate(&self, now: i64) -> Result<()> {
        if let Some(at) = self.expires_at {
            if at <= now {
                return Err(GrantError::InvalidRequest(format!(
                    "expiry {at} is not after issue time {now}"
                )));
            }
        }
        if let Some(n) = self.window_length {
            if n == 0 {
                return Err(GrantError::InvalidRequest(
                    "window length must be at least 1".into(),
                ));
            }
            if self.unit.period().is_none() {
                return Err(GrantError::InvalidRequest(format!(
                    "rolling window needs a temporal unit, got {}",
                    self.unit
                )));
            }
        }
        Ok(())
    }
}

/// What an anonymous recipient receives out-of-band.
pub struct AnonymousCredential {
    grant_id: GrantId,
    token: AccessToken,
    secret: RecipientSecret,
}

impl AnonymousCredential {
    pub fn grant_id(&self) -> GrantId {
        self.grant_id
    }

    /// Bearer token presented to the ledger.
    pub fn token(&self) -> &AccessToken {
        &self.token
    }

    /// Secret that opens the grant's wrapped key.
    pub fn secret(&self) -> &RecipientSecret {
        &self.secret
    }
}

impl std::fmt::Debug for AnonymousCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnonymousCredential")
            .field("grant_id", &self.grant_id)
            .finish_non_exhaustive()
    }
}

/// Result of renewing a rolling grant.
#[derive(Debug, Clone)]
pub struct Renewal {
    /// The grant for the next period.
    pub grant: Grant,
    /// False when that grant already existed.
    pub created: bool,
    /// Grants tombstoned by this renewal to keep the window length.
    pub tombstoned: Vec<GrantId>,
}

/// Creates, renews, and tombstones the grants of one account.
#[derive(Debug)]
pub struct GrantLifecycleManager {
    account_id: AccountId,
    registry: GrantRegistry,
}

impl GrantLifecycleManager {
    pub fn new(account_id: AccountId) -> Self {
        Self {
            account_id,
            registry: GrantRegistry::new(),
        }
    }

    /// A manager over previously issued grants, e.g. loaded from storage.
    ///
    /// Grants of other accounts are skipped.
    pub fn restore(account_id: AccountId, grants: impl IntoIterator<Item = Grant>) -> Self {
        let mut manager = Self::new(account_id);
        for grant in grants {
            manager.merge(grant);
        }
        manager
    }

    /// Fold in a copy of one of this account's grants.
    ///
    /// See [`GrantRegistry::merge`]. Returns true if anything changed.
    pub fn merge(&mut self, grant: Grant) -> bool {
        if grant.account_id != self.account_id {
            tracing::warn!(grant = %grant.id, account = %grant.account_id, "foreign grant skipped");
            return false;
        }
        self.registry.merge(grant)
    }

    pub fn account_id(&self) -> &AccountId {
        &self.account_id
    }

    pub fn registry(&self) -> &GrantRegistry {
        &self.registry
    }

    pub fn get(&self, id: &GrantId) -> Option<&Grant> {
        self.registry.get(id)
    }

    /// Issue a grant for one unit.
    ///
    /// Fails with [`GrantError::GrantConflict`] if the recipient already
    /// holds an active grant on the unit.
    pub fn issue(&mut self, session: &Session, request: GrantRequest, now: i64) -> Result<Grant> {
        self.check_session(session)?;
        let grant = self.create(session, request, None, now)?;
        tracing::info!(
            grant = %grant.id,
            recipient = %grant.recipient,
            unit = %grant.unit,
            "grant issued"
        );
        Ok(grant)
    }

    /// Issue a grant to a fresh anonymous recipient.
    pub fn issue_anonymous(
        &mut self,
        session: &Session,
        unit: EncryptionUnit,
        start_offset: Option<CoarseDate>,
        expires_at: Option<i64>,
        now: i64,
    ) -> Result<(Grant, AnonymousCredential)> {
        let token = AccessToken::generate();
        let secret = RecipientSecret::generate();

        let mut request = GrantRequest::new(Recipient::Anonymous(token), secret.public_key(), unit);
        request.start_offset = start_offset;
        request.expires_at = expires_at;

        let grant = self.issue(session, request, now)?;
        let credential = AnonymousCredential {
            grant_id: grant.id,
            token,
            secret,
        };
        Ok((grant, credential))
    }

    /// Issue the `window_length` trailing period grants ending at `latest`.
    ///
    /// Nothing is issued if any of those periods is already granted.
    pub fn issue_rolling_window(
        &mut self,
        session: &Session,
        recipient: Recipient,
        recipient_key: RecipientPublicKey,
        latest: EncryptionUnit,
        window_length: u32,
        now: i64,
    ) -> Result<Vec<Grant>> {
        self.check_session(session)?;
        let Some(mut period) = latest.period() else {
            return Err(GrantError::InvalidRequest(format!(
                "rolling window needs a temporal unit, got {latest}"
            )));
        };
        if window_length == 0 {
            return Err(GrantError::InvalidRequest(
                "window length must be at least 1".into(),
            ));
        }

        let mut units = vec![latest];
        for _ in 1..window_length {
            period = period.prev().ok_or_else(|| {
                GrantError::InvalidRequest(format!("window reaches before {period}"))
            })?;
            units.push(latest.with_period(period)?);
        }
        units.reverse();

        for unit in &units {
            let existing = self.registry.active_for(&self.account_id, &recipient, unit, now);
            if let Some(existing) = existing {
                return Err(GrantError::GrantConflict {
                    recipient: recipient.clone(),
                    unit: *unit,
                    existing: existing.id,
                });
            }
        }

        let grants = units
            .into_iter()
            .map(|unit| {
                let request = GrantRequest::new(recipient.clone(), recipient_key, unit)
                    .rolling(window_length);
                self.create(session, request, None, now)
            })
            .collect::<Result<Vec<_>>>()?;

        tracing::info!(
            recipient = %recipient,
            latest = %latest,
            window_length,
            "rolling window issued"
        );
        Ok(grants)
    }

    /// Extend a rolling series by one period.
    ///
    /// Issues the grant for the period after `id`'s (or finds it, if a
    /// previous renewal already did), then tombstones the oldest active
    /// grants of the series until exactly `window_length` remain.
    /// Running it twice at the same boundary changes nothing.
    pub fn renew(&mut self, session: &Session, id: &GrantId, now: i64) -> Result<Renewal> {
        self.check_session(session)?;
        let source = self
            .registry
            .get(id)
            .filter(|g| g.account_id == self.account_id)
            .ok_or(GrantError::GrantNotFound(*id))?
            .clone();

        let (true, Some(window), Some(period)) =
            (source.rolling_window, source.window_length, source.unit.period())
        else {
            return Err(GrantError::NotRolling(*id));
        };
        let next_period = period
            .next()
            .ok_or_else(|| GrantError::InvalidRequest(format!("no period after {period}")))?;
        let next_unit = source.unit.with_period(next_period)?;

        let existing = self
            .registry
            .active_for(&self.account_id, &source.recipient, &next_unit, now)
            .cloned();
        let (grant, created) = match existing {
            Some(grant) if grant.rolling_window => (grant, false),
            Some(grant) => {
                return Err(GrantError::GrantConflict {
                    recipient: grant.recipient,
                    unit: grant.unit,
                    existing: grant.id,
                })
            }
            None => {
                source.check_access(now)?;
                let request = GrantRequest {
                    recipient: source.recipient.clone(),
                    recipient_key: source.recipient_key,
                    unit: next_unit,
                    start_offset: source.start_offset,
                    expires_at: source.expires_at,
                    window_length: Some(window),
                };
                (self.create(session, request, Some(source.id), now)?, true)
            }
        };

        let tombstoned = self.trim_series(&source.series(), window, now);
        if created {
            tracing::info!(
                from = %source.id,
                grant = %grant.id,
                unit = %grant.unit,
                tombstoned = tombstoned.len(),
                "grant renewed"
            );
        } else {
            tracing::debug!(grant = %grant.id, "renewal already applied");
        }

        Ok(Renewal {
            grant,
            created,
            tombstoned,
        })
    }

    /// Renew every rolling series of this account until its newest grant
    /// covers `current`.
    ///
    /// Meant to run on a schedule; repeated runs are no-ops.
    pub fn roll_forward(
        &mut self,
        session: &Session,
        current: PeriodLabel,
        now: i64,
    ) -> Result<Vec<Renewal>> {
        self.check_session(session)?;
        let mut renewals = Vec::new();

        for series in self.registry.rolling_series(now) {
            if series.account_id != self.account_id {
                continue;
            }
            loop {
                let Some(newest) = self.registry.active_series(&series, now).last().copied()
                else {
                    break;
                };
                if newest.unit.period().map_or(true, |p| p >= current) {
                    break;
                }
                let newest_id = newest.id;
                let renewal = self.renew(session, &newest_id, now)?;
                if !renewal.created {
                    break;
                }
                renewals.push(renewal);
            }
        }

        if !renewals.is_empty() {
            tracing::info!(current = %current, renewed = renewals.len(), "rolled grants forward");
        }
        Ok(renewals)
    }

    /// Tombstone a grant. Revoking twice keeps the first tombstone time.
    pub fn revoke(&mut self, id: &GrantId, now: i64) -> Result<Grant> {
        if self
            .registry
            .get(id)
            .map_or(true, |g| g.account_id != self.account_id)
        {
            return Err(GrantError::GrantNotFound(*id));
        }

        let (grant, newly) = self.registry.tombstone(id, now)?;
        if newly {
            tracing::info!(grant = %grant.id, unit = %grant.unit, "grant revoked");
        } else {
            tracing::debug!(grant = %grant.id, "grant already revoked");
        }
        Ok(grant.clone())
    }

    fn check_session(&self, session: &Session) -> Result<()> {
        if session.account_id() != &self.account_id {
            return Err(GrantError::InvalidRequest(format!(
                "session belongs to {}, not {}",
                session.account_id(),
                self.account_id
            )));
        }
        Ok(())
    }

    fn create(
        &mut self,
        session: &Session,
        request: GrantRequest,
        renewed_from: Option<GrantId>,
        now: i64,
    ) -> Result<Grant> {
        request.validate(now)?;
        if let Some(existing) =
            self.registry
                .active_for(&self.account_id, &request.recipient, &request.unit, now)
        {
            return Err(GrantError::GrantConflict {
                recipient: request.recipient,
                unit: request.unit,
                existing: existing.id,
            });
        }

        let unit_key = session.unit_key(&request.unit)?;
        let wrapped_key = wrap(&request.recipient_key, &unit_key)?;

        let grant = Grant {
            id: GrantId::generate(),
            account_id: self.account_id.clone(),
            recipient: request.recipient,
            recipient_key: request.recipient_key,
            unit: request.unit,
            wrapped_key,
            start_offset: request.start_offset,
            expires_at: request.expires_at,
            tombstoned_at: None,
            rolling_window: request.window_length.is_some(),
            window_length: request.window_length,
            created_at: now,
            renewed_from,
        };
        self.registry.insert(grant.clone(), now)?;
        Ok(grant)
    }

    fn trim_series(&mut self, series: &SeriesKey, window: u32, now: i64) -> Vec<GrantId> {
        let active: Vec<GrantId> = self
            .registry
            .active_series(series, now)
            .iter()
            .map(|g| g.id)
            .collect();
        let excess = active.len().saturating_sub(window as usize);

        let mut tombstoned = Vec::with_capacity(excess);
        for id in &active[..excess] {
            if let Ok((_, true)) = self.registry.tombstone(id, now) {
                tombstoned.push(*id);
            }
        }
        tombstoned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grant::AdvisorId;
    use crate::wrap::unwrap;
    use keyledger_core::{CoreError, RootSecret};

    fn session() -> Session {
        Session::unlock(
            AccountId::new("acct"),
            RootSecret::from_bytes(vec![7; 32]).unwrap(),
        )
    }

    fn manager() -> GrantLifecycleManager {
        GrantLifecycleManager::new(AccountId::new("acct"))
    }

    fn unit(s: &str) -> EncryptionUnit {
        s.parse().unwrap()
    }

    fn advisor() -> Recipient {
        Recipient::Advisor(AdvisorId::new("advisor-x"))
    }

    fn active_units(manager: &GrantLifecycleManager, now: i64) -> Vec<String> {
        let mut units: Vec<String> = manager
            .registry()
            .for_account(manager.account_id())
            .into_iter()
            .filter(|g| g.is_active(now))
            .map(|g| g.unit.to_string())
            .collect();
        units.sort();
        units
    }

    #[test]
    fn test_issue_wraps_the_unit_key() {
        let session = session();
        let advisor_secret = RecipientSecret::generate();
        let mut manager = manager();

        let request =
            GrantRequest::new(advisor(), advisor_secret.public_key(), unit("presence/2025-Q1"));
        let grant = manager.issue(&session, request, 100).unwrap();

        let opened = unwrap(&advisor_secret, &grant.wrapped_key, &grant.unit).unwrap();
        let expected = session.unit_key(&grant.unit).unwrap();
        assert_eq!(opened.key().as_bytes(), expected.key().as_bytes());
        assert!(!grant.rolling_window);
        assert_eq!(grant.created_at, 100);
    }

    #[test]
    fn test_duplicate_issue_conflicts() {
        let session = session();
        let key = RecipientSecret::generate().public_key();
        let mut manager = manager();

        let request = GrantRequest::new(advisor(), key, unit("presence/2025-Q1"));
        manager.issue(&session, request.clone(), 0).unwrap();
        assert!(matches!(
            manager.issue(&session, request, 1),
            Err(GrantError::GrantConflict { .. })
        ));
    }

    #[test]
    fn test_invalid_requests() {
        let session = session();
        let key = RecipientSecret::generate().public_key();
        let mut manager = manager();

        let not_temporal = GrantRequest::new(advisor(), key, unit("identity")).rolling(2);
        assert!(matches!(
            manager.issue(&session, not_temporal, 0),
            Err(GrantError::InvalidRequest(_))
        ));

        let zero = GrantRequest::new(advisor(), key, unit("presence/2025-Q1")).rolling(0);
        assert!(matches!(
            manager.issue(&session, zero, 0),
            Err(GrantError::InvalidRequest(_))
        ));

        let past = GrantRequest::new(advisor(), key, unit("identity")).expiring(50);
        assert!(matches!(
            manager.issue(&session, past, 50),
            Err(GrantError::InvalidRequest(_))
        ));
        assert!(manager.registry().is_empty());
    }

    #[test]
    fn test_foreign_or_locked_session() {
        let key = RecipientSecret::generate().public_key();
        let mut manager = manager();

        let other = Session::unlock(
            AccountId::new("other"),
            RootSecret::from_bytes(vec![1; 32]).unwrap(),
        );
        let request = GrantRequest::new(advisor(), key, unit("identity"));
        assert!(matches!(
            manager.issue(&other, request.clone(), 0),
            Err(GrantError::InvalidRequest(_))
        ));

        let locked = session();
        locked.lock();
        assert!(matches!(
            manager.issue(&locked, request, 0),
            Err(GrantError::Core(CoreError::SessionLocked))
        ));
    }

    #[test]
    fn test_anonymous_credential_opens_grant() {
        let session = session();
        let mut manager = manager();

        let (grant, credential) = manager
            .issue_anonymous(&session, unit("documents"), None, Some(10_000), 0)
            .unwrap();
        assert_eq!(grant.recipient, Recipient::Anonymous(*credential.token()));
        assert_eq!(credential.grant_id(), grant.id);
        assert!(unwrap(credential.secret(), &grant.wrapped_key, &grant.unit).is_ok());
        assert_eq!(manager.registry().for_token(credential.token()).len(), 1);
    }

    #[test]
    fn test_rolling_window_issue() {
        let session = session();
        let key = RecipientSecret::generate().public_key();
        let mut manager = manager();

        let grants = manager
            .issue_rolling_window(&session, advisor(), key, unit("presence/2025-Q4"), 4, 0)
            .unwrap();
        let units: Vec<String> = grants.iter().map(|g| g.unit.to_string()).collect();
        assert_eq!(
            units,
            [
                "presence/2025-Q1",
                "presence/2025-Q2",
                "presence/2025-Q3",
                "presence/2025-Q4"
            ]
        );
        assert!(grants.iter().all(|g| g.rolling_window && g.window_length == Some(4)));
    }

    #[test]
    fn test_rolling_window_is_all_or_nothing() {
        let session = session();
        let key = RecipientSecret::generate().public_key();
        let mut manager = manager();

        manager
            .issue(&session, GrantRequest::new(advisor(), key, unit("presence/2025-Q2")), 0)
            .unwrap();
        assert!(matches!(
            manager.issue_rolling_window(&session, advisor(), key, unit("presence/2025-Q4"), 4, 0),
            Err(GrantError::GrantConflict { .. })
        ));
        assert_eq!(manager.registry().len(), 1);
    }

    #[test]
    fn test_renew_rolls_window_to_q5() {
        let session = session();
        let advisor_secret = RecipientSecret::generate();
        let mut manager = manager();

        let grants = manager
            .issue_rolling_window(
                &session,
                advisor(),
                advisor_secret.public_key(),
                unit("presence/2025-Q4"),
                4,
                0,
            )
            .unwrap();
        let q4 = grants[3].id;

        let renewal = manager.renew(&session, &q4, 10).unwrap();
        assert!(renewal.created);
        assert_eq!(renewal.grant.unit, unit("presence/2026-Q1"));
        assert_eq!(renewal.grant.renewed_from, Some(q4));
        assert_eq!(renewal.tombstoned, vec![grants[0].id]);
        assert_eq!(
            active_units(&manager, 10),
            [
                "presence/2025-Q2",
                "presence/2025-Q3",
                "presence/2025-Q4",
                "presence/2026-Q1"
            ]
        );

        let opened = unwrap(&advisor_secret, &renewal.grant.wrapped_key, &renewal.grant.unit)
            .unwrap();
        let expected = session.unit_key(&unit("presence/2026-Q1")).unwrap();
        assert_eq!(opened.key().as_bytes(), expected.key().as_bytes());
    }

    #[test]
    fn test_renew_twice_is_idempotent() {
        let session = session();
        let key = RecipientSecret::generate().public_key();
        let mut manager = manager();

        let grants = manager
            .issue_rolling_window(&session, advisor(), key, unit("presence/2025-Q4"), 4, 0)
            .unwrap();
        let first = manager.renew(&session, &grants[3].id, 10).unwrap();
        let second = manager.renew(&session, &grants[3].id, 20).unwrap();

        assert!(!second.created);
        assert!(second.tombstoned.is_empty());
        assert_eq!(second.grant.id, first.grant.id);
        assert_eq!(manager.registry().len(), 5);
        assert_eq!(active_units(&manager, 20).len(), 4);
    }

    #[test]
    fn test_renew_window_of_one_tombstones_source() {
        let session = session();
        let key = RecipientSecret::generate().public_key();
        let mut manager = manager();

        let grants = manager
            .issue_rolling_window(&session, advisor(), key, unit("residency/2025-Q2"), 1, 0)
            .unwrap();
        let source = grants[0].id;
        let renewal = manager.renew(&session, &source, 5).unwrap();
        assert_eq!(renewal.tombstoned, vec![source]);

        let again = manager.renew(&session, &source, 6).unwrap();
        assert!(!again.created);
        assert_eq!(again.grant.id, renewal.grant.id);
    }

    #[test]
    fn test_renew_requires_rolling_grant() {
        let session = session();
        let key = RecipientSecret::generate().public_key();
        let mut manager = manager();

        let grant = manager
            .issue(&session, GrantRequest::new(advisor(), key, unit("presence/2025-Q1")), 0)
            .unwrap();
        assert!(matches!(
            manager.renew(&session, &grant.id, 1),
            Err(GrantError::NotRolling(_))
        ));
    }

    #[test]
    fn test_revoked_series_is_not_renewed() {
        let session = session();
        let key = RecipientSecret::generate().public_key();
        let mut manager = manager();

        let grants = manager
            .issue_rolling_window(&session, advisor(), key, unit("presence/2025-Q2"), 2, 0)
            .unwrap();
        manager.revoke(&grants[1].id, 5).unwrap();
        assert!(matches!(
            manager.renew(&session, &grants[1].id, 6),
            Err(GrantError::GrantTombstoned(_))
        ));
    }

    #[test]
    fn test_roll_forward_catches_up_once() {
        let session = session();
        let key = RecipientSecret::generate().public_key();
        let mut manager = manager();

        manager
            .issue_rolling_window(&session, advisor(), key, unit("presence/2025-Q4"), 4, 0)
            .unwrap();
        let current: PeriodLabel = "2026-Q2".parse().unwrap();

        let renewals = manager.roll_forward(&session, current, 10).unwrap();
        assert_eq!(renewals.len(), 2);
        assert_eq!(
            active_units(&manager, 10),
            [
                "presence/2025-Q3",
                "presence/2025-Q4",
                "presence/2026-Q1",
                "presence/2026-Q2"
            ]
        );

        assert!(manager.roll_forward(&session, current, 20).unwrap().is_empty());
        assert_eq!(manager.registry().len(), 6);
    }

    #[test]
    fn test_revoke_keeps_first_tombstone() {
        let session = session();
        let key = RecipientSecret::generate().public_key();
        let mut manager = manager();

        let grant = manager
            .issue(&session, GrantRequest::new(advisor(), key, unit("identity")), 0)
            .unwrap();
        assert_eq!(manager.revoke(&grant.id, 10).unwrap().tombstoned_at, Some(10));
        assert_eq!(manager.revoke(&grant.id, 99).unwrap().tombstoned_at, Some(10));
        assert!(!manager.get(&grant.id).unwrap().is_active(100));
    }

    #[test]
    fn test_revoke_unknown() {
        let mut manager = manager();
        assert!(matches!(
            manager.revoke(&GrantId::from_bytes([3; 16]), 0),
            Err(GrantError::GrantNotFound(_))
        ));
    }

    #[test]
    fn test_restored_manager_continues_the_lifecycle() {
        let session = session();
        let key = RecipientSecret::generate().public_key();
        let mut first = manager();
        let grants = first
            .issue_rolling_window(&session, advisor(), key, unit("presence/2025-Q2"), 2, 0)
            .unwrap();
        let mut foreign = grants[0].clone();
        foreign.id = GrantId::from_bytes([8; 16]);
        foreign.account_id = AccountId::new("someone-else");

        let issued: Vec<Grant> = first
            .registry()
            .for_account(first.account_id())
            .into_iter()
            .cloned()
            .collect();
        let mut restored = GrantLifecycleManager::restore(
            AccountId::new("acct"),
            issued.into_iter().chain([foreign]),
        );
        assert_eq!(restored.registry().len(), 2);

        let err = restored
            .issue(&session, GrantRequest::new(advisor(), key, unit("presence/2025-Q2")), 1)
            .unwrap_err();
        assert!(matches!(err, GrantError::GrantConflict { .. }));

        let renewal = restored.renew(&session, &grants[1].id, 2).unwrap();
        assert!(renewal.created);
        assert_eq!(renewal.tombstoned, vec![grants[0].id]);
        assert_eq!(active_units(&restored, 3), ["presence/2025-Q2", "presence/2025-Q3"]);
    }
}
