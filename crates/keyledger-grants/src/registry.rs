//! Grant storage with the active-uniqueness index.

use std::collections::HashMap;

use keyledger_core::{AccountId, EncryptionUnit};

use crate::error::{GrantError, Result};
use crate::grant::{AccessToken, Grant, GrantId, Recipient, SeriesKey};

type ActiveKey = (AccountId, Recipient, EncryptionUnit);

/// Every grant ever issued, tombstones included.
#[derive(Debug, Default)]
pub struct GrantRegistry {
    grants: HashMap<GrantId, Grant>,

    /// Index: (account, recipient, unit) -> newest non-tombstoned grant.
    by_unit: HashMap<ActiveKey, GrantId>,
}

impl GrantRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.grants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }

    pub fn get(&self, id: &GrantId) -> Option<&Grant> {
        self.grants.get(id)
    }

    /// The grant active at `now` for (account, recipient, unit), if any.
    pub fn active_for(
        &self,
        account: &AccountId,
        recipient: &Recipient,
        unit: &EncryptionUnit,
        now: i64,
    ) -> Option<&Grant> {
        let key = (account.clone(), recipient.clone(), *unit);
        self.by_unit
            .get(&key)
            .and_then(|id| self.grants.get(id))
            .filter(|g| g.is_active(now))
    }

    /// Add a grant, enforcing at most one active grant per
    /// (account, recipient, unit).
    ///
    /// An expired but untombstoned grant does not block a new one.
    pub fn insert(&mut self, grant: Grant, now: i64) -> Result<()> {
        if let Some(existing) =
            self.active_for(&grant.account_id, &grant.recipient, &grant.unit, now)
        {
            return Err(GrantError::GrantConflict {
                recipient: grant.recipient.clone(),
                unit: grant.unit,
                existing: existing.id,
            });
        }
        if self.grants.contains_key(&grant.id) {
            return Err(GrantError::InvalidRequest(format!("duplicate grant id {}", grant.id)));
        }

        if !grant.is_tombstoned() {
            let key = (grant.account_id.clone(), grant.recipient.clone(), grant.unit);
            self.by_unit.insert(key, grant.id);
        }
        self.grants.insert(grant.id, grant);
        Ok(())
    }

    /// Fold in a copy of a grant held elsewhere (device store, ledger).
    ///
    /// An unseen grant is added without the conflict check: the copy was
    /// accepted where it came from. A known grant only takes on the
    /// copy's tombstone; a tombstone is never cleared. Returns true if
    /// anything changed.
    pub fn merge(&mut self, grant: Grant) -> bool {
        match self.grants.get(&grant.id) {
            Some(held) => match (held.tombstoned_at, grant.tombstoned_at) {
                (None, Some(at)) => {
                    let id = grant.id;
                    self.tombstone(&id, at).is_ok()
                }
                _ => false,
            },
            None => {
                if !grant.is_tombstoned() {
                    let key = (grant.account_id.clone(), grant.recipient.clone(), grant.unit);
                    let newest = self
                        .by_unit
                        .get(&key)
                        .and_then(|id| self.grants.get(id))
                        .map_or(true, |indexed| grant.created_at >= indexed.created_at);
                    if newest {
                        self.by_unit.insert(key, grant.id);
                    }
                }
                self.grants.insert(grant.id, grant);
                true
            }
        }
    }

    /// Tombstone a grant. Returns the grant and whether this call set it.
    pub fn tombstone(&mut self, id: &GrantId, now: i64) -> Result<(&Grant, bool)> {
        let grant = self.grants.get_mut(id).ok_or(GrantError::GrantNotFound(*id))?;
        let newly = grant.tombstone(now);
        if newly {
            let key = (grant.account_id.clone(), grant.recipient.clone(), grant.unit);
            if self.by_unit.get(&key) == Some(id) {
                self.by_unit.remove(&key);
            }
        }
        Ok((&self.grants[id], newly))
    }

    /// All grants of an account, oldest first.
    pub fn for_account(&self, account: &AccountId) -> Vec<&Grant> {
        let mut grants: Vec<&Grant> = self
            .grants
            .values()
            .filter(|g| &g.account_id == account)
            .collect();
        grants.sort_by_key(|g| (g.created_at, g.unit, g.id));
        grants
    }

    /// Grants naming an anonymous token.
    pub fn for_token(&self, token: &AccessToken) -> Vec<&Grant> {
        let recipient = Recipient::Anonymous(*token);
        let mut grants: Vec<&Grant> = self
            .grants
            .values()
            .filter(|g| g.recipient == recipient)
            .collect();
        grants.sort_by_key(|g| (g.unit, g.created_at));
        grants
    }

    /// Active rolling grants of a series, ordered by period.
    pub fn active_series(&self, series: &SeriesKey, now: i64) -> Vec<&Grant> {
        let mut grants: Vec<&Grant> = self
            .grants
            .values()
            .filter(|g| g.rolling_window && g.is_active(now) && &g.series() == series)
            .collect();
        grants.sort_by_key(|g| g.unit.period());
        grants
    }

    /// Every rolling series with at least one active grant.
    pub fn rolling_series(&self, now: i64) -> Vec<SeriesKey> {
        let mut keys: Vec<SeriesKey> = self
            .grants
            .values()
            .filter(|g| g.rolling_window && g.is_active(now))
            .map(Grant::series)
            .collect();
        keys.sort();
        keys.dedup();
        keys
    }
}
