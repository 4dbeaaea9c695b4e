//! Server-side enforcement of grants over ciphertext rows.
//!
//! The filter decides from plaintext metadata alone which rows a grant
//! may serve. Denials are recorded as access attempts, not raised.

use std::sync::Mutex;

use keyledger_core::{EncryptedRecord, EncryptionUnit};
use serde::{Deserialize, Serialize};

use crate::error::GrantError;
use crate::grant::{Grant, GrantId, Recipient};

/// Why a grant served nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DenialReason {
    Tombstoned,
    Expired,
}

/// Outcome of one access attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessOutcome {
    /// Rows were filtered; `withheld` never left the server.
    Served { rows: usize, withheld: usize },
    Denied(DenialReason),
}

/// One entry of the access log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessAttempt {
    pub grant_id: GrantId,
    pub recipient: Recipient,
    pub unit: EncryptionUnit,
    pub at: i64,
    pub outcome: AccessOutcome,
}

/// Append-only record of enforcement decisions.
#[derive(Debug, Default)]
pub struct AccessLog {
    attempts: Mutex<Vec<AccessAttempt>>,
}

impl AccessLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, attempt: AccessAttempt) {
        self.attempts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(attempt);
    }

    /// Snapshot of every attempt, oldest first.
    pub fn attempts(&self) -> Vec<AccessAttempt> {
        self.attempts.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Attempts that were denied.
    pub fn denials(&self) -> Vec<AccessAttempt> {
        self.attempts()
            .into_iter()
            .filter(|a| matches!(a.outcome, AccessOutcome::Denied(_)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.attempts.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The row predicate of one grant at one instant.
#[derive(Debug, Clone, Copy)]
pub struct GrantEnforcementFilter<'a> {
    grant: &'a Grant,
    now: i64,
}

impl<'a> GrantEnforcementFilter<'a> {
    pub fn new(grant: &'a Grant, now: i64) -> Self {
        Self { grant, now }
    }

    /// Whether `row` may be transmitted under the grant.
    ///
    /// An undated row fails a start-offset floor.
    pub fn permits(&self, row: &EncryptedRecord) -> bool {
        let grant = self.grant;
        row.account_id == grant.account_id
            && row.unit == grant.unit
            && grant.is_active(self.now)
            && grant
                .start_offset
                .map_or(true, |floor| row.record_date.map_or(false, |d| d >= floor))
    }

    /// Keep the servable rows and log the attempt.
    ///
    /// A tombstoned or expired grant yields nothing.
    pub fn apply(&self, rows: Vec<EncryptedRecord>, log: &AccessLog) -> Vec<EncryptedRecord> {
        let (served, outcome) = match self.grant.check_access(self.now) {
            Err(err) => {
                let reason = match err {
                    GrantError::GrantExpired(_) => DenialReason::Expired,
                    _ => DenialReason::Tombstoned,
                };
                tracing::debug!(grant = %self.grant.id, ?reason, "access denied");
                (Vec::new(), AccessOutcome::Denied(reason))
            }
            Ok(()) => {
                let total = rows.len();
                let served: Vec<EncryptedRecord> =
                    rows.into_iter().filter(|r| self.permits(r)).collect();
                let outcome = AccessOutcome::Served {
                    rows: served.len(),
                    withheld: total - served.len(),
                };
                (served, outcome)
            }
        };

        log.record(AccessAttempt {
            grant_id: self.grant.id,
            recipient: self.grant.recipient.clone(),
            unit: self.grant.unit,
            at: self.now,
            outcome,
        });
        served
    }
}
