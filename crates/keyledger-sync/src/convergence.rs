//! Convergence verification.
//!
//! After syncing, a device and the ledger can check they hold the same
//! rows for a unit by comparing digests instead of rows.

use keyledger_core::{AccountId, EncryptedRecord, EncryptionUnit};
use keyledger_store::Store;

use crate::error::Result;
use crate::ledger::Ledger;

/// Digest over a unit's rows.
///
/// Algorithm:
/// 1. Sort rows by (record id, data version, nonce)
/// 2. Hash the unit descriptor, then each row's id, version and nonce
///
/// Two row sets have equal digests iff they contain the same versions.
pub fn unit_digest(unit: &EncryptionUnit, records: &[EncryptedRecord]) -> [u8; 32] {
    let mut rows: Vec<&EncryptedRecord> = records.iter().collect();
    rows.sort_by(|a, b| {
        (a.record_id, a.data_version, a.nonce()).cmp(&(b.record_id, b.data_version, b.nonce()))
    });

    let mut hasher = blake3::Hasher::new_derive_key("keyledger-v1 unit-digest");
    hasher.update(unit.descriptor().as_bytes());
    hasher.update(&(rows.len() as u64).to_be_bytes());
    for row in rows {
        hasher.update(row.record_id.as_bytes());
        hasher.update(&row.data_version.to_be_bytes());
        hasher.update(&(row.nonce().len() as u32).to_be_bytes());
        hasher.update(row.nonce());
    }
    *hasher.finalize().as_bytes()
}

/// Result of convergence verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvergenceResult {
    /// Device and ledger hold identical rows.
    Converged,
    /// They differ (may need another sync cycle).
    NotConverged {
        local_rows: usize,
        remote_rows: usize,
    },
}

impl ConvergenceResult {
    /// Check if device and ledger have converged.
    pub fn is_converged(&self) -> bool {
        matches!(self, ConvergenceResult::Converged)
    }
}

/// Compare a device's current rows of `unit` with the ledger's.
pub async fn verify_convergence<S: Store, L: Ledger>(
    store: &S,
    ledger: &L,
    account: &AccountId,
    unit: &EncryptionUnit,
) -> Result<ConvergenceResult> {
    let local = store.records_in_unit(unit).await?;
    let remote = ledger.rows(account, unit).await?;

    if unit_digest(unit, &local) == unit_digest(unit, &remote) {
        Ok(ConvergenceResult::Converged)
    } else {
        Ok(ConvergenceResult::NotConverged {
            local_rows: local.len(),
            remote_rows: remote.len(),
        })
    }
}
