//! The advisor side of a grant, and the ledger-side helper that serves it.

use keyledger_core::{AccountId, EncryptedRecord, RecordCodec, UnitKey};
use keyledger_grants::{
    unwrap, AccessLog, AnonymousCredential, Grant, GrantEnforcementFilter, GrantError, GrantId,
    RecipientPublicKey, RecipientSecret,
};
use keyledger_sync::Ledger;

use crate::error::{Result, VaultError};
use crate::vault::{open_record, DecryptedRecord};

/// Rows the ledger may transmit under grant `id` at `now`.
///
/// The grant is the ledger's own copy, so a revocation published from
/// any device applies whatever copy the requester holds. A tombstoned or
/// expired grant serves nothing and never reads the unit's rows. Every
/// attempt lands in `log`.
pub async fn serve_grant<L: Ledger>(
    ledger: &L,
    account: &AccountId,
    id: &GrantId,
    now: i64,
    log: &AccessLog,
) -> Result<Vec<EncryptedRecord>> {
    let grant = ledger
        .grant(account, id)
        .await?
        .ok_or(GrantError::GrantNotFound(*id))?;
    let rows = if grant.is_active(now) {
        ledger.rows(&grant.account_id, &grant.unit).await?
    } else {
        Vec::new()
    };
    Ok(GrantEnforcementFilter::new(&grant, now).apply(rows, log))
}

/// Opens grants and decrypts the rows they serve.
pub struct AdvisorClient {
    secret: RecipientSecret,
    codec: RecordCodec,
}

impl AdvisorClient {
    pub fn new(secret: RecipientSecret) -> Self {
        Self {
            secret,
            codec: RecordCodec::default(),
        }
    }

    /// A client for the holder of an anonymous credential.
    pub fn from_credential(credential: &AnonymousCredential) -> Self {
        Self::new(RecipientSecret::from_bytes(credential.secret().to_bytes()))
    }

    /// The key grants should be wrapped for.
    pub fn public_key(&self) -> RecipientPublicKey {
        self.secret.public_key()
    }

    /// Unwrap the unit key carried by `grant`.
    pub fn open_grant(&self, grant: &Grant) -> Result<UnitKey> {
        unwrap(&self.secret, &grant.wrapped_key, &grant.unit).map_err(|e| {
            if matches!(e, GrantError::AuthenticationFailure) {
                tracing::error!(
                    grant = %grant.id,
                    unit = %grant.unit,
                    "wrapped key failed authentication"
                );
            }
            VaultError::from(e)
        })
    }

    /// Decrypt rows served under the grant whose key is `key`.
    ///
    /// Rows of any other unit are refused rather than tried.
    pub fn decrypt_rows(
        &self,
        key: &UnitKey,
        rows: &[EncryptedRecord],
    ) -> Result<Vec<DecryptedRecord>> {
        rows.iter()
            .map(|row| {
                if &row.unit != key.unit() {
                    return Err(VaultError::InvalidOperation(format!(
                        "row {} is in {}, key opens {}",
                        row.record_id,
                        row.unit,
                        key.unit()
                    )));
                }
                open_record(&self.codec, key, row)
            })
            .collect()
    }
}

impl std::fmt::Debug for AdvisorClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdvisorClient")
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}
