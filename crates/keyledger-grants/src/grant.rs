//! Delegation grants.
//!
//! A grant delegates read access over one [`EncryptionUnit`] to one
//! recipient, carrying that unit's key wrapped for the recipient. Grants
//! are never edited: renewal creates a new grant, revocation sets a
//! tombstone that is never cleared.

use std::fmt;

use keyledger_core::{AccountId, CoarseDate, EncryptionUnit, Scope};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::crypto::RecipientPublicKey;
use crate::error::{GrantError, Result};
use crate::wrap::{WrapAlgorithm, WrappedKey};

/// Unique identifier of a grant.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GrantId(pub [u8; 16]);

impl GrantId {
    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for GrantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GrantId({})", &self.to_hex()[..8])
    }
}

impl fmt::Display for GrantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// A named advisor, as identified by the authentication layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AdvisorId(String);

impl AdvisorId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AdvisorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Bearer token naming an anonymous recipient.
///
/// The grant stores the token; the holder receives it out-of-band
/// together with the matching recipient secret.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccessToken(pub [u8; 32]);

impl AccessToken {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> std::result::Result<Self, hex::FromHexError> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(bytes))
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccessToken({}..)", &self.to_hex()[..8])
    }
}

/// Who a grant delegates to: a named advisor XOR an anonymous token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Recipient {
    Advisor(AdvisorId),
    Anonymous(AccessToken),
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recipient::Advisor(id) => write!(f, "advisor:{id}"),
            Recipient::Anonymous(token) => write!(f, "anonymous:{}", &token.to_hex()[..8]),
        }
    }
}

/// A delegation of read access over one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    pub id: GrantId,

    /// The account whose data is shared.
    pub account_id: AccountId,

    pub recipient: Recipient,

    /// Public key the unit key is wrapped for; reused on renewal.
    pub recipient_key: RecipientPublicKey,

    pub unit: EncryptionUnit,

    pub wrapped_key: WrappedKey,

    /// Rows dated before this are never served; undated rows neither.
    pub start_offset: Option<CoarseDate>,

    /// Exclusive end of validity (Unix ms).
    pub expires_at: Option<i64>,

    /// Set once, on revocation or window roll-off (Unix ms).
    pub tombstoned_at: Option<i64>,

    pub rolling_window: bool,

    /// Number of trailing periods a rolling series keeps active.
    pub window_length: Option<u32>,

    pub created_at: i64,

    /// The grant whose renewal produced this one.
    pub renewed_from: Option<GrantId>,
}

impl Grant {
    /// Wrapping algorithm of the stored key.
    pub fn wrap_algorithm(&self) -> Result<WrapAlgorithm> {
        self.wrapped_key.algorithm()
    }

    pub fn is_tombstoned(&self) -> bool {
        self.tombstoned_at.is_some()
    }

    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at.map_or(false, |at| now >= at)
    }

    /// Neither tombstoned nor expired at `now`.
    pub fn is_active(&self, now: i64) -> bool {
        !self.is_tombstoned() && !self.is_expired(now)
    }

    /// Check the grant may serve anything at `now`.
    ///
    /// Tombstones take precedence over expiry.
    pub fn check_access(&self, now: i64) -> Result<()> {
        if self.is_tombstoned() {
            return Err(GrantError::GrantTombstoned(self.id));
        }
        if self.is_expired(now) {
            return Err(GrantError::GrantExpired(self.id));
        }
        Ok(())
    }

    /// Set the tombstone if not already set. Returns true if newly set.
    pub(crate) fn tombstone(&mut self, now: i64) -> bool {
        if self.tombstoned_at.is_some() {
            return false;
        }
        self.tombstoned_at = Some(now);
        true
    }

    /// Key identifying the rolling series this grant belongs to.
    pub fn series(&self) -> SeriesKey {
        SeriesKey {
            account_id: self.account_id.clone(),
            recipient: self.recipient.clone(),
            scope: self.unit.scope(),
        }
    }

    /// Serialize to CBOR bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf)
            .map_err(|e| GrantError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize from CBOR bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ciborium::from_reader(bytes).map_err(|e| GrantError::Serialization(e.to_string()))
    }
}

/// (account, recipient, scope): the grants of one rolling window.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SeriesKey {
    pub account_id: AccountId,
    pub recipient: Recipient,
    pub scope: Scope,
}
