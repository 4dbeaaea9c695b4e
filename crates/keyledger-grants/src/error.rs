//! Error types for delegation grants.

use keyledger_core::{CoreError, EncryptionUnit};
use thiserror::Error;

use crate::grant::{GrantId, Recipient};

/// Errors that can occur while issuing, renewing, or enforcing grants.
#[derive(Debug, Error)]
pub enum GrantError {
    /// An active grant already exists for (account, recipient, unit).
    #[error("grant conflict: {recipient} already holds active grant {existing} on {unit}")]
    GrantConflict {
        recipient: Recipient,
        unit: EncryptionUnit,
        existing: GrantId,
    },

    /// Grant not found.
    #[error("grant not found: {0}")]
    GrantNotFound(GrantId),

    /// The grant's expiry has passed.
    #[error("grant has expired: {0}")]
    GrantExpired(GrantId),

    /// The grant was revoked. Tombstones are permanent.
    #[error("grant has been revoked: {0}")]
    GrantTombstoned(GrantId),

    /// Renewal was requested for a grant outside a rolling window.
    #[error("grant is not part of a rolling window: {0}")]
    NotRolling(GrantId),

    /// The request is malformed (bad window length, past expiry, ...).
    #[error("invalid grant request: {0}")]
    InvalidRequest(String),

    /// A wrapped key did not authenticate for this recipient and unit.
    #[error("authentication failure: wrapped key could not be opened")]
    AuthenticationFailure,

    /// A wrapped key named a wrapping algorithm this build does not know.
    #[error("unsupported wrapping algorithm id: {0}")]
    UnsupportedAlgorithm(u8),

    /// Key wrapping failed.
    #[error("encryption error: {0}")]
    Encryption(String),

    /// CBOR encoding or decoding failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Core error.
    #[error("core error: {0}")]
    Core(#[from] CoreError),
}

impl GrantError {
    /// True for enforcement denials, which are logged rather than raised.
    pub fn is_denial(&self) -> bool {
        matches!(self, GrantError::GrantExpired(_) | GrantError::GrantTombstoned(_))
    }
}

/// Result type for grant operations.
pub type Result<T> = std::result::Result<T, GrantError>;
