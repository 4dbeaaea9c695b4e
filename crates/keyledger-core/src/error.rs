//! Error types for Keyledger core.

use thiserror::Error;

/// Errors raised by the pure primitives: derivation, codecs, and parsing.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A key path was empty or contained a malformed segment.
    ///
    /// This is a programming error; paths built from [`Scope`](crate::Scope)
    /// and [`PeriodLabel`](crate::PeriodLabel) never trigger it.
    #[error("malformed key path: {0}")]
    Derivation(String),

    /// Ciphertext, nonce, or tag did not authenticate under the given key.
    ///
    /// Signals tampering or a wrong key. Never carries partial plaintext.
    #[error("authentication failure: ciphertext could not be verified")]
    AuthenticationFailure,

    /// The narrow-nonce budget for a key has been reached.
    #[error("nonce exhaustion risk: {used} encryptions under one key (limit {limit}); re-key required")]
    NonceExhaustionRisk { used: u64, limit: u64 },

    /// An envelope named an algorithm this build does not know.
    #[error("unsupported algorithm id: {0}")]
    UnsupportedAlgorithm(u8),

    /// Scope and period do not form a valid encryption unit.
    #[error("invalid encryption unit: {0}")]
    InvalidUnit(String),

    /// A period label did not match `YYYY-Qn`.
    #[error("invalid period label: {0:?}")]
    InvalidPeriod(String),

    /// A date did not match `YYYY-MM-DD` or is not a calendar date.
    #[error("invalid date: {0:?}")]
    InvalidDate(String),

    /// A scope name is not one of the known scopes.
    #[error("unknown scope: {0:?}")]
    UnknownScope(String),

    /// The root secret is too short or the recovery phrase is malformed.
    #[error("invalid root secret: {0}")]
    InvalidSecret(String),

    /// The session has been locked and holds no root secret.
    #[error("session is locked")]
    SessionLocked,

    /// CBOR encoding failed.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// CBOR decoding failed.
    #[error("decoding error: {0}")]
    Decoding(String),
}

impl CoreError {
    /// True for failures that mean stored data cannot be trusted.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(self, CoreError::AuthenticationFailure)
    }
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
