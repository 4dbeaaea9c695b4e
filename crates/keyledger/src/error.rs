//! Error types for the vault.

use keyledger_core::{CoreError, RecordId};
use keyledger_grants::GrantError;
use keyledger_store::StoreError;
use keyledger_sync::SyncError;
use thiserror::Error;

/// Errors that can occur during vault operations.
#[derive(Debug, Error)]
pub enum VaultError {
    /// Derivation, codec, or session error.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Sync error.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// Grant error.
    #[error("grant error: {0}")]
    Grant(#[from] GrantError),

    /// Record not found.
    #[error("record not found: {0}")]
    RecordNotFound(RecordId),

    /// No current or archived row has this version.
    #[error("record {record_id} has no version {data_version}")]
    VersionNotFound { record_id: RecordId, data_version: u64 },

    /// Invalid operation.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// Configuration could not be loaded.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl VaultError {
    /// Stored data or a wrapped key failed authentication.
    ///
    /// Surfaces to the user as "your data could not be decrypted".
    pub fn is_integrity_alarm(&self) -> bool {
        match self {
            VaultError::Core(e) => e.is_integrity_failure(),
            VaultError::Grant(GrantError::AuthenticationFailure) => true,
            _ => false,
        }
    }

    /// The change is safe locally and a later sync can complete it.
    ///
    /// Surfaces to the user as "your change could not be saved yet".
    pub fn is_transient(&self) -> bool {
        match self {
            VaultError::Sync(e) => e.is_transient(),
            _ => false,
        }
    }
}

/// Result type for vault operations.
pub type Result<T> = std::result::Result<T, VaultError>;
