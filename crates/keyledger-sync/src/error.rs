//! Error types for the sync module.

use keyledger_core::EncryptionUnit;
use keyledger_grants::GrantId;
use thiserror::Error;

/// Errors that can occur during sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The push baseline was stale: the ledger moved on since the last pull.
    ///
    /// Recover by pulling and retrying.
    #[error("version conflict on {unit}: pushed against {expected}, server is at {actual}")]
    VersionConflict {
        unit: EncryptionUnit,
        expected: u64,
        actual: u64,
    },

    /// A push may or may not have been applied.
    ///
    /// Never retried blindly; the next cycle re-pulls first.
    #[error("push outcome unknown for {0}")]
    Ambiguous(EncryptionUnit),

    /// Message validation failed.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// A message exceeded a protocol limit.
    #[error("limit exceeded: {0}")]
    LimitExceeded(String),

    /// Transport-level error. Nothing was applied.
    #[error("transport error: {0}")]
    Transport(String),

    /// The ledger already holds an active grant for the same recipient
    /// and unit. Nothing in the batch was applied.
    #[error("grant {grant} refused: ledger holds active grant {existing}")]
    GrantConflict { grant: GrantId, existing: GrantId },

    /// Store operation failed.
    #[error("store error: {0}")]
    Store(#[from] keyledger_store::StoreError),
}

impl SyncError {
    /// Whether retrying later can succeed without user action.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SyncError::VersionConflict { .. } | SyncError::Ambiguous(_) | SyncError::Transport(_)
        )
    }
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
