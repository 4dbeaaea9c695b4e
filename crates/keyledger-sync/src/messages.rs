//! Wire messages exchanged between a device and the ledger.
//!
//! Every message carries only ciphertext and plaintext metadata. All types
//! serialize with serde; [`encode`] and [`decode`] use CBOR.

use keyledger_core::{AccountId, DeviceId, EncryptedRecord, EncryptionUnit, SyncState};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::{Result, SyncError};

/// Current protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Protocol limits.
pub mod limits {
    /// Max records in one push.
    pub const MAX_RECORDS_PER_PUSH: usize = 256;
    /// Max records in one pull page.
    pub const MAX_RECORDS_PER_PULL: usize = 512;
    /// Max ciphertext size of a single record.
    pub const MAX_RECORD_BYTES: usize = 1024 * 1024;
}

/// Submit pending records for one unit.
///
/// The ledger applies the whole batch iff `base_version` equals its
/// current version for (account, unit), then increments that version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushRequest {
    pub protocol_version: u8,
    pub account_id: AccountId,
    pub device_id: DeviceId,
    pub unit: EncryptionUnit,
    /// Last server version this device saw.
    pub base_version: u64,
    /// Count of local writes on this device.
    pub local_version: u64,
    pub records: Vec<EncryptedRecord>,
}

impl PushRequest {
    /// Check limits and that every record belongs to this account and unit.
    pub fn validate(&self) -> Result<()> {
        if self.protocol_version != PROTOCOL_VERSION {
            return Err(SyncError::InvalidMessage(format!(
                "protocol version {} (expected {PROTOCOL_VERSION})",
                self.protocol_version
            )));
        }
        if self.records.is_empty() {
            return Err(SyncError::InvalidMessage("push carries no records".into()));
        }
        if self.records.len() > limits::MAX_RECORDS_PER_PUSH {
            return Err(SyncError::LimitExceeded(format!(
                "{} records in one push (max {})",
                self.records.len(),
                limits::MAX_RECORDS_PER_PUSH
            )));
        }
        for record in &self.records {
            if record.account_id != self.account_id || record.unit != self.unit {
                return Err(SyncError::InvalidMessage(format!(
                    "record {} does not belong to {}/{}",
                    record.record_id, self.account_id, self.unit
                )));
            }
            if record.data_version == 0 {
                return Err(SyncError::InvalidMessage(format!(
                    "record {} has data version 0",
                    record.record_id
                )));
            }
            if record.size() > limits::MAX_RECORD_BYTES {
                return Err(SyncError::LimitExceeded(format!(
                    "record {} is {} bytes (max {})",
                    record.record_id,
                    record.size(),
                    limits::MAX_RECORD_BYTES
                )));
            }
        }
        Ok(())
    }
}

/// The ledger's answer to a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PushOutcome {
    /// Batch applied; the unit is now at `server_version`.
    Accepted { server_version: u64, as_of: i64 },
    /// Stale baseline; nothing applied.
    Rejected { server_version: u64 },
}

/// Ask for rows of one unit updated after `since`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub protocol_version: u8,
    pub account_id: AccountId,
    pub device_id: DeviceId,
    pub unit: EncryptionUnit,
    /// Exclusive lower bound on server update time; `None` pulls everything.
    pub since: Option<i64>,
}

/// One page of rows for a unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullResponse {
    pub unit: EncryptionUnit,
    /// Current server version of the unit.
    pub server_version: u64,
    /// Rows in server update order.
    pub records: Vec<EncryptedRecord>,
    /// Cursor to send as `since` next time.
    pub as_of: i64,
    /// More rows remain after `as_of`.
    pub has_more: bool,
}

/// A device's sync position for one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCursor {
    pub account_id: AccountId,
    pub device_id: DeviceId,
    pub unit: EncryptionUnit,
    pub last_synced_at: Option<i64>,
    pub last_known_version: u64,
}

impl SyncCursor {
    pub fn from_state(account_id: AccountId, device_id: DeviceId, state: &SyncState) -> Self {
        Self {
            account_id,
            device_id,
            unit: state.unit,
            last_synced_at: state.last_synced_at,
            last_known_version: state.server_version,
        }
    }
}

/// Serialize a message to CBOR.
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(message, &mut buf)
        .map_err(|e| SyncError::InvalidMessage(format!("encode: {e}")))?;
    Ok(buf)
}

/// Deserialize a message from CBOR.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    ciborium::from_reader(bytes).map_err(|e| SyncError::InvalidMessage(format!("decode: {e}")))
}
