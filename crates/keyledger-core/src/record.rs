//! The encrypted record row shared by device stores and the ledger.

use serde::{Deserialize, Serialize};

use crate::codec::Envelope;
use crate::period::CoarseDate;
use crate::types::{AccountId, RecordId};
use crate::unit::EncryptionUnit;

/// One opaque ciphertext row.
///
/// Everything except the envelope is plaintext metadata visible to the
/// server. Edits never mutate a row; they produce a new row with a higher
/// `data_version` under the same `record_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedRecord {
    /// Stable logical record id.
    pub record_id: RecordId,

    /// Owning account.
    pub account_id: AccountId,

    /// Unit whose key encrypted this row.
    pub unit: EncryptionUnit,

    /// Coarse date the record is about, if any. Used only for filtering.
    pub record_date: Option<CoarseDate>,

    /// The ciphertext and its nonce and algorithm.
    pub envelope: Envelope,

    /// Monotonically increasing per record id, starting at 1.
    pub data_version: u64,

    /// First creation time of the record (Unix ms).
    pub created_at: i64,

    /// Time this version was written (Unix ms).
    pub updated_at: i64,
}

impl EncryptedRecord {
    /// First version of a new record.
    pub fn new(
        record_id: RecordId,
        account_id: AccountId,
        unit: EncryptionUnit,
        record_date: Option<CoarseDate>,
        envelope: Envelope,
        now: i64,
    ) -> Self {
        Self {
            record_id,
            account_id,
            unit,
            record_date,
            envelope,
            data_version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// The next version of this record with new content.
    pub fn supersede(
        &self,
        record_date: Option<CoarseDate>,
        envelope: Envelope,
        now: i64,
    ) -> Self {
        Self {
            record_id: self.record_id,
            account_id: self.account_id.clone(),
            unit: self.unit,
            record_date,
            envelope,
            data_version: self.data_version + 1,
            created_at: self.created_at,
            updated_at: now,
        }
    }

    /// Ciphertext size in bytes.
    pub fn size(&self) -> usize {
        self.envelope.size()
    }

    pub fn nonce(&self) -> &[u8] {
        &self.envelope.nonce
    }

    /// Digest of the row's content: date, algorithm, nonce and ciphertext.
    ///
    /// Two rows with equal version but different digests are a conflict.
    pub fn content_digest(&self) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new_derive_key("keyledger-v1 record-content");
        match &self.record_date {
            Some(d) => hasher.update(d.to_string().as_bytes()),
            None => hasher.update(b"-"),
        };
        hasher.update(&[self.envelope.algorithm]);
        hasher.update(&(self.envelope.nonce.len() as u32).to_be_bytes());
        hasher.update(&self.envelope.nonce);
        hasher.update(&self.envelope.ciphertext);
        *hasher.finalize().as_bytes()
    }

    /// Whether `other` carries the same content as this row.
    pub fn same_content(&self, other: &Self) -> bool {
        self.content_digest() == other.content_digest()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn envelope(byte: u8) -> Envelope {
        Envelope {
            algorithm: 2,
            nonce: Bytes::from(vec![byte; 24]),
            ciphertext: Bytes::from(vec![byte; 40]),
        }
    }

    fn record() -> EncryptedRecord {
        EncryptedRecord::new(
            RecordId::from_bytes([1; 16]),
            AccountId::new("acct"),
            "presence/2025-Q1".parse().unwrap(),
            Some("2025-01-15".parse().unwrap()),
            envelope(1),
            1_000,
        )
    }

    #[test]
    fn test_new_record_starts_at_version_one() {
        let r = record();
        assert_eq!(r.data_version, 1);
        assert_eq!(r.size(), 40);
        assert_eq!(r.created_at, r.updated_at);
    }

    #[test]
    fn test_supersede_bumps_version_keeps_identity() {
        let r = record();
        let next = r.supersede(r.record_date, envelope(2), 2_000);
        assert_eq!(next.record_id, r.record_id);
        assert_eq!(next.data_version, 2);
        assert_eq!(next.created_at, 1_000);
        assert_eq!(next.updated_at, 2_000);
        assert!(!next.same_content(&r));
    }

    #[test]
    fn test_content_digest_ignores_timestamps() {
        let r = record();
        let mut later = r.clone();
        later.updated_at = 9_999;
        assert!(r.same_content(&later));
    }

    #[test]
    fn test_content_digest_covers_date() {
        let r = record();
        let mut undated = r.clone();
        undated.record_date = None;
        assert!(!r.same_content(&undated));
    }
}
