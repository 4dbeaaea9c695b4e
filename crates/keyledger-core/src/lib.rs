//! # Keyledger Core
//!
//! Pure primitives for Keyledger: key derivation, the record codec, and the
//! plaintext metadata that travels next to ciphertext.
//!
//! This crate contains no I/O, no storage, no networking.
//!
//! ## Key Types
//!
//! - [`Session`] - Holds the [`RootSecret`] while unlocked
//! - [`EncryptionUnit`] - A scope plus optional period; names one key
//! - [`UnitKey`] - The key encrypting every record of one unit
//! - [`RecordCodec`] - AEAD over opaque payloads, producing [`Envelope`]s
//! - [`EncryptedRecord`] - The ciphertext row stored locally and remotely
//! - [`SyncState`] - Per-unit sync bookkeeping
//!
//! ## Derivation
//!
//! See the [`kdf`] module for the derivation tree.

pub mod codec;
pub mod error;
pub mod kdf;
pub mod period;
pub mod record;
pub mod session;
pub mod state;
pub mod types;
pub mod unit;

pub use codec::{nonce_collision_bound, Algorithm, Envelope, RecordCodec, TAG_LEN};
pub use error::{CoreError, Result};
pub use kdf::{derive, KeyPath, ScopeKey, SymmetricKey, UnitKey};
pub use period::{CoarseDate, PeriodLabel};
pub use record::EncryptedRecord;
pub use session::{RootSecret, Session};
pub use state::{SyncPhase, SyncState};
pub use types::{now_millis, AccountId, DeviceId, RecordId};
pub use unit::{EncryptionUnit, Scope};
