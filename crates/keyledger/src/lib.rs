//! # Keyledger
//!
//! A zero-knowledge record vault: structured data is encrypted on the
//! device under keys derived from one recoverable root secret, synced
//! through a server that only ever sees ciphertext, and shared with
//! advisors through time-boxed, revocable grants.
//!
//! ## Overview
//!
//! - **Derivation**: root secret → scope key → period key, all HKDF-SHA256
//! - **Records**: opaque payloads sealed with (X)ChaCha20-Poly1305, bound
//!   to their encryption unit
//! - **Sync**: version-counted pushes and cursor pulls per unit; conflict
//!   losers are kept in history
//! - **Grants**: unit keys wrapped for X25519 recipients, filtered on the
//!   server by plaintext metadata alone
//!
//! ## Usage
//!
//! ```rust,no_run
//! use keyledger::{Vault, VaultConfig};
//! use keyledger::core::{AccountId, DeviceId, RootSecret, Session};
//! use keyledger::store::SqliteStore;
//! use keyledger::sync::MemoryLedger;
//!
//! async fn example() {
//!     let secret = RootSecret::generate();
//!     let session = Session::unlock(AccountId::new("acct"), secret);
//!     let store = SqliteStore::open("device.db").unwrap();
//!
//!     let vault = Vault::new(
//!         session,
//!         DeviceId::generate(),
//!         store,
//!         MemoryLedger::shared(),
//!         VaultConfig::default(),
//!     )
//!     .await
//!     .unwrap();
//!
//!     let unit = "identity".parse().unwrap();
//!     let record = vault.write_record(unit, None, None, b"payload").await.unwrap();
//!     vault.sync().await.unwrap();
//!     let plain = vault.read_record(&record.record_id).await.unwrap();
//!     assert_eq!(plain.payload, b"payload");
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `keyledger::core` - Derivation, codec, units, records
//! - `keyledger::store` - Local storage and SQLite
//! - `keyledger::sync` - Ledger trait and reconciler
//! - `keyledger::grants` - Wrapping, grants, enforcement

pub mod advisor;
pub mod config;
pub mod error;
pub mod vault;

// Re-export component crates
pub use keyledger_core as core;
pub use keyledger_grants as grants;
pub use keyledger_store as store;
pub use keyledger_sync as sync;

// Re-export main types for convenience
pub use advisor::{serve_grant, AdvisorClient};
pub use config::VaultConfig;
pub use error::{Result, VaultError};
pub use vault::{DecryptedRecord, Vault};

pub use keyledger_core::{
    AccountId, CoarseDate, DeviceId, EncryptedRecord, EncryptionUnit, PeriodLabel, RecordId,
    RootSecret, Scope, Session,
};
pub use keyledger_grants::{
    AccessLog, AdvisorId, AnonymousCredential, Grant, GrantId, GrantRequest, Recipient,
    RecipientSecret,
};
