//! # Keyledger Sync
//!
//! Reconciles a device's local store with the remote ledger, one
//! encryption unit at a time.
//!
//! ## Overview
//!
//! The ledger is an untrusted server holding opaque rows plus plaintext
//! metadata. Devices push pending rows against the last server version
//! they saw; the ledger applies a push iff that baseline is current, then
//! increments the unit's version. Devices pull rows changed since their
//! cursor and merge them by data version.
//!
//! ## Key Properties
//!
//! - **Atomic pushes**: a stale push is rejected whole, never partially applied
//! - **No lost edits**: conflict losers go to the history ledger
//! - **Safe after ambiguity**: an unknown push outcome forces a pull first
//! - **Keyless**: nothing here can decrypt a row
//!
//! ## Usage
//!
//! ```rust,no_run
//! use keyledger_core::{AccountId, DeviceId};
//! use keyledger_store::MemoryStore;
//! use keyledger_sync::{MemoryLedger, SyncConfig, SyncReconciler};
//!
//! async fn example() {
//!     let ledger = MemoryLedger::shared();
//!     let device = SyncReconciler::new(
//!         MemoryStore::new(),
//!         ledger,
//!         AccountId::new("acct"),
//!         DeviceId::generate(),
//!         SyncConfig::default(),
//!     );
//!     let report = device.sync_all().await.unwrap();
//!     println!("synced {} units", report.units.len());
//! }
//! ```

pub mod convergence;
pub mod error;
pub mod ledger;
pub mod messages;
pub mod reconciler;

pub use convergence::{unit_digest, verify_convergence, ConvergenceResult};
pub use error::{Result, SyncError};
pub use ledger::{memory::MemoryLedger, Ledger};
pub use messages::{
    limits, PullRequest, PullResponse, PushOutcome, PushRequest, SyncCursor, PROTOCOL_VERSION,
};
pub use reconciler::{CancelHandle, SyncConfig, SyncReconciler, SyncReport, UnitOutcome};
