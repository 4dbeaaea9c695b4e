//! # Keyledger Store
//!
//! Device-local persistence for Keyledger. Provides a trait-based interface
//! over encrypted rows, their history, per-unit sync state and the
//! account's grants, with SQLite and in-memory implementations.
//!
//! ## Key Types
//!
//! - [`Store`] - The async trait for all storage operations
//! - [`StoreExt`] - Helpers built on the trait (supersede, dirty units)
//! - [`SqliteStore`] - SQLite-based persistent storage
//! - [`MemoryStore`] - In-memory storage for tests
//!
//! ## Usage
//!
//! ```rust,no_run
//! use keyledger_store::{SqliteStore, Store, StoreExt};
//!
//! async fn example() {
//!     let store = SqliteStore::open("device.db").unwrap();
//!     for unit in store.dirty_units().await.unwrap() {
//!         println!("{unit} has unsynced writes");
//!     }
//! }
//! ```
//!
//! The store never sees keys or plaintext. Everything it holds is either
//! ciphertext, wrapped keys, or metadata the server sees anyway.

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{InsertResult, Store, StoreExt};
