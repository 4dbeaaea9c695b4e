//! # Keyledger Testkit
//!
//! Testing utilities for Keyledger.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Derivation vectors**: Root secret and unit in, expected key out, for
//!   checking other clients against this one
//! - **Generators**: Proptest strategies for units, dates, and records
//! - **Fixtures**: An account with several devices on one in-memory ledger
//!
//! ## Derivation Vectors
//!
//! ```rust
//! use keyledger_testkit::vectors::verify_all_vectors;
//!
//! for (name, matches, key) in verify_all_vectors() {
//!     assert!(matches, "{name}: {key}");
//! }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use keyledger_testkit::generators::{record_from_params, RecordParams};
//!
//! proptest! {
//!     #[test]
//!     fn record_stays_in_its_unit(params: RecordParams) {
//!         let record = record_from_params(&params);
//!         prop_assert_eq!(record.unit, params.unit);
//!     }
//! }
//! ```
//!
//! ## Test Fixtures
//!
//! ```rust,ignore
//! use keyledger_testkit::fixtures::TestFixture;
//!
//! let fixture = TestFixture::new("acct");
//! let [phone, laptop]: [_; 2] = fixture.devices(2).await.try_into().unwrap();
//! ```

pub mod fixtures;
pub mod generators;
pub mod vectors;

pub use fixtures::{advisors, MemoryVault, TestAdvisor, TestFixture};
pub use generators::{record_from_params, RecordParams};
pub use vectors::{all_vectors, derive_from_vector, verify_all_vectors, DerivationVector};
