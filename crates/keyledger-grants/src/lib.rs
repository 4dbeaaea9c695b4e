//! # Keyledger Grants
//!
//! Time-boxed, revocable read access to encrypted records.
//!
//! ## Key Concepts
//!
//! - **Wrapping**: a unit key sealed to a recipient's X25519 public key
//!   ([`wrap`](wrap::wrap) / [`unwrap`](wrap::unwrap))
//! - **Grant**: one recipient, one unit, one wrapped key
//! - **Rolling window**: a series of period grants kept at a fixed length
//!   by [`GrantLifecycleManager::renew`] and
//!   [`GrantLifecycleManager::roll_forward`]
//! - **Tombstone**: permanent revocation marker
//! - **Enforcement**: [`GrantEnforcementFilter`] picks the rows a grant
//!   may serve from plaintext metadata, logging each attempt
//!
//! The server only ever stores wrapped keys; it cannot open them.

pub mod crypto;
pub mod error;
pub mod filter;
pub mod grant;
pub mod lifecycle;
pub mod registry;
pub mod wrap;

pub use crypto::{RecipientPublicKey, RecipientSecret, WRAP_KEY_CONTEXT};
pub use error::{GrantError, Result};
pub use filter::{AccessAttempt, AccessLog, AccessOutcome, DenialReason, GrantEnforcementFilter};
pub use grant::{AccessToken, AdvisorId, Grant, GrantId, Recipient, SeriesKey};
pub use lifecycle::{AnonymousCredential, GrantLifecycleManager, GrantRequest, Renewal};
pub use registry::GrantRegistry;
pub use wrap::{unwrap, wrap, WrapAlgorithm, WrappedKey};
