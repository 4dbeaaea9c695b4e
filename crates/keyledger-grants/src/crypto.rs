//! Recipient key material for wrapping unit keys.
//!
//! Advisors (and anonymous token holders) hold an X25519 secret; grants
//! are sealed to the matching public key.

use std::fmt;

use keyledger_core::SymmetricKey;
use serde::{Deserialize, Serialize};
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{GrantError, Result};

/// BLAKE3 context for turning a key agreement into a wrapping key.
pub const WRAP_KEY_CONTEXT: &str = "keyledger-grants-v1 wrap-key";

/// An X25519 public key (32 bytes) a grant is sealed to.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecipientPublicKey(pub [u8; 32]);

impl RecipientPublicKey {
    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    fn to_dalek(self) -> PublicKey {
        PublicKey::from(self.0)
    }
}

impl From<PublicKey> for RecipientPublicKey {
    fn from(pk: PublicKey) -> Self {
        Self(*pk.as_bytes())
    }
}

impl fmt::Debug for RecipientPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecipientPublicKey({})", &self.to_hex()[..16])
    }
}

/// A recipient's long-term X25519 secret. Zeroized on drop.
pub struct RecipientSecret(StaticSecret);

impl RecipientSecret {
    /// Generate a new random secret.
    pub fn generate() -> Self {
        Self(StaticSecret::random_from_rng(rand::rngs::OsRng))
    }

    /// Create from seed bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(StaticSecret::from(bytes))
    }

    /// Raw secret bytes, for handing a credential out-of-band.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    /// Derive the public key.
    pub fn public_key(&self) -> RecipientPublicKey {
        RecipientPublicKey::from(PublicKey::from(&self.0))
    }

    /// Key agreement with the sender's ephemeral public key.
    pub(crate) fn diffie_hellman(&self, peer: &RecipientPublicKey) -> Result<SharedKey> {
        SharedKey::checked(self.0.diffie_hellman(&peer.to_dalek()))
    }
}

impl fmt::Debug for RecipientSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecipientSecret")
            .field("public", &self.public_key())
            .finish_non_exhaustive()
    }
}

/// Ephemeral key pair for a single wrap.
pub(crate) struct EphemeralKeyPair {
    secret: EphemeralSecret,
    public: RecipientPublicKey,
}

impl EphemeralKeyPair {
    pub(crate) fn generate() -> Self {
        let secret = EphemeralSecret::random_from_rng(rand::rngs::OsRng);
        let public = RecipientPublicKey::from(PublicKey::from(&secret));
        Self { secret, public }
    }

    pub(crate) fn public_key(&self) -> RecipientPublicKey {
        self.public
    }

    /// Consumes the ephemeral secret; it can only be used once.
    pub(crate) fn diffie_hellman(self, peer: &RecipientPublicKey) -> Result<SharedKey> {
        SharedKey::checked(self.secret.diffie_hellman(&peer.to_dalek()))
    }
}

/// Output of X25519 key agreement.
#[derive(Zeroize, ZeroizeOnDrop)]
pub(crate) struct SharedKey([u8; 32]);

impl SharedKey {
    fn checked(shared: x25519_dalek::SharedSecret) -> Result<Self> {
        // Low-order peer points yield an all-zero secret anyone can compute.
        if !shared.was_contributory() {
            return Err(GrantError::InvalidRequest(
                "recipient public key is a low-order point".into(),
            ));
        }
        Ok(Self(*shared.as_bytes()))
    }

    /// The wrapping key for one (ephemeral, recipient) pair.
    pub(crate) fn wrap_key(
        &self,
        ephemeral: &RecipientPublicKey,
        recipient: &RecipientPublicKey,
    ) -> SymmetricKey {
        let mut hasher = blake3::Hasher::new_derive_key(WRAP_KEY_CONTEXT);
        hasher.update(&self.0);
        hasher.update(ephemeral.as_bytes());
        hasher.update(recipient.as_bytes());
        SymmetricKey::from_bytes(*hasher.finalize().as_bytes())
    }
}
