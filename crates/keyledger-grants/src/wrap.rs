//! Key wrapping: seal a unit key to one recipient.
//!
//! Sealed-box construction. Each wrap uses a fresh ephemeral X25519 key;
//! the agreed secret is stretched with BLAKE3 into an XChaCha20-Poly1305
//! key, and the unit descriptor is bound as associated data so a wrapped
//! key cannot be presented as another unit's.
//!
//! One artifact wraps exactly one unit key.

use std::fmt;

use bytes::Bytes;
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    Key, XChaCha20Poly1305, XNonce,
};
use keyledger_core::{EncryptionUnit, SymmetricKey, UnitKey};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::crypto::{EphemeralKeyPair, RecipientPublicKey, RecipientSecret};
use crate::error::{GrantError, Result};

/// Wrapping algorithm of a [`WrappedKey`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum WrapAlgorithm {
    /// X25519 agreement, BLAKE3 key derivation, XChaCha20-Poly1305.
    #[default]
    #[serde(rename = "x25519-xchacha20poly1305")]
    X25519XChaCha20Poly1305 = 1,
}

impl WrapAlgorithm {
    pub const fn id(&self) -> u8 {
        *self as u8
    }

    pub fn from_id(id: u8) -> Result<Self> {
        match id {
            1 => Ok(WrapAlgorithm::X25519XChaCha20Poly1305),
            other => Err(GrantError::UnsupportedAlgorithm(other)),
        }
    }
}

/// Length of the wrap nonce in bytes.
pub const WRAP_NONCE_LEN: usize = 24;

/// A unit key sealed to one recipient public key.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrappedKey {
    /// Wrapping algorithm id.
    pub algorithm: u8,

    /// Sender's one-time public key.
    pub ephemeral_public: RecipientPublicKey,

    pub nonce: [u8; WRAP_NONCE_LEN],

    /// The 32-byte unit key plus a 16-byte tag.
    pub ciphertext: Bytes,
}

impl WrappedKey {
    pub fn algorithm(&self) -> Result<WrapAlgorithm> {
        WrapAlgorithm::from_id(self.algorithm)
    }

    /// Serialize to CBOR bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf)
            .map_err(|e| GrantError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize from CBOR bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ciborium::from_reader(bytes).map_err(|e| GrantError::Serialization(e.to_string()))
    }
}

impl fmt::Debug for WrappedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WrappedKey")
            .field("algorithm", &self.algorithm)
            .field("ephemeral_public", &self.ephemeral_public)
            .field("len", &self.ciphertext.len())
            .finish()
    }
}

/// Seal `unit_key` to `recipient`.
pub fn wrap(recipient: &RecipientPublicKey, unit_key: &UnitKey) -> Result<WrappedKey> {
    let ephemeral = EphemeralKeyPair::generate();
    let ephemeral_public = ephemeral.public_key();
    let shared = ephemeral.diffie_hellman(recipient)?;
    let wrap_key = shared.wrap_key(&ephemeral_public, recipient);

    let mut nonce = [0u8; WRAP_NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut nonce);

    let aad = unit_key.unit().descriptor();
    let ciphertext = XChaCha20Poly1305::new(Key::from_slice(wrap_key.as_bytes()))
        .encrypt(
            XNonce::from_slice(&nonce),
            Payload {
                msg: unit_key.key().as_bytes(),
                aad: aad.as_bytes(),
            },
        )
        .map_err(|_| GrantError::Encryption("key wrapping failed".into()))?;

    Ok(WrappedKey {
        algorithm: WrapAlgorithm::X25519XChaCha20Poly1305.id(),
        ephemeral_public,
        nonce,
        ciphertext: Bytes::from(ciphertext),
    })
}

/// Open `wrapped` with the recipient's secret, expecting the key of `unit`.
///
/// Wrong recipient, wrong unit, and tampering all fail as
/// [`GrantError::AuthenticationFailure`].
pub fn unwrap(
    secret: &RecipientSecret,
    wrapped: &WrappedKey,
    unit: &EncryptionUnit,
) -> Result<UnitKey> {
    wrapped.algorithm()?;
    let shared = secret
        .diffie_hellman(&wrapped.ephemeral_public)
        .map_err(|_| GrantError::AuthenticationFailure)?;
    let wrap_key = shared.wrap_key(&wrapped.ephemeral_public, &secret.public_key());

    let aad = unit.descriptor();
    let plaintext = Zeroizing::new(
        XChaCha20Poly1305::new(Key::from_slice(wrap_key.as_bytes()))
            .decrypt(
                XNonce::from_slice(&wrapped.nonce),
                Payload {
                    msg: wrapped.ciphertext.as_ref(),
                    aad: aad.as_bytes(),
                },
            )
            .map_err(|_| GrantError::AuthenticationFailure)?,
    );

    let bytes: [u8; 32] = plaintext
        .as_slice()
        .try_into()
        .map_err(|_| GrantError::AuthenticationFailure)?;
    Ok(UnitKey::from_parts(*unit, SymmetricKey::from_bytes(bytes)))
}
