//! Record codec: authenticated encryption of single opaque payloads.
//!
//! One codec serves every record kind. The only parameter is the
//! [`UnitKey`], whose unit descriptor is bound as associated data so a
//! ciphertext cannot be replayed into another unit.
//!
//! Nonces are random. For the narrow 96-bit nonce the codec enforces a
//! per-key encryption budget; the wide 192-bit nonce has none.

use bytes::Bytes;
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce, XChaCha20Poly1305, XNonce,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::kdf::UnitKey;

/// Default per-key encryption budget for narrow nonces.
pub const DEFAULT_NARROW_NONCE_LIMIT: u64 = 4096;

/// Fraction of the budget after which re-keying is advised.
pub const DEFAULT_NONCE_WARN_RATIO: f64 = 0.8;

/// Poly1305 tag appended to every ciphertext.
pub const TAG_LEN: usize = 16;

/// AEAD algorithm of an envelope. The id travels with the ciphertext.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum Algorithm {
    /// 96-bit nonce; budgeted.
    #[serde(rename = "chacha20poly1305")]
    ChaCha20Poly1305 = 1,
    /// 192-bit nonce; default for new writes.
    #[default]
    #[serde(rename = "xchacha20poly1305")]
    XChaCha20Poly1305 = 2,
}

impl Algorithm {
    pub const fn id(&self) -> u8 {
        *self as u8
    }

    pub fn from_id(id: u8) -> Result<Self> {
        match id {
            1 => Ok(Algorithm::ChaCha20Poly1305),
            2 => Ok(Algorithm::XChaCha20Poly1305),
            other => Err(CoreError::UnsupportedAlgorithm(other)),
        }
    }

    /// Nonce length in bytes.
    pub const fn nonce_len(&self) -> usize {
        match self {
            Algorithm::ChaCha20Poly1305 => 12,
            Algorithm::XChaCha20Poly1305 => 24,
        }
    }

    pub const fn nonce_bits(&self) -> u32 {
        self.nonce_len() as u32 * 8
    }

    /// Whether random nonces of this size need a per-key budget.
    pub const fn is_narrow(&self) -> bool {
        matches!(self, Algorithm::ChaCha20Poly1305)
    }
}

/// Birthday bound on a nonce collision after `n` random nonces.
///
/// `n(n-1)/2 / 2^bits`
pub fn nonce_collision_bound(algorithm: Algorithm, n: u64) -> f64 {
    let n = n as f64;
    let pairs = n * (n - 1.0).max(0.0) / 2.0;
    pairs / 2f64.powi(algorithm.nonce_bits() as i32)
}

/// A self-describing ciphertext envelope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Envelope {
    /// Algorithm id (see [`Algorithm`]). Kept raw so unknown ids survive
    /// decoding and are rejected at decryption.
    pub algorithm: u8,

    /// Nonce used for this encryption.
    pub nonce: Bytes,

    /// Ciphertext including the authentication tag.
    pub ciphertext: Bytes,
}

impl Envelope {
    /// The algorithm, if this build knows it.
    pub fn algorithm(&self) -> Result<Algorithm> {
        Algorithm::from_id(self.algorithm)
    }

    /// Ciphertext size in bytes.
    pub fn size(&self) -> usize {
        self.ciphertext.len()
    }

    /// Serialize to CBOR bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf).map_err(|e| CoreError::Encoding(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize from CBOR bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ciborium::from_reader(bytes).map_err(|e| CoreError::Decoding(e.to_string()))
    }
}

/// Encrypts and decrypts record payloads.
#[derive(Debug, Clone)]
pub struct RecordCodec {
    algorithm: Algorithm,
    narrow_nonce_limit: u64,
    warn_ratio: f64,
}

impl Default for RecordCodec {
    fn default() -> Self {
        Self::new(Algorithm::default())
    }
}

impl RecordCodec {
    /// A codec writing new envelopes with `algorithm`.
    pub fn new(algorithm: Algorithm) -> Self {
        Self {
            algorithm,
            narrow_nonce_limit: DEFAULT_NARROW_NONCE_LIMIT,
            warn_ratio: DEFAULT_NONCE_WARN_RATIO,
        }
    }

    /// Override the narrow-nonce budget.
    pub fn with_nonce_budget(mut self, limit: u64, warn_ratio: f64) -> Self {
        self.narrow_nonce_limit = limit;
        self.warn_ratio = warn_ratio.clamp(0.0, 1.0);
        self
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn narrow_nonce_limit(&self) -> u64 {
        self.narrow_nonce_limit
    }

    /// Ciphertext size of a `plaintext_len`-byte payload.
    pub const fn ciphertext_len(plaintext_len: usize) -> usize {
        plaintext_len + TAG_LEN
    }

    /// Check whether one more encryption fits the budget, given `used`
    /// prior encryptions under the same key.
    pub fn check_budget(&self, used: u64) -> Result<()> {
        if !self.algorithm.is_narrow() {
            return Ok(());
        }
        if used >= self.narrow_nonce_limit {
            return Err(CoreError::NonceExhaustionRisk {
                used,
                limit: self.narrow_nonce_limit,
            });
        }
        if used as f64 >= self.narrow_nonce_limit as f64 * self.warn_ratio {
            tracing::warn!(
                used,
                limit = self.narrow_nonce_limit,
                "narrow nonce budget nearly spent; re-key this unit"
            );
        }
        Ok(())
    }

    /// Encrypt `plaintext` under `key`.
    ///
    /// `used` is the number of encryptions already performed under this
    /// key; it only matters for narrow nonces.
    pub fn encrypt(&self, key: &UnitKey, plaintext: &[u8], used: u64) -> Result<Envelope> {
        self.check_budget(used)?;

        let mut nonce = vec![0u8; self.algorithm.nonce_len()];
        rand::rngs::OsRng.fill_bytes(&mut nonce);

        let aad = key.unit().descriptor();
        let payload = Payload {
            msg: plaintext,
            aad: aad.as_bytes(),
        };
        let key_bytes = Key::from_slice(key.key().as_bytes());

        let ciphertext = match self.algorithm {
            Algorithm::ChaCha20Poly1305 => {
                ChaCha20Poly1305::new(key_bytes).encrypt(Nonce::from_slice(&nonce), payload)
            }
            Algorithm::XChaCha20Poly1305 => {
                XChaCha20Poly1305::new(key_bytes).encrypt(XNonce::from_slice(&nonce), payload)
            }
        }
        .map_err(|_| CoreError::Encoding("AEAD encryption failed".into()))?;

        Ok(Envelope {
            algorithm: self.algorithm.id(),
            nonce: Bytes::from(nonce),
            ciphertext: Bytes::from(ciphertext),
        })
    }

    /// Decrypt `envelope` under `key`.
    ///
    /// Any failure to authenticate is [`CoreError::AuthenticationFailure`].
    /// The envelope's own algorithm id is used, not the codec default.
    pub fn decrypt(&self, key: &UnitKey, envelope: &Envelope) -> Result<Vec<u8>> {
        let algorithm = envelope.algorithm()?;
        if envelope.nonce.len() != algorithm.nonce_len() {
            return Err(CoreError::AuthenticationFailure);
        }

        let aad = key.unit().descriptor();
        let payload = Payload {
            msg: envelope.ciphertext.as_ref(),
            aad: aad.as_bytes(),
        };
        let key_bytes = Key::from_slice(key.key().as_bytes());

        match algorithm {
            Algorithm::ChaCha20Poly1305 => ChaCha20Poly1305::new(key_bytes)
                .decrypt(Nonce::from_slice(&envelope.nonce), payload),
            Algorithm::XChaCha20Poly1305 => XChaCha20Poly1305::new(key_bytes)
                .decrypt(XNonce::from_slice(&envelope.nonce), payload),
        }
        .map_err(|_| CoreError::AuthenticationFailure)
    }
}
