//! The key derivation tree.
//!
//! Every record key descends from the root secret along a path:
//!
//! ```text
//! RootSecret ──["scope", name]──────────────▶ ScopeKey
//! ScopeKey   ──["scope", name, "YYYY-Qn"]──▶ PeriodKey   (temporal scopes)
//! ```
//!
//! Each edge is one HKDF-SHA256 extract-then-expand with a fixed domain
//! salt and the serialized path as `info`. Period keys are derived from the
//! scope key, not from the root, so a scope-key holder can produce period
//! keys without the root secret, and a period key reveals nothing upward.
//!
//! Paths are serialized as a segment count followed by length-prefixed
//! segments, so no two distinct paths share an encoding.

use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{CoreError, Result};
use crate::period::PeriodLabel;
use crate::session::RootSecret;
use crate::unit::{EncryptionUnit, Scope};

/// HKDF salt shared by every derivation edge.
pub const KDF_DOMAIN: &[u8] = b"keyledger-kdf-v1";

/// Length of every derived key in bytes.
pub const KEY_LEN: usize = 32;

/// Longest permitted path segment in bytes.
pub const MAX_SEGMENT_LEN: usize = 255;

/// A validated derivation path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyPath(Vec<String>);

impl KeyPath {
    /// Build a path, rejecting empty paths and empty or oversized segments.
    pub fn new<I, S>(segments: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        if segments.is_empty() {
            return Err(CoreError::Derivation("path is empty".into()));
        }
        for (i, segment) in segments.iter().enumerate() {
            if segment.is_empty() {
                return Err(CoreError::Derivation(format!("segment {i} is empty")));
            }
            if segment.len() > MAX_SEGMENT_LEN {
                return Err(CoreError::Derivation(format!(
                    "segment {i} is {} bytes (max {MAX_SEGMENT_LEN})",
                    segment.len()
                )));
            }
        }
        Ok(Self(segments))
    }

    /// `["scope", scope]`.
    pub fn scope(scope: Scope) -> Self {
        Self(vec!["scope".into(), scope.as_str().into()])
    }

    /// `["scope", scope, period]`.
    pub fn period(scope: Scope, period: &PeriodLabel) -> Self {
        Self(vec![
            "scope".into(),
            scope.as_str().into(),
            period.to_string(),
        ])
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Unambiguous byte encoding fed to HKDF as `info`.
    ///
    /// `u32-BE count || (u32-BE len || bytes)*`
    pub fn encode(&self) -> Vec<u8> {
        let len: usize = self.0.iter().map(|s| 4 + s.len()).sum();
        let mut out = Vec::with_capacity(4 + len);
        out.extend_from_slice(&(self.0.len() as u32).to_be_bytes());
        for segment in &self.0 {
            out.extend_from_slice(&(segment.len() as u32).to_be_bytes());
            out.extend_from_slice(segment.as_bytes());
        }
        out
    }
}

/// A 256-bit symmetric key. Zeroized on drop; never printed.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; KEY_LEN]);

impl SymmetricKey {
    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Generate a random key. Used for tests and throwaway wrapping.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// Short public fingerprint, safe to log.
    pub fn fingerprint(&self) -> String {
        let digest = blake3::derive_key("keyledger-v1 key-fingerprint", &self.0);
        hex::encode(&digest[..6])
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SymmetricKey(fp:{})", self.fingerprint())
    }
}

/// One extract-then-expand edge of the tree.
fn hkdf_edge(ikm: &[u8], path: &KeyPath) -> SymmetricKey {
    let hk = Hkdf::<Sha256>::new(Some(KDF_DOMAIN), ikm);
    let mut okm = [0u8; KEY_LEN];
    hk.expand(&path.encode(), &mut okm)
        .expect("32-byte output is within HKDF-SHA256 limits");
    let key = SymmetricKey(okm);
    okm.zeroize();
    key
}

/// Derive the key at `path` directly from the root secret.
pub fn derive(root: &RootSecret, path: &KeyPath) -> SymmetricKey {
    hkdf_edge(root.expose(), path)
}

/// Derive the scope key for `scope`.
///
/// Only the session calls this; scope keys never leave the device.
pub(crate) fn derive_scope_key(root: &RootSecret, scope: Scope) -> ScopeKey {
    ScopeKey {
        scope,
        key: derive(root, &KeyPath::scope(scope)),
    }
}

/// A scope-level key. Held only by the session holder.
pub struct ScopeKey {
    scope: Scope,
    key: SymmetricKey,
}

impl ScopeKey {
    pub fn scope(&self) -> Scope {
        self.scope
    }

    /// Second-stage derivation: the period key for `period`.
    pub fn period_key(&self, period: &PeriodLabel) -> Result<UnitKey> {
        let unit = EncryptionUnit::temporal(self.scope, *period)?;
        Ok(UnitKey {
            unit,
            key: hkdf_edge(self.key.as_bytes(), &KeyPath::period(self.scope, period)),
        })
    }

    /// The record-encryption key for `unit`.
    ///
    /// Temporal units get their period key; non-temporal units use the
    /// scope key itself.
    pub fn unit_key(&self, unit: &EncryptionUnit) -> Result<UnitKey> {
        if unit.scope() != self.scope {
            return Err(CoreError::InvalidUnit(format!(
                "unit {unit} is not under scope {}",
                self.scope
            )));
        }
        match unit.period() {
            Some(period) => self.period_key(&period),
            None => Ok(UnitKey {
                unit: *unit,
                key: self.key.clone(),
            }),
        }
    }
}

impl fmt::Debug for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeKey")
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

/// The key that encrypts every record of one [`EncryptionUnit`].
///
/// This is what the codec consumes and what grants wrap for advisors.
#[derive(Clone)]
pub struct UnitKey {
    unit: EncryptionUnit,
    key: SymmetricKey,
}

impl UnitKey {
    /// Reassemble a unit key, e.g. after unwrapping a grant.
    pub fn from_parts(unit: EncryptionUnit, key: SymmetricKey) -> Self {
        Self { unit, key }
    }

    pub fn unit(&self) -> &EncryptionUnit {
        &self.unit
    }

    pub fn key(&self) -> &SymmetricKey {
        &self.key
    }
}

impl fmt::Debug for UnitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitKey")
            .field("unit", &self.unit)
            .field("key", &self.key)
            .finish()
    }
}
