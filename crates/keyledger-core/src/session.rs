//! The unlocked session: the only holder of the root secret.

use rand::RngCore;
use std::sync::{Mutex, MutexGuard};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{CoreError, Result};
use crate::kdf::{derive_scope_key, ScopeKey, UnitKey};
use crate::types::AccountId;
use crate::unit::{EncryptionUnit, Scope};

/// Minimum root secret length in bytes.
pub const MIN_SECRET_LEN: usize = 32;

/// Number of words in a recovery phrase.
pub const RECOVERY_WORDS: usize = 24;

const RECOVERY_CONTEXT: &str = "keyledger-v1 recovery-phrase";

/// The high-entropy secret every key descends from.
///
/// Memory only. Zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct RootSecret(Vec<u8>);

impl RootSecret {
    /// Wrap raw secret bytes. Must be at least [`MIN_SECRET_LEN`] bytes.
    pub fn from_bytes(mut bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() < MIN_SECRET_LEN {
            let len = bytes.len();
            bytes.zeroize();
            return Err(CoreError::InvalidSecret(format!(
                "{len} bytes, need at least {MIN_SECRET_LEN}"
            )));
        }
        Ok(Self(bytes))
    }

    /// Generate a fresh secret for a new account.
    pub fn generate() -> Self {
        let mut bytes = vec![0u8; MIN_SECRET_LEN];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Convert a 24-word recovery phrase into a secret.
    ///
    /// Case and whitespace are normalized, so `"Able  baker ..."` and
    /// `"able baker ..."` recover the same secret.
    pub fn from_recovery_phrase(phrase: &str) -> Result<Self> {
        let words: Vec<String> = phrase
            .split_whitespace()
            .map(|w| w.to_lowercase())
            .collect();
        if words.len() != RECOVERY_WORDS {
            return Err(CoreError::InvalidSecret(format!(
                "recovery phrase has {} words, expected {RECOVERY_WORDS}",
                words.len()
            )));
        }
        if words.iter().any(|w| !w.chars().all(|c| c.is_alphabetic())) {
            return Err(CoreError::InvalidSecret(
                "recovery phrase words must be alphabetic".into(),
            ));
        }
        let mut normalized = words.join(" ");
        let derived = blake3::derive_key(RECOVERY_CONTEXT, normalized.as_bytes());
        normalized.zeroize();
        for mut w in words {
            w.zeroize();
        }
        Ok(Self(derived.to_vec()))
    }

    pub(crate) fn expose(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for RootSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RootSecret(..)")
    }
}

/// An unlocked session for one account.
///
/// Derivation and [`lock`](Session::lock) share one mutex, so a derivation
/// either completes before the lock or fails with
/// [`CoreError::SessionLocked`].
pub struct Session {
    account_id: AccountId,
    secret: Mutex<Option<RootSecret>>,
}

impl Session {
    /// Open a session holding `secret`.
    pub fn unlock(account_id: AccountId, secret: RootSecret) -> Self {
        Self {
            account_id,
            secret: Mutex::new(Some(secret)),
        }
    }

    pub fn account_id(&self) -> &AccountId {
        &self.account_id
    }

    pub fn is_locked(&self) -> bool {
        self.guard().is_none()
    }

    /// Derive the scope key for `scope`.
    pub fn scope_key(&self, scope: Scope) -> Result<ScopeKey> {
        let guard = self.guard();
        let root = guard.as_ref().ok_or(CoreError::SessionLocked)?;
        Ok(derive_scope_key(root, scope))
    }

    /// Derive the record-encryption key for `unit`.
    pub fn unit_key(&self, unit: &EncryptionUnit) -> Result<UnitKey> {
        self.scope_key(unit.scope())?.unit_key(unit)
    }

    /// Scrub the root secret. Every later derivation fails.
    pub fn lock(&self) {
        let mut guard = self.guard();
        if guard.take().is_some() {
            tracing::debug!(account = %self.account_id, "session locked");
        }
    }

    fn guard(&self) -> MutexGuard<'_, Option<RootSecret>> {
        // A panic mid-derivation leaves the secret intact; keep going.
        self.secret.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("account_id", &self.account_id)
            .field("locked", &self.is_locked())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::period::PeriodLabel;

    const PHRASE: &str = "abandon ability able about above absent absorb abstract \
                          absurd abuse access accident account accuse achieve acid \
                          acoustic acquire across act action actor actress actual";

    fn session() -> Session {
        Session::unlock(
            AccountId::new("acct-1"),
            RootSecret::from_bytes(vec![7; 32]).unwrap(),
        )
    }

    #[test]
    fn test_short_secret_rejected() {
        assert!(matches!(
            RootSecret::from_bytes(vec![1; 16]),
            Err(CoreError::InvalidSecret(_))
        ));
    }

    #[test]
    fn test_recovery_phrase_normalized() {
        let a = RootSecret::from_recovery_phrase(PHRASE).unwrap();
        let shouty = PHRASE.to_uppercase().replace(' ', "   ");
        let b = RootSecret::from_recovery_phrase(&shouty).unwrap();
        assert_eq!(a.expose(), b.expose());
        assert_eq!(a.expose().len(), 32);
    }

    #[test]
    fn test_recovery_phrase_word_count() {
        assert!(RootSecret::from_recovery_phrase("abandon ability able").is_err());
    }

    #[test]
    fn test_unit_key_matches_scope_key_path() {
        let s = session();
        let period: PeriodLabel = "2025-Q1".parse().unwrap();
        let unit = EncryptionUnit::temporal(Scope::Presence, period).unwrap();
        let via_unit = s.unit_key(&unit).unwrap();
        let via_scope = s.scope_key(Scope::Presence).unwrap().period_key(&period).unwrap();
        assert_eq!(via_unit.key().as_bytes(), via_scope.key().as_bytes());
        assert_eq!(via_unit.unit(), &unit);
    }

    #[test]
    fn test_lock_blocks_derivation() {
        let s = session();
        assert!(!s.is_locked());
        s.lock();
        assert!(s.is_locked());
        assert!(matches!(
            s.scope_key(Scope::Identity),
            Err(CoreError::SessionLocked)
        ));
        // Locking twice is harmless.
        s.lock();
    }

    #[test]
    fn test_lock_racing_derivation() {
        use std::sync::{Arc, Barrier};
        use std::thread;

        let s = Arc::new(session());
        let unit: EncryptionUnit = "identity".parse().unwrap();
        let expected = *s.unit_key(&unit).unwrap().key().as_bytes();
        let start = Arc::new(Barrier::new(2));

        let deriver = {
            let (s, start) = (Arc::clone(&s), Arc::clone(&start));
            thread::spawn(move || {
                start.wait();
                let mut seen_locked = false;
                for _ in 0..2_000 {
                    match s.unit_key(&unit) {
                        Ok(key) => {
                            // Once locked, never unlocked again.
                            assert!(!seen_locked, "derived a key after the lock");
                            assert_eq!(key.key().as_bytes(), &expected);
                        }
                        Err(CoreError::SessionLocked) => seen_locked = true,
                        Err(other) => panic!("unexpected error {other:?}"),
                    }
                }
            })
        };

        start.wait();
        s.lock();
        deriver.join().unwrap();

        assert!(matches!(s.unit_key(&unit), Err(CoreError::SessionLocked)));
        assert!(matches!(s.scope_key(Scope::Documents), Err(CoreError::SessionLocked)));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let secret = RootSecret::from_bytes(vec![0xee; 32]).unwrap();
        assert_eq!(format!("{:?}", secret), "RootSecret(..)");
    }
}
