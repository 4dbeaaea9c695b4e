//! Test fixtures and helpers.
//!
//! One account, several devices, one shared in-memory ledger.

use std::sync::Arc;

use keyledger::{Vault, VaultConfig};
use keyledger_core::{AccountId, DeviceId, RootSecret, Session};
use keyledger_grants::{AdvisorId, Recipient, RecipientSecret};
use keyledger_store::MemoryStore;
use keyledger_sync::MemoryLedger;

/// A vault backed by memory on both sides.
pub type MemoryVault = Vault<MemoryStore, Arc<MemoryLedger>>;

/// An account with a fixed root secret and a shared ledger.
pub struct TestFixture {
    pub account_id: AccountId,
    pub secret: [u8; 32],
    pub ledger: Arc<MemoryLedger>,
    pub config: VaultConfig,
}

impl TestFixture {
    /// Create a fixture with a seed derived from `account`.
    pub fn new(account: &str) -> Self {
        let mut secret = [0u8; 32];
        for (i, b) in account.bytes().enumerate() {
            secret[i % 32] ^= b;
        }
        Self::with_secret(account, secret)
    }

    pub fn with_secret(account: &str, secret: [u8; 32]) -> Self {
        Self {
            account_id: AccountId::new(account),
            secret,
            ledger: MemoryLedger::shared(),
            config: VaultConfig::default(),
        }
    }

    /// Replace the vault config used by later [`Self::device`] calls.
    pub fn with_config(mut self, config: VaultConfig) -> Self {
        self.config = config;
        self
    }

    /// An unlocked session for the account.
    pub fn session(&self) -> Session {
        Session::unlock(
            self.account_id.clone(),
            RootSecret::from_bytes(self.secret.to_vec()).expect("32 bytes is a valid secret"),
        )
    }

    /// A new device with its own empty store.
    ///
    /// It starts out holding every grant already on the ledger.
    pub async fn device(&self, n: u8) -> MemoryVault {
        Vault::new(
            self.session(),
            DeviceId::from_bytes([n; 16]),
            MemoryStore::new(),
            Arc::clone(&self.ledger),
            self.config.clone(),
        )
        .await
        .expect("fixture config is valid")
    }

    /// `count` devices sharing the ledger.
    pub async fn devices(&self, count: u8) -> Vec<MemoryVault> {
        let mut devices = Vec::with_capacity(count as usize);
        for n in 1..=count {
            devices.push(self.device(n).await);
        }
        devices
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new("acct")
    }
}

/// An advisor identity with a fresh key pair.
pub struct TestAdvisor {
    pub recipient: Recipient,
    pub secret: RecipientSecret,
}

impl TestAdvisor {
    pub fn new(name: &str) -> Self {
        Self {
            recipient: Recipient::Advisor(AdvisorId::new(name)),
            secret: RecipientSecret::generate(),
        }
    }
}

/// Create advisors named `advisor-0`, `advisor-1`, ...
pub fn advisors(count: usize) -> Vec<TestAdvisor> {
    (0..count)
        .map(|i| TestAdvisor::new(&format!("advisor-{i}")))
        .collect()
}
