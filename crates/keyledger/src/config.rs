//! Vault configuration.

use keyledger_core::codec::{DEFAULT_NARROW_NONCE_LIMIT, DEFAULT_NONCE_WARN_RATIO};
use keyledger_core::{Algorithm, RecordCodec};
use keyledger_sync::SyncConfig;
use serde::{Deserialize, Serialize};

use crate::error::{Result, VaultError};

/// Configuration for a [`Vault`](crate::Vault).
///
/// Every field has a default; JSON overrides may name any subset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Algorithm for new envelopes. Old envelopes keep their own.
    pub algorithm: Algorithm,
    /// Encryptions allowed under one key with narrow nonces.
    pub narrow_nonce_limit: u64,
    /// Fraction of the budget at which re-keying is advised.
    pub nonce_warn_ratio: f64,
    /// Window length for rolling grants that do not name one.
    pub default_window_length: u32,
    /// Sync configuration.
    pub sync: SyncConfig,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::default(),
            narrow_nonce_limit: DEFAULT_NARROW_NONCE_LIMIT,
            nonce_warn_ratio: DEFAULT_NONCE_WARN_RATIO,
            default_window_length: 4,
            sync: SyncConfig::default(),
        }
    }
}

impl VaultConfig {
    /// Load overrides from JSON; missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| VaultError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.narrow_nonce_limit == 0 {
            return Err(VaultError::Config("narrow_nonce_limit must be positive".into()));
        }
        if !(self.nonce_warn_ratio > 0.0 && self.nonce_warn_ratio <= 1.0) {
            return Err(VaultError::Config(format!(
                "nonce_warn_ratio {} is outside (0, 1]",
                self.nonce_warn_ratio
            )));
        }
        if self.default_window_length == 0 {
            return Err(VaultError::Config("default_window_length must be positive".into()));
        }
        if self.sync.max_push_attempts == 0 {
            return Err(VaultError::Config("sync.max_push_attempts must be positive".into()));
        }
        if self.sync.max_records_per_push == 0 {
            return Err(VaultError::Config("sync.max_records_per_push must be positive".into()));
        }
        Ok(())
    }

    /// The record codec this configuration describes.
    pub fn codec(&self) -> RecordCodec {
        RecordCodec::new(self.algorithm)
            .with_nonce_budget(self.narrow_nonce_limit, self.nonce_warn_ratio)
    }
}
