//! Scopes and encryption units.
//!
//! An [`EncryptionUnit`] names exactly one derived key: a scope, plus a
//! period label when the scope is temporal. Every record kind is encrypted
//! through the same codec, parameterized only by its unit.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;
use crate::period::PeriodLabel;

/// A named category of data with its own key-derivation branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Day-by-day location presence. Temporal.
    Presence,
    /// Residency determinations per period. Temporal.
    Residency,
    /// Identity attributes. Not temporal.
    Identity,
    /// Supporting documents. Not temporal.
    Documents,
}

impl Scope {
    /// All known scopes.
    pub const ALL: [Scope; 4] = [
        Scope::Presence,
        Scope::Residency,
        Scope::Identity,
        Scope::Documents,
    ];

    /// Stable name used in key paths and storage.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Scope::Presence => "presence",
            Scope::Residency => "residency",
            Scope::Identity => "identity",
            Scope::Documents => "documents",
        }
    }

    /// Whether keys for this scope are partitioned by period.
    pub const fn is_temporal(&self) -> bool {
        matches!(self, Scope::Presence | Scope::Residency)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Scope::ALL
            .into_iter()
            .find(|scope| scope.as_str() == s)
            .ok_or_else(|| CoreError::UnknownScope(s.to_string()))
    }
}

/// The (scope, period-or-null) pair identifying one record-encryption key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EncryptionUnit {
    scope: Scope,
    period: Option<PeriodLabel>,
}

impl EncryptionUnit {
    /// Build a unit, enforcing that temporal scopes carry a period and
    /// non-temporal scopes do not.
    pub fn new(scope: Scope, period: Option<PeriodLabel>) -> Result<Self, CoreError> {
        match (scope.is_temporal(), period) {
            (true, None) => Err(CoreError::InvalidUnit(format!(
                "scope {scope} is temporal and needs a period"
            ))),
            (false, Some(p)) => Err(CoreError::InvalidUnit(format!(
                "scope {scope} is not temporal but got period {p}"
            ))),
            _ => Ok(Self { scope, period }),
        }
    }

    /// A unit for a temporal scope and period.
    pub fn temporal(scope: Scope, period: PeriodLabel) -> Result<Self, CoreError> {
        Self::new(scope, Some(period))
    }

    /// A unit for a non-temporal scope.
    pub fn scoped(scope: Scope) -> Result<Self, CoreError> {
        Self::new(scope, None)
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn period(&self) -> Option<PeriodLabel> {
        self.period
    }

    /// The same scope moved to another period.
    pub fn with_period(&self, period: PeriodLabel) -> Result<Self, CoreError> {
        Self::temporal(self.scope, period)
    }

    /// Canonical descriptor, `scope` or `scope/YYYY-Qn`.
    ///
    /// Bound into AEAD associated data and used as a storage key.
    pub fn descriptor(&self) -> String {
        match self.period {
            Some(p) => format!("{}/{}", self.scope, p),
            None => self.scope.to_string(),
        }
    }
}

impl fmt::Display for EncryptionUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.descriptor())
    }
}

impl fmt::Debug for EncryptionUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncryptionUnit({})", self.descriptor())
    }
}

impl FromStr for EncryptionUnit {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((scope, period)) => Self::new(scope.parse()?, Some(period.parse()?)),
            None => Self::new(s.parse()?, None),
        }
    }
}
