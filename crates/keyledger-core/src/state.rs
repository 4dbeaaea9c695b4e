//! Per-unit sync state kept by each device.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::unit::EncryptionUnit;

/// Where a unit stands in the sync cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncPhase {
    /// Local and server agree.
    Clean,
    /// Local writes not yet on the server.
    Dirty,
    /// A push was rejected or its outcome is unknown; pull before pushing.
    ConflictPending,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SyncPhase::Clean => "clean",
            SyncPhase::Dirty => "dirty",
            SyncPhase::ConflictPending => "conflict_pending",
        })
    }
}

/// Sync bookkeeping for one unit on one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    pub unit: EncryptionUnit,

    /// Count of local writes to this unit.
    pub local_version: u64,

    /// Last server version this device has seen.
    pub server_version: u64,

    /// True iff local writes exist that the server has not accepted.
    pub dirty: bool,

    /// Pull cursor: server time of the last applied pull (Unix ms).
    pub last_synced_at: Option<i64>,

    /// The next cycle must pull before pushing.
    pub conflict_pending: bool,
}

impl SyncState {
    /// Fresh, clean state for a unit never synced.
    pub fn new(unit: EncryptionUnit) -> Self {
        Self {
            unit,
            local_version: 0,
            server_version: 0,
            dirty: false,
            last_synced_at: None,
            conflict_pending: false,
        }
    }

    pub fn phase(&self) -> SyncPhase {
        if self.conflict_pending {
            SyncPhase::ConflictPending
        } else if self.dirty {
            SyncPhase::Dirty
        } else {
            SyncPhase::Clean
        }
    }

    /// A local write happened.
    pub fn record_local_write(&mut self) {
        self.local_version += 1;
        self.dirty = true;
    }

    /// The server accepted a push at `as_of` and is now at `server_version`.
    ///
    /// The baseline matched, so no foreign rows can sit between the old
    /// cursor and `as_of`; the cursor moves forward.
    pub fn record_push_accepted(&mut self, server_version: u64, as_of: i64, still_pending: bool) {
        self.server_version = server_version;
        self.last_synced_at = Some(as_of);
        self.conflict_pending = false;
        self.dirty = still_pending;
    }

    /// A push was rejected or may have landed; the next cycle pulls first.
    pub fn record_conflict(&mut self) {
        self.conflict_pending = true;
    }

    /// A pull was applied.
    pub fn record_pull(&mut self, server_version: u64, as_of: i64, still_pending: bool) {
        self.server_version = server_version;
        self.last_synced_at = Some(as_of);
        self.conflict_pending = false;
        self.dirty = still_pending;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> SyncState {
        SyncState::new("identity".parse().unwrap())
    }

    #[test]
    fn test_lifecycle_clean_dirty_clean() {
        let mut s = state();
        assert_eq!(s.phase(), SyncPhase::Clean);
        s.record_local_write();
        assert_eq!(s.phase(), SyncPhase::Dirty);
        assert_eq!(s.local_version, 1);
        s.record_push_accepted(1, 200, false);
        assert_eq!(s.phase(), SyncPhase::Clean);
        assert_eq!(s.server_version, 1);
        assert_eq!(s.last_synced_at, Some(200));
    }

    #[test]
    fn test_conflict_then_pull_then_push() {
        let mut s = state();
        s.record_local_write();
        s.record_conflict();
        assert_eq!(s.phase(), SyncPhase::ConflictPending);
        s.record_pull(3, 500, true);
        assert_eq!(s.phase(), SyncPhase::Dirty);
        assert_eq!(s.last_synced_at, Some(500));
        s.record_push_accepted(4, 600, false);
        assert_eq!(s.phase(), SyncPhase::Clean);
    }
}
