//! SQLite implementation of the Store trait.
//!
//! The persistent device store. Uses rusqlite with bundled SQLite, wrapped
//! in async via `tokio::task::spawn_blocking`.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};

use keyledger_core::{
    now_millis, AccountId, EncryptedRecord, EncryptionUnit, Envelope, RecordId, SyncState,
};
use keyledger_grants::{Grant, GrantId};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::{InsertResult, Store};

const RECORD_COLUMNS: &str = "record_id, account_id, unit, record_date, algorithm, nonce, \
                              ciphertext, data_version, created_at, updated_at";

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| StoreError::LockPoisoned(e.to_string()))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

fn conversion_err<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

// Helper to convert a row (selected with RECORD_COLUMNS) to a record.
fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<EncryptedRecord> {
    let id_bytes: Vec<u8> = row.get("record_id")?;
    let unit: String = row.get("unit")?;
    let record_date: Option<String> = row.get("record_date")?;
    let nonce: Vec<u8> = row.get("nonce")?;
    let ciphertext: Vec<u8> = row.get("ciphertext")?;
    let data_version: i64 = row.get("data_version")?;

    Ok(EncryptedRecord {
        record_id: RecordId::try_from(id_bytes.as_slice()).map_err(|e| conversion_err(0, e))?,
        account_id: AccountId::new(row.get::<_, String>("account_id")?),
        unit: unit.parse().map_err(|e| conversion_err(2, e))?,
        record_date: record_date
            .map(|d| d.parse())
            .transpose()
            .map_err(|e| conversion_err(3, e))?,
        envelope: Envelope {
            algorithm: row.get("algorithm")?,
            nonce: Bytes::from(nonce),
            ciphertext: Bytes::from(ciphertext),
        },
        data_version: data_version as u64,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn row_to_state(row: &rusqlite::Row<'_>) -> rusqlite::Result<SyncState> {
    let unit: String = row.get("unit")?;
    Ok(SyncState {
        unit: unit.parse().map_err(|e| conversion_err(0, e))?,
        local_version: row.get::<_, i64>("local_version")? as u64,
        server_version: row.get::<_, i64>("server_version")? as u64,
        dirty: row.get("dirty")?,
        last_synced_at: row.get("last_synced_at")?,
        conflict_pending: row.get("conflict_pending")?,
    })
}

fn decode_grant(body: &[u8]) -> Result<Grant> {
    Grant::from_bytes(body).map_err(|e| StoreError::InvalidData(format!("grant: {e}")))
}

#[async_trait]
impl Store for SqliteStore {
    async fn put_record(&self, record: &EncryptedRecord, pending: bool) -> Result<()> {
        let r = record.clone();
        self.run(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO records (
                    record_id, account_id, unit, record_date, algorithm, nonce,
                    ciphertext, size, data_version, created_at, updated_at, pending
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    r.record_id.as_bytes().as_slice(),
                    r.account_id.as_str(),
                    r.unit.descriptor(),
                    r.record_date.map(|d| d.to_string()),
                    r.envelope.algorithm,
                    r.envelope.nonce.as_ref(),
                    r.envelope.ciphertext.as_ref(),
                    r.size() as i64,
                    r.data_version as i64,
                    r.created_at,
                    r.updated_at,
                    pending,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_record(&self, id: &RecordId) -> Result<Option<EncryptedRecord>> {
        let id = *id;
        self.run(move |conn| {
            let sql = format!("SELECT {RECORD_COLUMNS} FROM records WHERE record_id = ?1");
            Ok(conn
                .query_row(&sql, params![id.as_bytes().as_slice()], row_to_record)
                .optional()?)
        })
        .await
    }

    async fn records_in_unit(&self, unit: &EncryptionUnit) -> Result<Vec<EncryptedRecord>> {
        let unit = unit.descriptor();
        self.run(move |conn| {
            let sql = format!(
                "SELECT {RECORD_COLUMNS} FROM records WHERE unit = ?1 ORDER BY record_id"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![unit], row_to_record)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    async fn pending_records(&self, unit: &EncryptionUnit) -> Result<Vec<EncryptedRecord>> {
        let unit = unit.descriptor();
        self.run(move |conn| {
            let sql = format!(
                "SELECT {RECORD_COLUMNS} FROM records
                 WHERE unit = ?1 AND pending = 1 ORDER BY record_id"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![unit], row_to_record)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    async fn clear_pending(&self, accepted: &[(RecordId, u64)]) -> Result<()> {
        let accepted = accepted.to_vec();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "UPDATE records SET pending = 0 WHERE record_id = ?1 AND data_version = ?2",
                )?;
                for (id, version) in &accepted {
                    stmt.execute(params![id.as_bytes().as_slice(), *version as i64])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn append_history(&self, record: &EncryptedRecord) -> Result<InsertResult> {
        let r = record.clone();
        self.run(move |conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO record_history (
                    record_id, account_id, unit, record_date, algorithm, nonce,
                    ciphertext, size, data_version, created_at, updated_at, archived_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    r.record_id.as_bytes().as_slice(),
                    r.account_id.as_str(),
                    r.unit.descriptor(),
                    r.record_date.map(|d| d.to_string()),
                    r.envelope.algorithm,
                    r.envelope.nonce.as_ref(),
                    r.envelope.ciphertext.as_ref(),
                    r.size() as i64,
                    r.data_version as i64,
                    r.created_at,
                    r.updated_at,
                    now_millis(),
                ],
            )?;
            Ok(if inserted == 0 {
                InsertResult::AlreadyExists
            } else {
                InsertResult::Inserted
            })
        })
        .await
    }

    async fn history(&self, id: &RecordId) -> Result<Vec<EncryptedRecord>> {
        let id = *id;
        self.run(move |conn| {
            let sql = format!(
                "SELECT {RECORD_COLUMNS} FROM record_history
                 WHERE record_id = ?1 ORDER BY data_version, nonce"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![id.as_bytes().as_slice()], row_to_record)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    async fn count_encryptions(&self, unit: &EncryptionUnit) -> Result<u64> {
        let unit = unit.descriptor();
        self.run(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT (SELECT COUNT(*) FROM records WHERE unit = ?1)
                      + (SELECT COUNT(*) FROM record_history WHERE unit = ?1)",
                params![unit],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
        .await
    }

    async fn get_sync_state(&self, unit: &EncryptionUnit) -> Result<Option<SyncState>> {
        let unit = unit.descriptor();
        self.run(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT unit, local_version, server_version, dirty, last_synced_at,
                            conflict_pending
                     FROM sync_states WHERE unit = ?1",
                    params![unit],
                    row_to_state,
                )
                .optional()?)
        })
        .await
    }

    async fn upsert_sync_state(&self, state: &SyncState) -> Result<()> {
        let s = state.clone();
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO sync_states (
                    unit, local_version, server_version, dirty, last_synced_at,
                    conflict_pending
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(unit) DO UPDATE SET
                    local_version = excluded.local_version,
                    server_version = excluded.server_version,
                    dirty = excluded.dirty,
                    last_synced_at = excluded.last_synced_at,
                    conflict_pending = excluded.conflict_pending",
                params![
                    s.unit.descriptor(),
                    s.local_version as i64,
                    s.server_version as i64,
                    s.dirty,
                    s.last_synced_at,
                    s.conflict_pending,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn list_sync_states(&self) -> Result<Vec<SyncState>> {
        let mut states = self
            .run(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT unit, local_version, server_version, dirty, last_synced_at,
                            conflict_pending
                     FROM sync_states",
                )?;
                let rows = stmt
                    .query_map([], row_to_state)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;
        states.sort_by_key(|s| s.unit);
        Ok(states)
    }

    async fn put_grant(&self, grant: &Grant) -> Result<()> {
        let body = grant
            .to_bytes()
            .map_err(|e| StoreError::InvalidData(format!("grant: {e}")))?;
        let (id, account, unit) = (grant.id, grant.account_id.clone(), grant.unit);
        let (tombstoned_at, created_at) = (grant.tombstoned_at, grant.created_at);
        self.run(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO grants (
                    grant_id, account_id, unit, tombstoned_at, created_at, body
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    id.0.as_slice(),
                    account.as_str(),
                    unit.descriptor(),
                    tombstoned_at,
                    created_at,
                    body,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_grant(&self, id: &GrantId) -> Result<Option<Grant>> {
        let id = *id;
        let body: Option<Vec<u8>> = self
            .run(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT body FROM grants WHERE grant_id = ?1",
                        params![id.0.as_slice()],
                        |row| row.get(0),
                    )
                    .optional()?)
            })
            .await?;
        body.as_deref().map(decode_grant).transpose()
    }

    async fn list_grants(&self) -> Result<Vec<Grant>> {
        let bodies: Vec<Vec<u8>> = self
            .run(|conn| {
                let mut stmt =
                    conn.prepare("SELECT body FROM grants ORDER BY created_at, grant_id")?;
                let rows = stmt
                    .query_map([], |row| row.get(0))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;
        bodies.iter().map(|b| decode_grant(b)).collect()
    }
}
