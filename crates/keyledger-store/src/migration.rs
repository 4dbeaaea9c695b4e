//! Database schema migrations for SQLite.
//!
//! Each migration is a SQL batch that moves the schema from version N to
//! N+1. Applied versions are recorded in `schema_migrations`.

use rusqlite::Connection;

use keyledger_core::now_millis;

use crate::error::{Result, StoreError};

/// Current schema version.
pub const CURRENT_VERSION: u32 = 2;

/// Initialize or migrate the database schema.
///
/// Idempotent: safe to call on every open.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    if current > CURRENT_VERSION {
        return Err(StoreError::Migration(format!(
            "database is at version {current}, this build knows up to {CURRENT_VERSION}"
        )));
    }

    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;
        for version in (current + 1)..=CURRENT_VERSION {
            apply_migration(&tx, version)?;
            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, now_millis()],
            )?;
            tracing::debug!(version, "applied store migration");
        }
        tx.commit()?;
    }

    Ok(())
}

fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        2 => apply_v2(conn),
        _ => Err(StoreError::Migration(format!(
            "unknown migration version: {version}"
        ))),
    }
}

/// Migration v1: initial schema.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Current row of every record
        CREATE TABLE records (
            record_id BLOB PRIMARY KEY,       -- 16 bytes
            account_id TEXT NOT NULL,
            unit TEXT NOT NULL,               -- "scope" or "scope/YYYY-Qn"
            record_date TEXT,                 -- YYYY-MM-DD, nullable
            algorithm INTEGER NOT NULL,
            nonce BLOB NOT NULL,
            ciphertext BLOB NOT NULL,
            size INTEGER NOT NULL,
            data_version INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            pending INTEGER NOT NULL DEFAULT 0
        );

        -- Superseded and conflict-losing rows, never deleted
        CREATE TABLE record_history (
            record_id BLOB NOT NULL,
            account_id TEXT NOT NULL,
            unit TEXT NOT NULL,
            record_date TEXT,
            algorithm INTEGER NOT NULL,
            nonce BLOB NOT NULL,
            ciphertext BLOB NOT NULL,
            size INTEGER NOT NULL,
            data_version INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            archived_at INTEGER NOT NULL,
            PRIMARY KEY (record_id, data_version, nonce)
        );

        -- Per-unit sync bookkeeping
        CREATE TABLE sync_states (
            unit TEXT PRIMARY KEY,
            local_version INTEGER NOT NULL DEFAULT 0,
            server_version INTEGER NOT NULL DEFAULT 0,
            dirty INTEGER NOT NULL DEFAULT 0,
            last_synced_at INTEGER,
            conflict_pending INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX idx_records_unit ON records(unit);
        CREATE INDEX idx_records_pending ON records(unit, pending);
        CREATE INDEX idx_history_unit ON record_history(unit);
        "#,
    )?;

    Ok(())
}

/// Migration v2: issued grants.
fn apply_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Every grant of the account, tombstones included
        CREATE TABLE grants (
            grant_id BLOB PRIMARY KEY,        -- 16 bytes
            account_id TEXT NOT NULL,
            unit TEXT NOT NULL,
            tombstoned_at INTEGER,            -- nullable, never cleared
            created_at INTEGER NOT NULL,
            body BLOB NOT NULL                -- CBOR-encoded grant
        );

        CREATE INDEX idx_grants_created ON grants(created_at);
        "#,
    )?;

    Ok(())
}
