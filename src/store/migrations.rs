//! Versioned schema migrations.
//!
//! The schema version lives in SQLite's `user_version` pragma. Each step runs
//! inside an exclusive transaction, so a database opened concurrently either
//! sees the old schema or the new one, never a half-applied step.
//!
//! History:
//! - v1: legacy `selections` / `selection_rows` tables plus the `kv` store
//! - v2: `collections` / `collection_rows` created, legacy data copied over
//! - v3: legacy tables dropped

use rusqlite::{Connection, Transaction, TransactionBehavior};

pub const SCHEMA_VERSION: i64 = 3;

/// Bring a database up to [`SCHEMA_VERSION`], one step at a time.
pub fn migrate(conn: &mut Connection) -> rusqlite::Result<()> {
    migrate_to(conn, SCHEMA_VERSION)
}

/// Bring a database up to a specific version. Used by tests to build
/// databases frozen at an intermediate schema.
pub(crate) fn migrate_to(conn: &mut Connection, target: i64) -> rusqlite::Result<()> {
    loop {
        let current = schema_version(conn)?;
        if current >= target {
            return Ok(());
        }
        let tx = conn.transaction_with_behavior(TransactionBehavior::Exclusive)?;
        // re-check under the lock in case another connection won the race
        if version_of(&tx)? == current {
            apply_step(&tx, current + 1)?;
            tx.pragma_update(None, "user_version", current + 1)?;
        }
        tx.commit()?;
    }
}

pub(crate) fn schema_version(conn: &Connection) -> rusqlite::Result<i64> {
    conn.pragma_query_value(None, "user_version", |row| row.get(0))
}

fn version_of(tx: &Transaction<'_>) -> rusqlite::Result<i64> {
    tx.pragma_query_value(None, "user_version", |row| row.get(0))
}

fn apply_step(tx: &Transaction<'_>, to: i64) -> rusqlite::Result<()> {
    match to {
        1 => tx.execute_batch(
            "CREATE TABLE IF NOT EXISTS selections (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                note TEXT NOT NULL DEFAULT '',
                pinned INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS selection_rows (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                selection_id TEXT NOT NULL,
                key TEXT,
                payload TEXT NOT NULL,
                ts INTEGER NOT NULL,
                source TEXT NOT NULL DEFAULT '',
                batch TEXT NOT NULL DEFAULT ''
            );
            CREATE INDEX IF NOT EXISTS idx_selection_rows_selection
                ON selection_rows (selection_id);
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        ),
        2 => tx.execute_batch(
            "CREATE TABLE IF NOT EXISTS collections (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                note TEXT NOT NULL DEFAULT '',
                pinned INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_collections_name ON collections (name);
            CREATE TABLE IF NOT EXISTS collection_rows (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                collection_id TEXT NOT NULL,
                key TEXT,
                payload TEXT NOT NULL,
                ts INTEGER NOT NULL,
                source TEXT NOT NULL DEFAULT '',
                batch TEXT NOT NULL DEFAULT ''
            );
            CREATE INDEX IF NOT EXISTS idx_collection_rows_collection
                ON collection_rows (collection_id);
            CREATE INDEX IF NOT EXISTS idx_collection_rows_key
                ON collection_rows (collection_id, key);
            CREATE INDEX IF NOT EXISTS idx_collection_rows_ts
                ON collection_rows (ts);
            INSERT OR IGNORE INTO collections
                SELECT id, name, note, pinned, created_at, updated_at FROM selections;
            INSERT INTO collection_rows (collection_id, key, payload, ts, source, batch)
                SELECT selection_id, key, payload, ts, source, batch FROM selection_rows;",
        ),
        3 => tx.execute_batch(
            "DROP TABLE IF EXISTS selection_rows;
             DROP TABLE IF EXISTS selections;",
        ),
        other => unreachable!("no migration step to version {other}"),
    }
}
