//! Persistent cheque collections over SQLite.
//!
//! All state lives in three tables: `collections` (metadata), `collection_rows`
//! (one cheque per row, append-only), and `kv` (the scoped active-collection
//! pointer). A repository is constructed explicitly and handed to whoever needs
//! it; there is no process-global instance.

use super::migrations;
use crate::cheque::Cheque;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use uuid::Uuid;

/// Environment variable overriding the database file location.
pub const ENV_DB_PATH: &str = "CHEQUEFLOW_DB";
/// Environment variable selecting the active-pointer scope.
pub const ENV_SCOPE: &str = "CHEQUEFLOW_SCOPE";

const DEFAULT_SCOPE: &str = "default";
/// Unscoped pointer keys written by earlier versions; read once and migrated.
const LEGACY_ACTIVE_KEYS: [&str; 2] = ["active_collection_id", "active_selection_id"];

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("no active collection in scope")]
    NoActiveCollection,
    #[error("collection not found: {0}")]
    CollectionNotFound(String),
    #[error(transparent)]
    Storage(#[from] rusqlite::Error),
    #[error(transparent)]
    Payload(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type RepoResult<T> = Result<T, RepoError>;

/// Collection metadata. Timestamps are unix milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collection {
    pub id: String,
    pub name: String,
    pub note: String,
    pub pinned: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A persisted cheque with its ingest metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredRow {
    /// The cheque's natural key, when it has one. Not unique in storage.
    pub key: Option<String>,
    pub cheque: Cheque,
    /// Ingest time, unix milliseconds, shared by the whole batch.
    pub ts: i64,
    pub source: String,
    pub batch: String,
}

/// Resolve the active-pointer scope from the environment.
pub fn resolve_scope() -> String {
    match std::env::var(ENV_SCOPE) {
        Ok(s) if !s.trim().is_empty() => s.trim().to_string(),
        _ => DEFAULT_SCOPE.to_string(),
    }
}

/// Default database location: `$CHEQUEFLOW_DB` or `~/.chequeflow/cheques.db`.
pub fn default_db_path() -> PathBuf {
    if let Ok(path) = std::env::var(ENV_DB_PATH) {
        return PathBuf::from(path);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(".chequeflow")
        .join("cheques.db")
}

pub struct ChequeRepo {
    conn: Mutex<Connection>,
    scope: String,
    active_key: String,
}

impl ChequeRepo {
    /// Open (or create) a repository at the given path, migrating the schema.
    pub fn open(path: &Path) -> RepoResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut conn = Connection::open(path)?;
        migrations::migrate(&mut conn)?;
        Ok(Self::with_connection(conn))
    }

    /// Open the repository at the default location.
    pub fn open_default() -> RepoResult<Self> {
        Self::open(&default_db_path())
    }

    /// In-memory repository, used by tests.
    pub fn in_memory() -> RepoResult<Self> {
        let mut conn = Connection::open_in_memory()?;
        migrations::migrate(&mut conn)?;
        Ok(Self::with_connection(conn))
    }

    fn with_connection(conn: Connection) -> Self {
        let scope = resolve_scope();
        let active_key = format!("active_collection_id::{scope}");
        Self {
            conn: Mutex::new(conn),
            scope,
            active_key,
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    // ── Collection lifecycle ────────────────────────────────────────────

    pub fn create(&self, name: &str) -> RepoResult<Collection> {
        let name = name.trim();
        let now = now_ms();
        let collection = Collection {
            id: Uuid::new_v4().to_string(),
            name: if name.is_empty() { "Untitled" } else { name }.to_string(),
            note: String::new(),
            pinned: false,
            created_at: now,
            updated_at: now,
        };
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO collections (id, name, note, pinned, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                collection.id,
                collection.name,
                collection.note,
                collection.pinned,
                collection.created_at,
                collection.updated_at
            ],
        )?;
        Ok(collection)
    }

    pub fn get(&self, id: &str) -> RepoResult<Option<Collection>> {
        let conn = self.conn.lock().unwrap();
        get_collection(&conn, id)
    }

    /// All collections, most recently updated first.
    pub fn list(&self) -> RepoResult<Vec<Collection>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, name, note, pinned, created_at, updated_at
             FROM collections ORDER BY updated_at DESC",
        )?;
        let collections = stmt
            .query_map([], row_to_collection)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(collections)
    }

    pub fn rename(&self, id: &str, name: &str) -> RepoResult<()> {
        self.touch_field(id, "name", name)
    }

    pub fn update_note(&self, id: &str, note: &str) -> RepoResult<()> {
        self.touch_field(id, "note", note)
    }

    pub fn set_pinned(&self, id: &str, pinned: bool) -> RepoResult<()> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE collections SET pinned = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, pinned, now_ms()],
        )?;
        if changed == 0 {
            return Err(RepoError::CollectionNotFound(id.to_string()));
        }
        Ok(())
    }

    fn touch_field(&self, id: &str, field: &str, value: &str) -> RepoResult<()> {
        let conn = self.conn.lock().unwrap();
        let sql = format!("UPDATE collections SET {field} = ?2, updated_at = ?3 WHERE id = ?1");
        let changed = conn.execute(&sql, params![id, value, now_ms()])?;
        if changed == 0 {
            return Err(RepoError::CollectionNotFound(id.to_string()));
        }
        Ok(())
    }

    /// Delete a collection, its rows, and — when it was active — the scoped
    /// active pointer, in one transaction.
    pub fn delete(&self, id: &str) -> RepoResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        if get_collection(&tx, id)?.is_none() {
            return Err(RepoError::CollectionNotFound(id.to_string()));
        }
        tx.execute("DELETE FROM collection_rows WHERE collection_id = ?1", [id])?;
        tx.execute("DELETE FROM collections WHERE id = ?1", [id])?;
        tx.execute(
            "DELETE FROM kv WHERE key = ?1 AND value = ?2",
            params![self.active_key, id],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Copy a collection and its rows under a new identity.
    pub fn duplicate(&self, id: &str, new_name: Option<&str>) -> RepoResult<Collection> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let source = get_collection(&tx, id)?
            .ok_or_else(|| RepoError::CollectionNotFound(id.to_string()))?;

        let now = now_ms();
        let copy = Collection {
            id: Uuid::new_v4().to_string(),
            name: new_name
                .map(str::to_string)
                .unwrap_or_else(|| format!("{} (copy)", source.name)),
            note: source.note.clone(),
            pinned: false,
            created_at: now,
            updated_at: now,
        };
        tx.execute(
            "INSERT INTO collections (id, name, note, pinned, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![copy.id, copy.name, copy.note, copy.pinned, copy.created_at, copy.updated_at],
        )?;
        tx.execute(
            "INSERT INTO collection_rows (collection_id, key, payload, ts, source, batch)
             SELECT ?2, key, payload, ts, source, batch
             FROM collection_rows WHERE collection_id = ?1",
            params![id, copy.id],
        )?;
        tx.commit()?;
        Ok(copy)
    }

    // ── Rows ────────────────────────────────────────────────────────────

    /// Append a batch of cheques to a collection.
    ///
    /// Within the batch, later records win over earlier ones with the same
    /// natural key; records without one are always kept. Across separate
    /// batches no dedup happens — duplicates are the reconciler's concern.
    /// The whole batch shares one ingest timestamp and batch id. Returns the
    /// number of rows written.
    pub fn add_rows(&self, id: &str, cheques: &[Cheque], source: &str) -> RepoResult<usize> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        if get_collection(&tx, id)?.is_none() {
            return Err(RepoError::CollectionNotFound(id.to_string()));
        }

        let ts = now_ms();
        let batch = Uuid::new_v4().to_string();

        // in-batch last-wins dedup, original order preserved
        let mut keyed: Vec<(Option<&str>, &Cheque)> = Vec::with_capacity(cheques.len());
        let mut seen: std::collections::HashMap<&str, usize> = std::collections::HashMap::new();
        for cheque in cheques {
            match cheque.natural_key() {
                Some(key) => match seen.get(key) {
                    Some(&pos) => keyed[pos].1 = cheque,
                    None => {
                        seen.insert(key, keyed.len());
                        keyed.push((Some(key), cheque));
                    }
                },
                None => keyed.push((None, cheque)),
            }
        }

        {
            let mut stmt = tx.prepare(
                "INSERT INTO collection_rows
                     (collection_id, key, payload, ts, source, batch)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for (key, cheque) in &keyed {
                let payload = serde_json::to_string(cheque)?;
                stmt.execute(params![id, key, payload, ts, source, batch])?;
            }
        }

        tx.execute(
            "UPDATE collections SET updated_at = ?2 WHERE id = ?1",
            params![id, ts],
        )?;
        tx.commit()?;
        Ok(keyed.len())
    }

    /// A page of a collection's rows in insertion order. `limit: None` means
    /// no cap.
    pub fn list_rows(
        &self,
        id: &str,
        limit: Option<u32>,
        offset: u32,
    ) -> RepoResult<Vec<StoredRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT key, payload, ts, source, batch
             FROM collection_rows WHERE collection_id = ?1
             ORDER BY id LIMIT ?2 OFFSET ?3",
        )?;
        let limit: i64 = limit.map(i64::from).unwrap_or(-1);
        let rows = stmt
            .query_map(params![id, limit, offset], |row| {
                Ok((
                    row.get::<_, Option<String>>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut out = Vec::with_capacity(rows.len());
        for (key, payload, ts, source, batch) in rows {
            out.push(StoredRow {
                key,
                cheque: serde_json::from_str(&payload)?,
                ts,
                source,
                batch,
            });
        }
        Ok(out)
    }

    pub fn count_rows(&self, id: &str) -> RepoResult<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM collection_rows WHERE collection_id = ?1",
            [id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    pub fn clear_rows(&self, id: &str) -> RepoResult<usize> {
        let conn = self.conn.lock().unwrap();
        if get_collection(&conn, id)?.is_none() {
            return Err(RepoError::CollectionNotFound(id.to_string()));
        }
        let removed =
            conn.execute("DELETE FROM collection_rows WHERE collection_id = ?1", [id])?;
        conn.execute(
            "UPDATE collections SET updated_at = ?2 WHERE id = ?1",
            params![id, now_ms()],
        )?;
        Ok(removed)
    }

    // ── Active pointer ──────────────────────────────────────────────────

    /// Point the scope's active pointer at a collection, or clear it.
    pub fn set_active_id(&self, id: Option<&str>) -> RepoResult<()> {
        let conn = self.conn.lock().unwrap();
        match id {
            Some(id) => {
                if get_collection(&conn, id)?.is_none() {
                    return Err(RepoError::CollectionNotFound(id.to_string()));
                }
                conn.execute(
                    "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
                    params![self.active_key, id],
                )?;
                // unscoped keys from earlier versions must not shadow this
                for legacy in LEGACY_ACTIVE_KEYS {
                    conn.execute("DELETE FROM kv WHERE key = ?1", [legacy])?;
                }
            }
            None => {
                conn.execute("DELETE FROM kv WHERE key = ?1", [&self.active_key])?;
            }
        }
        Ok(())
    }

    /// The scope's active collection id, if any.
    ///
    /// A pointer written by an earlier, unscoped version is adopted into the
    /// current scope on first read and the legacy key removed.
    pub fn get_active_id(&self) -> RepoResult<Option<String>> {
        let conn = self.conn.lock().unwrap();
        if let Some(id) = kv_get(&conn, &self.active_key)? {
            return Ok(Some(id));
        }
        for legacy in LEGACY_ACTIVE_KEYS {
            if let Some(id) = kv_get(&conn, legacy)? {
                conn.execute(
                    "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
                    params![self.active_key, id],
                )?;
                conn.execute("DELETE FROM kv WHERE key = ?1", [legacy])?;
                return Ok(Some(id));
            }
        }
        Ok(None)
    }

    /// The active collection, clearing a pointer left dangling by an
    /// out-of-band delete.
    pub fn get_active(&self) -> RepoResult<Option<Collection>> {
        let Some(id) = self.get_active_id()? else {
            return Ok(None);
        };
        match self.get(&id)? {
            Some(collection) => Ok(Some(collection)),
            None => {
                self.set_active_id(None)?;
                Ok(None)
            }
        }
    }

    /// The active collection, or an error when the scope has none.
    pub fn require_active(&self) -> RepoResult<Collection> {
        self.get_active()?.ok_or(RepoError::NoActiveCollection)
    }

    /// Guarantee a collection for the current scope.
    ///
    /// An existing active collection wins outright. Otherwise the scoped
    /// display name `"{base} [{scope}]"` is looked up, created when absent,
    /// and the resolved collection becomes active.
    pub fn ensure_scoped(&self, base: &str) -> RepoResult<Collection> {
        if let Some(active) = self.get_active()? {
            return Ok(active);
        }

        let name = format!("{base} [{}]", self.scope);
        let existing = {
            let conn = self.conn.lock().unwrap();
            conn.query_row(
                "SELECT id, name, note, pinned, created_at, updated_at
                 FROM collections WHERE name = ?1
                 ORDER BY created_at LIMIT 1",
                [&name],
                row_to_collection,
            )
            .optional()?
        };

        let collection = match existing {
            Some(c) => c,
            None => {
                let created = self.create(&name)?;
                self.update_note(&created.id, &format!("scoped to {}", self.scope))?;
                self.get(&created.id)?.unwrap_or(created)
            }
        };

        self.set_active_id(Some(&collection.id))?;
        Ok(collection)
    }

    // ── Export ──────────────────────────────────────────────────────────

    /// Render a collection's rows as CSV, header included.
    pub fn export_csv(&self, id: &str) -> RepoResult<String> {
        if self.get(id)?.is_none() {
            return Err(RepoError::CollectionNotFound(id.to_string()));
        }
        let rows = self.list_rows(id, None, 0)?;

        let mut out = String::from(
            "id,date,sign,paymentType,amount,deviceName,sale,shift,fnsStatus,crptStatus,detailsUrl,source\n",
        );
        for row in rows {
            let c = &row.cheque;
            let fields = [
                &c.id,
                &c.date,
                &c.sign,
                &c.payment_type,
                &c.amount,
                &c.device_name,
                &c.sale,
                &c.shift,
                &c.fns_status,
                &c.crpt_status,
                &c.details_url,
                &c.source,
            ];
            let line: Vec<String> = fields.iter().map(|f| csv_escape(f)).collect();
            out.push_str(&line.join(","));
            out.push('\n');
        }
        Ok(out)
    }
}

fn csv_escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn kv_get(conn: &Connection, key: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row("SELECT value FROM kv WHERE key = ?1", [key], |row| {
        row.get(0)
    })
    .optional()
}

fn get_collection(conn: &Connection, id: &str) -> RepoResult<Option<Collection>> {
    Ok(conn
        .query_row(
            "SELECT id, name, note, pinned, created_at, updated_at
             FROM collections WHERE id = ?1",
            [id],
            row_to_collection,
        )
        .optional()?)
}

fn row_to_collection(row: &rusqlite::Row<'_>) -> rusqlite::Result<Collection> {
    Ok(Collection {
        id: row.get(0)?,
        name: row.get(1)?,
        note: row.get(2)?,
        pinned: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}
