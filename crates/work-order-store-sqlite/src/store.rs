// work-order-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Work Order Store
// Description: Durable WorkOrderStore backed by SQLite WAL.
// Purpose: Persist orders, items, parts, events, provenance, and idempotency
// keys with transactional row writes and in-schema uniqueness.
// Dependencies: work-order-core, rusqlite, serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! Each row stores its full JSON snapshot plus the columns the engine
//! queries on (state, lease expiry, timestamps as unix seconds). Every trait
//! call runs in one transaction on a mutex-guarded connection, which is the
//! row-lock equivalent the engine's concurrency model requires. Uniqueness
//! on `(scope, key_hash)` and `(item_id, part_key, seq)` is enforced
//! in-schema, with a null `seq` mapped to a sentinel so the unversioned slot
//! is a distinct value.
//!
//! The store also implements the conditional key-value primitive backing the
//! key-value lease backend, so lease ownership stays durable across process
//! invocations when that backend is selected.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;

use rusqlite::Connection;
use rusqlite::ErrorCode;
use rusqlite::OpenFlags;
use rusqlite::OptionalExtension;
use rusqlite::Transaction;
use rusqlite::params;
use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use work_order_core::AgentId;
use work_order_core::IdempotencyPut;
use work_order_core::IdempotencyRecord;
use work_order_core::Item;
use work_order_core::ItemId;
use work_order_core::ItemState;
use work_order_core::KeyValueStore;
use work_order_core::KvEntry;
use work_order_core::KvError;
use work_order_core::LeaseMutation;
use work_order_core::Order;
use work_order_core::OrderId;
use work_order_core::OrderState;
use work_order_core::Part;
use work_order_core::ProvenanceRecord;
use work_order_core::StoreError;
use work_order_core::Timestamp;
use work_order_core::WorkEvent;
use work_order_core::WorkOrderStore;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// `SQLite` schema version for the store.
const SCHEMA_VERSION: i64 = 1;
/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Sentinel stored for a null part `seq` so the slot stays unique.
const NULL_SEQ_SENTINEL: i64 = -1;

// ============================================================================
// SECTION: Config
// ============================================================================

/// `SQLite` journal mode configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteJournalMode {
    /// WAL journal mode (recommended).
    #[default]
    Wal,
    /// Delete journal mode (legacy).
    Delete,
}

impl SqliteJournalMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
        }
    }
}

/// Configuration for the `SQLite` work order store.
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteStoreConfig {
    /// Path to the `SQLite` database file.
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteJournalMode,
}

impl SqliteStoreConfig {
    /// Builds a config with defaults for a database path.
    #[must_use]
    pub fn for_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            journal_mode: SqliteJournalMode::default(),
        }
    }
}

/// Returns the default busy timeout for `SQLite` connections.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// `SQLite` store errors.
#[derive(Debug, Error)]
pub enum SqliteStoreError {
    /// Store I/O error.
    #[error("sqlite store io error: {0}")]
    Io(String),
    /// `SQLite` engine error.
    #[error("sqlite store db error: {0}")]
    Db(String),
    /// Uniqueness constraint rejected the write.
    #[error("sqlite store conflict: {0}")]
    Conflict(String),
    /// Invalid store data.
    #[error("sqlite store invalid data: {0}")]
    Invalid(String),
}

impl From<SqliteStoreError> for StoreError {
    fn from(error: SqliteStoreError) -> Self {
        match error {
            SqliteStoreError::Io(message) => Self::Io(message),
            SqliteStoreError::Db(message) => Self::Store(message),
            SqliteStoreError::Conflict(message) => Self::Conflict(message),
            SqliteStoreError::Invalid(message) => Self::Invalid(message),
        }
    }
}

impl From<rusqlite::Error> for SqliteStoreError {
    fn from(error: rusqlite::Error) -> Self {
        match &error {
            rusqlite::Error::SqliteFailure(inner, _)
                if inner.code == ErrorCode::ConstraintViolation =>
            {
                Self::Conflict(error.to_string())
            }
            _ => Self::Db(error.to_string()),
        }
    }
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// `SQLite`-backed work order store with WAL support.
#[derive(Clone)]
pub struct SqliteWorkOrderStore {
    /// Shared `SQLite` connection guarded by a mutex.
    connection: Arc<Mutex<Connection>>,
}

impl SqliteWorkOrderStore {
    /// Opens an `SQLite`-backed work order store.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the database cannot be opened or
    /// initialized.
    pub fn new(config: &SqliteStoreConfig) -> Result<Self, SqliteStoreError> {
        ensure_parent_dir(&config.path)?;
        let connection = Connection::open_with_flags(
            &config.path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        )?;
        connection
            .busy_timeout(std::time::Duration::from_millis(config.busy_timeout_ms))
            .map_err(SqliteStoreError::from)?;
        connection
            .pragma_update(None, "journal_mode", config.journal_mode.pragma_value())?;
        connection.pragma_update(None, "foreign_keys", "on")?;
        initialize_schema(&connection)?;
        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    /// Runs one closure inside a transaction on the guarded connection.
    fn with_tx<T>(
        &self,
        op: impl FnOnce(&Transaction<'_>) -> Result<T, SqliteStoreError>,
    ) -> Result<T, StoreError> {
        let mut guard = self
            .connection
            .lock()
            .map_err(|_| StoreError::Store("sqlite connection mutex poisoned".to_string()))?;
        let tx = guard.transaction().map_err(SqliteStoreError::from)?;
        let out = op(&tx)?;
        tx.commit().map_err(SqliteStoreError::from)?;
        Ok(out)
    }

    /// Runs one closure inside a transaction, mapping failures to key-value
    /// backend errors.
    fn with_kv_tx<T>(
        &self,
        op: impl FnOnce(&Transaction<'_>) -> Result<T, SqliteStoreError>,
    ) -> Result<T, KvError> {
        self.with_tx(op).map_err(|err| KvError::Backend(err.to_string()))
    }
}

// ============================================================================
// SECTION: Schema
// ============================================================================

/// Creates or verifies the store schema.
fn initialize_schema(connection: &Connection) -> Result<(), SqliteStoreError> {
    connection.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_meta (
             version INTEGER NOT NULL
         );
         CREATE TABLE IF NOT EXISTS orders (
             id TEXT PRIMARY KEY,
             order_type TEXT NOT NULL,
             state TEXT NOT NULL,
             priority INTEGER NOT NULL,
             created_at INTEGER NOT NULL,
             last_transitioned_at INTEGER NOT NULL,
             row_json TEXT NOT NULL
         );
         CREATE TABLE IF NOT EXISTS items (
             id TEXT PRIMARY KEY,
             order_id TEXT NOT NULL REFERENCES orders(id) ON DELETE CASCADE,
             item_type TEXT NOT NULL,
             state TEXT NOT NULL,
             leased_by TEXT,
             lease_expires_at INTEGER,
             created_at INTEGER NOT NULL,
             last_transitioned_at INTEGER NOT NULL,
             row_json TEXT NOT NULL
         );
         CREATE INDEX IF NOT EXISTS idx_items_state_lease
             ON items(state, lease_expires_at);
         CREATE INDEX IF NOT EXISTS idx_items_order ON items(order_id);
         CREATE TABLE IF NOT EXISTS parts (
             id TEXT PRIMARY KEY,
             item_id TEXT NOT NULL,
             part_key TEXT NOT NULL,
             seq INTEGER NOT NULL,
             created_at INTEGER NOT NULL,
             row_json TEXT NOT NULL
         );
         CREATE UNIQUE INDEX IF NOT EXISTS idx_parts_slot
             ON parts(item_id, part_key, seq);
         CREATE TABLE IF NOT EXISTS events (
             id TEXT PRIMARY KEY,
             order_id TEXT NOT NULL,
             item_id TEXT,
             created_at INTEGER NOT NULL,
             row_json TEXT NOT NULL
         );
         CREATE INDEX IF NOT EXISTS idx_events_order ON events(order_id, created_at);
         CREATE TABLE IF NOT EXISTS provenance (
             id TEXT PRIMARY KEY,
             order_id TEXT NOT NULL,
             item_id TEXT,
             created_at INTEGER NOT NULL,
             row_json TEXT NOT NULL
         );
         CREATE TABLE IF NOT EXISTS idempotency_keys (
             scope TEXT NOT NULL,
             key_hash TEXT NOT NULL,
             created_at INTEGER NOT NULL,
             row_json TEXT NOT NULL,
             PRIMARY KEY (scope, key_hash)
         );
         CREATE TABLE IF NOT EXISTS kv_entries (
             key TEXT PRIMARY KEY,
             value TEXT NOT NULL,
             expires_at INTEGER NOT NULL
         );",
    )?;
    let version: Option<i64> = connection
        .query_row("SELECT version FROM schema_meta LIMIT 1", [], |row| row.get(0))
        .optional()?;
    match version {
        None => {
            connection.execute("INSERT INTO schema_meta (version) VALUES (?1)", params![
                SCHEMA_VERSION
            ])?;
        }
        Some(found) if found == SCHEMA_VERSION => {}
        Some(found) => {
            return Err(SqliteStoreError::Invalid(format!(
                "schema version mismatch: found {found}, expected {SCHEMA_VERSION}"
            )));
        }
    }
    Ok(())
}

/// Creates the database's parent directory when needed.
fn ensure_parent_dir(path: &Path) -> Result<(), SqliteStoreError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|err| SqliteStoreError::Io(err.to_string()))?;
        }
    }
    Ok(())
}

// ============================================================================
// SECTION: Row Codecs
// ============================================================================

/// Serializes a row to its JSON snapshot.
fn encode<T: Serialize>(row: &T) -> Result<String, SqliteStoreError> {
    serde_json::to_string(row).map_err(|err| SqliteStoreError::Invalid(err.to_string()))
}

/// Deserializes a row from its JSON snapshot.
fn decode<T: DeserializeOwned>(json: &str) -> Result<T, SqliteStoreError> {
    serde_json::from_str(json).map_err(|err| SqliteStoreError::Invalid(err.to_string()))
}

/// Unix seconds for an optional timestamp column.
fn seconds_opt(timestamp: Option<Timestamp>) -> Option<i64> {
    timestamp.map(|value| value.unix_seconds())
}

/// Writes an order row.
fn put_order(tx: &Transaction<'_>, order: &Order, insert: bool) -> Result<(), SqliteStoreError> {
    let sql = if insert {
        "INSERT INTO orders (id, order_type, state, priority, created_at, \
         last_transitioned_at, row_json) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
    } else {
        "UPDATE orders SET order_type = ?2, state = ?3, priority = ?4, created_at = ?5, \
         last_transitioned_at = ?6, row_json = ?7 WHERE id = ?1"
    };
    let changed = tx.execute(sql, params![
        order.id.as_str(),
        order.order_type.as_str(),
        order.state.as_str(),
        order.priority,
        order.created_at.unix_seconds(),
        order.last_transitioned_at.unix_seconds(),
        encode(order)?,
    ])?;
    if changed == 0 {
        return Err(SqliteStoreError::Invalid(format!("order missing: {}", order.id)));
    }
    Ok(())
}

/// Writes an item row.
fn put_item(tx: &Transaction<'_>, item: &Item, insert: bool) -> Result<(), SqliteStoreError> {
    let sql = if insert {
        "INSERT INTO items (id, order_id, item_type, state, leased_by, lease_expires_at, \
         created_at, last_transitioned_at, row_json) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
    } else {
        "UPDATE items SET order_id = ?2, item_type = ?3, state = ?4, leased_by = ?5, \
         lease_expires_at = ?6, created_at = ?7, last_transitioned_at = ?8, row_json = ?9 \
         WHERE id = ?1"
    };
    let changed = tx.execute(sql, params![
        item.id.as_str(),
        item.order_id.as_str(),
        item.item_type.as_str(),
        item.state.as_str(),
        item.leased_by.as_ref().map(AgentId::as_str),
        seconds_opt(item.lease_expires_at),
        item.created_at.unix_seconds(),
        item.last_transitioned_at.unix_seconds(),
        encode(item)?,
    ])?;
    if changed == 0 {
        return Err(SqliteStoreError::Invalid(format!("item missing: {}", item.id)));
    }
    Ok(())
}

/// Appends an event row.
fn put_event(tx: &Transaction<'_>, event: &WorkEvent) -> Result<(), SqliteStoreError> {
    tx.execute(
        "INSERT INTO events (id, order_id, item_id, created_at, row_json) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            event.id.as_str(),
            event.order_id.as_str(),
            event.item_id.as_ref().map(ItemId::as_str),
            event.created_at.unix_seconds(),
            encode(event)?,
        ],
    )?;
    Ok(())
}

/// Loads an item row under the current transaction.
fn load_item(tx: &Transaction<'_>, item_id: &ItemId) -> Result<Option<Item>, SqliteStoreError> {
    let json: Option<String> = tx
        .query_row("SELECT row_json FROM items WHERE id = ?1", params![item_id.as_str()], |row| {
            row.get(0)
        })
        .optional()?;
    json.as_deref().map(decode).transpose()
}

/// Collects decoded rows from a single-column `row_json` query.
fn collect_rows<T: DeserializeOwned>(
    tx: &Transaction<'_>,
    sql: &str,
    bind: &[&dyn rusqlite::ToSql],
) -> Result<Vec<T>, SqliteStoreError> {
    let mut statement = tx.prepare(sql)?;
    let mut rows = statement.query(bind)?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let json: String = row.get(0)?;
        out.push(decode(&json)?);
    }
    Ok(out)
}

// ============================================================================
// SECTION: WorkOrderStore Implementation
// ============================================================================

impl WorkOrderStore for SqliteWorkOrderStore {
    fn get_order(&self, order_id: &OrderId) -> Result<Option<Order>, StoreError> {
        self.with_tx(|tx| {
            let json: Option<String> = tx
                .query_row(
                    "SELECT row_json FROM orders WHERE id = ?1",
                    params![order_id.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            json.as_deref().map(decode).transpose()
        })
    }

    fn get_item(&self, item_id: &ItemId) -> Result<Option<Item>, StoreError> {
        self.with_tx(|tx| load_item(tx, item_id))
    }

    fn list_orders(&self) -> Result<Vec<Order>, StoreError> {
        self.with_tx(|tx| {
            collect_rows(tx, "SELECT row_json FROM orders ORDER BY created_at, id", &[])
        })
    }

    fn items_for_order(&self, order_id: &OrderId) -> Result<Vec<Item>, StoreError> {
        self.with_tx(|tx| {
            collect_rows(
                tx,
                "SELECT row_json FROM items WHERE order_id = ?1 ORDER BY created_at, id",
                &[&order_id.as_str()],
            )
        })
    }

    fn parts_for_item(&self, item_id: &ItemId) -> Result<Vec<Part>, StoreError> {
        self.with_tx(|tx| {
            collect_rows(
                tx,
                "SELECT row_json FROM parts WHERE item_id = ?1 ORDER BY created_at, id",
                &[&item_id.as_str()],
            )
        })
    }

    fn events_for_order(&self, order_id: &OrderId) -> Result<Vec<WorkEvent>, StoreError> {
        self.with_tx(|tx| {
            collect_rows(
                tx,
                "SELECT row_json FROM events WHERE order_id = ?1 ORDER BY created_at, rowid",
                &[&order_id.as_str()],
            )
        })
    }

    fn events_for_item(&self, item_id: &ItemId) -> Result<Vec<WorkEvent>, StoreError> {
        self.with_tx(|tx| {
            collect_rows(
                tx,
                "SELECT row_json FROM events WHERE item_id = ?1 ORDER BY created_at, rowid",
                &[&item_id.as_str()],
            )
        })
    }

    fn available_items(&self, now: Timestamp) -> Result<Vec<Item>, StoreError> {
        let now_seconds = now.unix_seconds();
        self.with_tx(|tx| {
            collect_rows(
                tx,
                "SELECT row_json FROM items WHERE \
                 (state = 'queued' AND (lease_expires_at IS NULL OR lease_expires_at <= ?1)) \
                 OR (state = 'in_progress' AND leased_by IS NOT NULL \
                     AND lease_expires_at <= ?1) \
                 ORDER BY created_at, id",
                &[&now_seconds],
            )
        })
    }

    fn expired_lease_items(&self, now: Timestamp) -> Result<Vec<Item>, StoreError> {
        let now_seconds = now.unix_seconds();
        self.with_tx(|tx| {
            collect_rows(
                tx,
                "SELECT row_json FROM items WHERE leased_by IS NOT NULL \
                 AND lease_expires_at <= ?1 ORDER BY created_at, id",
                &[&now_seconds],
            )
        })
    }

    fn leased_items(&self, now: Timestamp) -> Result<Vec<Item>, StoreError> {
        let now_seconds = now.unix_seconds();
        self.with_tx(|tx| {
            collect_rows(
                tx,
                "SELECT row_json FROM items WHERE leased_by IS NOT NULL \
                 AND lease_expires_at > ?1 ORDER BY created_at, id",
                &[&now_seconds],
            )
        })
    }

    fn orders_in_state_updated_before(
        &self,
        state: OrderState,
        cutoff: Timestamp,
    ) -> Result<Vec<Order>, StoreError> {
        let cutoff_seconds = cutoff.unix_seconds();
        self.with_tx(|tx| {
            collect_rows(
                tx,
                "SELECT row_json FROM orders WHERE state = ?1 AND last_transitioned_at < ?2 \
                 ORDER BY created_at, id",
                &[&state.as_str(), &cutoff_seconds],
            )
        })
    }

    fn items_in_state_updated_before(
        &self,
        state: ItemState,
        cutoff: Timestamp,
    ) -> Result<Vec<Item>, StoreError> {
        let cutoff_seconds = cutoff.unix_seconds();
        self.with_tx(|tx| {
            collect_rows(
                tx,
                "SELECT row_json FROM items WHERE state = ?1 AND last_transitioned_at < ?2 \
                 ORDER BY created_at, id",
                &[&state.as_str(), &cutoff_seconds],
            )
        })
    }

    fn insert_order(&self, order: &Order, event: &WorkEvent) -> Result<(), StoreError> {
        self.with_tx(|tx| {
            put_order(tx, order, true)?;
            put_event(tx, event)
        })
    }

    fn insert_items(&self, items: &[Item], event: &WorkEvent) -> Result<(), StoreError> {
        self.with_tx(|tx| {
            for item in items {
                put_item(tx, item, true)?;
            }
            put_event(tx, event)
        })
    }

    fn update_order(&self, order: &Order, event: &WorkEvent) -> Result<(), StoreError> {
        self.with_tx(|tx| {
            put_order(tx, order, false)?;
            put_event(tx, event)
        })
    }

    fn update_item(&self, item: &Item, event: &WorkEvent) -> Result<(), StoreError> {
        self.with_tx(|tx| {
            put_item(tx, item, false)?;
            put_event(tx, event)
        })
    }

    fn upsert_part(
        &self,
        part: &Part,
        item: &Item,
        events: &[WorkEvent],
    ) -> Result<(), StoreError> {
        self.with_tx(|tx| {
            let seq = part.seq.map_or(NULL_SEQ_SENTINEL, i64::from);
            tx.execute(
                "DELETE FROM parts WHERE item_id = ?1 AND part_key = ?2 AND seq = ?3",
                params![part.item_id.as_str(), part.part_key.as_str(), seq],
            )?;
            tx.execute(
                "INSERT INTO parts (id, item_id, part_key, seq, created_at, row_json) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    part.id.as_str(),
                    part.item_id.as_str(),
                    part.part_key.as_str(),
                    seq,
                    part.created_at.unix_seconds(),
                    encode(part)?,
                ],
            )?;
            put_item(tx, item, false)?;
            for event in events {
                put_event(tx, event)?;
            }
            Ok(())
        })
    }

    fn insert_provenance(&self, record: &ProvenanceRecord) -> Result<(), StoreError> {
        self.with_tx(|tx| {
            tx.execute(
                "INSERT INTO provenance (id, order_id, item_id, created_at, row_json) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    record.id.as_str(),
                    record.order_id.as_str(),
                    record.item_id.as_ref().map(ItemId::as_str),
                    record.created_at.unix_seconds(),
                    encode(record)?,
                ],
            )?;
            Ok(())
        })
    }

    fn idempotency_get(
        &self,
        scope: &str,
        key_hash: &str,
    ) -> Result<Option<IdempotencyRecord>, StoreError> {
        self.with_tx(|tx| {
            let json: Option<String> = tx
                .query_row(
                    "SELECT row_json FROM idempotency_keys WHERE scope = ?1 AND key_hash = ?2",
                    params![scope, key_hash],
                    |row| row.get(0),
                )
                .optional()?;
            json.as_deref().map(decode).transpose()
        })
    }

    fn idempotency_put(&self, record: &IdempotencyRecord) -> Result<IdempotencyPut, StoreError> {
        self.with_tx(|tx| {
            let inserted = tx.execute(
                "INSERT OR IGNORE INTO idempotency_keys (scope, key_hash, created_at, row_json) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    record.scope,
                    record.key_hash,
                    record.created_at.unix_seconds(),
                    encode(record)?,
                ],
            )?;
            if inserted == 1 {
                return Ok(IdempotencyPut::Inserted);
            }
            let json: String = tx.query_row(
                "SELECT row_json FROM idempotency_keys WHERE scope = ?1 AND key_hash = ?2",
                params![record.scope, record.key_hash],
                |row| row.get(0),
            )?;
            Ok(IdempotencyPut::Conflict(decode(&json)?))
        })
    }

    fn try_set_lease(
        &self,
        item_id: &ItemId,
        owner: &AgentId,
        expires_at: Timestamp,
        now: Timestamp,
        allowed_states: &[ItemState],
    ) -> Result<LeaseMutation, StoreError> {
        self.with_tx(|tx| {
            let Some(mut item) = load_item(tx, item_id)? else {
                return Ok(LeaseMutation::NotFound);
            };
            if item.has_live_lease(now) {
                if let (Some(holder), Some(holder_expiry)) =
                    (item.leased_by.clone(), item.lease_expires_at)
                {
                    return Ok(LeaseMutation::Held {
                        holder,
                        expires_at: holder_expiry,
                    });
                }
            }
            if !allowed_states.contains(&item.state) {
                return Ok(LeaseMutation::NotLeasable { state: item.state });
            }
            item.leased_by = Some(owner.clone());
            item.lease_expires_at = Some(expires_at);
            item.last_heartbeat_at = Some(now);
            put_item(tx, &item, false)?;
            Ok(LeaseMutation::Applied(item))
        })
    }

    fn try_extend_lease(
        &self,
        item_id: &ItemId,
        owner: &AgentId,
        expires_at: Timestamp,
        heartbeat_at: Timestamp,
        now: Timestamp,
    ) -> Result<LeaseMutation, StoreError> {
        self.with_tx(|tx| {
            let Some(mut item) = load_item(tx, item_id)? else {
                return Ok(LeaseMutation::NotFound);
            };
            if item.leased_by.as_ref() != Some(owner) {
                return Ok(LeaseMutation::NotOwner {
                    holder: item.leased_by,
                });
            }
            if !item.has_live_lease(now) {
                return Ok(LeaseMutation::Expired);
            }
            item.lease_expires_at = Some(expires_at);
            item.last_heartbeat_at = Some(heartbeat_at);
            put_item(tx, &item, false)?;
            Ok(LeaseMutation::Applied(item))
        })
    }

    fn try_clear_lease(
        &self,
        item_id: &ItemId,
        owner: &AgentId,
    ) -> Result<LeaseMutation, StoreError> {
        self.with_tx(|tx| {
            let Some(mut item) = load_item(tx, item_id)? else {
                return Ok(LeaseMutation::NotFound);
            };
            if item.leased_by.as_ref() != Some(owner) {
                return Ok(LeaseMutation::NotOwner {
                    holder: item.leased_by,
                });
            }
            item.clear_lease();
            put_item(tx, &item, false)?;
            Ok(LeaseMutation::Applied(item))
        })
    }

    fn take_expired_lease(
        &self,
        item_id: &ItemId,
        now: Timestamp,
    ) -> Result<Option<Item>, StoreError> {
        self.with_tx(|tx| {
            let Some(item) = load_item(tx, item_id)? else {
                return Ok(None);
            };
            if !item.has_expired_lease(now) {
                return Ok(None);
            }
            let mut cleared = item.clone();
            cleared.clear_lease();
            put_item(tx, &cleared, false)?;
            Ok(Some(item))
        })
    }

    fn clear_all_leases(&self) -> Result<(), StoreError> {
        self.with_tx(|tx| {
            let mut statement =
                tx.prepare("SELECT row_json FROM items WHERE leased_by IS NOT NULL")?;
            let mut rows = statement.query([])?;
            let mut items: Vec<Item> = Vec::new();
            while let Some(row) = rows.next()? {
                let json: String = row.get(0)?;
                items.push(decode(&json)?);
            }
            drop(rows);
            drop(statement);
            for mut item in items {
                item.clear_lease();
                put_item(tx, &item, false)?;
            }
            Ok(())
        })
    }
}

// ============================================================================
// SECTION: KeyValueStore Implementation
// ============================================================================

/// Builds a live entry from its columns.
fn kv_entry(value: String, expires_at: i64) -> Result<KvEntry, SqliteStoreError> {
    let expires_at = Timestamp::from_unix_seconds(expires_at).ok_or_else(|| {
        SqliteStoreError::Invalid(format!("kv expiry out of range: {expires_at}"))
    })?;
    Ok(KvEntry { value, expires_at })
}

impl KeyValueStore for SqliteWorkOrderStore {
    fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl_seconds: u64,
        now: Timestamp,
    ) -> Result<bool, KvError> {
        let now_seconds = now.unix_seconds();
        let expires_at = now.plus_seconds(ttl_seconds).unix_seconds();
        self.with_kv_tx(|tx| {
            let live: Option<i64> = tx
                .query_row(
                    "SELECT expires_at FROM kv_entries WHERE key = ?1 AND expires_at > ?2",
                    params![key, now_seconds],
                    |row| row.get(0),
                )
                .optional()?;
            if live.is_some() {
                return Ok(false);
            }
            tx.execute(
                "INSERT OR REPLACE INTO kv_entries (key, value, expires_at) \
                 VALUES (?1, ?2, ?3)",
                params![key, value, expires_at],
            )?;
            Ok(true)
        })
    }

    fn compare_and_expire(
        &self,
        key: &str,
        expected: &str,
        ttl_seconds: u64,
        now: Timestamp,
    ) -> Result<bool, KvError> {
        let now_seconds = now.unix_seconds();
        let expires_at = now.plus_seconds(ttl_seconds).unix_seconds();
        self.with_kv_tx(|tx| {
            let updated = tx.execute(
                "UPDATE kv_entries SET expires_at = ?1 \
                 WHERE key = ?2 AND value = ?3 AND expires_at > ?4",
                params![expires_at, key, expected, now_seconds],
            )?;
            Ok(updated == 1)
        })
    }

    fn compare_and_delete(
        &self,
        key: &str,
        expected: &str,
        now: Timestamp,
    ) -> Result<bool, KvError> {
        let now_seconds = now.unix_seconds();
        self.with_kv_tx(|tx| {
            let deleted = tx.execute(
                "DELETE FROM kv_entries WHERE key = ?1 AND value = ?2 AND expires_at > ?3",
                params![key, expected, now_seconds],
            )?;
            Ok(deleted == 1)
        })
    }

    fn get(&self, key: &str, now: Timestamp) -> Result<Option<KvEntry>, KvError> {
        let now_seconds = now.unix_seconds();
        self.with_kv_tx(|tx| {
            let row: Option<(String, i64)> = tx
                .query_row(
                    "SELECT value, expires_at FROM kv_entries \
                     WHERE key = ?1 AND expires_at > ?2",
                    params![key, now_seconds],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            row.map(|(value, expires_at)| kv_entry(value, expires_at)).transpose()
        })
    }

    fn scan_prefix(
        &self,
        prefix: &str,
        now: Timestamp,
    ) -> Result<Vec<(String, KvEntry)>, KvError> {
        let now_seconds = now.unix_seconds();
        self.with_kv_tx(|tx| {
            let mut statement = tx.prepare(
                "SELECT key, value, expires_at FROM kv_entries \
                 WHERE expires_at > ?1 ORDER BY key",
            )?;
            let mut rows = statement.query(params![now_seconds])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let key: String = row.get(0)?;
                if !key.starts_with(prefix) {
                    continue;
                }
                let value: String = row.get(1)?;
                let expires_at: i64 = row.get(2)?;
                out.push((key, kv_entry(value, expires_at)?));
            }
            Ok(out)
        })
    }

    fn clear(&self) -> Result<(), KvError> {
        self.with_kv_tx(|tx| {
            tx.execute("DELETE FROM kv_entries", [])?;
            Ok(())
        })
    }
}
