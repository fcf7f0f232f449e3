// work-order-core/src/interfaces/mod.rs
// ============================================================================
// Module: Work Order Interfaces
// Description: Backend-agnostic contracts for persistence, key-value leasing,
// and order-type handlers.
// Purpose: Define the seams the engine integrates through.
// Dependencies: crate::core
// ============================================================================

//! ## Overview
//! Interfaces define how the engine integrates with durable storage and
//! external lease stores without embedding backend-specific details. Every
//! store method is one atomic unit: implementations must apply the state
//! write and its event append inside a single transaction, and must fail
//! closed on missing or invalid data.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod handler;

pub use handler::HandlerError;
pub use handler::ItemSpec;
pub use handler::OrderHandler;

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::core::identifiers::AgentId;
use crate::core::identifiers::ItemId;
use crate::core::identifiers::OrderId;
use crate::core::model::IdempotencyRecord;
use crate::core::model::Item;
use crate::core::model::Order;
use crate::core::model::Part;
use crate::core::model::ProvenanceRecord;
use crate::core::model::WorkEvent;
use crate::core::state::ItemState;
use crate::core::state::OrderState;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Store Errors
// ============================================================================

/// Work-order store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Store I/O error.
    #[error("work order store io error: {0}")]
    Io(String),
    /// Store data is corrupted or fails integrity checks.
    #[error("work order store corruption: {0}")]
    Corrupt(String),
    /// Store data is invalid.
    #[error("work order store invalid data: {0}")]
    Invalid(String),
    /// A uniqueness constraint rejected the write.
    #[error("work order store conflict: {0}")]
    Conflict(String),
    /// Store reported an error.
    #[error("work order store error: {0}")]
    Store(String),
}

// ============================================================================
// SECTION: Conditional Outcomes
// ============================================================================

/// Outcome of a conditional lease-field mutation.
///
/// # Invariants
/// - `Applied` carries the post-mutation item snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseMutation {
    /// Mutation applied under the row lock.
    Applied(Item),
    /// Item does not exist.
    NotFound,
    /// A live lease is held by another agent (or the same agent on acquire).
    Held {
        /// Current lease owner.
        holder: AgentId,
        /// Current lease expiry.
        expires_at: Timestamp,
    },
    /// Caller does not own the lease.
    NotOwner {
        /// Current lease owner, when any.
        holder: Option<AgentId>,
    },
    /// Lease exists but has passed its expiry.
    Expired,
    /// Item is not in a state that permits the mutation.
    NotLeasable {
        /// Observed item state.
        state: ItemState,
    },
}

/// Outcome of an idempotency-record insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdempotencyPut {
    /// Row inserted; the caller's response is now authoritative.
    Inserted,
    /// A concurrent caller won; their stored record is returned.
    Conflict(IdempotencyRecord),
}

// ============================================================================
// SECTION: Work Order Store
// ============================================================================

/// Durable store for orders, items, parts, events, provenance, and
/// idempotency keys.
///
/// Implementations must uphold the uniqueness constraints on
/// `(scope, key_hash)` and `(item_id, part_key, seq)` (with a null `seq`
/// treated as a distinct value), and must treat every method call as one
/// atomic unit under an exclusive row lock or equivalent.
pub trait WorkOrderStore {
    /// Loads an order by identifier.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when loading fails.
    fn get_order(&self, order_id: &OrderId) -> Result<Option<Order>, StoreError>;

    /// Loads an item by identifier.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when loading fails.
    fn get_item(&self, item_id: &ItemId) -> Result<Option<Item>, StoreError>;

    /// Lists all orders.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when loading fails.
    fn list_orders(&self) -> Result<Vec<Order>, StoreError>;

    /// Lists the items of one order, ordered by creation time.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when loading fails.
    fn items_for_order(&self, order_id: &OrderId) -> Result<Vec<Item>, StoreError>;

    /// Lists the parts of one item, ordered by creation time.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when loading fails.
    fn parts_for_item(&self, item_id: &ItemId) -> Result<Vec<Part>, StoreError>;

    /// Lists the events of one order, ordered by creation time.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when loading fails.
    fn events_for_order(&self, order_id: &OrderId) -> Result<Vec<WorkEvent>, StoreError>;

    /// Lists the events of one item, ordered by creation time.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when loading fails.
    fn events_for_item(&self, item_id: &ItemId) -> Result<Vec<WorkEvent>, StoreError>;

    /// Lists queued items with no live lease at `now`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when loading fails.
    fn available_items(&self, now: Timestamp) -> Result<Vec<Item>, StoreError>;

    /// Lists items whose lease has expired at `now`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when loading fails.
    fn expired_lease_items(&self, now: Timestamp) -> Result<Vec<Item>, StoreError>;

    /// Lists items holding a live lease at `now`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when loading fails.
    fn leased_items(&self, now: Timestamp) -> Result<Vec<Item>, StoreError>;

    /// Lists orders in `state` whose last transition is before `cutoff`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when loading fails.
    fn orders_in_state_updated_before(
        &self,
        state: OrderState,
        cutoff: Timestamp,
    ) -> Result<Vec<Order>, StoreError>;

    /// Lists items in `state` whose last transition is before `cutoff`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when loading fails.
    fn items_in_state_updated_before(
        &self,
        state: ItemState,
        cutoff: Timestamp,
    ) -> Result<Vec<Item>, StoreError>;

    /// Inserts a fresh order and its `proposed` event atomically.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the write fails or the id already exists.
    fn insert_order(&self, order: &Order, event: &WorkEvent) -> Result<(), StoreError>;

    /// Inserts planned items and the `planned` event atomically.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the write fails.
    fn insert_items(&self, items: &[Item], event: &WorkEvent) -> Result<(), StoreError>;

    /// Writes an order snapshot and appends its event atomically.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the write fails or the order is missing.
    fn update_order(&self, order: &Order, event: &WorkEvent) -> Result<(), StoreError>;

    /// Writes an item snapshot and appends its event atomically.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the write fails or the item is missing.
    fn update_item(&self, item: &Item, event: &WorkEvent) -> Result<(), StoreError>;

    /// Upserts a part row, mirrors the item's `parts_state`, and appends the
    /// given events, all atomically. Reused `(item, part_key, seq)` tuples
    /// overwrite the existing row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the write fails.
    fn upsert_part(
        &self,
        part: &Part,
        item: &Item,
        events: &[WorkEvent],
    ) -> Result<(), StoreError>;

    /// Inserts a provenance record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the write fails.
    fn insert_provenance(&self, record: &ProvenanceRecord) -> Result<(), StoreError>;

    /// Loads an idempotency record by `(scope, key_hash)`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when loading fails.
    fn idempotency_get(
        &self,
        scope: &str,
        key_hash: &str,
    ) -> Result<Option<IdempotencyRecord>, StoreError>;

    /// Inserts an idempotency record; on a `(scope, key_hash)` conflict the
    /// stored winner is returned instead.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the write fails for any other reason.
    fn idempotency_put(&self, record: &IdempotencyRecord) -> Result<IdempotencyPut, StoreError>;

    /// Conditionally sets the lease fields under the row lock: succeeds only
    /// when the item exists, carries no live lease at `now`, and is in one of
    /// `allowed_states`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store itself fails; contention is
    /// reported through [`LeaseMutation`].
    fn try_set_lease(
        &self,
        item_id: &ItemId,
        owner: &AgentId,
        expires_at: Timestamp,
        now: Timestamp,
        allowed_states: &[ItemState],
    ) -> Result<LeaseMutation, StoreError>;

    /// Conditionally extends a live lease owned by `owner`, stamping the
    /// heartbeat time.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store itself fails.
    fn try_extend_lease(
        &self,
        item_id: &ItemId,
        owner: &AgentId,
        expires_at: Timestamp,
        heartbeat_at: Timestamp,
        now: Timestamp,
    ) -> Result<LeaseMutation, StoreError>;

    /// Conditionally clears a lease owned by `owner`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store itself fails.
    fn try_clear_lease(
        &self,
        item_id: &ItemId,
        owner: &AgentId,
    ) -> Result<LeaseMutation, StoreError>;

    /// Atomically clears an expired lease and returns the pre-clear snapshot;
    /// returns `None` when the item is missing or its lease is live or absent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store itself fails.
    fn take_expired_lease(
        &self,
        item_id: &ItemId,
        now: Timestamp,
    ) -> Result<Option<Item>, StoreError>;

    /// Clears every lease field in the store. Diagnostic surface.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the write fails.
    fn clear_all_leases(&self) -> Result<(), StoreError>;
}

// ============================================================================
// SECTION: Key-Value Store
// ============================================================================

/// Key-value store errors.
#[derive(Debug, Error)]
pub enum KvError {
    /// Backend reported an error.
    #[error("key-value store error: {0}")]
    Backend(String),
}

/// One stored key-value entry with its expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvEntry {
    /// Stored value.
    pub value: String,
    /// Expiry time.
    pub expires_at: Timestamp,
}

/// Conditional key-value primitive used by the key-value lease backend.
///
/// Expired entries must behave as absent on every operation.
pub trait KeyValueStore {
    /// Sets `key` to `value` with a TTL only when absent; returns whether the
    /// write happened.
    ///
    /// # Errors
    ///
    /// Returns [`KvError`] when the backend fails.
    fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl_seconds: u64,
        now: Timestamp,
    ) -> Result<bool, KvError>;

    /// Re-arms the TTL only when the stored value equals `expected`.
    ///
    /// # Errors
    ///
    /// Returns [`KvError`] when the backend fails.
    fn compare_and_expire(
        &self,
        key: &str,
        expected: &str,
        ttl_seconds: u64,
        now: Timestamp,
    ) -> Result<bool, KvError>;

    /// Deletes the key only when the stored value equals `expected`.
    ///
    /// # Errors
    ///
    /// Returns [`KvError`] when the backend fails.
    fn compare_and_delete(
        &self,
        key: &str,
        expected: &str,
        now: Timestamp,
    ) -> Result<bool, KvError>;

    /// Reads a live entry.
    ///
    /// # Errors
    ///
    /// Returns [`KvError`] when the backend fails.
    fn get(&self, key: &str, now: Timestamp) -> Result<Option<KvEntry>, KvError>;

    /// Lists live entries under a key prefix.
    ///
    /// # Errors
    ///
    /// Returns [`KvError`] when the backend fails.
    fn scan_prefix(
        &self,
        prefix: &str,
        now: Timestamp,
    ) -> Result<Vec<(String, KvEntry)>, KvError>;

    /// Removes every entry. Diagnostic surface.
    ///
    /// # Errors
    ///
    /// Returns [`KvError`] when the backend fails.
    fn clear(&self) -> Result<(), KvError>;
}

