// work-order-core/src/runtime/store.rs
// ============================================================================
// Module: In-Memory Work Order Store
// Description: Mutex-guarded store implementation for tests and examples.
// Purpose: Provide deterministic storage without external dependencies.
// Dependencies: crate::core, crate::interfaces
// ============================================================================

//! ## Overview
//! This module provides in-memory implementations of [`WorkOrderStore`] and
//! [`KeyValueStore`] for tests and single-process hosts. Every trait call is
//! one critical section under a single mutex, which satisfies the row-lock
//! contract. Not intended for production durability.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

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
use crate::interfaces::IdempotencyPut;
use crate::interfaces::KeyValueStore;
use crate::interfaces::KvEntry;
use crate::interfaces::KvError;
use crate::interfaces::LeaseMutation;
use crate::interfaces::StoreError;
use crate::interfaces::WorkOrderStore;

// ============================================================================
// SECTION: Inner State
// ============================================================================

/// Sequence key for the part uniqueness index; `None` maps to a sentinel so
/// the unversioned slot is a distinct value.
fn seq_key(seq: Option<u32>) -> i64 {
    seq.map_or(-1, i64::from)
}

/// Mutable state behind the store mutex.
#[derive(Debug, Default)]
struct Inner {
    /// Orders by identifier.
    orders: BTreeMap<String, Order>,
    /// Items by identifier.
    items: BTreeMap<String, Item>,
    /// Parts by identifier.
    parts: BTreeMap<String, Part>,
    /// Part uniqueness index: `(item, part_key, seq)` to part id.
    part_index: BTreeMap<(String, String, i64), String>,
    /// Append-only event log.
    events: Vec<WorkEvent>,
    /// Append-only provenance log.
    provenance: Vec<ProvenanceRecord>,
    /// Idempotency records by `(scope, key_hash)`.
    idempotency: BTreeMap<(String, String), IdempotencyRecord>,
}

// ============================================================================
// SECTION: In-Memory Store
// ============================================================================

/// In-memory work order store for tests and examples.
#[derive(Debug, Default, Clone)]
pub struct InMemoryWorkOrderStore {
    /// Shared state protected by a mutex.
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryWorkOrderStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks the inner state, mapping poison to a store error.
    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Store("work order store mutex poisoned".to_string()))
    }
}

impl WorkOrderStore for InMemoryWorkOrderStore {
    fn get_order(&self, order_id: &OrderId) -> Result<Option<Order>, StoreError> {
        Ok(self.lock()?.orders.get(order_id.as_str()).cloned())
    }

    fn get_item(&self, item_id: &ItemId) -> Result<Option<Item>, StoreError> {
        Ok(self.lock()?.items.get(item_id.as_str()).cloned())
    }

    fn list_orders(&self) -> Result<Vec<Order>, StoreError> {
        let guard = self.lock()?;
        let mut orders: Vec<Order> = guard.orders.values().cloned().collect();
        orders.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(orders)
    }

    fn items_for_order(&self, order_id: &OrderId) -> Result<Vec<Item>, StoreError> {
        let guard = self.lock()?;
        let mut items: Vec<Item> = guard
            .items
            .values()
            .filter(|item| item.order_id == *order_id)
            .cloned()
            .collect();
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(items)
    }

    fn parts_for_item(&self, item_id: &ItemId) -> Result<Vec<Part>, StoreError> {
        let guard = self.lock()?;
        let mut parts: Vec<Part> = guard
            .parts
            .values()
            .filter(|part| part.item_id == *item_id)
            .cloned()
            .collect();
        parts.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(parts)
    }

    fn events_for_order(&self, order_id: &OrderId) -> Result<Vec<WorkEvent>, StoreError> {
        let guard = self.lock()?;
        Ok(guard
            .events
            .iter()
            .filter(|event| event.order_id == *order_id)
            .cloned()
            .collect())
    }

    fn events_for_item(&self, item_id: &ItemId) -> Result<Vec<WorkEvent>, StoreError> {
        let guard = self.lock()?;
        Ok(guard
            .events
            .iter()
            .filter(|event| event.item_id.as_ref() == Some(item_id))
            .cloned()
            .collect())
    }

    fn available_items(&self, now: Timestamp) -> Result<Vec<Item>, StoreError> {
        let guard = self.lock()?;
        Ok(guard
            .items
            .values()
            .filter(|item| match item.state {
                ItemState::Queued => !item.has_live_lease(now),
                ItemState::InProgress => item.has_expired_lease(now),
                _ => false,
            })
            .cloned()
            .collect())
    }

    fn expired_lease_items(&self, now: Timestamp) -> Result<Vec<Item>, StoreError> {
        let guard = self.lock()?;
        Ok(guard
            .items
            .values()
            .filter(|item| item.has_expired_lease(now))
            .cloned()
            .collect())
    }

    fn leased_items(&self, now: Timestamp) -> Result<Vec<Item>, StoreError> {
        let guard = self.lock()?;
        Ok(guard
            .items
            .values()
            .filter(|item| item.has_live_lease(now))
            .cloned()
            .collect())
    }

    fn orders_in_state_updated_before(
        &self,
        state: OrderState,
        cutoff: Timestamp,
    ) -> Result<Vec<Order>, StoreError> {
        let guard = self.lock()?;
        Ok(guard
            .orders
            .values()
            .filter(|order| order.state == state && order.last_transitioned_at < cutoff)
            .cloned()
            .collect())
    }

    fn items_in_state_updated_before(
        &self,
        state: ItemState,
        cutoff: Timestamp,
    ) -> Result<Vec<Item>, StoreError> {
        let guard = self.lock()?;
        Ok(guard
            .items
            .values()
            .filter(|item| item.state == state && item.last_transitioned_at < cutoff)
            .cloned()
            .collect())
    }

    fn insert_order(&self, order: &Order, event: &WorkEvent) -> Result<(), StoreError> {
        let mut guard = self.lock()?;
        if guard.orders.contains_key(order.id.as_str()) {
            return Err(StoreError::Conflict(format!("order already exists: {}", order.id)));
        }
        guard.orders.insert(order.id.as_str().to_string(), order.clone());
        guard.events.push(event.clone());
        Ok(())
    }

    fn insert_items(&self, items: &[Item], event: &WorkEvent) -> Result<(), StoreError> {
        let mut guard = self.lock()?;
        for item in items {
            if guard.items.contains_key(item.id.as_str()) {
                return Err(StoreError::Conflict(format!("item already exists: {}", item.id)));
            }
        }
        for item in items {
            guard.items.insert(item.id.as_str().to_string(), item.clone());
        }
        guard.events.push(event.clone());
        Ok(())
    }

    fn update_order(&self, order: &Order, event: &WorkEvent) -> Result<(), StoreError> {
        let mut guard = self.lock()?;
        if !guard.orders.contains_key(order.id.as_str()) {
            return Err(StoreError::Invalid(format!("order missing: {}", order.id)));
        }
        guard.orders.insert(order.id.as_str().to_string(), order.clone());
        guard.events.push(event.clone());
        Ok(())
    }

    fn update_item(&self, item: &Item, event: &WorkEvent) -> Result<(), StoreError> {
        let mut guard = self.lock()?;
        if !guard.items.contains_key(item.id.as_str()) {
            return Err(StoreError::Invalid(format!("item missing: {}", item.id)));
        }
        guard.items.insert(item.id.as_str().to_string(), item.clone());
        guard.events.push(event.clone());
        Ok(())
    }

    fn upsert_part(
        &self,
        part: &Part,
        item: &Item,
        events: &[WorkEvent],
    ) -> Result<(), StoreError> {
        let mut guard = self.lock()?;
        if !guard.items.contains_key(item.id.as_str()) {
            return Err(StoreError::Invalid(format!("item missing: {}", item.id)));
        }
        let index_key = (
            part.item_id.as_str().to_string(),
            part.part_key.as_str().to_string(),
            seq_key(part.seq),
        );
        if let Some(existing_id) = guard.part_index.get(&index_key).cloned() {
            guard.parts.remove(&existing_id);
        }
        guard.part_index.insert(index_key, part.id.as_str().to_string());
        guard.parts.insert(part.id.as_str().to_string(), part.clone());
        guard.items.insert(item.id.as_str().to_string(), item.clone());
        guard.events.extend(events.iter().cloned());
        Ok(())
    }

    fn insert_provenance(&self, record: &ProvenanceRecord) -> Result<(), StoreError> {
        self.lock()?.provenance.push(record.clone());
        Ok(())
    }

    fn idempotency_get(
        &self,
        scope: &str,
        key_hash: &str,
    ) -> Result<Option<IdempotencyRecord>, StoreError> {
        let guard = self.lock()?;
        Ok(guard.idempotency.get(&(scope.to_string(), key_hash.to_string())).cloned())
    }

    fn idempotency_put(&self, record: &IdempotencyRecord) -> Result<IdempotencyPut, StoreError> {
        let mut guard = self.lock()?;
        let key = (record.scope.clone(), record.key_hash.clone());
        if let Some(existing) = guard.idempotency.get(&key) {
            return Ok(IdempotencyPut::Conflict(existing.clone()));
        }
        guard.idempotency.insert(key, record.clone());
        Ok(IdempotencyPut::Inserted)
    }

    fn try_set_lease(
        &self,
        item_id: &ItemId,
        owner: &AgentId,
        expires_at: Timestamp,
        now: Timestamp,
        allowed_states: &[ItemState],
    ) -> Result<LeaseMutation, StoreError> {
        let mut guard = self.lock()?;
        let Some(item) = guard.items.get_mut(item_id.as_str()) else {
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
        Ok(LeaseMutation::Applied(item.clone()))
    }

    fn try_extend_lease(
        &self,
        item_id: &ItemId,
        owner: &AgentId,
        expires_at: Timestamp,
        heartbeat_at: Timestamp,
        now: Timestamp,
    ) -> Result<LeaseMutation, StoreError> {
        let mut guard = self.lock()?;
        let Some(item) = guard.items.get_mut(item_id.as_str()) else {
            return Ok(LeaseMutation::NotFound);
        };
        if item.leased_by.as_ref() != Some(owner) {
            return Ok(LeaseMutation::NotOwner {
                holder: item.leased_by.clone(),
            });
        }
        if !item.has_live_lease(now) {
            return Ok(LeaseMutation::Expired);
        }
        item.lease_expires_at = Some(expires_at);
        item.last_heartbeat_at = Some(heartbeat_at);
        Ok(LeaseMutation::Applied(item.clone()))
    }

    fn try_clear_lease(
        &self,
        item_id: &ItemId,
        owner: &AgentId,
    ) -> Result<LeaseMutation, StoreError> {
        let mut guard = self.lock()?;
        let Some(item) = guard.items.get_mut(item_id.as_str()) else {
            return Ok(LeaseMutation::NotFound);
        };
        if item.leased_by.as_ref() != Some(owner) {
            return Ok(LeaseMutation::NotOwner {
                holder: item.leased_by.clone(),
            });
        }
        item.clear_lease();
        Ok(LeaseMutation::Applied(item.clone()))
    }

    fn take_expired_lease(
        &self,
        item_id: &ItemId,
        now: Timestamp,
    ) -> Result<Option<Item>, StoreError> {
        let mut guard = self.lock()?;
        let Some(item) = guard.items.get_mut(item_id.as_str()) else {
            return Ok(None);
        };
        if !item.has_expired_lease(now) {
            return Ok(None);
        }
        let snapshot = item.clone();
        item.clear_lease();
        Ok(Some(snapshot))
    }

    fn clear_all_leases(&self) -> Result<(), StoreError> {
        let mut guard = self.lock()?;
        for item in guard.items.values_mut() {
            item.clear_lease();
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: In-Memory Key-Value Store
// ============================================================================

/// In-memory conditional key-value store with TTL semantics.
#[derive(Debug, Default, Clone)]
pub struct InMemoryKeyValueStore {
    /// Entries protected by a mutex.
    entries: Arc<Mutex<BTreeMap<String, KvEntry>>>,
}

impl InMemoryKeyValueStore {
    /// Creates an empty key-value store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks the entries, mapping poison to a backend error.
    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<String, KvEntry>>, KvError> {
        self.entries
            .lock()
            .map_err(|_| KvError::Backend("key-value store mutex poisoned".to_string()))
    }

    /// Returns true when the entry is live at `now`.
    fn is_live(entry: &KvEntry, now: Timestamp) -> bool {
        entry.expires_at > now
    }
}

impl KeyValueStore for InMemoryKeyValueStore {
    fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl_seconds: u64,
        now: Timestamp,
    ) -> Result<bool, KvError> {
        let mut guard = self.lock()?;
        if guard.get(key).is_some_and(|entry| Self::is_live(entry, now)) {
            return Ok(false);
        }
        guard.insert(
            key.to_string(),
            KvEntry {
                value: value.to_string(),
                expires_at: now.plus_seconds(ttl_seconds),
            },
        );
        Ok(true)
    }

    fn compare_and_expire(
        &self,
        key: &str,
        expected: &str,
        ttl_seconds: u64,
        now: Timestamp,
    ) -> Result<bool, KvError> {
        let mut guard = self.lock()?;
        let Some(entry) = guard.get_mut(key) else {
            return Ok(false);
        };
        if !Self::is_live(entry, now) || entry.value != expected {
            return Ok(false);
        }
        entry.expires_at = now.plus_seconds(ttl_seconds);
        Ok(true)
    }

    fn compare_and_delete(
        &self,
        key: &str,
        expected: &str,
        now: Timestamp,
    ) -> Result<bool, KvError> {
        let mut guard = self.lock()?;
        let matches = guard
            .get(key)
            .is_some_and(|entry| Self::is_live(entry, now) && entry.value == expected);
        if matches {
            guard.remove(key);
        }
        Ok(matches)
    }

    fn get(&self, key: &str, now: Timestamp) -> Result<Option<KvEntry>, KvError> {
        let guard = self.lock()?;
        Ok(guard.get(key).filter(|entry| Self::is_live(entry, now)).cloned())
    }

    fn scan_prefix(
        &self,
        prefix: &str,
        now: Timestamp,
    ) -> Result<Vec<(String, KvEntry)>, KvError> {
        let guard = self.lock()?;
        Ok(guard
            .iter()
            .filter(|(key, entry)| key.starts_with(prefix) && Self::is_live(entry, now))
            .map(|(key, entry)| (key.clone(), entry.clone()))
            .collect())
    }

    fn clear(&self) -> Result<(), KvError> {
        self.lock()?.clear();
        Ok(())
    }
}
