// work-order-core/src/runtime/lease.rs
// ============================================================================
// Module: Lease Engine
// Description: Exclusive, time-bounded item ownership with pluggable backends.
// Purpose: Acquire, extend, release, and reclaim leases, and dispatch the
// best available item under priority-FIFO ordering and concurrency caps.
// Dependencies: crate::{core, interfaces, runtime::machine}
// ============================================================================

//! ## Overview
//! A lease is exclusive ownership of one item by one agent until an expiry.
//! Ownership bookkeeping is pluggable: the database backend rides the item
//! row's lease columns under the store's row lock; the key-value backend uses
//! conditional set-with-expiry primitives and lets the TTL do reclaim work.
//! Either way, the item row mirrors the lease fields so queries and the
//! reclaim sweep see one consistent picture.
//!
//! Global dispatch picks the single best available item: order priority
//! descending, then item creation time ascending within a priority class.
//! Sibling items of one order carry no mutual ordering; they may be worked in
//! parallel by different agents.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;

use crate::core::actor::Actor;
use crate::core::identifiers::AgentId;
use crate::core::identifiers::ItemId;
use crate::core::identifiers::LeaseKey;
use crate::core::identifiers::OrderTypeName;
use crate::core::model::Diagnostic;
use crate::core::model::EventKind;
use crate::core::model::Item;
use crate::core::state::ItemState;
use crate::core::time::Timestamp;
use crate::interfaces::KeyValueStore;
use crate::interfaces::KvError;
use crate::interfaces::LeaseMutation;
use crate::interfaces::StoreError;
use crate::interfaces::WorkOrderStore;
use crate::runtime::machine::MachineError;
use crate::runtime::machine::StateMachine;
use crate::runtime::machine::TransitionContext;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Lease engine errors.
#[derive(Debug, Error)]
pub enum LeaseError {
    /// Item is leased by another agent or the caller does not own the lease.
    #[error("lease conflict on item {item_id}: held by {holder}")]
    Conflict {
        /// Contended item.
        item_id: ItemId,
        /// Current holder, or `none` when the lease is absent.
        holder: String,
    },
    /// Item is not in a leasable state.
    #[error("lease conflict on item {item_id}: state {state} is not leasable")]
    NotLeasable {
        /// Contended item.
        item_id: ItemId,
        /// Observed state.
        state: ItemState,
    },
    /// Operation requires a live lease but the lease passed its TTL.
    #[error("lease expired for item {item_id}")]
    Expired {
        /// Item whose lease lapsed.
        item_id: ItemId,
    },
    /// Item does not exist.
    #[error("item not found: {0}")]
    NotFound(ItemId),
    /// Store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Key-value backend failure.
    #[error(transparent)]
    Kv(#[from] KvError),
    /// State machine failure during a lease-driven transition.
    #[error(transparent)]
    Machine(#[from] MachineError),
}

// ============================================================================
// SECTION: Backend Contract
// ============================================================================

/// A granted or observed lease.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseGrant {
    /// Owning agent.
    pub owner: AgentId,
    /// Expiry time.
    pub expires_at: Timestamp,
}

/// Pluggable ownership bookkeeping keyed by [`LeaseKey`].
///
/// Backends decide who owns a key; the [`LeaseService`] mirrors outcomes onto
/// item rows and drives the state machine.
pub trait LeaseBackend {
    /// Acquires the key for `owner` with a TTL.
    ///
    /// # Errors
    ///
    /// Returns [`LeaseError::Conflict`] when a live lease exists, and
    /// [`LeaseError::NotLeasable`] when the underlying row refuses.
    fn acquire(
        &self,
        key: &LeaseKey,
        owner: &AgentId,
        ttl_seconds: u64,
        now: Timestamp,
    ) -> Result<LeaseGrant, LeaseError>;

    /// Extends a live lease owned by `owner`.
    ///
    /// # Errors
    ///
    /// Returns [`LeaseError::Conflict`] for non-owners and
    /// [`LeaseError::Expired`] once the TTL has passed.
    fn extend(
        &self,
        key: &LeaseKey,
        owner: &AgentId,
        ttl_seconds: u64,
        now: Timestamp,
    ) -> Result<LeaseGrant, LeaseError>;

    /// Releases a lease owned by `owner`.
    ///
    /// # Errors
    ///
    /// Returns [`LeaseError::Conflict`] for non-owners.
    fn release(&self, key: &LeaseKey, owner: &AgentId, now: Timestamp)
    -> Result<(), LeaseError>;

    /// Clears expired ownership records for the given keys, returning how
    /// many were cleared. Key-value backends are a no-op returning zero: the
    /// TTL does the work.
    ///
    /// # Errors
    ///
    /// Returns [`LeaseError`] when the backend fails.
    fn reclaim(&self, keys: &[LeaseKey], now: Timestamp) -> Result<usize, LeaseError>;

    /// Returns the current owner of a key, when a live lease exists.
    ///
    /// # Errors
    ///
    /// Returns [`LeaseError`] when the backend fails.
    fn owner(&self, key: &LeaseKey, now: Timestamp) -> Result<Option<AgentId>, LeaseError>;

    /// Returns remaining TTL seconds for a key, when a live lease exists.
    ///
    /// # Errors
    ///
    /// Returns [`LeaseError`] when the backend fails.
    fn ttl_remaining(&self, key: &LeaseKey, now: Timestamp) -> Result<Option<u64>, LeaseError>;

    /// Lists all live leases.
    ///
    /// # Errors
    ///
    /// Returns [`LeaseError`] when the backend fails.
    fn all_leases(&self, now: Timestamp) -> Result<Vec<(LeaseKey, LeaseGrant)>, LeaseError>;

    /// Clears every lease. Diagnostic surface.
    ///
    /// # Errors
    ///
    /// Returns [`LeaseError`] when the backend fails.
    fn clear_all(&self) -> Result<(), LeaseError>;
}

// ============================================================================
// SECTION: Database Backend
// ============================================================================

/// Item states a fresh lease may be granted in.
const LEASABLE_STATES: &[ItemState] = &[ItemState::Queued, ItemState::InProgress];

/// Lease backend that rides the item rows' lease columns under the store's
/// row lock.
#[derive(Debug, Clone)]
pub struct DatabaseLeaseBackend<S> {
    /// Backing store.
    store: S,
}

impl<S: WorkOrderStore> DatabaseLeaseBackend<S> {
    /// Creates a database-backed lease backend over a store.
    pub const fn new(store: S) -> Self {
        Self { store }
    }

    /// Resolves the item addressed by a lease key.
    fn item_id(key: &LeaseKey) -> Result<ItemId, LeaseError> {
        key.item_id()
            .ok_or_else(|| LeaseError::Store(StoreError::Invalid(format!("bad lease key: {key}"))))
    }
}

impl<S: WorkOrderStore> LeaseBackend for DatabaseLeaseBackend<S> {
    fn acquire(
        &self,
        key: &LeaseKey,
        owner: &AgentId,
        ttl_seconds: u64,
        now: Timestamp,
    ) -> Result<LeaseGrant, LeaseError> {
        let item_id = Self::item_id(key)?;
        let expires_at = now.plus_seconds(ttl_seconds);
        match self.store.try_set_lease(&item_id, owner, expires_at, now, LEASABLE_STATES)? {
            LeaseMutation::Applied(_) => Ok(LeaseGrant {
                owner: owner.clone(),
                expires_at,
            }),
            LeaseMutation::Held { holder, .. } => Err(LeaseError::Conflict {
                item_id,
                holder: holder.to_string(),
            }),
            LeaseMutation::NotLeasable { state } => {
                Err(LeaseError::NotLeasable { item_id, state })
            }
            LeaseMutation::NotFound => Err(LeaseError::NotFound(item_id)),
            LeaseMutation::NotOwner { holder } => Err(LeaseError::Conflict {
                item_id,
                holder: holder.map_or_else(|| "none".to_string(), |h| h.to_string()),
            }),
            LeaseMutation::Expired => Err(LeaseError::Expired { item_id }),
        }
    }

    fn extend(
        &self,
        key: &LeaseKey,
        owner: &AgentId,
        ttl_seconds: u64,
        now: Timestamp,
    ) -> Result<LeaseGrant, LeaseError> {
        let item_id = Self::item_id(key)?;
        let expires_at = now.plus_seconds(ttl_seconds);
        match self.store.try_extend_lease(&item_id, owner, expires_at, now, now)? {
            LeaseMutation::Applied(_) => Ok(LeaseGrant {
                owner: owner.clone(),
                expires_at,
            }),
            LeaseMutation::NotOwner { holder } => Err(LeaseError::Conflict {
                item_id,
                holder: holder.map_or_else(|| "none".to_string(), |h| h.to_string()),
            }),
            LeaseMutation::Expired => Err(LeaseError::Expired { item_id }),
            LeaseMutation::NotFound => Err(LeaseError::NotFound(item_id)),
            LeaseMutation::Held { holder, .. } => Err(LeaseError::Conflict {
                item_id,
                holder: holder.to_string(),
            }),
            LeaseMutation::NotLeasable { state } => {
                Err(LeaseError::NotLeasable { item_id, state })
            }
        }
    }

    fn release(
        &self,
        key: &LeaseKey,
        owner: &AgentId,
        _now: Timestamp,
    ) -> Result<(), LeaseError> {
        let item_id = Self::item_id(key)?;
        match self.store.try_clear_lease(&item_id, owner)? {
            LeaseMutation::Applied(_) => Ok(()),
            LeaseMutation::NotOwner { holder } => Err(LeaseError::Conflict {
                item_id,
                holder: holder.map_or_else(|| "none".to_string(), |h| h.to_string()),
            }),
            LeaseMutation::NotFound => Err(LeaseError::NotFound(item_id)),
            _ => Err(LeaseError::Store(StoreError::Invalid(
                "unexpected lease mutation outcome on release".to_string(),
            ))),
        }
    }

    fn reclaim(&self, keys: &[LeaseKey], now: Timestamp) -> Result<usize, LeaseError> {
        let mut cleared = 0;
        for key in keys {
            let item_id = Self::item_id(key)?;
            if self.store.take_expired_lease(&item_id, now)?.is_some() {
                cleared += 1;
            }
        }
        Ok(cleared)
    }

    fn owner(&self, key: &LeaseKey, now: Timestamp) -> Result<Option<AgentId>, LeaseError> {
        let item_id = Self::item_id(key)?;
        Ok(self
            .store
            .get_item(&item_id)?
            .filter(|item| item.has_live_lease(now))
            .and_then(|item| item.leased_by))
    }

    fn ttl_remaining(&self, key: &LeaseKey, now: Timestamp) -> Result<Option<u64>, LeaseError> {
        let item_id = Self::item_id(key)?;
        Ok(self
            .store
            .get_item(&item_id)?
            .filter(|item| item.has_live_lease(now))
            .and_then(|item| item.lease_expires_at)
            .map(|expiry| now.seconds_until(&expiry)))
    }

    fn all_leases(&self, now: Timestamp) -> Result<Vec<(LeaseKey, LeaseGrant)>, LeaseError> {
        let mut leases = Vec::new();
        for item in self.store.leased_items(now)? {
            if let (Some(owner), Some(expires_at)) = (item.leased_by.clone(), item.lease_expires_at)
            {
                leases.push((LeaseKey::for_item(&item.id), LeaseGrant { owner, expires_at }));
            }
        }
        Ok(leases)
    }

    fn clear_all(&self) -> Result<(), LeaseError> {
        self.store.clear_all_leases()?;
        Ok(())
    }
}

// ============================================================================
// SECTION: Key-Value Backend
// ============================================================================

/// Lease backend over a conditional set-with-expiry key-value primitive.
#[derive(Debug, Clone)]
pub struct KeyValueLeaseBackend<K> {
    /// Key-value store.
    kv: K,
}

impl<K: KeyValueStore> KeyValueLeaseBackend<K> {
    /// Creates a key-value lease backend.
    pub const fn new(kv: K) -> Self {
        Self { kv }
    }
}

impl<K: KeyValueStore> LeaseBackend for KeyValueLeaseBackend<K> {
    fn acquire(
        &self,
        key: &LeaseKey,
        owner: &AgentId,
        ttl_seconds: u64,
        now: Timestamp,
    ) -> Result<LeaseGrant, LeaseError> {
        let item_id = key.item_id().unwrap_or_else(|| ItemId::new(key.as_str()));
        if self.kv.set_if_absent(key.as_str(), owner.as_str(), ttl_seconds, now)? {
            return Ok(LeaseGrant {
                owner: owner.clone(),
                expires_at: now.plus_seconds(ttl_seconds),
            });
        }
        let holder = self
            .kv
            .get(key.as_str(), now)?
            .map_or_else(|| "none".to_string(), |entry| entry.value);
        Err(LeaseError::Conflict { item_id, holder })
    }

    fn extend(
        &self,
        key: &LeaseKey,
        owner: &AgentId,
        ttl_seconds: u64,
        now: Timestamp,
    ) -> Result<LeaseGrant, LeaseError> {
        let item_id = key.item_id().unwrap_or_else(|| ItemId::new(key.as_str()));
        if self.kv.compare_and_expire(key.as_str(), owner.as_str(), ttl_seconds, now)? {
            return Ok(LeaseGrant {
                owner: owner.clone(),
                expires_at: now.plus_seconds(ttl_seconds),
            });
        }
        match self.kv.get(key.as_str(), now)? {
            None => Err(LeaseError::Expired { item_id }),
            Some(entry) => Err(LeaseError::Conflict {
                item_id,
                holder: entry.value,
            }),
        }
    }

    fn release(&self, key: &LeaseKey, owner: &AgentId, now: Timestamp) -> Result<(), LeaseError> {
        let item_id = key.item_id().unwrap_or_else(|| ItemId::new(key.as_str()));
        if self.kv.compare_and_delete(key.as_str(), owner.as_str(), now)? {
            return Ok(());
        }
        let holder = self
            .kv
            .get(key.as_str(), now)?
            .map_or_else(|| "none".to_string(), |entry| entry.value);
        Err(LeaseError::Conflict { item_id, holder })
    }

    fn reclaim(&self, _keys: &[LeaseKey], _now: Timestamp) -> Result<usize, LeaseError> {
        // TTL expiry is the reclaim; nothing to scan.
        Ok(0)
    }

    fn owner(&self, key: &LeaseKey, now: Timestamp) -> Result<Option<AgentId>, LeaseError> {
        Ok(self.kv.get(key.as_str(), now)?.map(|entry| AgentId::new(entry.value)))
    }

    fn ttl_remaining(&self, key: &LeaseKey, now: Timestamp) -> Result<Option<u64>, LeaseError> {
        Ok(self
            .kv
            .get(key.as_str(), now)?
            .map(|entry| now.seconds_until(&entry.expires_at)))
    }

    fn all_leases(&self, now: Timestamp) -> Result<Vec<(LeaseKey, LeaseGrant)>, LeaseError> {
        Ok(self
            .kv
            .scan_prefix("lease:item:", now)?
            .into_iter()
            .map(|(key, entry)| {
                (
                    LeaseKey::for_item(&ItemId::new(
                        key.strip_prefix("lease:item:").unwrap_or(&key),
                    )),
                    LeaseGrant {
                        owner: AgentId::new(entry.value),
                        expires_at: entry.expires_at,
                    },
                )
            })
            .collect())
    }

    fn clear_all(&self) -> Result<(), LeaseError> {
        self.kv.clear()?;
        Ok(())
    }
}

// ============================================================================
// SECTION: Dispatch Filters
// ============================================================================

/// Filters narrowing global dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchFilters {
    /// Restrict to one order type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_type: Option<OrderTypeName>,
    /// Restrict to orders at or above this priority.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_priority: Option<i64>,
    /// Restrict to orders whose payload tenant path equals this value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
}

// ============================================================================
// SECTION: Lease Settings
// ============================================================================

/// Lease engine tunables injected at construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseSettings {
    /// Maximum unheartbeated lease lifetime in seconds.
    pub ttl_seconds: u64,
    /// Advisory heartbeat cadence in seconds; must be below the TTL.
    pub heartbeat_every_seconds: u64,
    /// Per-agent active-lease cap; `None` disables.
    pub max_per_agent: Option<u32>,
    /// Per-type active-lease cap; `None` disables.
    pub max_per_type: Option<u32>,
    /// Dotted payload path matched by the dispatch tenant filter.
    pub tenant_payload_path: String,
}

impl Default for LeaseSettings {
    fn default() -> Self {
        Self {
            ttl_seconds: 600,
            heartbeat_every_seconds: 120,
            max_per_agent: None,
            max_per_type: None,
            tenant_payload_path: "tenant_id".to_string(),
        }
    }
}

// ============================================================================
// SECTION: Lease Service
// ============================================================================

/// Item-scoped lease operations plus global dispatch and the reclaim sweep.
#[derive(Debug, Clone)]
pub struct LeaseService<S, B> {
    /// Backing store.
    store: S,
    /// Ownership backend.
    backend: B,
    /// Transition gate.
    machine: StateMachine,
    /// Tunables.
    settings: LeaseSettings,
}

impl<S, B> LeaseService<S, B>
where
    S: WorkOrderStore,
    B: LeaseBackend,
{
    /// Creates a lease service.
    pub const fn new(store: S, backend: B, machine: StateMachine, settings: LeaseSettings) -> Self {
        Self {
            store,
            backend,
            machine,
            settings,
        }
    }

    /// Returns the ownership backend.
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    /// Acquires a lease on a specific item for an agent.
    ///
    /// Refuses when the item carries a live lease or is not in a leasable
    /// state. On success the item transitions `queued -> leased` (an
    /// `in_progress` item keeps its state) and a `leased` event is recorded.
    ///
    /// # Errors
    ///
    /// Returns [`LeaseError::Conflict`], [`LeaseError::NotLeasable`], or
    /// [`LeaseError::NotFound`] per the acquire contract.
    pub fn acquire_item(
        &self,
        item_id: &ItemId,
        agent_id: &AgentId,
        now: Timestamp,
    ) -> Result<Item, LeaseError> {
        let item = self.store.get_item(item_id)?.ok_or_else(|| {
            LeaseError::NotFound(item_id.clone())
        })?;
        if item.has_live_lease(now) {
            return Err(LeaseError::Conflict {
                item_id: item_id.clone(),
                holder: item
                    .leased_by
                    .map_or_else(|| "none".to_string(), |h| h.to_string()),
            });
        }
        if !LEASABLE_STATES.contains(&item.state) {
            return Err(LeaseError::NotLeasable {
                item_id: item_id.clone(),
                state: item.state,
            });
        }

        let key = LeaseKey::for_item(item_id);
        let grant = self.backend.acquire(&key, agent_id, self.settings.ttl_seconds, now)?;

        let mut leased = self
            .store
            .get_item(item_id)?
            .ok_or_else(|| LeaseError::NotFound(item_id.clone()))?;
        leased.leased_by = Some(agent_id.clone());
        leased.lease_expires_at = Some(grant.expires_at);
        leased.last_heartbeat_at = Some(now);

        let actor = Actor::agent(agent_id);
        let ctx = TransitionContext {
            kind: Some(EventKind::Leased),
            payload: Some(json!({
                "agent_id": agent_id.as_str(),
                "lease_expires_at": grant.expires_at,
            })),
            ..TransitionContext::default()
        };
        let leased = if leased.state == ItemState::Queued {
            self.machine.transition_item(&self.store, &leased, ItemState::Leased, &actor, now, ctx)?
        } else {
            self.machine.record_item_event(&self.store, &leased, EventKind::Leased, &actor, now, ctx)?;
            leased
        };
        Ok(leased)
    }

    /// Extends a live lease (heartbeat).
    ///
    /// # Errors
    ///
    /// Returns [`LeaseError::Conflict`] for non-owners and
    /// [`LeaseError::Expired`] once the TTL has passed; a rejected extend
    /// does not mutate the lease.
    pub fn extend_item(
        &self,
        item_id: &ItemId,
        agent_id: &AgentId,
        now: Timestamp,
    ) -> Result<Item, LeaseError> {
        let item = self
            .store
            .get_item(item_id)?
            .ok_or_else(|| LeaseError::NotFound(item_id.clone()))?;
        if item.leased_by.as_ref() != Some(agent_id) {
            return Err(LeaseError::Conflict {
                item_id: item_id.clone(),
                holder: item
                    .leased_by
                    .map_or_else(|| "none".to_string(), |h| h.to_string()),
            });
        }
        if !item.has_live_lease(now) {
            return Err(LeaseError::Expired {
                item_id: item_id.clone(),
            });
        }

        let key = LeaseKey::for_item(item_id);
        let grant = self.backend.extend(&key, agent_id, self.settings.ttl_seconds, now)?;

        let mut extended = item;
        extended.lease_expires_at = Some(grant.expires_at);
        extended.last_heartbeat_at = Some(now);
        let ctx = TransitionContext {
            kind: Some(EventKind::Heartbeat),
            payload: Some(json!({ "lease_expires_at": grant.expires_at })),
            ..TransitionContext::default()
        };
        self.machine.record_item_event(
            &self.store,
            &extended,
            EventKind::Heartbeat,
            &Actor::agent(agent_id),
            now,
            ctx,
        )?;
        Ok(extended)
    }

    /// Releases a lease held by its owner, cascading `leased -> queued`.
    ///
    /// # Errors
    ///
    /// Returns [`LeaseError::Conflict`] for non-owners.
    pub fn release_item(
        &self,
        item_id: &ItemId,
        agent_id: &AgentId,
        now: Timestamp,
    ) -> Result<Item, LeaseError> {
        let item = self
            .store
            .get_item(item_id)?
            .ok_or_else(|| LeaseError::NotFound(item_id.clone()))?;
        if item.leased_by.as_ref() != Some(agent_id) {
            return Err(LeaseError::Conflict {
                item_id: item_id.clone(),
                holder: item
                    .leased_by
                    .map_or_else(|| "none".to_string(), |h| h.to_string()),
            });
        }

        let key = LeaseKey::for_item(item_id);
        self.backend.release(&key, agent_id, now)?;

        let mut released = item;
        released.clear_lease();
        let ctx = TransitionContext {
            kind: Some(EventKind::Released),
            payload: Some(json!({ "agent_id": agent_id.as_str() })),
            ..TransitionContext::default()
        };
        let released = self.machine.transition_item(
            &self.store,
            &released,
            ItemState::Queued,
            &Actor::agent(agent_id),
            now,
            ctx,
        )?;
        Ok(released)
    }

    /// Reclaims every expired lease: increments attempts, dead-ends items
    /// that exhausted their budget, and requeues the rest.
    ///
    /// Items are processed one at a time under their own row lock; a failure
    /// on one item does not abort the sweep.
    ///
    /// # Errors
    ///
    /// Returns [`LeaseError::Store`] only when the initial scan fails.
    pub fn reclaim_expired(&self, now: Timestamp) -> Result<ReclaimOutcome, LeaseError> {
        let expired = self.store.expired_lease_items(now)?;
        let mut outcome = ReclaimOutcome::default();
        for item in expired {
            match self.reclaim_one(&item, now) {
                Ok(Reclaimed::Skipped) => {}
                Ok(Reclaimed::Requeued) => outcome.requeued += 1,
                Ok(Reclaimed::Failed) => outcome.failed += 1,
                Err(err) => {
                    tracing::warn!(item_id = %item.id, error = %err, "lease reclaim failed");
                    outcome.errors.push(format!("item {}: {err}", item.id));
                }
            }
        }
        Ok(outcome)
    }

    /// Reclaims a single expired item.
    fn reclaim_one(&self, item: &Item, now: Timestamp) -> Result<Reclaimed, LeaseError> {
        // The conditional take wins exactly once per expiry, so concurrent
        // sweeps cannot double-count an attempt.
        let Some(snapshot) = self.store.take_expired_lease(&item.id, now)? else {
            return Ok(Reclaimed::Skipped);
        };
        let key = LeaseKey::for_item(&item.id);
        self.backend.reclaim(std::slice::from_ref(&key), now)?;

        let mut updated = snapshot;
        updated.clear_lease();
        updated.attempts = updated.attempts.saturating_add(1);

        let exhausted = updated.attempts >= updated.max_attempts;
        let ctx = TransitionContext {
            kind: Some(EventKind::LeaseExpired),
            payload: Some(json!({ "attempts": updated.attempts })),
            ..TransitionContext::default()
        };
        if exhausted {
            updated.error = Some(Diagnostic::new(
                "max_attempts_exceeded",
                format!("item exhausted {} attempts", updated.max_attempts),
            ));
            self.machine.transition_item(
                &self.store,
                &updated,
                ItemState::Failed,
                &Actor::system(),
                now,
                ctx,
            )?;
            Ok(Reclaimed::Failed)
        } else {
            self.machine.transition_item(
                &self.store,
                &updated,
                ItemState::Queued,
                &Actor::system(),
                now,
                ctx,
            )?;
            Ok(Reclaimed::Requeued)
        }
    }

    /// Selects and acquires the single best available item for an agent.
    ///
    /// Ordering is strict: order priority descending, then item creation time
    /// ascending. Caps are evaluated from counts of non-expired leases before
    /// selection and against the selected item's type. Returns `None` when no
    /// item matches, a cap is breached, or the acquire races and loses; the
    /// caller retries.
    ///
    /// # Errors
    ///
    /// Returns [`LeaseError::Store`] when scanning fails.
    pub fn acquire_next(
        &self,
        agent_id: &AgentId,
        filters: &DispatchFilters,
        now: Timestamp,
    ) -> Result<Option<Item>, LeaseError> {
        let active = self.store.leased_items(now)?;
        if let Some(cap) = self.settings.max_per_agent {
            let held = active
                .iter()
                .filter(|item| item.leased_by.as_ref() == Some(agent_id))
                .count();
            if held >= cap as usize {
                return Ok(None);
            }
        }

        let available = self.store.available_items(now)?;
        let mut candidates = Vec::with_capacity(available.len());
        for item in available {
            let Some(order) = self.store.get_order(&item.order_id)? else {
                continue;
            };
            if let Some(wanted) = &filters.order_type {
                if item.item_type != *wanted {
                    continue;
                }
            }
            if let Some(min) = filters.min_priority {
                if order.priority < min {
                    continue;
                }
            }
            if let Some(tenant) = &filters.tenant_id {
                let matches = payload_path(&order.payload, &self.settings.tenant_payload_path)
                    .and_then(Value::as_str)
                    .is_some_and(|value| value == tenant);
                if !matches {
                    continue;
                }
            }
            candidates.push((order.priority, item));
        }

        candidates.sort_by(|(pa, ia), (pb, ib)| {
            pb.cmp(pa).then(ia.created_at.cmp(&ib.created_at)).then(ia.id.cmp(&ib.id))
        });

        let Some((_, best)) = candidates.into_iter().next() else {
            return Ok(None);
        };

        if let Some(cap) = self.settings.max_per_type {
            let held = active
                .iter()
                .filter(|item| item.item_type == best.item_type)
                .count();
            if held >= cap as usize {
                return Ok(None);
            }
        }

        match self.acquire_item(&best.id, agent_id, now) {
            Ok(item) => Ok(Some(item)),
            Err(LeaseError::Conflict { .. } | LeaseError::NotLeasable { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }
}

/// Per-item reclaim outcome.
enum Reclaimed {
    /// Lease already cleared by a concurrent sweep.
    Skipped,
    /// Item returned to the queue.
    Requeued,
    /// Item exhausted its retry budget.
    Failed,
}

/// Aggregate outcome of one reclaim sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReclaimOutcome {
    /// Items returned to the queue.
    pub requeued: usize,
    /// Items that exhausted their retry budget.
    pub failed: usize,
    /// Per-item errors that did not abort the sweep.
    pub errors: Vec<String>,
}

// ============================================================================
// SECTION: Payload Paths
// ============================================================================

/// Resolves a dotted path inside an order payload.
fn payload_path<'v>(payload: &'v Value, path: &str) -> Option<&'v Value> {
    let mut cursor = payload;
    for segment in path.split('.') {
        cursor = cursor.get(segment)?;
    }
    Some(cursor)
}
