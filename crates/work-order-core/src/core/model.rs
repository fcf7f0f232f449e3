// work-order-core/src/core/model.rs
// ============================================================================
// Module: Work Order Data Model
// Description: Persisted rows for orders, items, parts, events, provenance,
// and idempotency keys.
// Purpose: Provide stable, serializable row types shared by every backend.
// Dependencies: crate::core::{actor, hashing, identifiers, state, time}, serde
// ============================================================================

//! ## Overview
//! These types are the canonical source of truth for every store backend and
//! any derived API surface. Orders own items; items reference orders by id
//! only; events reference order and optional item by id. No back-pointers are
//! stored; relationships are rehydrated via query.
//!
//! Opaque fields (`payload`, `meta`, `input`, `result`) are JSON values the
//! engine persists verbatim and never interprets beyond validation hooks.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::core::actor::Actor;
use crate::core::hashing::HashDigest;
use crate::core::identifiers::AgentId;
use crate::core::identifiers::EventId;
use crate::core::identifiers::ItemId;
use crate::core::identifiers::OrderId;
use crate::core::identifiers::OrderTypeName;
use crate::core::identifiers::PartId;
use crate::core::identifiers::PartKey;
use crate::core::identifiers::ProvenanceId;
use crate::core::identifiers::RequestId;
use crate::core::state::ItemState;
use crate::core::state::OrderState;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Diagnostics
// ============================================================================

/// Structured diagnostic recorded on failed items and apply failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Stable machine-readable code (for example `max_attempts_exceeded`).
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Optional structured details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl Diagnostic {
    /// Builds a diagnostic from a code and message.
    #[must_use]
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }
}

/// One validation issue pointing at an offending path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// Path to the offending node (JSON pointer or dotted path).
    pub path: String,
    /// Stable machine-readable code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

impl ValidationIssue {
    /// Builds a validation issue.
    #[must_use]
    pub fn new(
        path: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            code: code.into(),
            message: message.into(),
        }
    }
}

// ============================================================================
// SECTION: Diff
// ============================================================================

/// Opaque before/after snapshot recorded with apply.
///
/// # Invariants
/// - Semantic meaning is handler-defined; the engine treats it as an audit
///   payload only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diff {
    /// State before apply, handler-defined.
    pub before: Value,
    /// State after apply, handler-defined.
    pub after: Value,
    /// Human-readable summary of the change.
    pub summary: String,
}

// ============================================================================
// SECTION: Orders
// ============================================================================

/// A typed, validated request for work owning one or more items.
///
/// # Invariants
/// - `payload` is validated against the type schema at creation and never
///   mutated thereafter.
/// - Destruction cascades to items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Order identifier.
    pub id: OrderId,
    /// Type key into the handler registry.
    pub order_type: OrderTypeName,
    /// Current lifecycle state.
    pub state: OrderState,
    /// Dispatch priority; higher is sooner.
    pub priority: i64,
    /// Opaque validated payload.
    pub payload: Value,
    /// Opaque caller metadata.
    pub meta: Value,
    /// Actor who requested the order, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_by: Option<Actor>,
    /// Schema descriptor snapshot cached at creation for audit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_snapshot: Option<Value>,
    /// Creation time.
    pub created_at: Timestamp,
    /// Last state transition time.
    pub last_transitioned_at: Timestamp,
    /// Time the order entered `applied`, when reached.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_at: Option<Timestamp>,
    /// Time the order entered `completed`, when reached.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<Timestamp>,
}

// ============================================================================
// SECTION: Items
// ============================================================================

/// An independently leasable unit of work belonging to an order.
///
/// # Invariants
/// - Leased ⇔ `leased_by` is set and `lease_expires_at` is in the future.
/// - `attempts <= max_attempts` always.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Item identifier.
    pub id: ItemId,
    /// Owning order.
    pub order_id: OrderId,
    /// Type key copied from the order at plan time.
    pub item_type: OrderTypeName,
    /// Current lifecycle state.
    pub state: ItemState,
    /// Opaque input derived by the type handler from the order.
    pub input: Value,
    /// Opaque result populated on submission or finalization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Reclaim count so far.
    pub attempts: u32,
    /// Reclaim budget before the item fails.
    pub max_attempts: u32,
    /// Agent holding the lease, when leased.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leased_by: Option<AgentId>,
    /// Lease expiry, when leased.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_expires_at: Option<Timestamp>,
    /// Last heartbeat time, when leased.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_heartbeat_at: Option<Timestamp>,
    /// Ordered part keys required for finalization, when partials are used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parts_required: Option<Vec<PartKey>>,
    /// Materialized per-key view of the latest part submission.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parts_state: BTreeMap<String, PartSlot>,
    /// Assembled result populated on finalization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assembled_result: Option<Value>,
    /// Diagnostic recorded when the item fails.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Diagnostic>,
    /// Creation time.
    pub created_at: Timestamp,
    /// Last state transition time.
    pub last_transitioned_at: Timestamp,
    /// Time the item entered `accepted`, when reached.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accepted_at: Option<Timestamp>,
}

impl Item {
    /// Returns true when the item holds a live lease at `now`.
    #[must_use]
    pub fn has_live_lease(&self, now: Timestamp) -> bool {
        self.leased_by.is_some() && self.lease_expires_at.is_some_and(|expiry| expiry > now)
    }

    /// Returns true when the lease fields are set but the expiry has passed.
    #[must_use]
    pub fn has_expired_lease(&self, now: Timestamp) -> bool {
        self.leased_by.is_some() && self.lease_expires_at.is_some_and(|expiry| expiry <= now)
    }

    /// Clears all lease fields.
    pub fn clear_lease(&mut self) {
        self.leased_by = None;
        self.lease_expires_at = None;
        self.last_heartbeat_at = None;
    }
}

// ============================================================================
// SECTION: Parts
// ============================================================================

/// Part lifecycle status.
///
/// # Invariants
/// - A `validated` part is committed data; a `rejected` part is a diagnostic
///   record whose payload must not influence assembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartStatus {
    /// Reserved but not yet submitted.
    Draft,
    /// Submitted, validation pending.
    Submitted,
    /// Validated; eligible for assembly.
    Validated,
    /// Rejected; diagnostic only.
    Rejected,
}

/// An incremental, keyed fragment of an item's result.
///
/// # Invariants
/// - `(item_id, part_key, seq)` is unique; reused tuples are overwrites.
/// - `seq` of `None` denotes the single unversioned slot for the key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Part {
    /// Part identifier.
    pub id: PartId,
    /// Owning item.
    pub item_id: ItemId,
    /// Part key naming the fragment.
    pub part_key: PartKey,
    /// Versioned slot number; `None` is the single unversioned slot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u32>,
    /// Lifecycle status.
    pub status: PartStatus,
    /// Opaque fragment payload.
    pub payload: Value,
    /// Optional supporting evidence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<Value>,
    /// Optional submitter notes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Validation issues when rejected.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ValidationIssue>,
    /// Deterministic checksum over the payload.
    pub checksum: HashDigest,
    /// Submitting agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitted_by: Option<AgentId>,
    /// Creation time.
    pub created_at: Timestamp,
    /// Last overwrite time.
    pub updated_at: Timestamp,
}

/// Materialized `parts_state` entry: the latest submission per part key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartSlot {
    /// Status of the latest submission for this key.
    pub status: PartStatus,
    /// Slot number of the latest submission.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u32>,
    /// Checksum of the latest submission payload.
    pub checksum: String,
    /// Time of the latest submission.
    pub submitted_at: Timestamp,
}

// ============================================================================
// SECTION: Events
// ============================================================================

/// Audit event kinds.
///
/// # Invariants
/// - Variants are stable for serialization and contract matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Order proposed and validated.
    Proposed,
    /// Items planned for an order.
    Planned,
    /// Order observed its first checkout.
    CheckedOut,
    /// Item leased by an agent.
    Leased,
    /// Lease extended by its owner.
    Heartbeat,
    /// Lease released by its owner.
    Released,
    /// Work marked in progress.
    InProgress,
    /// Whole-item result submitted.
    Submitted,
    /// Part submitted for validation.
    PartSubmitted,
    /// Part validated.
    PartValidated,
    /// Part rejected.
    PartRejected,
    /// Item finalized from validated parts.
    Finalized,
    /// Order approved.
    Approved,
    /// Order applied by its handler.
    Applied,
    /// Item accepted during apply.
    Accepted,
    /// Order or item rejected.
    Rejected,
    /// Order or item completed.
    Completed,
    /// Order or item failed.
    Failed,
    /// Lease expired and was reclaimed.
    LeaseExpired,
    /// Order or item dead-lettered.
    DeadLettered,
}

impl EventKind {
    /// Default event kind for a transition into an order state.
    ///
    /// Return edges into `queued` carry cause-specific kinds supplied by the
    /// caller; this mapping covers the forward edges.
    #[must_use]
    pub const fn for_order_state(state: OrderState) -> Self {
        match state {
            OrderState::Queued | OrderState::Rejected => Self::Rejected,
            OrderState::CheckedOut => Self::CheckedOut,
            OrderState::InProgress => Self::InProgress,
            OrderState::Submitted => Self::Submitted,
            OrderState::Approved => Self::Approved,
            OrderState::Applied => Self::Applied,
            OrderState::Completed => Self::Completed,
            OrderState::Failed => Self::Failed,
            OrderState::DeadLettered => Self::DeadLettered,
        }
    }

    /// Default event kind for a transition into an item state.
    ///
    /// Return edges into `queued` carry cause-specific kinds supplied by the
    /// caller; this mapping covers the forward edges.
    #[must_use]
    pub const fn for_item_state(state: ItemState) -> Self {
        match state {
            ItemState::Queued => Self::Released,
            ItemState::Leased => Self::Leased,
            ItemState::InProgress => Self::InProgress,
            ItemState::Submitted => Self::Submitted,
            ItemState::Accepted => Self::Accepted,
            ItemState::Completed => Self::Completed,
            ItemState::Failed => Self::Failed,
            ItemState::DeadLettered => Self::DeadLettered,
        }
    }
}

/// Append-only audit event.
///
/// # Invariants
/// - Events are never updated or deleted.
/// - Every state write produces exactly one event in the same atomic unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkEvent {
    /// Event identifier.
    pub id: EventId,
    /// Order the event belongs to.
    pub order_id: OrderId,
    /// Item the event belongs to, when item-scoped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<ItemId>,
    /// Event kind.
    pub kind: EventKind,
    /// Acting principal.
    pub actor: Actor,
    /// Optional payload snapshot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Optional human-readable message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Optional diff recorded with apply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<Diff>,
    /// Creation time.
    pub created_at: Timestamp,
}

// ============================================================================
// SECTION: Provenance
// ============================================================================

/// Append-only per-action caller and request metadata.
///
/// # Invariants
/// - Records are immutable after creation.
/// - Request bodies are never captured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvenanceRecord {
    /// Record identifier.
    pub id: ProvenanceId,
    /// Order the action targeted.
    pub order_id: OrderId,
    /// Item the action targeted, when item-scoped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<ItemId>,
    /// Acting agent identifier, when supplied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<AgentId>,
    /// Agent name, when supplied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    /// Agent version, when supplied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_version: Option<String>,
    /// Model name, when supplied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    /// Runtime tag, when supplied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_tag: Option<String>,
    /// Request identifier, generated when the caller supplies none.
    pub request_id: RequestId,
    /// SHA-256 fingerprint over salient request attributes.
    pub request_fingerprint: HashDigest,
    /// Caller IP, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    /// Caller user-agent string, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    /// Authenticated user identifier, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Session identifier, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Creation time.
    pub created_at: Timestamp,
}

// ============================================================================
// SECTION: Idempotency Keys
// ============================================================================

/// Stored idempotency key with its captured response.
///
/// # Invariants
/// - `(scope, key_hash)` is unique; rows are immutable after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    /// Operation scope (entry-point tag plus target identifier).
    pub scope: String,
    /// SHA-256 hash of the caller-supplied key.
    pub key_hash: String,
    /// Captured response returned on replay.
    pub response_snapshot: Value,
    /// Creation time.
    pub created_at: Timestamp,
}
