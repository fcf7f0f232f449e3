// work-order-core/src/runtime/allocator.rs
// ============================================================================
// Module: Work Order Allocator
// Description: Proposal validation, order creation, and item planning.
// Purpose: Materialize a validated order plus its planned items from one
// proposal.
// Dependencies: crate::{core, interfaces, runtime::{machine, registry}},
// jsonschema
// ============================================================================

//! ## Overview
//! A proposal enters here: the type handler's schema descriptor (JSON
//! Schema, Draft 2020-12) validates the payload, the order is created in
//! `queued` with a `proposed` event carrying the payload snapshot, and the
//! handler's deterministic `plan` yields the items persisted with a
//! `planned` event. Planning is exposed separately for explicit rework
//! paths, but refuses to run while the order still has items.

// ============================================================================
// SECTION: Imports
// ============================================================================

use jsonschema::Draft;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;

use crate::core::actor::Actor;
use crate::core::identifiers::EventId;
use crate::core::identifiers::ItemId;
use crate::core::identifiers::OrderId;
use crate::core::identifiers::OrderTypeName;
use crate::core::model::EventKind;
use crate::core::model::Item;
use crate::core::model::Order;
use crate::core::model::ValidationIssue;
use crate::core::model::WorkEvent;
use crate::core::state::ItemState;
use crate::core::state::OrderState;
use crate::core::time::Timestamp;
use crate::interfaces::HandlerError;
use crate::interfaces::ItemSpec;
use crate::interfaces::StoreError;
use crate::interfaces::WorkOrderStore;
use crate::runtime::registry::HandlerRegistry;
use crate::runtime::registry::RegistryError;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Allocator errors.
#[derive(Debug, Error)]
pub enum AllocatorError {
    /// Proposal payload does not satisfy the type schema.
    #[error("schema violation: {} offending path(s)", .issues.len())]
    SchemaViolation {
        /// One issue per offending sub-tree.
        issues: Vec<ValidationIssue>,
    },
    /// The handler's schema descriptor itself failed to compile.
    #[error("invalid type schema: {0}")]
    InvalidSchema(String),
    /// Re-planning requested while items exist.
    #[error("order {0} still has items; drain before re-planning")]
    ItemsNotDrained(OrderId),
    /// Unknown order.
    #[error("order not found: {0}")]
    OrderNotFound(OrderId),
    /// Registry lookup failure.
    #[error(transparent)]
    Registry(#[from] RegistryError),
    /// Store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Handler planning failure.
    #[error(transparent)]
    Handler(#[from] HandlerError),
}

// ============================================================================
// SECTION: Proposal Input
// ============================================================================

/// One validated proposal ready for allocation.
#[derive(Debug, Clone)]
pub struct Proposal {
    /// Type key into the registry.
    pub order_type: OrderTypeName,
    /// Opaque payload to validate against the type schema.
    pub payload: Value,
    /// Opaque caller metadata.
    pub meta: Value,
    /// Dispatch priority; higher is sooner.
    pub priority: i64,
    /// Requesting actor, when known.
    pub requested_by: Option<Actor>,
}

// ============================================================================
// SECTION: Allocator
// ============================================================================

/// Proposal-to-order allocation over a store and registry.
#[derive(Debug, Clone)]
pub struct Allocator<S> {
    /// Backing store.
    store: S,
    /// Handler registry.
    registry: HandlerRegistry,
    /// Default retry budget for planned items.
    default_max_attempts: u32,
}

impl<S: WorkOrderStore> Allocator<S> {
    /// Creates an allocator.
    pub const fn new(store: S, registry: HandlerRegistry, default_max_attempts: u32) -> Self {
        Self {
            store,
            registry,
            default_max_attempts,
        }
    }

    /// Validates a proposal, creates its order, and plans its items.
    ///
    /// # Errors
    ///
    /// Returns [`AllocatorError::SchemaViolation`] with one issue per
    /// offending path when the payload fails the type schema; no order is
    /// created in that case.
    pub fn propose(&self, proposal: Proposal, now: Timestamp) -> Result<Order, AllocatorError> {
        let handler = self.registry.get(&proposal.order_type)?;
        let schema = handler.schema();
        validate_payload(&schema, &proposal.payload)?;

        let actor = proposal.requested_by.clone().unwrap_or_else(Actor::system);
        let order = Order {
            id: OrderId::generate(),
            order_type: proposal.order_type,
            state: OrderState::Queued,
            priority: proposal.priority,
            payload: proposal.payload,
            meta: proposal.meta,
            requested_by: proposal.requested_by,
            schema_snapshot: Some(schema),
            created_at: now,
            last_transitioned_at: now,
            applied_at: None,
            completed_at: None,
        };
        let proposed = WorkEvent {
            id: EventId::generate(),
            order_id: order.id.clone(),
            item_id: None,
            kind: EventKind::Proposed,
            actor: actor.clone(),
            payload: Some(order.payload.clone()),
            message: None,
            diff: None,
            created_at: now,
        };
        self.store.insert_order(&order, &proposed)?;

        self.plan_order(&order, &actor, now)?;
        Ok(order)
    }

    /// Plans items for an order whose previous items were drained.
    ///
    /// # Errors
    ///
    /// Returns [`AllocatorError::ItemsNotDrained`] when the order still has
    /// items; planning is idempotent only through handler determinism.
    pub fn plan(
        &self,
        order_id: &OrderId,
        actor: &Actor,
        now: Timestamp,
    ) -> Result<Vec<Item>, AllocatorError> {
        let order = self
            .store
            .get_order(order_id)?
            .ok_or_else(|| AllocatorError::OrderNotFound(order_id.clone()))?;
        if !self.store.items_for_order(order_id)?.is_empty() {
            return Err(AllocatorError::ItemsNotDrained(order_id.clone()));
        }
        self.plan_order(&order, actor, now)
    }

    /// Invokes the handler's plan and persists the resulting items.
    fn plan_order(
        &self,
        order: &Order,
        actor: &Actor,
        now: Timestamp,
    ) -> Result<Vec<Item>, AllocatorError> {
        let handler = self.registry.get(&order.order_type)?;
        let specs = handler.plan(order)?;
        let items: Vec<Item> = specs
            .into_iter()
            .map(|spec| self.materialize(order, spec, now))
            .collect();
        let planned = WorkEvent {
            id: EventId::generate(),
            order_id: order.id.clone(),
            item_id: None,
            kind: EventKind::Planned,
            actor: actor.clone(),
            payload: Some(json!({ "item_count": items.len() })),
            message: None,
            diff: None,
            created_at: now,
        };
        self.store.insert_items(&items, &planned)?;
        Ok(items)
    }

    /// Materializes one planned item from its spec.
    fn materialize(&self, order: &Order, spec: ItemSpec, now: Timestamp) -> Item {
        Item {
            id: ItemId::generate(),
            order_id: order.id.clone(),
            item_type: spec.item_type.unwrap_or_else(|| order.order_type.clone()),
            state: ItemState::Queued,
            input: spec.input,
            result: None,
            attempts: 0,
            max_attempts: spec.max_attempts.unwrap_or(self.default_max_attempts),
            leased_by: None,
            lease_expires_at: None,
            last_heartbeat_at: None,
            parts_required: spec.parts_required,
            parts_state: std::collections::BTreeMap::new(),
            assembled_result: None,
            error: None,
            created_at: now,
            last_transitioned_at: now,
            accepted_at: None,
        }
    }
}

// ============================================================================
// SECTION: Schema Validation
// ============================================================================

/// Validates a payload against a JSON Schema descriptor.
///
/// # Errors
///
/// Returns [`AllocatorError::InvalidSchema`] when the descriptor fails to
/// compile and [`AllocatorError::SchemaViolation`] listing every offending
/// path when the payload does not conform.
pub fn validate_payload(schema: &Value, payload: &Value) -> Result<(), AllocatorError> {
    let validator = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(schema)
        .map_err(|err| AllocatorError::InvalidSchema(err.to_string()))?;
    let issues: Vec<ValidationIssue> = validator
        .iter_errors(payload)
        .map(|err| {
            ValidationIssue::new(err.instance_path().to_string(), "schema", err.to_string())
        })
        .collect();
    if issues.is_empty() {
        Ok(())
    } else {
        Err(AllocatorError::SchemaViolation { issues })
    }
}
