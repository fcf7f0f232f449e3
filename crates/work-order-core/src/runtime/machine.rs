// work-order-core/src/runtime/machine.rs
// ============================================================================
// Module: Work Order State Machine
// Description: Transition validation, timestamp upkeep, and audit events.
// Purpose: Make every state write pass one gate that records exactly one event.
// Dependencies: crate::{core, interfaces}
// ============================================================================

//! ## Overview
//! The state machine is the single sanctioned path for state writes and audit
//! appends. Each transition verifies the configured adjacency relation, stamps
//! the relevant timestamps, and persists the row together with exactly one
//! event in the same atomic store call. After an item transition the machine
//! checks the order-completion invariant and cascades the order as a second,
//! machine-authored transition.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde_json::Value;
use thiserror::Error;

use crate::core::actor::Actor;
use crate::core::identifiers::EventId;
use crate::core::identifiers::ItemId;
use crate::core::identifiers::OrderId;
use crate::core::model::Diff;
use crate::core::model::EventKind;
use crate::core::model::Item;
use crate::core::model::Order;
use crate::core::model::WorkEvent;
use crate::core::state::ItemState;
use crate::core::state::OrderState;
use crate::core::state::TransitionTable;
use crate::core::state::default_item_transitions;
use crate::core::state::default_order_transitions;
use crate::core::time::Timestamp;
use crate::interfaces::StoreError;
use crate::interfaces::WorkOrderStore;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// State machine errors.
#[derive(Debug, Error)]
pub enum MachineError {
    /// The requested edge is absent from the configured adjacency relation.
    #[error("illegal state transition: {entity} {from} -> {to}")]
    IllegalStateTransition {
        /// Entity kind, `order` or `item`.
        entity: &'static str,
        /// Source state label.
        from: String,
        /// Destination state label.
        to: String,
    },
    /// The row to transition does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Entity kind, `order` or `item`.
        entity: &'static str,
        /// Row identifier.
        id: String,
    },
    /// Store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

// ============================================================================
// SECTION: Transition Context
// ============================================================================

/// Optional event enrichment for a transition.
#[derive(Debug, Clone, Default)]
pub struct TransitionContext {
    /// Event kind override; return edges into `queued` must set this because
    /// the destination alone does not identify the cause.
    pub kind: Option<EventKind>,
    /// Optional payload snapshot recorded on the event.
    pub payload: Option<Value>,
    /// Optional human-readable message.
    pub message: Option<String>,
    /// Optional diff recorded with apply.
    pub diff: Option<Diff>,
}

// ============================================================================
// SECTION: State Machine
// ============================================================================

/// Transition gate over the configured adjacency tables.
#[derive(Debug, Clone)]
pub struct StateMachine {
    /// Order adjacency relation.
    order_table: TransitionTable<OrderState>,
    /// Item adjacency relation.
    item_table: TransitionTable<ItemState>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new(default_order_transitions(), default_item_transitions())
    }
}

impl StateMachine {
    /// Creates a machine over explicit adjacency tables.
    #[must_use]
    pub const fn new(
        order_table: TransitionTable<OrderState>,
        item_table: TransitionTable<ItemState>,
    ) -> Self {
        Self {
            order_table,
            item_table,
        }
    }

    /// Returns the order adjacency relation.
    #[must_use]
    pub const fn order_table(&self) -> &TransitionTable<OrderState> {
        &self.order_table
    }

    /// Returns the item adjacency relation.
    #[must_use]
    pub const fn item_table(&self) -> &TransitionTable<ItemState> {
        &self.item_table
    }

    /// Transitions an order, persisting the new state and one event
    /// atomically.
    ///
    /// # Errors
    ///
    /// Returns [`MachineError::IllegalStateTransition`] when the edge is not
    /// configured; no database change occurs in that case.
    pub fn transition_order<S: WorkOrderStore>(
        &self,
        store: &S,
        order: &Order,
        to: OrderState,
        actor: &Actor,
        now: Timestamp,
        ctx: TransitionContext,
    ) -> Result<Order, MachineError> {
        if !self.order_table.allows(order.state, to) {
            return Err(MachineError::IllegalStateTransition {
                entity: "order",
                from: order.state.to_string(),
                to: to.to_string(),
            });
        }

        let mut updated = order.clone();
        updated.state = to;
        updated.last_transitioned_at = now;
        if to == OrderState::Applied {
            updated.applied_at = Some(now);
        }
        if to == OrderState::Completed {
            updated.completed_at = Some(now);
        }

        let event = build_event(
            updated.id.clone(),
            None,
            ctx.kind.unwrap_or(EventKind::for_order_state(to)),
            actor.clone(),
            ctx,
            now,
        );
        store.update_order(&updated, &event)?;
        Ok(updated)
    }

    /// Transitions an item, persisting the new state and one event
    /// atomically, then cascades the owning order to `completed` when every
    /// sibling has completed.
    ///
    /// # Errors
    ///
    /// Returns [`MachineError::IllegalStateTransition`] when the edge is not
    /// configured; no database change occurs in that case.
    pub fn transition_item<S: WorkOrderStore>(
        &self,
        store: &S,
        item: &Item,
        to: ItemState,
        actor: &Actor,
        now: Timestamp,
        ctx: TransitionContext,
    ) -> Result<Item, MachineError> {
        if !self.item_table.allows(item.state, to) {
            return Err(MachineError::IllegalStateTransition {
                entity: "item",
                from: item.state.to_string(),
                to: to.to_string(),
            });
        }

        let mut updated = item.clone();
        updated.state = to;
        updated.last_transitioned_at = now;
        if to == ItemState::Accepted {
            updated.accepted_at = Some(now);
        }

        let event = build_event(
            updated.order_id.clone(),
            Some(updated.id.clone()),
            ctx.kind.unwrap_or(EventKind::for_item_state(to)),
            actor.clone(),
            ctx,
            now,
        );
        store.update_item(&updated, &event)?;

        self.cascade_order_completion(store, &updated.order_id, now)?;
        Ok(updated)
    }

    /// Cascades an order to `completed` when the completion invariant holds.
    ///
    /// # Errors
    ///
    /// Returns [`MachineError::Store`] when the store fails mid-cascade.
    pub fn cascade_order_completion<S: WorkOrderStore>(
        &self,
        store: &S,
        order_id: &OrderId,
        now: Timestamp,
    ) -> Result<Option<Order>, MachineError> {
        let Some(order) = store.get_order(order_id)? else {
            return Ok(None);
        };
        if !self.order_table.allows(order.state, OrderState::Completed) {
            return Ok(None);
        }
        let items = store.items_for_order(order_id)?;
        if items.is_empty() || items.iter().any(|item| item.state != ItemState::Completed) {
            return Ok(None);
        }
        let completed = self.transition_order(
            store,
            &order,
            OrderState::Completed,
            &Actor::system(),
            now,
            TransitionContext::default(),
        )?;
        Ok(Some(completed))
    }

    /// Appends an order-scoped event without a state change.
    ///
    /// This and [`Self::record_item_event`] are the only sanctioned paths for
    /// audit appends outside a transition.
    ///
    /// # Errors
    ///
    /// Returns [`MachineError::Store`] when the write fails.
    pub fn record_order_event<S: WorkOrderStore>(
        &self,
        store: &S,
        order: &Order,
        kind: EventKind,
        actor: &Actor,
        now: Timestamp,
        ctx: TransitionContext,
    ) -> Result<WorkEvent, MachineError> {
        let event = build_event(order.id.clone(), None, kind, actor.clone(), ctx, now);
        store.update_order(order, &event)?;
        Ok(event)
    }

    /// Appends an item-scoped event without a state change.
    ///
    /// # Errors
    ///
    /// Returns [`MachineError::Store`] when the write fails.
    pub fn record_item_event<S: WorkOrderStore>(
        &self,
        store: &S,
        item: &Item,
        kind: EventKind,
        actor: &Actor,
        now: Timestamp,
        ctx: TransitionContext,
    ) -> Result<WorkEvent, MachineError> {
        let event = build_event(
            item.order_id.clone(),
            Some(item.id.clone()),
            kind,
            actor.clone(),
            ctx,
            now,
        );
        store.update_item(item, &event)?;
        Ok(event)
    }
}

// ============================================================================
// SECTION: Event Construction
// ============================================================================

/// Builds one audit event from a transition context.
fn build_event(
    order_id: OrderId,
    item_id: Option<ItemId>,
    kind: EventKind,
    actor: Actor,
    ctx: TransitionContext,
    now: Timestamp,
) -> WorkEvent {
    WorkEvent {
        id: EventId::generate(),
        order_id,
        item_id,
        kind,
        actor,
        payload: ctx.payload,
        message: ctx.message,
        diff: ctx.diff,
        created_at: now,
    }
}
