// work-order-core/src/runtime/engine.rs
// ============================================================================
// Module: Work Order Engine
// Description: The single canonical execution path for the control plane.
// Purpose: Wire the allocator, lease engine, executor, idempotency guard,
// provenance enricher, and maintenance loop behind one operation surface.
// Dependencies: crate::{core, interfaces, runtime}
// ============================================================================

//! ## Overview
//! The engine is a library invoked synchronously by its host; it spawns no
//! tasks and never reads the clock, since every request carries its own
//! `requested_at`. All API surfaces must call into these methods to preserve
//! the audit and idempotency guarantees: every mutating entry is wrapped by
//! the idempotency guard and captured by the provenance enricher.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::core::actor::Actor;
use crate::core::filter::DEFAULT_META_PATH_DEPTH;
use crate::core::filter::FilterError;
use crate::core::filter::ListQuery;
use crate::core::filter::apply_query;
use crate::core::identifiers::AgentId;
use crate::core::identifiers::ItemId;
use crate::core::identifiers::LeaseKey;
use crate::core::identifiers::OrderId;
use crate::core::identifiers::OrderTypeName;
use crate::core::identifiers::PartKey;
use crate::core::identifiers::format_part_keys;
use crate::core::model::Diagnostic;
use crate::core::model::Diff;
use crate::core::model::EventKind;
use crate::core::model::Item;
use crate::core::model::Order;
use crate::core::model::Part;
use crate::core::model::ValidationIssue;
use crate::core::model::WorkEvent;
use crate::core::state::ItemState;
use crate::core::state::OrderState;
use crate::core::state::TransitionTable;
use crate::core::state::default_item_transitions;
use crate::core::state::default_order_transitions;
use crate::core::time::Timestamp;
use crate::interfaces::HandlerError;
use crate::interfaces::StoreError;
use crate::interfaces::WorkOrderStore;
use crate::runtime::allocator::Allocator;
use crate::runtime::allocator::AllocatorError;
use crate::runtime::allocator::Proposal;
use crate::runtime::executor::Executor;
use crate::runtime::executor::ExecutorError;
use crate::runtime::executor::FinalizeMode;
use crate::runtime::executor::PartialsSettings;
use crate::runtime::idempotency::IdempotencyGuard;
use crate::runtime::idempotency::OperationTag;
use crate::runtime::idempotency::default_enforce_on;
use crate::runtime::lease::DispatchFilters;
use crate::runtime::lease::LeaseBackend;
use crate::runtime::lease::LeaseError;
use crate::runtime::lease::LeaseGrant;
use crate::runtime::lease::LeaseService;
use crate::runtime::lease::LeaseSettings;
use crate::runtime::machine::MachineError;
use crate::runtime::machine::StateMachine;
use crate::runtime::machine::TransitionContext;
use crate::runtime::maintenance::ALL_PHASES;
use crate::runtime::maintenance::MaintenanceLoop;
use crate::runtime::maintenance::MaintenancePhase;
use crate::runtime::maintenance::MaintenanceReport;
use crate::runtime::maintenance::MaintenanceSettings;
use crate::runtime::provenance::ProvenanceEnricher;
use crate::runtime::provenance::RequestContext;
use crate::runtime::registry::HandlerRegistry;
use crate::runtime::registry::RegistryError;

// ============================================================================
// SECTION: Engine Configuration
// ============================================================================

/// All engine tunables, injected once at construction.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Lease engine tunables.
    pub lease: LeaseSettings,
    /// Default retry budget for planned items.
    pub default_max_attempts: u32,
    /// Idempotency header name surfaced to HTTP adapters.
    pub idempotency_header_name: String,
    /// Operations the idempotency guard is enforced on.
    pub idempotency_enforce_on: BTreeSet<OperationTag>,
    /// Partial-submission tunables.
    pub partials: PartialsSettings,
    /// Order transition adjacency.
    pub order_transitions: TransitionTable<OrderState>,
    /// Item transition adjacency.
    pub item_transitions: TransitionTable<ItemState>,
    /// Maintenance tunables.
    pub maintenance: MaintenanceSettings,
    /// Maximum depth of dotted `meta` filter paths.
    pub meta_path_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lease: LeaseSettings::default(),
            default_max_attempts: 3,
            idempotency_header_name: "X-Idempotency-Key".to_string(),
            idempotency_enforce_on: default_enforce_on(),
            partials: PartialsSettings::default(),
            order_transitions: default_order_transitions(),
            item_transitions: default_item_transitions(),
            maintenance: MaintenanceSettings::default(),
            meta_path_depth: DEFAULT_META_PATH_DEPTH,
        }
    }
}

// ============================================================================
// SECTION: Engine Errors
// ============================================================================

/// Top-level engine error kinds surfaced to callers.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Proposal payload does not satisfy the type schema.
    #[error("schema violation: {} offending path(s)", .issues.len())]
    SchemaViolation {
        /// One issue per offending sub-tree.
        issues: Vec<ValidationIssue>,
    },
    /// Attempted transition outside the configured adjacency.
    #[error("illegal state transition: {entity} {from} -> {to}")]
    IllegalStateTransition {
        /// Entity kind, `order` or `item`.
        entity: &'static str,
        /// Source state label.
        from: String,
        /// Destination state label.
        to: String,
    },
    /// Item leased by another agent, or not in a leasable state.
    #[error("lease conflict: {detail}")]
    LeaseConflict {
        /// Conflict description.
        detail: String,
    },
    /// Operation requires a live lease but the lease passed its TTL.
    #[error("lease expired for item {item_id}")]
    LeaseExpired {
        /// Item whose lease lapsed.
        item_id: ItemId,
    },
    /// Submission failed the acceptance policy.
    #[error("submission invalid for item {item_id}")]
    SubmissionInvalid {
        /// Rejected item.
        item_id: ItemId,
        /// Offending issues, also persisted on the item.
        issues: Vec<ValidationIssue>,
    },
    /// Part failed validation.
    #[error("part invalid for item {item_id} key {part_key}")]
    PartInvalid {
        /// Owning item.
        item_id: ItemId,
        /// Rejected part key.
        part_key: PartKey,
        /// Offending issues, also persisted on the rejected part.
        issues: Vec<ValidationIssue>,
    },
    /// Partial submissions are disabled by configuration.
    #[error("partial submissions are disabled")]
    PartialsDisabled,
    /// Strict finalization found required parts without validated rows.
    #[error("missing required parts for item {item_id}: {}", format_part_keys(.missing))]
    MissingRequiredParts {
        /// Item being finalized.
        item_id: ItemId,
        /// Part keys lacking validated rows.
        missing: Vec<PartKey>,
    },
    /// The acceptance policy refused approval.
    #[error("order {order_id} is not ready for approval")]
    NotReadyForApproval {
        /// Refused order.
        order_id: OrderId,
    },
    /// The handler's apply raised; the order transitioned to `failed`.
    #[error("apply failed for order {order_id}: {code}: {message}")]
    ApplyFailed {
        /// Failed order.
        order_id: OrderId,
        /// Stable machine-readable code.
        code: String,
        /// Handler diagnostic.
        message: String,
    },
    /// Unknown order, item, or type.
    #[error("not found: {0}")]
    NotFound(String),
    /// Caller-supplied filter or sort is malformed.
    #[error("invalid filter at {path}: {code}")]
    FilterInvalid {
        /// Path to the offending node.
        path: String,
        /// Stable machine-readable code.
        code: String,
    },
    /// Re-planning requested while items exist.
    #[error("order {0} still has items; drain before re-planning")]
    ItemsNotDrained(OrderId),
    /// Store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Handler failure outside validation-issue reporting.
    #[error(transparent)]
    Handler(#[from] HandlerError),
}

impl From<RegistryError> for EngineError {
    fn from(error: RegistryError) -> Self {
        match error {
            RegistryError::UnknownType(name) => Self::NotFound(format!("order type {name}")),
        }
    }
}

impl From<MachineError> for EngineError {
    fn from(error: MachineError) -> Self {
        match error {
            MachineError::IllegalStateTransition { entity, from, to } => {
                Self::IllegalStateTransition { entity, from, to }
            }
            MachineError::NotFound { entity, id } => Self::NotFound(format!("{entity} {id}")),
            MachineError::Store(inner) => Self::Store(inner),
        }
    }
}

impl From<FilterError> for EngineError {
    fn from(error: FilterError) -> Self {
        Self::FilterInvalid {
            path: error.path,
            code: error.code,
        }
    }
}

impl From<AllocatorError> for EngineError {
    fn from(error: AllocatorError) -> Self {
        match error {
            AllocatorError::SchemaViolation { issues } => Self::SchemaViolation { issues },
            AllocatorError::InvalidSchema(message) => Self::Handler(HandlerError::Other(message)),
            AllocatorError::ItemsNotDrained(order_id) => Self::ItemsNotDrained(order_id),
            AllocatorError::OrderNotFound(order_id) => Self::NotFound(format!("order {order_id}")),
            AllocatorError::Registry(inner) => inner.into(),
            AllocatorError::Store(inner) => Self::Store(inner),
            AllocatorError::Handler(inner) => Self::Handler(inner),
        }
    }
}

impl From<ExecutorError> for EngineError {
    fn from(error: ExecutorError) -> Self {
        match error {
            ExecutorError::SubmissionInvalid { item_id, issues } => {
                Self::SubmissionInvalid { item_id, issues }
            }
            ExecutorError::PartInvalid {
                item_id,
                part_key,
                issues,
            } => Self::PartInvalid {
                item_id,
                part_key,
                issues,
            },
            ExecutorError::PartialsDisabled => Self::PartialsDisabled,
            ExecutorError::MissingRequiredParts { item_id, missing } => {
                Self::MissingRequiredParts { item_id, missing }
            }
            ExecutorError::NotReadyForApproval { order_id } => {
                Self::NotReadyForApproval { order_id }
            }
            ExecutorError::ApplyFailed {
                order_id,
                code,
                message,
            } => Self::ApplyFailed {
                order_id,
                code,
                message,
            },
            ExecutorError::NotLeaseOwner { item_id, holder } => Self::LeaseConflict {
                detail: format!("item {item_id} held by {holder}"),
            },
            ExecutorError::LeaseExpired { item_id } => Self::LeaseExpired { item_id },
            ExecutorError::OrderNotFound(order_id) => Self::NotFound(format!("order {order_id}")),
            ExecutorError::ItemNotFound(item_id) => Self::NotFound(format!("item {item_id}")),
            ExecutorError::Machine(inner) => inner.into(),
            ExecutorError::Registry(inner) => inner.into(),
            ExecutorError::Store(inner) => Self::Store(inner),
            ExecutorError::Handler(inner) => Self::Handler(inner),
            ExecutorError::Hash(inner) => {
                Self::Store(StoreError::Invalid(inner.to_string()))
            }
        }
    }
}

impl From<LeaseError> for EngineError {
    fn from(error: LeaseError) -> Self {
        match error {
            LeaseError::Conflict { item_id, holder } => Self::LeaseConflict {
                detail: format!("item {item_id} held by {holder}"),
            },
            LeaseError::NotLeasable { item_id, state } => Self::LeaseConflict {
                detail: format!("item {item_id} in state {state} is not leasable"),
            },
            LeaseError::Expired { item_id } => Self::LeaseExpired { item_id },
            LeaseError::NotFound(item_id) => Self::NotFound(format!("item {item_id}")),
            LeaseError::Store(inner) => Self::Store(inner),
            LeaseError::Kv(inner) => Self::Store(StoreError::Store(inner.to_string())),
            LeaseError::Machine(inner) => inner.into(),
        }
    }
}

// ============================================================================
// SECTION: Requests
// ============================================================================

/// Order proposal request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposeRequest {
    /// Type key into the registry.
    pub order_type: OrderTypeName,
    /// Opaque payload validated against the type schema.
    pub payload: Value,
    /// Opaque caller metadata.
    #[serde(default)]
    pub meta: Value,
    /// Dispatch priority; higher is sooner.
    #[serde(default)]
    pub priority: i64,
    /// Requesting actor, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<Actor>,
    /// Replay-safety key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    /// Request metadata for provenance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<RequestContext>,
    /// Caller-supplied operation time.
    pub requested_at: Timestamp,
}

/// Checkout request, scoped to one order or global.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutRequest {
    /// Restrict to one order's items.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<OrderId>,
    /// Global dispatch filters.
    #[serde(default)]
    pub filters: DispatchFilters,
    /// Acquiring agent.
    pub agent_id: AgentId,
    /// Replay-safety key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    /// Request metadata for provenance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<RequestContext>,
    /// Caller-supplied operation time.
    pub requested_at: Timestamp,
}

/// Whole-item submission request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    /// Item being submitted.
    pub item_id: ItemId,
    /// Result payload.
    pub result: Value,
    /// Submitting agent; must hold the live lease.
    pub agent_id: AgentId,
    /// Optional supporting evidence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<Value>,
    /// Optional submitter notes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Replay-safety key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    /// Request metadata for provenance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<RequestContext>,
    /// Caller-supplied operation time.
    pub requested_at: Timestamp,
}

/// Part submission request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitPartRequest {
    /// Item the part belongs to.
    pub item_id: ItemId,
    /// Part key.
    pub part_key: PartKey,
    /// Versioned slot; `None` is the single unversioned slot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u32>,
    /// Fragment payload.
    pub payload: Value,
    /// Submitting agent; must hold the live lease.
    pub agent_id: AgentId,
    /// Optional supporting evidence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<Value>,
    /// Optional submitter notes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Replay-safety key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    /// Request metadata for provenance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<RequestContext>,
    /// Caller-supplied operation time.
    pub requested_at: Timestamp,
}

/// Finalization request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalizeRequest {
    /// Item to finalize.
    pub item_id: ItemId,
    /// Finalization mode.
    pub mode: FinalizeMode,
    /// Acting principal; defaults to the system actor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<Actor>,
    /// Replay-safety key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    /// Request metadata for provenance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<RequestContext>,
    /// Caller-supplied operation time.
    pub requested_at: Timestamp,
}

/// Approval request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApproveRequest {
    /// Order to approve.
    pub order_id: OrderId,
    /// Acting principal; defaults to the system actor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<Actor>,
    /// Replay-safety key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    /// Request metadata for provenance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<RequestContext>,
    /// Caller-supplied operation time.
    pub requested_at: Timestamp,
}

/// Rejection request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectRequest {
    /// Order to reject.
    pub order_id: OrderId,
    /// Opaque error payload recorded on the event.
    pub errors: Value,
    /// Whether the order returns to the queue for rework.
    pub allow_rework: bool,
    /// Acting principal; defaults to the system actor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<Actor>,
    /// Replay-safety key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    /// Request metadata for provenance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<RequestContext>,
    /// Caller-supplied operation time.
    pub requested_at: Timestamp,
}

/// Approval response carrying the applied diff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApproveResponse {
    /// Order after approval, apply, and any completion cascade.
    pub order: Order,
    /// Diff reported by the handler's apply.
    pub diff: Diff,
}

// ============================================================================
// SECTION: Engine
// ============================================================================

/// The work-order control plane engine.
#[derive(Debug, Clone)]
pub struct WorkEngine<S, B> {
    /// Backing store.
    store: S,
    /// Injected configuration.
    config: EngineConfig,
    /// Transition gate.
    machine: StateMachine,
    /// Proposal allocation.
    allocator: Allocator<S>,
    /// Submission and approval pipeline.
    executor: Executor<S>,
    /// Lease operations and dispatch.
    lease: LeaseService<S, B>,
    /// Maintenance passes.
    maintenance: MaintenanceLoop<S, B>,
    /// Idempotency guard.
    guard: IdempotencyGuard<S>,
    /// Provenance capture.
    provenance: ProvenanceEnricher<S>,
}

impl<S, B> WorkEngine<S, B>
where
    S: WorkOrderStore + Clone,
    B: LeaseBackend + Clone,
{
    /// Creates an engine over a store, lease backend, registry, and
    /// configuration.
    #[must_use]
    pub fn new(store: S, backend: B, registry: HandlerRegistry, config: EngineConfig) -> Self {
        let machine = StateMachine::new(
            config.order_transitions.clone(),
            config.item_transitions.clone(),
        );
        let allocator = Allocator::new(
            store.clone(),
            registry.clone(),
            config.default_max_attempts,
        );
        let executor = Executor::new(
            store.clone(),
            registry.clone(),
            machine.clone(),
            config.partials.clone(),
        );
        let lease = LeaseService::new(
            store.clone(),
            backend.clone(),
            machine.clone(),
            config.lease.clone(),
        );
        let maintenance = MaintenanceLoop::new(
            store.clone(),
            LeaseService::new(store.clone(), backend, machine.clone(), config.lease.clone()),
            machine.clone(),
            config.maintenance,
        );
        let guard = IdempotencyGuard::new(store.clone(), config.idempotency_enforce_on.clone());
        let provenance = ProvenanceEnricher::new(store.clone());
        Self {
            store,
            config,
            machine,
            allocator,
            executor,
            lease,
            maintenance,
            guard,
            provenance,
        }
    }

    /// Returns the injected configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Proposes typed work: validates, creates the order, and plans items.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::SchemaViolation`] when the payload fails the
    /// type schema; no order is created in that case.
    pub fn propose(&self, request: ProposeRequest) -> Result<Order, EngineError> {
        let now = request.requested_at;
        let target = request.order_type.as_str().to_string();
        self.guard.execute(
            OperationTag::Propose,
            &target,
            request.idempotency_key.as_deref(),
            now,
            || {
                let order = self
                    .allocator
                    .propose(
                        Proposal {
                            order_type: request.order_type.clone(),
                            payload: request.payload.clone(),
                            meta: if request.meta.is_null() {
                                Value::Object(serde_json::Map::new())
                            } else {
                                request.meta.clone()
                            },
                            priority: request.priority,
                            requested_by: request.actor.clone(),
                        },
                        now,
                    )
                    .map_err(EngineError::from)?;
                if let Some(context) = &request.context {
                    self.provenance.capture(&order.id, None, context, now)?;
                }
                Ok(order)
            },
        )
    }

    /// Re-plans an order whose items were drained, for explicit rework paths.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ItemsNotDrained`] while the order still has
    /// items.
    pub fn plan(
        &self,
        order_id: &OrderId,
        actor: Option<Actor>,
        now: Timestamp,
    ) -> Result<Vec<Item>, EngineError> {
        let actor = actor.unwrap_or_else(Actor::system);
        self.allocator.plan(order_id, &actor, now).map_err(EngineError::from)
    }

    /// Lists orders through the filter, sort, and pagination pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::FilterInvalid`] before any row is inspected
    /// when the query is malformed.
    pub fn list_orders(&self, query: &ListQuery) -> Result<Vec<Order>, EngineError> {
        let orders = self.store.list_orders()?;
        apply_query(&orders, query, self.config.meta_path_depth).map_err(EngineError::from)
    }

    /// Loads one order.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] for unknown identifiers.
    pub fn get_order(&self, order_id: &OrderId) -> Result<Order, EngineError> {
        self.store
            .get_order(order_id)?
            .ok_or_else(|| EngineError::NotFound(format!("order {order_id}")))
    }

    /// Loads one item.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] for unknown identifiers.
    pub fn get_item(&self, item_id: &ItemId) -> Result<Item, EngineError> {
        self.store
            .get_item(item_id)?
            .ok_or_else(|| EngineError::NotFound(format!("item {item_id}")))
    }

    /// Checks out the best available item, scoped to one order or globally.
    ///
    /// Returns `None` when nothing is available, a cap is breached, or the
    /// acquire races and loses; the caller retries.
    ///
    /// # Errors
    ///
    /// Returns pass-through store and lease failures.
    pub fn checkout(&self, request: CheckoutRequest) -> Result<Option<Item>, EngineError> {
        let now = request.requested_at;
        let target = request
            .order_id
            .as_ref()
            .map_or_else(|| "global".to_string(), ToString::to_string);
        self.guard.execute(
            OperationTag::Checkout,
            &target,
            request.idempotency_key.as_deref(),
            now,
            || {
                let acquired = match &request.order_id {
                    Some(order_id) => self.checkout_scoped(order_id, &request.agent_id, now)?,
                    None => self
                        .lease
                        .acquire_next(&request.agent_id, &request.filters, now)
                        .map_err(EngineError::from)?,
                };
                if let Some(item) = &acquired {
                    self.mark_order_checked_out(&item.order_id, &request.agent_id, now)?;
                    if let Some(context) = &request.context {
                        self.provenance.capture(&item.order_id, Some(&item.id), context, now)?;
                    }
                }
                Ok(acquired)
            },
        )
    }

    /// Acquires the oldest available item of one order.
    fn checkout_scoped(
        &self,
        order_id: &OrderId,
        agent_id: &AgentId,
        now: Timestamp,
    ) -> Result<Option<Item>, EngineError> {
        // Verify the order exists so unknown ids surface as not-found rather
        // than an empty checkout.
        let _ = self.get_order(order_id)?;
        let mut items: Vec<Item> = self
            .store
            .items_for_order(order_id)?
            .into_iter()
            .filter(|item| item.state == ItemState::Queued && !item.has_live_lease(now))
            .collect();
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        for item in items {
            match self.lease.acquire_item(&item.id, agent_id, now) {
                Ok(acquired) => return Ok(Some(acquired)),
                Err(LeaseError::Conflict { .. } | LeaseError::NotLeasable { .. }) => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(None)
    }

    /// Marks the order `checked_out` on its first checkout.
    fn mark_order_checked_out(
        &self,
        order_id: &OrderId,
        agent_id: &AgentId,
        now: Timestamp,
    ) -> Result<(), EngineError> {
        let order = self.get_order(order_id)?;
        if order.state == OrderState::Queued {
            self.machine.transition_order(
                &self.store,
                &order,
                OrderState::CheckedOut,
                &Actor::agent(agent_id),
                now,
                TransitionContext {
                    kind: Some(EventKind::CheckedOut),
                    ..TransitionContext::default()
                },
            )?;
        }
        Ok(())
    }

    /// Extends an item's lease (heartbeat).
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::LeaseConflict`] for non-owners and
    /// [`EngineError::LeaseExpired`] once the TTL has passed.
    pub fn heartbeat(
        &self,
        item_id: &ItemId,
        agent_id: &AgentId,
        now: Timestamp,
    ) -> Result<Item, EngineError> {
        self.lease.extend_item(item_id, agent_id, now).map_err(EngineError::from)
    }

    /// Releases an item's lease, returning it to the queue.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::LeaseConflict`] for non-owners.
    pub fn release(
        &self,
        item_id: &ItemId,
        agent_id: &AgentId,
        now: Timestamp,
    ) -> Result<Item, EngineError> {
        self.lease.release_item(item_id, agent_id, now).map_err(EngineError::from)
    }

    /// Submits a whole-item result.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::SubmissionInvalid`] with issues persisted on
    /// the item, or lease errors per the submit contract.
    pub fn submit(&self, request: SubmitRequest) -> Result<Item, EngineError> {
        let now = request.requested_at;
        let target = request.item_id.as_str().to_string();
        self.guard.execute(
            OperationTag::Submit,
            &target,
            request.idempotency_key.as_deref(),
            now,
            || {
                if let Some(context) = &request.context {
                    let item = self.get_item(&request.item_id)?;
                    self.provenance.capture(&item.order_id, Some(&item.id), context, now)?;
                }
                self.executor
                    .submit(
                        &request.item_id,
                        request.result.clone(),
                        &request.agent_id,
                        request.evidence.clone(),
                        request.notes.clone(),
                        now,
                    )
                    .map_err(EngineError::from)
            },
        )
    }

    /// Submits one part of an item's result.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::PartInvalid`] with issues persisted on the
    /// rejected part, or lease errors per the submit contract.
    pub fn submit_part(&self, request: SubmitPartRequest) -> Result<Part, EngineError> {
        let now = request.requested_at;
        let target = format!(
            "{}:{}:{}",
            request.item_id,
            request.part_key,
            request.seq.map_or_else(|| "null".to_string(), |seq| seq.to_string())
        );
        self.guard.execute(
            OperationTag::SubmitPart,
            &target,
            request.idempotency_key.as_deref(),
            now,
            || {
                if let Some(context) = &request.context {
                    let item = self.get_item(&request.item_id)?;
                    self.provenance.capture(&item.order_id, Some(&item.id), context, now)?;
                }
                self.executor
                    .submit_part(
                        &request.item_id,
                        &request.part_key,
                        request.seq,
                        request.payload.clone(),
                        &request.agent_id,
                        request.evidence.clone(),
                        request.notes.clone(),
                        now,
                    )
                    .map_err(EngineError::from)
            },
        )
    }

    /// Lists the items of one order, ordered by creation time.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] for unknown orders.
    pub fn list_items(&self, order_id: &OrderId) -> Result<Vec<Item>, EngineError> {
        let _ = self.get_order(order_id)?;
        self.store.items_for_order(order_id).map_err(EngineError::from)
    }

    /// Lists the parts of one item.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] for unknown items.
    pub fn list_parts(&self, item_id: &ItemId) -> Result<Vec<Part>, EngineError> {
        let _ = self.get_item(item_id)?;
        self.store.parts_for_item(item_id).map_err(EngineError::from)
    }

    /// Finalizes an item from its latest validated parts.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::MissingRequiredParts`] in strict mode when
    /// required keys lack validated rows.
    pub fn finalize(&self, request: FinalizeRequest) -> Result<Item, EngineError> {
        let now = request.requested_at;
        let target = request.item_id.as_str().to_string();
        self.guard.execute(
            OperationTag::Finalize,
            &target,
            request.idempotency_key.as_deref(),
            now,
            || {
                if let Some(context) = &request.context {
                    let item = self.get_item(&request.item_id)?;
                    self.provenance.capture(&item.order_id, Some(&item.id), context, now)?;
                }
                let actor = request.actor.clone().unwrap_or_else(Actor::system);
                self.executor
                    .finalize(&request.item_id, request.mode, &actor, now)
                    .map_err(EngineError::from)
            },
        )
    }

    /// Approves an order and applies it inline.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotReadyForApproval`] when the acceptance
    /// policy refuses, or [`EngineError::ApplyFailed`] when the handler's
    /// apply raises.
    pub fn approve(&self, request: ApproveRequest) -> Result<ApproveResponse, EngineError> {
        let now = request.requested_at;
        let target = request.order_id.as_str().to_string();
        self.guard.execute(
            OperationTag::Approve,
            &target,
            request.idempotency_key.as_deref(),
            now,
            || {
                if let Some(context) = &request.context {
                    self.provenance.capture(&request.order_id, None, context, now)?;
                }
                let actor = request.actor.clone().unwrap_or_else(Actor::system);
                let (order, diff) = self
                    .executor
                    .approve(&request.order_id, &actor, now)
                    .map_err(EngineError::from)?;
                Ok(ApproveResponse { order, diff })
            },
        )
    }

    /// Rejects a submitted order, optionally returning it for rework.
    ///
    /// # Errors
    ///
    /// Returns pass-through machine failures.
    pub fn reject(&self, request: RejectRequest) -> Result<Order, EngineError> {
        let now = request.requested_at;
        let target = request.order_id.as_str().to_string();
        self.guard.execute(
            OperationTag::Reject,
            &target,
            request.idempotency_key.as_deref(),
            now,
            || {
                if let Some(context) = &request.context {
                    self.provenance.capture(&request.order_id, None, context, now)?;
                }
                let actor = request.actor.clone().unwrap_or_else(Actor::system);
                self.executor
                    .reject(
                        &request.order_id,
                        request.errors.clone(),
                        &actor,
                        request.allow_rework,
                        now,
                    )
                    .map_err(EngineError::from)
            },
        )
    }

    /// Fails an item that cannot be completed.
    ///
    /// # Errors
    ///
    /// Returns pass-through machine failures.
    pub fn fail_item(
        &self,
        item_id: &ItemId,
        error: Diagnostic,
        actor: Option<Actor>,
        now: Timestamp,
    ) -> Result<Item, EngineError> {
        let actor = actor.unwrap_or_else(Actor::system);
        self.executor
            .fail_item(item_id, error, &actor, now)
            .map_err(EngineError::from)
    }

    /// Lists the audit events of one order.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] for unknown orders.
    pub fn events_for_order(&self, order_id: &OrderId) -> Result<Vec<WorkEvent>, EngineError> {
        let _ = self.get_order(order_id)?;
        self.store.events_for_order(order_id).map_err(EngineError::from)
    }

    /// Lists the audit events of one item.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] for unknown items.
    pub fn events_for_item(&self, item_id: &ItemId) -> Result<Vec<WorkEvent>, EngineError> {
        let _ = self.get_item(item_id)?;
        self.store.events_for_item(item_id).map_err(EngineError::from)
    }

    /// Drives the maintenance loop for the selected phases (all by default).
    pub fn tick(
        &self,
        phases: Option<&[MaintenancePhase]>,
        now: Timestamp,
    ) -> MaintenanceReport {
        self.maintenance.run(phases.unwrap_or(ALL_PHASES), now)
    }

    /// Lists all live leases for diagnostics.
    ///
    /// # Errors
    ///
    /// Returns pass-through backend failures.
    pub fn leases(&self, now: Timestamp) -> Result<Vec<(LeaseKey, LeaseGrant)>, EngineError> {
        self.lease.backend().all_leases(now).map_err(EngineError::from)
    }
}
