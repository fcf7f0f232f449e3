// work-order-core/src/runtime/executor.rs
// ============================================================================
// Module: Work Order Executor
// Description: Submission, partial submission, finalization, approval, apply,
// and rejection pipeline.
// Purpose: Drive the two-phase validation and approval/apply flow with strict
// state-machine discipline.
// Dependencies: crate::{core, interfaces, runtime::{machine, registry}}
// ============================================================================

//! ## Overview
//! The executor owns every mutation between "item leased" and "order
//! completed". Submissions run the handler's acceptance policy; failures are
//! persisted on the row and rethrown. Approval calls the handler's `apply`
//! inline, records its diff, and cascades items through `accepted` to
//! `completed`, at which point the state machine cascades the order itself.
//! Auto-approval is best-effort convenience: failures are logged and
//! swallowed, never a correctness boundary.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;

use crate::core::actor::Actor;
use crate::core::hashing::HashError;
use crate::core::hashing::part_checksum;
use crate::core::identifiers::AgentId;
use crate::core::identifiers::EventId;
use crate::core::identifiers::ItemId;
use crate::core::identifiers::OrderId;
use crate::core::identifiers::PartId;
use crate::core::identifiers::PartKey;
use crate::core::identifiers::format_part_keys;
use crate::core::model::Diagnostic;
use crate::core::model::Diff;
use crate::core::model::EventKind;
use crate::core::model::Item;
use crate::core::model::Order;
use crate::core::model::Part;
use crate::core::model::PartSlot;
use crate::core::model::PartStatus;
use crate::core::model::ValidationIssue;
use crate::core::model::WorkEvent;
use crate::core::state::ItemState;
use crate::core::state::OrderState;
use crate::core::time::Timestamp;
use crate::interfaces::HandlerError;
use crate::interfaces::StoreError;
use crate::interfaces::WorkOrderStore;
use crate::runtime::machine::MachineError;
use crate::runtime::machine::StateMachine;
use crate::runtime::machine::TransitionContext;
use crate::runtime::registry::HandlerRegistry;
use crate::runtime::registry::RegistryError;

// ============================================================================
// SECTION: Settings
// ============================================================================

/// Partial-submission tunables injected at construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialsSettings {
    /// Whether partial submissions are accepted at all.
    pub enabled: bool,
    /// Maximum part rows per item.
    pub max_parts_per_item: u32,
    /// Maximum serialized part payload size in bytes.
    pub max_payload_bytes: usize,
}

impl Default for PartialsSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_parts_per_item: 100,
            max_payload_bytes: 1_048_576,
        }
    }
}

/// Finalization modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalizeMode {
    /// Fail when any required part lacks a validated row.
    Strict,
    /// Assemble whatever validated parts exist.
    BestEffort,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Executor errors.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// Submission failed the acceptance policy; issues are persisted on the
    /// item.
    #[error("submission invalid for item {item_id}")]
    SubmissionInvalid {
        /// Rejected item.
        item_id: ItemId,
        /// Offending issues.
        issues: Vec<ValidationIssue>,
    },
    /// Part failed validation; issues are persisted on the rejected part.
    #[error("part invalid for item {item_id} key {part_key}")]
    PartInvalid {
        /// Owning item.
        item_id: ItemId,
        /// Rejected part key.
        part_key: PartKey,
        /// Offending issues.
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
    /// The order's acceptance policy refused approval.
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
    /// Caller does not hold the item's lease.
    #[error("lease conflict on item {item_id}: held by {holder}")]
    NotLeaseOwner {
        /// Contended item.
        item_id: ItemId,
        /// Current holder, or `none`.
        holder: String,
    },
    /// Caller's lease has passed its TTL.
    #[error("lease expired for item {item_id}")]
    LeaseExpired {
        /// Item whose lease lapsed.
        item_id: ItemId,
    },
    /// Unknown order.
    #[error("order not found: {0}")]
    OrderNotFound(OrderId),
    /// Unknown item.
    #[error("item not found: {0}")]
    ItemNotFound(ItemId),
    /// State machine refusal or failure.
    #[error(transparent)]
    Machine(#[from] MachineError),
    /// Registry lookup failure.
    #[error(transparent)]
    Registry(#[from] RegistryError),
    /// Store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Handler failure outside validation-issue reporting.
    #[error(transparent)]
    Handler(#[from] HandlerError),
    /// Canonicalization failure.
    #[error(transparent)]
    Hash(#[from] HashError),
}

// ============================================================================
// SECTION: Executor
// ============================================================================

/// Submission and approval pipeline over a store, registry, and machine.
#[derive(Debug, Clone)]
pub struct Executor<S> {
    /// Backing store.
    store: S,
    /// Handler registry.
    registry: HandlerRegistry,
    /// Transition gate.
    machine: StateMachine,
    /// Partial-submission tunables.
    partials: PartialsSettings,
}

impl<S: WorkOrderStore> Executor<S> {
    /// Creates an executor.
    pub const fn new(
        store: S,
        registry: HandlerRegistry,
        machine: StateMachine,
        partials: PartialsSettings,
    ) -> Self {
        Self {
            store,
            registry,
            machine,
            partials,
        }
    }

    /// Loads an item or fails with [`ExecutorError::ItemNotFound`].
    fn require_item(&self, item_id: &ItemId) -> Result<Item, ExecutorError> {
        self.store
            .get_item(item_id)?
            .ok_or_else(|| ExecutorError::ItemNotFound(item_id.clone()))
    }

    /// Loads an order or fails with [`ExecutorError::OrderNotFound`].
    fn require_order(&self, order_id: &OrderId) -> Result<Order, ExecutorError> {
        self.store
            .get_order(order_id)?
            .ok_or_else(|| ExecutorError::OrderNotFound(order_id.clone()))
    }

    /// Verifies the caller holds a live lease on the item.
    fn require_lease(
        item: &Item,
        agent_id: &AgentId,
        now: Timestamp,
    ) -> Result<(), ExecutorError> {
        if item.leased_by.as_ref() != Some(agent_id) {
            return Err(ExecutorError::NotLeaseOwner {
                item_id: item.id.clone(),
                holder: item
                    .leased_by
                    .as_ref()
                    .map_or_else(|| "none".to_string(), ToString::to_string),
            });
        }
        if !item.has_live_lease(now) {
            return Err(ExecutorError::LeaseExpired {
                item_id: item.id.clone(),
            });
        }
        Ok(())
    }

    /// Marks the owning order `in_progress` the first time work lands on it.
    fn mark_order_in_progress(
        &self,
        order_id: &OrderId,
        actor: &Actor,
        now: Timestamp,
    ) -> Result<(), ExecutorError> {
        let order = self.require_order(order_id)?;
        if matches!(order.state, OrderState::Queued | OrderState::CheckedOut) {
            self.machine.transition_order(
                &self.store,
                &order,
                OrderState::InProgress,
                actor,
                now,
                TransitionContext::default(),
            )?;
        }
        Ok(())
    }

    /// Submits a whole-item result under a live lease.
    ///
    /// On validation failure the issues are persisted on the item and the
    /// error is rethrown. On success the result is persisted, the item
    /// transitions to `submitted` with its lease cleared, and auto-approval
    /// is checked.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutorError::SubmissionInvalid`], lease errors, or
    /// pass-through store and machine failures.
    pub fn submit(
        &self,
        item_id: &ItemId,
        result: Value,
        agent_id: &AgentId,
        evidence: Option<Value>,
        notes: Option<String>,
        now: Timestamp,
    ) -> Result<Item, ExecutorError> {
        let item = self.require_item(item_id)?;
        Self::require_lease(&item, agent_id, now)?;
        let handler = self.registry.get(&item.item_type)?;
        let actor = Actor::agent(agent_id);

        if let Err(issues) = handler.validate_submission(&item, &result) {
            let mut rejected = item;
            rejected.error = Some(Diagnostic {
                code: "submission_invalid".to_string(),
                message: "submission failed validation".to_string(),
                details: serde_json::to_value(&issues).ok(),
            });
            self.machine.record_item_event(
                &self.store,
                &rejected,
                EventKind::Rejected,
                &actor,
                now,
                TransitionContext {
                    payload: serde_json::to_value(&issues).ok(),
                    message: Some("submission rejected".to_string()),
                    ..TransitionContext::default()
                },
            )?;
            return Err(ExecutorError::SubmissionInvalid {
                item_id: rejected.id,
                issues,
            });
        }

        self.mark_order_in_progress(&item.order_id, &actor, now)?;

        let mut accepted = self.require_item(item_id)?;
        accepted.result = Some(result.clone());
        accepted.error = None;
        accepted.clear_lease();
        let submitted = self.machine.transition_item(
            &self.store,
            &accepted,
            ItemState::Submitted,
            &actor,
            now,
            TransitionContext {
                payload: Some(json!({
                    "result": result,
                    "evidence": evidence,
                    "notes": notes,
                })),
                ..TransitionContext::default()
            },
        )?;

        self.check_auto_approval(&submitted.order_id, now)?;
        self.require_item(item_id).map_err(ExecutorError::from)
    }

    /// Submits one part of an item's result under a live lease.
    ///
    /// Successes upsert the `(item, part_key, seq)` row as `validated` with a
    /// deterministic checksum. Validation failures persist a `rejected` row
    /// and rethrow, except that a slot already holding validated data keeps
    /// it and the rejection is recorded on the parts view and audit trail
    /// only. The item's state machine is untouched.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutorError::PartInvalid`], [`ExecutorError::PartialsDisabled`],
    /// lease errors, or pass-through failures.
    #[allow(clippy::too_many_arguments, reason = "mirrors the operation's wire surface")]
    pub fn submit_part(
        &self,
        item_id: &ItemId,
        part_key: &PartKey,
        seq: Option<u32>,
        payload: Value,
        agent_id: &AgentId,
        evidence: Option<Value>,
        notes: Option<String>,
        now: Timestamp,
    ) -> Result<Part, ExecutorError> {
        if !self.partials.enabled {
            return Err(ExecutorError::PartialsDisabled);
        }
        let item = self.require_item(item_id)?;
        Self::require_lease(&item, agent_id, now)?;
        let handler = self.registry.get(&item.item_type)?;
        let actor = Actor::agent(agent_id);

        // Boundary limits reject without persisting the offending payload.
        let mut boundary = Vec::new();
        let serialized_len = serde_json::to_vec(&payload).map(|bytes| bytes.len()).unwrap_or(0);
        if serialized_len > self.partials.max_payload_bytes {
            boundary.push(ValidationIssue::new(
                "payload",
                "payload_too_large",
                format!(
                    "part payload is {serialized_len} bytes (max {})",
                    self.partials.max_payload_bytes
                ),
            ));
        }
        let existing = self.store.parts_for_item(item_id)?;
        let slot = existing
            .iter()
            .find(|part| part.part_key == *part_key && part.seq == seq)
            .cloned();
        if slot.is_none() && existing.len() >= self.partials.max_parts_per_item as usize {
            boundary.push(ValidationIssue::new(
                "part_key",
                "too_many_parts",
                format!("item already has {} parts (max {})", existing.len(),
                    self.partials.max_parts_per_item),
            ));
        }
        if !boundary.is_empty() {
            return Err(ExecutorError::PartInvalid {
                item_id: item.id,
                part_key: part_key.clone(),
                issues: boundary,
            });
        }

        let mut issues = Vec::new();
        if let Err(rule_issues) = handler.partial_rules(&item, part_key, seq) {
            issues.extend(rule_issues);
        }
        if issues.is_empty() {
            if let Err(rule_issues) = handler.after_validate_part(&item, part_key, &payload, seq) {
                issues.extend(rule_issues);
            }
        }

        let checksum = part_checksum(&payload)?;
        let status = if issues.is_empty() {
            PartStatus::Validated
        } else {
            PartStatus::Rejected
        };
        let part = Part {
            id: slot.as_ref().map_or_else(PartId::generate, |existing| existing.id.clone()),
            item_id: item.id.clone(),
            part_key: part_key.clone(),
            seq,
            status,
            payload,
            evidence,
            notes,
            errors: issues.clone(),
            checksum: checksum.clone(),
            submitted_by: Some(agent_id.clone()),
            created_at: slot.as_ref().map_or(now, |existing| existing.created_at),
            updated_at: now,
        };

        let mut mirrored = item.clone();
        mirrored.parts_state.insert(
            part_key.as_str().to_string(),
            PartSlot {
                status,
                seq,
                checksum: checksum.value.clone(),
                submitted_at: now,
            },
        );

        if status == PartStatus::Rejected {
            // A validated slot is committed data; a later rejected attempt
            // for the same tuple is recorded without destroying it.
            if slot.as_ref().is_some_and(|existing| existing.status == PartStatus::Validated) {
                self.machine.record_item_event(
                    &self.store,
                    &mirrored,
                    EventKind::PartRejected,
                    &actor,
                    now,
                    TransitionContext {
                        payload: serde_json::to_value(&issues).ok(),
                        message: Some(format!("part {part_key} rejected")),
                        ..TransitionContext::default()
                    },
                )?;
            } else {
                let rejected_event =
                    part_event(&mirrored, EventKind::PartRejected, &actor, part_key, seq, now);
                self.store.upsert_part(&part, &mirrored, &[rejected_event])?;
            }
            return Err(ExecutorError::PartInvalid {
                item_id: item.id,
                part_key: part_key.clone(),
                issues,
            });
        }

        let events = vec![
            part_event(&mirrored, EventKind::PartSubmitted, &actor, part_key, seq, now),
            part_event(&mirrored, EventKind::PartValidated, &actor, part_key, seq, now),
        ];
        self.store.upsert_part(&part, &mirrored, &events)?;
        self.mark_order_in_progress(&item.order_id, &actor, now)?;
        Ok(part)
    }

    /// Finalizes an item by assembling its latest validated parts.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutorError::MissingRequiredParts`] in strict mode when a
    /// required key has no validated row, [`ExecutorError::SubmissionInvalid`]
    /// when cross-part validation fails, or pass-through failures.
    pub fn finalize(
        &self,
        item_id: &ItemId,
        mode: FinalizeMode,
        actor: &Actor,
        now: Timestamp,
    ) -> Result<Item, ExecutorError> {
        let item = self.require_item(item_id)?;
        let handler = self.registry.get(&item.item_type)?;

        let latest = latest_validated_parts(&self.store.parts_for_item(item_id)?);
        if mode == FinalizeMode::Strict {
            let missing: Vec<PartKey> = handler
                .required_parts(&item)
                .into_iter()
                .filter(|key| !latest.contains_key(key))
                .collect();
            if !missing.is_empty() {
                return Err(ExecutorError::MissingRequiredParts {
                    item_id: item.id,
                    missing,
                });
            }
        }

        let payloads: BTreeMap<PartKey, Value> = latest
            .iter()
            .map(|(key, part)| (key.clone(), part.payload.clone()))
            .collect();
        let assembled = handler.assemble(&item, &payloads)?;
        if let Err(issues) = handler.validate_assembled(&item, &assembled) {
            return Err(ExecutorError::SubmissionInvalid {
                item_id: item.id,
                issues,
            });
        }

        let mut finalized = item;
        finalized.assembled_result = Some(assembled.clone());
        finalized.result = Some(assembled);
        finalized.error = None;
        finalized.clear_lease();
        let parts_count = payloads.len();
        let finalized = self.machine.transition_item(
            &self.store,
            &finalized,
            ItemState::Submitted,
            actor,
            now,
            TransitionContext {
                kind: Some(EventKind::Finalized),
                payload: Some(json!({ "parts_count": parts_count, "assembled": true })),
                ..TransitionContext::default()
            },
        )?;

        self.check_auto_approval(&finalized.order_id, now)?;
        self.require_item(item_id).map_err(ExecutorError::from)
    }

    /// Approves an order and applies it inline.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutorError::NotReadyForApproval`] when the acceptance
    /// policy refuses, or [`ExecutorError::ApplyFailed`] when the handler's
    /// apply raises.
    pub fn approve(
        &self,
        order_id: &OrderId,
        actor: &Actor,
        now: Timestamp,
    ) -> Result<(Order, Diff), ExecutorError> {
        let order = self.require_order(order_id)?;
        let items = self.store.items_for_order(order_id)?;
        let handler = self.registry.get(&order.order_type)?;
        if !handler.ready_for_approval(&order, &items) {
            return Err(ExecutorError::NotReadyForApproval {
                order_id: order.id,
            });
        }

        let approved = self.machine.transition_order(
            &self.store,
            &order,
            OrderState::Approved,
            actor,
            now,
            TransitionContext::default(),
        )?;
        let diff = self.apply(&approved, actor, now)?;
        let order = self.require_order(order_id)?;
        Ok((order, diff))
    }

    /// Applies an approved order through its handler.
    ///
    /// Invokes `before_apply`, then `apply` for the domain mutation and diff,
    /// records the diff on the `applied` event, cascades each submitted item
    /// through `accepted` to `completed`, and invokes `after_apply`. Handler
    /// failures transition the order to `failed` and re-raise.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutorError::ApplyFailed`] when the handler raises.
    pub fn apply(
        &self,
        order: &Order,
        actor: &Actor,
        now: Timestamp,
    ) -> Result<Diff, ExecutorError> {
        let items = self.store.items_for_order(&order.id)?;
        let handler = self.registry.get(&order.order_type)?;

        let applied_result = handler
            .before_apply(order, &items)
            .and_then(|()| handler.apply(order, &items));
        let diff = match applied_result {
            Ok(diff) => diff,
            Err(err) => {
                let (code, message) = match &err {
                    HandlerError::Apply { code, message } => (code.clone(), message.clone()),
                    other => ("apply_failed".to_string(), other.to_string()),
                };
                self.machine.transition_order(
                    &self.store,
                    order,
                    OrderState::Failed,
                    &Actor::system(),
                    now,
                    TransitionContext {
                        payload: Some(json!({ "code": code, "message": message })),
                        message: Some("handler apply failed".to_string()),
                        ..TransitionContext::default()
                    },
                )?;
                return Err(ExecutorError::ApplyFailed {
                    order_id: order.id.clone(),
                    code,
                    message,
                });
            }
        };

        let applied = self.machine.transition_order(
            &self.store,
            order,
            OrderState::Applied,
            actor,
            now,
            TransitionContext {
                diff: Some(diff.clone()),
                ..TransitionContext::default()
            },
        )?;

        for item in &items {
            if item.state != ItemState::Submitted {
                continue;
            }
            let accepted = self.machine.transition_item(
                &self.store,
                item,
                ItemState::Accepted,
                &Actor::system(),
                now,
                TransitionContext::default(),
            )?;
            self.machine.transition_item(
                &self.store,
                &accepted,
                ItemState::Completed,
                &Actor::system(),
                now,
                TransitionContext::default(),
            )?;
        }

        handler.after_apply(&applied, &self.store.items_for_order(&order.id)?, &diff)?;
        Ok(diff)
    }

    /// Rejects a submitted order, optionally returning it to the queue for
    /// rework. Item states are left untouched either way.
    ///
    /// # Errors
    ///
    /// Returns pass-through machine failures, including
    /// [`MachineError::IllegalStateTransition`] when the order is not in a
    /// rejectable state.
    pub fn reject(
        &self,
        order_id: &OrderId,
        errors: Value,
        actor: &Actor,
        allow_rework: bool,
        now: Timestamp,
    ) -> Result<Order, ExecutorError> {
        let order = self.require_order(order_id)?;
        let destination = if allow_rework {
            OrderState::Queued
        } else {
            OrderState::Rejected
        };
        let rejected = self.machine.transition_order(
            &self.store,
            &order,
            destination,
            actor,
            now,
            TransitionContext {
                kind: Some(EventKind::Rejected),
                payload: Some(json!({ "errors": errors })),
                ..TransitionContext::default()
            },
        )?;
        Ok(rejected)
    }

    /// Fails an item that cannot be completed, recording its diagnostic.
    ///
    /// # Errors
    ///
    /// Returns pass-through machine failures.
    pub fn fail_item(
        &self,
        item_id: &ItemId,
        error: Diagnostic,
        actor: &Actor,
        now: Timestamp,
    ) -> Result<Item, ExecutorError> {
        let item = self.require_item(item_id)?;
        let mut failing = item;
        failing.error = Some(error.clone());
        failing.clear_lease();
        let failed = self.machine.transition_item(
            &self.store,
            &failing,
            ItemState::Failed,
            actor,
            now,
            TransitionContext {
                payload: serde_json::to_value(&error).ok(),
                ..TransitionContext::default()
            },
        )?;
        Ok(failed)
    }

    /// Recomputes order submission readiness and attempts best-effort
    /// auto-approval.
    ///
    /// When every item is in a terminal-pre-apply state the order cascades to
    /// `submitted`. When the handler opts into auto-approval and the
    /// acceptance policy agrees, approval is attempted; any failure there is
    /// logged and swallowed so the order stays in `submitted` for manual
    /// approval.
    ///
    /// # Errors
    ///
    /// Returns pass-through store and machine failures from the readiness
    /// cascade only.
    pub fn check_auto_approval(
        &self,
        order_id: &OrderId,
        now: Timestamp,
    ) -> Result<(), ExecutorError> {
        let order = self.require_order(order_id)?;
        let items = self.store.items_for_order(order_id)?;
        let all_terminal =
            !items.is_empty() && items.iter().all(|item| item.state.is_pre_apply_terminal());
        if !all_terminal {
            return Ok(());
        }

        let order = if matches!(
            order.state,
            OrderState::Queued | OrderState::CheckedOut | OrderState::InProgress
        ) {
            self.machine.transition_order(
                &self.store,
                &order,
                OrderState::Submitted,
                &Actor::system(),
                now,
                TransitionContext::default(),
            )?
        } else {
            order
        };

        if order.state != OrderState::Submitted {
            return Ok(());
        }
        let handler = self.registry.get(&order.order_type)?;
        if handler.should_auto_approve() && handler.ready_for_approval(&order, &items) {
            if let Err(err) = self.approve(&order.id, &Actor::system(), now) {
                tracing::warn!(
                    order_id = %order.id,
                    error = %err,
                    "auto-approval failed; order left in submitted"
                );
            }
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Builds a part-scoped audit event.
fn part_event(
    item: &Item,
    kind: EventKind,
    actor: &Actor,
    part_key: &PartKey,
    seq: Option<u32>,
    now: Timestamp,
) -> WorkEvent {
    WorkEvent {
        id: EventId::generate(),
        order_id: item.order_id.clone(),
        item_id: Some(item.id.clone()),
        kind,
        actor: actor.clone(),
        payload: Some(json!({ "part_key": part_key.as_str(), "seq": seq })),
        message: None,
        diff: None,
        created_at: now,
    }
}

/// Picks the authoritative validated part per key: the greatest `seq`, with
/// the unversioned slot standing in only when no versioned row exists.
#[must_use]
pub fn latest_validated_parts(parts: &[Part]) -> BTreeMap<PartKey, Part> {
    let mut latest: BTreeMap<PartKey, Part> = BTreeMap::new();
    for part in parts {
        if part.status != PartStatus::Validated {
            continue;
        }
        match latest.get(&part.part_key) {
            Some(current) if slot_rank(current.seq) >= slot_rank(part.seq) => {}
            _ => {
                latest.insert(part.part_key.clone(), part.clone());
            }
        }
    }
    latest
}

/// Orders part slots: any versioned slot outranks the unversioned one.
const fn slot_rank(seq: Option<u32>) -> i64 {
    match seq {
        Some(value) => value as i64,
        None => -1,
    }
}
