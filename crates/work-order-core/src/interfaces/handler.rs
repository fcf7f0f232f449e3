// work-order-core/src/interfaces/handler.rs
// ============================================================================
// Module: Order-Type Handler Contract
// Description: Capability set implemented by each registered order type.
// Purpose: Define the narrow interface through which the engine delegates
// planning, validation, assembly, and apply.
// Dependencies: crate::core, serde_json
// ============================================================================

//! ## Overview
//! A handler is a value registered by string key at startup. The engine
//! dispatches to it by map lookup, never by inheritance. Handlers do not
//! touch the engine's persistence APIs; they receive orders with items fully
//! loaded and confine side effects to their own domain inside
//! [`OrderHandler::apply`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde_json::Map;
use serde_json::Value;
use thiserror::Error;

use crate::core::identifiers::OrderTypeName;
use crate::core::identifiers::PartKey;
use crate::core::model::Diff;
use crate::core::model::Item;
use crate::core::model::Order;
use crate::core::model::ValidationIssue;

// ============================================================================
// SECTION: Item Specs
// ============================================================================

/// One planned item specification returned by [`OrderHandler::plan`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemSpec {
    /// Item type; defaults to the order's type when absent.
    pub item_type: Option<OrderTypeName>,
    /// Opaque input derived from the order.
    pub input: Value,
    /// Override of the configured default retry budget.
    pub max_attempts: Option<u32>,
    /// Ordered part keys required for finalization, when partials are used.
    pub parts_required: Option<Vec<PartKey>>,
}

impl ItemSpec {
    /// Builds a spec carrying only an input.
    #[must_use]
    pub const fn with_input(input: Value) -> Self {
        Self {
            item_type: None,
            input,
            max_attempts: None,
            parts_required: None,
        }
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Handler failures outside of validation-issue reporting.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Planning failed.
    #[error("plan failed: {0}")]
    Plan(String),
    /// Assembly failed.
    #[error("assembly failed: {0}")]
    Assemble(String),
    /// Apply failed; the order will transition to `failed`.
    #[error("apply failed: {code}: {message}")]
    Apply {
        /// Stable machine-readable code.
        code: String,
        /// Human-readable message.
        message: String,
    },
    /// Any other handler error.
    #[error("handler error: {0}")]
    Other(String),
}

// ============================================================================
// SECTION: Handler Contract
// ============================================================================

/// Capability set implemented by an order type.
///
/// `plan` must be deterministic given `(order.payload, order.meta)`.
/// `apply` must be idempotent: applying an already-applied order must leave
/// the domain unchanged, and its diff should describe the null change.
pub trait OrderHandler: Send + Sync {
    /// Returns the schema descriptor (JSON Schema, Draft 2020-12) used to
    /// validate proposal payloads.
    fn schema(&self) -> Value;

    /// Decomposes an order into one or more item specifications.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError::Plan`] when the order cannot be decomposed.
    fn plan(&self, order: &Order) -> Result<Vec<ItemSpec>, HandlerError>;

    /// Schema-level rules checked on whole-item submission.
    ///
    /// # Errors
    ///
    /// Returns the offending issues when the result shape is invalid.
    fn submission_rules(&self, item: &Item, result: &Value) -> Result<(), Vec<ValidationIssue>> {
        let _ = (item, result);
        Ok(())
    }

    /// Business-logic check invoked after [`Self::submission_rules`] passes.
    ///
    /// # Errors
    ///
    /// Returns the offending issues when the result is unacceptable.
    fn after_validate_submission(
        &self,
        item: &Item,
        result: &Value,
    ) -> Result<(), Vec<ValidationIssue>> {
        let _ = (item, result);
        Ok(())
    }

    /// Complete submission validation; the default acceptance policy runs
    /// [`Self::submission_rules`] then [`Self::after_validate_submission`].
    ///
    /// # Errors
    ///
    /// Returns the offending issues from the first failing phase.
    fn validate_submission(
        &self,
        item: &Item,
        result: &Value,
    ) -> Result<(), Vec<ValidationIssue>> {
        self.submission_rules(item, result)?;
        self.after_validate_submission(item, result)
    }

    /// Schema-level rules checked per part submission.
    ///
    /// # Errors
    ///
    /// Returns the offending issues when the part slot is invalid.
    fn partial_rules(
        &self,
        item: &Item,
        part_key: &PartKey,
        seq: Option<u32>,
    ) -> Result<(), Vec<ValidationIssue>> {
        let _ = (item, part_key, seq);
        Ok(())
    }

    /// Business-logic check per part payload.
    ///
    /// # Errors
    ///
    /// Returns the offending issues when the payload is unacceptable.
    fn after_validate_part(
        &self,
        item: &Item,
        part_key: &PartKey,
        payload: &Value,
        seq: Option<u32>,
    ) -> Result<(), Vec<ValidationIssue>> {
        let _ = (item, part_key, payload, seq);
        Ok(())
    }

    /// Declares the required part keys for an item when partials are used.
    fn required_parts(&self, item: &Item) -> Vec<PartKey> {
        item.parts_required.clone().unwrap_or_default()
    }

    /// Deterministically assembles the finalized result from the latest
    /// validated part per key. The default builds an object keyed by part key.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError::Assemble`] when the parts cannot be combined.
    fn assemble(
        &self,
        item: &Item,
        latest_validated: &BTreeMap<PartKey, Value>,
    ) -> Result<Value, HandlerError> {
        let _ = item;
        let mut object = Map::new();
        for (key, payload) in latest_validated {
            object.insert(key.as_str().to_string(), payload.clone());
        }
        Ok(Value::Object(object))
    }

    /// Whole-dataset cross-part validation at finalization.
    ///
    /// # Errors
    ///
    /// Returns the offending issues when the assembled result is invalid.
    fn validate_assembled(
        &self,
        item: &Item,
        assembled: &Value,
    ) -> Result<(), Vec<ValidationIssue>> {
        let _ = (item, assembled);
        Ok(())
    }

    /// Approval readiness predicate; the default requires every item to be
    /// in a terminal-pre-apply state.
    fn ready_for_approval(&self, order: &Order, items: &[Item]) -> bool {
        let _ = order;
        !items.is_empty() && items.iter().all(|item| item.state.is_pre_apply_terminal())
    }

    /// Hook invoked before apply.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError`] to veto the apply.
    fn before_apply(&self, order: &Order, items: &[Item]) -> Result<(), HandlerError> {
        let _ = (order, items);
        Ok(())
    }

    /// Performs the domain mutation and reports its diff.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError::Apply`] when the mutation fails; the engine
    /// transitions the order to `failed` and re-raises.
    fn apply(&self, order: &Order, items: &[Item]) -> Result<Diff, HandlerError>;

    /// Hook invoked after a successful apply.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError`] when post-apply work fails.
    fn after_apply(&self, order: &Order, items: &[Item], diff: &Diff) -> Result<(), HandlerError> {
        let _ = (order, items, diff);
        Ok(())
    }

    /// Whether approved orders of this type apply without a manual approve.
    fn should_auto_approve(&self) -> bool {
        false
    }
}
