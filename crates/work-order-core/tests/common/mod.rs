// work-order-core/tests/common/mod.rs
// ============================================================================
// Module: Shared Test Fixtures
// Description: Handlers, engines, and time helpers shared by the test suite.
// Purpose: Keep scenario tests focused on behavior, not setup.
// Dependencies: work-order-core
// ============================================================================
//! ## Overview
//! Provides an `echo` handler (single-item happy path), a `profile` handler
//! (partial submissions), auto-approval variants, and constructors for
//! engines over the in-memory store with either lease backend. All times are
//! explicit and anchored at a fixed epoch.

#![allow(dead_code, reason = "Each test binary uses a subset of the shared fixtures.")]

use std::sync::Arc;

use serde_json::Value;
use serde_json::json;
use work_order_core::Actor;
use work_order_core::DatabaseLeaseBackend;
use work_order_core::Diff;
use work_order_core::EngineConfig;
use work_order_core::HandlerError;
use work_order_core::HandlerRegistry;
use work_order_core::InMemoryKeyValueStore;
use work_order_core::InMemoryWorkOrderStore;
use work_order_core::Item;
use work_order_core::ItemSpec;
use work_order_core::KeyValueLeaseBackend;
use work_order_core::Order;
use work_order_core::OrderHandler;
use work_order_core::OrderTypeName;
use work_order_core::PartKey;
use work_order_core::ProposeRequest;
use work_order_core::Timestamp;
use work_order_core::ValidationIssue;
use work_order_core::WorkEngine;

/// Fixed test epoch (2023-11-14T22:13:20Z).
pub const EPOCH_SECONDS: i64 = 1_700_000_000;

/// Engine over the in-memory store with the database lease backend.
pub type DbEngine = WorkEngine<InMemoryWorkOrderStore, DatabaseLeaseBackend<InMemoryWorkOrderStore>>;

/// Engine over the in-memory store with the key-value lease backend.
pub type KvEngine = WorkEngine<InMemoryWorkOrderStore, KeyValueLeaseBackend<InMemoryKeyValueStore>>;

/// Timestamp at a second offset from the test epoch.
pub fn ts(offset_seconds: i64) -> Timestamp {
    Timestamp::from_unix_seconds(EPOCH_SECONDS + offset_seconds).unwrap()
}

// ============================================================================
// SECTION: Handlers
// ============================================================================

/// Single-item echo handler: the minimal happy-path type.
///
/// Honors a `max_attempts` override in order meta so retry scenarios can be
/// driven without a dedicated type.
pub struct EchoHandler;

impl OrderHandler for EchoHandler {
    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "message": { "type": "string" } },
            "required": ["message"],
            "additionalProperties": false
        })
    }

    fn plan(&self, order: &Order) -> Result<Vec<ItemSpec>, HandlerError> {
        let mut spec = ItemSpec::with_input(order.payload.clone());
        spec.max_attempts = order
            .meta
            .get("max_attempts")
            .and_then(Value::as_u64)
            .and_then(|value| u32::try_from(value).ok());
        Ok(vec![spec])
    }

    fn submission_rules(&self, _item: &Item, result: &Value) -> Result<(), Vec<ValidationIssue>> {
        if result.get("ok").and_then(Value::as_bool) == Some(true) {
            Ok(())
        } else {
            Err(vec![ValidationIssue::new("ok", "missing_ok", "result must set ok = true")])
        }
    }

    fn apply(&self, order: &Order, _items: &[Item]) -> Result<Diff, HandlerError> {
        Ok(Diff {
            before: json!({}),
            after: order.payload.clone(),
            summary: "echoed".to_string(),
        })
    }
}

/// Partial-submission handler requiring `identity` and `contacts` parts.
pub struct ProfileHandler;

impl OrderHandler for ProfileHandler {
    fn schema(&self) -> Value {
        json!({ "type": "object" })
    }

    fn plan(&self, order: &Order) -> Result<Vec<ItemSpec>, HandlerError> {
        let mut spec = ItemSpec::with_input(order.payload.clone());
        spec.parts_required = Some(vec![PartKey::new("identity"), PartKey::new("contacts")]);
        Ok(vec![spec])
    }

    fn after_validate_part(
        &self,
        _item: &Item,
        part_key: &PartKey,
        payload: &Value,
        _seq: Option<u32>,
    ) -> Result<(), Vec<ValidationIssue>> {
        match part_key.as_str() {
            "identity" => {
                let name_ok = payload
                    .get("name")
                    .and_then(Value::as_str)
                    .is_some_and(|name| !name.is_empty());
                if name_ok {
                    Ok(())
                } else {
                    Err(vec![ValidationIssue::new("name", "empty_name", "name must be non-empty")])
                }
            }
            "contacts" => {
                if payload.get("email").is_some() {
                    Ok(())
                } else {
                    Err(vec![ValidationIssue::new("email", "missing_email", "email is required")])
                }
            }
            _ => Ok(()),
        }
    }

    fn apply(&self, _order: &Order, items: &[Item]) -> Result<Diff, HandlerError> {
        let after = items
            .first()
            .and_then(|item| item.assembled_result.clone())
            .unwrap_or(Value::Null);
        Ok(Diff {
            before: json!({}),
            after,
            summary: "profile applied".to_string(),
        })
    }
}

/// Echo variant that auto-approves once every item is submitted.
pub struct AutoEchoHandler;

impl OrderHandler for AutoEchoHandler {
    fn schema(&self) -> Value {
        EchoHandler.schema()
    }

    fn plan(&self, order: &Order) -> Result<Vec<ItemSpec>, HandlerError> {
        EchoHandler.plan(order)
    }

    fn apply(&self, order: &Order, items: &[Item]) -> Result<Diff, HandlerError> {
        EchoHandler.apply(order, items)
    }

    fn should_auto_approve(&self) -> bool {
        true
    }
}

/// Auto-approving handler whose acceptance policy never agrees; exercises
/// the swallow path.
pub struct AutoNeverReadyHandler;

impl OrderHandler for AutoNeverReadyHandler {
    fn schema(&self) -> Value {
        EchoHandler.schema()
    }

    fn plan(&self, order: &Order) -> Result<Vec<ItemSpec>, HandlerError> {
        EchoHandler.plan(order)
    }

    fn ready_for_approval(&self, _order: &Order, _items: &[Item]) -> bool {
        false
    }

    fn apply(&self, order: &Order, items: &[Item]) -> Result<Diff, HandlerError> {
        EchoHandler.apply(order, items)
    }

    fn should_auto_approve(&self) -> bool {
        true
    }
}

/// Handler whose apply always raises.
pub struct FailingApplyHandler;

impl OrderHandler for FailingApplyHandler {
    fn schema(&self) -> Value {
        EchoHandler.schema()
    }

    fn plan(&self, order: &Order) -> Result<Vec<ItemSpec>, HandlerError> {
        EchoHandler.plan(order)
    }

    fn apply(&self, _order: &Order, _items: &[Item]) -> Result<Diff, HandlerError> {
        Err(HandlerError::Apply {
            code: "domain_unavailable".to_string(),
            message: "downstream refused the mutation".to_string(),
        })
    }
}

// ============================================================================
// SECTION: Engine Constructors
// ============================================================================

/// Registry with every fixture handler registered.
pub fn registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry.register("echo", Arc::new(EchoHandler));
    registry.register("profile", Arc::new(ProfileHandler));
    registry.register("auto_echo", Arc::new(AutoEchoHandler));
    registry.register("auto_never_ready", Arc::new(AutoNeverReadyHandler));
    registry.register("failing_apply", Arc::new(FailingApplyHandler));
    registry
}

/// Engine over a fresh in-memory store with the database lease backend.
pub fn engine() -> DbEngine {
    engine_with_config(EngineConfig::default())
}

/// Engine with explicit configuration.
pub fn engine_with_config(config: EngineConfig) -> DbEngine {
    let store = InMemoryWorkOrderStore::new();
    let backend = DatabaseLeaseBackend::new(store.clone());
    WorkEngine::new(store, backend, registry(), config)
}

/// Engine over a fresh in-memory store with the key-value lease backend.
pub fn kv_engine() -> KvEngine {
    let store = InMemoryWorkOrderStore::new();
    let backend = KeyValueLeaseBackend::new(InMemoryKeyValueStore::new());
    WorkEngine::new(store, backend, registry(), EngineConfig::default())
}

// ============================================================================
// SECTION: Request Helpers
// ============================================================================

/// Proposal request for a type with a payload and meta.
pub fn propose_request(
    order_type: &str,
    payload: Value,
    meta: Value,
    priority: i64,
    idem: Option<&str>,
    at: Timestamp,
) -> ProposeRequest {
    ProposeRequest {
        order_type: OrderTypeName::new(order_type),
        payload,
        meta,
        priority,
        actor: Some(Actor::user("tester")),
        idempotency_key: idem.map(ToString::to_string),
        context: None,
        requested_at: at,
    }
}

/// Proposes an echo order carrying `message = "hi"`.
pub fn propose_echo(engine: &DbEngine, idem: Option<&str>, at: Timestamp) -> Order {
    engine
        .propose(propose_request("echo", json!({ "message": "hi" }), Value::Null, 0, idem, at))
        .unwrap()
}
