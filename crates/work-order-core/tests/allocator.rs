// work-order-core/tests/allocator.rs
// ============================================================================
// Module: Allocator Tests
// Description: Proposal validation, planning, and schema round-trips.
// Purpose: Verify payload validation failure modes and planned item shape.
// Dependencies: work-order-core
// ============================================================================
//! ## Overview
//! Covers schema round-trips: valid payloads persist verbatim, invalid
//! payloads surface one issue per offending sub-tree and create no order,
//! and planning stamps items with type, input, and retry budget.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

mod common;

use common::engine;
use common::propose_request;
use common::ts;
use serde_json::Value;
use serde_json::json;
use work_order_core::EngineError;
use work_order_core::ItemState;
use work_order_core::ListQuery;

/// Verifies a valid payload persists verbatim with its schema snapshot.
#[test]
fn valid_payload_round_trips() {
    let engine = engine();
    let payload = json!({ "message": "hello there" });
    let order = engine
        .propose(propose_request("echo", payload.clone(), Value::Null, 0, None, ts(0)))
        .unwrap();

    let reloaded = engine.get_order(&order.id).unwrap();
    assert_eq!(reloaded.payload, payload);
    assert!(reloaded.schema_snapshot.is_some());

    let items = engine.list_items(&order.id).unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].state, ItemState::Queued);
    assert_eq!(items[0].input, payload);
    assert_eq!(items[0].attempts, 0);
    assert_eq!(items[0].max_attempts, 3);
    assert_eq!(items[0].item_type.as_str(), "echo");
}

/// Verifies an invalid payload produces per-path issues and no order.
#[test]
fn invalid_payload_creates_nothing() {
    let engine = engine();
    let err = engine
        .propose(propose_request(
            "echo",
            json!({ "message": 7, "extra": true }),
            Value::Null,
            0,
            None,
            ts(0),
        ))
        .unwrap_err();
    let EngineError::SchemaViolation { issues } = err else {
        panic!("expected SchemaViolation, got {err}");
    };
    assert!(!issues.is_empty());
    assert!(issues.iter().any(|issue| issue.path.contains("message")));

    assert!(engine.list_orders(&ListQuery::default()).unwrap().is_empty());
}

/// Verifies unknown order types surface as not-found.
#[test]
fn unknown_type_is_not_found() {
    let engine = engine();
    let err = engine
        .propose(propose_request("nope", json!({}), Value::Null, 0, None, ts(0)))
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
}

/// Verifies re-planning refuses while items exist.
#[test]
fn replan_requires_drained_items() {
    let engine = engine();
    let order = engine
        .propose(propose_request("echo", json!({ "message": "hi" }), Value::Null, 0, None, ts(0)))
        .unwrap();
    let err = engine.plan(&order.id, None, ts(1)).unwrap_err();
    assert!(matches!(err, EngineError::ItemsNotDrained(_)));
}

/// Verifies the meta retry override lands on planned items.
#[test]
fn plan_honors_retry_override() {
    let engine = engine();
    let order = engine
        .propose(propose_request(
            "echo",
            json!({ "message": "hi" }),
            json!({ "max_attempts": 7 }),
            0,
            None,
            ts(0),
        ))
        .unwrap();
    let items = engine.list_items(&order.id).unwrap();
    assert_eq!(items[0].max_attempts, 7);
}
