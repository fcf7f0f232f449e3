// work-order-core/tests/dispatch.rs
// ============================================================================
// Module: Global Dispatch Tests
// Description: Priority-FIFO selection, filters, and concurrency caps.
// Purpose: Verify checkout ordering guarantees and cap enforcement.
// Dependencies: work-order-core
// ============================================================================
//! ## Overview
//! Covers strict priority-descending, FIFO-within-priority dispatch, the
//! type/priority/tenant filters, and the per-agent and per-type caps
//! evaluated from live lease counts.

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

use common::DbEngine;
use common::engine;
use common::engine_with_config;
use common::propose_request;
use common::ts;
use serde_json::Value;
use serde_json::json;
use work_order_core::CheckoutRequest;
use work_order_core::DispatchFilters;
use work_order_core::EngineConfig;
use work_order_core::Item;
use work_order_core::OrderTypeName;
use work_order_core::Timestamp;

/// Global checkout with filters.
fn checkout(
    engine: &DbEngine,
    agent: &str,
    filters: DispatchFilters,
    at: Timestamp,
) -> Option<Item> {
    engine
        .checkout(CheckoutRequest {
            order_id: None,
            filters,
            agent_id: agent.into(),
            idempotency_key: None,
            context: None,
            requested_at: at,
        })
        .unwrap()
}

/// Verifies the priority ordering and the `min_priority` filter end to end.
#[test]
fn dispatch_follows_priority_then_min_priority_filter() {
    let engine = engine();
    let low = engine
        .propose(propose_request("echo", json!({ "message": "low" }), Value::Null, 10, None, ts(0)))
        .unwrap();
    let high = engine
        .propose(propose_request("echo", json!({ "message": "high" }), Value::Null, 100, None, ts(1)))
        .unwrap();
    let mid = engine
        .propose(propose_request("echo", json!({ "message": "mid" }), Value::Null, 50, None, ts(2)))
        .unwrap();

    let first = checkout(&engine, "a1", DispatchFilters::default(), ts(3)).unwrap();
    assert_eq!(first.order_id, high.id);

    let second = checkout(&engine, "a2", DispatchFilters::default(), ts(4)).unwrap();
    assert_eq!(second.order_id, mid.id);

    let third = checkout(
        &engine,
        "a3",
        DispatchFilters {
            min_priority: Some(60),
            ..DispatchFilters::default()
        },
        ts(5),
    );
    assert!(third.is_none());

    let fallback = checkout(&engine, "a3", DispatchFilters::default(), ts(6)).unwrap();
    assert_eq!(fallback.order_id, low.id);
}

/// Verifies FIFO ordering within one priority class.
#[test]
fn dispatch_is_fifo_within_a_priority_class() {
    let engine = engine();
    let older = engine
        .propose(propose_request("echo", json!({ "message": "one" }), Value::Null, 5, None, ts(0)))
        .unwrap();
    let newer = engine
        .propose(propose_request("echo", json!({ "message": "two" }), Value::Null, 5, None, ts(10)))
        .unwrap();

    let first = checkout(&engine, "a1", DispatchFilters::default(), ts(20)).unwrap();
    assert_eq!(first.order_id, older.id);
    let second = checkout(&engine, "a2", DispatchFilters::default(), ts(21)).unwrap();
    assert_eq!(second.order_id, newer.id);
}

/// Verifies the type filter narrows dispatch to one order type.
#[test]
fn dispatch_type_filter() {
    let engine = engine();
    let _echo = engine
        .propose(propose_request("echo", json!({ "message": "hi" }), Value::Null, 10, None, ts(0)))
        .unwrap();
    let profile = engine
        .propose(propose_request("profile", json!({}), Value::Null, 0, None, ts(1)))
        .unwrap();

    let picked = checkout(
        &engine,
        "a1",
        DispatchFilters {
            order_type: Some(OrderTypeName::new("profile")),
            ..DispatchFilters::default()
        },
        ts(2),
    )
    .unwrap();
    assert_eq!(picked.order_id, profile.id);
}

/// Verifies the tenant filter matches the configured payload path.
#[test]
fn dispatch_tenant_filter() {
    let engine = engine();
    let _acme = engine
        .propose(propose_request(
            "profile",
            json!({ "tenant_id": "acme" }),
            Value::Null,
            10,
            None,
            ts(0),
        ))
        .unwrap();
    let globex = engine
        .propose(propose_request(
            "profile",
            json!({ "tenant_id": "globex" }),
            Value::Null,
            0,
            None,
            ts(1),
        ))
        .unwrap();

    let picked = checkout(
        &engine,
        "a1",
        DispatchFilters {
            tenant_id: Some("globex".to_string()),
            ..DispatchFilters::default()
        },
        ts(2),
    )
    .unwrap();
    assert_eq!(picked.order_id, globex.id);

    let none = checkout(
        &engine,
        "a2",
        DispatchFilters {
            tenant_id: Some("initech".to_string()),
            ..DispatchFilters::default()
        },
        ts(3),
    );
    assert!(none.is_none());
}

/// Verifies the per-agent cap returns no items once reached.
#[test]
fn per_agent_cap_blocks_further_checkouts() {
    let mut config = EngineConfig::default();
    config.lease.max_per_agent = Some(1);
    let engine = engine_with_config(config);

    for offset in 0..2 {
        engine
            .propose(propose_request(
                "echo",
                json!({ "message": "hi" }),
                Value::Null,
                0,
                None,
                ts(offset),
            ))
            .unwrap();
    }

    assert!(checkout(&engine, "a1", DispatchFilters::default(), ts(10)).is_some());
    assert!(checkout(&engine, "a1", DispatchFilters::default(), ts(11)).is_none());
    // Another agent is unaffected.
    assert!(checkout(&engine, "a2", DispatchFilters::default(), ts(12)).is_some());
}

/// Verifies the per-type cap counts live leases for the selected type.
#[test]
fn per_type_cap_blocks_further_checkouts() {
    let mut config = EngineConfig::default();
    config.lease.max_per_type = Some(1);
    let engine = engine_with_config(config);

    for offset in 0..2 {
        engine
            .propose(propose_request(
                "echo",
                json!({ "message": "hi" }),
                Value::Null,
                0,
                None,
                ts(offset),
            ))
            .unwrap();
    }

    assert!(checkout(&engine, "a1", DispatchFilters::default(), ts(10)).is_some());
    assert!(checkout(&engine, "a2", DispatchFilters::default(), ts(11)).is_none());
}

/// Verifies checkout on an empty queue reports no items.
#[test]
fn empty_queue_returns_none() {
    let engine = engine();
    assert!(checkout(&engine, "a1", DispatchFilters::default(), ts(0)).is_none());
}
