// work-order-core/tests/maintenance.rs
// ============================================================================
// Module: Maintenance Loop Tests
// Description: Reclaim, dead-letter, and staleness passes.
// Purpose: Verify tick-driven recovery flows and pass independence.
// Dependencies: work-order-core
// ============================================================================
//! ## Overview
//! Covers the expiry-and-retry flow, the exhausted-retries flow,
//! dead-lettering of stuck failed work, staleness surfacing, and selective
//! phase execution.

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
use common::propose_request;
use common::ts;
use serde_json::Value;
use serde_json::json;
use work_order_core::ApproveRequest;
use work_order_core::CheckoutRequest;
use work_order_core::DispatchFilters;
use work_order_core::EventKind;
use work_order_core::Item;
use work_order_core::ItemState;
use work_order_core::MaintenancePhase;
use work_order_core::OrderState;
use work_order_core::SubmitRequest;
use work_order_core::Timestamp;

/// Proposes an echo order with a retry budget and checks out its item.
fn leased_with_budget(
    engine: &DbEngine,
    max_attempts: u32,
    agent: &str,
    at: Timestamp,
) -> (work_order_core::Order, Item) {
    let order = engine
        .propose(propose_request(
            "echo",
            json!({ "message": "hi" }),
            json!({ "max_attempts": max_attempts }),
            0,
            None,
            at,
        ))
        .unwrap();
    let item = engine
        .checkout(CheckoutRequest {
            order_id: Some(order.id.clone()),
            filters: DispatchFilters::default(),
            agent_id: agent.into(),
            idempotency_key: None,
            context: None,
            requested_at: at,
        })
        .unwrap()
        .unwrap();
    (order, item)
}

/// Verifies lease expiry, reclaim, and a second agent
/// finishing the work.
#[test]
fn expired_lease_is_retried_by_another_agent() {
    let engine = engine();
    let (order, item) = leased_with_budget(&engine, 2, "a1", ts(0));

    // a1 never heartbeats; after the TTL the tick reclaims the item.
    let report = engine.tick(None, ts(601));
    assert_eq!(report.reclaimed_requeued, 1);
    assert!(report.is_clean());

    let events = engine.events_for_item(&item.id).unwrap();
    let expired = events
        .iter()
        .find(|event| event.kind == EventKind::LeaseExpired)
        .unwrap();
    assert_eq!(expired.payload.as_ref().unwrap().get("attempts"), Some(&json!(1)));

    let requeued = engine.get_item(&item.id).unwrap();
    assert_eq!(requeued.state, ItemState::Queued);

    // a2 takes over and carries the order to completion.
    let retaken = engine
        .checkout(CheckoutRequest {
            order_id: Some(order.id.clone()),
            filters: DispatchFilters::default(),
            agent_id: "a2".into(),
            idempotency_key: None,
            context: None,
            requested_at: ts(700),
        })
        .unwrap()
        .unwrap();
    engine
        .submit(SubmitRequest {
            item_id: retaken.id,
            result: json!({ "ok": true }),
            agent_id: "a2".into(),
            evidence: None,
            notes: None,
            idempotency_key: None,
            context: None,
            requested_at: ts(710),
        })
        .unwrap();
    engine
        .approve(ApproveRequest {
            order_id: order.id.clone(),
            actor: None,
            idempotency_key: None,
            context: None,
            requested_at: ts(720),
        })
        .unwrap();
    assert_eq!(engine.get_order(&order.id).unwrap().state, OrderState::Completed);
}

/// Verifies one allowed attempt, then failure, and the order
/// never completes.
#[test]
fn exhausted_retries_dead_end_the_item() {
    let engine = engine();
    let (order, item) = leased_with_budget(&engine, 1, "a1", ts(0));

    let report = engine.tick(None, ts(601));
    assert_eq!(report.reclaimed_failed, 1);

    let failed = engine.get_item(&item.id).unwrap();
    assert_eq!(failed.state, ItemState::Failed);
    assert_eq!(
        failed.error.as_ref().map(|error| error.code.as_str()),
        Some("max_attempts_exceeded")
    );
    assert_ne!(engine.get_order(&order.id).unwrap().state, OrderState::Completed);
}

/// Verifies failed work past the threshold is dead-lettered.
#[test]
fn stuck_failed_work_is_dead_lettered() {
    let engine = engine();
    let (_, item) = leased_with_budget(&engine, 1, "a1", ts(0));
    engine.tick(None, ts(601));
    assert_eq!(engine.get_item(&item.id).unwrap().state, ItemState::Failed);

    // An order failed by its handler's apply feeds the order sweep.
    let failed_order = engine
        .propose(propose_request(
            "failing_apply",
            json!({ "message": "hi" }),
            Value::Null,
            0,
            None,
            ts(0),
        ))
        .unwrap();
    let failing_item = engine
        .checkout(CheckoutRequest {
            order_id: Some(failed_order.id.clone()),
            filters: DispatchFilters::default(),
            agent_id: "a2".into(),
            idempotency_key: None,
            context: None,
            requested_at: ts(10),
        })
        .unwrap()
        .unwrap();
    engine
        .submit(SubmitRequest {
            item_id: failing_item.id,
            result: json!({ "ok": true }),
            agent_id: "a2".into(),
            evidence: None,
            notes: None,
            idempotency_key: None,
            context: None,
            requested_at: ts(20),
        })
        .unwrap();
    assert!(
        engine
            .approve(ApproveRequest {
                order_id: failed_order.id.clone(),
                actor: None,
                idempotency_key: None,
                context: None,
                requested_at: ts(30),
            })
            .is_err()
    );
    assert_eq!(engine.get_order(&failed_order.id).unwrap().state, OrderState::Failed);

    // Within the threshold nothing moves.
    let early = engine.tick(Some(&[MaintenancePhase::DeadLetter]), ts(3600));
    assert_eq!(early.dead_lettered_items, 0);
    assert_eq!(early.dead_lettered_orders, 0);

    // Past 48 hours the failed work ages out.
    let late = engine.tick(Some(&[MaintenancePhase::DeadLetter]), ts(601 + 49 * 3600));
    assert_eq!(late.dead_lettered_items, 1);
    assert_eq!(late.dead_lettered_orders, 1);
    assert_eq!(engine.get_item(&item.id).unwrap().state, ItemState::DeadLettered);
    assert_eq!(
        engine.get_order(&failed_order.id).unwrap().state,
        OrderState::DeadLettered
    );
}

/// Verifies stale unfinished orders are surfaced without state changes.
#[test]
fn stale_orders_are_surfaced() {
    let engine = engine();
    let order = engine
        .propose(propose_request("echo", json!({ "message": "hi" }), Value::Null, 0, None, ts(0)))
        .unwrap();

    let fresh = engine.tick(Some(&[MaintenancePhase::StaleOrders]), ts(3600));
    assert!(fresh.stale_orders.is_empty());

    let stale = engine.tick(Some(&[MaintenancePhase::StaleOrders]), ts(25 * 3600));
    assert_eq!(stale.stale_orders, vec![order.id.clone()]);
    assert_eq!(engine.get_order(&order.id).unwrap().state, OrderState::Queued);
}

/// Verifies selective phases leave the other passes untouched.
#[test]
fn phases_run_independently() {
    let engine = engine();
    let (_, item) = leased_with_budget(&engine, 2, "a1", ts(0));

    let report = engine.tick(Some(&[MaintenancePhase::StaleOrders]), ts(700));
    assert_eq!(report.reclaimed_requeued, 0);
    // The expired lease is untouched because reclaim did not run.
    assert_eq!(engine.get_item(&item.id).unwrap().state, ItemState::Leased);
}
