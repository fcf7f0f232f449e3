// work-order-core/tests/scenarios.rs
// ============================================================================
// Module: End-to-End Scenarios
// Description: Full pipeline flows over the public engine surface.
// Purpose: Pin the happy path and the audit trail it leaves behind.
// Dependencies: work-order-core
// ============================================================================
//! ## Overview
//! Walks the complete lifecycle: propose, checkout, submit, approve, and
//! the resulting audit events, with the idempotent replay at the end.

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
use serde_json::json;
use work_order_core::ApproveRequest;
use work_order_core::CheckoutRequest;
use work_order_core::DispatchFilters;
use work_order_core::EventKind;
use work_order_core::ItemState;
use work_order_core::OrderState;
use work_order_core::SubmitRequest;

/// Walks the full happy path and checks every intermediate observation.
#[test]
fn happy_path_from_proposal_to_completion() {
    let engine = engine();

    // Propose: order and one item in queued, events [proposed, planned].
    let order = engine
        .propose(propose_request(
            "echo",
            json!({ "message": "hi" }),
            serde_json::Value::Null,
            0,
            Some("p1"),
            ts(0),
        ))
        .unwrap();
    assert_eq!(order.state, OrderState::Queued);
    let events = engine.events_for_order(&order.id).unwrap();
    assert_eq!(
        events.iter().map(|event| event.kind).collect::<Vec<_>>(),
        vec![EventKind::Proposed, EventKind::Planned]
    );

    // Checkout: item leased with the default TTL.
    let item = engine
        .checkout(CheckoutRequest {
            order_id: None,
            filters: DispatchFilters::default(),
            agent_id: "a1".into(),
            idempotency_key: None,
            context: None,
            requested_at: ts(1),
        })
        .unwrap()
        .unwrap();
    assert_eq!(item.order_id, order.id);
    assert_eq!(item.state, ItemState::Leased);
    assert_eq!(item.leased_by.as_ref().map(work_order_core::AgentId::as_str), Some("a1"));
    assert_eq!(item.lease_expires_at, Some(ts(601)));

    // Submit: item and order reach submitted.
    let submit = SubmitRequest {
        item_id: item.id.clone(),
        result: json!({ "ok": true, "verified": true, "echoed_message": "hi" }),
        agent_id: "a1".into(),
        evidence: None,
        notes: None,
        idempotency_key: Some("s1".to_string()),
        context: None,
        requested_at: ts(2),
    };
    let submitted = engine.submit(submit.clone()).unwrap();
    assert_eq!(submitted.state, ItemState::Submitted);
    assert_eq!(engine.get_order(&order.id).unwrap().state, OrderState::Submitted);

    // Approve: apply runs inline and the cascade completes the order.
    let response = engine
        .approve(ApproveRequest {
            order_id: order.id.clone(),
            actor: None,
            idempotency_key: Some("ap1".to_string()),
            context: None,
            requested_at: ts(3),
        })
        .unwrap();
    assert_eq!(response.order.state, OrderState::Completed);
    assert_eq!(response.diff.after, json!({ "message": "hi" }));
    assert!(!response.diff.summary.is_empty());

    // The audit trail covers the whole lifecycle in order.
    let kinds: Vec<EventKind> = engine
        .events_for_order(&order.id)
        .unwrap()
        .into_iter()
        .map(|event| event.kind)
        .collect();
    for expected in [
        EventKind::Proposed,
        EventKind::Planned,
        EventKind::CheckedOut,
        EventKind::Leased,
        EventKind::Submitted,
        EventKind::Approved,
        EventKind::Applied,
        EventKind::Accepted,
        EventKind::Completed,
    ] {
        assert!(kinds.contains(&expected), "missing event kind {expected:?}");
    }

    // Replaying the submit returns the cached response byte-for-byte.
    let replay = engine.submit(submit).unwrap();
    assert_eq!(
        serde_json::to_string(&submitted).unwrap(),
        serde_json::to_string(&replay).unwrap()
    );
}

/// Verifies the order timestamps advance through the lifecycle.
#[test]
fn lifecycle_timestamps_are_stamped() {
    let engine = engine();
    let order = engine
        .propose(propose_request(
            "echo",
            json!({ "message": "hi" }),
            serde_json::Value::Null,
            0,
            None,
            ts(0),
        ))
        .unwrap();
    assert_eq!(order.created_at, ts(0));
    assert_eq!(order.last_transitioned_at, ts(0));

    let item = engine
        .checkout(CheckoutRequest {
            order_id: Some(order.id.clone()),
            filters: DispatchFilters::default(),
            agent_id: "a1".into(),
            idempotency_key: None,
            context: None,
            requested_at: ts(10),
        })
        .unwrap()
        .unwrap();
    engine
        .submit(SubmitRequest {
            item_id: item.id.clone(),
            result: json!({ "ok": true }),
            agent_id: "a1".into(),
            evidence: None,
            notes: None,
            idempotency_key: None,
            context: None,
            requested_at: ts(20),
        })
        .unwrap();
    engine
        .approve(ApproveRequest {
            order_id: order.id.clone(),
            actor: None,
            idempotency_key: None,
            context: None,
            requested_at: ts(30),
        })
        .unwrap();

    let done = engine.get_order(&order.id).unwrap();
    assert_eq!(done.applied_at, Some(ts(30)));
    assert_eq!(done.completed_at, Some(ts(30)));
    let done_item = engine.get_item(&item.id).unwrap();
    assert_eq!(done_item.accepted_at, Some(ts(30)));
}
