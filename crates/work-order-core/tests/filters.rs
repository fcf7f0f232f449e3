// work-order-core/tests/filters.rs
// ============================================================================
// Module: List Filter Tests
// Description: Filter validation, evaluation, sorting, and pagination.
// Purpose: Verify the query language fails fast and evaluates
// deterministically.
// Dependencies: work-order-core, proptest
// ============================================================================
//! ## Overview
//! Covers the operator set over top-level fields and dotted meta paths,
//! fail-fast validation with a path to the offending node, sort direction,
//! pagination windows, and ordering consistency of the numeric comparator.

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
use proptest::prelude::proptest;
use serde_json::Value;
use serde_json::json;
use work_order_core::EngineError;
use work_order_core::FilterClause;
use work_order_core::FilterNode;
use work_order_core::FilterOp;
use work_order_core::ListQuery;
use work_order_core::Order;
use work_order_core::Pagination;
use work_order_core::SortDirection;
use work_order_core::SortSpec;

/// Seeds three orders with distinct priorities and meta.
fn seeded(engine: &DbEngine) -> Vec<Order> {
    let specs = [
        (10, json!({ "region": "eu", "labels": ["alpha", "beta"] })),
        (50, json!({ "region": "us", "labels": ["alpha"] })),
        (100, json!({ "region": "eu", "owner": { "team": "core" } })),
    ];
    specs
        .iter()
        .enumerate()
        .map(|(index, (priority, meta))| {
            engine
                .propose(propose_request(
                    "echo",
                    json!({ "message": format!("m{index}") }),
                    meta.clone(),
                    *priority,
                    None,
                    ts(i64::try_from(index).unwrap()),
                ))
                .unwrap()
        })
        .collect()
}

/// Clause shorthand.
fn clause(field: &str, op: FilterOp, value: Option<Value>) -> FilterNode {
    FilterNode::Clause(FilterClause {
        field: field.to_string(),
        op,
        value,
    })
}

/// Verifies eq over a top-level field and gt over priority.
#[test]
fn top_level_eq_and_ordering() {
    let engine = engine();
    seeded(&engine);

    let eq = engine
        .list_orders(&ListQuery {
            filter: Some(clause("state", FilterOp::Eq, Some(json!("queued")))),
            sort: None,
            page: Pagination::default(),
        })
        .unwrap();
    assert_eq!(eq.len(), 3);

    let gt = engine
        .list_orders(&ListQuery {
            filter: Some(clause("priority", FilterOp::Gt, Some(json!(40)))),
            sort: None,
            page: Pagination::default(),
        })
        .unwrap();
    assert_eq!(gt.len(), 2);
    assert!(gt.iter().all(|order| order.priority > 40));
}

/// Verifies dotted meta paths and `in` membership grouped with `and`.
#[test]
fn meta_paths_and_groups() {
    let engine = engine();
    let orders = seeded(&engine);

    let selected = engine
        .list_orders(&ListQuery {
            filter: Some(FilterNode::And {
                and: vec![
                    clause("meta.region", FilterOp::Eq, Some(json!("eu"))),
                    clause("priority", FilterOp::In, Some(json!([10, 100]))),
                ],
            }),
            sort: Some(SortSpec {
                field: "priority".to_string(),
                direction: SortDirection::Desc,
            }),
            page: Pagination::default(),
        })
        .unwrap();
    assert_eq!(selected.len(), 2);
    assert_eq!(selected[0].id, orders[2].id);
    assert_eq!(selected[1].id, orders[0].id);

    let nested = engine
        .list_orders(&ListQuery {
            filter: Some(clause("meta.owner.team", FilterOp::Eq, Some(json!("core")))),
            sort: None,
            page: Pagination::default(),
        })
        .unwrap();
    assert_eq!(nested.len(), 1);
}

/// Verifies contains, contains_all, length_eq, and null checks.
#[test]
fn collection_operators() {
    let engine = engine();
    seeded(&engine);

    let contains = engine
        .list_orders(&ListQuery {
            filter: Some(clause("meta.labels", FilterOp::Contains, Some(json!("beta")))),
            sort: None,
            page: Pagination::default(),
        })
        .unwrap();
    assert_eq!(contains.len(), 1);

    let contains_all = engine
        .list_orders(&ListQuery {
            filter: Some(clause(
                "meta.labels",
                FilterOp::ContainsAll,
                Some(json!(["alpha", "beta"])),
            )),
            sort: None,
            page: Pagination::default(),
        })
        .unwrap();
    assert_eq!(contains_all.len(), 1);

    let length = engine
        .list_orders(&ListQuery {
            filter: Some(clause("meta.labels", FilterOp::LengthEq, Some(json!(1)))),
            sort: None,
            page: Pagination::default(),
        })
        .unwrap();
    assert_eq!(length.len(), 1);

    let absent = engine
        .list_orders(&ListQuery {
            filter: Some(clause("meta.owner", FilterOp::IsNull, None)),
            sort: None,
            page: Pagination::default(),
        })
        .unwrap();
    assert_eq!(absent.len(), 2);

    let present = engine
        .list_orders(&ListQuery {
            filter: Some(clause("completed_at", FilterOp::NotNull, None)),
            sort: None,
            page: Pagination::default(),
        })
        .unwrap();
    assert!(present.is_empty());
}

/// Verifies invalid queries fail fast with a path to the offending node.
#[test]
fn invalid_filters_fail_fast_with_paths() {
    let engine = engine();
    seeded(&engine);

    let unknown = engine
        .list_orders(&ListQuery {
            filter: Some(clause("nope", FilterOp::Eq, Some(json!(1)))),
            sort: None,
            page: Pagination::default(),
        })
        .unwrap_err();
    let EngineError::FilterInvalid { path, code } = unknown else {
        panic!("expected FilterInvalid, got {unknown}");
    };
    assert_eq!(path, "filter");
    assert_eq!(code, "unknown_field");

    let nested = engine
        .list_orders(&ListQuery {
            filter: Some(FilterNode::And {
                and: vec![
                    clause("state", FilterOp::Eq, Some(json!("queued"))),
                    clause("priority", FilterOp::In, Some(json!(7))),
                ],
            }),
            sort: None,
            page: Pagination::default(),
        })
        .unwrap_err();
    let EngineError::FilterInvalid { path, code } = nested else {
        panic!("expected FilterInvalid, got {nested}");
    };
    assert_eq!(path, "filter.1");
    assert_eq!(code, "expected_array_value");

    let deep = engine
        .list_orders(&ListQuery {
            filter: Some(clause("meta.a.b.c.d.e.f", FilterOp::Eq, Some(json!(1)))),
            sort: None,
            page: Pagination::default(),
        })
        .unwrap_err();
    let EngineError::FilterInvalid { code, .. } = deep else {
        panic!("expected FilterInvalid, got {deep}");
    };
    assert_eq!(code, "meta_path_too_deep");

    let missing = engine
        .list_orders(&ListQuery {
            filter: Some(clause("priority", FilterOp::Gt, None)),
            sort: None,
            page: Pagination::default(),
        })
        .unwrap_err();
    assert!(matches!(missing, EngineError::FilterInvalid { .. }));
}

/// Verifies pagination windows after sorting.
#[test]
fn pagination_windows() {
    let engine = engine();
    seeded(&engine);

    let page = engine
        .list_orders(&ListQuery {
            filter: None,
            sort: Some(SortSpec {
                field: "priority".to_string(),
                direction: SortDirection::Desc,
            }),
            page: Pagination {
                offset: 1,
                limit: Some(1),
            },
        })
        .unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].priority, 50);

    let beyond = engine
        .list_orders(&ListQuery {
            filter: None,
            sort: None,
            page: Pagination {
                offset: 10,
                limit: Some(5),
            },
        })
        .unwrap();
    assert!(beyond.is_empty());
}

proptest! {
    /// Verifies gt and lte over integer priorities partition the order set.
    #[test]
    fn priority_comparisons_partition(threshold in -1000i64..1000) {
        let engine = engine();
        seeded(&engine);
        let gt = engine
            .list_orders(&ListQuery {
                filter: Some(clause("priority", FilterOp::Gt, Some(json!(threshold)))),
                sort: None,
                page: Pagination::default(),
            })
            .unwrap();
        let lte = engine
            .list_orders(&ListQuery {
                filter: Some(clause("priority", FilterOp::Lte, Some(json!(threshold)))),
                sort: None,
                page: Pagination::default(),
            })
            .unwrap();
        assert_eq!(gt.len() + lte.len(), 3);
    }
}
