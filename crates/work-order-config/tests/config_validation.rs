// work-order-config/tests/config_validation.rs
// ============================================================================
// Module: Config Validation Tests
// Description: Defaults, overrides, and fail-closed validation.
// Purpose: Verify the TOML surface resolves to the documented engine
// configuration and rejects inconsistent input.
// Dependencies: work-order-config, work-order-core
// ============================================================================
//! ## Overview
//! Covers the documented defaults, section overrides, unknown-key
//! rejection, and every cross-field rule.

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

use work_order_config::ConfigError;
use work_order_config::LeaseBackendKind;
use work_order_config::WorkOrderConfig;
use work_order_core::ItemState;
use work_order_core::OperationTag;
use work_order_core::OrderState;

/// Verifies an empty file resolves to the documented defaults.
#[test]
fn empty_config_uses_defaults() {
    let config = WorkOrderConfig::from_toml("").unwrap();
    assert_eq!(config.engine.lease.ttl_seconds, 600);
    assert_eq!(config.engine.lease.heartbeat_every_seconds, 120);
    assert_eq!(config.engine.lease.max_per_agent, None);
    assert_eq!(config.engine.default_max_attempts, 3);
    assert_eq!(config.engine.idempotency_header_name, "X-Idempotency-Key");
    assert!(config.engine.partials.enabled);
    assert_eq!(config.engine.partials.max_parts_per_item, 100);
    assert_eq!(config.engine.partials.max_payload_bytes, 1_048_576);
    assert_eq!(config.engine.maintenance.dead_letter_after_hours, 48);
    assert_eq!(config.engine.maintenance.stale_order_threshold_hours, 24);
    assert_eq!(config.engine.meta_path_depth, 5);
    assert_eq!(config.lease_backend, LeaseBackendKind::Database);
    assert!(config.engine.idempotency_enforce_on.contains(&OperationTag::Propose));
    assert!(
        config
            .engine
            .order_transitions
            .allows(OrderState::Queued, OrderState::CheckedOut)
    );
}

/// Verifies explicit sections override the defaults.
#[test]
fn sections_override_defaults() {
    let config = WorkOrderConfig::from_toml(
        r#"
        [lease]
        ttl_seconds = 300
        heartbeat_every_seconds = 60
        backend = "keyvalue"
        max_per_agent = 4
        tenant_payload_path = "customer.id"

        [retry]
        default_max_attempts = 5

        [idempotency]
        header_name = "X-Replay-Key"
        enforce_on = ["propose", "approve"]

        [partials]
        enabled = false
        max_parts_per_item = 10
        max_payload_bytes = 1024

        [maintenance]
        dead_letter_after_hours = 12
        stale_order_threshold_hours = 6

        [store]
        path = "/var/lib/work-order/store.db"
        "#,
    )
    .unwrap();
    assert_eq!(config.engine.lease.ttl_seconds, 300);
    assert_eq!(config.engine.lease.max_per_agent, Some(4));
    assert_eq!(config.engine.lease.tenant_payload_path, "customer.id");
    assert_eq!(config.lease_backend, LeaseBackendKind::Keyvalue);
    assert_eq!(config.engine.default_max_attempts, 5);
    assert_eq!(config.engine.idempotency_header_name, "X-Replay-Key");
    assert_eq!(config.engine.idempotency_enforce_on.len(), 2);
    assert!(!config.engine.idempotency_enforce_on.contains(&OperationTag::Submit));
    assert!(!config.engine.partials.enabled);
    assert_eq!(config.engine.maintenance.dead_letter_after_hours, 12);
    assert_eq!(
        config.store_path,
        std::path::PathBuf::from("/var/lib/work-order/store.db")
    );
}

/// Verifies a transition override narrows the adjacency.
#[test]
fn transition_overrides_replace_the_tables() {
    let config = WorkOrderConfig::from_toml(
        r#"
        [state_machine.item_transitions]
        queued = ["leased"]
        leased = ["submitted"]
        "#,
    )
    .unwrap();
    assert!(config.engine.item_transitions.allows(ItemState::Queued, ItemState::Leased));
    assert!(!config.engine.item_transitions.allows(ItemState::Leased, ItemState::Queued));
}

/// Verifies unknown keys are rejected.
#[test]
fn unknown_keys_fail_closed() {
    let err = WorkOrderConfig::from_toml("[lease]\nttl = 600\n").unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)));

    let err = WorkOrderConfig::from_toml("[surprise]\nx = 1\n").unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)));
}

/// Verifies the heartbeat-below-TTL rule.
#[test]
fn heartbeat_must_stay_below_ttl() {
    let err = WorkOrderConfig::from_toml(
        "[lease]\nttl_seconds = 100\nheartbeat_every_seconds = 100\n",
    )
    .unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)));
}

/// Verifies zero-valued limits are rejected.
#[test]
fn zero_limits_fail_closed() {
    for text in [
        "[lease]\nttl_seconds = 0\n",
        "[lease]\nmax_per_agent = 0\n",
        "[retry]\ndefault_max_attempts = 0\n",
        "[partials]\nmax_parts_per_item = 0\n",
        "[maintenance]\ndead_letter_after_hours = 0\n",
        "[filters]\nmeta_path_depth = 0\n",
    ] {
        let err = WorkOrderConfig::from_toml(text).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)), "expected invalid for {text}");
    }
}

/// Verifies malformed enum values are parse errors.
#[test]
fn malformed_backend_is_rejected() {
    let err = WorkOrderConfig::from_toml("[lease]\nbackend = \"redis\"\n").unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)));
}

/// Verifies loading from a file and surfacing missing files as io errors.
#[test]
fn load_reads_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("work-order.toml");
    std::fs::write(&path, "[lease]\nttl_seconds = 240\nheartbeat_every_seconds = 30\n").unwrap();
    let config = WorkOrderConfig::load(&path).unwrap();
    assert_eq!(config.engine.lease.ttl_seconds, 240);

    let missing = WorkOrderConfig::load(&dir.path().join("nope.toml")).unwrap_err();
    assert!(matches!(missing, ConfigError::Io(_)));
}
