// work-order-core/src/runtime/maintenance.rs
// ============================================================================
// Module: Maintenance Loop
// Description: Reclaim, dead-letter, and staleness passes driven by a tick.
// Purpose: Keep the queue healthy without a daemon inside the engine.
// Dependencies: crate::{core, interfaces, runtime::{lease, machine}}
// ============================================================================

//! ## Overview
//! The maintenance loop is caller-driven: a host invokes `run` on a tick.
//! Three passes execute independently and idempotently; a failure in one is
//! collected into the report and never prevents the others from running.
//! Stale orders are surfaced as log-class diagnostics, not state changes.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::actor::Actor;
use crate::core::identifiers::OrderId;
use crate::core::state::ItemState;
use crate::core::state::OrderState;
use crate::core::time::Timestamp;
use crate::interfaces::WorkOrderStore;
use crate::runtime::lease::LeaseBackend;
use crate::runtime::lease::LeaseService;
use crate::runtime::machine::StateMachine;
use crate::runtime::machine::TransitionContext;

// ============================================================================
// SECTION: Settings
// ============================================================================

/// Maintenance tunables injected at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceSettings {
    /// Hours a `failed` order or item may idle before dead-lettering.
    pub dead_letter_after_hours: u64,
    /// Hours an unfinished order may idle before being surfaced as stale.
    pub stale_order_threshold_hours: u64,
}

impl Default for MaintenanceSettings {
    fn default() -> Self {
        Self {
            dead_letter_after_hours: 48,
            stale_order_threshold_hours: 24,
        }
    }
}

/// Selectable maintenance passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaintenancePhase {
    /// Reclaim expired leases.
    ReclaimLeases,
    /// Dead-letter stuck failed work.
    DeadLetter,
    /// Surface stale orders.
    StaleOrders,
}

/// Every pass, in canonical order.
pub const ALL_PHASES: &[MaintenancePhase] = &[
    MaintenancePhase::ReclaimLeases,
    MaintenancePhase::DeadLetter,
    MaintenancePhase::StaleOrders,
];

// ============================================================================
// SECTION: Report
// ============================================================================

/// Structured outcome of one maintenance tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceReport {
    /// Items returned to the queue by reclaim.
    pub reclaimed_requeued: usize,
    /// Items failed by reclaim after exhausting their budget.
    pub reclaimed_failed: usize,
    /// Orders dead-lettered.
    pub dead_lettered_orders: usize,
    /// Items dead-lettered.
    pub dead_lettered_items: usize,
    /// Orders surfaced as stale.
    pub stale_orders: Vec<OrderId>,
    /// Collected pass errors; none aborted the tick.
    pub errors: Vec<String>,
}

impl MaintenanceReport {
    /// Returns true when no pass recorded an error.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

// ============================================================================
// SECTION: Maintenance Loop
// ============================================================================

/// Order states excluded from staleness alerting.
const STALE_EXEMPT: &[OrderState] = &[OrderState::Completed, OrderState::DeadLettered];

/// Caller-driven maintenance over a store and lease service.
#[derive(Debug, Clone)]
pub struct MaintenanceLoop<S, B> {
    /// Backing store.
    store: S,
    /// Lease service for the reclaim pass.
    lease: LeaseService<S, B>,
    /// Transition gate.
    machine: StateMachine,
    /// Tunables.
    settings: MaintenanceSettings,
}

impl<S, B> MaintenanceLoop<S, B>
where
    S: WorkOrderStore,
    B: LeaseBackend,
{
    /// Creates a maintenance loop.
    pub const fn new(
        store: S,
        lease: LeaseService<S, B>,
        machine: StateMachine,
        settings: MaintenanceSettings,
    ) -> Self {
        Self {
            store,
            lease,
            machine,
            settings,
        }
    }

    /// Runs the selected passes, collecting failures into the report.
    pub fn run(&self, phases: &[MaintenancePhase], now: Timestamp) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();
        for phase in phases {
            match phase {
                MaintenancePhase::ReclaimLeases => self.reclaim_expired_leases(now, &mut report),
                MaintenancePhase::DeadLetter => self.dead_letter_stuck_work(now, &mut report),
                MaintenancePhase::StaleOrders => self.check_stale_orders(now, &mut report),
            }
        }
        report
    }

    /// Delegates expired-lease reclaim to the lease engine.
    fn reclaim_expired_leases(&self, now: Timestamp, report: &mut MaintenanceReport) {
        match self.lease.reclaim_expired(now) {
            Ok(outcome) => {
                report.reclaimed_requeued += outcome.requeued;
                report.reclaimed_failed += outcome.failed;
                report.errors.extend(outcome.errors);
            }
            Err(err) => {
                tracing::warn!(error = %err, "reclaim pass failed");
                report.errors.push(format!("reclaim: {err}"));
            }
        }
    }

    /// Dead-letters failed orders and items idle past the threshold.
    fn dead_letter_stuck_work(&self, now: Timestamp, report: &mut MaintenanceReport) {
        let cutoff = now.minus_hours(self.settings.dead_letter_after_hours);

        match self.store.orders_in_state_updated_before(OrderState::Failed, cutoff) {
            Ok(orders) => {
                for order in orders {
                    match self.machine.transition_order(
                        &self.store,
                        &order,
                        OrderState::DeadLettered,
                        &Actor::system(),
                        now,
                        TransitionContext::default(),
                    ) {
                        Ok(_) => report.dead_lettered_orders += 1,
                        Err(err) => report.errors.push(format!("dead-letter order {}: {err}", order.id)),
                    }
                }
            }
            Err(err) => report.errors.push(format!("dead-letter order scan: {err}")),
        }

        match self.store.items_in_state_updated_before(ItemState::Failed, cutoff) {
            Ok(items) => {
                for item in items {
                    match self.machine.transition_item(
                        &self.store,
                        &item,
                        ItemState::DeadLettered,
                        &Actor::system(),
                        now,
                        TransitionContext::default(),
                    ) {
                        Ok(_) => report.dead_lettered_items += 1,
                        Err(err) => report.errors.push(format!("dead-letter item {}: {err}", item.id)),
                    }
                }
            }
            Err(err) => report.errors.push(format!("dead-letter item scan: {err}")),
        }
    }

    /// Surfaces unfinished orders idle past the staleness threshold.
    fn check_stale_orders(&self, now: Timestamp, report: &mut MaintenanceReport) {
        let cutoff = now.minus_hours(self.settings.stale_order_threshold_hours);
        match self.store.list_orders() {
            Ok(orders) => {
                for order in orders {
                    if STALE_EXEMPT.contains(&order.state)
                        || order.last_transitioned_at >= cutoff
                    {
                        continue;
                    }
                    tracing::warn!(
                        order_id = %order.id,
                        state = %order.state,
                        last_transitioned_at = %order.last_transitioned_at,
                        "stale order"
                    );
                    report.stale_orders.push(order.id);
                }
            }
            Err(err) => report.errors.push(format!("stale order scan: {err}")),
        }
    }
}
