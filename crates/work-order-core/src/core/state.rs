// work-order-core/src/core/state.rs
// ============================================================================
// Module: Work Order State Spaces
// Description: Order and item state sets with configurable transition tables.
// Purpose: Make every legal transition a data question, not a code question.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Order and item lifecycles are closed tagged sets. The legal transition
//! relation is data: a configured adjacency table checked on every write.
//! Adding a state means extending the table, not the transition engine.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Order States
// ============================================================================

/// Order lifecycle states.
///
/// # Invariants
/// - Variants are stable for serialization and contract matching.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum OrderState {
    /// Order accepted and planned; items may be outstanding.
    Queued,
    /// At least one item has been checked out.
    CheckedOut,
    /// Work is underway on at least one item.
    InProgress,
    /// Every item has reached a terminal-pre-apply state.
    Submitted,
    /// Order approved; apply is imminent or running.
    Approved,
    /// Type handler applied the order's domain mutation.
    Applied,
    /// All items completed. Terminal.
    Completed,
    /// Order rejected without rework. Terminal.
    Rejected,
    /// Apply or validation failed irrecoverably.
    Failed,
    /// Aged out of recoverability. Terminal.
    DeadLettered,
}

impl OrderState {
    /// Stable snake_case label for logs and store rows.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::CheckedOut => "checked_out",
            Self::InProgress => "in_progress",
            Self::Submitted => "submitted",
            Self::Approved => "approved",
            Self::Applied => "applied",
            Self::Completed => "completed",
            Self::Rejected => "rejected",
            Self::Failed => "failed",
            Self::DeadLettered => "dead_lettered",
        }
    }
}

impl fmt::Display for OrderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Item States
// ============================================================================

/// Item lifecycle states.
///
/// # Invariants
/// - Variants are stable for serialization and contract matching.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    /// Available for leasing.
    Queued,
    /// Exclusively leased by one agent.
    Leased,
    /// Agent signalled active work under a live lease.
    InProgress,
    /// Result submitted and validated.
    Submitted,
    /// Accepted during apply.
    Accepted,
    /// Work fully complete. Terminal.
    Completed,
    /// Failed validation or exhausted retries.
    Failed,
    /// Aged out of recoverability. Terminal.
    DeadLettered,
}

impl ItemState {
    /// Stable snake_case label for logs and store rows.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Leased => "leased",
            Self::InProgress => "in_progress",
            Self::Submitted => "submitted",
            Self::Accepted => "accepted",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::DeadLettered => "dead_lettered",
        }
    }

    /// Returns true when the state counts toward order submission readiness.
    #[must_use]
    pub const fn is_pre_apply_terminal(self) -> bool {
        matches!(self, Self::Submitted | Self::Accepted | Self::Completed)
    }
}

impl fmt::Display for ItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Transition Tables
// ============================================================================

/// Data-driven adjacency relation over a state set.
///
/// # Invariants
/// - A transition is legal iff `(from, to)` is present in the table.
/// - Terminal states have no outgoing edges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransitionTable<S: Ord> {
    /// Allowed destination states per source state.
    allowed: BTreeMap<S, BTreeSet<S>>,
}

impl<S: Ord + Copy> TransitionTable<S> {
    /// Builds a table from `(from, to)` edge pairs.
    #[must_use]
    pub fn from_edges(edges: &[(S, S)]) -> Self {
        let mut allowed: BTreeMap<S, BTreeSet<S>> = BTreeMap::new();
        for (from, to) in edges {
            allowed.entry(*from).or_default().insert(*to);
        }
        Self { allowed }
    }

    /// Returns true when the edge `(from, to)` is present.
    #[must_use]
    pub fn allows(&self, from: S, to: S) -> bool {
        self.allowed.get(&from).is_some_and(|set| set.contains(&to))
    }

    /// Returns true when the state has no outgoing edges.
    #[must_use]
    pub fn is_terminal(&self, state: S) -> bool {
        self.allowed.get(&state).is_none_or(BTreeSet::is_empty)
    }
}

/// Default order transition table per the lifecycle contract.
#[must_use]
pub fn default_order_transitions() -> TransitionTable<OrderState> {
    use OrderState as S;
    TransitionTable::from_edges(&[
        (S::Queued, S::CheckedOut),
        (S::Queued, S::InProgress),
        (S::Queued, S::Submitted),
        (S::Queued, S::Failed),
        (S::CheckedOut, S::InProgress),
        (S::CheckedOut, S::Submitted),
        (S::CheckedOut, S::Failed),
        (S::InProgress, S::Submitted),
        (S::InProgress, S::Failed),
        (S::Submitted, S::Approved),
        (S::Submitted, S::Queued),
        (S::Submitted, S::Rejected),
        (S::Submitted, S::Failed),
        (S::Approved, S::Applied),
        (S::Approved, S::Failed),
        (S::Applied, S::Completed),
        (S::Applied, S::Failed),
        (S::Failed, S::DeadLettered),
    ])
}

/// Default item transition table per the lifecycle contract.
#[must_use]
pub fn default_item_transitions() -> TransitionTable<ItemState> {
    use ItemState as S;
    TransitionTable::from_edges(&[
        (S::Queued, S::Leased),
        (S::Queued, S::Submitted),
        (S::Queued, S::Failed),
        (S::Leased, S::InProgress),
        (S::Leased, S::Submitted),
        (S::Leased, S::Queued),
        (S::Leased, S::Failed),
        (S::InProgress, S::Submitted),
        (S::InProgress, S::Queued),
        (S::InProgress, S::Failed),
        (S::Submitted, S::Accepted),
        (S::Submitted, S::Failed),
        (S::Accepted, S::Completed),
        (S::Failed, S::DeadLettered),
    ])
}
