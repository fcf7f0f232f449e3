// work-order-core/src/core/actor.rs
// ============================================================================
// Module: Work Order Actors
// Description: Actor attribution for mutating operations and audit events.
// Purpose: Identify who performed each action without authenticating anyone.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! The engine does not authenticate callers; the caller's identity is an
//! input. Every mutating operation and every audit event carries an actor
//! record naming the kind of principal and its identifier.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::AgentId;

// ============================================================================
// SECTION: Actor Kinds
// ============================================================================

/// Kind of principal performing an action.
///
/// # Invariants
/// - Variants are stable for serialization and contract matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorKind {
    /// Autonomous agent acting through the lease pipeline.
    Agent,
    /// Human user acting through an administrative surface.
    User,
    /// The engine itself (cascades, reclaim, maintenance).
    System,
}

// ============================================================================
// SECTION: Actor Record
// ============================================================================

/// Actor attribution attached to mutating operations and events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// Kind of principal.
    pub kind: ActorKind,
    /// Principal identifier; opaque to the engine.
    pub id: String,
}

impl Actor {
    /// Builds an agent actor from an agent identifier.
    #[must_use]
    pub fn agent(agent_id: &AgentId) -> Self {
        Self {
            kind: ActorKind::Agent,
            id: agent_id.as_str().to_string(),
        }
    }

    /// Builds a user actor.
    #[must_use]
    pub fn user(id: impl Into<String>) -> Self {
        Self {
            kind: ActorKind::User,
            id: id.into(),
        }
    }

    /// Builds the machine actor used for engine-authored transitions.
    #[must_use]
    pub fn system() -> Self {
        Self {
            kind: ActorKind::System,
            id: "engine".to_string(),
        }
    }
}
