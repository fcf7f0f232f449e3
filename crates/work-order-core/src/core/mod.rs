// work-order-core/src/core/mod.rs
// ============================================================================
// Module: Work Order Core Types
// Description: Canonical row types, state spaces, filters, and hashing.
// Purpose: Provide stable, serializable types shared by every backend and
// API surface.
// Dependencies: serde, serde_json, sha2, time, uuid
// ============================================================================

//! ## Overview
//! Core types define the persisted data model for orders, items, parts,
//! events, provenance, and idempotency keys, together with the state spaces,
//! the list-filter language, and the hashing helpers. These types are the
//! canonical source of truth for any derived API surface.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod actor;
pub mod filter;
pub mod hashing;
pub mod identifiers;
pub mod model;
pub mod state;
pub mod time;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use actor::Actor;
pub use actor::ActorKind;
pub use filter::FilterClause;
pub use filter::FilterError;
pub use filter::FilterNode;
pub use filter::FilterOp;
pub use filter::ListQuery;
pub use filter::Pagination;
pub use filter::SortDirection;
pub use filter::SortSpec;
pub use hashing::DEFAULT_HASH_ALGORITHM;
pub use hashing::HashAlgorithm;
pub use hashing::HashDigest;
pub use identifiers::AgentId;
pub use identifiers::EventId;
pub use identifiers::ItemId;
pub use identifiers::LeaseKey;
pub use identifiers::OrderId;
pub use identifiers::OrderTypeName;
pub use identifiers::PartId;
pub use identifiers::PartKey;
pub use identifiers::ProvenanceId;
pub use identifiers::RequestId;
pub use model::Diagnostic;
pub use model::Diff;
pub use model::EventKind;
pub use model::IdempotencyRecord;
pub use model::Item;
pub use model::Order;
pub use model::Part;
pub use model::PartSlot;
pub use model::PartStatus;
pub use model::ProvenanceRecord;
pub use model::ValidationIssue;
pub use model::WorkEvent;
pub use state::ItemState;
pub use state::OrderState;
pub use state::TransitionTable;
pub use state::default_item_transitions;
pub use state::default_order_transitions;
pub use time::Timestamp;
