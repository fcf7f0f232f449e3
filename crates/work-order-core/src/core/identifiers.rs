// work-order-core/src/core/identifiers.rs
// ============================================================================
// Module: Work Order Identifiers
// Description: Canonical opaque identifiers for orders, items, parts, and agents.
// Purpose: Provide strongly typed, serializable IDs with stable string forms.
// Dependencies: serde, uuid
// ============================================================================

//! ## Overview
//! This module defines the canonical string-based identifiers used throughout
//! the work-order engine. Identifiers are opaque and serialize as strings.
//! Generated identifiers are UUID v4 in canonical form; identifiers accepted
//! from callers are not validated beyond being non-empty strings at the
//! engine boundary.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

// ============================================================================
// SECTION: Identifier Macro
// ============================================================================

/// Declares a string-backed identifier newtype with the standard impl set.
macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier from an existing string form.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self::new(value)
            }
        }
    };
}

/// Adds UUID v4 generation to a string identifier type.
macro_rules! generated_id {
    ($name:ident) => {
        impl $name {
            /// Generates a fresh identifier as a canonical UUID v4 string.
            #[must_use]
            pub fn generate() -> Self {
                Self(Uuid::new_v4().to_string())
            }
        }
    };
}

// ============================================================================
// SECTION: Identifier Types
// ============================================================================

string_id! {
    /// Order identifier.
    OrderId
}
generated_id!(OrderId);

string_id! {
    /// Item identifier scoped to an order.
    ItemId
}
generated_id!(ItemId);

string_id! {
    /// Part identifier scoped to an item.
    PartId
}
generated_id!(PartId);

string_id! {
    /// Audit event identifier.
    EventId
}
generated_id!(EventId);

string_id! {
    /// Provenance record identifier.
    ProvenanceId
}
generated_id!(ProvenanceId);

string_id! {
    /// Request identifier attached to provenance records.
    RequestId
}
generated_id!(RequestId);

string_id! {
    /// Agent identifier supplied by callers when leasing and submitting.
    AgentId
}

string_id! {
    /// Order-type name keyed into the handler registry.
    OrderTypeName
}

string_id! {
    /// Part key naming one keyed fragment of an item result.
    PartKey
}

/// Joins part keys into a comma-separated list for diagnostics.
pub(crate) fn format_part_keys(keys: &[PartKey]) -> String {
    keys.iter().map(PartKey::as_str).collect::<Vec<_>>().join(", ")
}

// ============================================================================
// SECTION: Lease Keys
// ============================================================================

/// Opaque lease key addressing one item in a lease backend.
///
/// # Invariants
/// - The key embeds the item identifier and is stable across backends.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LeaseKey(String);

impl LeaseKey {
    /// Key prefix shared by all item leases.
    const PREFIX: &'static str = "lease:item:";

    /// Builds the lease key for an item.
    #[must_use]
    pub fn for_item(item_id: &ItemId) -> Self {
        Self(format!("{}{}", Self::PREFIX, item_id.as_str()))
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Extracts the item identifier embedded in the key, when present.
    #[must_use]
    pub fn item_id(&self) -> Option<ItemId> {
        self.0.strip_prefix(Self::PREFIX).map(ItemId::new)
    }
}

impl fmt::Display for LeaseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
