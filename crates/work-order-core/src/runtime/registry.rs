// work-order-core/src/runtime/registry.rs
// ============================================================================
// Module: Order-Type Registry
// Description: Lookup of order-type handlers by string key.
// Purpose: Dispatch engine operations to user-plugged type policies.
// Dependencies: crate::interfaces::handler
// ============================================================================

//! ## Overview
//! The registry is an in-memory map from type name to handler, populated at
//! startup and read-only thereafter. Dispatch is by map lookup; unknown type
//! names fail with [`RegistryError::UnknownType`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;

use crate::core::identifiers::OrderTypeName;
use crate::interfaces::handler::OrderHandler;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Registry lookup errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// No handler registered under the requested type name.
    #[error("unknown order type: {0}")]
    UnknownType(String),
}

// ============================================================================
// SECTION: Registry
// ============================================================================

/// In-memory handler registry, read-only after startup.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    /// Handlers keyed by type name.
    handlers: BTreeMap<OrderTypeName, Arc<dyn OrderHandler>>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: BTreeMap::new(),
        }
    }

    /// Registers a handler under a type name, replacing any previous entry.
    pub fn register(
        &mut self,
        type_name: impl Into<OrderTypeName>,
        handler: Arc<dyn OrderHandler>,
    ) {
        self.handlers.insert(type_name.into(), handler);
    }

    /// Looks up the handler for a type name.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownType`] when no handler is registered.
    pub fn get(&self, type_name: &OrderTypeName) -> Result<Arc<dyn OrderHandler>, RegistryError> {
        self.handlers
            .get(type_name)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownType(type_name.as_str().to_string()))
    }

    /// Returns the registered type names.
    #[must_use]
    pub fn type_names(&self) -> Vec<OrderTypeName> {
        self.handlers.keys().cloned().collect()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("types", &self.type_names())
            .finish()
    }
}
