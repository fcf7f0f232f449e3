// work-order-core/src/runtime/provenance.rs
// ============================================================================
// Module: Provenance Enricher
// Description: Per-action capture of agent and request metadata.
// Purpose: Record who acted, from where, and under which request, without
// ever capturing request bodies.
// Dependencies: crate::{core, interfaces}
// ============================================================================

//! ## Overview
//! Every mutating entry may carry a request context. The enricher turns it
//! into an immutable provenance record bound to the order or item acted on:
//! agent identity and build metadata, caller network attributes, session
//! identifiers, a request id (generated when absent), and a SHA-256
//! fingerprint over `(agent_id, ip, user_agent, accept_language)`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::hashing::request_fingerprint;
use crate::core::identifiers::AgentId;
use crate::core::identifiers::ItemId;
use crate::core::identifiers::OrderId;
use crate::core::identifiers::ProvenanceId;
use crate::core::identifiers::RequestId;
use crate::core::model::ProvenanceRecord;
use crate::core::time::Timestamp;
use crate::interfaces::StoreError;
use crate::interfaces::WorkOrderStore;

// ============================================================================
// SECTION: Request Context
// ============================================================================

/// Caller-supplied request metadata for one mutating entry.
///
/// Everything is optional; the enricher fingerprints whatever is present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    /// Acting agent identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<AgentId>,
    /// Agent name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    /// Agent version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_version: Option<String>,
    /// Model name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    /// Runtime tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_tag: Option<String>,
    /// Caller-supplied request identifier; generated when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<RequestId>,
    /// Caller IP.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    /// Caller user-agent string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    /// Caller accept-language header.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accept_language: Option<String>,
    /// Authenticated user identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Session identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

// ============================================================================
// SECTION: Enricher
// ============================================================================

/// Builds and persists provenance records.
#[derive(Debug, Clone)]
pub struct ProvenanceEnricher<S> {
    /// Backing store.
    store: S,
}

impl<S: WorkOrderStore> ProvenanceEnricher<S> {
    /// Creates an enricher.
    pub const fn new(store: S) -> Self {
        Self { store }
    }

    /// Captures one provenance record for an action on an order or item.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the record cannot be persisted.
    pub fn capture(
        &self,
        order_id: &OrderId,
        item_id: Option<&ItemId>,
        context: &RequestContext,
        now: Timestamp,
    ) -> Result<ProvenanceRecord, StoreError> {
        let fingerprint = request_fingerprint(
            context.agent_id.as_ref().map(AgentId::as_str),
            context.ip.as_deref(),
            context.user_agent.as_deref(),
            context.accept_language.as_deref(),
        );
        let record = ProvenanceRecord {
            id: ProvenanceId::generate(),
            order_id: order_id.clone(),
            item_id: item_id.cloned(),
            agent_id: context.agent_id.clone(),
            agent_name: context.agent_name.clone(),
            agent_version: context.agent_version.clone(),
            model_name: context.model_name.clone(),
            runtime_tag: context.runtime_tag.clone(),
            request_id: context.request_id.clone().unwrap_or_else(RequestId::generate),
            request_fingerprint: fingerprint,
            ip: context.ip.clone(),
            user_agent: context.user_agent.clone(),
            user_id: context.user_id.clone(),
            session_id: context.session_id.clone(),
            created_at: now,
        };
        self.store.insert_provenance(&record)?;
        Ok(record)
    }
}
