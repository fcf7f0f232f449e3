// work-order-core/src/runtime/idempotency.rs
// ============================================================================
// Module: Idempotency Guard
// Description: Header-keyed dedupe with cached response capture.
// Purpose: Make every enforced mutating entry replay-safe at-most-once.
// Dependencies: crate::{core, interfaces}, serde, serde_json
// ============================================================================

//! ## Overview
//! Callers supply a key string per mutating entry; the guard hashes it with
//! SHA-256 under a scope built from the operation tag and target identifier.
//! A stored `(scope, key_hash)` short-circuits to the captured response; a
//! losing concurrent insert refetches the winner's response. The guarantee is
//! strictly at-most-once per `(scope, key)` across process restarts; an
//! operation that errors is not captured and may be retried with the same
//! key.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::core::hashing::idempotency_key_hash;
use crate::core::model::IdempotencyRecord;
use crate::core::time::Timestamp;
use crate::interfaces::IdempotencyPut;
use crate::interfaces::StoreError;
use crate::interfaces::WorkOrderStore;

// ============================================================================
// SECTION: Operation Tags
// ============================================================================

/// Mutating entry points the guard can be enforced on.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum OperationTag {
    /// Order proposal.
    Propose,
    /// Item checkout (scoped or global).
    Checkout,
    /// Whole-item submission.
    Submit,
    /// Part submission.
    SubmitPart,
    /// Item finalization.
    Finalize,
    /// Order approval.
    Approve,
    /// Order rejection.
    Reject,
}

impl OperationTag {
    /// Stable snake_case label used in scopes.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Propose => "propose",
            Self::Checkout => "checkout",
            Self::Submit => "submit",
            Self::SubmitPart => "submit_part",
            Self::Finalize => "finalize",
            Self::Approve => "approve",
            Self::Reject => "reject",
        }
    }
}

/// Default set of enforced operations.
#[must_use]
pub fn default_enforce_on() -> BTreeSet<OperationTag> {
    BTreeSet::from([
        OperationTag::Propose,
        OperationTag::Submit,
        OperationTag::SubmitPart,
        OperationTag::Finalize,
        OperationTag::Approve,
        OperationTag::Reject,
    ])
}

// ============================================================================
// SECTION: Guard
// ============================================================================

/// Header-keyed idempotency guard over a store.
#[derive(Debug, Clone)]
pub struct IdempotencyGuard<S> {
    /// Backing store.
    store: S,
    /// Operations the guard is enforced on.
    enforce_on: BTreeSet<OperationTag>,
}

impl<S: WorkOrderStore> IdempotencyGuard<S> {
    /// Creates a guard enforcing the configured operation set.
    pub const fn new(store: S, enforce_on: BTreeSet<OperationTag>) -> Self {
        Self { store, enforce_on }
    }

    /// Runs `operation` under the guard.
    ///
    /// Without a key, or for an unenforced tag, the operation runs directly.
    /// Otherwise a stored response replays byte-identically and the operation
    /// is skipped; a fresh success is captured before returning.
    ///
    /// # Errors
    ///
    /// Propagates the operation's error, or a [`StoreError`] mapped through
    /// `E` when lookup, capture, or replay decoding fails.
    pub fn execute<T, E, F>(
        &self,
        tag: OperationTag,
        target: &str,
        key: Option<&str>,
        now: Timestamp,
        operation: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<StoreError>,
        F: FnOnce() -> Result<T, E>,
    {
        let Some(key) = key.filter(|_| self.enforce_on.contains(&tag)) else {
            return operation();
        };

        let scope = format!("{}:{target}", tag.as_str());
        let key_hash = idempotency_key_hash(key).value;

        if let Some(record) = self.store.idempotency_get(&scope, &key_hash).map_err(E::from)? {
            return decode_snapshot(record.response_snapshot).map_err(E::from);
        }

        let response = match operation() {
            Ok(response) => response,
            Err(err) => {
                // A concurrent caller may have won while this operation ran
                // and failed against its effects; converge on the captured
                // response instead of surfacing the race.
                if let Some(record) =
                    self.store.idempotency_get(&scope, &key_hash).map_err(E::from)?
                {
                    return decode_snapshot(record.response_snapshot).map_err(E::from);
                }
                return Err(err);
            }
        };
        let snapshot = serde_json::to_value(&response).map_err(|err| {
            E::from(StoreError::Invalid(format!("response snapshot failed: {err}")))
        })?;
        let record = IdempotencyRecord {
            scope,
            key_hash,
            response_snapshot: snapshot,
            created_at: now,
        };
        match self.store.idempotency_put(&record).map_err(E::from)? {
            IdempotencyPut::Inserted => Ok(response),
            IdempotencyPut::Conflict(existing) => {
                // A concurrent caller won; surface their captured response.
                decode_snapshot(existing.response_snapshot).map_err(E::from)
            }
        }
    }
}

/// Decodes a captured response snapshot.
fn decode_snapshot<T: DeserializeOwned>(snapshot: serde_json::Value) -> Result<T, StoreError> {
    serde_json::from_value(snapshot)
        .map_err(|err| StoreError::Corrupt(format!("cached response decode failed: {err}")))
}
