// work-order-core/src/core/time.rs
// ============================================================================
// Module: Work Order Time Model
// Description: Canonical UTC timestamps for rows, events, and leases.
// Purpose: Provide explicit, caller-supplied time values across engine records.
// Dependencies: serde, time
// ============================================================================

//! ## Overview
//! The engine uses explicit time values supplied by its host on every
//! mutating call to keep lease arithmetic and replay deterministic. The core
//! never reads wall-clock time on its own; [`Timestamp::now_utc`] exists for
//! hosts and the CLI. Timestamps serialize as RFC 3339 strings in UTC.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use time::Duration;
use time::OffsetDateTime;

// ============================================================================
// SECTION: Timestamp
// ============================================================================

/// Canonical UTC timestamp used on all persisted rows and events.
///
/// # Invariants
/// - Values are explicitly provided by callers on mutating paths; the core
///   never samples the clock inside an operation.
/// - Serialized form is RFC 3339 in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(#[serde(with = "time::serde::rfc3339")] OffsetDateTime);

impl Timestamp {
    /// Returns the current wall-clock time in UTC.
    ///
    /// Host-side convenience only; engine operations receive their time as
    /// an argument.
    #[must_use]
    pub fn now_utc() -> Self {
        Self(OffsetDateTime::now_utc())
    }

    /// Creates a timestamp from unix seconds.
    ///
    /// Returns `None` when the value is outside the representable range.
    #[must_use]
    pub fn from_unix_seconds(seconds: i64) -> Option<Self> {
        OffsetDateTime::from_unix_timestamp(seconds).ok().map(Self)
    }

    /// Returns the timestamp as unix seconds.
    #[must_use]
    pub const fn unix_seconds(&self) -> i64 {
        self.0.unix_timestamp()
    }

    /// Returns this timestamp advanced by whole seconds.
    #[must_use]
    pub fn plus_seconds(&self, seconds: u64) -> Self {
        let clamped = i64::try_from(seconds).unwrap_or(i64::MAX);
        Self(self.0.saturating_add(Duration::seconds(clamped)))
    }

    /// Returns this timestamp advanced by whole hours.
    #[must_use]
    pub fn plus_hours(&self, hours: u64) -> Self {
        self.plus_seconds(hours.saturating_mul(3600))
    }

    /// Returns this timestamp moved back by whole hours.
    #[must_use]
    pub fn minus_hours(&self, hours: u64) -> Self {
        let clamped = i64::try_from(hours.saturating_mul(3600)).unwrap_or(i64::MAX);
        Self(self.0.saturating_sub(Duration::seconds(clamped)))
    }

    /// Returns whole seconds from `self` until `later`, zero when `later`
    /// is not after `self`.
    #[must_use]
    pub fn seconds_until(&self, later: &Self) -> u64 {
        let delta = later.0 - self.0;
        u64::try_from(delta.whole_seconds()).unwrap_or(0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.format(&time::format_description::well_known::Rfc3339) {
            Ok(text) => f.write_str(&text),
            Err(_) => write!(f, "{}", self.0),
        }
    }
}
