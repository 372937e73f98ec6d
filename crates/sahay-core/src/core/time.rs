// crates/sahay-core/src/core/time.rs
// ============================================================================
// Module: SAHAY Time Model
// Description: Canonical timestamp representation for records and schedules.
// Purpose: Provide deterministic, replayable time values across SAHAY records.
// Dependencies: serde, time
// ============================================================================

//! ## Overview
//! SAHAY timestamps are unix-epoch milliseconds wrapped in a newtype with
//! RFC 3339 parsing and formatting. The core never reads wall-clock time;
//! hosts supply "now" through [`crate::interfaces::Clock`] so that SLA and
//! escalation logic stays replayable in tests.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Milliseconds per second.
pub const MILLIS_PER_SECOND: i64 = 1_000;
/// Milliseconds per minute.
pub const MILLIS_PER_MINUTE: i64 = 60 * MILLIS_PER_SECOND;
/// Milliseconds per hour.
pub const MILLIS_PER_HOUR: i64 = 60 * MILLIS_PER_MINUTE;
/// Milliseconds per day.
pub const MILLIS_PER_DAY: i64 = 24 * MILLIS_PER_HOUR;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised when converting timestamps.
#[derive(Debug, Error)]
pub enum TimeError {
    /// Input string is not valid RFC 3339.
    #[error("invalid rfc3339 timestamp: {0}")]
    Parse(String),
    /// Value falls outside the representable range.
    #[error("timestamp out of range")]
    Range,
    /// Formatting the timestamp failed.
    #[error("failed to format timestamp: {0}")]
    Format(String),
}

// ============================================================================
// SECTION: Timestamp
// ============================================================================

/// Canonical timestamp: unix epoch milliseconds, UTC.
///
/// # Invariants
/// - Values are explicitly provided by callers; the core never reads
///   wall-clock time.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Creates a timestamp from unix epoch milliseconds.
    #[must_use]
    pub const fn from_unix_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Returns the timestamp as unix epoch milliseconds.
    #[must_use]
    pub const fn as_unix_millis(self) -> i64 {
        self.0
    }

    /// Parses an RFC 3339 timestamp string (e.g. `2026-01-28T10:00:00Z`).
    ///
    /// # Errors
    ///
    /// Returns [`TimeError::Parse`] for malformed input and
    /// [`TimeError::Range`] for values outside the unix-millisecond range.
    pub fn from_rfc3339(value: &str) -> Result<Self, TimeError> {
        let parsed = OffsetDateTime::parse(value, &Rfc3339)
            .map_err(|err| TimeError::Parse(err.to_string()))?;
        let millis = parsed.unix_timestamp_nanos() / 1_000_000;
        i64::try_from(millis).map(Self).map_err(|_| TimeError::Range)
    }

    /// Formats the timestamp as RFC 3339 in UTC.
    ///
    /// # Errors
    ///
    /// Returns [`TimeError::Range`] when the value is outside the calendar
    /// range and [`TimeError::Format`] when formatting fails.
    pub fn to_rfc3339(self) -> Result<String, TimeError> {
        let nanos = i128::from(self.0) * 1_000_000;
        let value = OffsetDateTime::from_unix_timestamp_nanos(nanos)
            .map_err(|_| TimeError::Range)?;
        value.format(&Rfc3339).map_err(|err| TimeError::Format(err.to_string()))
    }

    /// Returns the timestamp advanced by `millis`, saturating at the range
    /// boundaries.
    #[must_use]
    pub const fn saturating_add_millis(self, millis: i64) -> Self {
        Self(self.0.saturating_add(millis))
    }

    /// Floors the timestamp to a bucket boundary of `bucket_millis`.
    ///
    /// Non-positive bucket sizes return the timestamp unchanged.
    #[must_use]
    pub const fn floor_to(self, bucket_millis: i64) -> Self {
        if bucket_millis <= 0 {
            return self;
        }
        Self(self.0 - self.0.rem_euclid(bucket_millis))
    }
}
