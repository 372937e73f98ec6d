// crates/sahay-core/src/core/sync.rs
// ============================================================================
// Module: SAHAY Sync Rules
// Description: Offline-sync envelopes, per-item outcomes, and conflict rules.
// Purpose: Make batch ingestion idempotent and conflict resolution
// deterministic across replays.
// Dependencies: crate::core::{identifiers, time}, serde, serde_json
// ============================================================================

//! ## Overview
//! The sync gateway ingests ordered batches of envelopes. Each item resolves
//! independently to `accepted`, `duplicate`, or `rejected:<reason>`; a batch
//! never fails as a whole. Append-only entities accept only CREATE; the
//! profile entity resolves by last-write-wins on `client_time` with a stable
//! `event_id` tie-break, so replaying any batch in any order converges on
//! the same state.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::cmp::Ordering;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::core::identifiers::DeviceId;
use crate::core::identifiers::EventId;
use crate::core::identifiers::UserId;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Hard upper bound on items per sync batch.
pub const MAX_SYNC_BATCH_ITEMS: usize = 500;

// ============================================================================
// SECTION: Entities and Operations
// ============================================================================

/// Entity types accepted by the sync gateway.
///
/// # Invariants
/// - Variants are stable for serialization and outcome reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncEntityType {
    /// Mutable profile record (last-write-wins).
    Profile,
    /// Append-only vitals readings.
    Vitals,
    /// Append-only mood entries.
    Mood,
    /// Append-only water-intake entries.
    Water,
}

impl SyncEntityType {
    /// Returns the stable string label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Profile => "profile",
            Self::Vitals => "vitals",
            Self::Mood => "mood",
            Self::Water => "water",
        }
    }

    /// Returns true when the entity accepts only CREATE operations.
    #[must_use]
    pub const fn is_append_only(self) -> bool {
        matches!(self, Self::Vitals | Self::Mood | Self::Water)
    }
}

/// Operations carried by sync envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SyncOperation {
    /// Create a new row.
    Create,
    /// Update an existing row.
    Update,
    /// Delete an existing row.
    Delete,
}

// ============================================================================
// SECTION: Envelope
// ============================================================================

/// One item of a sync batch.
///
/// # Invariants
/// - `event_id` is globally unique; duplicates are accepted idempotently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncEnvelope {
    /// Globally unique event identifier (canonical UUID).
    pub event_id: EventId,
    /// Originating device.
    pub device_id: DeviceId,
    /// Owning user.
    pub user_id: UserId,
    /// Target entity type.
    pub entity_type: SyncEntityType,
    /// Requested operation.
    pub operation: SyncOperation,
    /// Client-asserted write time.
    pub client_time: Timestamp,
    /// Entity payload.
    pub payload: Value,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Validation errors for sync envelopes.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Envelope failed validation.
    #[error("invalid sync envelope: {0}")]
    InvalidEnvelope(String),
    /// Batch exceeds the item bound.
    #[error("sync batch too large: {actual} > {max}")]
    BatchTooLarge {
        /// Maximum allowed items.
        max: usize,
        /// Actual submitted items.
        actual: usize,
    },
}

/// Validates an envelope's identifier shape and payload form.
///
/// # Errors
///
/// Returns [`SyncError::InvalidEnvelope`] when the event id is not a
/// canonical UUID or the payload is not a JSON object.
pub fn validate_envelope(envelope: &SyncEnvelope) -> Result<(), SyncError> {
    if !envelope.event_id.is_canonical_uuid() {
        return Err(SyncError::InvalidEnvelope(format!(
            "event_id is not a canonical uuid: {}",
            envelope.event_id
        )));
    }
    if !envelope.payload.is_object() {
        return Err(SyncError::InvalidEnvelope("payload must be a json object".to_string()));
    }
    if envelope.user_id.as_str().is_empty() || envelope.device_id.as_str().is_empty() {
        return Err(SyncError::InvalidEnvelope("user_id and device_id are required".to_string()));
    }
    Ok(())
}

// ============================================================================
// SECTION: Outcomes
// ============================================================================

/// Stable rejection reasons.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// UPDATE/DELETE against an append-only entity.
    AppendOnly,
    /// Profile write older than the stored `client_time`.
    Stale,
    /// Transient storage failure; the item may be retried.
    Transient,
    /// Envelope validation failure with detail.
    Invalid(String),
}

impl RejectReason {
    /// Returns the stable reason label.
    #[must_use]
    pub fn as_label(&self) -> String {
        match self {
            Self::AppendOnly => "append_only".to_string(),
            Self::Stale => "stale".to_string(),
            Self::Transient => "transient".to_string(),
            Self::Invalid(detail) => format!("invalid:{detail}"),
        }
    }
}

/// Per-item ingestion outcome.
///
/// Serializes as the stable labels `accepted`, `duplicate`, or
/// `rejected:<reason>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Item was applied to domain state.
    Accepted,
    /// Item's `event_id` was already ingested; state unchanged.
    Duplicate,
    /// Item was rejected with a stable reason.
    Rejected(RejectReason),
}

impl SyncOutcome {
    /// Returns the stable outcome label.
    #[must_use]
    pub fn as_label(&self) -> String {
        match self {
            Self::Accepted => "accepted".to_string(),
            Self::Duplicate => "duplicate".to_string(),
            Self::Rejected(reason) => format!("rejected:{}", reason.as_label()),
        }
    }
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_label())
    }
}

impl Serialize for SyncOutcome {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.as_label())
    }
}

// ============================================================================
// SECTION: Conflict Resolution
// ============================================================================

/// Decision for a profile last-write-wins comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LwwDecision {
    /// Incoming write wins and must be applied.
    Apply,
    /// Incoming write is stale and must be rejected.
    Stale,
}

/// Resolves a profile write against the currently stored write.
///
/// Strictly greater `client_time` wins. Equal times break the tie by
/// lexicographic `event_id`, larger id winning, so replaying the same pair
/// of writes in either order converges. A missing current profile always
/// applies.
#[must_use]
pub fn resolve_profile_write(
    current: Option<(Timestamp, &EventId)>,
    incoming_time: Timestamp,
    incoming_id: &EventId,
) -> LwwDecision {
    match current {
        None => LwwDecision::Apply,
        Some((current_time, current_id)) => match incoming_time.cmp(&current_time) {
            Ordering::Greater => LwwDecision::Apply,
            Ordering::Less => LwwDecision::Stale,
            Ordering::Equal => {
                if incoming_id.as_str() > current_id.as_str() {
                    LwwDecision::Apply
                } else {
                    LwwDecision::Stale
                }
            }
        },
    }
}

/// Resolves the operation rule for an entity type.
///
/// Append-only entities admit only CREATE; profile admits CREATE and UPDATE
/// (both flow through last-write-wins) and rejects DELETE, which is reserved
/// for the right-to-erasure path.
#[must_use]
pub fn operation_allowed(entity_type: SyncEntityType, operation: SyncOperation) -> bool {
    match operation {
        SyncOperation::Create => true,
        SyncOperation::Update => !entity_type.is_append_only(),
        SyncOperation::Delete => false,
    }
}
