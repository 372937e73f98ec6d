// crates/sahay-core/src/core/audit.rs
// ============================================================================
// Module: SAHAY Audit Chain
// Description: Tamper-evident, append-only audit entries bound by hash chain.
// Purpose: Bind every domain write to a verifiable hash-chained log entry.
// Dependencies: crate::core::{hashing, identifiers, time}, serde
// ============================================================================

//! ## Overview
//! Every mutating operation appends exactly one audit entry in the same
//! transaction as the domain write. Each entry's hash binds its content to
//! the previous entry's hash; verification walks the chain from seq 1 (or a
//! checkpoint) and reports the first break. Entries are never mutated;
//! corrections are new entries referencing prior ones.
//!
//! Entries for anonymous complaints must carry no requester `ip` or
//! `device`. Those fields are outside the hashed preimage, so scrubbing
//! never breaks the chain.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::hashing::DEFAULT_HASH_ALGORITHM;
use crate::core::hashing::HashDigest;
use crate::core::hashing::HashError;
use crate::core::hashing::hash_canonical_json;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Audit Actions
// ============================================================================

/// Stable action labels recorded in audit entries.
///
/// # Invariants
/// - Variants are stable for serialization and chain verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// Account registration.
    UserRegistered,
    /// Login and token issuance.
    UserLoggedIn,
    /// Token revoked.
    TokenRevoked,
    /// Role granted to a user.
    RoleGranted,
    /// Consent record appended.
    ConsentRecorded,
    /// Sync batch item applied.
    SyncEventApplied,
    /// Triage session created.
    TriageSessionCreated,
    /// Teleconsultation request created.
    TeleRequestCreated,
    /// Teleconsultation request status changed.
    TeleRequestUpdated,
    /// Prescription issued.
    PrescriptionIssued,
    /// Complaint created.
    ComplaintCreated,
    /// Complaint status changed.
    ComplaintUpdated,
    /// Complaint escalated by the SLA scheduler.
    ComplaintEscalated,
    /// Complaint closed with feedback.
    ComplaintClosed,
    /// Analytics event accepted.
    AnalyticsEventRecorded,
    /// Materialized views refreshed.
    ViewsRefreshed,
    /// User erased under right-to-erasure.
    UserErased,
}

impl AuditAction {
    /// Returns the stable string label for the action.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UserRegistered => "user_registered",
            Self::UserLoggedIn => "user_logged_in",
            Self::TokenRevoked => "token_revoked",
            Self::RoleGranted => "role_granted",
            Self::ConsentRecorded => "consent_recorded",
            Self::SyncEventApplied => "sync_event_applied",
            Self::TriageSessionCreated => "triage_session_created",
            Self::TeleRequestCreated => "tele_request_created",
            Self::TeleRequestUpdated => "tele_request_updated",
            Self::PrescriptionIssued => "prescription_issued",
            Self::ComplaintCreated => "complaint_created",
            Self::ComplaintUpdated => "complaint_updated",
            Self::ComplaintEscalated => "complaint_escalated",
            Self::ComplaintClosed => "complaint_closed",
            Self::AnalyticsEventRecorded => "analytics_event_recorded",
            Self::ViewsRefreshed => "views_refreshed",
            Self::UserErased => "user_erased",
        }
    }

    /// Parses a stable action label.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "user_registered" => Some(Self::UserRegistered),
            "user_logged_in" => Some(Self::UserLoggedIn),
            "token_revoked" => Some(Self::TokenRevoked),
            "role_granted" => Some(Self::RoleGranted),
            "consent_recorded" => Some(Self::ConsentRecorded),
            "sync_event_applied" => Some(Self::SyncEventApplied),
            "triage_session_created" => Some(Self::TriageSessionCreated),
            "tele_request_created" => Some(Self::TeleRequestCreated),
            "tele_request_updated" => Some(Self::TeleRequestUpdated),
            "prescription_issued" => Some(Self::PrescriptionIssued),
            "complaint_created" => Some(Self::ComplaintCreated),
            "complaint_updated" => Some(Self::ComplaintUpdated),
            "complaint_escalated" => Some(Self::ComplaintEscalated),
            "complaint_closed" => Some(Self::ComplaintClosed),
            "analytics_event_recorded" => Some(Self::AnalyticsEventRecorded),
            "views_refreshed" => Some(Self::ViewsRefreshed),
            "user_erased" => Some(Self::UserErased),
            _ => None,
        }
    }
}

// ============================================================================
// SECTION: Audit Entry
// ============================================================================

/// Actor label recorded for anonymous submissions.
pub const ANONYMOUS_ACTOR: &str = "anonymous";

/// Hash-chained audit entry.
///
/// # Invariants
/// - `entry_hash` equals [`entry_hash_of`] over this entry's fields.
/// - `prev_hash` equals the previous entry's `entry_hash`, or the zero
///   sentinel for seq 1.
/// - `ip` and `device` are `None` for anonymous-complaint entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Monotonic sequence number, starting at 1.
    pub seq: u64,
    /// Acting user identifier or a fixed system/anonymous label.
    pub actor: String,
    /// Action label.
    pub action: AuditAction,
    /// Entity type written by the action.
    pub entity_type: String,
    /// Entity identifier written by the action.
    pub entity_id: String,
    /// Requester IP, when policy allows recording it.
    pub ip: Option<String>,
    /// Requester device label, when policy allows recording it.
    pub device: Option<String>,
    /// Time the entry was appended.
    pub at: Timestamp,
    /// Canonical hash of the domain payload that was written.
    pub payload_digest: HashDigest,
    /// Hash of the previous entry, or the zero sentinel for seq 1.
    pub prev_hash: HashDigest,
    /// Hash binding this entry's content to `prev_hash`.
    pub entry_hash: HashDigest,
}

/// Hashed preimage of an audit entry.
///
/// `ip` and `device` are deliberately excluded so that privacy scrubbing
/// cannot break the chain.
#[derive(Serialize)]
struct EntryPreimage<'a> {
    /// Sequence number.
    seq: u64,
    /// Actor label.
    actor: &'a str,
    /// Action label.
    action: AuditAction,
    /// Entity type.
    entity_type: &'a str,
    /// Entity identifier.
    entity_id: &'a str,
    /// Entry timestamp.
    at: Timestamp,
    /// Previous entry hash.
    prev_hash: &'a HashDigest,
    /// Domain payload digest.
    payload_digest: &'a HashDigest,
}

/// Recomputes the chained hash for an existing entry's content.
///
/// # Errors
///
/// Returns [`HashError`] when canonicalization fails.
pub fn entry_hash_of(entry: &AuditEntry) -> Result<HashDigest, HashError> {
    let preimage = EntryPreimage {
        seq: entry.seq,
        actor: &entry.actor,
        action: entry.action,
        entity_type: &entry.entity_type,
        entity_id: &entry.entity_id,
        at: entry.at,
        prev_hash: &entry.prev_hash,
        payload_digest: &entry.payload_digest,
    };
    hash_canonical_json(DEFAULT_HASH_ALGORITHM, &preimage)
}

/// Builder input for a new audit entry.
#[derive(Debug, Clone)]
pub struct AuditEntryDraft {
    /// Actor label.
    pub actor: String,
    /// Action label.
    pub action: AuditAction,
    /// Entity type written.
    pub entity_type: String,
    /// Entity identifier written.
    pub entity_id: String,
    /// Requester IP, already scrubbed for anonymous submissions.
    pub ip: Option<String>,
    /// Requester device, already scrubbed for anonymous submissions.
    pub device: Option<String>,
    /// Entry timestamp.
    pub at: Timestamp,
    /// Canonical hash of the written payload.
    pub payload_digest: HashDigest,
}

impl AuditEntryDraft {
    /// Seals the draft into a chained entry at `seq` following `prev_hash`.
    ///
    /// # Errors
    ///
    /// Returns [`HashError`] when canonicalization fails.
    pub fn seal(self, seq: u64, prev_hash: HashDigest) -> Result<AuditEntry, HashError> {
        let preimage = EntryPreimage {
            seq,
            actor: &self.actor,
            action: self.action,
            entity_type: &self.entity_type,
            entity_id: &self.entity_id,
            at: self.at,
            prev_hash: &prev_hash,
            payload_digest: &self.payload_digest,
        };
        let entry_hash = hash_canonical_json(DEFAULT_HASH_ALGORITHM, &preimage)?;
        Ok(AuditEntry {
            seq,
            actor: self.actor,
            action: self.action,
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            ip: self.ip,
            device: self.device,
            at: self.at,
            payload_digest: self.payload_digest,
            prev_hash,
            entry_hash,
        })
    }
}

// ============================================================================
// SECTION: Chain Verification
// ============================================================================

/// Result of walking the audit chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainReport {
    /// True when every entry links and re-hashes correctly.
    pub ok: bool,
    /// Sequence of the first broken entry, when any.
    pub first_broken_seq: Option<u64>,
    /// Number of entries examined.
    pub checked: u64,
}

impl ChainReport {
    /// Returns a passing report over `checked` entries.
    #[must_use]
    pub const fn passed(checked: u64) -> Self {
        Self {
            ok: true,
            first_broken_seq: None,
            checked,
        }
    }

    /// Returns a failing report broken at `seq`.
    #[must_use]
    pub const fn broken_at(seq: u64, checked: u64) -> Self {
        Self {
            ok: false,
            first_broken_seq: Some(seq),
            checked,
        }
    }
}

/// Verifies a contiguous slice of the audit chain.
///
/// `checkpoint` is the `entry_hash` expected as the first entry's
/// `prev_hash`; when absent, the first entry must have seq 1 and the zero
/// sentinel as `prev_hash`. Verification stops at the first break.
#[must_use]
pub fn verify_chain(entries: &[AuditEntry], checkpoint: Option<&HashDigest>) -> ChainReport {
    let mut checked = 0_u64;
    let mut expected_prev = checkpoint.cloned().unwrap_or_else(HashDigest::zero);
    let mut expected_seq: Option<u64> = None;

    for entry in entries {
        checked += 1;
        match expected_seq {
            Some(seq) if entry.seq != seq => {
                return ChainReport::broken_at(entry.seq, checked);
            }
            None if checkpoint.is_none() && entry.seq != 1 => {
                return ChainReport::broken_at(entry.seq, checked);
            }
            _ => {}
        }
        if entry.prev_hash != expected_prev {
            return ChainReport::broken_at(entry.seq, checked);
        }
        match entry_hash_of(entry) {
            Ok(hash) if hash == entry.entry_hash => {}
            _ => return ChainReport::broken_at(entry.seq, checked),
        }
        expected_prev = entry.entry_hash.clone();
        expected_seq = Some(entry.seq + 1);
    }

    ChainReport::passed(checked)
}
