// crates/sahay-core/src/core/complaint.rs
// ============================================================================
// Module: SAHAY Complaint State Machine
// Description: Complaint lifecycle, SLA deadlines, and escalation ladder.
// Purpose: Keep complaint transitions legal, closures accountable, and
// escalations deterministic under scheduler replays.
// Dependencies: crate::core::{hashing, identifiers, time}, serde
// ============================================================================

//! ## Overview
//! Complaints move `draft → submitted → under_review → in_progress →
//! {resolved → closed | escalated}`; `escalated` may return to an
//! in-progress state after reassignment and `closed` is terminal. Closure
//! requires non-empty feedback and computes a canonical closure hash for
//! anchoring. The escalation ladder bumps `district → state → national`,
//! resetting the SLA deadline at each step; past `national` the complaint is
//! marked exhausted and never bumped again, so scheduler re-runs are
//! idempotent.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::core::hashing::DEFAULT_HASH_ALGORITHM;
use crate::core::hashing::HashDigest;
use crate::core::hashing::HashError;
use crate::core::hashing::hash_canonical_json;
use crate::core::identifiers::ComplaintId;
use crate::core::identifiers::UserId;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Categories
// ============================================================================

/// Complaint categories with per-category SLA defaults.
///
/// # Invariants
/// - Variants are stable for serialization and SLA configuration keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplaintCategory {
    /// Health-service delivery complaints.
    HealthService,
    /// Sanitation complaints.
    Sanitation,
    /// Water-supply complaints.
    WaterSupply,
    /// Corruption complaints.
    Corruption,
    /// Anything else.
    Other,
}

impl ComplaintCategory {
    /// Returns the stable string label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::HealthService => "health_service",
            Self::Sanitation => "sanitation",
            Self::WaterSupply => "water_supply",
            Self::Corruption => "corruption",
            Self::Other => "other",
        }
    }

    /// Parses a stable category label.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "health_service" => Some(Self::HealthService),
            "sanitation" => Some(Self::Sanitation),
            "water_supply" => Some(Self::WaterSupply),
            "corruption" => Some(Self::Corruption),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

// ============================================================================
// SECTION: Status and Transitions
// ============================================================================

/// Complaint lifecycle status.
///
/// # Invariants
/// - Variants are stable for serialization; `closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplaintStatus {
    /// Draft, not yet submitted.
    Draft,
    /// Submitted, awaiting review.
    Submitted,
    /// Under review by an officer.
    UnderReview,
    /// Actively being worked.
    InProgress,
    /// Resolved, awaiting closure feedback.
    Resolved,
    /// Closed with feedback. Terminal.
    Closed,
    /// Escalated past its SLA deadline.
    Escalated,
}

impl ComplaintStatus {
    /// Returns the stable string label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Submitted => "submitted",
            Self::UnderReview => "under_review",
            Self::InProgress => "in_progress",
            Self::Resolved => "resolved",
            Self::Closed => "closed",
            Self::Escalated => "escalated",
        }
    }

    /// Returns true when the status ends SLA tracking.
    #[must_use]
    pub const fn is_settled(self) -> bool {
        matches!(self, Self::Resolved | Self::Closed)
    }

    /// Parses a stable status label.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "draft" => Some(Self::Draft),
            "submitted" => Some(Self::Submitted),
            "under_review" => Some(Self::UnderReview),
            "in_progress" => Some(Self::InProgress),
            "resolved" => Some(Self::Resolved),
            "closed" => Some(Self::Closed),
            "escalated" => Some(Self::Escalated),
            _ => None,
        }
    }
}

/// Returns true when `from → to` is a legal transition.
///
/// `escalated` may return to `under_review` or `in_progress` after
/// reassignment. Escalation itself is driven by the SLA scheduler, which may
/// escalate any unsettled, non-draft complaint.
#[must_use]
pub const fn can_transition(from: ComplaintStatus, to: ComplaintStatus) -> bool {
    matches!(
        (from, to),
        (ComplaintStatus::Draft, ComplaintStatus::Submitted)
            | (ComplaintStatus::Submitted, ComplaintStatus::UnderReview)
            | (ComplaintStatus::UnderReview, ComplaintStatus::InProgress)
            | (
                ComplaintStatus::Submitted | ComplaintStatus::UnderReview
                    | ComplaintStatus::InProgress,
                ComplaintStatus::Escalated
            )
            | (ComplaintStatus::InProgress, ComplaintStatus::Resolved)
            | (ComplaintStatus::Resolved, ComplaintStatus::Closed)
            | (
                ComplaintStatus::Escalated,
                ComplaintStatus::UnderReview | ComplaintStatus::InProgress
            )
    )
}

// ============================================================================
// SECTION: Escalation
// ============================================================================

/// Escalation ladder levels, ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationLevel {
    /// District authority.
    District,
    /// State authority.
    State,
    /// National authority.
    National,
}

impl EscalationLevel {
    /// Returns the stable string label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::District => "district",
            Self::State => "state",
            Self::National => "national",
        }
    }

    /// Returns the next level up the ladder, if any.
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::District => Some(Self::State),
            Self::State => Some(Self::National),
            Self::National => None,
        }
    }

    /// Parses a stable level label.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "district" => Some(Self::District),
            "state" => Some(Self::State),
            "national" => Some(Self::National),
            _ => None,
        }
    }
}

/// SLA durations per category and level, in milliseconds.
///
/// # Invariants
/// - Durations are positive; validation happens at config load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlaTable {
    /// Base duration per category, in milliseconds.
    base_millis: [(ComplaintCategory, i64); 5],
    /// Percentage of the base applied per level (district, state, national).
    level_percent: [u32; 3],
}

impl SlaTable {
    /// Builds an SLA table from per-category base durations and per-level
    /// percentages of the base.
    #[must_use]
    pub const fn new(base_millis: [(ComplaintCategory, i64); 5], level_percent: [u32; 3]) -> Self {
        Self {
            base_millis,
            level_percent,
        }
    }

    /// Returns the SLA duration for a category at an escalation level.
    #[must_use]
    pub fn duration_millis(&self, category: ComplaintCategory, level: EscalationLevel) -> i64 {
        let base = self
            .base_millis
            .iter()
            .find(|(entry, _)| *entry == category)
            .map_or(0, |(_, millis)| *millis);
        let percent = match level {
            EscalationLevel::District => self.level_percent[0],
            EscalationLevel::State => self.level_percent[1],
            EscalationLevel::National => self.level_percent[2],
        };
        let scaled = i128::from(base) * i128::from(percent) / 100;
        i64::try_from(scaled).unwrap_or(i64::MAX).max(0)
    }

    /// Returns the initial deadline for a newly submitted complaint.
    #[must_use]
    pub fn initial_deadline(&self, category: ComplaintCategory, created_at: Timestamp) -> Timestamp {
        created_at.saturating_add_millis(self.duration_millis(category, EscalationLevel::District))
    }
}

/// Outcome of one scheduler escalation step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EscalationOutcome {
    /// Escalated to `level` with a new deadline.
    Bumped {
        /// New escalation level.
        level: EscalationLevel,
        /// New SLA deadline.
        new_deadline: Timestamp,
    },
    /// Ladder exhausted at national level; no further bumps.
    Exhausted,
}

// ============================================================================
// SECTION: Complaint Record
// ============================================================================

/// Complaint domain record.
///
/// # Invariants
/// - `submitter_id` is `None` for anonymous complaints; anonymous requester
///   identity never reaches logs or audit entries.
/// - `closure_feedback` is non-empty whenever `status` is `closed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Complaint {
    /// Complaint identifier.
    pub id: ComplaintId,
    /// Submitter, absent for anonymous complaints.
    pub submitter_id: Option<UserId>,
    /// Complaint category.
    pub category: ComplaintCategory,
    /// Lifecycle status.
    pub status: ComplaintStatus,
    /// Creation time.
    pub created_at: Timestamp,
    /// Current SLA deadline.
    pub sla_deadline: Timestamp,
    /// Current escalation level.
    pub escalation_level: EscalationLevel,
    /// True once the ladder is exhausted at national level.
    pub escalation_exhausted: bool,
    /// Closure feedback, required to close.
    pub closure_feedback: Option<String>,
    /// Canonical closure hash, set on close.
    pub closure_hash: Option<HashDigest>,
}

/// Errors raised by complaint operations.
#[derive(Debug, Error)]
pub enum ComplaintError {
    /// Illegal state transition.
    #[error("illegal complaint transition: {from} -> {to}")]
    StateInvalid {
        /// Current status label.
        from: &'static str,
        /// Requested status label.
        to: &'static str,
    },
    /// Closure without feedback.
    #[error("closure requires non-empty feedback")]
    ClosureFeedbackRequired,
    /// Canonical hashing failed.
    #[error(transparent)]
    Hash(#[from] HashError),
}

/// Canonical preimage of a closure hash.
#[derive(Serialize)]
struct ClosurePreimage<'a> {
    /// Complaint category label.
    category: &'static str,
    /// Officer resolution note.
    resolution_note: &'a str,
    /// Submitter feedback.
    feedback: &'a str,
}

// ============================================================================
// SECTION: Anchor Hashes
// ============================================================================

/// Canonical preimage of a complaint anchor hash.
#[derive(Serialize)]
struct ComplaintHashPreimage<'a> {
    /// Complaint identifier.
    complaint_id: &'a str,
    /// Category label.
    category: &'static str,
    /// Creation time.
    created_at: Timestamp,
}

/// Canonical preimage of an SLA anchor hash.
#[derive(Serialize)]
struct SlaHashPreimage {
    /// Category label.
    category: &'static str,
    /// SLA deadline at anchor time.
    sla_deadline: Timestamp,
}

/// Canonical preimage of a status anchor hash.
#[derive(Serialize)]
struct StatusHashPreimage<'a> {
    /// Complaint identifier.
    complaint_id: &'a str,
    /// Status label.
    status: &'static str,
    /// Escalation level label.
    escalation_level: &'static str,
}

/// Computes the canonical complaint hash for anchoring.
///
/// The preimage carries only the complaint id, category, and creation time;
/// submitter identity and payload never reach the chain.
///
/// # Errors
///
/// Returns [`HashError`] when canonicalization fails.
pub fn complaint_anchor_hash(
    id: &ComplaintId,
    category: ComplaintCategory,
    created_at: Timestamp,
) -> Result<HashDigest, HashError> {
    hash_canonical_json(DEFAULT_HASH_ALGORITHM, &ComplaintHashPreimage {
        complaint_id: id.as_str(),
        category: category.as_str(),
        created_at,
    })
}

/// Computes the canonical SLA hash for anchoring.
///
/// # Errors
///
/// Returns [`HashError`] when canonicalization fails.
pub fn sla_anchor_hash(
    category: ComplaintCategory,
    sla_deadline: Timestamp,
) -> Result<HashDigest, HashError> {
    hash_canonical_json(DEFAULT_HASH_ALGORITHM, &SlaHashPreimage {
        category: category.as_str(),
        sla_deadline,
    })
}

/// Computes the canonical status hash for anchoring.
///
/// # Errors
///
/// Returns [`HashError`] when canonicalization fails.
pub fn status_anchor_hash(
    id: &ComplaintId,
    status: ComplaintStatus,
    escalation_level: EscalationLevel,
) -> Result<HashDigest, HashError> {
    hash_canonical_json(DEFAULT_HASH_ALGORITHM, &StatusHashPreimage {
        complaint_id: id.as_str(),
        status: status.as_str(),
        escalation_level: escalation_level.as_str(),
    })
}

impl Complaint {
    /// Applies a status transition.
    ///
    /// # Errors
    ///
    /// Returns [`ComplaintError::StateInvalid`] for illegal transitions and
    /// [`ComplaintError::ClosureFeedbackRequired`] when transitioning to
    /// `closed` directly (closure must go through [`Complaint::close`]).
    pub fn transition(&mut self, to: ComplaintStatus) -> Result<(), ComplaintError> {
        if to == ComplaintStatus::Closed {
            return Err(ComplaintError::ClosureFeedbackRequired);
        }
        if !can_transition(self.status, to) {
            return Err(ComplaintError::StateInvalid {
                from: self.status.as_str(),
                to: to.as_str(),
            });
        }
        self.status = to;
        Ok(())
    }

    /// Closes the complaint with feedback, computing the closure hash.
    ///
    /// # Errors
    ///
    /// Returns [`ComplaintError::ClosureFeedbackRequired`] for empty
    /// feedback, [`ComplaintError::StateInvalid`] unless the complaint is
    /// `resolved`, and [`ComplaintError::Hash`] when canonicalization fails.
    pub fn close(
        &mut self,
        resolution_note: &str,
        feedback: &str,
    ) -> Result<HashDigest, ComplaintError> {
        if feedback.trim().is_empty() {
            return Err(ComplaintError::ClosureFeedbackRequired);
        }
        if !can_transition(self.status, ComplaintStatus::Closed) {
            return Err(ComplaintError::StateInvalid {
                from: self.status.as_str(),
                to: ComplaintStatus::Closed.as_str(),
            });
        }
        let preimage = ClosurePreimage {
            category: self.category.as_str(),
            resolution_note,
            feedback,
        };
        let hash = hash_canonical_json(DEFAULT_HASH_ALGORITHM, &preimage)?;
        self.status = ComplaintStatus::Closed;
        self.closure_feedback = Some(feedback.to_string());
        self.closure_hash = Some(hash.clone());
        Ok(hash)
    }

    /// Runs one SLA escalation step at `now`.
    ///
    /// Returns `None` when the complaint is settled, not yet due, or already
    /// exhausted. Bumping moves the ladder one level up and resets the
    /// deadline from `now` using the bumped level's SLA duration.
    #[must_use]
    pub fn escalation_step(&mut self, now: Timestamp, sla: &SlaTable) -> Option<EscalationOutcome> {
        if self.status.is_settled()
            || self.status == ComplaintStatus::Draft
            || self.escalation_exhausted
            || now <= self.sla_deadline
        {
            return None;
        }
        match self.escalation_level.next() {
            Some(level) => {
                let new_deadline =
                    now.saturating_add_millis(sla.duration_millis(self.category, level));
                self.escalation_level = level;
                self.sla_deadline = new_deadline;
                self.status = ComplaintStatus::Escalated;
                Some(EscalationOutcome::Bumped {
                    level,
                    new_deadline,
                })
            }
            None => {
                self.escalation_exhausted = true;
                Some(EscalationOutcome::Exhausted)
            }
        }
    }
}
