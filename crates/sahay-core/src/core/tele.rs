// crates/sahay-core/src/core/tele.rs
// ============================================================================
// Module: SAHAY Teleconsultation Rules
// Description: Teleconsultation request lifecycle and prescription limits.
// Purpose: Keep tele-request transitions legal and prescription summaries
// within the contract length.
// Dependencies: serde, thiserror
// ============================================================================

//! ## Overview
//! Teleconsultation requests move `requested → scheduled → in_progress →
//! completed`, forward only. Prescription summaries are bounded to 160-300
//! characters so downstream SMS and print surfaces never truncate them.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Minimum prescription summary length, in characters.
pub const SUMMARY_MIN_CHARS: usize = 160;
/// Maximum prescription summary length, in characters.
pub const SUMMARY_MAX_CHARS: usize = 300;

// ============================================================================
// SECTION: Status
// ============================================================================

/// Teleconsultation request status.
///
/// # Invariants
/// - Variants are stable for serialization; transitions are forward-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeleStatus {
    /// Requested by a citizen.
    Requested,
    /// Scheduled with a clinician.
    Scheduled,
    /// Consultation in progress.
    InProgress,
    /// Consultation completed. Terminal.
    Completed,
}

impl TeleStatus {
    /// Returns the stable string label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::Scheduled => "scheduled",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }

    /// Parses a stable status label.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "requested" => Some(Self::Requested),
            "scheduled" => Some(Self::Scheduled),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

/// Returns true when `from → to` is a legal tele-request transition.
#[must_use]
pub const fn can_transition(from: TeleStatus, to: TeleStatus) -> bool {
    matches!(
        (from, to),
        (TeleStatus::Requested, TeleStatus::Scheduled)
            | (TeleStatus::Scheduled, TeleStatus::InProgress)
            | (TeleStatus::InProgress, TeleStatus::Completed)
    )
}

// ============================================================================
// SECTION: Prescription Validation
// ============================================================================

/// Errors raised by teleconsultation rules.
#[derive(Debug, Error)]
pub enum TeleError {
    /// Illegal tele-request transition.
    #[error("illegal tele request transition: {from} -> {to}")]
    StateInvalid {
        /// Current status label.
        from: &'static str,
        /// Requested status label.
        to: &'static str,
    },
    /// Prescription summary is outside the length contract.
    #[error("prescription summary must be {SUMMARY_MIN_CHARS}-{SUMMARY_MAX_CHARS} chars, got {0}")]
    SummaryLength(usize),
}

/// Validates a prescription summary length (in characters, not bytes).
///
/// # Errors
///
/// Returns [`TeleError::SummaryLength`] when outside 160-300 characters.
pub fn validate_summary(summary: &str) -> Result<(), TeleError> {
    let chars = summary.chars().count();
    if (SUMMARY_MIN_CHARS..=SUMMARY_MAX_CHARS).contains(&chars) {
        Ok(())
    } else {
        Err(TeleError::SummaryLength(chars))
    }
}
