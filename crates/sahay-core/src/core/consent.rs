// crates/sahay-core/src/core/consent.rs
// ============================================================================
// Module: SAHAY Consent Registry
// Description: Versioned, append-only consent grants with point-in-time reads.
// Purpose: Gate every read, write, and analytics emission on granted consent.
// Dependencies: crate::core::{identifiers, time}, serde
// ============================================================================

//! ## Overview
//! Consent is an append-only ledger: a change of mind is a new record, never
//! an update. The effective state for `(user, category, scope)` at time `T`
//! is the newest record with `granted_at <= T`, and only when that record
//! was given under the current consent-document version. A new document
//! version resets every grant to ungranted until re-consented.
//!
//! Enforcement reads committed state on every check; callers must not cache
//! a grant across a boundary that could outlive a concurrent revoke.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::core::identifiers::UserId;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Categories and Scopes
// ============================================================================

/// Consent categories recognized by SAHAY.
///
/// # Invariants
/// - Variants are stable for serialization and ledger queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentCategory {
    /// Symptom and wellness tracking.
    Tracking,
    /// Cloud synchronization of device data.
    CloudSync,
    /// Neuro-screening records.
    Neuro,
    /// Complaint submission and follow-up.
    Complaints,
    /// De-identified analytics emission.
    Analytics,
}

impl ConsentCategory {
    /// Returns the stable string label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tracking => "tracking",
            Self::CloudSync => "cloud_sync",
            Self::Neuro => "neuro",
            Self::Complaints => "complaints",
            Self::Analytics => "analytics",
        }
    }

    /// Parses a stable category label.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "tracking" => Some(Self::Tracking),
            "cloud_sync" => Some(Self::CloudSync),
            "neuro" => Some(Self::Neuro),
            "complaints" => Some(Self::Complaints),
            "analytics" => Some(Self::Analytics),
            _ => None,
        }
    }
}

/// Consent scopes describing who may act on the data.
///
/// # Invariants
/// - Variants are stable for serialization and ledger queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentScope {
    /// Accredited social health activist access.
    Asha,
    /// Clinician access.
    Clinician,
    /// Government aggregated (de-identified) use.
    GovAggregated,
}

impl ConsentScope {
    /// Returns the stable string label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Asha => "asha",
            Self::Clinician => "clinician",
            Self::GovAggregated => "gov_aggregated",
        }
    }

    /// Parses a stable scope label.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "asha" => Some(Self::Asha),
            "clinician" => Some(Self::Clinician),
            "gov_aggregated" => Some(Self::GovAggregated),
            _ => None,
        }
    }
}

// ============================================================================
// SECTION: Consent Records
// ============================================================================

/// Append-only consent record.
///
/// # Invariants
/// - Records are never updated; a change appends a new record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentRecord {
    /// Owning user.
    pub user_id: UserId,
    /// Consent category.
    pub category: ConsentCategory,
    /// Consent scope.
    pub scope: ConsentScope,
    /// Consent-document version the user acknowledged.
    pub version: u32,
    /// Whether consent was granted or withdrawn.
    pub granted: bool,
    /// Time the record was made.
    pub granted_at: Timestamp,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised by consent enforcement.
#[derive(Debug, Error)]
pub enum ConsentError {
    /// Required consent is not granted.
    #[error("consent missing: {category}/{scope}")]
    Missing {
        /// Category that was required.
        category: &'static str,
        /// Scope that was required.
        scope: &'static str,
    },
}

/// Fails closed when `granted` is false.
///
/// # Errors
///
/// Returns [`ConsentError::Missing`] when consent is not granted.
pub fn require(
    granted: bool,
    category: ConsentCategory,
    scope: ConsentScope,
) -> Result<(), ConsentError> {
    if granted {
        Ok(())
    } else {
        Err(ConsentError::Missing {
            category: category.as_str(),
            scope: scope.as_str(),
        })
    }
}

// ============================================================================
// SECTION: Consent Ledger
// ============================================================================

/// In-memory view of a user's consent history used for point-in-time reads.
///
/// Durable stores answer the same query in SQL; this type is the reference
/// semantics both must agree on.
#[derive(Debug, Clone, Default)]
pub struct ConsentLedger {
    /// Append-only records in insertion order.
    records: Vec<ConsentRecord>,
}

impl ConsentLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            records: Vec::new(),
        }
    }

    /// Appends a consent record.
    pub fn append(&mut self, record: ConsentRecord) {
        self.records.push(record);
    }

    /// Returns the records in insertion order.
    #[must_use]
    pub fn records(&self) -> &[ConsentRecord] {
        &self.records
    }

    /// Returns whether consent is granted for `(user, category, scope)` at
    /// `at` under `document_version`.
    ///
    /// The newest record with `granted_at <= at` wins. Ties on `granted_at`
    /// resolve to the later appended record. A winning record made under an
    /// older document version counts as ungranted.
    #[must_use]
    pub fn is_granted(
        &self,
        user_id: &UserId,
        category: ConsentCategory,
        scope: ConsentScope,
        document_version: u32,
        at: Timestamp,
    ) -> bool {
        let mut winner: Option<&ConsentRecord> = None;
        for record in &self.records {
            if record.user_id != *user_id
                || record.category != category
                || record.scope != scope
                || record.granted_at > at
            {
                continue;
            }
            let newer = winner.is_none_or(|current| record.granted_at >= current.granted_at);
            if newer {
                winner = Some(record);
            }
        }
        winner.is_some_and(|record| record.granted && record.version >= document_version)
    }
}
