// crates/sahay-core/src/interfaces/mod.rs
// ============================================================================
// Module: SAHAY Interfaces
// Description: Backend-agnostic interfaces for time, anchoring, and storage.
// Purpose: Define the contract surfaces between the core and its hosts.
// Dependencies: crate::core, serde, thiserror
// ============================================================================

//! ## Overview
//! Interfaces define how the core integrates with external systems without
//! embedding backend details: the wall clock, the anchor contract on the
//! external chain, the optional triage classifier, and the shared store
//! error taxonomy. Implementations must be deterministic where the core is
//! deterministic and fail closed on missing or invalid data.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Mutex;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::core::hashing::AnchorHash;
use crate::core::time::Timestamp;
use crate::core::triage::TriageCategory;
use crate::core::triage::TriageInput;

// ============================================================================
// SECTION: Clock
// ============================================================================

/// Wall-clock seam. The core never reads time directly; hosts inject it.
pub trait Clock: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> Timestamp;
}

/// Manually advanced clock for tests and replay.
#[derive(Debug, Default)]
pub struct ManualClock {
    /// Current time in unix milliseconds.
    now_millis: Mutex<i64>,
}

impl ManualClock {
    /// Creates a manual clock at `start`.
    #[must_use]
    pub fn new(start: Timestamp) -> Self {
        Self {
            now_millis: Mutex::new(start.as_unix_millis()),
        }
    }

    /// Advances the clock by `millis`.
    pub fn advance_millis(&self, millis: i64) {
        if let Ok(mut now) = self.now_millis.lock() {
            *now = now.saturating_add(millis);
        }
    }

    /// Sets the clock to an absolute time.
    pub fn set(&self, at: Timestamp) {
        if let Ok(mut now) = self.now_millis.lock() {
            *now = at.as_unix_millis();
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        let millis = self.now_millis.lock().map_or(0, |now| *now);
        Timestamp::from_unix_millis(millis)
    }
}

// ============================================================================
// SECTION: Triage Classifier
// ============================================================================

/// Optional classifier consulted when no red flag matched.
///
/// Implementations are replaceable summarizers (an LLM, a lookup table).
/// The engine only honors `self_care` and `phc` outputs; it can never be
/// used to reach `emergency` without a red flag, nor to suppress one.
pub trait TriageClassifier: Send + Sync {
    /// Classifies a no-flag triage input, or abstains with `None`.
    fn classify(&self, input: &TriageInput) -> Option<TriageCategory>;
}

// ============================================================================
// SECTION: Store Errors
// ============================================================================

/// Shared store error taxonomy.
///
/// # Invariants
/// - Variants are stable for programmatic handling and HTTP mapping.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Store I/O error.
    #[error("store io error: {0}")]
    Io(String),
    /// Store data is corrupted or fails integrity checks.
    #[error("store corruption: {0}")]
    Corrupt(String),
    /// Store schema version is incompatible.
    #[error("store version mismatch: {0}")]
    VersionMismatch(String),
    /// Input or stored data is invalid.
    #[error("store invalid data: {0}")]
    Invalid(String),
    /// Requested record does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// Requested record was erased under right-to-erasure.
    #[error("gone: {0}")]
    Gone(String),
    /// Write conflicts with existing state.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Illegal state transition.
    #[error("state invalid: {0}")]
    StateInvalid(String),
    /// Transient failure; the operation may be retried.
    #[error("transient store error: {0}")]
    Transient(String),
    /// Audit chain failed verification.
    #[error("audit chain broken at seq {0}")]
    ChainBroken(u64),
}

// ============================================================================
// SECTION: Anchor Contract
// ============================================================================

/// Errors surfaced by the external anchor contract.
///
/// # Invariants
/// - Variants are stable for programmatic handling; `InvalidNonce` carries
///   the authoritative on-chain nonce for recovery.
#[derive(Debug, Error)]
pub enum AnchorChainError {
    /// Submitted nonce was not strictly greater than the on-chain nonce.
    #[error("invalid nonce: on-chain nonce is {onchain}")]
    InvalidNonce {
        /// Current nonce recorded on chain.
        onchain: u64,
    },
    /// Chain endpoint is unreachable; submissions must be requeued.
    #[error("chain unavailable: {0}")]
    Unavailable(String),
    /// Chain rejected the submission for a non-retryable reason.
    #[error("chain rejected submission: {0}")]
    Rejected(String),
}

/// Request to create a complaint anchor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateAnchorRequest {
    /// Canonical complaint hash.
    pub complaint_hash: AnchorHash,
    /// Canonical SLA hash.
    pub sla_hash: AnchorHash,
    /// Canonical status hash.
    pub status_hash: AnchorHash,
    /// Anchor creation time.
    pub created_at: Timestamp,
    /// Submission nonce; strictly increasing per complaint.
    pub nonce: u64,
}

/// Request to update a complaint anchor's status hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateStatusRequest {
    /// Canonical complaint hash identifying the anchor.
    pub complaint_hash: AnchorHash,
    /// New canonical status hash.
    pub status_hash: AnchorHash,
    /// Update time; must not precede the anchor's creation time.
    pub updated_at: Timestamp,
    /// Submission nonce; strictly increasing per complaint.
    pub nonce: u64,
}

/// Event emitted by the anchor contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnchorEvent {
    /// A complaint anchor was created.
    ComplaintAnchored,
    /// An anchor's status hash was updated.
    StatusUpdated,
}

/// Receipt returned for an accepted submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorReceipt {
    /// Event the chain emitted.
    pub event: AnchorEvent,
    /// Nonce the chain recorded.
    pub nonce: u64,
}

/// External anchor contract interface.
///
/// Hashes are 32 bytes and carry no PII; callers must run the
/// de-identification guard before building requests.
pub trait AnchorContract: Send + Sync {
    /// Creates a complaint anchor.
    ///
    /// # Errors
    ///
    /// Returns [`AnchorChainError`] when the chain rejects the submission
    /// or is unavailable.
    fn create_anchor(&self, request: &CreateAnchorRequest)
    -> Result<AnchorReceipt, AnchorChainError>;

    /// Updates a complaint anchor's status hash.
    ///
    /// # Errors
    ///
    /// Returns [`AnchorChainError`] when the chain rejects the submission
    /// or is unavailable.
    fn update_status(&self, request: &UpdateStatusRequest)
    -> Result<AnchorReceipt, AnchorChainError>;

    /// Reads the current on-chain nonce for a complaint anchor.
    ///
    /// Used for crash-clean recovery after `InvalidNonce`; implementations
    /// must read chain state, not a local cache.
    ///
    /// # Errors
    ///
    /// Returns [`AnchorChainError`] when the chain is unavailable.
    fn current_nonce(&self, complaint_hash: &AnchorHash) -> Result<u64, AnchorChainError>;
}

impl<C: AnchorContract + ?Sized> AnchorContract for std::sync::Arc<C> {
    fn create_anchor(
        &self,
        request: &CreateAnchorRequest,
    ) -> Result<AnchorReceipt, AnchorChainError> {
        (**self).create_anchor(request)
    }

    fn update_status(
        &self,
        request: &UpdateStatusRequest,
    ) -> Result<AnchorReceipt, AnchorChainError> {
        (**self).update_status(request)
    }

    fn current_nonce(&self, complaint_hash: &AnchorHash) -> Result<u64, AnchorChainError> {
        (**self).current_nonce(complaint_hash)
    }
}
