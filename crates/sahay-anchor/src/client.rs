// crates/sahay-anchor/src/client.rs
// ============================================================================
// Module: Anchor Client
// Description: Submission policy over the anchor contract seam.
// Purpose: Enforce timestamp windows, payload hygiene, nonce recovery, and
// backoff-driven requeues.
// Dependencies: sahay-core, serde_json
// ============================================================================

//! ## Overview
//! The client validates every submission before it reaches the chain:
//! `created_at` must fall inside the configured window, `updated_at` must
//! not precede the anchor's creation, and the canonicalized payload must
//! contain no identifying keys. `InvalidNonce` responses recover by reading
//! the authoritative on-chain nonce (never a local cache) and retrying once
//! with `onchain + 1`. Chain unavailability produces a requeue with a
//! backoff delay; it is never an error for the off-chain workflow.

// ============================================================================
// SECTION: Imports
// ============================================================================

use sahay_core::AnchorChainError;
use sahay_core::AnchorContract;
use sahay_core::AnchorReceipt;
use sahay_core::CreateAnchorRequest;
use sahay_core::Timestamp;
use sahay_core::UpdateStatusRequest;
use sahay_core::core::analytics::validate_payload_keys;
use sahay_core::core::time::MILLIS_PER_DAY;
use sahay_core::core::time::MILLIS_PER_HOUR;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Backoff Policy
// ============================================================================

/// Bounded exponential backoff: `base * 2^attempt`, capped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Base delay in milliseconds.
    pub base_ms: u64,
    /// Delay cap in milliseconds.
    pub cap_ms: u64,
    /// Attempts before a job is parked back in the queue.
    pub max_attempts: u32,
}

impl BackoffPolicy {
    /// Returns the delay before retry number `attempt` (0-based).
    #[must_use]
    pub fn delay_ms(&self, attempt: u32) -> u64 {
        let shift = attempt.min(63);
        let factor = 1_u64.checked_shl(shift).unwrap_or(u64::MAX);
        self.base_ms.saturating_mul(factor).min(self.cap_ms)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_ms: 1_000,
            cap_ms: 60_000,
            max_attempts: 6,
        }
    }
}

// ============================================================================
// SECTION: Timestamp Window
// ============================================================================

/// Accepted timestamp window for anchor submissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimestampWindow {
    /// Maximum accepted age of `created_at`, in milliseconds.
    pub max_age_ms: i64,
    /// Maximum accepted forward skew of `created_at`, in milliseconds.
    pub max_skew_ms: i64,
}

impl Default for TimestampWindow {
    fn default() -> Self {
        Self {
            max_age_ms: 30 * MILLIS_PER_DAY,
            max_skew_ms: MILLIS_PER_HOUR,
        }
    }
}

impl TimestampWindow {
    /// Returns true when `created_at` is inside `[now - max_age, now + max_skew]`.
    #[must_use]
    pub fn accepts(&self, created_at: Timestamp, now: Timestamp) -> bool {
        let lower = now.saturating_add_millis(-self.max_age_ms);
        let upper = now.saturating_add_millis(self.max_skew_ms);
        created_at >= lower && created_at <= upper
    }
}

// ============================================================================
// SECTION: Errors and Outcomes
// ============================================================================

/// Permanent submission errors. Requeues are not errors; see
/// [`SubmitOutcome::Requeue`].
#[derive(Debug, Error)]
pub enum AnchorSubmitError {
    /// Timestamp outside the accepted window.
    #[error("anchor timestamp outside accepted window")]
    InvalidTimestamp,
    /// `updated_at` precedes the anchor's creation time.
    #[error("anchor update time precedes creation time")]
    UpdateBeforeCreate,
    /// Canonicalized payload contains an identifying key.
    #[error("anchor payload rejected: {0}")]
    PayloadRejected(String),
    /// Chain rejected the submission for a non-retryable reason.
    #[error("anchor rejected by chain: {0}")]
    Rejected(String),
}

/// Result of one submission attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The chain accepted the submission.
    Accepted {
        /// Receipt returned by the chain.
        receipt: AnchorReceipt,
    },
    /// The chain is unavailable; the job stays queued.
    Requeue {
        /// Why the submission is requeued.
        reason: String,
        /// Backoff delay before the next attempt.
        retry_after_ms: u64,
    },
}

// ============================================================================
// SECTION: Client
// ============================================================================

/// Anchor client enforcing the submission policy over a contract backend.
pub struct AnchorClient<C> {
    /// Contract backend.
    contract: C,
    /// Backoff policy for unavailable-chain requeues.
    policy: BackoffPolicy,
    /// Accepted timestamp window.
    window: TimestampWindow,
}

impl<C: AnchorContract> AnchorClient<C> {
    /// Creates a client over a contract backend.
    #[must_use]
    pub const fn new(contract: C, policy: BackoffPolicy, window: TimestampWindow) -> Self {
        Self {
            contract,
            policy,
            window,
        }
    }

    /// Returns the contract backend.
    pub const fn contract(&self) -> &C {
        &self.contract
    }

    /// Submits a create-anchor request.
    ///
    /// # Errors
    ///
    /// Returns [`AnchorSubmitError`] for permanent failures: invalid
    /// timestamps, identifying payload keys, or a chain rejection.
    pub fn submit_create(
        &self,
        request: &CreateAnchorRequest,
        now: Timestamp,
        attempt: u32,
    ) -> Result<SubmitOutcome, AnchorSubmitError> {
        if !self.window.accepts(request.created_at, now) {
            return Err(AnchorSubmitError::InvalidTimestamp);
        }
        guard_payload(request)?;
        let mut active = request.clone();
        let complaint_hash = request.complaint_hash;
        self.dispatch(&complaint_hash, attempt, |nonce| {
            if let Some(nonce) = nonce {
                active.nonce = nonce;
            }
            self.contract.create_anchor(&active)
        })
    }

    /// Submits a status-update request for an anchor created at
    /// `anchor_created_at`.
    ///
    /// # Errors
    ///
    /// Returns [`AnchorSubmitError`] for permanent failures: update time
    /// before creation, identifying payload keys, or a chain rejection.
    pub fn submit_update(
        &self,
        request: &UpdateStatusRequest,
        anchor_created_at: Timestamp,
        attempt: u32,
    ) -> Result<SubmitOutcome, AnchorSubmitError> {
        if request.updated_at < anchor_created_at {
            return Err(AnchorSubmitError::UpdateBeforeCreate);
        }
        guard_payload(request)?;
        let mut active = request.clone();
        let complaint_hash = request.complaint_hash;
        self.dispatch(&complaint_hash, attempt, |nonce| {
            if let Some(nonce) = nonce {
                active.nonce = nonce;
            }
            self.contract.update_status(&active)
        })
    }

    /// Runs one submission with nonce recovery and requeue classification.
    fn dispatch<F>(
        &self,
        complaint_hash: &sahay_core::AnchorHash,
        attempt: u32,
        mut call: F,
    ) -> Result<SubmitOutcome, AnchorSubmitError>
    where
        F: FnMut(Option<u64>) -> Result<AnchorReceipt, AnchorChainError>,
    {
        match call(None) {
            Ok(receipt) => Ok(SubmitOutcome::Accepted {
                receipt,
            }),
            Err(AnchorChainError::InvalidNonce {
                ..
            }) => {
                // Recover from the authoritative on-chain nonce, not a local
                // cache, so submitters converge after a crash.
                let onchain = match self.contract.current_nonce(complaint_hash) {
                    Ok(nonce) => nonce,
                    Err(AnchorChainError::Unavailable(reason)) => {
                        return Ok(self.requeue(attempt, reason));
                    }
                    Err(other) => return Err(map_permanent(other)),
                };
                match call(Some(onchain + 1)) {
                    Ok(receipt) => Ok(SubmitOutcome::Accepted {
                        receipt,
                    }),
                    Err(AnchorChainError::InvalidNonce {
                        ..
                    }) => Err(AnchorSubmitError::Rejected("nonce recovery failed".to_string())),
                    Err(AnchorChainError::Unavailable(reason)) => Ok(self.requeue(attempt, reason)),
                    Err(AnchorChainError::Rejected(reason)) => {
                        Err(AnchorSubmitError::Rejected(reason))
                    }
                }
            }
            Err(AnchorChainError::Unavailable(reason)) => Ok(self.requeue(attempt, reason)),
            Err(AnchorChainError::Rejected(reason)) => Err(AnchorSubmitError::Rejected(reason)),
        }
    }

    /// Builds a requeue outcome with the policy's backoff delay.
    fn requeue(&self, attempt: u32, reason: String) -> SubmitOutcome {
        SubmitOutcome::Requeue {
            reason,
            retry_after_ms: self.policy.delay_ms(attempt),
        }
    }
}

// ============================================================================
// SECTION: Payload Guard
// ============================================================================

/// Rejects any payload whose canonical form carries an identifying key.
fn guard_payload<T: Serialize>(payload: &T) -> Result<(), AnchorSubmitError> {
    let value = serde_json::to_value(payload)
        .map_err(|err| AnchorSubmitError::PayloadRejected(err.to_string()))?;
    validate_payload_keys(&value)
        .map_err(|err| AnchorSubmitError::PayloadRejected(err.to_string()))
}

/// Maps chain errors that can only be permanent at this point.
fn map_permanent(err: AnchorChainError) -> AnchorSubmitError {
    AnchorSubmitError::Rejected(err.to_string())
}
