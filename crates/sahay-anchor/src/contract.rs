// crates/sahay-anchor/src/contract.rs
// ============================================================================
// Module: In-Memory Anchor Contract
// Description: Reference AnchorContract with on-chain semantics.
// Purpose: Back tests and degraded deployments with a contract that
// enforces strictly increasing nonces and emits events.
// Dependencies: sahay-core
// ============================================================================

//! ## Overview
//! The in-memory contract mirrors the wire behavior of the external EVM
//! contract: `createComplaintAnchor` and `updateStatusAnchor` accept only
//! strictly increasing nonces, reject updates that precede creation, and
//! emit `ComplaintAnchored`/`StatusUpdated` events. Tests can script
//! outages to exercise the requeue path. The real chain node stays outside
//! this workspace; production deployments implement [`AnchorContract`]
//! against it behind the same seam.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;

use sahay_core::AnchorChainError;
use sahay_core::AnchorContract;
use sahay_core::AnchorEvent;
use sahay_core::AnchorHash;
use sahay_core::AnchorReceipt;
use sahay_core::CreateAnchorRequest;
use sahay_core::Timestamp;
use sahay_core::UpdateStatusRequest;

// ============================================================================
// SECTION: State
// ============================================================================

/// On-chain state for one complaint anchor.
#[derive(Debug, Clone)]
struct AnchorState {
    /// Latest status hash.
    status_hash: AnchorHash,
    /// Creation time.
    created_at: Timestamp,
    /// Latest update time.
    updated_at: Timestamp,
    /// Latest recorded nonce.
    nonce: u64,
}

/// Emitted event record: event, complaint hash, nonce.
pub type EmittedEvent = (AnchorEvent, String, u64);

/// In-memory anchor contract with scriptable outages.
#[derive(Debug, Default)]
pub struct InMemoryAnchorContract {
    /// Anchors by complaint hash (hex form).
    anchors: Mutex<HashMap<String, AnchorState>>,
    /// Emitted events in order.
    events: Mutex<Vec<EmittedEvent>>,
    /// Remaining calls that fail with `Unavailable`.
    outage_calls: AtomicU32,
}

impl InMemoryAnchorContract {
    /// Creates an empty contract.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `calls` contract calls fail with `Unavailable`.
    pub fn fail_next(&self, calls: u32) {
        self.outage_calls.store(calls, Ordering::SeqCst);
    }

    /// Returns the events emitted so far.
    ///
    /// # Panics
    ///
    /// Never panics; a poisoned lock yields an empty list.
    #[must_use]
    pub fn emitted_events(&self) -> Vec<EmittedEvent> {
        self.events.lock().map(|events| events.clone()).unwrap_or_default()
    }

    /// Returns the anchored `(status_hash, updated_at, nonce)` for a
    /// complaint, when one exists.
    #[must_use]
    pub fn anchored_status(
        &self,
        complaint_hash: &AnchorHash,
    ) -> Option<(AnchorHash, Timestamp, u64)> {
        let anchors = self.anchors.lock().ok()?;
        anchors
            .get(&complaint_hash.to_hex())
            .map(|state| (state.status_hash, state.updated_at, state.nonce))
    }

    /// Consumes one outage call if scripted.
    fn check_outage(&self) -> Result<(), AnchorChainError> {
        let remaining = self.outage_calls.load(Ordering::SeqCst);
        if remaining > 0 {
            self.outage_calls.store(remaining - 1, Ordering::SeqCst);
            return Err(AnchorChainError::Unavailable("scripted outage".to_string()));
        }
        Ok(())
    }

    /// Locks the anchor map, failing closed on poisoning.
    fn anchors(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, AnchorState>>, AnchorChainError> {
        self.anchors
            .lock()
            .map_err(|_| AnchorChainError::Unavailable("contract lock poisoned".to_string()))
    }

    /// Records an emitted event.
    fn emit(&self, event: AnchorEvent, complaint_hash: &AnchorHash, nonce: u64) {
        if let Ok(mut events) = self.events.lock() {
            events.push((event, complaint_hash.to_hex(), nonce));
        }
    }
}

// ============================================================================
// SECTION: Contract Implementation
// ============================================================================

impl AnchorContract for InMemoryAnchorContract {
    fn create_anchor(
        &self,
        request: &CreateAnchorRequest,
    ) -> Result<AnchorReceipt, AnchorChainError> {
        self.check_outage()?;
        let mut anchors = self.anchors()?;
        let key = request.complaint_hash.to_hex();
        if let Some(existing) = anchors.get(&key) {
            if request.nonce <= existing.nonce {
                return Err(AnchorChainError::InvalidNonce {
                    onchain: existing.nonce,
                });
            }
            return Err(AnchorChainError::Rejected("anchor already exists".to_string()));
        }
        if request.nonce == 0 {
            return Err(AnchorChainError::InvalidNonce {
                onchain: 0,
            });
        }
        anchors.insert(key, AnchorState {
            status_hash: request.status_hash,
            created_at: request.created_at,
            updated_at: request.created_at,
            nonce: request.nonce,
        });
        drop(anchors);
        self.emit(AnchorEvent::ComplaintAnchored, &request.complaint_hash, request.nonce);
        Ok(AnchorReceipt {
            event: AnchorEvent::ComplaintAnchored,
            nonce: request.nonce,
        })
    }

    fn update_status(
        &self,
        request: &UpdateStatusRequest,
    ) -> Result<AnchorReceipt, AnchorChainError> {
        self.check_outage()?;
        let mut anchors = self.anchors()?;
        let key = request.complaint_hash.to_hex();
        let Some(state) = anchors.get_mut(&key) else {
            return Err(AnchorChainError::Rejected("unknown anchor".to_string()));
        };
        if request.nonce <= state.nonce {
            return Err(AnchorChainError::InvalidNonce {
                onchain: state.nonce,
            });
        }
        if request.updated_at < state.created_at {
            return Err(AnchorChainError::Rejected("update precedes creation".to_string()));
        }
        state.status_hash = request.status_hash;
        state.updated_at = request.updated_at;
        state.nonce = request.nonce;
        drop(anchors);
        self.emit(AnchorEvent::StatusUpdated, &request.complaint_hash, request.nonce);
        Ok(AnchorReceipt {
            event: AnchorEvent::StatusUpdated,
            nonce: request.nonce,
        })
    }

    fn current_nonce(&self, complaint_hash: &AnchorHash) -> Result<u64, AnchorChainError> {
        self.check_outage()?;
        let anchors = self.anchors()?;
        Ok(anchors.get(&complaint_hash.to_hex()).map_or(0, |state| state.nonce))
    }
}
