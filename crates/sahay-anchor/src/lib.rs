// crates/sahay-anchor/src/lib.rs
// ============================================================================
// Module: SAHAY Anchor Library
// Description: Client for the external complaint-anchor contract.
// Purpose: Submit 32-byte hash anchors with strictly increasing nonces and
// degrade gracefully when the chain is unavailable.
// Dependencies: sahay-core, serde_json
// ============================================================================

//! ## Overview
//! `sahay-anchor` wraps the [`sahay_core::AnchorContract`] seam with the
//! full submission policy: timestamp windows, a de-identification
//! guard over every canonicalized payload, `InvalidNonce` recovery from the
//! on-chain nonce, and bounded exponential backoff that turns chain outages
//! into requeues instead of failures. The off-chain workflow never blocks on
//! the chain.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod client;
pub mod contract;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use client::AnchorClient;
pub use client::AnchorSubmitError;
pub use client::BackoffPolicy;
pub use client::SubmitOutcome;
pub use client::TimestampWindow;
pub use contract::InMemoryAnchorContract;
