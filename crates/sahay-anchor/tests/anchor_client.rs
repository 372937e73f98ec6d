// crates/sahay-anchor/tests/anchor_client.rs
// ============================================================================
// Module: Anchor Client Tests
// Description: Nonce monotonicity, recovery, backoff, and payload hygiene.
// ============================================================================
//! ## Overview
//! Verifies that replayed nonces fail without mutating chain state, invalid
//! nonces recover from the on-chain value, outages requeue with exponential
//! backoff, and timestamp windows are enforced.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

use sahay_anchor::AnchorClient;
use sahay_anchor::AnchorSubmitError;
use sahay_anchor::BackoffPolicy;
use sahay_anchor::InMemoryAnchorContract;
use sahay_anchor::SubmitOutcome;
use sahay_anchor::TimestampWindow;
use sahay_core::AnchorContract;
use sahay_core::AnchorEvent;
use sahay_core::AnchorHash;
use sahay_core::CreateAnchorRequest;
use sahay_core::HashAlgorithm;
use sahay_core::Timestamp;
use sahay_core::UpdateStatusRequest;
use sahay_core::core::hashing::hash_bytes;
use sahay_core::core::time::MILLIS_PER_DAY;

fn anchor_hash(seed: &str) -> AnchorHash {
    AnchorHash::from_digest(&hash_bytes(HashAlgorithm::Sha256, seed.as_bytes())).expect("hash")
}

fn client() -> AnchorClient<InMemoryAnchorContract> {
    AnchorClient::new(
        InMemoryAnchorContract::new(),
        BackoffPolicy::default(),
        TimestampWindow::default(),
    )
}

fn create_request(nonce: u64) -> CreateAnchorRequest {
    CreateAnchorRequest {
        complaint_hash: anchor_hash("complaint-1"),
        sla_hash: anchor_hash("sla-1"),
        status_hash: anchor_hash("status-1"),
        created_at: Timestamp::from_unix_millis(1_000),
        nonce,
    }
}

fn update_request(nonce: u64) -> UpdateStatusRequest {
    UpdateStatusRequest {
        complaint_hash: anchor_hash("complaint-1"),
        status_hash: anchor_hash("status-2"),
        updated_at: Timestamp::from_unix_millis(2_000),
        nonce,
    }
}

fn now() -> Timestamp {
    Timestamp::from_unix_millis(10_000)
}

#[test]
fn create_then_update_emits_both_events() {
    let client = client();
    let created = client.submit_create(&create_request(1), now(), 0).expect("create");
    assert!(matches!(created, SubmitOutcome::Accepted { .. }));

    let updated = client
        .submit_update(&update_request(2), Timestamp::from_unix_millis(1_000), 0)
        .expect("update");
    let SubmitOutcome::Accepted {
        receipt,
    } = updated
    else {
        panic!("expected accept");
    };
    assert_eq!(receipt.event, AnchorEvent::StatusUpdated);
    assert_eq!(receipt.nonce, 2);

    let events = client.contract().emitted_events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].0, AnchorEvent::ComplaintAnchored);
    assert_eq!(events[1].0, AnchorEvent::StatusUpdated);

    let (status_hash, updated_at, nonce) = client
        .contract()
        .anchored_status(&anchor_hash("complaint-1"))
        .expect("anchored");
    assert_eq!(status_hash, anchor_hash("status-2"));
    assert_eq!(updated_at, Timestamp::from_unix_millis(2_000));
    assert_eq!(nonce, 2);
}

#[test]
fn replayed_nonce_fails_without_mutating_state() {
    let client = client();
    client.submit_create(&create_request(1), now(), 0).expect("create");
    client
        .submit_update(&update_request(2), Timestamp::from_unix_millis(1_000), 0)
        .expect("update");

    // Re-submitting with an equal nonce recovers to onchain+1 per policy; the
    // raw contract call itself must reject it first.
    let err = client.contract().update_status(&update_request(2)).unwrap_err();
    assert!(matches!(err, sahay_core::AnchorChainError::InvalidNonce { onchain: 2 }));
    assert_eq!(client.contract().current_nonce(&anchor_hash("complaint-1")).expect("nonce"), 2);
}

#[test]
fn invalid_nonce_recovers_from_the_onchain_value() {
    let client = client();
    client.submit_create(&create_request(1), now(), 0).expect("create");
    client
        .submit_update(&update_request(2), Timestamp::from_unix_millis(1_000), 0)
        .expect("update");

    // A stale submitter retries with nonce 2; the client recovers to 3.
    let outcome = client
        .submit_update(&update_request(2), Timestamp::from_unix_millis(1_000), 0)
        .expect("recovered");
    let SubmitOutcome::Accepted {
        receipt,
    } = outcome
    else {
        panic!("expected recovery");
    };
    assert_eq!(receipt.nonce, 3);
}

#[test]
fn outage_requeues_with_exponential_backoff() {
    let client = client();
    client.contract().fail_next(1);

    let outcome = client.submit_create(&create_request(1), now(), 3).expect("requeue");
    let SubmitOutcome::Requeue {
        retry_after_ms, ..
    } = outcome
    else {
        panic!("expected requeue");
    };
    assert_eq!(retry_after_ms, 8_000, "1s * 2^3");

    // The chain recovered; the same job submits cleanly.
    let outcome = client.submit_create(&create_request(1), now(), 4).expect("accept");
    assert!(matches!(outcome, SubmitOutcome::Accepted { .. }));
}

#[test]
fn backoff_is_capped() {
    let policy = BackoffPolicy {
        base_ms: 1_000,
        cap_ms: 60_000,
        max_attempts: 6,
    };
    assert_eq!(policy.delay_ms(0), 1_000);
    assert_eq!(policy.delay_ms(1), 2_000);
    assert_eq!(policy.delay_ms(10), 60_000);
    assert_eq!(policy.delay_ms(63), 60_000);
}

#[test]
fn created_at_outside_the_window_is_rejected() {
    let client = client();
    let mut stale = create_request(1);
    stale.created_at = now().saturating_add_millis(-31 * MILLIS_PER_DAY);
    let err = client.submit_create(&stale, now(), 0).unwrap_err();
    assert!(matches!(err, AnchorSubmitError::InvalidTimestamp));

    let mut future = create_request(1);
    future.created_at = now().saturating_add_millis(2 * 60 * 60 * 1_000);
    let err = client.submit_create(&future, now(), 0).unwrap_err();
    assert!(matches!(err, AnchorSubmitError::InvalidTimestamp));
}

#[test]
fn update_cannot_precede_creation() {
    let client = client();
    client.submit_create(&create_request(1), now(), 0).expect("create");
    let mut early = update_request(2);
    early.updated_at = Timestamp::from_unix_millis(500);
    let err = client.submit_update(&early, Timestamp::from_unix_millis(1_000), 0).unwrap_err();
    assert!(matches!(err, AnchorSubmitError::UpdateBeforeCreate));
}

#[test]
fn timestamp_window_boundaries_are_inclusive() {
    let window = TimestampWindow::default();
    let reference = Timestamp::from_unix_millis(100 * MILLIS_PER_DAY);
    assert!(window.accepts(reference.saturating_add_millis(-30 * MILLIS_PER_DAY), reference));
    assert!(!window.accepts(reference.saturating_add_millis(-30 * MILLIS_PER_DAY - 1), reference));
}
