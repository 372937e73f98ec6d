// crates/sahay-core/tests/sync_rules.rs
// ============================================================================
// Module: Sync Rule Tests
// Description: Verifies envelope validation, LWW resolution, and outcomes.
// ============================================================================
//! ## Overview
//! Ensures profile last-write-wins is deterministic (including the event-id
//! tie-break), append-only entities reject mutation, and outcome labels are
//! stable.

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

use sahay_core::DeviceId;
use sahay_core::EventId;
use sahay_core::LwwDecision;
use sahay_core::RejectReason;
use sahay_core::SyncEntityType;
use sahay_core::SyncEnvelope;
use sahay_core::SyncOperation;
use sahay_core::SyncOutcome;
use sahay_core::Timestamp;
use sahay_core::UserId;
use sahay_core::core::sync::operation_allowed;
use sahay_core::core::sync::resolve_profile_write;
use sahay_core::core::sync::validate_envelope;
use serde_json::json;

const UUID_A: &str = "0b7f8a3e-14a2-4d2e-9c61-2f4bd0a6a111";
const UUID_B: &str = "9d1c7e55-6a0f-4b3a-8872-c55b8e2f1222";

fn envelope(event_id: &str) -> SyncEnvelope {
    SyncEnvelope {
        event_id: EventId::new(event_id),
        device_id: DeviceId::new("device-1"),
        user_id: UserId::new("user-1"),
        entity_type: SyncEntityType::Profile,
        operation: SyncOperation::Create,
        client_time: Timestamp::from_unix_millis(1_000),
        payload: json!({"name_alias": "X"}),
    }
}

#[test]
fn canonical_uuid_shape_is_enforced() {
    assert!(validate_envelope(&envelope(UUID_A)).is_ok());
    assert!(validate_envelope(&envelope("not-a-uuid")).is_err());
    assert!(validate_envelope(&envelope(&UUID_A.to_uppercase())).is_err());
}

#[test]
fn payload_must_be_an_object() {
    let mut bad = envelope(UUID_A);
    bad.payload = json!([1, 2, 3]);
    assert!(validate_envelope(&bad).is_err());
}

#[test]
fn newer_client_time_wins() {
    let incoming = EventId::new(UUID_A);
    let current = EventId::new(UUID_B);
    let decision = resolve_profile_write(
        Some((Timestamp::from_unix_millis(1_000), &current)),
        Timestamp::from_unix_millis(2_000),
        &incoming,
    );
    assert_eq!(decision, LwwDecision::Apply);
}

#[test]
fn older_client_time_is_stale() {
    let incoming = EventId::new(UUID_B);
    let current = EventId::new(UUID_A);
    let decision = resolve_profile_write(
        Some((Timestamp::from_unix_millis(2_000), &current)),
        Timestamp::from_unix_millis(1_999),
        &incoming,
    );
    assert_eq!(decision, LwwDecision::Stale);
}

#[test]
fn equal_client_time_breaks_tie_by_event_id() {
    let smaller = EventId::new(UUID_A);
    let larger = EventId::new(UUID_B);
    let at = Timestamp::from_unix_millis(1_000);

    assert_eq!(resolve_profile_write(Some((at, &smaller)), at, &larger), LwwDecision::Apply);
    assert_eq!(resolve_profile_write(Some((at, &larger)), at, &smaller), LwwDecision::Stale);
}

#[test]
fn missing_current_profile_always_applies() {
    let incoming = EventId::new(UUID_A);
    let decision = resolve_profile_write(None, Timestamp::from_unix_millis(1), &incoming);
    assert_eq!(decision, LwwDecision::Apply);
}

#[test]
fn append_only_entities_reject_mutation() {
    for entity in [SyncEntityType::Vitals, SyncEntityType::Mood, SyncEntityType::Water] {
        assert!(operation_allowed(entity, SyncOperation::Create));
        assert!(!operation_allowed(entity, SyncOperation::Update));
        assert!(!operation_allowed(entity, SyncOperation::Delete));
    }
}

#[test]
fn profile_accepts_create_and_update_only() {
    assert!(operation_allowed(SyncEntityType::Profile, SyncOperation::Create));
    assert!(operation_allowed(SyncEntityType::Profile, SyncOperation::Update));
    assert!(!operation_allowed(SyncEntityType::Profile, SyncOperation::Delete));
}

#[test]
fn outcome_labels_are_stable() {
    assert_eq!(SyncOutcome::Accepted.as_label(), "accepted");
    assert_eq!(SyncOutcome::Duplicate.as_label(), "duplicate");
    assert_eq!(SyncOutcome::Rejected(RejectReason::AppendOnly).as_label(), "rejected:append_only");
    assert_eq!(SyncOutcome::Rejected(RejectReason::Stale).as_label(), "rejected:stale");
    assert_eq!(SyncOutcome::Rejected(RejectReason::Transient).as_label(), "rejected:transient");
}
