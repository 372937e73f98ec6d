// crates/sahay-core/tests/complaint_machine.rs
// ============================================================================
// Module: Complaint State Machine Tests
// Description: Verifies transitions, closure invariants, and escalation.
// ============================================================================
//! ## Overview
//! Ensures the lifecycle admits exactly the legal transitions, closure
//! demands feedback and produces a canonical hash, and the SLA escalation
//! ladder bumps deterministically until exhausted.

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

use sahay_core::Complaint;
use sahay_core::ComplaintCategory;
use sahay_core::ComplaintError;
use sahay_core::ComplaintId;
use sahay_core::ComplaintStatus;
use sahay_core::EscalationLevel;
use sahay_core::EscalationOutcome;
use sahay_core::SlaTable;
use sahay_core::Timestamp;
use sahay_core::core::complaint::can_transition;
use sahay_core::core::time::MILLIS_PER_MINUTE;

fn sla() -> SlaTable {
    SlaTable::new(
        [
            (ComplaintCategory::HealthService, MILLIS_PER_MINUTE),
            (ComplaintCategory::Sanitation, 2 * MILLIS_PER_MINUTE),
            (ComplaintCategory::WaterSupply, 2 * MILLIS_PER_MINUTE),
            (ComplaintCategory::Corruption, 4 * MILLIS_PER_MINUTE),
            (ComplaintCategory::Other, 2 * MILLIS_PER_MINUTE),
        ],
        [100, 50, 25],
    )
}

fn complaint(status: ComplaintStatus) -> Complaint {
    let created_at = Timestamp::from_unix_millis(0);
    Complaint {
        id: ComplaintId::new("complaint-1"),
        submitter_id: None,
        category: ComplaintCategory::HealthService,
        status,
        created_at,
        sla_deadline: sla().initial_deadline(ComplaintCategory::HealthService, created_at),
        escalation_level: EscalationLevel::District,
        escalation_exhausted: false,
        closure_feedback: None,
        closure_hash: None,
    }
}

#[test]
fn lifecycle_transitions_are_exact() {
    assert!(can_transition(ComplaintStatus::Draft, ComplaintStatus::Submitted));
    assert!(can_transition(ComplaintStatus::Submitted, ComplaintStatus::UnderReview));
    assert!(can_transition(ComplaintStatus::UnderReview, ComplaintStatus::InProgress));
    assert!(can_transition(ComplaintStatus::InProgress, ComplaintStatus::Resolved));
    assert!(can_transition(ComplaintStatus::Resolved, ComplaintStatus::Closed));
    assert!(can_transition(ComplaintStatus::Escalated, ComplaintStatus::InProgress));
    assert!(can_transition(ComplaintStatus::Escalated, ComplaintStatus::UnderReview));

    assert!(!can_transition(ComplaintStatus::Closed, ComplaintStatus::InProgress));
    assert!(!can_transition(ComplaintStatus::Draft, ComplaintStatus::Resolved));
    assert!(!can_transition(ComplaintStatus::Resolved, ComplaintStatus::InProgress));
    assert!(!can_transition(ComplaintStatus::Submitted, ComplaintStatus::Closed));
}

#[test]
fn transition_rejects_illegal_moves() {
    let mut subject = complaint(ComplaintStatus::Draft);
    let err = subject.transition(ComplaintStatus::Resolved).unwrap_err();
    assert!(matches!(err, ComplaintError::StateInvalid { .. }));
    assert_eq!(subject.status, ComplaintStatus::Draft);
}

#[test]
fn closing_requires_the_close_path() {
    let mut subject = complaint(ComplaintStatus::Resolved);
    let err = subject.transition(ComplaintStatus::Closed).unwrap_err();
    assert!(matches!(err, ComplaintError::ClosureFeedbackRequired));
}

#[test]
fn close_rejects_empty_feedback() {
    let mut subject = complaint(ComplaintStatus::Resolved);
    let err = subject.close("fixed", "   ").unwrap_err();
    assert!(matches!(err, ComplaintError::ClosureFeedbackRequired));
    assert_eq!(subject.status, ComplaintStatus::Resolved);
}

#[test]
fn close_sets_feedback_and_canonical_hash() {
    let mut subject = complaint(ComplaintStatus::Resolved);
    let hash = subject.close("pump repaired", "works now, thank you").expect("close");

    assert_eq!(subject.status, ComplaintStatus::Closed);
    assert_eq!(subject.closure_feedback.as_deref(), Some("works now, thank you"));
    assert_eq!(subject.closure_hash, Some(hash.clone()));

    let mut again = complaint(ComplaintStatus::Resolved);
    let hash_again = again.close("pump repaired", "works now, thank you").expect("close");
    assert_eq!(hash, hash_again, "closure hash is canonical");
}

#[test]
fn close_requires_resolved_state() {
    let mut subject = complaint(ComplaintStatus::InProgress);
    let err = subject.close("note", "feedback").unwrap_err();
    assert!(matches!(err, ComplaintError::StateInvalid { .. }));
}

#[test]
fn escalation_bumps_district_to_state_past_deadline() {
    let mut subject = complaint(ComplaintStatus::Submitted);
    let now = Timestamp::from_unix_millis(70 * 1_000);

    let outcome = subject.escalation_step(now, &sla()).expect("due");
    match outcome {
        EscalationOutcome::Bumped {
            level,
            new_deadline,
        } => {
            assert_eq!(level, EscalationLevel::State);
            assert_eq!(new_deadline.as_unix_millis(), now.as_unix_millis() + 30_000);
        }
        EscalationOutcome::Exhausted => panic!("ladder is not exhausted"),
    }
    assert_eq!(subject.status, ComplaintStatus::Escalated);
    assert_eq!(subject.escalation_level, EscalationLevel::State);
}

#[test]
fn escalation_before_deadline_is_a_no_op() {
    let mut subject = complaint(ComplaintStatus::Submitted);
    let now = Timestamp::from_unix_millis(30 * 1_000);
    assert!(subject.escalation_step(now, &sla()).is_none());
    assert_eq!(subject.escalation_level, EscalationLevel::District);
}

#[test]
fn escalation_skips_settled_and_draft_complaints() {
    let now = Timestamp::from_unix_millis(i64::MAX / 2);
    for status in [ComplaintStatus::Resolved, ComplaintStatus::Closed, ComplaintStatus::Draft] {
        let mut subject = complaint(status);
        assert!(subject.escalation_step(now, &sla()).is_none(), "{status:?} must not escalate");
    }
}

#[test]
fn ladder_exhausts_at_national_and_stays_exhausted() {
    let mut subject = complaint(ComplaintStatus::Submitted);
    let mut now = Timestamp::from_unix_millis(70 * 1_000);

    let first = subject.escalation_step(now, &sla()).expect("district to state");
    assert!(matches!(first, EscalationOutcome::Bumped { .. }));

    now = subject.sla_deadline.saturating_add_millis(1);
    let second = subject.escalation_step(now, &sla()).expect("state to national");
    assert!(matches!(
        second,
        EscalationOutcome::Bumped {
            level: EscalationLevel::National,
            ..
        }
    ));

    now = subject.sla_deadline.saturating_add_millis(1);
    let third = subject.escalation_step(now, &sla()).expect("national exhausts");
    assert!(matches!(third, EscalationOutcome::Exhausted));
    assert!(subject.escalation_exhausted);

    now = now.saturating_add_millis(MILLIS_PER_MINUTE);
    assert!(subject.escalation_step(now, &sla()).is_none(), "exhausted ladders never bump");
}

#[test]
fn escalated_complaints_keep_escalating_when_overdue_again() {
    let mut subject = complaint(ComplaintStatus::Escalated);
    subject.escalation_level = EscalationLevel::District;
    let now = subject.sla_deadline.saturating_add_millis(1);
    let outcome = subject.escalation_step(now, &sla()).expect("due again");
    assert!(matches!(
        outcome,
        EscalationOutcome::Bumped {
            level: EscalationLevel::State,
            ..
        }
    ));
}
