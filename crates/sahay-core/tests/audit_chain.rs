// crates/sahay-core/tests/audit_chain.rs
// ============================================================================
// Module: Audit Chain Tests
// Description: Verifies hash-chain construction, verification, and scrubbing.
// ============================================================================
//! ## Overview
//! Ensures sealed entries link correctly from the zero sentinel, tampering is
//! detected at the first broken seq, checkpoint verification works, and
//! privacy scrubbing of ip/device never affects the chain.

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

use sahay_core::AuditAction;
use sahay_core::AuditEntry;
use sahay_core::HashAlgorithm;
use sahay_core::HashDigest;
use sahay_core::Timestamp;
use sahay_core::core::audit::AuditEntryDraft;
use sahay_core::core::audit::verify_chain;
use sahay_core::core::hashing::hash_bytes;

fn draft(action: AuditAction, entity_id: &str, at_millis: i64) -> AuditEntryDraft {
    AuditEntryDraft {
        actor: "user-1".to_string(),
        action,
        entity_type: "complaint".to_string(),
        entity_id: entity_id.to_string(),
        ip: Some("10.0.0.9".to_string()),
        device: Some("android".to_string()),
        at: Timestamp::from_unix_millis(at_millis),
        payload_digest: hash_bytes(HashAlgorithm::Sha256, entity_id.as_bytes()),
    }
}

fn chain_of(len: u64) -> Vec<AuditEntry> {
    let mut entries = Vec::new();
    let mut prev = HashDigest::zero();
    for seq in 1..=len {
        let entry = draft(AuditAction::ComplaintUpdated, &format!("c-{seq}"), 1_000 * seq as i64)
            .seal(seq, prev.clone())
            .expect("seal");
        prev = entry.entry_hash.clone();
        entries.push(entry);
    }
    entries
}

#[test]
fn verify_accepts_a_well_formed_chain() {
    let entries = chain_of(5);
    let report = verify_chain(&entries, None);
    assert!(report.ok);
    assert_eq!(report.first_broken_seq, None);
    assert_eq!(report.checked, 5);
}

#[test]
fn verify_accepts_the_empty_chain() {
    let report = verify_chain(&[], None);
    assert!(report.ok);
    assert_eq!(report.checked, 0);
}

#[test]
fn tampered_actor_breaks_at_that_seq() {
    let mut entries = chain_of(4);
    entries[2].actor = "intruder".to_string();
    let report = verify_chain(&entries, None);
    assert!(!report.ok);
    assert_eq!(report.first_broken_seq, Some(3));
}

#[test]
fn relinked_prev_hash_breaks_chain() {
    let mut entries = chain_of(3);
    entries[1].prev_hash = HashDigest::zero();
    let report = verify_chain(&entries, None);
    assert!(!report.ok);
    assert_eq!(report.first_broken_seq, Some(2));
}

#[test]
fn first_entry_must_start_at_seq_one() {
    let entries = chain_of(3);
    let tail = entries[1..].to_vec();
    let report = verify_chain(&tail, None);
    assert!(!report.ok);
    assert_eq!(report.first_broken_seq, Some(2));
}

#[test]
fn checkpoint_verification_accepts_a_tail() {
    let entries = chain_of(6);
    let checkpoint = entries[2].entry_hash.clone();
    let tail = entries[3..].to_vec();
    let report = verify_chain(&tail, Some(&checkpoint));
    assert!(report.ok);
    assert_eq!(report.checked, 3);
}

#[test]
fn gap_in_seq_is_detected() {
    let entries = chain_of(5);
    let mut gapped = entries.clone();
    gapped.remove(2);
    let report = verify_chain(&gapped, None);
    assert!(!report.ok);
    assert_eq!(report.first_broken_seq, Some(4));
}

#[test]
fn scrubbing_ip_and_device_preserves_the_chain() {
    let mut entries = chain_of(4);
    for entry in &mut entries {
        entry.ip = None;
        entry.device = None;
    }
    let report = verify_chain(&entries, None);
    assert!(report.ok, "ip/device are outside the hashed preimage");
}
