// crates/sahay-core/tests/consent.rs
// ============================================================================
// Module: Consent Ledger Tests
// Description: Verifies append-only consent semantics and version resets.
// ============================================================================
//! ## Overview
//! Ensures the newest record at-or-before the query time wins, revocation
//! takes effect immediately, and a new consent-document version resets
//! grants until re-consented.

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

use sahay_core::ConsentCategory;
use sahay_core::ConsentLedger;
use sahay_core::ConsentRecord;
use sahay_core::ConsentScope;
use sahay_core::Timestamp;
use sahay_core::UserId;
use sahay_core::core::consent::require;

fn record(granted: bool, version: u32, at_millis: i64) -> ConsentRecord {
    ConsentRecord {
        user_id: UserId::new("user-1"),
        category: ConsentCategory::Analytics,
        scope: ConsentScope::GovAggregated,
        version,
        granted,
        granted_at: Timestamp::from_unix_millis(at_millis),
    }
}

fn is_granted_at(ledger: &ConsentLedger, version: u32, at_millis: i64) -> bool {
    ledger.is_granted(
        &UserId::new("user-1"),
        ConsentCategory::Analytics,
        ConsentScope::GovAggregated,
        version,
        Timestamp::from_unix_millis(at_millis),
    )
}

#[test]
fn ungranted_by_default() {
    let ledger = ConsentLedger::new();
    assert!(!is_granted_at(&ledger, 1, 10_000));
}

#[test]
fn newest_record_at_or_before_query_time_wins() {
    let mut ledger = ConsentLedger::new();
    ledger.append(record(true, 1, 1_000));
    ledger.append(record(false, 1, 5_000));

    assert!(is_granted_at(&ledger, 1, 1_000));
    assert!(is_granted_at(&ledger, 1, 4_999));
    assert!(!is_granted_at(&ledger, 1, 5_000));
    assert!(!is_granted_at(&ledger, 1, 9_000));
}

#[test]
fn revocation_then_regrant_restores_access() {
    let mut ledger = ConsentLedger::new();
    ledger.append(record(true, 1, 1_000));
    ledger.append(record(false, 1, 2_000));
    ledger.append(record(true, 1, 3_000));

    assert!(is_granted_at(&ledger, 1, 3_500));
}

#[test]
fn grants_are_scoped_per_user() {
    let mut ledger = ConsentLedger::new();
    ledger.append(record(true, 1, 1_000));

    let other = UserId::new("user-2");
    assert!(!ledger.is_granted(
        &other,
        ConsentCategory::Analytics,
        ConsentScope::GovAggregated,
        1,
        Timestamp::from_unix_millis(2_000),
    ));
}

#[test]
fn new_document_version_resets_grants() {
    let mut ledger = ConsentLedger::new();
    ledger.append(record(true, 1, 1_000));

    assert!(is_granted_at(&ledger, 1, 2_000));
    assert!(!is_granted_at(&ledger, 2, 2_000), "v1 grant does not carry into v2");

    ledger.append(record(true, 2, 3_000));
    assert!(is_granted_at(&ledger, 2, 3_500));
}

#[test]
fn future_records_are_invisible() {
    let mut ledger = ConsentLedger::new();
    ledger.append(record(true, 1, 9_000));
    assert!(!is_granted_at(&ledger, 1, 8_999));
}

#[test]
fn require_fails_closed() {
    let err = require(false, ConsentCategory::Analytics, ConsentScope::GovAggregated).unwrap_err();
    assert_eq!(err.to_string(), "consent missing: analytics/gov_aggregated");
    assert!(require(true, ConsentCategory::Analytics, ConsentScope::GovAggregated).is_ok());
}
