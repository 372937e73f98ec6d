// crates/sahay-core/tests/analytics_rules.rs
// ============================================================================
// Module: Analytics De-Identification Tests
// Description: Verifies disallowed keys, bucketing, keys, and the k-filter.
// ============================================================================
//! ## Overview
//! Ensures identifying keys are rejected at any depth, buckets are
//! deterministic, aggregate key strings are stable, and the k-filter drops
//! undersized aggregates.

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

use sahay_core::AgeBucket;
use sahay_core::AggregatedRow;
use sahay_core::AnalyticsError;
use sahay_core::GenderBucket;
use sahay_core::RawAnalyticsEvent;
use sahay_core::Sex;
use sahay_core::Timestamp;
use sahay_core::core::analytics::DISALLOWED_KEYS;
use sahay_core::core::analytics::apply_k_filter;
use sahay_core::core::analytics::bucket_age;
use sahay_core::core::analytics::bucket_event_time;
use sahay_core::core::analytics::bucket_pincode;
use sahay_core::core::analytics::deidentify;
use sahay_core::core::analytics::validate_payload_keys;
use serde_json::json;

fn raw_event() -> RawAnalyticsEvent {
    RawAnalyticsEvent {
        event_type: "triage_completed".to_string(),
        category: "phc".to_string(),
        event_time: Timestamp::from_rfc3339("2026-01-28T10:07:33Z").expect("parse"),
        age: Some(45),
        sex: Some(Sex::Male),
        pincode: Some("110001".to_string()),
        payload: json!({"duration_seconds": 42}),
    }
}

#[test]
fn clean_event_deidentifies() {
    let event = deidentify(&raw_event()).expect("deidentify");
    assert_eq!(event.category, "phc");
    assert_eq!(event.geo_cell, "pincode_110xxx");
    assert_eq!(event.age_bucket, AgeBucket::Age36To60);
    assert_eq!(event.gender, GenderBucket::Male);
}

#[test]
fn every_disallowed_key_is_rejected_at_top_level() {
    for key in DISALLOWED_KEYS {
        let value = json!({ *key: "x" });
        let err = validate_payload_keys(&value).unwrap_err();
        assert!(matches!(err, AnalyticsError::DisallowedKey(found) if found == *key));
    }
}

#[test]
fn disallowed_keys_are_rejected_at_depth() {
    let value = json!({"stats": [{"inner": {"phone": "9999999999"}}]});
    let err = validate_payload_keys(&value).unwrap_err();
    assert!(matches!(err, AnalyticsError::DisallowedKey(found) if found == "phone"));
}

#[test]
fn unknown_event_type_is_rejected() {
    let mut raw = raw_event();
    raw.event_type = "browser_history_uploaded".to_string();
    let err = deidentify(&raw).unwrap_err();
    assert!(matches!(err, AnalyticsError::UnknownEventType(_)));
}

#[test]
fn category_outside_the_event_allow_list_is_rejected() {
    let mut raw = raw_event();
    raw.category = "corruption".to_string();
    let err = deidentify(&raw).unwrap_err();
    assert!(matches!(err, AnalyticsError::CategoryNotAllowed { .. }));
}

#[test]
fn event_time_floors_to_fifteen_minutes() {
    let at = Timestamp::from_rfc3339("2026-01-28T10:07:33Z").expect("parse");
    let floored = bucket_event_time(at);
    assert_eq!(floored.to_rfc3339().expect("format"), "2026-01-28T10:00:00Z");

    let late = Timestamp::from_rfc3339("2026-01-28T10:59:59.999Z").expect("parse");
    assert_eq!(bucket_event_time(late).to_rfc3339().expect("format"), "2026-01-28T10:45:00Z");
}

#[test]
fn age_buckets_are_exact_at_the_boundaries() {
    assert_eq!(bucket_age(None), AgeBucket::Unknown);
    assert_eq!(bucket_age(Some(0)), AgeBucket::Age0To5);
    assert_eq!(bucket_age(Some(5)), AgeBucket::Age0To5);
    assert_eq!(bucket_age(Some(6)), AgeBucket::Age6To12);
    assert_eq!(bucket_age(Some(13)), AgeBucket::Age13To18);
    assert_eq!(bucket_age(Some(19)), AgeBucket::Age19To35);
    assert_eq!(bucket_age(Some(36)), AgeBucket::Age36To60);
    assert_eq!(bucket_age(Some(60)), AgeBucket::Age36To60);
    assert_eq!(bucket_age(Some(61)), AgeBucket::Over60);
}

#[test]
fn pincode_coarsens_to_district_level() {
    assert_eq!(bucket_pincode(Some("110001")), "pincode_110xxx");
    assert_eq!(bucket_pincode(Some("5600")), "unknown");
    assert_eq!(bucket_pincode(Some("11000a")), "unknown");
    assert_eq!(bucket_pincode(None), "unknown");
}

#[test]
fn aggregate_key_string_form_is_stable() {
    let event = deidentify(&raw_event()).expect("deidentify");
    let key = event.aggregate_key();
    let bucket_millis = event.time_bucket.as_unix_millis();
    assert_eq!(
        key.to_string(),
        format!("triage_completed|phc|{bucket_millis}|pincode_110xxx|36-60|male")
    );
}

#[test]
fn k_filter_drops_undersized_buckets() {
    let row = |key: &str, count: u64| AggregatedRow {
        key: key.to_string(),
        event_type: "triage_completed".to_string(),
        category: "phc".to_string(),
        time_bucket: Timestamp::from_unix_millis(0),
        geo_cell: "pincode_110xxx".to_string(),
        age_bucket: "36-60".to_string(),
        gender: "male".to_string(),
        count,
        updated_at: Timestamp::from_unix_millis(0),
    };

    let rows = vec![row("b1", 3), row("b2", 6), row("b3", 5)];
    let kept = apply_k_filter(rows, 5);
    let keys: Vec<&str> = kept.iter().map(|r| r.key.as_str()).collect();
    assert_eq!(keys, vec!["b2", "b3"]);
}
