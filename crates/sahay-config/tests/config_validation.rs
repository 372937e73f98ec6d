// crates/sahay-config/tests/config_validation.rs
// ============================================================================
// Module: Config Validation Tests
// Description: Verifies fail-closed validation and defaulting.
// ============================================================================
//! ## Overview
//! Ensures defaults validate, every boundary is enforced with a field-named
//! error, and unknown fields are rejected.

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
    clippy::field_reassign_with_default,
    reason = "Test-only output, panic-based assertions, and default-then-mutate \
              config fixtures are permitted."
)]

use sahay_config::ConfigError;
use sahay_config::SahayConfig;
use sahay_core::ComplaintCategory;
use sahay_core::EscalationLevel;
use sahay_core::core::time::MILLIS_PER_HOUR;

fn assert_invalid_field(config: &SahayConfig, field: &str) {
    match config.validate() {
        Err(ConfigError::Invalid {
            field: found, ..
        }) => assert_eq!(found, field),
        other => panic!("expected invalid {field}, got {other:?}"),
    }
}

#[test]
fn defaults_validate() {
    let config = SahayConfig::default();
    config.validate().expect("defaults must validate");
}

#[test]
fn empty_toml_yields_defaults() {
    let config = SahayConfig::from_toml_str("").expect("parse");
    assert_eq!(config, SahayConfig::default());
}

#[test]
fn unknown_fields_are_rejected() {
    let err = SahayConfig::from_toml_str("unknown_section = 1").unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)));
}

#[test]
fn bind_address_must_parse() {
    let mut config = SahayConfig::default();
    config.server.bind = "not-an-address".to_string();
    assert_invalid_field(&config, "server.bind");
}

#[test]
fn sync_batch_bound_is_capped_at_core_limit() {
    let mut config = SahayConfig::default();
    config.server.max_sync_batch_items = 501;
    assert_invalid_field(&config, "server.max_sync_batch_items");

    config.server.max_sync_batch_items = 0;
    assert_invalid_field(&config, "server.max_sync_batch_items");
}

#[test]
fn rate_limit_window_must_be_positive() {
    let mut config = SahayConfig::default();
    config.server.rate_limit = Some(sahay_config::RateLimitConfig {
        requests_per_window: 10,
        window_seconds: 0,
    });
    assert_invalid_field(&config, "server.rate_limit.window_seconds");
}

#[test]
fn consent_document_version_starts_at_one() {
    let mut config = SahayConfig::default();
    config.consent.document_version = 0;
    assert_invalid_field(&config, "consent.document_version");
}

#[test]
fn sla_hours_must_be_positive() {
    let mut config = SahayConfig::default();
    config.sla.hours.water_supply = 0;
    assert_invalid_field(&config, "sla.hours.water_supply");
}

#[test]
fn backoff_cap_cannot_undercut_base() {
    let mut config = SahayConfig::default();
    config.anchor.backoff_base_ms = 5_000;
    config.anchor.backoff_cap_ms = 1_000;
    assert_invalid_field(&config, "anchor.backoff_cap_ms");
}

#[test]
fn anchor_attempts_are_bounded() {
    let mut config = SahayConfig::default();
    config.anchor.max_attempts = 17;
    assert_invalid_field(&config, "anchor.max_attempts");
}

#[test]
fn k_threshold_floor_is_two() {
    let mut config = SahayConfig::default();
    config.analytics.k_threshold = 1;
    assert_invalid_field(&config, "analytics.k_threshold");
}

#[test]
fn scheduler_intervals_must_be_positive() {
    let mut config = SahayConfig::default();
    config.scheduler.view_refresh_seconds = 0;
    assert_invalid_field(&config, "scheduler.view_refresh_seconds");
}

#[test]
fn sla_table_converts_hours_and_level_percent() {
    let config = SahayConfig::default();
    let table = config.sla.table();

    assert_eq!(
        table.duration_millis(ComplaintCategory::HealthService, EscalationLevel::District),
        72 * MILLIS_PER_HOUR
    );
    assert_eq!(
        table.duration_millis(ComplaintCategory::HealthService, EscalationLevel::State),
        36 * MILLIS_PER_HOUR
    );
    assert_eq!(
        table.duration_millis(ComplaintCategory::HealthService, EscalationLevel::National),
        18 * MILLIS_PER_HOUR
    );
}
