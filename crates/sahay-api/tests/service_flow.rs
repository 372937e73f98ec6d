// crates/sahay-api/tests/service_flow.rs
// ============================================================================
// Module: Service Flow Tests
// Description: End-to-end scenarios through the canonical service layer.
// ============================================================================
//! ## Overview
//! Drives the service layer with a manual clock, an in-memory store, and the
//! in-memory anchor contract: red-flag triage, consent revocation, sync
//! replay, SLA escalation with anchor nonces, k-anonymity, RBAC guards, and
//! audit verification.

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

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use sahay_anchor::InMemoryAnchorContract;
use sahay_api::RequestMeta;
use sahay_api::Service;
use sahay_api::error::ErrorKind;
use sahay_api::service::AggregateQueryParams;
use sahay_api::service::AnalyticsEmitRequest;
use sahay_api::service::AuthRequest;
use sahay_api::service::ComplaintCreateRequest;
use sahay_api::service::ConsentPayload;
use sahay_api::service::SyncBatchRequest;
use sahay_api::service::SyncEnvelopeDto;
use sahay_api::service::TriageCreateRequest;
use sahay_core::AnchorEvent;
use sahay_core::Clock;
use sahay_core::ComplaintCategory;
use sahay_core::ConsentCategory;
use sahay_core::ConsentScope;
use sahay_core::EscalationLevel;
use sahay_core::ManualClock;
use sahay_core::Role;
use sahay_core::SyncEntityType;
use sahay_core::SyncOperation;
use sahay_core::Timestamp;
use sahay_core::core::time::MILLIS_PER_HOUR;
use sahay_store_sqlite::AuditContext;
use sahay_store_sqlite::SqliteStore;
use serde_json::json;

/// Fixed test epoch: 2026-01-01T00:00:00Z.
const EPOCH: i64 = 1_767_225_600_000;

struct Harness {
    service: Service,
    clock: Arc<ManualClock>,
    contract: Arc<InMemoryAnchorContract>,
}

fn harness() -> Harness {
    let store = Arc::new(SqliteStore::open_in_memory().expect("store"));
    let clock = Arc::new(ManualClock::new(Timestamp::from_unix_millis(EPOCH)));
    let contract = Arc::new(InMemoryAnchorContract::new());
    let service = Service::new(
        store,
        sahay_config::SahayConfig::default(),
        clock.clone(),
        contract.clone(),
    );
    Harness {
        service,
        clock,
        contract,
    }
}

fn meta(token: &str) -> RequestMeta {
    RequestMeta {
        token: Some(token.to_string()),
        ip: Some("10.1.2.3".to_string()),
        device: Some("android".to_string()),
    }
}

fn register(harness: &Harness, alias: &str) -> (sahay_core::UserId, String) {
    let response = harness
        .service
        .register(
            &AuthRequest {
                phone_alias: alias.to_string(),
            },
            &RequestMeta::default(),
        )
        .expect("register");
    (response.user_id, response.token)
}

fn grant(harness: &Harness, token: &str, category: ConsentCategory, scope: ConsentScope) {
    let authed = harness.service.authenticate(&meta(token)).expect("auth");
    harness
        .service
        .grant_consent(&authed, &ConsentPayload {
            category,
            scope,
            granted: true,
            version: 1,
        })
        .expect("grant");
}

fn revoke(harness: &Harness, token: &str, category: ConsentCategory, scope: ConsentScope) {
    let authed = harness.service.authenticate(&meta(token)).expect("auth");
    harness
        .service
        .grant_consent(&authed, &ConsentPayload {
            category,
            scope,
            granted: false,
            version: 1,
        })
        .expect("revoke");
}

fn emit_request(pincode: &str) -> AnalyticsEmitRequest {
    AnalyticsEmitRequest {
        event_type: "triage_completed".to_string(),
        category: "phc".to_string(),
        event_time: Some("2026-01-01T10:02:00Z".to_string()),
        age: Some(30),
        sex: None,
        pincode: Some(pincode.to_string()),
        payload: json!({}),
    }
}

// ============================================================================
// SECTION: Identity
// ============================================================================

#[test]
fn register_login_and_authenticate() {
    let harness = harness();
    let (user_id, token) = register(&harness, "9999000001");

    let authed = harness.service.authenticate(&meta(&token)).expect("auth");
    assert_eq!(authed.user_id, user_id);
    assert!(authed.roles.contains(Role::Citizen));

    let relogin = harness
        .service
        .login(
            &AuthRequest {
                phone_alias: "9999000001".to_string(),
            },
            &RequestMeta::default(),
        )
        .expect("login");
    assert_eq!(relogin.user_id, user_id);

    let err = harness.service.authenticate(&meta("bogus")).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Unauthorized);
}

// ============================================================================
// SECTION: Scenario 1 - Red-Flag Emergency
// ============================================================================

#[test]
fn red_flag_triage_forces_emergency_with_safe_guidance() {
    let harness = harness();
    let (_, token) = register(&harness, "9999000001");
    let authed = harness.service.authenticate(&meta(&token)).expect("auth");

    let session = harness
        .service
        .triage_create(&authed, &TriageCreateRequest {
            symptoms_text: "chest pain and shortness of breath".to_string(),
            age: Some(45),
            sex: Some(sahay_core::Sex::Male),
            pregnancy: false,
            language: None,
        })
        .expect("triage");

    assert_eq!(session.category, "emergency");
    assert!(session.red_flags.contains(&"chest_pain".to_string()));
    assert!(session.guidance_text.contains("guidance, not a diagnosis"));
    assert_eq!(session.report_version, "1.0");

    // Owner can read the session back; everyone else is Forbidden.
    let fetched = harness
        .service
        .triage_get(&authed, session.session_id.as_str())
        .expect("owner read");
    assert_eq!(fetched.category, "emergency");

    let (_, other_token) = register(&harness, "9999000002");
    let other = harness.service.authenticate(&meta(&other_token)).expect("auth");
    let err = harness.service.triage_get(&other, session.session_id.as_str()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Forbidden);
}

// ============================================================================
// SECTION: Scenario 3 - Sync Replay
// ============================================================================

#[test]
fn resubmitting_a_batch_yields_duplicates_and_identical_state() {
    let harness = harness();
    let (user_id, token) = register(&harness, "9999000001");
    grant(&harness, &token, ConsentCategory::CloudSync, ConsentScope::Asha);
    let authed = harness.service.authenticate(&meta(&token)).expect("auth");

    let envelope = |uuid: &str, entity: SyncEntityType| SyncEnvelopeDto {
        event_id: uuid.to_string(),
        device_id: "device-1".to_string(),
        user_id: user_id.as_str().to_string(),
        entity_type: entity,
        operation: SyncOperation::Create,
        client_time: "2026-01-01T00:10:00Z".to_string(),
        payload: json!({"value": 7}),
    };
    let request = SyncBatchRequest {
        events: vec![
            envelope("0b7f8a3e-14a2-4d2e-9c61-2f4bd0a6a111", SyncEntityType::Vitals),
            envelope("9d1c7e55-6a0f-4b3a-8872-c55b8e2f1222", SyncEntityType::Mood),
            envelope("5e2a9c01-77f4-4f08-b3d1-88a91c3f4333", SyncEntityType::Water),
        ],
    };

    let first = harness.service.sync_batch(&authed, &request).expect("first");
    let outcomes: Vec<&str> = first.results.iter().map(|r| r.outcome.as_str()).collect();
    assert_eq!(outcomes, vec!["accepted", "accepted", "accepted"]);

    let second = harness.service.sync_batch(&authed, &request).expect("second");
    let outcomes: Vec<&str> = second.results.iter().map(|r| r.outcome.as_str()).collect();
    assert_eq!(outcomes, vec!["duplicate", "duplicate", "duplicate"]);
}

#[test]
fn sync_requires_cloud_sync_consent() {
    let harness = harness();
    let (_, token) = register(&harness, "9999000001");
    let authed = harness.service.authenticate(&meta(&token)).expect("auth");
    let err = harness
        .service
        .sync_batch(&authed, &SyncBatchRequest {
            events: vec![],
        })
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::ConsentMissing);
}

// ============================================================================
// SECTION: Scenario 4 - SLA Escalation With Anchoring
// ============================================================================

#[test]
fn overdue_complaints_escalate_and_anchor_with_increasing_nonces() {
    let harness = harness();
    let (_, token) = register(&harness, "9999000001");
    grant(&harness, &token, ConsentCategory::Complaints, ConsentScope::GovAggregated);
    let authed = harness.service.authenticate(&meta(&token)).expect("auth");

    let complaint = harness
        .service
        .complaint_create(&authed, &ComplaintCreateRequest {
            category: ComplaintCategory::HealthService,
            payload: BASE64.encode(b"encrypted-details"),
            anonymous: false,
        })
        .expect("create");

    // Anchor the creation first (nonce 1).
    assert_eq!(harness.service.run_anchor_drain(10).expect("drain"), 1);

    // Not due yet: the tick bumps nothing.
    assert_eq!(harness.service.run_sla_tick().expect("tick"), 0);

    // Past the 72h health-service SLA the scheduler escalates district->state.
    harness.clock.advance_millis(73 * MILLIS_PER_HOUR);
    assert_eq!(harness.service.run_sla_tick().expect("tick"), 1);

    let store = harness.service.store();
    let loaded = store
        .get_complaint(&sahay_core::ComplaintId::new(complaint.id.as_str()))
        .expect("get")
        .expect("exists");
    assert_eq!(loaded.escalation_level, EscalationLevel::State);
    assert!(loaded.sla_deadline > harness.clock.now().saturating_add_millis(-1_000));

    // A re-run without further deadline breach is a no-op.
    assert_eq!(harness.service.run_sla_tick().expect("tick"), 0);

    // The escalation anchor update carries nonce 2.
    assert_eq!(harness.service.run_anchor_drain(10).expect("drain"), 1);
    let events = harness.contract.emitted_events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].0, AnchorEvent::ComplaintAnchored);
    assert_eq!(events[0].2, 1);
    assert_eq!(events[1].0, AnchorEvent::StatusUpdated);
    assert_eq!(events[1].2, 2);
}

#[test]
fn chain_outage_requeues_anchor_jobs_without_blocking() {
    let harness = harness();
    let (_, token) = register(&harness, "9999000001");
    grant(&harness, &token, ConsentCategory::Complaints, ConsentScope::Asha);
    let authed = harness.service.authenticate(&meta(&token)).expect("auth");

    harness
        .service
        .complaint_create(&authed, &ComplaintCreateRequest {
            category: ComplaintCategory::Other,
            payload: BASE64.encode(b"payload"),
            anonymous: false,
        })
        .expect("create");

    harness.contract.fail_next(1);
    assert_eq!(harness.service.run_anchor_drain(10).expect("drain"), 0, "outage requeues");
    assert_eq!(harness.service.run_anchor_drain(10).expect("drain"), 1, "retry succeeds");
}

// ============================================================================
// SECTION: Scenario 5 - Consent Revocation
// ============================================================================

#[test]
fn consent_revocation_blocks_subsequent_emissions() {
    let harness = harness();
    let (_, token) = register(&harness, "9999000001");
    grant(&harness, &token, ConsentCategory::Analytics, ConsentScope::GovAggregated);
    let authed = harness.service.authenticate(&meta(&token)).expect("auth");

    harness.service.analytics_emit(&authed, &emit_request("110001")).expect("accepted");

    harness.clock.advance_millis(1_000);
    revoke(&harness, &token, ConsentCategory::Analytics, ConsentScope::GovAggregated);
    harness.clock.advance_millis(1_000);

    let err = harness.service.analytics_emit(&authed, &emit_request("110001")).unwrap_err();
    assert_eq!(err.kind, ErrorKind::ConsentMissing);
}

// ============================================================================
// SECTION: Scenario 6 - k-Anonymity
// ============================================================================

#[test]
fn summary_omits_buckets_below_k() {
    let harness = harness();
    let (_, token) = register(&harness, "9999000001");
    grant(&harness, &token, ConsentCategory::Analytics, ConsentScope::GovAggregated);
    let authed = harness.service.authenticate(&meta(&token)).expect("auth");

    for _ in 0..3 {
        harness.service.analytics_emit(&authed, &emit_request("110001")).expect("b1");
    }
    for _ in 0..6 {
        harness.service.analytics_emit(&authed, &emit_request("560001")).expect("b2");
    }
    harness.service.flush_buffer().expect("flush");

    let report = harness
        .service
        .analytics_query(&authed, &AggregateQueryParams::default())
        .expect("summary");
    assert_eq!(report.k_threshold, 5);
    assert_eq!(report.rows.len(), 1, "the 3-event bucket is suppressed");
    assert_eq!(report.rows[0].geo_cell, "pincode_560xxx");
    assert_eq!(report.rows[0].count, 6);
}

// ============================================================================
// SECTION: RBAC Guards
// ============================================================================

#[test]
fn clinician_and_admin_guards_hold() {
    let harness = harness();
    let (_citizen_id, citizen_token) = register(&harness, "9999000001");
    let citizen = harness.service.authenticate(&meta(&citizen_token)).expect("auth");

    let err = harness
        .service
        .prescription_create(&citizen, &sahay_api::service::PrescriptionCreateRequest {
            tele_request_id: "tr-unknown".to_string(),
            items: vec!["ors".to_string()],
            summary_text: "x".repeat(200),
        })
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Forbidden);

    let err = harness.service.audit_verify(&citizen).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Forbidden);

    // Promote a second user to national_admin; audit verification passes.
    let (admin_id, admin_token) = register(&harness, "9999000002");
    harness
        .service
        .store()
        .grant_role(
            &admin_id,
            Role::NationalAdmin,
            harness.clock.now(),
            &AuditContext::system("test"),
        )
        .expect("grant role");
    let admin = harness.service.authenticate(&meta(&admin_token)).expect("auth");
    let verdict = harness.service.audit_verify(&admin).expect("verify");
    assert_eq!(verdict["ok"], json!(true));
    assert_eq!(verdict["report_version"], json!("1.0"));

    let logs = harness.service.audit_logs(&admin, 0, 100).expect("logs");
    assert!(!logs.entries.is_empty());
}

#[test]
fn dashboard_views_require_officer_tier() {
    let harness = harness();
    let (officer_id, officer_token) = register(&harness, "9999000003");
    harness
        .service
        .store()
        .grant_role(
            &officer_id,
            Role::DistrictOfficer,
            harness.clock.now(),
            &AuditContext::system("test"),
        )
        .expect("grant role");
    let officer = harness.service.authenticate(&meta(&officer_token)).expect("auth");

    let refreshed = harness.service.refresh_views(&officer).expect("refresh");
    assert_eq!(refreshed["report_version"], json!("1.0"));

    let view = harness
        .service
        .get_view(&officer, sahay_store_sqlite::VIEW_DAILY_TRIAGE)
        .expect("view");
    assert_eq!(view.report_version, "1.0");

    let (_, citizen_token) = register(&harness, "9999000004");
    let citizen = harness.service.authenticate(&meta(&citizen_token)).expect("auth");
    let err = harness
        .service
        .get_view(&citizen, sahay_store_sqlite::VIEW_DAILY_TRIAGE)
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Forbidden);
}

// ============================================================================
// SECTION: Anonymous Complaints
// ============================================================================

#[test]
fn anonymous_complaints_skip_consent_and_hide_ownership() {
    let harness = harness();
    let (_, token) = register(&harness, "9999000001");
    let authed = harness.service.authenticate(&meta(&token)).expect("auth");

    // No complaints consent was granted; anonymous filing still works.
    let complaint = harness
        .service
        .complaint_create(&authed, &ComplaintCreateRequest {
            category: ComplaintCategory::Corruption,
            payload: BASE64.encode(b"sealed"),
            anonymous: true,
        })
        .expect("anonymous create");

    // The filer cannot read it back as owner; officers can.
    let err = harness.service.complaint_get(&authed, complaint.id.as_str()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Forbidden);

    let (officer_id, officer_token) = register(&harness, "9999000005");
    harness
        .service
        .store()
        .grant_role(
            &officer_id,
            Role::StateOfficer,
            harness.clock.now(),
            &AuditContext::system("test"),
        )
        .expect("grant role");
    let officer = harness.service.authenticate(&meta(&officer_token)).expect("auth");
    let fetched = harness.service.complaint_get(&officer, complaint.id.as_str()).expect("officer");
    assert_eq!(fetched.status, "submitted");
}
