// crates/sahay-api/src/service.rs
// ============================================================================
// Module: API Service Layer
// Description: Canonical execution path behind every HTTP route.
// Purpose: Enforce Auth -> RBAC -> Consent -> Handler -> Audit on one code
// path shared by all surfaces and by tests.
// Dependencies: sahay-{core,config,store-sqlite,anchor}, base64, rand
// ============================================================================

//! ## Overview
//! All API surfaces call into [`Service`]; handlers stay thin adapters.
//! Consent is re-read from committed state on every check and never cached
//! across a request boundary. Analytics emissions attached to domain
//! handlers are best-effort: they are skipped (not failed) when consent is
//! missing, while the explicit `/analytics/events` endpoint surfaces
//! `ConsentMissing`. Every report payload carries `report_version`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::RngCore;
use sahay_anchor::AnchorClient;
use sahay_anchor::SubmitOutcome;
use sahay_config::SahayConfig;
use sahay_core::AnchorContract;
use sahay_core::AnchorHash;
use sahay_core::ChainReport;
use sahay_core::Clock;
use sahay_core::ComplaintCategory;
use sahay_core::ComplaintId;
use sahay_core::ComplaintStatus;
use sahay_core::ConsentCategory;
use sahay_core::ConsentRecord;
use sahay_core::ConsentScope;
use sahay_core::CreateAnchorRequest;
use sahay_core::DeviceId;
use sahay_core::EscalationOutcome;
use sahay_core::EventId;
use sahay_core::Role;
use sahay_core::Sex;
use sahay_core::SlaTable;
use sahay_core::SyncEntityType;
use sahay_core::SyncEnvelope;
use sahay_core::SyncOperation;
use sahay_core::TeleRequestId;
use sahay_core::TeleStatus;
use sahay_core::Timestamp;
use sahay_core::TriageSessionId;
use sahay_core::UpdateStatusRequest;
use sahay_core::UserId;
use sahay_core::core::analytics::RawAnalyticsEvent;
use sahay_core::core::analytics::deidentify;
use sahay_core::core::triage::Language;
use sahay_core::core::triage::TriageInput;
use sahay_core::core::triage::assess;
use sahay_store_sqlite::AggregateQuery;
use sahay_store_sqlite::AnchorJobKind;
use sahay_store_sqlite::AuditContext;
use sahay_store_sqlite::NewComplaint;
use sahay_store_sqlite::PrescriptionRecord;
use sahay_store_sqlite::SqliteStore;
use sahay_store_sqlite::TeleRequestRecord;
use sahay_store_sqlite::TriageSessionRecord;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;

use crate::auth::AuthedUser;
use crate::auth::RequestMeta;
use crate::auth::generate_token;
use crate::auth::token_digest;
use crate::error::ApiError;
use crate::error::ErrorKind;
use crate::pipeline::AnalyticsBuffer;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Report envelope version. Major bumps signal breaking schema changes,
/// minor bumps additive ones.
pub const REPORT_VERSION: &str = "1.0";

// ============================================================================
// SECTION: Wire DTOs
// ============================================================================

/// Registration / login request.
#[derive(Debug, Deserialize)]
pub struct AuthRequest {
    /// Phone number or alias used as the account handle.
    pub phone_alias: String,
}

/// Registration / login response.
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    /// Resolved user identifier.
    pub user_id: UserId,
    /// Opaque bearer token. Shown once; only its digest is stored.
    pub token: String,
}

/// Consent grant payload.
#[derive(Debug, Deserialize)]
pub struct ConsentPayload {
    /// Consent category.
    pub category: ConsentCategory,
    /// Consent scope.
    pub scope: ConsentScope,
    /// Grant or withdraw.
    pub granted: bool,
    /// Consent-document version being acknowledged.
    pub version: u32,
}

/// One consent record on the wire.
#[derive(Debug, Serialize)]
pub struct ConsentView {
    /// Consent category label.
    pub category: &'static str,
    /// Consent scope label.
    pub scope: &'static str,
    /// Acknowledged document version.
    pub version: u32,
    /// Granted flag.
    pub granted: bool,
    /// Record time, RFC 3339.
    pub granted_at: String,
}

/// Consent listing response.
#[derive(Debug, Serialize)]
pub struct ConsentListResponse {
    /// Report envelope version.
    pub report_version: &'static str,
    /// Consent history, oldest first.
    pub consents: Vec<ConsentView>,
}

/// One sync envelope on the wire.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncEnvelopeDto {
    /// Globally unique event id (canonical UUID).
    pub event_id: String,
    /// Originating device.
    pub device_id: String,
    /// Owning user; must match the authenticated caller.
    pub user_id: String,
    /// Target entity type.
    pub entity_type: SyncEntityType,
    /// Requested operation.
    pub operation: SyncOperation,
    /// Client-asserted write time, ISO-8601 UTC.
    pub client_time: String,
    /// Entity payload.
    pub payload: Value,
}

/// Sync batch request.
#[derive(Debug, Deserialize)]
pub struct SyncBatchRequest {
    /// Ordered envelopes.
    pub events: Vec<SyncEnvelopeDto>,
}

/// One per-item sync result.
#[derive(Debug, Serialize)]
pub struct SyncItemResult {
    /// Event id of the item.
    pub event_id: String,
    /// Stable outcome label.
    pub outcome: String,
}

/// Sync batch response.
#[derive(Debug, Serialize)]
pub struct SyncBatchResponse {
    /// Report envelope version.
    pub report_version: &'static str,
    /// Per-item outcomes in submitted order.
    pub results: Vec<SyncItemResult>,
}

/// Triage session creation request.
#[derive(Debug, Deserialize)]
pub struct TriageCreateRequest {
    /// Free-text symptom description.
    pub symptoms_text: String,
    /// Patient age in years.
    pub age: Option<u16>,
    /// Patient sex.
    pub sex: Option<Sex>,
    /// Whether the patient is pregnant.
    #[serde(default)]
    pub pregnancy: bool,
    /// Guidance language tag (`en`, `hi`).
    pub language: Option<String>,
}

/// Triage session on the wire.
#[derive(Debug, Serialize)]
pub struct TriageSessionResponse {
    /// Report envelope version.
    pub report_version: &'static str,
    /// Session identifier.
    pub session_id: TriageSessionId,
    /// Assessed category label.
    pub category: &'static str,
    /// Matched red flags in rule order.
    pub red_flags: Vec<String>,
    /// Safe-language guidance.
    pub guidance_text: String,
}

/// Tele request status patch.
#[derive(Debug, Deserialize)]
pub struct TelePatchRequest {
    /// Target status.
    pub status: TeleStatus,
}

/// Tele request on the wire.
#[derive(Debug, Serialize)]
pub struct TeleRequestResponse {
    /// Report envelope version.
    pub report_version: &'static str,
    /// Request identifier.
    pub id: TeleRequestId,
    /// Status label.
    pub status: &'static str,
    /// Assigned clinician, if any.
    pub clinician_id: Option<UserId>,
}

/// Prescription creation request.
#[derive(Debug, Deserialize)]
pub struct PrescriptionCreateRequest {
    /// Teleconsultation request the prescription belongs to.
    pub tele_request_id: String,
    /// Prescribed items.
    pub items: Vec<String>,
    /// Summary text, 160-300 characters.
    pub summary_text: String,
}

/// Complaint creation request.
#[derive(Debug, Deserialize)]
pub struct ComplaintCreateRequest {
    /// Complaint category.
    pub category: ComplaintCategory,
    /// Client-encrypted payload, base64.
    pub payload: String,
    /// File anonymously: no submitter linkage, scrubbed audit.
    #[serde(default)]
    pub anonymous: bool,
}

/// Complaint status patch.
#[derive(Debug, Deserialize)]
pub struct ComplaintPatchRequest {
    /// Target status.
    pub status: ComplaintStatus,
}

/// Complaint closure request.
#[derive(Debug, Deserialize)]
pub struct ComplaintCloseRequest {
    /// Officer resolution note.
    pub resolution_note: String,
    /// Submitter feedback; required, non-empty.
    pub feedback: String,
}

/// Complaint on the wire. Submitter identity is never included.
#[derive(Debug, Serialize)]
pub struct ComplaintResponse {
    /// Report envelope version.
    pub report_version: &'static str,
    /// Complaint identifier.
    pub id: ComplaintId,
    /// Category label.
    pub category: &'static str,
    /// Status label.
    pub status: &'static str,
    /// Current SLA deadline, RFC 3339.
    pub sla_deadline: String,
    /// Current escalation level label.
    pub escalation_level: &'static str,
}

/// Analytics emission request.
#[derive(Debug, Deserialize)]
pub struct AnalyticsEmitRequest {
    /// Event type label from the closed allow-list.
    pub event_type: String,
    /// Category label from the per-type allow-list.
    pub category: String,
    /// Event time, ISO-8601 UTC; defaults to the server clock.
    pub event_time: Option<String>,
    /// Subject age in years.
    pub age: Option<u16>,
    /// Subject sex.
    pub sex: Option<Sex>,
    /// Subject pincode.
    pub pincode: Option<String>,
    /// Free-form payload; must contain no identifying keys.
    #[serde(default = "empty_object")]
    pub payload: Value,
}

/// Returns an empty JSON object for defaulted payloads.
fn empty_object() -> Value {
    json!({})
}

/// Aggregate query filters on the wire.
#[derive(Debug, Default, Deserialize)]
pub struct AggregateQueryParams {
    /// Restrict to one event type label.
    pub event_type: Option<String>,
    /// Restrict to one category label.
    pub category: Option<String>,
    /// Restrict to one geo cell.
    pub geo_cell: Option<String>,
    /// Restrict to one age bucket label.
    pub age_bucket: Option<String>,
    /// Restrict to one gender label.
    pub gender: Option<String>,
    /// Inclusive lower bound, ISO-8601 UTC.
    pub from: Option<String>,
    /// Exclusive upper bound, ISO-8601 UTC.
    pub to: Option<String>,
}

/// One aggregate row on the wire.
#[derive(Debug, Serialize)]
pub struct AggregateRowView {
    /// Event type label.
    pub event_type: String,
    /// Category label.
    pub category: String,
    /// Time bucket, RFC 3339.
    pub time_bucket: String,
    /// Geo cell label.
    pub geo_cell: String,
    /// Age bucket label.
    pub age_bucket: String,
    /// Gender label.
    pub gender: String,
    /// Record count; always `>= k`.
    pub count: u64,
}

/// Aggregate report response.
#[derive(Debug, Serialize)]
pub struct AggregateReportResponse {
    /// Report envelope version.
    pub report_version: &'static str,
    /// k threshold applied to every row.
    pub k_threshold: u64,
    /// k-filtered rows.
    pub rows: Vec<AggregateRowView>,
}

/// Top-regions response.
#[derive(Debug, Serialize)]
pub struct TopRegionsResponse {
    /// Report envelope version.
    pub report_version: &'static str,
    /// k threshold applied to every row.
    pub k_threshold: u64,
    /// `(geo_cell, total)` pairs, largest first.
    pub regions: Vec<(String, u64)>,
}

/// Materialized view response.
#[derive(Debug, Serialize)]
pub struct ViewResponse {
    /// Report envelope version.
    pub report_version: &'static str,
    /// View name.
    pub view: String,
    /// Freshness watermark, RFC 3339, when the view has rows.
    pub refreshed_at: Option<String>,
    /// View rows.
    pub rows: Vec<ViewRowView>,
}

/// One materialized view row on the wire.
#[derive(Debug, Serialize)]
pub struct ViewRowView {
    /// Row key.
    pub row_key: String,
    /// Aggregated value.
    pub value: u64,
}

/// Audit log response.
#[derive(Debug, Serialize)]
pub struct AuditLogResponse {
    /// Report envelope version.
    pub report_version: &'static str,
    /// Entries, oldest first.
    pub entries: Vec<Value>,
}

/// Grouping axis for aggregate reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupBy {
    /// Group by geo cell (heatmap).
    Geo,
    /// Group by category.
    Category,
    /// Group by age bucket and gender.
    Demographic,
}

// ============================================================================
// SECTION: Service
// ============================================================================

/// Canonical service layer shared by all surfaces.
pub struct Service {
    /// Durable store.
    store: Arc<SqliteStore>,
    /// Validated configuration.
    config: SahayConfig,
    /// SLA table derived from config.
    sla: SlaTable,
    /// Injected clock.
    clock: Arc<dyn Clock>,
    /// Aggregation buffer.
    buffer: AnalyticsBuffer,
    /// Anchor client over the configured contract backend.
    anchor: AnchorClient<Arc<dyn AnchorContract>>,
}

impl Service {
    /// Builds the service layer.
    #[must_use]
    pub fn new(
        store: Arc<SqliteStore>,
        config: SahayConfig,
        clock: Arc<dyn Clock>,
        contract: Arc<dyn AnchorContract>,
    ) -> Self {
        let sla = config.sla.table();
        let buffer = AnalyticsBuffer::new(config.analytics.flush_threshold);
        let anchor = AnchorClient::new(
            contract,
            sahay_anchor::BackoffPolicy {
                base_ms: config.anchor.backoff_base_ms,
                cap_ms: config.anchor.backoff_cap_ms,
                max_attempts: config.anchor.max_attempts,
            },
            sahay_anchor::TimestampWindow {
                max_age_ms: i64::from(config.anchor.created_at_max_age_days)
                    * sahay_core::core::time::MILLIS_PER_DAY,
                max_skew_ms: i64::from(config.anchor.created_at_max_skew_hours)
                    * sahay_core::core::time::MILLIS_PER_HOUR,
            },
        );
        Self {
            store,
            config,
            sla,
            clock,
            buffer,
            anchor,
        }
    }

    /// Returns the store handle.
    #[must_use]
    pub fn store(&self) -> &SqliteStore {
        &self.store
    }

    /// Returns the validated configuration.
    #[must_use]
    pub const fn config(&self) -> &SahayConfig {
        &self.config
    }

    /// Returns the injected clock's current time.
    #[must_use]
    pub fn clock_now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Internal shorthand for [`Service::clock_now`].
    fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Builds the audit context for an authenticated caller.
    fn ctx(authed: &AuthedUser) -> AuditContext {
        AuditContext::for_actor(
            authed.user_id.as_str(),
            authed.meta.ip.clone(),
            authed.meta.device.clone(),
        )
    }

    // ========================================================================
    // SECTION: Identity
    // ========================================================================

    /// Registers a new user and issues a bearer token.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` when the phone alias is already registered.
    pub fn register(
        &self,
        request: &AuthRequest,
        meta: &RequestMeta,
    ) -> Result<AuthResponse, ApiError> {
        if request.phone_alias.trim().is_empty() {
            return Err(ApiError::validation("phone_alias is required"));
        }
        let user_id = UserId::new(fresh_id("u"));
        let now = self.now();
        let ctx = AuditContext::for_actor(user_id.as_str(), meta.ip.clone(), meta.device.clone());
        self.store.create_user(&user_id, request.phone_alias.trim(), now, &ctx)?;
        self.store.grant_role(&user_id, Role::Citizen, now, &ctx)?;
        let token = generate_token();
        self.store.issue_token(&user_id, &token_digest(&token), now, &ctx)?;
        Ok(AuthResponse {
            user_id,
            token,
        })
    }

    /// Logs an existing user in, issuing a fresh bearer token.
    ///
    /// # Errors
    ///
    /// Returns `Unauthorized` for unknown aliases.
    pub fn login(
        &self,
        request: &AuthRequest,
        meta: &RequestMeta,
    ) -> Result<AuthResponse, ApiError> {
        let user_id = self
            .store
            .lookup_user_by_phone(request.phone_alias.trim())?
            .ok_or_else(ApiError::unauthorized)?;
        let now = self.now();
        let ctx = AuditContext::for_actor(user_id.as_str(), meta.ip.clone(), meta.device.clone());
        let token = generate_token();
        self.store.issue_token(&user_id, &token_digest(&token), now, &ctx)?;
        Ok(AuthResponse {
            user_id,
            token,
        })
    }

    /// Resolves the bearer token in `meta` to an authenticated caller.
    ///
    /// # Errors
    ///
    /// Returns `Unauthorized` when the token is missing, revoked, or bound
    /// to an erased user.
    pub fn authenticate(&self, meta: &RequestMeta) -> Result<AuthedUser, ApiError> {
        let token = meta.token.as_deref().ok_or_else(ApiError::unauthorized)?;
        let (user_id, roles) = self
            .store
            .resolve_token(&token_digest(token))?
            .ok_or_else(ApiError::unauthorized)?;
        Ok(AuthedUser {
            user_id,
            roles,
            meta: meta.clone(),
        })
    }

    /// Erases the calling user under right-to-erasure.
    ///
    /// # Errors
    ///
    /// Returns store errors; analytics rows are retained de-identified.
    pub fn erase_me(&self, authed: &AuthedUser) -> Result<(), ApiError> {
        self.store.erase_user(&authed.user_id, self.now(), &Self::ctx(authed))?;
        Ok(())
    }

    // ========================================================================
    // SECTION: Consent
    // ========================================================================

    /// Appends a consent record for the caller.
    ///
    /// # Errors
    ///
    /// Returns `Validation` when the acknowledged document version is not
    /// the current one.
    pub fn grant_consent(
        &self,
        authed: &AuthedUser,
        payload: &ConsentPayload,
    ) -> Result<(), ApiError> {
        if payload.version != self.config.consent.document_version {
            return Err(ApiError::validation(format!(
                "consent document version must be {}",
                self.config.consent.document_version
            )));
        }
        let record = ConsentRecord {
            user_id: authed.user_id.clone(),
            category: payload.category,
            scope: payload.scope,
            version: payload.version,
            granted: payload.granted,
            granted_at: self.now(),
        };
        self.store.append_consent(&record, &Self::ctx(authed))?;
        Ok(())
    }

    /// Lists the caller's consent history.
    ///
    /// # Errors
    ///
    /// Returns store errors.
    pub fn list_consents(&self, authed: &AuthedUser) -> Result<ConsentListResponse, ApiError> {
        let consents = self
            .store
            .list_consents(&authed.user_id)?
            .into_iter()
            .map(|record| {
                Ok(ConsentView {
                    category: record.category.as_str(),
                    scope: record.scope.as_str(),
                    version: record.version,
                    granted: record.granted,
                    granted_at: rfc3339(record.granted_at)?,
                })
            })
            .collect::<Result<Vec<_>, ApiError>>()?;
        Ok(ConsentListResponse {
            report_version: REPORT_VERSION,
            consents,
        })
    }

    /// Fails closed unless `(category, scope)` is granted right now.
    fn require_consent(
        &self,
        user_id: &UserId,
        category: ConsentCategory,
        scope: ConsentScope,
    ) -> Result<(), ApiError> {
        let granted = self.store.is_consent_granted(
            user_id,
            category,
            scope,
            self.config.consent.document_version,
            self.now(),
        )?;
        sahay_core::core::consent::require(granted, category, scope).map_err(ApiError::from)
    }

    /// Fails closed unless `category` is granted under at least one scope.
    ///
    /// The scope axis governs read visibility; self-originated writes need
    /// the category consented under any scope.
    fn require_consent_any_scope(
        &self,
        user_id: &UserId,
        category: ConsentCategory,
    ) -> Result<(), ApiError> {
        for scope in [ConsentScope::Asha, ConsentScope::Clinician, ConsentScope::GovAggregated] {
            if self.store.is_consent_granted(
                user_id,
                category,
                scope,
                self.config.consent.document_version,
                self.now(),
            )? {
                return Ok(());
            }
        }
        Err(ApiError::new(
            ErrorKind::ConsentMissing,
            format!("consent missing: {}", category.as_str()),
        ))
    }

    // ========================================================================
    // SECTION: Sync
    // ========================================================================

    /// Ingests an offline-sync batch for the caller.
    ///
    /// # Errors
    ///
    /// Returns `ConsentMissing` without `cloud_sync` consent and
    /// `Validation` when the batch exceeds the configured bound. Item
    /// failures surface as per-item outcomes, never batch errors.
    pub fn sync_batch(
        &self,
        authed: &AuthedUser,
        request: &SyncBatchRequest,
    ) -> Result<SyncBatchResponse, ApiError> {
        self.require_consent_any_scope(&authed.user_id, ConsentCategory::CloudSync)?;

        let mut envelopes = Vec::with_capacity(request.events.len());
        let mut premapped = Vec::with_capacity(request.events.len());
        for dto in &request.events {
            if dto.user_id != authed.user_id.as_str() {
                premapped.push(Some("rejected:invalid:not_owner".to_string()));
                envelopes.push(None);
                continue;
            }
            match Timestamp::from_rfc3339(&dto.client_time) {
                Ok(client_time) => {
                    premapped.push(None);
                    envelopes.push(Some(SyncEnvelope {
                        event_id: EventId::new(dto.event_id.clone()),
                        device_id: DeviceId::new(dto.device_id.clone()),
                        user_id: authed.user_id.clone(),
                        entity_type: dto.entity_type,
                        operation: dto.operation,
                        client_time,
                        payload: dto.payload.clone(),
                    }));
                }
                Err(_) => {
                    premapped.push(Some("rejected:invalid:client_time".to_string()));
                    envelopes.push(None);
                }
            }
        }

        let to_ingest: Vec<SyncEnvelope> = envelopes.iter().flatten().cloned().collect();
        let mut ingested = self
            .store
            .ingest_batch(
                &to_ingest,
                self.config.server.max_sync_batch_items,
                self.now(),
                &Self::ctx(authed),
            )?
            .into_iter();

        let results = request
            .events
            .iter()
            .zip(premapped)
            .map(|(dto, premap)| {
                let outcome = premap.unwrap_or_else(|| {
                    ingested.next().map_or_else(
                        || "rejected:transient".to_string(),
                        |item| item.outcome.as_label(),
                    )
                });
                SyncItemResult {
                    event_id: dto.event_id.clone(),
                    outcome,
                }
            })
            .collect();
        Ok(SyncBatchResponse {
            report_version: REPORT_VERSION,
            results,
        })
    }

    // ========================================================================
    // SECTION: Triage
    // ========================================================================

    /// Runs a triage assessment and stores the session.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for empty symptom text.
    pub fn triage_create(
        &self,
        authed: &AuthedUser,
        request: &TriageCreateRequest,
    ) -> Result<TriageSessionResponse, ApiError> {
        if request.symptoms_text.trim().is_empty() {
            return Err(ApiError::validation("symptoms_text is required"));
        }
        let input = TriageInput {
            symptoms_text: request.symptoms_text.clone(),
            age: request.age,
            sex: request.sex,
            pregnancy: request.pregnancy,
            language: request.language.as_deref().map_or(Language::En, Language::from_tag),
        };
        let assessment = assess(&input, None);
        let now = self.now();
        let record = TriageSessionRecord {
            id: TriageSessionId::new(fresh_id("ts")),
            owner_id: authed.user_id.clone(),
            symptoms_text: request.symptoms_text.clone(),
            category: assessment.category,
            red_flags: assessment.red_flags.clone(),
            guidance_text: assessment.guidance_text.clone(),
            created_at: now,
        };
        self.store.insert_triage_session(&record, &Self::ctx(authed))?;

        let event_type = match assessment.category {
            sahay_core::TriageCategory::Emergency => "triage_emergency",
            sahay_core::TriageCategory::Phc | sahay_core::TriageCategory::SelfCare => {
                "triage_completed"
            }
        };
        self.emit_if_consented(authed, RawAnalyticsEvent {
            event_type: event_type.to_string(),
            category: assessment.category.as_str().to_string(),
            event_time: now,
            age: request.age,
            sex: request.sex,
            pincode: None,
            payload: json!({ "red_flag_count": assessment.red_flags.len() }),
        })?;

        Ok(TriageSessionResponse {
            report_version: REPORT_VERSION,
            session_id: record.id,
            category: assessment.category.as_str(),
            red_flags: assessment.red_flags,
            guidance_text: assessment.guidance_text,
        })
    }

    /// Fetches a triage session. Strictly owner-only.
    ///
    /// # Errors
    ///
    /// Returns `Forbidden` for non-owners and `NotFound` for unknown ids.
    pub fn triage_get(
        &self,
        authed: &AuthedUser,
        id: &str,
    ) -> Result<TriageSessionResponse, ApiError> {
        let record = self
            .store
            .get_triage_session(&TriageSessionId::new(id))?
            .ok_or_else(|| ApiError::new(ErrorKind::NotFound, "triage session not found"))?;
        authed.require_owner_or(&record.owner_id, &[])?;
        Ok(TriageSessionResponse {
            report_version: REPORT_VERSION,
            session_id: record.id,
            category: record.category.as_str(),
            red_flags: record.red_flags,
            guidance_text: record.guidance_text,
        })
    }

    // ========================================================================
    // SECTION: Teleconsultation
    // ========================================================================

    /// Creates a teleconsultation request for the caller.
    ///
    /// # Errors
    ///
    /// Returns store errors.
    pub fn tele_create(&self, authed: &AuthedUser) -> Result<TeleRequestResponse, ApiError> {
        let now = self.now();
        let record = TeleRequestRecord {
            id: TeleRequestId::new(fresh_id("tr")),
            citizen_id: authed.user_id.clone(),
            clinician_id: None,
            status: TeleStatus::Requested,
            created_at: now,
        };
        self.store.create_tele_request(&record, &Self::ctx(authed))?;
        self.emit_if_consented(authed, RawAnalyticsEvent {
            event_type: "tele_request_created".to_string(),
            category: "general".to_string(),
            event_time: now,
            age: None,
            sex: None,
            pincode: None,
            payload: json!({}),
        })?;
        Ok(TeleRequestResponse {
            report_version: REPORT_VERSION,
            id: record.id,
            status: record.status.as_str(),
            clinician_id: None,
        })
    }

    /// Transitions a tele request. Requires the `clinician` role.
    ///
    /// # Errors
    ///
    /// Returns `Forbidden` without the role and `StateInvalid` for illegal
    /// transitions.
    pub fn tele_patch(
        &self,
        authed: &AuthedUser,
        id: &str,
        patch: &TelePatchRequest,
    ) -> Result<TeleRequestResponse, ApiError> {
        authed.require_any_role(&[Role::Clinician])?;
        let record = self.store.update_tele_status(
            &TeleRequestId::new(id),
            patch.status,
            Some(&authed.user_id),
            self.now(),
            &Self::ctx(authed),
        )?;
        if record.status == TeleStatus::Completed {
            self.emit_if_consented(authed, RawAnalyticsEvent {
                event_type: "tele_consultation_completed".to_string(),
                category: "general".to_string(),
                event_time: self.now(),
                age: None,
                sex: None,
                pincode: None,
                payload: json!({}),
            })?;
        }
        Ok(TeleRequestResponse {
            report_version: REPORT_VERSION,
            id: record.id,
            status: record.status.as_str(),
            clinician_id: record.clinician_id,
        })
    }

    /// Issues a prescription. Requires the `clinician` role.
    ///
    /// # Errors
    ///
    /// Returns `Validation` when the summary is outside 160-300 characters.
    pub fn prescription_create(
        &self,
        authed: &AuthedUser,
        request: &PrescriptionCreateRequest,
    ) -> Result<Value, ApiError> {
        authed.require_any_role(&[Role::Clinician])?;
        let record = PrescriptionRecord {
            id: sahay_core::PrescriptionId::new(fresh_id("rx")),
            tele_request_id: TeleRequestId::new(request.tele_request_id.clone()),
            items: request.items.clone(),
            summary_text: request.summary_text.clone(),
            created_at: self.now(),
        };
        self.store.insert_prescription(&record, &Self::ctx(authed))?;
        Ok(json!({
            "report_version": REPORT_VERSION,
            "prescription_id": record.id.as_str(),
        }))
    }

    // ========================================================================
    // SECTION: Complaints
    // ========================================================================

    /// Files a complaint, optionally anonymously.
    ///
    /// # Errors
    ///
    /// Returns `ConsentMissing` for non-anonymous filings without
    /// `complaints` consent and `Validation` for malformed payload base64.
    pub fn complaint_create(
        &self,
        authed: &AuthedUser,
        request: &ComplaintCreateRequest,
    ) -> Result<ComplaintResponse, ApiError> {
        let payload_encrypted = BASE64
            .decode(&request.payload)
            .map_err(|_| ApiError::validation("payload must be base64"))?;
        let submitter_id = if request.anonymous {
            None
        } else {
            self.require_consent_any_scope(&authed.user_id, ConsentCategory::Complaints)?;
            Some(authed.user_id.clone())
        };
        let new = NewComplaint {
            id: ComplaintId::new(fresh_id("c")),
            submitter_id,
            category: request.category,
            payload_encrypted,
        };
        let ctx = if request.anonymous {
            AuditContext::anonymous()
        } else {
            Self::ctx(authed)
        };
        let complaint = self.store.create_complaint(&new, &self.sla, self.now(), &ctx)?;
        if !request.anonymous {
            self.emit_if_consented(authed, RawAnalyticsEvent {
                event_type: "complaint_submitted".to_string(),
                category: complaint.category.as_str().to_string(),
                event_time: complaint.created_at,
                age: None,
                sex: None,
                pincode: None,
                payload: json!({}),
            })?;
        }
        complaint_response(&complaint)
    }

    /// Fetches a complaint: owner, or district officer and above.
    ///
    /// # Errors
    ///
    /// Returns `Forbidden` for other callers.
    pub fn complaint_get(&self, authed: &AuthedUser, id: &str) -> Result<ComplaintResponse, ApiError> {
        let complaint = self
            .store
            .get_complaint(&ComplaintId::new(id))?
            .ok_or_else(|| ApiError::new(ErrorKind::NotFound, "complaint not found"))?;
        match &complaint.submitter_id {
            Some(owner) => authed.require_owner_or(
                owner,
                &[Role::DistrictOfficer, Role::StateOfficer, Role::NationalAdmin],
            )?,
            None => authed.require_officer_at_least(Role::DistrictOfficer)?,
        }
        complaint_response(&complaint)
    }

    /// Transitions a complaint. Requires district officer or above.
    ///
    /// # Errors
    ///
    /// Returns `StateInvalid` for illegal transitions.
    pub fn complaint_patch(
        &self,
        authed: &AuthedUser,
        id: &str,
        patch: &ComplaintPatchRequest,
    ) -> Result<ComplaintResponse, ApiError> {
        authed.require_officer_at_least(Role::DistrictOfficer)?;
        let complaint = self.store.update_complaint_status(
            &ComplaintId::new(id),
            patch.status,
            self.now(),
            &Self::ctx(authed),
        )?;
        if complaint.status == ComplaintStatus::Resolved {
            self.emit_if_consented(authed, RawAnalyticsEvent {
                event_type: "complaint_resolved".to_string(),
                category: complaint.category.as_str().to_string(),
                event_time: self.now(),
                age: None,
                sex: None,
                pincode: None,
                payload: json!({}),
            })?;
        }
        complaint_response(&complaint)
    }

    /// Closes a complaint with feedback: submitter, or district officer and
    /// above.
    ///
    /// # Errors
    ///
    /// Returns `StateInvalid` when feedback is empty or the complaint is not
    /// `resolved`.
    pub fn complaint_close(
        &self,
        authed: &AuthedUser,
        id: &str,
        request: &ComplaintCloseRequest,
    ) -> Result<ComplaintResponse, ApiError> {
        let complaint_id = ComplaintId::new(id);
        let existing = self
            .store
            .get_complaint(&complaint_id)?
            .ok_or_else(|| ApiError::new(ErrorKind::NotFound, "complaint not found"))?;
        match &existing.submitter_id {
            Some(owner) => authed.require_owner_or(
                owner,
                &[Role::DistrictOfficer, Role::StateOfficer, Role::NationalAdmin],
            )?,
            None => authed.require_officer_at_least(Role::DistrictOfficer)?,
        }
        let complaint = self.store.close_complaint(
            &complaint_id,
            &request.resolution_note,
            &request.feedback,
            self.now(),
            &Self::ctx(authed),
        )?;
        complaint_response(&complaint)
    }

    // ========================================================================
    // SECTION: Analytics
    // ========================================================================

    /// Emits a de-identified analytics event for the caller.
    ///
    /// # Errors
    ///
    /// Returns `ConsentMissing` without `analytics`/`gov_aggregated`
    /// consent and `Validation` for payloads failing de-identification.
    pub fn analytics_emit(
        &self,
        authed: &AuthedUser,
        request: &AnalyticsEmitRequest,
    ) -> Result<Value, ApiError> {
        self.require_consent(
            &authed.user_id,
            ConsentCategory::Analytics,
            ConsentScope::GovAggregated,
        )?;
        let event_time = match &request.event_time {
            Some(raw) => Timestamp::from_rfc3339(raw)
                .map_err(|err| ApiError::validation(err.to_string()))?,
            None => self.now(),
        };
        let raw = RawAnalyticsEvent {
            event_type: request.event_type.clone(),
            category: request.category.clone(),
            event_time,
            age: request.age,
            sex: request.sex,
            pincode: request.pincode.clone(),
            payload: request.payload.clone(),
        };
        let event =
            deidentify(&raw).map_err(|err| ApiError::validation(err.to_string()))?;
        self.store.insert_analytics_event(
            &event,
            Some(&authed.user_id),
            self.now(),
            &Self::ctx(authed),
        )?;
        if self.buffer.record(&event) {
            self.flush_buffer()?;
        }
        Ok(json!({ "report_version": REPORT_VERSION, "accepted": true }))
    }

    /// Emits a handler-attached analytics event if consent allows it.
    ///
    /// Missing consent skips the emission; it never fails the handler.
    fn emit_if_consented(
        &self,
        authed: &AuthedUser,
        raw: RawAnalyticsEvent,
    ) -> Result<(), ApiError> {
        let granted = self.store.is_consent_granted(
            &authed.user_id,
            ConsentCategory::Analytics,
            ConsentScope::GovAggregated,
            self.config.consent.document_version,
            self.now(),
        )?;
        if !granted {
            return Ok(());
        }
        let Ok(event) = deidentify(&raw) else {
            return Ok(());
        };
        self.store.insert_analytics_event(
            &event,
            Some(&authed.user_id),
            self.now(),
            &Self::ctx(authed),
        )?;
        if self.buffer.record(&event) {
            self.flush_buffer()?;
        }
        Ok(())
    }

    /// Drains the aggregation buffer into the aggregate table.
    ///
    /// # Errors
    ///
    /// Returns store errors; drained entries are re-applied on retry by the
    /// at-least-once flush job.
    pub fn flush_buffer(&self) -> Result<(), ApiError> {
        let entries = self.buffer.drain();
        if entries.is_empty() {
            return Ok(());
        }
        self.store.upsert_aggregates(&entries, self.now())?;
        Ok(())
    }

    /// Runs an aggregate query with the k filter.
    ///
    /// # Errors
    ///
    /// Returns store errors or `Validation` for malformed bounds.
    pub fn analytics_query(
        &self,
        _authed: &AuthedUser,
        params: &AggregateQueryParams,
    ) -> Result<AggregateReportResponse, ApiError> {
        let parse = |raw: &Option<String>| -> Result<Option<Timestamp>, ApiError> {
            raw.as_deref()
                .map(|value| {
                    Timestamp::from_rfc3339(value)
                        .map_err(|err| ApiError::validation(err.to_string()))
                })
                .transpose()
        };
        let query = AggregateQuery {
            event_type: params.event_type.clone(),
            category: params.category.clone(),
            geo_cell: params.geo_cell.clone(),
            age_bucket: params.age_bucket.clone(),
            gender: params.gender.clone(),
            from_bucket: parse(&params.from)?,
            to_bucket: parse(&params.to)?,
        };
        let k = self.config.analytics.k_threshold;
        let rows = self
            .store
            .query_aggregates(&query, k)?
            .into_iter()
            .map(|row| {
                Ok(AggregateRowView {
                    event_type: row.event_type,
                    category: row.category,
                    time_bucket: rfc3339(row.time_bucket)?,
                    geo_cell: row.geo_cell,
                    age_bucket: row.age_bucket,
                    gender: row.gender,
                    count: row.count,
                })
            })
            .collect::<Result<Vec<_>, ApiError>>()?;
        Ok(AggregateReportResponse {
            report_version: REPORT_VERSION,
            k_threshold: k,
            rows,
        })
    }

    /// Runs an aggregate query and groups the k-filtered rows.
    ///
    /// Every input row already satisfies `count >= k`, so grouped sums do
    /// too.
    ///
    /// # Errors
    ///
    /// Returns store errors or `Validation` for malformed bounds.
    pub fn analytics_grouped(
        &self,
        authed: &AuthedUser,
        params: &AggregateQueryParams,
        group: GroupBy,
    ) -> Result<Value, ApiError> {
        let report = self.analytics_query(authed, params)?;
        let mut grouped: std::collections::BTreeMap<String, u64> = std::collections::BTreeMap::new();
        for row in &report.rows {
            let key = match group {
                GroupBy::Geo => row.geo_cell.clone(),
                GroupBy::Category => row.category.clone(),
                GroupBy::Demographic => format!("{}|{}", row.age_bucket, row.gender),
            };
            *grouped.entry(key).or_insert(0) += row.count;
        }
        let rows: Vec<Value> = grouped
            .into_iter()
            .map(|(key, count)| json!({ "key": key, "count": count }))
            .collect();
        Ok(json!({
            "report_version": REPORT_VERSION,
            "k_threshold": report.k_threshold,
            "rows": rows,
        }))
    }

    /// Returns top regions by total count, k-filtered.
    ///
    /// # Errors
    ///
    /// Returns store errors.
    pub fn analytics_top_regions(
        &self,
        _authed: &AuthedUser,
        limit: usize,
    ) -> Result<TopRegionsResponse, ApiError> {
        let k = self.config.analytics.k_threshold;
        let regions = self.store.top_regions(k, limit.clamp(1, 100))?;
        Ok(TopRegionsResponse {
            report_version: REPORT_VERSION,
            k_threshold: k,
            regions,
        })
    }

    // ========================================================================
    // SECTION: Dashboard Views
    // ========================================================================

    /// Rebuilds the materialized views. Requires district officer or above.
    ///
    /// # Errors
    ///
    /// Returns store errors.
    pub fn refresh_views(&self, authed: &AuthedUser) -> Result<Value, ApiError> {
        authed.require_officer_at_least(Role::DistrictOfficer)?;
        let watermark = self.store.refresh_views(
            self.config.analytics.k_threshold,
            self.now(),
            &Self::ctx(authed),
        )?;
        Ok(json!({
            "report_version": REPORT_VERSION,
            "refreshed_at": rfc3339(watermark)?,
        }))
    }

    /// Returns a materialized view. Requires district officer or above.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown view names.
    pub fn get_view(&self, authed: &AuthedUser, view: &str) -> Result<ViewResponse, ApiError> {
        authed.require_officer_at_least(Role::DistrictOfficer)?;
        let known = [
            sahay_store_sqlite::VIEW_DAILY_TRIAGE,
            sahay_store_sqlite::VIEW_COMPLAINTS_BY_DISTRICT,
            sahay_store_sqlite::VIEW_SYMPTOM_HEATMAP,
            sahay_store_sqlite::VIEW_SLA_BREACHES,
        ];
        if !known.contains(&view) {
            return Err(ApiError::new(ErrorKind::NotFound, "unknown view"));
        }
        let rows = self.store.view_rows(view)?;
        let refreshed_at = rows.first().map(|row| rfc3339(row.refreshed_at)).transpose()?;
        Ok(ViewResponse {
            report_version: REPORT_VERSION,
            view: view.to_string(),
            refreshed_at,
            rows: rows
                .into_iter()
                .map(|row| ViewRowView {
                    row_key: row.row_key,
                    value: row.value,
                })
                .collect(),
        })
    }

    // ========================================================================
    // SECTION: Audit
    // ========================================================================

    /// Lists audit entries. Requires the `national_admin` role.
    ///
    /// # Errors
    ///
    /// Returns `Forbidden` without the role.
    pub fn audit_logs(
        &self,
        authed: &AuthedUser,
        after_seq: u64,
        limit: usize,
    ) -> Result<AuditLogResponse, ApiError> {
        authed.require_any_role(&[Role::NationalAdmin])?;
        let entries = self
            .store
            .audit_entries(after_seq, limit.clamp(1, 1_000))?
            .into_iter()
            .map(|entry| {
                serde_json::to_value(&entry)
                    .map_err(|err| ApiError::new(ErrorKind::Transient, err.to_string()))
            })
            .collect::<Result<Vec<_>, ApiError>>()?;
        Ok(AuditLogResponse {
            report_version: REPORT_VERSION,
            entries,
        })
    }

    /// Verifies the audit chain. Requires the `national_admin` role.
    ///
    /// # Errors
    ///
    /// Returns `Forbidden` without the role; a broken chain is reported in
    /// the body, not as a transport error.
    pub fn audit_verify(&self, authed: &AuthedUser) -> Result<Value, ApiError> {
        authed.require_any_role(&[Role::NationalAdmin])?;
        let report = self.store.verify_audit_chain()?;
        report_to_json(&report)
    }

    // ========================================================================
    // SECTION: Scheduler Entrypoints
    // ========================================================================

    /// One SLA tick: escalates every due complaint. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns store errors.
    pub fn run_sla_tick(&self) -> Result<u32, ApiError> {
        let now = self.now();
        let ctx = AuditContext::system("sla_tick");
        let due = self.store.due_complaints(now)?;
        let mut bumped = 0_u32;
        for complaint in due {
            let outcome = self.store.apply_escalation(&complaint.id, now, &self.sla, &ctx)?;
            if let Some(EscalationOutcome::Bumped {
                ..
            }) = outcome
            {
                bumped += 1;
            }
        }
        Ok(bumped)
    }

    /// One anchor drain: submits pending jobs, serialized per complaint.
    ///
    /// Unavailable-chain submissions return to the queue; permanent
    /// rejections drop the job so the queue cannot poison itself.
    ///
    /// # Errors
    ///
    /// Returns store errors.
    pub fn run_anchor_drain(&self, limit: usize) -> Result<u32, ApiError> {
        if !self.config.anchor.enabled {
            return Ok(0);
        }
        let jobs = self.store.pending_anchor_jobs(limit)?;
        let mut completed = 0_u32;
        for job in jobs {
            self.store.set_anchor_in_flight(job.id, true)?;
            let result = self.submit_anchor_job(&job);
            match result {
                Ok(Some(recorded_nonce)) => {
                    self.store.complete_anchor_job(job.id, recorded_nonce)?;
                    completed += 1;
                }
                Ok(None) => {
                    self.store.set_anchor_in_flight(job.id, false)?;
                }
                Err(_) => {
                    // Permanent rejection: abandon the job so the queue
                    // cannot poison itself; the anchor state is untouched.
                    self.store.abandon_anchor_job(job.id)?;
                }
            }
        }
        Ok(completed)
    }

    /// Submits one anchor job. `Ok(Some(nonce))` on acceptance, `Ok(None)`
    /// on requeue.
    fn submit_anchor_job(&self, job: &sahay_store_sqlite::AnchorJob) -> Result<Option<u64>, ApiError> {
        let now = self.now();
        let complaint_hash = anchor_hash(&job.complaint_hash)?;
        let status_hash = anchor_hash(&job.status_hash)?;
        let outcome = match job.kind {
            AnchorJobKind::Create => {
                let sla_digest = job
                    .sla_hash
                    .as_ref()
                    .ok_or_else(|| ApiError::new(ErrorKind::Transient, "create job without sla hash"))?;
                let request = CreateAnchorRequest {
                    complaint_hash,
                    sla_hash: anchor_hash(sla_digest)?,
                    status_hash,
                    created_at: job.at_time,
                    nonce: job.nonce,
                };
                self.anchor
                    .submit_create(&request, now, 0)
                    .map_err(|err| ApiError::new(ErrorKind::ChainUnavailable, err.to_string()))?
            }
            AnchorJobKind::Update => {
                let created_at = self
                    .store
                    .anchor_for_complaint(&job.complaint_id)?
                    .map_or(job.at_time, |anchor| anchor.created_at);
                let request = UpdateStatusRequest {
                    complaint_hash,
                    status_hash,
                    updated_at: job.at_time,
                    nonce: job.nonce,
                };
                self.anchor
                    .submit_update(&request, created_at, 0)
                    .map_err(|err| ApiError::new(ErrorKind::ChainUnavailable, err.to_string()))?
            }
        };
        match outcome {
            SubmitOutcome::Accepted {
                receipt,
            } => Ok(Some(receipt.nonce)),
            SubmitOutcome::Requeue {
                ..
            } => Ok(None),
        }
    }

    /// One view refresh run for the scheduler.
    ///
    /// # Errors
    ///
    /// Returns store errors.
    pub fn run_view_refresh(&self) -> Result<Timestamp, ApiError> {
        let watermark = self.store.refresh_views(
            self.config.analytics.k_threshold,
            self.now(),
            &AuditContext::system("view_refresh"),
        )?;
        Ok(watermark)
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Generates a prefixed random identifier.
fn fresh_id(prefix: &str) -> String {
    let mut bytes = [0_u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    let mut out = String::with_capacity(prefix.len() + 1 + 32);
    out.push_str(prefix);
    out.push('-');
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Renders a timestamp as RFC 3339, mapping errors to the API taxonomy.
fn rfc3339(at: Timestamp) -> Result<String, ApiError> {
    at.to_rfc3339().map_err(|err| ApiError::new(ErrorKind::Transient, err.to_string()))
}

/// Builds the wire form of a complaint. Never includes the submitter.
fn complaint_response(complaint: &sahay_core::Complaint) -> Result<ComplaintResponse, ApiError> {
    Ok(ComplaintResponse {
        report_version: REPORT_VERSION,
        id: complaint.id.clone(),
        category: complaint.category.as_str(),
        status: complaint.status.as_str(),
        sla_deadline: rfc3339(complaint.sla_deadline)?,
        escalation_level: complaint.escalation_level.as_str(),
    })
}

/// Converts a stored digest into a 32-byte anchor hash.
fn anchor_hash(digest: &sahay_core::HashDigest) -> Result<AnchorHash, ApiError> {
    AnchorHash::from_digest(digest)
        .map_err(|err| ApiError::new(ErrorKind::Transient, err.to_string()))
}

/// Renders a chain report with the report envelope.
fn report_to_json(report: &ChainReport) -> Result<Value, ApiError> {
    Ok(json!({
        "report_version": REPORT_VERSION,
        "ok": report.ok,
        "first_broken_seq": report.first_broken_seq,
        "checked": report.checked,
    }))
}
