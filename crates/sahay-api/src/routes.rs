// crates/sahay-api/src/routes.rs
// ============================================================================
// Module: HTTP Routes
// Description: axum router and thin handler adapters over the service layer.
// Purpose: Map the HTTP surface onto the canonical execution path.
// Dependencies: sahay-api service layer, axum
// ============================================================================

//! ## Overview
//! Handlers extract request metadata (bearer token, peer IP, device label),
//! admit the request through the rate limiter and inflight cap, then call
//! into [`Service`]. No business logic lives here; anything a handler can
//! do, a test can do through the service directly.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

use axum::Json;
use axum::Router;
use axum::extract::ConnectInfo;
use axum::extract::DefaultBodyLimit;
use axum::extract::Path;
use axum::extract::Query;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::delete;
use axum::routing::get;
use axum::routing::patch;
use axum::routing::post;
use sahay_config::RateLimitConfig;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Semaphore;

use crate::auth::RequestMeta;
use crate::auth::bearer_token;
use crate::error::ApiError;
use crate::error::ErrorKind;
use crate::service::AggregateQueryParams;
use crate::service::AnalyticsEmitRequest;
use crate::service::AuthRequest;
use crate::service::ComplaintCloseRequest;
use crate::service::ComplaintCreateRequest;
use crate::service::ComplaintPatchRequest;
use crate::service::ConsentPayload;
use crate::service::GroupBy;
use crate::service::PrescriptionCreateRequest;
use crate::service::REPORT_VERSION;
use crate::service::Service;
use crate::service::SyncBatchRequest;
use crate::service::TelePatchRequest;
use crate::service::TriageCreateRequest;
use crate::telemetry::ApiMetrics;

// ============================================================================
// SECTION: App State
// ============================================================================

/// Shared state behind every handler.
pub struct AppState {
    /// Canonical service layer.
    pub service: Service,
    /// Metrics sink.
    pub metrics: Arc<dyn ApiMetrics>,
    /// Inflight request cap.
    pub inflight: Semaphore,
    /// Optional fixed-window rate limiter.
    pub rate_limiter: Option<RateLimiter>,
}

/// Fixed-window rate limiter with in-memory buckets keyed by peer IP.
pub struct RateLimiter {
    /// Rate limit configuration.
    config: RateLimitConfig,
    /// Per-key request buckets.
    buckets: Mutex<HashMap<String, RateLimitBucket>>,
}

/// Rolling state for a single rate limit key.
struct RateLimitBucket {
    /// Window start time for the current bucket.
    window_start: Instant,
    /// Requests observed in the current window.
    count: u32,
}

impl RateLimiter {
    /// Creates a limiter from configuration.
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Admits or rejects one request for `key`.
    #[must_use]
    pub fn admit(&self, key: &str) -> bool {
        let Ok(mut buckets) = self.buckets.lock() else {
            return false;
        };
        let window = Duration::from_secs(self.config.window_seconds);
        let now = Instant::now();
        let bucket = buckets.entry(key.to_string()).or_insert(RateLimitBucket {
            window_start: now,
            count: 0,
        });
        if now.duration_since(bucket.window_start) >= window {
            bucket.window_start = now;
            bucket.count = 0;
        }
        if bucket.count >= self.config.requests_per_window {
            return false;
        }
        bucket.count += 1;
        true
    }
}

// ============================================================================
// SECTION: Request Admission
// ============================================================================

/// Builds request metadata and applies rate limiting.
fn admit(
    state: &AppState,
    headers: &HeaderMap,
    peer: SocketAddr,
) -> Result<RequestMeta, ApiError> {
    if let Some(limiter) = &state.rate_limiter {
        if !limiter.admit(&peer.ip().to_string()) {
            return Err(ApiError::new(ErrorKind::Transient, "rate limit exceeded"));
        }
    }
    let token = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(bearer_token)
        .map(str::to_string);
    let device = headers
        .get("x-device")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    Ok(RequestMeta {
        token,
        ip: Some(peer.ip().to_string()),
        device,
    })
}

/// Acquires an inflight permit, or sheds load.
fn permit(state: &AppState) -> Result<tokio::sync::SemaphorePermit<'_>, ApiError> {
    state
        .inflight
        .try_acquire()
        .map_err(|_| ApiError::new(ErrorKind::Transient, "server saturated"))
}

/// Runs a handler body with admission, auth, and metrics.
fn handle<T: serde::Serialize>(
    state: &AppState,
    route: &'static str,
    headers: &HeaderMap,
    peer: SocketAddr,
    body: impl FnOnce(&Service, RequestMeta) -> Result<T, ApiError>,
) -> Response {
    let started = Instant::now();
    let result = (|| {
        let _permit = permit(state)?;
        let meta = admit(state, headers, peer)?;
        body(&state.service, meta)
    })();
    let (outcome, response) = match result {
        Ok(value) => (crate::telemetry::ApiOutcome::Ok, Json(value).into_response()),
        Err(err) => {
            let outcome = if err.kind.status().is_server_error() {
                crate::telemetry::ApiOutcome::ServerError
            } else {
                crate::telemetry::ApiOutcome::ClientError
            };
            (outcome, err.into_response())
        }
    };
    state.metrics.record_request(route, outcome, started.elapsed());
    response
}

// ============================================================================
// SECTION: Router
// ============================================================================

/// Builds the full SAHAY router.
#[must_use]
pub fn router(state: Arc<AppState>) -> Router {
    let max_body = state.service.config().server.max_body_bytes;
    Router::new()
        .route("/auth/register", post(auth_register))
        .route("/auth/login", post(auth_login))
        .route("/consents", post(consents_grant).get(consents_list))
        .route("/sync/events:batch", post(sync_batch))
        .route("/triage/sessions", post(triage_create))
        .route("/triage/sessions/{id}", get(triage_get))
        .route("/tele/requests", post(tele_create))
        .route("/tele/requests/{id}", patch(tele_patch))
        .route("/prescriptions", post(prescription_create))
        .route("/complaints", post(complaint_create))
        .route("/complaints/{id}", get(complaint_get).patch(complaint_patch))
        .route("/complaints/{id}/close", post(complaint_close))
        .route("/analytics/events", post(analytics_emit))
        .route("/analytics/summary", get(analytics_summary))
        .route("/analytics/timeseries", get(analytics_timeseries))
        .route("/analytics/heatmap", get(analytics_heatmap))
        .route("/analytics/categories", get(analytics_categories))
        .route("/analytics/demographics", get(analytics_demographics))
        .route("/analytics/top-regions", get(analytics_top_regions))
        .route("/analytics/flush", post(analytics_flush))
        .route("/dashboard/materialized-views/refresh", post(views_refresh))
        .route("/dashboard/mv/{view}", get(views_get))
        .route("/audit/logs", get(audit_logs))
        .route("/audit/verify", get(audit_verify))
        .route("/users/me", delete(users_erase))
        .route("/health", get(health))
        .route("/version", get(version))
        .layer(DefaultBodyLimit::max(max_body))
        .with_state(state)
}

// ============================================================================
// SECTION: Identity Handlers
// ============================================================================

/// POST `/auth/register`.
async fn auth_register(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(request): Json<AuthRequest>,
) -> Response {
    handle(&state, "/auth/register", &headers, peer, |service, meta| {
        service.register(&request, &meta)
    })
}

/// POST `/auth/login`.
async fn auth_login(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(request): Json<AuthRequest>,
) -> Response {
    handle(&state, "/auth/login", &headers, peer, |service, meta| {
        service.login(&request, &meta)
    })
}

/// DELETE `/users/me`.
async fn users_erase(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    handle(&state, "/users/me", &headers, peer, |service, meta| {
        let authed = service.authenticate(&meta)?;
        service.erase_me(&authed)?;
        Ok(json!({ "erased": true }))
    })
}

// ============================================================================
// SECTION: Consent Handlers
// ============================================================================

/// POST `/consents`.
async fn consents_grant(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(payload): Json<ConsentPayload>,
) -> Response {
    handle(&state, "/consents", &headers, peer, |service, meta| {
        let authed = service.authenticate(&meta)?;
        service.grant_consent(&authed, &payload)?;
        Ok(json!({ "recorded": true }))
    })
}

/// GET `/consents`.
async fn consents_list(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    handle(&state, "/consents", &headers, peer, |service, meta| {
        let authed = service.authenticate(&meta)?;
        service.list_consents(&authed)
    })
}

// ============================================================================
// SECTION: Sync Handler
// ============================================================================

/// POST `/sync/events:batch`.
async fn sync_batch(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(request): Json<SyncBatchRequest>,
) -> Response {
    handle(&state, "/sync/events:batch", &headers, peer, |service, meta| {
        let authed = service.authenticate(&meta)?;
        service.sync_batch(&authed, &request)
    })
}

// ============================================================================
// SECTION: Triage Handlers
// ============================================================================

/// POST `/triage/sessions`.
async fn triage_create(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(request): Json<TriageCreateRequest>,
) -> Response {
    handle(&state, "/triage/sessions", &headers, peer, |service, meta| {
        let authed = service.authenticate(&meta)?;
        service.triage_create(&authed, &request)
    })
}

/// GET `/triage/sessions/{id}`.
async fn triage_get(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    handle(&state, "/triage/sessions/{id}", &headers, peer, |service, meta| {
        let authed = service.authenticate(&meta)?;
        service.triage_get(&authed, &id)
    })
}

// ============================================================================
// SECTION: Teleconsultation Handlers
// ============================================================================

/// POST `/tele/requests`.
async fn tele_create(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    handle(&state, "/tele/requests", &headers, peer, |service, meta| {
        let authed = service.authenticate(&meta)?;
        service.tele_create(&authed)
    })
}

/// PATCH `/tele/requests/{id}`.
async fn tele_patch(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(patch): Json<TelePatchRequest>,
) -> Response {
    handle(&state, "/tele/requests/{id}", &headers, peer, |service, meta| {
        let authed = service.authenticate(&meta)?;
        service.tele_patch(&authed, &id, &patch)
    })
}

/// POST `/prescriptions`.
async fn prescription_create(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(request): Json<PrescriptionCreateRequest>,
) -> Response {
    handle(&state, "/prescriptions", &headers, peer, |service, meta| {
        let authed = service.authenticate(&meta)?;
        service.prescription_create(&authed, &request)
    })
}

// ============================================================================
// SECTION: Complaint Handlers
// ============================================================================

/// POST `/complaints`.
async fn complaint_create(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(request): Json<ComplaintCreateRequest>,
) -> Response {
    handle(&state, "/complaints", &headers, peer, |service, meta| {
        let authed = service.authenticate(&meta)?;
        service.complaint_create(&authed, &request)
    })
}

/// GET `/complaints/{id}`.
async fn complaint_get(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    handle(&state, "/complaints/{id}", &headers, peer, |service, meta| {
        let authed = service.authenticate(&meta)?;
        service.complaint_get(&authed, &id)
    })
}

/// PATCH `/complaints/{id}`.
async fn complaint_patch(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(patch): Json<ComplaintPatchRequest>,
) -> Response {
    handle(&state, "/complaints/{id}", &headers, peer, |service, meta| {
        let authed = service.authenticate(&meta)?;
        service.complaint_patch(&authed, &id, &patch)
    })
}

/// POST `/complaints/{id}/close`.
async fn complaint_close(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(request): Json<ComplaintCloseRequest>,
) -> Response {
    handle(&state, "/complaints/{id}/close", &headers, peer, |service, meta| {
        let authed = service.authenticate(&meta)?;
        service.complaint_close(&authed, &id, &request)
    })
}

// ============================================================================
// SECTION: Analytics Handlers
// ============================================================================

/// POST `/analytics/events`.
async fn analytics_emit(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(request): Json<AnalyticsEmitRequest>,
) -> Response {
    handle(&state, "/analytics/events", &headers, peer, |service, meta| {
        let authed = service.authenticate(&meta)?;
        service.analytics_emit(&authed, &request)
    })
}

/// GET `/analytics/summary`.
async fn analytics_summary(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(params): Query<AggregateQueryParams>,
) -> Response {
    handle(&state, "/analytics/summary", &headers, peer, |service, meta| {
        let authed = service.authenticate(&meta)?;
        service.analytics_query(&authed, &params)
    })
}

/// GET `/analytics/timeseries`.
async fn analytics_timeseries(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(params): Query<AggregateQueryParams>,
) -> Response {
    handle(&state, "/analytics/timeseries", &headers, peer, |service, meta| {
        let authed = service.authenticate(&meta)?;
        service.analytics_query(&authed, &params)
    })
}

/// GET `/analytics/heatmap`.
async fn analytics_heatmap(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(params): Query<AggregateQueryParams>,
) -> Response {
    handle(&state, "/analytics/heatmap", &headers, peer, |service, meta| {
        let authed = service.authenticate(&meta)?;
        service.analytics_grouped(&authed, &params, GroupBy::Geo)
    })
}

/// GET `/analytics/categories`.
async fn analytics_categories(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(params): Query<AggregateQueryParams>,
) -> Response {
    handle(&state, "/analytics/categories", &headers, peer, |service, meta| {
        let authed = service.authenticate(&meta)?;
        service.analytics_grouped(&authed, &params, GroupBy::Category)
    })
}

/// GET `/analytics/demographics`.
async fn analytics_demographics(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(params): Query<AggregateQueryParams>,
) -> Response {
    handle(&state, "/analytics/demographics", &headers, peer, |service, meta| {
        let authed = service.authenticate(&meta)?;
        service.analytics_grouped(&authed, &params, GroupBy::Demographic)
    })
}

/// Query parameters for top-regions.
#[derive(Debug, Deserialize)]
struct TopRegionsParams {
    /// Maximum regions to return.
    limit: Option<usize>,
}

/// GET `/analytics/top-regions`.
async fn analytics_top_regions(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(params): Query<TopRegionsParams>,
) -> Response {
    handle(&state, "/analytics/top-regions", &headers, peer, |service, meta| {
        let authed = service.authenticate(&meta)?;
        service.analytics_top_regions(&authed, params.limit.unwrap_or(10))
    })
}

/// POST `/analytics/flush` (admin).
async fn analytics_flush(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    handle(&state, "/analytics/flush", &headers, peer, |service, meta| {
        let authed = service.authenticate(&meta)?;
        authed.require_any_role(&[sahay_core::Role::NationalAdmin])?;
        service.flush_buffer()?;
        Ok(json!({ "report_version": REPORT_VERSION, "flushed": true }))
    })
}

// ============================================================================
// SECTION: Dashboard Handlers
// ============================================================================

/// POST `/dashboard/materialized-views/refresh`.
async fn views_refresh(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    handle(&state, "/dashboard/materialized-views/refresh", &headers, peer, |service, meta| {
        let authed = service.authenticate(&meta)?;
        service.refresh_views(&authed)
    })
}

/// GET `/dashboard/mv/{view}`.
async fn views_get(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(view): Path<String>,
) -> Response {
    handle(&state, "/dashboard/mv/{view}", &headers, peer, |service, meta| {
        let authed = service.authenticate(&meta)?;
        service.get_view(&authed, &view)
    })
}

// ============================================================================
// SECTION: Audit Handlers
// ============================================================================

/// Query parameters for audit listing.
#[derive(Debug, Deserialize)]
struct AuditLogParams {
    /// Return entries with `seq` greater than this.
    after_seq: Option<u64>,
    /// Maximum entries to return.
    limit: Option<usize>,
}

/// GET `/audit/logs`.
async fn audit_logs(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(params): Query<AuditLogParams>,
) -> Response {
    handle(&state, "/audit/logs", &headers, peer, |service, meta| {
        let authed = service.authenticate(&meta)?;
        service.audit_logs(&authed, params.after_seq.unwrap_or(0), params.limit.unwrap_or(100))
    })
}

/// GET `/audit/verify`.
async fn audit_verify(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    handle(&state, "/audit/verify", &headers, peer, |service, meta| {
        let authed = service.authenticate(&meta)?;
        service.audit_verify(&authed)
    })
}

// ============================================================================
// SECTION: Liveness Handlers
// ============================================================================

/// GET `/health`.
async fn health() -> Response {
    Json(json!({ "status": "ok" })).into_response()
}

/// GET `/version`.
async fn version() -> Response {
    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "report_version": REPORT_VERSION,
    }))
    .into_response()
}
