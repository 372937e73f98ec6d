// crates/sahay-api/src/server.rs
// ============================================================================
// Module: HTTP Server
// Description: Server assembly and the system clock.
// Purpose: Wire config, store, anchor contract, and scheduler into one
// running service.
// Dependencies: sahay-{config,core,store-sqlite,anchor}, axum, tokio
// ============================================================================

//! ## Overview
//! `serve` validates the configuration, opens the store, assembles the
//! service layer over the configured anchor contract, spawns the scheduler,
//! and runs the axum server until the listener fails. The system clock is
//! the only place wall-clock time enters the process.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use sahay_anchor::InMemoryAnchorContract;
use sahay_config::SahayConfig;
use sahay_core::AnchorContract;
use sahay_core::Clock;
use sahay_core::Timestamp;
use sahay_store_sqlite::SqliteStore;
use sahay_store_sqlite::SqliteStoreConfig;
use thiserror::Error;
use tokio::sync::Semaphore;

use crate::routes::AppState;
use crate::routes::RateLimiter;
use crate::routes::router;
use crate::scheduler;
use crate::service::Service;
use crate::telemetry::ApiMetrics;
use crate::telemetry::NoopMetrics;

// ============================================================================
// SECTION: System Clock
// ============================================================================

/// Wall clock backed by [`SystemTime`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX));
        Timestamp::from_unix_millis(millis)
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Configuration failed validation.
    #[error("config error: {0}")]
    Config(String),
    /// Store initialization failed.
    #[error("store error: {0}")]
    Store(String),
    /// Network binding or serving failed.
    #[error("transport error: {0}")]
    Transport(String),
}

// ============================================================================
// SECTION: Assembly
// ============================================================================

/// Builds the shared application state from validated parts.
///
/// # Errors
///
/// Returns [`ServerError::Store`] when the store cannot be opened.
pub fn build_state(
    config: SahayConfig,
    clock: Arc<dyn Clock>,
    contract: Arc<dyn AnchorContract>,
    metrics: Arc<dyn ApiMetrics>,
) -> Result<Arc<AppState>, ServerError> {
    let store = SqliteStore::open(&SqliteStoreConfig {
        path: config.database.path.clone(),
        busy_timeout_ms: config.database.busy_timeout_ms,
    })
    .map_err(|err| ServerError::Store(err.to_string()))?;
    let inflight = Semaphore::new(config.server.max_inflight);
    let rate_limiter = config.server.rate_limit.clone().map(RateLimiter::new);
    let service = Service::new(Arc::new(store), config, clock, contract);
    Ok(Arc::new(AppState {
        service,
        metrics,
        inflight,
        rate_limiter,
    }))
}

/// Runs the SAHAY server until the listener fails.
///
/// # Errors
///
/// Returns [`ServerError`] when validation, store setup, binding, or
/// serving fails.
pub async fn serve(config: SahayConfig) -> Result<(), ServerError> {
    config.validate().map_err(|err| ServerError::Config(err.to_string()))?;
    let bind: SocketAddr = config
        .server
        .bind
        .parse()
        .map_err(|_| ServerError::Config("invalid bind address".to_string()))?;

    // The in-memory contract stands in until a chain endpoint is deployed;
    // anchor jobs queue against it with full nonce semantics.
    let contract: Arc<dyn AnchorContract> = Arc::new(InMemoryAnchorContract::new());
    let state = build_state(config, Arc::new(SystemClock), contract, Arc::new(NoopMetrics))?;

    let holder = format!("sahay-{}", std::process::id());
    let jobs = scheduler::spawn(Arc::clone(&state), holder);

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .map_err(|err| ServerError::Transport(err.to_string()))?;
    let result = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .map_err(|err| ServerError::Transport(err.to_string()));

    for job in jobs {
        job.abort();
    }
    result
}
