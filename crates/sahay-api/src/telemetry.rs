// crates/sahay-api/src/telemetry.rs
// ============================================================================
// Module: API Telemetry
// Description: Observability hooks for request handling and scheduler jobs.
// Purpose: Provide metric events and latency buckets without hard deps.
// Dependencies: none beyond std
// ============================================================================

//! ## Overview
//! A thin metrics interface for request counters and latency histograms,
//! dependency-light so deployments can plug in Prometheus or OpenTelemetry
//! without redesign. Labels are fixed strings; telemetry must never carry
//! request payloads or requester identity.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Mutex;
use std::time::Duration;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Latency buckets in milliseconds for request histograms.
pub const LATENCY_BUCKETS_MS: &[u64] =
    &[1, 2, 5, 10, 25, 50, 100, 250, 500, 1_000, 2_500, 5_000, 10_000];

// ============================================================================
// SECTION: Metrics Interface
// ============================================================================

/// Request outcome classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiOutcome {
    /// Request succeeded.
    Ok,
    /// Request failed with a client error.
    ClientError,
    /// Request failed with a server error.
    ServerError,
}

impl ApiOutcome {
    /// Returns a stable label for the outcome.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::ClientError => "client_error",
            Self::ServerError => "server_error",
        }
    }
}

/// Metrics sink for API requests and scheduler jobs.
pub trait ApiMetrics: Send + Sync {
    /// Records one handled request.
    fn record_request(&self, route: &'static str, outcome: ApiOutcome, latency: Duration);

    /// Records one scheduler job run.
    fn record_job(&self, job: &'static str, outcome: ApiOutcome, latency: Duration);
}

/// Metrics sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl ApiMetrics for NoopMetrics {
    fn record_request(&self, _route: &'static str, _outcome: ApiOutcome, _latency: Duration) {}

    fn record_job(&self, _job: &'static str, _outcome: ApiOutcome, _latency: Duration) {}
}

/// In-memory counting sink for tests.
#[derive(Debug, Default)]
pub struct CountingMetrics {
    /// Recorded `(label, outcome)` pairs.
    events: Mutex<Vec<(String, &'static str)>>,
}

impl CountingMetrics {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the recorded `(label, outcome)` pairs.
    #[must_use]
    pub fn recorded(&self) -> Vec<(String, &'static str)> {
        self.events.lock().map(|events| events.clone()).unwrap_or_default()
    }
}

impl ApiMetrics for CountingMetrics {
    fn record_request(&self, route: &'static str, outcome: ApiOutcome, _latency: Duration) {
        if let Ok(mut events) = self.events.lock() {
            events.push((route.to_string(), outcome.as_str()));
        }
    }

    fn record_job(&self, job: &'static str, outcome: ApiOutcome, _latency: Duration) {
        if let Ok(mut events) = self.events.lock() {
            events.push((format!("job:{job}"), outcome.as_str()));
        }
    }
}
