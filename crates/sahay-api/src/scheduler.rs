// crates/sahay-api/src/scheduler.rs
// ============================================================================
// Module: Background Scheduler
// Description: Periodic jobs: SLA ticks, anchor drains, flushes, refreshes.
// Purpose: Run each periodic job on exactly one instance at a time.
// Dependencies: sahay-api service layer, tokio
// ============================================================================

//! ## Overview
//! A single task set owns the periodic jobs. Every tick first takes the
//! job's advisory lock in the store; if another instance holds it, the tick
//! is skipped. All jobs are idempotent, so overlapping re-runs after a lock
//! expiry are safe. Cron alone is never trusted for single-writer behavior.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use tokio::task::JoinHandle;

use crate::error::ApiError;
use crate::routes::AppState;
use crate::telemetry::ApiOutcome;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Anchor jobs drained per tick.
const ANCHOR_DRAIN_LIMIT: usize = 32;

// ============================================================================
// SECTION: Scheduler
// ============================================================================

/// Spawns all periodic jobs. The returned handles abort on drop at
/// shutdown.
#[must_use]
pub fn spawn(state: Arc<AppState>, holder: String) -> Vec<JoinHandle<()>> {
    let scheduler = &state.service.config().scheduler;
    let jobs: Vec<(&'static str, u64, JobFn)> = vec![
        ("sla_tick", scheduler.sla_tick_seconds, job_sla_tick),
        ("anchor_drain", scheduler.anchor_retry_seconds, job_anchor_drain),
        ("buffer_flush", state.service.config().analytics.flush_interval_seconds, job_buffer_flush),
        ("view_refresh", scheduler.view_refresh_seconds, job_view_refresh),
    ];
    jobs.into_iter()
        .map(|(name, period_seconds, run)| {
            let state = Arc::clone(&state);
            let holder = holder.clone();
            tokio::spawn(async move {
                run_job_loop(state, holder, name, period_seconds, run).await;
            })
        })
        .collect()
}

/// Job entry point signature.
type JobFn = fn(&AppState) -> Result<(), ApiError>;

/// Runs one job on its interval, gated by the advisory lock.
async fn run_job_loop(
    state: Arc<AppState>,
    holder: String,
    name: &'static str,
    period_seconds: u64,
    run: JobFn,
) {
    let ttl_millis = i64::try_from(
        state.service.config().scheduler.advisory_lock_ttl_seconds.saturating_mul(1_000),
    )
    .unwrap_or(i64::MAX);
    let mut interval = tokio::time::interval(Duration::from_secs(period_seconds.max(1)));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let store = state.service.store();
        let now = state.service.clock_now();
        let acquired = store.try_acquire_job_lock(name, &holder, ttl_millis, now).unwrap_or(false);
        if !acquired {
            continue;
        }
        let started = Instant::now();
        let outcome = match run(&state) {
            Ok(()) => ApiOutcome::Ok,
            Err(_) => ApiOutcome::ServerError,
        };
        state.metrics.record_job(name, outcome, started.elapsed());
        let _ = store.release_job_lock(name, &holder);
    }
}

// ============================================================================
// SECTION: Job Bodies
// ============================================================================

/// Escalates every complaint past its SLA deadline.
fn job_sla_tick(state: &AppState) -> Result<(), ApiError> {
    state.service.run_sla_tick().map(|_| ())
}

/// Drains pending anchor jobs.
fn job_anchor_drain(state: &AppState) -> Result<(), ApiError> {
    state.service.run_anchor_drain(ANCHOR_DRAIN_LIMIT).map(|_| ())
}

/// Flushes the aggregation buffer.
fn job_buffer_flush(state: &AppState) -> Result<(), ApiError> {
    state.service.flush_buffer()
}

/// Refreshes the materialized views.
fn job_view_refresh(state: &AppState) -> Result<(), ApiError> {
    state.service.run_view_refresh().map(|_| ())
}
