// crates/sahay-api/src/lib.rs
// ============================================================================
// Module: SAHAY API Library
// Description: HTTP surface and background jobs for the SAHAY backend.
// Purpose: Route every request through Auth -> RBAC -> Consent -> Handler ->
// Audit and run the periodic scheduler.
// Dependencies: sahay-{core,config,store-sqlite,anchor}, axum, tokio
// ============================================================================

//! ## Overview
//! `sahay-api` hosts the service surface. The canonical execution path is
//! the [`service::Service`] layer; HTTP handlers are thin adapters over it,
//! so every surface observes the same pipeline: authenticate the bearer
//! token, check RBAC guards, re-check consent, run the handler, and append
//! the audit entry in the same store transaction as the domain write.
//!
//! Security posture: all request input is untrusted; anonymous-complaint
//! paths must never echo requester IP or device.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod auth;
pub mod error;
pub mod pipeline;
pub mod routes;
pub mod scheduler;
pub mod server;
pub mod service;
pub mod telemetry;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use auth::AuthedUser;
pub use auth::RequestMeta;
pub use error::ApiError;
pub use error::ErrorKind;
pub use server::SystemClock;
pub use server::serve;
pub use service::REPORT_VERSION;
pub use service::Service;
