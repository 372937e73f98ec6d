// crates/sahay-store-sqlite/src/lib.rs
// ============================================================================
// Module: SAHAY SQLite Store Library
// Description: Durable relational store for every SAHAY entity.
// Purpose: Persist domain writes with in-transaction audit appends.
// Dependencies: sahay-core, rusqlite, serde_json
// ============================================================================

//! ## Overview
//! `sahay-store-sqlite` implements the SAHAY persistence layer on SQLite
//! WAL. Every mutating operation appends its audit entry inside the same
//! transaction as the domain write; if the audit table is unavailable, the
//! write is rejected. Sync ingestion is idempotent per `event_id`, anchor
//! nonces are issued under the store lock, and all aggregate queries apply
//! the k-anonymity filter.
//!
//! Security posture: database contents are untrusted on load and fail
//! closed on corruption.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use store::AggregateQuery;
pub use store::AnchorJob;
pub use store::AnchorJobKind;
pub use store::AuditContext;
pub use store::ChainAnchorRecord;
pub use store::VIEW_COMPLAINTS_BY_DISTRICT;
pub use store::VIEW_DAILY_TRIAGE;
pub use store::VIEW_SLA_BREACHES;
pub use store::VIEW_SYMPTOM_HEATMAP;
pub use store::NewComplaint;
pub use store::OutboundMessage;
pub use store::PrescriptionRecord;
pub use store::ProfileRecord;
pub use store::SqliteStore;
pub use store::SqliteStoreConfig;
pub use store::SyncItemOutcome;
pub use store::TeleRequestRecord;
pub use store::TriageSessionRecord;
pub use store::ViewRow;
