// crates/sahay-core/src/lib.rs
// ============================================================================
// Module: SAHAY Core Library
// Description: Domain model and deterministic engines for the SAHAY backend.
// Purpose: Single source of truth for hashing, audit, consent, sync, triage,
// complaint, and analytics semantics shared by every service surface.
// Dependencies: serde, serde_jcs, sha2, thiserror, time
// ============================================================================

//! ## Overview
//! `sahay-core` holds the privacy-preserving core of the SAHAY backend: the
//! canonical hasher and audit chain, the consent ledger, offline-sync conflict
//! rules, the triage rule engine, the complaint SLA state machine, and the
//! analytics de-identification pipeline. Everything here is deterministic:
//! the crate performs no I/O and never reads wall-clock time; hosts inject
//! timestamps through the [`interfaces::Clock`] seam.
//!
//! Security posture: all inputs are untrusted; every module validates
//! fail-closed before producing hashable or persistable output.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod core;
pub mod interfaces;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use core::analytics::AggregateKey;
pub use core::analytics::AggregatedRow;
pub use core::analytics::AgeBucket;
pub use core::analytics::AnalyticsError;
pub use core::analytics::AnalyticsEventType;
pub use core::analytics::DeidentifiedEvent;
pub use core::analytics::GenderBucket;
pub use core::analytics::RawAnalyticsEvent;
pub use core::audit::AuditAction;
pub use core::audit::AuditEntry;
pub use core::audit::ChainReport;
pub use core::complaint::Complaint;
pub use core::complaint::ComplaintCategory;
pub use core::complaint::ComplaintError;
pub use core::complaint::ComplaintStatus;
pub use core::complaint::EscalationLevel;
pub use core::complaint::EscalationOutcome;
pub use core::complaint::SlaTable;
pub use core::consent::ConsentCategory;
pub use core::consent::ConsentError;
pub use core::consent::ConsentLedger;
pub use core::consent::ConsentRecord;
pub use core::consent::ConsentScope;
pub use core::hashing::AnchorHash;
pub use core::hashing::HashAlgorithm;
pub use core::hashing::HashDigest;
pub use core::identifiers::ComplaintId;
pub use core::identifiers::DeviceId;
pub use core::identifiers::EventId;
pub use core::identifiers::PrescriptionId;
pub use core::identifiers::TeleRequestId;
pub use core::identifiers::TriageSessionId;
pub use core::identifiers::UserId;
pub use core::roles::Role;
pub use core::roles::RoleSet;
pub use core::sync::LwwDecision;
pub use core::sync::RejectReason;
pub use core::sync::SyncEntityType;
pub use core::sync::SyncEnvelope;
pub use core::sync::SyncError;
pub use core::sync::SyncOperation;
pub use core::sync::SyncOutcome;
pub use core::tele::TeleError;
pub use core::tele::TeleStatus;
pub use core::time::Timestamp;
pub use core::triage::Language;
pub use core::triage::Sex;
pub use core::triage::TriageAssessment;
pub use core::triage::TriageCategory;
pub use core::triage::TriageInput;
pub use interfaces::AnchorChainError;
pub use interfaces::AnchorContract;
pub use interfaces::AnchorEvent;
pub use interfaces::AnchorReceipt;
pub use interfaces::Clock;
pub use interfaces::CreateAnchorRequest;
pub use interfaces::ManualClock;
pub use interfaces::StoreError;
pub use interfaces::TriageClassifier;
pub use interfaces::UpdateStatusRequest;
