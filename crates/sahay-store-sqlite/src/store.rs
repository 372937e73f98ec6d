// crates/sahay-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Store
// Description: Durable SAHAY store backed by SQLite WAL.
// Purpose: Persist every entity with transactional audit appends, idempotent
// sync ingestion, serialized anchor nonces, and k-filtered aggregates.
// Dependencies: sahay-core, rusqlite, serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! One connection behind a mutex serves all operations, matching the
//! single-writer model SQLite WAL favors. Each mutating method opens a
//! transaction covering `(domain write + audit append + outbox enqueue)`;
//! the audit `seq` is issued inside that transaction, so the chain can never
//! skew from domain state. Anchor nonces are issued under the same lock.
//!
//! Security posture: stored data is untrusted on load; label columns that
//! fail to parse surface as corruption, never as defaults.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::MutexGuard;

use rusqlite::Connection;
use rusqlite::ErrorCode;
use rusqlite::OptionalExtension;
use rusqlite::params;
use rusqlite::params_from_iter;
use sahay_core::AggregatedRow;
use sahay_core::AuditAction;
use sahay_core::AuditEntry;
use sahay_core::ChainReport;
use sahay_core::Complaint;
use sahay_core::ComplaintCategory;
use sahay_core::ComplaintError;
use sahay_core::ComplaintId;
use sahay_core::ComplaintStatus;
use sahay_core::ConsentCategory;
use sahay_core::ConsentRecord;
use sahay_core::ConsentScope;
use sahay_core::EscalationLevel;
use sahay_core::EscalationOutcome;
use sahay_core::EventId;
use sahay_core::HashDigest;
use sahay_core::PrescriptionId;
use sahay_core::RejectReason;
use sahay_core::Role;
use sahay_core::RoleSet;
use sahay_core::SlaTable;
use sahay_core::StoreError;
use sahay_core::SyncEnvelope;
use sahay_core::SyncOutcome;
use sahay_core::TeleRequestId;
use sahay_core::TeleStatus;
use sahay_core::Timestamp;
use sahay_core::TriageCategory;
use sahay_core::TriageSessionId;
use sahay_core::UserId;
use sahay_core::core::analytics::DeidentifiedEvent;
use sahay_core::core::audit::ANONYMOUS_ACTOR;
use sahay_core::core::audit::AuditEntryDraft;
use sahay_core::core::audit::verify_chain;
use sahay_core::core::complaint::complaint_anchor_hash;
use sahay_core::core::complaint::sla_anchor_hash;
use sahay_core::core::complaint::status_anchor_hash;
use sahay_core::core::hashing::DEFAULT_HASH_ALGORITHM;
use sahay_core::core::hashing::HashAlgorithm;
use sahay_core::core::hashing::hash_canonical_json;
use sahay_core::core::sync::operation_allowed;
use sahay_core::core::sync::validate_envelope;
use sahay_core::core::tele;
use sahay_core::core::time::MILLIS_PER_DAY;
use serde::Serialize;
use serde_json::json;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// SQLite schema version for the store.
const SCHEMA_VERSION: i64 = 1;
/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Materialized view names.
pub const VIEW_DAILY_TRIAGE: &str = "daily_triage_counts";
/// Complaints-by-district view name.
pub const VIEW_COMPLAINTS_BY_DISTRICT: &str = "complaints_by_district";
/// Symptom heatmap view name.
pub const VIEW_SYMPTOM_HEATMAP: &str = "symptom_heatmap";
/// SLA breach counts view name.
pub const VIEW_SLA_BREACHES: &str = "sla_breach_counts";

// ============================================================================
// SECTION: Config
// ============================================================================

/// Configuration for the SQLite store.
#[derive(Debug, Clone)]
pub struct SqliteStoreConfig {
    /// Path to the database file.
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    pub busy_timeout_ms: u64,
}

impl SqliteStoreConfig {
    /// Builds a config with the default busy timeout.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

// ============================================================================
// SECTION: Records
// ============================================================================

/// Per-request audit context.
///
/// # Invariants
/// - `ip` and `device` must already be scrubbed for anonymous submissions;
///   [`AuditContext::anonymous`] builds a scrubbed context.
#[derive(Debug, Clone)]
pub struct AuditContext {
    /// Acting user identifier or a system label.
    pub actor: String,
    /// Requester IP, when policy allows it.
    pub ip: Option<String>,
    /// Requester device label, when policy allows it.
    pub device: Option<String>,
}

impl AuditContext {
    /// Builds a context for an authenticated actor.
    #[must_use]
    pub fn for_actor(actor: impl Into<String>, ip: Option<String>, device: Option<String>) -> Self {
        Self {
            actor: actor.into(),
            ip,
            device,
        }
    }

    /// Builds a scrubbed context for anonymous submissions.
    #[must_use]
    pub fn anonymous() -> Self {
        Self {
            actor: ANONYMOUS_ACTOR.to_string(),
            ip: None,
            device: None,
        }
    }

    /// Builds a context for background scheduler jobs.
    #[must_use]
    pub fn system(job: &str) -> Self {
        Self {
            actor: format!("system:{job}"),
            ip: None,
            device: None,
        }
    }
}

/// Stored profile state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileRecord {
    /// Owning user.
    pub user_id: UserId,
    /// Pseudonymous display name.
    pub name_alias: Option<String>,
    /// Date of birth, ISO date string.
    pub dob: Option<String>,
    /// Reported sex label.
    pub sex: Option<String>,
    /// Residence pincode.
    pub pincode: Option<String>,
    /// Client-asserted write time of the winning write.
    pub client_time: Timestamp,
    /// Event that produced the winning write.
    pub event_id: EventId,
}

/// Per-item sync ingestion outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncItemOutcome {
    /// Event identifier of the item.
    pub event_id: EventId,
    /// Resolution for the item.
    pub outcome: SyncOutcome,
}

/// Stored triage session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriageSessionRecord {
    /// Session identifier.
    pub id: TriageSessionId,
    /// Owning user; only the owner may read the session.
    pub owner_id: UserId,
    /// Raw symptom text.
    pub symptoms_text: String,
    /// Assessed category.
    pub category: TriageCategory,
    /// Matched red flags.
    pub red_flags: Vec<String>,
    /// Guidance text shown to the user.
    pub guidance_text: String,
    /// Creation time.
    pub created_at: Timestamp,
}

/// Stored teleconsultation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeleRequestRecord {
    /// Request identifier.
    pub id: TeleRequestId,
    /// Requesting citizen.
    pub citizen_id: UserId,
    /// Assigned clinician, once scheduled.
    pub clinician_id: Option<UserId>,
    /// Request status.
    pub status: TeleStatus,
    /// Creation time.
    pub created_at: Timestamp,
}

/// Stored prescription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrescriptionRecord {
    /// Prescription identifier.
    pub id: PrescriptionId,
    /// Teleconsultation request it belongs to.
    pub tele_request_id: TeleRequestId,
    /// Prescribed items.
    pub items: Vec<String>,
    /// Summary text, 160-300 characters.
    pub summary_text: String,
    /// Creation time.
    pub created_at: Timestamp,
}

/// Input for creating a complaint.
#[derive(Debug, Clone)]
pub struct NewComplaint {
    /// Complaint identifier.
    pub id: ComplaintId,
    /// Submitter; `None` files the complaint anonymously.
    pub submitter_id: Option<UserId>,
    /// Complaint category.
    pub category: ComplaintCategory,
    /// Encrypted complaint payload.
    pub payload_encrypted: Vec<u8>,
}

/// Anchor job kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnchorJobKind {
    /// Create the complaint anchor.
    Create,
    /// Update the anchor's status hash.
    Update,
}

impl AnchorJobKind {
    /// Returns the stable string label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
        }
    }

    /// Parses a stable kind label.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "create" => Some(Self::Create),
            "update" => Some(Self::Update),
            _ => None,
        }
    }
}

/// Queued anchor submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnchorJob {
    /// Job row identifier.
    pub id: i64,
    /// Complaint the job belongs to.
    pub complaint_id: ComplaintId,
    /// Job kind.
    pub kind: AnchorJobKind,
    /// Canonical complaint hash.
    pub complaint_hash: HashDigest,
    /// Canonical SLA hash; present for create jobs.
    pub sla_hash: Option<HashDigest>,
    /// Canonical status hash.
    pub status_hash: HashDigest,
    /// Anchor timestamp (creation or update time).
    pub at_time: Timestamp,
    /// Issued nonce; strictly increasing per complaint.
    pub nonce: u64,
}

/// Persisted chain anchor state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainAnchorRecord {
    /// Complaint the anchor belongs to.
    pub complaint_id: ComplaintId,
    /// Canonical complaint hash.
    pub complaint_hash: HashDigest,
    /// Canonical SLA hash.
    pub sla_hash: HashDigest,
    /// Latest anchored status hash.
    pub status_hash: HashDigest,
    /// Anchor creation time.
    pub created_at: Timestamp,
    /// Latest anchored update time.
    pub last_updated_at: Timestamp,
    /// Latest anchored nonce.
    pub status_nonce: u64,
}

/// Queued outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Message row identifier.
    pub id: i64,
    /// Delivery channel label.
    pub channel: String,
    /// Message payload JSON.
    pub payload: serde_json::Value,
    /// Delivery status: `pending`, `sent`, or `failed`.
    pub status: String,
    /// Delivery attempts so far.
    pub attempts: u32,
}

/// Filter for aggregate queries. All fields are conjunctive.
#[derive(Debug, Clone, Default)]
pub struct AggregateQuery {
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
    /// Inclusive lower time bucket.
    pub from_bucket: Option<Timestamp>,
    /// Exclusive upper time bucket.
    pub to_bucket: Option<Timestamp>,
}

/// One materialized view row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewRow {
    /// Row key within the view.
    pub row_key: String,
    /// Aggregated value.
    pub value: u64,
    /// Freshness watermark: `MAX(updated_at)` of the inputs at refresh.
    pub refreshed_at: Timestamp,
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// Durable SAHAY store backed by SQLite.
pub struct SqliteStore {
    /// Serialized connection. The mutex is also the nonce critical section.
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (and migrates) a store at the configured path.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the database cannot be opened, pragmas
    /// fail, or the schema version is incompatible.
    pub fn open(config: &SqliteStoreConfig) -> Result<Self, StoreError> {
        let conn = Connection::open(&config.path).map_err(map_sql)?;
        Self::initialize(conn, config.busy_timeout_ms)
    }

    /// Opens an in-memory store for tests.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when initialization fails.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(map_sql)?;
        Self::initialize(conn, DEFAULT_BUSY_TIMEOUT_MS)
    }

    /// Applies pragmas and the schema, then wraps the connection.
    fn initialize(conn: Connection, busy_timeout_ms: u64) -> Result<Self, StoreError> {
        conn.busy_timeout(std::time::Duration::from_millis(busy_timeout_ms)).map_err(map_sql)?;
        conn.pragma_update(None, "journal_mode", "wal").map_err(map_sql)?;
        conn.pragma_update(None, "synchronous", "full").map_err(map_sql)?;
        conn.pragma_update(None, "foreign_keys", "on").map_err(map_sql)?;
        apply_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Locks the connection, failing closed on poisoning.
    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Io("store lock poisoned".to_string()))
    }

    // ========================================================================
    // SECTION: Audit
    // ========================================================================

    /// Lists audit entries with `seq > after_seq`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on read failures or unparseable rows.
    pub fn audit_entries(&self, after_seq: u64, limit: usize) -> Result<Vec<AuditEntry>, StoreError> {
        let conn = self.conn()?;
        let mut statement = conn
            .prepare(
                "SELECT seq, actor, action, entity_type, entity_id, ip, device, at,
                        payload_digest, prev_hash, entry_hash
                 FROM audit_log WHERE seq > ?1 ORDER BY seq ASC LIMIT ?2",
            )
            .map_err(map_sql)?;
        let after = i64::try_from(after_seq).map_err(|_| invalid("after_seq out of range"))?;
        let bound = i64::try_from(limit).map_err(|_| invalid("limit out of range"))?;
        let rows = statement
            .query_map(params![after, bound], audit_entry_from_row)
            .map_err(map_sql)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(map_sql)?;
        rows.into_iter().collect()
    }

    /// Verifies the full audit chain.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on read failures. A broken chain is reported
    /// in the returned [`ChainReport`], not as an error.
    pub fn verify_audit_chain(&self) -> Result<ChainReport, StoreError> {
        let entries = self.audit_entries(0, usize::MAX >> 1)?;
        Ok(verify_chain(&entries, None))
    }

    // ========================================================================
    // SECTION: Users, Tokens, Roles
    // ========================================================================

    /// Creates a user.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] when the phone alias is taken.
    pub fn create_user(
        &self,
        user_id: &UserId,
        phone_alias: &str,
        now: Timestamp,
        ctx: &AuditContext,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(map_sql)?;
        let taken: Option<String> = tx
            .query_row(
                "SELECT user_id FROM users WHERE phone_alias = ?1",
                params![phone_alias],
                |row| row.get(0),
            )
            .optional()
            .map_err(map_sql)?;
        if taken.is_some() {
            return Err(StoreError::Conflict("phone alias already registered".to_string()));
        }
        tx.execute(
            "INSERT INTO users (user_id, phone_alias, created_at, erased) VALUES (?1, ?2, ?3, 0)",
            params![user_id.as_str(), phone_alias, now.as_unix_millis()],
        )
        .map_err(map_sql)?;
        append_audit(
            &tx,
            ctx,
            AuditAction::UserRegistered,
            "user",
            user_id.as_str(),
            now,
            &json!({ "user_id": user_id.as_str() }),
        )?;
        tx.commit().map_err(map_sql)
    }

    /// Looks up a user by phone alias. Erased users resolve to `None`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on read failures.
    pub fn lookup_user_by_phone(&self, phone_alias: &str) -> Result<Option<UserId>, StoreError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT user_id FROM users WHERE phone_alias = ?1 AND erased = 0",
            params![phone_alias],
            |row| row.get::<_, String>(0),
        )
        .optional()
        .map_err(map_sql)
        .map(|found| found.map(UserId::new))
    }

    /// Issues a bearer token for a user, storing only its digest.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Gone`] for erased users and
    /// [`StoreError::NotFound`] for unknown ones.
    pub fn issue_token(
        &self,
        user_id: &UserId,
        token_digest: &HashDigest,
        now: Timestamp,
        ctx: &AuditContext,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(map_sql)?;
        require_live_user(&tx, user_id)?;
        tx.execute(
            "INSERT INTO tokens (token_digest, user_id, issued_at, revoked) VALUES (?1, ?2, ?3, 0)",
            params![token_digest.value, user_id.as_str(), now.as_unix_millis()],
        )
        .map_err(map_sql)?;
        append_audit(
            &tx,
            ctx,
            AuditAction::UserLoggedIn,
            "token",
            &token_digest.value,
            now,
            &json!({ "user_id": user_id.as_str() }),
        )?;
        tx.commit().map_err(map_sql)
    }

    /// Resolves a token digest to its user and roles.
    ///
    /// Revoked tokens and erased users resolve to `None`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on read failures.
    pub fn resolve_token(
        &self,
        token_digest: &HashDigest,
    ) -> Result<Option<(UserId, RoleSet)>, StoreError> {
        let conn = self.conn()?;
        let user: Option<String> = conn
            .query_row(
                "SELECT u.user_id FROM tokens t JOIN users u ON u.user_id = t.user_id
                 WHERE t.token_digest = ?1 AND t.revoked = 0 AND u.erased = 0",
                params![token_digest.value],
                |row| row.get(0),
            )
            .optional()
            .map_err(map_sql)?;
        let Some(user) = user else {
            return Ok(None);
        };
        let user_id = UserId::new(user);
        let roles = roles_for_conn(&conn, &user_id)?;
        Ok(Some((user_id, roles)))
    }

    /// Revokes a token.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for unknown tokens.
    pub fn revoke_token(
        &self,
        token_digest: &HashDigest,
        now: Timestamp,
        ctx: &AuditContext,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(map_sql)?;
        let changed = tx
            .execute(
                "UPDATE tokens SET revoked = 1 WHERE token_digest = ?1",
                params![token_digest.value],
            )
            .map_err(map_sql)?;
        if changed == 0 {
            return Err(StoreError::NotFound("token".to_string()));
        }
        append_audit(
            &tx,
            ctx,
            AuditAction::TokenRevoked,
            "token",
            &token_digest.value,
            now,
            &json!({}),
        )?;
        tx.commit().map_err(map_sql)
    }

    /// Grants a role to a user, idempotently.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for unknown users.
    pub fn grant_role(
        &self,
        user_id: &UserId,
        role: Role,
        now: Timestamp,
        ctx: &AuditContext,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(map_sql)?;
        require_live_user(&tx, user_id)?;
        tx.execute(
            "INSERT OR IGNORE INTO user_roles (user_id, role) VALUES (?1, ?2)",
            params![user_id.as_str(), role.as_str()],
        )
        .map_err(map_sql)?;
        append_audit(
            &tx,
            ctx,
            AuditAction::RoleGranted,
            "user",
            user_id.as_str(),
            now,
            &json!({ "role": role.as_str() }),
        )?;
        tx.commit().map_err(map_sql)
    }

    /// Returns the roles held by a user.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on read failures.
    pub fn roles_for(&self, user_id: &UserId) -> Result<RoleSet, StoreError> {
        let conn = self.conn()?;
        roles_for_conn(&conn, user_id)
    }

    // ========================================================================
    // SECTION: Consent
    // ========================================================================

    /// Appends a consent record. Consent state never updates in place.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on write failures.
    pub fn append_consent(
        &self,
        record: &ConsentRecord,
        ctx: &AuditContext,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(map_sql)?;
        require_live_user(&tx, &record.user_id)?;
        tx.execute(
            "INSERT INTO consents (user_id, category, scope, version, granted, granted_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.user_id.as_str(),
                record.category.as_str(),
                record.scope.as_str(),
                record.version,
                i64::from(record.granted),
                record.granted_at.as_unix_millis(),
            ],
        )
        .map_err(map_sql)?;
        append_audit(
            &tx,
            ctx,
            AuditAction::ConsentRecorded,
            "consent",
            record.user_id.as_str(),
            record.granted_at,
            &json!({
                "category": record.category.as_str(),
                "scope": record.scope.as_str(),
                "version": record.version,
                "granted": record.granted,
            }),
        )?;
        tx.commit().map_err(map_sql)
    }

    /// Returns whether consent is granted at `at` under `document_version`.
    ///
    /// Reads committed state; never cached.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on read failures.
    pub fn is_consent_granted(
        &self,
        user_id: &UserId,
        category: ConsentCategory,
        scope: ConsentScope,
        document_version: u32,
        at: Timestamp,
    ) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let newest: Option<(i64, u32)> = conn
            .query_row(
                "SELECT granted, version FROM consents
                 WHERE user_id = ?1 AND category = ?2 AND scope = ?3 AND granted_at <= ?4
                 ORDER BY granted_at DESC, id DESC LIMIT 1",
                params![user_id.as_str(), category.as_str(), scope.as_str(), at.as_unix_millis()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(map_sql)?;
        Ok(newest.is_some_and(|(granted, version)| granted != 0 && version >= document_version))
    }

    /// Lists a user's consent history, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on read failures or unparseable rows.
    pub fn list_consents(&self, user_id: &UserId) -> Result<Vec<ConsentRecord>, StoreError> {
        let conn = self.conn()?;
        let mut statement = conn
            .prepare(
                "SELECT category, scope, version, granted, granted_at FROM consents
                 WHERE user_id = ?1 ORDER BY id ASC",
            )
            .map_err(map_sql)?;
        let rows = statement
            .query_map(params![user_id.as_str()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, u32>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            })
            .map_err(map_sql)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(map_sql)?;
        rows.into_iter()
            .map(|(category, scope, version, granted, granted_at)| {
                Ok(ConsentRecord {
                    user_id: user_id.clone(),
                    category: ConsentCategory::parse(&category)
                        .ok_or_else(|| corrupt("consent category"))?,
                    scope: ConsentScope::parse(&scope).ok_or_else(|| corrupt("consent scope"))?,
                    version,
                    granted: granted != 0,
                    granted_at: Timestamp::from_unix_millis(granted_at),
                })
            })
            .collect()
    }

    // ========================================================================
    // SECTION: Sync Ingestion
    // ========================================================================

    /// Ingests a sync batch, item by item, in submitted order.
    ///
    /// Individual item failures never fail the batch: storage errors surface
    /// as `rejected:transient` for that item and processing continues.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Invalid`] only when the batch itself exceeds
    /// the item bound.
    pub fn ingest_batch(
        &self,
        envelopes: &[SyncEnvelope],
        max_items: usize,
        server_time: Timestamp,
        ctx: &AuditContext,
    ) -> Result<Vec<SyncItemOutcome>, StoreError> {
        if envelopes.len() > max_items {
            return Err(StoreError::Invalid(format!(
                "sync batch too large: {} > {max_items}",
                envelopes.len()
            )));
        }
        let mut outcomes = Vec::with_capacity(envelopes.len());
        for envelope in envelopes {
            let outcome = if let Err(err) = validate_envelope(envelope) {
                SyncOutcome::Rejected(RejectReason::Invalid(err.to_string()))
            } else {
                match self.ingest_item(envelope, server_time, ctx) {
                    Ok(outcome) => outcome,
                    Err(_) => SyncOutcome::Rejected(RejectReason::Transient),
                }
            };
            outcomes.push(SyncItemOutcome {
                event_id: envelope.event_id.clone(),
                outcome,
            });
        }
        Ok(outcomes)
    }

    /// Processes one sync item in its own transaction.
    fn ingest_item(
        &self,
        envelope: &SyncEnvelope,
        server_time: Timestamp,
        ctx: &AuditContext,
    ) -> Result<SyncOutcome, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(map_sql)?;

        let seen: Option<String> = tx
            .query_row(
                "SELECT event_id FROM sync_events WHERE event_id = ?1",
                params![envelope.event_id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(map_sql)?;
        if seen.is_some() {
            return Ok(SyncOutcome::Duplicate);
        }

        let outcome = if operation_allowed(envelope.entity_type, envelope.operation) {
            if envelope.entity_type.is_append_only() {
                tx.execute(
                    "INSERT INTO wellness_entries (event_id, user_id, entity_type, client_time, payload)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        envelope.event_id.as_str(),
                        envelope.user_id.as_str(),
                        envelope.entity_type.as_str(),
                        envelope.client_time.as_unix_millis(),
                        envelope.payload.to_string(),
                    ],
                )
                .map_err(map_sql)?;
                SyncOutcome::Accepted
            } else {
                apply_profile_write(&tx, envelope)?
            }
        } else if envelope.entity_type.is_append_only() {
            SyncOutcome::Rejected(RejectReason::AppendOnly)
        } else {
            SyncOutcome::Rejected(RejectReason::Invalid("delete_not_supported".to_string()))
        };

        tx.execute(
            "INSERT INTO sync_events
                 (event_id, device_id, user_id, entity_type, operation, client_time, server_time,
                  payload, outcome)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                envelope.event_id.as_str(),
                envelope.device_id.as_str(),
                envelope.user_id.as_str(),
                envelope.entity_type.as_str(),
                operation_label(envelope),
                envelope.client_time.as_unix_millis(),
                server_time.as_unix_millis(),
                envelope.payload.to_string(),
                outcome.as_label(),
            ],
        )
        .map_err(map_sql)?;

        if outcome == SyncOutcome::Accepted {
            append_audit(
                &tx,
                ctx,
                AuditAction::SyncEventApplied,
                envelope.entity_type.as_str(),
                envelope.event_id.as_str(),
                server_time,
                &json!({
                    "event_id": envelope.event_id.as_str(),
                    "entity_type": envelope.entity_type.as_str(),
                }),
            )?;
        }
        tx.commit().map_err(map_sql)?;
        Ok(outcome)
    }

    /// Returns the stored profile for a user.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Gone`] for erased users.
    pub fn get_profile(&self, user_id: &UserId) -> Result<Option<ProfileRecord>, StoreError> {
        let conn = self.conn()?;
        require_not_erased(&conn, user_id)?;
        conn.query_row(
            "SELECT name_alias, dob, sex, pincode, client_time, event_id
             FROM profiles WHERE user_id = ?1",
            params![user_id.as_str()],
            |row| {
                Ok(ProfileRecord {
                    user_id: user_id.clone(),
                    name_alias: row.get(0)?,
                    dob: row.get(1)?,
                    sex: row.get(2)?,
                    pincode: row.get(3)?,
                    client_time: Timestamp::from_unix_millis(row.get(4)?),
                    event_id: EventId::new(row.get::<_, String>(5)?),
                })
            },
        )
        .optional()
        .map_err(map_sql)
    }

    // ========================================================================
    // SECTION: Triage
    // ========================================================================

    /// Inserts a triage session.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on write failures.
    pub fn insert_triage_session(
        &self,
        record: &TriageSessionRecord,
        ctx: &AuditContext,
    ) -> Result<(), StoreError> {
        let red_flags = serde_json::to_string(&record.red_flags)
            .map_err(|err| StoreError::Invalid(err.to_string()))?;
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(map_sql)?;
        tx.execute(
            "INSERT INTO triage_sessions
                 (session_id, owner_id, symptoms_text, category, red_flags, guidance_text,
                  created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.id.as_str(),
                record.owner_id.as_str(),
                record.symptoms_text,
                record.category.as_str(),
                red_flags,
                record.guidance_text,
                record.created_at.as_unix_millis(),
            ],
        )
        .map_err(map_sql)?;
        append_audit(
            &tx,
            ctx,
            AuditAction::TriageSessionCreated,
            "triage_session",
            record.id.as_str(),
            record.created_at,
            &json!({ "category": record.category.as_str() }),
        )?;
        tx.commit().map_err(map_sql)
    }

    /// Returns a triage session by id. Ownership is enforced by callers.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on read failures or unparseable rows.
    pub fn get_triage_session(
        &self,
        id: &TriageSessionId,
    ) -> Result<Option<TriageSessionRecord>, StoreError> {
        let conn = self.conn()?;
        let row: Option<TriageSessionRow> = conn
            .query_row(
                "SELECT owner_id, symptoms_text, category, red_flags, guidance_text, created_at
                 FROM triage_sessions WHERE session_id = ?1",
                params![id.as_str()],
                |row| {
                    Ok(TriageSessionRow {
                        owner_id: row.get(0)?,
                        symptoms_text: row.get(1)?,
                        category: row.get(2)?,
                        red_flags: row.get(3)?,
                        guidance_text: row.get(4)?,
                        created_at: row.get(5)?,
                    })
                },
            )
            .optional()
            .map_err(map_sql)?;
        row.map(|row| {
            Ok(TriageSessionRecord {
                id: id.clone(),
                owner_id: UserId::new(row.owner_id),
                symptoms_text: row.symptoms_text,
                category: TriageCategory::parse(&row.category)
                    .ok_or_else(|| corrupt("triage category"))?,
                red_flags: serde_json::from_str(&row.red_flags)
                    .map_err(|_| corrupt("triage red flags"))?,
                guidance_text: row.guidance_text,
                created_at: Timestamp::from_unix_millis(row.created_at),
            })
        })
        .transpose()
    }

    // ========================================================================
    // SECTION: Teleconsultation
    // ========================================================================

    /// Creates a teleconsultation request.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on write failures.
    pub fn create_tele_request(
        &self,
        record: &TeleRequestRecord,
        ctx: &AuditContext,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(map_sql)?;
        tx.execute(
            "INSERT INTO tele_requests (request_id, citizen_id, clinician_id, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.id.as_str(),
                record.citizen_id.as_str(),
                record.clinician_id.as_ref().map(UserId::as_str),
                record.status.as_str(),
                record.created_at.as_unix_millis(),
            ],
        )
        .map_err(map_sql)?;
        append_audit(
            &tx,
            ctx,
            AuditAction::TeleRequestCreated,
            "tele_request",
            record.id.as_str(),
            record.created_at,
            &json!({ "status": record.status.as_str() }),
        )?;
        tx.commit().map_err(map_sql)
    }

    /// Returns a tele request by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on read failures or unparseable rows.
    pub fn get_tele_request(
        &self,
        id: &TeleRequestId,
    ) -> Result<Option<TeleRequestRecord>, StoreError> {
        let conn = self.conn()?;
        tele_request_by_id(&conn, id)
    }

    /// Transitions a tele request's status.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::StateInvalid`] for illegal transitions and
    /// [`StoreError::NotFound`] for unknown requests.
    pub fn update_tele_status(
        &self,
        id: &TeleRequestId,
        to: TeleStatus,
        clinician_id: Option<&UserId>,
        now: Timestamp,
        ctx: &AuditContext,
    ) -> Result<TeleRequestRecord, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(map_sql)?;
        let mut record = tele_request_by_id(&tx, id)?
            .ok_or_else(|| StoreError::NotFound("tele request".to_string()))?;
        if !tele::can_transition(record.status, to) {
            return Err(StoreError::StateInvalid(format!(
                "illegal tele request transition: {} -> {}",
                record.status.as_str(),
                to.as_str()
            )));
        }
        record.status = to;
        if let Some(clinician) = clinician_id {
            record.clinician_id = Some(clinician.clone());
        }
        tx.execute(
            "UPDATE tele_requests SET status = ?1, clinician_id = ?2 WHERE request_id = ?3",
            params![
                record.status.as_str(),
                record.clinician_id.as_ref().map(UserId::as_str),
                id.as_str(),
            ],
        )
        .map_err(map_sql)?;
        append_audit(
            &tx,
            ctx,
            AuditAction::TeleRequestUpdated,
            "tele_request",
            id.as_str(),
            now,
            &json!({ "status": record.status.as_str() }),
        )?;
        tx.commit().map_err(map_sql)?;
        Ok(record)
    }

    /// Inserts a prescription for a tele request.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Invalid`] when the summary is outside the
    /// 160-300 character contract and [`StoreError::NotFound`] for unknown
    /// requests.
    pub fn insert_prescription(
        &self,
        record: &PrescriptionRecord,
        ctx: &AuditContext,
    ) -> Result<(), StoreError> {
        tele::validate_summary(&record.summary_text)
            .map_err(|err| StoreError::Invalid(err.to_string()))?;
        let items = serde_json::to_string(&record.items)
            .map_err(|err| StoreError::Invalid(err.to_string()))?;
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(map_sql)?;
        if tele_request_by_id(&tx, &record.tele_request_id)?.is_none() {
            return Err(StoreError::NotFound("tele request".to_string()));
        }
        tx.execute(
            "INSERT INTO prescriptions
                 (prescription_id, tele_request_id, items, summary_text, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.id.as_str(),
                record.tele_request_id.as_str(),
                items,
                record.summary_text,
                record.created_at.as_unix_millis(),
            ],
        )
        .map_err(map_sql)?;
        append_audit(
            &tx,
            ctx,
            AuditAction::PrescriptionIssued,
            "prescription",
            record.id.as_str(),
            record.created_at,
            &json!({ "tele_request_id": record.tele_request_id.as_str() }),
        )?;
        tx.commit().map_err(map_sql)
    }

    // ========================================================================
    // SECTION: Complaints
    // ========================================================================

    /// Creates a complaint in `submitted` state and enqueues its anchor.
    ///
    /// Anonymous complaints (no submitter) are audited with a scrubbed
    /// context regardless of what the caller passed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on write failures.
    pub fn create_complaint(
        &self,
        new: &NewComplaint,
        sla: &SlaTable,
        now: Timestamp,
        ctx: &AuditContext,
    ) -> Result<Complaint, StoreError> {
        let complaint = Complaint {
            id: new.id.clone(),
            submitter_id: new.submitter_id.clone(),
            category: new.category,
            status: ComplaintStatus::Submitted,
            created_at: now,
            sla_deadline: sla.initial_deadline(new.category, now),
            escalation_level: EscalationLevel::District,
            escalation_exhausted: false,
            closure_feedback: None,
            closure_hash: None,
        };

        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(map_sql)?;
        tx.execute(
            "INSERT INTO complaints
                 (complaint_id, submitter_id, category, payload_encrypted, status, created_at,
                  sla_deadline, escalation_level, escalation_exhausted, closure_feedback,
                  closure_hash)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, NULL, NULL)",
            params![
                complaint.id.as_str(),
                complaint.submitter_id.as_ref().map(UserId::as_str),
                complaint.category.as_str(),
                new.payload_encrypted,
                complaint.status.as_str(),
                complaint.created_at.as_unix_millis(),
                complaint.sla_deadline.as_unix_millis(),
                complaint.escalation_level.as_str(),
            ],
        )
        .map_err(map_sql)?;

        let scrubbed;
        let audit_ctx = if complaint.submitter_id.is_none() {
            scrubbed = AuditContext::anonymous();
            &scrubbed
        } else {
            ctx
        };
        append_audit(
            &tx,
            audit_ctx,
            AuditAction::ComplaintCreated,
            "complaint",
            complaint.id.as_str(),
            now,
            &json!({ "category": complaint.category.as_str() }),
        )?;

        enqueue_anchor_job(&tx, &complaint, AnchorJobKind::Create, now)?;
        if let Some(submitter) = &complaint.submitter_id {
            outbox_enqueue(
                &tx,
                "complaint_ack",
                &json!({ "complaint_id": complaint.id.as_str(), "user_id": submitter.as_str() }),
                now,
            )?;
        }
        tx.commit().map_err(map_sql)?;
        Ok(complaint)
    }

    /// Returns a complaint by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on read failures or unparseable rows.
    pub fn get_complaint(&self, id: &ComplaintId) -> Result<Option<Complaint>, StoreError> {
        let conn = self.conn()?;
        complaint_by_id(&conn, id)
    }

    /// Returns a complaint's encrypted payload.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for unknown complaints.
    pub fn get_complaint_payload(&self, id: &ComplaintId) -> Result<Vec<u8>, StoreError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT payload_encrypted FROM complaints WHERE complaint_id = ?1",
            params![id.as_str()],
            |row| row.get(0),
        )
        .optional()
        .map_err(map_sql)?
        .ok_or_else(|| StoreError::NotFound("complaint".to_string()))
    }

    /// Transitions a complaint's status and enqueues an anchor update.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::StateInvalid`] for illegal transitions and
    /// [`StoreError::NotFound`] for unknown complaints.
    pub fn update_complaint_status(
        &self,
        id: &ComplaintId,
        to: ComplaintStatus,
        now: Timestamp,
        ctx: &AuditContext,
    ) -> Result<Complaint, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(map_sql)?;
        let mut complaint =
            complaint_by_id(&tx, id)?.ok_or_else(|| StoreError::NotFound("complaint".to_string()))?;
        complaint.transition(to).map_err(map_complaint)?;
        tx.execute(
            "UPDATE complaints SET status = ?1 WHERE complaint_id = ?2",
            params![complaint.status.as_str(), id.as_str()],
        )
        .map_err(map_sql)?;
        append_audit(
            &tx,
            &effective_ctx(ctx, &complaint),
            AuditAction::ComplaintUpdated,
            "complaint",
            id.as_str(),
            now,
            &json!({ "status": complaint.status.as_str() }),
        )?;
        enqueue_anchor_job(&tx, &complaint, AnchorJobKind::Update, now)?;
        tx.commit().map_err(map_sql)?;
        Ok(complaint)
    }

    /// Closes a complaint with feedback, anchoring the closure hash.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::StateInvalid`] when feedback is empty or the
    /// complaint is not `resolved`.
    pub fn close_complaint(
        &self,
        id: &ComplaintId,
        resolution_note: &str,
        feedback: &str,
        now: Timestamp,
        ctx: &AuditContext,
    ) -> Result<Complaint, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(map_sql)?;
        let mut complaint =
            complaint_by_id(&tx, id)?.ok_or_else(|| StoreError::NotFound("complaint".to_string()))?;
        let closure_hash = complaint.close(resolution_note, feedback).map_err(map_complaint)?;
        tx.execute(
            "UPDATE complaints SET status = ?1, closure_feedback = ?2, closure_hash = ?3
             WHERE complaint_id = ?4",
            params![
                complaint.status.as_str(),
                complaint.closure_feedback,
                closure_hash.value,
                id.as_str(),
            ],
        )
        .map_err(map_sql)?;
        append_audit(
            &tx,
            &effective_ctx(ctx, &complaint),
            AuditAction::ComplaintClosed,
            "complaint",
            id.as_str(),
            now,
            &json!({ "closure_hash": closure_hash.value }),
        )?;
        enqueue_anchor_job(&tx, &complaint, AnchorJobKind::Update, now)?;
        if let Some(submitter) = &complaint.submitter_id {
            outbox_enqueue(
                &tx,
                "closure_notice",
                &json!({ "complaint_id": id.as_str(), "user_id": submitter.as_str() }),
                now,
            )?;
        }
        tx.commit().map_err(map_sql)?;
        Ok(complaint)
    }

    /// Lists complaints past their SLA deadline that can still escalate.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on read failures.
    pub fn due_complaints(&self, now: Timestamp) -> Result<Vec<Complaint>, StoreError> {
        let conn = self.conn()?;
        let mut statement = conn
            .prepare(
                "SELECT complaint_id FROM complaints
                 WHERE sla_deadline < ?1 AND escalation_exhausted = 0
                   AND status NOT IN ('draft', 'resolved', 'closed')
                 ORDER BY sla_deadline ASC",
            )
            .map_err(map_sql)?;
        let ids = statement
            .query_map(params![now.as_unix_millis()], |row| row.get::<_, String>(0))
            .map_err(map_sql)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(map_sql)?;
        ids.into_iter()
            .map(|id| {
                complaint_by_id(&conn, &ComplaintId::new(id.clone()))?
                    .ok_or_else(|| StoreError::NotFound(format!("complaint {id}")))
            })
            .collect()
    }

    /// Runs one escalation step for a complaint, persisting the outcome.
    ///
    /// Bumps write an audit entry and enqueue an anchor update with the next
    /// nonce. Re-runs after the deadline reset are no-ops, so the scheduler
    /// tick is idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for unknown complaints.
    pub fn apply_escalation(
        &self,
        id: &ComplaintId,
        now: Timestamp,
        sla: &SlaTable,
        ctx: &AuditContext,
    ) -> Result<Option<EscalationOutcome>, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(map_sql)?;
        let mut complaint =
            complaint_by_id(&tx, id)?.ok_or_else(|| StoreError::NotFound("complaint".to_string()))?;
        let Some(outcome) = complaint.escalation_step(now, sla) else {
            return Ok(None);
        };
        tx.execute(
            "UPDATE complaints SET status = ?1, escalation_level = ?2, sla_deadline = ?3,
                    escalation_exhausted = ?4
             WHERE complaint_id = ?5",
            params![
                complaint.status.as_str(),
                complaint.escalation_level.as_str(),
                complaint.sla_deadline.as_unix_millis(),
                i64::from(complaint.escalation_exhausted),
                id.as_str(),
            ],
        )
        .map_err(map_sql)?;
        match &outcome {
            EscalationOutcome::Bumped {
                level, ..
            } => {
                append_audit(
                    &tx,
                    &effective_ctx(ctx, &complaint),
                    AuditAction::ComplaintEscalated,
                    "complaint",
                    id.as_str(),
                    now,
                    &json!({ "escalation_level": level.as_str() }),
                )?;
                enqueue_anchor_job(&tx, &complaint, AnchorJobKind::Update, now)?;
            }
            EscalationOutcome::Exhausted => {
                append_audit(
                    &tx,
                    &effective_ctx(ctx, &complaint),
                    AuditAction::ComplaintUpdated,
                    "complaint",
                    id.as_str(),
                    now,
                    &json!({ "escalation_exhausted": true }),
                )?;
            }
        }
        tx.commit().map_err(map_sql)?;
        Ok(Some(outcome))
    }

    // ========================================================================
    // SECTION: Anchor Jobs
    // ========================================================================

    /// Returns pending anchor jobs, serialized per complaint.
    ///
    /// At most the oldest pending job per complaint is returned, and only
    /// when that complaint has nothing in flight.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on read failures.
    pub fn pending_anchor_jobs(&self, limit: usize) -> Result<Vec<AnchorJob>, StoreError> {
        let conn = self.conn()?;
        let bound = i64::try_from(limit).map_err(|_| invalid("limit out of range"))?;
        let mut statement = conn
            .prepare(
                "SELECT id, complaint_id, kind, complaint_hash, sla_hash, status_hash, at_time,
                        nonce
                 FROM anchor_jobs j
                 WHERE j.done = 0 AND j.in_flight = 0
                   AND NOT EXISTS (
                       SELECT 1 FROM anchor_jobs e
                       WHERE e.complaint_id = j.complaint_id
                         AND (e.in_flight = 1 OR (e.done = 0 AND e.id < j.id))
                   )
                 ORDER BY j.id ASC LIMIT ?1",
            )
            .map_err(map_sql)?;
        let rows = statement
            .query_map(params![bound], anchor_job_from_row)
            .map_err(map_sql)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(map_sql)?;
        rows.into_iter().collect()
    }

    /// Marks an anchor job in or out of flight.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on write failures.
    pub fn set_anchor_in_flight(&self, job_id: i64, in_flight: bool) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE anchor_jobs SET in_flight = ?1 WHERE id = ?2",
            params![i64::from(in_flight), job_id],
        )
        .map_err(map_sql)?;
        Ok(())
    }

    /// Abandons a permanently rejected anchor job without touching the
    /// persisted anchor state.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on write failures.
    pub fn abandon_anchor_job(&self, job_id: i64) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE anchor_jobs SET done = 1, in_flight = 0 WHERE id = ?1",
            params![job_id],
        )
        .map_err(map_sql)?;
        Ok(())
    }

    /// Persists a recovered nonce for a queued job.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on write failures.
    pub fn set_anchor_job_nonce(&self, job_id: i64, nonce: u64) -> Result<(), StoreError> {
        let conn = self.conn()?;
        let value = i64::try_from(nonce).map_err(|_| invalid("nonce out of range"))?;
        conn.execute("UPDATE anchor_jobs SET nonce = ?1 WHERE id = ?2", params![value, job_id])
            .map_err(map_sql)?;
        Ok(())
    }

    /// Completes an anchor job, recording the anchored state.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] when the recorded nonce does not
    /// strictly increase over the persisted anchor state.
    pub fn complete_anchor_job(&self, job_id: i64, recorded_nonce: u64) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(map_sql)?;
        let job = {
            let mut statement = tx
                .prepare(
                    "SELECT id, complaint_id, kind, complaint_hash, sla_hash, status_hash,
                            at_time, nonce
                     FROM anchor_jobs WHERE id = ?1",
                )
                .map_err(map_sql)?;
            statement
                .query_row(params![job_id], anchor_job_from_row)
                .optional()
                .map_err(map_sql)?
                .ok_or_else(|| StoreError::NotFound("anchor job".to_string()))??
        };
        let nonce = i64::try_from(recorded_nonce).map_err(|_| invalid("nonce out of range"))?;
        match job.kind {
            AnchorJobKind::Create => {
                let sla_hash =
                    job.sla_hash.as_ref().ok_or_else(|| corrupt("create job missing sla hash"))?;
                tx.execute(
                    "INSERT INTO chain_anchors
                         (complaint_id, complaint_hash, sla_hash, status_hash, created_at,
                          last_updated_at, status_nonce)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?5, ?6)",
                    params![
                        job.complaint_id.as_str(),
                        job.complaint_hash.value,
                        sla_hash.value,
                        job.status_hash.value,
                        job.at_time.as_unix_millis(),
                        nonce,
                    ],
                )
                .map_err(map_sql)?;
            }
            AnchorJobKind::Update => {
                let current: i64 = tx
                    .query_row(
                        "SELECT status_nonce FROM chain_anchors WHERE complaint_id = ?1",
                        params![job.complaint_id.as_str()],
                        |row| row.get(0),
                    )
                    .optional()
                    .map_err(map_sql)?
                    .ok_or_else(|| StoreError::NotFound("chain anchor".to_string()))?;
                if nonce <= current {
                    return Err(StoreError::Conflict(format!(
                        "anchor nonce must increase: {nonce} <= {current}"
                    )));
                }
                tx.execute(
                    "UPDATE chain_anchors SET status_hash = ?1, last_updated_at = ?2,
                            status_nonce = ?3
                     WHERE complaint_id = ?4",
                    params![
                        job.status_hash.value,
                        job.at_time.as_unix_millis(),
                        nonce,
                        job.complaint_id.as_str(),
                    ],
                )
                .map_err(map_sql)?;
            }
        }
        tx.execute(
            "UPDATE anchor_jobs SET done = 1, in_flight = 0 WHERE id = ?1",
            params![job_id],
        )
        .map_err(map_sql)?;
        tx.commit().map_err(map_sql)
    }

    /// Returns the persisted anchor state for a complaint.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on read failures.
    pub fn anchor_for_complaint(
        &self,
        id: &ComplaintId,
    ) -> Result<Option<ChainAnchorRecord>, StoreError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT complaint_hash, sla_hash, status_hash, created_at, last_updated_at,
                    status_nonce
             FROM chain_anchors WHERE complaint_id = ?1",
            params![id.as_str()],
            |row| {
                Ok(ChainAnchorRecord {
                    complaint_id: id.clone(),
                    complaint_hash: digest_from_hex(row.get::<_, String>(0)?),
                    sla_hash: digest_from_hex(row.get::<_, String>(1)?),
                    status_hash: digest_from_hex(row.get::<_, String>(2)?),
                    created_at: Timestamp::from_unix_millis(row.get(3)?),
                    last_updated_at: Timestamp::from_unix_millis(row.get(4)?),
                    status_nonce: row.get::<_, i64>(5)?.unsigned_abs(),
                })
            },
        )
        .optional()
        .map_err(map_sql)
    }

    // ========================================================================
    // SECTION: Outbox
    // ========================================================================

    /// Returns pending outbound messages, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on read failures.
    pub fn pending_outbound(&self, limit: usize) -> Result<Vec<OutboundMessage>, StoreError> {
        let conn = self.conn()?;
        let bound = i64::try_from(limit).map_err(|_| invalid("limit out of range"))?;
        let mut statement = conn
            .prepare(
                "SELECT id, channel, payload, status, attempts FROM outbound_messages
                 WHERE status = 'pending' ORDER BY id ASC LIMIT ?1",
            )
            .map_err(map_sql)?;
        let rows = statement
            .query_map(params![bound], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, u32>(4)?,
                ))
            })
            .map_err(map_sql)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(map_sql)?;
        rows.into_iter()
            .map(|(id, channel, payload, status, attempts)| {
                Ok(OutboundMessage {
                    id,
                    channel,
                    payload: serde_json::from_str(&payload)
                        .map_err(|_| corrupt("outbound payload"))?,
                    status,
                    attempts,
                })
            })
            .collect()
    }

    /// Marks an outbound message delivered or failed, counting the attempt.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on write failures.
    pub fn mark_outbound(&self, id: i64, delivered: bool) -> Result<(), StoreError> {
        let conn = self.conn()?;
        let status = if delivered { "sent" } else { "failed" };
        conn.execute(
            "UPDATE outbound_messages SET status = ?1, attempts = attempts + 1 WHERE id = ?2",
            params![status, id],
        )
        .map_err(map_sql)?;
        Ok(())
    }

    // ========================================================================
    // SECTION: Analytics
    // ========================================================================

    /// Inserts a de-identified analytics event row.
    ///
    /// `audit_user_id` is retained for audit only and is nulled on erasure;
    /// it never appears in any query output.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on write failures.
    pub fn insert_analytics_event(
        &self,
        event: &DeidentifiedEvent,
        audit_user_id: Option<&UserId>,
        now: Timestamp,
        ctx: &AuditContext,
    ) -> Result<(), StoreError> {
        let payload = serde_json::to_string(&event.payload)
            .map_err(|err| StoreError::Invalid(err.to_string()))?;
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(map_sql)?;
        tx.execute(
            "INSERT INTO analytics_events
                 (event_type, category, time_bucket, geo_cell, age_bucket, gender, payload,
                  audit_user_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                event.event_type.as_str(),
                event.category,
                event.time_bucket.as_unix_millis(),
                event.geo_cell,
                event.age_bucket.as_str(),
                event.gender.as_str(),
                payload,
                audit_user_id.map(UserId::as_str),
                now.as_unix_millis(),
            ],
        )
        .map_err(map_sql)?;
        append_audit(
            &tx,
            ctx,
            AuditAction::AnalyticsEventRecorded,
            "analytics_event",
            event.event_type.as_str(),
            now,
            &json!({ "event_type": event.event_type.as_str() }),
        )?;
        tx.commit().map_err(map_sql)
    }

    /// Upserts aggregate counts: increment existing rows, insert new ones.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on write failures.
    pub fn upsert_aggregates(
        &self,
        entries: &[(sahay_core::AggregateKey, u64)],
        now: Timestamp,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(map_sql)?;
        for (key, count) in entries {
            let increment = i64::try_from(*count).map_err(|_| invalid("count out of range"))?;
            tx.execute(
                "INSERT INTO aggregated_events
                     (key, event_type, category, time_bucket, geo_cell, age_bucket, gender,
                      count, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(key) DO UPDATE SET
                     count = count + excluded.count,
                     updated_at = excluded.updated_at",
                params![
                    key.to_string(),
                    key.event_type.as_str(),
                    key.category,
                    key.time_bucket.as_unix_millis(),
                    key.geo_cell,
                    key.age_bucket.as_str(),
                    key.gender.as_str(),
                    increment,
                    now.as_unix_millis(),
                ],
            )
            .map_err(map_sql)?;
        }
        tx.commit().map_err(map_sql)
    }

    /// Queries aggregates with the k-anonymity filter applied.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on read failures.
    pub fn query_aggregates(
        &self,
        query: &AggregateQuery,
        k: u64,
    ) -> Result<Vec<AggregatedRow>, StoreError> {
        let mut sql = String::from(
            "SELECT key, event_type, category, time_bucket, geo_cell, age_bucket, gender, count,
                    updated_at
             FROM aggregated_events WHERE count >= ?",
        );
        let mut values: Vec<rusqlite::types::Value> =
            vec![i64::try_from(k).map_err(|_| invalid("k out of range"))?.into()];
        let mut push = |clause: &str, value: rusqlite::types::Value| {
            sql.push_str(clause);
            values.push(value);
        };
        if let Some(event_type) = &query.event_type {
            push(" AND event_type = ?", event_type.clone().into());
        }
        if let Some(category) = &query.category {
            push(" AND category = ?", category.clone().into());
        }
        if let Some(geo_cell) = &query.geo_cell {
            push(" AND geo_cell = ?", geo_cell.clone().into());
        }
        if let Some(age_bucket) = &query.age_bucket {
            push(" AND age_bucket = ?", age_bucket.clone().into());
        }
        if let Some(gender) = &query.gender {
            push(" AND gender = ?", gender.clone().into());
        }
        if let Some(from) = query.from_bucket {
            push(" AND time_bucket >= ?", from.as_unix_millis().into());
        }
        if let Some(to) = query.to_bucket {
            push(" AND time_bucket < ?", to.as_unix_millis().into());
        }
        sql.push_str(" ORDER BY key ASC");

        let conn = self.conn()?;
        let mut statement = conn.prepare(&sql).map_err(map_sql)?;
        let rows = statement
            .query_map(params_from_iter(values), aggregated_row_from_row)
            .map_err(map_sql)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(map_sql)?;
        Ok(rows)
    }

    /// Returns total counts per geo cell, k-filtered, largest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on read failures.
    pub fn top_regions(&self, k: u64, limit: usize) -> Result<Vec<(String, u64)>, StoreError> {
        let conn = self.conn()?;
        let k_bound = i64::try_from(k).map_err(|_| invalid("k out of range"))?;
        let bound = i64::try_from(limit).map_err(|_| invalid("limit out of range"))?;
        let mut statement = conn
            .prepare(
                "SELECT geo_cell, SUM(count) AS total FROM aggregated_events
                 WHERE count >= ?1 GROUP BY geo_cell ORDER BY total DESC, geo_cell ASC LIMIT ?2",
            )
            .map_err(map_sql)?;
        let rows = statement
            .query_map(params![k_bound, bound], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?.unsigned_abs()))
            })
            .map_err(map_sql)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(map_sql)?;
        Ok(rows)
    }

    // ========================================================================
    // SECTION: Materialized Views
    // ========================================================================

    /// Rebuilds all materialized views from the aggregate table.
    ///
    /// The freshness watermark is `MAX(updated_at)` over the inputs, not the
    /// wall clock, so "just refreshed" remains meaningful under replay.
    /// Returns that watermark.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on write failures.
    pub fn refresh_views(
        &self,
        k: u64,
        now: Timestamp,
        ctx: &AuditContext,
    ) -> Result<Timestamp, StoreError> {
        let inputs = self.query_aggregates(&AggregateQuery::default(), k)?;
        let watermark = inputs
            .iter()
            .map(|row| row.updated_at)
            .max()
            .unwrap_or_else(|| Timestamp::from_unix_millis(0));

        let mut daily_triage: BTreeMap<String, u64> = BTreeMap::new();
        let mut by_district: BTreeMap<String, u64> = BTreeMap::new();
        let mut heatmap: BTreeMap<String, u64> = BTreeMap::new();
        let mut breaches: BTreeMap<String, u64> = BTreeMap::new();
        for row in &inputs {
            match row.event_type.as_str() {
                "triage_completed" | "triage_emergency" => {
                    let day = day_key(row.time_bucket)?;
                    *daily_triage.entry(day).or_insert(0) += row.count;
                    let cell = format!("{}|{}", row.geo_cell, row.category);
                    *heatmap.entry(cell).or_insert(0) += row.count;
                }
                "complaint_submitted" | "complaint_resolved" => {
                    *by_district.entry(row.geo_cell.clone()).or_insert(0) += row.count;
                }
                "complaint_escalated" => {
                    *by_district.entry(row.geo_cell.clone()).or_insert(0) += row.count;
                    *breaches.entry(row.category.clone()).or_insert(0) += row.count;
                }
                _ => {}
            }
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(map_sql)?;
        for (view, rows) in [
            (VIEW_DAILY_TRIAGE, &daily_triage),
            (VIEW_COMPLAINTS_BY_DISTRICT, &by_district),
            (VIEW_SYMPTOM_HEATMAP, &heatmap),
            (VIEW_SLA_BREACHES, &breaches),
        ] {
            tx.execute("DELETE FROM materialized_views WHERE view_name = ?1", params![view])
                .map_err(map_sql)?;
            for (row_key, value) in rows {
                let count = i64::try_from(*value).map_err(|_| invalid("view count"))?;
                tx.execute(
                    "INSERT INTO materialized_views (view_name, row_key, value, refreshed_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![view, row_key, count, watermark.as_unix_millis()],
                )
                .map_err(map_sql)?;
            }
        }
        append_audit(
            &tx,
            ctx,
            AuditAction::ViewsRefreshed,
            "materialized_views",
            "all",
            now,
            &json!({ "watermark": watermark.as_unix_millis() }),
        )?;
        tx.commit().map_err(map_sql)?;
        Ok(watermark)
    }

    /// Returns the rows of a materialized view.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on read failures.
    pub fn view_rows(&self, view_name: &str) -> Result<Vec<ViewRow>, StoreError> {
        let conn = self.conn()?;
        let mut statement = conn
            .prepare(
                "SELECT row_key, value, refreshed_at FROM materialized_views
                 WHERE view_name = ?1 ORDER BY row_key ASC",
            )
            .map_err(map_sql)?;
        let rows = statement
            .query_map(params![view_name], |row| {
                Ok(ViewRow {
                    row_key: row.get(0)?,
                    value: row.get::<_, i64>(1)?.unsigned_abs(),
                    refreshed_at: Timestamp::from_unix_millis(row.get(2)?),
                })
            })
            .map_err(map_sql)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(map_sql)?;
        Ok(rows)
    }

    // ========================================================================
    // SECTION: Right To Erasure
    // ========================================================================

    /// Erases a user: owned rows cascade, analytics rows are de-identified
    /// and retained, and subsequent reads surface `Gone`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for unknown users.
    pub fn erase_user(
        &self,
        user_id: &UserId,
        now: Timestamp,
        ctx: &AuditContext,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(map_sql)?;
        require_live_user(&tx, user_id)?;
        tx.execute(
            "UPDATE users SET erased = 1, phone_alias = 'erased:' || user_id WHERE user_id = ?1",
            params![user_id.as_str()],
        )
        .map_err(map_sql)?;
        for sql in [
            "DELETE FROM profiles WHERE user_id = ?1",
            "DELETE FROM wellness_entries WHERE user_id = ?1",
            "DELETE FROM consents WHERE user_id = ?1",
            "DELETE FROM tokens WHERE user_id = ?1",
            "DELETE FROM user_roles WHERE user_id = ?1",
            "DELETE FROM triage_sessions WHERE owner_id = ?1",
            "DELETE FROM tele_requests WHERE citizen_id = ?1",
            "UPDATE complaints SET submitter_id = NULL WHERE submitter_id = ?1",
            "UPDATE analytics_events SET audit_user_id = NULL WHERE audit_user_id = ?1",
        ] {
            tx.execute(sql, params![user_id.as_str()]).map_err(map_sql)?;
        }
        append_audit(
            &tx,
            ctx,
            AuditAction::UserErased,
            "user",
            user_id.as_str(),
            now,
            &json!({}),
        )?;
        tx.commit().map_err(map_sql)
    }

    // ========================================================================
    // SECTION: Job Locks
    // ========================================================================

    /// Tries to acquire (or renew) the advisory lock for a job.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on write failures.
    pub fn try_acquire_job_lock(
        &self,
        job_name: &str,
        holder: &str,
        ttl_millis: i64,
        now: Timestamp,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(map_sql)?;
        let current: Option<(String, i64)> = tx
            .query_row(
                "SELECT holder, expires_at FROM job_locks WHERE job_name = ?1",
                params![job_name],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(map_sql)?;
        let expires_at = now.as_unix_millis().saturating_add(ttl_millis);
        let acquired = match current {
            Some((current_holder, current_expiry))
                if current_holder != holder && current_expiry > now.as_unix_millis() =>
            {
                false
            }
            _ => {
                tx.execute(
                    "INSERT INTO job_locks (job_name, holder, expires_at) VALUES (?1, ?2, ?3)
                     ON CONFLICT(job_name) DO UPDATE SET holder = excluded.holder,
                         expires_at = excluded.expires_at",
                    params![job_name, holder, expires_at],
                )
                .map_err(map_sql)?;
                true
            }
        };
        tx.commit().map_err(map_sql)?;
        Ok(acquired)
    }

    /// Releases the advisory lock for a job if held by `holder`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on write failures.
    pub fn release_job_lock(&self, job_name: &str, holder: &str) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM job_locks WHERE job_name = ?1 AND holder = ?2",
            params![job_name, holder],
        )
        .map_err(map_sql)?;
        Ok(())
    }
}

// ============================================================================
// SECTION: Schema
// ============================================================================

/// Applies the schema and checks the stored version.
fn apply_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS meta (key TEXT PRIMARY KEY, value TEXT NOT NULL);
         CREATE TABLE IF NOT EXISTS users (
             user_id TEXT PRIMARY KEY,
             phone_alias TEXT NOT NULL UNIQUE,
             created_at INTEGER NOT NULL,
             erased INTEGER NOT NULL DEFAULT 0
         );
         CREATE TABLE IF NOT EXISTS tokens (
             token_digest TEXT PRIMARY KEY,
             user_id TEXT NOT NULL,
             issued_at INTEGER NOT NULL,
             revoked INTEGER NOT NULL DEFAULT 0
         );
         CREATE TABLE IF NOT EXISTS user_roles (
             user_id TEXT NOT NULL,
             role TEXT NOT NULL,
             PRIMARY KEY (user_id, role)
         );
         CREATE TABLE IF NOT EXISTS profiles (
             user_id TEXT PRIMARY KEY,
             name_alias TEXT,
             dob TEXT,
             sex TEXT,
             pincode TEXT,
             client_time INTEGER NOT NULL,
             event_id TEXT NOT NULL
         );
         CREATE TABLE IF NOT EXISTS wellness_entries (
             event_id TEXT PRIMARY KEY,
             user_id TEXT NOT NULL,
             entity_type TEXT NOT NULL,
             client_time INTEGER NOT NULL,
             payload TEXT NOT NULL
         );
         CREATE TABLE IF NOT EXISTS consents (
             id INTEGER PRIMARY KEY AUTOINCREMENT,
             user_id TEXT NOT NULL,
             category TEXT NOT NULL,
             scope TEXT NOT NULL,
             version INTEGER NOT NULL,
             granted INTEGER NOT NULL,
             granted_at INTEGER NOT NULL
         );
         CREATE INDEX IF NOT EXISTS idx_consents_lookup
             ON consents (user_id, category, scope, granted_at);
         CREATE TABLE IF NOT EXISTS audit_log (
             seq INTEGER PRIMARY KEY,
             actor TEXT NOT NULL,
             action TEXT NOT NULL,
             entity_type TEXT NOT NULL,
             entity_id TEXT NOT NULL,
             ip TEXT,
             device TEXT,
             at INTEGER NOT NULL,
             payload_digest TEXT NOT NULL,
             prev_hash TEXT NOT NULL,
             entry_hash TEXT NOT NULL
         );
         CREATE TABLE IF NOT EXISTS sync_events (
             event_id TEXT PRIMARY KEY,
             device_id TEXT NOT NULL,
             user_id TEXT NOT NULL,
             entity_type TEXT NOT NULL,
             operation TEXT NOT NULL,
             client_time INTEGER NOT NULL,
             server_time INTEGER NOT NULL,
             payload TEXT NOT NULL,
             outcome TEXT NOT NULL
         );
         CREATE TABLE IF NOT EXISTS triage_sessions (
             session_id TEXT PRIMARY KEY,
             owner_id TEXT NOT NULL,
             symptoms_text TEXT NOT NULL,
             category TEXT NOT NULL,
             red_flags TEXT NOT NULL,
             guidance_text TEXT NOT NULL,
             created_at INTEGER NOT NULL
         );
         CREATE TABLE IF NOT EXISTS tele_requests (
             request_id TEXT PRIMARY KEY,
             citizen_id TEXT NOT NULL,
             clinician_id TEXT,
             status TEXT NOT NULL,
             created_at INTEGER NOT NULL
         );
         CREATE TABLE IF NOT EXISTS prescriptions (
             prescription_id TEXT PRIMARY KEY,
             tele_request_id TEXT NOT NULL,
             items TEXT NOT NULL,
             summary_text TEXT NOT NULL,
             created_at INTEGER NOT NULL
         );
         CREATE TABLE IF NOT EXISTS complaints (
             complaint_id TEXT PRIMARY KEY,
             submitter_id TEXT,
             category TEXT NOT NULL,
             payload_encrypted BLOB NOT NULL,
             status TEXT NOT NULL,
             created_at INTEGER NOT NULL,
             sla_deadline INTEGER NOT NULL,
             escalation_level TEXT NOT NULL,
             escalation_exhausted INTEGER NOT NULL DEFAULT 0,
             closure_feedback TEXT,
             closure_hash TEXT
         );
         CREATE INDEX IF NOT EXISTS idx_complaints_deadline
             ON complaints (sla_deadline, status);
         CREATE TABLE IF NOT EXISTS outbound_messages (
             id INTEGER PRIMARY KEY AUTOINCREMENT,
             channel TEXT NOT NULL,
             payload TEXT NOT NULL,
             status TEXT NOT NULL,
             attempts INTEGER NOT NULL DEFAULT 0,
             created_at INTEGER NOT NULL
         );
         CREATE TABLE IF NOT EXISTS chain_anchors (
             complaint_id TEXT PRIMARY KEY,
             complaint_hash TEXT NOT NULL,
             sla_hash TEXT NOT NULL,
             status_hash TEXT NOT NULL,
             created_at INTEGER NOT NULL,
             last_updated_at INTEGER NOT NULL,
             status_nonce INTEGER NOT NULL
         );
         CREATE TABLE IF NOT EXISTS anchor_jobs (
             id INTEGER PRIMARY KEY AUTOINCREMENT,
             complaint_id TEXT NOT NULL,
             kind TEXT NOT NULL,
             complaint_hash TEXT NOT NULL,
             sla_hash TEXT,
             status_hash TEXT NOT NULL,
             at_time INTEGER NOT NULL,
             nonce INTEGER NOT NULL,
             in_flight INTEGER NOT NULL DEFAULT 0,
             done INTEGER NOT NULL DEFAULT 0,
             enqueued_at INTEGER NOT NULL
         );
         CREATE INDEX IF NOT EXISTS idx_anchor_jobs_pending
             ON anchor_jobs (complaint_id, done, in_flight);
         CREATE TABLE IF NOT EXISTS analytics_events (
             id INTEGER PRIMARY KEY AUTOINCREMENT,
             event_type TEXT NOT NULL,
             category TEXT NOT NULL,
             time_bucket INTEGER NOT NULL,
             geo_cell TEXT NOT NULL,
             age_bucket TEXT NOT NULL,
             gender TEXT NOT NULL,
             payload TEXT NOT NULL,
             audit_user_id TEXT,
             created_at INTEGER NOT NULL
         );
         CREATE TABLE IF NOT EXISTS aggregated_events (
             key TEXT PRIMARY KEY,
             event_type TEXT NOT NULL,
             category TEXT NOT NULL,
             time_bucket INTEGER NOT NULL,
             geo_cell TEXT NOT NULL,
             age_bucket TEXT NOT NULL,
             gender TEXT NOT NULL,
             count INTEGER NOT NULL,
             updated_at INTEGER NOT NULL
         );
         CREATE TABLE IF NOT EXISTS materialized_views (
             view_name TEXT NOT NULL,
             row_key TEXT NOT NULL,
             value INTEGER NOT NULL,
             refreshed_at INTEGER NOT NULL,
             PRIMARY KEY (view_name, row_key)
         );
         CREATE TABLE IF NOT EXISTS job_locks (
             job_name TEXT PRIMARY KEY,
             holder TEXT NOT NULL,
             expires_at INTEGER NOT NULL
         );",
    )
    .map_err(map_sql)?;

    let stored: Option<String> = conn
        .query_row("SELECT value FROM meta WHERE key = 'schema_version'", [], |row| row.get(0))
        .optional()
        .map_err(map_sql)?;
    match stored {
        None => {
            conn.execute(
                "INSERT INTO meta (key, value) VALUES ('schema_version', ?1)",
                params![SCHEMA_VERSION.to_string()],
            )
            .map_err(map_sql)?;
            Ok(())
        }
        Some(value) if value == SCHEMA_VERSION.to_string() => Ok(()),
        Some(value) => Err(StoreError::VersionMismatch(format!(
            "expected schema {SCHEMA_VERSION}, found {value}"
        ))),
    }
}

// ============================================================================
// SECTION: Row Mapping Helpers
// ============================================================================

/// Maps a rusqlite error to the shared store taxonomy.
fn map_sql(err: rusqlite::Error) -> StoreError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, _)
            if matches!(failure.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) =>
        {
            StoreError::Transient(err.to_string())
        }
        _ => StoreError::Io(err.to_string()),
    }
}

/// Maps a complaint-machine error to the store taxonomy.
fn map_complaint(err: ComplaintError) -> StoreError {
    match err {
        ComplaintError::StateInvalid { .. } | ComplaintError::ClosureFeedbackRequired => {
            StoreError::StateInvalid(err.to_string())
        }
        ComplaintError::Hash(inner) => StoreError::Invalid(inner.to_string()),
    }
}

/// Builds an invalid-input error.
fn invalid(message: &str) -> StoreError {
    StoreError::Invalid(message.to_string())
}

/// Builds a corruption error.
fn corrupt(what: &str) -> StoreError {
    StoreError::Corrupt(format!("unparseable {what}"))
}

/// Wraps a stored hex digest.
fn digest_from_hex(value: String) -> HashDigest {
    HashDigest {
        algorithm: HashAlgorithm::Sha256,
        value,
    }
}

/// Computes the canonical digest of an audit payload.
fn digest_of<T: Serialize>(value: &T) -> Result<HashDigest, StoreError> {
    hash_canonical_json(DEFAULT_HASH_ALGORITHM, value)
        .map_err(|err| StoreError::Invalid(err.to_string()))
}

/// Returns the stable operation label of an envelope.
const fn operation_label(envelope: &SyncEnvelope) -> &'static str {
    match envelope.operation {
        sahay_core::SyncOperation::Create => "CREATE",
        sahay_core::SyncOperation::Update => "UPDATE",
        sahay_core::SyncOperation::Delete => "DELETE",
    }
}

/// Reads an [`AuditEntry`] from a row.
fn audit_entry_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<AuditEntry, StoreError>> {
    let seq = row.get::<_, i64>(0)?.unsigned_abs();
    let actor: String = row.get(1)?;
    let action: String = row.get(2)?;
    let entity_type: String = row.get(3)?;
    let entity_id: String = row.get(4)?;
    let ip: Option<String> = row.get(5)?;
    let device: Option<String> = row.get(6)?;
    let at: i64 = row.get(7)?;
    let payload_digest: String = row.get(8)?;
    let prev_hash: String = row.get(9)?;
    let entry_hash: String = row.get(10)?;
    Ok(AuditAction::parse(&action)
        .ok_or_else(|| corrupt("audit action"))
        .map(|action| AuditEntry {
            seq,
            actor,
            action,
            entity_type,
            entity_id,
            ip,
            device,
            at: Timestamp::from_unix_millis(at),
            payload_digest: digest_from_hex(payload_digest),
            prev_hash: digest_from_hex(prev_hash),
            entry_hash: digest_from_hex(entry_hash),
        }))
}

/// Reads an [`AnchorJob`] from a row.
fn anchor_job_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<AnchorJob, StoreError>> {
    let id: i64 = row.get(0)?;
    let complaint_id: String = row.get(1)?;
    let kind: String = row.get(2)?;
    let complaint_hash: String = row.get(3)?;
    let sla_hash: Option<String> = row.get(4)?;
    let status_hash: String = row.get(5)?;
    let at_time: i64 = row.get(6)?;
    let nonce = row.get::<_, i64>(7)?.unsigned_abs();
    Ok(AnchorJobKind::parse(&kind).ok_or_else(|| corrupt("anchor job kind")).map(|kind| AnchorJob {
        id,
        complaint_id: ComplaintId::new(complaint_id),
        kind,
        complaint_hash: digest_from_hex(complaint_hash),
        sla_hash: sla_hash.map(digest_from_hex),
        status_hash: digest_from_hex(status_hash),
        at_time: Timestamp::from_unix_millis(at_time),
        nonce,
    }))
}

/// Reads an [`AggregatedRow`] from a row.
fn aggregated_row_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AggregatedRow> {
    Ok(AggregatedRow {
        key: row.get(0)?,
        event_type: row.get(1)?,
        category: row.get(2)?,
        time_bucket: Timestamp::from_unix_millis(row.get(3)?),
        geo_cell: row.get(4)?,
        age_bucket: row.get(5)?,
        gender: row.get(6)?,
        count: row.get::<_, i64>(7)?.unsigned_abs(),
        updated_at: Timestamp::from_unix_millis(row.get(8)?),
    })
}

/// Renders the day key (UTC date) for a time bucket.
fn day_key(bucket: Timestamp) -> Result<String, StoreError> {
    let day = bucket.floor_to(MILLIS_PER_DAY);
    let rendered = day.to_rfc3339().map_err(|err| StoreError::Invalid(err.to_string()))?;
    Ok(rendered.chars().take(10).collect())
}

// ============================================================================
// SECTION: Connection Helpers
// ============================================================================

/// Fails with `NotFound`/`Gone` unless the user exists and is not erased.
fn require_live_user(conn: &Connection, user_id: &UserId) -> Result<(), StoreError> {
    let erased: Option<i64> = conn
        .query_row(
            "SELECT erased FROM users WHERE user_id = ?1",
            params![user_id.as_str()],
            |row| row.get(0),
        )
        .optional()
        .map_err(map_sql)?;
    match erased {
        None => Err(StoreError::NotFound("user".to_string())),
        Some(flag) if flag != 0 => Err(StoreError::Gone("user erased".to_string())),
        Some(_) => Ok(()),
    }
}

/// Fails with `Gone` when the user exists but was erased.
fn require_not_erased(conn: &Connection, user_id: &UserId) -> Result<(), StoreError> {
    let erased: Option<i64> = conn
        .query_row(
            "SELECT erased FROM users WHERE user_id = ?1",
            params![user_id.as_str()],
            |row| row.get(0),
        )
        .optional()
        .map_err(map_sql)?;
    if erased.is_some_and(|flag| flag != 0) {
        return Err(StoreError::Gone("user erased".to_string()));
    }
    Ok(())
}

/// Loads the roles held by a user.
fn roles_for_conn(conn: &Connection, user_id: &UserId) -> Result<RoleSet, StoreError> {
    let mut statement = conn
        .prepare("SELECT role FROM user_roles WHERE user_id = ?1 ORDER BY role ASC")
        .map_err(map_sql)?;
    let labels = statement
        .query_map(params![user_id.as_str()], |row| row.get::<_, String>(0))
        .map_err(map_sql)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(map_sql)?;
    let mut roles = RoleSet::new();
    for label in labels {
        roles.insert(Role::parse(&label).map_err(|_| corrupt("role"))?);
    }
    Ok(roles)
}

/// Appends an audit entry inside the caller's transaction.
///
/// The next `seq` is read inside the transaction, so entries can never race
/// and the chain can never fork.
fn append_audit(
    conn: &Connection,
    ctx: &AuditContext,
    action: AuditAction,
    entity_type: &str,
    entity_id: &str,
    at: Timestamp,
    payload: &serde_json::Value,
) -> Result<AuditEntry, StoreError> {
    let previous: Option<(i64, String)> = conn
        .query_row(
            "SELECT seq, entry_hash FROM audit_log ORDER BY seq DESC LIMIT 1",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .map_err(map_sql)?;
    let (seq, prev_hash) = match previous {
        None => (1, HashDigest::zero()),
        Some((last_seq, hash)) => (last_seq.unsigned_abs() + 1, digest_from_hex(hash)),
    };
    let draft = AuditEntryDraft {
        actor: ctx.actor.clone(),
        action,
        entity_type: entity_type.to_string(),
        entity_id: entity_id.to_string(),
        ip: ctx.ip.clone(),
        device: ctx.device.clone(),
        at,
        payload_digest: digest_of(payload)?,
    };
    let entry = draft.seal(seq, prev_hash).map_err(|err| StoreError::Invalid(err.to_string()))?;
    conn.execute(
        "INSERT INTO audit_log
             (seq, actor, action, entity_type, entity_id, ip, device, at, payload_digest,
              prev_hash, entry_hash)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            i64::try_from(entry.seq).map_err(|_| invalid("seq out of range"))?,
            entry.actor,
            entry.action.as_str(),
            entry.entity_type,
            entry.entity_id,
            entry.ip,
            entry.device,
            entry.at.as_unix_millis(),
            entry.payload_digest.value,
            entry.prev_hash.value,
            entry.entry_hash.value,
        ],
    )
    .map_err(map_sql)?;
    Ok(entry)
}

/// Applies a profile write under last-write-wins.
fn apply_profile_write(
    conn: &Connection,
    envelope: &SyncEnvelope,
) -> Result<SyncOutcome, StoreError> {
    let current: Option<(i64, String)> = conn
        .query_row(
            "SELECT client_time, event_id FROM profiles WHERE user_id = ?1",
            params![envelope.user_id.as_str()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .map_err(map_sql)?;
    let decision = match &current {
        None => sahay_core::LwwDecision::Apply,
        Some((client_time, event_id)) => {
            let current_id = EventId::new(event_id.clone());
            sahay_core::core::sync::resolve_profile_write(
                Some((Timestamp::from_unix_millis(*client_time), &current_id)),
                envelope.client_time,
                &envelope.event_id,
            )
        }
    };
    if decision == sahay_core::LwwDecision::Stale {
        return Ok(SyncOutcome::Rejected(RejectReason::Stale));
    }
    let field = |name: &str| -> Option<String> {
        envelope.payload.get(name).and_then(|value| value.as_str()).map(str::to_string)
    };
    conn.execute(
        "INSERT INTO profiles (user_id, name_alias, dob, sex, pincode, client_time, event_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(user_id) DO UPDATE SET
             name_alias = excluded.name_alias,
             dob = excluded.dob,
             sex = excluded.sex,
             pincode = excluded.pincode,
             client_time = excluded.client_time,
             event_id = excluded.event_id",
        params![
            envelope.user_id.as_str(),
            field("name_alias"),
            field("dob"),
            field("sex"),
            field("pincode"),
            envelope.client_time.as_unix_millis(),
            envelope.event_id.as_str(),
        ],
    )
    .map_err(map_sql)?;
    Ok(SyncOutcome::Accepted)
}

/// Raw triage session row prior to label parsing.
struct TriageSessionRow {
    /// Owner id.
    owner_id: String,
    /// Symptom text.
    symptoms_text: String,
    /// Category label.
    category: String,
    /// Red flags JSON array.
    red_flags: String,
    /// Guidance text.
    guidance_text: String,
    /// Creation time in unix millis.
    created_at: i64,
}

/// Loads a tele request by id.
fn tele_request_by_id(
    conn: &Connection,
    id: &TeleRequestId,
) -> Result<Option<TeleRequestRecord>, StoreError> {
    let row: Option<(String, Option<String>, String, i64)> = conn
        .query_row(
            "SELECT citizen_id, clinician_id, status, created_at FROM tele_requests
             WHERE request_id = ?1",
            params![id.as_str()],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )
        .optional()
        .map_err(map_sql)?;
    row.map(|(citizen_id, clinician_id, status, created_at)| {
        Ok(TeleRequestRecord {
            id: id.clone(),
            citizen_id: UserId::new(citizen_id),
            clinician_id: clinician_id.map(UserId::new),
            status: TeleStatus::parse(&status).ok_or_else(|| corrupt("tele status"))?,
            created_at: Timestamp::from_unix_millis(created_at),
        })
    })
    .transpose()
}

/// Raw complaint row prior to label parsing.
struct ComplaintRow {
    /// Submitter id, when not anonymous.
    submitter_id: Option<String>,
    /// Category label.
    category: String,
    /// Status label.
    status: String,
    /// Creation time in unix millis.
    created_at: i64,
    /// SLA deadline in unix millis.
    sla_deadline: i64,
    /// Escalation level label.
    escalation_level: String,
    /// Exhausted flag.
    escalation_exhausted: i64,
    /// Closure feedback text.
    closure_feedback: Option<String>,
    /// Closure hash hex.
    closure_hash: Option<String>,
}

/// Loads a complaint by id.
fn complaint_by_id(conn: &Connection, id: &ComplaintId) -> Result<Option<Complaint>, StoreError> {
    let row: Option<ComplaintRow> = conn
        .query_row(
            "SELECT submitter_id, category, status, created_at, sla_deadline, escalation_level,
                    escalation_exhausted, closure_feedback, closure_hash
             FROM complaints WHERE complaint_id = ?1",
            params![id.as_str()],
            |row| {
                Ok(ComplaintRow {
                    submitter_id: row.get(0)?,
                    category: row.get(1)?,
                    status: row.get(2)?,
                    created_at: row.get(3)?,
                    sla_deadline: row.get(4)?,
                    escalation_level: row.get(5)?,
                    escalation_exhausted: row.get(6)?,
                    closure_feedback: row.get(7)?,
                    closure_hash: row.get(8)?,
                })
            },
        )
        .optional()
        .map_err(map_sql)?;
    row.map(|row| {
        Ok(Complaint {
            id: id.clone(),
            submitter_id: row.submitter_id.map(UserId::new),
            category: ComplaintCategory::parse(&row.category)
                .ok_or_else(|| corrupt("complaint category"))?,
            status: ComplaintStatus::parse(&row.status)
                .ok_or_else(|| corrupt("complaint status"))?,
            created_at: Timestamp::from_unix_millis(row.created_at),
            sla_deadline: Timestamp::from_unix_millis(row.sla_deadline),
            escalation_level: EscalationLevel::parse(&row.escalation_level)
                .ok_or_else(|| corrupt("escalation level"))?,
            escalation_exhausted: row.escalation_exhausted != 0,
            closure_feedback: row.closure_feedback,
            closure_hash: row.closure_hash.map(digest_from_hex),
        })
    })
    .transpose()
}

/// Returns the scrubbed context for anonymous complaints, the caller's
/// context otherwise.
fn effective_ctx(ctx: &AuditContext, complaint: &Complaint) -> AuditContext {
    if complaint.submitter_id.is_none() {
        AuditContext::anonymous()
    } else {
        ctx.clone()
    }
}

/// Issues the next strictly-increasing nonce and enqueues an anchor job.
fn enqueue_anchor_job(
    conn: &Connection,
    complaint: &Complaint,
    kind: AnchorJobKind,
    at_time: Timestamp,
) -> Result<(), StoreError> {
    let complaint_hash =
        complaint_anchor_hash(&complaint.id, complaint.category, complaint.created_at)
            .map_err(|err| StoreError::Invalid(err.to_string()))?;
    let sla_hash = sla_anchor_hash(complaint.category, complaint.sla_deadline)
        .map_err(|err| StoreError::Invalid(err.to_string()))?;
    let status_hash =
        status_anchor_hash(&complaint.id, complaint.status, complaint.escalation_level)
            .map_err(|err| StoreError::Invalid(err.to_string()))?;

    let max_job: Option<i64> = conn
        .query_row(
            "SELECT MAX(nonce) FROM anchor_jobs WHERE complaint_id = ?1",
            params![complaint.id.as_str()],
            |row| row.get(0),
        )
        .map_err(map_sql)?;
    let max_anchored: Option<i64> = conn
        .query_row(
            "SELECT status_nonce FROM chain_anchors WHERE complaint_id = ?1",
            params![complaint.id.as_str()],
            |row| row.get(0),
        )
        .optional()
        .map_err(map_sql)?;
    let nonce = max_job.unwrap_or(0).max(max_anchored.unwrap_or(0)) + 1;

    conn.execute(
        "INSERT INTO anchor_jobs
             (complaint_id, kind, complaint_hash, sla_hash, status_hash, at_time, nonce,
              in_flight, done, enqueued_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, 0, ?6)",
        params![
            complaint.id.as_str(),
            kind.as_str(),
            complaint_hash.value,
            if kind == AnchorJobKind::Create { Some(sla_hash.value) } else { None },
            status_hash.value,
            at_time.as_unix_millis(),
            nonce,
        ],
    )
    .map_err(map_sql)?;
    Ok(())
}

/// Enqueues an outbound message inside the caller's transaction.
fn outbox_enqueue(
    conn: &Connection,
    channel: &str,
    payload: &serde_json::Value,
    now: Timestamp,
) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO outbound_messages (channel, payload, status, attempts, created_at)
         VALUES (?1, ?2, 'pending', 0, ?3)",
        params![channel, payload.to_string(), now.as_unix_millis()],
    )
    .map_err(map_sql)?;
    Ok(())
}
