// crates/sahay-core/src/core/analytics.rs
// ============================================================================
// Module: SAHAY Analytics De-Identification
// Description: Disallowed-key enforcement, bucketing, and aggregation keys.
// Purpose: Guarantee that nothing identifying ever enters the analytics
// pipeline and that published aggregates honor k-anonymity.
// Dependencies: crate::core::{time, triage}, serde, serde_json
// ============================================================================

//! ## Overview
//! Analytics rows are de-identified at emission, not at query: payloads are
//! scanned recursively for a closed disallowed-key list, event types and
//! categories come from closed allow-lists, and continuous attributes (time,
//! age, location) collapse into deterministic buckets. Aggregation keys have
//! a stable pipe-joined string form that is part of the storage contract.
//! Query-time k-anonymity drops any aggregate with fewer than `k` records.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::core::time::MILLIS_PER_MINUTE;
use crate::core::time::Timestamp;
use crate::core::triage::Sex;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Keys that must never appear in an analytics payload, at any depth.
pub const DISALLOWED_KEYS: &[&str] = &[
    "user_id",
    "username",
    "phone",
    "email",
    "complaint_id",
    "full_name",
    "name",
    "address",
    "gps",
    "latitude",
    "longitude",
    "evidence",
    "filename",
    "url",
    "comment",
    "text",
    "description",
];

/// Event time bucket width: 15 minutes.
pub const TIME_BUCKET_MILLIS: i64 = 15 * MILLIS_PER_MINUTE;

/// Default k-anonymity threshold.
pub const DEFAULT_K_THRESHOLD: u64 = 5;

/// Geo cell label used when no pincode was provided.
pub const GEO_CELL_UNKNOWN: &str = "unknown";

// ============================================================================
// SECTION: Event Types
// ============================================================================

/// Closed allow-list of analytics event types.
///
/// # Invariants
/// - Variants are stable for serialization and aggregation keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalyticsEventType {
    /// Triage session completed.
    TriageCompleted,
    /// Triage session ended in emergency.
    TriageEmergency,
    /// Complaint submitted.
    ComplaintSubmitted,
    /// Complaint resolved.
    ComplaintResolved,
    /// Complaint escalated.
    ComplaintEscalated,
    /// Vaccination recorded.
    VaccinationRecorded,
    /// Neuro-screening completed.
    NeuroscreenCompleted,
    /// Daily wellness entry logged.
    DailyWellnessLogged,
    /// Teleconsultation requested.
    TeleRequestCreated,
    /// Teleconsultation completed.
    TeleConsultationCompleted,
}

impl AnalyticsEventType {
    /// Returns the stable string label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TriageCompleted => "triage_completed",
            Self::TriageEmergency => "triage_emergency",
            Self::ComplaintSubmitted => "complaint_submitted",
            Self::ComplaintResolved => "complaint_resolved",
            Self::ComplaintEscalated => "complaint_escalated",
            Self::VaccinationRecorded => "vaccination_recorded",
            Self::NeuroscreenCompleted => "neuroscreen_completed",
            Self::DailyWellnessLogged => "daily_wellness_logged",
            Self::TeleRequestCreated => "tele_request_created",
            Self::TeleConsultationCompleted => "tele_consultation_completed",
        }
    }

    /// Parses a stable event-type label.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "triage_completed" => Some(Self::TriageCompleted),
            "triage_emergency" => Some(Self::TriageEmergency),
            "complaint_submitted" => Some(Self::ComplaintSubmitted),
            "complaint_resolved" => Some(Self::ComplaintResolved),
            "complaint_escalated" => Some(Self::ComplaintEscalated),
            "vaccination_recorded" => Some(Self::VaccinationRecorded),
            "neuroscreen_completed" => Some(Self::NeuroscreenCompleted),
            "daily_wellness_logged" => Some(Self::DailyWellnessLogged),
            "tele_request_created" => Some(Self::TeleRequestCreated),
            "tele_consultation_completed" => Some(Self::TeleConsultationCompleted),
            _ => None,
        }
    }

    /// Returns the category allow-list for this event type.
    #[must_use]
    pub const fn allowed_categories(self) -> &'static [&'static str] {
        match self {
            Self::TriageCompleted | Self::TriageEmergency => &["self_care", "phc", "emergency"],
            Self::ComplaintSubmitted | Self::ComplaintResolved | Self::ComplaintEscalated => {
                &["health_service", "sanitation", "water_supply", "corruption", "other"]
            }
            Self::VaccinationRecorded => &["routine", "campaign", "catch_up"],
            Self::NeuroscreenCompleted => &["child", "adult"],
            Self::DailyWellnessLogged => &["mood", "vitals", "water"],
            Self::TeleRequestCreated | Self::TeleConsultationCompleted => {
                &["general", "follow_up"]
            }
        }
    }
}

// ============================================================================
// SECTION: Buckets
// ============================================================================

/// Age buckets for de-identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgeBucket {
    /// Ages 0 through 5.
    #[serde(rename = "0-5")]
    Age0To5,
    /// Ages 6 through 12.
    #[serde(rename = "6-12")]
    Age6To12,
    /// Ages 13 through 18.
    #[serde(rename = "13-18")]
    Age13To18,
    /// Ages 19 through 35.
    #[serde(rename = "19-35")]
    Age19To35,
    /// Ages 36 through 60.
    #[serde(rename = "36-60")]
    Age36To60,
    /// Ages above 60.
    #[serde(rename = "60+")]
    Over60,
    /// Age not provided.
    #[serde(rename = "unknown")]
    Unknown,
}

impl AgeBucket {
    /// Returns the stable string label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Age0To5 => "0-5",
            Self::Age6To12 => "6-12",
            Self::Age13To18 => "13-18",
            Self::Age19To35 => "19-35",
            Self::Age36To60 => "36-60",
            Self::Over60 => "60+",
            Self::Unknown => "unknown",
        }
    }
}

/// Buckets an age in years.
#[must_use]
pub const fn bucket_age(age: Option<u16>) -> AgeBucket {
    match age {
        None => AgeBucket::Unknown,
        Some(years) => match years {
            0..=5 => AgeBucket::Age0To5,
            6..=12 => AgeBucket::Age6To12,
            13..=18 => AgeBucket::Age13To18,
            19..=35 => AgeBucket::Age19To35,
            36..=60 => AgeBucket::Age36To60,
            _ => AgeBucket::Over60,
        },
    }
}

/// Gender buckets for de-identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenderBucket {
    /// Female.
    Female,
    /// Male.
    Male,
    /// Other.
    Other,
    /// Not provided.
    Unknown,
}

impl GenderBucket {
    /// Returns the stable string label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Female => "female",
            Self::Male => "male",
            Self::Other => "other",
            Self::Unknown => "unknown",
        }
    }

    /// Buckets an optional reported sex.
    #[must_use]
    pub const fn from_sex(sex: Option<Sex>) -> Self {
        match sex {
            Some(Sex::Female) => Self::Female,
            Some(Sex::Male) => Self::Male,
            Some(Sex::Other) => Self::Other,
            None => Self::Unknown,
        }
    }
}

/// Coarsens a pincode to district level: `pincode_<first3>xxx`.
///
/// Pincodes must be exactly six ASCII digits; anything else buckets to
/// [`GEO_CELL_UNKNOWN`]. A production deployment may substitute an H3 cell
/// at resolution 7 behind the same label contract.
#[must_use]
pub fn bucket_pincode(pincode: Option<&str>) -> String {
    match pincode {
        Some(value) if value.len() == 6 && value.bytes().all(|b| b.is_ascii_digit()) => {
            format!("pincode_{}xxx", &value[..3])
        }
        _ => GEO_CELL_UNKNOWN.to_string(),
    }
}

/// Floors an event time to its 15-minute bucket.
#[must_use]
pub const fn bucket_event_time(at: Timestamp) -> Timestamp {
    at.floor_to(TIME_BUCKET_MILLIS)
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised by de-identification.
#[derive(Debug, Error)]
pub enum AnalyticsError {
    /// Payload contains an identifying or otherwise disallowed key.
    #[error("invalid analytics payload: disallowed key {0:?}")]
    DisallowedKey(String),
    /// Event type is not in the allow-list.
    #[error("invalid analytics payload: unknown event type {0:?}")]
    UnknownEventType(String),
    /// Category is not allowed for the event type.
    #[error("invalid analytics payload: category {category:?} not allowed for {event_type}")]
    CategoryNotAllowed {
        /// Offending category.
        category: String,
        /// Event type label.
        event_type: &'static str,
    },
    /// Payload is not a JSON object.
    #[error("invalid analytics payload: payload must be a json object")]
    NotAnObject,
}

// ============================================================================
// SECTION: Events
// ============================================================================

/// Raw analytics emission before de-identification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawAnalyticsEvent {
    /// Event type label.
    pub event_type: String,
    /// Event category label.
    pub category: String,
    /// Event time (uncoarsened).
    pub event_time: Timestamp,
    /// Subject age in years, when known.
    pub age: Option<u16>,
    /// Subject sex, when known.
    pub sex: Option<Sex>,
    /// Subject pincode, when known.
    pub pincode: Option<String>,
    /// Free-form payload; must not contain disallowed keys.
    pub payload: Value,
}

/// De-identified analytics event ready for aggregation.
///
/// # Invariants
/// - `payload` shares no key (at any depth) with [`DISALLOWED_KEYS`].
/// - `time_bucket` is floored to [`TIME_BUCKET_MILLIS`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeidentifiedEvent {
    /// Event type.
    pub event_type: AnalyticsEventType,
    /// Category from the per-type allow-list.
    pub category: String,
    /// Time bucket (15-minute floor).
    pub time_bucket: Timestamp,
    /// Coarsened geo cell.
    pub geo_cell: String,
    /// Age bucket.
    pub age_bucket: AgeBucket,
    /// Gender bucket.
    pub gender: GenderBucket,
    /// Validated payload.
    pub payload: Value,
}

impl DeidentifiedEvent {
    /// Returns the aggregation key for this event.
    #[must_use]
    pub fn aggregate_key(&self) -> AggregateKey {
        AggregateKey {
            event_type: self.event_type,
            category: self.category.clone(),
            time_bucket: self.time_bucket,
            geo_cell: self.geo_cell.clone(),
            age_bucket: self.age_bucket,
            gender: self.gender,
        }
    }
}

/// Scans a JSON value recursively for disallowed keys.
///
/// # Errors
///
/// Returns [`AnalyticsError::DisallowedKey`] at the first match.
pub fn validate_payload_keys(value: &Value) -> Result<(), AnalyticsError> {
    match value {
        Value::Object(map) => {
            for (key, nested) in map {
                if DISALLOWED_KEYS.contains(&key.as_str()) {
                    return Err(AnalyticsError::DisallowedKey(key.clone()));
                }
                validate_payload_keys(nested)?;
            }
            Ok(())
        }
        Value::Array(items) => {
            for item in items {
                validate_payload_keys(item)?;
            }
            Ok(())
        }
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => Ok(()),
    }
}

/// De-identifies a raw analytics emission.
///
/// # Errors
///
/// Returns [`AnalyticsError`] when the event type or category is outside
/// its allow-list, the payload is not an object, or a disallowed key is
/// present at any depth.
pub fn deidentify(raw: &RawAnalyticsEvent) -> Result<DeidentifiedEvent, AnalyticsError> {
    let event_type = AnalyticsEventType::parse(&raw.event_type)
        .ok_or_else(|| AnalyticsError::UnknownEventType(raw.event_type.clone()))?;
    if !event_type.allowed_categories().contains(&raw.category.as_str()) {
        return Err(AnalyticsError::CategoryNotAllowed {
            category: raw.category.clone(),
            event_type: event_type.as_str(),
        });
    }
    if !raw.payload.is_object() {
        return Err(AnalyticsError::NotAnObject);
    }
    validate_payload_keys(&raw.payload)?;
    Ok(DeidentifiedEvent {
        event_type,
        category: raw.category.clone(),
        time_bucket: bucket_event_time(raw.event_time),
        geo_cell: bucket_pincode(raw.pincode.as_deref()),
        age_bucket: bucket_age(raw.age),
        gender: GenderBucket::from_sex(raw.sex),
        payload: raw.payload.clone(),
    })
}

// ============================================================================
// SECTION: Aggregation
// ============================================================================

/// Aggregation key: `event_type|category|time_bucket|geo_cell|age_bucket|gender`.
///
/// # Invariants
/// - The pipe-joined string form is stable and part of the storage contract.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AggregateKey {
    /// Event type.
    pub event_type: AnalyticsEventType,
    /// Category label.
    pub category: String,
    /// Time bucket.
    pub time_bucket: Timestamp,
    /// Geo cell label.
    pub geo_cell: String,
    /// Age bucket.
    pub age_bucket: AgeBucket,
    /// Gender bucket.
    pub gender: GenderBucket,
}

impl fmt::Display for AggregateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}|{}|{}|{}|{}",
            self.event_type.as_str(),
            self.category,
            self.time_bucket.as_unix_millis(),
            self.geo_cell,
            self.age_bucket.as_str(),
            self.gender.as_str()
        )
    }
}

/// One aggregated, countable row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatedRow {
    /// Stable aggregation key string.
    pub key: String,
    /// Event type label (first key segment).
    pub event_type: String,
    /// Category label (second key segment).
    pub category: String,
    /// Time bucket (third key segment).
    pub time_bucket: Timestamp,
    /// Geo cell (fourth key segment).
    pub geo_cell: String,
    /// Age bucket label (fifth key segment).
    pub age_bucket: String,
    /// Gender label (sixth key segment).
    pub gender: String,
    /// Distinct record count.
    pub count: u64,
    /// Last update time.
    pub updated_at: Timestamp,
}

/// Applies query-time k-anonymity: keeps rows with `count >= k`.
#[must_use]
pub fn apply_k_filter(rows: Vec<AggregatedRow>, k: u64) -> Vec<AggregatedRow> {
    rows.into_iter().filter(|row| row.count >= k).collect()
}
