// crates/sahay-config/src/config.rs
// ============================================================================
// Module: SAHAY Config Model
// Description: Typed configuration with strict, fail-closed validation.
// Purpose: Define every tunable of the SAHAY backend with safe defaults.
// Dependencies: sahay-core, serde, toml
// ============================================================================

//! ## Overview
//! The configuration model mirrors the deployment surface: server limits,
//! database location, consent-document version, SLA durations, anchor retry
//! policy, analytics thresholds, and scheduler cadence. `validate()` fails
//! closed with actionable messages; a config that validates is a config the
//! server can run with.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;

use sahay_core::ComplaintCategory;
use sahay_core::SlaTable;
use sahay_core::core::time::MILLIS_PER_HOUR;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Reading the config file failed.
    #[error("failed to read config file {path}: {message}")]
    Io {
        /// Path that failed to read.
        path: String,
        /// Underlying error message.
        message: String,
    },
    /// TOML parsing failed.
    #[error("failed to parse config: {0}")]
    Parse(String),
    /// A field failed validation.
    #[error("invalid config: {field}: {message}")]
    Invalid {
        /// Dotted field path.
        field: &'static str,
        /// What must change.
        message: String,
    },
}

/// Shorthand for an invalid-field error.
fn invalid(field: &'static str, message: String) -> ConfigError {
    ConfigError::Invalid {
        field,
        message,
    }
}

// ============================================================================
// SECTION: Server Config
// ============================================================================

/// Fixed-window rate limit settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Requests allowed per window per peer.
    pub requests_per_window: u32,
    /// Window length in seconds.
    pub window_seconds: u64,
}

/// HTTP server settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address, `host:port`.
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Maximum accepted request body size in bytes.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    /// Maximum concurrently processed requests.
    #[serde(default = "default_max_inflight")]
    pub max_inflight: usize,
    /// Maximum items per sync batch.
    #[serde(default = "default_max_sync_batch_items")]
    pub max_sync_batch_items: usize,
    /// Optional fixed-window rate limit.
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
}

/// Returns the default bind address.
fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

/// Returns the default maximum body size (1 MiB).
const fn default_max_body_bytes() -> usize {
    1024 * 1024
}

/// Returns the default inflight cap.
const fn default_max_inflight() -> usize {
    64
}

/// Returns the default sync batch bound.
const fn default_max_sync_batch_items() -> usize {
    sahay_core::core::sync::MAX_SYNC_BATCH_ITEMS
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_body_bytes: default_max_body_bytes(),
            max_inflight: default_max_inflight(),
            max_sync_batch_items: default_max_sync_batch_items(),
            rate_limit: None,
        }
    }
}

// ============================================================================
// SECTION: Database Config
// ============================================================================

/// SQLite database settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the database file.
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

/// Returns the default database path.
fn default_database_path() -> PathBuf {
    PathBuf::from("sahay.db")
}

/// Returns the default busy timeout.
const fn default_busy_timeout_ms() -> u64 {
    5_000
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

// ============================================================================
// SECTION: Consent Config
// ============================================================================

/// Consent-document settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentConfig {
    /// Current consent-document version. A bump resets all grants.
    #[serde(default = "default_document_version")]
    pub document_version: u32,
}

/// Returns the default consent-document version.
const fn default_document_version() -> u32 {
    1
}

impl Default for ConsentConfig {
    fn default() -> Self {
        Self {
            document_version: default_document_version(),
        }
    }
}

// ============================================================================
// SECTION: SLA Config
// ============================================================================

/// Per-category SLA durations in hours.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlaHours {
    /// Health-service complaints.
    #[serde(default = "default_sla_health_service")]
    pub health_service: u32,
    /// Sanitation complaints.
    #[serde(default = "default_sla_sanitation")]
    pub sanitation: u32,
    /// Water-supply complaints.
    #[serde(default = "default_sla_water_supply")]
    pub water_supply: u32,
    /// Corruption complaints.
    #[serde(default = "default_sla_corruption")]
    pub corruption: u32,
    /// Everything else.
    #[serde(default = "default_sla_other")]
    pub other: u32,
}

/// Default SLA for health-service complaints.
const fn default_sla_health_service() -> u32 {
    72
}

/// Default SLA for sanitation complaints.
const fn default_sla_sanitation() -> u32 {
    120
}

/// Default SLA for water-supply complaints.
const fn default_sla_water_supply() -> u32 {
    96
}

/// Default SLA for corruption complaints.
const fn default_sla_corruption() -> u32 {
    168
}

/// Default SLA for other complaints.
const fn default_sla_other() -> u32 {
    120
}

impl Default for SlaHours {
    fn default() -> Self {
        Self {
            health_service: default_sla_health_service(),
            sanitation: default_sla_sanitation(),
            water_supply: default_sla_water_supply(),
            corruption: default_sla_corruption(),
            other: default_sla_other(),
        }
    }
}

/// SLA settings: base durations plus per-level percentages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlaConfig {
    /// Base hours per category.
    #[serde(default)]
    pub hours: SlaHours,
    /// Percent of the base applied per escalation level
    /// (district, state, national). Higher levels run tighter ladders.
    #[serde(default = "default_level_percent")]
    pub level_percent: [u32; 3],
}

/// Returns the default per-level percentages.
const fn default_level_percent() -> [u32; 3] {
    [100, 50, 25]
}

impl Default for SlaConfig {
    fn default() -> Self {
        Self {
            hours: SlaHours::default(),
            level_percent: default_level_percent(),
        }
    }
}

impl SlaConfig {
    /// Builds the core SLA table from this configuration.
    #[must_use]
    pub fn table(&self) -> SlaTable {
        let to_millis = |hours: u32| i64::from(hours) * MILLIS_PER_HOUR;
        SlaTable::new(
            [
                (ComplaintCategory::HealthService, to_millis(self.hours.health_service)),
                (ComplaintCategory::Sanitation, to_millis(self.hours.sanitation)),
                (ComplaintCategory::WaterSupply, to_millis(self.hours.water_supply)),
                (ComplaintCategory::Corruption, to_millis(self.hours.corruption)),
                (ComplaintCategory::Other, to_millis(self.hours.other)),
            ],
            self.level_percent,
        )
    }
}

// ============================================================================
// SECTION: Anchor Config
// ============================================================================

/// Anchor client settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorConfig {
    /// Whether anchoring is enabled. Disabled deployments keep queuing jobs.
    #[serde(default = "default_anchor_enabled")]
    pub enabled: bool,
    /// Base backoff delay in milliseconds.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Backoff cap in milliseconds.
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,
    /// Maximum submission attempts before a job returns to the queue.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Maximum accepted age of `created_at`, in days.
    #[serde(default = "default_created_at_max_age_days")]
    pub created_at_max_age_days: u32,
    /// Maximum accepted forward skew of `created_at`, in hours.
    #[serde(default = "default_created_at_max_skew_hours")]
    pub created_at_max_skew_hours: u32,
}

/// Returns the default anchor enablement.
const fn default_anchor_enabled() -> bool {
    true
}

/// Returns the default backoff base.
const fn default_backoff_base_ms() -> u64 {
    1_000
}

/// Returns the default backoff cap.
const fn default_backoff_cap_ms() -> u64 {
    60_000
}

/// Returns the default attempt bound.
const fn default_max_attempts() -> u32 {
    6
}

/// Returns the default `created_at` age window.
const fn default_created_at_max_age_days() -> u32 {
    30
}

/// Returns the default `created_at` forward skew window.
const fn default_created_at_max_skew_hours() -> u32 {
    1
}

impl Default for AnchorConfig {
    fn default() -> Self {
        Self {
            enabled: default_anchor_enabled(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
            max_attempts: default_max_attempts(),
            created_at_max_age_days: default_created_at_max_age_days(),
            created_at_max_skew_hours: default_created_at_max_skew_hours(),
        }
    }
}

// ============================================================================
// SECTION: Analytics Config
// ============================================================================

/// Analytics pipeline settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    /// k-anonymity threshold applied at query time.
    #[serde(default = "default_k_threshold")]
    pub k_threshold: u64,
    /// Buffer entry count that triggers a flush.
    #[serde(default = "default_flush_threshold")]
    pub flush_threshold: usize,
    /// Flush timer interval in seconds.
    #[serde(default = "default_flush_interval_seconds")]
    pub flush_interval_seconds: u64,
}

/// Returns the default k threshold.
const fn default_k_threshold() -> u64 {
    sahay_core::core::analytics::DEFAULT_K_THRESHOLD
}

/// Returns the default flush threshold.
const fn default_flush_threshold() -> usize {
    100
}

/// Returns the default flush interval.
const fn default_flush_interval_seconds() -> u64 {
    60
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            k_threshold: default_k_threshold(),
            flush_threshold: default_flush_threshold(),
            flush_interval_seconds: default_flush_interval_seconds(),
        }
    }
}

// ============================================================================
// SECTION: Scheduler Config
// ============================================================================

/// Background scheduler cadence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// SLA escalation tick interval in seconds.
    #[serde(default = "default_sla_tick_seconds")]
    pub sla_tick_seconds: u64,
    /// Anchor retry drain interval in seconds.
    #[serde(default = "default_anchor_retry_seconds")]
    pub anchor_retry_seconds: u64,
    /// Materialized view refresh interval in seconds.
    #[serde(default = "default_view_refresh_seconds")]
    pub view_refresh_seconds: u64,
    /// Advisory lock time-to-live in seconds.
    #[serde(default = "default_advisory_lock_ttl_seconds")]
    pub advisory_lock_ttl_seconds: u64,
}

/// Returns the default SLA tick interval.
const fn default_sla_tick_seconds() -> u64 {
    60
}

/// Returns the default anchor retry interval.
const fn default_anchor_retry_seconds() -> u64 {
    30
}

/// Returns the default view refresh interval (10 minutes).
const fn default_view_refresh_seconds() -> u64 {
    600
}

/// Returns the default advisory lock TTL.
const fn default_advisory_lock_ttl_seconds() -> u64 {
    120
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sla_tick_seconds: default_sla_tick_seconds(),
            anchor_retry_seconds: default_anchor_retry_seconds(),
            view_refresh_seconds: default_view_refresh_seconds(),
            advisory_lock_ttl_seconds: default_advisory_lock_ttl_seconds(),
        }
    }
}

// ============================================================================
// SECTION: Root Config
// ============================================================================

/// Root SAHAY configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct SahayConfig {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,
    /// Database settings.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Consent-document settings.
    #[serde(default)]
    pub consent: ConsentConfig,
    /// SLA settings.
    #[serde(default)]
    pub sla: SlaConfig,
    /// Anchor client settings.
    #[serde(default)]
    pub anchor: AnchorConfig,
    /// Analytics settings.
    #[serde(default)]
    pub analytics: AnalyticsConfig,
    /// Scheduler settings.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

impl SahayConfig {
    /// Parses configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] on malformed TOML.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        toml::from_str(input).map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Loads and parses configuration from a file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] when the file cannot be read and
    /// [`ConfigError::Parse`] on malformed TOML.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let input = std::fs::read_to_string(path).map_err(|err| ConfigError::Io {
            path: path.display().to_string(),
            message: err.to_string(),
        })?;
        Self::from_toml_str(&input)
    }

    /// Validates the configuration, fail-closed.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.bind.parse::<std::net::SocketAddr>().is_err() {
            return Err(invalid(
                "server.bind",
                format!("not a valid socket address: {}", self.server.bind),
            ));
        }
        if self.server.max_body_bytes == 0 {
            return Err(invalid("server.max_body_bytes", "must be positive".to_string()));
        }
        if self.server.max_inflight == 0 {
            return Err(invalid("server.max_inflight", "must be positive".to_string()));
        }
        if self.server.max_sync_batch_items == 0
            || self.server.max_sync_batch_items > sahay_core::core::sync::MAX_SYNC_BATCH_ITEMS
        {
            return Err(invalid(
                "server.max_sync_batch_items",
                format!("must be 1..={}", sahay_core::core::sync::MAX_SYNC_BATCH_ITEMS),
            ));
        }
        if let Some(rate_limit) = &self.server.rate_limit {
            if rate_limit.requests_per_window == 0 {
                return Err(invalid(
                    "server.rate_limit.requests_per_window",
                    "must be positive".to_string(),
                ));
            }
            if rate_limit.window_seconds == 0 {
                return Err(invalid(
                    "server.rate_limit.window_seconds",
                    "must be positive".to_string(),
                ));
            }
        }
        if self.database.busy_timeout_ms == 0 {
            return Err(invalid("database.busy_timeout_ms", "must be positive".to_string()));
        }
        if self.consent.document_version == 0 {
            return Err(invalid("consent.document_version", "must be at least 1".to_string()));
        }
        let hours = [
            ("sla.hours.health_service", self.sla.hours.health_service),
            ("sla.hours.sanitation", self.sla.hours.sanitation),
            ("sla.hours.water_supply", self.sla.hours.water_supply),
            ("sla.hours.corruption", self.sla.hours.corruption),
            ("sla.hours.other", self.sla.hours.other),
        ];
        for (field, value) in hours {
            if value == 0 {
                return Err(must_be_positive(field));
            }
        }
        if self.sla.level_percent.iter().any(|percent| *percent == 0) {
            return Err(invalid("sla.level_percent", "percentages must be positive".to_string()));
        }
        if self.anchor.backoff_base_ms == 0 {
            return Err(invalid("anchor.backoff_base_ms", "must be positive".to_string()));
        }
        if self.anchor.backoff_cap_ms < self.anchor.backoff_base_ms {
            return Err(invalid(
                "anchor.backoff_cap_ms",
                "must be at least anchor.backoff_base_ms".to_string(),
            ));
        }
        if self.anchor.max_attempts == 0 || self.anchor.max_attempts > 16 {
            return Err(invalid("anchor.max_attempts", "must be 1..=16".to_string()));
        }
        if self.analytics.k_threshold < 2 {
            return Err(invalid("analytics.k_threshold", "must be at least 2".to_string()));
        }
        if self.analytics.flush_threshold == 0 {
            return Err(invalid("analytics.flush_threshold", "must be positive".to_string()));
        }
        if self.analytics.flush_interval_seconds == 0 {
            return Err(invalid(
                "analytics.flush_interval_seconds",
                "must be positive".to_string(),
            ));
        }
        let intervals = [
            ("scheduler.sla_tick_seconds", self.scheduler.sla_tick_seconds),
            ("scheduler.anchor_retry_seconds", self.scheduler.anchor_retry_seconds),
            ("scheduler.view_refresh_seconds", self.scheduler.view_refresh_seconds),
            ("scheduler.advisory_lock_ttl_seconds", self.scheduler.advisory_lock_ttl_seconds),
        ];
        for (field, value) in intervals {
            if value == 0 {
                return Err(must_be_positive(field));
            }
        }
        Ok(())
    }
}

/// Builds a "must be positive" validation error for `field`.
fn must_be_positive(field: &'static str) -> ConfigError {
    invalid(field, "must be positive".to_string())
}
