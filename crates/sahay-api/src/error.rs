// crates/sahay-api/src/error.rs
// ============================================================================
// Module: API Error Taxonomy
// Description: Stable error kinds surfaced as JSON with HTTP statuses.
// Purpose: Map domain and store errors to the wire contract.
// Dependencies: sahay-core, axum, serde
// ============================================================================

//! ## Overview
//! Errors cross the wire as stable kinds, not language types: clients match
//! on `kind`, never on message text. Messages are short and carry no
//! requester-identifying detail, which also keeps anonymous-complaint
//! responses clean.

// ============================================================================
// SECTION: Imports
// ============================================================================

use axum::Json;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use sahay_core::ConsentError;
use sahay_core::StoreError;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Error Kinds
// ============================================================================

/// Stable error kinds of the wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Missing or invalid credentials.
    Unauthorized,
    /// Authenticated but not allowed (RBAC or ownership).
    Forbidden,
    /// Required consent is not granted.
    ConsentMissing,
    /// Schema, allow-list, or constraint violation.
    Validation,
    /// Write conflicts with existing state.
    Conflict,
    /// Illegal state transition.
    StateInvalid,
    /// Record does not exist.
    NotFound,
    /// Record was erased under right-to-erasure.
    Gone,
    /// Retryable storage or network failure.
    Transient,
    /// Anchor chain unreachable; off-chain flow continues.
    ChainUnavailable,
    /// Audit chain failed verification.
    ChainBroken,
}

impl ErrorKind {
    /// Returns the HTTP status for the kind.
    #[must_use]
    pub const fn status(self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden | Self::ConsentMissing => StatusCode::FORBIDDEN,
            Self::Validation => StatusCode::BAD_REQUEST,
            Self::Conflict => StatusCode::CONFLICT,
            Self::StateInvalid => StatusCode::UNPROCESSABLE_ENTITY,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Gone => StatusCode::GONE,
            Self::Transient | Self::ChainUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::ChainBroken => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the stable string label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::ConsentMissing => "consent_missing",
            Self::Validation => "validation",
            Self::Conflict => "conflict",
            Self::StateInvalid => "state_invalid",
            Self::NotFound => "not_found",
            Self::Gone => "gone",
            Self::Transient => "transient",
            Self::ChainUnavailable => "chain_unavailable",
            Self::ChainBroken => "chain_broken",
        }
    }
}

// ============================================================================
// SECTION: API Error
// ============================================================================

/// API error with a stable kind and a short, PII-free message.
#[derive(Debug, Error)]
#[error("{kind:?}: {message}")]
pub struct ApiError {
    /// Stable kind.
    pub kind: ErrorKind,
    /// Short human-readable message. Never contains requester identity.
    pub message: String,
}

impl ApiError {
    /// Builds an error of `kind` with a message.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Shorthand for `Unauthorized`.
    #[must_use]
    pub fn unauthorized() -> Self {
        Self::new(ErrorKind::Unauthorized, "missing or invalid credentials")
    }

    /// Shorthand for `Forbidden`.
    #[must_use]
    pub fn forbidden() -> Self {
        Self::new(ErrorKind::Forbidden, "not allowed")
    }

    /// Shorthand for `Validation`.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        let kind = match &err {
            StoreError::NotFound(_) => ErrorKind::NotFound,
            StoreError::Gone(_) => ErrorKind::Gone,
            StoreError::Conflict(_) => ErrorKind::Conflict,
            StoreError::StateInvalid(_) => ErrorKind::StateInvalid,
            StoreError::Invalid(_) => ErrorKind::Validation,
            StoreError::Transient(_) => ErrorKind::Transient,
            StoreError::ChainBroken(_) => ErrorKind::ChainBroken,
            StoreError::Io(_) | StoreError::Corrupt(_) | StoreError::VersionMismatch(_) => {
                ErrorKind::Transient
            }
        };
        Self::new(kind, err.to_string())
    }
}

impl From<ConsentError> for ApiError {
    fn from(err: ConsentError) -> Self {
        Self::new(ErrorKind::ConsentMissing, err.to_string())
    }
}

/// Wire form of an error.
#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    /// Error payload.
    error: ErrorDetail<'a>,
}

/// Error payload fields.
#[derive(Debug, Serialize)]
struct ErrorDetail<'a> {
    /// Stable kind label.
    kind: &'static str,
    /// Short message.
    message: &'a str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                kind: self.kind.as_str(),
                message: &self.message,
            },
        };
        (self.kind.status(), Json(body)).into_response()
    }
}
