// crates/sahay-api/src/auth.rs
// ============================================================================
// Module: API Authn/Authz
// Description: Bearer tokens, request metadata, and RBAC guards.
// Purpose: Provide strict, fail-closed auth for every route.
// Dependencies: sahay-core, rand
// ============================================================================

//! ## Overview
//! Bearer tokens are opaque random values; only their SHA-256 digest is
//! stored, so a database leak never leaks credentials. Each request resolves
//! the token to a user and role set, then RBAC guards check the route's
//! required roles. Ownership (BOLA) checks live next to the handlers that
//! read owner-scoped records.

// ============================================================================
// SECTION: Imports
// ============================================================================

use rand::RngCore;
use sahay_core::HashAlgorithm;
use sahay_core::HashDigest;
use sahay_core::Role;
use sahay_core::RoleSet;
use sahay_core::UserId;
use sahay_core::core::hashing::hash_bytes;

use crate::error::ApiError;

// ============================================================================
// SECTION: Tokens
// ============================================================================

/// Raw token byte length before hex encoding.
const TOKEN_BYTES: usize = 32;

/// Generates an opaque bearer token (lowercase hex).
#[must_use]
pub fn generate_token() -> String {
    let mut bytes = [0_u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().fold(String::with_capacity(TOKEN_BYTES * 2), |mut out, byte| {
        out.push_str(&format!("{byte:02x}"));
        out
    })
}

/// Returns the storage digest of a presented token.
#[must_use]
pub fn token_digest(token: &str) -> HashDigest {
    hash_bytes(HashAlgorithm::Sha256, token.as_bytes())
}

/// Extracts the bearer token from an `Authorization` header value.
#[must_use]
pub fn bearer_token(header: &str) -> Option<&str> {
    header.strip_prefix("Bearer ").map(str::trim).filter(|token| !token.is_empty())
}

// ============================================================================
// SECTION: Request Metadata
// ============================================================================

/// Per-request caller metadata used for auditing.
///
/// # Invariants
/// - For anonymous complaints the audit path discards `ip` and `device`
///   regardless of what is captured here.
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    /// Bearer token, when presented.
    pub token: Option<String>,
    /// Peer IP address, when known.
    pub ip: Option<String>,
    /// Client device label from the `x-device` header, when present.
    pub device: Option<String>,
}

// ============================================================================
// SECTION: Authenticated Caller
// ============================================================================

/// Authenticated caller context.
#[derive(Debug, Clone)]
pub struct AuthedUser {
    /// Resolved user.
    pub user_id: UserId,
    /// Roles held by the user.
    pub roles: RoleSet,
    /// Request metadata carried through for auditing.
    pub meta: RequestMeta,
}

impl AuthedUser {
    /// Requires that the caller holds one of `allowed`.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::forbidden`] otherwise.
    pub fn require_any_role(&self, allowed: &[Role]) -> Result<(), ApiError> {
        if self.roles.any_of(allowed) {
            Ok(())
        } else {
            Err(ApiError::forbidden())
        }
    }

    /// Requires that the caller is an officer of at least `minimum` tier.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::forbidden`] otherwise.
    pub fn require_officer_at_least(&self, minimum: Role) -> Result<(), ApiError> {
        if self.roles.any_officer_at_least(minimum) {
            Ok(())
        } else {
            Err(ApiError::forbidden())
        }
    }

    /// Requires that the caller owns the record, or holds one of the
    /// `bypass` roles that RBAC explicitly grants a broader view.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::forbidden`] otherwise.
    pub fn require_owner_or(&self, owner: &UserId, bypass: &[Role]) -> Result<(), ApiError> {
        if self.user_id == *owner || self.roles.any_of(bypass) {
            Ok(())
        } else {
            Err(ApiError::forbidden())
        }
    }
}
