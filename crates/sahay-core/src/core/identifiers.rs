// crates/sahay-core/src/core/identifiers.rs
// ============================================================================
// Module: SAHAY Identifiers
// Description: Canonical opaque identifiers for SAHAY records.
// Purpose: Provide strongly typed, serializable IDs with stable string forms.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! This module defines the canonical string-based identifiers used throughout
//! the SAHAY backend. Identifiers are opaque and serialize as strings.
//! Validation is handled at ingestion boundaries rather than within these
//! simple wrappers; the one exception is [`EventId`], which exposes a UUID
//! shape check because sync idempotency depends on a canonical form.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Identifier Macro
// ============================================================================

/// Declares an opaque string identifier newtype with stable conversions.
macro_rules! string_identifier {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self::new(value)
            }
        }
    };
}

// ============================================================================
// SECTION: Identifier Types
// ============================================================================

string_identifier! {
    /// User identifier. Immutable for the lifetime of the account.
    UserId
}

string_identifier! {
    /// Device identifier asserted by offline clients.
    DeviceId
}

string_identifier! {
    /// Sync event identifier. Globally unique; canonical form is a UUID.
    EventId
}

string_identifier! {
    /// Complaint identifier.
    ComplaintId
}

string_identifier! {
    /// Triage session identifier.
    TriageSessionId
}

string_identifier! {
    /// Teleconsultation request identifier.
    TeleRequestId
}

string_identifier! {
    /// Prescription identifier.
    PrescriptionId
}

// ============================================================================
// SECTION: Event Id Validation
// ============================================================================

impl EventId {
    /// Returns true when the identifier is a canonical lowercase UUID
    /// (8-4-4-4-12 hex groups).
    #[must_use]
    pub fn is_canonical_uuid(&self) -> bool {
        let bytes = self.0.as_bytes();
        if bytes.len() != 36 {
            return false;
        }
        for (index, byte) in bytes.iter().enumerate() {
            let expected_dash = matches!(index, 8 | 13 | 18 | 23);
            if expected_dash {
                if *byte != b'-' {
                    return false;
                }
            } else if !matches!(byte, b'0'..=b'9' | b'a'..=b'f') {
                return false;
            }
        }
        true
    }
}
