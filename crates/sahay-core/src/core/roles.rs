// crates/sahay-core/src/core/roles.rs
// ============================================================================
// Module: SAHAY Roles
// Description: Closed role set and ordered officer tiers for RBAC guards.
// Purpose: Provide stable role labels and the "at least this tier" predicate.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Roles are a closed set. Officer tiers (`district_officer` through
//! `national_admin`) are ordered so dashboard and admin guards can express
//! "this tier or higher"; citizen-facing roles carry no ordering beyond
//! their own identity.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Roles
// ============================================================================

/// Closed role set.
///
/// # Invariants
/// - Variants are stable for serialization and RBAC matching.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Citizen user.
    Citizen,
    /// Caregiver acting for a citizen.
    Caregiver,
    /// Accredited social health activist.
    Asha,
    /// Clinician.
    Clinician,
    /// District officer.
    DistrictOfficer,
    /// State officer.
    StateOfficer,
    /// National administrator.
    NationalAdmin,
}

/// Errors raised parsing role labels.
#[derive(Debug, Error)]
pub enum RoleError {
    /// Label is not in the closed role set.
    #[error("unknown role: {0}")]
    Unknown(String),
}

impl Role {
    /// Returns the stable string label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Citizen => "citizen",
            Self::Caregiver => "caregiver",
            Self::Asha => "asha",
            Self::Clinician => "clinician",
            Self::DistrictOfficer => "district_officer",
            Self::StateOfficer => "state_officer",
            Self::NationalAdmin => "national_admin",
        }
    }

    /// Parses a stable role label.
    ///
    /// # Errors
    ///
    /// Returns [`RoleError::Unknown`] for labels outside the closed set.
    pub fn parse(label: &str) -> Result<Self, RoleError> {
        match label {
            "citizen" => Ok(Self::Citizen),
            "caregiver" => Ok(Self::Caregiver),
            "asha" => Ok(Self::Asha),
            "clinician" => Ok(Self::Clinician),
            "district_officer" => Ok(Self::DistrictOfficer),
            "state_officer" => Ok(Self::StateOfficer),
            "national_admin" => Ok(Self::NationalAdmin),
            other => Err(RoleError::Unknown(other.to_string())),
        }
    }

    /// Returns the officer tier rank, or `None` for non-officer roles.
    #[must_use]
    pub const fn officer_rank(self) -> Option<u8> {
        match self {
            Self::DistrictOfficer => Some(1),
            Self::StateOfficer => Some(2),
            Self::NationalAdmin => Some(3),
            Self::Citizen | Self::Caregiver | Self::Asha | Self::Clinician => None,
        }
    }

    /// Returns true when this role is an officer of at least `minimum` tier.
    #[must_use]
    pub fn is_officer_at_least(self, minimum: Self) -> bool {
        match (self.officer_rank(), minimum.officer_rank()) {
            (Some(rank), Some(min_rank)) => rank >= min_rank,
            _ => false,
        }
    }
}

// ============================================================================
// SECTION: Role Sets
// ============================================================================

/// Set of roles held by a user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleSet(BTreeSet<Role>);

impl RoleSet {
    /// Creates an empty role set.
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeSet::new())
    }

    /// Inserts a role.
    pub fn insert(&mut self, role: Role) {
        self.0.insert(role);
    }

    /// Returns true when the set holds `role`.
    #[must_use]
    pub fn contains(&self, role: Role) -> bool {
        self.0.contains(&role)
    }

    /// Returns true when any held role is an officer of at least `minimum`.
    #[must_use]
    pub fn any_officer_at_least(&self, minimum: Role) -> bool {
        self.0.iter().any(|role| role.is_officer_at_least(minimum))
    }

    /// Returns true when any held role appears in `allowed`.
    #[must_use]
    pub fn any_of(&self, allowed: &[Role]) -> bool {
        allowed.iter().any(|role| self.0.contains(role))
    }

    /// Iterates the held roles in stable order.
    pub fn iter(&self) -> impl Iterator<Item = Role> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<Role> for RoleSet {
    fn from_iter<I: IntoIterator<Item = Role>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
