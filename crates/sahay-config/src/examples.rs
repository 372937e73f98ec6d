// crates/sahay-config/src/examples.rs
// ============================================================================
// Module: SAHAY Config Example Generation
// Description: Deterministic example sahay.toml generation.
// Purpose: Keep docs and deployments aligned with the canonical model.
// Dependencies: crate::config
// ============================================================================

//! ## Overview
//! The example config is generated from the default model, so it always
//! parses and validates. Tests round-trip it to prove the two never drift.

// ============================================================================
// SECTION: Imports
// ============================================================================

use crate::config::ConfigError;
use crate::config::SahayConfig;

// ============================================================================
// SECTION: Example Generation
// ============================================================================

/// Returns a complete example `sahay.toml` rendered from defaults.
///
/// # Errors
///
/// Returns [`ConfigError::Parse`] when serialization fails, which indicates
/// a bug in the config model itself.
pub fn config_toml_example() -> Result<String, ConfigError> {
    let config = SahayConfig::default();
    toml::to_string_pretty(&config).map_err(|err| ConfigError::Parse(err.to_string()))
}
