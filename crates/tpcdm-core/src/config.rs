//! Runtime configuration
//!
//! Loaded from TOML by binaries; every field has a default so an empty
//! document is valid.

use serde::Deserialize;

use crate::errors::{Result, TpcError};
use crate::logging_facility::Profile;

/// Environment variable overriding `attempts`
pub const ENV_ATTEMPTS: &str = "TPCDM_ATTEMPTS";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TpcConfig {
    /// How many times the transaction manager runs a unit of work when it
    /// fails with a retryable error. Always at least 1.
    pub attempts: u32,
    /// Logging profile used by `logging_facility::init`
    pub log_profile: Profile,
}

impl Default for TpcConfig {
    fn default() -> Self {
        Self {
            attempts: 1,
            log_profile: Profile::Development,
        }
    }
}

impl TpcConfig {
    /// Parse a TOML document
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for malformed TOML, unknown keys, or
    /// `attempts = 0`.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: TpcConfig = toml::from_str(source).map_err(|e| TpcError::InvalidInput {
            reason: format!("invalid configuration: {}", e),
        })?;
        config.validated()
    }

    /// Apply environment overrides on top of the parsed values
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the override is not a positive integer.
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(raw) = std::env::var(ENV_ATTEMPTS) {
            self.attempts = raw.trim().parse().map_err(|_| TpcError::InvalidInput {
                reason: format!("{} must be a positive integer, got {:?}", ENV_ATTEMPTS, raw),
            })?;
        }
        self.validated()
    }

    fn validated(self) -> Result<Self> {
        if self.attempts == 0 {
            return Err(TpcError::InvalidInput {
                reason: "attempts must be at least 1".to_string(),
            });
        }
        Ok(self)
    }
}
