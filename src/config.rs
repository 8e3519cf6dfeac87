//! Vault configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::audit::DEFAULT_AUDIT_CAPACITY;
use crate::error::{PhiVaultError, Result};
use crate::keys::DEFAULT_KDF_ITERATIONS;

/// Tunables for the codec, the rotation sweep and status reporting.
///
/// Missing JSON fields fall back to [`VaultConfig::default`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// A key older than this many days is reported as due for rotation.
    pub rotation_interval_days: i64,
    /// PBKDF2 iterations per envelope. Must match every other reader of the data.
    pub kdf_iterations: u32,
    /// Upper bound for writing one migrated record back to its repository.
    pub record_timeout_ms: u64,
    /// Records migrated concurrently within one repository.
    pub migration_concurrency: usize,
    /// Audit records kept in memory. Zero keeps none; forward sinks still
    /// receive everything.
    pub audit_log_capacity: usize,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            rotation_interval_days: 30,
            kdf_iterations: DEFAULT_KDF_ITERATIONS,
            record_timeout_ms: 5_000,
            migration_concurrency: 4,
            audit_log_capacity: DEFAULT_AUDIT_CAPACITY,
        }
    }
}

impl VaultConfig {
    /// Parse and validate a JSON configuration document.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| PhiVaultError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.rotation_interval_days < 0 {
            return Err(PhiVaultError::InvalidConfig(
                "rotation_interval_days must not be negative".into(),
            ));
        }
        if self.kdf_iterations == 0 {
            return Err(PhiVaultError::InvalidConfig(
                "kdf_iterations must be positive".into(),
            ));
        }
        if self.record_timeout_ms == 0 {
            return Err(PhiVaultError::InvalidConfig(
                "record_timeout_ms must be positive".into(),
            ));
        }
        if self.migration_concurrency == 0 {
            return Err(PhiVaultError::InvalidConfig(
                "migration_concurrency must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn record_timeout(&self) -> Duration {
        Duration::from_millis(self.record_timeout_ms)
    }
}
