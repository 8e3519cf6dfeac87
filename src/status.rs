//! Key age and rotation status.
//!
//! Advisory only: nothing here triggers a rotation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::registry::KeyRegistry;

/// Snapshot of the key lifecycle for operators and schedulers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyStatus {
    pub current_version: u32,
    /// Whole days since the current generation was created.
    pub current_key_age_days: i64,
    /// A generation retained after a partial rotation, if any.
    pub previous_version: Option<u32>,
    /// When the current generation replaced its predecessor. `None` until
    /// the first rotation.
    pub last_rotation_at: Option<DateTime<Utc>>,
    /// True when the current key is older than the rotation interval.
    pub due_for_rotation: bool,
}

impl KeyStatus {
    /// Compute the status of `registry` as of `now`.
    pub fn at(
        registry: &KeyRegistry,
        rotation_interval_days: i64,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let current = registry.current()?;
        let age_days = (now - current.created_at()).num_days();
        let last_rotation_at = (current.version() > 1).then(|| current.created_at());

        Ok(Self {
            current_version: current.version(),
            current_key_age_days: age_days,
            previous_version: registry.previous_version(),
            last_rotation_at,
            due_for_rotation: age_days > rotation_interval_days,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;

    use super::*;
    use crate::error::PhiVaultError;
    use crate::keys::{KeyGeneration, KeySecret};
    use crate::registry::{KeyStore, MemoryKeyStore, RegistryState};

    fn registry_created(days_ago: i64, version: u32) -> KeyRegistry {
        let store = Arc::new(MemoryKeyStore::new());
        let created = Utc::now() - Duration::days(days_ago);
        store
            .save(&RegistryState {
                current: KeyGeneration::with_timestamps(
                    version,
                    KeySecret::from_bytes([1u8; 32]),
                    created,
                    None,
                ),
                previous: None,
            })
            .unwrap();
        KeyRegistry::open(store).unwrap()
    }

    #[test]
    fn test_fresh_key_not_due() {
        let registry = registry_created(0, 1);
        let status = KeyStatus::at(&registry, 30, Utc::now()).unwrap();
        assert_eq!(status.current_version, 1);
        assert_eq!(status.current_key_age_days, 0);
        assert!(!status.due_for_rotation);
        assert!(status.last_rotation_at.is_none());
        assert!(status.previous_version.is_none());
    }

    #[test]
    fn test_due_only_after_interval() {
        let at_limit = registry_created(30, 1);
        assert!(!KeyStatus::at(&at_limit, 30, Utc::now()).unwrap().due_for_rotation);

        let past_limit = registry_created(31, 1);
        assert!(KeyStatus::at(&past_limit, 30, Utc::now()).unwrap().due_for_rotation);
    }

    #[test]
    fn test_rotated_key_reports_last_rotation() {
        let registry = registry_created(3, 4);
        let status = KeyStatus::at(&registry, 30, Utc::now()).unwrap();
        assert_eq!(status.last_rotation_at, Some(registry.current().unwrap().created_at()));
    }

    #[test]
    fn test_unbootstrapped_registry() {
        let registry = KeyRegistry::in_memory();
        assert!(matches!(
            KeyStatus::at(&registry, 30, Utc::now()),
            Err(PhiVaultError::RegistryNotBootstrapped)
        ));
    }
}
