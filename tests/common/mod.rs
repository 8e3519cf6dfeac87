#![allow(dead_code)]

use std::sync::Arc;

use phivault::{KeyRegistry, KeySecret, PhiVault, VaultConfig};

/// Cheap KDF setting so suites with many envelopes stay fast. Production
/// data always uses the default iteration count.
pub const TEST_KDF_ITERATIONS: u32 = 1_000;

pub fn test_config() -> VaultConfig {
    VaultConfig {
        kdf_iterations: TEST_KDF_ITERATIONS,
        ..VaultConfig::default()
    }
}

/// A vault over an in-memory registry, bootstrapped at version 1.
pub fn bootstrapped_vault() -> PhiVault {
    bootstrapped_vault_with(test_config())
}

pub fn bootstrapped_vault_with(config: VaultConfig) -> PhiVault {
    let vault = PhiVault::new(Arc::new(KeyRegistry::in_memory()), config).unwrap();
    vault.bootstrap(KeySecret::generate().unwrap()).unwrap();
    vault
}
