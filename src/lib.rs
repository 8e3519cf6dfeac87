//! # phivault
//!
//! Envelope encryption for protected health data, with versioned keys and
//! online key rotation.
//!
//! Every encrypted value is a self-describing envelope carrying the key
//! version, KDF salt, IV and GCM tag next to the ciphertext. The registry
//! keeps the current key generation and at most one previous one; rotation
//! migrates every record off the outgoing generation before releasing it,
//! and keeps it whenever any record failed to migrate.
//!
//! ## Public API
//!
//! Callers normally hold a [`PhiVault`] and use its codec for field
//! encryption. Repositories holding encrypted records implement
//! [`repository::RecordRepository`] and are registered with the vault.

pub(crate) mod crypto;

pub mod audit;
pub mod config;
pub mod envelope;
pub mod error;
pub mod keys;
pub mod registry;
pub mod repository;
pub mod rotation;
pub mod status;
pub mod vault;

pub use config::VaultConfig;
pub use envelope::{EnvelopeBlob, EnvelopeCodec, UNDECRYPTABLE_MARKER};
pub use error::{PhiVaultError, RepositoryError, Result};
pub use keys::{KeyGeneration, KeySecret};
pub use registry::{KeyRegistry, KeyStore, MemoryKeyStore};
pub use rotation::{RotationResult, RotationStatus};
pub use status::KeyStatus;
pub use vault::{PhiVault, RotationTrigger};

/// Generate a cryptographically secure bootstrap secret.
///
/// Store the result in a secrets manager before bootstrapping with it, and
/// load it later with [`KeySecret::from_env`] or [`KeySecret::from_base64`].
/// The vault only persists key material through its [`KeyStore`].
pub fn generate_secret() -> Result<KeySecret> {
    KeySecret::generate()
}
