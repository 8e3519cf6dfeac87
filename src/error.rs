//! Error types for phivault.
//!
//! Every variant is a distinct failure mode of the envelope format, the key
//! registry or the rotation run. Messages are intentionally minimal: they
//! signal *what* failed without echoing key bytes or plaintext.

use thiserror::Error;

/// The single error type for codec, registry and orchestrator operations.
#[derive(Debug, Error)]
pub enum PhiVaultError {
    /// The blob (or caller) names a key version the registry does not hold.
    /// Expected once a generation has been retired after full migration.
    #[error("unknown key version: {0}")]
    UnknownKeyVersion(u32),

    /// The blob is structurally invalid. Treated as data corruption; never retried.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(&'static str),

    /// GCM tag verification failed: wrong key or tampered ciphertext.
    #[error("authentication failed")]
    AuthenticationFailed,

    /// Another rotation run holds the rotation lock.
    #[error("rotation already in progress")]
    RotationAlreadyInProgress,

    /// `bootstrap` was called on a registry that already has state.
    #[error("key registry already exists")]
    RegistryAlreadyExists,

    /// An operation needed a current generation before `bootstrap` ran.
    #[error("key registry has not been bootstrapped")]
    RegistryNotBootstrapped,

    /// No bootstrap secret was supplied.
    #[error("no key secret supplied: {0}")]
    MissingSecret(String),

    /// Key material had the wrong length or encoding.
    #[error("invalid key")]
    InvalidKey,

    /// A promoted generation did not follow the current one.
    #[error("invalid generation: expected version {expected}, got {got}")]
    InvalidGeneration { expected: u32, got: u32 },

    /// The version does not fit in the envelope's single version byte.
    #[error("key version {0} does not fit in the envelope version byte")]
    VersionOverflow(u32),

    /// The AEAD seal operation failed.
    #[error("encryption failed")]
    EncryptionFailure,

    /// PBKDF2 could not produce a data key.
    #[error("key derivation failed")]
    KeyDerivationFailure,

    /// The system's random number generator failed to produce bytes.
    #[error("randomness source failed")]
    RandomnessFailure,

    /// Authenticated plaintext was not valid UTF-8.
    #[error("decrypted plaintext is not valid UTF-8")]
    InvalidPlaintext,

    /// The backing key store rejected a load or save.
    #[error("key store error: {0}")]
    KeyStore(String),

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PhiVaultError>;

/// Failure reported by a [`RecordRepository`](crate::repository::RecordRepository)
/// adapter. Captured per record during a rotation sweep, never propagated
/// out of `rotate()`.
#[derive(Debug, Clone, Error)]
pub enum RepositoryError {
    /// The record vanished between lookup and update.
    #[error("record not found: {0}")]
    NotFound(String),

    /// The backing store failed.
    #[error("repository backend error: {0}")]
    Backend(String),
}
