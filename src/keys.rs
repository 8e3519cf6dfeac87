//! Key material and per-operation key derivation.
//!
//! This module owns two responsibilities:
//! 1. Holding generation secrets and derived data keys in types that are
//!    opaque, non-cloneable and zeroised on drop.
//! 2. Deriving a per-operation data key from a generation secret and a
//!    random salt with PBKDF2-HMAC-SHA512.
//!
//! ## Derivation structure
//!
//! ```text
//! PBKDF2-HMAC-SHA512(
//!     password   = generation secret (32 bytes),
//!     salt       = envelope salt (64 random bytes),
//!     iterations = 100_000,
//!     dkLen      = 32
//! )
//! ```
//!
//! No ciphertext is ever produced under the raw generation secret. A leaked
//! data key exposes a single envelope and nothing about the secret.

use std::fmt;
use std::num::NonZeroU32;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Utc};
use ring::pbkdf2;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::{self, KEY_LEN};
use crate::error::{PhiVaultError, Result};

/// PBKDF2 iteration count used unless configured otherwise. Envelopes do not
/// record it, so every reader must use the same count as the writer.
pub const DEFAULT_KDF_ITERATIONS: u32 = 100_000;

// ---------------------------------------------------------------------------
// Generation secret
// ---------------------------------------------------------------------------

/// The 32-byte secret of one key generation.
///
/// - Not `Clone`. Generations share a secret through `Arc`, never by copy.
/// - Zeroised on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct KeySecret {
    bytes: [u8; KEY_LEN],
}

impl KeySecret {
    /// Construct a secret from raw bytes.
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self { bytes }
    }

    /// Construct a secret from a slice, which must be exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; KEY_LEN] = bytes.try_into().map_err(|_| PhiVaultError::InvalidKey)?;
        Ok(Self { bytes })
    }

    /// Decode a standard-base64 secret, as typically held in a secret manager.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let mut decoded = BASE64
            .decode(encoded.trim())
            .map_err(|_| PhiVaultError::InvalidKey)?;
        let secret = Self::from_slice(&decoded);
        decoded.zeroize();
        secret
    }

    /// Read a base64 secret from the environment variable `var`.
    ///
    /// A missing or empty variable is `MissingSecret`. There is no fallback
    /// to a generated key: an ephemeral key would be lost on restart along
    /// with every record encrypted under it.
    pub fn from_env(var: &str) -> Result<Self> {
        match std::env::var(var) {
            Ok(value) if !value.trim().is_empty() => Self::from_base64(&value),
            _ => Err(PhiVaultError::MissingSecret(var.to_string())),
        }
    }

    /// Generate a fresh random secret.
    pub fn generate() -> Result<Self> {
        Ok(Self::from_bytes(crypto::generate_random_key()?))
    }

    pub(crate) fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }
}

impl fmt::Debug for KeySecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeySecret([REDACTED])")
    }
}

// ---------------------------------------------------------------------------
// Key generation
// ---------------------------------------------------------------------------

/// One immutable key generation: a version number, its secret and metadata.
///
/// Cloning a generation clones the `Arc` around the secret, not the bytes.
#[derive(Clone)]
pub struct KeyGeneration {
    version: u32,
    secret: Arc<KeySecret>,
    created_at: DateTime<Utc>,
    rotated_at: Option<DateTime<Utc>>,
}

impl KeyGeneration {
    /// Create a generation stamped with the current time.
    pub fn new(version: u32, secret: KeySecret) -> Self {
        Self::with_timestamps(version, secret, Utc::now(), None)
    }

    /// Create a generation with explicit timestamps, e.g. when restoring
    /// from a key store.
    pub fn with_timestamps(
        version: u32,
        secret: KeySecret,
        created_at: DateTime<Utc>,
        rotated_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            version,
            secret: Arc::new(secret),
            created_at,
            rotated_at,
        }
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// When this generation stopped being current, if it has.
    pub fn rotated_at(&self) -> Option<DateTime<Utc>> {
        self.rotated_at
    }

    /// Borrow the secret, e.g. for a `KeyStore` implementation to persist it.
    pub fn secret(&self) -> &KeySecret {
        &self.secret
    }

    /// The same generation marked as superseded at `at`.
    pub(crate) fn demoted(&self, at: DateTime<Utc>) -> Self {
        Self {
            rotated_at: Some(at),
            ..self.clone()
        }
    }

    /// Non-secret view of this generation.
    pub fn metadata(&self) -> KeyMetadata {
        KeyMetadata {
            version: self.version,
            created_at: self.created_at,
            rotated_at: self.rotated_at,
        }
    }
}

impl fmt::Debug for KeyGeneration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyGeneration")
            .field("version", &self.version)
            .field("created_at", &self.created_at)
            .field("rotated_at", &self.rotated_at)
            .finish_non_exhaustive()
    }
}

/// Serializable, secret-free description of a generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyMetadata {
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub rotated_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Derived key
// ---------------------------------------------------------------------------

/// A data key derived for exactly one envelope.
///
/// - Not `Clone`.
/// - Zeroised on drop.
/// - Raw bytes are only reachable inside the crate.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey {
    bytes: [u8; KEY_LEN],
}

impl DerivedKey {
    pub(crate) fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }
}

/// Derive the data key for one envelope from a generation secret and salt.
pub(crate) fn derive_data_key(
    secret: &KeySecret,
    salt: &[u8],
    iterations: u32,
) -> Result<DerivedKey> {
    let iterations = NonZeroU32::new(iterations).ok_or(PhiVaultError::KeyDerivationFailure)?;

    let mut derived = [0u8; KEY_LEN];
    pbkdf2::derive(
        pbkdf2::PBKDF2_HMAC_SHA512,
        iterations,
        salt,
        secret.as_bytes(),
        &mut derived,
    );

    Ok(DerivedKey { bytes: derived })
}
