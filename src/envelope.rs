//! Self-describing envelope format and codec.
//!
//! # Layout of envelope bytes
//! ```text
//! [ version (1) ][ salt (64) ][ iv (16) ][ auth tag (16) ][ ciphertext (n) ]
//! ```
//!
//! The bytes travel as a single standard-base64 string. The layout is fixed:
//! already-persisted data written by other implementations must keep
//! decoding. Each encryption draws a fresh salt and IV, so the same plaintext
//! never produces the same blob twice.

use std::fmt;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use tracing::warn;
use zeroize::Zeroize;

use crate::audit::{AuditEvent, AuditRecord, SharedAuditLog};
use crate::crypto::{self, IV_LEN, TAG_LEN};
use crate::error::{PhiVaultError, Result};
use crate::keys::{self, DEFAULT_KDF_ITERATIONS};
use crate::registry::KeyRegistry;

/// Size of the per-envelope KDF salt in bytes.
pub const SALT_LEN: usize = 64;

const SALT_OFFSET: usize = 1;
const IV_OFFSET: usize = SALT_OFFSET + SALT_LEN;
const TAG_OFFSET: usize = IV_OFFSET + IV_LEN;
const CIPHERTEXT_OFFSET: usize = TAG_OFFSET + TAG_LEN;

/// Smallest well-formed envelope: a header with an empty ciphertext.
pub const HEADER_LEN: usize = CIPHERTEXT_OFFSET;

/// Placeholder list and export callers show for a field that cannot be decrypted.
pub const UNDECRYPTABLE_MARKER: &str = "[undecryptable]";

// ---------------------------------------------------------------------------
// Blob
// ---------------------------------------------------------------------------

/// An encrypted value as stored: opaque, immutable, base64 text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnvelopeBlob(String);

impl EnvelopeBlob {
    /// Wrap an encoded blob read back from storage. Not validated until use.
    pub fn from_encoded(encoded: impl Into<String>) -> Self {
        Self(encoded.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// Read the key version from the first byte without decrypting.
    pub fn key_version(&self) -> Result<u32> {
        let bytes = self.to_bytes()?;
        Ok(EnvelopeParts::parse(&bytes)?.version as u32)
    }

    fn from_bytes(bytes: &[u8]) -> Self {
        Self(BASE64.encode(bytes))
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        BASE64
            .decode(self.0.as_bytes())
            .map_err(|_| PhiVaultError::MalformedEnvelope("not valid base64"))
    }
}

impl fmt::Display for EnvelopeBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Borrowed view of a decoded envelope, split at the fixed offsets.
struct EnvelopeParts<'a> {
    version: u8,
    salt: &'a [u8],
    iv: [u8; IV_LEN],
    tag: [u8; TAG_LEN],
    ciphertext: &'a [u8],
}

impl<'a> EnvelopeParts<'a> {
    fn parse(bytes: &'a [u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(PhiVaultError::MalformedEnvelope("shorter than envelope header"));
        }

        let iv = bytes[IV_OFFSET..TAG_OFFSET]
            .try_into()
            .map_err(|_| PhiVaultError::MalformedEnvelope("invalid iv"))?;
        let tag = bytes[TAG_OFFSET..CIPHERTEXT_OFFSET]
            .try_into()
            .map_err(|_| PhiVaultError::MalformedEnvelope("invalid auth tag"))?;

        Ok(Self {
            version: bytes[0],
            salt: &bytes[SALT_OFFSET..IV_OFFSET],
            iv,
            tag,
            ciphertext: &bytes[CIPHERTEXT_OFFSET..],
        })
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.ciphertext.len());
        out.push(self.version);
        out.extend_from_slice(self.salt);
        out.extend_from_slice(&self.iv);
        out.extend_from_slice(&self.tag);
        out.extend_from_slice(self.ciphertext);
        out
    }
}

// ---------------------------------------------------------------------------
// Codec
// ---------------------------------------------------------------------------

/// Encrypts and decrypts envelopes against a shared [`KeyRegistry`].
///
/// Stateless apart from the registry snapshot it reads, so a codec can be
/// cloned freely and used from any number of threads.
#[derive(Clone)]
pub struct EnvelopeCodec {
    registry: Arc<KeyRegistry>,
    audit: SharedAuditLog,
    kdf_iterations: u32,
}

impl fmt::Debug for EnvelopeCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvelopeCodec")
            .field("kdf_iterations", &self.kdf_iterations)
            .finish_non_exhaustive()
    }
}

impl EnvelopeCodec {
    pub fn new(registry: Arc<KeyRegistry>, audit: SharedAuditLog) -> Self {
        Self {
            registry,
            audit,
            kdf_iterations: DEFAULT_KDF_ITERATIONS,
        }
    }

    /// Override the PBKDF2 iteration count. Envelopes are only readable by
    /// codecs using the same count.
    pub fn with_kdf_iterations(mut self, iterations: u32) -> Self {
        self.kdf_iterations = iterations;
        self
    }

    pub fn registry(&self) -> &Arc<KeyRegistry> {
        &self.registry
    }

    /// Encrypt under the current generation.
    ///
    /// Empty plaintext yields `Ok(None)`: optional fields stay null rather
    /// than becoming an envelope around nothing.
    pub fn encrypt(&self, plaintext: &str) -> Result<Option<EnvelopeBlob>> {
        if plaintext.is_empty() {
            return Ok(None);
        }
        let version = self.registry.current_version()?;
        self.encrypt_with_version(plaintext, version)
    }

    /// Encrypt under a specific generation, which must still be registered.
    pub fn encrypt_with_version(
        &self,
        plaintext: &str,
        version: u32,
    ) -> Result<Option<EnvelopeBlob>> {
        if plaintext.is_empty() {
            return Ok(None);
        }
        self.seal_bytes(plaintext.as_bytes(), version).map(Some)
    }

    /// Seal raw bytes under `version` with no empty-input shortcut.
    pub(crate) fn seal_bytes(&self, plaintext: &[u8], version: u32) -> Result<EnvelopeBlob> {
        let generation = self.registry.resolve(version)?;
        let version_byte =
            u8::try_from(version).map_err(|_| PhiVaultError::VersionOverflow(version))?;

        let mut salt = [0u8; SALT_LEN];
        crypto::fill_random(&mut salt)?;
        let mut iv = [0u8; IV_LEN];
        crypto::fill_random(&mut iv)?;

        let key = keys::derive_data_key(generation.secret(), &salt, self.kdf_iterations)?;
        let (ciphertext, tag) = crypto::seal(key.as_bytes(), &iv, plaintext)?;

        let parts = EnvelopeParts {
            version: version_byte,
            salt: &salt,
            iv,
            tag,
            ciphertext: &ciphertext,
        };
        Ok(EnvelopeBlob::from_bytes(&parts.to_bytes()))
    }

    /// Encrypt an optional field. `None` and empty strings stay `None`.
    pub fn encrypt_optional(&self, plaintext: Option<&str>) -> Result<Option<EnvelopeBlob>> {
        match plaintext {
            Some(text) => self.encrypt(text),
            None => Ok(None),
        }
    }

    /// Decrypt an envelope under whichever generation its version byte names.
    ///
    /// `AuthenticationFailed` and `UnknownKeyVersion` are also reported to
    /// the audit log. No plaintext is ever returned for a blob that fails
    /// verification.
    pub fn decrypt(&self, blob: &EnvelopeBlob) -> Result<String> {
        let bytes = blob.to_bytes()?;
        let parts = EnvelopeParts::parse(&bytes)?;
        let version = parts.version as u32;

        let result = self.open_parts(&parts);
        match &result {
            Err(PhiVaultError::AuthenticationFailed) => {
                warn!(key_version = version, "envelope failed authentication");
                self.report(AuditEvent::AuthenticationFailed {
                    key_version: version,
                });
            }
            Err(PhiVaultError::UnknownKeyVersion(_)) => {
                warn!(key_version = version, "envelope names an unknown key version");
                self.report(AuditEvent::UnknownKeyVersion {
                    key_version: version,
                });
            }
            _ => {}
        }
        result
    }

    /// Decrypt an optional field.
    pub fn decrypt_optional(&self, blob: Option<&EnvelopeBlob>) -> Result<Option<String>> {
        blob.map(|b| self.decrypt(b)).transpose()
    }

    /// Decrypt for display, substituting [`UNDECRYPTABLE_MARKER`] on failure
    /// so one bad record cannot fail a whole listing.
    pub fn decrypt_or_marker(&self, blob: &EnvelopeBlob) -> String {
        self.decrypt(blob)
            .unwrap_or_else(|_| UNDECRYPTABLE_MARKER.to_string())
    }

    /// Decrypt `blob` and encrypt the plaintext again under `version`.
    /// The intermediate plaintext is zeroised before returning.
    ///
    /// An envelope around the empty string migrates to `None`, the same
    /// null an empty field would have been stored as.
    pub(crate) fn reencrypt(
        &self,
        blob: &EnvelopeBlob,
        version: u32,
    ) -> Result<Option<EnvelopeBlob>> {
        let mut plaintext = self.decrypt(blob)?;
        let sealed = self.encrypt_with_version(&plaintext, version);
        plaintext.zeroize();
        sealed
    }

    fn open_parts(&self, parts: &EnvelopeParts<'_>) -> Result<String> {
        let generation = self.registry.resolve(parts.version as u32)?;
        let key = keys::derive_data_key(generation.secret(), parts.salt, self.kdf_iterations)?;
        let plaintext = crypto::open(key.as_bytes(), &parts.iv, parts.ciphertext, &parts.tag)?;
        String::from_utf8(plaintext).map_err(|err| {
            let mut bytes = err.into_bytes();
            bytes.zeroize();
            PhiVaultError::InvalidPlaintext
        })
    }

    fn report(&self, event: AuditEvent) {
        self.audit.lock().append(AuditRecord::now(event));
    }
}
